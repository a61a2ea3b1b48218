//! Tell responder: answers private tells sent to the logger's account.
//!
//! `search <term>` looks the term up in the store (as a handle or in the
//! text) and replies with the top hits. Anything else gets a short greeting
//! explaining how to search. Tells from handles on the ignore list are
//! dropped so that server robots never get into a reply loop with us.
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::fics::message::PrivateTell;
use crate::store::{Store, handle_or_text};

/// Hits included in a search reply.
pub const SEARCH_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct Responder {
    /// Our own handle, as resolved at login.
    name: String,
    /// Lowercased handles whose tells are ignored.
    ignore: HashSet<String>,
}

impl Responder {
    pub fn new<I, H>(name: impl Into<String>, ignore: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: AsRef<str>,
    {
        Self {
            name: name.into(),
            ignore: ignore
                .into_iter()
                .map(|h| h.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_ignored(&self, handle: &str) -> bool {
        self.ignore.contains(&handle.to_ascii_lowercase())
    }

    /// The command to send back for `tell`, if any.
    pub async fn respond<St: Store>(&self, tell: &PrivateTell, store: &St) -> Option<String> {
        if self.is_ignored(&tell.handle) {
            debug!(handle = %tell.handle, "bot: ignoring tell");
            return None;
        }

        let mut words = tell.text.split_whitespace();
        let response = match (words.next(), words.next()) {
            (Some("search"), Some(term)) => self.search(term, store).await,
            _ => self.greeting(&tell.handle),
        };
        Some(format!("t {} {}", tell.handle, response))
    }

    async fn search<St: Store>(&self, term: &str, store: &St) -> String {
        let hits = match store.search(&handle_or_text(term), SEARCH_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(term, error = %e, "bot: search failed");
                Vec::new()
            }
        };
        if hits.is_empty() {
            return format!("No results found for {term}");
        }
        hits.iter()
            .map(|hit| format!(" [{}: {}] ", hit.handle, hit.text))
            .collect()
    }

    fn greeting(&self, handle: &str) -> String {
        format!(
            "Hello {handle}, I am {name}. Looking for something? Type \"tell {name} search [term]\"",
            name = self.name
        )
    }
}
