//! Message store: persists channel tells and answers searches.
//!
//! The read loop is the only producer (`put`); the web API and the tell
//! responder only read (`get`, `search`). Failures are reported to the
//! caller, which logs them and moves on.
pub mod elastic;
pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{info, warn};

use crate::fics::message::ChannelTell;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

/// Search criteria: field name → value. A message matches if any field
/// matches.
pub type Criteria = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("message {0} not found")]
    NotFound(String),
    #[error("invalid store URL {0:?}")]
    InvalidUrl(String),
    #[error("malformed store response: {0}")]
    Malformed(&'static str),
}

pub trait Store: Send + Sync {
    /// Persist a message and return its identifier.
    fn put(&self, tell: &ChannelTell) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<ChannelTell, StoreError>> + Send;

    /// Up to `limit` matching messages, most relevant or most recent first.
    fn search(
        &self,
        criteria: &Criteria,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChannelTell>, StoreError>> + Send;
}

/// The store selected at startup.
#[derive(Debug)]
pub enum StoreBackend {
    Elastic(ElasticStore),
    Memory(MemoryStore),
}

impl StoreBackend {
    /// Connect to Elasticsearch at `url`, or fall back to an in-memory store
    /// holding `memory_capacity` tells when no URL is configured.
    pub async fn connect(
        url: Option<&str>,
        index: &str,
        memory_capacity: usize,
    ) -> Result<Self, StoreError> {
        match url {
            Some(url) => {
                let store = ElasticStore::connect(url, index).await?;
                info!(index, "using elasticsearch store");
                Ok(Self::Elastic(store))
            }
            None => {
                warn!(memory_capacity, "no store URL configured, messages are kept in memory only");
                Ok(Self::Memory(MemoryStore::with_capacity(memory_capacity)))
            }
        }
    }
}

impl Store for StoreBackend {
    async fn put(&self, tell: &ChannelTell) -> Result<String, StoreError> {
        match self {
            Self::Elastic(store) => store.put(tell).await,
            Self::Memory(store) => store.put(tell).await,
        }
    }

    async fn get(&self, id: &str) -> Result<ChannelTell, StoreError> {
        match self {
            Self::Elastic(store) => store.get(id).await,
            Self::Memory(store) => store.get(id).await,
        }
    }

    async fn search(&self, criteria: &Criteria, limit: usize) -> Result<Vec<ChannelTell>, StoreError> {
        match self {
            Self::Elastic(store) => store.search(criteria, limit).await,
            Self::Memory(store) => store.search(criteria, limit).await,
        }
    }
}

/// Criteria matching `term` against both the sender and the text.
pub fn handle_or_text(term: &str) -> Criteria {
    Criteria::from([
        ("handle".to_owned(), term.to_owned()),
        ("text".to_owned(), term.to_owned()),
    ])
}
