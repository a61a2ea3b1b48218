//! In-memory store, used when no search backend is configured.
//!
//! Holds at most `capacity` tells and evicts the oldest first. Ids map to a
//! sequence number, so `get` is a hash lookup plus an offset into the queue.
use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use uuid::Uuid;

use super::{Criteria, Store, StoreError};
use crate::fics::message::ChannelTell;

/// Default number of retained tells.
pub const DEFAULT_CAPACITY: usize = 100_000;

#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order; newest last.
    messages: VecDeque<(String, ChannelTell)>,
    /// Id → sequence number of the tell.
    ids: HashMap<String, u64>,
    /// Sequence number of `messages[0]`.
    first_seq: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps the newest `capacity` tells (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handles compare case-insensitively, text matches on substring, channel on
/// the number. Unknown fields never match.
fn field_matches(tell: &ChannelTell, field: &str, value: &str) -> bool {
    match field {
        "handle" => tell.handle.eq_ignore_ascii_case(value),
        "text" => tell.text.to_lowercase().contains(&value.to_lowercase()),
        "channel" => value.parse() == Ok(tell.channel),
        _ => false,
    }
}

impl Store for MemoryStore {
    async fn put(&self, tell: &ChannelTell) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write();
        let seq = inner.first_seq + inner.messages.len() as u64;
        inner.messages.push_back((id.clone(), tell.clone()));
        inner.ids.insert(id.clone(), seq);
        while inner.messages.len() > self.capacity {
            if let Some((evicted, _)) = inner.messages.pop_front() {
                inner.ids.remove(&evicted);
                inner.first_seq += 1;
            }
        }
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<ChannelTell, StoreError> {
        let inner = self.inner.read();
        inner
            .ids
            .get(id)
            .and_then(|seq| inner.messages.get((seq - inner.first_seq) as usize))
            .map(|(_, tell)| tell.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    async fn search(&self, criteria: &Criteria, limit: usize) -> Result<Vec<ChannelTell>, StoreError> {
        Ok(self
            .inner
            .read()
            .messages
            .iter()
            .rev()
            .map(|(_, tell)| tell)
            .filter(|tell| {
                criteria.is_empty() || criteria.iter().any(|(f, v)| field_matches(tell, f, v))
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
