//! Elasticsearch-compatible HTTP store.
use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{Criteria, Store, StoreError};
use crate::fics::message::ChannelTell;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ElasticStore {
    client: Client,
    /// `{base}/{index}`.
    index_url: Url,
}

#[derive(Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: ChannelTell,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: ChannelTell,
}

impl ElasticStore {
    /// Build a client for `index` at `base_url` without touching the server.
    pub fn new(base_url: &str, index: &str) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base = Url::parse(base_url).map_err(|_| StoreError::InvalidUrl(base_url.to_owned()))?;
        let index_url = join(&base, &[index]).ok_or_else(|| StoreError::InvalidUrl(base_url.to_owned()))?;
        Ok(Self { client, index_url })
    }

    /// URL of `segments` under the index. Each segment is percent-encoded, so
    /// a `/` or `..` inside one can never leave the index.
    fn endpoint(&self, segments: &[&str]) -> Url {
        join(&self.index_url, segments).unwrap_or_else(|| self.index_url.clone())
    }

    /// Build a client and create the index if it does not exist yet.
    pub async fn connect(base_url: &str, index: &str) -> Result<Self, StoreError> {
        let store = Self::new(base_url, index)?;
        store.ensure_index().await?;
        Ok(store)
    }

    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let resp = self.client.head(self.index_url.clone()).send().await?;
        if resp.status().is_success() {
            debug!(url = %self.index_url, "index exists");
            return Ok(());
        }
        if resp.status() != StatusCode::NOT_FOUND {
            return Err(status_error(resp).await);
        }
        let resp = self.client.put(self.index_url.clone()).send().await?;
        check(resp).await?;
        info!(url = %self.index_url, "created index");
        Ok(())
    }
}

/// `None` when `base` cannot carry a path (e.g. `mailto:`).
fn join(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

/// Document ids are opaque single path segments. Dot segments would be
/// dropped or resolved by URL handling, so they can never name a document.
fn is_valid_id(id: &str) -> bool {
    !matches!(id, "" | "." | "..")
}

async fn status_error(resp: Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Status { status, body }
}

async fn check(resp: Response) -> Result<Response, StoreError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(status_error(resp).await)
    }
}

/// `bool.should` query with one `match` clause per criterion.
fn search_body(criteria: &Criteria, limit: usize) -> Value {
    let should: Vec<Value> = criteria
        .iter()
        .map(|(field, value)| {
            let mut clause = Map::new();
            clause.insert(field.clone(), Value::String(value.clone()));
            json!({ "match": clause })
        })
        .collect();
    let query = if should.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "should": should, "minimum_should_match": 1 } })
    };
    json!({ "query": query, "size": limit })
}

impl Store for ElasticStore {
    async fn put(&self, tell: &ChannelTell) -> Result<String, StoreError> {
        let resp = self
            .client
            .post(self.endpoint(&["_doc"]))
            .json(tell)
            .send()
            .await?;
        let indexed: IndexResponse = check(resp).await?.json().await?;
        if indexed.id.is_empty() {
            return Err(StoreError::Malformed("empty document id"));
        }
        Ok(indexed.id)
    }

    async fn get(&self, id: &str) -> Result<ChannelTell, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        let resp = self
            .client
            .get(self.endpoint(&["_doc", id]))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        let doc: GetResponse = check(resp).await?.json().await?;
        Ok(doc.source)
    }

    async fn search(&self, criteria: &Criteria, limit: usize) -> Result<Vec<ChannelTell>, StoreError> {
        let resp = self
            .client
            .post(self.endpoint(&["_search"]))
            .json(&search_body(criteria, limit))
            .send()
            .await?;
        let found: SearchResponse = check(resp).await?.json().await?;
        Ok(found.hits.hits.into_iter().map(|hit| hit.source).collect())
    }
}
