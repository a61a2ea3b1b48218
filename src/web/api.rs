//! JSON lookup endpoints over the message store.
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::warn;

use super::AppState;
use crate::fics::message::ChannelTell;
use crate::store::{Criteria, Store, StoreError, handle_or_text};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Matched against handle and text. Absent or blank lists recent tells.
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn status_for(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// `GET /api/search?q=<term>&limit=<n>`
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ChannelTell>>, StatusCode> {
    let criteria = match params.q.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => handle_or_text(term),
        _ => Criteria::new(),
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    state.store.search(&criteria, limit).await.map(Json).map_err(|e| {
        warn!(error = %e, "api: search failed");
        status_for(&e)
    })
}

/// `GET /api/messages/{id}`
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChannelTell>, StatusCode> {
    state.store.get(&id).await.map(Json).map_err(|e| {
        if !matches!(e, StoreError::NotFound(_)) {
            warn!(%id, error = %e, "api: lookup failed");
        }
        status_for(&e)
    })
}
