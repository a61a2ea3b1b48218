//! `ElasticStore` against a minimal in-process imitation of the
//! Elasticsearch document API.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, head, post, put},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use chanlog::fics::message::ChannelTell;
use chanlog::store::{ElasticStore, Store, StoreError, handle_or_text};

#[derive(Default)]
struct Mock {
    index_created: AtomicBool,
    docs: Mutex<Vec<Value>>,
    last_query: Mutex<Option<Value>>,
    /// Requests that landed outside the `logs` index.
    foreign_hits: Mutex<Vec<String>>,
}

async fn index_exists(State(mock): State<Arc<Mock>>) -> StatusCode {
    if mock.index_created.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(State(mock): State<Arc<Mock>>) -> Json<Value> {
    mock.index_created.store(true, Ordering::SeqCst);
    Json(json!({"acknowledged": true}))
}

async fn index_doc(State(mock): State<Arc<Mock>>, Json(doc): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut docs = mock.docs.lock();
    docs.push(doc);
    let id = format!("doc-{}", docs.len() - 1);
    (StatusCode::CREATED, Json(json!({"_id": id, "result": "created"})))
}

async fn get_doc(State(mock): State<Arc<Mock>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let docs = mock.docs.lock();
    let found = id
        .strip_prefix("doc-")
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|n| docs.get(n));
    match found {
        Some(doc) => (
            StatusCode::OK,
            Json(json!({"_id": id, "found": true, "_source": doc})),
        ),
        None => (StatusCode::NOT_FOUND, Json(json!({"_id": id, "found": false}))),
    }
}

async fn foreign_doc(State(mock): State<Arc<Mock>>, Path(id): Path<String>) -> Json<Value> {
    mock.foreign_hits.lock().push(id.clone());
    Json(json!({"_id": id, "found": true, "_source": {"handle": "Secret", "channel": 0, "text": "other index"}}))
}

async fn search(State(mock): State<Arc<Mock>>, Json(query): Json<Value>) -> Json<Value> {
    *mock.last_query.lock() = Some(query);
    let hits: Vec<Value> = mock
        .docs
        .lock()
        .iter()
        .map(|doc| json!({"_score": 1.0, "_source": doc}))
        .collect();
    Json(json!({"hits": {"total": {"value": hits.len()}, "hits": hits}}))
}

async fn start_mock() -> (String, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/logs", put(create_index).head(index_exists))
        .route("/logs/_doc", post(index_doc))
        .route("/logs/_doc/{id}", get(get_doc))
        .route("/logs/_search", post(search))
        .route("/private/_doc/{id}", get(foreign_doc))
        .route("/broken", head(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(Arc::clone(&mock));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });
    (url, mock)
}

fn tell(handle: &str, text: &str) -> ChannelTell {
    ChannelTell {
        handle: handle.into(),
        channel: 39,
        text: text.into(),
    }
}

#[tokio::test]
async fn connect_creates_missing_index() {
    let (url, mock) = start_mock().await;
    ElasticStore::connect(&url, "logs").await.unwrap();
    assert!(mock.index_created.load(Ordering::SeqCst));

    // A second connect finds it and leaves it alone.
    ElasticStore::connect(&format!("{url}/"), "logs").await.unwrap();
}

#[tokio::test]
async fn put_get_and_search() {
    let (url, mock) = start_mock().await;
    let store = ElasticStore::connect(&url, "logs").await.unwrap();

    let first = store.put(&tell("Fred", "anyone for blitz?")).await.unwrap();
    let second = store.put(&tell("Bob", "hi")).await.unwrap();
    assert_eq!(first, "doc-0");
    assert_eq!(second, "doc-1");

    assert_eq!(store.get(&second).await.unwrap(), tell("Bob", "hi"));
    let missing = store.get("doc-9").await.unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(id) if id == "doc-9"));

    let hits = store.search(&handle_or_text("blitz"), 5).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0], tell("Fred", "anyone for blitz?"));

    let query = mock.last_query.lock().clone().unwrap();
    assert_eq!(query["size"], json!(5));
    assert_eq!(
        query["query"]["bool"]["should"],
        json!([
            {"match": {"handle": "blitz"}},
            {"match": {"text": "blitz"}},
        ])
    );
}

#[tokio::test]
async fn server_errors_surface_as_status() {
    let (url, _mock) = start_mock().await;
    let err = ElasticStore::connect(&url, "broken").await.unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 500, .. }), "{err:?}");
}

#[tokio::test]
async fn ids_stay_inside_the_index() {
    let (url, mock) = start_mock().await;
    let store = ElasticStore::connect(&url, "logs").await.unwrap();

    for id in ["../../private/_doc/1", "../private/_doc/1", "..", "."] {
        let err = store.get(id).await.unwrap_err();
        assert!(matches!(&err, StoreError::NotFound(missing) if missing == id), "{id}: {err:?}");
    }
    assert_eq!(*mock.foreign_hits.lock(), Vec::<String>::new());
}
