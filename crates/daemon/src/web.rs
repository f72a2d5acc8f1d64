// HTTP inspection surface: read-only JSON views over the metadata
// store. Handlers never mutate kernel state.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::error;

use limpet_common::{LogEntry, StatusSummary, TrackedDocument};

use crate::store::logs::LogStore;
use crate::store::status::StatusStore;
use crate::store::tracked::TrackedStore;
use crate::store::MetaDb;

const LOG_PAGE_SIZE: u64 = 100;
const RECENT_LOGS: u64 = 20;

#[derive(Clone)]
pub struct WebState {
    db: Arc<Mutex<MetaDb>>,
}

pub fn router(db: MetaDb) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/log", get(log_page))
        .route("/tracked", get(tracked_list))
        .route("/tracked/{id}", get(tracked_view))
        .with_state(WebState { db: Arc::new(Mutex::new(db)) })
}

pub async fn serve(
    listener: TcpListener,
    db: MetaDb,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(db))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(Into::into)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    #[serde(flatten)]
    pub status: StatusSummary,
    pub recent_logs: Vec<LogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogPageResponse {
    pub logs: Vec<LogEntry>,
    pub offset: u64,
    pub prev_offset: u64,
    pub next_offset: u64,
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default)]
    offset: u64,
}

fn with_db<T>(
    state: &WebState,
    f: impl FnOnce(&rusqlite::Connection) -> anyhow::Result<T>,
) -> Result<T, StatusCode> {
    let db = state.db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    f(db.connection()).map_err(|err| {
        error!(error = %err, "inspection query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn index(State(state): State<WebState>) -> Result<Json<IndexResponse>, StatusCode> {
    let now = Utc::now();
    with_db(&state, |conn| {
        Ok(IndexResponse {
            status: StatusSummary {
                tracking: TrackedStore::count(conn)?,
                need_update: TrackedStore::due_count(conn, now)?,
                in_flight: StatusStore::in_flight(conn)?,
            },
            recent_logs: LogStore::recent(conn, RECENT_LOGS)?,
        })
    })
    .map(Json)
}

async fn log_page(
    State(state): State<WebState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogPageResponse>, StatusCode> {
    with_db(&state, |conn| {
        Ok(LogPageResponse {
            logs: LogStore::page(conn, query.offset, LOG_PAGE_SIZE)?,
            offset: query.offset,
            prev_offset: query.offset.saturating_sub(LOG_PAGE_SIZE),
            next_offset: query.offset + LOG_PAGE_SIZE,
        })
    })
    .map(Json)
}

async fn tracked_list(
    State(state): State<WebState>,
) -> Result<Json<Vec<TrackedDocument>>, StatusCode> {
    with_db(&state, TrackedStore::list).map(Json)
}

async fn tracked_view(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> Result<Json<TrackedDocument>, StatusCode> {
    let doc = with_db(&state, |conn| TrackedStore::get(conn, &id))?;
    doc.map(Json).ok_or(StatusCode::NOT_FOUND)
}
