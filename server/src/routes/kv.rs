//! Key-value and backup routes.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use kvsync_engine::protocol::{
    BulkSetRequest, CountResponse, RemoveResponse, SetRequest, SetResponse,
};
use kvsync_engine::Snapshot;

use crate::error::Result;
use crate::handlers::{
    handle_bulk_set, handle_clear, handle_get_all, handle_get_entry, handle_remove, handle_set,
    SnapshotQuery,
};
use crate::origin::Origin;
use crate::store::Entry;
use crate::AppState;

/// Create key-value routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/kv",
            get(get_all_handler).post(set_handler).delete(clear_handler),
        )
        .route("/api/kv/bulk", post(bulk_set_handler))
        .route(
            "/api/kv/entries/{key}",
            get(get_entry_handler).delete(remove_handler),
        )
        .route("/api/backup", get(backup_handler).post(restore_handler))
}

/// GET /api/kv - Full snapshot, or a subset with `?keys=a,b`.
async fn get_all_handler(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<Snapshot>> {
    Ok(Json(handle_get_all(&state.store, query).await?))
}

/// POST /api/kv - Upsert one entry.
async fn set_handler(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(request): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    Ok(Json(handle_set(&state.store, origin, request).await?))
}

/// POST /api/kv/bulk - Upsert many entries atomically.
async fn bulk_set_handler(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(request): Json<BulkSetRequest>,
) -> Result<Json<CountResponse>> {
    Ok(Json(handle_bulk_set(&state.store, origin, request).await?))
}

/// DELETE /api/kv - Remove every entry.
async fn clear_handler(
    State(state): State<AppState>,
    Origin(origin): Origin,
) -> Result<Json<CountResponse>> {
    Ok(Json(handle_clear(&state.store, origin).await?))
}

/// GET /api/kv/entries/{key} - One entry with its timestamp.
async fn get_entry_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Entry>> {
    Ok(Json(handle_get_entry(&state.store, &key).await?))
}

/// DELETE /api/kv/entries/{key} - Remove one entry.
async fn remove_handler(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Path(key): Path<String>,
) -> Result<Json<RemoveResponse>> {
    Ok(Json(handle_remove(&state.store, origin, &key).await?))
}

/// GET /api/backup - Full snapshot as a download.
async fn backup_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let snapshot = state.store.get_all().await?;
    Ok((
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"backup.json\"",
        )],
        Json(snapshot),
    ))
}

/// POST /api/backup - Restore a snapshot by bulk-writing every entry in it.
async fn restore_handler(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(data): Json<Snapshot>,
) -> Result<Json<CountResponse>> {
    let response = handle_bulk_set(&state.store, origin, BulkSetRequest { data }).await?;
    tracing::info!(count = response.count, "Backup restored");
    Ok(Json(response))
}
