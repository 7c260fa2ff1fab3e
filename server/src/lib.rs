//! kvsync server - change-notifying key-value store.
//!
//! Serves a flat JSON key-value store over HTTP and pushes a change event to
//! every connected client over a WebSocket stream whenever a write commits.
//! Clients use the events as hints to pull a fresh snapshot; the snapshot,
//! not the event stream, is the source of truth.

pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod origin;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::notify::ChangeNotifier;
use crate::store::{Backend, KvStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<KvStore>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire a backend into a store with its own notifier.
    pub fn new(backend: Backend, config: Config) -> Self {
        let notifier = ChangeNotifier::new_shared(config.subscriber_buffer);
        let store = KvStore::new(backend, notifier, config.max_key_len);
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .merge(routes::create_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
