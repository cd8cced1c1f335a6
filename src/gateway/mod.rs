//! Axum HTTP gateway: liveness, the Feishu event subscription and a form
//! debug view. Body limits and a request timeout guard the listener.

mod event;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::chat::ChatHandler;
use crate::platform::FeishuClient;
use crate::rules::RuleStore;

/// Maximum request body size; Feishu events are small JSON documents.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout to shed stuck clients.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatHandler>,
    pub platform: Arc<FeishuClient>,
    pub rules: Arc<RuleStore>,
    /// Event-subscription verification token; `None` disables the check.
    pub verify_token: Option<Arc<str>>,
    /// Token for `/debug-form`; `None` leaves the endpoint open.
    pub debug_token: Option<Arc<str>>,
}

#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_health))
        .route("/debug-form", get(handlers::handle_debug_form))
        .route("/feishu/events", post(handlers::handle_event))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
