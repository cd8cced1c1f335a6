use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::tickets::TicketKind;

use super::event::{self, EventEnvelope};
use super::{AppState, constant_time_eq};

/// GET / — liveness probe.
pub(super) async fn handle_health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub(super) struct DebugFormQuery {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: Option<String>,
}

/// GET /debug-form?type=<slug> — the form widget layout as the platform
/// reports it. Gated by the debug token when one is configured.
pub(super) async fn handle_debug_form(
    State(state): State<AppState>,
    Query(query): Query<DebugFormQuery>,
) -> Response {
    if let Some(expected) = &state.debug_token {
        let supplied = query.token.as_deref().unwrap_or_default();
        if !constant_time_eq(supplied, expected) {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "missing or invalid token" })),
            )
                .into_response();
        }
    }

    let Ok(kind) = query.kind.parse::<TicketKind>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown ticket type: {}", query.kind) })),
        )
            .into_response();
    };

    let code = state.rules.snapshot().approval_code(kind).to_string();
    match state.platform.approval_definition(&code).await {
        Ok(definition) => {
            let body = json!({
                "approval_name": definition.approval_name,
                "approval_code": code,
                "submit_only": definition.is_submit_only(),
                "widgets": definition.form_widgets(),
            });
            let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                pretty,
            )
                .into_response()
        }
        Err(e) => {
            warn!(kind = %kind, error = %e, "definition fetch for debug view failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// POST /feishu/events — event subscription endpoint.
///
/// Always acks quickly: the handshake is answered inline, messages are
/// handed to the chat handler on a spawned task so the platform never
/// retries on our processing latency.
pub(super) async fn handle_event(
    State(state): State<AppState>,
    body: Result<Json<EventEnvelope>, JsonRejection>,
) -> Response {
    let Ok(Json(envelope)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid json" })),
        )
            .into_response();
    };

    // Plaintext mode: the subscription token is the only gate.
    if let Some(expected) = &state.verify_token
        && !constant_time_eq(envelope.verification_token(), expected)
    {
        warn!("event rejected: verification token mismatch");
        return StatusCode::FORBIDDEN.into_response();
    }

    if envelope.is_url_verification() {
        let challenge = envelope.challenge.clone().unwrap_or_default();
        return Json(json!({ "challenge": challenge })).into_response();
    }

    match (&envelope.header, &envelope.event) {
        (Some(header), Some(event)) if header.event_type == "im.message.receive_v1" => {
            match event::decode_message(&header.event_id, event) {
                Ok(message) => {
                    let chat = state.chat.clone();
                    tokio::spawn(async move {
                        chat.handle(message).await;
                    });
                }
                Err(e) => debug!(error = %e, "undecodable message event"),
            }
        }
        (Some(header), _) => {
            debug!(event_type = %header.event_type, "ignored event type");
        }
        _ => debug!("event without header ignored"),
    }

    StatusCode::OK.into_response()
}
