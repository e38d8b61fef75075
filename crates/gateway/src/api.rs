//! Request handlers.
//!
//! - `POST /chat`: one chat turn through the coordinator
//! - `GET  /health`: liveness
//! - `GET  /stats`: cache and session counters

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use simguide_assistant::{CacheStats, ChatReply, ChatRequest};
use simguide_core::{SessionId, Style};
use tracing::info;

use crate::SharedState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> Result<ChatRequest, ApiError> {
        let style = match self.style.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                name.parse::<Style>()
                    .map_err(|e| ApiError::bad_request(e.to_string()))?,
            ),
        };

        let session_id = self
            .session_id
            .into_iter()
            .chain(self.user_id)
            .map(|id| id.trim().to_string())
            .find(|id| !id.is_empty())
            .map(SessionId);

        Ok(ChatRequest {
            message: self.message,
            style,
            session_id,
        })
    }
}

pub(crate) async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(body) = payload?;
    let request = body.into_request()?;

    info!(
        message_len = request.message.len(),
        style = ?request.style,
        has_session = request.session_id.is_some(),
        "Chat request"
    );

    let reply = state.coordinator.handle(request).await?;
    Ok(Json(reply))
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub(crate) async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub(crate) struct StatsResponse {
    cache: CacheStats,
    sessions: usize,
    upstream: String,
    uptime_secs: i64,
}

pub(crate) async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    let coordinator = &state.coordinator;
    Json(StatsResponse {
        cache: coordinator.cache().stats(),
        sessions: coordinator.sessions().len(),
        upstream: coordinator.client().name().to_string(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> ChatBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn session_id_wins_over_user_id() {
        let request = body(serde_json::json!({
            "message": "hi", "user_id": "u-1", "session_id": "s-1"
        }))
        .into_request()
        .unwrap();
        assert_eq!(request.session_id, Some(SessionId::from("s-1")));
    }

    #[test]
    fn user_id_used_when_session_blank() {
        let request = body(serde_json::json!({
            "message": "hi", "user_id": "u-1", "session_id": "  "
        }))
        .into_request()
        .unwrap();
        assert_eq!(request.session_id, Some(SessionId::from("u-1")));
    }

    #[test]
    fn style_is_parsed_case_insensitively() {
        let request = body(serde_json::json!({"message": "hi", "style": "Concise"}))
            .into_request()
            .unwrap();
        assert_eq!(request.style, Some(Style::Concise));
        assert_eq!(request.session_id, None);
    }

    #[test]
    fn unknown_style_is_rejected() {
        let err = body(serde_json::json!({"message": "hi", "style": "verbose"}))
            .into_request()
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
