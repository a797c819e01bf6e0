use axum::{Json, extract::State, extract::rejection::JsonRejection};
use tracing::info;

use super::super::{ApiError, AppState};
use crate::core::protocol::{ChatReply, ChatRequest};

pub async fn chat_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload.map_err(ApiError::from_rejection)?;
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    info!("Chat request ({} chars)", message.chars().count());
    let reply = state
        .assistant
        .chat(message)
        .await
        .map_err(|e| ApiError::from_chat("Chat", e))?;
    Ok(Json(ChatReply { reply }))
}
