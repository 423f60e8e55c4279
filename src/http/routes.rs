use crate::conversation::{Conversation, InboundMessage};
use crate::http::types::{
    ConversationFetchRequest, HttpError, HttpResult, HttpSuccess, SetLogLevelRequest,
};
use crate::http::HttpState;
use crate::messaging::{strip_whatsapp_prefix, SIGNATURE_HEADER};
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

/// Reachability check, e.g. through a tunnel.
pub async fn index() -> Json<Value> {
    Json(json!({ "msg": "working" }))
}

/// Twilio inbound message webhook. Anything past request validation is
/// acknowledged with an empty 200, whatever happened downstream.
#[instrument(skip_all)]
pub async fn whatsapp_webhook(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Result<StatusCode, HttpError> {
    if let Some(validator) = &state.signature_validator {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());

        validator.validate(signature, &params).map_err(|e| {
            warn!("Rejecting webhook request: {e}");
            HttpError::from(e)
        })?;
    }

    let inbound = InboundMessage::from_form(&params).map_err(|e| {
        warn!("Rejecting webhook request: {e}");
        HttpError::from(e)
    })?;

    if inbound.is_blank() {
        debug!("Ignoring blank message from {}", inbound.sender);
        return Ok(StatusCode::OK);
    }

    info!("Received message from {}", inbound.sender);
    let outcome = state.relay.relay(&inbound).await;
    debug!(
        conversation_id = ?outcome.conversation_id,
        message_sid = ?outcome.message_sid,
        replied = outcome.reply.is_some(),
        "Acknowledging webhook"
    );
    Ok(StatusCode::OK)
}

pub async fn db_conversations(
    State(state): State<HttpState>,
    Json(payload): Json<ConversationFetchRequest>,
) -> HttpResult<Vec<Conversation>> {
    let conversations = state
        .relay
        .borrow_store()
        .get_conversations(
            strip_whatsapp_prefix(payload.sender.trim()),
            payload.limit,
            payload.offset,
            payload.reverse,
        )
        .await?;

    Ok(HttpSuccess(conversations))
}

pub async fn sys_version(State(_state): State<HttpState>) -> HttpResult<String> {
    Ok(HttpSuccess(crate::VERSION.to_string()))
}

pub async fn sys_set_log_level(
    State(state): State<HttpState>,
    Json(payload): Json<SetLogLevelRequest>,
) -> HttpResult<bool> {
    let filter = EnvFilter::from_str(&payload.level).map_err(|e| HttpError {
        status: StatusCode::BAD_REQUEST,
        message: e.to_string(),
    })?;

    let tracing_reload = state.tracing_reload.as_ref().ok_or(HttpError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "Log level reloading is unavailable".to_string(),
    })?;

    info!("Setting log level to {filter} via API");
    let success = tracing_reload
        .reload(filter)
        .map(|_| true)
        .map_err(|e| HttpError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })?;

    Ok(HttpSuccess(success))
}
