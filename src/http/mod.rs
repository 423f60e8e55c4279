mod routes;
mod types;

use crate::conversation::ConversationRelay;
use crate::http::routes::*;
use crate::http::types::HttpError;
use crate::messaging::SignatureValidator;
use crate::TracingReloadHandle;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::routing::{get, post};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info};

#[derive(Clone)]
pub struct HttpState {
    pub relay: ConversationRelay,

    /// Present when Twilio signature validation is enabled.
    pub signature_validator: Option<SignatureValidator>,
    pub tracing_reload: Option<TracingReloadHandle>,
}

async fn auth_middleware(
    axum::extract::State(expected_token): axum::extract::State<String>,
    headers: axum::http::HeaderMap,
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, HttpError> {
    let auth_header = headers.get("authorization").ok_or(HttpError {
        status: StatusCode::UNAUTHORIZED,
        message: "Missing authorization header".to_string(),
    })?;

    let auth_str = auth_header.to_str().map_err(|_| HttpError {
        status: StatusCode::BAD_REQUEST,
        message: "Invalid authorization header".to_string(),
    })?;

    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();
    if token != expected_token {
        return Err(HttpError {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid token".to_string(),
        });
    }

    Ok(next.run(request).await)
}

/// Public routes are always mounted. Admin routes only exist when an admin
/// token is configured, and all of them require it.
pub fn create_app(state: HttpState, admin_token: Option<String>) -> axum::Router {
    let mut router = axum::Router::new()
        .route("/", get(index))
        .route("/message", post(whatsapp_webhook));

    match admin_token {
        Some(token) => {
            debug!("Adding authenticated admin routes!");
            let admin = axum::Router::new()
                .route("/db/conversations", post(db_conversations))
                .route("/sys/version", get(sys_version))
                .route("/sys/set-log-level", post(sys_set_log_level))
                .route_layer(axum::middleware::from_fn_with_state(token, auth_middleware));

            router = router.merge(admin);
        }
        None => info!("RELAY_HTTP_AUTH_TOKEN is not set, admin routes are disabled"),
    }

    router
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-version"),
            HeaderValue::from_static(crate::VERSION),
        ))
        .with_state(state)
}
