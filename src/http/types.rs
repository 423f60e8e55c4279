use crate::error::RelayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct SuccessfulResponse<T> {
    pub success: bool,
    pub response: T,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

pub struct HttpSuccess<T>(pub T);
impl<T: Serialize> IntoResponse for HttpSuccess<T> {
    fn into_response(self) -> Response {
        Json(SuccessfulResponse {
            success: true,
            response: self.0,
        })
        .into_response()
    }
}

#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}
impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}
impl From<RelayError> for HttpError {
    fn from(error: RelayError) -> Self {
        let status = match error {
            RelayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Signature(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpError {
            status,
            message: error.to_string(),
        }
    }
}

pub type HttpResult<T> = Result<HttpSuccess<T>, HttpError>;

#[derive(Deserialize)]
pub struct ConversationFetchRequest {
    pub sender: String,

    #[serde(default)]
    pub limit: Option<u64>,

    #[serde(default)]
    pub offset: Option<u64>,

    #[serde(default)]
    pub reverse: bool,
}

#[derive(Deserialize)]
pub struct SetLogLevelRequest {
    pub level: String,
}
