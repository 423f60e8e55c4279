use thiserror::Error;

/// Every way a single relay cycle can go wrong.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Malformed webhook request: {0}")]
    MalformedRequest(String),

    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Failed to persist conversation: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Failed to notify sender: {0}")]
    Notification(String),

    #[error("Webhook signature rejected: {0}")]
    Signature(&'static str),
}

pub type RelayResult<T> = Result<T, RelayError>;
