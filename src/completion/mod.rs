mod openai;

pub use openai::OpenAIClient;

use crate::error::RelayResult;
use async_trait::async_trait;

/// Produces exactly one reply for one inbound message.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, message: &str) -> RelayResult<String>;
}
