use crate::completion::Completer;
use crate::config::OpenAIConfig;
use crate::error::{RelayError, RelayResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    n: u8,
    stop: Option<&'a str>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completion client, one system persona plus the user's message per call.
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    completions_url: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}
impl OpenAIClient {
    pub fn new(config: &OpenAIConfig, api_key: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build OpenAI Reqwest client!")?;

        Ok(Self {
            http_client,
            api_key,
            completions_url: format!(
                "{}/v1/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_request<'a>(&'a self, message: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: message,
                },
            ],
            max_tokens: self.max_tokens,
            n: 1,
            stop: None,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Completer for OpenAIClient {
    #[instrument(skip_all, fields(model = %self.model, message_length = message.len()))]
    async fn complete(&self, message: &str) -> RelayResult<String> {
        debug!("Sending request to OpenAI API");
        let response = self
            .http_client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(message))
            .send()
            .await
            .map_err(|e| RelayError::Completion(format!("Failed to call OpenAI API: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Completion(format!("{status}: {error_text}")));
        }

        let chat_response = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| RelayError::Completion(format!("Parse error: {e}")))?;

        let reply = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| RelayError::Completion("No choices in response".to_string()))?;

        debug!("Successfully received OpenAI response");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAIClient {
        let config = OpenAIConfig {
            base_url: server.uri(),
            system_prompt: "You are a chef.".to_string(),
            ..OpenAIConfig::default()
        };
        OpenAIClient::new(&config, "sk-test".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_completion_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "messages": [
                    { "role": "system", "content": "You are a chef." },
                    { "role": "user", "content": "Hello" }
                ],
                "max_tokens": 200,
                "n": 1,
                "stop": null,
                "temperature": 0.5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    { "index": 0, "message": { "role": "assistant", "content": " Hi there!\n" } },
                    { "index": 1, "message": { "role": "assistant", "content": "Ignored" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server).complete("Hello").await.unwrap();
        assert_eq!(reply, " Hi there!\n");
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete("Hello").await.unwrap_err();
        match err {
            RelayError::Completion(message) => {
                assert!(message.contains("429"));
                assert!(message.contains("rate limited"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete("Hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Completion(_)));
    }

    #[tokio::test]
    async fn test_whitespace_reply_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": " \n " } }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete("Hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Completion(_)));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let config = OpenAIConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..OpenAIConfig::default()
        };
        let client = OpenAIClient::new(&config, "sk-test".to_string()).unwrap();

        let err = client.complete("Hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Completion(_)));
    }
}
