use crate::config::TwilioConfig;
use crate::error::{RelayError, RelayResult};
use crate::messaging::{whatsapp_address, Notifier};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    sid: String,
}

/// Sends WhatsApp messages through Twilio's Messages API.
pub struct TwilioClient {
    http_client: Client,
    account_sid: String,
    auth_token: String,
    messages_url: String,
    from_address: String,
    max_reply_chars: usize,
}
impl TwilioClient {
    pub fn new(config: &TwilioConfig, account_sid: String, auth_token: String) -> Result<Self> {
        let phone_number = config.phone_number.as_deref().ok_or_else(|| {
            anyhow!("Missing Twilio sender number, set TWILIO_NUMBER or twilio.phone_number!")
        })?;

        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build Twilio Reqwest client!")?;

        Ok(Self {
            http_client,
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                config.base_url.trim_end_matches('/'),
                account_sid
            ),
            account_sid,
            auth_token,
            from_address: whatsapp_address(phone_number),
            max_reply_chars: config.max_reply_chars,
        })
    }
}

#[async_trait]
impl Notifier for TwilioClient {
    #[instrument(skip(self, body), fields(reply_length = body.len()))]
    async fn send(&self, recipient: &str, body: &str) -> RelayResult<String> {
        let to = whatsapp_address(recipient);
        let reply = truncate_chars(body, self.max_reply_chars);
        if reply.len() < body.len() {
            warn!("Reply truncated to {} characters", self.max_reply_chars);
        }

        let response = self
            .http_client
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.from_address.as_str()),
                ("To", to.as_str()),
                ("Body", reply),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Notification(format!("Failed to call Twilio API: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Notification(format!("{status}: {error_text}")));
        }

        let created = response
            .json::<CreatedMessage>()
            .await
            .map_err(|e| RelayError::Notification(format!("Parse error: {e}")))?;

        debug!("Twilio accepted message {}", created.sid);
        Ok(created.sid)
    }
}

/// Cuts `text` down to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer, max_reply_chars: usize) -> TwilioClient {
        let config = TwilioConfig {
            base_url: server.uri(),
            phone_number: Some("+14155238886".to_string()),
            max_reply_chars,
            ..TwilioConfig::default()
        };
        TwilioClient::new(&config, "AC123".to_string(), "token123".to_string()).unwrap()
    }

    #[test]
    fn test_requires_sender_number() {
        let config = TwilioConfig::default();
        assert!(TwilioClient::new(&config, "AC123".to_string(), "token".to_string()).is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("Hi there!", 1600), "Hi there!");
        assert_eq!(truncate_chars("Hi there!", 2), "Hi");
        assert_eq!(truncate_chars("Ñoño😀😀", 5), "Ñoño😀");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(basic_auth("AC123", "token123"))
            .and(body_string_contains("From=whatsapp%3A%2B14155238886"))
            .and(body_string_contains("To=whatsapp%3A%2B15551234567"))
            .and(body_string_contains("Body=Hi+there%21"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sid": "SM0001",
                "status": "queued"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sid = client_for(&server, 1600)
            .send("+15551234567", "Hi there!")
            .await
            .unwrap();
        assert_eq!(sid, "SM0001");
    }

    #[tokio::test]
    async fn test_send_truncates_long_replies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(|request: &Request| request.body.ends_with(b"&Body=abcd"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM0002" })))
            .expect(1)
            .mount(&server)
            .await;

        let sid = client_for(&server, 4)
            .send("+15551234567", "abcdefgh")
            .await
            .unwrap();
        assert_eq!(sid, "SM0002");
    }

    #[tokio::test]
    async fn test_send_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 21211,
                "message": "The 'To' number is not a valid phone number."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 1600)
            .send("+15551234567", "Hi there!")
            .await
            .unwrap_err();
        match err {
            RelayError::Notification(message) => assert!(message.contains("400")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
