mod signature;
mod twilio;

pub use signature::{SignatureValidator, SIGNATURE_HEADER};
pub use twilio::TwilioClient;

use crate::error::RelayResult;
use async_trait::async_trait;

pub const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Delivers a reply back to the person who wrote in.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns the provider's id for the created message.
    async fn send(&self, recipient: &str, body: &str) -> RelayResult<String>;
}

/// `whatsapp:+15551234567` -> `+15551234567`, anything else is returned as-is.
pub fn strip_whatsapp_prefix(address: &str) -> &str {
    address.strip_prefix(WHATSAPP_PREFIX).unwrap_or(address)
}

/// `+15551234567` -> `whatsapp:+15551234567`, never prefixing twice.
pub fn whatsapp_address(number: &str) -> String {
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_prefix() {
        assert_eq!(strip_whatsapp_prefix("whatsapp:+15551234567"), "+15551234567");
        assert_eq!(strip_whatsapp_prefix("+15551234567"), "+15551234567");
        assert_eq!(strip_whatsapp_prefix(""), "");

        assert_eq!(whatsapp_address("+15551234567"), "whatsapp:+15551234567");
        assert_eq!(
            whatsapp_address("whatsapp:+14155238886"),
            "whatsapp:+14155238886"
        );
    }
}
