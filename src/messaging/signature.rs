use crate::error::{RelayError, RelayResult};
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Checks `X-Twilio-Signature` against the public webhook URL and form fields.
///
/// Twilio signs `url + key1 + value1 + key2 + value2 ...` with the account's
/// auth token, keys sorted, and sends the base64 HMAC-SHA1 digest.
#[derive(Clone)]
pub struct SignatureValidator {
    auth_token: String,
    webhook_url: String,
}
impl SignatureValidator {
    pub fn new(auth_token: String, webhook_url: String) -> Self {
        Self {
            auth_token,
            webhook_url,
        }
    }

    fn mac(&self, params: &BTreeMap<String, String>) -> RelayResult<HmacSha1> {
        let mut mac = HmacSha1::new_from_slice(self.auth_token.as_bytes())
            .map_err(|_| RelayError::Signature("auth token is not a valid HMAC key"))?;

        mac.update(self.webhook_url.as_bytes());
        for (key, value) in params {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        Ok(mac)
    }

    #[cfg(test)]
    pub fn sign(&self, params: &BTreeMap<String, String>) -> RelayResult<String> {
        let digest = self.mac(params)?.finalize().into_bytes();
        Ok(general_purpose::STANDARD.encode(digest))
    }

    pub fn validate(
        &self,
        signature: Option<&str>,
        params: &BTreeMap<String, String>,
    ) -> RelayResult<()> {
        let signature =
            signature.ok_or(RelayError::Signature("missing X-Twilio-Signature header"))?;

        let decoded = general_purpose::STANDARD
            .decode(signature.trim())
            .map_err(|_| RelayError::Signature("signature is not valid base64"))?;

        self.mac(params)?
            .verify_slice(&decoded)
            .map_err(|_| RelayError::Signature("signature does not match request"))
    }
}
