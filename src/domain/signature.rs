use crate::error::{BustError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies provider webhook signatures: hex HMAC-SHA256 over the raw body.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl WebhookVerifier {
    /// A verifier without a secret rejects every event.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Checks `signature` against the raw `payload`. The comparison runs in
    /// constant time.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<()> {
        let (Some(secret), Some(signature)) = (&self.secret, signature) else {
            return Err(BustError::InvalidSignature);
        };
        let signature = signature.trim();
        let signature = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .unwrap_or(signature);
        let expected = hex::decode(signature).map_err(|_| BustError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| BustError::internal("HMAC rejected the webhook secret"))?;
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| BustError::InvalidSignature)
    }

    /// Hex signature for `payload`, as the provider would send it.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| BustError::ConfigError("webhook secret is not set".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| BustError::internal("HMAC rejected the webhook secret"))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded","data":{"id":"pi_1"}}"#;

    #[test]
    fn test_valid_signature() {
        let verifier = WebhookVerifier::new(Some("whsec_test"));
        let signature = verifier.sign(BODY).unwrap();
        assert!(verifier.verify(BODY, Some(&signature)).is_ok());
        assert!(
            verifier
                .verify(BODY, Some(&format!("sha256={signature}")))
                .is_ok()
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = WebhookVerifier::new(Some("other")).sign(BODY).unwrap();
        let verifier = WebhookVerifier::new(Some("whsec_test"));
        assert!(matches!(
            verifier.verify(BODY, Some(&signature)),
            Err(BustError::InvalidSignature)
        ));
    }

    #[test]
    fn test_modified_payload_rejected() {
        let verifier = WebhookVerifier::new(Some("whsec_test"));
        let signature = verifier.sign(BODY).unwrap();
        let tampered = br#"{"type":"payment_intent.succeeded","data":{"id":"pi_2"}}"#;
        assert!(verifier.verify(tampered, Some(&signature)).is_err());
    }

    #[test]
    fn test_missing_header_or_secret_rejected() {
        let verifier = WebhookVerifier::new(Some("whsec_test"));
        assert!(verifier.verify(BODY, None).is_err());
        assert!(verifier.verify(BODY, Some("not-hex")).is_err());
        assert!(verifier.verify(BODY, Some("")).is_err());

        let unconfigured = WebhookVerifier::new(None);
        assert!(unconfigured.verify(BODY, Some("abcd")).is_err());
        assert!(WebhookVerifier::new(Some("")).sign(BODY).is_err());
    }
}
