//! HMAC-SHA256 verification of webhook bodies.
//!
//! The provider signs every webhook POST with the integration's webhook token
//! and sends `X-Hub-Signature-256: sha256=<base64(hmac_sha256(token, body))>`.
//! The digest is always computed over the raw body bytes, before any decoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::hmac;
use thiserror::Error;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Optional prefix in front of the base64 digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Hub-Signature-256 header")]
    Missing,

    #[error("malformed X-Hub-Signature-256 header")]
    Malformed,

    /// Digests are kept for operator logs and never rendered in responses.
    #[error("signature mismatch")]
    Mismatch { expected: String, received: String },
}

/// Signs and verifies webhook bodies with the shared integration token.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Base64 digest of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        BASE64.encode(hmac::sign(&self.key, body).as_ref())
    }

    /// Full header value for `body`, prefix included.
    pub fn header_value(&self, body: &[u8]) -> String {
        format!("{SIGNATURE_PREFIX}{}", self.sign(body))
    }

    /// Check `header` against the digest of `body`.
    ///
    /// The comparison runs in constant time over the decoded digest bytes.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let value = header.ok_or(SignatureError::Missing)?.trim();
        let encoded = value.strip_prefix(SIGNATURE_PREFIX).unwrap_or(value);
        if encoded.is_empty() {
            return Err(SignatureError::Malformed);
        }
        let digest = BASE64
            .decode(encoded)
            .map_err(|_| SignatureError::Malformed)?;

        hmac::verify(&self.key, body, &digest).map_err(|_| SignatureError::Mismatch {
            expected: self.sign(body),
            received: encoded.to_string(),
        })
    }
}
