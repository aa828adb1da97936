//! HMAC-SHA256 request signing with a pre-shared key.
//!
//! The signature covers the exact bytes sent on the wire (after compression
//! and encryption) and travels hex-encoded in the `HashSHA256` header.

use aws_lc_rs::hmac;
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};

#[derive(thiserror::Error, Debug)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    MalformedHex(#[from] data_encoding::DecodeError),

    #[error("signature mismatch")]
    Mismatch,
}

/// Signs and verifies message bodies with a pre-shared key.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    /// Returns `None` for an empty key: signing is disabled in that case.
    pub fn new(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        Some(Signer {
            key: hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes()),
        })
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let tag = hmac::sign(&self.key, body);
        HEXLOWER.encode(tag.as_ref())
    }

    /// Constant-time verification of a hex signature against `body`.
    pub fn verify(&self, body: &[u8], signature_hex: &str) -> Result<(), SignatureError> {
        let provided = HEXLOWER_PERMISSIVE.decode(signature_hex.as_bytes())?;
        hmac::verify(&self.key, body, &provided).map_err(|_| SignatureError::Mismatch)
    }
}
