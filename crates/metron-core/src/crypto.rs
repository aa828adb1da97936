//! Hybrid payload encryption.
//!
//! Each payload is sealed with a fresh 256-bit AES-GCM key; the key is
//! RSA-OAEP-wrapped with the receiver's public key. Wire layout:
//!
//! ```text
//! rsa_wrapped_key ‖ nonce (12 bytes) ‖ ciphertext ‖ tag (16 bytes)
//! ```
//!
//! The agent holds an [`Encryptor`] built from the server's public key; the
//! server holds the matching [`Decryptor`].

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use aws_lc_rs::rsa::{
    OAEP_SHA256_MGF1SHA256, OaepPrivateDecryptingKey, OaepPublicEncryptingKey,
    PrivateDecryptingKey, PublicEncryptingKey,
};

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("encrypted envelope too short: {0} bytes")]
    Truncated(usize),

    #[error("key rejected: {0}")]
    KeyRejected(#[from] aws_lc_rs::error::KeyRejected),

    #[error("crypto operation failed")]
    Operation(#[from] aws_lc_rs::error::Unspecified),
}

/// Seals payloads for one receiver.
pub struct Encryptor {
    wrap_key: OaepPublicEncryptingKey,
}

impl Encryptor {
    pub fn new(public_key: PublicEncryptingKey) -> Result<Self, CryptoError> {
        Ok(Encryptor {
            wrap_key: OaepPublicEncryptingKey::new(public_key)?,
        })
    }

    pub fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut session_key = [0u8; 32];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        aws_lc_rs::rand::fill(&mut session_key)?;
        aws_lc_rs::rand::fill(&mut nonce_bytes)?;

        let sealing = LessSafeKey::new(UnboundKey::new(&AES_256_GCM, &session_key)?);
        let mut sealed = payload.to_vec();
        sealing.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut sealed,
        )?;

        let mut wrapped = vec![0u8; self.wrap_key.ciphertext_size()];
        let wrapped =
            self.wrap_key
                .encrypt(&OAEP_SHA256_MGF1SHA256, &session_key, &mut wrapped, None)?;

        let mut envelope = Vec::with_capacity(wrapped.len() + NONCE_LEN + sealed.len());
        envelope.extend_from_slice(wrapped);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }
}

/// Opens envelopes sealed with [`Encryptor`].
pub struct Decryptor {
    unwrap_key: OaepPrivateDecryptingKey,
}

impl Decryptor {
    pub fn new(private_key: PrivateDecryptingKey) -> Result<Self, CryptoError> {
        Ok(Decryptor {
            unwrap_key: OaepPrivateDecryptingKey::new(private_key)?,
        })
    }

    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let wrapped_len = self.unwrap_key.key_size_bytes();
        let min_len = wrapped_len + NONCE_LEN + AES_256_GCM.tag_len();
        if envelope.len() < min_len {
            return Err(CryptoError::Truncated(envelope.len()));
        }

        let (wrapped, rest) = envelope.split_at(wrapped_len);
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);

        let mut key_buf = vec![0u8; self.unwrap_key.min_output_size()];
        let session_key =
            self.unwrap_key
                .decrypt(&OAEP_SHA256_MGF1SHA256, wrapped, &mut key_buf, None)?;

        let opening = LessSafeKey::new(UnboundKey::new(&AES_256_GCM, session_key)?);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)?;

        let mut in_out = sealed.to_vec();
        let plaintext = opening.open_in_place(nonce, Aad::empty(), &mut in_out)?;
        Ok(plaintext.to_vec())
    }
}
