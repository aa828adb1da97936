//! Loading and persistence of the RSA key pair used for payload encryption.
//!
//! Keys live on disk as PEM: the private key as PKCS#8 (`PRIVATE KEY`), the
//! public key as X.509 SubjectPublicKeyInfo (`PUBLIC KEY`). The agent loads
//! the public half, the server the private half. A missing or malformed key
//! file is a startup-fatal error for the process that needs it.

#![forbid(unsafe_code)]

use std::path::Path;

use aws_lc_rs::encoding::AsDer;
use aws_lc_rs::rsa::{KeySize, PrivateDecryptingKey, PublicEncryptingKey};
use tracing::debug;

pub const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
pub const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("reading key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("expected PEM block {expected:?}, found {found:?}")]
    WrongTag { expected: &'static str, found: String },

    #[error("key rejected: {0}")]
    Rejected(#[from] aws_lc_rs::error::KeyRejected),

    #[error("key operation failed")]
    Operation(#[from] aws_lc_rs::error::Unspecified),
}

/// Generate a fresh 4096-bit pair for out-of-band provisioning.
pub fn generate_key_pair() -> Result<PrivateDecryptingKey, KeyError> {
    Ok(PrivateDecryptingKey::generate(KeySize::Rsa4096)?)
}

/// Load the receiver's public key from a PEM file.
pub fn load_public_key(path: impl AsRef<Path>) -> Result<PublicEncryptingKey, KeyError> {
    let der = read_pem_block(path.as_ref(), PUBLIC_KEY_TAG)?;
    Ok(PublicEncryptingKey::from_der(&der)?)
}

/// Load the private key from a PEM file.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateDecryptingKey, KeyError> {
    let der = read_pem_block(path.as_ref(), PRIVATE_KEY_TAG)?;
    Ok(PrivateDecryptingKey::from_pkcs8(&der)?)
}

/// Write both PEM halves of `private_key`, private first.
pub fn write_key_pair(
    private_key: &PrivateDecryptingKey,
    private_path: impl AsRef<Path>,
    public_path: impl AsRef<Path>,
) -> Result<(), KeyError> {
    let private_der = private_key.as_der()?;
    write_pem_block(private_path.as_ref(), PRIVATE_KEY_TAG, private_der.as_ref())?;

    let public_der = private_key.public_key().as_der()?;
    write_pem_block(public_path.as_ref(), PUBLIC_KEY_TAG, public_der.as_ref())?;

    Ok(())
}

fn read_pem_block(path: &Path, expected_tag: &'static str) -> Result<Vec<u8>, KeyError> {
    debug!("loading {} from {}", expected_tag, path.display());

    let text = std::fs::read_to_string(path)?;
    let block = pem::parse(&text)?;

    if block.tag() != expected_tag {
        return Err(KeyError::WrongTag {
            expected: expected_tag,
            found: block.tag().to_string(),
        });
    }

    Ok(block.contents().to_vec())
}

fn write_pem_block(path: &Path, tag: &str, der: &[u8]) -> Result<(), KeyError> {
    let block = pem::Pem::new(tag, der);
    std::fs::write(path, pem::encode(&block))?;
    Ok(())
}
