//! JSON + gzip framing of metric payloads.
//!
//! The wire body is a JSON array of metrics (batch mode) or one JSON metric
//! document (single mode), always gzip-compressed. Encryption and signing
//! are applied on top by the caller; see [`crate::crypto`] and
//! [`crate::signing`].

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::metric::Metric;

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("encoding payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
}

/// Gzip-compress raw bytes.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`]. Truncated or corrupt input is an error.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encode a batch of metrics as one compressed JSON array document.
pub fn encode_batch(metrics: &[Metric]) -> Result<Vec<u8>, EnvelopeError> {
    let json = serde_json::to_vec(metrics)?;
    compress(&json)
}

/// Encode a single metric as one compressed JSON document.
pub fn encode_single(metric: &Metric) -> Result<Vec<u8>, EnvelopeError> {
    let json = serde_json::to_vec(metric)?;
    compress(&json)
}
