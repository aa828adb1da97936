//! The request middleware chain, outer to inner: request logging, subnet
//! admission, signature verification, payload decryption, gzip codec.
//!
//! Agents build payloads as gzip, then encryption, then signing; the chain
//! unwinds them in reverse, so the signature is checked over the raw
//! received bytes before anything else touches the body.

mod compress;
mod crypt;
mod logging;
mod signature;
mod subnet;

pub use compress::gzip_codec;
pub use crypt::decrypt_body;
pub use logging::log_requests;
pub use signature::verify_signature;
pub use subnet::admit_subnet;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;

/// Buffer a request body completely, returning the parts for re-assembly.
pub(crate) async fn buffer_request(
    request: Request,
) -> Result<(axum::http::request::Parts, Bytes), StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((parts, bytes))
}

/// Re-assemble a request around a replaced body, dropping the now-stale
/// `Content-Length`.
pub(crate) fn rebuild_request(
    mut parts: axum::http::request::Parts,
    body: impl Into<Bytes>,
) -> Request {
    parts.headers.remove(CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(body.into()))
}
