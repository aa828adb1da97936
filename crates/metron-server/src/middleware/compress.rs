//! Gzip codec: transparently gunzips request bodies and compresses
//! responses for clients that accept gzip. Responses are compressed only on
//! success (status < 300).

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metron_core::envelope;
use tracing::warn;

use super::{buffer_request, rebuild_request};

fn header_mentions_gzip(value: Option<&HeaderValue>) -> bool {
    value
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("gzip"))
}

pub async fn gzip_codec(request: Request, next: Next) -> Response {
    let accepts_gzip = header_mentions_gzip(request.headers().get(ACCEPT_ENCODING));
    let sends_gzip = header_mentions_gzip(request.headers().get(CONTENT_ENCODING));

    let request = if sends_gzip {
        let Ok((mut parts, body)) = buffer_request(request).await else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        match envelope::decompress(&body) {
            Ok(plain) => {
                parts.headers.remove(CONTENT_ENCODING);
                rebuild_request(parts, plain)
            }
            Err(e) => {
                warn!("cannot gunzip request body: {e}");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    } else {
        request
    };

    let response = next.run(request).await;

    if !accepts_gzip || response.status() >= StatusCode::MULTIPLE_CHOICES {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("cannot buffer response for compression: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match envelope::compress(&bytes) {
        Ok(compressed) => {
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(e) => {
            warn!("cannot gzip response: {e}");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}
