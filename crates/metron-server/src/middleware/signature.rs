//! HMAC signature verification over the exact received body bytes.
//!
//! Checking happens only for POSTs carrying the signature header while a
//! sign key is configured. The computed signature is echoed back on the
//! response either way, and the buffered body is re-installed so handlers
//! read the original bytes.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metron_core::SIGNATURE_HEADER;
use tracing::warn;

use super::{buffer_request, rebuild_request};
use crate::AppState;

pub async fn verify_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signer) = state.signer.clone() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if request.method() != Method::POST {
        return next.run(request).await;
    }
    let Some(provided) = provided else {
        return next.run(request).await;
    };

    let Ok((parts, body)) = buffer_request(request).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let computed = signer.sign(&body);
    let echo = HeaderValue::from_str(&computed).expect("hex is a valid header value");

    if signer.verify(&body, &provided).is_err() {
        warn!("wrong signature calc={computed} got={provided}");
        let mut response = StatusCode::BAD_REQUEST.into_response();
        response.headers_mut().insert(SIGNATURE_HEADER, echo);
        return response;
    }

    let request = rebuild_request(parts, body);
    let mut response = next.run(request).await;
    response.headers_mut().insert(SIGNATURE_HEADER, echo);
    response
}
