//! Payload decryption for requests flagged `x-encrypted: true`.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metron_core::ENCRYPTED_HEADER;
use tracing::warn;

use super::{buffer_request, rebuild_request};
use crate::AppState;

pub async fn decrypt_body(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(decryptor) = state.decryptor.clone() else {
        return next.run(request).await;
    };

    let flagged = request
        .headers()
        .get(ENCRYPTED_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "true");
    if !flagged {
        return next.run(request).await;
    }

    let Ok((parts, body)) = buffer_request(request).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match decryptor.decrypt(&body) {
        Ok(plaintext) => next.run(rebuild_request(parts, plaintext)).await,
        Err(e) => {
            warn!("cannot decrypt request body: {e}");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}
