//! Subnet admission: with a trusted CIDR configured, only requests whose
//! `X-Real-IP` falls inside it are admitted. Without one, a pass-through.

use std::net::IpAddr;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::AppState;

pub const REAL_IP_HEADER: &str = "X-Real-IP";

pub async fn admit_subnet(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header.is_empty() {
        warn!("rejecting request without {REAL_IP_HEADER}");
        return (StatusCode::FORBIDDEN, "missing X-Real-IP header").into_response();
    }

    match header.parse::<IpAddr>() {
        Ok(ip) if subnet.contains(&ip) => next.run(request).await,
        Ok(ip) => {
            warn!("rejecting {ip}: outside trusted subnet {subnet}");
            (StatusCode::FORBIDDEN, "address not admitted").into_response()
        }
        Err(e) => {
            warn!("rejecting unparsable {REAL_IP_HEADER} {header:?}: {e}");
            (StatusCode::FORBIDDEN, "malformed X-Real-IP header").into_response()
        }
    }
}
