//! Load-balancer health check
//!
//! 204 only in READY, 503 in every other state, no body either way. The
//! 503 starts flowing the moment shutdown begins, while the listener is
//! still accepting traffic, so the balancer drains the instance before
//! connections start failing.

use axum::{extract::State, http::StatusCode};

use crate::endpoint::AppState;

/// GET /health. Counted against the request meter like any other request.
pub async fn health(State(state): State<AppState>) -> StatusCode {
    state.meters.requests.inc();

    if state.availability.is_ready() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
