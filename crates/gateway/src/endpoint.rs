/*!
 * Ingest Endpoint
 *
 * The HTTP surface of the pipeline. One POST handler does the whole
 * request lifecycle:
 *
 * ```text
 * POST {endpoint.path}
 *   │ tick request meter
 *   │ availability gate ──────────> 503 when not READY
 *   │ empty body ─────────────────> 400 before the decoder runs
 *   │ decode MetricBatch ─────────> 422 with the decoder's message
 *   │ hostID == 0 ────────────────> 400
 *   │ canonical re-encode ────────> 422
 *   │ dispatch to worker (hostID mod W, blocking under backpressure)
 *   └ await completion ───────────> 200 empty body | 502 on broker failure
 * ```
 *
 * Once dispatched, the handler always waits for the worker's answer;
 * shutdown is observed by workers draining, never by abandoning the wait.
 *
 * When static basic auth is enabled the ingest route is wrapped in a
 * middleware that rejects with 401 before any of the above runs.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, Request as HttpRequest, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use mistral_common::{Error, MetricBatch, auth};

use crate::availability::Availability;
use crate::dispatch::Dispatcher;
use crate::health;
use crate::metrics::{self, Meters};
use crate::types::Request;

/// Static credentials for the optional basic-auth wrapper
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// State shared across the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub availability: Arc<Availability>,
    pub dispatcher: Dispatcher,
    pub meters: Meters,
    pub auth: Option<BasicCredentials>,
}

/// Assemble the service router: the ingest endpoint at its configured
/// path (wrapped in basic auth when enabled), /health and /metrics.
pub fn build_router(state: AppState, endpoint_path: &str) -> Router {
    let mut ingest_routes = Router::new().route(endpoint_path, post(ingest));
    if state.auth.is_some() {
        ingest_routes = ingest_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            basic_auth_layer,
        ));
    }

    ingest_routes
        .route("/health", get(health::health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Checks the Authorization header against the static credentials using a
/// constant-time comparison, rejecting with 401 otherwise.
async fn basic_auth_layer(
    State(state): State<AppState>,
    request: HttpRequest,
    next: Next,
) -> Response {
    let Some(credentials) = &state.auth else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| auth::verify_basic(value, &credentials.username, &credentials.password))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=Restricted")],
            "Unauthorized",
        )
            .into_response()
    }
}

/// The ingest handler; see the module docs for the full sequence.
async fn ingest(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    // count all requests, declined or accepted
    state.meters.requests.inc();

    // no new requests are served while the instance is going down or not
    // yet ready
    if !state.availability.is_serving() {
        info!("unavailable - request from {} rejected", peer);
        return status_text(StatusCode::SERVICE_UNAVAILABLE);
    }

    if body.is_empty() {
        warn!("rejected empty request body from {}", peer);
        return status_text(StatusCode::BAD_REQUEST);
    }

    // verify the received data can be parsed
    let batch = match MetricBatch::decode(&body) {
        Ok(batch) => batch,
        Err(err) => {
            warn!("rejected unprocessable data from {}: {}", peer, err);
            return unprocessable(err);
        }
    };

    if batch.host_id == 0 {
        warn!("rejected invalid hostID 0 from {}", peer);
        return status_text(StatusCode::BAD_REQUEST);
    }

    // encode back to canonical JSON; the round trip repairs tolerated
    // inputs from legacy producers
    let canonical = match batch.encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("could not re-encode data from {}: {}", peer, err);
            return unprocessable(err);
        }
    };

    let (request, completion) = Request::new(batch.host_id, canonical);
    if state.dispatcher.dispatch(request).await.is_err() {
        return status_text(StatusCode::SERVICE_UNAVAILABLE);
    }

    // wait for the broker result
    match completion.await {
        Ok(Ok(())) => {
            info!(
                "processed metric batch for hostID {} from {}",
                batch.host_id, peer
            );
            StatusCode::OK.into_response()
        }
        Ok(Err(err)) => {
            error!(
                "could not write batch for hostID {} from {} to broker: {}",
                batch.host_id, peer, err
            );
            status_text(StatusCode::BAD_GATEWAY)
        }
        Err(_) => {
            error!(
                "worker dropped batch for hostID {} from {} unresolved",
                batch.host_id, peer
            );
            status_text(StatusCode::BAD_GATEWAY)
        }
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// 422 carrying the decoder's message so producers can see what was wrong
fn unprocessable(err: Error) -> Response {
    let message = match err {
        Error::Unprocessable(msg) => msg,
        other => other.to_string(),
    };
    (StatusCode::UNPROCESSABLE_ENTITY, message).into_response()
}

fn status_text(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}
