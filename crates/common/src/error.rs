//! Error types for Mistral
//!
//! One enum covering every error kind the gateway surfaces. Per-request
//! kinds map onto HTTP status codes at the endpoint and never touch global
//! state; `WorkerFatal` escalates through the worker death channel instead.

use thiserror::Error;

/// Main error type for Mistral operations
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before dispatch (missing body, hostID == 0)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Batch decode or canonical re-encode failure
    #[error("Unprocessable batch: {0}")]
    Unprocessable(String),

    /// Basic-auth credentials missing or wrong
    #[error("Unauthorized")]
    Unauthorized,

    /// Service is not READY (still starting, shutting down, or failed)
    #[error("Service unavailable")]
    Unavailable,

    /// The broker reported a produce failure for a single message
    #[error("Broker produce failed: {0}")]
    BrokerProduce(String),

    /// Unrecoverable worker failure; converted to UNAVAILABLE by the
    /// supervisor
    #[error("Worker fatal: {0}")]
    WorkerFatal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for Mistral operations
pub type Result<T> = std::result::Result<T, Error>;
