//! # Mistral Common Library
//!
//! Shared collaborators used by the gateway core:
//! - MetricBatch wire codec (decode + canonical re-encode)
//! - Static basic-auth credential check (constant-time)
//! - Error kinds shared across crates
//! - Structured logging setup

// Module declarations
pub mod auth;
pub mod batch;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use batch::MetricBatch;
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_to_file};
