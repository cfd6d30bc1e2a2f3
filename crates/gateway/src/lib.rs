/*!
 * Mistral Gateway Library
 *
 * Core of the stateless HTTP ingestion gateway: accepts JSON metric
 * batches, validates and normalizes them, and produces each batch to a
 * partitioned Kafka topic keyed by source host.
 *
 * ## Module Map
 *
 * - [`availability`] - process-wide STARTING/READY/SHUTTING_DOWN/UNAVAILABLE state
 * - [`watchdog`] - bounds how long a failed instance can linger
 * - [`dispatch`] - routes requests to workers by `hostID mod W`
 * - [`endpoint`] - the ingest HTTP handler and router assembly
 * - [`health`] - load-balancer health check
 * - [`worker`] - per-worker event loop with pending-ack tracking
 * - [`producer`] - async producer contract and its Kafka implementation
 * - [`discovery`] - broker endpoint enumeration via the coordination service
 * - [`supervisor`] - boot, signal handling, graceful shutdown
 * - [`metrics`] - request and message meters
 * - [`tls`] - rustls listener assembly
 */

pub mod availability;
pub mod discovery;
pub mod dispatch;
pub mod endpoint;
pub mod health;
pub mod metrics;
pub mod producer;
pub mod supervisor;
pub mod tls;
pub mod types;
pub mod watchdog;
pub mod worker;
