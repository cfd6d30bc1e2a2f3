/*!
 * Mistral Metric Gateway
 *
 * Stateless HTTP ingestion gateway: accepts JSON metric batches, validates
 * and normalizes them, and produces each batch to a partitioned Kafka
 * topic for the downstream stream-processing pipeline.
 *
 * ## Architecture Overview
 *
 * ```text
 * ┌──────────────────────────────────────────────────────────────────┐
 * │                            Mistral                               │
 * │                                                                  │
 * │  POST /api/v1/metrics ──> validate ──> normalize ──┐             │
 * │  GET  /health  (204 READY / 503)                   │             │
 * │  GET  /metrics (Prometheus)                        ▼             │
 * │                                         dispatch hostID mod W    │
 * │                                                    │             │
 * │        ┌───────────┬───────────┬───────────────────┘             │
 * │        ▼           ▼           ▼                                 │
 * │   ┌─────────┐ ┌─────────┐ ┌─────────┐                            │
 * │   │worker 0 │ │worker 1 │ │worker N │  each: input queue,        │
 * │   └────┬────┘ └────┬────┘ └────┬────┘  pending map, producer     │
 * │        └───────────┴───────────┘                                 │
 * │                    │                                             │
 * │                    ▼                                             │
 * │             Kafka topic (hash-partitioned by hostID)             │
 * └──────────────────────────────────────────────────────────────────┘
 * ```
 *
 * The HTTP response reflects the broker's persistence result: a 200 is
 * only written once the producer acknowledged the batch.
 *
 * ## Configuration
 *
 * Everything comes from MISTRAL_* environment variables; see the
 * mistral-config crate. A `.env` file is honored.
 */

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mistral_config::GatewayConfig;
use mistral_gateway::discovery::{BrokerDiscovery, StaticDiscovery};
use mistral_gateway::producer::{KafkaProducerAdapter, ProducerAdapter};
use mistral_gateway::supervisor::{self, AdapterFactory, Timings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment variables
    let config = GatewayConfig::from_env().context("Failed to load configuration")?;

    // Logfile if configured, stdout otherwise. The guard flushes buffered
    // lines when it drops at the end of main.
    let _log_guard = match (&config.log.path, &config.log.file) {
        (Some(dir), Some(file)) => Some(mistral_common::init_tracing_to_file(
            dir,
            file,
            config.log.rotate,
        )),
        _ => {
            mistral_common::init_tracing();
            None
        }
    };

    info!("🚀 Starting MISTRAL v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded:");
    info!("   - Listen: {:?} {}", config.listen_scheme, config.listen_addr());
    info!("   - Endpoint: POST {}", config.endpoint_path);
    info!("   - Auth: {:?}", config.auth_mode);
    info!("   - Topic: {}", config.broker_topic);
    info!("   - Acks: {:?}, retries: {}", config.broker_acks, config.broker_retries);
    info!("   - Coordinator: {}", config.coord_connect);
    info!("   - Queue depth: {}", config.queue_depth);

    // Each worker builds its own producer against the discovered brokers
    let factory: Arc<AdapterFactory> = {
        let config = config.clone();
        Arc::new(move |index| {
            let discovery = StaticDiscovery::from_connect_string(&config.coord_connect)?;
            let brokers = discovery.broker_list()?;
            let (adapter, streams) = KafkaProducerAdapter::connect(&brokers, &config)?;
            info!("worker #{index}: producer connected");
            Ok((Box::new(adapter) as Box<dyn ProducerAdapter>, streams))
        })
    };

    let status = supervisor::run(config, Timings::default(), factory).await?;

    info!("👋 MISTRAL stopped");
    let code = status.code();
    drop(_log_guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
