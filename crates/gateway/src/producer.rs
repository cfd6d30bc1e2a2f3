/*!
 * Producer Adapter
 *
 * Thin contract around an asynchronous partitioned producer with explicit
 * success and error streams.
 *
 * ```text
 *  worker ──submit(record)──> adapter ──────────> broker
 *         <───successes────── (one Delivery per record,
 *         <───errors───────── carrying its tracking id)
 * ```
 *
 * Guarantees:
 * - `submit` is a non-blocking enqueue
 * - exactly one [`Delivery`] arrives per submitted record, on either the
 *   success or the error stream; ordering across records is unspecified
 * - `close` waits for all in-flight records, then both streams end
 *
 * The Kafka implementation wraps an rdkafka [`FutureProducer`]: each
 * accepted record spawns a task awaiting its delivery future and forwards
 * the outcome onto the matching stream.
 */

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use mistral_config::{AckStrategy, GatewayConfig};

/// One message on its way to the broker.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    /// Partition key: the ASCII decimal of the source hostID
    pub key: String,

    /// Canonical batch bytes
    pub payload: Vec<u8>,

    /// Opaque correlation id, returned verbatim on completion
    pub tracking_id: String,
}

/// Completion for one submitted record.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tracking_id: String,

    /// None on success, the broker's message otherwise
    pub error: Option<String>,
}

/// Receive sides of the success and error streams, owned by the worker.
pub struct DeliveryStreams {
    pub successes: mpsc::UnboundedReceiver<Delivery>,
    pub errors: mpsc::UnboundedReceiver<Delivery>,
}

/// Contract around an async partitioned producer; see the module docs for
/// the delivery guarantees.
#[async_trait]
pub trait ProducerAdapter: Send {
    /// Non-blocking enqueue. An error here means the record was never
    /// accepted and no delivery will arrive for it.
    fn submit(&mut self, record: ProducerRecord) -> mistral_common::Result<()>;

    /// Flush in-flight records, then end both delivery streams. Consumes
    /// the adapter, so a second close cannot happen.
    async fn close(self: Box<Self>);
}

/// Kafka-backed adapter. Topic and partitioning are fixed at construction;
/// the hash partitioner keys on [`ProducerRecord::key`].
pub struct KafkaProducerAdapter {
    producer: FutureProducer,
    topic: String,
    success_tx: mpsc::UnboundedSender<Delivery>,
    error_tx: mpsc::UnboundedSender<Delivery>,
    tasks: JoinSet<()>,
}

impl KafkaProducerAdapter {
    /// Build a producer against the discovered brokers.
    ///
    /// Config knob mapping:
    /// - keepalive      -> `socket.keepalive.enable` (probe period is OS-governed)
    /// - acks           -> `request.required.acks`
    /// - retries        -> `message.send.max.retries`
    /// - client id      -> `mistral.<hostname>`
    ///
    /// Retries must not reorder messages within a partition: with
    /// WaitForAll the producer runs idempotently, otherwise in-flight
    /// requests per connection are capped at one.
    pub fn connect(
        brokers: &[String],
        config: &GatewayConfig,
    ) -> Result<(Self, DeliveryStreams)> {
        let host = hostname::get()
            .context("Failed to read local hostname")?
            .to_string_lossy()
            .into_owned();
        let client_id = format!("mistral.{host}");

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers.join(","))
            .set("client.id", &client_id)
            .set("socket.keepalive.enable", "true")
            .set("request.required.acks", config.broker_acks.broker_value())
            .set(
                "message.send.max.retries",
                config.broker_retries.to_string(),
            );
        match config.broker_acks {
            AckStrategy::WaitForAll => {
                client_config.set("enable.idempotence", "true");
            }
            _ => {
                client_config.set("max.in.flight.requests.per.connection", "1");
            }
        }

        debug!(
            "producer transport keepalive requested: {:?}",
            config.broker_keepalive
        );

        let producer: FutureProducer = client_config
            .create()
            .context("Failed to create Kafka producer")?;

        info!(
            "Kafka producer ready: topic={} client_id={} brokers={}",
            config.broker_topic,
            client_id,
            brokers.join(",")
        );

        let (success_tx, successes) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        Ok((
            KafkaProducerAdapter {
                producer,
                topic: config.broker_topic.clone(),
                success_tx,
                error_tx,
                tasks: JoinSet::new(),
            },
            DeliveryStreams { successes, errors },
        ))
    }
}

#[async_trait]
impl ProducerAdapter for KafkaProducerAdapter {
    fn submit(&mut self, record: ProducerRecord) -> mistral_common::Result<()> {
        let ProducerRecord {
            key,
            payload,
            tracking_id,
        } = record;
        let future_record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send_result(future_record) {
            Ok(delivery_future) => {
                let success_tx = self.success_tx.clone();
                let error_tx = self.error_tx.clone();
                self.tasks.spawn(async move {
                    match delivery_future.await {
                        Ok(Ok(_)) => {
                            let _ = success_tx.send(Delivery {
                                tracking_id,
                                error: None,
                            });
                        }
                        Ok(Err((err, _message))) => {
                            let _ = error_tx.send(Delivery {
                                tracking_id,
                                error: Some(err.to_string()),
                            });
                        }
                        Err(_cancelled) => {
                            let _ = error_tx.send(Delivery {
                                tracking_id,
                                error: Some("producer dropped before delivery".to_string()),
                            });
                        }
                    }
                });
                Ok(())
            }
            Err((err, _record)) => Err(mistral_common::Error::BrokerProduce(err.to_string())),
        }
    }

    async fn close(mut self: Box<Self>) {
        // Push out whatever librdkafka still has queued; delivery results
        // resolve the per-record futures held by the tasks below.
        let producer = self.producer.clone();
        let flush = tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(Duration::from_secs(10)))
        })
        .await;
        match flush {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Kafka flush reported an error: {e}"),
            Err(e) => warn!("Kafka flush task failed: {e}"),
        }

        // Wait for every completion task; the streams end once the last
        // sender clone drops with the adapter.
        while self.tasks.join_next().await.is_some() {}
    }
}
