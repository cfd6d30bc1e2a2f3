/*!
 * Worker
 *
 * One of W long-lived tasks, each owning a bounded input queue, a producer
 * handle and a pending-ack map. All worker state is touched only by the
 * worker's own event loop, so no locks are needed around it.
 *
 * ## Event loop
 *
 * ```text
 *            ┌─────────────────────────────────────────────┐
 *            │                  RUNNING                    │
 *            │                                             │
 *  shutdown ─┼─> transition to DRAINING                    │
 *  input ────┼─> tracking id := uuid4                      │
 *            │   pending[id] := request                    │
 *            │   submit to producer (metadata = id)        │
 *  success ──┼─> resolve pending[id] with Ok, tick meter   │
 *  error ────┼─> resolve pending[id] with BrokerProduce    │
 *            └─────────────────────────────────────────────┘
 *                                 │
 *                                 ▼
 *            ┌─────────────────────────────────────────────┐
 *            │                 DRAINING                    │
 *            │  keep consuming input until its queue is    │
 *            │  closed, then close the producer once; the  │
 *            │  flush ends both delivery streams, which    │
 *            │  resolves every remaining pending entry     │
 *            └─────────────────────────────────────────────┘
 *                                 │
 *                                 ▼
 *                              STOPPED
 * ```
 *
 * Every request that enters the worker is resolved exactly once, also
 * across shutdown: the producer guarantees one completion per submitted
 * record, and submit failures are resolved on the spot.
 *
 * Repeated produce failures mean the broker connection is gone for good;
 * after a threshold of consecutive failures the worker reports itself
 * fatally broken on the death channel and the supervisor turns the
 * instance UNAVAILABLE.
 */

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mistral_common::{Error, Result};

use crate::metrics::Meters;
use crate::producer::{Delivery, DeliveryStreams, ProducerAdapter, ProducerRecord};
use crate::types::Request;

/// Consecutive produce failures after which a worker declares itself dead
const FATAL_FAILURE_THRESHOLD: u32 = 5;

pub struct Worker {
    index: usize,
    input: mpsc::Receiver<Request>,
    shutdown: broadcast::Receiver<()>,
    death: mpsc::UnboundedSender<Error>,
    producer: Option<Box<dyn ProducerAdapter>>,
    streams: DeliveryStreams,
    pending: HashMap<String, Request>,
    meters: Meters,
    consecutive_failures: u32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        input: mpsc::Receiver<Request>,
        shutdown: broadcast::Receiver<()>,
        death: mpsc::UnboundedSender<Error>,
        producer: Box<dyn ProducerAdapter>,
        streams: DeliveryStreams,
        meters: Meters,
    ) -> Self {
        Worker {
            index,
            input,
            shutdown,
            death,
            producer: Some(producer),
            streams,
            pending: HashMap::new(),
            meters,
            consecutive_failures: 0,
        }
    }

    /// The event loop. Returns only once the worker reached STOPPED.
    pub async fn run(mut self) {
        info!("[worker {}] entering event loop", self.index);

        let mut draining = false;
        let mut input_open = true;
        let mut successes_open = true;
        let mut errors_open = true;

        loop {
            // Once draining and the input queue is fully consumed, close
            // the producer exactly once; its streams end after the flush.
            if draining && !input_open {
                if let Some(producer) = self.producer.take() {
                    debug!("[worker {}] input drained, closing producer", self.index);
                    producer.close().await;
                }
            }

            if draining && !input_open && !successes_open && !errors_open {
                break;
            }

            tokio::select! {
                _ = self.shutdown.recv(), if !draining => {
                    info!("[worker {}] shutdown signal received, draining", self.index);
                    draining = true;
                }
                maybe_req = self.input.recv(), if input_open => match maybe_req {
                    Some(req) => self.handle_input(req),
                    // Closed input observed before the shutdown signal is
                    // ignored in RUNNING; it only matters while draining.
                    None => input_open = false,
                },
                maybe_delivery = self.streams.successes.recv(), if successes_open => {
                    match maybe_delivery {
                        Some(delivery) => self.handle_success(delivery),
                        None => successes_open = false,
                    }
                }
                maybe_delivery = self.streams.errors.recv(), if errors_open => {
                    match maybe_delivery {
                        Some(delivery) => self.handle_error(delivery),
                        None => errors_open = false,
                    }
                }
            }
        }

        // The producer delivers exactly one completion per submitted
        // record, so this should be unreachable; resolve anyway rather
        // than leave an endpoint waiting forever.
        if !self.pending.is_empty() {
            error!(
                "[worker {}] {} pending entries left at stop",
                self.index,
                self.pending.len()
            );
            for (_, request) in self.pending.drain() {
                request.resolve(Err(Error::BrokerProduce(
                    "worker stopped before broker acknowledgment".to_string(),
                )));
            }
        }

        info!("[worker {}] stopped", self.index);
    }

    /// New request: track it under a fresh tracking id and hand it to the
    /// producer with the id as opaque metadata.
    fn handle_input(&mut self, mut request: Request) {
        let tracking_id = Uuid::new_v4().to_string();
        let record = ProducerRecord {
            key: request.host_id.to_string(),
            payload: std::mem::take(&mut request.payload),
            tracking_id: tracking_id.clone(),
        };

        let Some(producer) = self.producer.as_mut() else {
            // only reachable if a request slips in after producer close
            warn!(
                "[worker {}] dropping request for hostID {}: producer already closed",
                self.index, request.host_id
            );
            request.resolve(Err(Error::Unavailable));
            return;
        };

        match producer.submit(record) {
            Ok(()) => {
                self.pending.insert(tracking_id, request);
            }
            Err(err) => {
                warn!(
                    "[worker {}] submit failed for hostID {}: {}",
                    self.index, request.host_id, err
                );
                request.resolve(Err(err));
                self.note_failure();
            }
        }
    }

    fn handle_success(&mut self, delivery: Delivery) {
        self.consecutive_failures = 0;
        self.meters.messages.inc();
        self.ack_client_request(&delivery.tracking_id, Ok(()));
    }

    fn handle_error(&mut self, delivery: Delivery) {
        let message = delivery
            .error
            .unwrap_or_else(|| "unknown broker error".to_string());
        warn!(
            "[worker {}] broker rejected message {}: {}",
            self.index, delivery.tracking_id, message
        );
        self.ack_client_request(&delivery.tracking_id, Err(Error::BrokerProduce(message)));
        self.note_failure();
    }

    /// Resolve the request tracked under `tracking_id` and drop the entry.
    /// A missing entry is logged and tolerated.
    fn ack_client_request(&mut self, tracking_id: &str, result: Result<()>) {
        match self.pending.remove(tracking_id) {
            Some(request) => request.resolve(result),
            None => warn!(
                "[worker {}] no pending entry for tracking id {}",
                self.index, tracking_id
            ),
        }
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == FATAL_FAILURE_THRESHOLD {
            error!(
                "[worker {}] {} consecutive produce failures, reporting fatal",
                self.index, self.consecutive_failures
            );
            let _ = self.death.send(Error::WorkerFatal(format!(
                "worker {}: {} consecutive produce failures",
                self.index, self.consecutive_failures
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// Scripted stand-in for the Kafka adapter. Submitted records are
    /// recorded; deliveries are produced immediately or held back until
    /// the test releases them.
    struct MockProducer {
        records: Arc<Mutex<Vec<ProducerRecord>>>,
        success_tx: mpsc::UnboundedSender<Delivery>,
        error_tx: mpsc::UnboundedSender<Delivery>,
        mode: MockMode,
        closed: Arc<Mutex<bool>>,
    }

    #[derive(Clone)]
    enum MockMode {
        /// Deliver success right away
        Succeed,
        /// Deliver an error right away
        FailDelivery,
        /// Reject at submit time
        RejectSubmit,
        /// Deliver nothing until close
        Hold,
    }

    struct MockHandle {
        records: Arc<Mutex<Vec<ProducerRecord>>>,
        success_tx: mpsc::UnboundedSender<Delivery>,
        closed: Arc<Mutex<bool>>,
    }

    fn mock_producer(mode: MockMode) -> (Box<dyn ProducerAdapter>, DeliveryStreams, MockHandle) {
        let (success_tx, successes) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let records = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        let handle = MockHandle {
            records: Arc::clone(&records),
            success_tx: success_tx.clone(),
            closed: Arc::clone(&closed),
        };
        let producer = MockProducer {
            records,
            success_tx,
            error_tx,
            mode,
            closed,
        };
        (Box::new(producer), DeliveryStreams { successes, errors }, handle)
    }

    #[async_trait]
    impl ProducerAdapter for MockProducer {
        fn submit(&mut self, record: ProducerRecord) -> Result<()> {
            if matches!(self.mode, MockMode::RejectSubmit) {
                return Err(Error::BrokerProduce("queue full".to_string()));
            }
            let tracking_id = record.tracking_id.clone();
            self.records.lock().unwrap().push(record);
            match self.mode {
                MockMode::Succeed => {
                    let _ = self.success_tx.send(Delivery {
                        tracking_id,
                        error: None,
                    });
                }
                MockMode::FailDelivery => {
                    let _ = self.error_tx.send(Delivery {
                        tracking_id,
                        error: Some("broker exploded".to_string()),
                    });
                }
                MockMode::Hold | MockMode::RejectSubmit => {}
            }
            Ok(())
        }

        async fn close(self: Box<Self>) {
            *self.closed.lock().unwrap() = true;
            // dropping self drops the senders, ending both streams
        }
    }

    struct Harness {
        input_tx: mpsc::Sender<Request>,
        shutdown_tx: broadcast::Sender<()>,
        death_rx: mpsc::UnboundedReceiver<Error>,
        handle: MockHandle,
        worker: tokio::task::JoinHandle<()>,
    }

    fn spawn_worker(mode: MockMode) -> Harness {
        let (producer, streams, handle) = mock_producer(mode);
        let (input_tx, input_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (death_tx, death_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            0,
            input_rx,
            shutdown_rx,
            death_tx,
            producer,
            streams,
            Meters::for_instance("worker-test"),
        );
        Harness {
            input_tx,
            shutdown_tx,
            death_rx,
            handle,
            worker: tokio::spawn(worker.run()),
        }
    }

    async fn send_request(
        harness: &Harness,
        host_id: u64,
    ) -> oneshot::Receiver<Result<()>> {
        let (req, rx) = Request::new(host_id, format!("batch-{host_id}").into_bytes());
        harness.input_tx.send(req).await.unwrap();
        rx
    }

    async fn wait_for_records(handle: &MockHandle, count: usize) {
        while handle.records.lock().unwrap().len() < count {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_success_acks_exactly_once() {
        let harness = spawn_worker(MockMode::Succeed);
        let completion = send_request(&harness, 7).await;
        assert!(completion.await.unwrap().is_ok());

        let records = harness.handle.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "7");
        assert_eq!(records[0].payload, b"batch-7");
        assert!(!records[0].tracking_id.is_empty());
    }

    #[tokio::test]
    async fn test_broker_error_resolves_with_broker_produce() {
        let harness = spawn_worker(MockMode::FailDelivery);
        let completion = send_request(&harness, 3).await;
        match completion.await.unwrap() {
            Err(Error::BrokerProduce(msg)) => assert!(msg.contains("broker exploded")),
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_failure_resolves_immediately() {
        let harness = spawn_worker(MockMode::RejectSubmit);
        let completion = send_request(&harness, 9).await;
        assert!(matches!(
            completion.await.unwrap(),
            Err(Error::BrokerProduce(_))
        ));
        assert!(harness.handle.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tracking_ids_are_unique() {
        let harness = spawn_worker(MockMode::Succeed);
        let first = send_request(&harness, 1).await;
        let second = send_request(&harness, 1).await;
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let records = harness.handle.records.lock().unwrap();
        assert_ne!(records[0].tracking_id, records[1].tracking_id);
    }

    #[tokio::test]
    async fn test_drain_completes_inflight_before_stop() {
        let mut harness = spawn_worker(MockMode::Hold);
        let completion = send_request(&harness, 5).await;

        // request is tracked but unacknowledged; begin the shutdown
        wait_for_records(&harness.handle, 1).await;
        harness.shutdown_tx.send(()).unwrap();
        let input_tx = harness.input_tx;
        drop(input_tx);

        // release the held delivery after the drain started
        let tracking_id = {
            let records = harness.handle.records.lock().unwrap();
            records[0].tracking_id.clone()
        };
        harness
            .handle
            .success_tx
            .send(Delivery {
                tracking_id,
                error: None,
            })
            .unwrap();
        drop(harness.handle.success_tx);

        assert!(completion.await.unwrap().is_ok());
        harness.worker.await.unwrap();
        assert!(*harness.handle.closed.lock().unwrap());
        assert!(harness.death_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_input_is_ignored_while_running() {
        let harness = spawn_worker(MockMode::Succeed);
        let completion = send_request(&harness, 2).await;
        completion.await.unwrap().unwrap();

        // close the queue without a shutdown signal: worker keeps running
        drop(harness.input_tx);
        tokio::task::yield_now().await;
        assert!(!harness.worker.is_finished());

        // the shutdown signal still drains it to STOPPED; the test's clone
        // of the success sender has to go so the stream can end
        drop(harness.handle.success_tx);
        harness.shutdown_tx.send(()).unwrap();
        harness.worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_failures_escalate_to_death() {
        let mut harness = spawn_worker(MockMode::FailDelivery);
        for _ in 0..FATAL_FAILURE_THRESHOLD {
            let completion = send_request(&harness, 4).await;
            assert!(completion.await.unwrap().is_err());
        }
        let death = harness.death_rx.recv().await.unwrap();
        assert!(matches!(death, Error::WorkerFatal(_)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let mut harness = spawn_worker(MockMode::FailDelivery);
        for _ in 0..FATAL_FAILURE_THRESHOLD - 1 {
            let completion = send_request(&harness, 4).await;
            assert!(completion.await.unwrap().is_err());
        }
        // a success in between resets the streak
        let tracking_id = "synthetic-success".to_string();
        harness
            .handle
            .success_tx
            .send(Delivery {
                tracking_id,
                error: None,
            })
            .unwrap();
        tokio::task::yield_now().await;

        let completion = send_request(&harness, 4).await;
        assert!(completion.await.unwrap().is_err());
        assert!(harness.death_rx.try_recv().is_err());
    }
}
