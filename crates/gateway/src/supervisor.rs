/*!
 * Supervisor
 *
 * Owns the whole service lifecycle:
 *
 * ```text
 * boot ──> construct W workers + producers (any error: fail fast)
 *      ──> start worker event loops, watchdog
 *      ──> 1s quiet period ──no death──> READY, start HTTP listener
 *                          └──death────> skip HTTP, fault shutdown
 *
 * runloop: SIGINT/SIGTERM ──> SHUTTING_DOWN, wait out the drain window
 *          worker death   ──> UNAVAILABLE immediately
 *
 * shutdown (both triggers converge):
 *   close worker shutdown + input channels
 *   drain residual error channels briefly
 *   stop the HTTP server against a deadline
 *   await workers, then exit 1 on fault, 0 otherwise
 * ```
 *
 * The drain window exists for the load balancer: /health fails the moment
 * shutdown begins, but traffic keeps being accepted until the balancer
 * has removed the instance.
 */

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use mistral_common::Error;
use mistral_config::{AuthMode, GatewayConfig, ListenScheme};

use crate::availability::Availability;
use crate::dispatch::Dispatcher;
use crate::endpoint::{AppState, BasicCredentials, build_router};
use crate::metrics::Meters;
use crate::producer::{DeliveryStreams, ProducerAdapter};
use crate::tls;
use crate::watchdog;
use crate::worker::Worker;

/// Lifecycle durations. Defaults are the production values; tests shorten
/// them to keep runtimes sane.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Quiet period before the instance turns READY
    pub startup_quiet: Duration,
    /// Load-balancer drain window after a shutdown signal
    pub drain_window: Duration,
    /// How long residual worker errors are read during shutdown
    pub error_drain: Duration,
    /// Deadline for stopping the HTTP server
    pub http_deadline: Duration,
    /// Watchdog poll period
    pub watchdog_poll: Duration,
    /// Watchdog grace period after UNAVAILABLE
    pub watchdog_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            startup_quiet: Duration::from_secs(1),
            drain_window: Duration::from_secs(95),
            error_drain: Duration::from_millis(10),
            http_deadline: Duration::from_secs(5),
            watchdog_poll: watchdog::POLL_PERIOD,
            watchdog_grace: watchdog::GRACE_PERIOD,
        }
    }
}

/// Outcome of a full service run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    Fault,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fault => 1,
        }
    }
}

/// Builds one producer per worker index
pub type AdapterFactory =
    dyn Fn(usize) -> Result<(Box<dyn ProducerAdapter>, DeliveryStreams)> + Send + Sync;

/// Run the gateway until a signal or a fault brings it down.
pub async fn run(
    config: GatewayConfig,
    timings: Timings,
    factory: Arc<AdapterFactory>,
) -> Result<ExitStatus> {
    run_with_shutdown(config, timings, factory, shutdown_signal()).await
}

/// Like [`run`], with an injectable shutdown trigger.
pub async fn run_with_shutdown(
    config: GatewayConfig,
    timings: Timings,
    factory: Arc<AdapterFactory>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<ExitStatus> {
    let availability = Arc::new(Availability::new());
    let meters = Meters::for_instance(&config.instance_name);

    let watchdog_handle = watchdog::spawn(
        Arc::clone(&availability),
        timings.watchdog_poll,
        timings.watchdog_grace,
    );

    // construct W workers and their producers; a construction error here
    // fails the whole startup
    let worker_count = config.worker_count.unwrap_or_else(default_worker_count);
    let (death_tx, mut death_rx) = mpsc::unbounded_channel::<Error>();
    let (worker_shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut input_senders = Vec::with_capacity(worker_count);
    let mut worker_handles = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
        let (producer, streams) = factory(index)
            .with_context(|| format!("failed to construct producer for worker #{index}"))?;
        let (input_tx, input_rx) = mpsc::channel(config.queue_depth);
        input_senders.push(input_tx);
        let worker = Worker::new(
            index,
            input_rx,
            worker_shutdown_tx.subscribe(),
            death_tx.clone(),
            producer,
            streams,
            meters.clone(),
        );
        worker_handles.push(tokio::spawn(worker.run()));
        info!("launched worker #{index}");
    }
    let dispatcher = Dispatcher::new(input_senders);

    let state = AppState {
        availability: Arc::clone(&availability),
        dispatcher: dispatcher.clone(),
        meters,
        auth: match config.auth_mode {
            AuthMode::StaticBasicAuth => Some(BasicCredentials {
                username: config.auth_user.clone(),
                password: config.auth_password.clone(),
            }),
            AuthMode::None => None,
        },
    };
    let router = build_router(state, &config.endpoint_path);

    // quiet period: a worker death inside the window means the HTTP
    // server never starts and the fault shutdown begins right away
    let mut fault = false;
    tokio::select! {
        _ = tokio::time::sleep(timings.startup_quiet) => {
            availability.startup_complete();
            info!("startup complete, mistral is READY");
        }
        maybe_death = death_rx.recv() => {
            if let Some(err) = maybe_death {
                error!("early startup error detected, HTTP server startup will be skipped: {err}");
            }
            availability.set_unavailable();
            fault = true;
        }
    }

    let mut server = None;
    if !fault {
        let addr: SocketAddr = config
            .listen_addr()
            .parse()
            .with_context(|| format!("invalid listen address: {}", config.listen_addr()))?;
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
        let handle = axum_server::Handle::new();
        let server_death = death_tx.clone();
        let server_handle = handle.clone();
        let task = match config.listen_scheme {
            ListenScheme::Http => {
                info!("starting HTTP server on {addr}");
                tokio::spawn(async move {
                    if let Err(e) = axum_server::bind(addr)
                        .handle(server_handle)
                        .serve(make_service)
                        .await
                    {
                        let _ = server_death.send(Error::Internal(anyhow!(
                            "HTTP server failed: {e}"
                        )));
                    }
                })
            }
            ListenScheme::Https => {
                let tls_config = tls::build_rustls_config(&config.tls)?;
                info!("starting HTTPS server on {addr}");
                tokio::spawn(async move {
                    if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                        .handle(server_handle)
                        .serve(make_service)
                        .await
                    {
                        let _ = server_death.send(Error::Internal(anyhow!(
                            "HTTPS server failed: {e}"
                        )));
                    }
                })
            }
        };
        server = Some((handle, task));
    }
    drop(death_tx);

    // the main runloop: wait for a shutdown signal or a worker death
    let mut signaled = false;
    if !fault {
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {
                info!("received shutdown signal");
                availability.set_shutdown();
                signaled = true;
            }
            maybe_death = death_rx.recv() => {
                if let Some(err) = maybe_death {
                    error!("worker died: {err}");
                }
                // healthchecks start failing; the race against the
                // watchdog begins
                availability.set_unavailable();
                fault = true;
            }
        }
    }
    info!("runloop exited, shutdown sequence running");

    if signaled {
        info!(
            "graceful shutdown: waiting {:?} with failing health check",
            timings.drain_window
        );
        tokio::time::sleep(timings.drain_window).await;
    }

    // close all worker shutdown and input channels
    let _ = worker_shutdown_tx.send(());
    dispatcher.close();
    info!("worker channels closed");

    // read residual worker errors for a moment
    let drain_deadline = tokio::time::sleep(timings.error_drain);
    tokio::pin!(drain_deadline);
    loop {
        tokio::select! {
            maybe_err = death_rx.recv() => match maybe_err {
                Some(err) => error!("worker error: {err}"),
                None => break,
            },
            _ = &mut drain_deadline => break,
        }
    }
    info!("drained all channels");

    // stop the HTTP server; in-flight requests get the deadline to finish
    if let Some((handle, task)) = server {
        info!("stopping HTTP server");
        handle.graceful_shutdown(Some(timings.http_deadline));
        let _ = task.await;
    }

    // wait for the workers to finish draining
    for handle in worker_handles {
        let _ = handle.await;
    }
    watchdog_handle.abort();

    info!("mistral shutdown complete");
    Ok(if fault {
        ExitStatus::Fault
    } else {
        ExitStatus::Clean
    })
}

/// One worker per logical CPU
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{Delivery, ProducerRecord};
    use async_trait::async_trait;
    use mistral_config::{AckStrategy, LogOptions, TlsOptions};
    use tokio::sync::oneshot;

    /// Producer stub that acknowledges every record immediately.
    struct InstantProducer {
        success_tx: mpsc::UnboundedSender<Delivery>,
    }

    #[async_trait]
    impl ProducerAdapter for InstantProducer {
        fn submit(&mut self, record: ProducerRecord) -> mistral_common::Result<()> {
            let _ = self.success_tx.send(Delivery {
                tracking_id: record.tracking_id,
                error: None,
            });
            Ok(())
        }

        async fn close(self: Box<Self>) {}
    }

    fn instant_factory() -> Arc<AdapterFactory> {
        Arc::new(|_index| {
            let (success_tx, successes) = mpsc::unbounded_channel();
            let (_error_tx, errors) = mpsc::unbounded_channel();
            Ok((
                Box::new(InstantProducer { success_tx }) as Box<dyn ProducerAdapter>,
                DeliveryStreams { successes, errors },
            ))
        })
    }

    /// Factory whose producers report enough failures to kill the worker
    /// before the startup quiet period ends.
    fn poisoned_factory() -> Arc<AdapterFactory> {
        Arc::new(|index| {
            let (success_tx, successes) = mpsc::unbounded_channel();
            let (error_tx, errors) = mpsc::unbounded_channel();
            if index == 0 {
                for n in 0..8 {
                    let _ = error_tx.send(Delivery {
                        tracking_id: format!("poison-{n}"),
                        error: Some("broker gone".to_string()),
                    });
                }
            }
            Ok((
                Box::new(InstantProducer { success_tx }) as Box<dyn ProducerAdapter>,
                DeliveryStreams { successes, errors },
            ))
        })
    }

    fn test_config(instance: &str) -> GatewayConfig {
        GatewayConfig {
            listen_scheme: ListenScheme::Http,
            listen_address: "127.0.0.1".to_string(),
            listen_port: 0,
            endpoint_path: "/api/v1/metrics".to_string(),
            auth_mode: AuthMode::None,
            auth_user: String::new(),
            auth_password: String::new(),
            queue_depth: 8,
            broker_topic: "metrics".to_string(),
            broker_keepalive: Duration::from_secs(3),
            broker_acks: AckStrategy::WaitForLocal,
            broker_retries: 3,
            coord_connect: "localhost:9092".to_string(),
            tls: TlsOptions::default(),
            log: LogOptions::default(),
            instance_name: instance.to_string(),
            worker_count: Some(2),
        }
    }

    fn test_timings() -> Timings {
        Timings {
            startup_quiet: Duration::from_millis(50),
            drain_window: Duration::from_millis(30),
            error_drain: Duration::from_millis(5),
            http_deadline: Duration::from_millis(200),
            watchdog_poll: Duration::from_millis(50),
            // far beyond any test runtime so the watchdog never kills the
            // test process
            watchdog_grace: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_clean_shutdown_exits_zero() {
        let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(run_with_shutdown(
            test_config("supervisor-clean"),
            test_timings(),
            instant_factory(),
            async move {
                let _ = trigger_rx.await;
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger_tx.send(()).unwrap();

        let status = run.await.unwrap().unwrap();
        assert_eq!(status, ExitStatus::Clean);
        assert_eq!(status.code(), 0);
    }

    #[tokio::test]
    async fn test_worker_death_at_startup_exits_one() {
        let status = run_with_shutdown(
            test_config("supervisor-fault"),
            test_timings(),
            poisoned_factory(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(status, ExitStatus::Fault);
        assert_eq!(status.code(), 1);
    }
}
