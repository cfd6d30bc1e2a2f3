//! Watchdog
//!
//! Independent observer of the availability state. Once the service is
//! first seen UNAVAILABLE it waits out a fixed grace period, long enough
//! for the load balancer to pick up the failing health check, and then
//! forces the process to exit. This bounds the window during which a
//! failed instance can linger.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::availability::{Availability, State};

/// How often the availability state is polled
pub const POLL_PERIOD: Duration = Duration::from_secs(3);

/// Delay between the first UNAVAILABLE observation and termination
pub const GRACE_PERIOD: Duration = Duration::from_secs(70);

/// Resolves once the service has been UNAVAILABLE for the full grace
/// period. Split out from [`spawn`] so the trigger is testable.
pub async fn expired(avail: Arc<Availability>, poll: Duration, grace: Duration) {
    let mut tick = tokio::time::interval(poll);
    loop {
        tick.tick().await;
        if avail.state() == State::Unavailable {
            break;
        }
    }
    tokio::time::sleep(grace).await;
}

/// Start the watchdog. The returned handle is only used to abort the task
/// on a clean shutdown; if the watchdog fires first it terminates the
/// whole process with exit code 1.
pub fn spawn(avail: Arc<Availability>, poll: Duration, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        expired(avail, poll, grace).await;
        error!("watchdog terminated mistral: service unavailable");
        std::process::exit(1);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_does_not_fire_while_ready() {
        let avail = Arc::new(Availability::new());
        avail.startup_complete();

        let wait = expired(avail, Duration::from_millis(10), Duration::from_millis(50));
        tokio::pin!(wait);

        let outcome = tokio::time::timeout(Duration::from_secs(3600), &mut wait).await;
        assert!(outcome.is_err(), "watchdog fired for a healthy service");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_grace_period() {
        let avail = Arc::new(Availability::new());
        avail.set_unavailable();

        let poll = Duration::from_millis(10);
        let grace = Duration::from_millis(50);
        let wait = expired(Arc::clone(&avail), poll, grace);
        tokio::pin!(wait);

        // well before poll + grace: still pending
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut wait)
                .await
                .is_err()
        );

        // past poll + grace: resolved
        assert!(
            tokio::time::timeout(Duration::from_millis(200), &mut wait)
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_not_unavailable() {
        let avail = Arc::new(Availability::new());
        avail.set_shutdown();

        let wait = expired(avail, Duration::from_millis(10), Duration::from_millis(10));
        tokio::pin!(wait);

        let outcome = tokio::time::timeout(Duration::from_secs(3600), &mut wait).await;
        assert!(outcome.is_err(), "watchdog must ignore SHUTTING_DOWN");
    }
}
