/*!
 * Dispatcher
 *
 * Routes every request onto a worker input queue by `hostID mod W`. All
 * batches from the same host therefore flow through the same worker and
 * the same producer, which keys the broker partition by host as well;
 * combined with per-partition broker ordering this yields per-host FIFO
 * delivery.
 *
 * W is fixed at startup. The put into the bounded worker queue blocks, so
 * backpressure propagates straight to the HTTP handler.
 */

use std::sync::{Arc, RwLock};

use mistral_common::{Error, Result};
use tokio::sync::mpsc;

use crate::types::Request;

/// Cloneable routing handle over the worker input queues.
///
/// All clones share one sender set, so [`Dispatcher::close`] drops every
/// sender at once and the worker input channels observe end-of-stream.
#[derive(Clone)]
pub struct Dispatcher {
    senders: Arc<RwLock<Option<Vec<mpsc::Sender<Request>>>>>,
    width: usize,
}

impl Dispatcher {
    pub fn new(senders: Vec<mpsc::Sender<Request>>) -> Self {
        let width = senders.len();
        Dispatcher {
            senders: Arc::new(RwLock::new(Some(senders))),
            width,
        }
    }

    /// Number of workers routed over; fixed for the process lifetime.
    pub fn worker_count(&self) -> usize {
        self.width
    }

    /// Place the request into its worker's input queue, waiting for space
    /// under backpressure. Fails only once the queues are closed during
    /// shutdown.
    pub async fn dispatch(&self, req: Request) -> Result<()> {
        let index = (req.host_id % self.width as u64) as usize;
        let sender = {
            let guard = self
                .senders
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.as_ref() {
                Some(senders) => senders[index].clone(),
                None => return Err(Error::Unavailable),
            }
        };
        sender.send(req).await.map_err(|_| Error::Unavailable)
    }

    /// Drop all senders, closing every worker input queue. Idempotent.
    pub fn close(&self) {
        let mut guard = self
            .senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(host_id: u64) -> Request {
        let (req, _rx) = Request::new(host_id, vec![]);
        req
    }

    #[tokio::test]
    async fn test_routing_by_host_id_modulo() {
        let mut receivers = Vec::new();
        let mut senders = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel(8);
            senders.push(tx);
            receivers.push(rx);
        }
        let dispatcher = Dispatcher::new(senders);
        assert_eq!(dispatcher.worker_count(), 4);

        for host_id in [0u64, 1, 5, 7, 42] {
            dispatcher.dispatch(make_request(host_id)).await.unwrap();
            let expected = (host_id % 4) as usize;
            let got = receivers[expected].recv().await.unwrap();
            assert_eq!(got.host_id, host_id);
        }
    }

    #[tokio::test]
    async fn test_same_host_same_worker_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let (other_tx, mut other_rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(vec![tx, other_tx]);

        for i in 0..3u64 {
            let (req, _c) = Request::new(2, vec![i as u8]);
            dispatcher.dispatch(req).await.unwrap();
        }

        for i in 0..3u8 {
            assert_eq!(rx.recv().await.unwrap().payload, vec![i]);
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_worker_inputs() {
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(vec![tx]);
        let clone = dispatcher.clone();

        dispatcher.close();
        // the clone shares the sender set, so its queues are closed too
        assert!(matches!(
            clone.dispatch(make_request(1)).await,
            Err(Error::Unavailable)
        ));
        assert!(rx.recv().await.is_none());

        // idempotent
        dispatcher.close();
    }
}
