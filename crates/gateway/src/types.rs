//! In-flight request type shared between the endpoint, dispatcher and
//! workers.

use mistral_common::Result;
use tokio::sync::oneshot;
use tracing::debug;

/// One validated, normalized metric batch on its way to the broker.
///
/// Ownership moves endpoint -> dispatcher -> worker; the endpoint keeps
/// only the receive side of the completion channel. The owning worker
/// resolves every request exactly once, success or error.
#[derive(Debug)]
pub struct Request {
    /// Source host identifier, always non-zero
    pub host_id: u64,

    /// Canonical batch bytes destined for the broker
    pub payload: Vec<u8>,

    /// Single-shot result channel; consumed by [`Request::resolve`]
    completion: oneshot::Sender<Result<()>>,
}

impl Request {
    /// Build a request plus the completion receiver the endpoint waits on.
    pub fn new(host_id: u64, payload: Vec<u8>) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Request {
                host_id,
                payload,
                completion: tx,
            },
            rx,
        )
    }

    /// Deliver the broker result to the waiting endpoint.
    ///
    /// The send only fails when the endpoint abandoned the wait because
    /// its connection was aborted during forced shutdown; the result is
    /// discarded in that case.
    pub fn resolve(self, result: Result<()>) {
        if self.completion.send(result).is_err() {
            debug!(
                "completion for hostID {} discarded, requester is gone",
                self.host_id
            );
        }
    }
}
