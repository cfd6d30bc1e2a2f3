/*!
 * Availability State Machine
 *
 * Process-wide lifecycle state observed by the health endpoint, the ingest
 * endpoint and the watchdog.
 *
 * ```text
 *   STARTING ──startup_complete()──> READY
 *      │                               │
 *      ├──────────set_shutdown()───────┼──────> SHUTTING_DOWN (terminal)
 *      │                               │
 *      └──────────set_unavailable()────┴──────> UNAVAILABLE   (terminal)
 * ```
 *
 * Transitions are monotonic: once the state reaches SHUTTING_DOWN or
 * UNAVAILABLE it never leaves. SHUTTING_DOWN deliberately keeps the HTTP
 * listener open while /health starts failing, so the load balancer removes
 * the instance before new TCP connections are refused.
 */

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Starting = 0,
    Ready = 1,
    ShuttingDown = 2,
    Unavailable = 3,
}

impl State {
    fn from_u8(raw: u8) -> State {
        match raw {
            0 => State::Starting,
            1 => State::Ready,
            2 => State::ShuttingDown,
            _ => State::Unavailable,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, State::ShuttingDown | State::Unavailable)
    }
}

/// Shared availability state; writes are restricted to the named
/// transition methods below.
#[derive(Debug)]
pub struct Availability {
    state: AtomicU8,
}

impl Availability {
    pub fn new() -> Self {
        Availability {
            state: AtomicU8::new(State::Starting as u8),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// STARTING -> READY. Fired once the startup quiet period passes with
    /// no early failures; a no-op from any other state.
    pub fn startup_complete(&self) {
        let _ = self.state.compare_exchange(
            State::Starting as u8,
            State::Ready as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// any -> SHUTTING_DOWN, except out of a terminal state.
    pub fn set_shutdown(&self) {
        self.advance(State::ShuttingDown);
    }

    /// any -> UNAVAILABLE, except out of a terminal state.
    pub fn set_unavailable(&self) {
        self.advance(State::Unavailable);
    }

    fn advance(&self, target: State) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if State::from_u8(current).is_terminal() {
                return;
            }
            match self.state.compare_exchange(
                current,
                target as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// True only in READY
    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    /// True while new ingest requests are accepted
    pub fn is_serving(&self) -> bool {
        self.state() == State::Ready
    }

    /// True once the instance is on its way out, for either reason
    pub fn is_going_down(&self) -> bool {
        self.state().is_terminal()
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::new()
    }
}
