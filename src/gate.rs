//! Response gate.
//!
//! The V5 channel is half-duplex: one outstanding request at a time. The
//! gate is the single-slot rendezvous between the reader task that pulls
//! frames off the socket and the caller awaiting a reply to its own
//! request. Registration happens synchronously, before the caller suspends,
//! so a reply that arrives in the gap between sending a request and
//! awaiting its response is never lost.

use tokio::sync::oneshot;

use crate::frame::ValidatedResponse;

/// The awaited half of a registered request, returned by [`ResponseGate::register`].
pub struct Waiter {
    rx: oneshot::Receiver<ValidatedResponse>,
}

impl Waiter {
    /// Suspend until the matching response arrives or the gate drops the
    /// sender (connection teardown, or a new registration replacing this
    /// one).
    pub async fn wait(self) -> Option<ValidatedResponse> {
        self.rx.await.ok()
    }
}

/// Single-slot request/response rendezvous.
///
/// Only one [`Waiter`] can be outstanding at a time, matching the
/// protocol's half-duplex nature: requests are dispatched one at a time.
/// Registering a new waiter while one is already pending drops
/// the previous sender, which resolves that waiter's `wait()` to `None`.
#[derive(Debug, Default)]
pub struct ResponseGate {
    slot: std::sync::Mutex<Option<oneshot::Sender<ValidatedResponse>>>,
}

impl ResponseGate {
    pub fn new() -> Self {
        Self {
            slot: std::sync::Mutex::new(None),
        }
    }

    /// Register interest in the next response. Must be called before the
    /// request is written to the transport, so a fast reply cannot race
    /// ahead of the registration.
    pub fn register(&self) -> Waiter {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock().unwrap() = Some(tx);
        Waiter { rx }
    }

    /// Hand a parsed response to whichever waiter is currently registered.
    /// If nothing is registered (an unsolicited frame, or one that arrived
    /// after its waiter gave up) the frame is silently discarded.
    ///
    /// Idempotent: completing an already-vacated slot is a no-op, not an
    /// error, since the sender is consumed by `take()`.
    pub fn complete(&self, response: ValidatedResponse) {
        if let Some(tx) = self.slot.lock().unwrap().take() {
            let _ = tx.send(response);
        }
    }

    /// Clear the slot without completing it, e.g. on timeout or transport
    /// teardown. Causes the registered `Waiter::wait` to resolve to `None`.
    pub fn cancel(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Whether a waiter is currently registered.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}
