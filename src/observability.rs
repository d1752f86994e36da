//! Observability hooks.
//!
//! An abstract, optional, fire-and-forget sink the request engine calls at
//! well-defined points. The default implementation emits nothing but
//! `tracing` events; a host application wanting metrics swaps in its own
//! [`Observer`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Sink for client lifecycle and per-request events. All methods have
/// no-op-beyond-logging default bodies, so implementors only override what
/// they care about.
#[async_trait]
pub trait Observer: Send + Sync {
    /// A request of function code `fc` completed successfully in `duration`.
    async fn request_ok(&self, fc: u8, duration: Duration) {
        debug!(fc, ?duration, "request ok");
    }

    /// A request of function code `fc` failed with the stable error label
    /// `error_label` (see [`crate::error::SolarmanError::label`]).
    async fn request_err(&self, fc: u8, error_label: &str) {
        debug!(fc, error_label, "request failed");
    }

    /// A retry is about to be attempted for function code `fc`.
    async fn retry(&self, fc: u8) {
        warn!(fc, "retrying request");
    }

    /// The transport finished connecting.
    async fn connect(&self) {
        info!("connected");
    }

    /// The transport was closed.
    async fn disconnect(&self) {
        info!("disconnected");
    }

    /// A reconnect attempt is starting.
    async fn reconnection_attempt(&self) {
        info!("reconnecting");
    }
}

/// An [`Observer`] that only logs via `tracing`, using the default trait
/// bodies. Used when a client is constructed without an explicit observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_observer_methods_do_not_panic() {
        let obs = TracingObserver;
        obs.request_ok(0x03, Duration::from_millis(5)).await;
        obs.request_err(0x03, "timeout").await;
        obs.retry(0x03).await;
        obs.connect().await;
        obs.disconnect().await;
        obs.reconnection_attempt().await;
    }
}
