//! Background wake-up capability
//!
//! The platform may offer a way to wake the application when connectivity
//! returns (the original host exposed this as a background-sync
//! registration). The store and the connectivity monitor register the
//! `sync-tasks` tag after every mutation and on every reconnect; a host
//! loop that receives the tag later is expected to invoke
//! [`SyncCoordinator::drain`](crate::sync::SyncCoordinator::drain).
//!
//! Absence of the capability is not an error: [`NoopWake`] degrades to
//! "sync only on explicit trigger or reconnect".

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::WakeError;

/// Wake tag registered for outbox drains
pub const SYNC_WAKE_TAG: &str = "sync-tasks";

/// Platform wake-up registration seam
pub trait WakeRegistrar: Send + Sync {
    /// Register a named wake tag. Best-effort: callers log failures and
    /// never propagate them.
    fn register(&self, tag: &str) -> Result<(), WakeError>;
}

/// Capability-absent implementation: registration is a no-op
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWake;

impl WakeRegistrar for NoopWake {
    fn register(&self, tag: &str) -> Result<(), WakeError> {
        debug!(tag, "background wake-up not supported; skipping registration");
        Ok(())
    }
}

/// Channel-backed implementation for hosts that can run a wake loop
///
/// Tags are forwarded over an unbounded channel; pair the receiver with
/// [`SyncCoordinator::run_on_wake`](crate::sync::SyncCoordinator::run_on_wake).
pub struct ChannelWake {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelWake {
    /// Create the registrar and the receiver the host loop consumes
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WakeRegistrar for ChannelWake {
    fn register(&self, tag: &str) -> Result<(), WakeError> {
        self.tx
            .send(tag.to_string())
            .map_err(|_| WakeError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_wake_always_succeeds() {
        assert!(NoopWake.register(SYNC_WAKE_TAG).is_ok());
    }

    #[test]
    fn test_channel_wake_forwards_tags() {
        let (wake, mut rx) = ChannelWake::new();

        wake.register(SYNC_WAKE_TAG).unwrap();
        wake.register(SYNC_WAKE_TAG).unwrap();

        assert_eq!(rx.try_recv().unwrap(), SYNC_WAKE_TAG);
        assert_eq!(rx.try_recv().unwrap(), SYNC_WAKE_TAG);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_wake_errors_after_receiver_dropped() {
        let (wake, rx) = ChannelWake::new();
        drop(rx);

        assert!(matches!(
            wake.register(SYNC_WAKE_TAG),
            Err(WakeError::ChannelClosed)
        ));
    }
}
