//! Connectivity monitor
//!
//! Tracks a single online/offline flag and notifies subscribers on
//! transitions. Subscribing replays the current state synchronously, so a
//! listener always has a valid initial read. A `watch` channel is exposed
//! for async consumers (the sync coordinator's reconnect loop).
//!
//! The platform connectivity signal is fed in through [`set_online`];
//! repeated reports of the same state notify nobody.
//!
//! [`set_online`]: ConnectivityMonitor::set_online

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::wake::{WakeRegistrar, SYNC_WAKE_TAG};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::subscribe`]
///
/// Listeners are keyed by identity, so registering the same closure twice
/// yields two independent subscriptions with distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Process-wide connectivity state, shareable across components
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    online: watch::Sender<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    wake: Arc<dyn WakeRegistrar>,
}

impl ConnectivityMonitor {
    /// Create a monitor initialized from the platform's current signal
    pub fn new(initially_online: bool) -> Self {
        Self::with_wake(initially_online, Arc::new(crate::wake::NoopWake))
    }

    /// Create a monitor that registers a background wake-up on reconnect
    pub fn with_wake(initially_online: bool, wake: Arc<dyn WakeRegistrar>) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                online,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                wake,
            }),
        }
    }

    /// Current connectivity state
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Register a listener
    ///
    /// The callback is invoked synchronously once with the current state
    /// before this returns, then again on every transition.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let current = self.is_online();

        let callback: Listener = Arc::new(callback);
        callback(current);

        self.inner
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .insert(id, callback);
        ListenerId(id)
    }

    /// Unregister a listener; no-op for unknown ids
    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .remove(&id.0);
    }

    /// Watch channel for async consumers
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Feed a connectivity report from the platform
    ///
    /// Listeners are notified only on actual transitions. A transition to
    /// online additionally registers the sync wake tag, best-effort.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            return;
        }

        if online {
            info!("network connection restored");
            if let Err(err) = self.inner.wake.register(SYNC_WAKE_TAG) {
                warn!(%err, "failed to register background sync on reconnect");
            }
        } else {
            info!("network connection lost");
        }

        // Clone the callbacks out and release the registry lock before
        // invoking: a listener may subscribe or unsubscribe from inside
        // its notification
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .values()
            .cloned()
            .collect();
        for callback in listeners {
            callback(online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::ChannelWake;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |online| sink.lock().unwrap().push(online))
    }

    #[test]
    fn test_subscribe_replays_current_state() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();

        monitor.subscribe(callback);

        // Exactly one synchronous replay, before any transition
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_transitions_notify_in_order() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        monitor.subscribe(callback);

        monitor.set_online(false);
        monitor.set_online(true);

        // Initial replay plus exactly two transition notifications
        assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_redundant_reports_notify_nobody() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        monitor.subscribe(callback);

        monitor.set_online(true);
        monitor.set_online(true);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        let id = monitor.subscribe(callback);

        monitor.unsubscribe(id);
        monitor.set_online(false);

        assert_eq!(*seen.lock().unwrap(), vec![true]);

        // Unknown id is a no-op
        monitor.unsubscribe(id);
    }

    #[test]
    fn test_multiple_listeners_each_notified() {
        let monitor = ConnectivityMonitor::new(false);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            monitor.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        // 3 replays
        assert_eq!(count.load(Ordering::SeqCst), 3);

        monitor.set_online(true);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_listener_may_resubscribe_from_notification() {
        let monitor = ConnectivityMonitor::new(true);
        let count = Arc::new(AtomicUsize::new(0));

        {
            let inner_monitor = monitor.clone();
            let count = Arc::clone(&count);
            monitor.subscribe(move |online| {
                if !online {
                    let count = Arc::clone(&count);
                    inner_monitor.subscribe(move |_| {
                        count.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }

        // Must not deadlock; the nested subscribe replays immediately
        monitor.set_online(false);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        monitor.set_online(true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_from_notification() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();

        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let id = {
            let monitor = monitor.clone();
            let slot = Arc::clone(&slot);
            monitor.clone().subscribe(move |online| {
                callback(online);
                if !online {
                    if let Some(id) = *slot.lock().unwrap() {
                        monitor.unsubscribe(id);
                    }
                }
            })
        };
        *slot.lock().unwrap() = Some(id);

        monitor.set_online(false);
        monitor.set_online(true);

        // Replay, then the offline notification, then silence
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_reconnect_registers_wake_tag() {
        let (wake, mut rx) = ChannelWake::new();
        let monitor = ConnectivityMonitor::with_wake(false, Arc::new(wake));

        monitor.set_online(true);
        assert_eq!(rx.try_recv().unwrap(), SYNC_WAKE_TAG);

        // Going offline does not register anything
        monitor.set_online(false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watch_channel_tracks_state() {
        let monitor = ConnectivityMonitor::new(true);
        let rx = monitor.watch();

        assert!(*rx.borrow());
        monitor.set_online(false);
        assert!(!*rx.borrow());
        assert!(!monitor.is_online());
    }
}
