//! Sync coordinator
//!
//! Drains the pending outbox in creation order, one entry at a time. At
//! most one drain runs at a time: triggers that arrive while a drain is in
//! flight are coalesced into a single additional pass after the current
//! one completes, no matter how many arrived.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::Store;
use crate::sync::Delivery;
use crate::wake::SYNC_WAKE_TAG;

/// What one `drain` call accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries delivered and marked synced
    pub delivered: usize,
    /// Failed attempts left pending for a later pass
    pub retried: usize,
    /// Entries that exhausted their retries this drain
    pub failed: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

/// Result of a `drain` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// This call ran the drain (including any coalesced rerun passes)
    Completed(DrainReport),
    /// A drain was already in flight; it will run one more pass
    Coalesced,
}

#[derive(Default)]
struct DrainFlags {
    busy: bool,
    rerun: bool,
}

/// Orchestrates background delivery of outbox entries
pub struct SyncCoordinator {
    store: Arc<Store>,
    delivery: Arc<dyn Delivery>,
    max_retries: u32,
    flags: Mutex<DrainFlags>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<Store>, delivery: Arc<dyn Delivery>, max_retries: u32) -> Self {
        Self {
            store,
            delivery,
            max_retries,
            flags: Mutex::new(DrainFlags::default()),
        }
    }

    /// Drain the pending outbox
    ///
    /// Mutual exclusion: if a drain is already running, this only flags it
    /// to run one more full pass and returns immediately. The running
    /// drain picks up entries queued meanwhile during that extra pass.
    pub async fn drain(&self) -> StoreResult<DrainOutcome> {
        {
            let mut flags = self.flags.lock().expect("drain flags poisoned");
            if flags.busy {
                flags.rerun = true;
                debug!("drain already in flight, coalescing trigger");
                return Ok(DrainOutcome::Coalesced);
            }
            flags.busy = true;
        }

        let mut report = DrainReport::default();
        loop {
            match self.pass().await {
                Ok(pass) => {
                    report.merge(pass);
                    // Deciding to stop and releasing the busy flag must be
                    // one atomic step, or a trigger landing in between
                    // would be lost
                    let mut flags = self.flags.lock().expect("drain flags poisoned");
                    if flags.rerun {
                        flags.rerun = false;
                        continue;
                    }
                    flags.busy = false;
                    break;
                }
                Err(err) => {
                    let mut flags = self.flags.lock().expect("drain flags poisoned");
                    // A trigger answered with Coalesced was promised one
                    // more pass; a failed pass does not void that promise
                    if flags.rerun {
                        flags.rerun = false;
                        warn!(%err, "drain pass failed, running the coalesced pass anyway");
                        continue;
                    }
                    flags.busy = false;
                    return Err(err);
                }
            }
        }

        info!(
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed,
            "drain complete"
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// One pass over the entries that are pending right now, oldest first
    async fn pass(&self) -> StoreResult<DrainReport> {
        let entries = self.store.pending_entries()?;
        debug!(pending = entries.len(), "starting drain pass");

        let mut report = DrainReport::default();
        for entry in entries {
            match self.delivery.deliver(&entry).await {
                Ok(()) => {
                    self.store.mark_delivered(entry.id, entry.task_id)?;
                    debug!(entry = entry.id, task = %entry.task_id, "entry delivered");
                    report.delivered += 1;
                }
                Err(err) => {
                    let attempts = entry.retry_count + 1;
                    let exhausted = attempts >= self.max_retries;
                    self.store.record_failure(entry.id, entry.task_id, exhausted)?;

                    if exhausted {
                        warn!(
                            entry = entry.id,
                            task = %entry.task_id,
                            attempts,
                            %err,
                            "delivery failed permanently, giving up"
                        );
                        report.failed += 1;
                    } else {
                        debug!(
                            entry = entry.id,
                            attempts,
                            %err,
                            "delivery failed, will retry on a later drain"
                        );
                        report.retried += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Drain whenever connectivity transitions back to online
    pub fn run_on_reconnect(self: &Arc<Self>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                if let Err(err) = coordinator.drain().await {
                    warn!(%err, "drain after reconnect failed");
                }
            }
        })
    }

    /// Drain whenever the platform fires the sync wake tag
    pub fn run_on_wake(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(tag) = rx.recv().await {
                if tag != SYNC_WAKE_TAG {
                    debug!(tag, "ignoring unknown wake tag");
                    continue;
                }
                if let Err(err) = coordinator.drain().await {
                    warn!(%err, "drain after wake-up failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::DeliveryError;
    use crate::models::{EntryStatus, OutboxEntry, SyncStatus, TaskInput};
    use crate::monitor::ConnectivityMonitor;
    use crate::wake::ChannelWake;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_store() -> Arc<Store> {
        Arc::new(Store::in_memory(Config::default()).unwrap())
    }

    /// Records delivered entry ids; always succeeds
    #[derive(Default)]
    struct RecordingDelivery {
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn deliver(&self, entry: &OutboxEntry) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(entry.id);
            Ok(())
        }
    }

    /// Fails the first `failures` attempts, then succeeds
    struct FlakyDelivery {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyDelivery {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Delivery for FlakyDelivery {
        async fn deliver(&self, _entry: &OutboxEntry) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Unreachable("stub outage".to_string()));
            }
            Ok(())
        }
    }

    /// Succeeds, but holds each call until released
    struct GatedDelivery {
        calls: AtomicU32,
        entered: tokio::sync::Semaphore,
        gate: tokio::sync::Semaphore,
    }

    impl GatedDelivery {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                entered: tokio::sync::Semaphore::new(0),
                gate: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl Delivery for GatedDelivery {
        async fn deliver(&self, _entry: &OutboxEntry) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.add_permits(1);
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }

    /// Fails every attempt, but holds each call until released
    struct GatedFailingDelivery {
        calls: AtomicU32,
        entered: tokio::sync::Semaphore,
        gate: tokio::sync::Semaphore,
    }

    impl GatedFailingDelivery {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                entered: tokio::sync::Semaphore::new(0),
                gate: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl Delivery for GatedFailingDelivery {
        async fn deliver(&self, _entry: &OutboxEntry) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.add_permits(1);
            self.gate.acquire().await.unwrap().forget();
            Err(DeliveryError::Unreachable("stub outage".to_string()))
        }
    }

    fn entry_state(store: &Store, entry_id: i64) -> (EntryStatus, u32) {
        store.with_conn(|conn| {
            conn.query_row(
                "SELECT status, retry_count FROM outbox WHERE id = ?1",
                [entry_id],
                |row| {
                    let status: String = row.get(0)?;
                    Ok((status.parse().unwrap(), row.get(1)?))
                },
            )
            .unwrap()
        })
    }

    #[tokio::test]
    async fn test_drain_delivers_in_creation_order() {
        let store = test_store();
        for i in 0..3 {
            store.save_task(TaskInput::new(format!("task {}", i))).unwrap();
        }
        let expected: Vec<i64> = store.pending_entries().unwrap().iter().map(|e| e.id).collect();

        let delivery = Arc::new(RecordingDelivery::default());
        let coordinator = SyncCoordinator::new(Arc::clone(&store), delivery.clone(), 5);

        let outcome = coordinator.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                delivered: 3,
                ..Default::default()
            })
        );

        // Delivered strictly in creation order
        assert_eq!(*delivery.seen.lock().unwrap(), expected);
        assert_eq!(store.pending_count().unwrap(), 0);
        for task in store.get_all_tasks().unwrap() {
            assert_eq!(task.sync_status, SyncStatus::Synced);
        }
    }

    #[tokio::test]
    async fn test_entry_retried_across_drains_until_success() {
        let store = test_store();
        let task = store.save_task(TaskInput::new("flaky")).unwrap();
        let entry_id = store.pending_entries().unwrap()[0].id;

        let delivery = Arc::new(FlakyDelivery::new(2));
        let coordinator = SyncCoordinator::new(Arc::clone(&store), delivery.clone(), 5);

        // Two failing drains leave the entry pending with bumped retries
        for expected_retries in 1..=2 {
            let outcome = coordinator.drain().await.unwrap();
            assert_eq!(
                outcome,
                DrainOutcome::Completed(DrainReport {
                    retried: 1,
                    ..Default::default()
                })
            );
            let (status, retries) = entry_state(&store, entry_id);
            assert_eq!(status, EntryStatus::Pending);
            assert_eq!(retries, expected_retries);
        }

        // Third drain succeeds; retry_count records the failed attempts
        let outcome = coordinator.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                delivered: 1,
                ..Default::default()
            })
        );
        let (status, retries) = entry_state(&store, entry_id);
        assert_eq!(status, EntryStatus::Delivered);
        assert_eq!(retries, 2);
        assert_eq!(
            store.get_task(task.id).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_exhausted_entry_fails_and_is_not_retried() {
        let store = test_store();
        let task = store.save_task(TaskInput::new("doomed")).unwrap();
        let entry_id = store.pending_entries().unwrap()[0].id;

        let delivery = Arc::new(FlakyDelivery::new(u32::MAX));
        let coordinator = SyncCoordinator::new(Arc::clone(&store), delivery.clone(), 3);

        // Exactly max_retries attempts, then terminal failure
        for _ in 0..5 {
            coordinator.drain().await.unwrap();
        }

        assert_eq!(delivery.calls.load(Ordering::SeqCst), 3);
        let (status, retries) = entry_state(&store, entry_id);
        assert_eq!(status, EntryStatus::Failed);
        assert_eq!(retries, 3);
        assert_eq!(
            store.get_task(task.id).unwrap().unwrap().sync_status,
            SyncStatus::Error
        );
        assert_eq!(store.failed_entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_coalesce_into_one_extra_pass() {
        let store = test_store();
        store.save_task(TaskInput::new("contended")).unwrap();

        let delivery = Arc::new(GatedFailingDelivery::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            delivery.clone(),
            10,
        ));

        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.drain().await.unwrap() })
        };

        // Wait until the first delivery attempt is in flight
        delivery.entered.acquire().await.unwrap().forget();

        // Three triggers while busy: all coalesce
        for _ in 0..3 {
            assert_eq!(coordinator.drain().await.unwrap(), DrainOutcome::Coalesced);
        }

        // Release the first attempt, then the one from the rerun pass
        delivery.gate.add_permits(1);
        delivery.entered.acquire().await.unwrap().forget();
        delivery.gate.add_permits(1);

        let outcome = running.await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                retried: 2,
                ..Default::default()
            })
        );

        // Initial pass plus exactly one coalesced rerun, not three
        assert_eq!(delivery.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_coalesced_trigger_survives_failed_pass() {
        let store = test_store();
        store.save_task(TaskInput::new("contended")).unwrap();

        let delivery = Arc::new(GatedDelivery::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            delivery.clone(),
            5,
        ));

        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.drain().await.unwrap() })
        };

        // A trigger lands while the first delivery is in flight
        delivery.entered.acquire().await.unwrap().forget();
        assert_eq!(coordinator.drain().await.unwrap(), DrainOutcome::Coalesced);

        // Sabotage the status update so the first pass errors out
        store.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER outbox_jam BEFORE UPDATE ON outbox
                 BEGIN SELECT RAISE(ABORT, 'jam'); END",
            )
            .unwrap()
        });
        delivery.gate.add_permits(1);

        // The promised extra pass still runs; let it succeed
        delivery.entered.acquire().await.unwrap().forget();
        store.with_conn(|conn| conn.execute_batch("DROP TRIGGER outbox_jam").unwrap());
        delivery.gate.add_permits(1);

        let outcome = running.await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                delivered: 1,
                ..Default::default()
            })
        );
        assert_eq!(delivery.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_on_reconnect() {
        let store = test_store();
        store.save_task(TaskInput::new("offline edit")).unwrap();

        let monitor = ConnectivityMonitor::new(false);
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            Arc::new(RecordingDelivery::default()),
            5,
        ));
        let handle = coordinator.run_on_reconnect(monitor.watch());

        // Give the loop a chance to start listening
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.set_online(true);

        for _ in 0..50 {
            if store.pending_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.pending_count().unwrap(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_drain_on_wake_tag() {
        let (wake, wake_rx) = ChannelWake::new();
        let store = Arc::new(
            Store::in_memory_with_wake(Config::default(), Arc::new(wake)).unwrap(),
        );

        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            Arc::new(RecordingDelivery::default()),
            5,
        ));
        let handle = coordinator.run_on_wake(wake_rx);

        // Saving registers the wake tag, which triggers a drain
        store.save_task(TaskInput::new("wake me")).unwrap();

        for _ in 0..50 {
            if store.pending_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.pending_count().unwrap(), 0);
        handle.abort();
    }
}
