//! Background synchronization
//!
//! The coordinator drains the outbox whenever it is triggered: by a
//! connectivity-restored event, by a platform wake-up, or by an explicit
//! user action. Delivery itself goes through the [`Delivery`] port; the
//! real remote endpoint is out of scope and stubbed.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = Arc::new(SyncCoordinator::new(store, delivery, config.max_retries));
//! coordinator.run_on_reconnect(monitor.watch());
//! let report = coordinator.drain().await?;
//! ```

mod coordinator;
mod delivery;

pub use coordinator::{DrainOutcome, DrainReport, SyncCoordinator};
pub use delivery::{Delivery, LogDelivery};
