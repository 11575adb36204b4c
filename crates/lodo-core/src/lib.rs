//! lodo Core Library
//!
//! This crate provides the core functionality for lodo, a local-first
//! task list that works offline and reconciles pending changes with a
//! remote system when connectivity returns.
//!
//! # Architecture
//!
//! - **Store**: SQLite-backed persistence for tasks plus an outbox queue
//!   of pending mutations; every mutation writes both atomically
//! - **ConnectivityMonitor**: online/offline flag with
//!   replay-on-subscribe notifications
//! - **SyncCoordinator**: drains the outbox on reconnect, wake-up, or
//!   explicit trigger, retrying failed deliveries up to a configured bound
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(Store::open(config)?);
//!
//! // Mutations persist locally and queue for delivery
//! let task = store.save_task(TaskInput::new("buy milk"))?;
//!
//! // Query tasks
//! let tasks = store.get_all_tasks()?;
//! ```
//!
//! # Modules
//!
//! - `store`: durable store and outbox queue (main entry point)
//! - `models`: task and outbox entry data structures
//! - `monitor`: connectivity tracking
//! - `sync`: background sync coordinator and delivery port
//! - `wake`: platform background wake-up seam
//! - `config`: application configuration
//! - `storage`: SQLite schema
//! - `error`: error taxonomy

pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod storage;
pub mod store;
pub mod sync;
pub mod wake;

pub use config::Config;
pub use error::{DeliveryError, StoreError, StoreResult, WakeError};
pub use models::{Action, EntryStatus, OutboxEntry, SyncStatus, Task, TaskId, TaskInput};
pub use monitor::{ConnectivityMonitor, ListenerId};
pub use store::{OutboxStats, Store, StoreHandle};
pub use sync::{Delivery, DrainOutcome, DrainReport, LogDelivery, SyncCoordinator};
pub use wake::{ChannelWake, NoopWake, WakeRegistrar, SYNC_WAKE_TAG};
