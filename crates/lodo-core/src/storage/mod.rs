//! Storage layer
//!
//! SQLite-backed persistence for the two collections the store owns:
//! the `tasks` table and the `outbox` queue. Both are written inside the
//! same transaction for every mutation, which is what makes the
//! task-write + outbox-append pair atomic.

pub mod schema;

pub use schema::{get_schema_version, init_schema, needs_init, SCHEMA_VERSION};
