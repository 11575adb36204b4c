//! Remote delivery port
//!
//! The coordinator hands each outbox entry to a [`Delivery`]
//! implementation. A real implementation would call a server API; none is
//! specified here, so the shipped implementation only logs.

use async_trait::async_trait;
use tracing::debug;

use crate::error::DeliveryError;
use crate::models::OutboxEntry;

/// Remote sync endpoint seam
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver one mutation to the remote system
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), DeliveryError>;
}

/// Stand-in delivery that accepts everything
///
/// Keeps the drain pipeline exercisable until a real endpoint exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), DeliveryError> {
        debug!(
            entry = entry.id,
            action = entry.action.as_str(),
            task = %entry.task_id,
            "delivery stub accepted entry"
        );
        Ok(())
    }
}
