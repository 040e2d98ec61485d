//! Bounds the number of unacknowledged transactions at a stage.
//!
//! The limiter is a counting admission gate. A stage takes a permit before it
//! reads the next transaction and releases it once that transaction has been
//! answered. While every permit is taken the stage stops reading, its input
//! channel fills up and the upstream sender blocks, which carries
//! backpressure all the way back to the source.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, ErrorKind, Result};
use crate::shared::ErrorContext;

/// Default number of transactions a stage may have in flight. One means
/// strictly ordered delivery.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Largest accepted limit. `wait_idle` takes every permit in one call, which
/// tokio counts in `u32`.
pub const MAX_IN_FLIGHT: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

#[derive(Debug, Clone)]
pub struct InFlightLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ErrorContext for InFlightLimiter {
    fn wrap(kind: ErrorKind) -> Error {
        Error::OutputError(kind)
    }
}

impl InFlightLimiter {
    /// Creates a limiter admitting at most `limit` transactions at once.
    /// `limit` must be between 1 and [`MAX_IN_FLIGHT`].
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Self::config_error("max_in_flight must be at least 1"));
        }
        if limit > MAX_IN_FLIGHT {
            return Err(Self::config_error(format!(
                "max_in_flight must be at most {MAX_IN_FLIGHT}, got {limit}"
            )));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of transactions currently admitted.
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Self::internal_error(e.to_string()))
    }

    /// Waits until every admitted transaction has been answered.
    pub async fn wait_idle(&self) -> Result<()> {
        let permits = u32::try_from(self.limit).map_err(|e| Self::internal_error(e.to_string()))?;
        let _all = self
            .semaphore
            .acquire_many(permits)
            .await
            .map_err(|e| Self::internal_error(e.to_string()))?;
        Ok(())
    }
}
