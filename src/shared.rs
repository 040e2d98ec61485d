//! Shared utilities used across the components of pipekit.

mod lifecycle;
mod shutdown;
mod traits;

#[cfg(test)]
pub(crate) mod test_utils;

pub(crate) use lifecycle::Lifecycle;
pub(crate) use shutdown::shutdown_signal;
pub(crate) use traits::*;

use std::time::Duration;

/// Delay between attempts to connect a reader or writer to its backing system.
pub(crate) const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
