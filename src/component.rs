//! The lifecycle contract every component implements.
//!
//! Inputs produce transactions, outputs consume them, and processors transform
//! messages inline within the stage that calls them. Caches and rate limits
//! are shared resources looked up through the
//! [`Management`](crate::management::Management) context.
//!
//! ## Lifecycle
//!
//! Components move through `Created → Running → Closing → Closed`.
//! [`Closable::close_async`] enters `Closing`: the component stops accepting
//! new transactions but still answers every transaction it already accepted,
//! and only then reaches `Closed`. A component never re-enters `Running`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::transaction::TransactionReceiver;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Closing,
    Closed,
}

/// Graceful shutdown shared by inputs and outputs.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Requests a graceful shutdown. Non-blocking and idempotent; it may be
    /// called before consumption has started.
    fn close_async(&self);

    /// Blocks until the component has fully stopped and every transaction it
    /// accepted has been answered, or returns a timeout error. A timeout does
    /// not stop the component; it may still be cleaning up.
    async fn wait_for_close(&self, timeout: Duration) -> Result<()>;
}

/// A source of transactions.
pub trait Input: Closable {
    /// Hands out the channel the input populates as data becomes available.
    /// The channel can be taken once; it closes when the input stops.
    fn transaction_chan(&self) -> Result<TransactionReceiver>;
}

/// A consumer of transactions.
pub trait Output: Closable {
    /// Starts draining `transactions`. Fails straight away if the output
    /// cannot start, otherwise returns once the consume loop is running.
    fn consume(&self, transactions: TransactionReceiver) -> Result<()>;
}

/// Transforms message batches inline.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes one batch into zero or more batches. An empty result means
    /// the batch was filtered out, which is not a failure.
    async fn process(&self, msg: &Message) -> Result<Vec<Message>>;

    fn close_async(&self) {}

    async fn wait_for_close(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// A key/value store shared between components.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Throttles access to a shared resource.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Returns how long the caller must wait before accessing the resource;
    /// zero means it may proceed now.
    async fn access(&self) -> Result<Duration>;
}
