//! Inputs built from a [`Reader`].
//!
//! [`ReaderInput`] runs the read loop of an input: it reads a batch, wraps it
//! in a transaction, hands it downstream and waits for the response before
//! reading again. Every response is passed back to the reader through
//! [`Reader::ack`], so retrying failed batches is the reader's decision.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::component::{Closable, Input, State};
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::shared::{ErrorContext, Lifecycle, RECONNECT_BACKOFF};
use crate::transaction::{
    transaction_channel, Response, Transaction, TransactionReceiver, TransactionSender,
    DEFAULT_CHANNEL_SIZE,
};

/// Reads message batches from a backing system.
#[async_trait]
pub trait Reader: Send + Sync + 'static {
    /// Establishes the connection. Retried with a backoff until it succeeds
    /// or the input is closed.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Reads the next batch. `None` means the source is exhausted and the
    /// input shuts down.
    async fn read(&self) -> Result<Option<Message>>;

    /// Receives the outcome of the batch returned by the last `read`.
    async fn ack(&self, _response: &Response) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// An [`Input`] that produces transactions from a [`Reader`].
pub struct ReaderInput<R> {
    label: String,
    reader: Arc<R>,
    lifecycle: Arc<Lifecycle>,
    transactions: Mutex<Option<TransactionReceiver>>,
}

impl<R> ErrorContext for ReaderInput<R> {
    fn wrap(kind: ErrorKind) -> Error {
        Error::InputError(kind)
    }
}

impl<R: Reader> ReaderInput<R> {
    /// Creates the input and starts reading straight away. Reads block on the
    /// transaction channel until someone takes it.
    pub fn new(label: impl Into<String>, reader: R) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Self::internal_error(format!("no async runtime: {e}")))?;

        let input = Self {
            label: label.into(),
            reader: Arc::new(reader),
            lifecycle: Arc::new(Lifecycle::new()),
            transactions: Mutex::new(None),
        };
        input
            .lifecycle
            .start()
            .map_err(|state| Self::internal_error(format!("fresh input in state {state:?}")))?;

        let (tx, rx) = transaction_channel(DEFAULT_CHANNEL_SIZE);
        *input
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(rx);

        let span = info_span!("input", label = %input.label);
        runtime.spawn(
            Self::run_read(Arc::clone(&input.reader), Arc::clone(&input.lifecycle), tx)
                .instrument(span),
        );
        Ok(input)
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    async fn run_read(reader: Arc<R>, lifecycle: Arc<Lifecycle>, transactions: TransactionSender) {
        let _closed = lifecycle.closed_guard();
        let shutdown = lifecycle.shutdown_token();

        if connect(reader.as_ref(), &shutdown).await {
            loop {
                let read = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    read = reader.read() => read,
                };
                let msg = match read {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        info!("input exhausted");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read, backing off");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue,
                        }
                    }
                };

                let (transaction, pending) = Transaction::new(msg);
                // a transaction that never made it into the channel is dropped
                // here, which answers it as failed
                let delivered = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => false,
                    sent = transactions.send(transaction) => sent.is_ok(),
                };

                // an accepted transaction is awaited even while closing
                let response = pending.response().await;
                if let Err(e) = reader.ack(&response).await {
                    warn!(error = %e, "failed to acknowledge batch");
                }
                if !delivered {
                    debug!("transaction not delivered, stopping input");
                    break;
                }
            }
        }

        drop(transactions);
        if let Err(e) = reader.close().await {
            warn!(error = %e, "failed to close reader");
        }
        info!("input closed");
    }
}

#[async_trait]
impl<R: Reader> Closable for ReaderInput<R> {
    fn close_async(&self) {
        self.lifecycle.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<()> {
        if self.lifecycle.wait_for_close(timeout).await {
            Ok(())
        } else {
            Err(Self::timeout_error(format!(
                "{} did not close within {timeout:?}",
                self.label
            )))
        }
    }
}

impl<R: Reader> Input for ReaderInput<R> {
    fn transaction_chan(&self) -> Result<TransactionReceiver> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Self::internal_error(format!(
                    "transaction channel of {} was already taken",
                    self.label
                ))
            })
    }
}

async fn connect<R: Reader>(reader: &R, shutdown: &CancellationToken) -> bool {
    loop {
        match reader.connect().await {
            Ok(()) => {
                info!("input connected");
                return true;
            }
            Err(e) => warn!(error = %e, "failed to connect input, retrying"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}
