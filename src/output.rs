//! Outputs built from a [`Writer`].
//!
//! [`WriterOutput`] owns the consume loop of an output: it admits at most
//! `max_in_flight` transactions at a time, writes each batch through the
//! writer on its own task and answers the transaction with the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::component::{Closable, Output, State};
use crate::error::{Error, ErrorKind, Result};
use crate::limiter::{InFlightLimiter, DEFAULT_MAX_IN_FLIGHT};
use crate::message::Message;
use crate::shared::{ErrorContext, Lifecycle, RECONNECT_BACKOFF};
use crate::transaction::{Response, TransactionReceiver};

/// Writes message batches to a backing system.
///
/// `write` may be called concurrently, up to the output's `max_in_flight`,
/// so implementors keep their state behind shared references.
///
/// # Example
///
/// ```no_run
/// use pipekit::message::Message;
/// use pipekit::output::{Writer, WriterOutput};
/// use pipekit::component::Output;
///
/// struct Logger;
///
/// #[async_trait::async_trait]
/// impl Writer for Logger {
///     async fn write(&self, msg: &Message) -> pipekit::error::Result<()> {
///         for part in msg {
///             println!("{}", String::from_utf8_lossy(part.payload()));
///         }
///         Ok(())
///     }
/// }
///
/// # async fn run(rx: pipekit::transaction::TransactionReceiver) -> pipekit::error::Result<()> {
/// let output = WriterOutput::new("logger", Logger, 1)?;
/// output.consume(rx)?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Writer: Send + Sync + 'static {
    /// Establishes the connection. Retried with a backoff until it succeeds
    /// or the output is closed.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Writes one batch. An error fails the whole transaction.
    async fn write(&self, msg: &Message) -> Result<()>;

    /// Releases the connection once every in-flight write has finished.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Serde default for `max_in_flight` fields of output configs.
pub fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

/// An [`Output`] that delivers transactions through a [`Writer`].
pub struct WriterOutput<W> {
    label: String,
    writer: Arc<W>,
    limiter: InFlightLimiter,
    lifecycle: Arc<Lifecycle>,
}

impl<W> ErrorContext for WriterOutput<W> {
    fn wrap(kind: ErrorKind) -> Error {
        Error::OutputError(kind)
    }
}

impl<W: Writer> WriterOutput<W> {
    /// Creates an output admitting at most `max_in_flight` unacknowledged
    /// transactions. A limit outside `1..=MAX_IN_FLIGHT` is a configuration
    /// error.
    pub fn new(label: impl Into<String>, writer: W, max_in_flight: usize) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            writer: Arc::new(writer),
            limiter: InFlightLimiter::new(max_in_flight)?,
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Number of transactions written but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    pub fn max_in_flight(&self) -> usize {
        self.limiter.limit()
    }

    async fn run_consume(
        writer: Arc<W>,
        limiter: InFlightLimiter,
        lifecycle: Arc<Lifecycle>,
        mut transactions: TransactionReceiver,
    ) {
        let _closed = lifecycle.closed_guard();
        let shutdown = lifecycle.shutdown_token();

        if connect(writer.as_ref(), &shutdown).await {
            loop {
                // take a slot before reading so a saturated output leaves the
                // next transaction in the channel
                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    permit = limiter.acquire() => match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!(?e, "in-flight limiter closed");
                            break;
                        }
                    },
                };

                let transaction = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    transaction = transactions.recv() => match transaction {
                        Some(transaction) => transaction,
                        None => {
                            debug!("transaction channel closed");
                            break;
                        }
                    },
                };

                let writer = Arc::clone(&writer);
                tokio::spawn(
                    async move {
                        let (msg, responder) = transaction.into_parts();
                        let result = writer.write(&msg).await;
                        if let Err(e) = &result {
                            warn!(error = %e, "failed to write message batch");
                        }
                        responder.respond(result.into());
                        drop(permit);
                    }
                    .in_current_span(),
                );
            }
        }

        reject_pending(&mut transactions, || {
            Self::closed_error("output closed before the transaction was accepted")
        });

        if let Err(e) = limiter.wait_idle().await {
            error!(?e, "failed to wait for in-flight writes");
        }
        if let Err(e) = writer.close().await {
            warn!(error = %e, "failed to close writer");
        }
        info!("output closed");
    }
}

#[async_trait]
impl<W: Writer> Closable for WriterOutput<W> {
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

impl<W: Writer> Output for WriterOutput<W> {
    fn consume(&self, transactions: TransactionReceiver) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Self::internal_error(format!("no async runtime: {e}")))?;
        self.lifecycle.start().map_err(|state| {
            Self::closed_error(format!("{} cannot consume in state {state:?}", self.label))
        })?;

        let span = info_span!("output", label = %self.label);
        runtime.spawn(
            Self::run_consume(
                Arc::clone(&self.writer),
                self.limiter.clone(),
                Arc::clone(&self.lifecycle),
                transactions,
            )
            .instrument(span),
        );
        Ok(())
    }
}

/// Connects the writer, retrying until it succeeds. Returns false if the
/// output was closed first.
async fn connect<W: Writer>(writer: &W, shutdown: &CancellationToken) -> bool {
    loop {
        match writer.connect().await {
            Ok(()) => {
                info!("output connected");
                return true;
            }
            Err(e) => warn!(error = %e, "failed to connect output, retrying"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

/// Stops the channel from accepting more transactions and fails the ones
/// already buffered in it, so nothing is dropped unanswered.
pub(crate) fn reject_pending<F>(transactions: &mut TransactionReceiver, err: F)
where
    F: Fn() -> Error,
{
    transactions.close();
    while let Ok(transaction) = transactions.try_recv() {
        transaction.respond(Response::Failed(err()));
    }
}
