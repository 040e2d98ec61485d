//! The processor stage.
//!
//! A [`Pipeline`] sits between an input and an output. It consumes
//! transactions, runs each batch through its processors inline and forwards
//! the results downstream as new transactions. The upstream transaction is
//! answered once every forwarded transaction has been answered.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::component::{Closable, Input, Output, Processor, State};
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::output::reject_pending;
use crate::shared::{ErrorContext, Lifecycle};
use crate::transaction::{
    transaction_channel, PendingResponse, Response, Transaction, TransactionReceiver,
    TransactionSender, DEFAULT_CHANNEL_SIZE,
};

/// How long a closing pipeline waits for each of its processors.
const PROCESSOR_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Processors = Arc<Vec<Box<dyn Processor>>>;

/// Runs processors over the transactions passing through it.
///
/// Transactions are handled one at a time, so the order in which batches
/// arrive is the order in which their results are forwarded.
pub struct Pipeline {
    label: String,
    processors: Processors,
    lifecycle: Arc<Lifecycle>,
    downstream_tx: Mutex<Option<TransactionSender>>,
    downstream_rx: Mutex<Option<TransactionReceiver>>,
}

impl ErrorContext for Pipeline {
    fn wrap(kind: ErrorKind) -> Error {
        Error::PipelineError(kind)
    }
}

impl Pipeline {
    pub fn new(label: impl Into<String>, processors: Vec<Box<dyn Processor>>) -> Self {
        let (tx, rx) = transaction_channel(DEFAULT_CHANNEL_SIZE);
        Self {
            label: label.into(),
            processors: Arc::new(processors),
            lifecycle: Arc::new(Lifecycle::new()),
            downstream_tx: Mutex::new(Some(tx)),
            downstream_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    async fn run(
        processors: Processors,
        lifecycle: Arc<Lifecycle>,
        mut upstream: TransactionReceiver,
        downstream: TransactionSender,
    ) {
        let _closed = lifecycle.closed_guard();
        let shutdown = lifecycle.shutdown_token();

        loop {
            let transaction = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                transaction = upstream.recv() => match transaction {
                    Some(transaction) => transaction,
                    None => {
                        debug!("upstream channel closed");
                        break;
                    }
                },
            };

            let (msg, responder) = transaction.into_parts();
            let batches = process_batch(&processors, msg).await;
            if batches.is_empty() {
                // filtered out entirely, which still counts as delivered
                responder.ack();
                continue;
            }

            let mut pending = Vec::with_capacity(batches.len());
            for batch in batches {
                let (forwarded, response) = Transaction::new(batch);
                // a failed send drops the transaction, answering it as failed
                if downstream.send(forwarded).await.is_err() {
                    debug!("downstream channel closed");
                }
                pending.push(response);
            }
            responder.respond(collect_responses(pending).await);
        }

        reject_pending(&mut upstream, || {
            Self::closed_error("pipeline closed before the transaction was accepted")
        });
        drop(downstream);
        close_processors(&processors).await;
        info!("pipeline closed");
    }
}

/// Runs every processor in order over the batch. A processor failure flags
/// the batch and lets it carry on to the next processor.
async fn process_batch(processors: &[Box<dyn Processor>], msg: Message) -> Vec<Message> {
    let mut batches = vec![msg];
    for processor in processors {
        let mut next = Vec::with_capacity(batches.len());
        for mut batch in batches {
            match processor.process(&batch).await {
                Ok(results) => next.extend(results.into_iter().filter(|m| !m.is_empty())),
                Err(e) => {
                    warn!(error = %e, "processor failed, flagging batch");
                    batch.set_error(&e.to_string());
                    next.push(batch);
                }
            }
        }
        batches = next;
        if batches.is_empty() {
            break;
        }
    }
    batches
}

/// Resolves to `Ack` if every forwarded transaction was acknowledged,
/// otherwise to the first failure.
async fn collect_responses(pending: Vec<PendingResponse>) -> Response {
    let mut outcome = Response::Ack;
    for response in pending {
        let response = response.response().await;
        if outcome.is_ack() && !response.is_ack() {
            outcome = response;
        }
    }
    outcome
}

async fn close_processors(processors: &[Box<dyn Processor>]) {
    for processor in processors {
        processor.close_async();
    }
    for processor in processors {
        if let Err(e) = processor.wait_for_close(PROCESSOR_CLOSE_TIMEOUT).await {
            warn!(error = %e, "processor did not close cleanly");
        }
    }
}

#[async_trait]
impl Closable for Pipeline {
    fn close_async(&self) {
        self.lifecycle.close_async();
        if self.lifecycle.state() == State::Closed {
            // never started, so nothing else will release the downstream side
            self.downstream_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            for processor in self.processors.iter() {
                processor.close_async();
            }
        }
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

impl Output for Pipeline {
    fn consume(&self, transactions: TransactionReceiver) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Self::internal_error(format!("no async runtime: {e}")))?;
        self.lifecycle.start().map_err(|state| {
            Self::closed_error(format!("{} cannot consume in state {state:?}", self.label))
        })?;
        let downstream = self
            .downstream_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Self::internal_error("downstream channel already released"))?;

        let span = info_span!("pipeline", label = %self.label, processors = self.processors.len());
        runtime.spawn(
            Self::run(
                Arc::clone(&self.processors),
                Arc::clone(&self.lifecycle),
                transactions,
                downstream,
            )
            .instrument(span),
        );
        Ok(())
    }
}

impl Input for Pipeline {
    fn transaction_chan(&self) -> Result<TransactionReceiver> {
        self.downstream_rx
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::{DropAll, FailAll, SetMeta, SplitParts};

    async fn send(tx: &TransactionSender, payloads: &[&str]) -> PendingResponse {
        let msg = Message::from_payloads(payloads.iter().copied());
        let (transaction, pending) = Transaction::new(msg);
        tx.send(transaction).await.unwrap();
        pending
    }

    #[tokio::test]
    async fn test_forwards_processed_batches() {
        let pipeline = Pipeline::new(
            "pipeline",
            vec![Box::new(SetMeta::new("stage", "one")), Box::new(SetMeta::new("stage", "two"))],
        );
        let (tx, rx) = transaction_channel(1);
        pipeline.consume(rx).unwrap();
        let mut downstream = pipeline.transaction_chan().unwrap();

        let pending = send(&tx, &["a", "b"]).await;
        let forwarded = downstream.recv().await.unwrap();
        assert_eq!(forwarded.payload().len(), 2);
        assert!(forwarded
            .payload()
            .iter()
            .all(|p| p.meta_get("stage") == Some("two")));
        forwarded.respond(Response::Ack);

        assert!(pending.response().await.is_ack());

        drop(tx);
        pipeline.wait_for_close(Duration::from_secs(1)).await.unwrap();
        assert!(downstream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_filtered_batch_is_acknowledged() {
        let pipeline = Pipeline::new("pipeline", vec![Box::new(DropAll)]);
        let (tx, rx) = transaction_channel(1);
        pipeline.consume(rx).unwrap();
        let mut downstream = pipeline.transaction_chan().unwrap();

        let pending = send(&tx, &["a", "b", "c"]).await;
        assert!(pending.response().await.is_ack());

        drop(tx);
        pipeline.wait_for_close(Duration::from_secs(1)).await.unwrap();
        assert!(downstream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_processor_error_flags_parts() {
        let pipeline = Pipeline::new(
            "pipeline",
            vec![Box::new(FailAll), Box::new(SetMeta::new("after", "yes"))],
        );
        let (tx, rx) = transaction_channel(1);
        pipeline.consume(rx).unwrap();
        let mut downstream = pipeline.transaction_chan().unwrap();

        let pending = send(&tx, &["a"]).await;
        let forwarded = downstream.recv().await.unwrap();
        let part = forwarded.payload().get(0).unwrap();
        assert!(part.error().is_some_and(|e| e.contains("always fails")));
        assert_eq!(part.meta_get("after"), Some("yes"));
        forwarded.respond(Response::Ack);

        assert!(pending.response().await.is_ack());
    }

    #[tokio::test]
    async fn test_first_downstream_failure_is_reported() {
        let pipeline = Pipeline::new("pipeline", vec![Box::new(SplitParts)]);
        let (tx, rx) = transaction_channel(1);
        pipeline.consume(rx).unwrap();
        let mut downstream = pipeline.transaction_chan().unwrap();

        let pending = send(&tx, &["a", "b", "c"]).await;
        let err = Error::OutputError(ErrorKind::DeliveryError("b rejected".to_string()));
        for expected in ["a", "b", "c"] {
            let forwarded = downstream.recv().await.unwrap();
            assert_eq!(forwarded.payload().len(), 1);
            assert_eq!(forwarded.payload().get(0).unwrap().payload(), expected.as_bytes());
            if expected == "b" {
                forwarded.respond(Response::Failed(err.clone()));
            } else {
                forwarded.respond(Response::Ack);
            }
        }

        assert_eq!(pending.response().await, Response::Failed(err));
    }

    #[tokio::test]
    async fn test_close_fails_buffered_transactions() {
        let pipeline = Pipeline::new("pipeline", vec![]);
        let (tx, rx) = transaction_channel(1);
        pipeline.consume(rx).unwrap();
        let mut downstream = pipeline.transaction_chan().unwrap();

        let first = send(&tx, &["first"]).await;
        let forwarded = downstream.recv().await.unwrap();
        let second = send(&tx, &["second"]).await;

        pipeline.close_async();
        // the pipeline is waiting on `first`, so it cannot have closed yet
        assert!(pipeline
            .wait_for_close(Duration::from_millis(20))
            .await
            .unwrap_err()
            .is_timeout());

        forwarded.respond(Response::Ack);
        assert!(first.response().await.is_ack());
        assert!(second
            .response()
            .await
            .error()
            .is_some_and(Error::is_closed));
        pipeline.wait_for_close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pipeline.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_close_before_consume() {
        let pipeline = Pipeline::new("pipeline", vec![]);
        let mut downstream = pipeline.transaction_chan().unwrap();

        pipeline.close_async();
        pipeline.wait_for_close(Duration::from_millis(10)).await.unwrap();
        assert!(downstream.recv().await.is_none());

        let (_tx, rx) = transaction_channel(1);
        assert!(pipeline.consume(rx).unwrap_err().is_closed());
    }
}
