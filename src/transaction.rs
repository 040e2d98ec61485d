//! Transactions: the unit of transit between pipeline stages.
//!
//! A [`Transaction`] pairs a [`Message`] with a one-shot response obligation.
//! Whichever stage holds the transaction must answer it exactly once, either
//! directly or by forwarding it downstream. The obligation lives in a
//! [`Responder`]; answering consumes it, and dropping it unanswered reports a
//! failure, so no code path can lose or duplicate a response.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;

/// Default capacity of the channels that link pipeline stages. Kept small so
/// a saturated stage blocks its upstream sender almost immediately.
pub const DEFAULT_CHANNEL_SIZE: usize = 1;

pub type TransactionSender = mpsc::Sender<Transaction>;
pub type TransactionReceiver = mpsc::Receiver<Transaction>;

/// Creates a channel for transactions between two stages.
pub fn transaction_channel(capacity: usize) -> (TransactionSender, TransactionReceiver) {
    mpsc::channel(capacity.max(1))
}

/// The outcome of delivering a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Delivery succeeded downstream.
    Ack,
    /// Delivery did not succeed. Retrying is up to whoever receives this.
    Failed(Error),
}

impl Response {
    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Response::Ack => None,
            Response::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Response::Ack => Ok(()),
            Response::Failed(err) => Err(err),
        }
    }
}

impl From<Result<()>> for Response {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Response::Ack,
            Err(err) => Response::Failed(err),
        }
    }
}

/// The single-use obligation to answer a transaction.
#[derive(Debug)]
pub struct Responder {
    tx: Option<oneshot::Sender<Response>>,
}

impl Responder {
    /// Delivers the response, consuming the obligation.
    pub fn respond(mut self, response: Response) {
        if let Some(tx) = self.tx.take() {
            if tx.send(response).is_err() {
                debug!("response receiver dropped before the response arrived");
            }
        }
    }

    pub fn ack(self) {
        self.respond(Response::Ack);
    }

    pub fn fail(self, err: Error) {
        self.respond(Response::Failed(err));
    }

    /// Returns true if nobody is waiting for the response anymore.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(oneshot::Sender::is_closed)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!("transaction dropped without a response, reporting it as failed");
            let _ = tx.send(Response::Failed(Error::PipelineError(
                ErrorKind::ClosedError("transaction dropped without a response".to_string()),
            )));
        }
    }
}

/// Awaits the response of a transaction that was handed downstream.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    /// Resolves with the transaction's single response.
    pub async fn response(self) -> Response {
        // the responder's drop guard always sends, so a receive error can only
        // mean the runtime tore the responder down without running Drop
        self.rx.await.unwrap_or_else(|_| {
            Response::Failed(Error::PipelineError(ErrorKind::ClosedError(
                "response channel closed".to_string(),
            )))
        })
    }
}

/// A message batch plus its acknowledgment obligation.
#[derive(Debug)]
pub struct Transaction {
    payload: Message,
    responder: Responder,
}

impl Transaction {
    /// Creates a transaction and the handle its sender uses to await the
    /// response.
    pub fn new(payload: Message) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                responder: Responder { tx: Some(tx) },
            },
            PendingResponse { rx },
        )
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Message {
        &mut self.payload
    }

    /// Answers the transaction directly.
    pub fn respond(self, response: Response) {
        self.responder.respond(response);
    }

    /// Splits the transaction so the payload can be consumed while the
    /// obligation is kept until the outcome is known.
    pub fn into_parts(self) -> (Message, Responder) {
        (self.payload, self.responder)
    }
}
