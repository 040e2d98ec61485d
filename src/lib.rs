//! pipekit moves batches of messages from an [input](input) through a [pipeline](pipeline) of
//! processors to an [output](output) with at-least-once delivery.
//!
//! Every batch travels inside a [`Transaction`](transaction::Transaction) that must be answered
//! exactly once, and outputs bound the number of unanswered transactions with a max-in-flight
//! limit, so backpressure reaches the source without any extra signalling.
//!
//! Component types live in a [`Bundle`](bundle::Bundle). Besides native components, new
//! processor types can be defined at startup by [templates](template): a field schema plus a
//! [mapping](mapping) that expands instances into the config of an existing component.

/// start up code, lifecycle and shutdown helpers
mod shared;

pub mod error;

/// message batches and their parts.
pub mod message;

/// the transaction protocol between pipeline stages.
pub mod transaction;

/// the lifecycle contract every component implements.
pub mod component;

pub mod limiter;

/// outputs built from a writer.
pub mod output;

/// inputs built from a reader.
pub mod input;

pub mod pipeline;

/// component specs and configuration schemas.
pub mod docs;

/// the registry of component types.
pub mod bundle;

pub mod management;

/// compiled scripts mapping one value to another.
pub mod mapping;

/// component types defined by configuration.
pub mod template;

/// running input → pipeline → output streams.
pub mod stream;

// Delivery guarantees and error propagation.
//
// Every batch admitted by an input travels downstream inside a transaction, and the stage holding
// a transaction owns the obligation to answer it. A stage either answers directly or forwards new
// transactions and answers once they have been answered.
//
//      input                 pipeline                 output
//
//   (reader) --tx--> [recv] -> processors --tx'--> [limiter] -> (writer task)
//       ^                |                               |            |
//       |                |<-------- response(tx') -------+------------+
//       |                |
//       +-- response(tx) +
//
// A failed write answers tx' with Failed, the pipeline passes the first failure up as the answer to
// tx, and the reader receives it through `Reader::ack`. Retrying is the reader's decision; the
// engine only guarantees that every transaction gets exactly one answer.
//
// Shutdown is cooperative. `close_async` stops a stage from accepting new transactions; the ones it
// already holds are still answered before it reports closed. Transactions left in a closing
// stage's channel are answered Failed, and a responder dropped on any other path answers Failed
// from its Drop, so no transaction can disappear without an answer.
//
// Errors raised while building a stream (definition, construction and config errors) are returned
// to the caller and the stream never starts.
