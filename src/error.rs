//! Error types and handling for pipekit
//!
//! Errors are grouped by the area of the engine that raised them, and each
//! carries an [`ErrorKind`] describing what went wrong. Every payload is a
//! `String` so an [`Error`] can be cloned into a failed
//! [`Response`](crate::transaction::Response) and sent between tasks.

use thiserror::Error;

/// The main Result type used throughout pipekit
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A template or component definition is malformed, duplicated or unsupported.
    #[error("Definition error: {0}")]
    DefinitionError(String),

    /// Building a component from its configuration failed.
    #[error("Construction error: {0}")]
    ConstructionError(String),

    /// A configuration document does not match the expected schema.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A message batch could not be delivered downstream.
    #[error("Delivery error: {0}")]
    DeliveryError(String),

    /// A bounded wait ran out of time.
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// The component is closing or closed.
    #[error("Closed error: {0}")]
    ClosedError(String),

    /// Internal engine errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ErrorKind {
    /// The message without the kind's prefix.
    pub fn message(&self) -> &str {
        match self {
            ErrorKind::DefinitionError(msg)
            | ErrorKind::ConstructionError(msg)
            | ErrorKind::ConfigError(msg)
            | ErrorKind::DeliveryError(msg)
            | ErrorKind::TimeoutError(msg)
            | ErrorKind::ClosedError(msg)
            | ErrorKind::InternalError(msg) => msg,
        }
    }

    fn message_mut(&mut self) -> &mut String {
        match self {
            ErrorKind::DefinitionError(msg)
            | ErrorKind::ConstructionError(msg)
            | ErrorKind::ConfigError(msg)
            | ErrorKind::DeliveryError(msg)
            | ErrorKind::TimeoutError(msg)
            | ErrorKind::ClosedError(msg)
            | ErrorKind::InternalError(msg) => msg,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Input - {0}")]
    InputError(ErrorKind),

    #[error("Output - {0}")]
    OutputError(ErrorKind),

    #[error("Processor - {0}")]
    ProcessorError(ErrorKind),

    #[error("Pipeline - {0}")]
    PipelineError(ErrorKind),

    #[error("Cache - {0}")]
    CacheError(ErrorKind),

    #[error("RateLimit - {0}")]
    RateLimitError(ErrorKind),

    #[error("Registry - {0}")]
    RegistryError(ErrorKind),

    #[error("Template - {0}")]
    TemplateError(ErrorKind),

    #[error("Mapping - {0}")]
    MappingError(ErrorKind),

    #[error("Stream - {0}")]
    StreamError(ErrorKind),
}

impl Error {
    /// The kind of failure regardless of which area raised it.
    pub fn kind(&self) -> &ErrorKind {
        match self {
            Error::InputError(kind)
            | Error::OutputError(kind)
            | Error::ProcessorError(kind)
            | Error::PipelineError(kind)
            | Error::CacheError(kind)
            | Error::RateLimitError(kind)
            | Error::RegistryError(kind)
            | Error::TemplateError(kind)
            | Error::MappingError(kind)
            | Error::StreamError(kind) => kind,
        }
    }

    fn kind_mut(&mut self) -> &mut ErrorKind {
        match self {
            Error::InputError(kind)
            | Error::OutputError(kind)
            | Error::ProcessorError(kind)
            | Error::PipelineError(kind)
            | Error::CacheError(kind)
            | Error::RateLimitError(kind)
            | Error::RegistryError(kind)
            | Error::TemplateError(kind)
            | Error::MappingError(kind)
            | Error::StreamError(kind) => kind,
        }
    }

    /// Prefixes the message with `context`, keeping the area and kind.
    pub fn context(mut self, context: impl std::fmt::Display) -> Self {
        let message = self.kind_mut().message_mut();
        *message = format!("{context}: {message}");
        self
    }

    /// Returns true when a bounded wait expired. The component may still be
    /// cleaning up and must not be assumed stopped.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::TimeoutError(_))
    }

    /// Returns true when the error was raised because a component is closing.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind(), ErrorKind::ClosedError(_))
    }
}
