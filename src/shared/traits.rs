//! Shared error construction for the engine's components.

use crate::error::{Error, ErrorKind};

/// Trait for consistent error construction across the engine.
///
/// Implementors only state which [`Error`] area they report under; the
/// constructors for every [`ErrorKind`] come for free.
pub(crate) trait ErrorContext {
    /// Wrap a kind into the implementor's error area.
    fn wrap(kind: ErrorKind) -> Error;

    fn definition_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::DefinitionError(message.into()))
    }

    fn construction_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::ConstructionError(message.into()))
    }

    fn config_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::ConfigError(message.into()))
    }

    fn timeout_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::TimeoutError(message.into()))
    }

    fn closed_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::ClosedError(message.into()))
    }

    fn internal_error(message: impl Into<String>) -> Error {
        Self::wrap(ErrorKind::InternalError(message.into()))
    }
}
