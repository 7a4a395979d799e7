//! Error taxonomy for rendering and convergence.

use std::time::Duration;

use thiserror::Error;

use crate::models::ObjectKey;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the resource store collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflict updating {0}: resource version is stale")]
    Conflict(ObjectKey),

    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("forbidden on {key}: {message}")]
    Forbidden { key: ObjectKey, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid object {key}: {message}")]
    Invalid { key: ObjectKey, message: String },
}

impl StoreError {
    /// Conflicts and temporary unavailability are worth another try.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("could not find a container {container} in {object}")]
    ContainerNotFound { object: ObjectKey, container: String },

    #[error("could not find an argument with prefix {prefix} in container {container}")]
    ArgumentNotFound { container: String, prefix: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("object not found in manifest: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("failed to convert {kind} {name}: {message}")]
    Conversion {
        kind: String,
        name: String,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("invalid attempt transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

impl Error {
    pub(crate) fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    /// Whether a later attempt may succeed without any change to the inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
