//! Error types for the bbcodes crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can abort an engine call.
///
/// Unknown tags, invalid tag names and malformed attribute values never
/// produce an error; they degrade to passthrough or empty values instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A tag pattern could not be compiled, e.g. because the registered
    /// names exceed the regex size limit.
    #[error("invalid tag pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A handler failed and the failure policy is `propagate`.
    #[error("handler for [{tag}] failed: {source}")]
    Handler {
        tag: String,
        #[source]
        source: HandlerError,
    },

    /// A handler did not finish within the configured timeout.
    #[error("handler for [{tag}] timed out after {after:?}")]
    Timeout { tag: String, after: Duration },
}

/// Error returned by a fallible [`Handler`](crate::Handler).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur when loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML could not be parsed into a configuration.
    #[error("invalid config{}: {message}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
