//! Error types for hiveq operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout hiveq.
pub type HiveResult<T> = Result<T, HiveError>;

/// Error returned by a job handler. Any error type can be boxed into it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for hiveq operations.
#[derive(Error, Debug)]
pub enum HiveError {
    /// Queue backend error
    #[error("Queue error: {message}")]
    Queue {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue names must be non-empty
    #[error("Queue name must not be empty")]
    InvalidQueueName,

    /// A job envelope without a type tag
    #[error("Job type must not be empty")]
    EmptyJobType,

    /// The job state machine rejected an event
    #[error("Invalid job transition from {from} on {event}")]
    InvalidTransition {
        /// State the job was in
        from: String,
        /// Event that was applied
        event: String,
    },

    /// Job missing from the broker store
    #[error("Job '{id}' not found")]
    JobNotFound {
        /// The job id that wasn't found
        id: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {timeout_secs} seconds")]
    Timeout {
        /// Timeout duration in seconds
        timeout_secs: u64,
    },

    /// Handle was already closed
    #[error("Queue '{queue}' is closed")]
    Closed {
        /// Name of the closed queue
        queue: String,
    },

    /// Redis connection error
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Metrics registry error
    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl HiveError {
    /// Create a new queue error
    pub fn queue<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Queue {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a queue error without an underlying cause
    pub fn queue_msg(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Short machine-friendly name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queue { .. } => "QueueError",
            Self::Config { .. } => "ConfigError",
            Self::Serialization(_) => "SerializationError",
            Self::InvalidQueueName => "InvalidQueueName",
            Self::EmptyJobType => "EmptyJobType",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::JobNotFound { .. } => "JobNotFound",
            Self::Timeout { .. } => "Timeout",
            Self::Closed { .. } => "Closed",
            #[cfg(feature = "redis-queue")]
            Self::Redis(_) => "RedisError",
            #[cfg(feature = "metrics")]
            Self::Metrics(_) => "MetricsError",
        }
    }
}

/// A failure flattened into plain data so it can be stored with a job,
/// logged, and handed to an error tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    /// Display text of the outermost error
    pub message: String,
    /// Kind of the error
    pub name: String,
    /// Rendered source chain, outermost first
    pub stack: Vec<String>,
}

impl SerializedError {
    /// Walk the `source()` chain of `err`.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = Vec::new();
        let mut current = err.source();
        while let Some(cause) = current {
            stack.push(cause.to_string());
            current = cause.source();
        }

        Self {
            message: err.to_string(),
            name: "Error".to_string(),
            stack,
        }
    }

    /// Build from a crate error, keeping its variant name.
    pub fn from_hive(err: &HiveError) -> Self {
        Self {
            name: err.kind().to_string(),
            ..Self::from_error(err)
        }
    }

    /// Build from a free-form message, e.g. a panic payload.
    pub fn message(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            stack: Vec::new(),
        }
    }

    /// Replace the kind.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Display for SerializedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        for cause in &self.stack {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

impl From<&HandlerError> for SerializedError {
    fn from(err: &HandlerError) -> Self {
        Self::from_error(err.as_ref())
    }
}
