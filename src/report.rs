//! Error tracking hook.
//!
//! Queue errors, exhausted jobs and shutdown failures are handed to an
//! [`ErrorReporter`] along with contextual tags. The default reporter writes
//! them to the tracing subscriber; applications plug in their own tracker.

use crate::error::SerializedError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Tags attached to a captured error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    tags: BTreeMap<String, String>,
}

impl ErrorContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Look a tag up.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// All tags, sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

/// External error-tracking collaborator.
pub trait ErrorReporter: Send + Sync {
    /// Record an error with its context
    fn capture(&self, error: &SerializedError, context: &ErrorContext);
}

/// Reporter that logs captured errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, error: &SerializedError, context: &ErrorContext) {
        tracing::error!(
            target: "hiveq::report",
            error = %error,
            tags = ?context.tags(),
            "Captured exception"
        );
    }
}

/// Reporter that keeps everything in memory, handy in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    captured: Arc<Mutex<Vec<(SerializedError, ErrorContext)>>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far.
    pub fn captured(&self) -> Vec<(SerializedError, ErrorContext)> {
        self.captured
            .lock()
            .map(|captured| captured.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for RecordingReporter {
    fn capture(&self, error: &SerializedError, context: &ErrorContext) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.push((error.clone(), context.clone()));
        }
    }
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for Arc<R> {
    fn capture(&self, error: &SerializedError, context: &ErrorContext) {
        (**self).capture(error, context)
    }
}
