//! Job envelopes and the per-job state machine.
//!
//! A job is submitted as a [`JobEnvelope`]: a type tag plus a payload map.
//! Job types known at compile time are also available as the [`KnownJob`]
//! tagged union so handlers can match on them instead of poking at JSON.

use crate::config::RetryPolicy;
use crate::error::{HiveError, HiveResult, SerializedError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Broker-assigned job identifier.
pub type JobId = String;

/// Queue used for operational smoke tests.
pub const TEST_JOB_QUEUE: &str = "test-job-queue";

/// Type tag of the smoke-test job.
pub const TEST_JOB_TYPE: &str = "test-job";

/// The unit of work submitted to a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Identifies the handler semantics
    #[serde(rename = "type")]
    pub job_type: String,

    /// Arbitrary payload, empty but never absent
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl JobEnvelope {
    /// Create an envelope, rejecting an empty type.
    pub fn new(job_type: impl Into<String>, data: Map<String, Value>) -> HiveResult<Self> {
        let envelope = Self {
            job_type: job_type.into(),
            data,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Build from a JSON value that must be an object (or null).
    pub fn from_value(job_type: impl Into<String>, data: Value) -> HiveResult<Self> {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(HiveError::config(format!(
                    "Job data must be an object, got {other}"
                )));
            }
        };
        Self::new(job_type, data)
    }

    /// Check the envelope invariants.
    pub fn validate(&self) -> HiveResult<()> {
        if self.job_type.trim().is_empty() {
            return Err(HiveError::EmptyJobType);
        }
        Ok(())
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Payload of the smoke-test job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestJobData {
    /// When the job was requested
    pub timestamp: DateTime<Utc>,
    /// Free-form message
    pub message: String,
}

/// Job types this crate knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum KnownJob {
    /// Smoke-test job
    #[serde(rename = "test-job")]
    Test(TestJobData),
}

impl KnownJob {
    /// Decode an envelope into a known job type.
    pub fn from_envelope(envelope: &JobEnvelope) -> HiveResult<Self> {
        Ok(serde_json::from_value(serde_json::to_value(envelope)?)?)
    }

    /// Encode into the generic envelope form.
    pub fn into_envelope(self) -> HiveResult<JobEnvelope> {
        let envelope: JobEnvelope = serde_json::from_value(serde_json::to_value(self)?)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// The type tag.
    pub fn job_type(&self) -> &'static str {
        match self {
            KnownJob::Test(_) => TEST_JOB_TYPE,
        }
    }
}

/// Per-job submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Retry policy
    pub retry: RetryPolicy,
    /// Do not activate before submission time plus this delay
    pub delay_ms: Option<u64>,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Stored, waiting to be claimed
    Created,
    /// Claimed by a worker, handler running
    Active,
    /// Handler finished normally
    Succeeded,
    /// Handler failed, waiting for the next attempt
    Retrying,
    /// Attempts exhausted
    Failed,
}

/// Event applied to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker claimed the job
    Claimed,
    /// The handler returned normally
    Completed,
    /// The handler failed; `retry` tells whether attempts remain
    Errored {
        /// Whether another attempt will be made
        retry: bool,
    },
    /// The claim expired before the handler reported back
    Stalled,
}

impl JobStatus {
    /// Next state for `event`, or an error if the event is not allowed here.
    pub fn transition(self, event: JobEvent) -> HiveResult<JobStatus> {
        use JobEvent::*;
        use JobStatus::*;

        match (self, event) {
            (Created | Retrying, Claimed) => Ok(Active),
            (Active, Completed) => Ok(Succeeded),
            (Active, Errored { retry: true }) => Ok(Retrying),
            (Active, Errored { retry: false }) => Ok(Failed),
            (Active, Stalled) => Ok(Created),
            (from, event) => Err(HiveError::InvalidTransition {
                from: format!("{from:?}"),
                event: format!("{event:?}"),
            }),
        }
    }

    /// Whether no further events are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// What the broker does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another attempt after `delay`
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// No attempts left, job kept as failed
    Exhausted,
}

/// A job as stored by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Broker-assigned id, empty until saved
    pub id: JobId,
    /// Envelope submitted by the producer
    pub data: JobEnvelope,
    /// Submission options
    pub options: JobOptions,
    /// Current state
    pub status: JobStatus,
    /// Attempts started so far
    pub attempts_made: u32,
    /// Submission time (ms since epoch)
    pub timestamp_ms: u64,
    /// Earliest activation time (ms since epoch)
    pub activate_at_ms: Option<u64>,
    /// Error from the latest failed attempt
    pub last_error: Option<SerializedError>,
}

impl Job {
    /// A fresh job ready to be saved.
    pub fn new(data: JobEnvelope, options: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            data,
            options,
            status: JobStatus::Created,
            attempts_made: 0,
            timestamp_ms: 0,
            activate_at_ms: None,
            last_error: None,
        }
    }

    /// Type tag of the envelope.
    pub fn job_type(&self) -> &str {
        &self.data.job_type
    }

    /// Stamp the submission time and compute the activation time.
    pub fn stamp(&mut self, now_ms: u64) {
        self.timestamp_ms = now_ms;
        self.activate_at_ms = self.options.delay_ms.map(|d| now_ms.saturating_add(d));
    }

    /// Whether the job may be claimed at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.activate_at_ms.is_none_or(|at| at <= now_ms)
    }

    /// Mark as claimed and count the attempt.
    pub fn claim(&mut self) -> HiveResult<()> {
        self.status = self.status.transition(JobEvent::Claimed)?;
        self.attempts_made += 1;
        Ok(())
    }

    /// Hand an expired claim back to the queue without spending an attempt.
    pub fn release_stalled(&mut self) -> HiveResult<()> {
        self.status = self.status.transition(JobEvent::Stalled)?;
        self.attempts_made = self.attempts_made.saturating_sub(1);
        Ok(())
    }

    /// Mark as succeeded.
    pub fn complete(&mut self) -> HiveResult<()> {
        self.status = self.status.transition(JobEvent::Completed)?;
        Ok(())
    }

    /// Record a failed attempt and apply the retry policy.
    ///
    /// Retry eligibility depends only on the attempts left.
    pub fn record_failure(
        &mut self,
        error: SerializedError,
        now_ms: u64,
    ) -> HiveResult<FailureOutcome> {
        let retry = self.attempts_made < self.options.retry.max_attempts;
        self.status = self.status.transition(JobEvent::Errored { retry })?;
        self.last_error = Some(error);

        if retry {
            let delay = self.options.retry.delay_for(self.attempts_made);
            self.activate_at_ms = Some(now_ms.saturating_add(delay.as_millis() as u64));
            Ok(FailureOutcome::Retry { delay })
        } else {
            self.activate_at_ms = None;
            Ok(FailureOutcome::Exhausted)
        }
    }
}
