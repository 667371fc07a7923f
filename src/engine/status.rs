// src/engine/status.rs

//! Status views derived from a job's record and event log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{Cursor, Event};
use crate::exec::TargetError;
use crate::report::ReportRecord;
use crate::target::TargetId;
use crate::types::{JobId, JobState, Requestor};

/// Where a target stands within its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// Acquired, no step has run on it yet.
    Pending,
    /// Still in the pipeline.
    Running,
    /// Went through every step.
    Completed,
    /// Excluded after a step error.
    Failed,
    /// Its invocation was stopped by a job cancellation.
    Cancelled,
    /// The job ended before this target finished the pipeline.
    Incomplete,
}

/// A step error recorded against a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: TargetError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub target: TargetId,
    pub state: TargetState,
    /// Label of the last step this target finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_step: Option<String>,
    /// The error that removed this target from the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Errors from report-only steps; they did not stop the target.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reported: Vec<StepFailure>,
}

impl TargetStatus {
    pub fn new(target: TargetId) -> Self {
        Self {
            target,
            state: TargetState::Pending,
            last_step: None,
            failure: None,
            reported: Vec::new(),
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub job_name: String,
    pub requestor: Requestor,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub targets: Vec<TargetStatus>,
    /// Pipeline position a paused job will resume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at_step: Option<usize>,
    /// Events with `seq >= ` the queried cursor.
    pub events: Vec<Event>,
    pub next_cursor: Cursor,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Reporter results, filled once the job is terminal.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<ReportRecord>,
}

impl JobStatus {
    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetStatus> {
        self.targets.iter().filter(|t| t.state == TargetState::Failed)
    }

    pub fn completed_targets(&self) -> impl Iterator<Item = &TargetStatus> {
        self.targets
            .iter()
            .filter(|t| t.state == TargetState::Completed)
    }
}

/// Terminal snapshot handed to reporters.
#[derive(Debug, Clone, Serialize)]
pub struct FinalStatus {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub targets: Vec<TargetStatus>,
    pub created_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl FinalStatus {
    pub fn count(&self, state: TargetState) -> usize {
        self.targets.iter().filter(|t| t.state == state).count()
    }
}
