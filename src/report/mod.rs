// src/report/mod.rs

//! Verdicts computed once a job is terminal.
//!
//! A reporter reads the [`FinalStatus`] and returns a [`ReportOutcome`]. The
//! engine calls every reporter of a job exactly once, stores what they
//! return, and never lets a reporter change the job's state.

pub mod noop;
pub mod target_success;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::engine::FinalStatus;
use crate::errors::Result;

pub use noop::NoopReporter;
pub use target_success::TargetSuccessReporter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ReportOutcome {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            data: Value::Null,
        }
    }
}

/// What one reporter produced for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub reporter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReportOutcome>,
    /// Set when the reporter itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called at submission.
    fn validate_parameters(&self, parameters: &Value) -> Result<()>;

    async fn report(&self, status: &FinalStatus, parameters: &Value) -> Result<ReportOutcome>;
}
