// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{JobId, JobState};

#[derive(Error, Debug)]
pub enum DutrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Unknown job descriptor format: {0} (expected \"json\" or \"yaml\")")]
    UnknownDescriptorFormat(String),

    #[error("Requestor is not set")]
    MissingRequestor,

    #[error("Unknown test step: {0}")]
    UnknownStep(String),

    #[error("Invalid parameters for step '{step}': {reason}")]
    InvalidStepParameters { step: String, reason: String },

    #[error("Unknown target manager: {0}")]
    UnknownTargetManager(String),

    #[error("Unknown reporter: {0}")]
    UnknownReporter(String),

    #[error("Target acquisition failed: {0}")]
    TargetAcquisition(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Requestor '{requestor}' does not own job {job}")]
    NotRequestor { job: JobId, requestor: String },

    #[error("Job {0} already reached a terminal state")]
    JobFinished(JobId),

    #[error("Job {0} is not paused")]
    JobNotPaused(JobId),

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Step '{step}' emitted undeclared event '{event}'")]
    UndeclaredEvent { step: String, event: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DutrunError {
    /// Whether this error rejects a submission before any job exists.
    pub fn is_submission_error(&self) -> bool {
        matches!(
            self,
            DutrunError::InvalidDescriptor(_)
                | DutrunError::UnknownDescriptorFormat(_)
                | DutrunError::MissingRequestor
                | DutrunError::UnknownStep(_)
                | DutrunError::InvalidStepParameters { .. }
                | DutrunError::UnknownTargetManager(_)
                | DutrunError::UnknownReporter(_)
                | DutrunError::JsonError(_)
                | DutrunError::YamlError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DutrunError>;
