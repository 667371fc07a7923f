// src/types.rs

//! Identifiers and small value types shared across the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DutrunError;

/// Identifier of an accepted job.
///
/// Issued once, in increasing order, by the orchestrator and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of whoever submitted (or is querying) a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Requestor(String);

impl Requestor {
    /// Build a requestor, rejecting blank names.
    pub fn new(name: impl Into<String>) -> Result<Self, DutrunError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DutrunError::MissingRequestor);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
///
/// `Started` -> `Running` -> (`Paused` <-> `Running`) -> terminal.
/// Terminal states are `Completed`, `Failed` and `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted, targets not yet acquired.
    Started,
    Running,
    /// Interrupted with resume state recorded; waiting for `resume`.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Started, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Started | Running | Paused, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Supported job descriptor encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorFormat {
    Json,
    Yaml,
}

impl DescriptorFormat {
    /// Guess the format from a file extension (`.json`, `.yaml`, `.yml`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }
}

impl FromStr for DescriptorFormat {
    type Err = DutrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(DescriptorFormat::Json),
            "yaml" | "yml" => Ok(DescriptorFormat::Yaml),
            other => Err(DutrunError::UnknownDescriptorFormat(other.to_string())),
        }
    }
}

impl fmt::Display for DescriptorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorFormat::Json => f.write_str("json"),
            DescriptorFormat::Yaml => f.write_str("yaml"),
        }
    }
}
