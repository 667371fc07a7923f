// src/event/mod.rs

//! Append-only event log for a job.
//!
//! - [`Event`] is one emitted record: who (target, step), what (name,
//!   payload) and a per-job sequence number that defines the total order.
//! - [`store`] holds the [`EventStore`] contract and the in-memory store.
//! - [`emitter`] is the write path shared by steps and the orchestrator;
//!   it keeps the store and the job's output buffer in lockstep.

pub mod emitter;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::target::TargetId;
use crate::types::JobId;

pub use emitter::{EventSink, StepEmitter};
pub use store::{Cursor, EventStore, MemoryEventStore, StoreBackfill};

/// Event names emitted by the orchestrator itself.
pub mod names {
    pub const JOB_STARTED: &str = "JobStarted";
    pub const JOB_PAUSED: &str = "JobPaused";
    pub const JOB_RESUMED: &str = "JobResumed";
    pub const JOB_COMPLETED: &str = "JobCompleted";
    pub const JOB_FAILED: &str = "JobFailed";
    pub const JOB_CANCELLED: &str = "JobCancelled";

    pub const TARGET_IN: &str = "TargetIn";
    pub const TARGET_OUT: &str = "TargetOut";
    pub const TARGET_ERR: &str = "TargetErr";
}

/// Which pipeline step an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    /// Position in the pipeline, starting at 0.
    pub index: usize,
    pub label: String,
    /// Registry name of the step implementation.
    pub name: String,
}

/// One record in a job's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the job's log, starting at 0. Doubles as the cursor.
    pub seq: u64,
    pub job_id: JobId,
    /// `None` for job-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepRef>,
    pub name: String,
    /// Wall-clock emission time. Advisory; `seq` is the ordering key.
    pub emitted_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

/// An event before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub target: Option<TargetId>,
    pub step: Option<StepRef>,
    pub name: String,
    pub payload: Value,
}

impl EventDraft {
    pub fn job(name: impl Into<String>, payload: Value) -> Self {
        Self {
            target: None,
            step: None,
            name: name.into(),
            payload,
        }
    }

    pub fn target(
        target: impl Into<TargetId>,
        step: StepRef,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            target: Some(target.into()),
            step: Some(step),
            name: name.into(),
            payload,
        }
    }
}
