// src/engine/handle.rs

//! Shared, thread-safe handle around one job.
//!
//! Owns the job's signals (cancel, pause), its [`JobRecord`] behind a mutex,
//! its event sink and two watch channels: the current [`JobState`] and a
//! "finished" flag raised once reporters ran and the output buffer closed.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::buffer::OutputBuffer;
use crate::config::EngineOptions;
use crate::engine::job::{JobRecord, PipelineStep};
use crate::engine::status::JobStatus;
use crate::event::{Cursor, EventSink, EventStore, MemoryEventStore, StoreBackfill};
use crate::report::Reporter;
use crate::target::TargetManager;
use crate::types::{JobId, JobState, Requestor};
use crate::util::lock;

/// A reporter bound to its descriptor parameters.
pub(crate) struct BoundReporter {
    pub name: String,
    pub reporter: Arc<dyn Reporter>,
    pub parameters: Value,
}

/// Everything the engine resolved from a descriptor before accepting it.
pub(crate) struct JobPlan {
    pub name: String,
    pub pipeline: Vec<PipelineStep>,
    pub target_manager: Arc<dyn TargetManager>,
    pub target_parameters: Value,
    pub reporters: Vec<BoundReporter>,
}

pub(crate) struct JobHandle {
    pub id: JobId,
    pub requestor: Requestor,
    pub plan: JobPlan,
    pub options: EngineOptions,
    pub cancel: CancellationToken,
    pub sink: EventSink,
    pause: Mutex<CancellationToken>,
    record: Mutex<JobRecord>,
    state_tx: watch::Sender<JobState>,
    finished_tx: watch::Sender<bool>,
}

impl JobHandle {
    pub fn new(id: JobId, requestor: Requestor, plan: JobPlan, options: EngineOptions) -> Self {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new(id));
        let backfill = Arc::new(StoreBackfill(Arc::clone(&store)));
        let buffer = Arc::new(OutputBuffer::with_backfill(options.buffer_capacity, backfill));

        Self {
            id,
            requestor,
            plan,
            options,
            cancel: CancellationToken::new(),
            sink: EventSink::new(store, buffer),
            pause: Mutex::new(CancellationToken::new()),
            record: Mutex::new(JobRecord::new(id)),
            state_tx: watch::Sender::new(JobState::Started),
            finished_tx: watch::Sender::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn record(&self) -> MutexGuard<'_, JobRecord> {
        lock(&self.record)
    }

    /// Publish the record's current state to watchers.
    pub fn publish_state(&self, state: JobState) {
        self.state_tx.send_replace(state);
    }

    pub fn state(&self) -> JobState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_finished(&self) -> watch::Receiver<bool> {
        self.finished_tx.subscribe()
    }

    pub fn mark_finished(&self) {
        self.finished_tx.send_replace(true);
    }

    /// Pause signal for the segment currently running.
    pub fn pause_token(&self) -> CancellationToken {
        lock(&self.pause).clone()
    }

    pub fn request_pause(&self) {
        lock(&self.pause).cancel();
    }

    /// Replace a fired pause signal before resuming.
    pub fn fresh_pause_token(&self) -> CancellationToken {
        let mut pause = lock(&self.pause);
        *pause = CancellationToken::new();
        pause.clone()
    }

    /// Emit a framework event; failures are logged, never propagated.
    pub fn emit_job_event(&self, name: &str, payload: Value) {
        if let Err(e) = self.sink.job_event(name, payload) {
            warn!(job_id = %self.id, event = name, error = %e, "failed to record job event");
        }
    }

    pub fn status(&self, cursor: Cursor) -> JobStatus {
        let rec = self.record();
        let (events, next_cursor) = self.sink.store().since(cursor);
        JobStatus {
            job_id: self.id,
            job_name: self.plan.name.clone(),
            requestor: self.requestor.clone(),
            state: rec.state(),
            error: rec.error().map(str::to_string),
            targets: rec.target_statuses(),
            paused_at_step: rec.paused_at_step(),
            events,
            next_cursor,
            created_at: rec.created_at(),
            ended_at: rec.ended_at(),
            reports: rec.reports().to_vec(),
        }
    }
}
