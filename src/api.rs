// src/api.rs

//! Caller boundary for the orchestrator.
//!
//! Takes raw strings and bytes as a listener would receive them, checks the
//! requestor, and turns the event stream of a job into a sequence of
//! [`StatusUpdate`] batches delivered over a channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{Orchestrator, TargetStatus};
use crate::errors::Result;
use crate::event::{Cursor, Event};
use crate::report::ReportRecord;
use crate::types::{DescriptorFormat, JobId, JobState, Requestor};

/// Updates queued per status stream before the producer waits on the caller.
const STATUS_CHANNEL_DEPTH: usize = 16;

/// One batch of a status stream.
///
/// Batches of one stream are contiguous: each batch's `from_cursor` equals
/// the previous batch's `next_cursor`, and event `seq` values inside a batch
/// run from `from_cursor` to `next_cursor - 1` without gaps.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub from_cursor: Cursor,
    pub next_cursor: Cursor,
    pub events: Vec<Event>,
    /// Set on the last batch of the stream.
    pub done: bool,
    /// Per-target state; only on the last batch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<ReportRecord>,
}

#[derive(Debug, Clone)]
pub struct Api {
    orchestrator: Arc<Orchestrator>,
}

impl Api {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Submit a descriptor. `format` is `"json"` or `"yaml"`.
    pub fn start_job(&self, requestor: &str, descriptor: &[u8], format: &str) -> Result<JobId> {
        let requestor = Requestor::new(requestor)?;
        let format: DescriptorFormat = format.parse()?;
        let id = self.orchestrator.submit(descriptor, format, &requestor)?;
        info!(job_id = %id, %requestor, %format, "job submitted through api");
        Ok(id)
    }

    /// Stream the job's status from the first event on.
    ///
    /// The stream ends after the batch carrying the job's terminal state and
    /// final events, or as soon as the receiver is dropped.
    pub fn status_job(
        &self,
        requestor: &str,
        job_id: JobId,
    ) -> Result<mpsc::Receiver<StatusUpdate>> {
        let requestor = Requestor::new(requestor)?;
        let mut reader = self.orchestrator.subscribe(job_id, &requestor, 0)?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_DEPTH);

        tokio::spawn(async move {
            while let Some(batch) = reader.next_batch().await {
                let done = !batch.more_available;
                let status = match orchestrator.status(job_id, &requestor, batch.next_offset) {
                    Ok(status) => status,
                    Err(e) => {
                        debug!(%job_id, error = %e, "status stream lost its job");
                        break;
                    }
                };

                let update = StatusUpdate {
                    job_id,
                    state: status.state,
                    error: status.error,
                    from_cursor: batch.from,
                    next_cursor: batch.next_offset,
                    events: batch.records,
                    done,
                    targets: if done { status.targets } else { Vec::new() },
                    reports: if done { status.reports } else { Vec::new() },
                };

                if tx.send(update).await.is_err() {
                    debug!(%job_id, %requestor, "status stream receiver dropped");
                    break;
                }
                if done {
                    break;
                }
            }
            debug!(%job_id, "status stream closed");
        });

        Ok(rx)
    }

    pub fn cancel_job(&self, requestor: &str, job_id: JobId) -> Result<()> {
        let requestor = Requestor::new(requestor)?;
        self.orchestrator.cancel(job_id, &requestor)
    }

    pub fn pause_job(&self, requestor: &str, job_id: JobId) -> Result<()> {
        let requestor = Requestor::new(requestor)?;
        self.orchestrator.pause(job_id, &requestor)
    }

    pub fn resume_job(&self, requestor: &str, job_id: JobId) -> Result<()> {
        let requestor = Requestor::new(requestor)?;
        self.orchestrator.resume(job_id, &requestor)
    }
}
