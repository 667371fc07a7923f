// src/engine/orchestrator.rs

//! Job orchestrator: accepts jobs, runs each as an independent task, and
//! answers status, cancel, pause and resume requests while they run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::buffer::BufferReader;
use crate::config::EngineOptions;
use crate::descriptor::{self, JobDescriptor};
use crate::engine::handle::{BoundReporter, JobHandle, JobPlan};
use crate::engine::pipeline::{SegmentEnd, build_pipeline, run_segment};
use crate::engine::status::JobStatus;
use crate::errors::{DutrunError, Result};
use crate::event::{Cursor, Event, names};
use crate::registry::PluginRegistry;
use crate::report::ReportRecord;
use crate::target::ensure_unique_ids;
use crate::types::{DescriptorFormat, JobId, JobState, Requestor};

pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    options: EngineOptions,
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("jobs", &self.job_ids())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, options: EngineOptions) -> Self {
        Self {
            registry,
            options,
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Ids of every job accepted so far, ascending.
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.read_jobs().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Submission checks without creating a job: registry lookups and every
    /// step's, target manager's and reporter's parameter validation.
    pub fn validate(&self, descriptor: &JobDescriptor) -> Result<()> {
        self.plan(descriptor).map(|_| ())
    }

    fn plan(&self, descriptor: &JobDescriptor) -> Result<JobPlan> {
        descriptor.validate()?;
        let pipeline = build_pipeline(descriptor, &self.registry)?;

        let tm = &descriptor.target_manager;
        let target_manager = self.registry.target_manager(&tm.name)?;
        target_manager.validate_parameters(&tm.parameters)?;

        let reporters = descriptor
            .reporters
            .iter()
            .map(|spec| {
                let reporter = self.registry.reporter(&spec.name)?;
                reporter.validate_parameters(&spec.parameters)?;
                Ok(BoundReporter {
                    name: spec.name.clone(),
                    reporter,
                    parameters: spec.parameters.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(JobPlan {
            name: descriptor.job_name.clone(),
            pipeline,
            target_manager,
            target_parameters: tm.parameters.clone(),
            reporters,
        })
    }

    /// Accept a job and start running it in the background.
    ///
    /// Returns as soon as the job is registered. Submission errors are
    /// returned here and no job id is consumed for them. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, descriptor: &JobDescriptor, requestor: &Requestor) -> Result<JobId> {
        let plan = self.plan(descriptor)?;
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let job = Arc::new(JobHandle::new(id, requestor.clone(), plan, self.options));

        self.write_jobs().insert(id, Arc::clone(&job));
        job.emit_job_event(
            names::JOB_STARTED,
            json!({ "job_name": job.name(), "requestor": requestor.as_str() }),
        );
        info!(
            job_id = %id,
            job_name = job.name(),
            requestor = %requestor,
            steps = job.plan.pipeline.len(),
            "job accepted"
        );

        tokio::spawn(drive(job));
        Ok(id)
    }

    /// Parse raw descriptor bytes and [`start`](Self::start) the job.
    pub fn submit(
        &self,
        bytes: &[u8],
        format: DescriptorFormat,
        requestor: &Requestor,
    ) -> Result<JobId> {
        let descriptor = descriptor::parse(bytes, format)?;
        self.start(&descriptor, requestor)
    }

    /// Current state plus every event with `seq >= cursor`.
    ///
    /// Never waits for the job; any requestor may ask.
    pub fn status(&self, job_id: JobId, requestor: &Requestor, cursor: Cursor) -> Result<JobStatus> {
        let job = self.job(job_id)?;
        debug!(%job_id, %requestor, cursor, "status query");
        Ok(job.status(cursor))
    }

    /// Live reader over the job's event stream, starting at `from`.
    pub fn subscribe(
        &self,
        job_id: JobId,
        requestor: &Requestor,
        from: Cursor,
    ) -> Result<BufferReader<Event>> {
        let job = self.job(job_id)?;
        debug!(%job_id, %requestor, from, "status stream opened");
        Ok(job
            .sink
            .buffer()
            .subscribe(from, self.options.status_poll_interval))
    }

    pub fn cancel(&self, job_id: JobId, requestor: &Requestor) -> Result<()> {
        let job = self.owned_job(job_id, requestor)?;
        let parked = {
            let rec = job.record();
            if rec.state().is_terminal() {
                return Err(DutrunError::JobFinished(job_id));
            }
            job.cancel.cancel();
            rec.state() == JobState::Paused
        };
        info!(%job_id, %requestor, "job cancellation requested");

        // A paused job has no task observing the token.
        if parked {
            tokio::spawn(async move { conclude(&job, JobState::Cancelled, None).await });
        }
        Ok(())
    }

    /// Ask the job to pause. Resumable steps stop at once; everything else
    /// pauses at the next step boundary.
    pub fn pause(&self, job_id: JobId, requestor: &Requestor) -> Result<()> {
        let job = self.owned_job(job_id, requestor)?;
        let state = job.record().state();
        match state {
            s if s.is_terminal() => Err(DutrunError::JobFinished(job_id)),
            JobState::Paused => Ok(()),
            _ => {
                job.request_pause();
                info!(%job_id, %requestor, "job pause requested");
                Ok(())
            }
        }
    }

    pub fn resume(&self, job_id: JobId, requestor: &Requestor) -> Result<()> {
        let job = self.owned_job(job_id, requestor)?;
        let pause = {
            let mut rec = job.record();
            if rec.state().is_terminal() || job.cancel.is_cancelled() {
                return Err(DutrunError::JobFinished(job_id));
            }
            if rec.state() != JobState::Paused {
                return Err(DutrunError::JobNotPaused(job_id));
            }
            rec.transition(JobState::Running)?;
            job.publish_state(JobState::Running);
            let step_index = rec.cursor().step_index;
            job.emit_job_event(names::JOB_RESUMED, json!({ "step_index": step_index }));
            info!(%job_id, %requestor, step_index, "job resumed");
            job.fresh_pause_token()
        };

        tokio::spawn(run_from_cursor(job, pause));
        Ok(())
    }

    /// Resolve once the job is terminal and its reporters have run.
    pub async fn wait(&self, job_id: JobId) -> Result<JobStatus> {
        let job = self.job(job_id)?;
        let mut finished = job.subscribe_finished();
        finished
            .wait_for(|done| *done)
            .await
            .map_err(|_| DutrunError::JobNotFound(job_id))?;
        Ok(job.status(0))
    }

    /// Pause every job that is still running and wait until each one is
    /// paused or terminal.
    pub async fn shutdown(&self) {
        let jobs: Vec<Arc<JobHandle>> = self.read_jobs().values().cloned().collect();
        let live: Vec<_> = jobs
            .into_iter()
            .filter(|j| matches!(j.state(), JobState::Started | JobState::Running))
            .collect();

        info!(jobs = live.len(), "shutting down; pausing running jobs");
        for job in &live {
            job.request_pause();
        }
        for job in &live {
            let mut state = job.subscribe_state();
            let closed = state
                .wait_for(|s| *s == JobState::Paused || s.is_terminal())
                .await
                .is_err();
            if closed {
                warn!(job_id = %job.id, "job state channel closed during shutdown");
            }
        }
    }

    fn job(&self, job_id: JobId) -> Result<Arc<JobHandle>> {
        self.read_jobs()
            .get(&job_id)
            .cloned()
            .ok_or(DutrunError::JobNotFound(job_id))
    }

    fn owned_job(&self, job_id: JobId, requestor: &Requestor) -> Result<Arc<JobHandle>> {
        let job = self.job(job_id)?;
        if &job.requestor != requestor {
            return Err(DutrunError::NotRequestor {
                job: job_id,
                requestor: requestor.to_string(),
            });
        }
        Ok(job)
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, Arc<JobHandle>>> {
        self.jobs.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, Arc<JobHandle>>> {
        self.jobs.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Job task: acquire targets, then run the pipeline from the start.
async fn drive(job: Arc<JobHandle>) {
    let acquired = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => None,
        res = job.plan.target_manager.acquire(job.id, &job.plan.target_parameters) => Some(res),
    };

    let targets = match acquired {
        None => return conclude(&job, JobState::Cancelled, None).await,
        Some(Err(e)) => {
            warn!(job_id = %job.id, error = %e, "target acquisition failed");
            return conclude(&job, JobState::Failed, Some(e.to_string())).await;
        }
        Some(Ok(targets)) => targets,
    };

    let problem = if targets.is_empty() {
        Some("target manager returned no targets".to_string())
    } else {
        ensure_unique_ids(&targets).err().map(|e| e.to_string())
    };
    if let Some(msg) = problem {
        return conclude(&job, JobState::Failed, Some(msg)).await;
    }

    info!(job_id = %job.id, targets = targets.len(), "targets acquired");
    {
        let mut rec = job.record();
        rec.set_targets(targets);
        if let Err(e) = rec.transition(JobState::Running) {
            warn!(job_id = %job.id, error = %e, "job left Started before acquisition finished");
            return;
        }
        job.publish_state(JobState::Running);
    }

    let pause = job.pause_token();
    run_from_cursor(job, pause).await;
}

async fn run_from_cursor(job: Arc<JobHandle>, pause: tokio_util::sync::CancellationToken) {
    match run_segment(&job, pause).await {
        SegmentEnd::Paused => {
            // Publish under the record lock; cancel must see Running or Paused, never both.
            let parked = {
                let mut rec = job.record();
                let parked =
                    !job.cancel.is_cancelled() && rec.transition(JobState::Paused).is_ok();
                if parked {
                    job.publish_state(JobState::Paused);
                    let cursor = rec.cursor();
                    job.emit_job_event(
                        names::JOB_PAUSED,
                        json!({ "step_index": cursor.step_index, "pending": cursor.pending }),
                    );
                    info!(job_id = %job.id, step_index = cursor.step_index, "job paused");
                }
                parked
            };
            if !parked {
                conclude(&job, JobState::Cancelled, None).await;
            }
        }
        SegmentEnd::Finished(state, error) => conclude(&job, state, error).await,
    }
}

/// Move the job to a terminal state, then run reporters and close the
/// output stream. A job that is already terminal is left alone.
async fn conclude(job: &JobHandle, state: JobState, error: Option<String>) {
    {
        let mut rec = job.record();
        if rec.state().is_terminal() {
            return;
        }
        if let Err(e) = rec.conclude(state, error.clone()) {
            warn!(job_id = %job.id, error = %e, "could not conclude job");
            return;
        }
    }
    job.publish_state(state);

    let event = match state {
        JobState::Completed => names::JOB_COMPLETED,
        JobState::Cancelled => names::JOB_CANCELLED,
        _ => names::JOB_FAILED,
    };
    job.emit_job_event(event, json!({ "error": error }));
    match &error {
        Some(msg) => warn!(job_id = %job.id, %state, error = %msg, "job finished"),
        None => info!(job_id = %job.id, %state, "job finished"),
    }

    let final_status = job.record().final_status(job.name());
    for bound in &job.plan.reporters {
        let record = match bound.reporter.report(&final_status, &bound.parameters).await {
            Ok(outcome) => {
                info!(job_id = %job.id, reporter = %bound.name, success = outcome.success, "report ready");
                ReportRecord {
                    reporter: bound.name.clone(),
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, reporter = %bound.name, error = %e, "reporter failed");
                ReportRecord {
                    reporter: bound.name.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };
        job.record().push_report(record);
    }

    job.sink.buffer().close();
    job.mark_finished();
}
