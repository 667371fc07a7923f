// src/engine/job.rs

//! Pure job bookkeeping.
//!
//! [`JobRecord`] is the synchronous, deterministic part of a job: lifecycle
//! state, per-target status and the pipeline cursor. The async shell in
//! [`pipeline`](super::pipeline) runs steps and feeds their results into
//! [`JobRecord::apply_step_results`], which decides what happens next.
//!
//! No Tokio, channels or IO in here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::engine::status::{FinalStatus, StepFailure, TargetState, TargetStatus};
use crate::errors::{DutrunError, Result};
use crate::event::StepRef;
use crate::exec::{TargetError, TargetResults};
use crate::report::ReportRecord;
use crate::step::{ResumeState, StepParameters, TestStep};
use crate::target::{Target, TargetId};
use crate::types::{JobId, JobState};

/// One resolved pipeline position.
#[derive(Clone)]
pub struct PipelineStep {
    pub index: usize,
    pub label: String,
    /// Registry name.
    pub name: String,
    pub step: Arc<dyn TestStep>,
    pub params: StepParameters,
    pub events: Arc<BTreeSet<String>>,
    pub report_only: bool,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("name", &self.name)
            .field("report_only", &self.report_only)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PipelineStep {
    pub fn step_ref(&self) -> StepRef {
        StepRef {
            index: self.index,
            label: self.label.clone(),
            name: self.name.clone(),
        }
    }
}

/// Where the pipeline continues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineCursor {
    pub step_index: usize,
    /// Targets still owed a run of `step_index` after a pause. `None` means
    /// every surviving target.
    pub pending: Option<Vec<TargetId>>,
    pub resume_state: Option<ResumeState>,
}

/// What the step barrier decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StepVerdict {
    /// Move on to the next step.
    Continue,
    /// Some targets stopped for a pause; the cursor points at this step.
    Paused,
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
pub struct JobRecord {
    pub job_id: JobId,
    state: JobState,
    error: Option<String>,
    targets: Vec<Arc<Target>>,
    statuses: BTreeMap<TargetId, TargetStatus>,
    cursor: PipelineCursor,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    reports: Vec<ReportRecord>,
}

impl JobRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Started,
            error: None,
            targets: Vec::new(),
            statuses: BTreeMap::new(),
            cursor: PipelineCursor::default(),
            created_at: Utc::now(),
            ended_at: None,
            reports: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cursor(&self) -> &PipelineCursor {
        &self.cursor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn reports(&self) -> &[ReportRecord] {
        &self.reports
    }

    pub fn push_report(&mut self, report: ReportRecord) {
        self.reports.push(report);
    }

    /// Move to `next`, enforcing the lifecycle.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DutrunError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(job_id = %self.job_id, from = %self.state, to = %next, "job state transition");
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record the acquired targets. Called once, before the first step.
    pub fn set_targets(&mut self, targets: Vec<Target>) {
        self.statuses = targets
            .iter()
            .map(|t| (t.id.clone(), TargetStatus::new(t.id.clone())))
            .collect();
        self.targets = targets.into_iter().map(Arc::new).collect();
    }

    fn is_active(&self, id: &str) -> bool {
        self.statuses
            .get(id)
            .is_some_and(|s| matches!(s.state, TargetState::Pending | TargetState::Running))
    }

    /// Targets still in the pipeline, in acquisition order.
    pub fn active_targets(&self) -> Vec<Arc<Target>> {
        self.targets
            .iter()
            .filter(|t| self.is_active(&t.id))
            .cloned()
            .collect()
    }

    /// Targets to hand to step `index`: the pending ones when resuming that
    /// step, otherwise every surviving target.
    pub fn targets_for(&self, index: usize) -> Vec<Arc<Target>> {
        match (&self.cursor.pending, self.cursor.step_index == index) {
            (Some(pending), true) => self
                .targets
                .iter()
                .filter(|t| pending.contains(&t.id) && self.is_active(&t.id))
                .cloned()
                .collect(),
            _ => self.active_targets(),
        }
    }

    /// Resume state recorded for step `index`, if the job paused there.
    pub fn take_resume_state(&mut self, index: usize) -> Option<ResumeState> {
        if self.cursor.step_index == index {
            self.cursor.resume_state.take()
        } else {
            None
        }
    }

    /// Fold one step's results into the record and decide how to go on.
    ///
    /// `ran` are the targets the step was given; a target missing from
    /// `results` is an internal error. Returns the per-target outcomes in
    /// `ran` order for event emission.
    pub fn apply_step_results(
        &mut self,
        step: &PipelineStep,
        ran: &[Arc<Target>],
        mut results: TargetResults,
        resume_state: Option<ResumeState>,
        job_cancelled: bool,
    ) -> (StepVerdict, Vec<(TargetId, std::result::Result<(), TargetError>)>) {
        let mut outcomes = Vec::with_capacity(ran.len());
        let mut paused = Vec::new();
        let mut internal = None;

        for target in ran {
            let outcome = results.remove(&target.id).unwrap_or_else(|| {
                Err(TargetError::Internal(format!(
                    "step '{}' returned no result for target '{}'",
                    step.label, target.id
                )))
            });

            let Some(status) = self.statuses.get_mut(&target.id) else {
                warn!(target_id = %target.id, "result for unknown target ignored");
                continue;
            };

            match &outcome {
                Ok(()) => {
                    status.state = TargetState::Running;
                    status.last_step = Some(step.label.clone());
                }
                Err(TargetError::Paused) => {
                    status.state = TargetState::Running;
                    paused.push(target.id.clone());
                }
                Err(TargetError::Cancelled) if job_cancelled => {
                    status.state = TargetState::Cancelled;
                    status.failure = Some(StepFailure {
                        step: step.label.clone(),
                        error: TargetError::Cancelled,
                    });
                }
                Err(e) => {
                    let failure = StepFailure {
                        step: step.label.clone(),
                        error: e.clone(),
                    };
                    if let TargetError::Internal(msg) = e {
                        internal.get_or_insert_with(|| {
                            format!(
                                "internal error in step '{}' on target '{}': {msg}",
                                step.label, target.id
                            )
                        });
                    }
                    if step.report_only && !matches!(e, TargetError::Internal(_)) {
                        status.state = TargetState::Running;
                        status.last_step = Some(step.label.clone());
                        status.reported.push(failure);
                    } else {
                        status.state = TargetState::Failed;
                        status.failure = Some(failure);
                    }
                }
            }
            outcomes.push((target.id.clone(), outcome));
        }

        for (id, _) in results {
            warn!(step = %step.label, target_id = %id, "step reported a target it was not given");
        }

        let verdict = if let Some(msg) = internal {
            StepVerdict::Failed(msg)
        } else if job_cancelled {
            StepVerdict::Cancelled
        } else if !paused.is_empty() {
            self.cursor = PipelineCursor {
                step_index: step.index,
                pending: Some(paused),
                resume_state,
            };
            StepVerdict::Paused
        } else if self.active_targets().is_empty() {
            StepVerdict::Failed(format!("all targets failed in step '{}'", step.label))
        } else {
            self.cursor = PipelineCursor {
                step_index: step.index + 1,
                pending: None,
                resume_state: None,
            };
            StepVerdict::Continue
        };

        (verdict, outcomes)
    }

    /// Settle target states once the job reaches `state`.
    pub fn conclude(&mut self, state: JobState, error: Option<String>) -> Result<()> {
        self.transition(state)?;
        self.error = error;
        let settled = if state == JobState::Completed {
            TargetState::Completed
        } else {
            TargetState::Incomplete
        };
        for status in self.statuses.values_mut() {
            if matches!(status.state, TargetState::Pending | TargetState::Running) {
                status.state = settled;
            }
        }
        Ok(())
    }

    pub fn target_statuses(&self) -> Vec<TargetStatus> {
        self.targets
            .iter()
            .filter_map(|t| self.statuses.get(&t.id).cloned())
            .collect()
    }

    /// Pipeline index a paused job will resume from.
    pub fn paused_at_step(&self) -> Option<usize> {
        (self.state == JobState::Paused).then_some(self.cursor.step_index)
    }

    pub fn final_status(&self, job_name: &str) -> FinalStatus {
        FinalStatus {
            job_id: self.job_id,
            job_name: job_name.to_string(),
            state: self.state,
            error: self.error.clone(),
            targets: self.target_statuses(),
            created_at: self.created_at,
            ended_at: self.ended_at.unwrap_or_else(Utc::now),
        }
    }
}
