// src/engine/pipeline.rs

//! Pipeline construction and the step loop.
//!
//! [`build_pipeline`] resolves every descriptor step against the registry
//! and runs its parameter validation. [`run_segment`] drives steps in order
//! from the job's cursor until the pipeline ends, a pause is observed, or a
//! verdict stops the job. Each step is a strict barrier: the next one starts
//! only after every target's invocation of the current one has returned.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::descriptor::JobDescriptor;
use crate::engine::handle::JobHandle;
use crate::engine::job::{PipelineStep, StepVerdict};
use crate::errors::Result;
use crate::event::{EventDraft, StepEmitter, names};
use crate::exec::runner::panic_message;
use crate::exec::{StepContext, TargetError, TargetResults};
use crate::registry::PluginRegistry;
use crate::step::{ResumeState, StepOutcome, StepParameters};
use crate::target::Target;
use crate::types::JobState;

/// How long a step may keep running after its job was cancelled before its
/// task is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

pub fn build_pipeline(
    descriptor: &JobDescriptor,
    registry: &PluginRegistry,
) -> Result<Vec<PipelineStep>> {
    descriptor
        .steps
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let resolved = registry.step(&spec.name)?;
            let params = StepParameters::from_value(&resolved.name, spec.parameters.clone())?;
            resolved.step.validate_parameters(&params)?;
            Ok(PipelineStep {
                index,
                label: spec.label().to_string(),
                name: resolved.name,
                step: resolved.step,
                params,
                events: resolved.events,
                report_only: spec.report_only,
                timeout: spec.timeout()?,
            })
        })
        .collect()
}

/// How a run of the step loop ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SegmentEnd {
    Paused,
    Finished(JobState, Option<String>),
}

pub(crate) async fn run_segment(job: &JobHandle, pause: CancellationToken) -> SegmentEnd {
    let start = job.record().cursor().step_index;

    for step in job.plan.pipeline.iter().skip(start) {
        if job.cancel.is_cancelled() {
            return SegmentEnd::Finished(JobState::Cancelled, None);
        }
        if pause.is_cancelled() {
            info!(job_id = %job.id, step = %step.label, "pause observed at step boundary");
            return SegmentEnd::Paused;
        }

        let (targets, resume) = {
            let mut rec = job.record();
            (rec.targets_for(step.index), rec.take_resume_state(step.index))
        };
        let resume = if step.step.supports_resume() { resume } else { None };

        for target in &targets {
            emit_target_event(job, step, &target.id, names::TARGET_IN, json!({}));
        }

        let ctx = StepContext::from_tokens(
            job.cancel.clone(),
            pause.clone(),
            step.timeout.unwrap_or(job.options.default_step_timeout),
            job.options.max_parallel_targets,
        );
        let emitter = job.sink.for_step(step.step_ref(), Arc::clone(&step.events));

        info!(
            job_id = %job.id,
            step = %step.label,
            index = step.index,
            targets = targets.len(),
            resuming = resume.is_some(),
            "step started"
        );

        let (results, resume_state) =
            match run_step(step, ctx, targets.clone(), emitter, resume, &job.cancel).await {
                Ok(outcome) => {
                    let state = outcome.resume_state.filter(|_| step.step.supports_resume());
                    (outcome.results, state)
                }
                Err(e) => {
                    warn!(job_id = %job.id, step = %step.label, error = %e, "step failed as a whole");
                    let all: TargetResults = targets
                        .iter()
                        .map(|t| (t.id.clone(), Err(e.clone())))
                        .collect();
                    (all, None)
                }
            };

        let cancelled = job.cancel.is_cancelled();
        let (verdict, outcomes) = job.record().apply_step_results(
            step,
            &targets,
            results,
            resume_state,
            cancelled,
        );

        for (target, outcome) in &outcomes {
            match outcome {
                Ok(()) => emit_target_event(job, step, target, names::TARGET_OUT, json!({})),
                Err(e) => emit_target_event(
                    job,
                    step,
                    target,
                    names::TARGET_ERR,
                    json!({ "error": e.to_string(), "kind": e.kind() }),
                ),
            }
        }

        info!(job_id = %job.id, step = %step.label, ?verdict, "step finished");

        match verdict {
            StepVerdict::Continue => {}
            StepVerdict::Paused => return SegmentEnd::Paused,
            StepVerdict::Failed(msg) => return SegmentEnd::Finished(JobState::Failed, Some(msg)),
            StepVerdict::Cancelled => return SegmentEnd::Finished(JobState::Cancelled, None),
        }
    }

    if pause.is_cancelled() {
        info!(job_id = %job.id, "pause requested after last step; completing");
    }
    SegmentEnd::Finished(JobState::Completed, None)
}

/// Run one step in its own task so a panicking step cannot take the job
/// task down, and bound how long it may ignore a cancellation.
async fn run_step(
    step: &PipelineStep,
    ctx: StepContext,
    targets: Vec<Arc<Target>>,
    emitter: StepEmitter,
    resume: Option<ResumeState>,
    cancel: &CancellationToken,
) -> std::result::Result<StepOutcome, TargetError> {
    let imp = Arc::clone(&step.step);
    let params = step.params.clone();
    let mut handle = tokio::spawn(async move {
        imp.run(&ctx, targets, &params, &emitter, resume).await
    });

    let joined = tokio::select! {
        res = &mut handle => res,
        _ = cancel.cancelled() => match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
            Ok(res) => res,
            Err(_) => {
                warn!(step = %step.label, "step ignored cancellation; aborting it");
                handle.abort();
                let _ = handle.await;
                return Err(TargetError::Cancelled);
            }
        },
    };

    match joined {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(TargetError::from(e)),
        Err(e) if e.is_panic() => Err(TargetError::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(TargetError::Cancelled),
    }
}

fn emit_target_event(
    job: &JobHandle,
    step: &PipelineStep,
    target: &str,
    name: &str,
    payload: serde_json::Value,
) {
    if let Err(e) = job
        .sink
        .emit(EventDraft::target(target, step.step_ref(), name, payload))
    {
        warn!(job_id = %job.id, target_id = target, event = name, error = %e, "failed to record target event");
    }
}
