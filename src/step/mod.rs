// src/step/mod.rs

//! Step contract.
//!
//! Every step is an independent type implementing [`TestStep`]. The engine
//! never looks inside a step: it hands over the surviving targets, the
//! step's parameters, a restricted [`StepEmitter`] and, for resumable
//! steps, the resume state recorded when the job was paused. The step fans
//! out with [`for_each_target`](crate::exec::for_each_target) and reports
//! one result per target.

pub mod params;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::event::StepEmitter;
use crate::exec::{StepContext, TargetResults};
use crate::target::Target;

pub use params::StepParameters;

/// Opaque document a resumable step uses to continue after a pause.
///
/// The engine stores and replays it verbatim.
pub type ResumeState = Value;

/// What a step run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// One entry per target the step was given.
    pub results: TargetResults,
    /// Present when some targets stopped with
    /// [`TargetError::Paused`](crate::exec::TargetError::Paused).
    pub resume_state: Option<ResumeState>,
}

impl StepOutcome {
    pub fn new(results: TargetResults) -> Self {
        Self {
            results,
            resume_state: None,
        }
    }

    pub fn with_resume_state(mut self, state: Option<ResumeState>) -> Self {
        self.resume_state = state;
        self
    }
}

#[async_trait]
pub trait TestStep: Send + Sync {
    /// Canonical registry name.
    fn name(&self) -> &str;

    /// Called once at submission, before any target is acquired.
    fn validate_parameters(&self, params: &StepParameters) -> Result<()>;

    /// Whether the step honours pause requests and accepts resume state.
    ///
    /// Non-resumable steps always receive `None` and run their in-flight
    /// invocations to completion when the job is paused.
    fn supports_resume(&self) -> bool {
        false
    }

    /// Run against every target in `targets`.
    ///
    /// Per-target problems belong in the returned results. An `Err` means
    /// the step could not run at all and is applied to every target.
    ///
    /// `None` is the empty resume state. A non-resumable step always gets
    /// `None` and whatever it returns in
    /// [`StepOutcome::resume_state`] is replaced by `None`.
    async fn run(
        &self,
        ctx: &StepContext,
        targets: Vec<Arc<Target>>,
        params: &StepParameters,
        emitter: &StepEmitter,
        resume: Option<ResumeState>,
    ) -> Result<StepOutcome>;
}
