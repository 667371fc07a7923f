// src/steps/echo.rs

//! `echo`: emit a templated message for each target. Handy for smoke-testing
//! a descriptor and its target attributes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::errors::Result;
use crate::event::StepEmitter;
use crate::exec::{StepContext, TargetError, for_each_target};
use crate::expand::ParamExpander;
use crate::step::{ResumeState, StepOutcome, StepParameters, TestStep};
use crate::target::Target;

pub const NAME: &str = "echo";

pub const EVENT_ECHO: &str = "Echo";

pub const EVENTS: &[&str] = &[EVENT_ECHO];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    text: String,
}

#[derive(Debug, Default)]
pub struct EchoStep;

#[async_trait]
impl TestStep for EchoStep {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_parameters(&self, params: &StepParameters) -> Result<()> {
        params.decode::<Params>(NAME).map(|_| ())
    }

    async fn run(
        &self,
        ctx: &StepContext,
        targets: Vec<Arc<Target>>,
        params: &StepParameters,
        emitter: &StepEmitter,
        _resume: Option<ResumeState>,
    ) -> Result<StepOutcome> {
        let text: Arc<str> = params.decode::<Params>(NAME)?.text.into();
        let emitter = emitter.clone();

        let results = for_each_target(ctx, &targets, move |_ctx, target| {
            let text = Arc::clone(&text);
            let emitter = emitter.clone();
            async move {
                let line = ParamExpander::new(&target)
                    .expand(&text)
                    .map_err(TargetError::failed)?
                    .into_owned();
                emitter.emit(&target, EVENT_ECHO, json!({ "text": line }))?;
                Ok::<_, TargetError>(())
            }
        })
        .await;

        Ok(StepOutcome::new(results))
    }
}
