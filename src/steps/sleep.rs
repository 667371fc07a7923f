// src/steps/sleep.rs

//! `sleep`: wait a fixed duration on every target.
//!
//! Resumable. When the job is paused mid-sleep each target records how much
//! of its sleep is left, and a resumed run sleeps only that remainder:
//!
//! ```json
//! { "remaining_ms": { "dut-1": 1200, "dut-2": 1200 } }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{DutrunError, Result};
use crate::event::StepEmitter;
use crate::exec::{StepContext, TargetError, for_each_target};
use crate::step::{ResumeState, StepOutcome, StepParameters, TestStep};
use crate::target::{Target, TargetId};
use crate::util::{lock, parse_duration};

pub const NAME: &str = "sleep";

pub const EVENT_SLEEP_START: &str = "SleepStart";
pub const EVENT_SLEEP_END: &str = "SleepEnd";

pub const EVENTS: &[&str] = &[EVENT_SLEEP_START, EVENT_SLEEP_END];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    duration: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SleepResume {
    remaining_ms: BTreeMap<TargetId, u64>,
}

fn parse_params(params: &StepParameters) -> Result<Duration> {
    let p: Params = params.decode(NAME)?;
    parse_duration(&p.duration).map_err(|e| DutrunError::InvalidStepParameters {
        step: NAME.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct SleepStep;

#[async_trait]
impl TestStep for SleepStep {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_parameters(&self, params: &StepParameters) -> Result<()> {
        parse_params(params).map(|_| ())
    }

    fn supports_resume(&self) -> bool {
        true
    }

    async fn run(
        &self,
        ctx: &StepContext,
        targets: Vec<Arc<Target>>,
        params: &StepParameters,
        emitter: &StepEmitter,
        resume: Option<ResumeState>,
    ) -> Result<StepOutcome> {
        let duration = parse_params(params)?;
        let previous: SleepResume = match resume {
            Some(state) => serde_json::from_value(state)?,
            None => SleepResume::default(),
        };
        let previous = Arc::new(previous.remaining_ms);
        let remaining = Arc::new(Mutex::new(BTreeMap::new()));

        let emitter = emitter.clone();
        let left = Arc::clone(&remaining);
        let results = for_each_target(ctx, &targets, move |ctx, target| {
            let emitter = emitter.clone();
            let left = Arc::clone(&left);
            let wait = previous
                .get(&target.id)
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or(duration);
            async move { sleep_one(&ctx, &target, wait, &emitter, &left).await }
        })
        .await;

        let remaining_ms = std::mem::take(&mut *lock(&remaining));
        let resume_state = if remaining_ms.is_empty() {
            None
        } else {
            debug!(targets = remaining_ms.len(), "sleep paused; recording remainder");
            Some(serde_json::to_value(SleepResume { remaining_ms })?)
        };

        Ok(StepOutcome::new(results).with_resume_state(resume_state))
    }
}

async fn sleep_one(
    ctx: &StepContext,
    target: &Target,
    wait: Duration,
    emitter: &StepEmitter,
    remaining: &Mutex<BTreeMap<TargetId, u64>>,
) -> std::result::Result<(), TargetError> {
    emitter.emit(target, EVENT_SLEEP_START, json!({ "duration_ms": wait.as_millis() as u64 }))?;

    let started = Instant::now();
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = ctx.paused() => {
            let left = wait.saturating_sub(started.elapsed());
            lock(remaining).insert(target.id.clone(), left.as_millis() as u64);
            return Err(TargetError::Paused);
        }
    }

    emitter.emit(target, EVENT_SLEEP_END, json!({}))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_duration() {
        let ok = StepParameters::from_value(NAME, json!({ "duration": "250ms" })).unwrap();
        assert!(SleepStep.validate_parameters(&ok).is_ok());
        let bad = StepParameters::from_value(NAME, json!({ "duration": "soon" })).unwrap();
        assert!(SleepStep.validate_parameters(&bad).is_err());
    }
}
