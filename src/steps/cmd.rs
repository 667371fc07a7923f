// src/steps/cmd.rs

//! `cmd`: run a process on each target over a transport.
//!
//! ```yaml
//! name: cmd
//! parameters:
//!   transport: { proto: ssh, options: { host: "{{ .FQDN }}", user: root } }
//!   executable: dmidecode
//!   args: ["-s", "bios-version"]
//!   expect:
//!     - regex: "^1\\.2\\."
//! ```
//!
//! Every output line becomes a `Stdout` or `Stderr` event. A target fails on
//! a non-zero exit status or when any `expect` pattern finds no match in
//! stdout.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::{DutrunError, Result};
use crate::event::StepEmitter;
use crate::exec::{StepContext, TargetError, for_each_target};
use crate::expand::ParamExpander;
use crate::step::{ResumeState, StepOutcome, StepParameters, TestStep};
use crate::target::Target;
use crate::transport::{self, OutputStream, ProcessSpec, TransportConfig, run_process};

pub const NAME: &str = "cmd";

pub const EVENT_CMD_START: &str = "CmdStart";
pub const EVENT_STDOUT: &str = "Stdout";
pub const EVENT_STDERR: &str = "Stderr";
pub const EVENT_CMD_END: &str = "CmdEnd";

pub const EVENTS: &[&str] = &[EVENT_CMD_START, EVENT_STDOUT, EVENT_STDERR, EVENT_CMD_END];

#[derive(Debug, Clone, Deserialize)]
struct Expect {
    regex: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Params {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(flatten)]
    process: ProcessSpec,
    #[serde(default)]
    expect: Vec<Expect>,
}

impl Params {
    fn parse(params: &StepParameters) -> Result<(Self, Vec<Regex>)> {
        let parsed: Params = params.decode(NAME)?;
        if parsed.process.executable.trim().is_empty() {
            return Err(invalid("'executable' must not be empty"));
        }
        transport::validate_config(&parsed.transport).map_err(|e| invalid(e.to_string()))?;
        let patterns = parsed
            .expect
            .iter()
            .map(|e| Regex::new(&e.regex).map_err(|err| invalid(format!("expect '{}': {err}", e.regex))))
            .collect::<Result<Vec<_>>>()?;
        Ok((parsed, patterns))
    }
}

fn invalid(reason: impl Into<String>) -> DutrunError {
    DutrunError::InvalidStepParameters {
        step: NAME.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Default)]
pub struct CmdStep;

#[async_trait]
impl TestStep for CmdStep {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_parameters(&self, params: &StepParameters) -> Result<()> {
        Params::parse(params).map(|_| ())
    }

    async fn run(
        &self,
        ctx: &StepContext,
        targets: Vec<Arc<Target>>,
        params: &StepParameters,
        emitter: &StepEmitter,
        _resume: Option<ResumeState>,
    ) -> Result<StepOutcome> {
        let (parsed, patterns) = Params::parse(params)?;
        let parsed = Arc::new(parsed);
        let patterns = Arc::new(patterns);
        let emitter = emitter.clone();

        let results = for_each_target(ctx, &targets, move |ctx, target| {
            let parsed = Arc::clone(&parsed);
            let patterns = Arc::clone(&patterns);
            let emitter = emitter.clone();
            async move { run_one(&ctx, &target, &parsed, &patterns, &emitter).await }
        })
        .await;

        Ok(StepOutcome::new(results))
    }
}

async fn run_one(
    ctx: &StepContext,
    target: &Target,
    params: &Params,
    patterns: &[Regex],
    emitter: &StepEmitter,
) -> std::result::Result<(), TargetError> {
    let pe = ParamExpander::new(target);
    let spec = params.process.expand(&pe)?;
    let transport = transport::from_config(&params.transport, &pe)?;

    emitter.emit(
        target,
        EVENT_CMD_START,
        json!({
            "transport": transport.name(),
            "executable": spec.executable,
            "args": spec.args,
        }),
    )?;

    let output = run_process(ctx, transport.as_ref(), &spec, |stream, line| {
        let name = match stream {
            OutputStream::Stdout => EVENT_STDOUT,
            OutputStream::Stderr => EVENT_STDERR,
        };
        emitter.emit(target, name, json!({ "msg": line }))?;
        Ok(())
    })
    .await?;

    emitter.emit(target, EVENT_CMD_END, json!({ "exit_code": output.exit_code }))?;

    if !output.success() {
        return Err(match output.exit_code {
            Some(code) => TargetError::Failed(format!("'{}' exited with status {code}", spec.executable)),
            None => TargetError::Failed(format!("'{}' was terminated by a signal", spec.executable)),
        });
    }

    let missing: Vec<&str> = patterns
        .iter()
        .filter(|re| !re.is_match(&output.stdout))
        .map(Regex::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(TargetError::Failed(format!(
            "expected output not found in stdout: {}",
            missing.join(", ")
        )));
    }

    debug!(target_id = %target.id, "cmd succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> StepParameters {
        StepParameters::from_value(NAME, v).unwrap()
    }

    #[test]
    fn accepts_minimal_parameters() {
        assert!(CmdStep.validate_parameters(&params(json!({ "executable": "true" }))).is_ok());
    }

    #[test]
    fn rejects_bad_regex_and_missing_executable() {
        assert!(CmdStep.validate_parameters(&params(json!({}))).is_err());
        assert!(
            CmdStep
                .validate_parameters(&params(json!({ "executable": "true", "expect": [{ "regex": "(" }] })))
                .is_err()
        );
    }

    #[test]
    fn rejects_unknown_transport() {
        let p = params(json!({ "executable": "true", "transport": { "proto": "serial" } }));
        assert!(CmdStep.validate_parameters(&p).is_err());
    }
}
