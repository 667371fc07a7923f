// tests/orchestrator_scenarios.rs

mod common;
use crate::common::{events_named, requestor, step_index, wait_for_events};

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use dutrun::engine::TargetState;
use dutrun::errors::{DutrunError, Result as DutrunResult};
use dutrun::event::names;
use dutrun::exec::TargetError;
use dutrun::registry::PluginRegistry;
use dutrun::target::{Target, TargetManager};
use dutrun::types::{JobId, JobState};
use dutrun_test_utils::builders::{DescriptorBuilder, StepBuilder};
use dutrun_test_utils::scripted_step::{Behaviour, EVENT_RAN, ScriptedStep};
use dutrun_test_utils::{init_tracing, orchestrator, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn ids(log: &std::sync::Mutex<Vec<String>>) -> Vec<String> {
    let mut v = log.lock().unwrap().clone();
    v.sort();
    v
}

#[tokio::test]
async fn failing_target_is_dropped_and_job_completes_partially() -> TestResult {
    init_tracing();

    let ping = ScriptedStep::new("ping").on("dut-2", Behaviour::Fail("no link".into()));
    let verify = ScriptedStep::new("verify");
    let verified = verify.invocations();

    let mut registry = PluginRegistry::with_builtins();
    ping.register(&mut registry, &[]);
    verify.register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("partial")
        .targets(&["dut-1", "dut-2", "dut-3"])
        .step(StepBuilder::new("ping"))
        .step(StepBuilder::new("verify"))
        .build();

    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Completed);
    assert_eq!(ids(&verified), vec!["dut-1", "dut-3"]);

    let failed: Vec<_> = status.failed_targets().map(|t| t.target.clone()).collect();
    assert_eq!(failed, vec!["dut-2"]);
    assert_eq!(status.completed_targets().count(), 2);

    let dut2 = status.targets.iter().find(|t| t.target == "dut-2").unwrap();
    let failure = dut2.failure.as_ref().unwrap();
    assert_eq!(failure.step, "ping");
    assert_eq!(failure.error, TargetError::Failed("no link".into()));

    // dut-2 never entered the second step.
    let entered_verify: Vec<_> = events_named(&status.events, names::TARGET_IN)
        .into_iter()
        .filter(|e| step_index(e) == Some(1))
        .filter_map(|e| e.target.clone())
        .collect();
    assert!(!entered_verify.contains(&"dut-2".to_string()));
    Ok(())
}

#[tokio::test]
async fn unknown_step_is_rejected_synchronously() -> TestResult {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());

    let descriptor = DescriptorBuilder::new("typo")
        .target("dut-1")
        .step(StepBuilder::new("no-such-step"))
        .build();

    let err = orch.start(&descriptor, &requestor("alice")).unwrap_err();
    assert!(matches!(err, DutrunError::UnknownStep(ref name) if name == "no-such-step"));
    assert!(err.is_submission_error());
    assert!(orch.job_ids().is_empty());

    // No id was consumed by the rejected submission.
    let ok = DescriptorBuilder::new("fine")
        .target("dut-1")
        .step(StepBuilder::new("echo").param("text", json!("hi")))
        .build();
    assert_eq!(orch.start(&ok, &requestor("alice"))?, JobId(1));
    Ok(())
}

#[tokio::test]
async fn invalid_step_parameters_are_rejected_synchronously() {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());

    let descriptor = DescriptorBuilder::new("bad-sleep")
        .target("dut-1")
        .step(StepBuilder::new("sleep").param("duration", json!("forever")))
        .build();

    let err = orch.start(&descriptor, &requestor("alice")).unwrap_err();
    assert!(matches!(err, DutrunError::InvalidStepParameters { .. }));
    assert!(orch.job_ids().is_empty());
}

#[tokio::test]
async fn step_names_match_case_insensitively() -> TestResult {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());

    let descriptor = DescriptorBuilder::new("loud")
        .target("dut-1")
        .step(StepBuilder::new("ECHO").param("text", json!("{{ .ID }} up")))
        .build();

    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;
    assert_eq!(status.state, JobState::Completed);

    let echoed = events_named(&status.events, "Echo");
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].payload, json!({ "text": "dut-1 up" }));
    Ok(())
}

#[tokio::test]
async fn cancel_mid_step_stops_the_pipeline() -> TestResult {
    init_tracing();

    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("stall")
        .default_behaviour(Behaviour::Hang)
        .register(&mut registry, &[]);
    let after = ScriptedStep::new("after");
    let ran_after = after.invocations();
    after.register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("stuck")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("stall"))
        .step(StepBuilder::new("after"))
        .build();

    let alice = requestor("alice");
    let id = orch.start(&descriptor, &alice)?;
    with_timeout(wait_for_events(&orch, id, EVENT_RAN, 2)).await;

    orch.cancel(id, &alice)?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Cancelled);
    assert!(ran_after.lock().unwrap().is_empty());
    assert!(status.events.iter().all(|e| step_index(e).is_none_or(|i| i == 0)));
    assert!(status.targets.iter().all(|t| t.state == TargetState::Cancelled));
    assert_eq!(events_named(&status.events, names::JOB_CANCELLED).len(), 1);

    // Cancelling twice is refused.
    assert!(matches!(orch.cancel(id, &alice), Err(DutrunError::JobFinished(_))));
    Ok(())
}

#[tokio::test]
async fn only_the_owner_may_cancel() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("stall")
        .default_behaviour(Behaviour::Hang)
        .register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("owned")
        .target("dut-1")
        .step(StepBuilder::new("stall"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;

    let err = orch.cancel(id, &requestor("mallory")).unwrap_err();
    assert!(matches!(err, DutrunError::NotRequestor { .. }));
    // Anyone may look.
    assert_eq!(orch.status(id, &requestor("mallory"), 0)?.job_id, id);

    orch.cancel(id, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;
    assert_eq!(status.state, JobState::Cancelled);
    Ok(())
}

#[tokio::test]
async fn panicking_target_does_not_affect_siblings() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("fragile")
        .on("dut-1", Behaviour::Panic)
        .register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("panics")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("fragile"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Completed);
    let by_id = |id: &str| status.targets.iter().find(|t| t.target == id).unwrap();
    assert_eq!(by_id("dut-2").state, TargetState::Completed);
    assert_eq!(by_id("dut-1").state, TargetState::Failed);
    assert!(matches!(
        by_id("dut-1").failure.as_ref().unwrap().error,
        TargetError::Panicked(ref msg) if msg.contains("scripted panic")
    ));
    Ok(())
}

#[tokio::test]
async fn all_targets_failing_fails_the_job_early() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("broken")
        .default_behaviour(Behaviour::Fail("nope".into()))
        .register(&mut registry, &[]);
    let never = ScriptedStep::new("never");
    let ran = never.invocations();
    never.register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("doomed")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("broken"))
        .step(StepBuilder::new("never"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.as_deref().unwrap().contains("broken"));
    assert!(ran.lock().unwrap().is_empty());
    assert_eq!(status.failed_targets().count(), 2);
    Ok(())
}

#[tokio::test]
async fn report_only_failures_keep_targets_in_the_pipeline() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("lint")
        .default_behaviour(Behaviour::Fail("warning".into()))
        .register(&mut registry, &[]);
    let next = ScriptedStep::new("next");
    let ran = next.invocations();
    next.register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("lenient")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("lint").report_only(true))
        .step(StepBuilder::new("next"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Completed);
    assert_eq!(ids(&ran), vec!["dut-1", "dut-2"]);
    for target in &status.targets {
        assert_eq!(target.state, TargetState::Completed);
        assert_eq!(target.reported.len(), 1);
    }
    assert_eq!(events_named(&status.events, names::TARGET_ERR).len(), 2);
    Ok(())
}

#[tokio::test]
async fn undeclared_event_is_an_internal_error() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("chatty")
        .on("dut-1", Behaviour::Emit("Surprise".into()))
        .register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("contract")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("chatty").report_only(true))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.as_deref().unwrap().contains("internal"));
    assert!(events_named(&status.events, "Surprise").is_empty());

    let dut1 = status.targets.iter().find(|t| t.target == "dut-1").unwrap();
    assert!(matches!(
        dut1.failure.as_ref().unwrap().error,
        TargetError::Internal(_)
    ));
    Ok(())
}

#[tokio::test]
async fn step_timeout_is_recorded_as_timed_out() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("slow")
        .default_behaviour(Behaviour::Hang)
        .register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("slowpoke")
        .target("dut-1")
        .step(StepBuilder::new("slow").timeout("100ms"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Failed);
    let failure = status.targets[0].failure.as_ref().unwrap();
    assert_eq!(failure.error, TargetError::TimedOut);
    assert!(failure.error.is_interruption());
    Ok(())
}

#[tokio::test]
async fn step_barrier_orders_events() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("uneven")
        .on("dut-1", Behaviour::Delay(std::time::Duration::from_millis(150)))
        .on("dut-2", Behaviour::Delay(std::time::Duration::from_millis(10)))
        .register(&mut registry, &[]);
    ScriptedStep::new("second").register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("barrier")
        .targets(&["dut-1", "dut-2", "dut-3"])
        .step(StepBuilder::new("uneven"))
        .step(StepBuilder::new("second"))
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;
    assert_eq!(status.state, JobState::Completed);

    let last_first = status
        .events
        .iter()
        .filter(|e| step_index(e) == Some(0))
        .map(|e| e.seq)
        .max()
        .unwrap();
    let first_second = status
        .events
        .iter()
        .filter(|e| step_index(e) == Some(1))
        .map(|e| e.seq)
        .min()
        .unwrap();
    assert!(last_first < first_second);

    // Sequence numbers are dense.
    for (i, event) in status.events.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
    }
    Ok(())
}

#[tokio::test]
async fn reporters_run_once_after_the_job_ends() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("ping")
        .on("dut-2", Behaviour::Fail("dead".into()))
        .register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let descriptor = DescriptorBuilder::new("reported")
        .targets(&["dut-1", "dut-2"])
        .step(StepBuilder::new("ping"))
        .reporter("target_success", json!({ "success_expression": ">=50%" }))
        .reporter("target_success", json!({ "success_expression": ">1" }))
        .reporter("noop", Value::Null)
        .build();
    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.reports.len(), 3);
    let verdicts: Vec<bool> = status
        .reports
        .iter()
        .map(|r| r.outcome.as_ref().unwrap().success)
        .collect();
    assert_eq!(verdicts, vec![true, false, true]);
    Ok(())
}

#[tokio::test]
async fn unknown_reporter_is_a_submission_error() {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());
    let descriptor = DescriptorBuilder::new("r")
        .target("dut-1")
        .step(StepBuilder::new("echo").param("text", json!("x")))
        .reporter("carrier-pigeon", Value::Null)
        .build();
    let err = orch.start(&descriptor, &requestor("alice")).unwrap_err();
    assert!(matches!(err, DutrunError::UnknownReporter(_)));
}

struct Unreachable;

#[async_trait]
impl TargetManager for Unreachable {
    fn validate_parameters(&self, _parameters: &Value) -> DutrunResult<()> {
        Ok(())
    }

    async fn acquire(&self, _job: JobId, _parameters: &Value) -> DutrunResult<Vec<Target>> {
        Err(DutrunError::TargetAcquisition("inventory offline".into()))
    }
}

#[tokio::test]
async fn target_acquisition_failure_fails_the_job() -> TestResult {
    init_tracing();
    let mut registry = PluginRegistry::with_builtins();
    registry.register_target_manager("unreachable", Arc::new(Unreachable));
    let never = ScriptedStep::new("never");
    let ran = never.invocations();
    never.register(&mut registry, &[]);
    let orch = orchestrator(registry);

    let mut descriptor = DescriptorBuilder::new("orphan")
        .target("dut-1")
        .step(StepBuilder::new("never"))
        .build();
    descriptor.target_manager.name = "unreachable".into();

    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.as_deref().unwrap().contains("inventory offline"));
    assert!(status.targets.is_empty());
    assert!(ran.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn oversized_step_timeout_is_a_submission_error() {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());
    let descriptor = DescriptorBuilder::new("forever")
        .target("dut-1")
        .step(
            StepBuilder::new("echo")
                .param("text", json!("x"))
                .timeout("999999999999999999h"),
        )
        .build();

    let err = orch.start(&descriptor, &requestor("alice")).unwrap_err();
    assert!(matches!(err, DutrunError::InvalidDescriptor(ref msg) if msg.contains("out of range")));
    assert!(orch.job_ids().is_empty());
}

#[tokio::test]
async fn unbounded_step_timeout_still_runs_every_target() -> TestResult {
    init_tracing();
    let orch = orchestrator(PluginRegistry::with_builtins());
    let descriptor = DescriptorBuilder::new("patient")
        .targets(&["dut-1", "dut-2"])
        .step(
            StepBuilder::new("echo")
                .param("text", json!("{{ .ID }}"))
                .timeout("18446744073709551615s"),
        )
        .build();

    let id = orch.start(&descriptor, &requestor("alice"))?;
    let status = with_timeout(orch.wait(id)).await?;

    assert_eq!(status.state, JobState::Completed);
    assert!(status.targets.iter().all(|t| t.state == TargetState::Completed));
    assert_eq!(events_named(&status.events, "Echo").len(), 2);
    Ok(())
}
