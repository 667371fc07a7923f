// tests/event_stream.rs

mod common;
use crate::common::{requestor, wait_for_events};

use std::error::Error;
use std::time::Duration;

use serde_json::json;

use dutrun::api::{Api, StatusUpdate};
use dutrun::errors::DutrunError;
use dutrun::event::names;
use dutrun::registry::PluginRegistry;
use dutrun::types::{JobId, JobState};
use dutrun_test_utils::builders::{DescriptorBuilder, StepBuilder};
use dutrun_test_utils::scripted_step::{Behaviour, EVENT_RAN, ScriptedStep};
use dutrun_test_utils::{init_tracing, orchestrator, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn slow_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    ScriptedStep::new("slow")
        .default_behaviour(Behaviour::Delay(Duration::from_millis(50)))
        .register(&mut registry, &[]);
    registry
}

fn fleet_descriptor(targets: &[&str]) -> Vec<u8> {
    DescriptorBuilder::new("stream")
        .targets(targets)
        .step(StepBuilder::new("slow"))
        .step(StepBuilder::new("echo").param("text", json!("{{ .ID }}")))
        .step(StepBuilder::new("slow").label("slow-again"))
        .to_json()
}

#[tokio::test]
async fn reads_at_the_same_cursor_are_identical() -> TestResult {
    init_tracing();
    let orch = orchestrator(slow_registry());
    let alice = requestor("alice");
    let api = Api::new(orch.clone());
    let id = api.start_job("alice", &fleet_descriptor(&["a", "b", "c"]), "json")?;

    // While the job runs, a later read extends an earlier one.
    with_timeout(wait_for_events(&orch, id, EVENT_RAN, 3)).await;
    let early = orch.status(id, &alice, 2)?;
    let later = orch.status(id, &alice, 2)?;
    assert!(later.events.len() >= early.events.len());
    assert_eq!(&later.events[..early.events.len()], &early.events[..]);

    with_timeout(orch.wait(id)).await?;

    // Concurrent readers at one cursor see the same batch.
    let (x, y) = tokio::join!(
        {
            let orch = orch.clone();
            let who = alice.clone();
            tokio::spawn(async move { orch.status(id, &who, 5) })
        },
        {
            let orch = orch.clone();
            let who = requestor("bob");
            tokio::spawn(async move { orch.status(id, &who, 5) })
        }
    );
    let (x, y) = (x??, y??);
    assert_eq!(x.events, y.events);
    assert_eq!(x.next_cursor, y.next_cursor);
    assert_eq!(x.events.first().map(|e| e.seq), Some(5));
    Ok(())
}

#[tokio::test]
async fn cursor_past_the_end_returns_nothing_and_keeps_position() -> TestResult {
    init_tracing();
    let orch = orchestrator(slow_registry());
    let id = Api::new(orch.clone()).start_job("alice", &fleet_descriptor(&["a"]), "json")?;
    let done = with_timeout(orch.wait(id)).await?;

    let end = done.next_cursor;
    let status = orch.status(id, &requestor("alice"), end + 10)?;
    assert!(status.events.is_empty());
    assert_eq!(status.next_cursor, end + 10);
    Ok(())
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn status_stream_is_contiguous_and_ends_with_the_job() -> TestResult {
    init_tracing();
    let orch = orchestrator(slow_registry());
    let api = Api::new(orch.clone());
    let id = api.start_job("alice", &fleet_descriptor(&["a", "b", "c", "d"]), "json")?;

    let updates = with_timeout(collect(api.status_job("observer", id)?)).await;
    let last = updates.last().expect("at least one batch");
    assert!(last.done);
    assert_eq!(last.state, JobState::Completed);
    assert_eq!(last.targets.len(), 4);

    let mut expected = 0;
    for update in &updates {
        assert_eq!(update.from_cursor, expected);
        for event in &update.events {
            assert_eq!(event.seq, expected);
            expected += 1;
        }
        assert_eq!(update.next_cursor, expected);
    }

    let full = orch.status(id, &requestor("observer"), 0)?;
    assert_eq!(expected, full.events.len() as u64);
    assert_eq!(
        updates.iter().flat_map(|u| u.events.iter()).last().map(|e| e.name.as_str()),
        Some(names::JOB_COMPLETED)
    );
    Ok(())
}

#[tokio::test]
async fn late_and_concurrent_streams_see_the_whole_log() -> TestResult {
    init_tracing();
    let orch = orchestrator(slow_registry());
    let api = Api::new(orch.clone());
    let id = api.start_job("alice", &fleet_descriptor(&["a", "b"]), "json")?;

    let first = tokio::spawn(collect(api.status_job("one", id)?));
    let second = tokio::spawn(collect(api.status_job("two", id)?));
    with_timeout(orch.wait(id)).await?;
    let late = collect(api.status_job("three", id)?);

    let (first, second, late) = with_timeout(async { (first.await, second.await, late.await) }).await;
    let flatten = |u: Vec<StatusUpdate>| -> Vec<u64> {
        u.into_iter().flat_map(|u| u.events).map(|e| e.seq).collect()
    };
    let a = flatten(first?);
    let b = flatten(second?);
    let c = flatten(late);
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(a, (0..a.len() as u64).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn dropping_the_receiver_ends_the_stream() -> TestResult {
    init_tracing();
    let orch = orchestrator(slow_registry());
    let api = Api::new(orch.clone());
    let id = api.start_job("alice", &fleet_descriptor(&["a"]), "json")?;

    let mut rx = api.status_job("observer", id)?;
    let first = with_timeout(rx.recv()).await;
    assert!(first.is_some());
    drop(rx);

    let status = with_timeout(orch.wait(id)).await?;
    assert_eq!(status.state, JobState::Completed);
    Ok(())
}

#[tokio::test]
async fn api_rejects_bad_submissions() {
    init_tracing();
    let api = Api::new(orchestrator(slow_registry()));
    let good = fleet_descriptor(&["a"]);

    assert!(matches!(
        api.start_job("  ", &good, "json"),
        Err(DutrunError::MissingRequestor)
    ));
    assert!(matches!(
        api.start_job("alice", &good, "xml"),
        Err(DutrunError::UnknownDescriptorFormat(_))
    ));
    assert!(matches!(
        api.start_job("alice", b"", "json"),
        Err(DutrunError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        api.status_job("alice", JobId(99)),
        Err(DutrunError::JobNotFound(_))
    ));
    assert!(api.orchestrator().job_ids().is_empty());
}

#[tokio::test]
async fn yaml_descriptors_run_like_json_ones() -> TestResult {
    init_tracing();
    let api = Api::new(orchestrator(PluginRegistry::with_builtins()));
    let yaml = br#"
job_name: hello
target_manager:
  parameters:
    targets:
      - id: dut-1
        attributes:
          rack: r7
steps:
  - name: echo
    parameters:
      text: "{{ .rack }}/{{ .ID }}"
"#;
    let id = api.start_job("alice", yaml, "yaml")?;
    let status = with_timeout(api.orchestrator().wait(id)).await?;
    assert_eq!(status.state, JobState::Completed);
    let echo = status.events.iter().find(|e| e.name == "Echo").unwrap();
    assert_eq!(echo.payload, json!({ "text": "r7/dut-1" }));
    Ok(())
}
