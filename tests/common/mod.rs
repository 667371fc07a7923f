#![allow(dead_code)]

use std::time::Duration;

use dutrun::engine::{JobStatus, Orchestrator};
use dutrun::event::Event;
use dutrun::types::{JobId, JobState, Requestor};

pub fn requestor(name: &str) -> Requestor {
    Requestor::new(name).expect("valid requestor")
}

/// Poll until the job reports `state`.
pub async fn wait_for_state(orch: &Orchestrator, id: JobId, state: JobState) -> JobStatus {
    let who = requestor("observer");
    loop {
        let status = orch.status(id, &who, 0).expect("job exists");
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until at least `count` events named `name` were emitted.
pub async fn wait_for_events(orch: &Orchestrator, id: JobId, name: &str, count: usize) {
    let who = requestor("observer");
    loop {
        let status = orch.status(id, &who, 0).expect("job exists");
        if events_named(&status.events, name).len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn events_named<'a>(events: &'a [Event], name: &str) -> Vec<&'a Event> {
    events.iter().filter(|e| e.name == name).collect()
}

pub fn step_index(event: &Event) -> Option<usize> {
    event.step.as_ref().map(|s| s.index)
}
