// src/event/emitter.rs

//! Write path for job events.
//!
//! [`EventSink`] is owned by the job: it appends to the [`EventStore`] and
//! mirrors every event into the job's [`OutputBuffer`] under one lock, so
//! buffer offsets and store sequence numbers always agree.
//!
//! [`StepEmitter`] is the handle a step receives. It only accepts the event
//! names the step declared when it was registered.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::buffer::OutputBuffer;
use crate::errors::{DutrunError, Result};
use crate::event::{Event, EventDraft, EventStore, StepRef};
use crate::target::Target;
use crate::types::JobId;
use crate::util::lock;

#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    job_id: JobId,
    store: Arc<dyn EventStore>,
    buffer: Arc<OutputBuffer<Event>>,
    order: Mutex<()>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("job_id", &self.inner.job_id)
            .finish_non_exhaustive()
    }
}

impl EventSink {
    pub fn new(store: Arc<dyn EventStore>, buffer: Arc<OutputBuffer<Event>>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                job_id: store.job_id(),
                store,
                buffer,
                order: Mutex::new(()),
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.inner.job_id
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.inner.store
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer<Event>> {
        &self.inner.buffer
    }

    /// Append unconditionally. Framework events go through here.
    pub fn emit(&self, draft: EventDraft) -> Result<Event> {
        let _order = lock(&self.inner.order);
        let event = self.inner.store.append(draft)?;
        match self.inner.buffer.write(event.clone()) {
            Ok(offset) if offset != event.seq => {
                error!(
                    job_id = %self.inner.job_id,
                    seq = event.seq,
                    offset,
                    "output buffer out of step with event store"
                );
            }
            Ok(_) => {}
            Err(_) => {
                debug!(
                    job_id = %self.inner.job_id,
                    seq = event.seq,
                    name = %event.name,
                    "event stored after output buffer closed"
                );
            }
        }
        Ok(event)
    }

    /// Job-level event with no target or step.
    pub fn job_event(&self, name: &str, payload: Value) -> Result<Event> {
        self.emit(EventDraft::job(name, payload))
    }

    /// Restricted handle for one pipeline step.
    pub fn for_step(&self, step: StepRef, declared: Arc<BTreeSet<String>>) -> StepEmitter {
        StepEmitter {
            sink: self.clone(),
            step,
            declared,
        }
    }
}

/// Event handle given to a running step.
#[derive(Clone, Debug)]
pub struct StepEmitter {
    sink: EventSink,
    step: StepRef,
    declared: Arc<BTreeSet<String>>,
}

impl StepEmitter {
    pub fn step(&self) -> &StepRef {
        &self.step
    }

    pub fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Emit `name` for `target`.
    ///
    /// Fails with [`DutrunError::UndeclaredEvent`] if the step never declared
    /// `name`; nothing is recorded in that case.
    pub fn emit<P: Serialize>(&self, target: &Target, name: &str, payload: P) -> Result<Event> {
        self.check(name)?;
        let payload = serde_json::to_value(payload)?;
        self.sink.emit(EventDraft::target(
            target.id.clone(),
            self.step.clone(),
            name,
            payload,
        ))
    }

    /// Emit a step-scoped event that concerns no particular target.
    pub fn emit_step<P: Serialize>(&self, name: &str, payload: P) -> Result<Event> {
        self.check(name)?;
        let payload = serde_json::to_value(payload)?;
        self.sink.emit(EventDraft {
            target: None,
            step: Some(self.step.clone()),
            name: name.to_string(),
            payload,
        })
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.declared.contains(name) {
            Ok(())
        } else {
            Err(DutrunError::UndeclaredEvent {
                step: self.step.label.clone(),
                event: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventStore;
    use serde_json::json;

    fn sink() -> EventSink {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new(JobId(3)));
        EventSink::new(store, Arc::new(OutputBuffer::new(16)))
    }

    fn step_ref() -> StepRef {
        StepRef {
            index: 0,
            label: "ping".into(),
            name: "cmd".into(),
        }
    }

    #[test]
    fn undeclared_names_are_rejected_and_not_recorded() {
        let sink = sink();
        let declared = Arc::new(BTreeSet::from(["Ok".to_string()]));
        let emitter = sink.for_step(step_ref(), declared);
        let target = Target::new("t1");

        emitter.emit(&target, "Ok", json!({})).unwrap();
        let err = emitter.emit(&target, "Surprise", json!({})).unwrap_err();
        assert!(matches!(err, DutrunError::UndeclaredEvent { .. }));
        assert_eq!(sink.store().len(), 1);
    }

    #[test]
    fn buffer_offsets_match_sequence_numbers() {
        let sink = sink();
        sink.job_event("JobStarted", Value::Null).unwrap();
        let declared = Arc::new(BTreeSet::from(["Ok".to_string()]));
        let emitter = sink.for_step(step_ref(), declared);
        let e = emitter.emit(&Target::new("t1"), "Ok", "done").unwrap();
        assert_eq!(e.seq, 1);

        let batch = sink.buffer().read(0);
        let seqs: Vec<u64> = batch.records.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn events_after_close_still_reach_the_store() {
        let sink = sink();
        sink.buffer().close();
        sink.job_event("Late", Value::Null).unwrap();
        assert_eq!(sink.store().len(), 1);
    }
}
