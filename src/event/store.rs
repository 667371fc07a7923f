// src/event/store.rs

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::trace;

use crate::buffer::Backfill;
use crate::errors::Result;
use crate::event::{Event, EventDraft};
use crate::types::JobId;

/// Position in a job's event log: the `seq` of the next event to read.
pub type Cursor = u64;

/// Contract for a job's event log.
///
/// A store is append-only. `since` is a pure read: the same cursor yields the
/// same events for as long as the store lives, and the returned cursor never
/// moves backwards. A durable implementation only has to keep those two
/// promises; the engine ships with [`MemoryEventStore`].
pub trait EventStore: Send + Sync {
    fn job_id(&self) -> JobId;

    /// Assign the next sequence number and timestamp, then store the event.
    fn append(&self, draft: EventDraft) -> Result<Event>;

    /// Events with `seq >= cursor`, plus the cursor to resume from.
    fn since(&self, cursor: Cursor) -> (Vec<Event>, Cursor);

    /// Events with `from <= seq < to`.
    fn range(&self, from: Cursor, to: Cursor) -> Vec<Event>;

    /// Number of events appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store: a vector indexed by `seq`.
#[derive(Debug)]
pub struct MemoryEventStore {
    job_id: JobId,
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            events: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Event>> {
        self.events.read().unwrap_or_else(|p| p.into_inner())
    }
}

impl EventStore for MemoryEventStore {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn append(&self, draft: EventDraft) -> Result<Event> {
        let mut events = self.events.write().unwrap_or_else(|p| p.into_inner());
        let event = Event {
            seq: events.len() as u64,
            job_id: self.job_id,
            target: draft.target,
            step: draft.step,
            name: draft.name,
            emitted_at: Utc::now(),
            payload: draft.payload,
        };
        trace!(job_id = %self.job_id, seq = event.seq, name = %event.name, "event appended");
        events.push(event.clone());
        Ok(event)
    }

    fn since(&self, cursor: Cursor) -> (Vec<Event>, Cursor) {
        let events = self.read();
        let start = (cursor as usize).min(events.len());
        let slice = events[start..].to_vec();
        let next = slice.last().map(|e| e.seq + 1).unwrap_or(cursor);
        (slice, next)
    }

    fn range(&self, from: Cursor, to: Cursor) -> Vec<Event> {
        let events = self.read();
        let end = (to as usize).min(events.len());
        let start = (from as usize).min(end);
        events[start..end].to_vec()
    }

    fn len(&self) -> u64 {
        self.read().len() as u64
    }
}

/// Lets an [`OutputBuffer`](crate::buffer::OutputBuffer) re-fetch events it
/// already evicted.
pub struct StoreBackfill(pub Arc<dyn EventStore>);

impl Backfill<Event> for StoreBackfill {
    fn fetch(&self, from: u64, to: u64) -> Vec<Event> {
        self.0.range(from, to)
    }
}
