// src/buffer.rs

//! Streaming output buffer for live job status.
//!
//! One writer appends records, any number of readers drain them at their own
//! pace. Every record has a stable offset (its position in the logical
//! stream). Memory is bounded:
//!
//! - a prefix consumed by every registered reader is evicted;
//! - with a [`Backfill`] source attached, anything beyond `capacity` records
//!   is evicted too, and readers that fall behind re-fetch the evicted range
//!   from the backfill instead of losing it;
//! - without a backfill, unread records are never evicted while a reader
//!   still needs them, and only the last `capacity` records are kept when no
//!   reader is registered.
//!
//! A read always returns everything available from the requested offset;
//! there is no chunk size that could silently truncate a backlog.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::util::lock;

/// Re-fetchable source for records the buffer already evicted.
pub trait Backfill<T>: Send + Sync {
    /// Records at offsets `from..to`, in order.
    fn fetch(&self, from: u64, to: u64) -> Vec<T>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("output buffer is closed")]
pub struct BufferClosed;

/// Result of one read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBatch<T> {
    pub records: Vec<T>,
    /// Offset of `records[0]`. Greater than the requested offset only when
    /// records were evicted and no backfill could supply them.
    pub from: u64,
    /// Offset to pass to the next read.
    pub next_offset: u64,
    /// False once the buffer is closed and this batch reached its end.
    pub more_available: bool,
}

#[derive(Debug)]
struct State<T> {
    /// Offset of `records[0]`.
    base: u64,
    records: VecDeque<T>,
    capacity: usize,
    readers: HashMap<u64, u64>,
    next_reader_id: u64,
    closed: bool,
}

impl<T> State<T> {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }
}

pub struct OutputBuffer<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    backfill: Option<Arc<dyn Backfill<T>>>,
}

impl<T> std::fmt::Debug for OutputBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("OutputBuffer")
            .field("base", &state.base)
            .field("retained", &state.records.len())
            .field("readers", &state.readers.len())
            .field("closed", &state.closed)
            .field("backfill", &self.backfill.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> OutputBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    pub fn with_backfill(capacity: usize, backfill: Arc<dyn Backfill<T>>) -> Self {
        Self::build(capacity, Some(backfill))
    }

    fn build(capacity: usize, backfill: Option<Arc<dyn Backfill<T>>>) -> Self {
        Self {
            state: Mutex::new(State {
                base: 0,
                records: VecDeque::new(),
                capacity: capacity.max(1),
                readers: HashMap::new(),
                next_reader_id: 0,
                closed: false,
            }),
            notify: Notify::new(),
            backfill,
        }
    }

    /// Append a record; returns its offset.
    pub fn write(&self, record: T) -> Result<u64, BufferClosed> {
        let offset = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(BufferClosed);
            }
            let offset = state.end();
            state.records.push_back(record);
            self.evict(&mut state);
            offset
        };
        trace!(offset, "buffer write");
        self.notify.notify_waiters();
        Ok(offset)
    }

    /// Mark end-of-stream. Readers drain what is left and then finish.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            debug!(end = state.end(), "output buffer closed");
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Offset one past the last written record.
    pub fn end_offset(&self) -> u64 {
        lock(&self.state).end()
    }

    /// Records currently held in memory.
    pub fn retained(&self) -> usize {
        lock(&self.state).records.len()
    }

    /// Read everything from `offset` to the current end.
    pub fn read(&self, offset: u64) -> ReadBatch<T> {
        let (base, end, closed, retained) = {
            let state = lock(&self.state);
            let end = state.end();
            let start = offset.clamp(state.base, end);
            let skip = (start - state.base) as usize;
            let retained: Vec<T> = state.records.iter().skip(skip).cloned().collect();
            (state.base, end, state.closed, retained)
        };

        let offset = offset.min(end);
        let (from, mut records) = match (&self.backfill, offset < base) {
            (Some(backfill), true) => {
                let fetched = backfill.fetch(offset, base);
                if fetched.len() as u64 == base - offset {
                    (offset, fetched)
                } else {
                    debug!(offset, base, got = fetched.len(), "incomplete backfill");
                    (base, Vec::new())
                }
            }
            _ => (offset.max(base), Vec::new()),
        };
        records.extend(retained);

        ReadBatch {
            records,
            from,
            next_offset: end,
            more_available: !closed,
        }
    }

    /// Register a reader starting at `from`.
    pub fn subscribe(self: &Arc<Self>, from: u64, poll_interval: Duration) -> BufferReader<T> {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_reader_id;
            state.next_reader_id += 1;
            state.readers.insert(id, from);
            id
        };
        BufferReader {
            buffer: Arc::clone(self),
            id,
            offset: from,
            poll_interval,
            finished: false,
        }
    }

    fn advance_reader(&self, id: u64, offset: u64) {
        let mut state = lock(&self.state);
        if let Some(pos) = state.readers.get_mut(&id) {
            *pos = offset;
        }
        self.evict(&mut state);
    }

    fn drop_reader(&self, id: u64) {
        let mut state = lock(&self.state);
        state.readers.remove(&id);
        self.evict(&mut state);
    }

    fn evict(&self, state: &mut State<T>) {
        let end = state.end();
        let window_start = end.saturating_sub(state.capacity as u64);

        let consumed_by_all = state
            .readers
            .values()
            .min()
            .copied()
            .unwrap_or(window_start);
        let mut evict_to = consumed_by_all;
        if self.backfill.is_some() {
            evict_to = evict_to.max(window_start);
        }
        let evict_to = evict_to.min(end);

        if evict_to > state.base {
            let n = (evict_to - state.base) as usize;
            state.records.drain(..n);
            state.base = evict_to;
            trace!(base = state.base, "evicted buffer prefix");
        }
    }
}

/// Independent cursor over an [`OutputBuffer`].
///
/// Dropping the reader unregisters it, so it no longer holds back eviction.
pub struct BufferReader<T: Clone + Send + 'static> {
    buffer: Arc<OutputBuffer<T>>,
    id: u64,
    offset: u64,
    poll_interval: Duration,
    finished: bool,
}

impl<T: Clone + Send + 'static> BufferReader<T> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Non-blocking read of whatever is available now.
    pub fn try_next(&mut self) -> ReadBatch<T> {
        let batch = self.buffer.read(self.offset);
        self.commit(&batch);
        batch
    }

    /// Wait for the next non-empty batch, or the final batch of a closed
    /// buffer. Returns `None` once the end of the stream was delivered.
    ///
    /// While the writer is idle the reader sleeps until woken by a write or
    /// until `poll_interval` elapses, whichever comes first.
    pub async fn next_batch(&mut self) -> Option<ReadBatch<T>> {
        loop {
            if self.finished {
                return None;
            }

            let buffer = Arc::clone(&self.buffer);
            let notified = buffer.notify.notified();
            tokio::pin!(notified);
            // Register interest before reading so a write in between is not missed.
            notified.as_mut().enable();

            let batch = self.buffer.read(self.offset);
            if !batch.records.is_empty() || !batch.more_available {
                self.commit(&batch);
                return Some(batch);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn commit(&mut self, batch: &ReadBatch<T>) {
        self.offset = batch.next_offset;
        if !batch.more_available {
            self.finished = true;
        }
        self.buffer.advance_reader(self.id, self.offset);
    }
}

impl<T: Clone + Send + 'static> Drop for BufferReader<T> {
    fn drop(&mut self) {
        self.buffer.drop_reader(self.id);
    }
}
