// src/exec/context.rs

//! Cooperative cancellation, pause and deadline propagation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why a context stopped useful work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Explicit cancellation (job cancel, or runner shutdown).
    Cancelled,
    /// The deadline attached to this context elapsed.
    TimedOut,
}

/// Handle passed by reference into every operation that can block.
///
/// Cloning is cheap; clones share the same signals. Derived contexts
/// ([`StepContext::with_timeout`]) get a child cancellation token, so
/// cancelling a parent reaches every descendant but not the other way round.
///
/// Pause is a separate, softer signal: resumable steps watch it and return
/// their resume state, everything else ignores it and runs to completion.
#[derive(Debug, Clone)]
pub struct StepContext {
    cancel: CancellationToken,
    pause: CancellationToken,
    deadline: Option<Instant>,
    step_timeout: Duration,
    max_parallel: usize,
}

impl StepContext {
    pub fn new(step_timeout: Duration, max_parallel: usize) -> Self {
        Self::from_tokens(
            CancellationToken::new(),
            CancellationToken::new(),
            step_timeout,
            max_parallel,
        )
    }

    /// Build a context on top of externally owned job-level tokens.
    pub fn from_tokens(
        cancel: CancellationToken,
        pause: CancellationToken,
        step_timeout: Duration,
        max_parallel: usize,
    ) -> Self {
        Self {
            cancel,
            pause,
            deadline: None,
            step_timeout,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Per-target timeout the target runner applies for this step.
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Maximum concurrent per-target invocations for this step.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Same signals, different per-target timeout.
    pub fn with_step_timeout(&self, step_timeout: Duration) -> Self {
        Self {
            step_timeout,
            ..self.clone()
        }
    }

    /// Derive a child context that additionally expires after `timeout`.
    ///
    /// The child's deadline never extends past the parent's. A timeout too
    /// large to express as an instant leaves the parent's deadline in place.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, None) => existing,
            (None, candidate) => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            pause: self.pause.clone(),
            deadline,
            step_timeout: self.step_timeout,
            max_parallel: self.max_parallel,
        }
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether either signal has already fired.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Resolves once a pause is requested.
    pub async fn paused(&self) {
        self.pause.cancelled().await
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                _ = sleep_until(deadline) => Interrupt::TimedOut,
            },
            None => {
                self.cancel.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Drive `fut` unless the context finishes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            interrupt = self.done() => Err(interrupt),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = StepContext::new(Duration::from_secs(5), 4);
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.done().await, Interrupt::Cancelled);
    }

    #[tokio::test]
    async fn child_cancel_does_not_reach_parent() {
        let parent = StepContext::new(Duration::from_secs(5), 4);
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_work() {
        let ctx = StepContext::new(Duration::from_secs(5), 4).with_timeout(Duration::from_millis(50));
        let res = ctx.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(res, Err(Interrupt::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_is_capped_by_parent() {
        let parent = StepContext::new(Duration::from_secs(5), 4).with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_keeps_parent_deadline() {
        let unbounded = StepContext::new(Duration::from_secs(5), 4).with_timeout(Duration::MAX);
        assert_eq!(unbounded.deadline(), None);
        assert!(!unbounded.is_done());

        let parent = StepContext::new(Duration::from_secs(5), 4).with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn parallelism_is_at_least_one() {
        assert_eq!(StepContext::new(Duration::from_secs(1), 0).max_parallel(), 1);
    }
}
