// src/exec/runner.rs

//! Per-target fan-out.
//!
//! [`for_each_target`] runs one invocation per target, concurrently, each in
//! its own Tokio task under a derived [`StepContext`] carrying the step's
//! timeout. One invocation failing, timing out or panicking never affects its
//! siblings; the outcome is recorded against that target only.

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::DutrunError;
use crate::exec::context::{Interrupt, StepContext};
use crate::target::{Target, TargetId};

/// Why a single target's invocation did not succeed.
///
/// Interruptions (`Cancelled`, `TimedOut`, `Paused`) are kept apart from
/// failures the invocation produced on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TargetError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    TimedOut,

    #[error("paused before completion")]
    Paused,

    #[error("panicked: {0}")]
    Panicked(String),

    /// Defect in the step implementation, e.g. emitting an undeclared event.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TargetError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        TargetError::Failed(msg.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TargetError::Failed(_) => "failed",
            TargetError::Cancelled => "cancelled",
            TargetError::TimedOut => "timed_out",
            TargetError::Paused => "paused",
            TargetError::Panicked(_) => "panicked",
            TargetError::Internal(_) => "internal",
        }
    }

    /// "Was stopped" rather than "failed on its own".
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            TargetError::Cancelled | TargetError::TimedOut | TargetError::Paused
        )
    }
}

impl From<Interrupt> for TargetError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Cancelled => TargetError::Cancelled,
            Interrupt::TimedOut => TargetError::TimedOut,
        }
    }
}

impl From<DutrunError> for TargetError {
    fn from(e: DutrunError) -> Self {
        match e {
            DutrunError::UndeclaredEvent { .. } => TargetError::Internal(e.to_string()),
            other => TargetError::Failed(other.to_string()),
        }
    }
}

/// Outcome of one fan-out, addressed by target id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetResults {
    results: BTreeMap<TargetId, Result<(), TargetError>>,
}

impl TargetResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: TargetId, outcome: Result<(), TargetError>) {
        self.results.insert(target, outcome);
    }

    pub fn get(&self, target: &str) -> Option<&Result<(), TargetError>> {
        self.results.get(target)
    }

    pub fn remove(&mut self, target: &str) -> Option<Result<(), TargetError>> {
        self.results.remove(target)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, TargetId, Result<(), TargetError>> {
        self.results.iter()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TargetId, &TargetError)> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)))
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TargetId> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.is_ok().then_some(id))
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    /// Merge another result set in; entries in `other` win.
    pub fn extend(&mut self, other: TargetResults) {
        self.results.extend(other.results);
    }
}

impl IntoIterator for TargetResults {
    type Item = (TargetId, Result<(), TargetError>);
    type IntoIter = btree_map::IntoIter<TargetId, Result<(), TargetError>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl FromIterator<(TargetId, Result<(), TargetError>)> for TargetResults {
    fn from_iter<I: IntoIterator<Item = (TargetId, Result<(), TargetError>)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

/// Run `f` once per target, concurrently, and collect per-target outcomes.
///
/// - Each invocation gets a child of `ctx` bounded by `ctx.step_timeout()`.
/// - At most `ctx.max_parallel()` invocations run at once.
/// - A panic inside `f` becomes [`TargetError::Panicked`] for that target.
/// - If `ctx` is cancelled, every invocation still pending is aborted and
///   recorded as [`TargetError::Cancelled`]; the call then returns promptly.
///
/// Duplicate target ids are invoked once.
pub async fn for_each_target<F, Fut>(
    ctx: &StepContext,
    targets: &[Arc<Target>],
    f: F,
) -> TargetResults
where
    F: Fn(StepContext, Arc<Target>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TargetError>> + Send + 'static,
{
    let f = Arc::new(f);
    let limit = Arc::new(Semaphore::new(ctx.max_parallel()));
    let timeout = ctx.step_timeout();

    let mut results = TargetResults::new();
    let mut set = JoinSet::new();
    let mut aborts = Vec::with_capacity(targets.len());
    let mut launched: Vec<TargetId> = Vec::with_capacity(targets.len());

    for target in targets {
        if launched.contains(&target.id) {
            warn!(target_id = %target.id, "duplicate target in fan-out; invoking once");
            continue;
        }
        launched.push(target.id.clone());

        let id = target.id.clone();
        let inner = tokio::spawn(invoke(
            ctx.clone(),
            Arc::clone(target),
            Arc::clone(&f),
            Arc::clone(&limit),
            timeout,
        ));
        aborts.push(inner.abort_handle());

        set.spawn(async move {
            let outcome = match inner.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    Err(TargetError::Panicked(panic_message(e.into_panic())))
                }
                Err(_) => Err(TargetError::Cancelled),
            };
            (id, outcome)
        });
    }

    debug!(targets = launched.len(), limit = ctx.max_parallel(), "fan-out started");

    loop {
        tokio::select! {
            biased;
            joined = set.join_next() => match joined {
                Some(Ok((id, outcome))) => {
                    record(&mut results, id, outcome);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "fan-out bookkeeping task failed");
                }
                None => break,
            },
            _ = ctx.cancelled() => {
                info!(pending = set.len(), "fan-out cancelled; aborting pending invocations");
                for handle in &aborts {
                    handle.abort();
                }
                // Every inner task is aborted, so the wrappers resolve at once.
                while let Some(joined) = set.join_next().await {
                    if let Ok((id, outcome)) = joined {
                        record(&mut results, id, outcome);
                    }
                }
                break;
            }
        }
    }

    for id in launched {
        if results.get(&id).is_none() {
            results.insert(
                id,
                Err(TargetError::Internal(
                    "invocation finished without a result".to_string(),
                )),
            );
        }
    }

    results
}

async fn invoke<F, Fut>(
    ctx: StepContext,
    target: Arc<Target>,
    f: Arc<F>,
    limit: Arc<Semaphore>,
    timeout: Duration,
) -> Result<(), TargetError>
where
    F: Fn(StepContext, Arc<Target>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TargetError>> + Send + 'static,
{
    let _permit = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(TargetError::Cancelled),
        permit = limit.acquire_owned() => permit
            .map_err(|_| TargetError::Internal("concurrency limiter closed".to_string()))?,
    };

    let child = ctx.with_timeout(timeout);
    debug!(target_id = %target.id, ?timeout, "invoking target");

    match child.run(f(child.clone(), target)).await {
        Ok(outcome) => outcome,
        Err(interrupt) => Err(interrupt.into()),
    }
}

fn record(results: &mut TargetResults, id: TargetId, outcome: Result<(), TargetError>) {
    match &outcome {
        Ok(()) => debug!(target_id = %id, "target invocation succeeded"),
        Err(e) if e.is_interruption() => {
            info!(target_id = %id, kind = e.kind(), "target invocation interrupted")
        }
        Err(e) => warn!(target_id = %id, kind = e.kind(), error = %e, "target invocation failed"),
    }
    results.insert(id, outcome);
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
