// src/exec/mod.rs

//! Execution primitives shared by the engine and by step implementations.
//!
//! - [`context`] defines [`StepContext`], the cancellation/pause/deadline
//!   handle threaded through every blocking call.
//! - [`runner`] is the per-target fan-out primitive ([`for_each_target`]).

pub mod context;
pub mod runner;

pub use context::{Interrupt, StepContext};
pub use runner::{TargetError, TargetResults, for_each_target};
