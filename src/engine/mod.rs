// src/engine/mod.rs

//! Job execution engine.
//!
//! Split in two layers:
//! - a pure core: [`JobRecord`] (`job.rs`) owns lifecycle state, per-target
//!   status and the pipeline cursor, and decides what each step's results
//!   mean for the job;
//! - an async shell: `pipeline.rs` runs steps as barriers and feeds results
//!   into the core, while [`Orchestrator`] owns the job table, spawns one
//!   task per job and serves control requests.

mod handle;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod status;

pub use job::{JobRecord, PipelineCursor, PipelineStep, StepVerdict};
pub use orchestrator::Orchestrator;
pub use pipeline::build_pipeline;
pub use status::{FinalStatus, JobStatus, StepFailure, TargetState, TargetStatus};
