// src/descriptor/mod.rs

//! Job descriptors.
//!
//! Responsibilities:
//! - Normalize JSON or YAML bytes into one canonical JSON document (`parse.rs`).
//! - Define the typed descriptor and its structural checks (`model.rs`).
//!
//! Registry lookups and per-step parameter validation happen later, when the
//! engine builds the pipeline.

pub mod model;
pub mod parse;

pub use model::{JobDescriptor, ReporterSpec, StepSpec, TargetManagerSpec};
pub use parse::{normalize, parse};
