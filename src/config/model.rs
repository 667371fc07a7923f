// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// default_step_timeout = "10m"
/// max_parallel_targets = 64
/// status_poll_interval = "1s"
/// buffer_capacity = 4096
/// ```
///
/// All sections and keys are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
}

/// `[engine]` section, as written by the user (durations still strings).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Per-target timeout applied when a pipeline step sets none.
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout: String,

    /// Upper bound on concurrent per-target invocations within one step.
    #[serde(default = "default_max_parallel_targets")]
    pub max_parallel_targets: usize,

    /// How long an idle status stream waits before polling again.
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval: String,

    /// Number of records each job's output buffer keeps in memory.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_step_timeout() -> String {
    "10m".to_string()
}

fn default_max_parallel_targets() -> usize {
    64
}

fn default_status_poll_interval() -> String {
    "1s".to_string()
}

fn default_buffer_capacity() -> usize {
    4096
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            default_step_timeout: default_step_timeout(),
            max_parallel_targets: default_max_parallel_targets(),
            status_poll_interval: default_status_poll_interval(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineOptions,
}

/// Runtime form of `[engine]` handed to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub default_step_timeout: Duration,
    pub max_parallel_targets: usize,
    pub status_poll_interval: Duration,
    pub buffer_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(600),
            max_parallel_targets: default_max_parallel_targets(),
            status_poll_interval: Duration::from_secs(1),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}
