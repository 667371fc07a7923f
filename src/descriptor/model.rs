// src/descriptor/model.rs

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DutrunError, Result};
use crate::target;
use crate::util::parse_duration;

/// Canonical job descriptor.
///
/// ```yaml
/// job_name: bios-smoke
/// target_manager:
///   name: target_list
///   parameters:
///     targets: [{ id: dut-1, fqdn: dut-1.lab }]
/// steps:
///   - name: cmd
///     label: version
///     timeout: 30s
///     parameters: { executable: dmidecode, args: ["-s", "bios-version"] }
/// reporters:
///   - name: target_success
///     parameters: { success_expression: ">=80%" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    pub job_name: String,
    #[serde(default)]
    pub target_manager: TargetManagerSpec,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub reporters: Vec<ReporterSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetManagerSpec {
    #[serde(default = "default_target_manager")]
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

fn default_target_manager() -> String {
    target::list::NAME.to_string()
}

impl Default for TargetManagerSpec {
    fn default() -> Self {
        Self {
            name: default_target_manager(),
            parameters: Value::Null,
        }
    }
}

/// One pipeline position as written in the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    /// Display name, unique within the pipeline. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    /// Failures are recorded but do not remove targets from the pipeline.
    #[serde(default)]
    pub report_only: bool,
    /// Per-target timeout, e.g. `"30s"`. Engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl StepSpec {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        let Some(raw) = &self.timeout else {
            return Ok(None);
        };
        let d = parse_duration(raw).map_err(|e| {
            DutrunError::InvalidDescriptor(format!("step '{}': timeout: {e}", self.label()))
        })?;
        if d.is_zero() {
            return Err(DutrunError::InvalidDescriptor(format!(
                "step '{}': timeout must be greater than zero",
                self.label()
            )));
        }
        Ok(Some(d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReporterSpec {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl JobDescriptor {
    /// Structural checks that need no registry.
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(DutrunError::InvalidDescriptor(
                "job_name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(DutrunError::InvalidDescriptor(
                "pipeline has no steps".to_string(),
            ));
        }

        let mut labels = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(DutrunError::InvalidDescriptor(format!(
                    "step #{index} has an empty name"
                )));
            }
            if !labels.insert(step.label()) {
                return Err(DutrunError::InvalidDescriptor(format!(
                    "duplicate step label '{}'",
                    step.label()
                )));
            }
            step.timeout()?;
        }

        for reporter in &self.reporters {
            if reporter.name.trim().is_empty() {
                return Err(DutrunError::InvalidDescriptor(
                    "reporter with empty name".to_string(),
                ));
            }
        }

        Ok(())
    }
}
