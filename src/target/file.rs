// src/target/file.rs

//! `target_file`: targets read from a JSON inventory file at acquire time.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{DutrunError, Result};
use crate::target::{Target, TargetManager, ensure_unique_ids};
use crate::types::JobId;

pub const NAME: &str = "target_file";

/// Acquire parameters:
///
/// ```json
/// { "path": "inventory.json", "min_targets": 1, "max_targets": 8,
///   "host_prefixes": ["dut-", "lab-"] }
/// ```
#[derive(Debug, Clone, Deserialize)]
struct Params {
    path: PathBuf,
    #[serde(default)]
    min_targets: Option<usize>,
    #[serde(default)]
    max_targets: Option<usize>,
    #[serde(default)]
    host_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetFile;

impl TargetFile {
    fn params(parameters: &Value) -> Result<Params> {
        let params: Params = serde_json::from_value(parameters.clone()).map_err(|e| {
            DutrunError::InvalidDescriptor(format!("{NAME} parameters: {e}"))
        })?;
        if let (Some(min), Some(max)) = (params.min_targets, params.max_targets) {
            if min > max {
                return Err(DutrunError::InvalidDescriptor(format!(
                    "{NAME}: min_targets ({min}) > max_targets ({max})"
                )));
            }
        }
        if params.max_targets == Some(0) {
            return Err(DutrunError::InvalidDescriptor(format!(
                "{NAME}: max_targets must be >= 1"
            )));
        }
        Ok(params)
    }
}

fn matches_prefix(target: &Target, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    prefixes.iter().any(|p| {
        target.id.starts_with(p.as_str())
            || target.fqdn.as_deref().is_some_and(|f| f.starts_with(p.as_str()))
    })
}

#[async_trait]
impl TargetManager for TargetFile {
    fn validate_parameters(&self, parameters: &Value) -> Result<()> {
        Self::params(parameters).map(|_| ())
    }

    async fn acquire(&self, job_id: JobId, parameters: &Value) -> Result<Vec<Target>> {
        let params = Self::params(parameters)
            .map_err(|e| DutrunError::TargetAcquisition(e.to_string()))?;

        let contents = tokio::fs::read_to_string(&params.path).await.map_err(|e| {
            DutrunError::TargetAcquisition(format!(
                "reading inventory {}: {e}",
                params.path.display()
            ))
        })?;
        let all: Vec<Target> = serde_json::from_str(&contents).map_err(|e| {
            DutrunError::TargetAcquisition(format!(
                "parsing inventory {}: {e}",
                params.path.display()
            ))
        })?;
        ensure_unique_ids(&all)?;

        let mut selected: Vec<Target> = all
            .into_iter()
            .filter(|t| matches_prefix(t, &params.host_prefixes))
            .collect();
        if let Some(max) = params.max_targets {
            selected.truncate(max);
        }

        let min = params.min_targets.unwrap_or(1);
        if selected.len() < min {
            return Err(DutrunError::TargetAcquisition(format!(
                "{NAME}: only {} matching targets in {}, need at least {min}",
                selected.len(),
                params.path.display()
            )));
        }

        debug!(%job_id, path = %params.path.display(), "inventory read");
        info!(%job_id, count = selected.len(), "acquired targets from inventory file");
        Ok(selected)
    }
}
