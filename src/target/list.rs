// src/target/list.rs

//! `target_list`: targets given inline in the job descriptor.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{DutrunError, Result};
use crate::target::{Target, TargetManager, ensure_unique_ids};
use crate::types::JobId;

pub const NAME: &str = "target_list";

#[derive(Debug, Deserialize)]
struct Params {
    targets: Vec<Target>,
}

/// Static list of targets embedded in the acquire parameters:
///
/// ```json
/// { "targets": [ { "id": "dut-1", "fqdn": "dut-1.lab" } ] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TargetList;

impl TargetList {
    fn parse(parameters: &Value) -> Result<Vec<Target>> {
        let params: Params = serde_json::from_value(parameters.clone()).map_err(|e| {
            DutrunError::InvalidDescriptor(format!("{NAME} parameters: {e}"))
        })?;
        if params.targets.is_empty() {
            return Err(DutrunError::InvalidDescriptor(format!(
                "{NAME}: 'targets' must not be empty"
            )));
        }
        ensure_unique_ids(&params.targets)
            .map_err(|e| DutrunError::InvalidDescriptor(format!("{NAME}: {e}")))?;
        Ok(params.targets)
    }
}

#[async_trait]
impl TargetManager for TargetList {
    fn validate_parameters(&self, parameters: &Value) -> Result<()> {
        Self::parse(parameters).map(|_| ())
    }

    async fn acquire(&self, job_id: JobId, parameters: &Value) -> Result<Vec<Target>> {
        let targets = Self::parse(parameters)
            .map_err(|e| DutrunError::TargetAcquisition(e.to_string()))?;
        debug!(%job_id, count = targets.len(), "acquired targets from inline list");
        Ok(targets)
    }
}
