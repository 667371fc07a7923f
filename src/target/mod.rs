// src/target/mod.rs

//! Devices under test and how a job gets hold of them.
//!
//! - [`Target`] is the read-only description of one device.
//! - [`TargetManager`] is the acquisition interface consumed by the engine.
//! - [`list`] and [`file`] are the built-in managers.

pub mod file;
pub mod list;

use std::collections::{BTreeMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DutrunError, Result};
use crate::types::JobId;

pub use file::TargetFile;
pub use list::TargetList;

/// Canonical target identifier type used throughout the engine.
pub type TargetId = String;

/// A device or remote endpoint that test steps run against.
///
/// Targets are shared as `Arc<Target>` for the duration of a job and never
/// mutated by steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ipv6: Option<Ipv6Addr>,
    /// Free-form key/value bag available to parameter templates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Target {
    pub fn new(id: impl Into<TargetId>) -> Self {
        Self {
            id: id.into(),
            fqdn: None,
            primary_ipv4: None,
            primary_ipv6: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = Some(fqdn.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Acquisition interface for targets.
///
/// Releases are implicit when the job ends; a manager that tracks leases
/// does so on its own.
#[async_trait]
pub trait TargetManager: Send + Sync {
    /// Check acquisition parameters at submission time.
    fn validate_parameters(&self, parameters: &Value) -> Result<()>;

    /// Resolve the targets for `job_id` from the given selection criteria.
    async fn acquire(&self, job_id: JobId, parameters: &Value) -> Result<Vec<Target>>;
}

/// Reject target sets that would make per-target bookkeeping ambiguous.
pub(crate) fn ensure_unique_ids(targets: &[Target]) -> Result<()> {
    let mut seen = HashSet::new();
    for t in targets {
        if t.id.trim().is_empty() {
            return Err(DutrunError::TargetAcquisition(
                "target with empty id".to_string(),
            ));
        }
        if !seen.insert(t.id.as_str()) {
            return Err(DutrunError::TargetAcquisition(format!(
                "duplicate target id '{}'",
                t.id
            )));
        }
    }
    Ok(())
}
