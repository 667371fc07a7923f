// src/report/noop.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::FinalStatus;
use crate::errors::Result;
use crate::report::{ReportOutcome, Reporter};

pub const NAME: &str = "noop";

#[derive(Debug, Default)]
pub struct NoopReporter;

#[async_trait]
impl Reporter for NoopReporter {
    fn validate_parameters(&self, _parameters: &Value) -> Result<()> {
        Ok(())
    }

    async fn report(&self, status: &FinalStatus, _parameters: &Value) -> Result<ReportOutcome> {
        Ok(ReportOutcome::new(true, format!("job {} {}", status.job_id, status.state)))
    }
}
