// src/report/target_success.rs

//! `target_success`: pass when enough targets completed the pipeline.
//!
//! `success_expression` is a comparison against the number of completed
//! targets, or against their percentage when it ends in `%`:
//! `">=80%"`, `">2"`, `"=100%"`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::engine::{FinalStatus, TargetState};
use crate::errors::{DutrunError, Result};
use crate::report::{ReportOutcome, Reporter};

pub const NAME: &str = "target_success";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessExpression {
    op: Op,
    value: f64,
    percent: bool,
}

impl SuccessExpression {
    /// Evaluate against `completed` out of `total` targets.
    pub fn holds(&self, completed: usize, total: usize) -> bool {
        let actual = if self.percent {
            if total == 0 {
                0.0
            } else {
                completed as f64 * 100.0 / total as f64
            }
        } else {
            completed as f64
        };
        match self.op {
            Op::Ge => actual >= self.value,
            Op::Gt => actual > self.value,
            Op::Le => actual <= self.value,
            Op::Lt => actual < self.value,
            Op::Eq => (actual - self.value).abs() < f64::EPSILON,
        }
    }
}

impl FromStr for SuccessExpression {
    type Err = DutrunError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            DutrunError::InvalidDescriptor(format!(
                "{NAME}: invalid success_expression '{s}': {reason}"
            ))
        };

        let s = s.trim();
        let (op, rest) = [
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("==", Op::Eq),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
        ]
        .into_iter()
        .find_map(|(tok, op)| s.strip_prefix(tok).map(|rest| (op, rest)))
        .ok_or_else(|| invalid("expected a comparison operator"))?;

        let rest = rest.trim();
        let (number, percent) = match rest.strip_suffix('%') {
            Some(n) => (n.trim(), true),
            None => (rest, false),
        };
        let value: f64 = number.parse().map_err(|_| invalid("expected a number"))?;
        if !value.is_finite() || value < 0.0 || (percent && value > 100.0) {
            return Err(invalid("out of range"));
        }

        Ok(Self { op, value, percent })
    }
}

impl fmt::Display for SuccessExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Ge => ">=",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Lt => "<",
            Op::Eq => "=",
        };
        write!(f, "{op}{}{}", self.value, if self.percent { "%" } else { "" })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    success_expression: String,
}

fn parse_params(parameters: &Value) -> Result<SuccessExpression> {
    let p: Params = serde_json::from_value(parameters.clone())
        .map_err(|e| DutrunError::InvalidDescriptor(format!("{NAME} parameters: {e}")))?;
    p.success_expression.parse()
}

#[derive(Debug, Default)]
pub struct TargetSuccessReporter;

#[async_trait]
impl Reporter for TargetSuccessReporter {
    fn validate_parameters(&self, parameters: &Value) -> Result<()> {
        parse_params(parameters).map(|_| ())
    }

    async fn report(&self, status: &FinalStatus, parameters: &Value) -> Result<ReportOutcome> {
        let expr = parse_params(parameters)?;
        let total = status.targets.len();
        let completed = status.count(TargetState::Completed);
        let success = expr.holds(completed, total);

        Ok(ReportOutcome {
            success,
            message: format!(
                "{completed}/{total} targets completed; expected {expr}: {}",
                if success { "pass" } else { "fail" }
            ),
            data: json!({ "completed": completed, "total": total }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_expressions() {
        let e: SuccessExpression = ">=80%".parse().unwrap();
        assert!(e.holds(4, 5));
        assert!(!e.holds(3, 5));

        let e: SuccessExpression = "> 2".parse().unwrap();
        assert!(e.holds(3, 10));
        assert!(!e.holds(2, 10));

        let e: SuccessExpression = "=100%".parse().unwrap();
        assert!(e.holds(3, 3));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["80%", ">=x", ">=120%", "", ">=NaN", "<NaN%", ">inf", "=infinity"] {
            assert!(bad.parse::<SuccessExpression>().is_err(), "{bad}");
        }
    }

    #[test]
    fn empty_fleet_is_zero_percent() {
        let e: SuccessExpression = ">0%".parse().unwrap();
        assert!(!e.holds(0, 0));
    }
}
