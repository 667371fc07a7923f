// src/expand.rs

//! Per-target template expansion for step parameters.
//!
//! Templates look like `{{ .ID }}` or `{{ .rack }}`. Built-in fields are
//! `ID`, `FQDN`, `PrimaryIPv4` and `PrimaryIPv6`; any other name is looked
//! up in the target's attribute bag.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::target::Target;

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_\-]*)\s*\}\}").expect("template pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("target '{target}' has no field or attribute '{field}'")]
    UnknownField { target: String, field: String },

    #[error("target '{target}' has no value for '{field}'")]
    MissingValue { target: String, field: String },
}

/// Resolves templates against one target. Read-only over the target.
#[derive(Debug, Clone, Copy)]
pub struct ParamExpander<'a> {
    target: &'a Target,
}

impl<'a> ParamExpander<'a> {
    pub fn new(target: &'a Target) -> Self {
        Self { target }
    }

    fn lookup(&self, field: &str) -> Result<String, ExpandError> {
        let t = self.target;
        let missing = || ExpandError::MissingValue {
            target: t.id.clone(),
            field: field.to_string(),
        };
        match field {
            "ID" => Ok(t.id.clone()),
            "FQDN" => t.fqdn.clone().ok_or_else(missing),
            "PrimaryIPv4" => t.primary_ipv4.map(|ip| ip.to_string()).ok_or_else(missing),
            "PrimaryIPv6" => t.primary_ipv6.map(|ip| ip.to_string()).ok_or_else(missing),
            other => t
                .attributes
                .get(other)
                .cloned()
                .ok_or_else(|| ExpandError::UnknownField {
                    target: t.id.clone(),
                    field: other.to_string(),
                }),
        }
    }

    /// Expand every template occurrence in `input`.
    pub fn expand<'s>(&self, input: &'s str) -> Result<Cow<'s, str>, ExpandError> {
        if !TEMPLATE.is_match(input) {
            return Ok(Cow::Borrowed(input));
        }

        let mut first_err = None;
        let out = TEMPLATE.replace_all(input, |caps: &Captures<'_>| {
            match self.lookup(&caps[1]) {
                Ok(v) => v,
                Err(e) => {
                    first_err.get_or_insert(e);
                    String::new()
                }
            }
        });

        match first_err {
            Some(e) => Err(e),
            None => Ok(Cow::Owned(out.into_owned())),
        }
    }

    /// Expand every string inside a JSON document (keys are left alone).
    pub fn expand_value(&self, value: &Value) -> Result<Value, ExpandError> {
        Ok(match value {
            Value::String(s) => Value::String(self.expand(s)?.into_owned()),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.expand_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.expand_value(v)?)))
                    .collect::<Result<_, ExpandError>>()?,
            ),
            other => other.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::new("dut-7")
            .with_fqdn("dut-7.lab.example")
            .with_attribute("rack", "r12")
    }

    #[test]
    fn expands_builtin_and_attribute_fields() {
        let t = target();
        let pe = ParamExpander::new(&t);
        assert_eq!(
            pe.expand("ssh {{ .FQDN }} in {{.rack}} ({{ .ID }})").unwrap(),
            "ssh dut-7.lab.example in r12 (dut-7)"
        );
    }

    #[test]
    fn plain_strings_are_borrowed() {
        let t = target();
        assert!(matches!(
            ParamExpander::new(&t).expand("no templates").unwrap(),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn unknown_and_missing_fields_fail() {
        let t = target();
        let pe = ParamExpander::new(&t);
        assert!(matches!(
            pe.expand("{{ .nope }}"),
            Err(ExpandError::UnknownField { .. })
        ));
        assert!(matches!(
            pe.expand("{{ .PrimaryIPv4 }}"),
            Err(ExpandError::MissingValue { .. })
        ));
    }

    #[test]
    fn expands_nested_json() {
        let t = target();
        let v = json!({ "host": "{{ .FQDN }}", "args": ["-n", "{{ .ID }}"], "port": 22 });
        let out = ParamExpander::new(&t).expand_value(&v).unwrap();
        assert_eq!(
            out,
            json!({ "host": "dut-7.lab.example", "args": ["-n", "dut-7"], "port": 22 })
        );
    }
}
