// src/descriptor/parse.rs

use serde_json::Value;
use tracing::debug;

use crate::descriptor::JobDescriptor;
use crate::errors::{DutrunError, Result};
use crate::types::DescriptorFormat;

/// Decode `bytes` in `format` into the canonical JSON document.
///
/// YAML and JSON inputs describing the same job yield equal values.
pub fn normalize(bytes: &[u8], format: DescriptorFormat) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DutrunError::InvalidDescriptor("descriptor is empty".to_string()));
    }

    let value: Value = match format {
        DescriptorFormat::Json => serde_json::from_slice(bytes)?,
        DescriptorFormat::Yaml => serde_yaml::from_slice(bytes)?,
    };

    if !value.is_object() {
        return Err(DutrunError::InvalidDescriptor(
            "descriptor must be a mapping at the top level".to_string(),
        ));
    }

    debug!(%format, "descriptor normalized");
    Ok(value)
}

/// Normalize, decode and structurally validate a descriptor.
pub fn parse(bytes: &[u8], format: DescriptorFormat) -> Result<JobDescriptor> {
    let canonical = normalize(bytes, format)?;
    let descriptor: JobDescriptor = serde_json::from_value(canonical)
        .map_err(|e| DutrunError::InvalidDescriptor(e.to_string()))?;
    descriptor.validate()?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "job_name": "smoke",
        "target_manager": { "name": "target_list", "parameters": { "targets": [ { "id": "a" } ] } },
        "steps": [ { "name": "echo", "parameters": { "text": "hi {{ .ID }}" }, "report_only": true } ]
    }"#;

    const YAML: &str = r#"
job_name: smoke
target_manager:
  name: target_list
  parameters:
    targets:
      - id: a
steps:
  - name: echo
    parameters:
      text: "hi {{ .ID }}"
    report_only: true
"#;

    #[test]
    fn json_and_yaml_normalize_to_the_same_document() {
        let a = normalize(JSON.as_bytes(), DescriptorFormat::Json).unwrap();
        let b = normalize(YAML.as_bytes(), DescriptorFormat::Yaml).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_typed_descriptor() {
        let d = parse(YAML.as_bytes(), DescriptorFormat::Yaml).unwrap();
        assert_eq!(d.job_name, "smoke");
        assert!(d.steps[0].report_only);
    }

    #[test]
    fn empty_and_scalar_documents_are_rejected() {
        assert!(matches!(
            normalize(b"  \n", DescriptorFormat::Json),
            Err(DutrunError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            normalize(b"42", DescriptorFormat::Yaml),
            Err(DutrunError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let bad = br#"{ "job_name": "x", "steps": [ { "name": "echo" } ], "extra": 1 }"#;
        assert!(matches!(
            parse(bad, DescriptorFormat::Json),
            Err(DutrunError::InvalidDescriptor(_))
        ));
    }
}
