#![allow(dead_code)]

use dutrun::descriptor::JobDescriptor;
use serde_json::{Map, Value, json};

/// Builder for job descriptors over a `target_list` fleet.
pub struct DescriptorBuilder {
    job_name: String,
    targets: Vec<Value>,
    steps: Vec<Value>,
    reporters: Vec<Value>,
}

impl DescriptorBuilder {
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            targets: vec![],
            steps: vec![],
            reporters: vec![],
        }
    }

    pub fn target(mut self, id: &str) -> Self {
        self.targets.push(json!({ "id": id }));
        self
    }

    pub fn targets(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.targets.push(json!({ "id": id }));
        }
        self
    }

    /// Add a target with attributes, e.g. `{"id": "a", "attributes": {...}}`.
    pub fn target_value(mut self, target: Value) -> Self {
        self.targets.push(target);
        self
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.steps.push(step.build());
        self
    }

    pub fn reporter(mut self, name: &str, parameters: Value) -> Self {
        self.reporters
            .push(json!({ "name": name, "parameters": parameters }));
        self
    }

    pub fn build_value(self) -> Value {
        json!({
            "job_name": self.job_name,
            "target_manager": {
                "name": "target_list",
                "parameters": { "targets": self.targets },
            },
            "steps": self.steps,
            "reporters": self.reporters,
        })
    }

    /// Descriptor as JSON bytes, ready for `Api::start_job`.
    pub fn to_json(self) -> Vec<u8> {
        serde_json::to_vec(&self.build_value()).expect("descriptor serializes")
    }

    pub fn build(self) -> JobDescriptor {
        serde_json::from_value(self.build_value()).expect("Failed to build valid descriptor from builder")
    }
}

/// Builder for one pipeline step.
pub struct StepBuilder {
    name: String,
    label: Option<String>,
    parameters: Map<String, Value>,
    report_only: bool,
    timeout: Option<String>,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            parameters: Map::new(),
            report_only: false,
            timeout: None,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn report_only(mut self, val: bool) -> Self {
        self.report_only = val;
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.timeout = Some(duration.to_string());
        self
    }

    pub fn build(self) -> Value {
        let mut step = json!({
            "name": self.name,
            "parameters": Value::Object(self.parameters),
            "report_only": self.report_only,
        });
        if let Some(label) = self.label {
            step["label"] = json!(label);
        }
        if let Some(timeout) = self.timeout {
            step["timeout"] = json!(timeout);
        }
        step
    }
}
