// src/step/params.rs

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{DutrunError, Result};

/// Raw step parameters from the job descriptor.
///
/// Always a JSON object (an absent `parameters` key is the empty object).
/// Steps decode them into their own typed struct with [`decode`](Self::decode).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StepParameters(Map<String, Value>);

impl StepParameters {
    pub fn from_value(step: &str, value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            other => Err(DutrunError::InvalidStepParameters {
                step: step.to_string(),
                reason: format!("expected an object, got {other}"),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Deserialize into a step-specific type.
    pub fn decode<T: DeserializeOwned>(&self, step: &str) -> Result<T> {
        serde_json::from_value(self.to_value()).map_err(|e| DutrunError::InvalidStepParameters {
            step: step.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<Map<String, Value>> for StepParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sleep {
        duration: String,
    }

    #[test]
    fn null_is_empty() {
        assert!(StepParameters::from_value("x", Value::Null).unwrap().is_empty());
    }

    #[test]
    fn non_objects_are_rejected() {
        let err = StepParameters::from_value("x", json!([1, 2])).unwrap_err();
        assert!(matches!(err, DutrunError::InvalidStepParameters { .. }));
    }

    #[test]
    fn decode_reports_step_name() {
        let p = StepParameters::from_value("sleep", json!({ "duration": "1s" })).unwrap();
        assert_eq!(p.decode::<Sleep>("sleep").unwrap().duration, "1s");

        let bad = StepParameters::from_value("sleep", json!({})).unwrap();
        match bad.decode::<Sleep>("sleep") {
            Err(DutrunError::InvalidStepParameters { step, .. }) => assert_eq!(step, "sleep"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
