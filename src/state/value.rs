use crate::sdk::SdkSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A feature definition as carried in SDK payloads and cookie-encoded
/// overrides: a default value plus optional targeting rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    pub default_value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<FeatureRule>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

/// An experiment as reported by the SDK instance. Only the key is required;
/// everything else the SDK attaches rides along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub key: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("invalid value for property `{property}`: {reason}")]
    Invalid { property: String, reason: String },
}

/// A validated state value.
///
/// State travels over the wire as raw JSON; at the store boundary known
/// property names are checked against the shape they are expected to carry.
/// Unknown properties fall through to `Json` untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// Feature definitions keyed by feature id (`features`).
    Features(BTreeMap<String, FeatureDefinition>),
    /// Developer overrides forcing features to fixed values (`forcedFeatures`).
    ForcedFeatures(Map<String, Value>),
    /// Experiment list (`experiments`).
    Experiments(Vec<Experiment>),
    /// Developer overrides forcing experiment variations (`forcedVariations`).
    ForcedVariations(Map<String, Value>),
    /// User attribute map (`attributes`, `attributeOverrides`).
    Attributes(Map<String, Value>),
    /// Event/log stream (`logEvents`). Append-mode writes extend this.
    LogEvents(Vec<Value>),
    /// Plain string properties (`url`, `apiHost`, `apiKey`, `orgId`).
    Text(String),
    /// Boolean toggles (`darkMode`, `overridesEnabled`).
    Flag(bool),
    /// SDK health snapshot (`sdkHealth`).
    Health(SdkSnapshot),
    /// Anything else — stored as-is.
    Json(Value),
}

impl StateValue {
    /// Validate a raw JSON value against the shape expected for `property`.
    ///
    /// `null` is accepted for any property and means "unset" — UI surfaces
    /// clear overrides by writing null.
    pub fn from_property(property: &str, raw: Value) -> Result<Self, ValueError> {
        if raw.is_null() {
            return Ok(StateValue::Json(Value::Null));
        }
        let invalid = |reason: &str| ValueError::Invalid {
            property: property.to_string(),
            reason: reason.to_string(),
        };
        match property {
            "features" => serde_json::from_value(raw)
                .map(StateValue::Features)
                .map_err(|e| invalid(&e.to_string())),
            "forcedFeatures" => match raw {
                Value::Object(m) => Ok(StateValue::ForcedFeatures(m)),
                _ => Err(invalid("expected an object of feature forces")),
            },
            "experiments" => serde_json::from_value(raw)
                .map(StateValue::Experiments)
                .map_err(|e| invalid(&e.to_string())),
            "forcedVariations" => match raw {
                Value::Object(m) => Ok(StateValue::ForcedVariations(m)),
                _ => Err(invalid("expected an object of variation forces")),
            },
            "attributes" | "attributeOverrides" => match raw {
                Value::Object(m) => Ok(StateValue::Attributes(m)),
                _ => Err(invalid("expected an attribute object")),
            },
            "logEvents" => match raw {
                Value::Array(a) => Ok(StateValue::LogEvents(a)),
                _ => Err(invalid("expected an array of events")),
            },
            "url" | "apiHost" | "apiKey" | "orgId" => match raw {
                Value::String(s) => Ok(StateValue::Text(s)),
                _ => Err(invalid("expected a string")),
            },
            "darkMode" | "overridesEnabled" => match raw {
                Value::Bool(b) => Ok(StateValue::Flag(b)),
                _ => Err(invalid("expected a boolean")),
            },
            "sdkHealth" => serde_json::from_value(raw)
                .map(StateValue::Health)
                .map_err(|e| invalid(&e.to_string())),
            _ => Ok(StateValue::Json(raw)),
        }
    }

    /// Serialize back to the raw JSON form that crosses the wire.
    pub fn to_json(&self) -> Value {
        match self {
            StateValue::Features(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            StateValue::ForcedFeatures(m) => Value::Object(m.clone()),
            StateValue::Experiments(e) => serde_json::to_value(e).unwrap_or(Value::Null),
            StateValue::ForcedVariations(m) => Value::Object(m.clone()),
            StateValue::Attributes(m) => Value::Object(m.clone()),
            StateValue::LogEvents(a) => Value::Array(a.clone()),
            StateValue::Text(s) => Value::String(s.clone()),
            StateValue::Flag(b) => Value::Bool(*b),
            StateValue::Health(h) => serde_json::to_value(h).unwrap_or(Value::Null),
            StateValue::Json(v) => v.clone(),
        }
    }

    /// Mutable access to the underlying array for append-mode writes.
    /// Only log streams and untyped arrays are appendable.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            StateValue::LogEvents(a) => Some(a),
            StateValue::Json(Value::Array(a)) => Some(a),
            _ => None,
        }
    }
}
