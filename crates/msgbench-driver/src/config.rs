use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DriverError;

/// The driver configuration document handed to the worker by a coordinator.
///
/// Only `driverClass` is interpreted here; everything else in the document is
/// retained verbatim for the driver factory to pick through. Unknown keys are
/// ignored by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfiguration {
    /// Registry identifier of the driver implementation.
    #[serde(rename = "driverClass")]
    pub driver_class: String,

    /// Human-readable name, shown in logs only.
    #[serde(default)]
    pub name: Option<String>,

    /// Driver-specific settings.
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl DriverConfiguration {
    pub fn from_json(document: &str) -> Result<Self, DriverError> {
        serde_json::from_str(document).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    /// Looks up an integer parameter, tolerating absence but not malformed
    /// values.
    pub fn param_u64(&self, key: &str) -> Result<Option<u64>, DriverError> {
        match self.params.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| DriverError::InvalidConfig(format!("'{key}' must be an integer"))),
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}
