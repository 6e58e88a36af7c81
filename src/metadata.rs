//! Operator-supplied run metadata.
//!
//! [`Metadata`] captures the context an operator attaches to a run: a sample
//! label (which also names the output folder), a free-text description, notes
//! made during the session, and arbitrary key-value parameters such as the
//! wafer ID or the plasma gas. It is stored verbatim in `run.json` and copied
//! into `metadata.json` by the recorder.
//!
//! Maps are ordered so that persisting the same run twice produces identical
//! bytes.
//!
//! ## Usage
//!
//! ```
//! use appj_daq::metadata::MetadataBuilder;
//!
//! let metadata = MetadataBuilder::new()
//!     .label("Sample12")
//!     .description("open-loop step response, 10 W to 20 W")
//!     .parameter("wafer", "Si-0042".into())
//!     .build();
//! assert_eq!(metadata.label.as_deref(), Some("Sample12"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context attached to a run by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Sample label, appended to the run folder name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// What the run is for.
    #[serde(default)]
    pub description: String,
    /// Operator notes.
    #[serde(default)]
    pub annotations: String,
    /// User-defined experimental parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// A builder for constructing `Metadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample label, appended to the run folder name.
    pub fn label(mut self, label: &str) -> Self {
        self.inner.label = Some(label.to_string());
        self
    }

    /// Free-text description of the experiment.
    pub fn description(mut self, description: &str) -> Self {
        self.inner.description = description.to_string();
        self
    }

    /// Free-text operator notes.
    pub fn annotations(mut self, annotations: &str) -> Self {
        self.inner.annotations = annotations.to_string();
        self
    }

    /// Attach one structured parameter.
    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    /// Parse a `key=value` note from the command line into a parameter.
    ///
    /// Values that parse as JSON (numbers, booleans) keep their type; anything
    /// else is stored as a string.
    pub fn note(self, note: &str) -> Result<Self, String> {
        let (key, value) = note
            .split_once('=')
            .ok_or_else(|| format!("note '{note}' is not of the form key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("note '{note}' has an empty key"));
        }
        let value = value.trim();
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        Ok(self.parameter(key, value))
    }

    /// Finish building.
    pub fn build(self) -> Metadata {
        self.inner
    }
}

impl Metadata {
    /// Validates the metadata.
    ///
    /// Labels end up in directory names, so path separators are rejected.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(label) = &self.label {
            if label.trim().is_empty() {
                return Err("Sample label cannot be empty.".to_string());
            }
            if label.contains(['/', '\\']) || label == ".." {
                return Err(format!("Sample label '{label}' cannot contain path separators."));
            }
        }
        Ok(())
    }
}
