//! The shared mutable state flowing through a pipeline run.
//!
//! A [`PipelineState`] is a flat name→value mapping. Steps never see the
//! whole mapping: the executor hands each step only the projection of its
//! declared input fields, and merges back only its declared output fields.
//! Everything a step did not declare passes through a transition unchanged.

use crate::errors::UndeclaredWriteError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The set of fields a step produces, keyed by declared output name.
pub type StateDelta = HashMap<String, serde_json::Value>;

/// Shared mutable state for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    fields: HashMap<String, serde_json::Value>,
}

impl PipelineState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state from existing fields.
    #[must_use]
    pub fn from_fields(fields: HashMap<String, serde_json::Value>) -> Self {
        Self { fields }
    }

    /// Gets a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Gets a field and deserializes it into a typed value.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.fields
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a string field.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(serde_json::Value::as_str)
    }

    /// Gets a boolean field, defaulting to `false` when absent or non-boolean.
    #[must_use]
    pub fn get_flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Gets an unsigned integer field.
    #[must_use]
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(serde_json::Value::as_u64)
    }

    /// Sets a field value.
    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(name.into(), value);
    }

    /// Checks if a field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the state holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the projection of the given declared input fields.
    ///
    /// Fields that are absent from the state are simply absent from the
    /// projection; it is up to each step to decide whether a missing input
    /// is an error.
    #[must_use]
    pub fn project(&self, declared_inputs: &[String]) -> Self {
        let fields = declared_inputs
            .iter()
            .filter_map(|name| {
                self.fields
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        Self { fields }
    }

    /// Merges a step's output delta into the state.
    ///
    /// Only declared output fields may be written; any other field in the
    /// delta is rejected, naming the step and the offending field. Fields
    /// not mentioned in the delta are left untouched.
    pub fn merge_outputs(
        &mut self,
        step: &str,
        declared_outputs: &[String],
        delta: StateDelta,
    ) -> Result<(), UndeclaredWriteError> {
        for field in delta.keys() {
            if !declared_outputs.iter().any(|o| o == field) {
                return Err(UndeclaredWriteError::new(step, field));
            }
        }
        self.fields.extend(delta);
        Ok(())
    }

    /// Returns a copy of all fields.
    #[must_use]
    pub fn to_fields(&self) -> HashMap<String, serde_json::Value> {
        self.fields.clone()
    }

    /// Returns all field names.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_insert_and_get() {
        let mut state = PipelineState::new();
        state.insert("hypothesis", serde_json::json!("H1"));

        assert_eq!(state.get_str("hypothesis"), Some("H1"));
        assert!(state.contains("hypothesis"));
        assert!(!state.contains("design"));
    }

    #[test]
    fn test_project_only_declared_fields() {
        let mut state = PipelineState::new();
        state.insert("a", serde_json::json!(1));
        state.insert("b", serde_json::json!(2));
        state.insert("c", serde_json::json!(3));

        let projection = state.project(&strings(&["a", "c", "missing"]));

        assert_eq!(projection.len(), 2);
        assert_eq!(projection.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(projection.get("c"), Some(&serde_json::json!(3)));
        assert!(!projection.contains("b"));
        assert!(!projection.contains("missing"));
    }

    #[test]
    fn test_merge_outputs_writes_declared_fields() {
        let mut state = PipelineState::new();
        state.insert("keep", serde_json::json!("untouched"));

        let mut delta = StateDelta::new();
        delta.insert("design".to_string(), serde_json::json!("plan"));

        state
            .merge_outputs("generate_design", &strings(&["design"]), delta)
            .expect("declared write");

        assert_eq!(state.get_str("design"), Some("plan"));
        assert_eq!(state.get_str("keep"), Some("untouched"));
    }

    #[test]
    fn test_merge_outputs_rejects_undeclared_field() {
        let mut state = PipelineState::new();

        let mut delta = StateDelta::new();
        delta.insert("sneaky".to_string(), serde_json::json!(true));

        let err = state
            .merge_outputs("generate_design", &strings(&["design"]), delta)
            .unwrap_err();

        assert_eq!(err.step, "generate_design");
        assert_eq!(err.field, "sneaky");
        assert!(!state.contains("sneaky"));
    }

    #[test]
    fn test_non_declared_fields_pass_through() {
        let mut state = PipelineState::new();
        state.insert("x", serde_json::json!(1));
        state.insert("y", serde_json::json!(2));

        state
            .merge_outputs("step", &strings(&["x"]), StateDelta::new())
            .expect("empty delta");

        assert_eq!(state.get("x"), Some(&serde_json::json!(1)));
        assert_eq!(state.get("y"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_typed_access() {
        let mut state = PipelineState::new();
        state.insert("count", serde_json::json!(3));
        state.insert("done", serde_json::json!(true));

        assert_eq!(state.get_u64("count"), Some(3));
        assert!(state.get_flag("done"));
        assert!(!state.get_flag("missing"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut state = PipelineState::new();
        state.insert("a", serde_json::json!({"nested": [1, 2]}));

        let text = serde_json::to_string(&state).expect("serialize");
        let back: PipelineState = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, state);
    }
}
