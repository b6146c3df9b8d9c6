//! Functions: describable, invocable units
//!
//! A function is described by a [`FunctionSpec`] and invoked through the
//! [`Invocable`] trait. Two kinds ship with the crate:
//!
//! - [`SemanticFunction`]: renders a prompt template, parses the transcript
//!   and asks the completion service for a reply
//! - [`NativeFunction`]: wraps a plain Rust closure

pub mod definition;
pub mod native;
pub mod semantic;

pub use definition::{FunctionDefinition, InputVariable};
pub use native::{Arguments, NativeFunction};
pub use semantic::SemanticFunction;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::context::InvocationContext;
use crate::error::Result;
use crate::Variables;

/// Declared type of a function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    /// Untyped
    #[default]
    Object,
}

impl ParameterType {
    /// Map a declared type name; anything unrecognised is untyped
    pub fn from_declared(declared: Option<&str>) -> Self {
        match declared.map(str::trim) {
            Some("string") => ParameterType::String,
            Some("number") => ParameterType::Number,
            Some("boolean") => ParameterType::Boolean,
            _ => ParameterType::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub default_value: Option<serde_json::Value>,
    pub required: bool,
}

impl ParameterSpec {
    /// A required parameter with no default
    pub fn new(name: impl Into<String>, description: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            default_value: None,
            required: true,
        }
    }

    /// Make optional with a default value
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self.required = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Example input/output pair used to ground the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub inputs: serde_json::Value,
    pub output: String,
}

/// Immutable metadata describing a callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub output_description: Option<String>,
    pub samples: Vec<UsageSample>,
}

impl FunctionSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            output_description: None,
            samples: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_output_description(mut self, description: impl Into<String>) -> Self {
        self.output_description = Some(description.into());
        self
    }

    pub fn with_sample(mut self, inputs: serde_json::Value, output: impl Into<String>) -> Self {
        self.samples.push(UsageSample {
            inputs,
            output: output.into(),
        });
        self
    }

    /// `namespace.name`, or bare `name` without a namespace
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

pub(crate) fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Value produced by an invocation, tagged with the producing function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub function_name: String,
    pub namespace: String,
    pub value: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InvocationResult {
    pub fn new(spec: &FunctionSpec, value: serde_json::Value) -> Self {
        Self {
            function_name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            value,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Deserialize the primary value
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.function_name)
    }
}

impl fmt::Display for InvocationResult {
    /// Strings print bare; other values print as JSON
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// A describable, invocable unit
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Pure description; safe to call concurrently and repeatedly
    fn describe(&self) -> &FunctionSpec;

    async fn invoke(&self, context: &InvocationContext, variables: &Variables) -> Result<InvocationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_type_mapping() {
        assert_eq!(ParameterType::from_declared(Some("string")), ParameterType::String);
        assert_eq!(ParameterType::from_declared(Some("number")), ParameterType::Number);
        assert_eq!(ParameterType::from_declared(Some("boolean")), ParameterType::Boolean);
        assert_eq!(ParameterType::from_declared(Some("array")), ParameterType::Object);
        assert_eq!(ParameterType::from_declared(None), ParameterType::Object);
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(FunctionSpec::new("Math", "Add", "").qualified_name(), "Math.Add");
        assert_eq!(FunctionSpec::new("", "Summarize", "").qualified_name(), "Summarize");
    }

    #[test]
    fn test_result_display() {
        let spec = FunctionSpec::new("Math", "Add", "Adds");
        assert_eq!(InvocationResult::new(&spec, json!(4.0)).to_string(), "4.0");
        assert_eq!(InvocationResult::new(&spec, json!("four")).to_string(), "four");
        assert_eq!(
            InvocationResult::new(&spec, json!(4.0)).value_as::<f64>().unwrap(),
            4.0
        );
    }
}
