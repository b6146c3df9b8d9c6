//! Function definition documents
//!
//! Semantic functions are usually authored as YAML:
//!
//! ```yaml
//! name: Summarize
//! description: Summarizes a text in one sentence.
//! template: |
//!   <system~>You summarize text.</system~>
//!   <user~>{{input}}</user~>
//! templateFormat: handlebars
//! inputVariables:
//!   - name: input
//!     description: The text to summarize
//!     type: string
//!     required: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{FunctionSpec, ParameterSpec, ParameterType};
use crate::completion::RequestSettings;
use crate::error::{Result, ResultExt, SkeinError};

/// Default template format
pub const HANDLEBARS_FORMAT: &str = "handlebars";

/// A function definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default = "default_template_format")]
    pub template_format: String,
    #[serde(default)]
    pub input_variables: Vec<InputVariable>,
    #[serde(default)]
    pub execution_settings: Option<RequestSettings>,
}

fn default_template_format() -> String {
    HANDLEBARS_FORMAT.to_string()
}

/// One declared input variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputVariable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, alias = "isRequired")]
    pub required: bool,
}

impl InputVariable {
    pub fn to_parameter(&self) -> ParameterSpec {
        ParameterSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            param_type: ParameterType::from_declared(self.declared_type.as_deref()),
            default_value: self.default_value.clone(),
            required: self.required,
        }
    }
}

impl FunctionDefinition {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(SkeinError::from)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SkeinError::Definition("name must not be empty".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(SkeinError::Definition(format!(
                "template of '{}' must not be empty",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for variable in &self.input_variables {
            if !seen.insert(variable.name.as_str()) {
                return Err(SkeinError::Definition(format!(
                    "input variable '{}' declared twice in '{}'",
                    variable.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Metadata for the catalog and planner
    pub fn spec(&self) -> FunctionSpec {
        FunctionSpec {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_variables.iter().map(InputVariable::to_parameter).collect(),
            output_description: None,
            samples: Vec::new(),
        }
    }
}
