//! Semantic Function
//!
//! Template rendering, transcript parsing and chat completion composed into
//! one describable unit. An instance never changes after construction, so it
//! can be shared across tasks and invoked concurrently without locking.

use async_trait::async_trait;
use std::path::Path;

use super::definition::{FunctionDefinition, HANDLEBARS_FORMAT};
use super::{FunctionSpec, Invocable, InvocationResult, ParameterSpec};
use crate::completion::{self, RequestSettings, MODEL_RESULTS_METADATA_KEY};
use crate::context::InvocationContext;
use crate::error::{Result, SkeinError};
use crate::transcript::{ParsePolicy, Transcript};
use crate::Variables;

/// A prompt template packaged as an invocable function
#[derive(Debug, Clone)]
pub struct SemanticFunction {
    spec: FunctionSpec,
    template: String,
    template_format: String,
    settings: RequestSettings,
    parse_policy: ParsePolicy,
}

impl SemanticFunction {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterSpec>,
    ) -> Self {
        let mut spec = FunctionSpec::new("", name, description);
        spec.parameters = parameters;
        Self {
            spec,
            template: template.into(),
            template_format: HANDLEBARS_FORMAT.to_string(),
            settings: RequestSettings::default(),
            parse_policy: ParsePolicy::default(),
        }
    }

    pub fn from_definition(definition: FunctionDefinition) -> Self {
        Self {
            spec: definition.spec(),
            template: definition.template,
            template_format: definition.template_format,
            settings: definition.execution_settings.unwrap_or_default(),
            parse_policy: ParsePolicy::default(),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        FunctionDefinition::from_yaml_str(content).map(Self::from_definition)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        FunctionDefinition::from_yaml_file(path).map(Self::from_definition)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.namespace = namespace.into();
        self
    }

    pub fn with_request_settings(mut self, settings: RequestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_parse_policy(mut self, policy: ParsePolicy) -> Self {
        self.parse_policy = policy;
        self
    }

    pub fn with_output_description(mut self, description: impl Into<String>) -> Self {
        self.spec.output_description = Some(description.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn template_format(&self) -> &str {
        &self.template_format
    }

    /// Ambient variables, overlaid by declared defaults, overlaid by the
    /// caller's variables. A required parameter left without a value is a
    /// render failure.
    fn bind(&self, context: &InvocationContext, variables: &Variables) -> Result<Variables> {
        let mut data = context.variables().clone();

        for param in &self.spec.parameters {
            if variables.contains_key(&param.name) {
                continue;
            }
            if let Some(default) = &param.default_value {
                data.insert(param.name.clone(), default.clone());
            } else if param.required && !data.contains_key(&param.name) {
                return Err(SkeinError::Render(format!(
                    "missing required variable '{}' for {}",
                    param.name,
                    self.spec.qualified_name()
                )));
            }
        }

        data.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(data)
    }

    /// Render the template into a transcript without calling the model
    pub async fn render_transcript(&self, context: &InvocationContext, variables: &Variables) -> Result<Transcript> {
        let engine = context.template_engine();
        if engine.format() != self.template_format {
            return Err(SkeinError::Render(format!(
                "{} uses template format '{}' but the engine renders '{}'",
                self.spec.qualified_name(),
                self.template_format,
                engine.format()
            )));
        }

        let data = self.bind(context, variables)?;
        let rendered = context.guard(engine.render(&self.template, &data)).await?;
        Transcript::parse_with(&rendered, self.parse_policy)
    }
}

#[async_trait]
impl Invocable for SemanticFunction {
    fn describe(&self) -> &FunctionSpec {
        &self.spec
    }

    async fn invoke(&self, context: &InvocationContext, variables: &Variables) -> Result<InvocationResult> {
        let transcript = self.render_transcript(context, variables).await?;

        tracing::debug!(
            function = %self.spec.qualified_name(),
            messages = transcript.len(),
            "Invoking semantic function"
        );

        let completion = context
            .guard(completion::complete_chat(context.completion(), &transcript, &self.settings))
            .await?;
        let model_results = completion.model_results()?;

        Ok(InvocationResult::new(&self.spec, serde_json::Value::String(completion.text))
            .with_metadata(MODEL_RESULTS_METADATA_KEY, model_results))
    }
}
