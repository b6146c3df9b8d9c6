//! LLM-backed planner
//!
//! The prompt is itself a [`SemanticFunction`]: a handlebars template that
//! lists the available functions, the goal and any feedback from the last
//! failed attempt. The model answers with a JSON plan document.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{PlanFeedback, Planner};
use crate::catalog::CatalogView;
use crate::completion::RequestSettings;
use crate::config::PlannerSettings;
use crate::context::InvocationContext;
use crate::error::{Result, SkeinError};
use crate::function::{FunctionSpec, Invocable, ParameterSpec, ParameterType, SemanticFunction};
use crate::plan::{Binding, Plan, PlanStep};
use crate::Variables;

lazy_static! {
    static ref FENCED_JSON: Regex =
        Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)```").expect("fence pattern is valid");
}

/// Default planner prompt
pub const DEFAULT_PLANNER_PROMPT: &str = r##"<system~>You are a planner. Combine the functions listed below into a plan that achieves the user's goal. Use only these functions and only the parameters they declare.

Functions:
{{#each functions}}
- {{name}}: {{description}}
{{#each parameters}}
    {{name}} ({{type}}{{#unless required}}, optional{{/unless}}): {{description}}
{{/each}}
{{#if output_description}}
    returns: {{output_description}}
{{/if}}
{{#each samples}}
    example: {{json inputs}} => {{output}}
{{/each}}
{{/each}}

Reply with one JSON object and nothing else:
{ "steps": [ { "function": "Namespace.Name", "arguments": { "parameter": { "kind": "literal", "value": 2 } }, "output": "name" } ], "result": { "kind": "step", "value": 0 } }

Each argument is one of:
- { "kind": "literal", "value": <any JSON value> }
- { "kind": "variable", "value": "<input variable or the output name of an earlier step>" }
- { "kind": "step", "value": <index of an earlier step> }
"output" and "result" are optional. Without "result" the last step's output is the answer.</system~>
<user~>Goal: {{goal}}</user~>
{{#if last_plan}}
<assistant~>{{last_plan}}</assistant~>
{{/if}}
{{#if last_error}}
<user~>The previous attempt failed with this error: {{last_error}}
Write a different plan that avoids it.</user~>
{{/if}}"##;

/// Planner config for LLM
#[derive(Debug, Clone, PartialEq)]
pub struct LlmPlannerConfig {
    /// Overrides the completion service's model when set
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmPlannerConfig {
    fn default() -> Self {
        Self::from_settings(&PlannerSettings::default())
    }
}

impl LlmPlannerConfig {
    pub fn from_settings(settings: &PlannerSettings) -> Self {
        Self {
            model: None,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn request_settings(&self) -> RequestSettings {
        let settings = RequestSettings::default()
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        match &self.model {
            Some(model) => settings.with_model(model.clone()),
            None => settings,
        }
    }
}

/// LLM-based planner
#[derive(Debug, Clone)]
pub struct LlmPlanner {
    prompt: SemanticFunction,
    config: LlmPlannerConfig,
}

impl LlmPlanner {
    pub fn new(config: LlmPlannerConfig) -> Self {
        Self::with_template(DEFAULT_PLANNER_PROMPT, config)
    }

    /// Use a custom prompt template. It receives `goal`, `functions`,
    /// `last_plan` and `last_error`; the last two are null without feedback.
    pub fn with_template(template: impl Into<String>, config: LlmPlannerConfig) -> Self {
        let prompt = SemanticFunction::new(
            "CreatePlan",
            template,
            "Writes a plan for a goal from the available functions",
            vec![
                ParameterSpec::new("goal", "The goal to plan for", ParameterType::String),
                ParameterSpec::new("functions", "Available functions", ParameterType::Object),
                ParameterSpec::new("last_plan", "Text of the plan that failed", ParameterType::String)
                    .with_default(Value::Null),
                ParameterSpec::new("last_error", "Error of the failed attempt", ParameterType::String)
                    .with_default(Value::Null),
            ],
        )
        .with_namespace("Planner")
        .with_request_settings(config.request_settings());

        Self { prompt, config }
    }

    pub fn config(&self) -> &LlmPlannerConfig {
        &self.config
    }

    pub fn prompt_function(&self) -> &SemanticFunction {
        &self.prompt
    }
}

impl Default for LlmPlanner {
    fn default() -> Self {
        Self::new(LlmPlannerConfig::default())
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(
        &self,
        goal: &str,
        functions: &CatalogView,
        feedback: Option<&PlanFeedback>,
        context: &InvocationContext,
    ) -> Result<Plan> {
        if functions.is_empty() {
            return Err(SkeinError::PlanGeneration(
                "no functions are available to plan with".to_string(),
            ));
        }

        info!(
            goal_len = goal.len(),
            function_count = functions.len(),
            has_feedback = feedback.is_some(),
            "planner request prepared"
        );

        let data = prompt_data(goal, functions, feedback);
        let reply = self.prompt.invoke(context, &data).await?.to_string();
        debug!(reply = %reply, "planner raw reply");

        let plan = parse_plan(goal, &reply)?;
        for (index, step) in plan.steps.iter().enumerate() {
            if !functions.contains(&step.function) {
                return Err(SkeinError::PlanGeneration(format!(
                    "step {index} uses unknown function '{}'",
                    step.function
                )));
            }
        }
        plan.validate()?;

        info!(step_count = plan.len(), "planner parsed plan");
        Ok(plan)
    }
}

/// Every key is always present so strict-mode templates can test them
fn prompt_data(goal: &str, functions: &CatalogView, feedback: Option<&PlanFeedback>) -> Variables {
    let mut data = Variables::new();
    data.insert("goal".to_string(), json!(goal));
    data.insert(
        "functions".to_string(),
        Value::Array(functions.specs().map(describe_function).collect()),
    );
    data.insert(
        "last_plan".to_string(),
        feedback.and_then(PlanFeedback::plan_text).map_or(Value::Null, Value::String),
    );
    data.insert(
        "last_error".to_string(),
        feedback.map_or(Value::Null, |f| Value::String(f.error.clone())),
    );
    data
}

fn describe_function(spec: &FunctionSpec) -> Value {
    json!({
        "name": spec.qualified_name(),
        "description": spec.description,
        "parameters": spec.parameters.iter().map(|p| json!({
            "name": p.name,
            "type": p.param_type.as_str(),
            "description": p.description,
            "required": p.required,
        })).collect::<Vec<_>>(),
        "output_description": spec.output_description,
        "samples": spec.samples.iter().map(|s| json!({
            "inputs": s.inputs,
            "output": s.output,
        })).collect::<Vec<_>>(),
    })
}

/// Plan document as written by the model; the goal comes from the caller
#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    steps: Vec<PlanStep>,
    #[serde(default)]
    result: Option<Binding>,
}

fn parse_plan(goal: &str, reply: &str) -> Result<Plan> {
    let json = extract_json(reply)
        .ok_or_else(|| SkeinError::PlanGeneration("planner reply did not contain a JSON plan".to_string()))?;
    let document: PlanDocument = serde_json::from_str(json)
        .map_err(|e| SkeinError::PlanGeneration(format!("invalid plan JSON: {e}")))?;

    Ok(Plan {
        goal: goal.to_string(),
        steps: document.steps,
        result: document.result,
    })
}

/// Fenced block first, else the outermost braces
fn extract_json(text: &str) -> Option<&str> {
    if let Some(body) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        return Some(body.as_str().trim());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogFilter, FunctionCatalog};
    use crate::completion::{ChatCandidate, ChatCompletion, CompletionService};
    use crate::function::NativeFunction;
    use crate::transcript::{Role, Transcript};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replies from a script and records every transcript
    struct ScriptedChat {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<Transcript>>,
    }

    impl ScriptedChat {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CompletionService for ScriptedChat {
        fn service_id(&self) -> &str {
            "scripted"
        }

        fn as_chat(&self) -> Option<&dyn ChatCompletion> {
            Some(self)
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedChat {
        async fn chat_completions(
            &self,
            transcript: &Transcript,
            _settings: &RequestSettings,
        ) -> Result<Vec<ChatCandidate>> {
            self.seen.lock().unwrap().push(transcript.clone());
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
            Ok(vec![ChatCandidate::new(reply)])
        }
    }

    struct TextOnly;

    impl CompletionService for TextOnly {
        fn service_id(&self) -> &str {
            "text-only"
        }
    }

    fn view() -> CatalogView {
        let add = FunctionSpec::new("Math", "Add", "Adds two numbers")
            .with_parameter(ParameterSpec::new("number1", "The first number", ParameterType::Number))
            .with_parameter(ParameterSpec::new("number2", "The second number", ParameterType::Number))
            .with_output_description("The sum")
            .with_sample(json!({"number1": 1, "number2": 2}), "3");
        let solve = FunctionSpec::new("Math", "PerformMath", "Solves math problems");

        FunctionCatalog::new()
            .with_function(NativeFunction::new(add, |_| Ok(json!(0))))
            .and_then(|c| c.with_function(NativeFunction::new(solve, |_| Ok(json!(0)))))
            .unwrap()
            .view(&CatalogFilter::new().exclude_function("Math.PerformMath"))
    }

    const ADD_PLAN: &str = r#"{"steps": [{"function": "Math.Add", "arguments": {
        "number1": {"kind": "literal", "value": 2},
        "number2": {"kind": "literal", "value": 2}}}]}"#;

    #[tokio::test]
    async fn test_plan_from_fenced_reply() {
        let reply = format!("Here is the plan:\n```json\n{ADD_PLAN}\n```\n");
        let chat = ScriptedChat::new(&[reply.as_str()]);
        let ctx = InvocationContext::new(chat.clone());

        let plan = LlmPlanner::default()
            .create_plan("compute 2+2", &view(), None, &ctx)
            .await
            .unwrap();

        assert_eq!(plan.goal, "compute 2+2");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].function, "Math.Add");
        assert_eq!(plan.steps[0].arguments["number1"], Binding::literal(2));
    }

    #[tokio::test]
    async fn test_prompt_lists_only_visible_functions() {
        let chat = ScriptedChat::new(&[ADD_PLAN]);
        let ctx = InvocationContext::new(chat.clone());

        LlmPlanner::default()
            .create_plan("compute 2+2", &view(), None, &ctx)
            .await
            .unwrap();

        let seen = chat.seen.lock().unwrap();
        let messages = seen[0].messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), Role::System);
        assert!(messages[0].content().contains("- Math.Add: Adds two numbers"));
        assert!(messages[0].content().contains(r#"example: {"number1":1,"number2":2} => 3"#));
        assert!(messages[0].content().contains("returns: The sum"));
        assert!(!messages[0].content().contains("PerformMath"));
        assert_eq!(messages[1].content(), "Goal: compute 2+2");
    }

    #[tokio::test]
    async fn test_feedback_reaches_prompt_verbatim() {
        let chat = ScriptedChat::new(&[ADD_PLAN]);
        let ctx = InvocationContext::new(chat.clone());
        let failed = Arc::new(Plan::new("compute 2+2").step(PlanStep::new("Math.Add")));
        let feedback = PlanFeedback::new(Some(Arc::clone(&failed)), "Invalid argument 'number1': missing");

        LlmPlanner::default()
            .create_plan("compute 2+2", &view(), Some(&feedback), &ctx)
            .await
            .unwrap();

        let seen = chat.seen.lock().unwrap();
        let messages = seen[0].messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role(), Role::Assistant);
        assert_eq!(messages[2].content(), failed.to_string());
        assert!(messages[3].content().contains("Invalid argument 'number1': missing"));
    }

    #[tokio::test]
    async fn test_unknown_function_rejected() {
        let reply = r#"{"steps": [{"function": "Math.PerformMath"}]}"#;
        let ctx = InvocationContext::new(ScriptedChat::new(&[reply]));

        let err = LlmPlanner::default()
            .create_plan("x", &view(), None, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, SkeinError::PlanGeneration(ref m) if m.contains("Math.PerformMath")));
    }

    #[tokio::test]
    async fn test_unusable_replies_are_plan_generation_errors() {
        for reply in ["I cannot help with that.", "{\"steps\": 3}", "{\"steps\": []}"] {
            let ctx = InvocationContext::new(ScriptedChat::new(&[reply]));

            let err = LlmPlanner::default()
                .create_plan("x", &view(), None, &ctx)
                .await
                .unwrap_err();

            assert!(err.is_retryable(), "{reply}: {err}");
        }
    }

    #[tokio::test]
    async fn test_empty_view_cannot_be_planned() {
        let ctx = InvocationContext::new(ScriptedChat::new(&[ADD_PLAN]));

        let err = LlmPlanner::default()
            .create_plan("x", &CatalogView::default(), None, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, SkeinError::PlanGeneration(_)));
    }

    #[tokio::test]
    async fn test_unsupported_service_is_not_a_plan_error() {
        let ctx = InvocationContext::new(Arc::new(TextOnly));

        let err = LlmPlanner::default()
            .create_plan("x", &view(), None, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, SkeinError::UnsupportedService(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("sure: {\"a\":{\"b\":2}} done"), Some("{\"a\":{\"b\":2}}"));
        assert_eq!(extract_json("no json here"), None);
    }
}
