//! Plan model
//!
//! A plan is an ordered list of function calls with argument bindings.
//! Bindings are literals, caller variables, or outputs of earlier steps.
//! Plans are never mutated after creation; a failed plan is kept read-only
//! as feedback for the next planning attempt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SkeinError};
use crate::Variables;

/// Source of an argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Binding {
    /// A literal JSON value
    Literal(serde_json::Value),
    /// A caller-supplied variable, or a named output of an earlier step
    Variable(String),
    /// Output of the step at this index
    Step(usize),
}

impl Binding {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Binding::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Binding::Variable(name.into())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Literal(value) => write!(f, "{value}"),
            Binding::Variable(name) => write!(f, "${name}"),
            Binding::Step(index) => write!(f, "@{index}"),
        }
    }
}

/// One function call in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Qualified function name
    pub function: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Binding>,
    /// Optional name under which the output is visible to later steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PlanStep {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            arguments: BTreeMap::new(),
            output: None,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.arguments.insert(name.into(), binding);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }
}

/// Ordered sequence of steps that should satisfy a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    /// Designated return value; defaults to the last step's output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Binding>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            result: None,
        }
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn returning(mut self, binding: Binding) -> Self {
        self.result = Some(binding);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Structural checks: at least one step, step references only point
    /// backwards, and the return binding points at an existing step.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(SkeinError::PlanGeneration("plan has no steps".to_string()));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.function.trim().is_empty() {
                return Err(SkeinError::PlanGeneration(format!(
                    "step {index} names no function"
                )));
            }
            for (name, binding) in &step.arguments {
                if let Binding::Step(target) = binding {
                    if *target >= index {
                        return Err(SkeinError::PlanGeneration(format!(
                            "step {index} argument '{name}' references step {target}, which has not run yet"
                        )));
                    }
                }
            }
        }

        if let Some(Binding::Step(target)) = &self.result {
            if *target >= self.steps.len() {
                return Err(SkeinError::PlanGeneration(format!(
                    "plan result references missing step {target}"
                )));
            }
        }

        Ok(())
    }

    /// [`validate`](Self::validate), plus a check that a variable return
    /// binding names a step output or one of the caller's `variables`.
    pub fn validate_for(&self, variables: &Variables) -> Result<()> {
        self.validate()?;

        if let Some(Binding::Variable(name)) = &self.result {
            let produced = self.steps.iter().any(|s| s.output.as_deref() == Some(name.as_str()));
            if !produced && !variables.contains_key(name) {
                return Err(SkeinError::PlanGeneration(format!(
                    "plan result references unknown variable '{name}'"
                )));
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SkeinError::PlanGeneration(format!("invalid plan document: {e}")))
    }
}

impl fmt::Display for Plan {
    /// Canonical text form, used for logging and planner feedback
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Goal: {}", self.goal)?;
        for (index, step) in self.steps.iter().enumerate() {
            write!(f, "{index}. {}(", step.function)?;
            for (i, (name, binding)) in step.arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}={binding}")?;
            }
            f.write_str(")")?;
            if let Some(output) = &step.output {
                write!(f, " -> ${output}")?;
            }
            writeln!(f)?;
        }
        if let Some(result) = &self.result {
            writeln!(f, "Return: {result}")?;
        }
        Ok(())
    }
}
