//! Plan Executor
//!
//! Runs a plan's steps strictly in order. Functions come from the context's
//! catalog, or from a filtered [`CatalogView`] when the caller planned
//! against one. Execution is fail-fast: the first failing step aborts the
//! rest and is reported as `StepExecution` with its index.

use serde_json::Value;
use std::sync::Arc;

use crate::catalog::CatalogView;
use crate::context::InvocationContext;
use crate::error::{Result, SkeinError};
use crate::function::{native, FunctionSpec, Invocable, InvocationResult};
use crate::plan::{Binding, Plan};
use crate::Variables;

/// Sequential, fail-fast plan runner
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanExecutor;

impl PlanExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `plan` against every function in the context's catalog
    pub async fn execute(
        &self,
        plan: &Plan,
        context: &InvocationContext,
        variables: &Variables,
    ) -> Result<InvocationResult> {
        self.run(plan, None, context, variables).await
    }

    /// Run `plan` against `functions` only. A step naming a function outside
    /// the view fails like an unknown function.
    pub async fn execute_in(
        &self,
        plan: &Plan,
        functions: &CatalogView,
        context: &InvocationContext,
        variables: &Variables,
    ) -> Result<InvocationResult> {
        self.run(plan, Some(functions), context, variables).await
    }

    async fn run(
        &self,
        plan: &Plan,
        view: Option<&CatalogView>,
        context: &InvocationContext,
        variables: &Variables,
    ) -> Result<InvocationResult> {
        plan.validate_for(variables)?;

        let lookup = |name: &str| -> Option<Arc<dyn Invocable>> {
            match view {
                Some(view) => view.function(name),
                None => context.catalog().get(name),
            }
        };

        let mut scope = variables.clone();
        let mut outputs: Vec<InvocationResult> = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            context.check_cancelled()?;

            let fail = |source: SkeinError| SkeinError::StepExecution {
                index,
                function: step.function.clone(),
                source: Box::new(source),
            };

            let function = lookup(&step.function)
                .ok_or_else(|| fail(SkeinError::FunctionNotFound(step.function.clone())))?;

            let mut arguments = Variables::new();
            for (name, binding) in &step.arguments {
                let value = resolve(binding, &scope, &outputs).map_err(&fail)?;
                let value = conform(function.describe(), name, value).map_err(&fail)?;
                arguments.insert(name.clone(), value);
            }

            tracing::debug!(step = index, function = %step.function, "Executing plan step");

            let output = match context.guard(function.invoke(context, &arguments)).await {
                Ok(output) => output,
                Err(SkeinError::Cancelled) => return Err(SkeinError::Cancelled),
                Err(e) => {
                    tracing::warn!(step = index, function = %step.function, error = %e, "Plan step failed");
                    return Err(fail(e));
                }
            };

            if let Some(name) = &step.output {
                scope.insert(name.clone(), output.value.clone());
            }
            outputs.push(output);
        }

        match &plan.result {
            None | Some(Binding::Step(_)) => {
                let index = match &plan.result {
                    Some(Binding::Step(index)) => *index,
                    _ => outputs.len() - 1,
                };
                Ok(outputs.swap_remove(index))
            }
            Some(binding) => {
                let value = resolve(binding, &scope, &outputs).map_err(|e| {
                    SkeinError::PlanGeneration(format!("plan result {binding} could not be resolved: {e}"))
                })?;
                let last = outputs.pop().ok_or_else(|| SkeinError::PlanGeneration("plan has no steps".to_string()))?;
                Ok(InvocationResult { value, ..last })
            }
        }
    }
}

fn resolve(binding: &Binding, scope: &Variables, outputs: &[InvocationResult]) -> Result<Value> {
    match binding {
        Binding::Literal(value) => Ok(value.clone()),
        Binding::Variable(name) => scope.get(name).cloned().ok_or_else(|| SkeinError::InvalidArgument {
            name: name.clone(),
            reason: "no such variable".to_string(),
        }),
        Binding::Step(target) => outputs
            .get(*target)
            .map(|o| o.value.clone())
            .ok_or_else(|| SkeinError::InvalidArgument {
                name: format!("@{target}"),
                reason: "step has not run".to_string(),
            }),
    }
}

/// Coerce a bound value to the parameter's declared type when the target
/// function declares it; undeclared arguments pass through.
fn conform(spec: &FunctionSpec, name: &str, value: Value) -> Result<Value> {
    let Some(param) = spec.parameter(name) else {
        return Ok(value);
    };
    native::coerce(&value, param.param_type).ok_or_else(|| SkeinError::InvalidArgument {
        name: name.to_string(),
        reason: format!("expected {}, got {value}", param.param_type),
    })
}
