use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{FunctionSpec, Invocable, InvocationResult, ParameterType};
use crate::context::InvocationContext;
use crate::error::{Result, SkeinError};
use crate::Variables;

type Callable = dyn Fn(&Arguments<'_>) -> Result<Value> + Send + Sync;

/// A function backed by a synchronous Rust closure
#[derive(Clone)]
pub struct NativeFunction {
    spec: FunctionSpec,
    callable: Arc<Callable>,
}

impl NativeFunction {
    pub fn new<F>(spec: FunctionSpec, callable: F) -> Self
    where
        F: Fn(&Arguments<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            spec,
            callable: Arc::new(callable),
        }
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.spec.qualified_name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Invocable for NativeFunction {
    fn describe(&self) -> &FunctionSpec {
        &self.spec
    }

    async fn invoke(&self, context: &InvocationContext, variables: &Variables) -> Result<InvocationResult> {
        context.check_cancelled()?;
        let args = Arguments {
            spec: &self.spec,
            variables,
        };
        let value = (self.callable)(&args)?;
        Ok(InvocationResult::new(&self.spec, value))
    }
}

/// Typed access to call arguments, falling back to declared defaults
#[derive(Debug)]
pub struct Arguments<'a> {
    spec: &'a FunctionSpec,
    variables: &'a Variables,
}

impl<'a> Arguments<'a> {
    pub fn new(spec: &'a FunctionSpec, variables: &'a Variables) -> Self {
        Self { spec, variables }
    }

    /// Supplied value, else the declared default
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.variables
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| self.spec.parameter(name).and_then(|p| p.default_value.as_ref()))
    }

    fn require(&self, name: &str) -> Result<&'a Value> {
        self.get(name).ok_or_else(|| SkeinError::InvalidArgument {
            name: name.to_string(),
            reason: "missing".to_string(),
        })
    }

    /// A number, or a string holding one
    pub fn number(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        coerce(value, ParameterType::Number)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| SkeinError::InvalidArgument {
                name: name.to_string(),
                reason: format!("expected a number, got {value}"),
            })
    }

    /// A string; non-string scalars are rendered as text
    pub fn string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        let value = self.require(name)?;
        coerce(value, ParameterType::Boolean)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| SkeinError::InvalidArgument {
                name: name.to_string(),
                reason: format!("expected a boolean, got {value}"),
            })
    }
}

/// Convert loosely typed input (e.g. model-written strings) to the declared type
pub(crate) fn coerce(value: &Value, target: ParameterType) -> Option<Value> {
    match (target, value) {
        (ParameterType::Number, Value::Number(_)) => Some(value.clone()),
        (ParameterType::Number, Value::String(s)) => {
            s.trim().parse::<f64>().ok().and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
        }
        (ParameterType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParameterType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParameterType::String, Value::String(_)) => Some(value.clone()),
        (ParameterType::String, other) => Some(Value::String(other.to_string())),
        (ParameterType::Object, _) => Some(value.clone()),
        _ => None,
    }
}
