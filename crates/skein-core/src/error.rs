//! Error types for Skein Core
//!
//! One error enum covers rendering, completion, planning, execution and the
//! retry loop. Attempt failures (`PlanGeneration`, `StepExecution`) feed the
//! retry loop; everything else surfaces immediately.

use thiserror::Error;

/// Result type alias for Skein operations
pub type Result<T> = std::result::Result<T, SkeinError>;

/// Main error type for Skein operations
#[derive(Error, Debug)]
pub enum SkeinError {
    /// Template rendering failed (undefined variable, syntax error)
    #[error("Render error: {0}")]
    Render(String),

    /// The completion capability cannot serve chat requests
    #[error("Service '{0}' does not support chat completion")]
    UnsupportedService(String),

    /// The planner could not produce a viable plan
    #[error("Plan generation failed: {0}")]
    PlanGeneration(String),

    /// A plan step failed; remaining steps were not run
    #[error("Step {index} ({function}) failed: {source}")]
    StepExecution {
        index: usize,
        function: String,
        #[source]
        source: Box<SkeinError>,
    },

    /// Every attempt failed; displays the last attempt's error unchanged
    #[error("{last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<SkeinError>,
    },

    /// The run was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Strict transcript parsing found a malformed role marker
    #[error("Malformed role marker '{marker}' at byte {offset}")]
    Transcript { offset: usize, marker: String },

    /// The completion provider failed or returned an unusable response
    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function already registered: {0}")]
    DuplicateFunction(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// A native callable reported its own failure
    #[error("Function error: {0}")]
    Function(String),

    /// A function definition document could not be loaded
    #[error("Invalid function definition: {0}")]
    Definition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<SkeinError>,
    },
}

impl SkeinError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the retry loop may discard this attempt and plan again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SkeinError::PlanGeneration(_) | SkeinError::StepExecution { .. } => true,
            SkeinError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The underlying error of the final attempt, for `RetryExhausted`.
    pub fn last_error(&self) -> Option<&SkeinError> {
        match self {
            SkeinError::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Step index of a step failure.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            SkeinError::StepExecution { index, .. } => Some(*index),
            SkeinError::RetryExhausted { last, .. } => last.step_index(),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for SkeinError {
    fn from(e: serde_yaml::Error) -> Self {
        SkeinError::Definition(e.to_string())
    }
}

impl From<toml::de::Error> for SkeinError {
    fn from(e: toml::de::Error) -> Self {
        SkeinError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for SkeinError {
    fn from(e: toml::ser::Error) -> Self {
        SkeinError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for SkeinError {
    fn from(e: reqwest::Error) -> Self {
        SkeinError::Completion(e.to_string())
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = SkeinError::FunctionNotFound("Math.Add".to_string());
        let err = err.context("Failed to resolve step");

        assert!(err.to_string().contains("Failed to resolve step"));
        assert!(err.to_string().contains("Math.Add"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(SkeinError::Definition("empty name".to_string()));
        let result = result.context("Loading add.yaml");

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Loading add.yaml"));
    }

    #[test]
    fn test_retry_exhausted_displays_last_error() {
        let last = SkeinError::StepExecution {
            index: 1,
            function: "Math.Divide".to_string(),
            source: Box::new(SkeinError::Function("boom".to_string())),
        };
        let expected = last.to_string();
        let err = SkeinError::RetryExhausted {
            attempts: 2,
            last: Box::new(last),
        };

        assert_eq!(err.to_string(), expected);
        assert_eq!(err.step_index(), Some(1));
        assert!(err.last_error().is_some());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SkeinError::PlanGeneration("none".into()).is_retryable());
        assert!(SkeinError::PlanGeneration("none".into())
            .context("attempt 1")
            .is_retryable());
        assert!(!SkeinError::Render("undefined".into()).is_retryable());
        assert!(!SkeinError::UnsupportedService("text-only".into()).is_retryable());
        assert!(!SkeinError::Cancelled.is_retryable());
    }
}
