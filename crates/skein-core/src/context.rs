//! Invocation context
//!
//! Every operation receives the capabilities it needs through an
//! [`InvocationContext`]: the template engine, the completion service, the
//! function catalog, ambient variables and a cancellation token. There is no
//! process-wide service lookup.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::FunctionCatalog;
use crate::completion::CompletionService;
use crate::error::{Result, SkeinError};
use crate::template::{HandlebarsEngine, TemplateEngine};
use crate::Variables;

/// Explicit dependency bundle passed to every invocation. Cheap to clone.
#[derive(Clone)]
pub struct InvocationContext {
    template_engine: Arc<dyn TemplateEngine>,
    completion: Arc<dyn CompletionService>,
    catalog: Arc<FunctionCatalog>,
    variables: Variables,
    cancellation: CancellationToken,
}

impl InvocationContext {
    /// Create a context with the handlebars engine and an empty catalog
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            template_engine: Arc::new(HandlebarsEngine::new()),
            completion,
            catalog: Arc::new(FunctionCatalog::new()),
            variables: Variables::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_template_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.template_engine = engine;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<FunctionCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn template_engine(&self) -> &dyn TemplateEngine {
        self.template_engine.as_ref()
    }

    pub fn completion(&self) -> &dyn CompletionService {
        self.completion.as_ref()
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Ambient variables shared by every invocation made with this context
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail fast if cancellation was already requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SkeinError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race a suspension point against the cancellation token
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(SkeinError::Cancelled),
            result = fut => result,
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("template_engine", &self.template_engine.format())
            .field("completion", &self.completion.service_id())
            .field("functions", &self.catalog.len())
            .field("variables", &self.variables)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
