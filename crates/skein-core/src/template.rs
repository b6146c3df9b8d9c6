//! Templating capability
//!
//! Rendering is consumed through [`TemplateEngine`]; the grammar itself
//! belongs to the engine. [`HandlebarsEngine`] is the stock implementation.

use async_trait::async_trait;
use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};

use crate::error::{Result, SkeinError};
use crate::Variables;

/// Renders a template string against a set of variables
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    /// Engine name, e.g. `handlebars`
    fn format(&self) -> &str;

    /// Render `template` with `data`. Failures are `SkeinError::Render`.
    async fn render(&self, template: &str, data: &Variables) -> Result<String>;
}

/// Handlebars engine in strict mode with escaping disabled.
///
/// Strict mode turns references to undefined variables into render errors.
/// Escaping is off so role markers and variable values reach the transcript
/// parser verbatim. A `json` helper prints any value as compact JSON.
pub struct HandlebarsEngine {
    registry: Handlebars<'static>,
}

impl HandlebarsEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("json", Box::new(json_helper));
        Self { registry }
    }

    /// Access the registry to add helpers or partials
    pub fn registry_mut(&mut self) -> &mut Handlebars<'static> {
        &mut self.registry
    }
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlebarsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsEngine").finish_non_exhaustive()
    }
}

#[async_trait]
impl TemplateEngine for HandlebarsEngine {
    fn format(&self) -> &str {
        "handlebars"
    }

    async fn render(&self, template: &str, data: &Variables) -> Result<String> {
        self.registry
            .render_template(template, data)
            .map_err(|e| SkeinError::Render(e.to_string()))
    }
}

fn json_helper(
    h: &Helper<'_>,
    _: &Handlebars<'_>,
    _: &Context,
    _: &mut RenderContext<'_, '_>,
    out: &mut dyn Output,
) -> HelperResult {
    let rendered = h
        .param(0)
        .map(|p| p.value().to_string())
        .unwrap_or_else(|| "null".to_string());
    out.write(&rendered)?;
    Ok(())
}
