//! Skein Core - semantic functions and a plan/execute/retry loop
//!
//! Skein turns prompt templates into callable functions and solves goals by
//! planning over a catalog of such functions.
//!
//! # Architecture
//!
//! 1. **Transcript** (`transcript`): parses `<role~>…</role~>` markup into messages
//! 2. **Completion** (`completion`): chat capability query and invocation
//! 3. **Functions** (`function`): semantic and native functions behind one trait
//! 4. **Catalog** (`catalog`): registry with include/exclude filtered views
//! 5. **Planning** (`plan`, `planner`): goal text to an ordered step list
//! 6. **Execution** (`executor`): sequential, fail-fast plan runner
//! 7. **Retry** (`retry`): bounded plan/execute cycles with feedback
//!
//! # Quick Start
//!
//! ```
//! use serde_json::json;
//! use skein_core::catalog::FunctionCatalog;
//! use skein_core::function::{FunctionSpec, NativeFunction, ParameterSpec, ParameterType};
//!
//! let add = FunctionSpec::new("Math", "Add", "Adds two numbers")
//!     .with_parameter(ParameterSpec::new("number1", "The first number", ParameterType::Number))
//!     .with_parameter(ParameterSpec::new("number2", "The second number", ParameterType::Number));
//!
//! let catalog = FunctionCatalog::new()
//!     .with_function(NativeFunction::new(add, |args| {
//!         Ok(json!(args.number("number1")? + args.number("number2")?))
//!     }))
//!     .unwrap();
//!
//! assert!(catalog.contains("Math.Add"));
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod catalog;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod function;
pub mod plan;
pub mod planner;
pub mod retry;
pub mod template;
pub mod transcript;

pub use catalog::{CatalogFilter, CatalogView, FunctionCatalog};
pub use completion::{ChatCompletion, CompletionService, OpenAiCompatibleService, RequestSettings};
pub use config::SkeinConfig;
pub use context::InvocationContext;
pub use error::{Result, ResultExt, SkeinError};
pub use executor::PlanExecutor;
pub use function::{FunctionSpec, Invocable, InvocationResult, NativeFunction, SemanticFunction};
pub use plan::{Binding, Plan, PlanStep};
pub use planner::{LlmPlanner, PlanFeedback, Planner};
pub use retry::{GoalFunction, PlanObserver, RetryController, TracingObserver};
pub use template::{HandlebarsEngine, TemplateEngine};
pub use transcript::{Message, ParsePolicy, Role, Transcript};

/// Template and invocation variables
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Version of the Skein core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the library
pub const NAME: &str = "Skein Core";
