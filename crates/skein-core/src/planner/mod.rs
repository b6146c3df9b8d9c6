//! Planner module
//!
//! A planner turns goal text and a filtered catalog view into a [`Plan`].
//! When an earlier attempt failed, the planner also receives that attempt's
//! plan and error so it can steer away from the same step sequence. Avoiding
//! the repeat is best effort; nothing here checks it.
//!
//! The planner does NOT handle:
//! - Running the plan
//! - Retrying after failures

pub mod llm;

pub use llm::{LlmPlanner, LlmPlannerConfig};

use async_trait::async_trait;
use std::sync::Arc;

use crate::catalog::CatalogView;
use crate::context::InvocationContext;
use crate::error::Result;
use crate::plan::Plan;

/// What went wrong last time
///
/// `plan` is the exact plan that failed, shared read-only. It is `None` when
/// the planner itself failed and no plan was produced. `error` is the failure
/// message as it was displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFeedback {
    pub plan: Option<Arc<Plan>>,
    pub error: String,
}

impl PlanFeedback {
    pub fn new(plan: Option<Arc<Plan>>, error: impl Into<String>) -> Self {
        Self {
            plan,
            error: error.into(),
        }
    }

    /// Canonical text of the failed plan
    pub fn plan_text(&self) -> Option<String> {
        self.plan.as_ref().map(|p| p.to_string())
    }
}

/// Generates plans from goals
///
/// Fails with `SkeinError::PlanGeneration` when no viable plan can be built
/// from `functions`.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        goal: &str,
        functions: &CatalogView,
        feedback: Option<&PlanFeedback>,
        context: &InvocationContext,
    ) -> Result<Plan>;
}
