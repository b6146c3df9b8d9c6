use std::sync::atomic::{AtomicBool, Ordering};

use skein_core::function::InvocationResult;
use skein_core::plan::Plan;
use skein_core::retry::{PlanObserver, TracingObserver};
use skein_core::SkeinError;

/// Prints plans and outcomes to stdout and mirrors them to `tracing`
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    tracing: TracingObserver,
    failed: AtomicBool,
}

impl ConsoleObserver {
    /// Whether an `Error:` block has already been printed for this run
    pub fn reported_failure(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl PlanObserver for ConsoleObserver {
    fn on_plan(&self, attempt: u32, plan: &Plan) {
        self.tracing.on_plan(attempt, plan);
        println!("\nPlan: {}", plan.to_string().trim());
    }

    fn on_success(&self, attempt: u32, result: &InvocationResult) {
        self.tracing.on_success(attempt, result);
        println!("\n\nResult: {}\n", result.to_string().trim());
    }

    fn on_failure(&self, attempt: u32, error: &SkeinError) {
        self.tracing.on_failure(attempt, error);
        self.failed.store(true, Ordering::SeqCst);
        println!("\n\nError: {error}");
    }
}
