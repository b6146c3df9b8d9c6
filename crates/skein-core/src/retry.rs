//! Retry Controller - Plan -> Execute -> (feedback) -> Plan again
//!
//! Runs bounded planner/executor cycles. A failed attempt is never repaired
//! in place: the whole attempt is discarded and the planner is asked again
//! with the failed plan and its error. After `max_extra_tries` retries the
//! last attempt's error is returned inside `RetryExhausted`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::catalog::CatalogFilter;
use crate::context::InvocationContext;
use crate::error::{Result, SkeinError};
use crate::executor::PlanExecutor;
use crate::function::{native::Arguments, FunctionSpec, Invocable, InvocationResult};
use crate::plan::Plan;
use crate::planner::{PlanFeedback, Planner};
use crate::Variables;

/// Default number of retries beyond the first attempt
pub const DEFAULT_MAX_EXTRA_TRIES: u32 = 1;

/// Receives plan text and outcomes as the loop progresses.
///
/// Purely informational; implementations must not influence the run.
pub trait PlanObserver: Send + Sync {
    /// A plan was produced and is about to run
    fn on_plan(&self, _attempt: u32, _plan: &Plan) {}

    /// The run finished with a result
    fn on_success(&self, _attempt: u32, _result: &InvocationResult) {}

    /// An attempt failed. Called for every failed attempt, fatal or not.
    fn on_failure(&self, _attempt: u32, _error: &SkeinError) {}
}

/// Writes plans and outcomes as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PlanObserver for TracingObserver {
    fn on_plan(&self, attempt: u32, plan: &Plan) {
        tracing::info!(attempt, steps = plan.len(), "Plan:\n{}", plan.to_string().trim_end());
    }

    fn on_success(&self, attempt: u32, result: &InvocationResult) {
        tracing::info!(attempt, "Result: {}", result);
    }

    fn on_failure(&self, attempt: u32, error: &SkeinError) {
        tracing::warn!(attempt, retryable = error.is_retryable(), "Error: {}", error);
    }
}

/// Bookkeeping for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub attempts_remaining: u32,
    pub last_plan: Option<Arc<Plan>>,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new(max_extra_tries: u32) -> Self {
        Self {
            attempt: 0,
            attempts_remaining: max_extra_tries,
            last_plan: None,
            last_error: None,
        }
    }

    /// Feedback for the next planning call, once an attempt has failed
    pub fn feedback(&self) -> Option<PlanFeedback> {
        self.last_error
            .as_ref()
            .map(|error| PlanFeedback::new(self.last_plan.clone(), error.clone()))
    }
}

/// Loop phases
enum Phase {
    Planning { feedback: Option<PlanFeedback> },
    Executing { plan: Arc<Plan> },
    Succeeded(InvocationResult),
    Exhausted(SkeinError),
}

/// Bounded plan/execute loop with feedback
#[derive(Clone)]
pub struct RetryController {
    planner: Arc<dyn Planner>,
    executor: PlanExecutor,
    filter: CatalogFilter,
    max_extra_tries: u32,
    observer: Arc<dyn PlanObserver>,
}

impl RetryController {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self {
            planner,
            executor: PlanExecutor::new(),
            filter: CatalogFilter::default(),
            max_extra_tries: DEFAULT_MAX_EXTRA_TRIES,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_filter(mut self, filter: CatalogFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_extra_tries(mut self, max_extra_tries: u32) -> Self {
        self.max_extra_tries = max_extra_tries;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlanObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn filter(&self) -> &CatalogFilter {
        &self.filter
    }

    pub fn max_extra_tries(&self) -> u32 {
        self.max_extra_tries
    }

    /// Plan and execute `goal` against the filtered catalog. Plans may only
    /// call functions the planner was shown.
    pub async fn run(&self, goal: &str, context: &InvocationContext, variables: &Variables) -> Result<InvocationResult> {
        self.run_with_filter(goal, &self.filter, context, variables).await
    }

    /// Same as [`run`](Self::run) with an explicit catalog filter
    pub async fn run_with_filter(
        &self,
        goal: &str,
        filter: &CatalogFilter,
        context: &InvocationContext,
        variables: &Variables,
    ) -> Result<InvocationResult> {
        let functions = context.catalog().view(filter);
        let mut state = RetryState::new(self.max_extra_tries);
        let mut phase = Phase::Planning { feedback: None };

        loop {
            phase = match phase {
                Phase::Planning { feedback } => {
                    state.attempt += 1;
                    tracing::debug!(attempt = state.attempt, functions = functions.len(), "Planning");

                    let created = context
                        .guard(self.planner.create_plan(goal, &functions, feedback.as_ref(), context))
                        .await;
                    match created {
                        Ok(plan) => {
                            let plan = Arc::new(plan);
                            self.observer.on_plan(state.attempt, &plan);
                            Phase::Executing { plan }
                        }
                        Err(e) => self.after_failure(&mut state, None, e)?,
                    }
                }
                Phase::Executing { plan } => {
                    let executed = context
                        .guard(self.executor.execute_in(&plan, &functions, context, variables))
                        .await;
                    match executed {
                        Ok(result) => Phase::Succeeded(result),
                        Err(e) => self.after_failure(&mut state, Some(plan), e)?,
                    }
                }
                Phase::Succeeded(result) => {
                    self.observer.on_success(state.attempt, &result);
                    return Ok(result);
                }
                Phase::Exhausted(last) => {
                    tracing::warn!(attempts = state.attempt, "Retries exhausted");
                    return Err(SkeinError::RetryExhausted {
                        attempts: state.attempt,
                        last: Box::new(last),
                    });
                }
            };
        }
    }

    /// Fatal errors (and cancellation) leave the loop immediately
    fn after_failure(&self, state: &mut RetryState, plan: Option<Arc<Plan>>, error: SkeinError) -> Result<Phase> {
        self.observer.on_failure(state.attempt, &error);

        if !error.is_retryable() {
            return Err(error);
        }

        state.last_plan = plan;
        state.last_error = Some(error.to_string());

        if state.attempts_remaining == 0 {
            return Ok(Phase::Exhausted(error));
        }
        state.attempts_remaining -= 1;

        Ok(Phase::Planning {
            feedback: state.feedback(),
        })
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("executor", &self.executor)
            .field("filter", &self.filter)
            .field("max_extra_tries", &self.max_extra_tries)
            .finish_non_exhaustive()
    }
}

/// Invocable that solves its input by planning over the catalog.
///
/// The goal text is `goal_prefix` followed by the input parameter's value.
/// The function's own qualified name is always excluded from the catalog the
/// planner sees, so a plan can never call back into it.
#[derive(Debug, Clone)]
pub struct GoalFunction {
    spec: FunctionSpec,
    input: String,
    goal_prefix: String,
    controller: RetryController,
}

impl GoalFunction {
    /// `spec` should declare the input parameter, `input` by default
    pub fn new(spec: FunctionSpec, controller: RetryController) -> Self {
        Self {
            spec,
            input: "input".to_string(),
            goal_prefix: String::new(),
            controller,
        }
    }

    pub fn with_input_parameter(mut self, name: impl Into<String>) -> Self {
        self.input = name.into();
        self
    }

    pub fn with_goal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.goal_prefix = prefix.into();
        self
    }

    /// Additional functions to hide from the planner
    pub fn exclude_function(mut self, qualified_name: impl Into<String>) -> Self {
        let filter = self.controller.filter().clone().exclude_function(qualified_name);
        self.controller = self.controller.with_filter(filter);
        self
    }

    /// The filter actually handed to the planner
    pub fn effective_filter(&self) -> CatalogFilter {
        self.controller
            .filter()
            .clone()
            .exclude_function(self.spec.qualified_name())
    }

    pub fn goal_text(&self, variables: &Variables) -> Result<String> {
        let input = Arguments::new(&self.spec, variables).string(&self.input)?;
        Ok(format!("{}{}", self.goal_prefix, input))
    }
}

#[async_trait]
impl Invocable for GoalFunction {
    fn describe(&self) -> &FunctionSpec {
        &self.spec
    }

    async fn invoke(&self, context: &InvocationContext, variables: &Variables) -> Result<InvocationResult> {
        let goal = self.goal_text(variables)?;
        let filter = self.effective_filter();

        tracing::info!(function = %self.spec.qualified_name(), "Solving goal");

        let solved = self
            .controller
            .run_with_filter(&goal, &filter, context, variables)
            .await?;

        Ok(InvocationResult {
            metadata: solved.metadata,
            ..InvocationResult::new(&self.spec, solved.value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogView, FunctionCatalog};
    use crate::completion::CompletionService;
    use crate::function::{NativeFunction, ParameterSpec, ParameterType};
    use crate::plan::{Binding, PlanStep};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct NoService;

    impl CompletionService for NoService {
        fn service_id(&self) -> &str {
            "none"
        }
    }

    /// Hands out scripted outcomes and records what it was given
    #[derive(Default)]
    struct ScriptedPlanner {
        outcomes: Mutex<VecDeque<Result<Plan>>>,
        feedback: Mutex<Vec<Option<PlanFeedback>>>,
        views: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedPlanner {
        fn new(outcomes: Vec<Result<Plan>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.feedback.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn create_plan(
            &self,
            _goal: &str,
            functions: &CatalogView,
            feedback: Option<&PlanFeedback>,
            _context: &InvocationContext,
        ) -> Result<Plan> {
            self.feedback.lock().unwrap().push(feedback.cloned());
            self.views.lock().unwrap().push(functions.names());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SkeinError::PlanGeneration("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl PlanObserver for RecordingObserver {
        fn on_plan(&self, attempt: u32, _plan: &Plan) {
            self.events.lock().unwrap().push(format!("plan {attempt}"));
        }

        fn on_success(&self, attempt: u32, _result: &InvocationResult) {
            self.events.lock().unwrap().push(format!("success {attempt}"));
        }

        fn on_failure(&self, attempt: u32, _error: &SkeinError) {
            self.events.lock().unwrap().push(format!("failure {attempt}"));
        }
    }

    fn context() -> InvocationContext {
        let add = FunctionSpec::new("Math", "Add", "Adds")
            .with_parameter(ParameterSpec::new("number1", "a", ParameterType::Number))
            .with_parameter(ParameterSpec::new("number2", "b", ParameterType::Number));
        let catalog = FunctionCatalog::new()
            .with_function(NativeFunction::new(add, |args| {
                Ok(json!(args.number("number1")? + args.number("number2")?))
            }))
            .and_then(|c| {
                c.with_function(NativeFunction::new(FunctionSpec::new("Math", "Fail", "Fails"), |_| {
                    Err(SkeinError::Function("no".to_string()))
                }))
            })
            .unwrap();
        InvocationContext::new(Arc::new(NoService)).with_catalog(Arc::new(catalog))
    }

    fn add_plan() -> Plan {
        Plan::new("compute 2+2").step(
            PlanStep::new("Math.Add")
                .arg("number1", Binding::literal(2))
                .arg("number2", Binding::literal(2)),
        )
    }

    fn failing_plan() -> Plan {
        Plan::new("compute 2+2").step(PlanStep::new("Math.Fail"))
    }

    #[tokio::test]
    async fn test_first_attempt_success_builds_no_feedback() {
        let planner = ScriptedPlanner::new(vec![Ok(add_plan())]);
        let observer = Arc::new(RecordingObserver::default());
        let controller = RetryController::new(planner.clone()).with_observer(observer.clone());

        let result = controller.run("compute 2+2", &context(), &Variables::new()).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        assert_eq!(planner.feedback.lock().unwrap().as_slice(), &[None]);
        assert_eq!(*observer.events.lock().unwrap(), vec!["plan 1", "success 1"]);
    }

    #[tokio::test]
    async fn test_retry_feeds_back_failed_plan() {
        let planner = ScriptedPlanner::new(vec![Ok(failing_plan()), Ok(add_plan())]);
        let controller = RetryController::new(planner.clone());

        let result = controller.run("compute 2+2", &context(), &Variables::new()).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        let feedback = planner.feedback.lock().unwrap();
        let second = feedback[1].as_ref().unwrap();
        assert_eq!(second.plan.as_deref(), Some(&failing_plan()));
        assert_eq!(second.error, "Step 0 (Math.Fail) failed: Function error: no");
    }

    #[tokio::test]
    async fn test_planning_failure_counts_as_attempt() {
        let planner = ScriptedPlanner::new(vec![
            Err(SkeinError::PlanGeneration("nothing fits".to_string())),
            Ok(add_plan()),
        ]);
        let controller = RetryController::new(planner.clone());

        let result = controller.run("compute 2+2", &context(), &Variables::new()).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        let feedback = planner.feedback.lock().unwrap();
        let second = feedback[1].as_ref().unwrap();
        assert!(second.plan.is_none());
        assert_eq!(second.error, "Plan generation failed: nothing fits");
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let planner = ScriptedPlanner::new(vec![
            Err(SkeinError::PlanGeneration("first".to_string())),
            Ok(failing_plan()),
            Ok(add_plan()),
        ]);
        let observer = Arc::new(RecordingObserver::default());
        let controller = RetryController::new(planner.clone()).with_observer(observer.clone());

        let err = controller.run("compute 2+2", &context(), &Variables::new()).await.unwrap_err();

        assert_eq!(planner.calls(), 2);
        match &err {
            SkeinError::RetryExhausted { attempts, last } => {
                assert_eq!(*attempts, 2);
                assert!(matches!(**last, SkeinError::StepExecution { index: 0, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.to_string(), "Step 0 (Math.Fail) failed: Function error: no");
        assert_eq!(*observer.events.lock().unwrap(), vec!["failure 1", "plan 2", "failure 2"]);
    }

    #[tokio::test]
    async fn test_unresolvable_result_feeds_the_retry_loop() {
        let planner = ScriptedPlanner::new(vec![
            Ok(add_plan().returning(Binding::variable("answer"))),
            Ok(add_plan()),
        ]);
        let controller = RetryController::new(planner.clone());

        let result = controller.run("compute 2+2", &context(), &Variables::new()).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        assert_eq!(planner.calls(), 2);
        let feedback = planner.feedback.lock().unwrap();
        assert!(feedback[1].as_ref().unwrap().error.contains("'answer'"));
    }

    #[tokio::test]
    async fn test_plan_cannot_call_filtered_out_function() {
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut catalog = FunctionCatalog::new()
            .with_function(NativeFunction::new(
                FunctionSpec::new("Math", "Add", "Adds")
                    .with_parameter(ParameterSpec::new("number1", "a", ParameterType::Number))
                    .with_parameter(ParameterSpec::new("number2", "b", ParameterType::Number)),
                |args| Ok(json!(args.number("number1")? + args.number("number2")?)),
            ))
            .unwrap();
        catalog
            .register(Arc::new(NativeFunction::new(FunctionSpec::new("Math", "Hidden", "Hidden"), move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!("hidden ran"))
            })))
            .unwrap();
        let ctx = InvocationContext::new(Arc::new(NoService)).with_catalog(Arc::new(catalog));

        let planner = ScriptedPlanner::new(vec![
            Ok(Plan::new("x").step(PlanStep::new("Math.Hidden"))),
            Ok(add_plan()),
        ]);
        let controller = RetryController::new(planner.clone())
            .with_filter(CatalogFilter::new().exclude_function("Math.Hidden"));

        let result = controller.run("compute 2+2", &ctx, &Variables::new()).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
        let feedback = planner.feedback.lock().unwrap();
        assert_eq!(
            feedback[1].as_ref().unwrap().error,
            "Step 0 (Math.Hidden) failed: Function not found: Math.Hidden"
        );
    }

    #[test]
    fn test_retry_state_feedback() {
        let mut state = RetryState::new(1);
        assert!(state.feedback().is_none());

        state.last_plan = Some(Arc::new(failing_plan()));
        state.last_error = Some("boom".to_string());

        let feedback = state.feedback().unwrap();
        assert_eq!(feedback.plan.as_deref(), Some(&failing_plan()));
        assert_eq!(feedback.error, "boom");
    }

    #[tokio::test]
    async fn test_zero_extra_tries_means_one_attempt() {
        let planner = ScriptedPlanner::new(vec![Ok(failing_plan()), Ok(add_plan())]);
        let controller = RetryController::new(planner.clone()).with_max_extra_tries(0);

        let err = controller.run("x", &context(), &Variables::new()).await.unwrap_err();

        assert_eq!(planner.calls(), 1);
        assert!(matches!(err, SkeinError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let planner = ScriptedPlanner::new(vec![
            Err(SkeinError::Render("undefined variable".to_string())),
            Ok(add_plan()),
        ]);
        let controller = RetryController::new(planner.clone()).with_max_extra_tries(3);

        let err = controller.run("x", &context(), &Variables::new()).await.unwrap_err();

        assert_eq!(planner.calls(), 1);
        assert!(matches!(err, SkeinError::Render(_)));
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_exhaustion() {
        let planner = ScriptedPlanner::new(vec![Ok(add_plan())]);
        let ctx = context();
        ctx.cancellation_token().cancel();

        let err = RetryController::new(planner.clone())
            .run("x", &ctx, &Variables::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SkeinError::Cancelled));
        assert_eq!(planner.calls(), 0);
    }

    #[tokio::test]
    async fn test_goal_function_excludes_itself() {
        let planner = ScriptedPlanner::new(vec![Ok(add_plan())]);
        let spec = FunctionSpec::new("Math", "PerformMath", "Solves math problems")
            .with_parameter(ParameterSpec::new("math_problem", "The problem", ParameterType::String));
        let controller = RetryController::new(planner.clone()).with_filter(CatalogFilter::new().include_namespace("Math"));
        let solver = GoalFunction::new(spec, controller)
            .with_input_parameter("math_problem")
            .with_goal_prefix("Solve the following math problem.\n\n")
            .exclude_function("Math.Fail");

        let mut catalog = FunctionCatalog::new()
            .with_function(NativeFunction::new(
                FunctionSpec::new("Math", "Add", "Adds")
                    .with_parameter(ParameterSpec::new("number1", "a", ParameterType::Number))
                    .with_parameter(ParameterSpec::new("number2", "b", ParameterType::Number)),
                |args| Ok(json!(args.number("number1")? + args.number("number2")?)),
            ))
            .unwrap();
        catalog.register(Arc::new(solver.clone())).unwrap();
        let ctx = InvocationContext::new(Arc::new(NoService)).with_catalog(Arc::new(catalog));

        let mut vars = Variables::new();
        vars.insert("math_problem".to_string(), json!("2+2"));
        let result = solver.invoke(&ctx, &vars).await.unwrap();

        assert_eq!(result.value.as_f64(), Some(4.0));
        assert_eq!(result.qualified_name(), "Math.PerformMath");
        assert_eq!(
            solver.goal_text(&vars).unwrap(),
            "Solve the following math problem.\n\n2+2"
        );
        assert_eq!(*planner.views.lock().unwrap(), vec![vec!["Math.Add".to_string()]]);
    }
}
