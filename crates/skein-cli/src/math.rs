//! Math plugin
//!
//! Arithmetic functions over IEEE-754 doubles, a semantic function that writes
//! word problems, and `PerformMath`, which solves a problem by planning over
//! the rest of the plugin.

use serde_json::{json, Value};
use std::sync::Arc;

use skein_core::catalog::{CatalogFilter, FunctionCatalog};
use skein_core::function::{Arguments, FunctionSpec, NativeFunction, ParameterSpec, ParameterType, SemanticFunction};
use skein_core::planner::Planner;
use skein_core::retry::{GoalFunction, PlanObserver, RetryController};
use skein_core::{Result, SkeinError};

pub const NAMESPACE: &str = "Math";

const GENERATE_MATH_PROBLEM: &str = include_str!("../functions/GenerateMathProblem.yaml");

const GOAL_PREFIX: &str = "Solve the following math problem.\n\n";

fn number(name: &str, description: &str) -> ParameterSpec {
    ParameterSpec::new(name, description, ParameterType::Number)
}

fn spec(name: &str, description: &str, output: &str) -> FunctionSpec {
    FunctionSpec::new(NAMESPACE, name, description).with_output_description(output)
}

fn unary(name: &str, description: &str, output: &str, sample: (f64, &str), op: fn(f64) -> f64) -> NativeFunction {
    let spec = spec(name, description, output)
        .with_parameter(number("number", "The number"))
        .with_sample(json!({ "number": sample.0 }), sample.1);
    NativeFunction::new(spec, move |args| Ok(json!(op(args.number("number")?))))
}

fn binary(
    name: &str,
    description: &str,
    output: &str,
    params: [(&str, &str); 2],
    sample: (f64, f64, &str),
    op: fn(f64, f64) -> f64,
) -> NativeFunction {
    let [(a, a_desc), (b, b_desc)] = params;
    let spec = spec(name, description, output)
        .with_parameter(number(a, a_desc))
        .with_parameter(number(b, b_desc))
        .with_sample(json!({ a: sample.0, b: sample.1 }), sample.2);
    let (a, b) = (a.to_string(), b.to_string());
    NativeFunction::new(spec, move |args| Ok(json!(op(args.number(&a)?, args.number(&b)?))))
}

/// Banker's rounding to `digits` decimal places
fn round(args: &Arguments<'_>) -> Result<Value> {
    let number = args.number("number")?;
    let digits = args.number("digits")?;
    if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
        return Err(SkeinError::InvalidArgument {
            name: "digits".to_string(),
            reason: format!("must be a whole number between 0 and 15, got {digits}"),
        });
    }
    let scale = 10f64.powi(digits as i32);
    Ok(json!((number * scale).round_ties_even() / scale))
}

fn sign(args: &Arguments<'_>) -> Result<Value> {
    let number = args.number("number")?;
    if number.is_nan() {
        return Err(SkeinError::Function("the sign of NaN is undefined".to_string()));
    }
    let sign = if number > 0.0 {
        1.0
    } else if number < 0.0 {
        -1.0
    } else {
        0.0
    };
    Ok(json!(sign))
}

/// The arithmetic leaf functions
pub fn functions() -> Vec<NativeFunction> {
    let pair = [("number1", "The first number"), ("number2", "The second number")];
    let fraction = [("dividend", "The dividend"), ("divisor", "The divisor")];

    vec![
        binary("Add", "Adds two numbers.", "The summation of the numbers.", pair, (1.0, 2.0, "3"), |a, b| a + b),
        binary(
            "Subtract",
            "Subtracts two numbers.",
            "The difference between the minuend and subtrahend.",
            [("minuend", "The minuend"), ("subtrahend", "The subtrahend")],
            (5.0, 2.0, "3"),
            |a, b| a - b,
        ),
        binary("Multiply", "Multiplies two numbers.", "The product of the numbers.", pair, (5.0, 2.0, "10"), |a, b| a * b),
        binary(
            "Divide",
            "Divides two numbers.",
            "The quotient of the dividend and divisor.",
            fraction,
            (10.0, 2.0, "5"),
            |a, b| a / b,
        ),
        binary(
            "Modulo",
            "Gets the remainder of two numbers.",
            "The remainder of the dividend and divisor.",
            fraction,
            (10.0, 3.0, "1"),
            |a, b| a % b,
        ),
        unary("Abs", "Gets the absolute value of a number.", "The absolute value of the number.", (-10.0, "10"), f64::abs),
        unary("Ceiling", "Gets the ceiling of a number.", "The ceiling of the number.", (5.1, "6"), f64::ceil),
        unary("Floor", "Gets the floor of a number.", "The floor of the number.", (5.9, "5"), f64::floor),
        binary("Max", "Gets the maximum of two numbers.", "The maximum of the two numbers.", pair, (5.0, 10.0, "10"), f64::max),
        binary("Min", "Gets the minimum of two numbers.", "The minimum of the two numbers.", pair, (5.0, 10.0, "5"), f64::min),
        NativeFunction::new(
            spec("Sign", "Gets the sign of a number.", "The sign of the number.")
                .with_parameter(number("number", "The number"))
                .with_sample(json!({ "number": -10 }), "-1"),
            sign,
        ),
        unary("Sqrt", "Gets the square root of a number.", "The square root of the number.", (25.0, "5"), f64::sqrt),
        unary("Sin", "Gets the sine of a number.", "The sine of the number.", (0.0, "0"), f64::sin),
        unary("Cos", "Gets the cosine of a number.", "The cosine of the number.", (0.0, "1"), f64::cos),
        unary("Tan", "Gets the tangent of a number.", "The tangent of the number.", (0.0, "0"), f64::tan),
        binary(
            "Pow",
            "Raises a number to a power.",
            "The number raised to the power.",
            [("number1", "The number"), ("number2", "The power")],
            (5.0, 2.0, "25"),
            f64::powf,
        ),
        NativeFunction::new(
            spec("Round", "Gets a rounded number.", "The rounded number.")
                .with_parameter(number("number", "The number"))
                .with_parameter(number("digits", "The number of digits to round to").with_default(json!(0)))
                .with_sample(json!({ "number": 1.23456, "digits": 2 }), "1.23"),
            round,
        ),
    ]
}

/// Writes a word problem for a topic
pub fn generate_math_problem() -> Result<SemanticFunction> {
    SemanticFunction::from_yaml_str(GENERATE_MATH_PROBLEM)
}

/// Goal-solving entry point; the planner only sees the arithmetic functions
pub fn perform_math(planner: Arc<dyn Planner>, max_extra_tries: u32, observer: Arc<dyn PlanObserver>) -> GoalFunction {
    let controller = RetryController::new(planner)
        .with_filter(CatalogFilter::new().include_namespace(NAMESPACE))
        .with_max_extra_tries(max_extra_tries)
        .with_observer(observer);

    let spec = spec(
        "PerformMath",
        "Uses functions from the Math plugin to solve math problems.",
        "The answer to the math problem.",
    )
    .with_parameter(ParameterSpec::new(
        "math_problem",
        "A description of a math problem; use the GenerateMathProblem function to create one.",
        ParameterType::String,
    ))
    .with_sample(
        json!({ "math_problem": "If I started with $120 in the stock market, how much would I have after 10 years if the growth rate was 5%?" }),
        "After 10 years, starting with $120, and with a growth rate of 5%, you would have $195.47 in the stock market.",
    );

    GoalFunction::new(spec, controller)
        .with_input_parameter("math_problem")
        .with_goal_prefix(GOAL_PREFIX)
        .exclude_function(format!("{NAMESPACE}.GenerateMathProblem"))
}

/// The whole plugin, registered under `Math`
pub fn catalog(perform_math: GoalFunction) -> Result<FunctionCatalog> {
    let mut catalog = FunctionCatalog::new();
    for function in functions() {
        catalog.register(Arc::new(function))?;
    }
    catalog.register(Arc::new(generate_math_problem()?))?;
    catalog.register(Arc::new(perform_math))?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skein_core::catalog::CatalogView;
    use skein_core::completion::CompletionService;
    use skein_core::function::Invocable;
    use skein_core::plan::Plan;
    use skein_core::planner::PlanFeedback;
    use skein_core::retry::TracingObserver;
    use skein_core::{InvocationContext, Variables};
    use std::sync::Mutex;

    struct NoService;

    impl CompletionService for NoService {
        fn service_id(&self) -> &str {
            "none"
        }
    }

    /// Records the catalog view it was offered and never produces a plan
    #[derive(Default)]
    struct ViewRecorder {
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Planner for ViewRecorder {
        async fn create_plan(
            &self,
            _goal: &str,
            functions: &CatalogView,
            _feedback: Option<&PlanFeedback>,
            _context: &InvocationContext,
        ) -> Result<Plan> {
            *self.names.lock().unwrap() = functions.names();
            Err(SkeinError::PlanGeneration("recording only".to_string()))
        }
    }

    fn plugin() -> FunctionCatalog {
        let solver = perform_math(Arc::new(ViewRecorder::default()), 0, Arc::new(TracingObserver));
        catalog(solver).unwrap()
    }

    fn call(name: &str, args: Value) -> Result<Value> {
        let catalog = plugin();
        let function = catalog.get(&format!("Math.{name}")).unwrap();
        let ctx = InvocationContext::new(Arc::new(NoService));
        let vars: Variables = args.as_object().cloned().unwrap_or_default();
        tokio_test::block_on(function.invoke(&ctx, &vars)).map(|r| r.value)
    }

    fn eval(name: &str, args: Value) -> f64 {
        call(name, args).unwrap().as_f64().unwrap()
    }

    #[test]
    fn test_fixtures() {
        assert_eq!(eval("Add", json!({"number1": 1, "number2": 2})), 3.0);
        assert_eq!(eval("Divide", json!({"dividend": 10, "divisor": 2})), 5.0);
        assert_eq!(eval("Modulo", json!({"dividend": 10, "divisor": 3})), 1.0);
        assert_eq!(eval("Round", json!({"number": 1.23456, "digits": 2})), 1.23);
    }

    #[test]
    fn test_samples_hold() {
        for function in functions() {
            let spec = function.describe().clone();
            for sample in &spec.samples {
                let actual = eval(&spec.name, sample.inputs.clone());
                let expected: f64 = sample.output.parse().unwrap();
                assert_eq!(actual, expected, "{} sample", spec.name);
            }
        }
    }

    #[test]
    fn test_round_defaults_to_whole_numbers_and_ties_to_even() {
        assert_eq!(eval("Round", json!({"number": 2.5})), 2.0);
        assert_eq!(eval("Round", json!({"number": 3.5})), 4.0);
        assert!(call("Round", json!({"number": 1.0, "digits": 16})).is_err());
    }

    #[test]
    fn test_ieee_edge_cases() {
        // serde_json stores non-finite floats as null
        assert_eq!(call("Divide", json!({"dividend": 1, "divisor": 0})).unwrap(), Value::Null);
        assert_eq!(eval("Sign", json!({"number": 0})), 0.0);
        assert_eq!(eval("Sign", json!({"number": "-3"})), -1.0);
        assert_eq!(eval("Subtract", json!({"minuend": 5, "subtrahend": 2})), 3.0);
    }

    #[test]
    fn test_plugin_registration() {
        let catalog = plugin();

        assert_eq!(catalog.len(), 19);
        assert!(catalog.contains("Math.PerformMath"));
        assert!(catalog.contains("Math.GenerateMathProblem"));
    }

    #[test]
    fn test_perform_math_hides_orchestration_functions() {
        let recorder = Arc::new(ViewRecorder::default());
        let solver = perform_math(recorder.clone(), 0, Arc::new(TracingObserver));
        let catalog = catalog(solver.clone()).unwrap();
        let ctx = InvocationContext::new(Arc::new(NoService)).with_catalog(Arc::new(catalog));

        let mut vars = Variables::new();
        vars.insert("math_problem".to_string(), json!("What is 2 + 2?"));
        let err = tokio_test::block_on(solver.invoke(&ctx, &vars)).unwrap_err();

        assert!(matches!(err, SkeinError::RetryExhausted { attempts: 1, .. }));
        let names = recorder.names.lock().unwrap();
        assert_eq!(names.len(), 17);
        assert!(!names.iter().any(|n| n == "Math.PerformMath" || n == "Math.GenerateMathProblem"));
    }
}
