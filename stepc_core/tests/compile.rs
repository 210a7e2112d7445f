//! End-to-end lowering tests: small source functions in, finished state
//! machines out.

use boa_ast::{Expression, Statement, StatementListItem};
use boa_interner::Interner;
use serde_json::json;
use stepc_core::asl::{NodeState, ResultPath, StateKind, StateMachine};
use stepc_core::integration::{
    Integration, IntegrationResolver, NoIntegrations, ResourceTask,
};
use stepc_core::{CompileError, Compiler, FunctionSpec};

fn compile_with(
    source: &str,
    resolver: &dyn IntegrationResolver,
) -> Result<StateMachine, CompileError> {
    let mut interner = Interner::default();
    let script = boa_parser::Parser::new(boa_parser::Source::from_bytes(source))
        .parse_script(&mut interner)
        .expect("test source parses");
    let spec = match script.statements().first() {
        Some(StatementListItem::Statement(Statement::Expression(
            Expression::ArrowFunction(arrow),
        ))) => FunctionSpec {
            params: arrow.parameters(),
            body: &arrow.body().statements()[..],
            interner: &interner,
        },
        Some(StatementListItem::Statement(Statement::Expression(
            Expression::AsyncArrowFunction(arrow),
        ))) => FunctionSpec {
            params: arrow.parameters(),
            body: &arrow.body().statements()[..],
            interner: &interner,
        },
        _ => panic!("expected a single arrow function"),
    };
    Compiler::compile(&spec, resolver, "test-role")
}

fn compile(source: &str) -> StateMachine {
    let machine = compile_with(source, &NoIntegrations).expect("compiles");
    validate(&machine);
    machine
}

fn compile_err(source: &str) -> CompileError {
    compile_with(source, &NoIntegrations).expect_err("compilation is rejected")
}

/// The structural invariants every machine must satisfy: a resolvable
/// `StartAt`, unique resolvable transition targets, and termination.
fn validate(machine: &StateMachine) {
    assert!(
        machine.states.contains_key(&machine.start_at),
        "StartAt `{}` is not a state",
        machine.start_at
    );
    for (name, state) in &machine.states {
        let mut targets: Vec<&String> = Vec::new();
        targets.extend(state.next.iter());
        targets.extend(state.default.iter());
        if let Some(rules) = &state.choices {
            targets.extend(rules.iter().filter_map(|rule| rule.next.as_ref()));
        }
        if let Some(catchers) = &state.catch {
            targets.extend(catchers.iter().map(|catcher| &catcher.next));
        }
        for target in &targets {
            assert!(
                machine.states.contains_key(*target),
                "state `{name}` targets undefined `{target}`"
            );
        }
        let terminal = state.end == Some(true)
            || matches!(state.kind, StateKind::Fail | StateKind::Succeed);
        let choice_with_default =
            matches!(state.kind, StateKind::Choice) && state.default.is_some();
        assert!(
            terminal || state.next.is_some() || choice_with_default,
            "state `{name}` has no way to terminate or continue"
        );
    }
}

fn rendered(machine: &StateMachine) -> String {
    serde_json::to_string(machine).expect("machine serializes")
}

fn end_states<'a>(machine: &'a StateMachine) -> Vec<&'a NodeState> {
    machine
        .states
        .values()
        .filter(|state| state.end == Some(true))
        .collect()
}

#[test]
fn constant_expression_folds_to_a_literal() {
    let machine = compile("() => 1 + 2");
    let text = rendered(&machine);
    assert!(
        !text.contains("States."),
        "constant folding must not emit intrinsics: {text}"
    );
    let returns = end_states(&machine);
    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0].result, Some(json!(3)));
}

#[test]
fn numeric_add_uses_math_add() {
    let machine = compile("(x) => x + 1");
    let text = rendered(&machine);
    assert!(
        text.contains("States.MathAdd($.x, 1)"),
        "expected a MathAdd on the parameter: {text}"
    );
    // The value lands in a heap slot that the terminal Pass returns.
    let returns = end_states(&machine);
    assert_eq!(returns.len(), 1);
    let input = returns[0].input_path.as_deref().expect("return reads a path");
    assert!(input.starts_with("$.heap"), "return reads {input}");
}

#[test]
fn initializer_binds_the_input_parameter() {
    let machine = compile("(x) => x");
    let init = &machine.states[&machine.start_at];
    assert_eq!(init.kind, StateKind::Pass);
    let parameters = init.parameters.as_ref().expect("initializer parameters");
    assert_eq!(
        parameters.get("x.$"),
        Some(&json!("$$.Execution.Input"))
    );
    assert_eq!(
        parameters.get("fnl_context"),
        Some(&json!({ "null": null }))
    );
}

#[test]
fn context_parameter_is_the_bare_context_object() {
    let machine = compile("(x, ctx) => ctx");
    let returns = end_states(&machine);
    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0].input_path.as_deref(), Some("$$"));
}

#[test]
fn filter_with_constant_predicate_is_a_jsonpath_filter() {
    let machine = compile(r#"(xs) => xs.filter(x => x === "a")"#);
    let text = rendered(&machine);
    assert!(
        text.contains("$.xs[?(@ == 'a')]"),
        "expected a JSON Path filter: {text}"
    );
    // No iteration skeleton: nothing splits or rebuilds arrays.
    assert!(!text.contains("arrStr"), "no accumulator expected: {text}");
}

#[test]
fn map_compiles_to_the_iteration_skeleton() {
    let machine = compile("(xs) => xs.map(x => x + 1)");
    let text = rendered(&machine);
    assert!(text.contains(r#""arrStr":"[null""#), "seed accumulator: {text}");
    assert!(text.contains("States.MathAdd($.x, 1)"), "body add: {text}");
    assert!(
        text.contains("States.JsonToString"),
        "append stringifies items: {text}"
    );
    assert!(
        text.contains("States.StringToJson"),
        "end parses the accumulator: {text}"
    );
    // The result is the [1:] slice dropping the null seed.
    assert!(text.contains("[1:]"), "slice off the seed: {text}");
}

#[test]
fn thrown_error_routes_to_the_catch_clause() {
    let machine = compile(
        r#"(x) => { try { throw new Error("boom") } catch (e) { return e.message } }"#,
    );
    let throw = machine
        .states
        .values()
        .find(|state| state.result == Some(json!({ "message": "boom" })))
        .expect("the throw lowers to a Pass carrying the cause");
    let target = throw.next.as_ref().expect("throw transitions to the catch");
    assert!(machine.states.contains_key(target));
    assert_eq!(throw.result_path, Some(ResultPath::Path("$.e".to_string())));
    let returns = end_states(&machine);
    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0].input_path.as_deref(), Some("$.e.message"));
}

#[test]
fn throw_without_a_handler_fails_the_machine() {
    let machine = compile(r#"(x) => { throw new Error("fatal") }"#);
    let fail = machine
        .states
        .values()
        .find(|state| state.kind == StateKind::Fail)
        .expect("an unhandled throw is terminal");
    assert_eq!(fail.error.as_deref(), Some("Error"));
    assert_eq!(fail.cause.as_deref(), Some(r#"{"message":"fatal"}"#));
}

#[test]
fn typeof_dispatches_on_runtime_type() {
    let machine = compile("(x) => typeof x");
    let text = rendered(&machine);
    for marker in ["IsString", "IsBoolean", "IsNumeric", "IsPresent"] {
        assert!(text.contains(marker), "typeof tests {marker}: {text}");
    }
    for answer in ["undefined", "string", "boolean", "number", "object"] {
        assert!(
            text.contains(&format!(r#""Result":"{answer}""#)),
            "typeof can answer {answer}: {text}"
        );
    }
}

#[test]
fn short_circuit_evaluates_rhs_only_on_the_default_branch() {
    let machine = compile("(x) => { let y = 0; return x.a || (y = x.b); }");
    let choice = machine
        .states
        .get("short circuit")
        .expect("the dispatch choice keeps its hint name");
    let rules = choice.choices.as_ref().expect("choice rules");
    let taken = rules[0].next.as_ref().expect("rule target");
    // The truthy path goes straight to the pass-through, never writing y.
    assert_ne!(
        machine.states[taken].result_path,
        Some(ResultPath::Path("$.y".to_string()))
    );
    // The default path reaches the state that assigns y.
    let mut cursor = choice.default.clone().expect("default branch");
    let mut found = false;
    for _ in 0..10 {
        let state = &machine.states[&cursor];
        if state.result_path == Some(ResultPath::Path("$.y".to_string())) {
            found = true;
            break;
        }
        match &state.next {
            Some(next) => cursor = next.clone(),
            None => break,
        }
    }
    assert!(found, "the default branch assigns y");
}

#[test]
fn loops_resolve_break_and_continue() {
    let machine = compile(
        "(xs) => { let n = 0; for (const x of xs) { if (x === 0) { break; } n = n + 1; } return n; }",
    );
    let brk = machine.states.get("break").expect("break state");
    let target = brk.next.as_ref().expect("break jumps somewhere");
    assert!(machine.states.contains_key(target));
}

#[test]
fn while_loop_shape() {
    let machine = compile("(x) => { let n = 0; while (n < 3) { n = n + 1; } return n; }");
    let text = rendered(&machine);
    assert!(text.contains("NumericLessThan"), "condition test: {text}");
}

#[test]
fn for_in_zips_through_a_map_state() {
    let machine = compile("(xs) => { let n = 0; for (const i in xs) { n = n + i; } return n; }");
    let zip = machine
        .states
        .values()
        .find(|state| state.kind == StateKind::Map)
        .expect("for-in zips with a Map state");
    assert_eq!(
        zip.parameters,
        Some(json!({ "index.$": "$$.Map.Item.Index", "item.$": "$$.Map.Item.Value" }))
    );
    assert!(zip.iterator.is_some());
}

#[test]
fn shadowed_variables_stay_distinct() {
    let machine = compile("(x) => { let a = 1; { let a = 2; } return a; }");
    let writes: Vec<_> = machine
        .states
        .values()
        .filter_map(|state| match &state.result_path {
            Some(ResultPath::Path(path)) => Some(path.as_str()),
            _ => None,
        })
        .collect();
    assert!(writes.contains(&"$.a"), "outer a: {writes:?}");
    assert!(writes.contains(&"$.a__1"), "inner shadow: {writes:?}");
    let returns = end_states(&machine);
    assert_eq!(returns[0].input_path.as_deref(), Some("$.a"));
}

#[test]
fn void_bodies_return_the_constructed_null() {
    let machine = compile("(x) => { let a = x; }");
    let returns = end_states(&machine);
    assert_eq!(returns.len(), 1);
    assert_eq!(
        returns[0].input_path.as_deref(),
        Some("$.fnl_context.null")
    );
}

#[test]
fn ternary_branches_share_one_slot() {
    let machine = compile("(x) => x ? 1 : 2");
    let text = rendered(&machine);
    let writes: Vec<_> = machine
        .states
        .values()
        .filter(|state| state.result == Some(json!(1)) || state.result == Some(json!(2)))
        .collect();
    assert_eq!(writes.len(), 2, "both branches materialize: {text}");
    assert_eq!(writes[0].result_path, writes[1].result_path);
}

#[test]
fn template_strings_use_format() {
    let machine = compile("(x) => `id-${x}!`");
    let text = rendered(&machine);
    assert!(
        text.contains("States.Format('id-{}!'"),
        "template formats: {text}"
    );
}

#[test]
fn destructured_parameters_project_into_the_initializer() {
    let machine = compile("({ a, b }) => a");
    let init = &machine.states[&machine.start_at];
    let parameters = init.parameters.as_ref().expect("initializer parameters");
    assert_eq!(parameters.get("a.$"), Some(&json!("$$.Execution.Input.a")));
    assert_eq!(parameters.get("b.$"), Some(&json!("$$.Execution.Input.b")));
}

#[test]
fn object_spread_merges() {
    let machine = compile("(x) => ({ a: 1, ...x })");
    let text = rendered(&machine);
    assert!(
        text.contains("States.JsonMerge"),
        "spread merges via JsonMerge: {text}"
    );
}

#[test]
fn join_accumulates_with_format() {
    let machine = compile(r#"(xs) => xs.join("-")"#);
    let text = rendered(&machine);
    assert!(text.contains("States.Format('{}-{}'"), "join glue: {text}");
}

#[test]
fn includes_uses_array_contains() {
    let machine = compile(r#"(xs) => xs.includes(3)"#);
    let text = rendered(&machine);
    assert!(
        text.contains("States.ArrayContains($.xs, 3)"),
        "includes is a single intrinsic: {text}"
    );
}

#[test]
fn split_uses_string_split() {
    let machine = compile(r#"(s) => s.split(",")"#);
    let text = rendered(&machine);
    assert!(
        text.contains("States.StringSplit($.s, ',')"),
        "split is a single intrinsic: {text}"
    );
}

#[test]
fn slice_materializes_a_range() {
    let machine = compile("(xs) => xs.slice(1, 3)");
    let text = rendered(&machine);
    assert!(
        text.contains("States.ArrayRange(1, 2, 1)"),
        "slice bounds are inclusive: {text}"
    );
}

// --- rejected programs ------------------------------------------------------

#[test]
fn multiplication_of_variables_is_rejected() {
    let err = compile_err("(x) => { let y = 2; return x * y; }");
    assert_eq!(
        err.code(),
        "Cannot_perform_all_arithmetic_or_bitwise_computations_on_variables_in_Step_Function"
    );
}

#[test]
fn constant_multiplication_folds() {
    let machine = compile("() => 6 * 7");
    let returns = end_states(&machine);
    assert_eq!(returns[0].result, Some(json!(42)));
}

#[test]
fn switch_is_rejected() {
    let err = compile_err("(x) => { switch (x) { default: return 1; } }");
    assert_eq!(err.code(), "Unsupported_Feature");
}

#[test]
fn rest_parameters_are_rejected() {
    let err = compile_err("(...xs) => xs");
    assert_eq!(err.code(), "Unsupported_Feature");
}

#[test]
fn throwing_a_non_error_is_rejected() {
    let err = compile_err("(x) => { throw x; }");
    assert_eq!(
        err.code(),
        "StepFunction_Throw_must_be_Error_or_StepFunctionError_class"
    );
}

#[test]
fn object_rest_patterns_are_rejected() {
    let err = compile_err("(x) => { let { a, ...rest } = x; return a; }");
    assert_eq!(err.code(), "Unsupported_Feature");
}

#[test]
fn undefined_is_rejected() {
    let err = compile_err("(x) => undefined");
    assert_eq!(err.code(), "Step_Functions_does_not_support_undefined");
}

#[test]
fn computed_property_names_must_fold() {
    let err = compile_err("(x) => ({ [x]: 1 })");
    assert_eq!(err.code(), "StepFunctions_property_names_must_be_constant");
}

#[test]
fn classes_are_rejected() {
    let err = compile_err("(x) => new Date()");
    assert_eq!(err.code(), "Classes_are_not_supported");
}

// --- integrations -----------------------------------------------------------

struct OneTask {
    task: ResourceTask,
}

impl IntegrationResolver for OneTask {
    fn resolve(&self, reference: &str) -> Option<&dyn Integration> {
        (reference == "lambda.invoke").then_some(&self.task as &dyn Integration)
    }
}

#[test]
fn integration_tasks_catch_into_the_enclosing_try() {
    let resolver = OneTask {
        task: ResourceTask {
            resource: "arn:aws:states:::lambda:invoke".to_string(),
        },
    };
    let machine = compile_with(
        "(x) => { try { return lambda.invoke(x); } catch (e) { return null; } }",
        &resolver,
    )
    .expect("compiles");
    validate(&machine);
    let task = machine
        .states
        .values()
        .find(|state| state.kind == StateKind::Task)
        .expect("the integration emits a Task");
    assert_eq!(
        task.resource.as_deref(),
        Some("arn:aws:states:::lambda:invoke")
    );
    let catchers = task.catch.as_ref().expect("the bridge attaches a catcher");
    assert_eq!(catchers[0].error_equals, vec!["States.ALL".to_string()]);
    assert!(machine.states.contains_key(&catchers[0].next));
}

#[test]
fn integration_without_a_try_fails_through() {
    let resolver = OneTask {
        task: ResourceTask {
            resource: "arn:aws:states:::lambda:invoke".to_string(),
        },
    };
    let machine = compile_with("(x) => lambda.invoke(x)", &resolver).expect("compiles");
    validate(&machine);
    let task = machine
        .states
        .values()
        .find(|state| state.kind == StateKind::Task)
        .expect("the integration emits a Task");
    assert!(
        task.catch.is_none(),
        "no handler, no catcher: the machine fails through"
    );
}

// --- determinism ------------------------------------------------------------

#[test]
fn compilation_is_deterministic() {
    let source = "(xs) => { let n = 0; for (const x of xs) { n = n + x; } return `n=${n}`; }";
    let first = serde_json::to_value(compile(source)).expect("serializes");
    let second = serde_json::to_value(compile(source)).expect("serializes");
    assert_eq!(first, second);
}

#[test]
fn every_scenario_machine_validates() {
    for source in [
        "() => 1 + 2",
        "(x) => x + 1",
        r#"(xs) => xs.filter(x => x === "a")"#,
        "(xs) => xs.map(x => x + 1)",
        r#"(x) => { try { throw new Error("boom") } catch (e) { return e.message } }"#,
        "(x) => typeof x",
        "(x) => { let a = 0; do { a = a + 1; } while (a < 2); return a; }",
        "(xs) => { for (let i = 0; i < 3; i = i + 1) { if (i === 1) { continue; } } return 0; }",
        r#"(x) => { try { return x; } finally { let b = 1; } }"#,
        "(x) => JSON.parse(JSON.stringify(x))",
        "(x) => x ?? 5",
        "(x) => { let [a, b = 2, ...rest] = x; return rest; }",
        "(x) => -x",
        "(x) => x - 1",
    ] {
        let machine = compile(source);
        let _ = serde_json::to_value(&machine).expect("serializes");
    }
}

#[test]
fn member_filters_take_the_fast_path() {
    let machine = compile("(xs) => xs.filter(x => x.count > 2)");
    let text = rendered(&machine);
    assert!(
        text.contains("$.xs[?(@.count > 2)]"),
        "member predicates filter in place: {text}"
    );
}
