//! The in-memory IR between lowering and the final state map.
//!
//! Lowering produces [`SubState`] trees: small named-state graphs whose
//! labels are local and whose dangling successors carry the
//! [`DEFERRED_NEXT`] sentinel. Sub-states compose recursively; composition
//! never mutates an emitted graph in place - successors are retargeted by
//! rewriting the sentinel. Once the whole function is lowered, [`to_states`]
//! flattens the tree into the flat `{StartAt, States}` map with globally
//! unique names.

use crate::asl::{Catcher, NodeState, ResultPath};
use crate::condition::Condition;
use crate::error::CompileError;
use crate::names::{ChainLabels, StateNames};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Sentinel `Next` value: "the successor is filled in by the enclosing
/// sub-state" (when this graph is joined with whatever runs after it).
pub const DEFERRED_NEXT: &str = "__DeferNext";

/// Reserved label a `throw` transitions to; the nearest enclosing `try`
/// defines it inside its own sub-state.
pub const CATCH_LABEL: &str = "__catch";

/// Reserved label `break` jumps to; the nearest enclosing loop defines it.
pub const BREAK_LABEL: &str = "__BreakNext";

/// Reserved label `continue` jumps to; the nearest enclosing loop defines it.
pub const CONTINUE_LABEL: &str = "__ContinueNext";

/// The constructed `null`: ASL cannot produce `null` from a literal
/// substitution, so the initializer plants one here and every lowered
/// `null` reads it back.
pub const NULL_SLOT: &str = "$.fnl_context.null";

/// The result of lowering an expression: a JSON value, an address, or a
/// not-yet-materialized predicate. The three forms are disjoint and
/// conversions between them are explicit (and may emit states).
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A JSON value. `contains_json_path` marks literal trees with embedded
    /// path references, which must materialize through `Parameters` with
    /// `.$`-suffixed keys rather than `Result`.
    Literal {
        value: Value,
        contains_json_path: bool,
    },
    /// A location in the execution state (`$.`/`$$.` path).
    JsonPath(String),
    /// A `Choice` predicate that has not been forced into a boolean value.
    Condition(Condition),
}

impl Output {
    /// A plain literal with no embedded paths.
    pub fn literal(value: impl Into<Value>) -> Self {
        Output::Literal {
            value: value.into(),
            contains_json_path: false,
        }
    }

    /// A JSON path output.
    pub fn path(path: impl Into<String>) -> Self {
        Output::JsonPath(path.into())
    }
}

/// An expression lowering result: the states that compute the value (if any)
/// plus the value's [`Output`]. Callers must splice `sub` before `output` is
/// meaningful.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub sub: Option<SubState>,
    pub output: Output,
}

impl Lowered {
    /// A value that needs no states.
    pub fn pure(output: Output) -> Self {
        Lowered { sub: None, output }
    }

    pub fn new(sub: Option<SubState>, output: Output) -> Self {
        Lowered { sub, output }
    }
}

/// A node of the sub-state tree.
#[derive(Debug, Clone, PartialEq)]
pub enum StateOrSub {
    State(NodeState),
    Sub(SubState),
}

impl From<NodeState> for StateOrSub {
    fn from(value: NodeState) -> Self {
        StateOrSub::State(value)
    }
}

impl From<SubState> for StateOrSub {
    fn from(value: SubState) -> Self {
        StateOrSub::Sub(value)
    }
}

/// A named-state graph with local labels.
///
/// Invariants: `start_state` names an entry of `states`; every non-terminal
/// state either targets a label reachable from its enclosing scopes, carries
/// [`DEFERRED_NEXT`], or is `End: true`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubState {
    pub start_state: String,
    pub states: BTreeMap<String, StateOrSub>,
}

impl SubState {
    /// A one-state graph.
    pub fn single(label: impl Into<String>, state: impl Into<StateOrSub>) -> Self {
        let label = label.into();
        let mut states = BTreeMap::new();
        states.insert(label.clone(), state.into());
        SubState {
            start_state: label,
            states,
        }
    }

    pub fn with_start(start: impl Into<String>) -> Self {
        SubState {
            start_state: start.into(),
            states: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, label: impl Into<String>, state: impl Into<StateOrSub>) {
        self.states.insert(label.into(), state.into());
    }
}

/// Concatenate sub-states in order: each one's deferred successors are
/// rewired to the next one's start; the last one's stay deferred for the
/// caller.
///
/// Chaining labels come from the compilation's [`ChainLabels`] allocator:
/// the rewired successor reference can end up arbitrarily deep inside the
/// previous sub-state, where a colliding label in an intermediate scope
/// would capture it.
pub fn join_sub_states(subs: Vec<Option<SubState>>, labels: &ChainLabels) -> Option<SubState> {
    let mut subs: Vec<SubState> = subs.into_iter().flatten().collect();
    match subs.len() {
        0 => None,
        1 => subs.pop(),
        _ => {
            let labels: Vec<String> = subs.iter().map(|_| labels.chain()).collect();
            let mut joined = SubState::with_start(labels[0].clone());
            let last = subs.len() - 1;
            for (i, mut sub) in subs.into_iter().enumerate() {
                if i < last {
                    update_deferred_next_states(&labels[i + 1], &mut sub);
                }
                joined.insert(labels[i].clone(), sub);
            }
            Some(joined)
        }
    }
}

fn retarget(slot: &mut Option<String>, target: &str) {
    if slot.as_deref() == Some(DEFERRED_NEXT) {
        *slot = Some(target.to_string());
    }
}

/// Replace every [`DEFERRED_NEXT`] sentinel in `sub` with `target`, in
/// `Next`, `Default` and `Catch[].Next` positions, recursively.
pub fn update_deferred_next_states(target: &str, sub: &mut SubState) {
    for child in sub.states.values_mut() {
        match child {
            StateOrSub::State(state) => {
                retarget(&mut state.next, target);
                retarget(&mut state.default, target);
                if let Some(rules) = state.choices.as_mut() {
                    for rule in rules {
                        retarget(&mut rule.next, target);
                    }
                }
                if let Some(catchers) = state.catch.as_mut() {
                    for catcher in catchers {
                        if catcher.next == DEFERRED_NEXT {
                            catcher.next = target.to_string();
                        }
                    }
                }
            }
            StateOrSub::Sub(inner) => update_deferred_next_states(target, inner),
        }
    }
}

/// True if any state in the tree executes work (Task, Map or Parallel);
/// such states produce the `{Error, Cause}` envelope when they fail.
pub fn sub_contains_task(sub: &SubState) -> bool {
    sub.states.values().any(|child| match child {
        StateOrSub::State(state) => state.is_task_like(),
        StateOrSub::Sub(inner) => sub_contains_task(inner),
    })
}

/// Attach a `Catch: [{ErrorEquals: ["States.ALL"], ..}]` to every task-like
/// state in the tree that does not already carry one, so its failures route
/// to the enclosing handler.
pub fn attach_catch_all(sub: &mut SubState, next: &str, result_path: Option<ResultPath>) {
    for child in sub.states.values_mut() {
        match child {
            StateOrSub::State(state) => {
                if state.is_task_like() && state.catch.is_none() {
                    state.catch = Some(vec![Catcher {
                        error_equals: vec!["States.ALL".to_string()],
                        next: next.to_string(),
                        result_path: result_path.clone(),
                    }]);
                }
            }
            StateOrSub::Sub(inner) => attach_catch_all(inner, next, result_path.clone()),
        }
    }
}

/// Route an [`Output`] into a state's input: paths through `InputPath`,
/// plain literals through `Result`, literals with embedded paths through
/// `Parameters` with `.$`-suffixed keys. The caller has already normalized
/// conditions away.
pub fn pass_with_input(mut state: NodeState, output: Output) -> Result<NodeState, CompileError> {
    match output {
        Output::JsonPath(path) => state.input_path = Some(path),
        Output::Literal {
            value: Value::Null,
            ..
        } => state.input_path = Some(NULL_SLOT.to_string()),
        Output::Literal {
            value,
            contains_json_path: false,
        } => state.result = Some(value),
        Output::Literal {
            value,
            contains_json_path: true,
        } => state.parameters = Some(literal_to_parameters(&value)),
        Output::Condition(_) => {
            return Err(CompileError::Unexpected(
                "condition output reached a state input unmaterialized".to_string(),
            ))
        }
    }
    Ok(state)
}

/// True for strings that ASL substitutes when the key carries the `.$`
/// suffix: JSON paths and intrinsic calls.
pub fn is_reference_string(s: &str) -> bool {
    s.starts_with("$.") || s.starts_with("$$") || s.starts_with("States.") || s == "$"
}

/// Rewrite a literal tree with embedded references into a `Parameters`
/// payload: object keys holding a reference string gain the `.$` suffix.
pub fn literal_to_parameters(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                match val {
                    Value::String(s) if is_reference_string(s) => {
                        out.insert(format!("{key}.$"), val.clone());
                    }
                    _ => {
                        out.insert(key.clone(), literal_to_parameters(val));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(literal_to_parameters).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Default)]
struct FlattenScope {
    /// Local label -> allocated global name. A sub-state child's entry maps
    /// to the global name of its own start state.
    map: HashMap<String, String>,
    children: BTreeMap<String, FlattenScope>,
}

fn allocate_names(sub: &SubState, names: &mut StateNames) -> Result<FlattenScope, CompileError> {
    let mut scope = FlattenScope::default();
    for (label, child) in &sub.states {
        match child {
            StateOrSub::State(state) => {
                let hint = state.name_hint.as_deref().unwrap_or(label);
                scope.map.insert(label.clone(), names.unique(hint));
            }
            StateOrSub::Sub(inner) => {
                let child_scope = allocate_names(inner, names)?;
                let start = child_scope
                    .map
                    .get(&inner.start_state)
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::Unexpected(format!(
                            "sub-state start `{}` is not in its state map",
                            inner.start_state
                        ))
                    })?;
                scope.map.insert(label.clone(), start);
                scope.children.insert(label.clone(), child_scope);
            }
        }
    }
    Ok(scope)
}

fn resolve_label(
    label: &str,
    scope: &FlattenScope,
    outer: &[&FlattenScope],
) -> Result<String, CompileError> {
    if let Some(name) = scope.map.get(label) {
        return Ok(name.clone());
    }
    // Reserved labels (and try/finally wiring) bubble up through sub-state
    // walls: the innermost enclosing scope that defines the label wins.
    for enclosing in outer.iter().rev() {
        if let Some(name) = enclosing.map.get(label) {
            return Ok(name.clone());
        }
    }
    Err(CompileError::Unexpected(format!(
        "unresolved state label `{label}`"
    )))
}

fn emit_states(
    sub: &SubState,
    scope: &FlattenScope,
    outer: &[&FlattenScope],
    out: &mut BTreeMap<String, NodeState>,
) -> Result<(), CompileError> {
    for (label, child) in &sub.states {
        match child {
            StateOrSub::State(state) => {
                let mut state = state.clone();
                if let Some(next) = state.next.take() {
                    state.next = Some(resolve_label(&next, scope, outer)?);
                }
                if let Some(default) = state.default.take() {
                    state.default = Some(resolve_label(&default, scope, outer)?);
                }
                if let Some(rules) = state.choices.as_mut() {
                    for rule in rules {
                        if let Some(next) = rule.next.take() {
                            rule.next = Some(resolve_label(&next, scope, outer)?);
                        }
                    }
                }
                if let Some(catchers) = state.catch.as_mut() {
                    for catcher in catchers {
                        catcher.next = resolve_label(&catcher.next, scope, outer)?;
                    }
                }
                let name = scope
                    .map
                    .get(label)
                    .cloned()
                    .expect("label allocated in first pass");
                state.name_hint = None;
                out.insert(name, state);
            }
            StateOrSub::Sub(inner) => {
                let child_scope = scope
                    .children
                    .get(label)
                    .expect("child scope allocated in first pass");
                let mut stack = outer.to_vec();
                stack.push(scope);
                emit_states(inner, child_scope, &stack, out)?;
            }
        }
    }
    Ok(())
}

/// Flatten a sub-state tree into a flat state map with globally unique
/// names, rewriting every `Next`, `Default` and `Catch[].Next` label.
/// Returns the global name of the start state and the map.
pub fn to_states(
    sub: &SubState,
    names: &mut StateNames,
) -> Result<(String, BTreeMap<String, NodeState>), CompileError> {
    let scope = allocate_names(sub, names)?;
    let start = scope
        .map
        .get(&sub.start_state)
        .cloned()
        .ok_or_else(|| {
            CompileError::Unexpected(format!(
                "sub-state start `{}` is not in its state map",
                sub.start_state
            ))
        })?;
    let mut out = BTreeMap::new();
    emit_states(sub, &scope, &[], &mut out)?;
    Ok((start, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asl::StateKind;
    use crate::condition::{is_present, ChoiceRule};

    fn deferred_pass(hint: &str) -> NodeState {
        NodeState::pass().with_next(DEFERRED_NEXT).with_hint(hint)
    }

    #[test]
    fn join_rewires_deferred_next() {
        let labels = ChainLabels::new();
        let a = SubState::single("a", deferred_pass("first"));
        let b = SubState::single("b", NodeState::pass().with_hint("second").with_end());
        let joined = join_sub_states(vec![Some(a), None, Some(b)], &labels).expect("joined");
        let mut names = StateNames::new();
        let (start, states) = to_states(&joined, &mut names).expect("flatten");
        assert_eq!(start, "first");
        assert_eq!(states["first"].next.as_deref(), Some("second"));
        assert_eq!(states["second"].end, Some(true));
    }

    #[test]
    fn join_of_nothing_is_none() {
        let labels = ChainLabels::new();
        assert!(join_sub_states(vec![None, None], &labels).is_none());
    }

    #[test]
    fn flatten_renames_collisions() {
        let labels = ChainLabels::new();
        let a = SubState::single("x", deferred_pass("step"));
        let b = SubState::single("x", NodeState::pass().with_hint("step").with_end());
        let joined = join_sub_states(vec![Some(a), Some(b)], &labels).expect("joined");
        let mut names = StateNames::new();
        let (start, states) = to_states(&joined, &mut names).expect("flatten");
        assert_eq!(start, "step");
        assert_eq!(states["step"].next.as_deref(), Some("step 1"));
        assert!(states.contains_key("step 1"));
    }

    #[test]
    fn reserved_labels_bubble_up() {
        // A loop-shaped wrapper: the body lives two levels down and jumps to
        // __BreakNext, which only the outer sub-state defines.
        let body = SubState::single("jump", NodeState::pass().with_next(BREAK_LABEL));
        let mut outer = SubState::with_start("body");
        outer.insert("body", body);
        outer.insert(BREAK_LABEL, NodeState::pass().with_hint("exit").with_end());
        let mut names = StateNames::new();
        let (_, states) = to_states(&outer, &mut names).expect("flatten");
        assert_eq!(states["jump"].next.as_deref(), Some("exit"));
    }

    #[test]
    fn innermost_label_definition_wins() {
        let inner_catch = NodeState::pass().with_hint("inner catch").with_end();
        let mut inner = SubState::with_start("throw");
        inner.insert("throw", NodeState::pass().with_next(CATCH_LABEL));
        inner.insert(CATCH_LABEL, inner_catch);
        let mut outer = SubState::with_start("inner");
        outer.insert("inner", inner);
        outer.insert(CATCH_LABEL, NodeState::pass().with_hint("outer catch").with_end());
        let mut names = StateNames::new();
        let (_, states) = to_states(&outer, &mut names).expect("flatten");
        let throw = states.values().find(|s| s.next.is_some()).expect("throw state");
        assert_eq!(throw.next.as_deref(), Some("inner catch"));
    }

    #[test]
    fn choice_rule_labels_resolve() {
        let mut sub = SubState::with_start("choose");
        let mut choice = NodeState::new(StateKind::Choice);
        choice.choices = Some(vec![ChoiceRule::new(is_present("$.x", true), "yes")]);
        choice.default = Some("no".to_string());
        sub.insert("choose", choice.with_hint("is x present"));
        sub.insert("yes", NodeState::pass().with_hint("has x").with_end());
        sub.insert("no", NodeState::pass().with_hint("no x").with_end());
        let mut names = StateNames::new();
        let (_, states) = to_states(&sub, &mut names).expect("flatten");
        let choice = &states["is x present"];
        assert_eq!(
            choice.choices.as_ref().expect("rules")[0].next.as_deref(),
            Some("has x")
        );
        assert_eq!(choice.default.as_deref(), Some("no x"));
    }

    #[test]
    fn unresolved_label_is_an_error() {
        let sub = SubState::single("a", NodeState::pass().with_next("nowhere"));
        let mut names = StateNames::new();
        assert!(to_states(&sub, &mut names).is_err());
    }

    #[test]
    fn parameters_rewrite_marks_reference_keys() {
        let value = serde_json::json!({"a": "$.x", "b": 1, "c": {"d": "States.Array($.y)"}});
        assert_eq!(
            literal_to_parameters(&value),
            serde_json::json!({"a.$": "$.x", "b": 1, "c": {"d.$": "States.Array($.y)"}})
        );
    }

    #[test]
    fn catch_all_attaches_to_tasks_only() {
        let mut sub = SubState::with_start("t");
        sub.insert("t", NodeState::new(StateKind::Task).with_next(DEFERRED_NEXT));
        sub.insert("p", NodeState::pass().with_end());
        attach_catch_all(&mut sub, CATCH_LABEL, Some(ResultPath::Discard));
        match &sub.states["t"] {
            StateOrSub::State(task) => {
                let catchers = task.catch.as_ref().expect("catch attached");
                assert_eq!(catchers[0].error_equals, vec!["States.ALL".to_string()]);
                assert_eq!(catchers[0].next, CATCH_LABEL);
            }
            _ => unreachable!(),
        }
        match &sub.states["p"] {
            StateOrSub::State(pass) => assert!(pass.catch.is_none()),
            _ => unreachable!(),
        }
    }
}
