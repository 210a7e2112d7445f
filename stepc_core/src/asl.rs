//! The Amazon States Language JSON model.
//!
//! One [`NodeState`] struct covers every state kind; fields that a given kind
//! does not use stay `None` and are skipped on serialization, so the output
//! matches ASL's documented shape field-for-field. The finished machine is a
//! [`StateMachine`]: `{"StartAt": .., "States": {..}}` with nothing else
//! (`Comment` and version stamping belong to surrounding tools).

use crate::condition::ChoiceRule;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// The `Type` field of an ASL state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StateKind {
    #[default]
    Pass,
    Task,
    Choice,
    Wait,
    Succeed,
    Fail,
    Map,
    Parallel,
}

/// `ResultPath` distinguishes "absent" from the meaningful JSON `null`
/// (discard the result), so it gets its own type rather than a bare
/// `Option<String>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPath {
    /// `"ResultPath": null` - the state's result is dropped and the input
    /// passes through unchanged.
    Discard,
    /// `"ResultPath": "$.x"` - the result lands at the given path.
    Path(String),
}

impl Serialize for ResultPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultPath::Discard => serializer.serialize_unit(),
            ResultPath::Path(p) => serializer.serialize_str(p),
        }
    }
}

/// One entry of a `Catch` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catcher {
    pub error_equals: Vec<String>,
    pub next: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
}

/// One entry of a `Retry` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Retrier {
    pub error_equals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_rate: Option<f64>,
}

/// One ASL state.
///
/// `name_hint` is the back-reference to the originating AST node (its
/// interned source text); the flattener derives the state's unique name from
/// it and it never reaches the output document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeState {
    #[serde(rename = "Type")]
    pub kind: StateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<ChoiceRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterator: Option<Box<StateMachine>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<StateMachine>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<Retrier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<Catcher>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(skip)]
    pub name_hint: Option<String>,
}

impl NodeState {
    /// A state of the given kind with every optional field unset.
    pub fn new(kind: StateKind) -> Self {
        NodeState {
            kind,
            ..Default::default()
        }
    }

    /// A `Pass` state with a deferred successor (see
    /// [`crate::graph::DEFERRED_NEXT`]).
    pub fn pass() -> Self {
        NodeState::new(StateKind::Pass)
    }

    /// True for the state kinds that execute work and can carry a `Catch`
    /// array.
    pub fn is_task_like(&self) -> bool {
        matches!(
            self.kind,
            StateKind::Task | StateKind::Map | StateKind::Parallel
        )
    }

    /// True if the state needs no successor: terminal kinds, `End: true`, or
    /// a `Choice` (whose successors live in its rules).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StateKind::Succeed | StateKind::Fail | StateKind::Choice
        ) || self.end == Some(true)
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.name_hint = Some(hint.into());
        self
    }

    pub fn with_result_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = Some(ResultPath::Path(path.into()));
        self
    }

    pub fn with_end(mut self) -> Self {
        self.end = Some(true);
        self
    }
}

/// A finished machine: `StartAt` plus the flat, uniquely named state map.
///
/// `BTreeMap` keeps serialization deterministic, so compiling the same AST
/// twice yields byte-identical JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachine {
    pub start_at: String,
    pub states: BTreeMap<String, NodeState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_pass_state() {
        let state = NodeState::pass().with_end();
        assert_eq!(
            serde_json::to_value(&state).expect("serialize state"),
            json!({"Type": "Pass", "End": true})
        );
    }

    #[test]
    fn result_path_null_is_preserved() {
        let mut state = NodeState::pass().with_next("Done");
        state.result_path = Some(ResultPath::Discard);
        assert_eq!(
            serde_json::to_value(&state).expect("serialize state"),
            json!({"Type": "Pass", "ResultPath": null, "Next": "Done"})
        );
    }

    #[test]
    fn name_hint_never_serializes() {
        let state = NodeState::pass().with_hint("return 1").with_end();
        let value = serde_json::to_value(&state).expect("serialize state");
        assert!(value.get("NameHint").is_none());
        assert!(value.get("name_hint").is_none());
    }

    #[test]
    fn machine_shape() {
        let mut states = BTreeMap::new();
        states.insert("Only".to_string(), NodeState::pass().with_end());
        let machine = StateMachine {
            start_at: "Only".to_string(),
            states,
        };
        assert_eq!(
            serde_json::to_value(&machine).expect("serialize machine"),
            json!({"StartAt": "Only", "States": {"Only": {"Type": "Pass", "End": true}}})
        );
    }
}
