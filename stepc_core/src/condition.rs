//! Constructors for ASL `Choice`-rule predicates.
//!
//! A [`Condition`] is the predicate half of a Choice rule: either one of the
//! data-test atoms (`IsPresent`, `StringEquals`, ...) applied to a JSON path,
//! or a boolean combination of other conditions. The constructors in this
//! module apply the standard simplifications so that callers can combine
//! conditions freely without producing degenerate `And`/`Or` nests.

use serde::Serialize;
use serde_json::Number;

/// A `Choice`-rule predicate.
///
/// Serializes to the exact ASL JSON shape: combinators are externally tagged
/// (`{"And": [..]}`) and data tests flatten into `{"Variable": .., "<Op>": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    /// Conjunction of one or more conditions.
    And(Vec<Condition>),
    /// Disjunction of one or more conditions.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// A data test on a single JSON path.
    #[serde(untagged)]
    Test(Test),
}

/// A data test: a JSON path plus one comparison operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Test {
    pub variable: String,
    #[serde(flatten)]
    pub operator: TestOp,
}

/// A full Choice rule: a predicate plus the state to transition to when it
/// holds. `next` stays unset only while the rule is under construction inside
/// the lowering passes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceRule {
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(rename = "Next", skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl ChoiceRule {
    pub fn new(condition: Condition, next: impl Into<String>) -> Self {
        ChoiceRule {
            condition,
            next: Some(next.into()),
        }
    }
}

/// The ASL data-test operators used by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TestOp {
    IsPresent(bool),
    IsNull(bool),
    IsBoolean(bool),
    IsNumeric(bool),
    IsString(bool),
    StringEquals(String),
    StringEqualsPath(String),
    StringLessThan(String),
    StringLessThanPath(String),
    StringLessThanEquals(String),
    StringLessThanEqualsPath(String),
    StringGreaterThan(String),
    StringGreaterThanPath(String),
    StringGreaterThanEquals(String),
    StringGreaterThanEqualsPath(String),
    NumericEquals(Number),
    NumericEqualsPath(String),
    NumericLessThan(Number),
    NumericLessThanPath(String),
    NumericLessThanEquals(Number),
    NumericLessThanEqualsPath(String),
    NumericGreaterThan(Number),
    NumericGreaterThanPath(String),
    NumericGreaterThanEquals(Number),
    NumericGreaterThanEqualsPath(String),
    BooleanEquals(bool),
    BooleanEqualsPath(String),
}

fn test(variable: impl Into<String>, operator: TestOp) -> Condition {
    Condition::Test(Test {
        variable: variable.into(),
        operator,
    })
}

/// A predicate that always holds: the execution id is never null.
pub fn always() -> Condition {
    test("$$.Execution.Id", TestOp::IsNull(false))
}

/// A predicate that never holds.
pub fn never() -> Condition {
    test("$$.Execution.Id", TestOp::IsNull(true))
}

/// Conjunction with simplification: zero conditions is trivially true, one
/// condition is itself.
pub fn and(mut conditions: Vec<Condition>) -> Condition {
    match conditions.len() {
        0 => always(),
        1 => conditions.pop().expect("one condition"),
        _ => Condition::And(conditions),
    }
}

/// Disjunction with simplification: zero conditions is trivially false, one
/// condition is itself.
pub fn or(mut conditions: Vec<Condition>) -> Condition {
    match conditions.len() {
        0 => never(),
        1 => conditions.pop().expect("one condition"),
        _ => Condition::Or(conditions),
    }
}

/// Negation; `Not(Not(c))` collapses to `c`.
pub fn not(condition: Condition) -> Condition {
    match condition {
        Condition::Not(inner) => *inner,
        other => Condition::Not(Box::new(other)),
    }
}

pub fn is_present(path: impl Into<String>, expected: bool) -> Condition {
    test(path, TestOp::IsPresent(expected))
}

pub fn is_null(path: impl Into<String>, expected: bool) -> Condition {
    test(path, TestOp::IsNull(expected))
}

pub fn is_boolean(path: impl Into<String>, expected: bool) -> Condition {
    test(path, TestOp::IsBoolean(expected))
}

pub fn is_numeric(path: impl Into<String>, expected: bool) -> Condition {
    test(path, TestOp::IsNumeric(expected))
}

pub fn is_string(path: impl Into<String>, expected: bool) -> Condition {
    test(path, TestOp::IsString(expected))
}

pub fn string_equals(path: impl Into<String>, value: impl Into<String>) -> Condition {
    test(path, TestOp::StringEquals(value.into()))
}

pub fn numeric_equals(path: impl Into<String>, value: Number) -> Condition {
    test(path, TestOp::NumericEquals(value))
}

pub fn boolean_equals(path: impl Into<String>, value: bool) -> Condition {
    test(path, TestOp::BooleanEquals(value))
}

/// JavaScript truthiness of the value at `path`:
/// present, not null, and not `""`, `0` or `false`. Values that are neither
/// string, number nor boolean are objects or arrays, which are always truthy.
pub fn is_truthy(path: &str) -> Condition {
    and(vec![
        is_present(path, true),
        is_null(path, false),
        or(vec![
            and(vec![
                is_string(path, true),
                not(string_equals(path, "")),
            ]),
            and(vec![
                is_numeric(path, true),
                not(numeric_equals(path, Number::from(0))),
            ]),
            and(vec![is_boolean(path, true), boolean_equals(path, true)]),
            and(vec![
                is_string(path, false),
                is_numeric(path, false),
                is_boolean(path, false),
            ]),
        ]),
    ])
}

/// The comparison kinds the surface language maps onto data tests.
///
/// `==`/`===` fold together; `!=`/`!==` have no atom of their own and are
/// expressed by negating `Equal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    Equal,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
}

/// Look up the data-test atom for `path <kind> literal`.
///
/// The table is keyed by the operator and the runtime type of the compared
/// literal; combinations without an ASL atom (ordering on booleans, object
/// literals) return `None`. Comparing against `null` turns into an `IsNull`
/// test regardless of the operator side.
pub fn compare_value(
    path: &str,
    kind: CompareKind,
    value: &serde_json::Value,
) -> Option<Condition> {
    use serde_json::Value;
    let op = match (value, kind) {
        (Value::Null, CompareKind::Equal) => TestOp::IsNull(true),
        (Value::String(s), CompareKind::Equal) => TestOp::StringEquals(s.clone()),
        (Value::String(s), CompareKind::LessThan) => TestOp::StringLessThan(s.clone()),
        (Value::String(s), CompareKind::LessThanEquals) => {
            TestOp::StringLessThanEquals(s.clone())
        }
        (Value::String(s), CompareKind::GreaterThan) => TestOp::StringGreaterThan(s.clone()),
        (Value::String(s), CompareKind::GreaterThanEquals) => {
            TestOp::StringGreaterThanEquals(s.clone())
        }
        (Value::Number(n), CompareKind::Equal) => TestOp::NumericEquals(n.clone()),
        (Value::Number(n), CompareKind::LessThan) => TestOp::NumericLessThan(n.clone()),
        (Value::Number(n), CompareKind::LessThanEquals) => {
            TestOp::NumericLessThanEquals(n.clone())
        }
        (Value::Number(n), CompareKind::GreaterThan) => TestOp::NumericGreaterThan(n.clone()),
        (Value::Number(n), CompareKind::GreaterThanEquals) => {
            TestOp::NumericGreaterThanEquals(n.clone())
        }
        (Value::Bool(b), CompareKind::Equal) => TestOp::BooleanEquals(*b),
        _ => return None,
    };
    Some(test(path, op))
}

/// Compare two JSON paths.
///
/// ASL path tests are typed, so the comparison dispatches on the runtime type
/// of the right-hand side: each arm guards the typed `*Path` atom with the
/// matching type test. Two nulls compare equal.
pub fn compare_paths(path: &str, kind: CompareKind, other: &str) -> Condition {
    let typed = |type_test: Condition, op: TestOp| {
        and(vec![
            type_test,
            Condition::Test(Test {
                variable: path.to_string(),
                operator: op,
            }),
        ])
    };
    match kind {
        CompareKind::Equal => or(vec![
            typed(
                is_string(other, true),
                TestOp::StringEqualsPath(other.to_string()),
            ),
            typed(
                is_numeric(other, true),
                TestOp::NumericEqualsPath(other.to_string()),
            ),
            typed(
                is_boolean(other, true),
                TestOp::BooleanEqualsPath(other.to_string()),
            ),
            and(vec![is_null(other, true), is_null(path, true)]),
        ]),
        CompareKind::LessThan => or(vec![
            typed(
                is_string(other, true),
                TestOp::StringLessThanPath(other.to_string()),
            ),
            typed(
                is_numeric(other, true),
                TestOp::NumericLessThanPath(other.to_string()),
            ),
        ]),
        CompareKind::LessThanEquals => or(vec![
            typed(
                is_string(other, true),
                TestOp::StringLessThanEqualsPath(other.to_string()),
            ),
            typed(
                is_numeric(other, true),
                TestOp::NumericLessThanEqualsPath(other.to_string()),
            ),
        ]),
        CompareKind::GreaterThan => or(vec![
            typed(
                is_string(other, true),
                TestOp::StringGreaterThanPath(other.to_string()),
            ),
            typed(
                is_numeric(other, true),
                TestOp::NumericGreaterThanPath(other.to_string()),
            ),
        ]),
        CompareKind::GreaterThanEquals => or(vec![
            typed(
                is_string(other, true),
                TestOp::StringGreaterThanEqualsPath(other.to_string()),
            ),
            typed(
                is_numeric(other, true),
                TestOp::NumericGreaterThanEqualsPath(other.to_string()),
            ),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_and_is_trivially_true() {
        assert_eq!(and(vec![]), always());
        assert_eq!(or(vec![]), never());
    }

    #[test]
    fn singleton_combinators_unwrap() {
        let c = is_present("$.x", true);
        assert_eq!(and(vec![c.clone()]), c);
        assert_eq!(or(vec![c.clone()]), c);
    }

    #[test]
    fn double_negation_collapses() {
        let c = is_string("$.x", true);
        assert_eq!(not(not(c.clone())), c);
    }

    #[test]
    fn test_serializes_flat() {
        let c = string_equals("$.name", "a");
        assert_eq!(
            serde_json::to_value(&c).expect("serialize condition"),
            json!({"Variable": "$.name", "StringEquals": "a"})
        );
    }

    #[test]
    fn combinators_serialize_tagged() {
        let c = and(vec![
            is_present("$.x", true),
            not(is_null("$.x", true)),
        ]);
        assert_eq!(
            serde_json::to_value(&c).expect("serialize condition"),
            json!({"And": [
                {"Variable": "$.x", "IsPresent": true},
                {"Not": {"Variable": "$.x", "IsNull": true}},
            ]})
        );
    }

    #[test]
    fn literal_lookup_rejects_bool_ordering() {
        assert!(compare_value("$.x", CompareKind::LessThan, &json!(true)).is_none());
        assert!(compare_value("$.x", CompareKind::LessThan, &json!(3)).is_some());
    }

    #[test]
    fn null_equality_is_an_isnull_test() {
        assert_eq!(
            compare_value("$.x", CompareKind::Equal, &json!(null)),
            Some(is_null("$.x", true))
        );
    }
}
