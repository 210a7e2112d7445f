//! Typed constructors for ASL intrinsic functions.
//!
//! Intrinsics are the only computation ASL offers: string-valued operators
//! invoked from `Parameters` fields whose key carries the `.$` suffix.
//! [`Intrinsic`] values render to the canonical call string through
//! [`std::fmt::Display`]; arguments can be nested intrinsics, JSON paths, or
//! literals embedded as JSON constants.

use serde_json::Value;
use std::fmt;

/// One ASL intrinsic call.
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    /// `States.Format('fmt', ...)`; `{}` placeholders are substituted in
    /// order. The format string must already be escaped with
    /// [`escape_format_text`].
    Format(String, Vec<Arg>),
    /// `States.Array(...)`.
    Array(Vec<Arg>),
    /// `States.ArrayGetItem(arr, index)`.
    ArrayGetItem(Box<Arg>, Box<Arg>),
    /// `States.ArrayLength(arr)`.
    ArrayLength(Box<Arg>),
    /// `States.ArrayRange(start, end, step)`; the range is inclusive.
    ArrayRange(Box<Arg>, Box<Arg>, Box<Arg>),
    /// `States.ArrayContains(arr, value)`.
    ArrayContains(Box<Arg>, Box<Arg>),
    /// `States.StringSplit(str, separator)`.
    StringSplit(Box<Arg>, Box<Arg>),
    /// `States.JsonToString(value)`.
    JsonToString(Box<Arg>),
    /// `States.StringToJson(str)`.
    StringToJson(Box<Arg>),
    /// `States.JsonMerge(a, b, false)`: shallow merge, `b` wins.
    JsonMerge(Box<Arg>, Box<Arg>),
    /// `States.MathAdd(a, b)`.
    MathAdd(Box<Arg>, Box<Arg>),
}

/// An argument of an intrinsic call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Intrinsic(Intrinsic),
    /// A JSON path (`$.x`, `$$.Execution.Id`), passed through verbatim.
    Path(String),
    /// A literal, embedded as a JSON constant (strings single-quoted).
    Literal(Value),
}

impl From<Intrinsic> for Arg {
    fn from(value: Intrinsic) -> Self {
        Arg::Intrinsic(value)
    }
}

impl Arg {
    /// Path argument.
    pub fn path(p: impl Into<String>) -> Self {
        Arg::Path(p.into())
    }

    /// Literal argument.
    pub fn lit(v: impl Into<Value>) -> Self {
        Arg::Literal(v.into())
    }
}

impl Intrinsic {
    pub fn array_get_item(arr: impl Into<Arg>, index: impl Into<Arg>) -> Self {
        Intrinsic::ArrayGetItem(Box::new(arr.into()), Box::new(index.into()))
    }

    pub fn array_length(arr: impl Into<Arg>) -> Self {
        Intrinsic::ArrayLength(Box::new(arr.into()))
    }

    pub fn array_range(
        start: impl Into<Arg>,
        end: impl Into<Arg>,
        step: impl Into<Arg>,
    ) -> Self {
        Intrinsic::ArrayRange(
            Box::new(start.into()),
            Box::new(end.into()),
            Box::new(step.into()),
        )
    }

    pub fn array_contains(arr: impl Into<Arg>, value: impl Into<Arg>) -> Self {
        Intrinsic::ArrayContains(Box::new(arr.into()), Box::new(value.into()))
    }

    pub fn string_split(s: impl Into<Arg>, sep: impl Into<Arg>) -> Self {
        Intrinsic::StringSplit(Box::new(s.into()), Box::new(sep.into()))
    }

    pub fn json_to_string(v: impl Into<Arg>) -> Self {
        Intrinsic::JsonToString(Box::new(v.into()))
    }

    pub fn string_to_json(v: impl Into<Arg>) -> Self {
        Intrinsic::StringToJson(Box::new(v.into()))
    }

    pub fn json_merge(a: impl Into<Arg>, b: impl Into<Arg>) -> Self {
        Intrinsic::JsonMerge(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn math_add(a: impl Into<Arg>, b: impl Into<Arg>) -> Self {
        Intrinsic::MathAdd(Box::new(a.into()), Box::new(b.into()))
    }

    /// `States.Format` over interleaved text and arguments, one `{}` per
    /// argument.
    pub fn format(fmt: impl Into<String>, args: Vec<Arg>) -> Self {
        Intrinsic::Format(fmt.into(), args)
    }
}

/// Escape literal text for use inside a `States.Format` format string.
///
/// `{` and `}` are the placeholder syntax and must be escaped along with the
/// quote and the escape character itself.
pub fn escape_format_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            _ => out.push(c),
        }
    }
    out
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "'")?;
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '\'' => write!(f, "\\'")?,
            '{' => write!(f, "\\{{")?,
            '}' => write!(f, "\\}}")?,
            _ => write!(f, "{c}")?,
        }
    }
    write!(f, "'")
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Intrinsic(i) => write!(f, "{i}"),
            Arg::Path(p) => write!(f, "{p}"),
            Arg::Literal(Value::String(s)) => write_string_literal(f, s),
            // Numbers, booleans and null embed as bare JSON constants.
            Arg::Literal(v) => write!(f, "{v}"),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[&Arg]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intrinsic::Format(fmt_str, args) => {
                write!(f, "States.Format('{fmt_str}'")?;
                for arg in args {
                    write!(f, ", {arg}")?;
                }
                write!(f, ")")
            }
            Intrinsic::Array(args) => {
                write!(f, "States.Array(")?;
                write_args(f, &args.iter().collect::<Vec<_>>())?;
                write!(f, ")")
            }
            Intrinsic::ArrayGetItem(a, i) => {
                write!(f, "States.ArrayGetItem(")?;
                write_args(f, &[a, i])?;
                write!(f, ")")
            }
            Intrinsic::ArrayLength(a) => {
                write!(f, "States.ArrayLength(")?;
                write_args(f, &[a])?;
                write!(f, ")")
            }
            Intrinsic::ArrayRange(s, e, p) => {
                write!(f, "States.ArrayRange(")?;
                write_args(f, &[s, e, p])?;
                write!(f, ")")
            }
            Intrinsic::ArrayContains(a, v) => {
                write!(f, "States.ArrayContains(")?;
                write_args(f, &[a, v])?;
                write!(f, ")")
            }
            Intrinsic::StringSplit(s, sep) => {
                write!(f, "States.StringSplit(")?;
                write_args(f, &[s, sep])?;
                write!(f, ")")
            }
            Intrinsic::JsonToString(v) => {
                write!(f, "States.JsonToString(")?;
                write_args(f, &[v])?;
                write!(f, ")")
            }
            Intrinsic::StringToJson(v) => {
                write!(f, "States.StringToJson(")?;
                write_args(f, &[v])?;
                write!(f, ")")
            }
            Intrinsic::JsonMerge(a, b) => {
                write!(f, "States.JsonMerge(")?;
                write_args(f, &[a, b])?;
                write!(f, ", false)")
            }
            Intrinsic::MathAdd(a, b) => {
                write!(f, "States.MathAdd(")?;
                write_args(f, &[a, b])?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_math_add() {
        let i = Intrinsic::math_add(Arg::path("$.x"), Arg::lit(1));
        assert_eq!(i.to_string(), "States.MathAdd($.x, 1)");
    }

    #[test]
    fn render_nested() {
        let i = Intrinsic::string_to_json(Intrinsic::json_to_string(Arg::path("$.v")));
        assert_eq!(
            i.to_string(),
            "States.StringToJson(States.JsonToString($.v))"
        );
    }

    #[test]
    fn render_format_with_literal_args() {
        let i = Intrinsic::format("{}-{}", vec![Arg::path("$.a"), Arg::lit("b'c")]);
        assert_eq!(i.to_string(), r"States.Format('{}-{}', $.a, 'b\'c')");
    }

    #[test]
    fn render_array_of_mixed_args() {
        let i = Intrinsic::Array(vec![Arg::lit(1), Arg::lit(json!(null)), Arg::path("$.x")]);
        assert_eq!(i.to_string(), "States.Array(1, null, $.x)");
    }

    #[test]
    fn merge_is_shallow() {
        let i = Intrinsic::json_merge(Arg::path("$.a"), Arg::path("$.b"));
        assert_eq!(i.to_string(), "States.JsonMerge($.a, $.b, false)");
    }

    #[test]
    fn escape_braces_in_text() {
        assert_eq!(escape_format_text("a{b}'c"), r"a\{b\}\'c");
    }
}
