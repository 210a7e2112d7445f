//! Identifier and destructuring bindings.
//!
//! A binding takes the output of some expression and lands it in the
//! variables it names, recursing through object and array patterns.
//! Defaults test `IsPresent` at runtime; array rest binds a `[k:]` slice;
//! object rest is rejected because ASL cannot enumerate keys.

use crate::asl::{NodeState, ResultPath, StateKind};
use crate::condition::{is_present, ChoiceRule};
use crate::error::CompileError;
use crate::graph::{self, Output, SubState, DEFERRED_NEXT};
use crate::lower::Compiler;
use crate::normalize::snippet;
use boa_ast::declaration::Binding;
use boa_ast::pattern::{ArrayPatternElement, ObjectPatternElement, Pattern};
use boa_ast::property::PropertyName;
use boa_ast::Expression;
use serde_json::Value;

/// Whether a binding introduces variables or writes to existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindMode {
    Declare,
    Assign,
}

/// Append a path segment, bracket-quoting keys that are not plain
/// identifiers.
pub(crate) fn join_key(base: &str, key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{base}.{key}")
    } else {
        format!("{base}['{key}']")
    }
}

impl Compiler<'_> {
    /// Bind a declaration's binding (identifier or pattern) to a value.
    pub(crate) fn bind_binding(
        &mut self,
        binding: &Binding,
        value: Output,
        mode: BindMode,
    ) -> Result<Option<SubState>, CompileError> {
        match binding {
            Binding::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                self.bind_identifier(&name, value, mode)
            }
            Binding::Pattern(pattern) => self.bind_pattern(pattern, value, mode),
        }
    }

    /// Bind a single identifier: one `Pass` writing the value to
    /// `$.<allocated-name>`.
    pub(crate) fn bind_identifier(
        &mut self,
        ident: &str,
        value: Output,
        mode: BindMode,
    ) -> Result<Option<SubState>, CompileError> {
        let name = match mode {
            BindMode::Declare => self.declare(ident),
            BindMode::Assign => self
                .lookup(ident)
                .cloned()
                .ok_or_else(|| {
                    CompileError::InvalidInput(format!("unknown identifier `{ident}`"))
                })?,
        };
        let mut ctx = self.eval_ctx();
        let value = self.output_to_json_path_or_literal(value, ident, &mut ctx)?;
        let mut state = NodeState::pass().with_hint(format!("{ident} ="));
        state.result_path = Some(ResultPath::Path(format!("$.{name}")));
        state.next = Some(DEFERRED_NEXT.to_string());
        let state = graph::pass_with_input(state, value)?;
        ctx.push_sub(Some(SubState::single("bind", state)));
        Ok(ctx.into_sub())
    }

    /// Bind a destructuring pattern to a value. The value is normalized to
    /// a path first so pattern elements can project from it.
    pub(crate) fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Output,
        mode: BindMode,
    ) -> Result<Option<SubState>, CompileError> {
        let mut ctx = self.eval_ctx();
        let base = self.output_to_json_path(value, "destructure", &mut ctx)?;
        let sub = self.bind_pattern_from_path(pattern, &base, mode)?;
        ctx.push_sub(sub);
        Ok(ctx.into_sub())
    }

    fn bind_pattern_from_path(
        &mut self,
        pattern: &Pattern,
        base: &str,
        mode: BindMode,
    ) -> Result<Option<SubState>, CompileError> {
        let mut subs: Vec<Option<SubState>> = Vec::new();
        match pattern {
            Pattern::Object(object) => {
                for element in object.bindings() {
                    match element {
                        ObjectPatternElement::SingleName {
                            name,
                            ident,
                            default_init,
                            ..
                        } => {
                            let key = self.property_key(name)?;
                            let path = join_key(base, &key);
                            let ident = self.resolve_sym(ident.sym())?;
                            subs.push(self.bind_with_default(
                                &path,
                                default_init.as_ref(),
                                mode,
                                |compiler, value| {
                                    compiler.bind_identifier(&ident, value, mode)
                                },
                            )?);
                        }
                        ObjectPatternElement::Pattern {
                            name,
                            pattern,
                            default_init,
                            ..
                        } => {
                            let key = self.property_key(name)?;
                            let path = join_key(base, &key);
                            subs.push(self.bind_with_default(
                                &path,
                                default_init.as_ref(),
                                mode,
                                |compiler, value| {
                                    compiler.bind_pattern(pattern, value, mode)
                                },
                            )?);
                        }
                        ObjectPatternElement::RestProperty { .. } => {
                            return Err(CompileError::UnsupportedFeature(
                                "object rest pattern: ASL cannot enumerate keys".to_string(),
                            ));
                        }
                        _ => {
                            return Err(CompileError::UnsupportedFeature(
                                "property-access target in a binding pattern".to_string(),
                            ));
                        }
                    }
                }
            }
            Pattern::Array(array) => {
                for (index, element) in array.bindings().iter().enumerate() {
                    match element {
                        ArrayPatternElement::Elision => {}
                        ArrayPatternElement::SingleName {
                            ident,
                            default_init,
                            ..
                        } => {
                            let path = format!("{base}[{index}]");
                            let ident = self.resolve_sym(ident.sym())?;
                            subs.push(self.bind_with_default(
                                &path,
                                default_init.as_ref(),
                                mode,
                                |compiler, value| {
                                    compiler.bind_identifier(&ident, value, mode)
                                },
                            )?);
                        }
                        ArrayPatternElement::Pattern {
                            pattern,
                            default_init,
                            ..
                        } => {
                            let path = format!("{base}[{index}]");
                            subs.push(self.bind_with_default(
                                &path,
                                default_init.as_ref(),
                                mode,
                                |compiler, value| {
                                    compiler.bind_pattern(pattern, value, mode)
                                },
                            )?);
                        }
                        ArrayPatternElement::SingleNameRest { ident, .. } => {
                            let ident = self.resolve_sym(ident.sym())?;
                            subs.push(self.bind_identifier(
                                &ident,
                                Output::path(format!("{base}[{index}:]")),
                                mode,
                            )?);
                        }
                        _ => {
                            return Err(CompileError::UnsupportedFeature(
                                "property-access target in a binding pattern".to_string(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(graph::join_sub_states(subs, &self.chain))
    }

    /// Bind from `path`, falling back to the lowered default when the value
    /// is absent. The defaulted value materializes into one slot first so
    /// the binding itself runs exactly once.
    fn bind_with_default(
        &mut self,
        path: &str,
        default_init: Option<&Expression>,
        _mode: BindMode,
        bind: impl FnOnce(&mut Self, Output) -> Result<Option<SubState>, CompileError>,
    ) -> Result<Option<SubState>, CompileError> {
        match default_init {
            None => bind(self, Output::path(path.to_string())),
            Some(default) => {
                let slot = self.heap_slot();
                let mut choice = NodeState::new(StateKind::Choice)
                    .with_hint(format!("{path} present?"));
                choice.choices = Some(vec![ChoiceRule::new(is_present(path, true), "hit")]);
                choice.default = Some("miss".to_string());

                let mut hit = NodeState::pass();
                hit.input_path = Some(path.to_string());
                hit.result_path = Some(ResultPath::Path(slot.clone()));
                hit.next = Some(DEFERRED_NEXT.to_string());

                let mut ctx = self.eval_ctx();
                let value = ctx.add(self.lower_expression(default)?);
                let value =
                    self.output_to_json_path_or_literal(value, "default value", &mut ctx)?;
                let mut write = NodeState::pass();
                write.result_path = Some(ResultPath::Path(slot.clone()));
                write.next = Some(DEFERRED_NEXT.to_string());
                let write = graph::pass_with_input(write, value)?;
                ctx.push_sub(Some(SubState::single("write", write)));
                let miss = ctx.into_sub().expect("default path writes a state");

                let mut sub = SubState::with_start("check");
                sub.insert("check", choice);
                sub.insert("hit", hit);
                sub.insert("miss", miss);
                let bound = bind(self, Output::path(slot))?;
                Ok(graph::join_sub_states(vec![Some(sub), bound], &self.chain))
            }
        }
    }

    /// An object-literal or pattern key, folded to a constant string.
    pub(crate) fn property_key(&mut self, name: &PropertyName) -> Result<String, CompileError> {
        match name {
            PropertyName::Literal(sym) => self.resolve_sym(*sym),
            PropertyName::Computed(expr) => {
                let expr: &Expression = expr;
                match self.fold_expression(expr) {
                    Some(Value::String(s)) => Ok(s),
                    Some(Value::Number(n)) => Ok(n.to_string()),
                    _ => Err(CompileError::PropertyNamesMustBeConstant(snippet(
                        expr,
                        self.interner(),
                    ))),
                }
            }
        }
    }

    /// Try to express a parameter pattern as a single ASL `Parameters`
    /// projection: only flat patterns of plain identifier bindings qualify.
    /// Returns the `key.$` entries, or `None` when a full binding graph is
    /// needed.
    pub(crate) fn project_parameters(
        &mut self,
        pattern: &Pattern,
        base: &str,
    ) -> Result<Option<Vec<(String, Value)>>, CompileError> {
        let mut entries = Vec::new();
        match pattern {
            Pattern::Object(object) => {
                for element in object.bindings() {
                    match element {
                        ObjectPatternElement::SingleName {
                            name,
                            ident,
                            default_init: None,
                            ..
                        } => {
                            let key = self.property_key(name)?;
                            let name = self.declare_sym(ident.sym())?;
                            entries.push((
                                format!("{name}.$"),
                                Value::String(join_key(base, &key)),
                            ));
                        }
                        _ => return Ok(None),
                    }
                }
            }
            Pattern::Array(array) => {
                for (index, element) in array.bindings().iter().enumerate() {
                    match element {
                        ArrayPatternElement::Elision => {}
                        ArrayPatternElement::SingleName {
                            ident,
                            default_init: None,
                            ..
                        } => {
                            let name = self.declare_sym(ident.sym())?;
                            entries.push((
                                format!("{name}.$"),
                                Value::String(format!("{base}[{index}]")),
                            ));
                        }
                        _ => return Ok(None),
                    }
                }
            }
        }
        Ok(Some(entries))
    }
}
