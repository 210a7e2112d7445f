//! The array-method skeleton.
//!
//! `map`, `forEach`, `filter`, `slice`, `join`, `includes` and string
//! `split` all compile through one parameterizable iteration shape: a loop
//! slot holding the remaining array plus accumulator fields, a `check` on
//! `arr[0]`, a per-item `assign`/`body`, and a `step` state that rebuilds
//! the slot (accumulate + behead + index) in a single `Pass`. ASL has no
//! array-append intrinsic, so accumulation happens in a JSON string
//! (`"[null"`) that the `end` states parse back into an array.

use crate::asl::{NodeState, ResultPath, StateKind};
use crate::condition::{is_present, is_truthy, ChoiceRule, Test, TestOp};
use crate::error::CompileError;
use crate::graph::{self, Lowered, Output, SubState, DEFERRED_NEXT, NULL_SLOT};
use crate::intrinsics::{escape_format_text, Arg, Intrinsic};
use crate::lower::binding::BindMode;
use crate::lower::{Compiler, EvalCtx, Frame, ReturnFrame};
use crate::normalize::{self, snippet};
use boa_ast::expression::access::{PropertyAccess, PropertyAccessField};
use boa_ast::function::FormalParameterList;
use boa_ast::expression::operator::binary::{BinaryOp, RelationalOp};
use boa_ast::{Expression, Statement, StatementListItem};
use serde_json::{Map, Number, Value};

/// How the `step` state folds one iteration's result into the loop slot.
enum StepKind {
    /// Append `JsonToString` of the given path to `arrStr` (map, slice).
    AppendJson(String),
    /// Append the head item when the callback result is truthy (filter).
    AppendIfTruthy,
    /// Keep nothing (forEach).
    Discard,
    /// String-join accumulation with the given separator.
    Join(Arg),
}

/// How the skeleton finishes once the array is exhausted.
enum EndKind {
    /// Parse `arrStr + "]"` back into an array; the output is its `[1:]`
    /// slice (dropping the `null` seed).
    ParseArray,
    /// The constructed null (forEach).
    Null,
    /// The accumulated string (join).
    Accumulator,
}

impl Compiler<'_> {
    /// Lower a supported method call on an arbitrary receiver.
    pub(crate) fn lower_method_call(
        &mut self,
        method: &str,
        target: &Expression,
        args: &[Expression],
        hint: &str,
    ) -> Result<Lowered, CompileError> {
        match method {
            "split" => self.lower_split(target, args),
            "includes" => self.lower_includes(target, args),
            "map" | "forEach" | "filter" => self.lower_callback_method(method, target, args, hint),
            "join" => self.lower_join(target, args, hint),
            "slice" => self.lower_slice(target, args, hint),
            _ => Err(CompileError::UnsupportedFeature(format!(
                "method `{method}`"
            ))),
        }
    }

    fn lower_split(
        &mut self,
        target: &Expression,
        args: &[Expression],
    ) -> Result<Lowered, CompileError> {
        let Some(separator) = args.first() else {
            return Err(CompileError::InvalidInput(
                "split needs a separator".to_string(),
            ));
        };
        let mut ctx = self.eval_ctx();
        let subject = ctx.add(self.lower_expression(target)?);
        let sep = ctx.add(self.lower_expression(separator)?);
        let sep = self.output_to_json_path_or_literal(sep, "separator", &mut ctx)?;

        if let (
            Output::Literal {
                value: Value::String(subject),
                contains_json_path: false,
            },
            Output::Literal {
                value: Value::String(sep),
                ..
            },
        ) = (&subject, &sep)
        {
            let parts: Vec<Value> = subject
                .split(sep.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect();
            return Ok(ctx.finish(Output::literal(Value::Array(parts))));
        }

        let subject = self.output_to_json_path(subject, "split subject", &mut ctx)?;
        let sep = match sep {
            Output::JsonPath(path) => Arg::Path(path),
            Output::Literal { value, .. } => Arg::Literal(value),
            Output::Condition(_) => {
                return Err(CompileError::Unexpected(
                    "separator normalization left a condition".to_string(),
                ))
            }
        };
        let (sub, path) = self.materialize_intrinsic(
            Intrinsic::string_split(Arg::Path(subject), sep),
            "parts",
            "split",
        );
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(path)))
    }

    fn lower_includes(
        &mut self,
        target: &Expression,
        args: &[Expression],
    ) -> Result<Lowered, CompileError> {
        let Some(needle) = args.first() else {
            return Err(CompileError::InvalidInput(
                "includes needs a value".to_string(),
            ));
        };
        let mut ctx = self.eval_ctx();
        let haystack = ctx.add(self.lower_expression(target)?);
        let mut haystack = self.output_to_json_path(haystack, "includes subject", &mut ctx)?;

        // A constant start index narrows the search to the `[n:]` slice.
        if let Some(from) = args.get(1) {
            match self.fold_expression(from).and_then(|v| v.as_u64()) {
                Some(n) => haystack = format!("{haystack}[{n}:]"),
                None => {
                    return Err(CompileError::UnsupportedFeature(
                        "includes with a dynamic start index".to_string(),
                    ))
                }
            }
        }

        let value = ctx.add(self.lower_expression(needle)?);
        let value = self.output_to_json_path_or_literal(value, "includes value", &mut ctx)?;
        let value = match value {
            Output::JsonPath(path) => Arg::Path(path),
            Output::Literal { value, .. } => Arg::Literal(value),
            Output::Condition(_) => {
                return Err(CompileError::Unexpected(
                    "includes value normalization left a condition".to_string(),
                ))
            }
        };
        let (sub, path) = self.materialize_intrinsic(
            Intrinsic::array_contains(Arg::Path(haystack), value),
            "found",
            "includes",
        );
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(path)))
    }

    fn lower_callback_method(
        &mut self,
        method: &str,
        target: &Expression,
        args: &[Expression],
        hint: &str,
    ) -> Result<Lowered, CompileError> {
        let Some(callback) = args.first() else {
            return Err(CompileError::InvalidInput(format!(
                "{method} needs a callback"
            )));
        };
        let (params, body) = self.callback_parts(callback)?;
        normalize::validate_body(body, self.interner())?;

        let mut ctx = self.eval_ctx();
        let source = ctx.add(self.lower_expression(target)?);
        let source = self.output_to_json_path(source, "iteration source", &mut ctx)?;

        // A filter whose predicate is a single comparison against a
        // constant compiles to a JSON Path filter expression instead of a
        // loop.
        if method == "filter" {
            if let Some(filtered) = self.jsonpath_filter(&source, params, body)? {
                return Ok(ctx.finish(Output::path(filtered)));
            }
        }

        let slot = self.heap_slot();
        let mut init_fields = Map::new();
        let (step, end) = match method {
            "map" => (
                StepKind::AppendJson(format!("{slot}.ret")),
                EndKind::ParseArray,
            ),
            "filter" => (StepKind::AppendIfTruthy, EndKind::ParseArray),
            "forEach" => (StepKind::Discard, EndKind::Null),
            _ => unreachable!("matched by caller"),
        };
        if matches!(end, EndKind::ParseArray) {
            init_fields.insert("arrStr".to_string(), Value::String("[null".to_string()));
        }

        let needs_source_copy = params.as_ref().len() > 2;
        let step_label = self.fresh_label("step");
        let body_sub = self.lower_callback_body(
            &slot,
            params,
            body,
            needs_source_copy,
            hint,
            &step_label,
        )?;
        let output = self.iteration_skeleton(
            &slot,
            &source,
            init_fields,
            needs_source_copy,
            None,
            Some(body_sub),
            step,
            end,
            step_label,
            &mut ctx,
        )?;
        Ok(ctx.finish(output))
    }

    fn lower_join(
        &mut self,
        target: &Expression,
        args: &[Expression],
        hint: &str,
    ) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let source = ctx.add(self.lower_expression(target)?);
        let source = self.output_to_json_path(source, "join source", &mut ctx)?;

        let separator = match args.first() {
            None => Arg::Literal(Value::String(",".to_string())),
            Some(expr) => {
                let sep = ctx.add(self.lower_expression(expr)?);
                match self.output_to_json_path_or_literal(sep, "separator", &mut ctx)? {
                    Output::JsonPath(path) => Arg::Path(path),
                    Output::Literal { value, .. } => Arg::Literal(value),
                    Output::Condition(_) => {
                        return Err(CompileError::Unexpected(
                            "separator normalization left a condition".to_string(),
                        ))
                    }
                }
            }
        };

        let slot = self.heap_slot();
        let mut init_fields = Map::new();
        init_fields.insert("acc".to_string(), Value::String(String::new()));

        // The per-item body coerces the head element to a string in
        // `{slot}.ret`, which the join step accumulates.
        let mut body_ctx = self.eval_ctx();
        let text = self.to_string_output(
            Output::path(format!("{slot}.arr[0]")),
            hint,
            &mut body_ctx,
        )?;
        let mut write = NodeState::pass();
        write.result_path = Some(ResultPath::Path(format!("{slot}.ret")));
        write.next = Some(DEFERRED_NEXT.to_string());
        let write = graph::pass_with_input(write, text)?;
        body_ctx.push_sub(Some(SubState::single("write", write)));
        let body_sub = body_ctx.into_sub().expect("join body writes a state");

        let step_label = self.fresh_label("step");
        let output = self.iteration_skeleton(
            &slot,
            &source,
            init_fields,
            false,
            None,
            Some(body_sub),
            StepKind::Join(separator),
            EndKind::Accumulator,
            step_label,
            &mut ctx,
        )?;
        Ok(ctx.finish(output))
    }

    fn lower_slice(
        &mut self,
        target: &Expression,
        args: &[Expression],
        hint: &str,
    ) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let source = ctx.add(self.lower_expression(target)?);
        let source = self.output_to_json_path(source, "slice source", &mut ctx)?;

        let index_arg = |compiler: &mut Self,
                         ctx: &mut EvalCtx,
                         expr: Option<&Expression>|
         -> Result<Option<Arg>, CompileError> {
            match expr {
                None => Ok(None),
                Some(expr) => {
                    if let Some(value) = compiler.fold_expression(expr) {
                        match value.as_u64() {
                            Some(n) => return Ok(Some(Arg::Literal(Value::from(n)))),
                            None => {
                                return Err(CompileError::InvalidCollectionAccess(
                                    "slice bounds must be non-negative integers".to_string(),
                                ))
                            }
                        }
                    }
                    let output = compiler.lower_expression(expr)?;
                    let output = ctx.add(output);
                    let output = compiler.to_number(output, "slice bound", ctx)?;
                    let path = compiler.output_to_json_path(output, "slice bound", ctx)?;
                    Ok(Some(Arg::Path(path)))
                }
            }
        };
        let start = index_arg(self, &mut ctx, args.first())?
            .unwrap_or(Arg::Literal(Value::from(0)));
        // The range is inclusive, so the end bound is `end - 1`; with no end
        // argument the range runs to `length - 1`.
        let end = match index_arg(self, &mut ctx, args.get(1))? {
            Some(Arg::Literal(value)) => {
                let n = value.as_u64().unwrap_or(0);
                if n == 0 {
                    // slice(_, 0) selects nothing.
                    return Ok(ctx.finish(Output::literal(Value::Array(Vec::new()))));
                }
                Arg::Literal(Value::from(n - 1))
            }
            Some(Arg::Path(path)) => Arg::Intrinsic(Intrinsic::math_add(
                Arg::Path(path),
                Arg::Literal(Value::from(-1)),
            )),
            Some(arg) => arg,
            None => Arg::Intrinsic(Intrinsic::math_add(
                Intrinsic::array_length(Arg::Path(source.clone())),
                Arg::Literal(Value::from(-1)),
            )),
        };

        // Materialize the index range, then loop over it, indexing back
        // into the source.
        let (range_sub, range_path) = self.materialize_intrinsic(
            Intrinsic::array_range(start, end, Arg::Literal(Value::from(1))),
            "range",
            hint,
        );
        ctx.push_sub(Some(range_sub));

        let slot = self.heap_slot();
        let item_slot = self.heap_slot();
        let mut pick = NodeState::pass().with_hint("pick item");
        pick.parameters = Some(serde_json::json!({
            "v.$": Intrinsic::array_get_item(
                Arg::Path(format!("{slot}.src")),
                Arg::Path(format!("{slot}.arr[0]")),
            )
            .to_string(),
        }));
        pick.result_path = Some(ResultPath::Path(item_slot.clone()));
        pick.next = Some(DEFERRED_NEXT.to_string());
        let body_sub = SubState::single("pick", pick);

        let mut init_fields = Map::new();
        init_fields.insert("arrStr".to_string(), Value::String("[null".to_string()));
        let step_label = self.fresh_label("step");
        let output = self.iteration_skeleton(
            &slot,
            &range_path,
            init_fields,
            true,
            Some(&source),
            Some(body_sub),
            StepKind::AppendJson(format!("{item_slot}.v")),
            EndKind::ParseArray,
            step_label,
            &mut ctx,
        )?;
        Ok(ctx.finish(output))
    }

    /// Extract a callback argument's parameters and body.
    fn callback_parts<'b>(
        &self,
        expr: &'b Expression,
    ) -> Result<(&'b FormalParameterList, &'b [StatementListItem]), CompileError> {
        match expr {
            Expression::ArrowFunction(arrow) => {
                Ok((arrow.parameters(), &arrow.body().statements()[..]))
            }
            Expression::Function(function) => {
                Ok((function.parameters(), &function.body().statements()[..]))
            }
            Expression::Parenthesized(paren) => self.callback_parts(paren.expression()),
            other => Err(CompileError::InvalidInput(format!(
                "expected an inline function, found `{}`",
                snippet(other, self.interner())
            ))),
        }
    }

    /// Lower a callback body into the skeleton's `body` position: bind the
    /// `(item, index?, array?)` parameters, then run the statements with a
    /// return template that lands the result in `{slot}.ret` and jumps to
    /// the `step` state.
    fn lower_callback_body(
        &mut self,
        slot: &str,
        params: &FormalParameterList,
        body: &[StatementListItem],
        source_copied: bool,
        hint: &str,
        step_label: &str,
    ) -> Result<SubState, CompileError> {
        self.push_scope();
        self.push_frame(Frame::Callback);
        self.push_return_frame(ReturnFrame {
            result_path: Some(ResultPath::Path(format!("{slot}.ret"))),
            next: Some(step_label.to_string()),
            used: false,
        });

        let mut subs: Vec<Option<SubState>> = Vec::new();
        let param_sources = [
            format!("{slot}.arr[0]"),
            format!("{slot}.idx"),
            format!("{slot}.src"),
        ];
        for (position, param) in params.as_ref().iter().enumerate() {
            let Some(path) = param_sources.get(position) else {
                return Err(CompileError::InvalidInput(format!(
                    "too many callback parameters in `{hint}`"
                )));
            };
            if position == 2 && !source_copied {
                return Err(CompileError::Unexpected(
                    "array parameter without a source copy".to_string(),
                ));
            }
            subs.push(self.bind_binding(
                param.variable().binding(),
                Output::path(path.clone()),
                BindMode::Declare,
            )?);
        }

        subs.push(self.lower_statements(body)?);
        if normalize::needs_terminal_return(body) {
            let mut ctx = self.eval_ctx();
            let ret = self.materialize_return(
                Output::path(NULL_SLOT),
                "return null".to_string(),
                &mut ctx,
            )?;
            ctx.push_sub(Some(ret));
            subs.push(ctx.into_sub());
        }

        self.pop_return_frame();
        self.pop_frame();
        self.pop_scope();

        Ok(graph::join_sub_states(subs, &self.chain).unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        }))
    }

    /// The iteration skeleton itself.
    #[allow(clippy::too_many_arguments)]
    fn iteration_skeleton(
        &mut self,
        slot: &str,
        source: &str,
        mut init_fields: Map<String, Value>,
        copy_source: bool,
        indexed_source: Option<&str>,
        body_sub: Option<SubState>,
        step: StepKind,
        end: EndKind,
        step_label: String,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        let check_label = self.fresh_label("hasNext");
        let body_label = self.fresh_label("body");
        let end_label = self.fresh_label("end");
        // init: the loop slot gathers the remaining array, the running
        // index, and the accumulator fields.
        init_fields.insert("arr.$".to_string(), Value::String(source.to_string()));
        init_fields.insert("idx".to_string(), Value::from(0));
        if copy_source {
            let copied = indexed_source.unwrap_or(source);
            init_fields.insert("src.$".to_string(), Value::String(copied.to_string()));
        }
        let mut init = NodeState::pass().with_hint("iterate");
        init.parameters = Some(Value::Object(init_fields));
        init.result_path = Some(ResultPath::Path(slot.to_string()));
        init.next = Some(DEFERRED_NEXT.to_string());
        ctx.push_sub(Some(SubState::single("init", init)));

        // check: anything left?
        let mut check = NodeState::new(StateKind::Choice).with_hint("hasNext");
        check.choices = Some(vec![ChoiceRule::new(
            is_present(format!("{slot}.arr[0]"), true),
            body_label.clone(),
        )]);
        check.default = Some(end_label.clone());

        // step: accumulate + behead + advance, in one rebuild of the slot.
        let mut rebuild = Map::new();
        rebuild.insert(
            "arr.$".to_string(),
            Value::String(format!("{slot}.arr[1:]")),
        );
        rebuild.insert(
            "idx.$".to_string(),
            Value::String(
                Intrinsic::math_add(Arg::Path(format!("{slot}.idx")), Arg::lit(1)).to_string(),
            ),
        );
        if copy_source {
            rebuild.insert("src.$".to_string(), Value::String(format!("{slot}.src")));
        }

        let append_entry = |value_path: &str| {
            Value::String(
                Intrinsic::format(
                    "{},{}",
                    vec![
                        Arg::Path(format!("{slot}.arrStr")),
                        Arg::Intrinsic(Intrinsic::json_to_string(Arg::path(value_path))),
                    ],
                )
                .to_string(),
            )
        };

        let step_sub = match step {
            StepKind::Discard => {
                let mut advance = NodeState::pass().with_hint("next item");
                advance.parameters = Some(Value::Object(rebuild));
                advance.result_path = Some(ResultPath::Path(slot.to_string()));
                advance.next = Some(check_label.clone());
                SubState::single("advance", advance)
            }
            StepKind::AppendJson(value_path) => {
                let mut fields = rebuild;
                fields.insert("arrStr.$".to_string(), append_entry(&value_path));
                let mut advance = NodeState::pass().with_hint("append item");
                advance.parameters = Some(Value::Object(fields));
                advance.result_path = Some(ResultPath::Path(slot.to_string()));
                advance.next = Some(check_label.clone());
                SubState::single("advance", advance)
            }
            StepKind::AppendIfTruthy => {
                let mut keep_fields = rebuild.clone();
                keep_fields.insert(
                    "arrStr.$".to_string(),
                    append_entry(&format!("{slot}.arr[0]")),
                );
                let mut keep = NodeState::pass().with_hint("keep item");
                keep.parameters = Some(Value::Object(keep_fields));
                keep.result_path = Some(ResultPath::Path(slot.to_string()));
                keep.next = Some(check_label.clone());

                let mut skip_fields = rebuild;
                skip_fields.insert(
                    "arrStr.$".to_string(),
                    Value::String(format!("{slot}.arrStr")),
                );
                let mut skip = NodeState::pass().with_hint("skip item");
                skip.parameters = Some(Value::Object(skip_fields));
                skip.result_path = Some(ResultPath::Path(slot.to_string()));
                skip.next = Some(check_label.clone());

                let mut choose = NodeState::new(StateKind::Choice).with_hint("kept?");
                choose.choices = Some(vec![ChoiceRule::new(
                    is_truthy(&format!("{slot}.ret")),
                    "keep",
                )]);
                choose.default = Some("skip".to_string());

                let mut sub = SubState::with_start("choose");
                sub.insert("choose", choose);
                sub.insert("keep", keep);
                sub.insert("skip", skip);
                sub
            }
            StepKind::Join(separator) => {
                let mut first_fields = rebuild.clone();
                first_fields.insert(
                    "acc.$".to_string(),
                    Value::String(format!("{slot}.ret")),
                );
                let mut first = NodeState::pass().with_hint("first item");
                first.parameters = Some(Value::Object(first_fields));
                first.result_path = Some(ResultPath::Path(slot.to_string()));
                first.next = Some(check_label.clone());

                let glue = match separator {
                    Arg::Literal(Value::String(sep)) => Intrinsic::format(
                        format!("{{}}{}{{}}", escape_format_text(&sep)),
                        vec![
                            Arg::Path(format!("{slot}.acc")),
                            Arg::Path(format!("{slot}.ret")),
                        ],
                    ),
                    other => Intrinsic::format(
                        "{}{}{}",
                        vec![
                            Arg::Path(format!("{slot}.acc")),
                            other,
                            Arg::Path(format!("{slot}.ret")),
                        ],
                    ),
                };
                let mut rest_fields = rebuild;
                rest_fields.insert("acc.$".to_string(), Value::String(glue.to_string()));
                let mut rest = NodeState::pass().with_hint("join item");
                rest.parameters = Some(Value::Object(rest_fields));
                rest.result_path = Some(ResultPath::Path(slot.to_string()));
                rest.next = Some(check_label.clone());

                let mut choose = NodeState::new(StateKind::Choice).with_hint("first?");
                choose.choices = Some(vec![ChoiceRule::new(
                    crate::condition::Condition::Test(Test {
                        variable: format!("{slot}.idx"),
                        operator: TestOp::NumericEquals(Number::from(0)),
                    }),
                    "first",
                )]);
                choose.default = Some("rest".to_string());

                let mut sub = SubState::with_start("choose");
                sub.insert("choose", choose);
                sub.insert("first", first);
                sub.insert("rest", rest);
                sub
            }
        };

        // end: finalize the accumulator.
        let (end_sub, output) = match end {
            EndKind::Null => (
                SubState::single("done", NodeState::pass().with_next(DEFERRED_NEXT)),
                Output::path(NULL_SLOT),
            ),
            EndKind::Accumulator => (
                SubState::single("done", NodeState::pass().with_next(DEFERRED_NEXT)),
                Output::path(format!("{slot}.acc")),
            ),
            EndKind::ParseArray => {
                let text_slot = self.heap_slot();
                let parsed_slot = self.heap_slot();
                let mut close = NodeState::pass().with_hint("close array");
                close.parameters = Some(serde_json::json!({
                    "s.$": Intrinsic::format(
                        "{}]",
                        vec![Arg::Path(format!("{slot}.arrStr"))],
                    )
                    .to_string(),
                }));
                close.result_path = Some(ResultPath::Path(text_slot.clone()));
                close.next = Some("parse".to_string());
                let mut parse = NodeState::pass().with_hint("parse array");
                parse.parameters = Some(serde_json::json!({
                    "v.$": Intrinsic::string_to_json(Arg::Path(format!("{text_slot}.s")))
                        .to_string(),
                }));
                parse.result_path = Some(ResultPath::Path(parsed_slot.clone()));
                parse.next = Some(DEFERRED_NEXT.to_string());
                let mut sub = SubState::with_start("close");
                sub.insert("close", close);
                sub.insert("parse", parse);
                (sub, Output::path(format!("{parsed_slot}.v[1:]")))
            }
        };

        let mut body_sub = body_sub.unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        graph::update_deferred_next_states(&step_label, &mut body_sub);

        let mut wrapper = SubState::with_start(check_label.clone());
        wrapper.insert(check_label, check);
        wrapper.insert(body_label, body_sub);
        wrapper.insert(step_label, step_sub);
        wrapper.insert(end_label, end_sub);
        ctx.push_sub(Some(wrapper));
        Ok(output)
    }

    /// Detect a filter predicate of the shape `x => x.a.b <op> constant`
    /// and compile it to a JSON Path filter expression on the source.
    fn jsonpath_filter(
        &mut self,
        source: &str,
        params: &FormalParameterList,
        body: &[StatementListItem],
    ) -> Result<Option<String>, CompileError> {
        use boa_ast::declaration::Binding;

        let param = match params.as_ref() {
            [param] => match param.variable().binding() {
                Binding::Identifier(ident) => self.resolve_sym(ident.sym())?,
                Binding::Pattern(_) => return Ok(None),
            },
            _ => return Ok(None),
        };
        let expr = match body {
            [StatementListItem::Statement(Statement::Return(ret))] => match ret.target() {
                Some(expr) => expr,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        let Expression::Binary(binary) = strip_parens(expr) else {
            return Ok(None);
        };
        let BinaryOp::Relational(op) = binary.op() else {
            return Ok(None);
        };
        let op = match op {
            RelationalOp::Equal | RelationalOp::StrictEqual => "==",
            RelationalOp::NotEqual | RelationalOp::StrictNotEqual => "!=",
            RelationalOp::LessThan => "<",
            RelationalOp::LessThanOrEqual => "<=",
            RelationalOp::GreaterThan => ">",
            RelationalOp::GreaterThanOrEqual => ">=",
            _ => return Ok(None),
        };

        // One side is a member chain on the parameter, the other a literal.
        let (member, literal) = if let Some(member) = self.element_path(binary.lhs(), &param)? {
            match self.fold_expression(binary.rhs()) {
                Some(value) => (member, value),
                None => return Ok(None),
            }
        } else if let Some(member) = self.element_path(binary.rhs(), &param)? {
            match self.fold_expression(binary.lhs()) {
                Some(value) => (member, value),
                None => return Ok(None),
            }
        } else {
            return Ok(None);
        };

        let rendered = match &literal {
            Value::String(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            _ => return Ok(None),
        };
        Ok(Some(format!("{source}[?({member} {op} {rendered})]")))
    }

    /// `x` -> `@`, `x.a.b` -> `@.a.b`, rooted at the filter parameter.
    fn element_path(
        &self,
        expr: &Expression,
        param: &str,
    ) -> Result<Option<String>, CompileError> {
        match strip_parens(expr) {
            Expression::Identifier(ident) => {
                if self.resolve_sym(ident.sym())? == param {
                    Ok(Some("@".to_string()))
                } else {
                    Ok(None)
                }
            }
            Expression::PropertyAccess(PropertyAccess::Simple(simple)) => {
                let PropertyAccessField::Const(sym) = simple.field() else {
                    return Ok(None);
                };
                let field = self.resolve_sym(*sym)?;
                match self.element_path(simple.target(), param)? {
                    Some(base) => Ok(Some(format!("{base}.{field}"))),
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }
}

fn strip_parens(expr: &Expression) -> &Expression {
    match expr {
        Expression::Parenthesized(paren) => strip_parens(paren.expression()),
        other => other,
    }
}
