//! Expression lowering: each expression becomes `(states, Output)`.
//!
//! Constant sub-trees fold at compile time; everything else is emulated
//! with intrinsic calls and `Choice` dispatch. Evaluation order is
//! preserved by collecting side-effecting sub-states in an [`EvalCtx`]
//! before any output is consumed.

use crate::asl::{NodeState, ResultPath, StateKind};
use crate::condition::{
    self, and, boolean_equals, compare_paths, compare_value, is_boolean, is_null, is_numeric,
    is_present, is_string, is_truthy, not, or, ChoiceRule, CompareKind, Condition,
};
use crate::error::CompileError;
use crate::graph::{self, Lowered, Output, SubState, CATCH_LABEL, DEFERRED_NEXT, NULL_SLOT};
use crate::integration::IntegrationCall;
use crate::intrinsics::{escape_format_text, Arg, Intrinsic};
use crate::lower::binding::{join_key, BindMode};
use crate::lower::{Compiler, EvalCtx, ThrowRoute};
use crate::normalize::snippet;
use boa_ast::expression::access::{PropertyAccess, PropertyAccessField};
use boa_ast::expression::literal::{Literal, TemplateElement, TemplateLiteral};
use boa_ast::expression::operator::assign::{AssignOp, AssignTarget};
use boa_ast::expression::operator::binary::{ArithmeticOp, BinaryOp, LogicalOp, RelationalOp};
use boa_ast::expression::operator::unary::UnaryOp;
use boa_ast::expression::operator::update::{UpdateOp, UpdateTarget};
use boa_ast::expression::operator::{Assign, Binary, Unary, Update};
use boa_ast::expression::Call;
use boa_ast::Expression;
use log::trace;
use serde_json::{Map, Number, Value};

impl Compiler<'_> {
    /// Lower one expression. The returned states (if any) must run before
    /// the output is read.
    pub fn lower_expression(&mut self, expr: &Expression) -> Result<Lowered, CompileError> {
        trace!("lower expression `{}`", snippet(expr, self.interner()));
        // Constant sub-trees fold to a literal with no states at all.
        if matches!(
            expr,
            Expression::Unary(_)
                | Expression::Binary(_)
                | Expression::Conditional(_)
                | Expression::TemplateLiteral(_)
        ) {
            if let Some(value) = self.fold_expression(expr) {
                return Ok(Lowered::pure(Output::literal(value)));
            }
        }
        match expr {
            Expression::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                match name.as_str() {
                    // `undefined` and `NaN` are plain identifiers to the
                    // parser; the first has no JSON value at all, the
                    // second flows as null.
                    "undefined" => Err(CompileError::UndefinedNotSupported(
                        "undefined".to_string(),
                    )),
                    "NaN" | "Infinity" => Ok(Lowered::pure(Output::literal(Value::Null))),
                    _ => {
                        let path = self.identifier_path(&name)?;
                        Ok(Lowered::pure(Output::path(path)))
                    }
                }
            }
            Expression::Literal(lit) => self.lower_literal(lit),
            Expression::ArrayLiteral(array) => self.lower_array_literal(array.as_ref()),
            Expression::ObjectLiteral(object) => self.lower_object_literal(object.properties()),
            Expression::TemplateLiteral(template) => self.lower_template(template),
            Expression::PropertyAccess(access) => self.lower_property_access(access),
            Expression::Call(call) => {
                let hint = snippet(expr, self.interner());
                self.lower_call(call, &hint)
            }
            Expression::Assign(assign) => self.lower_assign(assign),
            Expression::Unary(unary) => self.lower_unary(unary),
            Expression::Update(update) => self.lower_update(update),
            Expression::Binary(binary) => self.lower_binary(binary),
            Expression::Conditional(conditional) => self.lower_conditional(conditional),
            Expression::Await(await_expr) => self.lower_expression(await_expr.target()),
            Expression::Parenthesized(paren) => self.lower_expression(paren.expression()),
            Expression::Spread(_) => Err(CompileError::InvalidInput(
                "spread outside an object or array literal".to_string(),
            )),
            Expression::This => Err(CompileError::ClassesNotSupported("this".to_string())),
            Expression::New(_) => Err(CompileError::ClassesNotSupported(snippet(
                expr,
                self.interner(),
            ))),
            Expression::Class(_) => Err(CompileError::ClassesNotSupported(snippet(
                expr,
                self.interner(),
            ))),
            Expression::Optional(_) => Err(CompileError::UnsupportedFeature(
                "optional chaining".to_string(),
            )),
            Expression::ArrowFunction(_)
            | Expression::AsyncArrowFunction(_)
            | Expression::Function(_) => Err(CompileError::UnsupportedFeature(
                "function values outside a call position".to_string(),
            )),
            other => Err(CompileError::UnsupportedFeature(snippet(
                other,
                self.interner(),
            ))),
        }
    }

    fn lower_literal(&mut self, lit: &Literal) -> Result<Lowered, CompileError> {
        let value = match lit {
            Literal::Null => return Ok(Lowered::pure(Output::path(NULL_SLOT))),
            Literal::Undefined => {
                return Err(CompileError::UndefinedNotSupported(
                    "undefined literal".to_string(),
                ))
            }
            Literal::String(sym) => Value::String(self.resolve_sym(*sym)?),
            Literal::Int(i) => Value::from(*i),
            Literal::Num(f) => number_value(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::BigInt(_) => {
                return Err(CompileError::UnsupportedFeature("BigInt literal".to_string()))
            }
        };
        Ok(Lowered::pure(Output::literal(value)))
    }

    // --- composite literals -----------------------------------------------

    fn lower_array_literal(
        &mut self,
        elements: &[Option<Expression>],
    ) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let mut outputs = Vec::new();
        for element in elements {
            let Some(element) = element else {
                return Err(CompileError::InvalidCollectionAccess(
                    "elided array item".to_string(),
                ));
            };
            let output = ctx.add(self.lower_expression(element)?);
            let output = self.output_to_json_path_or_literal(output, "array item", &mut ctx)?;
            outputs.push(output);
        }

        if outputs.iter().all(|output| {
            matches!(
                output,
                Output::Literal {
                    contains_json_path: false,
                    ..
                }
            )
        }) {
            let items = outputs
                .into_iter()
                .map(|output| match output {
                    Output::Literal { value, .. } => value,
                    _ => unreachable!("checked literal"),
                })
                .collect();
            return Ok(ctx.finish(Output::literal(Value::Array(items))));
        }

        let mut args = Vec::new();
        for output in outputs {
            match output {
                Output::JsonPath(path) => args.push(Arg::Path(path)),
                Output::Literal {
                    value,
                    contains_json_path,
                } => {
                    // Compound values cannot embed in an intrinsic call
                    // string; hoist them to a slot first.
                    if contains_json_path || value.is_object() || value.is_array() {
                        let path = self.output_to_json_path(
                            Output::Literal {
                                value,
                                contains_json_path,
                            },
                            "array item",
                            &mut ctx,
                        )?;
                        args.push(Arg::Path(path));
                    } else {
                        args.push(Arg::Literal(value));
                    }
                }
                Output::Condition(_) => {
                    return Err(CompileError::Unexpected(
                        "array item normalization left a condition".to_string(),
                    ))
                }
            }
        }
        let (sub, path) =
            self.materialize_intrinsic(Intrinsic::Array(args), "arr", "array literal");
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(path)))
    }

    fn lower_object_literal(
        &mut self,
        properties: &[boa_ast::property::PropertyDefinition],
    ) -> Result<Lowered, CompileError> {
        use boa_ast::property::PropertyDefinition;

        // The object is assembled as runs of literal entries interleaved
        // with spread slots, merged left to right.
        enum Piece {
            Literal(Map<String, Value>, bool),
            Spread(String),
        }

        let mut ctx = self.eval_ctx();
        let mut pieces: Vec<Piece> = Vec::new();
        let mut current = Map::new();
        let mut current_has_path = false;

        for property in properties {
            match property {
                PropertyDefinition::Property(name, value) => {
                    let key = self.property_key(name)?;
                    let output = ctx.add(self.lower_expression(value)?);
                    let output =
                        self.output_to_json_path_or_literal(output, "property", &mut ctx)?;
                    match output {
                        Output::Literal {
                            value,
                            contains_json_path,
                        } => {
                            current_has_path |= contains_json_path;
                            current.insert(key, value);
                        }
                        Output::JsonPath(path) => {
                            current_has_path = true;
                            current.insert(key, Value::String(path));
                        }
                        Output::Condition(_) => {
                            return Err(CompileError::Unexpected(
                                "property normalization left a condition".to_string(),
                            ))
                        }
                    }
                }
                PropertyDefinition::IdentifierReference(ident) => {
                    let name = self.resolve_sym(ident.sym())?;
                    let path = self.identifier_path(&name)?;
                    current_has_path = true;
                    current.insert(name, Value::String(path));
                }
                PropertyDefinition::SpreadObject(source) => {
                    let output = ctx.add(self.lower_expression(source)?);
                    // Hoist the spread source to a fresh slot so later
                    // mutations of it do not leak into this object.
                    let slot = self.heap_slot();
                    let mut copy = NodeState::pass().with_hint("spread source");
                    copy.result_path = Some(ResultPath::Path(slot.clone()));
                    copy.next = Some(DEFERRED_NEXT.to_string());
                    let output =
                        self.output_to_json_path_or_literal(output, "spread", &mut ctx)?;
                    let copy = graph::pass_with_input(copy, output)?;
                    ctx.push_sub(Some(SubState::single("copy", copy)));
                    if !current.is_empty() {
                        pieces.push(Piece::Literal(
                            std::mem::take(&mut current),
                            std::mem::take(&mut current_has_path),
                        ));
                    }
                    pieces.push(Piece::Spread(slot));
                }
                other => {
                    return Err(CompileError::UnsupportedFeature(format!(
                        "object member `{other:?}`"
                    )))
                }
            }
        }
        if !current.is_empty() || pieces.is_empty() {
            pieces.push(Piece::Literal(current, current_has_path));
        }

        if pieces.len() == 1 {
            return match pieces.pop().expect("one piece") {
                Piece::Literal(map, has_path) => Ok(ctx.finish(Output::Literal {
                    value: Value::Object(map),
                    contains_json_path: has_path,
                })),
                Piece::Spread(slot) => Ok(ctx.finish(Output::path(slot))),
            };
        }

        // Mixed literal/spread: each literal run lands in a slot and the
        // pieces merge pairwise.
        let mut paths = Vec::new();
        for piece in pieces {
            match piece {
                Piece::Spread(slot) => paths.push(slot),
                Piece::Literal(map, has_path) => {
                    let path = self.output_to_json_path(
                        Output::Literal {
                            value: Value::Object(map),
                            contains_json_path: has_path,
                        },
                        "object literal",
                        &mut ctx,
                    )?;
                    paths.push(path);
                }
            }
        }
        let mut merged = paths.remove(0);
        for path in paths {
            let (sub, out) = self.materialize_intrinsic(
                Intrinsic::json_merge(Arg::Path(merged), Arg::Path(path)),
                "obj",
                "merge object",
            );
            ctx.push_sub(Some(sub));
            merged = out;
        }
        Ok(ctx.finish(Output::path(merged)))
    }

    fn lower_template(&mut self, template: &TemplateLiteral) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let mut fmt = String::new();
        let mut raw = String::new();
        let mut args: Vec<Arg> = Vec::new();
        for element in template.elements() {
            match element {
                TemplateElement::String(sym) => {
                    let text = self.resolve_sym(*sym)?;
                    fmt.push_str(&escape_format_text(&text));
                    raw.push_str(&text);
                }
                TemplateElement::Expr(expr) => {
                    let expr: &Expression = expr;
                    if let Some(text) = self.fold_expression(expr).and_then(|v| js_to_string(&v))
                    {
                        fmt.push_str(&escape_format_text(&text));
                        raw.push_str(&text);
                        continue;
                    }
                    let output = ctx.add(self.lower_expression(expr)?);
                    let output = self.to_string_output(output, "template span", &mut ctx)?;
                    match output {
                        Output::Literal {
                            value: Value::String(text),
                            ..
                        } => {
                            fmt.push_str(&escape_format_text(&text));
                            raw.push_str(&text);
                        }
                        Output::JsonPath(path) => {
                            let path = self.format_safe_path(path, &mut ctx);
                            fmt.push_str("{}");
                            args.push(Arg::Path(path));
                        }
                        _ => {
                            return Err(CompileError::Unexpected(
                                "template span did not normalize to a string".to_string(),
                            ))
                        }
                    }
                }
            }
        }
        if args.is_empty() {
            return Ok(ctx.finish(Output::literal(raw)));
        }
        let (sub, path) = self.materialize_intrinsic(
            Intrinsic::format(fmt, args),
            "str",
            "template string",
        );
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(path)))
    }

    /// `States.Format` mishandles paths whose first identifier character is
    /// not alphabetic (e.g. the hidden `$.0__i` slots); reroute those
    /// through a scratch copy.
    pub(crate) fn format_safe_path(&mut self, path: String, ctx: &mut EvalCtx) -> String {
        let ident = path
            .strip_prefix("$.")
            .or_else(|| path.strip_prefix("$$."))
            .unwrap_or(&path);
        if ident.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return path;
        }
        let slot = self.heap_slot();
        let mut copy = NodeState::pass().with_hint("format-safe copy");
        copy.input_path = Some(path);
        copy.result_path = Some(ResultPath::Path(slot.clone()));
        copy.next = Some(DEFERRED_NEXT.to_string());
        ctx.push_sub(Some(SubState::single("copy", copy)));
        slot
    }

    // --- member access ----------------------------------------------------

    fn lower_property_access(
        &mut self,
        access: &PropertyAccess,
    ) -> Result<Lowered, CompileError> {
        match access {
            PropertyAccess::Simple(simple) => {
                let mut ctx = self.eval_ctx();
                match simple.field() {
                    PropertyAccessField::Const(sym) => {
                        let key = self.resolve_sym(*sym)?;
                        let base = ctx.add(self.lower_expression(simple.target())?);
                        self.lower_const_access(base, &key, ctx)
                    }
                    PropertyAccessField::Expr(index) => {
                        let index: &Expression = index;
                        self.lower_element_access(simple.target(), index, ctx)
                    }
                }
            }
            PropertyAccess::Private(_) | PropertyAccess::Super(_) => Err(
                CompileError::ClassesNotSupported("private or super access".to_string()),
            ),
        }
    }

    fn lower_const_access(
        &mut self,
        base: Output,
        key: &str,
        mut ctx: EvalCtx,
    ) -> Result<Lowered, CompileError> {
        if key == "length" {
            return self.lower_length(base, ctx);
        }
        match base {
            Output::Literal {
                value: Value::Object(map),
                contains_json_path: false,
            } => match map.get(key) {
                Some(value) => Ok(ctx.finish(Output::literal(value.clone()))),
                None => Err(CompileError::UndefinedNotSupported(format!(
                    "missing property `{key}`"
                ))),
            },
            Output::JsonPath(path) => Ok(ctx.finish(Output::path(join_key(&path, key)))),
            other => {
                let path = self.output_to_json_path(other, key, &mut ctx)?;
                Ok(ctx.finish(Output::path(join_key(&path, key))))
            }
        }
    }

    /// `.length` needs runtime shape dispatch: arrays answer through
    /// `States.ArrayLength`, objects that happen to carry a `length`
    /// property answer through it. The array test runs first, so an object
    /// with a `"0"` key counts as an array.
    fn lower_length(&mut self, base: Output, mut ctx: EvalCtx) -> Result<Lowered, CompileError> {
        match base {
            Output::Literal {
                value: Value::String(s),
                contains_json_path: false,
            } => return Ok(ctx.finish(Output::literal(s.chars().count()))),
            Output::Literal {
                value: Value::Array(items),
                contains_json_path: false,
            } => return Ok(ctx.finish(Output::literal(items.len()))),
            _ => {}
        }
        let path = self.output_to_json_path(base, "length", &mut ctx)?;
        let slot = self.heap_slot();

        let mut check = NodeState::new(StateKind::Choice).with_hint("length of");
        check.choices = Some(vec![
            ChoiceRule::new(is_present(format!("{path}[0]"), true), "arrayLength"),
            ChoiceRule::new(is_present(join_key(&path, "length"), true), "lengthProperty"),
        ]);
        check.default = Some("arrayLength".to_string());

        let mut array_length = NodeState::pass();
        array_length.parameters = Some(serde_json::json!({
            "len.$": Intrinsic::array_length(Arg::Path(path.clone())).to_string(),
        }));
        array_length.result_path = Some(ResultPath::Path(slot.clone()));
        array_length.next = Some(DEFERRED_NEXT.to_string());

        let mut length_property = NodeState::pass();
        length_property.input_path = Some(join_key(&path, "length"));
        length_property.result_path = Some(ResultPath::Path(format!("{slot}.len")));
        length_property.next = Some(DEFERRED_NEXT.to_string());

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        sub.insert("arrayLength", array_length);
        sub.insert("lengthProperty", length_property);
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(format!("{slot}.len"))))
    }

    fn lower_element_access(
        &mut self,
        base_expr: &Expression,
        index_expr: &Expression,
        mut ctx: EvalCtx,
    ) -> Result<Lowered, CompileError> {
        // An index that is a for-in loop variable reads the stashed item.
        if let Expression::Identifier(ident) = index_expr {
            let name = self.resolve_sym(ident.sym())?;
            if let Some(allocated) = self.lookup(&name) {
                if let Some(item_slot) = self.forin_item_of(allocated).cloned() {
                    let base = ctx.add(self.lower_expression(base_expr)?);
                    // The base still evaluates for its side effects.
                    let _ = self.output_to_json_path_or_literal(base, "collection", &mut ctx)?;
                    return Ok(ctx.finish(Output::path(item_slot)));
                }
            }
        }

        let base = ctx.add(self.lower_expression(base_expr)?);
        match self.fold_expression(index_expr) {
            Some(Value::Number(n)) => {
                let index = n
                    .as_u64()
                    .ok_or_else(|| {
                        CompileError::InvalidCollectionAccess(format!(
                            "index {n} is not a non-negative integer"
                        ))
                    })?;
                match base {
                    Output::Literal {
                        value: Value::Array(items),
                        contains_json_path: false,
                    } => items
                        .get(index as usize)
                        .cloned()
                        .map(|value| ctx.finish(Output::literal(value)))
                        .ok_or_else(|| {
                            CompileError::UndefinedNotSupported(format!(
                                "index {index} out of bounds"
                            ))
                        }),
                    other => {
                        let path = self.output_to_json_path(other, "collection", &mut ctx)?;
                        Ok(ctx.finish(Output::path(format!("{path}[{index}]"))))
                    }
                }
            }
            Some(Value::String(key)) => self.lower_const_access(base, &key, ctx),
            Some(other) => Err(CompileError::InvalidCollectionAccess(format!(
                "index `{other}` is neither a string nor a number"
            ))),
            None => {
                let base_path = self.output_to_json_path(base, "collection", &mut ctx)?;
                let index = ctx.add(self.lower_expression(index_expr)?);
                let index_path = self.output_to_json_path(index, "index", &mut ctx)?;
                let slot = self.heap_slot();

                // JSON Path cannot inspect runtime shape: probe `base[0]`
                // to pick the array reading; anything else resolves to the
                // constructed null.
                let mut check = NodeState::new(StateKind::Choice).with_hint("element access");
                check.choices = Some(vec![ChoiceRule::new(
                    is_present(format!("{base_path}[0]"), true),
                    "fromArray",
                )]);
                check.default = Some("noElement".to_string());

                let mut from_array = NodeState::pass();
                from_array.parameters = Some(serde_json::json!({
                    "v.$": Intrinsic::array_get_item(
                        Arg::Path(base_path.clone()),
                        Arg::Path(index_path),
                    )
                    .to_string(),
                }));
                from_array.result_path = Some(ResultPath::Path(slot.clone()));
                from_array.next = Some(DEFERRED_NEXT.to_string());

                let mut no_element = NodeState::pass();
                no_element.input_path = Some(NULL_SLOT.to_string());
                no_element.result_path = Some(ResultPath::Path(format!("{slot}.v")));
                no_element.next = Some(DEFERRED_NEXT.to_string());

                let mut sub = SubState::with_start("check");
                sub.insert("check", check);
                sub.insert("fromArray", from_array);
                sub.insert("noElement", no_element);
                ctx.push_sub(Some(sub));
                Ok(ctx.finish(Output::path(format!("{slot}.v"))))
            }
        }
    }

    // --- operators --------------------------------------------------------

    fn lower_unary(&mut self, unary: &Unary) -> Result<Lowered, CompileError> {
        match unary.op() {
            UnaryOp::Not => {
                let mut ctx = self.eval_ctx();
                let output = ctx.add(self.lower_expression(unary.target())?);
                let condition = self.output_to_condition(output, &mut ctx)?;
                Ok(ctx.finish(Output::Condition(not(condition))))
            }
            UnaryOp::Plus => {
                let mut ctx = self.eval_ctx();
                let output = ctx.add(self.lower_expression(unary.target())?);
                let output = self.to_number(output, "unary plus", &mut ctx)?;
                Ok(ctx.finish(output))
            }
            UnaryOp::Minus => {
                let mut ctx = self.eval_ctx();
                let output = ctx.add(self.lower_expression(unary.target())?);
                let output = self.to_number(output, "unary minus", &mut ctx)?;
                match output {
                    Output::Literal { value, .. } => {
                        Ok(ctx.finish(Output::literal(negate_value(&value))))
                    }
                    Output::JsonPath(path) => {
                        let output = self.negate_number_path(&path, &mut ctx);
                        Ok(ctx.finish(output))
                    }
                    Output::Condition(_) => Err(CompileError::Unexpected(
                        "toNumber left a condition".to_string(),
                    )),
                }
            }
            UnaryOp::TypeOf => self.lower_typeof(unary.target()),
            UnaryOp::Tilde => Err(CompileError::ArithmeticOnVariables(
                "bitwise not".to_string(),
            )),
            UnaryOp::Void => Err(CompileError::UndefinedNotSupported(
                "void expression".to_string(),
            )),
            UnaryOp::Delete => Err(CompileError::UnsupportedFeature(
                "delete expression".to_string(),
            )),
        }
    }

    /// Negate a number-or-null at `path` without arithmetic: stringify,
    /// split on the sign, and rebuild. Null (NaN) passes through.
    fn negate_number_path(&mut self, path: &str, ctx: &mut EvalCtx) -> Output {
        let slot = self.heap_slot();

        let mut check = NodeState::new(StateKind::Choice).with_hint("negate");
        check.choices = Some(vec![
            ChoiceRule::new(is_null(path, true), "keepNull"),
            ChoiceRule::new(
                Condition::Test(condition::Test {
                    variable: path.to_string(),
                    operator: condition::TestOp::NumericLessThan(Number::from(0)),
                }),
                "dropSign",
            ),
        ]);
        check.default = Some("prependSign".to_string());

        let mut keep_null = NodeState::pass();
        keep_null.input_path = Some(NULL_SLOT.to_string());
        keep_null.result_path = Some(ResultPath::Path(format!("{slot}.num")));
        keep_null.next = Some(DEFERRED_NEXT.to_string());

        // "-5" -> split on '-' -> ["5"] -> back to a number.
        let mut drop_sign = NodeState::pass();
        drop_sign.parameters = Some(serde_json::json!({
            "num.$": Intrinsic::string_to_json(Intrinsic::array_get_item(
                Intrinsic::string_split(
                    Intrinsic::json_to_string(Arg::path(path)),
                    Arg::lit("-"),
                ),
                Arg::lit(0),
            ))
            .to_string(),
        }));
        drop_sign.result_path = Some(ResultPath::Path(slot.clone()));
        drop_sign.next = Some(DEFERRED_NEXT.to_string());

        let mut prepend_sign = NodeState::pass();
        prepend_sign.parameters = Some(serde_json::json!({
            "num.$": Intrinsic::string_to_json(Intrinsic::format(
                "-{}",
                vec![Arg::path(path)],
            ))
            .to_string(),
        }));
        prepend_sign.result_path = Some(ResultPath::Path(slot.clone()));
        prepend_sign.next = Some(DEFERRED_NEXT.to_string());

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        sub.insert("keepNull", keep_null);
        sub.insert("dropSign", drop_sign);
        sub.insert("prependSign", prepend_sign);
        ctx.push_sub(Some(sub));
        Output::path(format!("{slot}.num"))
    }

    fn lower_typeof(&mut self, target: &Expression) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let output = ctx.add(self.lower_expression(target)?);
        if let Output::Literal { value, .. } = &output {
            return Ok(ctx.finish(Output::literal(js_typeof(value))));
        }
        let path = self.output_to_json_path(output, "typeof", &mut ctx)?;
        let slot = self.heap_slot();

        let mut check = NodeState::new(StateKind::Choice).with_hint("typeof");
        check.choices = Some(vec![
            ChoiceRule::new(is_present(&*path, false), "isUndefined"),
            ChoiceRule::new(is_null(&*path, true), "isObject"),
            ChoiceRule::new(is_string(&*path, true), "isString"),
            ChoiceRule::new(is_boolean(&*path, true), "isBoolean"),
            ChoiceRule::new(is_numeric(&*path, true), "isNumber"),
        ]);
        check.default = Some("isObject".to_string());

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        for (label, text) in [
            ("isUndefined", "undefined"),
            ("isObject", "object"),
            ("isString", "string"),
            ("isBoolean", "boolean"),
            ("isNumber", "number"),
        ] {
            let mut write = NodeState::pass();
            write.result = Some(Value::String(text.to_string()));
            write.result_path = Some(ResultPath::Path(format!("{slot}.type")));
            write.next = Some(DEFERRED_NEXT.to_string());
            sub.insert(label, write);
        }
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(format!("{slot}.type"))))
    }

    fn lower_update(&mut self, update: &Update) -> Result<Lowered, CompileError> {
        let path = match update.target() {
            UpdateTarget::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                self.identifier_path(&name)?
            }
            UpdateTarget::PropertyAccess(_) => {
                return Err(CompileError::InvalidInput(
                    "++/-- target must be a variable".to_string(),
                ))
            }
        };
        let (delta, postfix) = match update.op() {
            UpdateOp::IncrementPre => (1, false),
            UpdateOp::IncrementPost => (1, true),
            UpdateOp::DecrementPre => (-1, false),
            UpdateOp::DecrementPost => (-1, true),
        };

        let mut ctx = self.eval_ctx();
        let pre_slot = if postfix {
            let slot = self.heap_slot();
            let mut keep = NodeState::pass().with_hint("previous value");
            keep.input_path = Some(path.clone());
            keep.result_path = Some(ResultPath::Path(slot.clone()));
            keep.next = Some(DEFERRED_NEXT.to_string());
            ctx.push_sub(Some(SubState::single("keep", keep)));
            Some(slot)
        } else {
            None
        };

        let (sub, computed) = self.materialize_intrinsic(
            Intrinsic::math_add(Arg::path(&*path), Arg::lit(delta)),
            "num",
            "step",
        );
        ctx.push_sub(Some(sub));

        let mut write = NodeState::pass().with_hint("write back");
        write.input_path = Some(computed.clone());
        write.result_path = Some(ResultPath::Path(path));
        write.next = Some(DEFERRED_NEXT.to_string());
        ctx.push_sub(Some(SubState::single("write", write)));

        Ok(ctx.finish(Output::path(pre_slot.unwrap_or(computed))))
    }

    fn lower_binary(&mut self, binary: &Binary) -> Result<Lowered, CompileError> {
        match binary.op() {
            BinaryOp::Arithmetic(ArithmeticOp::Add) => {
                let mut ctx = self.eval_ctx();
                let lhs = ctx.add(self.lower_expression(binary.lhs())?);
                let lhs = self.output_to_json_path_or_literal(lhs, "left operand", &mut ctx)?;
                let rhs = ctx.add(self.lower_expression(binary.rhs())?);
                let rhs = self.output_to_json_path_or_literal(rhs, "right operand", &mut ctx)?;
                let output = self.add_outputs(lhs, rhs, &mut ctx)?;
                Ok(ctx.finish(output))
            }
            BinaryOp::Arithmetic(ArithmeticOp::Sub) => {
                let mut ctx = self.eval_ctx();
                let lhs = ctx.add(self.lower_expression(binary.lhs())?);
                let lhs = self.output_to_json_path_or_literal(lhs, "left operand", &mut ctx)?;
                let rhs = ctx.add(self.lower_expression(binary.rhs())?);
                let rhs = self.output_to_json_path_or_literal(rhs, "right operand", &mut ctx)?;
                let output = self.subtract_outputs(lhs, rhs, &mut ctx)?;
                Ok(ctx.finish(output))
            }
            BinaryOp::Arithmetic(_) | BinaryOp::Bitwise(_) => Err(
                CompileError::ArithmeticOnVariables(snippet(binary, self.interner())),
            ),
            BinaryOp::Relational(op) => self.lower_relational(binary, op),
            BinaryOp::Logical(op) => self.lower_logical(binary, op),
            BinaryOp::Comma => {
                let mut ctx = self.eval_ctx();
                ctx.push_sub(self.lower_expression(binary.lhs())?.sub);
                let rhs = ctx.add(self.lower_expression(binary.rhs())?);
                Ok(ctx.finish(rhs))
            }
        }
    }

    /// `+`: statically known strings concatenate; a numeric literal on
    /// either side forces the numeric reading; two unknowns dispatch on
    /// `IsString` at runtime.
    pub(crate) fn add_outputs(
        &mut self,
        lhs: Output,
        rhs: Output,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        if let (Output::Literal { value: l, .. }, Output::Literal { value: r, .. }) =
            (&lhs, &rhs)
        {
            if let Some(value) = js_add(l, r) {
                return Ok(Output::literal(value));
            }
        }
        let lhs = match lhs {
            condition @ Output::Condition(_) => self.to_number(condition, "left operand", ctx)?,
            other => other,
        };
        let rhs = match rhs {
            condition @ Output::Condition(_) => self.to_number(condition, "right operand", ctx)?,
            other => other,
        };
        let known_string = |output: &Output| {
            matches!(
                output,
                Output::Literal {
                    value: Value::String(_),
                    ..
                }
            )
        };
        let known_scalar = |output: &Output| {
            matches!(
                output,
                Output::Literal {
                    value: Value::Number(_) | Value::Bool(_) | Value::Null,
                    ..
                }
            )
        };

        if known_string(&lhs) || known_string(&rhs) {
            return self.string_concat(lhs, rhs, ctx);
        }
        // A known-numeric side fixes the typing: add directly, without the
        // runtime coercion states.
        if known_scalar(&lhs) || known_scalar(&rhs) {
            return self.numeric_add_direct(lhs, rhs, ctx);
        }

        // Both operands are paths of unknown type: dispatch at runtime.
        let lhs_path = self.output_to_json_path(lhs, "left operand", ctx)?;
        let rhs_path = self.output_to_json_path(rhs, "right operand", ctx)?;
        let slot = self.heap_slot();

        let mut dispatch = NodeState::new(StateKind::Choice).with_hint("string or number?");
        dispatch.choices = Some(vec![ChoiceRule::new(
            or(vec![is_string(&*lhs_path, true), is_string(&*rhs_path, true)]),
            "concat",
        )]);
        dispatch.default = Some("add".to_string());

        let mut concat_ctx = self.eval_ctx();
        let concat = self.string_concat(
            Output::path(lhs_path.clone()),
            Output::path(rhs_path.clone()),
            &mut concat_ctx,
        )?;
        concat_ctx.push_sub(Some(write_to(&concat, &slot)?));
        let concat_branch = concat_ctx.into_sub().expect("concat writes a state");

        let mut add_ctx = self.eval_ctx();
        let sum = self.numeric_add(
            Output::path(lhs_path),
            Output::path(rhs_path),
            &mut add_ctx,
        )?;
        add_ctx.push_sub(Some(write_to(&sum, &slot)?));
        let add_branch = add_ctx.into_sub().expect("add writes a state");

        let mut sub = SubState::with_start("dispatch");
        sub.insert("dispatch", dispatch);
        sub.insert("concat", concat_branch);
        sub.insert("add", add_branch);
        ctx.push_sub(Some(sub));
        Ok(Output::path(slot))
    }

    fn string_concat(
        &mut self,
        lhs: Output,
        rhs: Output,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        let mut fmt = String::new();
        let mut args = Vec::new();
        for operand in [lhs, rhs] {
            let operand = self.to_string_output(operand, "concat operand", ctx)?;
            match operand {
                Output::Literal {
                    value: Value::String(text),
                    ..
                } => fmt.push_str(&escape_format_text(&text)),
                Output::JsonPath(path) => {
                    let path = self.format_safe_path(path, ctx);
                    fmt.push_str("{}");
                    args.push(Arg::Path(path));
                }
                _ => {
                    return Err(CompileError::Unexpected(
                        "toString did not produce a string".to_string(),
                    ))
                }
            }
        }
        let (sub, path) = self.materialize_intrinsic(Intrinsic::format(fmt, args), "str", "concat");
        ctx.push_sub(Some(sub));
        Ok(Output::path(path))
    }

    /// Numeric `+` with statically known typing: paths are used as-is,
    /// literals convert at compile time.
    fn numeric_add_direct(
        &mut self,
        lhs: Output,
        rhs: Output,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        let to_arg = |output: &Output| match output {
            Output::JsonPath(path) => Some(Arg::Path(path.clone())),
            Output::Literal { value, .. } => match js_to_number(value) {
                Value::Null => None,
                value => Some(Arg::Literal(value)),
            },
            Output::Condition(_) => None,
        };
        match (to_arg(&lhs), to_arg(&rhs)) {
            (Some(l), Some(r)) => {
                let (sub, path) =
                    self.materialize_intrinsic(Intrinsic::math_add(l, r), "num", "add");
                ctx.push_sub(Some(sub));
                Ok(Output::path(path))
            }
            _ => Ok(Output::literal(Value::Null)),
        }
    }

    fn numeric_add(
        &mut self,
        lhs: Output,
        rhs: Output,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        let lhs = self.to_number(lhs, "left operand", ctx)?;
        let rhs = self.to_number(rhs, "right operand", ctx)?;
        let to_arg = |output: &Output| match output {
            Output::JsonPath(path) => Some(Arg::Path(path.clone())),
            Output::Literal {
                value: value @ Value::Number(_),
                ..
            } => Some(Arg::Literal(value.clone())),
            _ => None,
        };
        match (to_arg(&lhs), to_arg(&rhs)) {
            (Some(l), Some(r)) => {
                let (sub, path) =
                    self.materialize_intrinsic(Intrinsic::math_add(l, r), "num", "add");
                ctx.push_sub(Some(sub));
                Ok(Output::path(path))
            }
            // A null (NaN) literal absorbs the whole sum.
            _ => Ok(Output::literal(Value::Null)),
        }
    }

    /// `-`: both sides through toNumber, null propagates, then
    /// `MathAdd(left, -right)`.
    pub(crate) fn subtract_outputs(
        &mut self,
        lhs: Output,
        rhs: Output,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        let lhs = self.to_number(lhs, "left operand", ctx)?;
        let rhs = self.to_number(rhs, "right operand", ctx)?;

        let negated = match &rhs {
            Output::Literal { value, .. } => match negate_value(value) {
                Value::Null => return Ok(Output::literal(Value::Null)),
                value => Output::literal(value),
            },
            Output::JsonPath(path) => {
                let path = path.clone();
                self.negate_number_path(&path, ctx)
            }
            Output::Condition(_) => {
                return Err(CompileError::Unexpected(
                    "toNumber left a condition".to_string(),
                ))
            }
        };
        if let Output::Literal {
            value: Value::Null, ..
        } = &lhs
        {
            return Ok(Output::literal(Value::Null));
        }

        let mut null_tests = Vec::new();
        let to_arg = |output: &Output| match output {
            Output::JsonPath(path) => Arg::Path(path.clone()),
            Output::Literal { value, .. } => Arg::Literal(value.clone()),
            Output::Condition(_) => unreachable!("normalized above"),
        };
        if let Output::JsonPath(path) = &lhs {
            null_tests.push(is_null(path.clone(), true));
        }
        if let Output::JsonPath(path) = &negated {
            null_tests.push(is_null(path.clone(), true));
        }

        if null_tests.is_empty() {
            let (sub, path) = self.materialize_intrinsic(
                Intrinsic::math_add(to_arg(&lhs), to_arg(&negated)),
                "num",
                "subtract",
            );
            ctx.push_sub(Some(sub));
            return Ok(Output::path(path));
        }

        let slot = self.heap_slot();
        let mut check = NodeState::new(StateKind::Choice).with_hint("subtract");
        check.choices = Some(vec![ChoiceRule::new(or(null_tests), "keepNull")]);
        check.default = Some("sum".to_string());

        let mut keep_null = NodeState::pass();
        keep_null.input_path = Some(NULL_SLOT.to_string());
        keep_null.result_path = Some(ResultPath::Path(format!("{slot}.num")));
        keep_null.next = Some(DEFERRED_NEXT.to_string());

        let mut sum = NodeState::pass();
        sum.parameters = Some(serde_json::json!({
            "num.$": Intrinsic::math_add(to_arg(&lhs), to_arg(&negated)).to_string(),
        }));
        sum.result_path = Some(ResultPath::Path(slot.clone()));
        sum.next = Some(DEFERRED_NEXT.to_string());

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        sub.insert("keepNull", keep_null);
        sub.insert("sum", sum);
        ctx.push_sub(Some(sub));
        Ok(Output::path(format!("{slot}.num")))
    }

    fn lower_relational(
        &mut self,
        binary: &Binary,
        op: RelationalOp,
    ) -> Result<Lowered, CompileError> {
        let (kind, negate) = match op {
            RelationalOp::Equal | RelationalOp::StrictEqual => (CompareKind::Equal, false),
            RelationalOp::NotEqual | RelationalOp::StrictNotEqual => (CompareKind::Equal, true),
            RelationalOp::LessThan => (CompareKind::LessThan, false),
            RelationalOp::LessThanOrEqual => (CompareKind::LessThanEquals, false),
            RelationalOp::GreaterThan => (CompareKind::GreaterThan, false),
            RelationalOp::GreaterThanOrEqual => (CompareKind::GreaterThanEquals, false),
            RelationalOp::In | RelationalOp::InstanceOf => {
                return Err(CompileError::UnsupportedFeature(snippet(
                    binary,
                    self.interner(),
                )))
            }
        };

        let mut ctx = self.eval_ctx();
        let lhs = ctx.add(self.lower_expression(binary.lhs())?);
        let lhs = self.output_to_json_path_or_literal(lhs, "left operand", &mut ctx)?;
        let rhs = ctx.add(self.lower_expression(binary.rhs())?);
        let rhs = self.output_to_json_path_or_literal(rhs, "right operand", &mut ctx)?;

        let condition = match (lhs, rhs) {
            (Output::JsonPath(path), Output::Literal { value, .. }) => {
                compare_value(&path, kind, &value).ok_or_else(|| {
                    CompileError::InvalidInput(format!(
                        "cannot compare `{}` against this literal",
                        snippet(binary, self.interner())
                    ))
                })?
            }
            (Output::Literal { value, .. }, Output::JsonPath(path)) => {
                let mirrored = match kind {
                    CompareKind::Equal => CompareKind::Equal,
                    CompareKind::LessThan => CompareKind::GreaterThan,
                    CompareKind::LessThanEquals => CompareKind::GreaterThanEquals,
                    CompareKind::GreaterThan => CompareKind::LessThan,
                    CompareKind::GreaterThanEquals => CompareKind::LessThanEquals,
                };
                compare_value(&path, mirrored, &value).ok_or_else(|| {
                    CompileError::InvalidInput(format!(
                        "cannot compare `{}` against this literal",
                        snippet(binary, self.interner())
                    ))
                })?
            }
            (Output::JsonPath(lhs), Output::JsonPath(rhs)) => compare_paths(&lhs, kind, &rhs),
            (Output::Literal { value: l, .. }, Output::Literal { value: r, .. }) => {
                match compare_literals(&l, &r, kind) {
                    Some(result) => {
                        if result {
                            condition::always()
                        } else {
                            condition::never()
                        }
                    }
                    None => {
                        return Err(CompileError::InvalidInput(format!(
                            "cannot compare `{}`",
                            snippet(binary, self.interner())
                        )))
                    }
                }
            }
            _ => {
                return Err(CompileError::Unexpected(
                    "comparison operand left a condition".to_string(),
                ))
            }
        };
        let condition = if negate { not(condition) } else { condition };
        Ok(ctx.finish(Output::Condition(condition)))
    }

    fn lower_logical(
        &mut self,
        binary: &Binary,
        op: LogicalOp,
    ) -> Result<Lowered, CompileError> {
        let lhs = self.lower_expression(binary.lhs())?;
        let rhs = self.lower_expression(binary.rhs())?;

        // Two pure conditions combine without materializing a Choice.
        if lhs.sub.is_none() && rhs.sub.is_none() && !matches!(op, LogicalOp::Coalesce) {
            let lc = pure_condition(&lhs.output);
            let rc = pure_condition(&rhs.output);
            let combined = match op {
                LogicalOp::And => and(vec![lc, rc]),
                LogicalOp::Or => or(vec![lc, rc]),
                LogicalOp::Coalesce => unreachable!("handled above"),
            };
            return Ok(Lowered::pure(Output::Condition(combined)));
        }

        // Short-circuit: the left value lands in the result slot, and only
        // the branch that needs the right operand evaluates it.
        let mut ctx = self.eval_ctx();
        let lhs_output = ctx.add(lhs);
        let slot = self.heap_slot();
        let seed = write_output_to(self, lhs_output, &slot, "left operand", &mut ctx)?;
        ctx.push_sub(Some(seed));

        let take_left = match op {
            LogicalOp::Or => is_truthy(&slot),
            LogicalOp::And => not(is_truthy(&slot)),
            LogicalOp::Coalesce => {
                and(vec![is_present(&*slot, true), is_null(&*slot, false)])
            }
        };
        let mut check = NodeState::new(StateKind::Choice).with_hint("short circuit");
        check.choices = Some(vec![ChoiceRule::new(take_left, "done")]);
        check.default = Some("right".to_string());

        let mut right_ctx = self.eval_ctx();
        let rhs_output = right_ctx.add(rhs);
        let write = write_output_to(self, rhs_output, &slot, "right operand", &mut right_ctx)?;
        right_ctx.push_sub(Some(write));
        let right_branch = right_ctx.into_sub().expect("right branch writes a state");

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        sub.insert("right", right_branch);
        sub.insert("done", NodeState::pass().with_next(DEFERRED_NEXT));
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(slot)))
    }

    fn lower_conditional(
        &mut self,
        conditional: &boa_ast::expression::operator::Conditional,
    ) -> Result<Lowered, CompileError> {
        let mut ctx = self.eval_ctx();
        let test = ctx.add(self.lower_expression(conditional.condition())?);
        let condition = self.output_to_condition(test, &mut ctx)?;
        let slot = self.heap_slot();

        let mut check = NodeState::new(StateKind::Choice).with_hint("ternary");
        check.choices = Some(vec![ChoiceRule::new(condition, "then")]);
        check.default = Some("else".to_string());

        let mut then_ctx = self.eval_ctx();
        let then_output = then_ctx.add(self.lower_expression(conditional.if_true())?);
        let write = write_output_to(self, then_output, &slot, "then value", &mut then_ctx)?;
        then_ctx.push_sub(Some(write));

        let mut else_ctx = self.eval_ctx();
        let else_output = else_ctx.add(self.lower_expression(conditional.if_false())?);
        let write = write_output_to(self, else_output, &slot, "else value", &mut else_ctx)?;
        else_ctx.push_sub(Some(write));

        let mut sub = SubState::with_start("check");
        sub.insert("check", check);
        sub.insert("then", then_ctx.into_sub().expect("then branch writes"));
        sub.insert("else", else_ctx.into_sub().expect("else branch writes"));
        ctx.push_sub(Some(sub));
        Ok(ctx.finish(Output::path(slot)))
    }

    fn lower_assign(&mut self, assign: &Assign) -> Result<Lowered, CompileError> {
        // Destructuring assignment binds through the pattern resolver.
        if let AssignTarget::Pattern(pattern) = assign.lhs() {
            if assign.op() != AssignOp::Assign {
                return Err(CompileError::InvalidInput(
                    "compound assignment to a pattern".to_string(),
                ));
            }
            let mut ctx = self.eval_ctx();
            let value = ctx.add(self.lower_expression(assign.rhs())?);
            let slot = self.heap_slot();
            let write = write_output_to(self, value, &slot, "assigned value", &mut ctx)?;
            ctx.push_sub(Some(write));
            ctx.push_sub(self.bind_pattern(
                pattern,
                Output::path(slot.clone()),
                BindMode::Assign,
            )?);
            return Ok(ctx.finish(Output::path(slot)));
        }

        let target = self.assign_target_path(assign.lhs())?;
        let mut ctx = self.eval_ctx();

        match assign.op() {
            AssignOp::Assign => {
                let value = ctx.add(self.lower_expression(assign.rhs())?);
                let value = self.output_to_json_path_or_literal(value, "value", &mut ctx)?;
                let mut write = NodeState::pass().with_hint(format!("{target} ="));
                write.result_path = Some(ResultPath::Path(target.clone()));
                write.next = Some(DEFERRED_NEXT.to_string());
                let write = graph::pass_with_input(write, value.clone())?;
                ctx.push_sub(Some(SubState::single("write", write)));
                // The expression's value must not alias the (mutable)
                // target; literals are safe, paths get a snapshot.
                match value {
                    literal @ Output::Literal { .. } => Ok(ctx.finish(literal)),
                    _ => {
                        let slot = self.heap_slot();
                        let mut keep = NodeState::pass();
                        keep.input_path = Some(target);
                        keep.result_path = Some(ResultPath::Path(slot.clone()));
                        keep.next = Some(DEFERRED_NEXT.to_string());
                        ctx.push_sub(Some(SubState::single("keep", keep)));
                        Ok(ctx.finish(Output::path(slot)))
                    }
                }
            }
            AssignOp::Add | AssignOp::Sub => {
                let rhs = ctx.add(self.lower_expression(assign.rhs())?);
                let rhs = self.output_to_json_path_or_literal(rhs, "value", &mut ctx)?;
                let computed = if assign.op() == AssignOp::Add {
                    self.add_outputs(Output::path(target.clone()), rhs, &mut ctx)?
                } else {
                    self.subtract_outputs(Output::path(target.clone()), rhs, &mut ctx)?
                };
                let mut write = NodeState::pass().with_hint(format!("{target} ="));
                write.result_path = Some(ResultPath::Path(target));
                write.next = Some(DEFERRED_NEXT.to_string());
                let write = graph::pass_with_input(write, computed.clone())?;
                ctx.push_sub(Some(SubState::single("write", write)));
                Ok(ctx.finish(computed))
            }
            AssignOp::BoolAnd | AssignOp::BoolOr | AssignOp::Coalesce => {
                let take_right = match assign.op() {
                    AssignOp::BoolAnd => is_truthy(&target),
                    AssignOp::BoolOr => not(is_truthy(&target)),
                    AssignOp::Coalesce => or(vec![
                        is_present(&*target, false),
                        is_null(&*target, true),
                    ]),
                    _ => unreachable!("matched above"),
                };
                let mut check = NodeState::new(StateKind::Choice)
                    .with_hint(format!("{target} assign?"));
                check.choices = Some(vec![ChoiceRule::new(take_right, "write")]);
                check.default = Some(DEFERRED_NEXT.to_string());

                let mut write_ctx = self.eval_ctx();
                let rhs = write_ctx.add(self.lower_expression(assign.rhs())?);
                let rhs =
                    self.output_to_json_path_or_literal(rhs, "value", &mut write_ctx)?;
                let mut write = NodeState::pass().with_hint(format!("{target} ="));
                write.result_path = Some(ResultPath::Path(target.clone()));
                write.next = Some(DEFERRED_NEXT.to_string());
                let write = graph::pass_with_input(write, rhs)?;
                write_ctx.push_sub(Some(SubState::single("write", write)));

                let mut sub = SubState::with_start("check");
                sub.insert("check", check);
                sub.insert(
                    "write",
                    write_ctx.into_sub().expect("write branch has states"),
                );
                ctx.push_sub(Some(sub));

                let slot = self.heap_slot();
                let mut keep = NodeState::pass();
                keep.input_path = Some(target);
                keep.result_path = Some(ResultPath::Path(slot.clone()));
                keep.next = Some(DEFERRED_NEXT.to_string());
                ctx.push_sub(Some(SubState::single("keep", keep)));
                Ok(ctx.finish(Output::path(slot)))
            }
            _ => Err(CompileError::ArithmeticOnVariables(snippet(
                assign,
                self.interner(),
            ))),
        }
    }

    /// The JSON path an assignment writes to: a variable, or a constant
    /// member chain rooted in one.
    fn assign_target_path(&mut self, target: &AssignTarget) -> Result<String, CompileError> {
        match target {
            AssignTarget::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                match self.lookup(&name) {
                    Some(allocated) => Ok(format!("$.{allocated}")),
                    None => Err(CompileError::InvalidInput(format!(
                        "assignment to undeclared `{name}`"
                    ))),
                }
            }
            AssignTarget::Access(access) => match access {
                PropertyAccess::Simple(simple) => {
                    let field = match simple.field() {
                        PropertyAccessField::Const(sym) => self.resolve_sym(*sym)?,
                        PropertyAccessField::Expr(index) => {
                            let index: &Expression = index;
                            match self.fold_expression(index) {
                                Some(Value::String(key)) => key,
                                Some(Value::Number(n)) => {
                                    return Ok(format!(
                                        "{}[{n}]",
                                        self.assign_target_base(simple.target())?
                                    ))
                                }
                                _ => {
                                    return Err(CompileError::PropertyNamesMustBeConstant(
                                        snippet(index, self.interner()),
                                    ))
                                }
                            }
                        }
                    };
                    let base = self.assign_target_base(simple.target())?;
                    Ok(join_key(&base, &field))
                }
                _ => Err(CompileError::ClassesNotSupported(
                    "private or super assignment".to_string(),
                )),
            },
            AssignTarget::Pattern(_) => Err(CompileError::Unexpected(
                "pattern assignment handled separately".to_string(),
            )),
        }
    }

    fn assign_target_base(&mut self, expr: &Expression) -> Result<String, CompileError> {
        let lowered = self.lower_expression(expr)?;
        match (lowered.sub, lowered.output) {
            (None, Output::JsonPath(path)) => Ok(path),
            _ => Err(CompileError::InvalidInput(
                "assignment target must be a plain variable or member path".to_string(),
            )),
        }
    }

    // --- calls ------------------------------------------------------------

    fn lower_call(&mut self, call: &Call, hint: &str) -> Result<Lowered, CompileError> {
        match call.function() {
            Expression::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                match name.as_str() {
                    "Boolean" => {
                        let mut ctx = self.eval_ctx();
                        let condition = match call.args().first() {
                            None => condition::never(),
                            Some(arg) => {
                                let output = ctx.add(self.lower_expression(arg)?);
                                self.output_to_condition(output, &mut ctx)?
                            }
                        };
                        Ok(ctx.finish(Output::Condition(condition)))
                    }
                    "Number" => {
                        let mut ctx = self.eval_ctx();
                        let output = match call.args().first() {
                            None => Output::literal(0),
                            Some(arg) => {
                                let output = ctx.add(self.lower_expression(arg)?);
                                self.to_number(output, "Number()", &mut ctx)?
                            }
                        };
                        Ok(ctx.finish(output))
                    }
                    "String" => {
                        let mut ctx = self.eval_ctx();
                        let output = match call.args().first() {
                            None => Output::literal(""),
                            Some(arg) => {
                                let output = ctx.add(self.lower_expression(arg)?);
                                self.to_string_output(output, "String()", &mut ctx)?
                            }
                        };
                        Ok(ctx.finish(output))
                    }
                    "Error" | "StepFunctionError" => Err(CompileError::InvalidInput(
                        "error constructors are only valid in a throw".to_string(),
                    )),
                    _ => {
                        if self.lookup(&name).is_none() {
                            if let Some(lowered) =
                                self.try_integration(&name, call, hint)?
                            {
                                return Ok(lowered);
                            }
                        }
                        Err(CompileError::UnsupportedFeature(format!(
                            "call to `{name}`"
                        )))
                    }
                }
            }
            Expression::PropertyAccess(PropertyAccess::Simple(simple)) => {
                let method = match simple.field() {
                    PropertyAccessField::Const(sym) => self.resolve_sym(*sym)?,
                    PropertyAccessField::Expr(_) => {
                        return Err(CompileError::UnsupportedFeature(
                            "computed method call".to_string(),
                        ))
                    }
                };
                if let Expression::Identifier(ident) = simple.target() {
                    let object = self.resolve_sym(ident.sym())?;
                    if self.lookup(&object).is_none() {
                        match (object.as_str(), method.as_str()) {
                            ("JSON", "stringify") => return self.lower_json_stringify(call),
                            ("JSON", "parse") => return self.lower_json_parse(call),
                            ("Promise", "all") => {
                                return match call.args().first() {
                                    Some(arg) => self.lower_expression(arg),
                                    None => Err(CompileError::InvalidInput(
                                        "Promise.all needs an argument".to_string(),
                                    )),
                                }
                            }
                            _ => {}
                        }
                    }
                }
                if let Some(reference) = self.dotted_reference(call.function()) {
                    if let Some(lowered) = self.try_integration(&reference, call, hint)? {
                        return Ok(lowered);
                    }
                }
                self.lower_method_call(&method, simple.target(), call.args(), hint)
            }
            _ => Err(CompileError::UnsupportedFeature(format!(
                "call `{hint}`"
            ))),
        }
    }

    /// A dotted reference like `lambda.invoke`, eligible as an integration
    /// lookup when its root identifier is not a declared variable.
    fn dotted_reference(&self, expr: &Expression) -> Option<String> {
        match expr {
            Expression::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym()).ok()?;
                if self.lookup(&name).is_some() || self.identifier_path(&name).is_ok() {
                    None
                } else {
                    Some(name)
                }
            }
            Expression::PropertyAccess(PropertyAccess::Simple(simple)) => {
                let field = match simple.field() {
                    PropertyAccessField::Const(sym) => self.resolve_sym(*sym).ok()?,
                    PropertyAccessField::Expr(_) => return None,
                };
                let base = self.dotted_reference(simple.target())?;
                Some(format!("{base}.{field}"))
            }
            Expression::Parenthesized(paren) => self.dotted_reference(paren.expression()),
            _ => None,
        }
    }

    /// Resolve and invoke an integration hook, then attach catchers so its
    /// task failures route to the enclosing handler.
    fn try_integration(
        &mut self,
        reference: &str,
        call: &Call,
        hint: &str,
    ) -> Result<Option<Lowered>, CompileError> {
        let resolver = self.resolver;
        let Some(integration) = resolver.resolve(reference) else {
            return Ok(None);
        };
        trace!("integration call `{reference}`");
        let integration_call = IntegrationCall {
            reference: reference.to_string(),
            arguments: call.args(),
            call_text: hint.to_string(),
        };
        let mut lowered = integration.lower(&integration_call, self)?;
        if let Some(sub) = lowered.sub.as_mut() {
            if graph::sub_contains_task(sub) {
                if let ThrowRoute::Handler { result_path } = self.route_throw() {
                    graph::attach_catch_all(sub, CATCH_LABEL, Some(result_path));
                }
            }
        }
        Ok(Some(lowered))
    }

    fn lower_json_stringify(&mut self, call: &Call) -> Result<Lowered, CompileError> {
        let Some(arg) = call.args().first() else {
            // `JSON.stringify()` is one of the two annotated sites where
            // undefined is tolerated; it degrades to the constructed null.
            return Ok(Lowered::pure(Output::path(NULL_SLOT)));
        };
        let mut ctx = self.eval_ctx();
        let output = ctx.add(self.lower_expression(arg)?);
        match output {
            Output::Literal {
                value,
                contains_json_path: false,
            } => {
                let text = serde_json::to_string(&value).map_err(|e| {
                    CompileError::Unexpected(format!("stringify failed: {e}"))
                })?;
                Ok(ctx.finish(Output::literal(text)))
            }
            other => {
                let path = self.output_to_json_path(other, "JSON.stringify", &mut ctx)?;
                let (sub, out) = self.materialize_intrinsic(
                    Intrinsic::json_to_string(Arg::Path(path)),
                    "str",
                    "JSON.stringify",
                );
                ctx.push_sub(Some(sub));
                Ok(ctx.finish(Output::path(out)))
            }
        }
    }

    fn lower_json_parse(&mut self, call: &Call) -> Result<Lowered, CompileError> {
        let Some(arg) = call.args().first() else {
            return Err(CompileError::InvalidInput(
                "JSON.parse needs an argument".to_string(),
            ));
        };
        let mut ctx = self.eval_ctx();
        let output = ctx.add(self.lower_expression(arg)?);
        match &output {
            Output::Literal {
                value: Value::String(text),
                contains_json_path: false,
            } => match serde_json::from_str::<Value>(text) {
                Ok(value) => Ok(ctx.finish(Output::literal(value))),
                Err(e) => Err(CompileError::InvalidInput(format!(
                    "JSON.parse of invalid constant: {e}"
                ))),
            },
            _ => {
                let path = self.output_to_json_path(output, "JSON.parse", &mut ctx)?;
                let (sub, out) = self.materialize_intrinsic(
                    Intrinsic::string_to_json(Arg::Path(path)),
                    "val",
                    "JSON.parse",
                );
                ctx.push_sub(Some(sub));
                Ok(ctx.finish(Output::path(out)))
            }
        }
    }

    // --- conversions ------------------------------------------------------

    /// Force an output into a `Choice` predicate.
    pub(crate) fn output_to_condition(
        &mut self,
        output: Output,
        _ctx: &mut EvalCtx,
    ) -> Result<Condition, CompileError> {
        match output {
            Output::Condition(condition) => Ok(condition),
            Output::Literal { value, .. } => Ok(if js_truthy(&value) {
                condition::always()
            } else {
                condition::never()
            }),
            Output::JsonPath(path) => Ok(is_truthy(&path)),
        }
    }

    /// Numeric coercion. Literals fold (NaN becomes null); paths dispatch
    /// on their runtime type; the result is always a number-or-null.
    pub(crate) fn to_number(
        &mut self,
        output: Output,
        hint: &str,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        match output {
            Output::Literal { value, .. } => Ok(Output::literal(js_to_number(&value))),
            Output::Condition(condition) => {
                let slot = self.heap_slot();
                let sub = branch_writes(
                    condition,
                    number_write(1, &slot),
                    number_write(0, &slot),
                    hint,
                );
                ctx.push_sub(Some(sub));
                Ok(Output::path(format!("{slot}.num")))
            }
            Output::JsonPath(path) => {
                let slot = self.heap_slot();
                let result = format!("{slot}.num");

                let mut check = NodeState::new(StateKind::Choice).with_hint(format!(
                    "toNumber {hint}"
                ));
                check.choices = Some(vec![
                    ChoiceRule::new(is_present(&*path, false), "missing"),
                    ChoiceRule::new(is_null(&*path, true), "fromNull"),
                    ChoiceRule::new(is_numeric(&*path, true), "passThrough"),
                    ChoiceRule::new(is_string(&*path, true), "parse"),
                    ChoiceRule::new(boolean_equals(&*path, true), "fromTrue"),
                    ChoiceRule::new(boolean_equals(&*path, false), "fromFalse"),
                ]);
                check.default = Some("missing".to_string());

                let mut missing = NodeState::pass();
                missing.input_path = Some(NULL_SLOT.to_string());
                missing.result_path = Some(ResultPath::Path(result.clone()));
                missing.next = Some(DEFERRED_NEXT.to_string());

                let mut from_null = NodeState::pass();
                from_null.result = Some(Value::from(0));
                from_null.result_path = Some(ResultPath::Path(result.clone()));
                from_null.next = Some(DEFERRED_NEXT.to_string());

                let mut pass_through = NodeState::pass();
                pass_through.input_path = Some(path.clone());
                pass_through.result_path = Some(ResultPath::Path(result.clone()));
                pass_through.next = Some(DEFERRED_NEXT.to_string());

                let mut parse = NodeState::pass();
                parse.parameters = Some(serde_json::json!({
                    "num.$": Intrinsic::string_to_json(Arg::Path(path)).to_string(),
                }));
                parse.result_path = Some(ResultPath::Path(slot.clone()));
                parse.next = Some(DEFERRED_NEXT.to_string());

                let mut from_true = NodeState::pass();
                from_true.result = Some(Value::from(1));
                from_true.result_path = Some(ResultPath::Path(result.clone()));
                from_true.next = Some(DEFERRED_NEXT.to_string());

                let mut from_false = NodeState::pass();
                from_false.result = Some(Value::from(0));
                from_false.result_path = Some(ResultPath::Path(result.clone()));
                from_false.next = Some(DEFERRED_NEXT.to_string());

                let mut sub = SubState::with_start("check");
                sub.insert("check", check);
                sub.insert("missing", missing);
                sub.insert("fromNull", from_null);
                sub.insert("passThrough", pass_through);
                sub.insert("parse", parse);
                sub.insert("fromTrue", from_true);
                sub.insert("fromFalse", from_false);
                ctx.push_sub(Some(sub));
                Ok(Output::path(result))
            }
        }
    }

    /// String coercion: literals convert at compile time, paths either pass
    /// through or go through `States.JsonToString`.
    pub(crate) fn to_string_output(
        &mut self,
        output: Output,
        hint: &str,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        match output {
            Output::Literal {
                value,
                contains_json_path: false,
            } => match js_to_string(&value) {
                Some(text) => Ok(Output::literal(text)),
                None => {
                    let path = self.output_to_json_path(
                        Output::Literal {
                            value,
                            contains_json_path: false,
                        },
                        hint,
                        ctx,
                    )?;
                    self.to_string_output(Output::path(path), hint, ctx)
                }
            },
            literal @ Output::Literal { .. } => {
                let path = self.output_to_json_path(literal, hint, ctx)?;
                self.to_string_output(Output::path(path), hint, ctx)
            }
            Output::Condition(condition) => {
                let slot = self.heap_slot();
                let sub = branch_writes(
                    condition,
                    string_write("true", &slot),
                    string_write("false", &slot),
                    hint,
                );
                ctx.push_sub(Some(sub));
                Ok(Output::path(format!("{slot}.str")))
            }
            Output::JsonPath(path) => {
                let slot = self.heap_slot();
                let result = format!("{slot}.str");

                let mut check = NodeState::new(StateKind::Choice)
                    .with_hint(format!("toString {hint}"));
                check.choices = Some(vec![ChoiceRule::new(is_string(&*path, true), "copy")]);
                check.default = Some("stringify".to_string());

                let mut copy = NodeState::pass();
                copy.input_path = Some(path.clone());
                copy.result_path = Some(ResultPath::Path(result.clone()));
                copy.next = Some(DEFERRED_NEXT.to_string());

                let mut stringify = NodeState::pass();
                stringify.parameters = Some(serde_json::json!({
                    "str.$": Intrinsic::json_to_string(Arg::Path(path)).to_string(),
                }));
                stringify.result_path = Some(ResultPath::Path(slot.clone()));
                stringify.next = Some(DEFERRED_NEXT.to_string());

                let mut sub = SubState::with_start("check");
                sub.insert("check", check);
                sub.insert("copy", copy);
                sub.insert("stringify", stringify);
                ctx.push_sub(Some(sub));
                Ok(Output::path(result))
            }
        }
    }

    // --- constant folding -------------------------------------------------

    /// Fold a pure-literal expression tree to its value. `None` means "not
    /// a constant"; folding never errors.
    pub(crate) fn fold_expression(&self, expr: &Expression) -> Option<Value> {
        match expr {
            Expression::Literal(lit) => match lit {
                Literal::Null => Some(Value::Null),
                Literal::String(sym) => self
                    .interner()
                    .resolve(*sym)
                    .and_then(|s| s.utf8())
                    .map(|s| Value::String(s.to_string())),
                Literal::Int(i) => Some(Value::from(*i)),
                Literal::Num(f) => Some(number_value(*f)),
                Literal::Bool(b) => Some(Value::Bool(*b)),
                _ => None,
            },
            Expression::Parenthesized(paren) => self.fold_expression(paren.expression()),
            Expression::TemplateLiteral(template) => {
                let mut text = String::new();
                for element in template.elements() {
                    match element {
                        TemplateElement::String(sym) => {
                            text.push_str(
                                self.interner().resolve(*sym).and_then(|s| s.utf8())?,
                            );
                        }
                        TemplateElement::Expr(expr) => {
                            let expr: &Expression = expr;
                            let value = self.fold_expression(expr)?;
                            text.push_str(&js_to_string(&value)?);
                        }
                    }
                }
                Some(Value::String(text))
            }
            Expression::ArrayLiteral(array) => {
                let mut items = Vec::new();
                for element in array.as_ref() {
                    items.push(self.fold_expression(element.as_ref()?)?);
                }
                Some(Value::Array(items))
            }
            Expression::Unary(unary) => {
                let value = self.fold_expression(unary.target())?;
                match unary.op() {
                    UnaryOp::Not => Some(Value::Bool(!js_truthy(&value))),
                    UnaryOp::Plus => Some(js_to_number(&value)),
                    UnaryOp::Minus => Some(negate_value(&js_to_number(&value))),
                    UnaryOp::TypeOf => Some(js_typeof(&value)),
                    _ => None,
                }
            }
            Expression::Binary(binary) => {
                if let BinaryOp::Logical(op) = binary.op() {
                    let lhs = self.fold_expression(binary.lhs())?;
                    return match op {
                        LogicalOp::And if !js_truthy(&lhs) => Some(lhs),
                        LogicalOp::Or if js_truthy(&lhs) => Some(lhs),
                        LogicalOp::Coalesce if !lhs.is_null() => Some(lhs),
                        _ => self.fold_expression(binary.rhs()),
                    };
                }
                let lhs = self.fold_expression(binary.lhs())?;
                let rhs = self.fold_expression(binary.rhs())?;
                match binary.op() {
                    BinaryOp::Arithmetic(op) => fold_arithmetic(&lhs, &rhs, op),
                    BinaryOp::Relational(op) => {
                        let (kind, negate) = match op {
                            RelationalOp::Equal | RelationalOp::StrictEqual => {
                                (CompareKind::Equal, false)
                            }
                            RelationalOp::NotEqual | RelationalOp::StrictNotEqual => {
                                (CompareKind::Equal, true)
                            }
                            RelationalOp::LessThan => (CompareKind::LessThan, false),
                            RelationalOp::LessThanOrEqual => {
                                (CompareKind::LessThanEquals, false)
                            }
                            RelationalOp::GreaterThan => (CompareKind::GreaterThan, false),
                            RelationalOp::GreaterThanOrEqual => {
                                (CompareKind::GreaterThanEquals, false)
                            }
                            _ => return None,
                        };
                        compare_literals(&lhs, &rhs, kind)
                            .map(|result| Value::Bool(result != negate))
                    }
                    BinaryOp::Comma => Some(rhs),
                    _ => None,
                }
            }
            Expression::Conditional(conditional) => {
                let test = self.fold_expression(conditional.condition())?;
                if js_truthy(&test) {
                    self.fold_expression(conditional.if_true())
                } else {
                    self.fold_expression(conditional.if_false())
                }
            }
            _ => None,
        }
    }
}

/// A condition for outputs that need no states (the pure short-circuit
/// fast path).
fn pure_condition(output: &Output) -> Condition {
    match output {
        Output::Condition(condition) => condition.clone(),
        Output::Literal { value, .. } => {
            if js_truthy(value) {
                condition::always()
            } else {
                condition::never()
            }
        }
        Output::JsonPath(path) => is_truthy(path),
    }
}

/// A `Pass` writing `output` to `slot`, with the output's states spliced
/// via `ctx` first.
fn write_output_to(
    compiler: &mut Compiler<'_>,
    output: Output,
    slot: &str,
    hint: &str,
    ctx: &mut EvalCtx,
) -> Result<SubState, CompileError> {
    let output = compiler.output_to_json_path_or_literal(output, hint, ctx)?;
    write_to(&output, slot)
}

fn write_to(output: &Output, slot: &str) -> Result<SubState, CompileError> {
    let mut write = NodeState::pass();
    write.result_path = Some(ResultPath::Path(slot.to_string()));
    write.next = Some(DEFERRED_NEXT.to_string());
    let write = graph::pass_with_input(write, output.clone())?;
    Ok(SubState::single("write", write))
}

fn number_write(n: i64, slot: &str) -> NodeState {
    let mut write = NodeState::pass();
    write.result = Some(Value::from(n));
    write.result_path = Some(ResultPath::Path(format!("{slot}.num")));
    write.next = Some(DEFERRED_NEXT.to_string());
    write
}

fn string_write(text: &str, slot: &str) -> NodeState {
    let mut write = NodeState::pass();
    write.result = Some(Value::String(text.to_string()));
    write.result_path = Some(ResultPath::Path(format!("{slot}.str")));
    write.next = Some(DEFERRED_NEXT.to_string());
    write
}

/// A two-way `Choice` writing one of two states' results.
fn branch_writes(
    condition: Condition,
    when_true: NodeState,
    when_false: NodeState,
    hint: &str,
) -> SubState {
    let mut check = NodeState::new(StateKind::Choice).with_hint(hint);
    check.choices = Some(vec![ChoiceRule::new(condition, "isTrue")]);
    check.default = Some("isFalse".to_string());
    let mut sub = SubState::with_start("check");
    sub.insert("check", check);
    sub.insert("isTrue", when_true);
    sub.insert("isFalse", when_false);
    sub
}

// --- JavaScript value semantics, for folding --------------------------------

pub(crate) fn js_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `NaN` has no JSON encoding, so it flows as null.
pub(crate) fn number_value(f: f64) -> Value {
    if !f.is_finite() {
        return Value::Null;
    }
    if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn js_to_number(value: &Value) -> Value {
    match value {
        Value::Null => Value::from(0),
        Value::Bool(b) => Value::from(if *b { 1 } else { 0 }),
        Value::Number(_) => value.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::from(0)
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .map(number_value)
                    .unwrap_or(Value::Null)
            }
        }
        Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

pub(crate) fn js_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn js_typeof(value: &Value) -> Value {
    Value::String(
        match value {
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
        }
        .to_string(),
    )
}

fn negate_value(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map(|f| number_value(-f)).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn js_add(lhs: &Value, rhs: &Value) -> Option<Value> {
    if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
        return Some(Value::String(format!(
            "{}{}",
            js_to_string(lhs)?,
            js_to_string(rhs)?
        )));
    }
    let (l, r) = (js_to_number(lhs), js_to_number(rhs));
    match (l.as_f64(), r.as_f64()) {
        (Some(l), Some(r)) => Some(number_value(l + r)),
        _ => Some(Value::Null),
    }
}

fn fold_arithmetic(lhs: &Value, rhs: &Value, op: ArithmeticOp) -> Option<Value> {
    if op == ArithmeticOp::Add {
        return js_add(lhs, rhs);
    }
    let l = js_to_number(lhs).as_f64()?;
    let r = js_to_number(rhs).as_f64()?;
    let result = match op {
        ArithmeticOp::Sub => l - r,
        ArithmeticOp::Mul => l * r,
        ArithmeticOp::Div => l / r,
        ArithmeticOp::Mod => l % r,
        ArithmeticOp::Exp => l.powf(r),
        ArithmeticOp::Add => unreachable!("handled above"),
    };
    Some(number_value(result))
}

/// Literal-vs-literal comparison with loose-equality coercions for the
/// cases this compiler supports.
pub(crate) fn compare_literals(lhs: &Value, rhs: &Value, kind: CompareKind) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => {
            let l = js_to_number(lhs);
            let r = js_to_number(rhs);
            match (l.as_f64(), r.as_f64()) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => return if kind == CompareKind::Equal {
                    Some(false)
                } else {
                    None
                },
            }
        }
    }?;
    Some(match kind {
        CompareKind::Equal => ordering == Ordering::Equal,
        CompareKind::LessThan => ordering == Ordering::Less,
        CompareKind::LessThanEquals => ordering != Ordering::Greater,
        CompareKind::GreaterThan => ordering == Ordering::Greater,
        CompareKind::GreaterThanEquals => ordering != Ordering::Less,
    })
}
