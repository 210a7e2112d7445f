//! Statement lowering: each statement becomes a small sub-state graph.
//!
//! Control flow that ASL does not have - loops, early return, exceptions -
//! is synthesized from labeled `Pass`/`Choice` graphs wired through the
//! reserved labels (`__BreakNext`, `__ContinueNext`, `__catch`) that bubble
//! up to the nearest construct defining them.

use crate::asl::{NodeState, ResultPath, StateKind, StateMachine};
use crate::condition::{is_present, ChoiceRule};
use crate::error::CompileError;
use crate::graph::{
    self, Output, SubState, BREAK_LABEL, CATCH_LABEL, CONTINUE_LABEL, DEFERRED_NEXT,
};
use crate::intrinsics::Intrinsic;
use crate::lower::{
    binding::BindMode, Compiler, EvalCtx, Frame, ReturnFrame, ThrowRoute, NULL_SLOT,
};
use crate::normalize::{self, snippet};
use boa_ast::declaration::{Binding, LexicalDeclaration, Variable};
use boa_ast::statement::iteration::{ForLoopInitializer, IterableLoopInitializer};
use boa_ast::statement::{If, Try};
use boa_ast::{Declaration, Expression, Statement, StatementListItem};
use log::trace;
use serde_json::Value;
use std::collections::BTreeMap;

impl Compiler<'_> {
    /// Lower a statement list, joining the per-statement graphs in order.
    pub(crate) fn lower_statements(
        &mut self,
        stmts: &[StatementListItem],
    ) -> Result<Option<SubState>, CompileError> {
        let mut subs = Vec::new();
        for item in stmts {
            match item {
                StatementListItem::Statement(stmt) => subs.push(self.lower_statement(stmt)?),
                StatementListItem::Declaration(decl) => {
                    subs.push(self.lower_declaration(decl)?)
                }
            }
        }
        Ok(graph::join_sub_states(subs, &self.chain))
    }

    fn lower_declaration(&mut self, decl: &Declaration) -> Result<Option<SubState>, CompileError> {
        match decl {
            Declaration::Lexical(LexicalDeclaration::Let(list))
            | Declaration::Lexical(LexicalDeclaration::Const(list)) => {
                let mut subs = Vec::new();
                for variable in list.as_ref() {
                    subs.push(self.lower_variable(variable)?);
                }
                Ok(graph::join_sub_states(subs, &self.chain))
            }
            other => Err(CompileError::UnsupportedFeature(snippet(
                other,
                self.interner(),
            ))),
        }
    }

    fn lower_variable(&mut self, variable: &Variable) -> Result<Option<SubState>, CompileError> {
        match variable.init() {
            Some(init) => {
                let mut ctx = self.eval_ctx();
                let value = ctx.add(self.lower_expression(init)?);
                ctx.push_sub(self.bind_binding(variable.binding(), value, BindMode::Declare)?);
                Ok(ctx.into_sub())
            }
            None => {
                // A declaration without initializer allocates the name; the
                // location stays absent until assigned.
                if let Binding::Identifier(ident) = variable.binding() {
                    self.declare_sym(ident.sym())?;
                }
                Ok(None)
            }
        }
    }

    pub(crate) fn lower_statement(
        &mut self,
        stmt: &Statement,
    ) -> Result<Option<SubState>, CompileError> {
        trace!("lower statement `{}`", snippet(stmt, self.interner()));
        match stmt {
            Statement::Empty => Ok(None),
            Statement::Block(block) => {
                self.push_scope();
                let result = self.lower_statements(block.statement_list().statements());
                self.pop_scope();
                result
            }
            Statement::Expression(expr) => Ok(self.lower_expression(expr)?.sub),
            Statement::Var(decl) => {
                let mut subs = Vec::new();
                for variable in decl.0.as_ref() {
                    subs.push(self.lower_variable(variable)?);
                }
                Ok(graph::join_sub_states(subs, &self.chain))
            }
            Statement::If(if_stmt) => self.lower_if(if_stmt),
            Statement::WhileLoop(while_loop) => {
                self.lower_while(while_loop.condition(), while_loop.body(), false)
            }
            Statement::DoWhileLoop(do_while) => {
                self.lower_while(do_while.cond(), do_while.body(), true)
            }
            Statement::ForLoop(for_loop) => self.lower_for(for_loop),
            Statement::ForOfLoop(for_of) => self.lower_for_of(for_of),
            Statement::ForInLoop(for_in) => self.lower_for_in(for_in),
            Statement::Return(ret) => {
                let hint = snippet(stmt, self.interner());
                self.lower_return(ret.target(), hint)
            }
            Statement::Throw(throw) => {
                let hint = snippet(stmt, self.interner());
                self.lower_throw(throw.target(), hint)
            }
            Statement::Try(try_stmt) => self.lower_try(try_stmt),
            Statement::Break(brk) => {
                if brk.label().is_some() {
                    return Err(CompileError::UnsupportedFeature(
                        "labelled break".to_string(),
                    ));
                }
                if !self.in_loop() {
                    return Err(CompileError::InvalidInput(
                        "break outside of a loop".to_string(),
                    ));
                }
                Ok(Some(SubState::single(
                    "break",
                    NodeState::pass().with_hint("break").with_next(BREAK_LABEL),
                )))
            }
            Statement::Continue(cont) => {
                if cont.label().is_some() {
                    return Err(CompileError::UnsupportedFeature(
                        "labelled continue".to_string(),
                    ));
                }
                if !self.in_loop() {
                    return Err(CompileError::InvalidInput(
                        "continue outside of a loop".to_string(),
                    ));
                }
                Ok(Some(SubState::single(
                    "continue",
                    NodeState::pass()
                        .with_hint("continue")
                        .with_next(CONTINUE_LABEL),
                )))
            }
            other => Err(CompileError::UnsupportedFeature(snippet(
                other,
                self.interner(),
            ))),
        }
    }

    /// Lower an `if`/`else if`/`else` chain into sub-states `if`, `if_1`,
    /// ..., `else`. Each link computes its condition, then a `Choice`
    /// between its body and the next link.
    fn lower_if(&mut self, if_stmt: &If) -> Result<Option<SubState>, CompileError> {
        let mut chain: Vec<(&Expression, &Statement)> = Vec::new();
        let mut else_tail: Option<&Statement> = None;
        let mut cursor = if_stmt;
        loop {
            chain.push((cursor.cond(), cursor.body()));
            match cursor.else_node() {
                Some(Statement::If(next)) => cursor = next,
                Some(other) => {
                    else_tail = Some(other);
                    break;
                }
                None => break,
            }
        }

        let mut wrapper = SubState::with_start("if");
        let count = chain.len();
        for (i, (cond, body)) in chain.into_iter().enumerate() {
            let label = if i == 0 {
                "if".to_string()
            } else {
                format!("if_{i}")
            };
            let next_label = if i + 1 < count {
                format!("if_{}", i + 1)
            } else {
                "else".to_string()
            };

            let mut ctx = self.eval_ctx();
            let output = ctx.add(self.lower_expression(cond)?);
            let condition = self.output_to_condition(output, &mut ctx)?;
            let body_sub = self.lower_statement(body)?;

            let mut choice = NodeState::new(StateKind::Choice)
                .with_hint(format!("if ({})", snippet(cond, self.interner())));
            let rule_target = if body_sub.is_some() { "body" } else { DEFERRED_NEXT };
            choice.choices = Some(vec![ChoiceRule::new(condition, rule_target)]);
            choice.default = Some(next_label);

            let mut check = SubState::with_start("check");
            check.insert("check", choice);
            if let Some(body_sub) = body_sub {
                check.insert("body", body_sub);
            }
            let link = graph::join_sub_states(vec![ctx.into_sub(), Some(check)], &self.chain)
                .expect("the check state is always present");
            wrapper.insert(label, link);
        }

        let else_sub = match else_tail {
            Some(stmt) => self.lower_statement(stmt)?,
            None => None,
        }
        .unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        wrapper.insert("else", else_sub);
        Ok(Some(wrapper))
    }

    /// `while` and `do`: one `check` state holding the condition, a
    /// `whenTrue` body jumping back to it, and the reserved loop labels.
    fn lower_while(
        &mut self,
        cond: &Expression,
        body: &Statement,
        run_body_first: bool,
    ) -> Result<Option<SubState>, CompileError> {
        let check_label = self.fresh_label("check");
        let body_label = self.fresh_label("whenTrue");
        let exit_label = self.fresh_label("exit");

        let mut ctx = self.eval_ctx();
        let output = ctx.add(self.lower_expression(cond)?);
        let condition = self.output_to_condition(output, &mut ctx)?;

        let mut choice = NodeState::new(StateKind::Choice)
            .with_hint(format!("while ({})", snippet(cond, self.interner())));
        choice.choices = Some(vec![ChoiceRule::new(condition, body_label.clone())]);
        choice.default = Some(exit_label.clone());
        let mut check = SubState::with_start("test");
        check.insert("test", choice);
        let check = graph::join_sub_states(vec![ctx.into_sub(), Some(check)], &self.chain)
            .expect("the test state is always present");

        self.push_frame(Frame::Loop);
        let body_sub = self.lower_statement(body)?;
        self.pop_frame();
        let mut body_sub = body_sub.unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        graph::update_deferred_next_states(&check_label, &mut body_sub);

        let mut wrapper = SubState::with_start(if run_body_first {
            body_label.clone()
        } else {
            check_label.clone()
        });
        wrapper.insert(check_label.clone(), check);
        wrapper.insert(body_label, body_sub);
        wrapper.insert(exit_label.clone(), NodeState::pass().with_next(DEFERRED_NEXT));
        wrapper.insert(BREAK_LABEL, NodeState::pass().with_next(exit_label));
        wrapper.insert(CONTINUE_LABEL, NodeState::pass().with_next(check_label));
        Ok(Some(wrapper))
    }

    /// C-style `for`: `check` -> `body` -> `increment` -> `check`, with the
    /// initializer run once up front. `continue` reaches the increment so
    /// the loop keeps advancing.
    fn lower_for(
        &mut self,
        for_loop: &boa_ast::statement::ForLoop,
    ) -> Result<Option<SubState>, CompileError> {
        self.push_scope();
        let init_sub = match for_loop.init() {
            None => None,
            Some(ForLoopInitializer::Expression(expr)) => self.lower_expression(expr)?.sub,
            Some(ForLoopInitializer::Var(decl)) => {
                let mut subs = Vec::new();
                for variable in decl.0.as_ref() {
                    subs.push(self.lower_variable(variable)?);
                }
                graph::join_sub_states(subs, &self.chain)
            }
            Some(ForLoopInitializer::Lexical(decl)) => {
                let list = match decl {
                    LexicalDeclaration::Let(list) | LexicalDeclaration::Const(list) => list,
                };
                let mut subs = Vec::new();
                for variable in list.as_ref() {
                    subs.push(self.lower_variable(variable)?);
                }
                graph::join_sub_states(subs, &self.chain)
            }
        };

        let check_label = self.fresh_label("check");
        let body_label = self.fresh_label("body");
        let increment_label = self.fresh_label("increment");
        let exit_label = self.fresh_label("exit");

        let check = match for_loop.condition() {
            Some(cond) => {
                let mut ctx = self.eval_ctx();
                let output = ctx.add(self.lower_expression(cond)?);
                let condition = self.output_to_condition(output, &mut ctx)?;
                let mut choice = NodeState::new(StateKind::Choice)
                    .with_hint(format!("for ({})", snippet(cond, self.interner())));
                choice.choices = Some(vec![ChoiceRule::new(condition, body_label.clone())]);
                choice.default = Some(exit_label.clone());
                let mut check = SubState::with_start("test");
                check.insert("test", choice);
                graph::join_sub_states(vec![ctx.into_sub(), Some(check)], &self.chain)
                    .expect("the test state is always present")
            }
            None => SubState::single(
                "jump",
                NodeState::pass().with_next(body_label.clone()),
            ),
        };

        self.push_frame(Frame::Loop);
        let body_sub = self.lower_statement(for_loop.body())?;
        self.pop_frame();
        let mut body_sub = body_sub.unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        graph::update_deferred_next_states(&increment_label, &mut body_sub);

        let mut increment = match for_loop.final_expr() {
            Some(expr) => self.lower_expression(expr)?.sub,
            None => None,
        }
        .unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        graph::update_deferred_next_states(&check_label, &mut increment);
        self.pop_scope();

        let mut wrapper = SubState::with_start(check_label.clone());
        wrapper.insert(check_label, check);
        wrapper.insert(body_label, body_sub);
        wrapper.insert(increment_label.clone(), increment);
        wrapper.insert(exit_label.clone(), NodeState::pass().with_next(DEFERRED_NEXT));
        wrapper.insert(BREAK_LABEL, NodeState::pass().with_next(exit_label));
        wrapper.insert(CONTINUE_LABEL, NodeState::pass().with_next(increment_label));
        Ok(Some(graph::join_sub_states(vec![init_sub, Some(wrapper)], &self.chain)
            .expect("the loop wrapper is always present")))
    }

    /// `for-of`: the iterable lands in a scratch slot that the loop keeps
    /// beheading - bind `arr[0]`, run the body, assign `arr[1:]` back.
    fn lower_for_of(
        &mut self,
        for_of: &boa_ast::statement::ForOfLoop,
    ) -> Result<Option<SubState>, CompileError> {
        let mut ctx = self.eval_ctx();
        let iterable = ctx.add(self.lower_expression(for_of.iterable())?);
        let slot = self.heap_slot();
        let mut seed = NodeState::pass().with_hint("for-of iterable");
        seed.result_path = Some(ResultPath::Path(slot.clone()));
        seed.next = Some(DEFERRED_NEXT.to_string());
        let iterable = self.output_to_json_path_or_literal(iterable, "for-of iterable", &mut ctx)?;
        let seed = graph::pass_with_input(seed, iterable)?;
        ctx.push_sub(Some(SubState::single("seed", seed)));

        self.push_scope();
        let head = Output::path(format!("{slot}[0]"));
        let assign = match for_of.initializer() {
            IterableLoopInitializer::Identifier(ident) => {
                let name = self.resolve_sym(ident.sym())?;
                self.bind_identifier(&name, head, BindMode::Assign)?
            }
            IterableLoopInitializer::Var(variable) => {
                self.bind_binding(variable.binding(), head, BindMode::Declare)?
            }
            IterableLoopInitializer::Let(binding) | IterableLoopInitializer::Const(binding) => {
                self.bind_binding(binding, head, BindMode::Declare)?
            }
            IterableLoopInitializer::Pattern(pattern) => {
                self.bind_pattern(pattern, head, BindMode::Assign)?
            }
            _ => {
                return Err(CompileError::UnsupportedFeature(
                    "property-access target in a for-of loop".to_string(),
                ))
            }
        }
        .ok_or_else(|| {
            CompileError::Unexpected("a for-of binding always emits states".to_string())
        })?;

        self.push_frame(Frame::Loop);
        let body_sub = self.lower_statement(for_of.body())?;
        self.pop_frame();
        self.pop_scope();

        let wrapper = self.iteration_wrapper(&slot, assign, body_sub);
        Ok(Some(
            graph::join_sub_states(vec![ctx.into_sub(), Some(wrapper)], &self.chain)
                .expect("the loop wrapper is always present"),
        ))
    }

    /// `for-in`: the array is first zipped through a `Map` state into
    /// `{index, item}` pairs; the loop binds the index to the loop variable
    /// and stashes the item at the hidden `$.0__<name>` slot so later
    /// `arr[i]` accesses resolve to it.
    fn lower_for_in(
        &mut self,
        for_in: &boa_ast::statement::ForInLoop,
    ) -> Result<Option<SubState>, CompileError> {
        let mut ctx = self.eval_ctx();
        let target = ctx.add(self.lower_expression(for_in.target())?);
        let target = self.output_to_json_path(target, "for-in target", &mut ctx)?;

        let slot = self.heap_slot();
        let mut zip = NodeState::new(StateKind::Map).with_hint("for-in zip");
        zip.items_path = Some(target);
        zip.parameters = Some(serde_json::json!({
            "index.$": "$$.Map.Item.Index",
            "item.$": "$$.Map.Item.Value",
        }));
        let mut states = BTreeMap::new();
        states.insert(
            "Zip".to_string(),
            NodeState::pass().with_end(),
        );
        zip.iterator = Some(Box::new(StateMachine {
            start_at: "Zip".to_string(),
            states,
        }));
        zip.result_path = Some(ResultPath::Path(slot.clone()));
        zip.next = Some(DEFERRED_NEXT.to_string());
        ctx.push_sub(Some(SubState::single("zip", zip)));

        self.push_scope();
        let name = match for_in.initializer() {
            IterableLoopInitializer::Identifier(ident) => {
                let ident = self.resolve_sym(ident.sym())?;
                self.lookup(&ident).cloned().ok_or_else(|| {
                    CompileError::InvalidInput(format!("unknown identifier `{ident}`"))
                })?
            }
            IterableLoopInitializer::Var(variable) if matches!(variable.binding(), Binding::Identifier(_)) => {
                let Binding::Identifier(ident) = variable.binding() else { unreachable!() };
                self.declare_sym(ident.sym())?
            }
            IterableLoopInitializer::Let(Binding::Identifier(ident))
            | IterableLoopInitializer::Const(Binding::Identifier(ident)) => {
                self.declare_sym(ident.sym())?
            }
            _ => {
                return Err(CompileError::UnsupportedFeature(
                    "destructuring in a for-in loop".to_string(),
                ))
            }
        };
        let item_slot = self.register_forin_item(&name);

        let mut index = NodeState::pass().with_hint(format!("{name} = index"));
        index.input_path = Some(format!("{slot}[0].index"));
        index.result_path = Some(ResultPath::Path(format!("$.{name}")));
        index.next = Some("stash".to_string());
        let mut stash = NodeState::pass().with_hint("stash item");
        stash.input_path = Some(format!("{slot}[0].item"));
        stash.result_path = Some(ResultPath::Path(item_slot));
        stash.next = Some(DEFERRED_NEXT.to_string());
        let mut assign = SubState::with_start("index");
        assign.insert("index", index);
        assign.insert("stash", stash);

        self.push_frame(Frame::Loop);
        let body_sub = self.lower_statement(for_in.body())?;
        self.pop_frame();
        self.pop_scope();

        let wrapper = self.iteration_wrapper(&slot, assign, body_sub);
        Ok(Some(
            graph::join_sub_states(vec![ctx.into_sub(), Some(wrapper)], &self.chain)
                .expect("the loop wrapper is always present"),
        ))
    }

    /// The `hasNext`/`assign`/`body`/`tail` loop over a beheadable array
    /// slot, shared by `for-of` and `for-in`. The array methods compile
    /// through their own skeleton in the iteration module, which folds
    /// accumulation into the tail rebuild instead.
    fn iteration_wrapper(
        &mut self,
        slot: &str,
        assign: SubState,
        body_sub: Option<SubState>,
    ) -> SubState {
        let has_next_label = self.fresh_label("hasNext");
        let assign_label = self.fresh_label("assign");
        let body_label = self.fresh_label("body");
        let tail_label = self.fresh_label("tail");
        let exit_label = self.fresh_label("exit");

        let mut has_next = NodeState::new(StateKind::Choice).with_hint("hasNext");
        has_next.choices = Some(vec![ChoiceRule::new(
            is_present(format!("{slot}[0]"), true),
            assign_label.clone(),
        )]);
        has_next.default = Some(exit_label.clone());

        let mut assign = assign;
        graph::update_deferred_next_states(&body_label, &mut assign);

        let mut body_sub = body_sub.unwrap_or_else(|| {
            SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
        });
        graph::update_deferred_next_states(&tail_label, &mut body_sub);

        let mut behead = NodeState::pass().with_hint("tail");
        behead.input_path = Some(format!("{slot}[1:]"));
        behead.result_path = Some(ResultPath::Path(slot.to_string()));
        behead.next = Some(has_next_label.clone());

        let mut wrapper = SubState::with_start(has_next_label.clone());
        wrapper.insert(has_next_label, has_next);
        wrapper.insert(assign_label, assign);
        wrapper.insert(body_label, body_sub);
        wrapper.insert(tail_label.clone(), SubState::single("behead", behead));
        wrapper.insert(exit_label.clone(), NodeState::pass().with_next(DEFERRED_NEXT));
        wrapper.insert(BREAK_LABEL, NodeState::pass().with_next(exit_label));
        wrapper.insert(CONTINUE_LABEL, NodeState::pass().with_next(tail_label));
        wrapper
    }

    fn lower_return(
        &mut self,
        target: Option<&Expression>,
        hint: String,
    ) -> Result<Option<SubState>, CompileError> {
        let mut ctx = self.eval_ctx();
        let output = match target {
            Some(expr) => ctx.add(self.lower_expression(expr)?),
            None => Output::path(NULL_SLOT),
        };
        let ret = self.materialize_return(output, hint, &mut ctx)?;
        ctx.push_sub(Some(ret));
        Ok(ctx.into_sub())
    }

    /// Resolve a `throw` target to `(error name, cause)`.
    ///
    /// Only `new Error(msg)`, `Error(msg)` and
    /// `new StepFunctionError(name, cause)` are accepted; the
    /// `StepFunctionError` cause must constant-fold.
    fn parse_throw(
        &mut self,
        target: &Expression,
        ctx: &mut EvalCtx,
    ) -> Result<(String, Output), CompileError> {
        let call = match target {
            Expression::New(new) => new.call(),
            Expression::Call(call) => call,
            other => {
                return Err(CompileError::ThrowMustBeError(snippet(
                    other,
                    self.interner(),
                )))
            }
        };
        let callee = match call.function() {
            Expression::Identifier(ident) => self.resolve_sym(ident.sym())?,
            other => {
                return Err(CompileError::ThrowMustBeError(snippet(
                    other,
                    self.interner(),
                )))
            }
        };
        match callee.as_str() {
            "Error" => {
                let message = match call.args().first() {
                    None => Output::literal(""),
                    Some(arg) => match self.fold_expression(arg) {
                        Some(value) => Output::literal(value),
                        None => {
                            let output = ctx.add(self.lower_expression(arg)?);
                            self.output_to_json_path_or_literal(output, "throw message", ctx)?
                        }
                    },
                };
                let cause = match message {
                    Output::Literal {
                        value,
                        contains_json_path,
                    } => Output::Literal {
                        value: serde_json::json!({ "message": value }),
                        contains_json_path,
                    },
                    Output::JsonPath(path) => Output::Literal {
                        value: serde_json::json!({ "message": path }),
                        contains_json_path: true,
                    },
                    Output::Condition(_) => {
                        return Err(CompileError::Unexpected(
                            "throw message normalization left a condition".to_string(),
                        ))
                    }
                };
                Ok(("Error".to_string(), cause))
            }
            "StepFunctionError" => {
                let name = call
                    .args()
                    .first()
                    .and_then(|arg| self.fold_expression(arg))
                    .and_then(|value| match value {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        CompileError::InvalidInput(
                            "StepFunctionError name must be a constant string".to_string(),
                        )
                    })?;
                let cause = match call.args().get(1) {
                    None => Value::Null,
                    Some(arg) => self.fold_expression(arg).ok_or_else(|| {
                        CompileError::InvalidInput(
                            "StepFunctionError cause must be constant".to_string(),
                        )
                    })?,
                };
                Ok((name, Output::literal(cause)))
            }
            _ => Err(CompileError::ThrowMustBeError(snippet(
                target,
                self.interner(),
            ))),
        }
    }

    fn lower_throw(
        &mut self,
        target: &Expression,
        hint: String,
    ) -> Result<Option<SubState>, CompileError> {
        let mut ctx = self.eval_ctx();
        let (error_name, cause) = self.parse_throw(target, &mut ctx)?;
        match self.route_throw() {
            ThrowRoute::Terminal => {
                let cause_json = match &cause {
                    Output::Literal {
                        value,
                        contains_json_path: false,
                    } => serde_json::to_string(value).map_err(|e| {
                        CompileError::Unexpected(format!("cause serialization: {e}"))
                    })?,
                    _ => {
                        return Err(CompileError::InvalidInput(
                            "a throw without an enclosing handler needs a constant cause"
                                .to_string(),
                        ))
                    }
                };
                let mut fail = NodeState::new(StateKind::Fail).with_hint(hint);
                fail.error = Some(error_name);
                fail.cause = Some(cause_json);
                ctx.push_sub(Some(SubState::single("fail", fail)));
                Ok(ctx.into_sub())
            }
            ThrowRoute::Handler { result_path } => {
                let mut state = NodeState::pass().with_hint(hint);
                state.result_path = Some(result_path);
                state.next = Some(CATCH_LABEL.to_string());
                let state = graph::pass_with_input(state, cause)?;
                ctx.push_sub(Some(SubState::single("throw", state)));
                Ok(ctx.into_sub())
            }
        }
    }

    /// `try`/`catch`/`finally`.
    ///
    /// The `__catch` pseudo-state sits inside the try sub-state so inner
    /// throws (and task catchers) can route to it; the catch body is a
    /// sibling, so its own throws bubble to the next handler out - or, when
    /// a `finally` exists, into the finally's error stash. A non-terminal
    /// `finally` ends in a `Choice` that re-throws a stashed error or
    /// materializes a stashed `return`.
    fn lower_try(&mut self, try_stmt: &Try) -> Result<Option<SubState>, CompileError> {
        let catch = try_stmt.catch();
        let finally = try_stmt.finally();
        let has_finally = finally.is_some();
        let try_label = self.fresh_label("try");
        let catch_label = self.fresh_label("catch");
        let finally_label = self.fresh_label("finally");

        // Pre-allocate landing sites before lowering anything that routes
        // to them.
        let catch_binding = match catch {
            Some(clause) => match clause.parameter() {
                Some(Binding::Identifier(ident)) => {
                    let ident = self.resolve_sym(ident.sym())?;
                    let name = self.alloc_var(&ident);
                    Some((ident, name, None))
                }
                Some(Binding::Pattern(pattern)) => {
                    let name = self.alloc_var("error");
                    Some(("error".to_string(), name, Some(pattern)))
                }
                None => None,
            },
            None => None,
        };
        let finally_error_slot = has_finally.then(|| self.heap_slot());
        let return_slot = has_finally.then(|| self.heap_slot());
        let finally_terminal = finally.is_some_and(|f| {
            normalize::body_always_terminates(f.block().statement_list().statements())
        });

        // --- try body ----------------------------------------------------
        let try_error_slot = match (&catch_binding, catch) {
            (Some((_, name, _)), _) => Some(format!("$.{name}")),
            (None, Some(_)) => None,
            (None, None) => finally_error_slot.clone(),
        };
        self.push_frame(Frame::handler(try_error_slot.clone()));
        if has_finally {
            self.push_return_frame(ReturnFrame {
                result_path: Some(ResultPath::Path(
                    return_slot.clone().expect("slot exists with finally"),
                )),
                next: Some(finally_label.clone()),
                used: false,
            });
        }
        self.push_scope();
        let try_sub = self.lower_statements(try_stmt.block().statement_list().statements())?;
        self.pop_scope();
        let mut try_returned = false;
        if has_finally {
            try_returned = self.pop_return_frame().used;
        }
        let try_handler_used = match self.frames.last() {
            Some(Frame::Handler { used, .. }) => *used,
            _ => false,
        };
        self.pop_frame();

        let mut try_wrap = SubState::with_start("body");
        let contains_task = try_sub.as_ref().is_some_and(graph::sub_contains_task);
        try_wrap.insert(
            "body",
            try_sub.unwrap_or_else(|| {
                SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
            }),
        );
        let catch_target = if catch.is_some() {
            catch_label.clone()
        } else {
            finally_label.clone()
        };
        try_wrap.insert(CATCH_LABEL, NodeState::pass().with_next(catch_target));
        if contains_task {
            let result_path = match &try_error_slot {
                Some(slot) => Some(ResultPath::Path(slot.clone())),
                None => Some(ResultPath::Discard),
            };
            graph::attach_catch_all(&mut try_wrap, CATCH_LABEL, result_path);
        }

        // --- catch body --------------------------------------------------
        let mut catch_returned = false;
        let mut catch_threw = false;
        let catch_sub = match catch {
            None => None,
            Some(clause) => {
                self.push_scope();
                if let Some((ident, name, _)) = &catch_binding {
                    self.bind_name(ident, name.clone());
                }
                if has_finally {
                    self.push_frame(Frame::handler(finally_error_slot.clone()));
                    self.push_return_frame(ReturnFrame {
                        result_path: Some(ResultPath::Path(
                            return_slot.clone().expect("slot exists with finally"),
                        )),
                        next: Some(finally_label.clone()),
                        used: false,
                    });
                }

                // Task failures hand the two-field {Error, Cause} envelope
                // with Cause as a JSON string; parse it before the body runs
                // so the catch variable sees an object.
                let preamble = match (&catch_binding, contains_task) {
                    (Some((_, name, _)), true) => {
                        let slot = format!("$.{name}");
                        let mut peek = NodeState::new(StateKind::Choice)
                            .with_hint("error has Cause?");
                        peek.choices = Some(vec![ChoiceRule::new(
                            is_present(format!("{slot}.Cause"), true),
                            "parse",
                        )]);
                        peek.default = Some(DEFERRED_NEXT.to_string());
                        let mut parse = NodeState::pass().with_hint("parse Cause");
                        parse.parameters = Some(serde_json::json!({
                            "Error.$": format!("{slot}.Error"),
                            "Cause.$": Intrinsic::string_to_json(
                                crate::intrinsics::Arg::path(format!("{slot}.Cause"))
                            )
                            .to_string(),
                        }));
                        parse.result_path = Some(ResultPath::Path(slot));
                        parse.next = Some(DEFERRED_NEXT.to_string());
                        let mut sub = SubState::with_start("peek");
                        sub.insert("peek", peek);
                        sub.insert("parse", parse);
                        Some(sub)
                    }
                    _ => None,
                };

                let pattern_binding = match &catch_binding {
                    Some((_, name, Some(pattern))) => self.bind_pattern(
                        pattern,
                        Output::path(format!("$.{name}")),
                        BindMode::Declare,
                    )?,
                    _ => None,
                };

                let body =
                    self.lower_statements(clause.block().statement_list().statements())?;
                if has_finally {
                    catch_returned = self.pop_return_frame().used;
                    catch_threw = match self.frames.last() {
                        Some(Frame::Handler { used, .. }) => *used,
                        _ => false,
                    };
                    self.pop_frame();
                }
                self.pop_scope();

                let joined = graph::join_sub_states(vec![preamble, pattern_binding, body], &self.chain)
                    .unwrap_or_else(|| {
                        SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
                    });
                let mut wrap = SubState::with_start("body");
                wrap.insert("body", joined);
                if has_finally {
                    // Throws from the catch body route here, stash the error
                    // and run the finally.
                    wrap.insert(
                        CATCH_LABEL,
                        NodeState::pass().with_next(finally_label.clone()),
                    );
                }
                Some(wrap)
            }
        };

        // --- finally body ------------------------------------------------
        let finally_sub = match finally {
            None => None,
            Some(clause) => {
                self.push_scope();
                let body =
                    self.lower_statements(clause.block().statement_list().statements())?;
                self.pop_scope();
                let body = body.unwrap_or_else(|| {
                    SubState::single("skip", NodeState::pass().with_next(DEFERRED_NEXT))
                });

                // Task catchers route into the stash too, even when no
                // explicit throw did.
                let try_routes_errors = try_handler_used || contains_task;
                let stashes_errors = catch_threw || (catch.is_none() && try_routes_errors);
                let stashes_returns = try_returned || catch_returned;
                if finally_terminal || (!stashes_errors && !stashes_returns) {
                    Some(body)
                } else {
                    let error_slot = finally_error_slot.clone().expect("slot exists");
                    let return_slot = return_slot.clone().expect("slot exists");
                    let mut rules = Vec::new();
                    let mut tail = SubState::with_start("settle");
                    if stashes_errors {
                        rules.push(ChoiceRule::new(is_present(&*error_slot, true), "rethrow"));
                        let mut rethrow =
                            NodeState::new(StateKind::Fail).with_hint("rethrow from finally");
                        rethrow.error = Some("ReThrowFromFinally".to_string());
                        rethrow.cause =
                            Some("an error was re-thrown after the finally block".to_string());
                        tail.insert("rethrow", rethrow);
                    }
                    if stashes_returns {
                        rules.push(ChoiceRule::new(
                            is_present(&*return_slot, true),
                            "doReturn",
                        ));
                        let mut ctx = self.eval_ctx();
                        let ret = self.materialize_return(
                            Output::path(return_slot),
                            "return".to_string(),
                            &mut ctx,
                        )?;
                        ctx.push_sub(Some(ret));
                        tail.insert(
                            "doReturn",
                            ctx.into_sub().expect("return state is always present"),
                        );
                    }
                    let mut settle =
                        NodeState::new(StateKind::Choice).with_hint("finally settle");
                    // When every path through the try stashed a return or an
                    // error, the fall-through is unreachable; give it a
                    // resolvable target instead of a dangling sentinel.
                    settle.default = if normalize::try_always_terminates(try_stmt) {
                        rules
                            .first()
                            .and_then(|rule| rule.next.clone())
                            .or(Some(DEFERRED_NEXT.to_string()))
                    } else {
                        Some(DEFERRED_NEXT.to_string())
                    };
                    settle.choices = Some(rules);
                    tail.insert("settle", settle);
                    Some(
                        graph::join_sub_states(vec![Some(body), Some(tail)], &self.chain)
                            .expect("finally body is always present"),
                    )
                }
            }
        };

        // --- assembly ----------------------------------------------------
        let mut outer = SubState::with_start(try_label.clone());
        if has_finally {
            graph::update_deferred_next_states(&finally_label, &mut try_wrap);
        }
        outer.insert(try_label, try_wrap);
        if let Some(mut catch_sub) = catch_sub {
            if has_finally {
                graph::update_deferred_next_states(&finally_label, &mut catch_sub);
            }
            outer.insert(catch_label, catch_sub);
        }
        if let Some(finally_sub) = finally_sub {
            outer.insert(finally_label, finally_sub);
        }
        Ok(Some(outer))
    }
}
