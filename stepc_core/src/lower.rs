//! The compiler context and compilation entry point.
//!
//! A [`Compiler`] owns every mutable allocator for one compilation: state
//! names, variable scopes, heap slots, and the frame stack that mirrors the
//! lexical nesting of handlers, loops and closures. The statement and
//! expression lowerers live in the submodules and thread all state through
//! it, so name allocation is driven purely by traversal order and repeated
//! compilations produce identical output.

mod binding;
mod expr;
mod iteration;
mod stmt;
mod throw;

use crate::asl::{NodeState, ResultPath, StateMachine};
use crate::error::CompileError;
use crate::graph::{self, Lowered, Output, SubState, DEFERRED_NEXT};
use crate::integration::IntegrationResolver;
use crate::intrinsics::Intrinsic;
use crate::names::{ChainLabels, HeapSlots, StateNames, VarNames};
use crate::normalize;
use boa_ast::declaration::Binding;
use boa_ast::function::FormalParameterList;
use boa_ast::StatementListItem;
use boa_interner::Interner;
use log::{info, trace};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub(crate) use throw::{Frame, ThrowRoute};

pub use crate::graph::NULL_SLOT;

const INIT_STATE_HINT: &str = "Initialize Functionless Context";

/// The compiler's input: a function's parameters and body plus the interner
/// that resolves its identifiers. Parsing and type-checking happen upstream.
pub struct FunctionSpec<'a> {
    pub params: &'a FormalParameterList,
    pub body: &'a [StatementListItem],
    pub interner: &'a Interner,
}

/// The return template a `return` statement materializes: where the value
/// goes and where control goes. `next: None` means `End: true`.
#[derive(Debug, Clone)]
pub(crate) struct ReturnFrame {
    pub(crate) result_path: Option<ResultPath>,
    pub(crate) next: Option<String>,
    pub(crate) used: bool,
}

/// One compilation's worth of state.
pub struct Compiler<'a> {
    interner: &'a Interner,
    resolver: &'a dyn IntegrationResolver,
    role: &'a str,
    vars: VarNames,
    heap: HeapSlots,
    /// Lexical scopes: source identifier -> allocated field name.
    scopes: Vec<HashMap<String, String>>,
    /// Allocated for-in variable name -> hidden item slot (`$.0__<name>`),
    /// consulted by element-access lowering.
    forin_items: HashMap<String, String>,
    /// The function's second (context) parameter, which lowers to `$$`.
    context_param: Option<String>,
    frames: Vec<Frame>,
    returns: Vec<ReturnFrame>,
    /// Allocator for synthetic sub-state labels, shared with every
    /// [`EvalCtx`] of this compilation.
    chain: ChainLabels,
}

impl<'a> Compiler<'a> {
    /// Compile a function to a finished state machine.
    pub fn compile(
        function: &FunctionSpec<'a>,
        resolver: &'a dyn IntegrationResolver,
        role: &'a str,
    ) -> Result<StateMachine, CompileError> {
        normalize::validate_params(function.params, function.interner)?;
        normalize::validate_body(function.body, function.interner)?;

        let mut compiler = Compiler {
            interner: function.interner,
            resolver,
            role,
            vars: VarNames::new(),
            heap: HeapSlots::new(),
            scopes: vec![HashMap::new()],
            forin_items: HashMap::new(),
            context_param: None,
            frames: Vec::new(),
            returns: vec![ReturnFrame {
                result_path: None,
                next: None,
                used: false,
            }],
            chain: ChainLabels::new(),
        };
        compiler.vars.reserve("fnl_context");

        info!("lowering function body to ASL");
        let (init, param_binding) = compiler.initializer(function.params)?;
        let body = compiler.lower_statements(function.body)?;
        let tail = if normalize::needs_terminal_return(function.body) {
            Some(compiler.implicit_return()?)
        } else {
            None
        };

        let machine = graph::join_sub_states(
            vec![
                Some(SubState::single("init", init)),
                param_binding,
                body,
                tail,
            ],
            &compiler.chain,
        )
        .expect("the initializer state is always present");

        let mut names = StateNames::new();
        let (start_at, states) = graph::to_states(&machine, &mut names)?;
        trace!("flattened {} states, start at `{start_at}`", states.len());
        Ok(StateMachine { start_at, states })
    }

    /// The "Initialize Functionless Context" `Pass`: binds the first
    /// parameter from the raw execution input and plants the constructed
    /// null. Parameter patterns that are pure identifier projections fold
    /// into this state's `Parameters`; anything richer binds through a
    /// follow-up graph.
    fn initializer(
        &mut self,
        params: &FormalParameterList,
    ) -> Result<(NodeState, Option<SubState>), CompileError> {
        let mut parameters = Map::new();
        parameters.insert(
            "fnl_context".to_string(),
            serde_json::json!({ "null": null }),
        );
        let mut follow_up = None;

        let list = params.as_ref();
        if let Some(param) = list.first() {
            match param.variable().binding() {
                Binding::Identifier(ident) => {
                    let name = self.declare_sym(ident.sym())?;
                    parameters.insert(
                        format!("{name}.$"),
                        Value::String("$$.Execution.Input".to_string()),
                    );
                }
                Binding::Pattern(pattern) => {
                    if let Some(projected) =
                        self.project_parameters(pattern, "$$.Execution.Input")?
                    {
                        for (key, value) in projected {
                            parameters.insert(key, value);
                        }
                    } else {
                        // Defaults, nesting or rest: land the raw input in a
                        // slot and run the full binding graph.
                        let slot = self.heap_slot();
                        parameters.insert(
                            format!("{}.$", slot.trim_start_matches("$.")),
                            Value::String("$$.Execution.Input".to_string()),
                        );
                        follow_up = self.bind_pattern(
                            pattern,
                            Output::path(slot),
                            binding::BindMode::Declare,
                        )?;
                    }
                }
            }
        }
        if let Some(param) = list.get(1) {
            if let Binding::Identifier(ident) = param.variable().binding() {
                self.context_param = Some(self.resolve_sym(ident.sym())?);
            }
        }

        let mut init = NodeState::pass().with_hint(INIT_STATE_HINT);
        init.parameters = Some(Value::Object(parameters));
        init.next = Some(DEFERRED_NEXT.to_string());
        Ok((init, follow_up))
    }

    /// The `return null` appended to non-terminal bodies.
    fn implicit_return(&mut self) -> Result<SubState, CompileError> {
        let mut ctx = self.eval_ctx();
        let ret = self.materialize_return(
            Output::path(NULL_SLOT),
            "return null".to_string(),
            &mut ctx,
        )?;
        ctx.push_sub(Some(ret));
        Ok(ctx.into_sub().expect("return state is always present"))
    }

    // --- identifier environment -------------------------------------------

    pub(crate) fn interner(&self) -> &'a Interner {
        self.interner
    }

    /// The execution-role identifier, passed through to integrations.
    pub fn role(&self) -> &str {
        self.role
    }

    pub(crate) fn resolve_sym(&self, sym: boa_interner::Sym) -> Result<String, CompileError> {
        self.interner
            .resolve(sym)
            .and_then(|s| s.utf8())
            .map(str::to_string)
            .ok_or_else(|| CompileError::Unexpected("identifier is not utf8".to_string()))
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocate a unique field name for a newly declared identifier and
    /// record it in the current scope.
    pub(crate) fn declare(&mut self, ident: &str) -> String {
        let name = self.vars.unique(ident);
        self.scopes
            .last_mut()
            .expect("at least the root scope")
            .insert(ident.to_string(), name.clone());
        name
    }

    pub(crate) fn declare_sym(&mut self, sym: boa_interner::Sym) -> Result<String, CompileError> {
        let ident = self.resolve_sym(sym)?;
        Ok(self.declare(&ident))
    }

    /// Allocate a unique field name without touching any scope (for landing
    /// sites that are wired before their scope opens, like catch variables).
    pub(crate) fn alloc_var(&mut self, ident: &str) -> String {
        self.vars.unique(ident)
    }

    /// Record an already-allocated name in the current scope.
    pub(crate) fn bind_name(&mut self, ident: &str, name: String) {
        self.scopes
            .last_mut()
            .expect("at least the root scope")
            .insert(ident.to_string(), name);
    }

    /// The allocated field name of an identifier currently in scope.
    pub(crate) fn lookup(&self, ident: &str) -> Option<&String> {
        self.scopes.iter().rev().find_map(|scope| scope.get(ident))
    }

    /// An identifier's JSON path: the context parameter is the bare `$$`,
    /// everything else lives under `$.`.
    pub(crate) fn identifier_path(&self, ident: &str) -> Result<String, CompileError> {
        if self.context_param.as_deref() == Some(ident) {
            return Ok("$$".to_string());
        }
        match self.lookup(ident) {
            Some(name) => Ok(format!("$.{name}")),
            None => Err(CompileError::InvalidInput(format!(
                "unknown identifier `{ident}`"
            ))),
        }
    }

    /// Register the hidden `$.0__<name>` item slot of a for-in variable.
    pub(crate) fn register_forin_item(&mut self, var_name: &str) -> String {
        let slot = format!("$.0__{var_name}");
        self.forin_items.insert(var_name.to_string(), slot.clone());
        slot
    }

    pub(crate) fn forin_item_of(&self, var_name: &str) -> Option<&String> {
        self.forin_items.get(var_name)
    }

    // --- scratch space ----------------------------------------------------

    /// A fresh `$.heap{n}` scratch location.
    pub fn heap_slot(&mut self) -> String {
        self.heap.fresh()
    }

    /// A sub-state label that no nested scope can accidentally capture.
    /// Used for every label that deferred-successor rewiring writes into
    /// arbitrarily deep content; the reserved labels (`__BreakNext`,
    /// `__ContinueNext`, `__catch`) stay fixed because their innermost-wins
    /// capture is the intended routing.
    pub(crate) fn fresh_label(&self, base: &str) -> String {
        self.chain.synthetic(base)
    }

    /// A handle on this compilation's label allocator, for composing
    /// sub-states with [`graph::join_sub_states`] outside the compiler
    /// (integration hooks).
    pub fn chain_labels(&self) -> ChainLabels {
        self.chain.clone()
    }

    /// A sequencing context drawing labels from this compilation.
    pub(crate) fn eval_ctx(&self) -> EvalCtx {
        EvalCtx::new(self.chain.clone())
    }

    // --- frame stack ------------------------------------------------------

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Whether `break`/`continue` have a loop to target in the current
    /// frame (callback and closure bodies cut them off).
    pub(crate) fn in_loop(&self) -> bool {
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Loop => return true,
                Frame::Closure | Frame::Callback => return false,
                Frame::Handler { .. } => {}
            }
        }
        false
    }

    pub(crate) fn push_return_frame(&mut self, frame: ReturnFrame) {
        self.returns.push(frame);
    }

    pub(crate) fn pop_return_frame(&mut self) -> ReturnFrame {
        self.returns.pop().expect("balanced return frames")
    }

    /// Run `f` with a closure boundary on the frame stack, for integrations
    /// that lower worker bodies into `Map`/`Parallel` branches.
    pub fn with_closure_boundary<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CompileError>,
    ) -> Result<R, CompileError> {
        self.push_frame(Frame::Closure);
        let result = f(self);
        self.pop_frame();
        result
    }

    // --- output conversions -----------------------------------------------

    /// Materialize an intrinsic call into a heap slot; returns the graph and
    /// the path of the computed value (`$.heap{n}.<field>`).
    pub(crate) fn materialize_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        field: &str,
        hint: &str,
    ) -> (SubState, String) {
        let slot = self.heap_slot();
        let mut parameters = Map::new();
        parameters.insert(format!("{field}.$"), Value::String(intrinsic.to_string()));
        let mut state = NodeState::pass().with_hint(hint);
        state.parameters = Some(Value::Object(parameters));
        state.result_path = Some(ResultPath::Path(slot.clone()));
        state.next = Some(DEFERRED_NEXT.to_string());
        (SubState::single("assign", state), format!("{slot}.{field}"))
    }

    /// Normalize any output to a JSON path, emitting states into `ctx` when
    /// the value has to be copied or a condition has to be forced.
    pub(crate) fn output_to_json_path(
        &mut self,
        output: Output,
        hint: &str,
        ctx: &mut EvalCtx,
    ) -> Result<String, CompileError> {
        match output {
            Output::JsonPath(path) => Ok(path),
            Output::Literal {
                value: Value::Null, ..
            } => Ok(NULL_SLOT.to_string()),
            literal @ Output::Literal { .. } => {
                let slot = self.heap_slot();
                let mut state = NodeState::pass().with_hint(hint);
                state.result_path = Some(ResultPath::Path(slot.clone()));
                state.next = Some(DEFERRED_NEXT.to_string());
                let state = graph::pass_with_input(state, literal)?;
                ctx.push_sub(Some(SubState::single("assign", state)));
                Ok(slot)
            }
            Output::Condition(condition) => {
                let slot = self.heap_slot();
                let sub = self.condition_to_slot(condition, &slot, hint);
                ctx.push_sub(Some(sub));
                Ok(slot)
            }
        }
    }

    /// Normalize an output to a path or a literal; only conditions need
    /// materializing.
    pub(crate) fn output_to_json_path_or_literal(
        &mut self,
        output: Output,
        hint: &str,
        ctx: &mut EvalCtx,
    ) -> Result<Output, CompileError> {
        match output {
            Output::Condition(condition) => {
                let slot = self.heap_slot();
                let sub = self.condition_to_slot(condition, &slot, hint);
                ctx.push_sub(Some(sub));
                Ok(Output::path(slot))
            }
            other => Ok(other),
        }
    }

    /// Force a condition into a boolean value at `slot`.
    fn condition_to_slot(
        &mut self,
        condition: crate::condition::Condition,
        slot: &str,
        hint: &str,
    ) -> SubState {
        use crate::asl::StateKind;
        use crate::condition::ChoiceRule;
        let mut choice = NodeState::new(StateKind::Choice).with_hint(hint);
        choice.choices = Some(vec![ChoiceRule::new(condition, "isTrue")]);
        choice.default = Some("isFalse".to_string());
        let mut when_true = NodeState::pass();
        when_true.result = Some(Value::Bool(true));
        when_true.result_path = Some(ResultPath::Path(slot.to_string()));
        when_true.next = Some(DEFERRED_NEXT.to_string());
        let mut when_false = NodeState::pass();
        when_false.result = Some(Value::Bool(false));
        when_false.result_path = Some(ResultPath::Path(slot.to_string()));
        when_false.next = Some(DEFERRED_NEXT.to_string());
        let mut sub = SubState::with_start("check");
        sub.insert("check", choice);
        sub.insert("isTrue", when_true);
        sub.insert("isFalse", when_false);
        sub
    }

    /// Build the `Pass` that materializes a `return`, honoring the active
    /// return template (`ResultPath` + `Next`/`End`).
    pub(crate) fn materialize_return(
        &mut self,
        output: Output,
        hint: String,
        ctx: &mut EvalCtx,
    ) -> Result<SubState, CompileError> {
        let output = self.output_to_json_path_or_literal(output, &hint, ctx)?;
        let template = self.returns.last_mut().expect("a return frame is always active");
        template.used = true;
        let result_path = template.result_path.clone();
        let next = template.next.clone();
        let mut state = NodeState::pass().with_hint(hint);
        state.result_path = result_path;
        match next {
            Some(label) => state.next = Some(label),
            None => state.end = Some(true),
        }
        let state = graph::pass_with_input(state, output)?;
        Ok(SubState::single("return", state))
    }
}

/// Sequencer for the side-effects of a group of expressions: sub-states are
/// collected in evaluation order and joined once, drawing chain labels from
/// the owning compilation's allocator.
pub(crate) struct EvalCtx {
    subs: Vec<Option<SubState>>,
    labels: ChainLabels,
}

impl EvalCtx {
    fn new(labels: ChainLabels) -> Self {
        EvalCtx {
            subs: Vec::new(),
            labels,
        }
    }

    /// Splice a lowered expression's states and take its output.
    pub(crate) fn add(&mut self, lowered: Lowered) -> Output {
        self.subs.push(lowered.sub);
        lowered.output
    }

    pub(crate) fn push_sub(&mut self, sub: Option<SubState>) {
        self.subs.push(sub);
    }

    /// All collected states joined in order.
    pub(crate) fn into_sub(self) -> Option<SubState> {
        let EvalCtx { subs, labels } = self;
        graph::join_sub_states(subs, &labels)
    }

    /// Finish into a lowering result with the given output.
    pub(crate) fn finish(self, output: Output) -> Lowered {
        Lowered::new(self.into_sub(), output)
    }
}
