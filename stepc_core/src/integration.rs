//! The seam between the compiler and external service integrations.
//!
//! A call expression may reference an integration: a descriptor that knows
//! how a third-party service maps onto `Task`-family states. The compiler
//! resolves the callee's dotted reference through an
//! [`IntegrationResolver`] and, when it matches, hands control to the
//! integration's single lowering hook. The returned graph is spliced into
//! the current frame by the expression lowerer, which also attaches a
//! `States.ALL` catcher to every task-like state so integration failures
//! participate in the host `try`/`catch`.

use crate::asl::{NodeState, ResultPath, StateKind};
use crate::error::CompileError;
use crate::graph::{Lowered, Output, SubState, DEFERRED_NEXT};
use crate::lower::Compiler;
use boa_ast::Expression;

/// One integration call site, as seen by the hook.
pub struct IntegrationCall<'a> {
    /// The dotted reference the callee resolved to, e.g. `lambda.invoke`.
    pub reference: String,
    /// The unlowered argument expressions.
    pub arguments: &'a [Expression],
    /// Source text of the whole call, for state naming.
    pub call_text: String,
}

/// An external service integration.
pub trait Integration {
    /// Lower one call into a graph and its output.
    ///
    /// The hook may call back into the `compiler` to lower argument
    /// expressions, allocate heap slots, or read the execution role. It
    /// returns either a bare output (for pure transforms) or a sub-state
    /// graph whose deferred successors the bridge wires up.
    fn lower(
        &self,
        call: &IntegrationCall<'_>,
        compiler: &mut Compiler<'_>,
    ) -> Result<Lowered, CompileError>;
}

/// Resolves a callee reference to an integration, if it names one.
pub trait IntegrationResolver {
    fn resolve(&self, reference: &str) -> Option<&dyn Integration>;
}

/// The empty resolver: no call ever names an integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIntegrations;

impl IntegrationResolver for NoIntegrations {
    fn resolve(&self, _reference: &str) -> Option<&dyn Integration> {
        None
    }
}

/// A ready-made integration for plain `Task` states: the first argument is
/// lowered into the task's input and the task's result becomes the call's
/// value.
pub struct ResourceTask {
    pub resource: String,
}

impl Integration for ResourceTask {
    fn lower(
        &self,
        call: &IntegrationCall<'_>,
        compiler: &mut Compiler<'_>,
    ) -> Result<Lowered, CompileError> {
        let slot = compiler.heap_slot();
        let mut task = NodeState::new(StateKind::Task);
        task.resource = Some(self.resource.clone());
        task.result_path = Some(ResultPath::Path(slot.clone()));
        task.next = Some(DEFERRED_NEXT.to_string());
        task.name_hint = Some(call.call_text.clone());
        let mut sub = None;
        let task = match call.arguments.first() {
            Some(argument) => {
                let lowered = compiler.lower_expression(argument)?;
                sub = lowered.sub;
                crate::graph::pass_with_input(task, lowered.output)?
            }
            None => task,
        };
        let task_sub = SubState::single("task", task);
        let joined =
            crate::graph::join_sub_states(vec![sub, Some(task_sub)], &compiler.chain_labels())
                .expect("task sub-state is never empty");
        Ok(Lowered::new(Some(joined), Output::path(slot)))
    }
}
