//! Error routing: where does a throwing site transition to?
//!
//! The frame stack mirrors the lexical nesting the lowerer is currently
//! inside. A throw routes to the innermost enclosing handler - the nearest
//! `try` with a catch clause, or a bare `finally` that must observe the
//! error before re-throwing - unless a `Map`/`Parallel` closure boundary
//! intervenes: states inside a worker body cannot transition to states
//! outside it, so the error falls back to a terminal `Fail` and the
//! enclosing `Map`/`Parallel` state propagates it.

use crate::asl::ResultPath;
use crate::lower::Compiler;

/// One entry of the compile-time nesting stack.
#[derive(Debug)]
pub(crate) enum Frame {
    /// An enclosing handler (`try` with catch, or finally-only `try`).
    /// `error_slot` is where the error envelope lands; `None` discards it.
    /// `used` records whether any throwing site actually routed here.
    Handler {
        error_slot: Option<String>,
        used: bool,
    },
    /// A `Map`/`Parallel` worker body.
    Closure,
    /// A loop body: the target of `break`/`continue`.
    Loop,
    /// An inline array-method callback body. Cuts off `break`/`continue`
    /// and `return`, but not error routing - callback states live in the
    /// same machine frame.
    Callback,
}

impl Frame {
    pub(crate) fn handler(error_slot: Option<String>) -> Self {
        Frame::Handler {
            error_slot,
            used: false,
        }
    }
}

/// Where a throwing site transitions.
#[derive(Debug, Clone)]
pub(crate) enum ThrowRoute {
    /// No reachable handler: emit a terminal `Fail`.
    Terminal,
    /// Transition to the nearest `__catch` label, landing the error at
    /// `result_path`.
    Handler { result_path: ResultPath },
}

impl Compiler<'_> {
    /// Route for the current lexical position, marking the chosen handler
    /// frame as used.
    pub(crate) fn route_throw(&mut self) -> ThrowRoute {
        for frame in self.frames.iter_mut().rev() {
            match frame {
                Frame::Handler { error_slot, used } => {
                    *used = true;
                    return ThrowRoute::Handler {
                        result_path: match error_slot {
                            Some(slot) => ResultPath::Path(slot.clone()),
                            None => ResultPath::Discard,
                        },
                    };
                }
                Frame::Closure => return ThrowRoute::Terminal,
                Frame::Loop | Frame::Callback => {}
            }
        }
        ThrowRoute::Terminal
    }

    /// The route's `ResultPath` without marking usage, for speculative
    /// wiring (task catchers attached by the integration bridge).
    pub(crate) fn peek_throw_route(&self) -> ThrowRoute {
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Handler { error_slot, .. } => {
                    return ThrowRoute::Handler {
                        result_path: match error_slot {
                            Some(slot) => ResultPath::Path(slot.clone()),
                            None => ResultPath::Discard,
                        },
                    }
                }
                Frame::Closure => return ThrowRoute::Terminal,
                Frame::Loop | Frame::Callback => {}
            }
        }
        ThrowRoute::Terminal
    }
}
