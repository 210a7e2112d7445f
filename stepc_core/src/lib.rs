//! The ASL lowering engine: a tree-directed translator from a restricted
//! ECMAScript subset (as parsed by `boa`) to Amazon States Language, the
//! JSON state-machine format of AWS Step Functions.
//!
//! The entry point is [`Compiler::compile`], which takes a
//! [`FunctionSpec`] (parameters, body, interner), an
//! [`integration::IntegrationResolver`] for external service calls, and an
//! execution-role identifier, and produces a finished
//! [`asl::StateMachine`].

pub mod asl;
pub mod condition;
pub mod error;
pub mod graph;
pub mod integration;
pub mod intrinsics;
mod lower;
mod names;
mod normalize;

pub use error::CompileError;
pub use lower::{Compiler, FunctionSpec, NULL_SLOT};
pub use names::ChainLabels;
