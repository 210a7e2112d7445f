//! Front end and CLI around the [`stepc_core`] lowering engine.

pub mod cli;
mod frontend;

pub use frontend::{compile_script, compile_source, parse_source};
pub use stepc_core;
