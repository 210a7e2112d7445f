//! Source front end: parse a file with `boa` and hand the root function to
//! the lowering engine.
//!
//! The compiler proper never sees source text; this module finds the root
//! function in a parsed script - a bare arrow/function expression, a
//! `const f = ...` binding, or a function declaration - and bundles its
//! parameters and body into a [`FunctionSpec`].

use anyhow::{anyhow, bail, Context};
use boa_ast::declaration::{LexicalDeclaration, Variable};
use boa_ast::{Declaration, Expression, Script, Statement, StatementListItem};
use boa_interner::Interner;
use log::info;
use stepc_core::asl::StateMachine;
use stepc_core::integration::IntegrationResolver;
use stepc_core::{Compiler, FunctionSpec};

/// Parse a source string into a boa [`Script`].
pub fn parse_source(source: &str, interner: &mut Interner) -> anyhow::Result<Script> {
    boa_parser::Parser::new(boa_parser::Source::from_bytes(source))
        .parse_script(interner)
        .map_err(|e| anyhow!("parse error: {e}"))
}

/// Parse and compile a source string in one go.
pub fn compile_source(
    source: &str,
    resolver: &dyn IntegrationResolver,
    role: &str,
) -> anyhow::Result<StateMachine> {
    let mut interner = Interner::default();
    let script = parse_source(source, &mut interner)?;
    compile_script(&script, &interner, resolver, role)
}

/// Compile the root function of a parsed script.
pub fn compile_script(
    script: &Script,
    interner: &Interner,
    resolver: &dyn IntegrationResolver,
    role: &str,
) -> anyhow::Result<StateMachine> {
    let function = root_function(script, interner)?;
    info!("compiling root function");
    Compiler::compile(&function, resolver, role)
        .with_context(|| "lowering to ASL failed".to_string())
}

/// Locate the root function in the script.
fn root_function<'a>(
    script: &'a Script,
    interner: &'a Interner,
) -> anyhow::Result<FunctionSpec<'a>> {
    for item in &script.statements()[..] {
        match item {
            StatementListItem::Statement(Statement::Expression(expr)) => {
                if let Some(spec) = function_parts(expr, interner) {
                    return Ok(spec);
                }
            }
            StatementListItem::Declaration(Declaration::Lexical(decl)) => {
                let list = match decl {
                    LexicalDeclaration::Const(list) | LexicalDeclaration::Let(list) => list,
                };
                for variable in list.as_ref() {
                    let variable: &Variable = variable;
                    if let Some(spec) =
                        variable.init().and_then(|init| function_parts(init, interner))
                    {
                        return Ok(spec);
                    }
                }
            }
            _ => {}
        }
    }
    bail!("no root function found: expected an arrow function or function expression")
}

fn function_parts<'a>(
    expr: &'a Expression,
    interner: &'a Interner,
) -> Option<FunctionSpec<'a>> {
    match expr {
        Expression::ArrowFunction(arrow) => Some(FunctionSpec {
            params: arrow.parameters(),
            body: &arrow.body().statements()[..],
            interner,
        }),
        Expression::AsyncArrowFunction(arrow) => Some(FunctionSpec {
            params: arrow.parameters(),
            body: &arrow.body().statements()[..],
            interner,
        }),
        Expression::Function(function) => Some(FunctionSpec {
            params: function.parameters(),
            body: &function.body().statements()[..],
            interner,
        }),
        Expression::AsyncFunction(function) => Some(FunctionSpec {
            params: function.parameters(),
            body: &function.body().statements()[..],
            interner,
        }),
        Expression::Parenthesized(paren) => function_parts(paren.expression(), interner),
        _ => None,
    }
}
