//! The pre-pass over the function AST.
//!
//! Before lowering, the body is traversed once to reject syntax the
//! compiler never translates and to decide whether an implicit `return null`
//! must be appended: ASL interprets a machine by running states until a
//! terminal one, so every path through the body has to end in an explicit
//! `return` or `throw`.

use crate::error::CompileError;
use boa_ast::declaration::Binding;
use boa_ast::function::FormalParameterList;
use boa_ast::{Declaration, Statement, StatementListItem};
use boa_interner::{Interner, ToInternedString};

/// Shorten a node's interned source text for an error message.
pub(crate) fn snippet(node: &impl ToInternedString, interner: &Interner) -> String {
    let text = node.to_interned_string(interner);
    let mut out: String = text.chars().take(60).collect();
    if out.len() < text.len() {
        out.push_str("...");
    }
    out
}

/// Reject parameter shapes the compiler does not support: rest parameters,
/// and more than two parameters (input and context).
pub fn validate_params(
    params: &FormalParameterList,
    interner: &Interner,
) -> Result<(), CompileError> {
    let list = params.as_ref();
    if list.len() > 2 {
        return Err(CompileError::InvalidInput(
            "a state machine function takes at most an input and a context parameter".to_string(),
        ));
    }
    for (index, param) in list.iter().enumerate() {
        if param.is_rest_param() {
            return Err(CompileError::UnsupportedFeature(format!(
                "rest parameter `{}`",
                snippet(param.variable(), interner)
            )));
        }
        // The context parameter is the raw `$$` object and cannot be taken
        // apart at bind time.
        if index == 1 {
            if let Binding::Pattern(_) = param.variable().binding() {
                return Err(CompileError::InvalidInput(
                    "the context parameter cannot be destructured".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Walk the body once and reject statements with no ASL translation.
pub fn validate_body(
    stmts: &[StatementListItem],
    interner: &Interner,
) -> Result<(), CompileError> {
    for item in stmts {
        match item {
            StatementListItem::Statement(stmt) => validate_statement(stmt, interner)?,
            StatementListItem::Declaration(decl) => validate_declaration(decl, interner)?,
        }
    }
    Ok(())
}

fn validate_declaration(decl: &Declaration, interner: &Interner) -> Result<(), CompileError> {
    match decl {
        Declaration::Lexical(_) => Ok(()),
        Declaration::Class(_) => Err(CompileError::ClassesNotSupported(snippet(decl, interner))),
        _ => Err(CompileError::UnsupportedFeature(format!(
            "function declaration `{}`",
            snippet(decl, interner)
        ))),
    }
}

fn validate_statement(stmt: &Statement, interner: &Interner) -> Result<(), CompileError> {
    match stmt {
        Statement::With(_) => Err(CompileError::UnsupportedFeature(
            "with statement".to_string(),
        )),
        Statement::Switch(_) => Err(CompileError::UnsupportedFeature(
            "switch statement".to_string(),
        )),
        Statement::Labelled(_) => Err(CompileError::UnsupportedFeature(
            "labelled statement".to_string(),
        )),
        Statement::ForOfLoop(for_of) if for_of.r#await() => Err(
            CompileError::UnsupportedFeature("for-await-of loop".to_string()),
        ),
        Statement::Block(block) => {
            validate_body(block.statement_list().statements(), interner)
        }
        Statement::If(if_stmt) => {
            validate_statement(if_stmt.body(), interner)?;
            if let Some(else_node) = if_stmt.else_node() {
                validate_statement(else_node, interner)?;
            }
            Ok(())
        }
        Statement::WhileLoop(while_loop) => validate_statement(while_loop.body(), interner),
        Statement::DoWhileLoop(do_while) => validate_statement(do_while.body(), interner),
        Statement::ForLoop(for_loop) => validate_statement(for_loop.body(), interner),
        Statement::ForInLoop(for_in) => validate_statement(for_in.body(), interner),
        Statement::ForOfLoop(for_of) => validate_statement(for_of.body(), interner),
        Statement::Try(try_stmt) => {
            validate_body(try_stmt.block().statement_list().statements(), interner)?;
            if let Some(catch) = try_stmt.catch() {
                validate_body(catch.block().statement_list().statements(), interner)?;
            }
            if let Some(finally) = try_stmt.finally() {
                validate_body(finally.block().statement_list().statements(), interner)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// True if the body's last statement does not already terminate on every
/// path, in which case the lowerer appends an implicit `return null`.
pub fn needs_terminal_return(stmts: &[StatementListItem]) -> bool {
    match stmts.last() {
        Some(StatementListItem::Statement(stmt)) => !always_terminates(stmt),
        Some(StatementListItem::Declaration(_)) | None => true,
    }
}

/// Conservative terminality: true only when every path through `stmt`
/// returns or throws.
fn always_terminates(stmt: &Statement) -> bool {
    match stmt {
        Statement::Return(_) | Statement::Throw(_) => true,
        Statement::Block(block) => {
            matches!(
                block.statement_list().statements().last(),
                Some(StatementListItem::Statement(last)) if always_terminates(last)
            )
        }
        Statement::If(if_stmt) => match if_stmt.else_node() {
            Some(else_node) => {
                always_terminates(if_stmt.body()) && always_terminates(else_node)
            }
            None => false,
        },
        Statement::Try(try_stmt) => try_always_terminates(try_stmt),
        _ => false,
    }
}

/// Terminality of a whole `try` statement: a terminal `finally` decides on
/// its own; otherwise both the try block and the catch clause (when present)
/// must terminate.
pub(crate) fn try_always_terminates(try_stmt: &boa_ast::statement::Try) -> bool {
    let finally_terminates = try_stmt.finally().is_some_and(|finally| {
        matches!(
            finally.block().statement_list().statements().last(),
            Some(StatementListItem::Statement(last)) if always_terminates(last)
        )
    });
    let try_terminates = matches!(
        try_stmt.block().statement_list().statements().last(),
        Some(StatementListItem::Statement(last)) if always_terminates(last)
    );
    let catch_terminates = try_stmt.catch().is_none_or(|catch| {
        matches!(
            catch.block().statement_list().statements().last(),
            Some(StatementListItem::Statement(last)) if always_terminates(last)
        )
    });
    finally_terminates || (try_terminates && catch_terminates)
}

/// Whether a statement-list tail (used for `finally` bodies) terminates.
pub(crate) fn body_always_terminates(stmts: &[StatementListItem]) -> bool {
    !needs_terminal_return(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_ast::{Expression, Script};
    use boa_interner::Interner;

    fn parse(src: &str, interner: &mut Interner) -> Script {
        boa_parser::Parser::new(boa_parser::Source::from_bytes(src))
            .parse_script(interner)
            .expect("test source parses")
    }

    fn arrow_body(script: &Script) -> &[StatementListItem] {
        match script.statements().first() {
            Some(StatementListItem::Statement(Statement::Expression(
                Expression::ArrowFunction(arrow),
            ))) => &arrow.body().statements()[..],
            _ => panic!("expected a single arrow function"),
        }
    }

    #[test]
    fn plain_tail_needs_return() {
        let mut interner = Interner::default();
        let script = parse("(a) => { let x = 1; x; }", &mut interner);
        assert!(needs_terminal_return(arrow_body(&script)));
    }

    #[test]
    fn return_tail_is_terminal() {
        let mut interner = Interner::default();
        let script = parse("(a) => { let x = 1; return x; }", &mut interner);
        assert!(!needs_terminal_return(arrow_body(&script)));
    }

    #[test]
    fn if_without_else_is_not_terminal() {
        let mut interner = Interner::default();
        let script = parse("(a) => { if (a) { return 1; } }", &mut interner);
        assert!(needs_terminal_return(arrow_body(&script)));
    }

    #[test]
    fn if_else_both_returning_is_terminal() {
        let mut interner = Interner::default();
        let script = parse(
            "(a) => { if (a) { return 1; } else { throw Error('x'); } }",
            &mut interner,
        );
        assert!(!needs_terminal_return(arrow_body(&script)));
    }

    #[test]
    fn switch_is_rejected() {
        let mut interner = Interner::default();
        let script = parse("(a) => { switch (a) { default: break; } }", &mut interner);
        let err = validate_body(arrow_body(&script), &interner).expect_err("switch rejected");
        assert_eq!(err.code(), "Unsupported_Feature");
    }

    #[test]
    fn nested_for_await_is_rejected() {
        let mut interner = Interner::default();
        let script = parse(
            "async (a) => { for await (const x of a) { x; } }",
            &mut interner,
        );
        // The root arrow is async here, so dig it out of the async variant.
        let body = match script.statements().first() {
            Some(StatementListItem::Statement(Statement::Expression(
                Expression::AsyncArrowFunction(arrow),
            ))) => &arrow.body().statements()[..],
            _ => panic!("expected a single async arrow function"),
        };
        assert!(validate_body(body, &interner).is_err());
    }
}
