//! Builtin syntax extensions
//!
//! - [`ExprStmtExtension`]: `{% do expr %}` evaluates an expression and
//!   discards the result
//! - [`LoopControlExtension`]: `{% break %}` and `{% continue %}`
//! - [`DebugExtension`]: `{% debug %}` prints the context and the available
//!   filters and tests

use core_types::{ContextAccess, Function, Kwargs, Result, Value, ValueMap};
use parser::{CallArgs, Expr, Extension, Parser, Stmt};

/// `{% do expr %}`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprStmtExtension;

impl Extension for ExprStmtExtension {
    fn identifier(&self) -> &str {
        "do"
    }

    fn tags(&self) -> &[&'static str] {
        &["do"]
    }

    fn parse(&self, parser: &mut Parser<'_>) -> Result<Vec<Stmt>> {
        let lineno = parser.stream.next_token().lineno;
        let node = parser.parse_tuple(false, true, &[], false)?;
        Ok(vec![Stmt::ExprStmt { node, lineno }])
    }
}

/// `{% break %}` and `{% continue %}`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopControlExtension;

impl Extension for LoopControlExtension {
    fn identifier(&self) -> &str {
        "loopcontrols"
    }

    fn tags(&self) -> &[&'static str] {
        &["break", "continue"]
    }

    fn parse(&self, parser: &mut Parser<'_>) -> Result<Vec<Stmt>> {
        let token = parser.stream.next_token();
        Ok(vec![if token.value == "break" {
            Stmt::Break { lineno: token.lineno }
        } else {
            Stmt::Continue { lineno: token.lineno }
        }])
    }
}

/// `{% debug %}`
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugExtension;

fn render_debug(ctx: &dyn ContextAccess, _args: &[Value], _kwargs: &Kwargs) -> Result<Value> {
    let env = ctx.environment();
    let sorted = |mut names: Vec<String>| {
        names.sort();
        Value::from(names.into_iter().map(Value::from).collect::<Vec<_>>())
    };
    let mut report = ValueMap::new();
    report.insert(Value::from("context"), Value::from(ctx.get_all()));
    report.insert(Value::from("filters"), sorted(env.filter_names()));
    report.insert(Value::from("tests"), sorted(env.test_names()));
    Ok(Value::from(Value::from(report).repr()))
}

impl Extension for DebugExtension {
    fn identifier(&self) -> &str {
        "debug"
    }

    fn tags(&self) -> &[&'static str] {
        &["debug"]
    }

    fn parse(&self, parser: &mut Parser<'_>) -> Result<Vec<Stmt>> {
        let lineno = parser.stream.next_token().lineno;
        let call = Expr::Call {
            node: Box::new(Expr::ExtensionAttribute {
                identifier: self.identifier().to_string(),
                name: "render".to_string(),
                lineno,
            }),
            args: CallArgs::default(),
            lineno,
        };
        Ok(vec![Stmt::Output {
            nodes: vec![call],
            lineno,
        }])
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        (name == "render").then(|| Value::from(Function::with_context("debug", render_debug)))
    }
}
