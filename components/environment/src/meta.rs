//! Introspection of parsed templates
//!
//! ```
//! use environment::{meta, Environment};
//!
//! let env = Environment::new();
//! let ast = env.parse("{% set foo = 42 %}{{ bar + foo }}{% include 'x.html' %}", None, None).unwrap();
//! let names = meta::find_undeclared_variables(&env, &ast).unwrap();
//! assert_eq!(names.into_iter().collect::<Vec<_>>(), ["bar"]);
//! assert_eq!(meta::find_referenced_templates(&ast), [Some("x.html".to_string())]);
//! ```

use std::collections::BTreeSet;

use core_types::{EvalContext, Result, Value};
use parser::{find_all_stmts, CodeGenerator, CompileEnvironment, Expr, Stmt, Template};

use crate::environment::Environment;

/// Names the template reads from the render context
///
/// Compiles the template, so syntax that only fails at compile time (a
/// misplaced `break`, for example) is reported here too.
pub fn find_undeclared_variables(env: &Environment, ast: &Template) -> Result<BTreeSet<String>> {
    let compile_env: &dyn CompileEnvironment = env.shared.as_ref();
    let mut generator = CodeGenerator::new(compile_env, None, None, EvalContext::new(false));
    generator.generate(ast)?;
    Ok(generator.resolved_names().clone())
}

fn const_names(expr: &Expr) -> Vec<Option<String>> {
    match expr {
        Expr::Const { value, .. } => match value {
            Value::String(s) => vec![Some(s.to_string())],
            Value::List(items) | Value::Tuple(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => vec![None],
        },
        Expr::List { items, .. } | Expr::Tuple { items, .. } => items
            .iter()
            .map(|item| match item {
                Expr::Const { value, .. } => value.as_str().map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => vec![None],
    }
}

/// Templates referenced by `extends`, `include`, `import` and
/// `from ... import`, in source order. Dynamic names show up as None.
pub fn find_referenced_templates(ast: &Template) -> Vec<Option<String>> {
    let statements = find_all_stmts(&ast.body, &|stmt| {
        matches!(
            stmt,
            Stmt::Extends { .. } | Stmt::Include { .. } | Stmt::Import { .. } | Stmt::FromImport { .. }
        )
    });
    statements
        .into_iter()
        .flat_map(|stmt| match stmt {
            Stmt::Include { template, .. } => const_names(template),
            Stmt::Extends { template, .. }
            | Stmt::Import { template, .. }
            | Stmt::FromImport { template, .. } => match template {
                Expr::Const { value, .. } => vec![value.as_str().map(str::to_string)],
                _ => vec![None],
            },
            _ => Vec::new(),
        })
        .collect()
}
