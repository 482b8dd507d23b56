//! Unit tests for constant folding through the public API

use core_types::{EvalContext, Value};
use parser::{optimize, parse, Expr, Lexer, LexerConfig, PlainCompileEnvironment, Stmt, Template};

fn optimized(source: &str) -> Template {
    let lexer = Lexer::new(LexerConfig::default()).unwrap();
    let template = parse(&lexer, source, None, None).unwrap();
    optimize(template, &PlainCompileEnvironment, EvalContext::new(false))
}

fn first_output(template: &Template) -> &Expr {
    match &template.body[0] {
        Stmt::Output { nodes, .. } => &nodes[0],
        other => panic!("expected output, got {}", other.type_name()),
    }
}

#[test]
fn test_arithmetic_is_folded() {
    let template = optimized("{{ (1 + 2) * 3 }}");
    assert_eq!(first_output(&template).as_const_value(), Some(&Value::from(9)));
}

#[test]
fn test_string_concat_is_folded() {
    let template = optimized("{{ 'a' ~ 1 ~ 'b' }}");
    assert_eq!(first_output(&template).as_const_value(), Some(&Value::from("a1b")));
}

#[test]
fn test_names_are_left_alone() {
    let template = optimized("{{ x + 1 }}");
    assert!(matches!(first_output(&template), Expr::BinOp { .. }));
}

#[test]
fn test_division_by_zero_is_left_for_runtime() {
    let template = optimized("{{ 1 / 0 }}");
    assert!(matches!(first_output(&template), Expr::BinOp { .. }));
}

#[test]
fn test_folding_inside_statements() {
    let template = optimized("{% if 1 < 2 %}{{ [1, 2][0] }}{% endif %}");
    let Stmt::If(node) = &template.body[0] else {
        panic!("expected if");
    };
    assert_eq!(node.test.as_const_value(), Some(&Value::from(true)));
}
