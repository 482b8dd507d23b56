//! Parser -> Optimizer -> Code generator integration tests
//!
//! Tests the path from template source to compiled module without running it.

use core_types::{EvalContext, Value};
use parser::{
    generate, optimize, parse, Expr, Lexer, LexerConfig, Parser, PlainCompileEnvironment, StartState, Stmt,
    TokenKind,
};

fn lexer() -> Lexer {
    Lexer::new(LexerConfig::default()).expect("default lexer config is valid")
}

fn parse_expr_tuple(source: &str) -> Expr {
    let lexer = lexer();
    let mut parser = Parser::from_source_in(&lexer, source, StartState::Variable, &[]).unwrap();
    parser.parse_tuple(false, true, &[], false).unwrap()
}

/// Test: a trailing comma makes a one element tuple
#[test]
fn test_tuple_parsing_asymmetry() {
    match parse_expr_tuple("1,") {
        Expr::Tuple { items, .. } => assert_eq!(items.len(), 1),
        other => panic!("expected tuple, got {:?}", other),
    }
    assert!(matches!(parse_expr_tuple("1"), Expr::Const { value: Value::Int(1), .. }));
}

/// Test: optimizing twice changes nothing
#[test]
fn test_optimizer_is_idempotent() {
    let lexer = lexer();
    let source = "{{ 1 + 2 * 3 }}{{ 'a' ~ 'b' }}{% if true %}{{ x + 1 }}{% else %}no{% endif %}{{ [1, 2][0] }}";
    let ast = parse(&lexer, source, None, None).unwrap();
    let once = optimize(ast, &PlainCompileEnvironment, EvalContext::new(false));
    let twice = optimize(once.clone(), &PlainCompileEnvironment, EvalContext::new(false));
    assert_eq!(once, twice);
}

/// Test: constant output folds into a single constant node
#[test]
fn test_constant_folding() {
    let lexer = lexer();
    let ast = parse(&lexer, "{{ 2 * 21 }}", None, None).unwrap();
    let ast = optimize(ast, &PlainCompileEnvironment, EvalContext::new(false));
    let Stmt::Output { nodes, .. } = &ast.body[0] else {
        panic!("expected output node");
    };
    assert!(matches!(nodes.as_slice(), [Expr::Const { value: Value::Int(42), .. }]));
}

/// Test: every statement keeps its source line through optimization and codegen
#[test]
fn test_line_numbers_survive_compilation() {
    let lexer = lexer();
    let source = "line one\n{{ a }}\n\n{{ b }}";
    let ast = parse(&lexer, source, Some("lines"), None).unwrap();
    let ast = optimize(ast, &PlainCompileEnvironment, EvalContext::new(false));
    let code = generate(&ast, &PlainCompileEnvironment, Some("lines"), None, EvalContext::new(false)).unwrap();
    let lines: Vec<u32> = code.debug_info().into_iter().map(|(_, line)| line).collect();
    assert!(lines.contains(&2));
    assert!(lines.contains(&4));
}

/// Test: raw blocks reach the token stream as data
#[test]
fn test_raw_block_is_data() {
    let tokens = lexer().tokenize("{% raw %}{{ x }}{% endraw %}", None, None).unwrap();
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Data && t.value == "{{ x }}"));
}

/// Test: syntax errors carry the template name and line
#[test]
fn test_syntax_error_position() {
    let err = parse(&lexer(), "ok\n{% for %}", Some("broken.html"), None).unwrap_err();
    assert_eq!(err.kind, core_types::ErrorKind::SyntaxError);
    assert_eq!(err.line(), Some(2));
}

/// Test: structural errors abort compilation
#[test]
fn test_duplicate_blocks_fail_to_compile() {
    let lexer = lexer();
    let ast = parse(&lexer, "{% block a %}{% endblock %}{% block a %}{% endblock %}", None, None);
    let err = ast
        .and_then(|ast| generate(&ast, &PlainCompileEnvironment, None, None, EvalContext::new(false)))
        .unwrap_err();
    assert!(matches!(
        err.kind,
        core_types::ErrorKind::SyntaxError | core_types::ErrorKind::CompileError
    ));
}

/// Test: compiled modules survive serialization
#[test]
fn test_compiled_module_blob_round_trip() {
    let lexer = lexer();
    let ast = parse(&lexer, "{% block b %}{{ x }}{% endblock %}", Some("t"), None).unwrap();
    let code = generate(&ast, &PlainCompileEnvironment, Some("t"), None, EvalContext::new(false)).unwrap();
    let bytes = code.to_bytes().unwrap();
    assert!(bytes.starts_with(b"CTPL"));
    let restored = bytecode_system::CompiledTemplate::from_bytes(&bytes).unwrap();
    assert_eq!(restored, code);

    let mut corrupted = bytes.clone();
    corrupted[4] = corrupted[4].wrapping_add(1);
    assert_eq!(
        bytecode_system::CompiledTemplate::from_bytes(&corrupted).unwrap_err().kind,
        core_types::ErrorKind::BadSerialization
    );
}
