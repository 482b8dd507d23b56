//! Contract compliance tests for parser
//! The environment drives these entry points; their shapes must not drift.

use std::sync::Arc;

use bytecode_system::CompiledTemplate;
use core_types::{EvalContext, Result};
use parser::{
    generate, optimize, parse, CompileEnvironment, Extension, Lexer, LexerConfig, Parser,
    PlainCompileEnvironment, Stmt, Template, TokenStream,
};

#[test]
fn test_contract_parse_signature() {
    let lexer = Lexer::new(LexerConfig::default()).unwrap();
    let result: Result<Template> = parse(&lexer, "x", Some("a"), Some("a.txt"));
    assert!(result.is_ok());
}

#[test]
fn test_contract_parser_over_token_stream() {
    let lexer = Lexer::new(LexerConfig::default()).unwrap();
    let tokens = lexer.tokenize("{{ 1 }}", None, None).unwrap();
    let extensions: Vec<Arc<dyn Extension>> = Vec::new();
    let parser = Parser::new(TokenStream::new(tokens, None, None), &extensions);
    let template = parser.parse().unwrap();
    assert!(matches!(template.body[0], Stmt::Output { .. }));
}

#[test]
fn test_contract_compile_environment_defaults() {
    let env = PlainCompileEnvironment;
    assert!(!env.has_filter("upper"));
    assert!(!env.has_test("odd"));
    assert!(!env.has_finalize());
    assert!(!env.is_async());
}

#[test]
fn test_contract_pipeline() {
    let lexer = Lexer::new(LexerConfig::default()).unwrap();
    let ctx = EvalContext::new(false);
    let template = optimize(parse(&lexer, "{{ 40 + 2 }}", None, None).unwrap(), &PlainCompileEnvironment, ctx);
    let module: Result<CompiledTemplate> = generate(&template, &PlainCompileEnvironment, None, None, ctx);
    let module = module.unwrap();
    let bytes = module.to_bytes().unwrap();
    assert_eq!(CompiledTemplate::from_bytes(&bytes).unwrap(), module);
}
