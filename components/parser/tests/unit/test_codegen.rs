//! Unit tests for bytecode generation through the public API

use bytecode_system::{ChunkKind, CompiledTemplate, Escape, Opcode};
use core_types::{EvalContext, Result};
use parser::{generate, optimize, parse, CodeGenerator, Lexer, LexerConfig, PlainCompileEnvironment};

fn build(source: &str, autoescape: bool) -> Result<CompiledTemplate> {
    let lexer = Lexer::new(LexerConfig::default())?;
    let ctx = EvalContext::new(autoescape);
    let template = optimize(parse(&lexer, source, Some("page.html"), None)?, &PlainCompileEnvironment, ctx);
    generate(&template, &PlainCompileEnvironment, Some("page.html"), None, ctx)
}

fn has(module: &CompiledTemplate, chunk: usize, pred: impl Fn(&Opcode) -> bool) -> bool {
    module.chunks[chunk].instructions.iter().any(|i| pred(&i.opcode))
}

#[test]
fn test_folded_output_becomes_raw_text() {
    let module = build("{{ 1 + 2 }} apples", false).unwrap();
    let root = module.root();
    assert!(matches!(root.instructions[0].opcode, Opcode::EmitRaw(_)));
    assert_eq!(root.constants[0].as_str(), Some("3 apples"));
}

#[test]
fn test_autoescape_block_changes_escape_mode() {
    let module = build("{% autoescape true %}{{ x }}{% endautoescape %}{{ x }}", false).unwrap();
    assert!(has(&module, 0, |op| *op == Opcode::Emit(Escape::On)));
    assert!(has(&module, 0, |op| *op == Opcode::Emit(Escape::Off)));
    assert!(has(&module, 0, |op| *op == Opcode::PushAutoescape));
    assert!(has(&module, 0, |op| *op == Opcode::PopAutoescape));
}

#[test]
fn test_volatile_autoescape_defers_to_runtime() {
    let module = build("{% autoescape flag %}{{ x }}{% endautoescape %}", false).unwrap();
    assert!(has(&module, 0, |op| *op == Opcode::Emit(Escape::Runtime)));
}

#[test]
fn test_call_block_passes_caller() {
    let module = build(
        "{% macro wrap() %}<{{ caller() }}>{% endmacro %}{% call wrap() %}inner{% endcall %}",
        false,
    )
    .unwrap();
    assert!(matches!(module.chunks[1].kind, ChunkKind::Macro(_)));
    assert!(matches!(module.chunks[2].kind, ChunkKind::CallBlock(_)));
    assert!(has(&module, 0, |op| matches!(op, Opcode::Call(shape) if shape.kwargs == ["caller"])));
}

#[test]
fn test_macro_reads_outer_variable_through_scope_depth() {
    let module = build("{% set greeting = 'hi' %}{% macro m() %}{{ greeting }}{% endmacro %}", false).unwrap();
    assert!(has(&module, 1, |op| matches!(op, Opcode::LoadName { local, .. } if local.depth == 1)));
}

#[test]
fn test_include_and_import() {
    let module = build(
        "{% import 'forms.html' as forms %}{% include 'header.html' ignore missing without context %}",
        false,
    )
    .unwrap();
    assert!(has(&module, 0, |op| *op == Opcode::Import { with_context: false }));
    assert!(has(&module, 0, |op| *op == Opcode::Unexport("forms".into())));
    assert!(has(&module, 0, |op| *op
        == Opcode::Include {
            with_context: false,
            ignore_missing: true
        }));
}

#[test]
fn test_scoped_block_passes_locals() {
    let module = build("{% for item in seq %}{% block row scoped %}{{ item }}{% endblock %}{% endfor %}", false).unwrap();
    assert!(has(&module, 0, |op| matches!(op, Opcode::BuildLocals(locals) if locals.iter().any(|(n, _)| n == "item"))));
    assert_eq!(module.block("row"), Some(1));
}

#[test]
fn test_errors_carry_template_name() {
    let err = build("{% macro m() %}{% extends 'x' %}{% endmacro %}", false).unwrap_err();
    assert!(err.message.contains("non top-level"));
    assert_eq!(err.source_position.as_ref().and_then(|p| p.name.as_deref()), Some("page.html"));
}

#[test]
fn test_generator_is_reusable() {
    let lexer = Lexer::new(LexerConfig::default()).unwrap();
    let mut gen = CodeGenerator::new(&PlainCompileEnvironment, None, None, EvalContext::new(false));
    let a = parse(&lexer, "{{ a }}", None, None).unwrap();
    let b = parse(&lexer, "{{ b }}", None, None).unwrap();
    gen.generate(&a).unwrap();
    assert!(gen.resolved_names().contains("a"));
    gen.generate(&b).unwrap();
    assert!(!gen.resolved_names().contains("a"));
    assert!(gen.resolved_names().contains("b"));
}
