//! Unit tests for statement parsing

use core_types::{ErrorKind, Value};
use parser::{parse, Expr, Lexer, LexerConfig, Stmt, Template};

fn parse_src(source: &str) -> core_types::Result<Template> {
    let lexer = Lexer::new(LexerConfig::default())?;
    parse(&lexer, source, Some("test.html"), None)
}

#[test]
fn test_output_nodes() {
    let template = parse_src("Hello {{ name }}!").unwrap();
    let Stmt::Output { nodes, .. } = &template.body[0] else {
        panic!("expected output");
    };
    assert_eq!(nodes.len(), 3);
    assert!(matches!(&nodes[0], Expr::TemplateData { data, .. } if data == "Hello "));
    assert!(matches!(&nodes[1], Expr::Name { name, .. } if name == "name"));
}

#[test]
fn test_for_with_else_and_filter() {
    let template = parse_src("{% for a, b in items if a %}{{ a }}{% else %}none{% endfor %}").unwrap();
    let Stmt::For {
        target,
        test,
        else_,
        recursive,
        ..
    } = &template.body[0]
    else {
        panic!("expected for");
    };
    assert!(matches!(target, Expr::Tuple { items, .. } if items.len() == 2));
    assert!(test.is_some());
    assert_eq!(else_.len(), 1);
    assert!(!recursive);
}

#[test]
fn test_if_elif_else() {
    let template = parse_src("{% if a %}1{% elif b %}2{% elif c %}3{% else %}4{% endif %}").unwrap();
    let Stmt::If(node) = &template.body[0] else {
        panic!("expected if");
    };
    assert_eq!(node.elif_.len(), 2);
    assert_eq!(node.else_.len(), 1);
}

#[test]
fn test_macro_defaults() {
    let template = parse_src("{% macro input(name, value='', type='text') %}{% endmacro %}").unwrap();
    let Stmt::Macro { name, args, defaults, .. } = &template.body[0] else {
        panic!("expected macro");
    };
    assert_eq!(name, "input");
    assert_eq!(args, &["name", "value", "type"]);
    assert_eq!(defaults.len(), 2);
    assert_eq!(defaults[1].as_const_value(), Some(&Value::from("text")));
}

#[test]
fn test_block_modifiers() {
    let template = parse_src("{% block body scoped required %}{% endblock body %}").unwrap();
    assert!(matches!(
        &template.body[0],
        Stmt::Block { name, scoped: true, required: true, .. } if name == "body"
    ));
}

#[test]
fn test_from_import_with_alias() {
    let template = parse_src("{% from 'forms.html' import input as field, textarea with context %}").unwrap();
    let Stmt::FromImport { names, with_context, .. } = &template.body[0] else {
        panic!("expected from import");
    };
    assert_eq!(
        names,
        &vec![
            ("input".to_string(), Some("field".to_string())),
            ("textarea".to_string(), None)
        ]
    );
    assert!(with_context);
}

#[test]
fn test_set_block_with_filter() {
    let template = parse_src("{% set x | upper %}abc{% endset %}").unwrap();
    assert!(matches!(&template.body[0], Stmt::AssignBlock { filter: Some(_), .. }));
}

#[test]
fn test_unknown_tag() {
    let err = parse_src("{% frobnicate %}").unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("Encountered unknown tag 'frobnicate'."));
    assert_eq!(err.line(), Some(1));
}

#[test]
fn test_unclosed_block() {
    let err = parse_src("{% for x in y %}\n{{ x }}").unwrap_err();
    assert!(err.message.contains("Unexpected end of template."));
    assert!(err.message.contains("'endfor'"));
}

#[test]
fn test_cannot_assign_to_constant() {
    assert!(parse_src("{% set 1 = 2 %}").is_err());
    assert!(parse_src("{% set none = 2 %}").is_err());
}
