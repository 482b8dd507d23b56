//! Unit tests for sandboxed rendering and the builtin extensions

use core_types::{BinOp, ErrorKind, Function, Kwargs, Result, Value};
use environment::{
    meta, DebugExtension, DefaultSandbox, Environment, ExprStmtExtension, LoopControlExtension,
    SandboxPolicy,
};
use serde_json::json;

use crate::support::render_str;

#[test]
fn test_private_attributes_are_unsafe() {
    let env = Environment::builder().sandboxed().build().unwrap();
    let ctx = json!({"user": {"_password": "hunter2", "name": "ann"}});
    assert_eq!(render_str(&env, "[{{ user._password }}]{{ user.name }}", ctx.clone()).unwrap(), "[]ann");

    let err = render_str(&env, "{{ user._password + 'x' }}", ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SecurityError);
    assert_eq!(err.message, "access to attribute '_password' of 'dict' object is unsafe.");
}

#[test]
fn test_unsafe_callables_raise() {
    let secret = Function::new("secret", |_: &[Value], _: &Kwargs| Ok(Value::from("boom"))).mark_unsafe();
    let env = Environment::builder()
        .sandboxed()
        .global("secret", secret)
        .build()
        .unwrap();
    let err = render_str(&env, "{{ secret() }}", json!({})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SecurityError);
    assert!(err.message.ends_with("is not safely callable"));

    let open = Environment::builder()
        .global("secret", Function::new("secret", |_: &[Value], _: &Kwargs| Ok(Value::from("boom"))).mark_unsafe())
        .build()
        .unwrap();
    assert_eq!(render_str(&open, "{{ secret() }}", json!({})).unwrap(), "boom");
}

#[test]
fn test_sandbox_limits_range() {
    let env = Environment::builder().sandboxed().build().unwrap();
    assert!(render_str(&env, "{{ range(1000000) | length }}", json!({})).is_err());
    assert_eq!(render_str(&env, "{{ range(3) | length }}", json!({})).unwrap(), "3");
}

#[derive(Debug)]
struct NoPow;

impl SandboxPolicy for NoPow {
    fn is_safe_attribute(&self, _obj: &Value, _attr: &str, _value: &Value) -> bool {
        true
    }

    fn is_safe_callable(&self, _obj: &Value) -> bool {
        true
    }

    fn intercepts_binop(&self, op: BinOp) -> bool {
        op == BinOp::Pow
    }

    fn call_binop(&self, _op: BinOp, _left: &Value, _right: &Value) -> Result<Value> {
        Err(core_types::TemplateError::new(ErrorKind::SecurityError, "the power operator is unavailable"))
    }
}

#[test]
fn test_intercepted_operators_are_never_folded() {
    let env = Environment::builder().sandbox(NoPow).build().unwrap();
    let err = render_str(&env, "{{ 2 ** 10 }}", json!({})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SecurityError);
    assert_eq!(render_str(&env, "{{ 2 * 10 }}", json!({})).unwrap(), "20");

    let intercepting = DefaultSandbox::new().intercept_binops(&[BinOp::Pow]);
    assert!(intercepting.intercepts_binop(BinOp::Pow));
}

#[test]
fn test_do_extension() {
    let env = Environment::builder().extension(ExprStmtExtension).build().unwrap();
    let out = render_str(&env, "{% do 1 + 2 %}done", json!({})).unwrap();
    assert_eq!(out, "done");

    let plain = Environment::new();
    let err = render_str(&plain, "{% do 1 %}", json!({})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn test_loop_controls() {
    let env = Environment::builder().extension(LoopControlExtension).build().unwrap();
    let out = render_str(
        &env,
        "{% for i in range(10) %}{% if i is odd %}{% continue %}{% endif %}{% if i > 6 %}{% break %}{% endif %}{{ i }}{% endfor %}",
        json!({}),
    )
    .unwrap();
    assert_eq!(out, "0246");

    let err = env.from_string("{% break %}").unwrap_err();
    assert_eq!(err.message, "'break' outside of a loop");
}

#[test]
fn test_debug_extension_lists_context() {
    let env = Environment::builder().extension(DebugExtension).build().unwrap();
    let out = render_str(&env, "{% debug %}", json!({"answer": 42})).unwrap();
    assert!(out.contains("'answer': 42"));
    assert!(out.contains("'upper'"));
    assert!(out.contains("'odd'"));
}

#[test]
fn test_extensions_are_deduplicated_by_identifier() {
    let env = Environment::builder()
        .extension(ExprStmtExtension)
        .extension(ExprStmtExtension)
        .extension(LoopControlExtension)
        .build()
        .unwrap();
    assert_eq!(env.extensions().len(), 2);
}

#[test]
fn test_meta_on_loaded_source() {
    let env = Environment::new();
    let ast = env
        .parse("{% import 'forms.html' as f %}{{ f.input(name) }}{{ title | upper }}", None, None)
        .unwrap();
    let names = meta::find_undeclared_variables(&env, &ast).unwrap();
    assert!(names.contains("name"));
    assert!(names.contains("title"));
    assert!(!names.contains("f"));
    assert_eq!(meta::find_referenced_templates(&ast), [Some("forms.html".to_string())]);
}
