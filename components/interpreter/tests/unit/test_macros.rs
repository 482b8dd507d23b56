//! Unit tests for macros, call blocks and recursive loops

use std::sync::Arc;

use core_types::{ErrorKind, Kwargs, Value, ValueMap};
use interpreter::{Context, RenderHost, TemplateModule, VM};
use serde_json::json;

use crate::support::{render_source, vars, TestHost};

const GREET: &str = "{% macro greet(name, greeting='Hello') %}{{ greeting }}, {{ name }}!{% endmacro %}";

#[test]
fn test_macro_defaults_and_keywords() {
    let source = format!("{}{{{{ greet('Ann') }}}}|{{{{ greet('Bob', greeting='Hi') }}}}", GREET);
    assert_eq!(render_source(&source, ValueMap::new()).unwrap(), "Hello, Ann!|Hi, Bob!");
}

#[test]
fn test_missing_argument_is_undefined() {
    let source = "{% macro m(a) %}[{{ a }}]{% endmacro %}{{ m() }}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "[]");
}

#[test]
fn test_macro_sees_later_outer_assignment() {
    let source = "{% macro m() %}{{ x }}{% endmacro %}{% set x = 'late' %}{{ m() }}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "late");
}

#[test]
fn test_call_block_passes_caller() {
    let source = "{% macro wrap() %}<{{ caller() }}>{% endmacro %}{% call wrap() %}inner{% endcall %}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "<inner>");
}

#[test]
fn test_caller_with_arguments() {
    let source = "{% macro each(items) %}{% for i in items %}{{ caller(i) }}{% endfor %}{% endmacro %}\
                  {% call(item) each([1, 2]) %}<{{ item }}>{% endcall %}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "<1><2>");
}

#[test]
fn test_varargs_collects_extra_positionals() {
    let source = "{% macro m() %}{% for v in varargs %}{{ v }}{% endfor %}{% endmacro %}{{ m(1, 2, 3) }}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "123");
}

#[test]
fn test_kwargs_collects_unknown_keywords() {
    let source = "{% macro m() %}{{ kwargs.size }}{% endmacro %}{{ m(size=3) }}";
    assert_eq!(render_source(source, ValueMap::new()).unwrap(), "3");
}

#[test]
fn test_too_many_arguments() {
    let source = "{% macro m(a) %}{% endmacro %}{{ m(1, 2) }}";
    let err = render_source(source, ValueMap::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "macro 'm' takes not more than 1 argument(s)");
}

#[test]
fn test_unknown_keyword_argument() {
    let source = "{% macro m(a) %}{% endmacro %}{{ m(b=1) }}";
    let err = render_source(source, ValueMap::new()).unwrap_err();
    assert_eq!(err.message, "macro 'm' takes no keyword argument 'b'");
}

#[test]
fn test_error_inside_macro_has_macro_frame() {
    let source = "{% macro m() %}{{ 1 + none }}{% endmacro %}\n{{ m() }}";
    let err = render_source(source, vars(json!({"none": null}))).unwrap_err();
    let names: Vec<_> = err.stack.iter().map(|f| f.function_name.clone().unwrap()).collect();
    assert_eq!(names, vec!["macro 'm'".to_string(), "template".to_string()]);
    assert_eq!(err.stack[1].line, 2);
}

#[test]
fn test_recursive_loop() {
    let source = "{% for item in tree recursive %}{{ item.name }}\
                  {% if item.children %}({{ loop(item.children) }}){% endif %}{% endfor %}";
    let tree = json!({"tree": [
        {"name": "a", "children": [{"name": "b", "children": [{"name": "c"}]}]},
        {"name": "d"}
    ]});
    assert_eq!(render_source(source, vars(tree)).unwrap(), "a(b(c))d");
}

#[test]
fn test_recursive_loop_depth() {
    let source = "{% for item in tree recursive %}{{ loop.depth }}\
                  {% if item.children %}{{ loop(item.children) }}{% endif %}{% endfor %}";
    let tree = json!({"tree": [{"children": [{"children": []}]}]});
    assert_eq!(render_source(source, vars(tree)).unwrap(), "12");
}

#[test]
fn test_non_recursive_loop_cannot_be_called() {
    let source = "{% for x in [1] %}{{ loop([2]) }}{% endfor %}";
    let err = render_source(source, ValueMap::new()).unwrap_err();
    assert_eq!(
        err.message,
        "The loop must be marked as 'recursive' to be called recursively."
    );
}

#[test]
fn test_macro_called_from_host_code() {
    let host = TestHost::new().with_template("helpers", GREET).build();
    let template = host.load("helpers").unwrap();
    let render_host: Arc<dyn RenderHost> = host.clone();
    let context = Context::for_template(render_host.clone(), &template, ValueMap::new(), false);
    let module = VM::make_module(render_host, &template, context, true).unwrap();

    let exports = module.downcast_object_ref::<TemplateModule>().unwrap();
    let greet = exports.get("greet").unwrap();
    let macro_obj = greet.as_object().unwrap();
    assert_eq!(macro_obj.get_attr("name"), Some(Value::from("greet")));
    let out = macro_obj.call(&[Value::from("Eve")], &Kwargs::new()).unwrap();
    assert_eq!(out.to_string(), "Hello, Eve!");
    assert!(template.cached_module().is_some());
}
