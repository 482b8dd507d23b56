//! Unit tests for expression evaluation, output and control flow

use core_types::{ErrorKind, ValueMap};
use futures::StreamExt;
use serde_json::json;

use crate::support::{render, render_source, start, vars, TestHost};

#[test]
fn test_variables_and_text() {
    let out = render_source("Hello {{ name }}!", vars(json!({"name": "World"}))).unwrap();
    assert_eq!(out, "Hello World!");
}

#[test]
fn test_missing_variable_prints_empty() {
    assert_eq!(render_source("[{{ nope }}]", ValueMap::new()).unwrap(), "[]");
}

#[test]
fn test_set_and_arithmetic() {
    let out = render_source("{% set x = 2 %}{{ x * 3 }}", ValueMap::new()).unwrap();
    assert_eq!(out, "6");
}

#[test]
fn test_for_loop_with_loop_variable() {
    let source = "{% for x in items %}{{ loop.index }}:{{ x }}{% if not loop.last %},{% endif %}\
                  {% else %}empty{% endfor %}";
    let out = render_source(source, vars(json!({"items": ["a", "b"]}))).unwrap();
    assert_eq!(out, "1:a,2:b");
    let out = render_source(source, vars(json!({"items": []}))).unwrap();
    assert_eq!(out, "empty");
}

#[test]
fn test_loop_over_mapping_items_unpacks_pairs() {
    let source = "{% for a, b in pairs %}{{ a }}={{ b }};{% endfor %}";
    let out = render_source(source, vars(json!({"pairs": [[1, 2], [3, 4]]}))).unwrap();
    assert_eq!(out, "1=2;3=4;");
}

#[test]
fn test_unpack_count_mismatch() {
    let source = "{% for a, b in pairs %}{% endfor %}";
    let err = render_source(source, vars(json!({"pairs": [[1, 2, 3]]}))).unwrap_err();
    assert_eq!(err.message, "too many values to unpack (expected 2)");
}

#[test]
fn test_inline_loop_filter_uses_test() {
    let host = TestHost::new()
        .with_template("page", "{% for x in items if x is odd %}{{ x }}{% endfor %}")
        .build();
    let out = render(&host, "page", vars(json!({"items": [1, 2, 3, 4, 5]}))).unwrap();
    assert_eq!(out, "135");
}

#[test]
fn test_filter_call() {
    let host = TestHost::new().with_template("page", "{{ name|upper }}").build();
    let out = render(&host, "page", vars(json!({"name": "World"}))).unwrap();
    assert_eq!(out, "WORLD");
}

#[test]
fn test_autoescape_escapes_output() {
    let host = TestHost::new()
        .autoescaping()
        .with_template("page", "{{ html }}")
        .build();
    let out = render(&host, "page", vars(json!({"html": "<b>"}))).unwrap();
    assert_eq!(out, "&lt;b&gt;");
}

#[test]
fn test_method_call_on_mapping() {
    let source = "{% for k, v in data.items() %}{{ k }}{{ v }}{% endfor %}";
    let out = render_source(source, vars(json!({"data": {"a": 1, "b": 2}}))).unwrap();
    assert_eq!(out, "a1b2");
}

#[test]
fn test_strict_undefined_reports_position() {
    let host = TestHost::new()
        .strict()
        .with_template("page", "line one\n{{ missing }}")
        .build();
    let err = render(&host, "page", ValueMap::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedError);
    assert_eq!(err.message, "'missing' is undefined");
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.stack.len(), 1);
    assert_eq!(err.stack[0].function_name.as_deref(), Some("template"));
}

#[test]
fn test_calling_a_number_fails() {
    let err = render_source("{{ n() }}", vars(json!({"n": 1}))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "'int' object is not callable");
}

#[test]
fn test_output_streams_in_chunks() {
    let host = TestHost::new().with_template("page", "a{{ x }}b").build();
    let chunks: Vec<String> = start(&host, "page", vars(json!({"x": 1})))
        .unwrap()
        .into_chunks()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), "a1b");
}

#[test]
fn test_async_filter_is_awaited() {
    let host = TestHost::new()
        .asynchronous()
        .with_template("page", "{{ name|slow_upper }}!")
        .build();
    let mut vm = start(&host, "page", vars(json!({"name": "abc"}))).unwrap();
    let out = futures::executor::block_on(vm.run_async()).unwrap();
    assert_eq!(out, "ABC!");

    let stream = start(&host, "page", vars(json!({"name": "xyz"}))).unwrap().into_stream();
    let chunks: Vec<String> = futures::executor::block_on(stream.collect::<Vec<_>>())
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chunks.concat(), "XYZ!");
}

#[test]
fn test_async_filter_in_sync_environment_fails() {
    let host = TestHost::new().with_template("page", "{{ name|slow_upper }}").build();
    let err = render(&host, "page", vars(json!({"name": "abc"}))).unwrap_err();
    assert!(err.message.contains("synchronous environment"));
}
