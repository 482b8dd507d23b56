//! Unit tests for extends, blocks, include and import

use core_types::{ErrorKind, ValueMap};
use serde_json::json;

use crate::support::{render, vars, TestHost};

const BASE: &str = "<{% block title %}Base{% endblock %}>";

#[test]
fn test_child_overrides_block() {
    let host = TestHost::new()
        .with_template("base", BASE)
        .with_template("child", "{% extends 'base' %}{% block title %}Child{% endblock %}")
        .build();
    assert_eq!(render(&host, "child", ValueMap::new()).unwrap(), "<Child>");
}

#[test]
fn test_super_renders_parent_block() {
    let host = TestHost::new()
        .with_template("base", BASE)
        .with_template("child", "{% extends 'base' %}{% block title %}[{{ super() }}]{% endblock %}")
        .build();
    assert_eq!(render(&host, "child", ValueMap::new()).unwrap(), "<[Base]>");
}

#[test]
fn test_three_levels_of_inheritance() {
    let host = TestHost::new()
        .with_template("base", BASE)
        .with_template("middle", "{% extends 'base' %}{% block title %}Mid{{ super() }}{% endblock %}")
        .with_template("child", "{% extends 'middle' %}{% block title %}Child{{ super() }}{% endblock %}")
        .build();
    assert_eq!(render(&host, "child", ValueMap::new()).unwrap(), "<ChildMidBase>");
}

#[test]
fn test_block_sees_context_variables() {
    let host = TestHost::new()
        .with_template("base", BASE)
        .with_template("child", "{% extends 'base' %}{% block title %}{{ who }}{% endblock %}")
        .build();
    let out = render(&host, "child", vars(json!({"who": "me"}))).unwrap();
    assert_eq!(out, "<me>");
}

#[test]
fn test_self_renders_block_again() {
    let host = TestHost::new()
        .with_template("page", "{% block a %}A{% endblock %}|{{ self.a() }}")
        .build();
    assert_eq!(render(&host, "page", ValueMap::new()).unwrap(), "A|A");
}

#[test]
fn test_required_block_must_be_overridden() {
    let host = TestHost::new()
        .with_template("base", "{% block body required %}{% endblock %}")
        .with_template("child", "{% extends 'base' %}{% block body %}ok{% endblock %}")
        .build();
    assert_eq!(render(&host, "child", ValueMap::new()).unwrap(), "ok");
    let err = render(&host, "base", ValueMap::new()).unwrap_err();
    assert_eq!(err.message, "Required block 'body' not found");
}

#[test]
fn test_include_shares_context() {
    let host = TestHost::new()
        .with_template("part", "Hi {{ name }}")
        .with_template("page", "{% include 'part' %}!")
        .build();
    let out = render(&host, "page", vars(json!({"name": "Ann"}))).unwrap();
    assert_eq!(out, "Hi Ann!");
}

#[test]
fn test_include_ignore_missing() {
    let host = TestHost::new()
        .with_template("page", "{% include 'nope' ignore missing %}x")
        .with_template("strict", "{% include 'nope' %}x")
        .build();
    assert_eq!(render(&host, "page", ValueMap::new()).unwrap(), "x");
    let err = render(&host, "strict", ValueMap::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplateNotFound);
}

#[test]
fn test_traceback_through_include() {
    let host = TestHost::new()
        .with_template("part", "\n{{ missing.attr }}")
        .with_template("page", "{% include 'part' %}")
        .build();
    let err = render(&host, "page", ValueMap::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedError);
    let templates: Vec<_> = err.stack.iter().map(|f| f.template.clone()).collect();
    assert_eq!(templates, vec![Some("part".to_string()), Some("page".to_string())]);
    let position = err.source_position.unwrap();
    assert_eq!(position.name.as_deref(), Some("part"));
    assert_eq!(position.line, 2);
}

const HELPERS: &str = "{% macro hello(n) %}Hello {{ n }}{% endmacro %}{% set _private = 1 %}";

#[test]
fn test_import_as_module() {
    let host = TestHost::new()
        .with_template("helpers", HELPERS)
        .with_template("page", "{% import 'helpers' as h %}{{ h.hello('x') }}")
        .build();
    assert_eq!(render(&host, "page", ValueMap::new()).unwrap(), "Hello x");
}

#[test]
fn test_from_import() {
    let host = TestHost::new()
        .with_template("helpers", HELPERS)
        .with_template("page", "{% from 'helpers' import hello %}{{ hello('y') }}")
        .build();
    assert_eq!(render(&host, "page", ValueMap::new()).unwrap(), "Hello y");
}

#[test]
fn test_from_import_missing_name() {
    let host = TestHost::new()
        .strict()
        .with_template("helpers", HELPERS)
        .with_template("page", "{% from 'helpers' import nope %}{{ nope }}")
        .build();
    let err = render(&host, "page", ValueMap::new()).unwrap_err();
    assert!(err
        .message
        .contains("does not export the requested name 'nope'"));
}
