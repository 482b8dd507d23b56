//! Comprehensive End-to-End Template Rendering Tests
//!
//! Tests the complete engine stack: Lexer -> Parser -> Code generator -> VM -> Output
//! Covers the major language features including:
//! - String, sequence and number filters
//! - Tests and the builtin globals
//! - Macros, call blocks and imports
//! - Template inheritance and includes
//! - Autoescaping
//! - Streaming and async rendering

use core_types::{ErrorKind, Value};
use environment::{DictLoader, Environment};
use integration_tests::render;
use serde_json::json;

/// Render and unwrap, naming the source on failure
fn ok(source: &str, context: serde_json::Value) -> String {
    match render(source, context) {
        Ok(out) => out,
        Err(err) => panic!("rendering {:?} failed: {}", source, err),
    }
}

fn site() -> Environment {
    Environment::builder()
        .loader(DictLoader::new([
            (
                "base.html",
                "<h1>{% block title %}Default{% endblock %}</h1>{% block content %}{% endblock %}",
            ),
            (
                "child.html",
                "{% extends 'base.html' %}{% block title %}Child{% endblock %}\
                 {% block content %}{% for p in pages %}{% include 'row.html' %}{% endfor %}{% endblock %}",
            ),
            ("row.html", "[{{ p }}]"),
            ("grandchild.html", "{% extends 'child.html' %}{% block title %}{{ super() }}+{% endblock %}"),
            (
                "helpers.html",
                "{% macro hello(n) %}Hello {{ n }}{% endmacro %}{% set version = 2 %}{% set _hidden = 1 %}",
            ),
            ("dynamic.html", "{% extends layout %}{% block title %}Dyn{% endblock %}"),
        ]))
        .build()
        .unwrap()
}

// =============================================================================
// 1. String Filters
// =============================================================================

#[test]
fn test_case_filters() {
    assert_eq!(ok("{{ 'hello world' | upper }}", json!({})), "HELLO WORLD");
    assert_eq!(ok("{{ 'HeLLo' | lower }}", json!({})), "hello");
    assert_eq!(ok("{{ 'hello world' | title }}", json!({})), "Hello World");
    assert_eq!(ok("{{ 'hELLO' | capitalize }}", json!({})), "Hello");
}

#[test]
fn test_text_shaping_filters() {
    assert_eq!(ok("{{ '  x  ' | trim }}|", json!({})), "x|");
    assert_eq!(ok("{{ 'a' | center(5) }}|", json!({})), "  a  |");
    assert_eq!(ok("{{ 'aXbX' | replace('X', '-') }}", json!({})), "a-b-");
    assert_eq!(ok("{{ 'aXbX' | replace('X', '-', 1) }}", json!({})), "a-bX");
    assert_eq!(ok("{{ 'one two three' | wordcount }}", json!({})), "3");
    assert_eq!(ok("{{ 'a\nb' | indent(2) }}", json!({})), "a\n  b");
    assert_eq!(ok("{{ 'foo bar baz qux' | truncate(9, leeway=0) }}", json!({})), "foo...");
}

#[test]
fn test_striptags_and_format() {
    assert_eq!(ok("{{ '<b>a</b>   <i>b</i>' | striptags }}", json!({})), "a b");
    assert_eq!(ok("{{ '%s-%d' | format('a', 3) }}", json!({})), "a-3");
}

#[test]
fn test_escaping_filters() {
    assert_eq!(ok("{{ '<a href=\"x\">' | e }}", json!({})), "&lt;a href=&#34;x&#34;&gt;");
    assert_eq!(ok("{{ {'class': 'big', 'skip': none} | xmlattr }}", json!({})), " class=\"big\"");
    assert!(ok("{{ {'a': '<'} | tojson }}", json!({})).contains("\\u003c"));
}

// =============================================================================
// 2. Sequence Filters
// =============================================================================

#[test]
fn test_sequence_accessors() {
    let ctx = json!({"xs": [3, 1, 2]});
    assert_eq!(ok("{{ xs | first }}{{ xs | last }}{{ xs | length }}", ctx.clone()), "323");
    assert_eq!(ok("{{ xs | sort | join(',') }}", ctx.clone()), "1,2,3");
    assert_eq!(ok("{{ xs | sort(reverse=true) | join(',') }}", ctx.clone()), "3,2,1");
    assert_eq!(ok("{{ xs | min }}{{ xs | max }}{{ xs | sum }}", ctx.clone()), "136");
    assert_eq!(ok("{{ xs | reverse | join }}", ctx), "213");
}

#[test]
fn test_select_and_map() {
    let ctx = json!({
        "nums": [1, 2, 3, 4, 5],
        "users": [
            {"name": "ann", "active": true},
            {"name": "bob", "active": false},
            {"name": "cy", "active": true}
        ]
    });
    assert_eq!(ok("{{ nums | select('odd') | join(',') }}", ctx.clone()), "1,3,5");
    assert_eq!(ok("{{ nums | reject('odd') | join(',') }}", ctx.clone()), "2,4");
    assert_eq!(ok("{{ nums | select('>', 3) | join(',') }}", ctx.clone()), "4,5");
    assert_eq!(
        ok("{{ users | selectattr('active') | map(attribute='name') | join(',') }}", ctx.clone()),
        "ann,cy"
    );
    assert_eq!(
        ok("{{ users | rejectattr('active') | map(attribute='name') | map('upper') | join }}", ctx),
        "BOB"
    );
}

#[test]
fn test_grouping_filters() {
    let ctx = json!({"people": [
        {"name": "a", "city": "Oslo"},
        {"name": "b", "city": "Rome"},
        {"name": "c", "city": "Oslo"}
    ]});
    assert_eq!(
        ok(
            "{% for city, members in people | groupby('city') %}{{ city }}:{{ members | map(attribute='name') | join }};{% endfor %}",
            ctx
        ),
        "Oslo:ac;Rome:b;"
    );
    assert_eq!(
        ok("{% for row in [1, 2, 3, 4, 5] | batch(2, 0) %}{{ row | join }}|{% endfor %}", json!({})),
        "12|34|50|"
    );
    assert_eq!(ok("{{ [1, 1, 2, 1] | unique | join }}", json!({})), "12");
}

#[test]
fn test_mapping_filters() {
    let ctx = json!({"d": {"b": 1, "a": 2}});
    assert_eq!(ok("{% for k, v in d | dictsort %}{{ k }}{{ v }}{% endfor %}", ctx.clone()), "a2b1");
    assert_eq!(ok("{% for k, v in d | items %}{{ k }}{% endfor %}", ctx.clone()), "ba");
    assert_eq!(ok("{{ d | length }}", ctx), "2");
}

// =============================================================================
// 3. Number Filters
// =============================================================================

#[test]
fn test_number_filters() {
    assert_eq!(ok("{{ '42' | int + 1 }}", json!({})), "43");
    assert_eq!(ok("{{ 'x' | int(7) }}", json!({})), "7");
    assert_eq!(ok("{{ '3.5' | float }}", json!({})), "3.5");
    assert_eq!(ok("{{ -3 | abs }}", json!({})), "-3");
    assert_eq!(ok("{{ (-3) | abs }}", json!({})), "3");
    assert_eq!(ok("{{ 2.5 | round }}", json!({})), "3.0");
    assert_eq!(ok("{{ 2.7 | round(method='floor') }}", json!({})), "2.0");
    assert_eq!(ok("{{ 1000000 | filesizeformat }}", json!({})), "1.0 MB");
}

#[test]
fn test_default_filter() {
    assert_eq!(ok("{{ missing | default('x') }}", json!({})), "x");
    assert_eq!(ok("{{ '' | default('x') }}|", json!({})), "|");
    assert_eq!(ok("{{ '' | default('x', true) }}", json!({})), "x");
    assert_eq!(ok("{{ missing | d('y') }}", json!({})), "y");
}

#[test]
fn test_unknown_filter_is_compile_error() {
    let err = render("{{ x | nope }}", json!({})).unwrap_err();
    assert!(err.message.contains("nope"));
}

// =============================================================================
// 4. Tests and Globals
// =============================================================================

#[test]
fn test_builtin_tests() {
    let ctx = json!({"n": 4, "s": "abc", "none": null, "m": {"a": 1}});
    assert_eq!(ok("{{ n is even }}{{ n is odd }}{{ n is divisibleby 2 }}", ctx.clone()), "TrueFalseTrue");
    assert_eq!(ok("{{ s is string }}{{ n is number }}{{ m is mapping }}", ctx.clone()), "TrueTrueTrue");
    assert_eq!(ok("{{ missing is defined }}{{ missing is undefined }}", ctx.clone()), "FalseTrue");
    assert_eq!(ok("{{ none is none }}{{ 'a' is in s }}{{ n is not odd }}", ctx), "TrueTrueTrue");
}

#[test]
fn test_range_dict_lipsum() {
    assert_eq!(ok("{{ range(5) | join }}{{ range(1, 10, 3) | join }}", json!({})), "01234147");
    assert_eq!(ok("{{ dict(a=1)['a'] }}", json!({})), "1");
    assert!(!ok("{{ lipsum(1, false) }}", json!({})).is_empty());
}

#[test]
fn test_cycler_and_joiner() {
    assert_eq!(
        ok(
            "{% set c = cycler('odd', 'even') %}{% for i in range(3) %}{{ c.next() }} {% endfor %}{{ c.current }}",
            json!({})
        ),
        "odd even odd even"
    );
    assert_eq!(
        ok("{% set pipe = joiner('|') %}{% for i in range(3) %}{{ pipe() }}{{ i }}{% endfor %}", json!({})),
        "0|1|2"
    );
}

#[test]
fn test_loop_changed_and_previtem() {
    assert_eq!(
        ok(
            "{% for x in [1, 1, 2] %}{% if loop.changed(x) %}{{ x }}{% endif %}{{ loop.previtem | default('-') }}{% endfor %}",
            json!({})
        ),
        "1-121"
    );
}

// =============================================================================
// 5. Macros and Imports
// =============================================================================

#[test]
fn test_macro_caller_with_arguments() {
    assert_eq!(
        ok(
            "{% macro list(items) %}<ul>{% for i in items %}{{ caller(i) }}{% endfor %}</ul>{% endmacro %}\
             {% call(item) list([1, 2]) %}<li>{{ item }}</li>{% endcall %}",
            json!({})
        ),
        "<ul><li>1</li><li>2</li></ul>"
    );
}

#[test]
fn test_macro_kwargs_and_introspection() {
    assert_eq!(
        ok(
            "{% macro m(a) %}{{ a }}{{ kwargs | dictsort | map('join', '=') | join(',') }}{% endmacro %}{{ m(1, x=2) }}|{{ m.name }}",
            json!({})
        ),
        "1x=2|m"
    );
}

#[test]
fn test_imports() {
    let env = site();
    let tmpl = env
        .from_string("{% import 'helpers.html' as h %}{{ h.hello('you') }} v{{ h.version }}")
        .unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "Hello you v2");

    let tmpl = env.from_string("{% from 'helpers.html' import hello, version as v %}{{ hello('me') }}{{ v }}").unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "Hello me2");

    let err = env.from_string("{% from 'helpers.html' import _hidden %}").unwrap_err();
    assert_eq!(err.kind, ErrorKind::CompileError);
    assert!(err.message.contains("underline"));
}

#[test]
fn test_module_access_from_host() {
    let env = site();
    let module = env.get_template("helpers.html").unwrap().module().unwrap();
    assert_eq!(module.get("version"), Some(Value::from(2)));
    let hello = module
        .call("hello", vec![Value::from("host")], core_types::Kwargs::new())
        .unwrap();
    assert_eq!(hello.to_string(), "Hello host");
}

// =============================================================================
// 6. Inheritance and Includes
// =============================================================================

#[test]
fn test_inheritance_chain() {
    let env = site();
    let ctx = Value::from_json(json!({"pages": ["a", "b"]}));
    assert_eq!(env.get_template("child.html").unwrap().render(ctx.clone()).unwrap(), "<h1>Child</h1>[a][b]");
    assert_eq!(env.get_template("grandchild.html").unwrap().render(ctx).unwrap(), "<h1>Child+</h1>[a][b]");
}

#[test]
fn test_dynamic_extends() {
    let env = site();
    let out = env
        .get_template("dynamic.html")
        .unwrap()
        .render(Value::from_json(json!({"layout": "base.html"})))
        .unwrap();
    assert_eq!(out, "<h1>Dyn</h1>");
}

#[test]
fn test_include_variants() {
    let env = site();
    let tmpl = env
        .from_string("{% include 'missing.html' ignore missing %}{% include ['nope.html', 'row.html'] %}")
        .unwrap();
    assert_eq!(tmpl.render(Value::from_json(json!({"p": 1}))).unwrap(), "[1]");

    let tmpl = env.from_string("{% set p = 'local' %}{% include 'row.html' without context %}").unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "[]");
}

#[test]
fn test_self_and_block_reuse() {
    let out = ok("{% block t %}T{% endblock %}|{{ self.t() }}", json!({}));
    assert_eq!(out, "T|T");
}

// =============================================================================
// 7. Autoescaping
// =============================================================================

#[test]
fn test_autoescape_environment() {
    let env = Environment::builder().autoescape(true).build().unwrap();
    let tmpl = env
        .from_string("{{ v }}|{{ v | safe }}|{{ v | forceescape }}|{% autoescape false %}{{ v }}{% endautoescape %}")
        .unwrap();
    let out = tmpl.render(Value::from_json(json!({"v": "<i>"}))).unwrap();
    assert_eq!(out, "&lt;i&gt;|<i>|&lt;i&gt;|<i>");
}

#[test]
fn test_autoescape_markup_concatenation() {
    let env = Environment::builder().autoescape(true).build().unwrap();
    let tmpl = env
        .from_string("{% set s = '<b>' | safe %}{{ s ~ v }}|{{ [s, v] | join }}")
        .unwrap();
    let out = tmpl.render(Value::from_json(json!({"v": "<i>"}))).unwrap();
    assert_eq!(out, "<b>&lt;i&gt;|<b>&lt;i&gt;");
}

// =============================================================================
// 8. Streaming and Async
// =============================================================================

#[test]
fn test_template_stream_buffering() {
    let env = Environment::new();
    let tmpl = env.from_string("{% for i in range(5) %}{{ i }}{% endfor %}").unwrap();
    let mut stream = tmpl.stream(()).unwrap();
    stream.enable_buffering(2).unwrap();
    let parts: Vec<String> = stream.by_ref().collect::<core_types::Result<_>>().unwrap();
    assert_eq!(parts.concat(), "01234");
    assert!(parts.len() < 5);
    assert!(tmpl.stream(()).unwrap().enable_buffering(1).is_err());
}

#[test]
fn test_async_render_of_sync_template() {
    let env = Environment::builder().enable_async(true).build().unwrap();
    let tmpl = env.from_string("{{ items | map('upper') | join(',') }}").unwrap();
    let out = futures::executor::block_on(tmpl.render_async(Value::from_json(json!({"items": ["a", "b"]})))).unwrap();
    assert_eq!(out, "A,B");
}
