//! Unit tests for environment configuration, loading and rendering

use core_types::{ErrorKind, Function, Kwargs, UndefinedBehavior, Value, ValueMap};
use environment::{Autoescape, CacheSize, DictLoader, Environment, NewlineSequence};
use futures::{FutureExt, StreamExt};
use serde_json::json;

use crate::support::{dict_env, render_str, vars};

#[test]
fn test_whitespace_control_strips_both_sides() {
    let env = Environment::new();
    let out = render_str(&env, "  {%- if true -%}  X  {%- endif -%}  ", json!({})).unwrap();
    assert_eq!(out, "X");
}

#[test]
fn test_finalize_runs_before_escaping() {
    let upper = Function::new("upper", |args: &[Value], _: &Kwargs| {
        Ok(match args.first().and_then(Value::as_str) {
            Some(s) => Value::from(s.to_uppercase()),
            None => args.first().cloned().unwrap_or(Value::None),
        })
    });
    let env = Environment::builder()
        .autoescape(true)
        .finalize(upper)
        .build()
        .unwrap();
    assert_eq!(render_str(&env, r#"{{ "a<b" }}"#, json!({})).unwrap(), "A&lt;B");
    assert_eq!(render_str(&env, "{{ v }}", json!({"v": "a<b"})).unwrap(), "A&lt;B");
}

#[test]
fn test_loop_helpers() {
    let env = Environment::new();
    let out = render_str(
        &env,
        "{% for x in [10,20,30] %}{{ loop.index }}:{{ x }}{% if loop.last %}!{% endif %} {% endfor %}",
        json!({}),
    )
    .unwrap();
    assert_eq!(out, "1:10 2:20 3:30! ");
}

#[test]
fn test_macro_rejects_unexpected_keyword_at_call_time() {
    let env = Environment::new();
    let tmpl = env
        .from_string("{% macro m(a, b=2) %}{{ a }}{{ b }}{% endmacro %}[{{ m(1, c=3) }}]")
        .unwrap();
    let err = tmpl.render(()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn test_oversized_repetition_fails_at_render_not_compile() {
    let env = Environment::new();
    let tmpl = env.from_string("{{ 'ab' * 9999999999999 }}").unwrap();
    assert_eq!(tmpl.render(()).unwrap_err().kind, ErrorKind::InvalidOperation);
    let tmpl = env.from_string("{{ 'ab' * n }}|{{ 'x' | center(n) }}").unwrap();
    let err = tmpl.render(vars(json!({"n": 9999999999999i64}))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
}

#[test]
fn test_strict_undefined_raises_on_output() {
    let env = Environment::builder()
        .undefined(UndefinedBehavior::Strict)
        .build()
        .unwrap();
    let err = render_str(&env, "{{ missing }}", json!({})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedError);
    assert_eq!(render_str(&env, "{{ missing is defined }}", json!({})).unwrap(), "False");
}

#[test]
fn test_default_undefined_prints_nothing() {
    let env = Environment::new();
    assert_eq!(render_str(&env, "[{{ missing }}]", json!({})).unwrap(), "[]");
    let err = render_str(&env, "{{ missing + 1 }}", json!({})).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedError);
}

#[test]
fn test_block_set_does_not_leak() {
    let env = Environment::new();
    let out = render_str(&env, "{% block b %}{% set x = 1 %}{{ x }}{% endblock %}[{{ x }}]", json!({})).unwrap();
    assert_eq!(out, "1[]");
}

#[test]
fn test_inheritance_through_loader() {
    let env = dict_env([
        ("base.html", "<title>{% block title %}{% endblock %}</title>{% block body %}B{% endblock %}"),
        ("page.html", "{% extends 'base.html' %}{% block title %}{{ t }}{% endblock %}"),
    ])
    .build()
    .unwrap();
    let out = env.get_template("page.html").unwrap().render(vars(json!({"t": "Hi"}))).unwrap();
    assert_eq!(out, "<title>Hi</title>B");
}

#[test]
fn test_include_and_import() {
    let env = dict_env([
        ("header", "[{{ title }}]"),
        ("helpers", "{% macro twice(x) %}{{ x }}{{ x }}{% endmacro %}"),
        (
            "page",
            "{% include 'header' %}{% import 'helpers' as h %}{{ h.twice('ab') }}\
             {% include 'missing' ignore missing %}",
        ),
    ])
    .build()
    .unwrap();
    let out = env.get_template("page").unwrap().render(vars(json!({"title": "T"}))).unwrap();
    assert_eq!(out, "[T]abab");
}

#[test]
fn test_missing_template_errors() {
    let env = dict_env([("a", "A")]).build().unwrap();
    let err = env.get_template("nope").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplateNotFound);
    assert_eq!(err.message, "nope");

    let err = env.select_template(&["x", "y"]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplatesNotFound);
    assert_eq!(err.message, "none of the templates given were found: x, y");

    let found = env.select_template(&["x", "a"]).unwrap();
    assert_eq!(found.name(), Some("a"));
}

#[test]
fn test_get_or_select_template_accepts_lists() {
    let env = dict_env([("b", "B")]).build().unwrap();
    let names = Value::from(vec![Value::from("a"), Value::from("b")]);
    assert_eq!(env.get_or_select_template(&names).unwrap().render(()).unwrap(), "B");
    assert_eq!(env.get_or_select_template(&Value::from("b")).unwrap().name(), Some("b"));
    assert!(env.get_or_select_template(&Value::from(1)).is_err());
}

#[test]
fn test_template_cache_is_lru() {
    let env = dict_env([("a", "A"), ("b", "B"), ("c", "C")])
        .cache_size(CacheSize::Bounded(2))
        .build()
        .unwrap();
    env.get_template("a").unwrap();
    env.get_template("b").unwrap();
    env.get_template("a").unwrap();
    env.get_template("c").unwrap();
    assert_eq!(env.cached_templates(), ["a", "c"]);
    env.clear_cache();
    assert!(env.cached_templates().is_empty());
}

#[test]
fn test_zero_cache_size_disables_caching() {
    let env = dict_env([("a", "A")])
        .cache_size(CacheSize::from_limit(0))
        .build()
        .unwrap();
    assert_eq!(env.get_template("a").unwrap().render(()).unwrap(), "A");
    assert!(env.cached_templates().is_empty());
}

#[test]
fn test_auto_reload_picks_up_changes() {
    let loader = DictLoader::new([("a", "one")]);
    let env = Environment::builder().loader(loader.clone()).build().unwrap();
    let first = env.get_template("a").unwrap();
    assert_eq!(first.render(()).unwrap(), "one");

    loader.insert("a", "two");
    assert!(!first.is_up_to_date());
    assert_eq!(env.get_template("a").unwrap().render(()).unwrap(), "two");

    let pinned = Environment::builder()
        .loader(loader.clone())
        .auto_reload(false)
        .build()
        .unwrap();
    assert_eq!(pinned.get_template("a").unwrap().render(()).unwrap(), "two");
    loader.insert("a", "three");
    assert_eq!(pinned.get_template("a").unwrap().render(()).unwrap(), "two");
}

#[test]
fn test_globals_are_shadowed_by_render_vars() {
    let env = Environment::builder().global("site", "Global").build().unwrap();
    assert_eq!(render_str(&env, "{{ site }}", json!({})).unwrap(), "Global");
    assert_eq!(render_str(&env, "{{ site }}", json!({"site": "Local"})).unwrap(), "Local");

    let mut extra = ValueMap::new();
    extra.insert(Value::from("page"), Value::from("P"));
    let tmpl = env.from_string_with_globals("{{ site }}/{{ page }}", extra).unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "Global/P");
}

#[test]
fn test_template_globals_through_loader() {
    let env = dict_env([("t", "{{ who }}")]).build().unwrap();
    let mut extra = ValueMap::new();
    extra.insert(Value::from("who"), Value::from("me"));
    let tmpl = env.get_template_with_globals("t", extra).unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "me");
    assert_eq!(env.get_template("t").unwrap().render(()).unwrap(), "");
}

#[test]
fn test_autoescape_predicate_uses_template_name() {
    let env = dict_env([("a.html", "{{ v }}"), ("a.txt", "{{ v }}")])
        .autoescape(environment::select_autoescape(&["html"], &[], false, false))
        .build()
        .unwrap();
    let ctx = json!({"v": "<i>"});
    assert_eq!(env.get_template("a.html").unwrap().render(vars(ctx.clone())).unwrap(), "&lt;i&gt;");
    assert_eq!(env.get_template("a.txt").unwrap().render(vars(ctx)).unwrap(), "<i>");
    assert!(matches!(Autoescape::from(true), Autoescape::Enabled));
}

#[test]
fn test_newline_sequence_and_trailing_newline() {
    let env = Environment::builder()
        .newline_sequence(NewlineSequence::CrLf)
        .build()
        .unwrap();
    assert_eq!(render_str(&env, "a\nb\n", json!({})).unwrap(), "a\r\nb");

    let env = Environment::builder().keep_trailing_newline(true).build().unwrap();
    assert_eq!(render_str(&env, "a\n", json!({})).unwrap(), "a\n");
}

#[test]
fn test_trim_and_lstrip_blocks() {
    let env = Environment::builder()
        .trim_blocks(true)
        .lstrip_blocks(true)
        .build()
        .unwrap();
    let out = render_str(&env, "<ul>\n    {% for i in [1, 2] %}\n<li>{{ i }}</li>\n    {% endfor %}\n</ul>", json!({}))
        .unwrap();
    assert_eq!(out, "<ul>\n<li>1</li>\n<li>2</li>\n</ul>");
}

#[test]
fn test_custom_delimiters() {
    let env = Environment::builder()
        .block_delimiters("<%", "%>")
        .variable_delimiters("${", "}")
        .comment_delimiters("<#", "#>")
        .build()
        .unwrap();
    let out = render_str(&env, "<# note #><% if x %>${ x }<% endif %>", json!({"x": 7})).unwrap();
    assert_eq!(out, "7");
}

#[test]
fn test_generate_yields_chunks() {
    let env = Environment::new();
    let tmpl = env.from_string("{% for x in [1, 2, 3] %}{{ x }}{% endfor %}").unwrap();
    let chunks: Vec<String> = tmpl.generate(()).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(chunks.concat(), "123");
}

#[test]
fn test_render_async_with_async_filter() {
    let slow = Function::new_async("slow", |args: Vec<Value>, _: Kwargs| {
        let out = Value::from(format!("<{}>", args.first().cloned().unwrap_or(Value::None)));
        async move { Ok(out) }.boxed()
    });
    let env = Environment::builder()
        .enable_async(true)
        .filter("slow", slow)
        .build()
        .unwrap();
    let tmpl = env.from_string("{{ 'x' | slow }}{{ y | slow }}").unwrap();
    let out = futures::executor::block_on(tmpl.render_async(vars(json!({"y": 1})))).unwrap();
    assert_eq!(out, "<x><1>");

    let stream = tmpl.generate_async(vars(json!({"y": 2}))).unwrap();
    let chunks: Vec<String> = futures::executor::block_on(stream.map(|c| c.unwrap()).collect());
    assert_eq!(chunks.concat(), "<x><2>");
    assert_eq!(tmpl.render(vars(json!({"y": 3}))).unwrap(), "<x><3>");
}

#[test]
fn test_compile_expression() {
    let env = Environment::new();
    let expr = env.compile_expression("items | length > limit", false).unwrap();
    let result = expr.call(vars(json!({"items": [1, 2, 3], "limit": 2}))).unwrap();
    assert_eq!(result, Value::from(true));

    let err = env.compile_expression("1 2", false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn test_lex_parse_and_compile() {
    let env = Environment::new();
    let tokens = env.lex("{{ a }} text", None).unwrap();
    assert!(tokens.iter().any(|t| t.value == "a"));
    let ast = env.parse("{% if a %}x{% endif %}", None, None).unwrap();
    assert_eq!(ast.body.len(), 1);
    let code = env.compile("{{ a }}", Some("t"), None).unwrap();
    assert_eq!(code.name.as_deref(), Some("t"));
    assert!(code.instruction_count() > 0);

    let err = env.parse("{% if %}", Some("bad.html"), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn test_list_templates_filters_by_extension() {
    let env = dict_env([("a.html", ""), ("b.txt", ""), ("c.html", "")]).build().unwrap();
    assert_eq!(env.list_templates(None).unwrap(), ["a.html", "b.txt", "c.html"]);
    assert_eq!(env.list_templates_with_extensions(&["html"]).unwrap(), ["a.html", "c.html"]);
}

#[test]
fn test_call_filter_and_test_from_rust() {
    let env = Environment::new();
    let out = env
        .call_filter("join", Value::from(vec![Value::from(1), Value::from(2)]), &[Value::from("-")], &Kwargs::new())
        .unwrap();
    assert_eq!(out, Value::from("1-2"));
    assert!(env.call_test("odd", Value::from(3), &[], &Kwargs::new()).unwrap());
    assert!(env.call_filter("nope", Value::None, &[], &Kwargs::new()).is_err());
}

#[test]
fn test_concurrent_renders_share_the_environment() {
    let env = dict_env([("t", "{{ n * 2 }}")]).build().unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let env = env.clone();
                scope.spawn(move || env.get_template("t").unwrap().render(vars(json!({"n": n}))).unwrap())
            })
            .collect();
        let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outputs, ["0", "2", "4", "6"]);
    });
    assert_eq!(env.cached_templates(), ["t"]);
}
