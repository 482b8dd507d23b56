//! Unit tests for the sequence and mapping filters

use builtins::{lookup_path, Group};
use core_types::{Kwargs, Value};
use serde_json::json;

use crate::support::{apply, apply_escaped, apply_kw, json as v, s, CatalogEnv};

fn users() -> Value {
    v(json!([
        {"name": "ann", "city": "Oslo", "age": 31},
        {"name": "Bob", "city": "bergen", "age": 25},
        {"name": "cid", "city": "oslo", "age": 40},
    ]))
}

fn repr(value: Value) -> String {
    value.repr()
}

#[test]
fn test_lookup_path_walks_dotted_segments() {
    let env = CatalogEnv::new();
    let data = v(json!({"a": {"b": [10, 20]}}));
    assert_eq!(lookup_path(&env, &data, &s("a.b.1")).unwrap(), Value::from(20));
    assert!(lookup_path(&env, &data, &s("a.c")).unwrap().is_undefined());
}

#[test]
fn test_sort_by_attribute_case_insensitive() {
    let sorted = apply_kw("sort", &[users()], &[("attribute", s("city"))]).unwrap();
    let names = apply_kw("map", &[sorted], &[("attribute", s("name"))]).unwrap();
    assert_eq!(repr(names), "['Bob', 'ann', 'cid']");
}

#[test]
fn test_sort_multiple_attributes_and_reverse() {
    let sorted = apply_kw(
        "sort",
        &[users()],
        &[("attribute", s("city, age")), ("reverse", Value::from(true))],
    )
    .unwrap();
    let ages = apply_kw("map", &[sorted], &[("attribute", s("age"))]).unwrap();
    assert_eq!(repr(ages), "[40, 31, 25]");
}

#[test]
fn test_dictsort() {
    let data = v(json!({"b": 1, "A": 3, "c": 2}));
    assert_eq!(
        repr(apply("dictsort", &[data.clone()]).unwrap()),
        "[('A', 3), ('b', 1), ('c', 2)]"
    );
    assert_eq!(
        repr(apply_kw("dictsort", &[data.clone()], &[("by", s("value"))]).unwrap()),
        "[('b', 1), ('c', 2), ('A', 3)]"
    );
    let err = apply_kw("dictsort", &[data], &[("by", s("size"))]).unwrap_err();
    assert_eq!(err.message, "You can only sort by either 'key' or 'value'");
}

#[test]
fn test_groupby_case_insensitive_keeps_first_spelling() {
    let groups = apply("groupby", &[users(), s("city")]).unwrap();
    let groups = core_types::ops::to_vec(&groups).unwrap();
    assert_eq!(groups.len(), 2);
    let first = groups[0].downcast_object_ref::<Group>().unwrap();
    assert_eq!(first.grouper(), &s("bergen"));
    let second = groups[1].downcast_object_ref::<Group>().unwrap();
    assert_eq!(second.grouper(), &s("Oslo"));
    assert_eq!(core_types::ops::len(second.list()).unwrap(), 2);
}

#[test]
fn test_groupby_default_for_missing_attribute() {
    let rows = v(json!([{"k": 1}, {}]));
    let groups = apply_kw("groupby", &[rows, s("k")], &[("default", Value::from(0))]).unwrap();
    assert_eq!(repr(groups), "[(0, [{}]), (1, [{'k': 1}])]");
}

#[test]
fn test_unique_min_max_sum() {
    let words = v(json!(["a", "B", "b", "A", "c"]));
    assert_eq!(repr(apply("unique", &[words.clone()]).unwrap()), "['a', 'B', 'c']");
    assert_eq!(apply("min", &[words.clone()]).unwrap(), s("a"));
    assert_eq!(
        apply_kw("max", &[words], &[("case_sensitive", Value::from(true))]).unwrap(),
        s("c")
    );
    assert_eq!(
        apply_kw("sum", &[users()], &[("attribute", s("age"))]).unwrap(),
        Value::from(96)
    );
    assert_eq!(
        apply_kw("sum", &[v(json!([1, 2]))], &[("start", Value::from(10))]).unwrap(),
        Value::from(13)
    );
}

#[test]
fn test_empty_aggregates_are_undefined() {
    let empty = Value::from(Vec::<Value>::new());
    assert!(apply("first", &[empty.clone()]).unwrap().is_undefined());
    assert!(apply("last", &[empty.clone()]).unwrap().is_undefined());
    assert!(apply("min", &[empty.clone()]).unwrap().is_undefined());
    assert!(apply("random", &[empty]).unwrap().is_undefined());
}

#[test]
fn test_batch_and_slice() {
    let items = v(json!([1, 2, 3, 4, 5]));
    assert_eq!(
        repr(apply("batch", &[items.clone(), Value::from(2), s("-")]).unwrap()),
        "[[1, 2], [3, 4], [5, '-']]"
    );
    assert_eq!(
        repr(apply("slice", &[items.clone(), Value::from(3)]).unwrap()),
        "[[1, 2], [3, 4], [5]]"
    );
    assert_eq!(
        repr(apply("slice", &[items, Value::from(3), Value::from(0)]).unwrap()),
        "[[1, 2], [3, 4], [5, 0]]"
    );
}

#[test]
fn test_map_with_filter_name() {
    let out = apply("map", &[v(json!(["a", "b"])), s("upper")]).unwrap();
    assert_eq!(repr(out), "['A', 'B']");
    let err = apply("map", &[v(json!([1]))]).unwrap_err();
    assert_eq!(err.message, "map requires a filter argument");
}

#[test]
fn test_select_and_reject() {
    let numbers = v(json!([1, 2, 3, 4, 5]));
    assert_eq!(repr(apply("select", &[numbers.clone(), s("odd")]).unwrap()), "[1, 3, 5]");
    assert_eq!(
        repr(apply("reject", &[numbers.clone(), s("lessthan"), Value::from(3)]).unwrap()),
        "[3, 4, 5]"
    );
    assert_eq!(repr(apply("select", &[v(json!([0, 1, "", "x"]))]).unwrap()), "[1, 'x']");
}

#[test]
fn test_selectattr_and_rejectattr() {
    let rows = v(json!([{"on": true, "n": 1}, {"on": false, "n": 2}, {"n": 3}]));
    let on = apply("selectattr", &[rows.clone(), s("on")]).unwrap();
    assert_eq!(repr(apply_kw("map", &[on], &[("attribute", s("n"))]).unwrap()), "[1]");
    let undefined = apply("selectattr", &[rows.clone(), s("on"), s("undefined")]).unwrap();
    assert_eq!(core_types::ops::len(&undefined).unwrap(), 1);
    let off = apply("rejectattr", &[rows, s("on")]).unwrap();
    assert_eq!(core_types::ops::len(&off).unwrap(), 2);
    let err = apply("selectattr", &[v(json!([]))]).unwrap_err();
    assert_eq!(err.message, "Missing parameter for attribute name");
}

#[test]
fn test_join_escapes_when_autoescaping() {
    let env = CatalogEnv::new();
    let items = Value::from(vec![s("<a>"), Value::from_safe_string("<b>")]);
    let out = apply_escaped(&env, true, "join", &[items.clone(), s(", ")], &Kwargs::new()).unwrap();
    assert!(out.is_safe());
    assert_eq!(out.as_str(), Some("&lt;a&gt;, <b>"));
    let plain = apply_escaped(&env, false, "join", &[items, s("|")], &Kwargs::new()).unwrap();
    assert_eq!(plain, s("<a>|<b>"));
    assert_eq!(
        apply_kw("join", &[users(), s(",")], &[("attribute", s("name"))]).unwrap(),
        s("ann,Bob,cid")
    );
}

#[test]
fn test_join_needs_no_render_context() {
    use core_types::{EnvironmentAccess, EvalContext};

    let env = CatalogEnv::new();
    let out = env
        .call_filter("join", &[v(json!([1, 2])), s("-")], &Kwargs::new(), &EvalContext::new(false), None)
        .unwrap();
    assert_eq!(out, s("1-2"));
}

#[test]
fn test_huge_counts_do_not_preallocate() {
    let big = Value::from(9_999_999_999_999i64);
    assert_eq!(repr(apply("batch", &[v(json!([1])), big.clone()]).unwrap()), "[[1]]");
    let err = apply("batch", &[v(json!([1])), big.clone(), s("-")]).unwrap_err();
    assert_eq!(err.kind, core_types::ErrorKind::InvalidOperation);
    assert!(apply("slice", &[v(json!([1])), big]).is_err());
}

#[test]
fn test_items_reverse_list_length() {
    assert_eq!(repr(apply("items", &[v(json!({"a": 1}))]).unwrap()), "[('a', 1)]");
    assert!(apply("items", &[Value::from(3)]).is_err());
    assert_eq!(repr(apply("items", &[Value::undefined_named("x")]).unwrap()), "[]");
    assert_eq!(apply("reverse", &[s("abc")]).unwrap(), s("cba"));
    assert_eq!(repr(apply("reverse", &[v(json!([1, 2]))]).unwrap()), "[2, 1]");
    assert_eq!(repr(apply("list", &[s("ab")]).unwrap()), "['a', 'b']");
    assert_eq!(apply("count", &[v(json!({"a": 1, "b": 2}))]).unwrap(), Value::from(2));
}

#[test]
fn test_attr_filter_uses_attribute_lookup() {
    let data = v(json!({"x": 1}));
    assert_eq!(apply("attr", &[data.clone(), s("x")]).unwrap(), Value::from(1));
    assert!(apply("attr", &[data, s("y")]).unwrap().is_undefined());
}
