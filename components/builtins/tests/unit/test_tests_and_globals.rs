//! Unit tests for the builtin tests and global functions

use builtins::{default_globals, Cycler, Joiner, MAX_RANGE};
use core_types::{CallSite, ErrorKind, EvalContext, Kwargs, Value};
use serde_json::json;

use crate::support::{check, json as v, s, CatalogEnv};

fn call_global(env: &CatalogEnv, name: &str, args: &[Value], kwargs: &Kwargs) -> core_types::Result<Value> {
    let globals = default_globals();
    let f = match globals.get(&Value::from(name)) {
        Some(Value::Function(f)) => f.clone(),
        other => panic!("{} is not a global function: {:?}", name, other.is_some()),
    };
    let eval_ctx = EvalContext::default();
    let site = CallSite { context: None, eval_ctx: &eval_ctx, env };
    f.invoke_sync(&site, args, kwargs)
}

#[test]
fn test_defined_never_fails_on_undefined() {
    assert!(!check("defined", &[Value::undefined_named("x")]).unwrap());
    assert!(check("undefined", &[Value::undefined_named("x")]).unwrap());
    assert!(check("none", &[Value::None]).unwrap());
}

#[test]
fn test_type_tests() {
    assert!(check("mapping", &[v(json!({}))]).unwrap());
    assert!(check("sequence", &[v(json!([1]))]).unwrap());
    assert!(check("iterable", &[s("abc")]).unwrap());
    assert!(check("string", &[Value::from_safe_string("x")]).unwrap());
    assert!(check("escaped", &[Value::from_safe_string("x")]).unwrap());
    assert!(!check("escaped", &[s("x")]).unwrap());
    assert!(check("float", &[Value::from(1.0)]).unwrap());
    assert!(check("boolean", &[Value::from(false)]).unwrap());
    assert!(check("false", &[Value::from(false)]).unwrap());
    assert!(!check("true", &[Value::from(1)]).unwrap());
}

#[test]
fn test_divisibleby_by_zero_fails() {
    let err = check("divisibleby", &[Value::from(4), Value::from(0)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
}

#[test]
fn test_filter_and_test_tests_see_catalogs() {
    assert!(check("filter", &[s("groupby")]).unwrap());
    assert!(!check("filter", &[s("nope")]).unwrap());
    assert!(check("test", &[s("sameas")]).unwrap());
}

#[test]
fn test_callable() {
    let globals = default_globals();
    let range = globals.get(&Value::from("range")).cloned().unwrap_or(Value::None);
    assert!(check("callable", &[range]).unwrap());
    assert!(!check("callable", &[Value::from(1)]).unwrap());
}

#[test]
fn test_range_global() {
    let env = CatalogEnv::new();
    let kwargs = Kwargs::new();
    let out = call_global(&env, "range", &[Value::from(2), Value::from(8), Value::from(3)], &kwargs)
        .unwrap();
    assert_eq!(out.repr(), "[2, 5]");
    let err = call_global(&env, "range", &[Value::from(0), Value::from(1), Value::from(0)], &kwargs)
        .unwrap_err();
    assert_eq!(err.message, "range() arg 3 must not be zero");
}

#[test]
fn test_range_with_extreme_bounds() {
    let env = CatalogEnv::new();
    let bounds = [Value::from(i64::MIN + 1), Value::from(i64::MAX - 1)];
    let err = call_global(&env, "range", &bounds, &Kwargs::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
    let out = call_global(&env, "range", &[Value::from(i64::MAX - 1), Value::from(i64::MAX)], &Kwargs::new())
        .unwrap();
    assert_eq!(out.repr(), format!("[{}]", i64::MAX - 1));
}

#[test]
fn test_range_limited_in_sandbox() {
    let env = CatalogEnv::new().sandboxed(MAX_RANGE);
    let err = call_global(&env, "range", &[Value::from(MAX_RANGE + 1)], &Kwargs::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SecurityError);
    assert!(call_global(&env, "range", &[Value::from(10)], &Kwargs::new()).is_ok());
}

#[test]
fn test_dict_global() {
    let env = CatalogEnv::new();
    let kwargs: Kwargs = vec![("a".to_string(), Value::from(1)), ("b".to_string(), s("x"))]
        .into_iter()
        .collect();
    let out = call_global(&env, "dict", &[], &kwargs).unwrap();
    assert_eq!(out.repr(), "{'a': 1, 'b': 'x'}");
}

#[test]
fn test_cycler_and_joiner_globals() {
    let env = CatalogEnv::new();
    let cycler = call_global(&env, "cycler", &[s("odd"), s("even")], &Kwargs::new()).unwrap();
    let cycler = cycler.downcast_object_ref::<Cycler>().unwrap();
    assert_eq!(cycler.next(), s("odd"));
    assert_eq!(cycler.next(), s("even"));
    assert_eq!(cycler.next(), s("odd"));
    assert_eq!(cycler.current(), s("even"));
    assert!(call_global(&env, "cycler", &[], &Kwargs::new()).is_err());

    let joiner = call_global(&env, "joiner", &[s(" | ")], &Kwargs::new()).unwrap();
    let joiner = joiner.downcast_object_ref::<Joiner>().unwrap();
    assert_eq!(joiner.next(), "");
    assert_eq!(joiner.next(), " | ");
}

#[test]
fn test_lipsum_global_plain_text() {
    let env = CatalogEnv::new();
    let kwargs: Kwargs = vec![("html".to_string(), Value::from(false))].into_iter().collect();
    let out = call_global(&env, "lipsum", &[Value::from(2)], &kwargs).unwrap();
    assert!(!out.is_safe());
    assert_eq!(out.as_str().map(|t| t.split("\n\n").count()), Some(2));
}
