//! Contract compliance tests for builtins
//! The environment crate registers these catalogs as-is; names and shapes must not drift.

use builtins::{
    default_filters, default_globals, default_tests, ArgParser, FunctionMap, JsonFilters,
    Namespace, NumberFilters, RoundMethod, StringFilters, UrlizeOptions, MAX_RANGE,
};
use core_types::{Kwargs, PassArg, Value};

const FILTERS: &[&str] = &[
    "abs", "attr", "batch", "capitalize", "center", "count", "d", "default", "dictsort", "e",
    "escape", "filesizeformat", "first", "float", "forceescape", "format", "groupby", "indent",
    "int", "items", "join", "last", "length", "list", "lower", "map", "max", "min", "pprint",
    "random", "reject", "rejectattr", "replace", "reverse", "round", "safe", "select",
    "selectattr", "slice", "sort", "string", "striptags", "sum", "title", "tojson", "trim",
    "truncate", "unique", "upper", "urlencode", "urlize", "wordcount", "wordwrap", "xmlattr",
];

const TESTS: &[&str] = &[
    "boolean", "callable", "defined", "divisibleby", "eq", "escaped", "even", "false", "filter",
    "float", "ge", "gt", "in", "integer", "iterable", "le", "lower", "lt", "mapping", "ne", "none",
    "number", "odd", "sameas", "sequence", "string", "test", "true", "undefined", "upper",
    "==", "!=", "<", "<=", ">", ">=", "equalto", "greaterthan", "lessthan",
];

#[test]
fn test_filter_catalog_is_complete() {
    let filters: FunctionMap = default_filters();
    for name in FILTERS {
        assert!(filters.contains_key(*name), "missing filter {}", name);
    }
}

#[test]
fn test_test_catalog_is_complete() {
    let tests = default_tests();
    for name in TESTS {
        assert!(tests.contains_key(*name), "missing test {}", name);
    }
}

#[test]
fn test_globals_are_present() {
    let globals = default_globals();
    for name in ["range", "dict", "lipsum", "cycler", "joiner", "namespace"] {
        assert!(globals.contains_key(&Value::from(name)), "missing global {}", name);
    }
}

#[test]
fn test_context_aware_filters_declare_it() {
    let filters = default_filters();
    for name in ["map", "select", "reject", "selectattr", "rejectattr", "random", "urlize"] {
        assert_eq!(filters[name].pass_arg(), PassArg::Context, "{}", name);
    }
    for name in ["join", "replace", "xmlattr"] {
        assert_eq!(filters[name].pass_arg(), PassArg::EvalContext, "{}", name);
    }
    assert_eq!(filters["upper"].pass_arg(), PassArg::Nothing);
}

#[test]
fn test_public_helpers() {
    assert_eq!(MAX_RANGE, 100_000);
    assert_eq!(NumberFilters::round(1.25, 1, RoundMethod::Common), 1.2);
    assert_eq!(StringFilters::url_quote("a&b", true), "a%26b");
    assert_eq!(JsonFilters::htmlsafe("<"), "\\u003c");
    let options = UrlizeOptions::default();
    assert_eq!(StringFilters::urlize("plain", &options).unwrap(), "plain");
    let ns = Namespace::default();
    assert!(ns.attrs().is_empty());
}

#[test]
fn test_arg_parser_binds_positionals_before_keywords() {
    let args = [Value::from(1)];
    let kwargs: Kwargs = vec![("b".to_string(), Value::from(2))].into_iter().collect();
    let mut p = ArgParser::new("f", &args, &kwargs);
    assert_eq!(p.required("a").unwrap(), Value::from(1));
    assert_eq!(p.int("b").unwrap(), Some(2));
    p.finish().unwrap();
}
