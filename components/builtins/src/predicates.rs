//! Builtin tests (`x is odd`, `x is divisibleby 3`, `x is defined`, ...)
//!
//! Every test returns a boolean value. Tests that only inspect the kind of
//! their argument never fail, even on strict undefined values.

use std::sync::Arc;

use core_types::{ops, CmpOp, EnvironmentAccess, Function, Kwargs, Result, TemplateError, Value};

use crate::args::ArgParser;
use crate::number::{is_integer, remainder};
use crate::{insert, FunctionMap};

fn kind_test(map: &mut FunctionMap, name: &'static str, check: fn(&Value) -> bool) {
    insert(
        map,
        Function::new(name, move |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new(name, args, kwargs);
            let value = p.required("value")?;
            p.finish()?;
            Ok(Value::Bool(check(&value)))
        }),
    );
}

fn compare_test(map: &mut FunctionMap, name: &'static str, op: CmpOp) {
    insert(
        map,
        Function::new(name, move |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new(name, args, kwargs);
            let a = p.required("a")?;
            let b = p.required("b")?;
            p.finish()?;
            ops::compare(op, &a, &b).map(Value::Bool)
        }),
    );
}

fn parity(name: &'static str, args: &[Value], kwargs: &Kwargs, want: i64) -> Result<Value> {
    let mut p = ArgParser::new(name, args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    let rem = remainder(&value, &Value::Int(2))?;
    Ok(Value::Bool(rem.as_f64() == Some(want as f64)))
}

fn do_divisibleby(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("divisibleby", args, kwargs);
    let value = p.required("value")?;
    let num = p.required("num")?;
    p.finish()?;
    if num.as_f64() == Some(0.0) {
        return Err(TemplateError::invalid_operation("integer division or modulo by zero"));
    }
    let rem = remainder(&value, &num)?;
    Ok(Value::Bool(rem.as_f64() == Some(0.0)))
}

fn is_lower(value: &Value) -> bool {
    value.as_str().map_or(false, |s| {
        s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)
    })
}

fn is_upper(value: &Value) -> bool {
    value.as_str().map_or(false, |s| {
        s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)
    })
}

fn is_iterable(value: &Value) -> bool {
    match value {
        Value::Undefined(u) => u.check_iterable().is_ok(),
        other => ops::try_iter(other).is_ok(),
    }
}

fn is_sequence(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Markup(_) | Value::List(_) | Value::Tuple(_) | Value::Map(_) => {
            true
        }
        Value::Object(obj) => obj.len().is_some(),
        _ => false,
    }
}

/// Identity comparison: shared values must be the same allocation
pub fn same_as(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::String(x), Value::String(y)) | (Value::Markup(x), Value::Markup(y)) => {
            Arc::ptr_eq(x, y)
        }
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => Arc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) => Arc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        (Value::Undefined(x), Value::Undefined(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

fn registered(
    name: &'static str,
    names: fn(&dyn EnvironmentAccess) -> Vec<String>,
) -> impl Fn(&dyn EnvironmentAccess, &[Value], &Kwargs) -> Result<Value> + Send + Sync + 'static {
    move |env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs| {
        let mut p = ArgParser::new(name, args, kwargs);
        let value = p.required("value")?;
        p.finish()?;
        Ok(Value::Bool(match value.as_str() {
            Some(wanted) => names(env).iter().any(|n| n == wanted),
            None => false,
        }))
    }
}

/// Build the test catalog
pub fn default_tests() -> FunctionMap {
    let mut map = FunctionMap::new();
    kind_test(&mut map, "defined", |v| !v.is_undefined());
    kind_test(&mut map, "undefined", Value::is_undefined);
    kind_test(&mut map, "none", Value::is_none);
    kind_test(&mut map, "boolean", |v| matches!(v, Value::Bool(_)));
    kind_test(&mut map, "false", |v| matches!(v, Value::Bool(false)));
    kind_test(&mut map, "true", |v| matches!(v, Value::Bool(true)));
    kind_test(&mut map, "integer", is_integer);
    kind_test(&mut map, "float", |v| matches!(v, Value::Float(_)));
    kind_test(&mut map, "number", |v| {
        matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    });
    kind_test(&mut map, "string", |v| matches!(v, Value::String(_) | Value::Markup(_)));
    kind_test(&mut map, "mapping", |v| matches!(v, Value::Map(_)));
    kind_test(&mut map, "sequence", is_sequence);
    kind_test(&mut map, "iterable", is_iterable);
    kind_test(&mut map, "callable", Value::is_callable);
    kind_test(&mut map, "escaped", Value::is_safe);
    kind_test(&mut map, "lower", is_lower);
    kind_test(&mut map, "upper", is_upper);

    insert(&mut map, Function::new("odd", |args: &[Value], kwargs: &Kwargs| parity("odd", args, kwargs, 1)));
    insert(&mut map, Function::new("even", |args: &[Value], kwargs: &Kwargs| parity("even", args, kwargs, 0)));
    insert(&mut map, Function::new("divisibleby", do_divisibleby));

    for (names, op) in [
        (&["eq", "equalto", "=="][..], CmpOp::Eq),
        (&["ne", "!="][..], CmpOp::Ne),
        (&["lt", "lessthan", "<"][..], CmpOp::Lt),
        (&["le", "<="][..], CmpOp::LtEq),
        (&["gt", "greaterthan", ">"][..], CmpOp::Gt),
        (&["ge", ">="][..], CmpOp::GtEq),
    ] {
        for name in names {
            compare_test(&mut map, *name, op);
        }
    }

    insert(
        &mut map,
        Function::new("in", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("in", args, kwargs);
            let value = p.required("value")?;
            let seq = p.required("seq")?;
            p.finish()?;
            ops::contains(&seq, &value).map(Value::Bool)
        }),
    );
    insert(
        &mut map,
        Function::new("sameas", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("sameas", args, kwargs);
            let value = p.required("value")?;
            let other = p.required("other")?;
            p.finish()?;
            Ok(Value::Bool(same_as(&value, &other)))
        }),
    );
    insert(
        &mut map,
        Function::with_environment("filter", registered("filter", |env| env.filter_names())),
    );
    insert(
        &mut map,
        Function::with_environment("test", registered("test", |env| env.test_names())),
    );
    map
}
