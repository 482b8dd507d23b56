//! Unit tests for value operations

use core_types::{ops, BinOp, CmpOp, ErrorKind, UnaryOp, Value};

#[test]
fn test_arithmetic_mixes_int_and_float() {
    assert_eq!(ops::binary_op(BinOp::Mul, &Value::from(3), &Value::from(0.5)).unwrap(), Value::from(1.5));
    assert_eq!(ops::binary_op(BinOp::Sub, &Value::from(3), &Value::from(5)).unwrap(), Value::from(-2));
}

#[test]
fn test_integer_overflow_is_an_error() {
    let err = ops::binary_op(BinOp::Add, &Value::from(i64::MAX), &Value::from(1)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
    assert_eq!(err.message, "integer overflow");
}

#[test]
fn test_string_modulo_formats() {
    let rv = ops::binary_op(BinOp::Mod, &Value::from("%s=%d"), &Value::tuple(vec![Value::from("a"), Value::from(1)])).unwrap();
    assert_eq!(rv, Value::from("a=1"));
}

#[test]
fn test_unary_ops() {
    assert_eq!(ops::unary_op(UnaryOp::Neg, &Value::from(2)).unwrap(), Value::from(-2));
    assert_eq!(ops::unary_op(UnaryOp::Not, &Value::from("")).unwrap(), Value::from(true));
    assert!(ops::unary_op(UnaryOp::Neg, &Value::from("x")).is_err());
}

#[test]
fn test_containment_in_dict_uses_keys() {
    let mut m = core_types::ValueMap::new();
    m.insert(Value::from("a"), Value::from(1));
    let d = Value::from(m);
    assert!(ops::compare(CmpOp::In, &Value::from("a"), &d).unwrap());
    assert!(!ops::compare(CmpOp::In, &Value::from(1), &d).unwrap());
}

#[test]
fn test_sequence_ordering() {
    let a = Value::from(vec![Value::from(1), Value::from(2)]);
    let b = Value::from(vec![Value::from(1), Value::from(3)]);
    assert!(ops::compare(CmpOp::Lt, &a, &b).unwrap());
    assert_eq!(ops::total_cmp(&Value::None, &Value::from(1)), std::cmp::Ordering::Less);
}

#[test]
fn test_len_and_iteration() {
    assert_eq!(ops::len(&Value::from("héllo")).unwrap(), 5);
    let chars: Vec<Value> = ops::try_iter(&Value::from("ab")).unwrap().collect();
    assert_eq!(chars, vec![Value::from("a"), Value::from("b")]);
    let err = ops::len(&Value::from(3)).unwrap_err();
    assert_eq!(err.message, "object of type 'int' has no len()");
}
