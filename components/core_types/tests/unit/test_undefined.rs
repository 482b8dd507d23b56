//! Unit tests for undefined values and their policies

use std::sync::Arc;

use core_types::{ops, ErrorKind, Undefined, UndefinedBehavior, Value, ValueMap};

fn undefined(behavior: UndefinedBehavior, name: &str) -> Value {
    Value::Undefined(Arc::new(Undefined::named(behavior, name)))
}

#[test]
fn test_default_undefined_is_lenient() {
    let u = undefined(UndefinedBehavior::Default, "x");
    assert_eq!(ops::to_string(&u).unwrap(), "");
    assert!(!ops::is_true(&u).unwrap());
    assert_eq!(ops::len(&u).unwrap(), 0);
    assert_eq!(ops::try_iter(&u).unwrap().count(), 0);
}

#[test]
fn test_default_undefined_fails_on_attribute() {
    let u = undefined(UndefinedBehavior::Default, "x");
    let err = ops::get_attr(&u, "y").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedError);
    assert_eq!(err.message, "'x' is undefined");
}

#[test]
fn test_chainable_attribute_chains() {
    let u = undefined(UndefinedBehavior::Chainable, "x");
    let chained = ops::get_attr(&u, "y").unwrap().unwrap();
    assert!(chained.is_undefined());
    let deeper = ops::get_item(&chained, &Value::from(0)).unwrap().unwrap();
    assert_eq!(ops::to_string(&deeper).unwrap(), "");
}

#[test]
fn test_strict_fails_everywhere() {
    let u = undefined(UndefinedBehavior::Strict, "x");
    assert!(ops::to_string(&u).is_err());
    assert!(ops::is_true(&u).is_err());
    assert!(ops::len(&u).is_err());
    assert!(ops::compare(core_types::CmpOp::Eq, &u, &Value::None).is_err());
}

#[test]
fn test_debug_prints_placeholder() {
    let u = undefined(UndefinedBehavior::Debug, "user");
    assert_eq!(ops::to_string(&u).unwrap(), "{{ user }}");
}

#[test]
fn test_missing_attribute_message() {
    let u = Undefined::missing_member(
        UndefinedBehavior::Default,
        Value::from(ValueMap::new()),
        Value::from("title"),
    );
    assert_eq!(u.error().message, "'dict object' has no attribute 'title'");
}
