//! Unit tests for the Value enum

use core_types::{Value, ValueKind, ValueMap};

fn map(pairs: &[(&str, Value)]) -> Value {
    let mut m = ValueMap::new();
    for (k, v) in pairs {
        m.insert(Value::from(*k), v.clone());
    }
    Value::from(m)
}

#[cfg(test)]
mod value_creation_tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::None.kind(), ValueKind::None);
        assert_eq!(Value::from(true).kind(), ValueKind::Bool);
        assert_eq!(Value::from(1).kind(), ValueKind::Number);
        assert_eq!(Value::from(1.5).kind(), ValueKind::Number);
        assert_eq!(Value::from("x").kind(), ValueKind::String);
        assert_eq!(Value::from(vec![Value::None]).kind(), ValueKind::Seq);
        assert_eq!(map(&[]).kind(), ValueKind::Map);
        assert_eq!(Value::undefined_named("x").kind(), ValueKind::Undefined);
    }

    #[test]
    fn test_option_conversion() {
        assert!(Value::from(None::<i64>).is_none());
        assert_eq!(Value::from(Some(3)), Value::from(3));
    }

    #[test]
    fn test_from_serialize() {
        #[derive(serde::Serialize)]
        struct User {
            name: String,
            age: u32,
        }
        let v = Value::from_serialize(&User {
            name: "ann".into(),
            age: 3,
        })
        .unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get(&Value::from("name")), Some(&Value::from("ann")));
        assert_eq!(m.get(&Value::from("age")), Some(&Value::from(3)));
    }
}

#[cfg(test)]
mod value_display_tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::from(true).to_string(), "True");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(2.0).to_string(), "2.0");
        assert_eq!(Value::from(0.1).to_string(), "0.1");
        assert_eq!(Value::from(1e20).to_string(), "1e+20");
    }

    #[test]
    fn test_containers_use_repr() {
        let v = Value::from(vec![Value::from("a"), Value::from(1), Value::None]);
        assert_eq!(v.to_string(), "['a', 1, None]");
        assert_eq!(Value::tuple(vec![Value::from(1)]).to_string(), "(1,)");
        assert_eq!(map(&[("k", Value::from("v"))]).to_string(), "{'k': 'v'}");
    }

    #[test]
    fn test_repr_quotes() {
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::from("a\nb").repr(), "'a\\nb'");
    }

    #[test]
    fn test_undefined_prints_empty() {
        assert_eq!(Value::undefined_named("missing").to_string(), "");
    }
}

#[cfg(test)]
mod value_truth_and_equality_tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_true());
        assert!(!Value::from(0).is_true());
        assert!(!Value::from("").is_true());
        assert!(!Value::from(Vec::<Value>::new()).is_true());
        assert!(!map(&[]).is_true());
        assert!(Value::from("x").is_true());
        assert!(Value::from(0.5).is_true());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from(true), Value::from(1));
        assert_ne!(Value::from(1), Value::from("1"));
    }

    #[test]
    fn test_markup_equals_plain_string() {
        assert_eq!(Value::from_safe_string("a"), Value::from("a"));
        assert!(Value::from_safe_string("a").is_safe());
        assert!(!Value::from("a").is_safe());
    }

    #[test]
    fn test_hash_is_consistent_with_equality() {
        let m = map(&[("1", Value::None)]);
        let mut keys = ValueMap::new();
        keys.insert(Value::from(1), Value::from("int"));
        assert_eq!(keys.get(&Value::from(1.0)), Some(&Value::from("int")));
        assert!(m.as_map().unwrap().get(&Value::from(1)).is_none());
    }
}
