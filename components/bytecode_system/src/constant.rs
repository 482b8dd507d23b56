//! Constant pool entries
//!
//! Only plain data can live in a constant pool: the pool is serialized into
//! the bytecode cache and has to survive a process restart.

use std::sync::Arc;

use core_types::{Value, ValueMap};
use serde::{Deserialize, Serialize};

/// A compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// `none`
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Plain string
    Str(String),
    /// String already marked safe
    Markup(String),
    /// List literal
    List(Vec<Constant>),
    /// Tuple literal
    Tuple(Vec<Constant>),
    /// Dict literal, in insertion order
    Map(Vec<(Constant, Constant)>),
}

impl Constant {
    /// Convert a runtime value; None if it holds non-data (functions, objects,
    /// undefined)
    pub fn from_value(value: &Value) -> Option<Constant> {
        Some(match value {
            Value::None => Constant::None,
            Value::Bool(b) => Constant::Bool(*b),
            Value::Int(i) => Constant::Int(*i),
            Value::Float(f) => Constant::Float(*f),
            Value::String(s) => Constant::Str(s.to_string()),
            Value::Markup(s) => Constant::Markup(s.to_string()),
            Value::List(items) => Constant::List(
                items
                    .iter()
                    .map(Constant::from_value)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Tuple(items) => Constant::Tuple(
                items
                    .iter()
                    .map(Constant::from_value)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(map) => Constant::Map(
                map.iter()
                    .map(|(k, v)| Some((Constant::from_value(k)?, Constant::from_value(v)?)))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Undefined(_) | Value::Function(_) | Value::Object(_) => return None,
        })
    }

    /// Runtime value of the constant
    pub fn to_value(&self) -> Value {
        match self {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Str(s) => Value::from(s.as_str()),
            Constant::Markup(s) => Value::from_safe_string(s.as_str()),
            Constant::List(items) => Value::List(Arc::new(items.iter().map(Constant::to_value).collect())),
            Constant::Tuple(items) => Value::tuple(items.iter().map(Constant::to_value).collect()),
            Constant::Map(entries) => Value::from(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_value(), v.to_value()))
                    .collect::<ValueMap>(),
            ),
        }
    }

    /// String payload, if the constant is a (safe or plain) string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) | Constant::Markup(s) => Some(s),
            _ => None,
        }
    }
}
