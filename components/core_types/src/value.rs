//! Template value representation.
//!
//! This module provides the core [`Value`] enum that represents every value a
//! template can see: context variables, literals, results of filters and the
//! runtime helper objects (loops, macros, namespaces).
//!
//! Containers are reference counted so that copying a value into a loop
//! variable or a macro argument never copies its contents.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::function::Function;
use crate::object::Object;
use crate::undefined::{Undefined, UndefinedBehavior};

/// Insertion-ordered mapping used for template dicts and contexts
pub type ValueMap = IndexMap<Value, Value>;

/// Represents any template value.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let number = Value::from(42);
/// let text = Value::from("hello");
///
/// assert!(number.is_true());
/// assert_eq!(text.type_name(), "str");
/// assert_eq!(Value::from(vec![Value::from(1), Value::from("a")]).to_string(), "[1, 'a']");
/// ```
#[derive(Clone)]
pub enum Value {
    /// A missing name or attribute, with its failure policy
    Undefined(Arc<Undefined>),
    /// The none value
    None,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// IEEE 754 double-precision floating point
    Float(f64),
    /// Plain string
    String(Arc<str>),
    /// String that is already safe for output and is never escaped again
    Markup(Arc<str>),
    /// Ordered, growable sequence
    List(Arc<Vec<Value>>),
    /// Immutable sequence
    Tuple(Arc<Vec<Value>>),
    /// Insertion-ordered dictionary
    Map(Arc<ValueMap>),
    /// Host function (filter, test, global) with capability flags
    Function(Arc<Function>),
    /// Runtime helper object (loop context, macro, namespace, ...)
    Object(Arc<dyn Object>),
}

/// Coarse classification of values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Undefined sentinel
    Undefined,
    /// None
    None,
    /// Boolean
    Bool,
    /// Integer or float
    Number,
    /// String or markup
    String,
    /// List or tuple
    Seq,
    /// Dictionary
    Map,
    /// Callable host function
    Function,
    /// Runtime object
    Object,
}

impl Value {
    /// Plain string value
    pub fn from_string(s: impl Into<String>) -> Self {
        Value::String(Arc::from(s.into()))
    }

    /// Safe (markup) string value
    pub fn from_safe_string(s: impl Into<String>) -> Self {
        Value::Markup(Arc::from(s.into()))
    }

    /// Wrap a runtime object
    pub fn from_object<T: Object>(object: T) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Build a tuple value
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(items))
    }

    /// Undefined value with the default policy and a name
    pub fn undefined_named(name: &str) -> Self {
        Value::Undefined(Arc::new(Undefined::named(
            UndefinedBehavior::Default,
            name,
        )))
    }

    /// Build a value from anything serializable (used for render contexts)
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> crate::Result<Self> {
        serde_json::to_value(value)
            .map(Value::from_json)
            .map_err(|e| crate::TemplateError::type_error(e.to_string()))
    }

    /// Convert a JSON document into a value tree
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::from(items.into_iter().map(Value::from_json).collect::<Vec<_>>())
            }
            serde_json::Value::Object(map) => Value::from(
                map.into_iter()
                    .map(|(k, v)| (Value::from(k), Value::from_json(v)))
                    .collect::<ValueMap>(),
            ),
        }
    }

    /// Classify this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined(_) => ValueKind::Undefined,
            Value::None => ValueKind::None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) | Value::Float(_) => ValueKind::Number,
            Value::String(_) | Value::Markup(_) => ValueKind::String,
            Value::List(_) | Value::Tuple(_) => ValueKind::Seq,
            Value::Map(_) => ValueKind::Map,
            Value::Function(_) => ValueKind::Function,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Type name as shown in error messages
    pub fn type_name(&self) -> &str {
        match self {
            Value::Undefined(_) => "Undefined",
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Markup(_) => "Markup",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "dict",
            Value::Function(_) => "function",
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// True for any undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(_))
    }

    /// True for the none value
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// True for markup strings and objects that render as markup
    pub fn is_safe(&self) -> bool {
        match self {
            Value::Markup(_) => true,
            Value::Object(obj) => obj.is_safe(),
            _ => false,
        }
    }

    /// True for integers and floats (not booleans)
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// True if calling this value is meaningful
    pub fn is_callable(&self) -> bool {
        match self {
            Value::Function(_) => true,
            Value::Object(obj) => obj.is_callable(),
            _ => false,
        }
    }

    /// Truthiness that never fails (strict undefined counts as false)
    pub fn is_true(&self) -> bool {
        match self {
            Value::Undefined(_) | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Markup(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Function(_) => true,
            Value::Object(obj) => obj.is_true(),
        }
    }

    /// Borrow string contents of a string or markup value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view (booleans count as 0/1, floats only if integral)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Float view of any number or boolean
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the items of a list or tuple
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a dict
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the undefined payload
    pub fn as_undefined(&self) -> Option<&Undefined> {
        match self {
            Value::Undefined(u) => Some(u),
            _ => None,
        }
    }

    /// Borrow a runtime object
    pub fn as_object(&self) -> Option<&Arc<dyn Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast a runtime object to its concrete type
    pub fn downcast_object_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Python-style `repr()` of the value, used inside container output
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(&mut out, self);
        out
    }
}

fn write_repr(out: &mut String, value: &Value) {
    match value {
        Value::String(s) | Value::Markup(s) => out.push_str(&repr_str(s)),
        Value::List(items) => {
            out.push('[');
            write_items(out, items);
            out.push(']');
        }
        Value::Tuple(items) => {
            out.push('(');
            write_items(out, items);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Map(map) => {
            out.push('{');
            for (idx, (k, v)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_repr(out, k);
                out.push_str(": ");
                write_repr(out, v);
            }
            out.push('}');
        }
        Value::Undefined(u) => out.push_str(&u.debug_repr()),
        other => out.push_str(&other.to_string()),
    }
}

fn write_items(out: &mut String, items: &[Value]) {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        write_repr(out, item);
    }
}

/// Quote a string the way Python's `repr()` does
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Format a float the way Python's `repr()` does
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e16 {
        return format!("{:.1}", f);
    }
    let mut buffer = ryu::Buffer::new();
    let raw = buffer.format_finite(f);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            let mantissa = mantissa.strip_suffix(".0").unwrap_or(mantissa);
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined(u) => f.write_str(&u.render_lossy()),
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::String(s) | Value::Markup(s) => f.write_str(s),
            Value::List(_) | Value::Tuple(_) | Value::Map(_) => f.write_str(&self.repr()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Object(obj) => obj.render(f),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined(u) => f.debug_tuple("Undefined").field(&u.debug_repr()).finish(),
            Value::None => write!(f, "None"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Markup(s) => f.debug_tuple("Markup").field(s).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Function(func) => f.debug_tuple("Function").field(&func.name()).finish(),
            Value::Object(obj) => f.debug_tuple("Object").field(obj).finish(),
        }
    }
}

/// Loose equality: numbers compare by value across int/float/bool,
/// strings compare by content regardless of markup-ness.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Undefined(_), Value::Undefined(_)) => true,
            (Value::String(a) | Value::Markup(a), Value::String(b) | Value::Markup(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (a, b) if is_numeric_like(a) && is_numeric_like(b) => {
                if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
                    a.as_f64() == b.as_f64()
                } else {
                    a.as_i64() == b.as_i64()
                }
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

fn is_numeric_like(v: &Value) -> bool {
    matches!(v, Value::Bool(_) | Value::Int(_) | Value::Float(_))
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::None => 0u8.hash(state),
            Value::Undefined(_) => 1u8.hash(state),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => match self.as_i64() {
                Some(i) => {
                    2u8.hash(state);
                    i.hash(state);
                }
                None => {
                    3u8.hash(state);
                    self.as_f64().unwrap_or(0.0).to_bits().hash(state);
                }
            },
            Value::String(s) | Value::Markup(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::List(items) | Value::Tuple(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Value::Map(map) => {
                6u8.hash(state);
                map.len().hash(state);
            }
            Value::Function(func) => {
                7u8.hash(state);
                (Arc::as_ptr(func) as *const u8 as usize).hash(state);
            }
            Value::Object(obj) => {
                8u8.hash(state);
                (Arc::as_ptr(obj) as *const u8 as usize).hash(state);
            }
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Value::Undefined(_) | Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) | Value::Markup(s) => serializer.serialize_str(s),
            Value::List(items) | Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(&k.to_string(), v)?;
                }
                m.end()
            }
            Value::Function(_) | Value::Object(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(Arc::new(func))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::None)
    }
}
