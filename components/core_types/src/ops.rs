//! Operations on template values.
//!
//! Arithmetic, comparison, containment, iteration and lookup with the
//! semantics templates expect: integers and floats mix freely, strings and
//! sequences concatenate, markup stays markup, and any operation that needs
//! a real value fails on an undefined operand.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, TemplateError};
use crate::object::ValueIter;
use crate::undefined::UndefinedBehavior;
use crate::value::{Value, ValueMap};

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

impl BinOp {
    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// `-`
    Neg,
    /// `+`
    Pos,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

impl CmpOp {
    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn num_to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn fail_undefined(a: &Value, b: &Value) -> Result<()> {
    if let Value::Undefined(u) = a {
        return Err(u.error());
    }
    if let Value::Undefined(u) = b {
        return Err(u.error());
    }
    Ok(())
}

fn unsupported(op: &str, a: &Value, b: &Value) -> TemplateError {
    TemplateError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> TemplateError {
    TemplateError::invalid_operation("integer overflow")
}

fn zero_division() -> TemplateError {
    TemplateError::invalid_operation("division by zero")
}

/// Printed form of a value; strict undefined fails
pub fn to_string(v: &Value) -> Result<String> {
    match v {
        Value::Undefined(u) => u.render(),
        other => Ok(other.to_string()),
    }
}

/// Truthiness; strict undefined fails
pub fn is_true(v: &Value) -> Result<bool> {
    match v {
        Value::Undefined(u) => u.is_true(),
        other => Ok(other.is_true()),
    }
}

/// Length of strings, sequences, dicts and sized objects
pub fn len(v: &Value) -> Result<usize> {
    match v {
        Value::String(s) | Value::Markup(s) => Ok(s.chars().count()),
        Value::List(items) | Value::Tuple(items) => Ok(items.len()),
        Value::Map(map) => Ok(map.len()),
        Value::Undefined(u) => u.check_iterable().map(|_| 0),
        Value::Object(obj) => obj.len().ok_or_else(|| no_len(v)),
        _ => Err(no_len(v)),
    }
}

fn no_len(v: &Value) -> TemplateError {
    TemplateError::type_error(format!("object of type '{}' has no len()", v.type_name()))
}

struct SeqIter {
    items: Arc<Vec<Value>>,
    idx: usize,
}

impl Iterator for SeqIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let item = self.items.get(self.idx).cloned();
        self.idx += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.items.len().saturating_sub(self.idx);
        (rest, Some(rest))
    }
}

/// Iterate a value: sequences yield items, dicts keys, strings characters
pub fn try_iter(v: &Value) -> Result<ValueIter> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(Box::new(SeqIter {
            items: items.clone(),
            idx: 0,
        })),
        Value::Map(map) => Ok(Box::new(
            map.keys().cloned().collect::<Vec<_>>().into_iter(),
        )),
        Value::String(s) | Value::Markup(s) => {
            let safe = v.is_safe();
            let chars: Vec<Value> = s
                .chars()
                .map(|c| {
                    if safe {
                        Value::from_safe_string(c.to_string())
                    } else {
                        Value::from(c.to_string())
                    }
                })
                .collect();
            Ok(Box::new(chars.into_iter()))
        }
        Value::Undefined(u) => {
            u.check_iterable()?;
            Ok(Box::new(std::iter::empty()))
        }
        Value::Object(obj) => obj.try_iter().ok_or_else(|| not_iterable(v)),
        _ => Err(not_iterable(v)),
    }
}

fn not_iterable(v: &Value) -> TemplateError {
    TemplateError::type_error(format!("'{}' object is not iterable", v.type_name()))
}

/// Collect an iterable into a vector
pub fn to_vec(v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(items.as_ref().clone()),
        other => Ok(try_iter(other)?.collect()),
    }
}

/// Apply a binary arithmetic operator
pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    fail_undefined(a, b)?;
    match op {
        BinOp::Add => add(a, b),
        BinOp::Sub => arith(op, a, b, i64::checked_sub, |x, y| x - y),
        BinOp::Mul => mul(a, b),
        BinOp::Div => div(a, b),
        BinOp::FloorDiv => floor_div(a, b),
        BinOp::Mod => rem(a, b),
        BinOp::Pow => pow(a, b),
    }
}

fn arith(
    op: BinOp,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            int_op(x, y).map(Value::Int).ok_or_else(overflow)
        }
        (Some(x), Some(y)) => Ok(Value::Float(float_op(num_to_f64(x), num_to_f64(y)))),
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

fn add(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Markup(_), Value::String(_) | Value::Markup(_))
        | (Value::String(_), Value::Markup(_)) => {
            let left = crate::markup::escape(a)?;
            let right = crate::markup::escape(b)?;
            Ok(Value::from_safe_string(format!(
                "{}{}",
                left.as_str().unwrap_or_default(),
                right.as_str().unwrap_or_default()
            )))
        }
        (Value::String(x), Value::String(y)) => Ok(Value::from(format!("{}{}", x, y))),
        (Value::List(x), Value::List(y)) => {
            Ok(Value::from(x.iter().chain(y.iter()).cloned().collect::<Vec<_>>()))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        _ => arith(BinOp::Add, a, b, i64::checked_add, |x, y| x + y),
    }
}

/// Largest string or sequence one repetition or padding may produce
pub const MAX_GENERATED_LEN: usize = 1 << 24;

/// Size of `count` copies of a `unit`-sized piece, refused past [`MAX_GENERATED_LEN`]
pub fn generated_len(unit: usize, count: usize) -> Result<usize> {
    unit.checked_mul(count)
        .filter(|&len| len <= MAX_GENERATED_LEN)
        .ok_or_else(|| {
            TemplateError::invalid_operation(format!(
                "result would be larger than {} items",
                MAX_GENERATED_LEN
            ))
        })
}

fn repeat_count(n: Num) -> Option<usize> {
    match n {
        Num::Int(i) => Some(usize::try_from(i.max(0)).unwrap_or(usize::MAX)),
        Num::Float(_) => None,
    }
}

fn mul(a: &Value, b: &Value) -> Result<Value> {
    let repeated = |seq: &Value, n: &Value| -> Option<Result<Value>> {
        let count = as_num(n).and_then(repeat_count)?;
        match seq {
            Value::String(s) => Some(repeat_str(s, count).map(Value::from)),
            Value::Markup(s) => Some(repeat_str(s, count).map(Value::from_safe_string)),
            Value::List(items) => Some(repeat_items(items, count).map(Value::from)),
            Value::Tuple(items) => Some(repeat_items(items, count).map(Value::tuple)),
            _ => None,
        }
    };
    if let Some(rv) = repeated(a, b).or_else(|| repeated(b, a)) {
        return rv;
    }
    arith(BinOp::Mul, a, b, i64::checked_mul, |x, y| x * y)
}

fn repeat_str(s: &str, count: usize) -> Result<String> {
    generated_len(s.len(), count)?;
    Ok(s.repeat(count))
}

fn repeat_items(items: &[Value], count: usize) -> Result<Vec<Value>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(generated_len(items.len(), count)?);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn div(a: &Value, b: &Value) -> Result<Value> {
    match (as_num(a), as_num(b)) {
        (Some(x), Some(y)) => {
            let divisor = num_to_f64(y);
            if divisor == 0.0 {
                return Err(zero_division());
            }
            Ok(Value::Float(num_to_f64(x) / divisor))
        }
        _ => Err(unsupported("/", a, b)),
    }
}

fn floor_div(a: &Value, b: &Value) -> Result<Value> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            if y == 0 {
                return Err(zero_division());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        (Some(x), Some(y)) => {
            let divisor = num_to_f64(y);
            if divisor == 0.0 {
                return Err(zero_division());
            }
            Ok(Value::Float((num_to_f64(x) / divisor).floor()))
        }
        _ => Err(unsupported("//", a, b)),
    }
}

fn rem(a: &Value, b: &Value) -> Result<Value> {
    if let Value::String(s) | Value::Markup(s) = a {
        let formatted = crate::methods::printf(s, b)?;
        return Ok(if a.is_safe() {
            Value::from_safe_string(formatted)
        } else {
            Value::from(formatted)
        });
    }
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            if y == 0 {
                return Err(TemplateError::invalid_operation("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        (Some(x), Some(y)) => {
            let (x, y) = (num_to_f64(x), num_to_f64(y));
            if y == 0.0 {
                return Err(TemplateError::invalid_operation("float modulo"));
            }
            let r = x % y;
            Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }))
        }
        _ => Err(unsupported("%", a, b)),
    }
}

fn pow(a: &Value, b: &Value) -> Result<Value> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) if y >= 0 => {
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
        }
        (Some(x), Some(y)) => Ok(Value::Float(num_to_f64(x).powf(num_to_f64(y)))),
        _ => Err(unsupported("** or pow()", a, b)),
    }
}

/// Apply a unary operator
pub fn unary_op(op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => is_true(v).map(|b| Value::Bool(!b)),
        UnaryOp::Neg | UnaryOp::Pos => {
            if let Value::Undefined(u) = v {
                return Err(u.error());
            }
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            match (op, as_num(v)) {
                (UnaryOp::Neg, Some(Num::Int(i))) => {
                    i.checked_neg().map(Value::Int).ok_or_else(overflow)
                }
                (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
                (_, Some(Num::Int(i))) => Ok(Value::Int(i)),
                (_, Some(Num::Float(f))) => Ok(Value::Float(f)),
                _ => Err(TemplateError::type_error(format!(
                    "bad operand type for unary {}: '{}'",
                    symbol,
                    v.type_name()
                ))),
            }
        }
    }
}

/// Apply a comparison operator
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::Ne => equals(a, b).map(|r| !r),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|r| !r),
        CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq => {
            fail_undefined(a, b)?;
            let ord = partial_cmp(a, b).ok_or_else(|| {
                TemplateError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::LtEq => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

fn equals(a: &Value, b: &Value) -> Result<bool> {
    for v in [a, b] {
        if let Value::Undefined(u) = v {
            if u.behavior == UndefinedBehavior::Strict {
                return Err(u.error());
            }
        }
    }
    Ok(a == b)
}

/// Ordering between comparable values (numbers, strings, sequences)
pub fn partial_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x) | Value::Markup(x), Value::String(y) | Value::Markup(y)) => {
            Some(x.cmp(y))
        }
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                if l != r {
                    return partial_cmp(l, r);
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Some(x.cmp(&y)),
            (Some(x), Some(y)) => num_to_f64(x).partial_cmp(&num_to_f64(y)),
            _ => None,
        },
    }
}

/// Total ordering used by sorting filters: incomparable values order by kind
pub fn total_cmp(a: &Value, b: &Value) -> Ordering {
    partial_cmp(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Undefined(_) | Value::None => 0,
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => 1,
        Value::String(_) | Value::Markup(_) => 2,
        Value::List(_) | Value::Tuple(_) => 3,
        Value::Map(_) => 4,
        Value::Function(_) | Value::Object(_) => 5,
    }
}

/// Containment test (`item in container`)
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::String(s) | Value::Markup(s) => match item.as_str() {
            Some(needle) => Ok(s.contains(needle)),
            None => Err(TemplateError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                item.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v == item)),
        Value::Map(map) => Ok(map.contains_key(item)),
        Value::Undefined(u) => u.check_iterable().map(|_| false),
        Value::Object(_) => Ok(try_iter(container)?.any(|v| &v == item)),
        _ => Err(TemplateError::type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

/// Attribute lookup; `Ok(None)` means "not found, make an undefined"
pub fn get_attr(v: &Value, name: &str) -> Result<Option<Value>> {
    match v {
        Value::Map(map) => Ok(map.get(&Value::from(name)).cloned()),
        Value::Object(obj) => Ok(obj.get_attr(name)),
        Value::Undefined(u) => match u.chain() {
            Some(same) => Ok(Some(same)),
            None => Err(u.error()),
        },
        _ => Ok(None),
    }
}

/// Item lookup; `Ok(None)` means "not found, make an undefined"
pub fn get_item(v: &Value, key: &Value) -> Result<Option<Value>> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(index_of(key, items.len())
            .and_then(|idx| items.get(idx).cloned())),
        Value::String(s) | Value::Markup(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(index_of(key, chars.len()).map(|idx| {
                let c = chars[idx].to_string();
                if v.is_safe() {
                    Value::from_safe_string(c)
                } else {
                    Value::from(c)
                }
            }))
        }
        Value::Map(map) => Ok(map.get(key).cloned()),
        Value::Object(obj) => Ok(obj.get_item(key)),
        Value::Undefined(u) => match u.chain() {
            Some(same) => Ok(Some(same)),
            None => Err(u.error()),
        },
        _ => Ok(None),
    }
}

fn index_of(key: &Value, len: usize) -> Option<usize> {
    let idx = match key {
        Value::Int(i) => *i,
        Value::Bool(b) => *b as i64,
        _ => return None,
    };
    let resolved = if idx < 0 { len as i64 + idx } else { idx };
    (resolved >= 0 && (resolved as usize) < len).then_some(resolved as usize)
}

fn slice_bound(v: &Value, what: &str) -> Result<Option<i64>> {
    match v {
        Value::None | Value::Undefined(_) => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        Value::Bool(b) => Ok(Some(*b as i64)),
        other => Err(TemplateError::type_error(format!(
            "slice {} must be an integer or None, not {}",
            what,
            other.type_name()
        ))),
    }
}

/// Indices selected by a Python-style slice over a sequence of `len` items
pub fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(TemplateError::invalid_operation("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |idx: i64, low: i64, high: i64| -> i64 {
        let idx = if idx < 0 { idx + len } else { idx };
        idx.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map(|s| clamp(s, 0, len)).unwrap_or(0);
        let stop = stop.map(|s| clamp(s, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = start.map(|s| clamp(s, -1, len - 1)).unwrap_or(len - 1);
        let stop = stop.map(|s| clamp(s, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

/// Slice a string or sequence
pub fn slice(v: &Value, start: &Value, stop: &Value, step: &Value) -> Result<Value> {
    let start = slice_bound(start, "indices")?;
    let stop = slice_bound(stop, "indices")?;
    let step = slice_bound(step, "step")?;
    match v {
        Value::List(items) | Value::Tuple(items) => {
            let picked: Vec<Value> = slice_indices(items.len(), start, stop, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if matches!(v, Value::Tuple(_)) {
                Value::tuple(picked)
            } else {
                Value::from(picked)
            })
        }
        Value::String(s) | Value::Markup(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), start, stop, step)?
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(if v.is_safe() {
                Value::from_safe_string(picked)
            } else {
                Value::from(picked)
            })
        }
        Value::Undefined(u) => match u.chain() {
            Some(same) => Ok(same),
            None => Err(u.error()),
        },
        other => Err(TemplateError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Build a dict value from key/value pairs
pub fn make_map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
    Value::from(pairs.into_iter().collect::<ValueMap>())
}
