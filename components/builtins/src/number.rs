//! Numeric filters

use core_types::{ops, Function, Kwargs, Result, TemplateError, Value};

use crate::args::ArgParser;
use crate::{insert, FunctionMap};

/// Rounding strategy of the `round` filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMethod {
    /// Round half to even, like Python's `round()`
    Common,
    /// Always round up
    Ceil,
    /// Always round down
    Floor,
}

impl RoundMethod {
    /// Parse the method name passed to the filter
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "common" => Ok(RoundMethod::Common),
            "ceil" => Ok(RoundMethod::Ceil),
            "floor" => Ok(RoundMethod::Floor),
            _ => Err(TemplateError::runtime(
                "method must be 'common', 'ceil' or 'floor'",
            )),
        }
    }
}

/// Numeric conversions behind the number filters
pub struct NumberFilters;

impl NumberFilters {
    /// Round `value` to `precision` decimal places
    pub fn round(value: f64, precision: i32, method: RoundMethod) -> f64 {
        let factor = 10f64.powi(precision);
        let scaled = value * factor;
        let rounded = match method {
            RoundMethod::Ceil => scaled.ceil(),
            RoundMethod::Floor => scaled.floor(),
            RoundMethod::Common => {
                let floor = scaled.floor();
                let diff = scaled - floor;
                if diff > 0.5 || (diff == 0.5 && floor % 2.0 != 0.0) {
                    floor + 1.0
                } else {
                    floor
                }
            }
        };
        rounded / factor
    }

    /// Parse an integer the way `int()` does, with an optional base prefix
    pub fn parse_int(s: &str, base: u32) -> Option<i64> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let prefix = match base {
            16 => Some(["0x", "0X"]),
            8 => Some(["0o", "0O"]),
            2 => Some(["0b", "0B"]),
            _ => None,
        };
        let digits = prefix
            .and_then(|p| p.iter().find_map(|p| digits.strip_prefix(p)))
            .unwrap_or(digits)
            .replace('_', "");
        let magnitude = i64::from_str_radix(&digits, base).ok()?;
        Some(if negative { -magnitude } else { magnitude })
    }

    /// Human readable file size (`13 kB`, `4.1 MB`, `102 Bytes`)
    pub fn filesizeformat(bytes: f64, binary: bool) -> String {
        let base: f64 = if binary { 1024.0 } else { 1000.0 };
        let prefixes = if binary {
            ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"]
        } else {
            ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"]
        };
        if bytes == 1.0 {
            return "1 Byte".to_string();
        }
        if bytes < base {
            return format!("{} Bytes", bytes as i64);
        }
        let mut unit = base;
        for (i, prefix) in prefixes.iter().enumerate() {
            unit = base.powi(i as i32 + 2);
            if bytes < unit {
                return format!("{:.1} {}", base * bytes / unit, prefix);
            }
        }
        format!("{:.1} {}", base * bytes / unit, prefixes[prefixes.len() - 1])
    }
}

fn do_abs(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("abs", args, kwargs);
    let value = p.required("x")?;
    p.finish()?;
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::from)
            .ok_or_else(|| TemplateError::invalid_operation("integer overflow")),
        Value::Bool(b) => Ok(Value::from(b as i64)),
        Value::Float(f) => Ok(Value::from(f.abs())),
        Value::Undefined(u) => Err(u.error()),
        other => Err(TemplateError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn do_int(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("int", args, kwargs);
    let value = p.required("value")?;
    let default = p.next("default")?.unwrap_or(Value::Int(0));
    let base = p.int("base")?.unwrap_or(10);
    p.finish()?;
    if !(2..=36).contains(&base) {
        return Err(TemplateError::runtime("int() base must be >= 2 and <= 36"));
    }
    let converted = match &value {
        Value::Int(_) => Some(value.clone()),
        Value::Bool(b) => Some(Value::from(*b as i64)),
        Value::Float(f) if f.is_finite() => Some(Value::from(f.trunc() as i64)),
        Value::String(s) | Value::Markup(s) => NumberFilters::parse_int(s, base as u32)
            .or_else(|| {
                (base == 10)
                    .then(|| s.trim().parse::<f64>().ok())
                    .flatten()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
            .map(Value::from),
        _ => None,
    };
    Ok(converted.unwrap_or(default))
}

fn do_float(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("float", args, kwargs);
    let value = p.required("value")?;
    let default = p.next("default")?.unwrap_or(Value::Float(0.0));
    p.finish()?;
    let converted = match &value {
        Value::Float(_) => Some(value.clone()),
        Value::Int(_) | Value::Bool(_) => value.as_f64().map(Value::from),
        Value::String(s) | Value::Markup(s) => {
            let s = s.trim();
            match s.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => Some(Value::from(f64::INFINITY)),
                "-inf" | "-infinity" => Some(Value::from(f64::NEG_INFINITY)),
                "nan" => Some(Value::from(f64::NAN)),
                _ => s.replace('_', "").parse::<f64>().ok().map(Value::from),
            }
        }
        _ => None,
    };
    Ok(converted.unwrap_or(default))
}

fn do_round(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("round", args, kwargs);
    let value = p.required("value")?;
    let precision = p.int("precision")?.unwrap_or(0);
    let method = RoundMethod::parse(&p.string("method")?.unwrap_or_else(|| "common".to_string()))?;
    p.finish()?;
    let number = match &value {
        Value::Undefined(u) => return Err(u.error()),
        other => other.as_f64().ok_or_else(|| {
            TemplateError::type_error(format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ))
        })?,
    };
    Ok(Value::from(NumberFilters::round(number, precision as i32, method)))
}

fn do_filesizeformat(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("filesizeformat", args, kwargs);
    let value = p.required("value")?;
    let binary = p.flag("binary", false)?;
    p.finish()?;
    let bytes = match &value {
        Value::String(s) | Value::Markup(s) => s.trim().parse::<f64>().map_err(|_| {
            TemplateError::runtime(format!(
                "could not convert string to float: {}",
                core_types::repr_str(s)
            ))
        })?,
        other => other.as_f64().ok_or_else(|| {
            TemplateError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        })?,
    };
    Ok(Value::from(NumberFilters::filesizeformat(bytes, binary)))
}

/// Register the numeric filters
pub(crate) fn register(map: &mut FunctionMap) {
    insert(map, Function::new("abs", do_abs));
    insert(map, Function::new("int", do_int));
    insert(map, Function::new("float", do_float));
    insert(map, Function::new("round", do_round));
    insert(map, Function::new("filesizeformat", do_filesizeformat));
}

/// True if the value is an integer in the template sense (not a boolean)
pub(crate) fn is_integer(value: &Value) -> bool {
    matches!(value, Value::Int(_))
}

/// Integer remainder used by `even`, `odd` and `divisibleby`
pub(crate) fn remainder(value: &Value, divisor: &Value) -> Result<Value> {
    ops::binary_op(core_types::BinOp::Mod, value, divisor)
}
