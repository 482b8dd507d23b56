//! Serialization filters: `tojson` and `pprint`

use core_types::{EnvironmentAccess, Function, Kwargs, Result, TemplateError, Value};
use serde::Serialize;

use crate::args::ArgParser;
use crate::{insert, FunctionMap};

/// JSON output that is safe to embed in HTML
pub struct JsonFilters;

impl JsonFilters {
    /// Serialize `value` to JSON, optionally indented
    pub fn dumps(value: &Value, indent: Option<usize>) -> Result<String> {
        let not_serializable =
            |e: serde_json::Error| TemplateError::type_error(format!("Object is not JSON serializable: {}", e));
        let width = match indent {
            None => return serde_json::to_string(value).map_err(not_serializable),
            Some(width) => width,
        };
        let pad = vec![b' '; width];
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&pad);
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut ser).map_err(not_serializable)?;
        String::from_utf8(out).map_err(|e| TemplateError::runtime(e.to_string()))
    }

    /// Escape `<`, `>`, `&` and `'` so the JSON can sit inside `<script>`
    /// tags and single-quoted attributes
    pub fn htmlsafe(json: &str) -> String {
        json.replace('<', "\\u003c")
            .replace('>', "\\u003e")
            .replace('&', "\\u0026")
            .replace('\'', "\\u0027")
    }
}

fn do_tojson(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("tojson", args, kwargs);
    let value = p.required("value")?;
    let indent = match p.int("indent")? {
        Some(n) => Some(n),
        None => env.policy("json.indent").and_then(|v| v.as_i64()),
    };
    p.finish()?;
    if let Value::Undefined(u) = &value {
        return Err(u.error());
    }
    let json = JsonFilters::dumps(&value, indent.map(|n| n.max(0) as usize))?;
    Ok(Value::from_safe_string(JsonFilters::htmlsafe(&json)))
}

fn do_pprint(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("pprint", args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    Ok(Value::from(value.repr()))
}

/// Register the serialization filters
pub(crate) fn register(map: &mut FunctionMap) {
    insert(map, Function::with_environment("tojson", do_tojson));
    insert(map, Function::new("pprint", do_pprint));
}
