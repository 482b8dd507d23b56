//! HTML escaping and markup strings.

use crate::error::Result;
use crate::ops;
use crate::value::Value;

/// Escape `& < > ' "` for HTML/XML output
pub fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a value into markup; markup input passes through untouched
pub fn escape(value: &Value) -> Result<Value> {
    if value.is_safe() {
        return Ok(match value {
            Value::Markup(_) => value.clone(),
            other => Value::from_safe_string(other.to_string()),
        });
    }
    Ok(Value::from_safe_string(escape_str(&ops::to_string(value)?)))
}

/// Like [`escape`] but treats none as the empty string
pub fn escape_silent(value: &Value) -> Result<Value> {
    if value.is_none() {
        return Ok(Value::from_safe_string(""));
    }
    escape(value)
}

/// Mark a value as safe without escaping
pub fn mark_safe(value: &Value) -> Result<Value> {
    match value {
        Value::Markup(_) => Ok(value.clone()),
        other => Ok(Value::from_safe_string(ops::to_string(other)?)),
    }
}

/// Join values into one string; if any part is markup the others are escaped
/// and the result is markup
pub fn markup_join(values: &[Value]) -> Result<Value> {
    if values.iter().any(Value::is_safe) {
        let mut out = String::new();
        for v in values {
            out.push_str(escape(v)?.as_str().unwrap_or_default());
        }
        return Ok(Value::from_safe_string(out));
    }
    let mut out = String::new();
    for v in values {
        out.push_str(&ops::to_string(v)?);
    }
    Ok(Value::from(out))
}

/// Remove tags and collapse whitespace, decoding the basic entities
pub fn striptags(s: &str) -> String {
    let mut text = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let after = &rest[start..];
        let end = if after.starts_with("<!--") {
            after.find("-->").map(|i| i + 3)
        } else {
            after.find('>').map(|i| i + 1)
        };
        match end {
            Some(end) => rest = &after[end..],
            None => {
                text.push_str(after);
                rest = "";
            }
        }
    }
    text.push_str(rest);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    unescape(&collapsed)
}

/// Decode the entities produced by [`escape_str`] plus `&quot;` and `&nbsp;`
pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&#34;", "\"")
        .replace("&quot;", "\"")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}
