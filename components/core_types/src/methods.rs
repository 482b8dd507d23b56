//! Methods callable on builtin values (`s.upper()`, `d.items()`, ...).
//!
//! Only non-mutating methods exist. Methods on markup return markup and
//! escape their string arguments.

use crate::error::{Result, TemplateError};
use crate::function::Kwargs;
use crate::markup::escape_str;
use crate::ops;
use crate::value::{Value, ValueMap};

/// Call a builtin method; `Ok(None)` when the type has no such method
pub fn call_method(value: &Value, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Option<Value>> {
    match value {
        Value::String(s) | Value::Markup(s) => {
            let safe = value.is_safe();
            let rv = string_method(s, safe, name, args, kwargs)?;
            Ok(rv.map(|v| match (safe, v) {
                (true, Value::String(s)) => Value::Markup(s),
                (_, v) => v,
            }))
        }
        Value::Map(map) => map_method(map, name, args),
        Value::List(items) | Value::Tuple(items) => seq_method(items, name, args),
        Value::Float(f) if name == "is_integer" => Ok(Some(Value::Bool(f.fract() == 0.0))),
        _ => Ok(None),
    }
}

fn arg<'a>(args: &'a [Value], idx: usize) -> Option<&'a Value> {
    args.get(idx).filter(|v| !v.is_none())
}

fn str_arg<'a>(method: &str, args: &'a [Value], idx: usize) -> Result<Option<&'a str>> {
    match arg(args, idx) {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| {
            TemplateError::type_error(format!(
                "{}() argument must be str, not {}",
                method,
                v.type_name()
            ))
        }),
    }
}

fn int_arg(method: &str, args: &[Value], idx: usize) -> Result<Option<i64>> {
    match arg(args, idx) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            TemplateError::type_error(format!(
                "'{}' object cannot be interpreted as an integer in {}()",
                v.type_name(),
                method
            ))
        }),
    }
}

fn escaped_arg(safe: bool, v: &str, source: &Value) -> String {
    if safe && !source.is_safe() {
        escape_str(v)
    } else {
        v.to_string()
    }
}

fn split_whitespace_n(s: &str, maxsplit: Option<i64>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    let mut splits = 0;
    while !rest.is_empty() {
        if maxsplit.map_or(false, |m| m >= 0 && splits >= m) {
            out.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                out.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
                splits += 1;
            }
            None => {
                out.push(Value::from(rest));
                break;
            }
        }
    }
    out
}

/// Upper-case the first letter of every word and lower-case the rest
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn pad(s: &str, width: usize, fill: char, align: char) -> Result<String> {
    let len = s.chars().count();
    if len >= width {
        return Ok(s.to_string());
    }
    let total = width - len;
    ops::generated_len(fill.len_utf8(), total)?;
    let (left, right) = match align {
        '<' => (0, total),
        '>' => (total, 0),
        _ => (total / 2, total - total / 2),
    };
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(format!("{}{}{}", fill_str(left), s, fill_str(right)))
}

fn strip_chars<'a>(s: &'a str, chars: Option<&str>, left: bool, right: bool) -> &'a str {
    let matcher = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let s = if left { s.trim_start_matches(matcher) } else { s };
    if right {
        s.trim_end_matches(matcher)
    } else {
        s
    }
}

fn affix_matches(method: &str, s: &str, needle: &Value, prefix: bool) -> Result<bool> {
    let check = |n: &str| if prefix { s.starts_with(n) } else { s.ends_with(n) };
    match needle {
        Value::Tuple(items) | Value::List(items) => {
            for item in items.iter() {
                if item.as_str().map_or(false, check) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => match other.as_str() {
            Some(n) => Ok(check(n)),
            None => Err(TemplateError::type_error(format!(
                "{} first arg must be str or a tuple of str, not {}",
                method,
                other.type_name()
            ))),
        },
    }
}

fn char_index(s: &str, byte_idx: usize) -> i64 {
    s[..byte_idx].chars().count() as i64
}

fn string_method(s: &str, safe: bool, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Option<Value>> {
    let rv = match name {
        "lower" => Value::from(s.to_lowercase()),
        "upper" => Value::from(s.to_uppercase()),
        "title" => Value::from(title_case(s)),
        "capitalize" => Value::from(capitalize(s)),
        "swapcase" => Value::from(
            s.chars()
                .flat_map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<Vec<_>>()
                    } else {
                        c.to_uppercase().collect::<Vec<_>>()
                    }
                })
                .collect::<String>(),
        ),
        "strip" => Value::from(strip_chars(s, str_arg(name, args, 0)?, true, true)),
        "lstrip" => Value::from(strip_chars(s, str_arg(name, args, 0)?, true, false)),
        "rstrip" => Value::from(strip_chars(s, str_arg(name, args, 0)?, false, true)),
        "split" | "rsplit" => {
            let sep = str_arg(name, args, 0)?.or_else(|| kwargs.get("sep").and_then(Value::as_str));
            let maxsplit = int_arg(name, args, 1)?
                .or_else(|| kwargs.get("maxsplit").and_then(Value::as_i64));
            let parts: Vec<Value> = match sep {
                None => split_whitespace_n(s, maxsplit),
                Some("") => return Err(TemplateError::invalid_operation("empty separator")),
                Some(sep) => match (name, maxsplit) {
                    (_, None) => s.split(sep).map(Value::from).collect(),
                    (_, Some(m)) if m < 0 => s.split(sep).map(Value::from).collect(),
                    ("split", Some(m)) => s.splitn(m as usize + 1, sep).map(Value::from).collect(),
                    (_, Some(m)) => {
                        let mut parts: Vec<Value> =
                            s.rsplitn(m as usize + 1, sep).map(Value::from).collect();
                        parts.reverse();
                        parts
                    }
                },
            };
            Value::from(parts)
        }
        "splitlines" => Value::from(s.lines().map(Value::from).collect::<Vec<_>>()),
        "startswith" | "endswith" => {
            let needle = args.first().ok_or_else(|| {
                TemplateError::type_error(format!("{}() takes at least 1 argument (0 given)", name))
            })?;
            Value::Bool(affix_matches(name, s, needle, name == "startswith")?)
        }
        "replace" => {
            let old = str_arg(name, args, 0)?.unwrap_or_default();
            let new = match args.get(1) {
                Some(v) => escaped_arg(safe, v.as_str().unwrap_or_default(), v),
                None => {
                    return Err(TemplateError::type_error(
                        "replace() takes at least 2 arguments",
                    ))
                }
            };
            match int_arg(name, args, 2)? {
                Some(count) if count >= 0 => Value::from(s.replacen(old, &new, count as usize)),
                _ => Value::from(s.replace(old, &new)),
            }
        }
        "find" | "rfind" | "index" | "rindex" => {
            let needle = str_arg(name, args, 0)?.unwrap_or_default();
            let found = if name.starts_with('r') { s.rfind(needle) } else { s.find(needle) };
            match (found, name) {
                (Some(idx), _) => Value::Int(char_index(s, idx)),
                (None, "find" | "rfind") => Value::Int(-1),
                (None, _) => return Err(TemplateError::invalid_operation("substring not found")),
            }
        }
        "count" => {
            let needle = str_arg(name, args, 0)?.unwrap_or_default();
            if needle.is_empty() {
                Value::from(s.chars().count() + 1)
            } else {
                Value::from(s.matches(needle).count())
            }
        }
        "join" => {
            let items = ops::to_vec(args.first().unwrap_or(&Value::None))?;
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                let text = ops::to_string(item)?;
                parts.push(escaped_arg(safe, &text, item));
            }
            Value::from(parts.join(s))
        }
        "center" | "ljust" | "rjust" => {
            let width = int_arg(name, args, 0)?.unwrap_or(0).max(0) as usize;
            let fill = str_arg(name, args, 1)?.and_then(|f| f.chars().next()).unwrap_or(' ');
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Value::from(pad(s, width, fill, align)?)
        }
        "zfill" => {
            let width = int_arg(name, args, 0)?.unwrap_or(0).max(0) as usize;
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            let padded = pad(digits, width.saturating_sub(sign.len()), '0', '>')?;
            Value::from(format!("{}{}", sign, padded))
        }
        "partition" | "rpartition" => {
            let sep = str_arg(name, args, 0)?.unwrap_or_default();
            let found = if name == "partition" { s.find(sep) } else { s.rfind(sep) };
            let parts = match found {
                Some(idx) => vec![&s[..idx], sep, &s[idx + sep.len()..]],
                None if name == "partition" => vec![s, "", ""],
                None => vec!["", "", s],
            };
            Value::tuple(parts.into_iter().map(Value::from).collect())
        }
        "isdigit" | "isnumeric" | "isdecimal" => {
            Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_numeric()))
        }
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "islower" => Value::Bool(
            s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
        ),
        "isupper" => Value::Bool(
            s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
        ),
        "format" => Value::from(str_format(s, safe, args, kwargs)?),
        "format_map" => {
            let map = args.first().and_then(Value::as_map).ok_or_else(|| {
                TemplateError::type_error("format_map() argument must be a mapping")
            })?;
            let kwargs: Kwargs = map
                .iter()
                .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
                .collect();
            Value::from(str_format(s, safe, &[], &kwargs)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(rv))
}

fn map_method(map: &ValueMap, name: &str, args: &[Value]) -> Result<Option<Value>> {
    let rv = match name {
        "items" => Value::from(
            map.iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect::<Vec<_>>(),
        ),
        "keys" => Value::from(map.keys().cloned().collect::<Vec<_>>()),
        "values" => Value::from(map.values().cloned().collect::<Vec<_>>()),
        "get" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            map.get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
        }
        "copy" => Value::from(map.clone()),
        _ => return Ok(None),
    };
    Ok(Some(rv))
}

fn seq_method(items: &[Value], name: &str, args: &[Value]) -> Result<Option<Value>> {
    let needle = args.first().cloned().unwrap_or(Value::None);
    let rv = match name {
        "count" => Value::from(items.iter().filter(|v| **v == needle).count()),
        "index" => match items.iter().position(|v| *v == needle) {
            Some(idx) => Value::from(idx),
            None => {
                return Err(TemplateError::invalid_operation(format!(
                    "{} is not in list",
                    needle.repr()
                )))
            }
        },
        "copy" => Value::from(items.to_vec()),
        _ => return Ok(None),
    };
    Ok(Some(rv))
}

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]` spec
#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    ty: Option<char>,
}

fn parse_format_spec(spec: &str) -> Result<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().map_or(false, is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).map_or(false, char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if chars.get(i) == Some(&',') {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).map_or(false, char::is_ascii_digit) {
            i += 1;
        }
        out.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if let Some(&c) = chars.get(i) {
        out.ty = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(TemplateError::invalid_operation(format!(
            "Invalid format specifier '{}'",
            spec
        )));
    }
    Ok(out)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, frac) = match digits.find('.') {
        Some(idx) => (&digits[..idx], &digits[idx..]),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (idx, c) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(frac);
    out
}

fn apply_format_spec(value: &Value, spec: &FormatSpec) -> Result<String> {
    let numeric = value.is_number();
    let (negative, body) = match (spec.ty, value) {
        (Some('f' | 'F'), _) | (None, Value::Float(_)) if spec.precision.is_some() || spec.ty.is_some() => {
            let f = value.as_f64().ok_or_else(|| bad_format_type(spec, value))?;
            (f < 0.0, format!("{:.*}", spec.precision.unwrap_or(6), f.abs()))
        }
        (Some('e' | 'E'), _) => {
            let f = value.as_f64().ok_or_else(|| bad_format_type(spec, value))?;
            let s = python_exp(f.abs(), spec.precision.unwrap_or(6));
            (f < 0.0, if spec.ty == Some('E') { s.to_uppercase() } else { s })
        }
        (Some('%'), _) => {
            let f = value.as_f64().ok_or_else(|| bad_format_type(spec, value))?;
            (f < 0.0, format!("{:.*}%", spec.precision.unwrap_or(6), f.abs() * 100.0))
        }
        (Some(c @ ('d' | 'x' | 'X' | 'o' | 'b')), _) => {
            let i = match value {
                Value::Int(i) => *i,
                Value::Bool(b) => *b as i64,
                _ => return Err(bad_format_type(spec, value)),
            };
            let abs = i.unsigned_abs();
            let digits = match c {
                'x' => format!("{:x}", abs),
                'X' => format!("{:X}", abs),
                'o' => format!("{:o}", abs),
                'b' => format!("{:b}", abs),
                _ => abs.to_string(),
            };
            (i < 0, digits)
        }
        (Some('s') | None, _) => {
            if numeric {
                let text = value.to_string();
                match text.strip_prefix('-') {
                    Some(rest) => (true, rest.to_string()),
                    None => (false, text),
                }
            } else {
                let mut text = ops::to_string(value)?;
                if let Some(p) = spec.precision {
                    text = text.chars().take(p).collect();
                }
                (false, text)
            }
        }
        _ => return Err(bad_format_type(spec, value)),
    };
    let body = if spec.grouping { group_thousands(&body) } else { body };
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    let fill = spec.fill.unwrap_or(if spec.zero { '0' } else { ' ' });
    let align = spec
        .align
        .unwrap_or(if spec.zero && numeric { '=' } else if numeric { '>' } else { '<' });
    if align == '=' {
        let padded = pad(&body, spec.width.saturating_sub(sign.len()), fill, '>')?;
        return Ok(format!("{}{}", sign, padded));
    }
    pad(&format!("{}{}", sign, body), spec.width, fill, align)
}

fn bad_format_type(spec: &FormatSpec, value: &Value) -> TemplateError {
    TemplateError::invalid_operation(format!(
        "Unknown format code '{}' for object of type '{}'",
        spec.ty.unwrap_or('s'),
        value.type_name()
    ))
}

fn python_exp(f: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, f);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

fn lookup_field(root: Value, path: &str) -> Result<Value> {
    let mut current = root;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (attr, index) = match part.split_once('[') {
            Some((attr, rest)) => (attr, Some(rest.trim_end_matches(']'))),
            None => (part, None),
        };
        if !attr.is_empty() {
            current = ops::get_attr(&current, attr)?.unwrap_or(Value::None);
        }
        if let Some(index) = index {
            let key = index
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::from(index));
            current = ops::get_item(&current, &key)?.unwrap_or(Value::None);
        }
    }
    Ok(current)
}

/// `str.format` with positional and named fields
pub fn str_format(fmt: &str, safe: bool, args: &[Value], kwargs: &Kwargs) -> Result<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.char_indices().peekable();
    let mut auto_idx = 0usize;
    while let Some((_, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|(_, c)| *c) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(TemplateError::invalid_operation(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(TemplateError::invalid_operation(
                        "Single '{' encountered in format string",
                    ));
                }
                let (name, spec) = match field.split_once(':') {
                    Some((n, s)) => (n, Some(s)),
                    None => (field.as_str(), None),
                };
                let (name, conversion) = match name.split_once('!') {
                    Some((n, conv)) => (n, Some(conv)),
                    None => (name, None),
                };
                let head_end = name.find(['.', '[']).unwrap_or(name.len());
                let (head, path) = name.split_at(head_end);
                let root = if head.is_empty() {
                    let v = args.get(auto_idx).cloned();
                    auto_idx += 1;
                    v
                } else if let Ok(idx) = head.parse::<usize>() {
                    args.get(idx).cloned()
                } else {
                    kwargs.get(head).cloned()
                };
                let root = root.ok_or_else(|| {
                    TemplateError::invalid_operation(if head.is_empty() || head.parse::<usize>().is_ok() {
                        "Replacement index out of range for positional args tuple".to_string()
                    } else {
                        format!("KeyError: {}", crate::value::repr_str(head))
                    })
                })?;
                let value = lookup_field(root, path)?;
                let value = match conversion {
                    Some("r") => Value::from(value.repr()),
                    Some("s") => Value::from(ops::to_string(&value)?),
                    _ => value,
                };
                let text = match spec {
                    Some(spec) if !spec.is_empty() => apply_format_spec(&value, &parse_format_spec(spec)?)?,
                    _ => ops::to_string(&value)?,
                };
                out.push_str(&escaped_arg(safe, &text, &value));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// printf-style `fmt % args` formatting
pub fn printf(fmt: &str, args: &Value) -> Result<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Map(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mut next_arg = positional.iter();
    let mut used_any = false;
    let mut out = String::with_capacity(fmt.len());
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }
        let incomplete = || TemplateError::invalid_operation("incomplete format");
        let mut mapping_key = None;
        if chars.get(i) == Some(&'(') {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|c| *c == ')')
                .map(|p| start + p)
                .ok_or_else(incomplete)?;
            mapping_key = Some(chars[start..end].iter().collect::<String>());
            i = end + 1;
        }
        let mut flags = String::new();
        while let Some(&f) = chars.get(i).filter(|c| matches!(c, '-' | '+' | ' ' | '0' | '#')) {
            flags.push(f);
            i += 1;
        }
        let start = i;
        while chars.get(i).map_or(false, char::is_ascii_digit) {
            i += 1;
        }
        let width: usize = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
        let mut precision = None;
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).map_or(false, char::is_ascii_digit) {
                i += 1;
            }
            precision = Some(chars[start..i].iter().collect::<String>().parse().unwrap_or(0));
        }
        let conv = *chars.get(i).ok_or_else(incomplete)?;
        i += 1;
        if conv == '%' {
            out.push('%');
            continue;
        }
        let value = match &mapping_key {
            Some(key) => args
                .as_map()
                .and_then(|m| m.get(&Value::from(key.as_str())))
                .cloned()
                .ok_or_else(|| {
                    TemplateError::invalid_operation(format!("KeyError: {}", crate::value::repr_str(key)))
                })?,
            None => {
                used_any = true;
                next_arg.next().cloned().ok_or_else(|| {
                    TemplateError::type_error("not enough arguments for format string")
                })?
            }
        };
        let spec = FormatSpec {
            fill: None,
            align: Some(if flags.contains('-') { '<' } else if flags.contains('0') { '=' } else { '>' }),
            sign: flags.chars().find(|c| matches!(c, '+' | ' ')),
            zero: flags.contains('0') && !flags.contains('-'),
            width,
            grouping: false,
            precision,
            ty: None,
        };
        let text = match conv {
            's' => {
                let s = ops::to_string(&value)?;
                let s = match precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                pad(&s, width, ' ', if flags.contains('-') { '<' } else { '>' })?
            }
            'r' => pad(&value.repr(), width, ' ', if flags.contains('-') { '<' } else { '>' })?,
            'd' | 'i' | 'u' => {
                let int = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    Value::Int(_) | Value::Bool(_) => value.clone(),
                    other => {
                        return Err(TemplateError::type_error(format!(
                            "%{} format: a number is required, not {}",
                            conv,
                            other.type_name()
                        )))
                    }
                };
                apply_format_spec(&int, &FormatSpec { ty: Some('d'), precision: None, ..spec })?
            }
            'f' | 'F' | 'e' | 'E' | 'x' | 'X' | 'o' => {
                if !value.is_number() {
                    return Err(TemplateError::type_error(format!(
                        "%{} format: a number is required, not {}",
                        conv,
                        value.type_name()
                    )));
                }
                apply_format_spec(&value, &FormatSpec { ty: Some(conv), ..spec })?
            }
            'c' => match &value {
                Value::Int(i) => char::from_u32(*i as u32).map(String::from).unwrap_or_default(),
                other => ops::to_string(other)?.chars().take(1).collect(),
            },
            other => {
                return Err(TemplateError::invalid_operation(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&text);
    }
    if used_any && next_arg.next().is_some() {
        return Err(TemplateError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}
