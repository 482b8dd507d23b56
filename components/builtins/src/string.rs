//! String filters
//!
//! Text transformations (`upper`, `indent`, `truncate`, `wordwrap`,
//! `urlize`, ...). The pure string work lives on [`StringFilters`] so it can
//! be used without a template; [`register`] adapts each one to the calling
//! convention of template filters.
//!
//! Filters that take a markup string return markup, so `{{ html|upper }}`
//! stays safe; filters that build markup themselves (`xmlattr`, `urlize`)
//! only return markup when the evaluation context autoescapes.

use std::sync::OnceLock;

use core_types::markup::{self, escape_str};
use core_types::methods::{capitalize, printf, title_case};
use core_types::{
    ops, ContextAccess, EnvironmentAccess, EvalContext, Function, Kwargs, Result, TemplateError,
    Value, ValueMap,
};
use regex::Regex;

use crate::args::ArgParser;
use crate::{insert, FunctionMap};

/// Default `truncate` leeway when the environment sets no policy
pub const TRUNCATE_LEEWAY: i64 = 5;

/// Default `rel` attribute of links made by `urlize`
pub const URLIZE_REL: &str = "noopener";

/// Rebuild a string result with the safety of the input
pub(crate) fn soft(source: &Value, s: String) -> Value {
    if source.is_safe() {
        Value::from_safe_string(s)
    } else {
        Value::from(s)
    }
}

pub(crate) fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| TemplateError::runtime(format!("invalid builtin pattern: {}", e)))?;
    Ok(cell.get_or_init(|| re))
}

static WORD_RE: OnceLock<Regex> = OnceLock::new();
static LEADING_PUNCT_RE: OnceLock<Regex> = OnceLock::new();
static TRAILING_PUNCT_RE: OnceLock<Regex> = OnceLock::new();
static HTTP_RE: OnceLock<Regex> = OnceLock::new();
static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static SCHEME_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_KEY_RE: OnceLock<Regex> = OnceLock::new();

const HTTP_PATTERN: &str = concat!(
    r"(?i)^(",
    r"(https?://|www\.)(([\w%-]+\.)+)?([a-z]{2,63}|xn--[\w%]{2,59})",
    r"|([\w%-]{2,63}\.)+(com|net|int|edu|gov|org|info|mil)",
    r"|(https?://)((\d{1,3})(\.\d{1,3}){3}|\[([\da-f]{0,4}:){2}([\da-f]{0,4}:?){1,6}\])",
    r")(:\d{1,5})?([/?#]\S*)?$",
);

/// Options for [`StringFilters::urlize`]
#[derive(Debug, Clone, Default)]
pub struct UrlizeOptions {
    /// Shorten link text longer than this
    pub trim_url_limit: Option<usize>,
    /// `rel` attribute of generated links
    pub rel: Option<String>,
    /// `target` attribute of generated links
    pub target: Option<String>,
    /// Additional scheme prefixes treated as links (`ftp://`, `mailto:`)
    pub extra_schemes: Vec<String>,
}

/// String transformations behind the text filters
pub struct StringFilters;

impl StringFilters {
    /// Center `s` in a field of `width` characters
    pub fn center(s: &str, width: usize) -> String {
        let len = s.chars().count();
        if len >= width {
            return s.to_string();
        }
        let margin = width - len;
        let left = margin / 2 + (margin & width & 1);
        format!("{}{}{}", " ".repeat(left), s, " ".repeat(margin - left))
    }

    /// Indent every line but the first by `indent`
    pub fn indent(s: &str, indent: &str, first: bool, blank: bool) -> String {
        let text = format!("{}\n", s);
        let lines: Vec<&str> = text.lines().collect();
        let mut out = String::with_capacity(text.len() + lines.len() * indent.len());
        for (idx, line) in lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
                if blank || !line.is_empty() {
                    out.push_str(indent);
                }
            }
            out.push_str(line);
        }
        if first {
            out.insert_str(0, indent);
        }
        out
    }

    /// Shorten `s` to `length` characters, ending with `end`
    ///
    /// Strings within `leeway` characters of the limit are returned as is.
    /// Unless `killwords` is set, the cut happens at the last space.
    pub fn truncate(s: &str, length: usize, killwords: bool, end: &str, leeway: usize) -> Result<String> {
        let end_len = end.chars().count();
        if length < end_len {
            return Err(TemplateError::runtime(format!(
                "expected length >= {}, got {}",
                end_len, length
            )));
        }
        if s.chars().count() <= length + leeway {
            return Ok(s.to_string());
        }
        let head: String = s.chars().take(length - end_len).collect();
        if killwords {
            return Ok(head + end);
        }
        let kept = match head.rfind(' ') {
            Some(idx) => &head[..idx],
            None => head.as_str(),
        };
        Ok(format!("{}{}", kept, end))
    }

    /// Wrap each line of `s` to `width` characters, joining with `wrapstring`
    pub fn wordwrap(
        s: &str,
        width: usize,
        break_long_words: bool,
        wrapstring: &str,
        break_on_hyphens: bool,
    ) -> String {
        let width = width.max(1);
        let mut paragraphs = Vec::new();
        for line in s.lines() {
            paragraphs.push(wrap_line(line, width, break_long_words, break_on_hyphens).join(wrapstring));
        }
        paragraphs.join(wrapstring)
    }

    /// Number of words in `s`
    pub fn wordcount(s: &str) -> Result<usize> {
        Ok(cached_regex(&WORD_RE, r"\w+")?.find_iter(s).count())
    }

    /// Percent-encode `s` for a URL path or query
    pub fn url_quote(s: &str, for_qs: bool) -> String {
        let mut out = String::with_capacity(s.len());
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' => {
                    out.push(byte as char)
                }
                b'/' if !for_qs => out.push('/'),
                b' ' if for_qs => out.push('+'),
                other => out.push_str(&format!("%{:02X}", other)),
            }
        }
        out
    }

    /// Turn URLs and email addresses in plain text into links
    ///
    /// The text is HTML-escaped first; the result is markup source.
    pub fn urlize(text: &str, options: &UrlizeOptions) -> Result<String> {
        let leading = cached_regex(&LEADING_PUNCT_RE, r"^([(<]|&lt;)+")?;
        let trailing = cached_regex(&TRAILING_PUNCT_RE, r"([)>.,\n]|&gt;)+$")?;
        let http = cached_regex(&HTTP_RE, HTTP_PATTERN)?;
        let email = cached_regex(&EMAIL_RE, r"^\S+@\w[\w.-]*\.\w+$")?;

        let trim_url = |url: &str| -> String {
            match options.trim_url_limit {
                Some(limit) if url.chars().count() > limit => {
                    format!("{}...", url.chars().take(limit).collect::<String>())
                }
                _ => url.to_string(),
            }
        };
        let rel_attr = match &options.rel {
            Some(rel) if !rel.is_empty() => format!(" rel=\"{}\"", escape_str(rel)),
            _ => String::new(),
        };
        let target_attr = match &options.target {
            Some(target) if !target.is_empty() => format!(" target=\"{}\"", escape_str(target)),
            _ => String::new(),
        };

        let escaped = escape_str(text);
        let mut out = String::with_capacity(escaped.len());
        for (word, is_space) in split_keep_whitespace(&escaped) {
            if is_space {
                out.push_str(word);
                continue;
            }
            let mut head = "";
            let mut middle = word.to_string();
            let mut tail = String::new();
            if let Some(m) = leading.find(&middle) {
                head = &word[..m.end()];
                middle = middle[m.end()..].to_string();
            }
            if let Some(m) = trailing.find(&middle) {
                tail = middle[m.start()..].to_string();
                middle.truncate(m.start());
            }
            for (open, close) in [("(", ")"), ("<", ">"), ("&lt;", "&gt;")] {
                let opened = middle.matches(open).count();
                if opened <= middle.matches(close).count() {
                    continue;
                }
                for _ in 0..opened.min(tail.matches(close).count()) {
                    if let Some(idx) = tail.find(close) {
                        let end = idx + close.len();
                        middle.push_str(&tail[..end]);
                        tail = tail[end..].to_string();
                    }
                }
            }

            let linked = if http.is_match(&middle) {
                let href = if middle.starts_with("https://") || middle.starts_with("http://") {
                    middle.clone()
                } else {
                    format!("https://{}", middle)
                };
                format!(
                    "<a href=\"{}\"{}{}>{}</a>",
                    href,
                    rel_attr,
                    target_attr,
                    trim_url(&middle)
                )
            } else if middle.starts_with("mailto:") && email.is_match(&middle[7..]) {
                format!("<a href=\"{}\">{}</a>", middle, &middle[7..])
            } else if middle.contains('@')
                && !middle.starts_with("www.")
                && !middle.contains(':')
                && email.is_match(&middle)
            {
                format!("<a href=\"mailto:{}\">{}</a>", middle, middle)
            } else if options
                .extra_schemes
                .iter()
                .any(|scheme| middle != *scheme && middle.starts_with(scheme.as_str()))
            {
                format!("<a href=\"{}\"{}{}>{}</a>", middle, rel_attr, target_attr, middle)
            } else {
                middle
            };
            out.push_str(head);
            out.push_str(&linked);
            out.push_str(&tail);
        }
        Ok(out)
    }

    /// Render a mapping as SGML/XML attributes
    ///
    /// None and undefined values are skipped. Keys containing whitespace,
    /// `/`, `>` or `=` are rejected.
    pub fn xmlattr(attrs: &ValueMap, autospace: bool) -> Result<String> {
        let bad_key = cached_regex(&ATTR_KEY_RE, r"[\s/>=]")?;
        let mut parts = Vec::with_capacity(attrs.len());
        for (key, value) in attrs {
            if value.is_none() || value.is_undefined() {
                continue;
            }
            let key = ops::to_string(key)?;
            if bad_key.is_match(&key) {
                return Err(TemplateError::runtime(format!(
                    "Invalid character in attribute name: {}",
                    core_types::repr_str(&key)
                )));
            }
            let value = markup::escape(value)?;
            parts.push(format!(
                "{}=\"{}\"",
                escape_str(&key),
                value.as_str().unwrap_or_default()
            ));
        }
        let mut out = parts.join(" ");
        if autospace && !out.is_empty() {
            out.insert(0, ' ');
        }
        Ok(out)
    }
}

fn split_keep_whitespace(s: &str) -> Vec<(&str, bool)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;
    for (idx, c) in s.char_indices() {
        let space = c.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                parts.push((&s[start..idx], prev));
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if let Some(space) = in_space {
        parts.push((&s[start..], space));
    }
    parts
}

fn hyphen_chunks(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut chunks = Vec::new();
    let mut current = String::new();
    for (idx, c) in chars.iter().enumerate() {
        current.push(*c);
        let splits = *c == '-'
            && idx > 0
            && chars[idx - 1].is_alphanumeric()
            && chars.get(idx + 1).map_or(false, |n| n.is_alphanumeric());
        if splits {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn wrap_line(line: &str, width: usize, break_long_words: bool, break_on_hyphens: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in line.split_whitespace() {
        let chunks = if break_on_hyphens {
            hyphen_chunks(word)
        } else {
            vec![word.to_string()]
        };
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let glue = if idx == 0 && current_len > 0 { 1 } else { 0 };
            let chunk_len = chunk.chars().count();
            if current_len + glue + chunk_len <= width {
                if glue == 1 {
                    current.push(' ');
                }
                current.push_str(&chunk);
                current_len += glue + chunk_len;
                continue;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if chunk_len > width && break_long_words {
                let chars: Vec<char> = chunk.chars().collect();
                let mut pieces = chars.chunks(width).map(|p| p.iter().collect::<String>()).peekable();
                while let Some(piece) = pieces.next() {
                    if pieces.peek().is_some() {
                        lines.push(piece);
                    } else {
                        current_len = piece.chars().count();
                        current = piece;
                    }
                }
            } else {
                current_len = chunk_len;
                current = chunk;
            }
        }
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

fn text(value: &Value) -> Result<String> {
    ops::to_string(value)
}

fn string_filter(map: &mut FunctionMap, name: &'static str, f: fn(&str) -> String) {
    insert(
        map,
        Function::new(name, move |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new(name, args, kwargs);
            let value = p.required("s")?;
            p.finish()?;
            Ok(soft(&value, f(&text(&value)?)))
        }),
    );
}

fn do_escape(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("escape", args, kwargs);
    let value = p.required("s")?;
    p.finish()?;
    markup::escape(&value)
}

fn do_center(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("center", args, kwargs);
    let value = p.required("value")?;
    let width = p.int("width")?.unwrap_or(80).max(0) as usize;
    p.finish()?;
    ops::generated_len(1, width)?;
    Ok(soft(&value, StringFilters::center(&text(&value)?, width)))
}

fn do_format(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("format", args, kwargs);
    let value = p.required("value")?;
    let positional = p.rest();
    let named = p.take_kwargs();
    if !positional.is_empty() && !named.is_empty() {
        return Err(TemplateError::runtime(
            "can't handle positional and keyword arguments at the same time",
        ));
    }
    let safe = value.is_safe();
    let prepare = |v: Value| -> Result<Value> {
        if safe {
            markup::escape(&v)
        } else {
            Ok(v)
        }
    };
    let params = if named.is_empty() {
        Value::tuple(positional.into_iter().map(prepare).collect::<Result<_>>()?)
    } else {
        let mut map = ValueMap::new();
        for (k, v) in named.iter() {
            map.insert(Value::from(k), prepare(v.clone())?);
        }
        Value::from(map)
    };
    Ok(soft(&value, printf(&text(&value)?, &params)?))
}

fn do_indent(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("indent", args, kwargs);
    let value = p.required("s")?;
    let indent = match p.next("width")? {
        None => "    ".to_string(),
        Some(Value::String(s)) | Some(Value::Markup(s)) => s.to_string(),
        Some(other) => {
            let width = other.as_i64().ok_or_else(|| {
                TemplateError::type_error(format!(
                    "indent() width must be an integer or string, not {}",
                    other.type_name()
                ))
            })?;
            let width = width.max(0) as usize;
            ops::generated_len(1, width)?;
            " ".repeat(width)
        }
    };
    let first = p.flag("first", false)?;
    let blank = p.flag("blank", false)?;
    p.finish()?;
    Ok(soft(&value, StringFilters::indent(&text(&value)?, &indent, first, blank)))
}

fn do_replace(eval_ctx: &EvalContext, _: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("replace", args, kwargs);
    let value = p.required("s")?;
    let old = p.required("old")?;
    let new = p.required("new")?;
    let count = p.int("count")?;
    p.finish()?;

    let replace = |s: &str, old: &str, new: &str| match count {
        Some(n) if n >= 0 => s.replacen(old, new, n as usize),
        _ => s.replace(old, new),
    };
    if !eval_ctx.autoescape {
        return Ok(Value::from(replace(&text(&value)?, &text(&old)?, &text(&new)?)));
    }
    let source = if (old.is_safe() || new.is_safe()) && !value.is_safe() {
        markup::escape(&value)?
    } else {
        value.clone()
    };
    if !source.is_safe() {
        return Ok(Value::from(replace(&text(&source)?, &text(&old)?, &text(&new)?)));
    }
    let old = markup::escape(&old)?;
    let new = markup::escape(&new)?;
    Ok(Value::from_safe_string(replace(
        &text(&source)?,
        old.as_str().unwrap_or_default(),
        new.as_str().unwrap_or_default(),
    )))
}

fn do_trim(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("trim", args, kwargs);
    let value = p.required("value")?;
    let chars = p.string("chars")?;
    p.finish()?;
    let s = text(&value)?;
    let trimmed = match chars {
        Some(set) => s.trim_matches(|c| set.contains(c)).to_string(),
        None => s.trim().to_string(),
    };
    Ok(soft(&value, trimmed))
}

fn do_truncate(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("truncate", args, kwargs);
    let value = p.required("s")?;
    let length = p.int("length")?.unwrap_or(255);
    let killwords = p.flag("killwords", false)?;
    let end = p.string("end")?.unwrap_or_else(|| "...".to_string());
    let leeway = match p.int("leeway")? {
        Some(leeway) => leeway,
        None => env
            .policy("truncate.leeway")
            .and_then(|v| v.as_i64())
            .unwrap_or(TRUNCATE_LEEWAY),
    };
    p.finish()?;
    let out = StringFilters::truncate(
        &text(&value)?,
        length.max(0) as usize,
        killwords,
        &end,
        leeway.max(0) as usize,
    )?;
    Ok(soft(&value, out))
}

fn do_wordwrap(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("wordwrap", args, kwargs);
    let value = p.required("s")?;
    let width = p.int("width")?.unwrap_or(79);
    let break_long_words = p.flag("break_long_words", true)?;
    let wrapstring = match p.string("wrapstring")? {
        Some(s) => s,
        None => env
            .policy("newline_sequence")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "\n".to_string()),
    };
    let break_on_hyphens = p.flag("break_on_hyphens", true)?;
    p.finish()?;
    let out = StringFilters::wordwrap(
        &text(&value)?,
        width.max(1) as usize,
        break_long_words,
        &wrapstring,
        break_on_hyphens,
    );
    Ok(soft(&value, out))
}

fn do_wordcount(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("wordcount", args, kwargs);
    let value = p.required("s")?;
    p.finish()?;
    Ok(Value::from(StringFilters::wordcount(&text(&value)?)?))
}

fn do_urlencode(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("urlencode", args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    if let Some(s) = value.as_str() {
        return Ok(Value::from(StringFilters::url_quote(s, false)));
    }
    let pairs: Vec<(Value, Value)> = match &value {
        Value::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => ops::try_iter(other)?
            .map(|pair| {
                let items = ops::to_vec(&pair)?;
                match items.as_slice() {
                    [k, v] => Ok((k.clone(), v.clone())),
                    _ => Err(TemplateError::type_error(
                        "urlencode() expects a mapping or (key, value) pairs",
                    )),
                }
            })
            .collect::<Result<_>>()?,
    };
    let mut parts = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        parts.push(format!(
            "{}={}",
            StringFilters::url_quote(&text(&k)?, true),
            StringFilters::url_quote(&text(&v)?, true)
        ));
    }
    Ok(Value::from(parts.join("&")))
}

fn do_urlize(ctx: &dyn ContextAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let env = ctx.environment();
    let mut p = ArgParser::new("urlize", args, kwargs);
    let value = p.required("value")?;
    let trim_url_limit = p.int("trim_url_limit")?;
    let nofollow = p.flag("nofollow", false)?;
    let target = p.string("target")?;
    let rel = p.string("rel")?;
    let extra_schemes = p.next("extra_schemes")?;
    p.finish()?;

    let mut rel_parts: Vec<String> = rel
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if nofollow {
        rel_parts.push("nofollow".to_string());
    }
    let policy_rel = env
        .policy("urlize.rel")
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .unwrap_or_else(|| URLIZE_REL.to_string());
    rel_parts.extend(policy_rel.split_whitespace().map(str::to_string));
    rel_parts.sort();
    rel_parts.dedup();

    let target = target.or_else(|| {
        env.policy("urlize.target")
            .and_then(|v| v.as_str().map(str::to_string))
    });
    let schemes = match extra_schemes.or_else(|| env.policy("urlize.extra_schemes")) {
        None | Some(Value::None) => Vec::new(),
        Some(list) => ops::try_iter(&list)?
            .map(|s| text(&s))
            .collect::<Result<Vec<_>>>()?,
    };
    let scheme_re = cached_regex(&SCHEME_RE, r"^[a-zA-Z][\w+.-]*:(//)?$")?;
    if let Some(bad) = schemes.iter().find(|s| !scheme_re.is_match(s)) {
        return Err(TemplateError::runtime(format!(
            "{} is not a valid URI scheme prefix.",
            core_types::repr_str(bad)
        )));
    }

    let options = UrlizeOptions {
        trim_url_limit: trim_url_limit.map(|n| n.max(0) as usize),
        rel: (!rel_parts.is_empty()).then(|| rel_parts.join(" ")),
        target,
        extra_schemes: schemes,
    };
    let out = StringFilters::urlize(&text(&value)?, &options)?;
    if ctx.eval_context().autoescape {
        Ok(Value::from_safe_string(out))
    } else {
        Ok(Value::from(out))
    }
}

fn do_xmlattr(eval_ctx: &EvalContext, _: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("xmlattr", args, kwargs);
    let value = p.required("d")?;
    let autospace = p.flag("autospace", true)?;
    p.finish()?;
    let attrs = value.as_map().ok_or_else(|| {
        TemplateError::type_error(format!(
            "xmlattr() expects a mapping, not {}",
            value.type_name()
        ))
    })?;
    let out = StringFilters::xmlattr(attrs, autospace)?;
    if eval_ctx.autoescape {
        Ok(Value::from_safe_string(out))
    } else {
        Ok(Value::from(out))
    }
}

/// Register the string filters
pub(crate) fn register(map: &mut FunctionMap) {
    string_filter(map, "upper", |s| s.to_uppercase());
    string_filter(map, "lower", |s| s.to_lowercase());
    string_filter(map, "capitalize", capitalize);
    string_filter(map, "title", title_case);

    insert(map, Function::new("escape", do_escape));
    insert(map, Function::new("e", do_escape));
    insert(
        map,
        Function::new("forceescape", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("forceescape", args, kwargs);
            let value = p.required("value")?;
            p.finish()?;
            Ok(Value::from_safe_string(escape_str(&text(&value)?)))
        }),
    );
    insert(
        map,
        Function::new("safe", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("safe", args, kwargs);
            let value = p.required("value")?;
            p.finish()?;
            markup::mark_safe(&value)
        }),
    );
    insert(
        map,
        Function::new("string", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("string", args, kwargs);
            let value = p.required("value")?;
            p.finish()?;
            match value {
                Value::String(_) | Value::Markup(_) => Ok(value),
                other => Ok(Value::from(text(&other)?)),
            }
        }),
    );
    insert(
        map,
        Function::new("striptags", |args: &[Value], kwargs: &Kwargs| {
            let mut p = ArgParser::new("striptags", args, kwargs);
            let value = p.required("value")?;
            p.finish()?;
            Ok(Value::from(markup::striptags(&text(&value)?)))
        }),
    );
    insert(map, Function::new("center", do_center));
    insert(map, Function::new("format", do_format));
    insert(map, Function::new("indent", do_indent));
    insert(map, Function::with_eval_context("replace", do_replace));
    insert(map, Function::new("trim", do_trim));
    insert(map, Function::with_environment("truncate", do_truncate));
    insert(map, Function::with_environment("wordwrap", do_wordwrap));
    insert(map, Function::new("wordcount", do_wordcount));
    insert(map, Function::new("urlencode", do_urlencode));
    insert(map, Function::with_context("urlize", do_urlize));
    insert(map, Function::with_eval_context("xmlattr", do_xmlattr));
}
