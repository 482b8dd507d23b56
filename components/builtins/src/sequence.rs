//! Sequence and mapping filters
//!
//! Everything that iterates its input: `join`, `sort`, `groupby`, `map`,
//! `select`, `batch`, `sum`, ... Attribute arguments accept dotted paths
//! (`user.address.city`, `items.0`) resolved through the environment, so
//! sandbox rules apply to every step.

use std::cmp::Ordering;

use core_types::markup;
use core_types::{
    ops, BinOp, ContextAccess, EnvironmentAccess, EvalContext, Function, Kwargs, Result,
    TemplateError, Value,
};
use rand::seq::SliceRandom;

use crate::args::ArgParser;
use crate::collections::Group;
use crate::{insert, FunctionMap};

/// Resolve a dotted attribute path on `item`
///
/// Integer segments are looked up as integers. An integer `path` is a
/// single item lookup.
pub fn lookup_path(env: &dyn EnvironmentAccess, item: &Value, path: &Value) -> Result<Value> {
    let path_str = match path {
        Value::Int(_) => return env.getitem(item, path),
        Value::String(s) | Value::Markup(s) => s.clone(),
        Value::None => return Ok(item.clone()),
        other => {
            return Err(TemplateError::type_error(format!(
                "attribute must be a string or an integer, not {}",
                other.type_name()
            )))
        }
    };
    let mut current = item.clone();
    for part in path_str.split('.') {
        let key = match part.parse::<i64>() {
            Ok(idx) => Value::from(idx),
            Err(_) => Value::from(part),
        };
        current = env.getitem(&current, &key)?;
    }
    Ok(current)
}

fn ignore_case(value: Value) -> Value {
    match &value {
        Value::String(s) => Value::from(s.to_lowercase()),
        _ => value,
    }
}

/// Key extraction shared by the sorting and grouping filters
struct KeyGetter<'a> {
    env: &'a dyn EnvironmentAccess,
    paths: Vec<Value>,
    default: Option<Value>,
    fold_case: bool,
}

impl<'a> KeyGetter<'a> {
    fn new(env: &'a dyn EnvironmentAccess, attribute: Option<Value>, fold_case: bool) -> Self {
        let paths = match attribute {
            None | Some(Value::None) => Vec::new(),
            Some(path) => vec![path],
        };
        Self {
            env,
            paths,
            default: None,
            fold_case,
        }
    }

    /// Getter for a comma separated list of paths (`"last,first"`)
    fn multi(env: &'a dyn EnvironmentAccess, attribute: Option<Value>, fold_case: bool) -> Self {
        let paths = match attribute {
            None | Some(Value::None) => Vec::new(),
            Some(Value::String(s)) => s.split(',').map(|p| Value::from(p.trim())).collect(),
            Some(path) => vec![path],
        };
        Self {
            env,
            paths,
            default: None,
            fold_case,
        }
    }

    fn with_default(mut self, default: Option<Value>) -> Self {
        self.default = default.filter(|d| !d.is_none());
        self
    }

    fn one(&self, item: &Value, path: &Value) -> Result<Value> {
        let mut value = lookup_path(self.env, item, path)?;
        if value.is_undefined() {
            if let Some(default) = &self.default {
                value = default.clone();
            }
        }
        Ok(if self.fold_case { ignore_case(value) } else { value })
    }

    fn key(&self, item: &Value) -> Result<Vec<Value>> {
        if self.paths.is_empty() {
            let value = item.clone();
            return Ok(vec![if self.fold_case { ignore_case(value) } else { value }]);
        }
        self.paths.iter().map(|path| self.one(item, path)).collect()
    }
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match ops::total_cmp(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn keyed(items: Vec<Value>, getter: &KeyGetter<'_>) -> Result<Vec<(Vec<Value>, Value)>> {
    items
        .into_iter()
        .map(|item| Ok((getter.key(&item)?, item)))
        .collect()
}

fn empty_undefined(env: &dyn EnvironmentAccess, hint: &str) -> Value {
    env.undefined(Some(hint.to_string()), None, None)
}

fn do_attr(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("attr", args, kwargs);
    let obj = p.required("obj")?;
    let name = p.string("name")?.unwrap_or_default();
    p.finish()?;
    env.getattr(&obj, &name)
}

fn do_batch(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("batch", args, kwargs);
    let value = p.required("value")?;
    let linecount = p.int("linecount")?.unwrap_or(0);
    let fill_with = p.next("fill_with")?.filter(|v| !v.is_none());
    p.finish()?;
    if linecount <= 0 {
        return Err(TemplateError::runtime("batch() linecount must be positive"));
    }
    let linecount = usize::try_from(linecount).unwrap_or(usize::MAX);
    let mut batches: Vec<Value> = Vec::new();
    let mut current = Vec::new();
    for item in ops::try_iter(&value)? {
        current.push(item);
        if current.len() == linecount {
            batches.push(Value::from(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        if let Some(fill) = fill_with {
            ops::generated_len(1, linecount)?;
            current.resize(linecount, fill);
        }
        batches.push(Value::from(current));
    }
    Ok(Value::from(batches))
}

fn do_slice(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("slice", args, kwargs);
    let value = p.required("value")?;
    let slices = p.int("slices")?.unwrap_or(0);
    let fill_with = p.next("fill_with")?.filter(|v| !v.is_none());
    p.finish()?;
    if slices <= 0 {
        return Err(TemplateError::runtime("slice() slices must be positive"));
    }
    let seq = ops::to_vec(&value)?;
    let slices = ops::generated_len(1, usize::try_from(slices).unwrap_or(usize::MAX))?;
    let per_slice = seq.len() / slices;
    let with_extra = seq.len() % slices;
    let mut offset = 0;
    let mut out = Vec::with_capacity(slices);
    for number in 0..slices {
        let start = offset + number * per_slice;
        if number < with_extra {
            offset += 1;
        }
        let end = offset + (number + 1) * per_slice;
        let mut part = seq[start..end].to_vec();
        if let Some(fill) = &fill_with {
            if number >= with_extra {
                part.push(fill.clone());
            }
        }
        out.push(Value::from(part));
    }
    Ok(Value::from(out))
}

fn do_first(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("first", args, kwargs);
    let seq = p.required("seq")?;
    p.finish()?;
    let first = ops::try_iter(&seq)?.next();
    Ok(first.unwrap_or_else(|| empty_undefined(env, "No first item, sequence was empty.")))
}

fn do_last(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("last", args, kwargs);
    let seq = p.required("seq")?;
    p.finish()?;
    let last = ops::to_vec(&seq)?.pop();
    Ok(last.unwrap_or_else(|| empty_undefined(env, "No last item, sequence was empty.")))
}

fn do_random(ctx: &dyn ContextAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("random", args, kwargs);
    let seq = p.required("seq")?;
    p.finish()?;
    let items = ops::to_vec(&seq)?;
    let picked = items.choose(&mut rand::thread_rng()).cloned();
    Ok(picked.unwrap_or_else(|| {
        empty_undefined(ctx.environment(), "No random item, sequence was empty.")
    }))
}

fn do_length(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("length", args, kwargs);
    let value = p.required("obj")?;
    p.finish()?;
    Ok(Value::from(ops::len(&value)?))
}

fn do_list(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("list", args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    Ok(Value::from(ops::to_vec(&value)?))
}

fn do_reverse(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("reverse", args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    match &value {
        Value::String(s) | Value::Markup(s) => {
            Ok(crate::string::soft(&value, s.chars().rev().collect()))
        }
        other => {
            let mut items = ops::to_vec(other)?;
            items.reverse();
            Ok(Value::from(items))
        }
    }
}

fn do_items(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("items", args, kwargs);
    let value = p.required("value")?;
    p.finish()?;
    match &value {
        Value::Undefined(_) => Ok(Value::from(Vec::<Value>::new())),
        Value::Map(map) => Ok(Value::from(
            map.iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect::<Vec<_>>(),
        )),
        _ => Err(TemplateError::type_error(
            "Can only get item pairs from a mapping.",
        )),
    }
}

fn do_dictsort(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("dictsort", args, kwargs);
    let value = p.required("value")?;
    let case_sensitive = p.flag("case_sensitive", false)?;
    let by = p.string("by")?.unwrap_or_else(|| "key".to_string());
    let reverse = p.flag("reverse", false)?;
    p.finish()?;
    let pos = match by.as_str() {
        "key" => 0,
        "value" => 1,
        _ => {
            return Err(TemplateError::runtime(
                "You can only sort by either 'key' or 'value'",
            ))
        }
    };
    let map = value.as_map().ok_or_else(|| {
        TemplateError::type_error(format!("dictsort() expects a mapping, not {}", value.type_name()))
    })?;
    let mut pairs: Vec<(Value, Value)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let sort_key = |pair: &(Value, Value)| {
        let v = if pos == 0 { pair.0.clone() } else { pair.1.clone() };
        if case_sensitive {
            v
        } else {
            ignore_case(v)
        }
    };
    pairs.sort_by(|a, b| {
        let ord = ops::total_cmp(&sort_key(a), &sort_key(b));
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
    Ok(Value::from(
        pairs
            .into_iter()
            .map(|(k, v)| Value::tuple(vec![k, v]))
            .collect::<Vec<_>>(),
    ))
}

fn do_sort(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("sort", args, kwargs);
    let value = p.required("value")?;
    let reverse = p.flag("reverse", false)?;
    let case_sensitive = p.flag("case_sensitive", false)?;
    let attribute = p.next("attribute")?;
    p.finish()?;
    let getter = KeyGetter::multi(env, attribute, !case_sensitive);
    let mut pairs = keyed(ops::to_vec(&value)?, &getter)?;
    pairs.sort_by(|a, b| {
        let ord = compare_keys(&a.0, &b.0);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
    Ok(Value::from(pairs.into_iter().map(|(_, item)| item).collect::<Vec<_>>()))
}

fn do_unique(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("unique", args, kwargs);
    let value = p.required("value")?;
    let case_sensitive = p.flag("case_sensitive", false)?;
    let attribute = p.next("attribute")?;
    p.finish()?;
    let getter = KeyGetter::new(env, attribute, !case_sensitive);
    let mut seen: Vec<Vec<Value>> = Vec::new();
    let mut out = Vec::new();
    for item in ops::try_iter(&value)? {
        let key = getter.key(&item)?;
        if !seen.contains(&key) {
            seen.push(key);
            out.push(item);
        }
    }
    Ok(Value::from(out))
}

fn min_max(
    name: &'static str,
    wanted: Ordering,
    env: &dyn EnvironmentAccess,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value> {
    let mut p = ArgParser::new(name, args, kwargs);
    let value = p.required("value")?;
    let case_sensitive = p.flag("case_sensitive", false)?;
    let attribute = p.next("attribute")?;
    p.finish()?;
    let getter = KeyGetter::new(env, attribute, !case_sensitive);
    let mut best: Option<(Vec<Value>, Value)> = None;
    for (key, item) in keyed(ops::to_vec(&value)?, &getter)? {
        let replace = match &best {
            None => true,
            Some((best_key, _)) => compare_keys(&key, best_key) == wanted,
        };
        if replace {
            best = Some((key, item));
        }
    }
    Ok(match best {
        Some((_, item)) => item,
        None => empty_undefined(env, "No aggregated item, sequence was empty."),
    })
}

fn do_min(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    min_max("min", Ordering::Less, env, args, kwargs)
}

fn do_max(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    min_max("max", Ordering::Greater, env, args, kwargs)
}

fn do_sum(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("sum", args, kwargs);
    let value = p.required("iterable")?;
    let attribute = p.next("attribute")?;
    let start = p.next("start")?.unwrap_or(Value::Int(0));
    p.finish()?;
    let getter = KeyGetter::new(env, attribute, false);
    let mut total = start;
    for item in ops::try_iter(&value)? {
        let operand = match getter.paths.first() {
            Some(path) => lookup_path(env, &item, path)?,
            None => item,
        };
        total = ops::binary_op(BinOp::Add, &total, &operand)?;
    }
    Ok(total)
}

fn do_groupby(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("groupby", args, kwargs);
    let value = p.required("value")?;
    let attribute = p.required("attribute")?;
    let default = p.next("default")?;
    let case_sensitive = p.flag("case_sensitive", false)?;
    p.finish()?;
    let getter = KeyGetter::new(env, Some(attribute.clone()), !case_sensitive)
        .with_default(default.clone());
    let display = KeyGetter::new(env, Some(attribute), false).with_default(default);

    let mut pairs = keyed(ops::to_vec(&value)?, &getter)?;
    pairs.sort_by(|a, b| compare_keys(&a.0, &b.0));
    let mut groups: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
    for (key, item) in pairs {
        match groups.last_mut() {
            Some((last_key, members)) if *last_key == key => members.push(item),
            _ => groups.push((key, vec![item])),
        }
    }
    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let grouper = if case_sensitive {
            key.into_iter().next().unwrap_or(Value::None)
        } else {
            match members.first() {
                Some(first) => display.key(first)?.into_iter().next().unwrap_or(Value::None),
                None => Value::None,
            }
        };
        out.push(Value::from_object(Group::new(grouper, members)));
    }
    Ok(Value::from(out))
}

fn do_join(
    eval_ctx: &EvalContext,
    env: &dyn EnvironmentAccess,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value> {
    let mut p = ArgParser::new("join", args, kwargs);
    let value = p.required("value")?;
    let sep = p.next("d")?.unwrap_or_else(|| Value::from(""));
    let attribute = p.next("attribute")?;
    p.finish()?;
    let mut items = ops::to_vec(&value)?;
    if let Some(path) = attribute.filter(|a| !a.is_none()) {
        items = items
            .iter()
            .map(|item| lookup_path(env, item, &path))
            .collect::<Result<_>>()?;
    }

    if eval_ctx.autoescape && (sep.is_safe() || items.iter().any(Value::is_safe)) {
        let sep = markup::escape(&sep)?;
        let sep = sep.as_str().unwrap_or_default();
        let mut out = String::new();
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                out.push_str(sep);
            }
            out.push_str(markup::escape(item)?.as_str().unwrap_or_default());
        }
        return Ok(Value::from_safe_string(out));
    }
    let sep = ops::to_string(&sep)?;
    let parts = items
        .iter()
        .map(ops::to_string)
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::from(parts.join(&sep)))
}

fn do_map(ctx: &dyn ContextAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let env = ctx.environment();
    let eval_ctx = ctx.eval_context();
    let (value, rest) = match args.split_first() {
        Some((value, rest)) => (value.clone(), rest),
        None => return Err(TemplateError::type_error("map() missing required argument 'value'")),
    };
    let mut kwargs = kwargs.clone();
    let items = ops::to_vec(&value)?;

    if rest.is_empty() {
        if let Some(attribute) = kwargs.take("attribute") {
            let default = kwargs.take("default");
            if let Some(name) = kwargs.first_name() {
                return Err(TemplateError::runtime(format!(
                    "Unexpected keyword argument {}",
                    core_types::repr_str(name)
                )));
            }
            let getter = KeyGetter::new(env, Some(attribute), false).with_default(default);
            let paths = getter.paths.clone();
            let mapped = items
                .iter()
                .map(|item| match paths.first() {
                    Some(path) => getter.one(item, path),
                    None => Ok(item.clone()),
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::from(mapped));
        }
        return Err(TemplateError::runtime("map requires a filter argument"));
    }

    let name = ops::to_string(&rest[0])?;
    let filter_args = &rest[1..];
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        let mut call_args = Vec::with_capacity(filter_args.len() + 1);
        call_args.push(item);
        call_args.extend_from_slice(filter_args);
        mapped.push(env.call_filter(&name, &call_args, &kwargs, &eval_ctx, Some(ctx))?);
    }
    Ok(Value::from(mapped))
}

fn select_or_reject(
    ctx: &dyn ContextAccess,
    args: &[Value],
    kwargs: &Kwargs,
    lookup_attr: bool,
    keep_when: bool,
) -> Result<Value> {
    let env = ctx.environment();
    let eval_ctx = ctx.eval_context();
    let (value, mut rest) = match args.split_first() {
        Some((value, rest)) => (value.clone(), rest),
        None => return Err(TemplateError::type_error("missing required argument 'value'")),
    };
    let attribute = if lookup_attr {
        match rest.split_first() {
            Some((attr, tail)) => {
                rest = tail;
                Some(attr.clone())
            }
            None => return Err(TemplateError::runtime("Missing parameter for attribute name")),
        }
    } else {
        None
    };
    let test = match rest.split_first() {
        Some((name, tail)) => Some((ops::to_string(name)?, tail)),
        None => None,
    };

    let mut out = Vec::new();
    for item in ops::try_iter(&value)? {
        let subject = match &attribute {
            Some(path) => lookup_path(env, &item, path)?,
            None => item.clone(),
        };
        let passed = match &test {
            Some((name, test_args)) => {
                let mut call_args = Vec::with_capacity(test_args.len() + 1);
                call_args.push(subject);
                call_args.extend_from_slice(test_args);
                env.call_test(name, &call_args, kwargs, &eval_ctx, Some(ctx))?
            }
            None => ops::is_true(&subject)?,
        };
        if passed == keep_when {
            out.push(item);
        }
    }
    Ok(Value::from(out))
}

/// Register the sequence filters
pub(crate) fn register(map: &mut FunctionMap) {
    insert(map, Function::with_environment("attr", do_attr));
    insert(map, Function::new("batch", do_batch));
    insert(map, Function::new("slice", do_slice));
    insert(map, Function::with_environment("first", do_first));
    insert(map, Function::with_environment("last", do_last));
    insert(map, Function::with_context("random", do_random));
    insert(map, Function::new("length", do_length));
    insert(map, Function::new("count", do_length));
    insert(map, Function::new("list", do_list));
    insert(map, Function::new("reverse", do_reverse));
    insert(map, Function::new("items", do_items));
    insert(map, Function::new("dictsort", do_dictsort));
    insert(map, Function::with_environment("sort", do_sort));
    insert(map, Function::with_environment("unique", do_unique));
    insert(map, Function::with_environment("min", do_min));
    insert(map, Function::with_environment("max", do_max));
    insert(map, Function::with_environment("sum", do_sum));
    insert(map, Function::with_environment("groupby", do_groupby));
    insert(map, Function::with_eval_context("join", do_join));
    insert(map, Function::with_context("map", do_map));
    insert(
        map,
        Function::with_context("select", |ctx, args, kwargs| {
            select_or_reject(ctx, args, kwargs, false, true)
        }),
    );
    insert(
        map,
        Function::with_context("reject", |ctx, args, kwargs| {
            select_or_reject(ctx, args, kwargs, false, false)
        }),
    );
    insert(
        map,
        Function::with_context("selectattr", |ctx, args, kwargs| {
            select_or_reject(ctx, args, kwargs, true, true)
        }),
    );
    insert(
        map,
        Function::with_context("rejectattr", |ctx, args, kwargs| {
            select_or_reject(ctx, args, kwargs, true, false)
        }),
    );
}
