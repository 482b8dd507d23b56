//! Global functions available in every template

use core_types::{ops, EnvironmentAccess, Function, Kwargs, Result, TemplateError, Value, ValueMap};
use rand::Rng;

use crate::args::ArgParser;
use crate::collections::{Cycler, Joiner, Namespace};

/// Largest `range()` a sandboxed environment allows
pub const MAX_RANGE: usize = 100_000;

const LOREM_IPSUM_WORDS: &str = "a ac accumsan ad adipiscing aenean aliquam aliquet amet ante \
aptent arcu at auctor augue bibendum blandit class commodo condimentum congue consectetuer \
consequat conubia convallis cras cubilia cum curabitur curae cursus dapibus diam dictum \
dictumst dignissim dis dolor donec dui duis egestas eget eleifend elementum elit enim erat \
eros est et etiam eu euismod facilisi facilisis fames faucibus felis fermentum feugiat \
fringilla fusce gravida habitant habitasse hac hendrerit hymenaeos iaculis id imperdiet in \
inceptos integer interdum ipsum justo lacinia lacus laoreet lectus leo libero ligula litora \
lobortis lorem luctus maecenas magna magnis malesuada massa mattis mauris metus mi molestie \
mollis montes morbi mus nam nascetur natoque nec neque netus nibh nisi nisl non nonummy \
nostra nulla nullam nunc odio orci ornare parturient pede pellentesque penatibus per \
pharetra phasellus placerat platea porta porttitor posuere potenti praesent pretium primis \
proin pulvinar purus quam quis quisque rhoncus ridiculus risus rutrum sagittis sapien \
scelerisque sed sem semper senectus sit sociis sociosqu sodales sollicitudin suscipit \
suspendisse taciti tellus tempor tempus tincidunt torquent tortor tristique turpis \
ullamcorper ultrices ultricies urna ut varius vehicula vel velit venenatis vestibulum vitae \
vivamus viverra volutpat vulputate";

/// Integers from `start` to `stop` (exclusive) in steps of `step`
///
/// Fails when the sequence would be longer than `limit`.
pub fn range(start: i64, stop: i64, step: i64, limit: Option<usize>) -> Result<Vec<Value>> {
    if step == 0 {
        return Err(TemplateError::runtime("range() arg 3 must not be zero"));
    }
    let (start_wide, stop_wide, step_wide) = (i128::from(start), i128::from(stop), i128::from(step));
    let span = if step > 0 { stop_wide - start_wide } else { start_wide - stop_wide };
    let len = if span <= 0 {
        0
    } else {
        usize::try_from((span - 1) / step_wide.abs() + 1).unwrap_or(usize::MAX)
    };
    if let Some(limit) = limit {
        if len > limit {
            return Err(TemplateError::new(
                core_types::ErrorKind::SecurityError,
                format!(
                    "Range too big. The sandbox blocks ranges larger than MAX_RANGE ({}).",
                    limit
                ),
            ));
        }
    }
    ops::generated_len(1, len)?;
    Ok((0..len as i128)
        .map(|i| Value::from((start_wide + i * step_wide) as i64))
        .collect())
}

/// Random lorem ipsum paragraphs
///
/// Each paragraph has between `min` and `max` words, with commas and
/// periods sprinkled in. HTML output wraps paragraphs in `<p>` tags.
pub fn lipsum(n: usize, html: bool, min: usize, max: usize) -> Value {
    let words: Vec<&str> = LOREM_IPSUM_WORDS.split_whitespace().collect();
    let mut rng = rand::thread_rng();
    let max = max.max(min);
    let mut paragraphs = Vec::with_capacity(n);
    for _ in 0..n {
        let mut next_capitalized = true;
        let mut last_comma = 0usize;
        let mut last_fullstop = 0usize;
        let mut last: Option<&str> = None;
        let mut p: Vec<String> = Vec::new();
        let count = rng.gen_range(min..=max);
        for idx in 0..count {
            let picked = loop {
                let candidate = words[rng.gen_range(0..words.len())];
                if Some(candidate) != last {
                    break candidate;
                }
            };
            last = Some(picked);
            let mut word = if next_capitalized {
                next_capitalized = false;
                core_types::methods::capitalize(picked)
            } else {
                picked.to_string()
            };
            if idx - last_comma > rng.gen_range(3..=8) {
                last_comma = idx;
                last_fullstop += 2;
                word.push(',');
            }
            if idx.saturating_sub(last_fullstop) > rng.gen_range(10..=20) {
                last_comma = idx;
                last_fullstop = idx;
                if word.ends_with(',') {
                    word.pop();
                }
                word.push('.');
                next_capitalized = true;
            }
            p.push(word);
        }
        let mut text = p.join(" ");
        if text.ends_with(',') {
            text.pop();
            text.push('.');
        } else if !text.ends_with('.') {
            text.push('.');
        }
        paragraphs.push(text);
    }
    if html {
        let body = paragraphs
            .iter()
            .map(|p| format!("<p>{}</p>", core_types::markup::escape_str(p)))
            .collect::<Vec<_>>()
            .join("\n");
        Value::from_safe_string(body)
    } else {
        Value::from(paragraphs.join("\n\n"))
    }
}

fn do_range(env: &dyn EnvironmentAccess, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    if !kwargs.is_empty() {
        kwargs.check_allowed("range", &[])?;
    }
    let ints = args
        .iter()
        .map(|v| match v {
            Value::Undefined(u) => Err(u.error()),
            other => other.as_i64().ok_or_else(|| {
                TemplateError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                ))
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(TemplateError::type_error(format!(
                "range expected 1 to 3 arguments, got {}",
                ints.len()
            )))
        }
    };
    Ok(Value::from(range(start, stop, step, env.max_range())?))
}

fn do_dict(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut map = ValueMap::new();
    match args {
        [] => {}
        [Value::Map(initial)] => map.extend(initial.iter().map(|(k, v)| (k.clone(), v.clone()))),
        _ => return Err(TemplateError::type_error("dict() takes keyword arguments only")),
    }
    for (k, v) in kwargs.iter() {
        map.insert(Value::from(k), v.clone());
    }
    Ok(Value::from(map))
}

fn do_lipsum(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("lipsum", args, kwargs);
    let n = p.int("n")?.unwrap_or(5);
    let html = p.flag("html", true)?;
    let min = p.int("min")?.unwrap_or(20);
    let max = p.int("max")?.unwrap_or(100);
    p.finish()?;
    Ok(lipsum(
        n.max(0) as usize,
        html,
        min.max(1) as usize,
        max.max(1) as usize,
    ))
}

fn do_cycler(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    kwargs.check_allowed("cycler", &[])?;
    Ok(Value::from_object(Cycler::new(args.to_vec())?))
}

fn do_joiner(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("joiner", args, kwargs);
    let sep = p.string("sep")?.unwrap_or_else(|| ", ".to_string());
    p.finish()?;
    Ok(Value::from_object(Joiner::new(sep)))
}

fn do_namespace(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let attrs = match do_dict(args, kwargs)? {
        Value::Map(map) => map.as_ref().clone(),
        _ => ValueMap::new(),
    };
    Ok(Value::from_object(Namespace::new(attrs)))
}

/// Build the default globals (`range`, `dict`, `lipsum`, `cycler`,
/// `joiner`, `namespace`)
pub fn default_globals() -> ValueMap {
    let functions = [
        Function::with_environment("range", do_range),
        Function::new("dict", do_dict),
        Function::new("lipsum", do_lipsum),
        Function::new("cycler", do_cycler),
        Function::new("joiner", do_joiner),
        Function::new("namespace", do_namespace),
    ];
    functions
        .into_iter()
        .map(|f| (Value::from(f.name()), Value::from(f)))
        .collect()
}
