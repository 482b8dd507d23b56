//! Builtin filters, tests and global functions of the template engine
//!
//! This crate provides the default catalogs an environment starts with:
//! - String filters (`upper`, `truncate`, `wordwrap`, `urlize`, ...)
//! - Sequence filters (`sort`, `groupby`, `map`, `select`, `join`, ...)
//! - Numeric filters (`round`, `int`, `filesizeformat`, ...)
//! - Serialization filters (`tojson`, `pprint`)
//! - Tests (`defined`, `odd`, `divisibleby`, `sameas`, ...)
//! - Globals (`range`, `dict`, `lipsum`, `cycler`, `joiner`, `namespace`)
//!
//! Every builtin is a [`core_types::Function`]. Filters and tests receive
//! the filtered value as their first positional argument.
//!
//! # Example
//!
//! ```
//! use builtins::{default_filters, default_tests, NumberFilters, RoundMethod};
//!
//! let filters = default_filters();
//! assert!(filters.contains_key("groupby"));
//! assert!(default_tests().contains_key("divisibleby"));
//!
//! assert_eq!(NumberFilters::round(2.5, 0, RoundMethod::Common), 2.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use core_types::{Function, Kwargs, Result, Value};
use indexmap::IndexMap;

pub mod args;
pub mod collections;
pub mod globals;
pub mod json;
pub mod number;
pub mod predicates;
pub mod sequence;
pub mod string;

pub use args::ArgParser;
pub use collections::{Cycler, Group, Joiner, Namespace};
pub use globals::{default_globals, MAX_RANGE};
pub use json::JsonFilters;
pub use number::{NumberFilters, RoundMethod};
pub use predicates::{default_tests, same_as};
pub use sequence::lookup_path;
pub use string::{StringFilters, UrlizeOptions};

/// Filters or tests keyed by name
pub type FunctionMap = IndexMap<String, Arc<Function>>;

/// Register a function under its own name
pub(crate) fn insert(map: &mut FunctionMap, function: Function) {
    map.insert(function.name().to_string(), Arc::new(function));
}

fn do_default(args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let mut p = ArgParser::new("default", args, kwargs);
    let value = p.required("value")?;
    let default_value = p.next("default_value")?.unwrap_or_else(|| Value::from(""));
    let boolean = p.flag("boolean", false)?;
    p.finish()?;
    let missing = if boolean {
        !value.is_true()
    } else {
        value.is_undefined()
    };
    Ok(if missing { default_value } else { value })
}

/// Build the filter catalog
pub fn default_filters() -> FunctionMap {
    let mut map = FunctionMap::new();
    string::register(&mut map);
    sequence::register(&mut map);
    number::register(&mut map);
    json::register(&mut map);
    insert(&mut map, Function::new("default", do_default));
    insert(&mut map, Function::new("d", do_default));
    map
}
