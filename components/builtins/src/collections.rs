//! Helper objects handed out by globals and filters
//!
//! [`Cycler`], [`Joiner`] and [`Namespace`] are the only values templates can
//! mutate; their state sits behind a lock so they can be shared across the
//! frames of one render. [`Group`] is the element type `groupby` returns.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use core_types::{Kwargs, Object, Result, TemplateError, Value, ValueIter, ValueMap};
use parking_lot::{Mutex, RwLock};

/// Cycles through a fixed list of values
///
/// `next()` returns the current item and advances, wrapping around at the
/// end; `reset()` goes back to the first item; `current` peeks.
#[derive(Debug)]
pub struct Cycler {
    items: Vec<Value>,
    pos: Mutex<usize>,
}

impl Cycler {
    /// Create a cycler; at least one item is required
    pub fn new(items: Vec<Value>) -> Result<Self> {
        if items.is_empty() {
            return Err(TemplateError::runtime("at least one item has to be provided"));
        }
        Ok(Self {
            items,
            pos: Mutex::new(0),
        })
    }

    /// Item `next()` would return
    pub fn current(&self) -> Value {
        self.items[*self.pos.lock()].clone()
    }

    /// Return the current item and advance
    pub fn next(&self) -> Value {
        let mut pos = self.pos.lock();
        let item = self.items[*pos].clone();
        *pos = (*pos + 1) % self.items.len();
        item
    }

    /// Go back to the first item
    pub fn reset(&self) {
        *self.pos.lock() = 0;
    }
}

impl Object for Cycler {
    fn type_name(&self) -> &str {
        "Cycler"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "current" => Some(self.current()),
            "items" => Some(Value::from(self.items.clone())),
            _ => None,
        }
    }

    fn call_method(&self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        if !args.is_empty() || !kwargs.is_empty() {
            return Err(TemplateError::type_error(format!(
                "Cycler.{}() takes no arguments",
                name
            )));
        }
        match name {
            "next" => Ok(self.next()),
            "reset" => {
                self.reset();
                Ok(Value::None)
            }
            _ => Err(TemplateError::type_error(format!(
                "'Cycler' object has no method '{}'",
                name
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns the empty string on the first call and the separator afterwards
#[derive(Debug)]
pub struct Joiner {
    sep: String,
    used: AtomicBool,
}

impl Joiner {
    /// Joiner with the given separator
    pub fn new(sep: impl Into<String>) -> Self {
        Self {
            sep: sep.into(),
            used: AtomicBool::new(false),
        }
    }

    /// Next output of the joiner
    pub fn next(&self) -> &str {
        if self.used.swap(true, Ordering::SeqCst) {
            &self.sep
        } else {
            ""
        }
    }
}

impl Object for Joiner {
    fn type_name(&self) -> &str {
        "Joiner"
    }

    fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        if !args.is_empty() || !kwargs.is_empty() {
            return Err(TemplateError::type_error("joiner() takes no arguments"));
        }
        Ok(Value::from(self.next()))
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Attribute store that `{% set ns.attr = ... %}` may assign to
#[derive(Debug, Default)]
pub struct Namespace {
    attrs: RwLock<ValueMap>,
}

impl Namespace {
    /// Namespace pre-populated with `attrs`
    pub fn new(attrs: ValueMap) -> Self {
        Self {
            attrs: RwLock::new(attrs),
        }
    }

    /// Snapshot of the current attributes
    pub fn attrs(&self) -> ValueMap {
        self.attrs.read().clone()
    }
}

impl Object for Namespace {
    fn type_name(&self) -> &str {
        "Namespace"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.read().get(&Value::from(name)).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.attrs.write().insert(Value::from(name), value);
        Ok(())
    }

    fn try_iter(&self) -> Option<ValueIter> {
        let keys: Vec<Value> = self.attrs.read().keys().cloned().collect();
        Some(Box::new(keys.into_iter()))
    }

    fn len(&self) -> Option<usize> {
        Some(self.attrs.read().len())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = self.attrs.read();
        f.write_str("<Namespace ")?;
        f.write_str(&Value::from(attrs.clone()).repr())?;
        f.write_str(">")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One group produced by `groupby`: a `(grouper, list)` pair
#[derive(Debug)]
pub struct Group {
    grouper: Value,
    list: Value,
}

impl Group {
    /// Group with its key and members
    pub fn new(grouper: Value, list: Vec<Value>) -> Self {
        Self {
            grouper,
            list: Value::from(list),
        }
    }

    /// Value the items were grouped by
    pub fn grouper(&self) -> &Value {
        &self.grouper
    }

    /// Items in the group
    pub fn list(&self) -> &Value {
        &self.list
    }
}

impl Object for Group {
    fn type_name(&self) -> &str {
        "tuple"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "grouper" => Some(self.grouper.clone()),
            "list" => Some(self.list.clone()),
            _ => None,
        }
    }

    fn get_item(&self, key: &Value) -> Option<Value> {
        match key.as_i64() {
            Some(0) | Some(-2) => Some(self.grouper.clone()),
            Some(1) | Some(-1) => Some(self.list.clone()),
            _ => None,
        }
    }

    fn try_iter(&self) -> Option<ValueIter> {
        Some(Box::new(
            vec![self.grouper.clone(), self.list.clone()].into_iter(),
        ))
    }

    fn len(&self) -> Option<usize> {
        Some(2)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pair = Value::tuple(vec![self.grouper.clone(), self.list.clone()]);
        f.write_str(&pair.repr())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
