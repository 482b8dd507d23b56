//! The `loop` variable of for loops
//!
//! A [`LoopContext`] wraps the iterator of a loop and buffers at most what
//! `last`, `nextitem` and `length` force it to look ahead. It is single
//! pass: once the iterator is consumed it cannot be replayed.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use core_types::{
    Kwargs, Object, Result, TemplateError, Undefined, UndefinedBehavior, Value, ValueIter,
};
use parking_lot::Mutex;

struct LoopState {
    iter: ValueIter,
    ahead: VecDeque<Value>,
    exhausted: bool,
    index0: i64,
    length: Option<usize>,
    current: Option<Value>,
    previous: Option<Value>,
    last_changed: Option<Vec<Value>>,
}

impl LoopState {
    fn pull(&mut self) -> Option<Value> {
        if let Some(item) = self.ahead.pop_front() {
            return Some(item);
        }
        if self.exhausted {
            return None;
        }
        let item = self.iter.next();
        if item.is_none() {
            self.exhausted = true;
        }
        item
    }

    fn peek(&mut self) -> Option<Value> {
        if self.ahead.is_empty() && !self.exhausted {
            match self.iter.next() {
                Some(item) => self.ahead.push_back(item),
                None => self.exhausted = true,
            }
        }
        self.ahead.front().cloned()
    }

    fn length(&mut self) -> usize {
        if let Some(length) = self.length {
            return length;
        }
        if !self.exhausted {
            self.ahead.extend(&mut self.iter);
            self.exhausted = true;
        }
        let length = (self.index0 + 1).max(0) as usize + self.ahead.len();
        self.length = Some(length);
        length
    }
}

/// Iteration helper exposed to templates as `loop`
pub struct LoopContext {
    state: Mutex<LoopState>,
    depth0: usize,
    recurse: Option<Value>,
    undefined: UndefinedBehavior,
}

impl LoopContext {
    /// Loop over `iter`. `recurse` is the loop body function of a recursive
    /// loop, `depth0` its recursion depth.
    pub fn new(iter: ValueIter, depth0: usize, recurse: Option<Value>, undefined: UndefinedBehavior) -> Self {
        let length = match iter.size_hint() {
            (low, Some(high)) if low == high => Some(low),
            _ => None,
        };
        Self {
            state: Mutex::new(LoopState {
                iter,
                ahead: VecDeque::new(),
                exhausted: false,
                index0: -1,
                length,
                current: None,
                previous: None,
                last_changed: None,
            }),
            depth0,
            recurse,
            undefined,
        }
    }

    /// Move to the next item
    pub fn advance(&self) -> Option<Value> {
        let mut state = self.state.lock();
        let item = state.pull()?;
        state.previous = state.current.replace(item.clone());
        state.index0 += 1;
        Some(item)
    }

    /// True if the loop never produced an item
    pub fn was_empty(&self) -> bool {
        self.state.lock().index0 < 0
    }

    /// Zero-based index of the current item
    pub fn index0(&self) -> i64 {
        self.state.lock().index0
    }

    /// Recursion depth, starting at 0
    pub fn depth0(&self) -> usize {
        self.depth0
    }

    /// Loop body function if the loop is recursive
    pub fn recurse(&self) -> Option<&Value> {
        self.recurse.as_ref()
    }

    fn undefined(&self, hint: &str) -> Value {
        Value::Undefined(Arc::new(Undefined::with_hint(self.undefined, hint)))
    }

    fn cycle(&self, args: &[Value]) -> Result<Value> {
        if args.is_empty() {
            return Err(TemplateError::type_error("no items for cycling given"));
        }
        let index0 = self.index0().max(0) as usize;
        Ok(args[index0 % args.len()].clone())
    }

    fn changed(&self, args: &[Value]) -> bool {
        let mut state = self.state.lock();
        if state.last_changed.as_deref() == Some(args) {
            return false;
        }
        state.last_changed = Some(args.to_vec());
        true
    }
}

impl Object for LoopContext {
    fn type_name(&self) -> &str {
        "LoopContext"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let mut state = self.state.lock();
        let index0 = state.index0;
        Some(match name {
            "index0" => Value::from(index0),
            "index" => Value::from(index0 + 1),
            "first" => Value::from(index0 == 0),
            "last" => Value::from(state.peek().is_none()),
            "length" => Value::from(state.length()),
            "revindex" => Value::from(state.length() as i64 - index0),
            "revindex0" => Value::from(state.length() as i64 - index0 - 1),
            "depth0" => Value::from(self.depth0),
            "depth" => Value::from(self.depth0 + 1),
            "previtem" => match state.previous.clone() {
                Some(item) => item,
                None => self.undefined("there is no previous item"),
            },
            "nextitem" => match state.peek() {
                Some(item) => item,
                None => self.undefined("there is no next item"),
            },
            _ => return None,
        })
    }

    fn call_method(&self, name: &str, args: &[Value], _kwargs: &Kwargs) -> Result<Value> {
        match name {
            "cycle" => self.cycle(args),
            "changed" => Ok(Value::from(self.changed(args))),
            _ => Err(TemplateError::type_error(format!(
                "'LoopContext' object has no method '{}'",
                name
            ))),
        }
    }

    fn call(&self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value> {
        Err(TemplateError::type_error(
            "The loop must be marked as 'recursive' to be called recursively.",
        ))
    }

    fn is_callable(&self) -> bool {
        self.recurse.is_some()
    }

    fn len(&self) -> Option<usize> {
        Some(self.state.lock().length())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.lock();
        let length = state.length();
        write!(f, "<LoopContext {}/{}>", state.index0 + 1, length)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("index0", &self.index0())
            .field("depth0", &self.depth0)
            .finish()
    }
}

/// Candidate items and survivors of an inline loop filter
/// (`{% for x in items if cond %}`)
pub(crate) struct FilterState {
    inner: Mutex<(ValueIter, Vec<Value>)>,
}

impl FilterState {
    pub(crate) fn new(iter: ValueIter) -> Self {
        Self {
            inner: Mutex::new((iter, Vec::new())),
        }
    }

    pub(crate) fn next_candidate(&self) -> Option<Value> {
        self.inner.lock().0.next()
    }

    pub(crate) fn keep(&self, item: Value) {
        self.inner.lock().1.push(item);
    }

    pub(crate) fn take_kept(&self) -> Value {
        Value::from(std::mem::take(&mut self.inner.lock().1))
    }
}

impl Object for FilterState {
    fn type_name(&self) -> &str {
        "LoopFilter"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterState")
            .field("kept", &self.inner.lock().1.len())
            .finish()
    }
}
