//! Local variable storage
//!
//! Every running template function owns a [`Scope`] with one slot per local.
//! Nested functions (macros, call blocks, recursive loop bodies) keep their
//! defining scope alive through the parent link, so they read the current
//! value of an outer variable when they run, not the value it had when the
//! closure was made.

use std::sync::Arc;

use bytecode_system::LocalRef;
use core_types::{Result, TemplateError, Value};
use parking_lot::Mutex;

/// Slots of one function activation
#[derive(Debug)]
pub struct Scope {
    slots: Mutex<Vec<Option<Value>>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// Scope with `size` unbound slots
    pub fn new(size: usize, parent: Option<Arc<Scope>>) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![None; size]),
            parent,
        })
    }

    fn walk(&self, depth: u16) -> Result<&Scope> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope
                .parent
                .as_deref()
                .ok_or_else(|| TemplateError::runtime("local variable scope out of range"))?;
        }
        Ok(scope)
    }

    /// Read a slot; None if it is unbound
    pub fn get(&self, local: LocalRef) -> Result<Option<Value>> {
        let scope = self.walk(local.depth)?;
        let slots = scope.slots.lock();
        Ok(slots.get(local.slot as usize).cloned().flatten())
    }

    /// Bind or unbind a slot
    pub fn set(&self, local: LocalRef, value: Option<Value>) -> Result<()> {
        let scope = self.walk(local.depth)?;
        let mut slots = scope.slots.lock();
        let idx = local.slot as usize;
        if idx >= slots.len() {
            slots.resize(idx + 1, None);
        }
        slots[idx] = value;
        Ok(())
    }

    /// True if the slot holds a value
    pub fn is_bound(&self, local: LocalRef) -> Result<bool> {
        Ok(self.get(local)?.is_some())
    }
}
