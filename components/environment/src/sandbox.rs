//! Sandbox policies
//!
//! A policy is consulted on every attribute read, every call and, for the
//! operators it intercepts, every arithmetic operation. Unsafe attribute reads
//! produce an undefined value that raises a `SecurityError` when used; unsafe
//! calls raise immediately.

use std::fmt;
use std::sync::Arc;

use core_types::{ops, BinOp, ErrorKind, Result, UnaryOp, Undefined, UndefinedBehavior, Value};

pub use builtins::MAX_RANGE;

/// Rules a sandboxed environment enforces while rendering
pub trait SandboxPolicy: fmt::Debug + Send + Sync {
    /// May templates read `attr` (whose value is `value`) from `obj`?
    fn is_safe_attribute(&self, obj: &Value, attr: &str, value: &Value) -> bool;

    /// May templates call `obj`?
    fn is_safe_callable(&self, obj: &Value) -> bool;

    /// True if `op` is routed through [`SandboxPolicy::call_binop`]. The
    /// optimizer never folds intercepted operators.
    fn intercepts_binop(&self, _op: BinOp) -> bool {
        false
    }

    /// True if `op` is routed through [`SandboxPolicy::call_unop`]
    fn intercepts_unop(&self, _op: UnaryOp) -> bool {
        false
    }

    /// Evaluate an intercepted binary operator
    fn call_binop(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value> {
        ops::binary_op(op, left, right)
    }

    /// Evaluate an intercepted unary operator
    fn call_unop(&self, op: UnaryOp, value: &Value) -> Result<Value> {
        ops::unary_op(op, value)
    }

    /// Longest sequence `range()` may produce
    fn max_range(&self) -> Option<usize> {
        Some(MAX_RANGE)
    }
}

/// Blocks private attributes and callables marked unsafe
///
/// # Example
///
/// ```
/// use core_types::Value;
/// use environment::{DefaultSandbox, SandboxPolicy};
///
/// let sandbox = DefaultSandbox::new();
/// let obj = Value::from("text");
/// assert!(!sandbox.is_safe_attribute(&obj, "__class__", &Value::None));
/// assert!(sandbox.is_safe_attribute(&obj, "upper", &Value::None));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DefaultSandbox {
    intercepted_binops: Vec<BinOp>,
    intercepted_unops: Vec<UnaryOp>,
}

impl DefaultSandbox {
    /// Sandbox with no intercepted operators
    pub fn new() -> Self {
        Self::default()
    }

    /// Route these binary operators through [`SandboxPolicy::call_binop`]
    pub fn intercept_binops(mut self, ops: &[BinOp]) -> Self {
        self.intercepted_binops.extend_from_slice(ops);
        self
    }

    /// Route these unary operators through [`SandboxPolicy::call_unop`]
    pub fn intercept_unops(mut self, ops: &[UnaryOp]) -> Self {
        self.intercepted_unops.extend_from_slice(ops);
        self
    }

    /// Wrap into the shared form the environment stores
    pub fn into_policy(self) -> Arc<dyn SandboxPolicy> {
        Arc::new(self)
    }
}

impl SandboxPolicy for DefaultSandbox {
    fn is_safe_attribute(&self, _obj: &Value, attr: &str, _value: &Value) -> bool {
        !attr.starts_with('_')
    }

    fn is_safe_callable(&self, obj: &Value) -> bool {
        match obj {
            Value::Function(f) => !f.is_unsafe(),
            _ => true,
        }
    }

    fn intercepts_binop(&self, op: BinOp) -> bool {
        self.intercepted_binops.contains(&op)
    }

    fn intercepts_unop(&self, op: UnaryOp) -> bool {
        self.intercepted_unops.contains(&op)
    }
}

/// Message used for every blocked attribute
pub fn unsafe_attribute_message(obj: &Value, attr: &str) -> String {
    format!(
        "access to attribute '{}' of '{}' object is unsafe.",
        attr,
        obj.type_name()
    )
}

/// Undefined standing in for a blocked attribute. Using it raises a
/// `SecurityError`.
pub fn unsafe_undefined(obj: &Value, attr: &str, behavior: UndefinedBehavior) -> Value {
    Value::Undefined(Arc::new(Undefined {
        behavior,
        hint: Some(unsafe_attribute_message(obj, attr)),
        obj: Some(obj.clone()),
        name: Some(Value::from(attr)),
        exc: ErrorKind::SecurityError,
    }))
}
