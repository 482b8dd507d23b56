//! What the compiler needs to know about the environment

use core_types::{ops, BinOp, EvalContext, Kwargs, Result, UnaryOp, Value};

/// Compile-time view of an environment.
///
/// The optimizer uses it to fold filters and tests over constants, and the
/// code generator to check filter and test names and to finalize constant
/// output. Every method has a default matching an environment without
/// filters, tests, sandbox or finalize.
pub trait CompileEnvironment {
    /// True if a filter with this name is registered
    fn has_filter(&self, _name: &str) -> bool {
        false
    }

    /// True if a test with this name is registered
    fn has_test(&self, _name: &str) -> bool {
        false
    }

    /// Evaluate a filter at compile time. None if the filter cannot run
    /// without a render context (unknown, context-aware or async).
    fn fold_filter(&self, _name: &str, _args: &[Value], _kwargs: &Kwargs, _eval_ctx: &EvalContext) -> Option<Result<Value>> {
        None
    }

    /// Evaluate a test at compile time, like [`CompileEnvironment::fold_filter`]
    fn fold_test(&self, _name: &str, _args: &[Value], _kwargs: &Kwargs, _eval_ctx: &EvalContext) -> Option<Result<bool>> {
        None
    }

    /// True if the sandbox wants to see this binary operator at runtime
    fn intercepts_binop(&self, _op: BinOp) -> bool {
        false
    }

    /// True if the sandbox wants to see this unary operator at runtime
    fn intercepts_unop(&self, _op: UnaryOp) -> bool {
        false
    }

    /// Attribute lookup on a constant
    fn fold_getattr(&self, obj: &Value, attr: &str) -> Option<Value> {
        ops::get_attr(obj, attr).ok().flatten()
    }

    /// Item lookup on a constant
    fn fold_getitem(&self, obj: &Value, key: &Value) -> Option<Value> {
        ops::get_item(obj, key).ok().flatten()
    }

    /// True if a finalize callable is configured
    fn has_finalize(&self) -> bool {
        false
    }

    /// Finalize a constant output value. None if finalize must run at
    /// render time.
    fn finalize_constant(&self, value: &Value, _eval_ctx: &EvalContext) -> Option<Value> {
        Some(value.clone())
    }

    /// True if templates render asynchronously
    fn is_async(&self) -> bool {
        false
    }
}

/// Environment without filters, tests or finalize
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCompileEnvironment;

impl CompileEnvironment for PlainCompileEnvironment {}
