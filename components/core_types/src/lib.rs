//! Core template value types and error handling.
//!
//! This crate provides the foundational types shared by every stage of the
//! template engine: the dynamic value model, undefined values, host
//! callables, markup escaping and the error type.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of template values
//! - [`Undefined`] - Deferred-failure value produced by failed lookups
//! - [`Object`] - Capability trait for runtime helper objects
//! - [`Function`] - Host callables with optional context injection
//! - [`TemplateError`] - Errors with template positions and stack traces
//! - [`ErrorKind`] - Categories of template errors
//! - [`SourcePosition`] - Template source location
//! - [`StackFrame`] - Template call stack frame information
//!
//! # Examples
//!
//! ```
//! use core_types::{ops, BinOp, ErrorKind, Value};
//!
//! let sum = ops::binary_op(BinOp::Add, &Value::from(40), &Value::from(2)).unwrap();
//! assert_eq!(sum, Value::from(42));
//!
//! let err = ops::binary_op(BinOp::Add, &Value::undefined_named("x"), &sum).unwrap_err();
//! assert_eq!(err.kind, ErrorKind::UndefinedError);
//! assert_eq!(err.message, "'x' is undefined");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod function;
pub mod markup;
pub mod methods;
mod object;
pub mod ops;
mod source;
mod undefined;
mod value;

pub use error::{ErrorKind, Result, TemplateError};
pub use function::{
    CallOutcome, CallSite, Callable, ContextAccess, EnvironmentAccess, EvalContext, Function,
    FunctionResult, Kwargs, PassArg,
};
pub use object::{Object, ValueIter};
pub use ops::{BinOp, CmpOp, UnaryOp};
pub use source::{SourcePosition, StackFrame};
pub use undefined::{object_type_repr, Undefined, UndefinedBehavior};
pub use value::{format_float, repr_str, Value, ValueKind, ValueMap};
