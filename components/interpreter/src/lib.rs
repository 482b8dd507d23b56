//! Bytecode interpreter for compiled templates
//!
//! This crate provides the virtual machine that renders a
//! [`bytecode_system::CompiledTemplate`]:
//! - Explicit call frames, so rendering can pause for streaming and async calls
//! - A render [`Context`] with block stacks for template inheritance
//! - Runtime objects for `loop`, macros, `self`, `super()` and imported modules
//! - A [`RenderHost`] seam through which the environment provides templates,
//!   filters, tests and sandbox checks
//!
//! # Example
//!
//! ```
//! use core_types::{Object, UndefinedBehavior, Value};
//! use interpreter::LoopContext;
//!
//! let items = vec![Value::from("a"), Value::from("b")];
//! let ctx = LoopContext::new(Box::new(items.into_iter()), 0, None, UndefinedBehavior::Default);
//!
//! assert_eq!(ctx.advance(), Some(Value::from("a")));
//! assert_eq!(ctx.get_attr("first"), Some(Value::from(true)));
//! assert_eq!(ctx.get_attr("length"), Some(Value::from(2)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod call_frame;
mod calls;
pub mod context;
mod dispatch;
pub mod host;
pub mod loop_context;
pub mod runtime;
pub mod scope;
pub mod vm;

// Re-export main types at crate root
pub use context::{BlockEntry, Context};
pub use host::{LoadedTemplate, RenderHost};
pub use loop_context::LoopContext;
pub use runtime::{BlockReference, Macro, TemplateModule, TemplateReference};
pub use scope::Scope;
pub use vm::{RenderIter, Suspend, MAX_DEPTH, VM};
