//! Bytecode system for the template engine
//!
//! This crate defines the instruction set the code generator targets and the
//! interpreter executes, together with the compiled module format shared by
//! the template cache and the on-disk bytecode cache.
//!
//! # Overview
//!
//! - [`Opcode`] / [`Instruction`]: stack-VM instruction set with template line numbers
//! - [`Chunk`]: code of one template function (root, block, macro, caller, loop)
//! - [`CompiledTemplate`]: all chunks of a template plus its block table
//! - [`Constant`]: serializable constant pool entries
//! - [`Optimizer`]: peephole passes (jump threading, dead code, raw output fusion)
//!
//! # Example
//!
//! ```
//! use bytecode_system::{CompiledTemplate, Constant, Opcode};
//!
//! let mut module = CompiledTemplate::new(Some("hello.txt"), None);
//! let root = &mut module.chunks[0];
//! let a = root.add_constant(Constant::Str("Hello, ".into()));
//! let b = root.add_constant(Constant::Str("World".into()));
//! root.emit(Opcode::EmitRaw(a), 1);
//! root.emit(Opcode::EmitRaw(b), 1);
//! root.emit(Opcode::Return, 1);
//!
//! module.optimize();
//! assert_eq!(module.root().instructions.len(), 2);
//!
//! let bytes = module.to_bytes().unwrap();
//! let restored = CompiledTemplate::from_bytes(&bytes).unwrap();
//! assert_eq!(restored, module);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod constant;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod optimizer;

// Re-export main types at crate root
pub use chunk::{Chunk, ChunkKind, MacroSignature};
pub use constant::Constant;
pub use instruction::Instruction;
pub use module::{CompiledTemplate, FORMAT_VERSION, MAGIC};
pub use opcode::{CallShape, Escape, Label, LocalRef, Opcode};
pub use optimizer::Optimizer;
