//! Template Parser Component
//!
//! Provides the lexer, parser, AST, constant folding, scope analysis and
//! bytecode generation for the template language.
//!
//! # Overview
//!
//! - [`Lexer`] - Tokenizes template source with configurable delimiters
//! - [`TokenStream`] - Token cursor used by the parser and extensions
//! - [`Parser`] - Recursive descent parser producing a [`Template`]
//! - [`Stmt`] / [`Expr`] - Abstract Syntax Tree node types
//! - [`Optimizer`] - Folds constant expressions
//! - [`SymbolTable`] - Tracks how every name of every frame is bound
//! - [`CodeGenerator`] - Converts the AST to a [`bytecode_system::CompiledTemplate`]
//! - [`Extension`] - Hook for custom tags and source rewriting
//!
//! # Example
//!
//! ```
//! use parser::{generate, parse, Lexer, LexerConfig, PlainCompileEnvironment};
//! use core_types::EvalContext;
//!
//! let lexer = Lexer::new(LexerConfig::default()).unwrap();
//! let ast = parse(&lexer, "Hello {{ name }}!", Some("hello.txt"), None).unwrap();
//!
//! let module = generate(&ast, &PlainCompileEnvironment, Some("hello.txt"), None, EvalContext::new(false)).unwrap();
//! assert_eq!(module.chunks.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod bytecode_gen;
pub mod compile_env;
pub mod extension;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod scope;
pub mod stream;
pub mod visitor;

pub use ast::{CallArgs, Expr, If, Keyword, NameCtx, Operand, Pair, Stmt, Template};
pub use bytecode_gen::{generate, CodeGenerator};
pub use compile_env::{CompileEnvironment, PlainCompileEnvironment};
pub use extension::Extension;
pub use lexer::{Lexer, LexerConfig, StartState, Token, TokenKind};
pub use optimizer::{as_const, optimize, Impossible, Optimizer};
pub use parser::{parse, Parser};
pub use scope::{find_undeclared, Ident, Load, SymbolTable};
pub use stream::TokenStream;
pub use visitor::{find_all, find_all_stmts, Transformer, Visitor};
