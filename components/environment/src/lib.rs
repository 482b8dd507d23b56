//! Template environment
//!
//! This crate ties the lexer, parser, compiler, interpreter and builtin
//! library together behind one configurable [`Environment`]:
//! - Named templates through pluggable [`Loader`]s and an LRU cache
//! - Optional persistent [`BytecodeCache`]s keyed by source checksum
//! - Autoescaping, undefined policies, finalize and custom delimiters
//! - Syntax extensions and a sandbox mode for untrusted templates
//!
//! # Example
//!
//! ```
//! use core_types::Value;
//! use environment::{DictLoader, Environment};
//!
//! let env = Environment::builder()
//!     .loader(DictLoader::new([(
//!         "macros.html",
//!         "{% macro greet(name) %}Hello {{ name }}!{% endmacro %}",
//!     )]))
//!     .build()
//!     .unwrap();
//!
//! let tmpl = env
//!     .from_string("{% from 'macros.html' import greet %}{{ greet(user) }}")
//!     .unwrap();
//! let out = tmpl.render(Value::from_json(serde_json::json!({"user": "Ann"}))).unwrap();
//! assert_eq!(out, "Hello Ann!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytecode_cache;
pub mod cache;
pub mod config;
pub mod environment;
pub mod extensions;
pub mod loaders;
pub mod meta;
pub mod sandbox;
pub mod template;

pub use bytecode_cache::{Bucket, BytecodeCache, FileSystemBytecodeCache, MemoryBytecodeCache};
pub use cache::{LruCache, SharedLruCache};
pub use config::{select_autoescape, Autoescape, AutoescapeFn, CacheSize, NewlineSequence};
pub use environment::{Environment, EnvironmentBuilder, JoinPath};
pub use extensions::{DebugExtension, ExprStmtExtension, LoopControlExtension};
pub use loaders::{
    split_template_path, ChoiceLoader, DictLoader, FileSystemLoader, FunctionLoader, LoadFunction,
    Loader, PrefixLoader, TemplateSource, UpToDate,
};
pub use sandbox::{DefaultSandbox, SandboxPolicy, MAX_RANGE};
pub use template::{Module, Template, TemplateExpression, TemplateStream};
