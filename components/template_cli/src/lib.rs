//! Template CLI Library
//!
//! Provides the [`Runner`] and argument types behind the `corten-tmpl` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runner;

pub use cli::{Cli, DumpTarget};
pub use error::{CliError, CliResult};
pub use runner::Runner;
