//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Render a template file against a JSON context
#[derive(Debug, Parser)]
#[command(name = "corten-tmpl", version, about)]
pub struct Cli {
    /// Template to render, relative to the search path
    pub template: String,

    /// JSON file with the render context
    #[arg(short, long)]
    pub context: Option<PathBuf>,

    /// Directories templates are loaded from (defaults to the current directory)
    #[arg(short = 'I', long = "search-path")]
    pub search_path: Vec<PathBuf>,

    /// Escape HTML in every output expression
    #[arg(long)]
    pub autoescape: bool,

    /// Fail on any use of an undefined variable
    #[arg(long)]
    pub strict: bool,

    /// Remove the first newline after a block tag
    #[arg(long)]
    pub trim_blocks: bool,

    /// Strip whitespace before a block tag at the start of a line
    #[arg(long)]
    pub lstrip_blocks: bool,

    /// Print a compiler stage instead of rendering
    #[arg(long, value_enum)]
    pub dump: Option<DumpTarget>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

/// Compiler stages `--dump` can print
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpTarget {
    /// Lexer tokens
    Tokens,
    /// Parsed syntax tree
    Ast,
    /// Compiled instructions
    Bytecode,
}
