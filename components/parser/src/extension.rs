//! Parser extension hook points
//!
//! An extension registers statement tags, may rewrite the source before
//! lexing or the token list after it, and may expose attributes that
//! templates reach through [`Expr::ExtensionAttribute`](crate::ast::Expr).

use std::fmt;

use core_types::{Result, Value};

use crate::ast::Stmt;
use crate::lexer::Token;
use crate::parser::Parser;

/// A template syntax extension
pub trait Extension: fmt::Debug + Send + Sync {
    /// Unique identifier, used by `ExtensionAttribute` nodes
    fn identifier(&self) -> &str;

    /// Lower values run first in `preprocess` and `filter_stream`
    fn priority(&self) -> i32 {
        100
    }

    /// Statement tags this extension parses
    fn tags(&self) -> &[&'static str] {
        &[]
    }

    /// Rewrite the source before it is lexed
    fn preprocess(&self, source: String, _name: Option<&str>, _filename: Option<&str>) -> String {
        source
    }

    /// Rewrite the token list after lexing
    fn filter_stream(&self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        Ok(tokens)
    }

    /// Parse one of [`Extension::tags`]. The parser sits on the tag name.
    fn parse(&self, parser: &mut Parser<'_>) -> Result<Vec<Stmt>> {
        let token = parser.stream.current.clone();
        Err(parser.fail(format!("extension '{}' cannot parse '{}'", self.identifier(), token.value), token.lineno))
    }

    /// Value of an extension attribute
    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }
}
