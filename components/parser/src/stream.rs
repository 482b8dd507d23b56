//! Token stream with one token of lookahead and pushback

use std::collections::VecDeque;

use core_types::{repr_str, Result, TemplateError};

use crate::lexer::{describe_token, describe_token_expr, Token, TokenKind};

/// Cursor over lexed tokens. `current` is the token under the cursor; once
/// the input is exhausted it stays an `eof` token.
#[derive(Debug)]
pub struct TokenStream {
    tokens: std::vec::IntoIter<Token>,
    pushed: VecDeque<Token>,
    /// Token under the cursor
    pub current: Token,
    name: Option<String>,
    filename: Option<String>,
}

impl TokenStream {
    /// Create a stream positioned on the first token
    pub fn new(tokens: Vec<Token>, name: Option<&str>, filename: Option<&str>) -> Self {
        let mut stream = Self {
            tokens: tokens.into_iter(),
            pushed: VecDeque::new(),
            current: Token::new(1, TokenKind::Initial, ""),
            name: name.map(str::to_string),
            filename: filename.map(str::to_string),
        };
        stream.next_token();
        stream
    }

    /// Template name used in errors
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Template filename used in errors
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// True once the cursor sits on `eof` with nothing pushed back
    pub fn eos(&self) -> bool {
        self.pushed.is_empty() && self.current.kind == TokenKind::Eof
    }

    /// Advance and return the token that was current
    pub fn next_token(&mut self) -> Token {
        let next = if let Some(token) = self.pushed.pop_front() {
            token
        } else if self.current.kind == TokenKind::Eof {
            return self.current.clone();
        } else {
            match self.tokens.next() {
                Some(token) => token,
                None => Token::new(self.current.lineno, TokenKind::Eof, ""),
            }
        };
        std::mem::replace(&mut self.current, next)
    }

    /// Queue a token to come after the current one
    pub fn push(&mut self, token: Token) {
        self.pushed.push_back(token);
    }

    /// The token after the current one
    pub fn look(&mut self) -> Token {
        let old = self.next_token();
        let result = self.current.clone();
        self.push(result.clone());
        self.current = old;
        result
    }

    /// Skip `n` tokens
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.next_token();
        }
    }

    /// Consume the current token if it matches
    pub fn next_if(&mut self, expr: &str) -> Option<Token> {
        if self.current.test(expr) {
            Some(self.next_token())
        } else {
            None
        }
    }

    /// Like [`TokenStream::next_if`] but only reports whether it matched
    pub fn skip_if(&mut self, expr: &str) -> bool {
        self.next_if(expr).is_some()
    }

    /// Consume the current token or fail with a syntax error
    pub fn expect(&mut self, expr: &str) -> Result<Token> {
        if self.current.test(expr) {
            return Ok(self.next_token());
        }
        let expected = describe_token_expr(expr);
        let message = if self.current.kind == TokenKind::Eof {
            format!("unexpected end of template, expected {}.", repr_str(&expected))
        } else {
            format!(
                "expected token {}, got {}",
                repr_str(&expected),
                repr_str(&describe_token(&self.current))
            )
        };
        Err(self.error(message, self.current.lineno))
    }

    /// Syntax error at a line of this template
    pub fn error(&self, message: impl Into<String>, lineno: u32) -> TemplateError {
        TemplateError::syntax(message, lineno, self.name(), self.filename())
    }
}
