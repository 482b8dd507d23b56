//! Template error types and error handling.
//!
//! All stages of the pipeline (lexer, parser, code generator, runtime,
//! loaders) report failures through a single [`TemplateError`] whose
//! [`ErrorKind`] places it in the error taxonomy.

use std::fmt;

use crate::{SourcePosition, StackFrame};

/// The kind of template error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Lexer or parser rejected the template source
    SyntaxError,
    /// Structurally valid but semantically illegal template (duplicate blocks, misplaced extends)
    CompileError,
    /// Sandbox policy rejected an attribute access or call
    SecurityError,
    /// An undefined value was used in an operation that requires a value
    UndefinedError,
    /// A loader could not find a template
    TemplateNotFound,
    /// None of several candidate templates could be found
    TemplatesNotFound,
    /// Failure raised explicitly from template code or by runtime invariants
    TemplateRuntimeError,
    /// Wrong argument types or arity for a call
    TypeError,
    /// Unsupported operation on values (bad operands, division by zero)
    InvalidOperation,
    /// A serialized template blob could not be decoded
    BadSerialization,
    /// Loader I/O failure
    LoaderError,
}

impl ErrorKind {
    /// Name used when displaying the error
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "TemplateSyntaxError",
            ErrorKind::CompileError => "TemplateAssertionError",
            ErrorKind::SecurityError => "SecurityError",
            ErrorKind::UndefinedError => "UndefinedError",
            ErrorKind::TemplateNotFound => "TemplateNotFound",
            ErrorKind::TemplatesNotFound => "TemplatesNotFound",
            ErrorKind::TemplateRuntimeError => "TemplateRuntimeError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::InvalidOperation => "InvalidOperation",
            ErrorKind::BadSerialization => "BadSerialization",
            ErrorKind::LoaderError => "LoaderError",
        }
    }

    /// True for the two not-found kinds a loader may signal
    pub fn is_not_found(self) -> bool {
        matches!(self, ErrorKind::TemplateNotFound | ErrorKind::TemplatesNotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A template error with message, position and template traceback.
///
/// # Examples
///
/// ```
/// use core_types::{TemplateError, ErrorKind};
///
/// let error = TemplateError::new(ErrorKind::UndefinedError, "'user' is undefined");
/// assert_eq!(error.message, "'user' is undefined");
/// assert_eq!(error.to_string(), "UndefinedError: 'user' is undefined");
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}{}", location_suffix(.source_position))]
pub struct TemplateError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Template-level traceback, innermost frame first
    pub stack: Vec<StackFrame>,
    /// Where the error occurred
    pub source_position: Option<SourcePosition>,
}

fn location_suffix(position: &Option<SourcePosition>) -> String {
    match position {
        Some(pos) => format!(" ({})", pos),
        None => String::new(),
    }
}

/// Result alias used throughout the template crates
pub type Result<T> = std::result::Result<T, TemplateError>;

impl TemplateError {
    /// Create an error without position information
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
            source_position: None,
        }
    }

    /// Syntax error at the given line of a template
    pub fn syntax(
        message: impl Into<String>,
        line: u32,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Self {
        Self::new(ErrorKind::SyntaxError, message).with_position(SourcePosition::new(
            name, filename, line,
        ))
    }

    /// Compile-time assertion failure at the given line
    pub fn compile(message: impl Into<String>, line: u32) -> Self {
        Self::new(ErrorKind::CompileError, message)
            .with_position(SourcePosition::new(None, None, line))
    }

    /// Template not found
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorKind::TemplateNotFound, name)
    }

    /// None of the given templates were found
    pub fn none_found(names: &[String]) -> Self {
        let message = if names.is_empty() {
            "Tried to select from an empty list of templates.".to_string()
        } else {
            format!(
                "none of the templates given were found: {}",
                names.join(", ")
            )
        };
        Self::new(ErrorKind::TemplatesNotFound, message)
    }

    /// Shorthand for a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Shorthand for a TemplateRuntimeError
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TemplateRuntimeError, message)
    }

    /// Shorthand for an InvalidOperation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    /// Attach a source position, replacing any previous one
    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.source_position = Some(position);
        self
    }

    /// Fill in template name and filename on a position that lacks them
    pub fn with_template(mut self, name: Option<&str>, filename: Option<&str>) -> Self {
        if let Some(pos) = &mut self.source_position {
            if pos.name.is_none() {
                pos.name = name.map(str::to_string);
            }
            if pos.filename.is_none() {
                pos.filename = filename.map(str::to_string);
            }
        }
        self
    }

    /// Line number of the error, if known
    pub fn line(&self) -> Option<u32> {
        self.source_position.as_ref().map(|p| p.line)
    }

    /// Render the template traceback, outermost frame first
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.stack.iter().rev() {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out.push_str(&format!("{}: {}", self.kind, self.message));
        out
    }
}
