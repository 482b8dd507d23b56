//! Source position and stack frame types for template error tracking.
//!
//! Every AST node and every emitted instruction carries a line number; these
//! types carry that line back out to the caller together with the template it
//! belongs to.

use std::fmt;

/// Represents a position in template source.
///
/// Lines are 1-indexed, matching what a template author sees in an editor.
///
/// # Examples
///
/// ```
/// use core_types::SourcePosition;
///
/// let pos = SourcePosition::new(Some("index.html"), None, 10);
/// assert_eq!(pos.line, 10);
/// assert_eq!(pos.name.as_deref(), Some("index.html"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePosition {
    /// Load name of the template, or None for templates built from strings
    pub name: Option<String>,
    /// Filename the template was loaded from, if the loader knows it
    pub filename: Option<String>,
    /// Line number (1-indexed)
    pub line: u32,
}

impl SourcePosition {
    /// Create a new source position
    pub fn new(name: Option<&str>, filename: Option<&str>, line: u32) -> Self {
        Self {
            name: name.map(str::to_string),
            filename: filename.map(str::to_string),
            line,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.filename, &self.name) {
            (Some(filename), _) => write!(f, "{}, line {}", filename, self.line),
            (None, Some(name)) => write!(f, "{}, line {}", name, self.line),
            (None, None) => write!(f, "<template>, line {}", self.line),
        }
    }
}

/// Represents a single frame of a template-level traceback.
///
/// Runtime errors collect one frame per template function they unwind
/// through (template root, block, macro), innermost first.
///
/// # Examples
///
/// ```
/// use core_types::StackFrame;
///
/// let frame = StackFrame {
///     function_name: Some("block 'content'".to_string()),
///     template: Some("page.html".to_string()),
///     filename: None,
///     line: 25,
/// };
///
/// assert_eq!(frame.line, 25);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Human readable name of the template function ("template", "block 'x'", "macro 'm'")
    pub function_name: Option<String>,
    /// Template load name
    pub template: Option<String>,
    /// Template filename, if known
    pub filename: Option<String>,
    /// Line that was executing in this frame
    pub line: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self
            .filename
            .as_deref()
            .or(self.template.as_deref())
            .unwrap_or("<template>");
        write!(f, "  File \"{}\", line {}", location, self.line)?;
        if let Some(function) = &self.function_name {
            write!(f, ", in {}", function)?;
        }
        Ok(())
    }
}
