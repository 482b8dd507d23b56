//! Environment configuration values

use std::fmt;
use std::sync::Arc;

use core_types::{ErrorKind, Result, TemplateError};

/// Line ending written for every newline in template data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewlineSequence {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
    /// `\r`
    Cr,
}

impl NewlineSequence {
    /// The line ending itself
    pub fn as_str(self) -> &'static str {
        match self {
            NewlineSequence::Lf => "\n",
            NewlineSequence::CrLf => "\r\n",
            NewlineSequence::Cr => "\r",
        }
    }
}

impl TryFrom<&str> for NewlineSequence {
    type Error = TemplateError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "\n" => Ok(NewlineSequence::Lf),
            "\r\n" => Ok(NewlineSequence::CrLf),
            "\r" => Ok(NewlineSequence::Cr),
            _ => Err(TemplateError::new(
                ErrorKind::InvalidOperation,
                "newline_sequence set to unknown line ending string.",
            )),
        }
    }
}

/// Decides per template name whether output is escaped
pub type AutoescapeFn = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Autoescape setting
#[derive(Clone, Default)]
pub enum Autoescape {
    /// Never escape
    #[default]
    Disabled,
    /// Always escape
    Enabled,
    /// Ask a predicate with the template name (None for string templates)
    Predicate(AutoescapeFn),
}

impl Autoescape {
    /// Initial autoescape state for the template called `name`
    pub fn for_template(&self, name: Option<&str>) -> bool {
        match self {
            Autoescape::Disabled => false,
            Autoescape::Enabled => true,
            Autoescape::Predicate(f) => f(name),
        }
    }
}

impl From<bool> for Autoescape {
    fn from(enabled: bool) -> Self {
        if enabled {
            Autoescape::Enabled
        } else {
            Autoescape::Disabled
        }
    }
}

impl fmt::Debug for Autoescape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Autoescape::Disabled => f.write_str("Disabled"),
            Autoescape::Enabled => f.write_str("Enabled"),
            Autoescape::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Autoescape by file extension
///
/// Names ending in one of `enabled_extensions` are escaped, names ending in
/// one of `disabled_extensions` are not. Templates without a name use
/// `default_for_string`, everything else `default`. Matching ignores case.
///
/// ```
/// use environment::select_autoescape;
///
/// let autoescape = select_autoescape(&["html", "xml"], &[], true, false);
/// assert!(autoescape.for_template(Some("index.HTML")));
/// assert!(!autoescape.for_template(Some("mail.txt")));
/// assert!(autoescape.for_template(None));
/// ```
pub fn select_autoescape(
    enabled_extensions: &[&str],
    disabled_extensions: &[&str],
    default_for_string: bool,
    default: bool,
) -> Autoescape {
    let dotted = |exts: &[&str]| -> Vec<String> {
        exts.iter()
            .map(|e| format!(".{}", e.trim_start_matches('.').to_lowercase()))
            .collect()
    };
    let enabled = dotted(enabled_extensions);
    let disabled = dotted(disabled_extensions);
    Autoescape::Predicate(Arc::new(move |name: Option<&str>| {
        let name = match name {
            Some(name) => name.to_lowercase(),
            None => return default_for_string,
        };
        if enabled.iter().any(|ext| name.ends_with(ext.as_str())) {
            return true;
        }
        if disabled.iter().any(|ext| name.ends_with(ext.as_str())) {
            return false;
        }
        default
    }))
}

/// Size of the compiled template cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSize {
    /// At most this many templates; zero disables caching
    Bounded(usize),
    /// Never evict
    Unbounded,
}

impl CacheSize {
    /// Capacity in the form [`crate::LruCache::new`] takes
    pub fn capacity(self) -> Option<usize> {
        match self {
            CacheSize::Bounded(n) => Some(n),
            CacheSize::Unbounded => None,
        }
    }

    /// Negative limits mean unbounded
    pub fn from_limit(limit: i64) -> Self {
        if limit < 0 {
            CacheSize::Unbounded
        } else {
            CacheSize::Bounded(limit as usize)
        }
    }
}

impl Default for CacheSize {
    fn default() -> Self {
        CacheSize::Bounded(400)
    }
}
