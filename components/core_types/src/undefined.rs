//! Undefined values and their failure policies.
//!
//! Resolving a missing name never fails; it produces an [`Undefined`] that
//! remembers how it came to be. Failure is deferred until the value is
//! actually used, and what counts as "used" depends on the
//! [`UndefinedBehavior`].

use crate::error::{ErrorKind, TemplateError};
use crate::value::{repr_str, Value};

/// Failure policy of an undefined value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedBehavior {
    /// Prints as empty, is falsy and iterable; other operations fail
    #[default]
    Default,
    /// Like default, but attribute and item access return the undefined itself
    Chainable,
    /// Prints a placeholder describing what was missing
    Debug,
    /// Fails on printing, truthiness, iteration, length and equality too
    Strict,
}

/// Payload of [`Value::Undefined`]
#[derive(Debug, Clone)]
pub struct Undefined {
    /// Failure policy
    pub behavior: UndefinedBehavior,
    /// Explicit message that replaces the generated one
    pub hint: Option<String>,
    /// Object the lookup was performed on; None when a plain name was missing
    pub obj: Option<Value>,
    /// Name or key that was looked up
    pub name: Option<Value>,
    /// Error kind raised when the value is used
    pub exc: ErrorKind,
}

impl Undefined {
    /// Undefined for a plain missing name
    pub fn named(behavior: UndefinedBehavior, name: &str) -> Self {
        Self {
            behavior,
            hint: None,
            obj: None,
            name: Some(Value::from(name)),
            exc: ErrorKind::UndefinedError,
        }
    }

    /// Undefined carrying only a hint
    pub fn with_hint(behavior: UndefinedBehavior, hint: impl Into<String>) -> Self {
        Self {
            behavior,
            hint: Some(hint.into()),
            obj: None,
            name: None,
            exc: ErrorKind::UndefinedError,
        }
    }

    /// Undefined for a failed attribute or item lookup on `obj`
    pub fn missing_member(behavior: UndefinedBehavior, obj: Value, name: Value) -> Self {
        Self {
            behavior,
            hint: None,
            obj: Some(obj),
            name: Some(name),
            exc: ErrorKind::UndefinedError,
        }
    }

    /// Message describing the failure, most specific information first
    pub fn message(&self) -> String {
        if let Some(hint) = &self.hint {
            return hint.clone();
        }
        let name = self
            .name
            .as_ref()
            .map(Value::repr)
            .unwrap_or_else(|| "None".to_string());
        match &self.obj {
            None => format!("{} is undefined", name),
            Some(obj) => match self.name.as_ref().map(Value::as_str) {
                Some(Some(_)) => format!(
                    "{} has no attribute {}",
                    repr_str(&object_type_repr(obj)),
                    name
                ),
                _ => format!("{} has no element {}", object_type_repr(obj), name),
            },
        }
    }

    /// The error raised when this value is operated on
    pub fn error(&self) -> TemplateError {
        TemplateError::new(self.exc, self.message())
    }

    /// Printed form; fails only under the strict policy
    pub fn render(&self) -> Result<String, TemplateError> {
        match self.behavior {
            UndefinedBehavior::Strict => Err(self.error()),
            _ => Ok(self.render_lossy()),
        }
    }

    /// Printed form without failure (strict prints as empty)
    pub fn render_lossy(&self) -> String {
        match self.behavior {
            UndefinedBehavior::Debug => self.debug_placeholder(),
            _ => String::new(),
        }
    }

    fn debug_placeholder(&self) -> String {
        if let Some(hint) = &self.hint {
            return format!("{{{{ undefined value printed: {} }}}}", hint);
        }
        let name = self
            .name
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_default();
        match &self.obj {
            None => format!("{{{{ {} }}}}", name),
            Some(obj) => format!(
                "{{{{ no such element: {}[{}] }}}}",
                object_type_repr(obj),
                self.name.as_ref().map(Value::repr).unwrap_or_default()
            ),
        }
    }

    /// Truthiness; strict undefined refuses to answer
    pub fn is_true(&self) -> Result<bool, TemplateError> {
        match self.behavior {
            UndefinedBehavior::Strict => Err(self.error()),
            _ => Ok(false),
        }
    }

    /// Iteration / length are permitted (as empty) except under strict
    pub fn check_iterable(&self) -> Result<(), TemplateError> {
        match self.behavior {
            UndefinedBehavior::Strict => Err(self.error()),
            _ => Ok(()),
        }
    }

    /// Attribute or item access: chainable returns itself, the rest fail
    pub fn chain(&self) -> Option<Value> {
        match self.behavior {
            UndefinedBehavior::Chainable => Some(Value::Undefined(std::sync::Arc::new(self.clone()))),
            _ => None,
        }
    }

    /// Representation used by `repr()`-style output
    pub fn debug_repr(&self) -> String {
        match self.behavior {
            UndefinedBehavior::Default => "Undefined".to_string(),
            UndefinedBehavior::Chainable => "ChainableUndefined".to_string(),
            UndefinedBehavior::Debug => "DebugUndefined".to_string(),
            UndefinedBehavior::Strict => "StrictUndefined".to_string(),
        }
    }
}

/// Describe the type of an object for undefined messages ("dict object")
pub fn object_type_repr(obj: &Value) -> String {
    match obj {
        Value::None => "None".to_string(),
        other => format!("{} object", other.type_name()),
    }
}
