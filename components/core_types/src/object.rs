//! Capability trait for runtime objects.
//!
//! Helper values created by the runtime (loop contexts, macros, namespaces,
//! cyclers, template modules) expose attribute-like access through an
//! explicit key-value interface instead of dynamic attribute interception.

use std::any::Any;
use std::fmt;

use crate::error::{Result, TemplateError};
use crate::function::Kwargs;
use crate::value::Value;

/// Boxed iterator over template values
pub type ValueIter = Box<dyn Iterator<Item = Value> + Send>;

/// A runtime object visible to templates.
///
/// Every method has a conservative default so implementors only provide the
/// capabilities they support.
pub trait Object: fmt::Debug + Send + Sync + 'static {
    /// Type name shown in error messages
    fn type_name(&self) -> &str;

    /// Attribute lookup (`obj.name`)
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Item lookup (`obj[key]`)
    fn get_item(&self, key: &Value) -> Option<Value> {
        key.as_str().and_then(|name| self.get_attr(name))
    }

    /// Attribute assignment; only namespaces accept it
    fn set_attr(&self, name: &str, _value: Value) -> Result<()> {
        Err(TemplateError::runtime(format!(
            "cannot assign attribute '{}' on {} object",
            name,
            self.type_name()
        )))
    }

    /// Call the object itself
    fn call(&self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value> {
        Err(TemplateError::type_error(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    /// Call a method on the object (`obj.name(...)`)
    fn call_method(&self, name: &str, _args: &[Value], _kwargs: &Kwargs) -> Result<Value> {
        Err(TemplateError::type_error(format!(
            "'{}' object has no method '{}'",
            self.type_name(),
            name
        )))
    }

    /// True if `call` is supported
    fn is_callable(&self) -> bool {
        false
    }

    /// Iterate the object, if it is iterable
    fn try_iter(&self) -> Option<ValueIter> {
        None
    }

    /// Length, if it has one
    fn len(&self) -> Option<usize> {
        None
    }

    /// Truthiness
    fn is_true(&self) -> bool {
        true
    }

    /// True if the rendered form is already markup
    fn is_safe(&self) -> bool {
        false
    }

    /// Rendered (printed) form
    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.type_name())
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;
}
