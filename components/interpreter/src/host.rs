//! The environment as seen by the VM
//!
//! The interpreter never loads templates or looks up filters itself. It asks
//! a [`RenderHost`], which the environment crate implements on top of its
//! loaders, caches, filter tables and sandbox policy.

use std::fmt;
use std::sync::Arc;

use bytecode_system::CompiledTemplate;
use core_types::{ops, BinOp, EnvironmentAccess, Function, Result, UnaryOp, Value, ValueMap};
use parking_lot::Mutex;

/// A compiled template ready to run, with the globals it renders against
pub struct LoadedTemplate {
    code: Arc<CompiledTemplate>,
    globals: Arc<ValueMap>,
    default_module: Mutex<Option<Value>>,
}

impl LoadedTemplate {
    /// Pair compiled code with its globals (environment and template globals merged)
    pub fn new(code: Arc<CompiledTemplate>, globals: Arc<ValueMap>) -> Self {
        Self {
            code,
            globals,
            default_module: Mutex::new(None),
        }
    }

    /// The compiled module
    pub fn code(&self) -> &Arc<CompiledTemplate> {
        &self.code
    }

    /// Globals visible to every render of this template
    pub fn globals(&self) -> &Arc<ValueMap> {
        &self.globals
    }

    /// Load name
    pub fn name(&self) -> Option<&str> {
        self.code.name.as_deref()
    }

    /// Source filename
    pub fn filename(&self) -> Option<&str> {
        self.code.filename.as_deref()
    }

    /// Module built without a context, cached after the first import
    pub fn cached_module(&self) -> Option<Value> {
        self.default_module.lock().clone()
    }

    pub(crate) fn store_module(&self, module: Value) {
        *self.default_module.lock() = Some(module);
    }
}

impl fmt::Debug for LoadedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedTemplate")
            .field("name", &self.name())
            .field("chunks", &self.code.chunks.len())
            .finish()
    }
}

/// Services the VM needs from the environment
pub trait RenderHost: EnvironmentAccess {
    /// The same object as an [`EnvironmentAccess`], handed to host functions
    fn as_environment(&self) -> &dyn EnvironmentAccess;

    /// Load a template for `extends`, `include` and `import`. `name` may be a
    /// string or a list of candidates; `parent` is the template doing the
    /// loading.
    fn get_template(&self, name: &Value, parent: Option<&str>) -> Result<Arc<LoadedTemplate>>;

    /// Filter by name
    fn filter(&self, name: &str) -> Option<Arc<Function>>;

    /// Test by name
    fn test(&self, name: &str) -> Option<Arc<Function>>;

    /// Initial autoescape setting for a template
    fn autoescape(&self, _template: Option<&str>) -> bool {
        false
    }

    /// Callable applied to every dynamic output value before escaping
    fn finalize(&self) -> Option<Arc<Function>> {
        None
    }

    /// Attribute exported by a syntax extension
    fn extension_attribute(&self, _extension: &str, _name: &str) -> Option<Value> {
        None
    }

    /// Sandbox check run before any call
    fn is_safe_callable(&self, _value: &Value) -> bool {
        true
    }

    /// Binary operator, overridable by the sandbox
    fn binary_op(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value> {
        ops::binary_op(op, left, right)
    }

    /// Unary operator, overridable by the sandbox
    fn unary_op(&self, op: UnaryOp, value: &Value) -> Result<Value> {
        ops::unary_op(op, value)
    }
}
