//! Runtime objects created by templates
//!
//! Macros, `self`, `super()` and imported modules are ordinary [`Object`]s so
//! filters and host code can pass them around. When the VM itself calls a
//! [`Macro`] or a [`BlockReference`] it runs the body in a new frame of the
//! same VM; a call from host code spins up a nested VM instead.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytecode_system::{ChunkKind, MacroSignature};
use core_types::{repr_str, Kwargs, Object, Result, TemplateError, Value, ValueMap};

use crate::context::Context;
use crate::host::LoadedTemplate;
use crate::scope::Scope;
use crate::vm::VM;

/// A `{% macro %}`, a `caller` or the body of a recursive loop
pub struct Macro {
    pub(crate) template: Arc<LoadedTemplate>,
    pub(crate) chunk: u32,
    pub(crate) scope: Arc<Scope>,
    pub(crate) context: Arc<Context>,
    pub(crate) kind: ChunkKind,
}

impl Macro {
    pub(crate) fn new(
        template: Arc<LoadedTemplate>,
        chunk: u32,
        scope: Arc<Scope>,
        context: Arc<Context>,
    ) -> Result<Self> {
        let kind = template
            .code()
            .chunk(chunk)
            .map(|c| c.kind.clone())
            .ok_or_else(|| TemplateError::runtime(format!("no function at chunk {}", chunk)))?;
        match kind {
            ChunkKind::Macro(_) | ChunkKind::CallBlock(_) | ChunkKind::Loop { .. } => Ok(Self {
                template,
                chunk,
                scope,
                context,
                kind,
            }),
            _ => Err(TemplateError::runtime(format!(
                "chunk {} is not a callable template function",
                chunk
            ))),
        }
    }

    /// Signature, unless this is a loop body
    pub fn signature(&self) -> Option<&MacroSignature> {
        match &self.kind {
            ChunkKind::Macro(sig) | ChunkKind::CallBlock(sig) => Some(sig),
            _ => None,
        }
    }

    /// Macro name ("caller" for call blocks, "loop" for loop bodies)
    pub fn name(&self) -> &str {
        match &self.kind {
            ChunkKind::Macro(sig) | ChunkKind::CallBlock(sig) => &sig.name,
            _ => "loop",
        }
    }
}

impl Object for Macro {
    fn type_name(&self) -> &str {
        "Macro"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let sig = self.signature();
        match name {
            "name" => Some(Value::from(self.name())),
            "arguments" => Some(Value::tuple(
                sig.map(|s| s.arguments.iter().map(|a| Value::from(a.as_str())).collect())
                    .unwrap_or_default(),
            )),
            "catch_kwargs" => Some(Value::from(sig.is_some_and(|s| s.catch_kwargs))),
            "catch_varargs" => Some(Value::from(sig.is_some_and(|s| s.catch_varargs))),
            "caller" => Some(Value::from(sig.is_some_and(|s| s.caller))),
            _ => None,
        }
    }

    fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        VM::call_macro(self, args.to_vec(), kwargs.clone())
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Macro {}>", repr_str(self.name()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name())
            .field("template", &self.template.name())
            .field("chunk", &self.chunk)
            .finish()
    }
}

/// One level of a block's override stack (`self.name`, `super()`)
pub struct BlockReference {
    pub(crate) name: String,
    pub(crate) context: Arc<Context>,
    pub(crate) level: usize,
}

impl BlockReference {
    pub(crate) fn new(name: impl Into<String>, context: Arc<Context>, level: usize) -> Self {
        Self {
            name: name.into(),
            context,
            level,
        }
    }

    /// Block name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to the next parent level, or an undefined if there is none
    pub fn parent(&self) -> Value {
        if self.context.block(&self.name, self.level + 1).is_some() {
            Value::from_object(BlockReference::new(
                self.name.clone(),
                self.context.clone(),
                self.level + 1,
            ))
        } else {
            no_parent_block(&self.context, &self.name)
        }
    }
}

pub(crate) fn no_parent_block(context: &Context, name: &str) -> Value {
    context.host().undefined(
        Some(format!("there is no parent block called {}.", repr_str(name))),
        None,
        Some(Value::from("super")),
    )
}

impl Object for BlockReference {
    fn type_name(&self) -> &str {
        "BlockReference"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "super" => Some(self.parent()),
            _ => None,
        }
    }

    fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        if !args.is_empty() || !kwargs.is_empty() {
            return Err(TemplateError::type_error("block references take no arguments"));
        }
        VM::call_block(self)
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BlockReference {}>", repr_str(&self.name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for BlockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockReference")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// The `self` variable: attribute access yields the template's blocks
pub struct TemplateReference {
    context: Arc<Context>,
}

impl TemplateReference {
    pub(crate) fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl Object for TemplateReference {
    fn type_name(&self) -> &str {
        "TemplateReference"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.context
            .has_block(name)
            .then(|| Value::from_object(BlockReference::new(name, self.context.clone(), 0)))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context.name() {
            Some(name) => write!(f, "<TemplateReference {}>", repr_str(name)),
            None => write!(f, "<TemplateReference>"),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for TemplateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateReference")
            .field("template", &self.context.name())
            .finish()
    }
}

/// Result of evaluating a template as a module: its exported names plus the
/// output the body produced
#[derive(Clone)]
pub struct TemplateModule {
    name: Option<String>,
    exports: ValueMap,
    body: String,
}

impl TemplateModule {
    /// Module of the template `name`
    pub fn new(name: Option<&str>, exports: ValueMap, body: String) -> Self {
        Self {
            name: name.map(str::to_string),
            exports,
            body,
        }
    }

    /// Template the module was built from
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Exported macros and variables
    pub fn exports(&self) -> &ValueMap {
        &self.exports
    }

    /// Output of the template body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Look up an export
    pub fn get(&self, name: &str) -> Option<Value> {
        self.exports.get(&Value::from(name)).cloned()
    }
}

impl Object for TemplateModule {
    fn type_name(&self) -> &str {
        "TemplateModule"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn try_iter(&self) -> Option<core_types::ValueIter> {
        let keys: Vec<Value> = self.exports.keys().cloned().collect();
        Some(Box::new(keys.into_iter()))
    }

    fn is_safe(&self) -> bool {
        true
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for TemplateModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateModule")
            .field("name", &self.name)
            .field("exports", &self.exports.len())
            .finish()
    }
}
