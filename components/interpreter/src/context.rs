//! Render context
//!
//! A [`Context`] is created fresh for every render call and is never shared
//! between concurrent renders. Name resolution looks at the variables set by
//! the template (`vars`) first, then at the read-only initial variables
//! (`parent`, which already includes the globals). The block table holds one
//! stack of implementations per block name, innermost override first, so
//! `super()` is simply the next entry of the stack.

use std::fmt;
use std::sync::Arc;

use core_types::{ContextAccess, EnvironmentAccess, EvalContext, Value, ValueMap};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::host::{LoadedTemplate, RenderHost};

/// One implementation of a block
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// Template that defines this implementation
    pub template: Arc<LoadedTemplate>,
    /// Chunk index of the block function in that template
    pub chunk: u32,
}

/// Variables and blocks of one render
pub struct Context {
    host: Arc<dyn RenderHost>,
    name: Option<String>,
    parent: Arc<ValueMap>,
    vars: Mutex<ValueMap>,
    exported: Mutex<IndexSet<String>>,
    blocks: Mutex<IndexMap<String, Vec<BlockEntry>>>,
    eval_ctx: Arc<Mutex<EvalContext>>,
}

impl Context {
    /// Context over `parent` registering the blocks of `template`
    pub fn new(host: Arc<dyn RenderHost>, template: &Arc<LoadedTemplate>, parent: ValueMap) -> Arc<Self> {
        let eval_ctx = EvalContext::new(host.autoescape(template.name()));
        let blocks = template
            .code()
            .blocks
            .iter()
            .map(|(name, chunk)| {
                (
                    name.clone(),
                    vec![BlockEntry {
                        template: template.clone(),
                        chunk: *chunk,
                    }],
                )
            })
            .collect();
        Arc::new(Self {
            host,
            name: template.name().map(str::to_string),
            parent: Arc::new(parent),
            vars: Mutex::new(ValueMap::new()),
            exported: Mutex::new(IndexSet::new()),
            blocks: Mutex::new(blocks),
            eval_ctx: Arc::new(Mutex::new(eval_ctx)),
        })
    }

    /// Context for rendering `template` with `vars`. Unless `shared`, the
    /// template's globals are visible below the variables.
    pub fn for_template(
        host: Arc<dyn RenderHost>,
        template: &Arc<LoadedTemplate>,
        vars: ValueMap,
        shared: bool,
    ) -> Arc<Self> {
        let parent = if shared {
            vars
        } else {
            let mut parent = template.globals().as_ref().clone();
            parent.extend(vars);
            parent
        };
        Self::new(host, template, parent)
    }

    /// A context that sees everything this one does plus `locals`. Blocks
    /// are copied, the evaluation context is shared.
    pub fn derived(&self, locals: ValueMap) -> Arc<Self> {
        let mut parent = self.get_all();
        parent.extend(locals);
        Arc::new(Self {
            host: self.host.clone(),
            name: self.name.clone(),
            parent: Arc::new(parent),
            vars: Mutex::new(ValueMap::new()),
            exported: Mutex::new(IndexSet::new()),
            blocks: Mutex::new(self.blocks.lock().clone()),
            eval_ctx: self.eval_ctx.clone(),
        })
    }

    /// The environment
    pub fn host(&self) -> &Arc<dyn RenderHost> {
        &self.host
    }

    /// Name of the template this context renders
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Look a name up in the template variables, then the parent
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let key = Value::from(name);
        if let Some(value) = self.vars.lock().get(&key) {
            return Some(value.clone());
        }
        self.parent.get(&key).cloned()
    }

    /// Set a template variable
    pub fn set_var(&self, name: &str, value: Value) {
        self.vars.lock().insert(Value::from(name), value);
    }

    /// Add a name to the exported set
    pub fn export(&self, name: &str) {
        self.exported.lock().insert(name.to_string());
    }

    /// Remove a name from the exported set
    pub fn unexport(&self, name: &str) {
        self.exported.lock().shift_remove(name);
    }

    /// Names exported so far, in export order
    pub fn exported_names(&self) -> Vec<String> {
        self.exported.lock().iter().cloned().collect()
    }

    /// Exported variables and their values
    pub fn get_exported(&self) -> ValueMap {
        let vars = self.vars.lock();
        self.exported
            .lock()
            .iter()
            .filter_map(|name| {
                let key = Value::from(name.as_str());
                vars.get(&key).map(|v| (key, v.clone()))
            })
            .collect()
    }

    /// Variables set by the template
    pub fn vars(&self) -> ValueMap {
        self.vars.lock().clone()
    }

    /// Register the blocks of a parent template below the current overrides
    pub fn push_parent_blocks(&self, parent: &Arc<LoadedTemplate>) {
        let mut blocks = self.blocks.lock();
        for (name, chunk) in &parent.code().blocks {
            blocks.entry(name.clone()).or_default().push(BlockEntry {
                template: parent.clone(),
                chunk: *chunk,
            });
        }
    }

    /// Implementation of a block at an inheritance level (0 is innermost)
    pub fn block(&self, name: &str, level: usize) -> Option<BlockEntry> {
        self.blocks.lock().get(name).and_then(|stack| stack.get(level)).cloned()
    }

    /// True if the template has a block with this name
    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.lock().contains_key(name)
    }

    /// Switch autoescaping, returning the previous setting
    pub fn set_autoescape(&self, autoescape: bool) -> bool {
        let mut ctx = self.eval_ctx.lock();
        std::mem::replace(&mut ctx.autoescape, autoescape)
    }
}

impl ContextAccess for Context {
    fn resolve(&self, name: &str) -> Value {
        self.lookup(name)
            .unwrap_or_else(|| self.host.undefined(None, None, Some(Value::from(name))))
    }

    fn resolve_or_missing(&self, name: &str) -> Option<Value> {
        self.lookup(name)
    }

    fn get_all(&self) -> ValueMap {
        let mut all = self.parent.as_ref().clone();
        for (k, v) in self.vars.lock().iter() {
            all.insert(k.clone(), v.clone());
        }
        all
    }

    fn template_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn eval_context(&self) -> EvalContext {
        *self.eval_ctx.lock()
    }

    fn environment(&self) -> &dyn EnvironmentAccess {
        self.host.as_environment()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("vars", &self.vars.lock().len())
            .field("parent", &self.parent.len())
            .finish()
    }
}
