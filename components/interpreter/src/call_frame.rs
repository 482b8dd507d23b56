//! Call frame for template function activations

use std::sync::Arc;

use core_types::Value;

use crate::context::Context;
use crate::host::LoadedTemplate;
use crate::scope::Scope;

/// What happens to a frame's result when it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Output already went to the enclosing sink
    Discard,
    /// Push the returned value, as markup if `safe`
    Value { safe: bool },
    /// The frame renders into its own capture; push it on return
    Captured { safe: bool },
    /// Build a template module from the exports and the captured body
    Module { cache: bool },
}

impl Completion {
    pub(crate) fn captures(self) -> bool {
        matches!(self, Completion::Captured { .. } | Completion::Module { .. })
    }
}

/// One running template function (root, block, macro, caller or loop body)
#[derive(Debug)]
pub(crate) struct Frame {
    pub template: Arc<LoadedTemplate>,
    pub chunk: u32,
    pub pc: usize,
    pub scope: Arc<Scope>,
    pub context: Arc<Context>,
    /// Contexts shadowed by `with`-style overlays
    pub overlays: Vec<Arc<Context>>,
    /// Autoescape settings shadowed by `{% autoescape %}`
    pub autoescape_saved: Vec<bool>,
    pub stack_base: usize,
    pub capture_base: usize,
    pub completion: Completion,
    /// The closure running in this frame; recursive loops call it again
    pub function: Option<Value>,
    pub loop_depth: usize,
    /// Block name and override level, for `super()`
    pub block: Option<(String, usize)>,
    /// Template registered by `{% extends %}`
    pub parent: Option<Arc<LoadedTemplate>>,
}

impl Frame {
    /// Frame at the start of `chunk` with a fresh scope
    pub fn new(
        template: Arc<LoadedTemplate>,
        chunk: u32,
        context: Arc<Context>,
        completion: Completion,
    ) -> Self {
        let slots = template.code().chunk(chunk).map_or(0, |c| c.slot_count());
        Self {
            template,
            chunk,
            pc: 0,
            scope: Scope::new(slots, None),
            context,
            overlays: Vec::new(),
            autoescape_saved: Vec::new(),
            stack_base: 0,
            capture_base: 0,
            completion,
            function: None,
            loop_depth: 0,
            block: None,
            parent: None,
        }
    }

    pub fn with_scope(mut self, scope: Arc<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_block(mut self, name: &str, level: usize) -> Self {
        self.block = Some((name.to_string(), level));
        self
    }

    /// Traceback label ("template", "block 'x'", "macro 'm'")
    pub fn function_name(&self) -> String {
        self.template
            .code()
            .chunk(self.chunk)
            .map_or_else(|| "template".to_string(), |c| c.function_name())
    }

    /// Line of the instruction executing in this frame
    pub fn line(&self) -> u32 {
        self.template
            .code()
            .chunk(self.chunk)
            .map_or(0, |c| c.line_at(self.pc.saturating_sub(1)))
    }
}
