//! Virtual Machine for template execution
//!
//! The VM keeps its call stack in [`Frame`]s instead of Rust recursion, so a
//! render can stop at any instruction: after output was produced (streaming)
//! or when a host function returned a future (async rendering). The driver
//! loop is [`VM::resume`]; [`VM::run`], [`RenderIter`] and
//! [`VM::into_stream`] are the three ways of driving it.

use std::sync::Arc;

use core_types::{
    ops, ContextAccess, Kwargs, Result, SourcePosition, StackFrame, TemplateError, Value,
};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use crate::call_frame::{Completion, Frame};
use crate::context::Context;
use crate::host::{LoadedTemplate, RenderHost};
use crate::runtime::{BlockReference, Macro};

/// Nesting limit for template function calls, includes and imports
pub const MAX_DEPTH: usize = 512;

/// Why [`VM::resume`] returned
pub enum Suspend {
    /// A piece of output is ready
    Chunk(String),
    /// A host function returned a future; pass its result to [`VM::provide`]
    Await(BoxFuture<'static, Result<Value>>),
    /// Execution finished
    Done,
}

/// Outcome of a single step
pub(crate) enum Flow {
    Continue,
    Await(BoxFuture<'static, Result<Value>>, Resume),
}

/// How an awaited result is pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    Push,
    Test,
}

/// Virtual Machine for executing compiled templates
///
/// One VM runs one render (or one host-side macro call) and is discarded
/// afterwards.
pub struct VM {
    pub(crate) host: Arc<dyn RenderHost>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) stack: Vec<Value>,
    pub(crate) captures: Vec<String>,
    pub(crate) out: String,
    waiting: Option<Resume>,
}

impl VM {
    /// Create an idle VM
    pub fn new(host: Arc<dyn RenderHost>) -> Self {
        Self {
            host,
            frames: Vec::with_capacity(16),
            stack: Vec::with_capacity(64),
            captures: Vec::new(),
            out: String::new(),
            waiting: None,
        }
    }

    /// VM positioned at the root of `template`, writing to the output
    pub fn render(host: Arc<dyn RenderHost>, template: &Arc<LoadedTemplate>, context: Arc<Context>) -> Result<Self> {
        tracing::debug!(template = ?template.name(), "render");
        let mut vm = Self::new(host);
        vm.push_frame(Frame::new(template.clone(), 0, context, Completion::Discard))?;
        Ok(vm)
    }

    /// VM that evaluates `template` as a module. `cache` stores the module
    /// on the template for later context-free imports.
    pub fn module(
        host: Arc<dyn RenderHost>,
        template: &Arc<LoadedTemplate>,
        context: Arc<Context>,
        cache: bool,
    ) -> Result<Self> {
        tracing::debug!(template = ?template.name(), "evaluate module");
        let mut vm = Self::new(host);
        vm.push_frame(Frame::new(
            template.clone(),
            0,
            context,
            Completion::Module { cache },
        ))?;
        Ok(vm)
    }

    /// VM that renders one block of `context`'s template into a string value
    pub fn block(host: Arc<dyn RenderHost>, context: Arc<Context>, name: &str) -> Result<Self> {
        let mut vm = Self::new(host);
        vm.enter_block(&BlockReference::new(name, context, 0))?;
        Ok(vm)
    }

    /// Current call stack depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Run until output is available, a future must be awaited or the
    /// program ends
    pub fn resume(&mut self) -> Result<Suspend> {
        if self.waiting.is_some() {
            return Err(TemplateError::runtime(
                "render resumed before the pending call completed",
            ));
        }
        loop {
            if self.frames.is_empty() {
                if !self.out.is_empty() {
                    return Ok(Suspend::Chunk(std::mem::take(&mut self.out)));
                }
                return Ok(Suspend::Done);
            }
            match self.step() {
                Ok(Flow::Continue) => {
                    if !self.out.is_empty() {
                        return Ok(Suspend::Chunk(std::mem::take(&mut self.out)));
                    }
                }
                Ok(Flow::Await(future, resume)) => {
                    self.waiting = Some(resume);
                    return Ok(Suspend::Await(future));
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Complete the call [`VM::resume`] suspended on
    pub fn provide(&mut self, result: Result<Value>) -> Result<()> {
        let resume = self
            .waiting
            .take()
            .ok_or_else(|| TemplateError::runtime("no pending call to complete"))?;
        result
            .and_then(|value| self.push_result(value, resume))
            .map_err(|err| self.fail(err))
    }

    /// Run to completion, blocking on any pending futures
    pub fn run(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.resume()? {
                Suspend::Chunk(chunk) => out.push_str(&chunk),
                Suspend::Await(future) => self.provide(futures::executor::block_on(future))?,
                Suspend::Done => return Ok(out),
            }
        }
    }

    /// Run to completion, awaiting pending futures
    pub async fn run_async(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.resume()? {
                Suspend::Chunk(chunk) => out.push_str(&chunk),
                Suspend::Await(future) => {
                    let result = future.await;
                    self.provide(result)?;
                }
                Suspend::Done => return Ok(out),
            }
        }
    }

    /// Output as a blocking iterator of chunks
    pub fn into_chunks(self) -> RenderIter {
        RenderIter {
            vm: self,
            finished: false,
        }
    }

    /// Output as an async stream of chunks
    pub fn into_stream(self) -> BoxStream<'static, Result<String>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut vm = state?;
            loop {
                match vm.resume() {
                    Ok(Suspend::Chunk(chunk)) => return Some((Ok(chunk), Some(vm))),
                    Ok(Suspend::Await(future)) => {
                        let result = future.await;
                        if let Err(err) = vm.provide(result) {
                            return Some((Err(err), None));
                        }
                    }
                    Ok(Suspend::Done) => return None,
                    Err(err) => return Some((Err(err), None)),
                }
            }
        })
        .boxed()
    }

    /// Value left by a finished call, block or module evaluation
    pub fn take_value(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    /// Call any template value from host code and wait for the result
    pub fn call_value(host: Arc<dyn RenderHost>, callee: Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let mut vm = Self::new(host);
        if let Flow::Await(future, resume) = vm.call(callee, args, kwargs)? {
            vm.waiting = Some(resume);
            vm.provide(futures::executor::block_on(future))?;
        }
        vm.finish_call()
    }

    /// Evaluate a template as a module and return it
    pub fn make_module(
        host: Arc<dyn RenderHost>,
        template: &Arc<LoadedTemplate>,
        context: Arc<Context>,
        cache: bool,
    ) -> Result<Value> {
        if cache {
            if let Some(module) = template.cached_module() {
                return Ok(module);
            }
        }
        Self::module(host, template, context, cache)?.finish_call()
    }

    /// Async variant of [`VM::make_module`]
    pub async fn make_module_async(
        host: Arc<dyn RenderHost>,
        template: &Arc<LoadedTemplate>,
        context: Arc<Context>,
        cache: bool,
    ) -> Result<Value> {
        if cache {
            if let Some(module) = template.cached_module() {
                return Ok(module);
            }
        }
        let mut vm = Self::module(host, template, context, cache)?;
        vm.run_async().await?;
        vm.take_value()
            .ok_or_else(|| TemplateError::runtime("module evaluation produced no value"))
    }

    pub(crate) fn call_macro(m: &Macro, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let mut vm = Self::new(m.context.host().clone());
        vm.enter_macro(m, None, args, kwargs, None)?;
        vm.finish_call()
    }

    pub(crate) fn call_block(block: &BlockReference) -> Result<Value> {
        let mut vm = Self::new(block.context.host().clone());
        vm.enter_block(block)?;
        vm.finish_call()
    }

    fn finish_call(&mut self) -> Result<Value> {
        self.run()?;
        self.take_value()
            .ok_or_else(|| TemplateError::runtime("call produced no value"))
    }

    pub(crate) fn push_result(&mut self, value: Value, resume: Resume) -> Result<()> {
        let value = match resume {
            Resume::Push => value,
            Resume::Test => Value::from(ops::is_true(&value)?),
        };
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn push_frame(&mut self, mut frame: Frame) -> Result<()> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(TemplateError::runtime("maximum recursion depth exceeded"));
        }
        frame.stack_base = self.stack.len();
        frame.capture_base = self.captures.len();
        if frame.completion.captures() {
            self.captures.push(String::new());
        }
        tracing::trace!(
            function = %frame.function_name(),
            template = ?frame.template.name(),
            depth = self.frames.len(),
            "enter"
        );
        self.frames.push(frame);
        Ok(())
    }

    /// Attach the template position and traceback, then reset the VM
    fn fail(&mut self, mut err: TemplateError) -> TemplateError {
        if err.source_position.is_none() {
            if let Some(frame) = self.frames.last() {
                err = err.with_position(SourcePosition::new(
                    frame.template.name(),
                    frame.template.filename(),
                    frame.line(),
                ));
            }
        }
        for frame in self.frames.iter().rev() {
            err.stack.push(StackFrame {
                function_name: Some(frame.function_name()),
                template: frame.template.name().map(str::to_string),
                filename: frame.template.filename().map(str::to_string),
                line: frame.line(),
            });
        }
        tracing::debug!(kind = ?err.kind, message = %err.message, "render failed");
        self.frames.clear();
        self.stack.clear();
        self.captures.clear();
        self.out.clear();
        err
    }

    pub(crate) fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| TemplateError::runtime("no active template frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| TemplateError::runtime("no active template frame"))
    }

    pub(crate) fn context(&self) -> Result<Arc<Context>> {
        Ok(self.frame()?.context.clone())
    }

    /// Autoescape setting where the next call happens
    pub(crate) fn autoescape(&self) -> bool {
        match self.frames.last() {
            Some(frame) => frame.context.eval_context().autoescape,
            None => self.host.autoescape(None),
        }
    }

    pub(crate) fn pop(&mut self) -> Result<Value> {
        let base = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= base {
            return Err(TemplateError::runtime("value stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| TemplateError::runtime("value stack underflow"))
    }

    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        let base = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() < base + n {
            return Err(TemplateError::runtime("value stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub(crate) fn peek(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| TemplateError::runtime("value stack underflow"))
    }

    pub(crate) fn write(&mut self, text: &str) {
        match self.captures.last_mut() {
            Some(buffer) => buffer.push_str(text),
            None => self.out.push_str(text),
        }
    }
}

impl std::fmt::Debug for VM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("frames", &self.frames.len())
            .field("stack", &self.stack.len())
            .field("captures", &self.captures.len())
            .finish()
    }
}

/// Blocking iterator over render output
#[derive(Debug)]
pub struct RenderIter {
    vm: VM,
    finished: bool,
}

impl Iterator for RenderIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.vm.resume() {
                Ok(Suspend::Chunk(chunk)) => return Some(Ok(chunk)),
                Ok(Suspend::Await(future)) => {
                    if let Err(err) = self.vm.provide(futures::executor::block_on(future)) {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
                Ok(Suspend::Done) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
