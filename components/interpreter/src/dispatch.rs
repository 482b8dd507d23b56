//! Instruction dispatch
//!
//! `step` executes exactly one instruction of the innermost frame. Entering
//! or leaving a template function only pushes or pops a [`Frame`]; the Rust
//! stack never grows with template recursion.

use std::sync::Arc;

use bytecode_system::{Escape, Opcode};
use core_types::{
    markup, ops, repr_str, ContextAccess, Kwargs, Result, TemplateError, Value, ValueMap,
};

use crate::call_frame::{Completion, Frame};
use crate::context::Context;
use crate::host::LoadedTemplate;
use crate::loop_context::{FilterState, LoopContext};
use crate::runtime::{no_parent_block, BlockReference, Macro, TemplateModule, TemplateReference};
use crate::vm::{Flow, Resume, VM};

fn bad_operand(what: &str, idx: u32) -> TemplateError {
    TemplateError::runtime(format!("invalid {} index {}", what, idx))
}

fn as_mapping(value: Value, what: &str) -> Result<ValueMap> {
    match value.as_map() {
        Some(map) => Ok(map.clone()),
        None => Err(TemplateError::type_error(format!(
            "{} must be a mapping, not {}",
            what,
            value.type_name()
        ))),
    }
}

impl VM {
    pub(crate) fn step(&mut self) -> Result<Flow> {
        let (template, chunk_idx, pc) = {
            let frame = self.frame()?;
            (frame.template.clone(), frame.chunk, frame.pc)
        };
        let chunk = template
            .code()
            .chunk(chunk_idx)
            .ok_or_else(|| bad_operand("chunk", chunk_idx))?;
        let Some(instruction) = chunk.instructions.get(pc) else {
            return self.finish_frame(None);
        };
        self.frame_mut()?.pc = pc + 1;

        match &instruction.opcode {
            Opcode::LoadConst(idx) => {
                let value = chunk
                    .constants
                    .get(*idx as usize)
                    .map(|c| c.to_value())
                    .ok_or_else(|| bad_operand("constant", *idx))?;
                self.stack.push(value);
            }
            Opcode::LoadUndefined { name, hint } => {
                let value = self
                    .host
                    .undefined(hint.clone(), None, name.as_deref().map(Value::from));
                self.stack.push(value);
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.peek()?.clone();
                self.stack.push(top);
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(TemplateError::runtime("value stack underflow"));
                }
                self.stack.swap(len - 1, len - 2);
            }

            Opcode::LoadLocal(local) => {
                let value = match self.frame()?.scope.get(*local)? {
                    Some(value) => value,
                    None => self.host.undefined(None, None, None),
                };
                self.stack.push(value);
            }
            Opcode::LoadName { local, name } => {
                let value = match self.frame()?.scope.get(*local)? {
                    Some(value) => value,
                    None => self.host.undefined(None, None, Some(Value::from(name.as_str()))),
                };
                self.stack.push(value);
            }
            Opcode::StoreLocal(local) => {
                let value = self.pop()?;
                self.frame()?.scope.set(*local, Some(value))?;
            }
            Opcode::ResolveLocal { local, name } => {
                let frame = self.frame()?;
                frame.scope.set(*local, frame.context.lookup(name))?;
            }
            Opcode::CopyLocal { from, to } => {
                let scope = &self.frame()?.scope;
                scope.set(*to, scope.get(*from)?)?;
            }
            Opcode::ClearLocal(local) => self.frame()?.scope.set(*local, None)?,
            Opcode::JumpIfBound { local, target } => {
                if self.frame()?.scope.is_bound(*local)? {
                    self.jump(*target)?;
                }
            }
            Opcode::BuildLocals(entries) => {
                let scope = &self.frame()?.scope;
                let mut locals = ValueMap::new();
                for (name, local) in entries {
                    if let Some(value) = scope.get(*local)? {
                        locals.insert(Value::from(name.as_str()), value);
                    }
                }
                self.stack.push(Value::from(locals));
            }

            Opcode::StoreContextVar { name, local } => {
                let frame = self.frame()?;
                let value = match frame.scope.get(*local)? {
                    Some(value) => value,
                    None => self.host.undefined(None, None, Some(Value::from(name.as_str()))),
                };
                frame.context.set_var(name, value);
            }
            Opcode::Export(name) => self.frame()?.context.export(name),
            Opcode::Unexport(name) => self.frame()?.context.unexport(name),
            Opcode::SetNamespaceAttr(attr) => {
                let namespace = self.pop()?;
                let value = self.pop()?;
                let non_namespace =
                    || TemplateError::runtime("cannot assign attribute on non-namespace object");
                match namespace.as_object() {
                    Some(obj) => obj.set_attr(attr, value).map_err(|_| non_namespace())?,
                    None => return Err(non_namespace()),
                }
            }

            Opcode::GetAttr(name) => {
                let obj = self.pop()?;
                let value = self.host.getattr(&obj, name)?;
                self.stack.push(value);
            }
            Opcode::GetItem => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let value = self.host.getitem(&obj, &key)?;
                self.stack.push(value);
            }
            Opcode::Slice => {
                let step = self.pop()?;
                let stop = self.pop()?;
                let start = self.pop()?;
                let obj = self.pop()?;
                self.stack.push(ops::slice(&obj, &start, &stop, &step)?);
            }
            Opcode::BinaryOp(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let value = self.host.binary_op(*op, &left, &right)?;
                self.stack.push(value);
            }
            Opcode::UnaryOp(op) => {
                let operand = self.pop()?;
                let value = self.host.unary_op(*op, &operand)?;
                self.stack.push(value);
            }
            Opcode::Compare(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(Value::from(ops::compare(*op, &left, &right)?));
            }
            Opcode::CompareChain(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = ops::compare(*op, &left, &right)?;
                self.stack.push(right);
                self.stack.push(Value::from(result));
            }
            Opcode::Concat(n, mode) => {
                let parts = self.pop_n(*n as usize)?;
                let value = if self.escaping(*mode)? {
                    markup::markup_join(&parts)?
                } else {
                    let mut joined = String::new();
                    for part in &parts {
                        joined.push_str(&ops::to_string(part)?);
                    }
                    Value::from(joined)
                };
                self.stack.push(value);
            }
            Opcode::BuildList(n) => {
                let items = self.pop_n(*n as usize)?;
                self.stack.push(Value::from(items));
            }
            Opcode::BuildTuple(n) => {
                let items = self.pop_n(*n as usize)?;
                self.stack.push(Value::tuple(items));
            }
            Opcode::BuildMap(n) => {
                let flat = self.pop_n(*n as usize * 2)?;
                let pairs = flat
                    .chunks_exact(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()));
                self.stack.push(ops::make_map(pairs));
            }
            Opcode::UnpackSequence(n) => {
                let value = self.pop()?;
                let items = ops::to_vec(&value)?;
                let expected = *n as usize;
                if items.len() > expected {
                    return Err(TemplateError::runtime(format!(
                        "too many values to unpack (expected {})",
                        expected
                    )));
                }
                if items.len() < expected {
                    return Err(TemplateError::runtime(format!(
                        "not enough values to unpack (expected {}, got {})",
                        expected,
                        items.len()
                    )));
                }
                self.stack.extend(items.into_iter().rev());
            }
            Opcode::MarkSafe => {
                let value = self.pop()?;
                self.stack.push(markup::mark_safe(&value)?);
            }
            Opcode::MarkSafeIfAutoescape(mode) => {
                if self.escaping(*mode)? {
                    let value = self.pop()?;
                    self.stack.push(markup::mark_safe(&value)?);
                }
            }

            Opcode::Call(shape) => {
                let (args, kwargs) = self.pop_call_args(shape)?;
                let callee = self.pop()?;
                return self.call(callee, args, kwargs);
            }
            Opcode::CallMethod { name, shape } => {
                let (args, kwargs) = self.pop_call_args(shape)?;
                let receiver = self.pop()?;
                return self.call_method(receiver, name, args, kwargs);
            }
            Opcode::CallFilter { name, shape } => {
                let (mut args, kwargs) = self.pop_call_args(shape)?;
                let value = self.pop()?;
                let filter = self.host.filter(name).ok_or_else(|| {
                    TemplateError::runtime(format!("No filter named {} found.", repr_str(name)))
                })?;
                args.insert(0, value);
                return self.invoke_function(&filter, args, kwargs, Resume::Push);
            }
            Opcode::CallTest { name, shape } => {
                let (mut args, kwargs) = self.pop_call_args(shape)?;
                let value = self.pop()?;
                let test = self.host.test(name).ok_or_else(|| {
                    TemplateError::runtime(format!("No test named {} found.", repr_str(name)))
                })?;
                args.insert(0, value);
                return self.invoke_function(&test, args, kwargs, Resume::Test);
            }
            Opcode::ExtensionAttribute { extension, name } => {
                let value = match self.host.extension_attribute(extension, name) {
                    Some(value) => value,
                    None => self.host.undefined(None, None, Some(Value::from(name.as_str()))),
                };
                self.stack.push(value);
            }

            Opcode::Jump(target) => self.jump(*target)?,
            Opcode::JumpIfFalse(target) => {
                let value = self.pop()?;
                if !ops::is_true(&value)? {
                    self.jump(*target)?;
                }
            }
            Opcode::JumpIfTrue(target) => {
                let value = self.pop()?;
                if ops::is_true(&value)? {
                    self.jump(*target)?;
                }
            }
            Opcode::JumpIfFalseOrPop(target) => {
                if ops::is_true(self.peek()?)? {
                    self.pop()?;
                } else {
                    self.jump(*target)?;
                }
            }
            Opcode::JumpIfTrueOrPop(target) => {
                if ops::is_true(self.peek()?)? {
                    self.jump(*target)?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::PushLoop { recursive } => {
                let iterable = self.pop()?;
                let iter = ops::try_iter(&iterable)?;
                let frame = self.frame()?;
                let (depth0, recurse) = if *recursive {
                    (frame.loop_depth, frame.function.clone())
                } else {
                    (0, None)
                };
                let ctx = LoopContext::new(iter, depth0, recurse, self.host.undefined_behavior());
                self.stack.push(Value::from_object(ctx));
            }
            Opcode::Iterate(exit) => {
                let top = self.peek()?.clone();
                let ctx = top
                    .downcast_object_ref::<LoopContext>()
                    .ok_or_else(|| TemplateError::runtime("iteration without a loop context"))?;
                match ctx.advance() {
                    Some(item) => self.stack.push(item),
                    None => self.jump(*exit)?,
                }
            }
            Opcode::LoopWasEmpty => {
                let top = self.pop()?;
                let ctx = top
                    .downcast_object_ref::<LoopContext>()
                    .ok_or_else(|| TemplateError::runtime("iteration without a loop context"))?;
                self.stack.push(Value::from(ctx.was_empty()));
            }
            Opcode::StartFilter => {
                let iterable = self.pop()?;
                let iter = ops::try_iter(&iterable)?;
                self.stack.push(Value::from_object(FilterState::new(iter)));
            }
            Opcode::FilterNext(done) => {
                let top = self.peek()?.clone();
                let state = filter_state(&top)?;
                match state.next_candidate() {
                    Some(item) => self.stack.push(item),
                    None => {
                        let kept = state.take_kept();
                        self.pop()?;
                        self.stack.push(kept);
                        self.jump(*done)?;
                    }
                }
            }
            Opcode::FilterKeep => {
                let passed = self.pop()?;
                let candidate = self.pop()?;
                if ops::is_true(&passed)? {
                    filter_state(self.peek()?)?.keep(candidate);
                }
            }

            Opcode::EmitRaw(idx) => {
                let text = chunk
                    .constants
                    .get(*idx as usize)
                    .and_then(|c| c.as_str())
                    .ok_or_else(|| bad_operand("text constant", *idx))?;
                self.write(text);
            }
            Opcode::Finalize => {
                if let Some(finalize) = self.host.finalize() {
                    let value = self.pop()?;
                    return self.invoke_function(&finalize, vec![value], Kwargs::new(), Resume::Push);
                }
            }
            Opcode::Emit(mode) => {
                let value = self.pop()?;
                let text = if self.escaping(*mode)? {
                    ops::to_string(&markup::escape(&value)?)?
                } else {
                    ops::to_string(&value)?
                };
                self.write(&text);
            }
            Opcode::BeginCapture => self.captures.push(String::new()),
            Opcode::EndCapture(mode) => {
                let buffer = self
                    .captures
                    .pop()
                    .ok_or_else(|| TemplateError::runtime("no capture to end"))?;
                let value = if self.escaping(*mode)? {
                    Value::from_safe_string(buffer)
                } else {
                    Value::from_string(buffer)
                };
                self.stack.push(value);
            }
            Opcode::DiscardCapture => {
                self.captures.pop();
            }
            Opcode::PushAutoescape => {
                let value = self.pop()?;
                let enabled = ops::is_true(&value)?;
                let frame = self.frame_mut()?;
                let previous = frame.context.set_autoescape(enabled);
                frame.autoescape_saved.push(previous);
            }
            Opcode::PopAutoescape => {
                let frame = self.frame_mut()?;
                if let Some(previous) = frame.autoescape_saved.pop() {
                    frame.context.set_autoescape(previous);
                }
            }
            Opcode::PushOverlay => {
                let vars = as_mapping(self.pop()?, "overlay context")?;
                let locals = as_mapping(self.pop()?, "overlay locals")?;
                let frame = self.frame_mut()?;
                let derived = frame.context.derived(locals);
                for (key, value) in vars {
                    if let Some(name) = key.as_str() {
                        derived.set_var(name, value);
                    }
                }
                let previous = std::mem::replace(&mut frame.context, derived);
                frame.overlays.push(previous);
            }
            Opcode::PopOverlay => {
                let frame = self.frame_mut()?;
                if let Some(previous) = frame.overlays.pop() {
                    frame.context = previous;
                }
            }

            Opcode::MakeClosure(idx) => {
                let frame = self.frame()?;
                let closure = Macro::new(
                    frame.template.clone(),
                    *idx,
                    frame.scope.clone(),
                    frame.context.clone(),
                )?;
                self.stack.push(Value::from_object(closure));
            }
            Opcode::MakeTemplateRef => {
                let context = self.context()?;
                self.stack.push(Value::from_object(TemplateReference::new(context)));
            }
            Opcode::MakeSuper => {
                let frame = self.frame()?;
                let value = match &frame.block {
                    Some((name, level)) if frame.context.block(name, level + 1).is_some() => {
                        Value::from_object(BlockReference::new(
                            name.clone(),
                            frame.context.clone(),
                            level + 1,
                        ))
                    }
                    Some((name, _)) => no_parent_block(&frame.context, name),
                    None => self.host.undefined(
                        Some("super() is only available inside blocks".to_string()),
                        None,
                        Some(Value::from("super")),
                    ),
                };
                self.stack.push(value);
            }
            Opcode::Return => return self.finish_frame(None),
            Opcode::ReturnValue => {
                let value = self.pop()?;
                return self.finish_frame(Some(value));
            }

            Opcode::Extends => {
                let name = self.pop()?;
                if self.frame()?.parent.is_some() {
                    return Err(TemplateError::runtime("extended multiple times"));
                }
                let parent = self.host.get_template(&name, template.name())?;
                tracing::trace!(template = ?template.name(), parent = ?parent.name(), "extends");
                let frame = self.frame_mut()?;
                frame.context.push_parent_blocks(&parent);
                frame.parent = Some(parent);
            }
            Opcode::JumpIfParentSet(target) => {
                if self.frame()?.parent.is_some() {
                    self.jump(*target)?;
                }
            }
            Opcode::RenderParent => {
                let frame = self.frame()?;
                if let Some(parent) = frame.parent.clone() {
                    let context = frame.context.clone();
                    self.push_frame(Frame::new(parent, 0, context, Completion::Discard))?;
                }
            }
            Opcode::RenderBlock {
                name,
                scoped,
                required,
            } => {
                let context = if *scoped {
                    let locals = as_mapping(self.pop()?, "block locals")?;
                    self.context()?.derived(locals)
                } else {
                    self.context()?
                };
                let entry = context.block(name, 0).ok_or_else(|| {
                    TemplateError::runtime(format!("block {} is not defined", repr_str(name)))
                })?;
                if *required && Arc::ptr_eq(&entry.template, &template) {
                    return Err(TemplateError::runtime(format!(
                        "Required block {} not found",
                        repr_str(name)
                    )));
                }
                let frame = Frame::new(entry.template, entry.chunk, context, Completion::Discard)
                    .with_block(name, 0);
                self.push_frame(frame)?;
            }
            Opcode::Include {
                with_context,
                ignore_missing,
            } => {
                let locals = if *with_context {
                    Some(as_mapping(self.pop()?, "include locals")?)
                } else {
                    None
                };
                let name = self.pop()?;
                let loaded = match self.host.get_template(&name, template.name()) {
                    Ok(loaded) => loaded,
                    Err(err) if *ignore_missing && err.kind.is_not_found() => {
                        tracing::trace!(template = %name, "skipping missing include");
                        return Ok(Flow::Continue);
                    }
                    Err(err) => return Err(err),
                };
                let context = self.template_context(&loaded, locals)?;
                self.push_frame(Frame::new(loaded, 0, context, Completion::Discard))?;
            }
            Opcode::Import { with_context } => {
                let locals = if *with_context {
                    Some(as_mapping(self.pop()?, "import locals")?)
                } else {
                    None
                };
                let name = self.pop()?;
                let loaded = self.host.get_template(&name, template.name())?;
                let cache = locals.is_none();
                if cache {
                    if let Some(module) = loaded.cached_module() {
                        self.stack.push(module);
                        return Ok(Flow::Continue);
                    }
                }
                let context = self.template_context(&loaded, locals)?;
                self.push_frame(Frame::new(loaded, 0, context, Completion::Module { cache }))?;
            }
            Opcode::ImportName { name, position } => {
                let module = self.pop()?;
                let value = self.host.getattr(&module, name)?;
                let value = if value.is_undefined() {
                    let origin = module
                        .downcast_object_ref::<TemplateModule>()
                        .and_then(|m| m.name())
                        .map(repr_str)
                        .unwrap_or_else(|| module.type_name().to_string());
                    self.host.undefined(
                        Some(format!(
                            "the template {} (imported on {}) does not export the requested name {}",
                            origin,
                            position,
                            repr_str(name)
                        )),
                        None,
                        Some(Value::from(name.as_str())),
                    )
                } else {
                    value
                };
                self.stack.push(value);
            }
        }
        Ok(Flow::Continue)
    }

    fn jump(&mut self, target: u32) -> Result<()> {
        self.frame_mut()?.pc = target as usize;
        Ok(())
    }

    fn escaping(&self, mode: Escape) -> Result<bool> {
        Ok(match mode {
            Escape::Off => false,
            Escape::On => true,
            Escape::Runtime => self.frame()?.context.eval_context().autoescape,
        })
    }

    /// Context for an included or imported template. With `locals` the new
    /// template sees everything the current one does.
    fn template_context(
        &self,
        template: &Arc<LoadedTemplate>,
        locals: Option<ValueMap>,
    ) -> Result<Arc<Context>> {
        Ok(match locals {
            Some(locals) => {
                let mut vars = self.frame()?.context.get_all();
                vars.extend(locals);
                Context::for_template(self.host.clone(), template, vars, true)
            }
            None => Context::for_template(self.host.clone(), template, ValueMap::new(), false),
        })
    }

    pub(crate) fn finish_frame(&mut self, value: Option<Value>) -> Result<Flow> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| TemplateError::runtime("no active template frame"))?;
        tracing::trace!(function = %frame.function_name(), depth = self.frames.len(), "leave");
        self.stack.truncate(frame.stack_base);
        let body = if frame.completion.captures() && self.captures.len() > frame.capture_base {
            Some(self.captures.swap_remove(frame.capture_base))
        } else {
            None
        };
        self.captures.truncate(frame.capture_base);

        match frame.completion {
            Completion::Discard => {}
            Completion::Value { safe } => {
                let value = value.unwrap_or(Value::None);
                let value = if safe { markup::mark_safe(&value)? } else { value };
                self.stack.push(value);
            }
            Completion::Captured { safe } => {
                let body = body.unwrap_or_default();
                self.stack.push(if safe {
                    Value::from_safe_string(body)
                } else {
                    Value::from_string(body)
                });
            }
            Completion::Module { cache } => {
                let module = Value::from_object(TemplateModule::new(
                    frame.template.name(),
                    frame.context.get_exported(),
                    body.unwrap_or_default(),
                ));
                if cache {
                    frame.template.store_module(module.clone());
                }
                self.stack.push(module);
            }
        }
        Ok(Flow::Continue)
    }
}

fn filter_state(value: &Value) -> Result<&FilterState> {
    value
        .downcast_object_ref::<FilterState>()
        .ok_or_else(|| TemplateError::runtime("loop filter state missing"))
}
