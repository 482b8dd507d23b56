//! Calling convention
//!
//! Host functions run immediately (or hand back a future); macros, callers,
//! recursive loop bodies and block references get a frame of their own.

use bytecode_system::{CallShape, ChunkKind, LocalRef, MacroSignature};
use core_types::{
    methods, ops, repr_str, CallOutcome, CallSite, ContextAccess, ErrorKind, EvalContext,
    Function, Kwargs, Result, TemplateError, Value,
};

use crate::call_frame::{Completion, Frame};
use crate::loop_context::LoopContext;
use crate::runtime::{BlockReference, Macro};
use crate::scope::Scope;
use crate::vm::{Flow, Resume, VM};

impl VM {
    /// Pop the operands described by `shape`. Positional arguments come
    /// first, then keyword values, then `*args` and `**kwargs`.
    pub(crate) fn pop_call_args(&mut self, shape: &CallShape) -> Result<(Vec<Value>, Kwargs)> {
        let mut operands = self.pop_n(shape.operand_count())?;
        let dyn_kwargs = if shape.dyn_kwargs { operands.pop() } else { None };
        let dyn_args = if shape.dyn_args { operands.pop() } else { None };
        let keyword_values = operands.split_off((shape.args as usize).min(operands.len()));
        let mut args = operands;
        let mut kwargs: Kwargs = shape.kwargs.iter().cloned().zip(keyword_values).collect();

        if let Some(extra) = dyn_args {
            args.extend(ops::try_iter(&extra)?);
        }
        if let Some(extra) = dyn_kwargs {
            match extra.as_map() {
                Some(map) => {
                    for (key, value) in map {
                        let key = key
                            .as_str()
                            .ok_or_else(|| TemplateError::type_error("keywords must be strings"))?;
                        kwargs.insert(key, value.clone());
                    }
                }
                None if extra.is_undefined() => {}
                None => {
                    return Err(TemplateError::type_error(format!(
                        "argument after ** must be a mapping, not {}",
                        extra.type_name()
                    )))
                }
            }
        }
        Ok((args, kwargs))
    }

    pub(crate) fn call(&mut self, callee: Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Flow> {
        if !self.host.is_safe_callable(&callee) {
            return Err(TemplateError::new(
                ErrorKind::SecurityError,
                format!("{} is not safely callable", callee.repr()),
            ));
        }
        match &callee {
            Value::Function(function) => self.invoke_function(function, args, kwargs, Resume::Push),
            Value::Object(obj) => {
                let any = obj.as_any();
                if let Some(m) = any.downcast_ref::<Macro>() {
                    self.enter_macro(m, Some(callee.clone()), args, kwargs, None)?;
                } else if let Some(block) = any.downcast_ref::<BlockReference>() {
                    if !args.is_empty() || !kwargs.is_empty() {
                        return Err(TemplateError::type_error("block references take no arguments"));
                    }
                    self.enter_block(block)?;
                } else if let Some(ctx) = any.downcast_ref::<LoopContext>() {
                    let recurse = ctx.recurse().cloned().ok_or_else(|| {
                        TemplateError::type_error(
                            "The loop must be marked as 'recursive' to be called recursively.",
                        )
                    })?;
                    let body = recurse
                        .downcast_object_ref::<Macro>()
                        .ok_or_else(|| TemplateError::runtime("loop body is not a template function"))?;
                    self.enter_macro(body, Some(recurse.clone()), args, kwargs, Some(ctx.depth0() + 1))?;
                } else {
                    let value = obj.call(&args, &kwargs)?;
                    self.stack.push(value);
                }
                Ok(Flow::Continue)
            }
            Value::Undefined(undefined) => Err(undefined.error()),
            other => Err(TemplateError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Flow> {
        match &receiver {
            Value::Undefined(undefined) => Err(undefined.error()),
            Value::Object(obj) => {
                let attr = self.host.getattr(&receiver, name)?;
                if attr.is_callable() {
                    return self.call(attr, args, kwargs);
                }
                let value = obj.call_method(name, &args, &kwargs)?;
                self.stack.push(value);
                Ok(Flow::Continue)
            }
            _ => match methods::call_method(&receiver, name, &args, &kwargs)? {
                Some(value) => {
                    self.stack.push(value);
                    Ok(Flow::Continue)
                }
                None => {
                    let attr = self.host.getattr(&receiver, name)?;
                    self.call(attr, args, kwargs)
                }
            },
        }
    }

    pub(crate) fn invoke_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Kwargs,
        resume: Resume,
    ) -> Result<Flow> {
        let host = self.host.clone();
        let context = self.frames.last().map(|f| f.context.clone());
        let eval_ctx = match &context {
            Some(ctx) => ctx.eval_context(),
            None => EvalContext::new(host.autoescape(None)),
        };
        let site = CallSite {
            context: context.as_deref().map(|c| c as &dyn ContextAccess),
            eval_ctx: &eval_ctx,
            env: host.as_environment(),
        };
        match function.invoke(&site, &args, &kwargs)? {
            CallOutcome::Ready(value) => {
                self.push_result(value, resume)?;
                Ok(Flow::Continue)
            }
            CallOutcome::Pending(future) => Ok(Flow::Await(future, resume)),
        }
    }

    /// Push a frame running `m`. `function` is the value being called, kept
    /// so a recursive loop body can call itself again.
    pub(crate) fn enter_macro(
        &mut self,
        m: &Macro,
        function: Option<Value>,
        args: Vec<Value>,
        kwargs: Kwargs,
        loop_depth: Option<usize>,
    ) -> Result<()> {
        let slots = m.template.code().chunk(m.chunk).map_or(0, |c| c.slot_count());
        let scope = Scope::new(slots, Some(m.scope.clone()));
        let safe = match &m.kind {
            ChunkKind::Macro(sig) | ChunkKind::CallBlock(sig) => {
                self.bind_arguments(sig, &scope, args, kwargs)?;
                self.autoescape()
            }
            ChunkKind::Loop { iter_slot } => {
                if args.len() != 1 || !kwargs.is_empty() {
                    return Err(TemplateError::type_error(
                        "loop() takes exactly one positional argument",
                    ));
                }
                scope.set(LocalRef::local(*iter_slot), args.into_iter().next())?;
                false
            }
            _ => return Err(TemplateError::runtime("chunk is not a template function")),
        };
        let mut frame = Frame::new(
            m.template.clone(),
            m.chunk,
            m.context.clone(),
            Completion::Value { safe },
        )
        .with_scope(scope);
        frame.function = function;
        frame.loop_depth = loop_depth.unwrap_or(0);
        self.push_frame(frame)
    }

    /// Bind call arguments to the parameter slots: declared arguments,
    /// then `caller`, `kwargs` and `varargs` when the body uses them.
    /// Arguments that are not given stay unbound so the body can apply
    /// their defaults.
    fn bind_arguments(
        &self,
        sig: &MacroSignature,
        scope: &Scope,
        args: Vec<Value>,
        mut kwargs: Kwargs,
    ) -> Result<()> {
        let mut slots = sig.param_slots.iter().copied();
        let mut next_slot = move || {
            slots.next().map(LocalRef::local).ok_or_else(|| {
                TemplateError::runtime(format!(
                    "macro {} has no slot for all its parameters",
                    repr_str(&sig.name)
                ))
            })
        };

        let mut positional = args.into_iter();
        for name in &sig.arguments {
            let value = match positional.next() {
                Some(value) => Some(value),
                None => kwargs.take(name),
            };
            scope.set(next_slot()?, value)?;
        }

        if sig.caller && !sig.explicit_caller() {
            let caller = kwargs.take("caller").unwrap_or_else(|| {
                self.host.undefined(
                    Some("No caller defined".to_string()),
                    None,
                    Some(Value::from("caller")),
                )
            });
            scope.set(next_slot()?, Some(caller))?;
        }

        if sig.catch_kwargs {
            scope.set(next_slot()?, Some(kwargs.into_value()))?;
        } else if let Some(first) = kwargs.first_name() {
            if kwargs.contains("caller") {
                return Err(TemplateError::type_error(format!(
                    "macro {} was invoked with two values for the special caller argument. \
                     This is most likely a bug.",
                    repr_str(&sig.name)
                )));
            }
            return Err(TemplateError::type_error(format!(
                "macro {} takes no keyword argument {}",
                repr_str(&sig.name),
                repr_str(first)
            )));
        }

        let extra: Vec<Value> = positional.collect();
        if sig.catch_varargs {
            scope.set(next_slot()?, Some(Value::tuple(extra)))?;
        } else if !extra.is_empty() {
            return Err(TemplateError::type_error(format!(
                "macro {} takes not more than {} argument(s)",
                repr_str(&sig.name),
                sig.arguments.len()
            )));
        }
        Ok(())
    }

    /// Push a frame rendering one level of a block into a capture
    pub(crate) fn enter_block(&mut self, block: &BlockReference) -> Result<()> {
        let entry = block.context.block(&block.name, block.level).ok_or_else(|| {
            TemplateError::runtime(format!("block {} is not defined", repr_str(&block.name)))
        })?;
        let safe = block.context.eval_context().autoescape;
        let frame = Frame::new(
            entry.template,
            entry.chunk,
            block.context.clone(),
            Completion::Captured { safe },
        )
        .with_block(&block.name, block.level);
        self.push_frame(frame)
    }
}
