//! Argument binding for builtin callables
//!
//! Builtins receive their arguments as a positional slice plus keyword
//! arguments. [`ArgParser`] binds them to named parameters in declaration
//! order, the same way a Python signature would, and reports leftovers.

use core_types::{Kwargs, Result, TemplateError, Value};

/// Sequential binder over the arguments of one call
#[derive(Debug)]
pub struct ArgParser<'a> {
    function: &'a str,
    args: &'a [Value],
    kwargs: Kwargs,
    pos: usize,
}

impl<'a> ArgParser<'a> {
    /// Start binding the arguments of `function`
    pub fn new(function: &'a str, args: &'a [Value], kwargs: &Kwargs) -> Self {
        Self {
            function,
            args,
            kwargs: kwargs.clone(),
            pos: 0,
        }
    }

    /// Bind the next parameter, positionally or by keyword
    pub fn next(&mut self, param: &str) -> Result<Option<Value>> {
        if let Some(value) = self.args.get(self.pos) {
            self.pos += 1;
            if self.kwargs.contains(param) {
                return Err(TemplateError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    self.function, param
                )));
            }
            return Ok(Some(value.clone()));
        }
        Ok(self.kwargs.take(param))
    }

    /// Bind a parameter that must be present
    pub fn required(&mut self, param: &str) -> Result<Value> {
        self.next(param)?.ok_or_else(|| {
            TemplateError::type_error(format!(
                "{}() missing required argument '{}'",
                self.function, param
            ))
        })
    }

    /// Bind an optional string parameter; none counts as missing
    pub fn string(&mut self, param: &str) -> Result<Option<String>> {
        match self.next(param)? {
            None | Some(Value::None) => Ok(None),
            Some(Value::String(s)) | Some(Value::Markup(s)) => Ok(Some(s.to_string())),
            Some(Value::Undefined(u)) => Err(u.error()),
            Some(other) => Ok(Some(other.to_string())),
        }
    }

    /// Bind an optional integer parameter; none counts as missing
    pub fn int(&mut self, param: &str) -> Result<Option<i64>> {
        match self.next(param)? {
            None | Some(Value::None) => Ok(None),
            Some(Value::Undefined(u)) => Err(u.error()),
            Some(other) => other.as_i64().map(Some).ok_or_else(|| {
                TemplateError::type_error(format!(
                    "{}() argument '{}' must be an integer, not {}",
                    self.function,
                    param,
                    other.type_name()
                ))
            }),
        }
    }

    /// Bind a boolean flag by truthiness
    pub fn flag(&mut self, param: &str, default: bool) -> Result<bool> {
        match self.next(param)? {
            None => Ok(default),
            Some(value) => core_types::ops::is_true(&value),
        }
    }

    /// All positional arguments not bound yet
    pub fn rest(&mut self) -> Vec<Value> {
        let rest = self.args[self.pos.min(self.args.len())..].to_vec();
        self.pos = self.args.len();
        rest
    }

    /// All keyword arguments not bound yet
    pub fn take_kwargs(&mut self) -> Kwargs {
        std::mem::take(&mut self.kwargs)
    }

    /// Fail on unbound positional or keyword arguments
    pub fn finish(self) -> Result<()> {
        if self.pos < self.args.len() {
            return Err(TemplateError::type_error(format!(
                "{}() takes at most {} argument(s) ({} given)",
                self.function,
                self.pos,
                self.args.len()
            )));
        }
        self.kwargs.check_allowed(self.function, &[])
    }
}
