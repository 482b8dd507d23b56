//! Minimal environment and context for exercising the builtin catalogs

use std::sync::Arc;

use builtins::{default_filters, default_tests, FunctionMap};
use core_types::{
    ops, CallSite, ContextAccess, EnvironmentAccess, EvalContext, Kwargs, Result, TemplateError,
    Undefined, UndefinedBehavior, Value, ValueMap,
};

pub struct CatalogEnv {
    filters: FunctionMap,
    tests: FunctionMap,
    policies: ValueMap,
    max_range: Option<usize>,
}

impl CatalogEnv {
    pub fn new() -> Self {
        Self {
            filters: default_filters(),
            tests: default_tests(),
            policies: ValueMap::new(),
            max_range: None,
        }
    }

    pub fn with_policy(mut self, key: &str, value: Value) -> Self {
        self.policies.insert(Value::from(key), value);
        self
    }

    pub fn sandboxed(mut self, limit: usize) -> Self {
        self.max_range = Some(limit);
        self
    }
}

impl EnvironmentAccess for CatalogEnv {
    fn undefined(&self, hint: Option<String>, obj: Option<Value>, name: Option<Value>) -> Value {
        Value::Undefined(Arc::new(Undefined {
            behavior: UndefinedBehavior::Default,
            hint,
            obj,
            name,
            exc: core_types::ErrorKind::UndefinedError,
        }))
    }

    fn undefined_behavior(&self) -> UndefinedBehavior {
        UndefinedBehavior::Default
    }

    fn getattr(&self, obj: &Value, attr: &str) -> Result<Value> {
        Ok(match ops::get_attr(obj, attr)? {
            Some(value) => value,
            None => self.undefined(None, Some(obj.clone()), Some(Value::from(attr))),
        })
    }

    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        if let Some(value) = ops::get_item(obj, key)? {
            return Ok(value);
        }
        match key.as_str() {
            Some(attr) => self.getattr(obj, attr),
            None => Ok(self.undefined(None, Some(obj.clone()), Some(key.clone()))),
        }
    }

    fn call_filter(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<Value> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| TemplateError::runtime(format!("No filter named '{}'.", name)))?;
        let site = CallSite { context, eval_ctx, env: self };
        filter.invoke_sync(&site, args, kwargs)
    }

    fn call_test(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<bool> {
        let test = self
            .tests
            .get(name)
            .ok_or_else(|| TemplateError::runtime(format!("No test named '{}'.", name)))?;
        let site = CallSite { context, eval_ctx, env: self };
        ops::is_true(&test.invoke_sync(&site, args, kwargs)?)
    }

    fn filter_names(&self) -> Vec<String> {
        self.filters.keys().cloned().collect()
    }

    fn test_names(&self) -> Vec<String> {
        self.tests.keys().cloned().collect()
    }

    fn is_async(&self) -> bool {
        false
    }

    fn max_range(&self) -> Option<usize> {
        self.max_range
    }

    fn policy(&self, key: &str) -> Option<Value> {
        self.policies.get(&Value::from(key)).cloned()
    }
}

pub struct StubContext<'a> {
    env: &'a CatalogEnv,
    eval_ctx: EvalContext,
}

impl ContextAccess for StubContext<'_> {
    fn resolve(&self, name: &str) -> Value {
        Value::undefined_named(name)
    }

    fn resolve_or_missing(&self, _name: &str) -> Option<Value> {
        None
    }

    fn get_all(&self) -> ValueMap {
        ValueMap::new()
    }

    fn template_name(&self) -> Option<String> {
        None
    }

    fn eval_context(&self) -> EvalContext {
        self.eval_ctx
    }

    fn environment(&self) -> &dyn EnvironmentAccess {
        self.env
    }
}

/// Apply a filter with an autoescape setting
pub fn apply_escaped(
    env: &CatalogEnv,
    autoescape: bool,
    name: &str,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value> {
    let ctx = StubContext { env, eval_ctx: EvalContext::new(autoescape) };
    env.call_filter(name, args, kwargs, &ctx.eval_ctx, Some(&ctx))
}

/// Apply a filter without autoescaping
pub fn apply(name: &str, args: &[Value]) -> Result<Value> {
    apply_escaped(&CatalogEnv::new(), false, name, args, &Kwargs::new())
}

/// Apply a filter with keyword arguments
pub fn apply_kw(name: &str, args: &[Value], kwargs: &[(&str, Value)]) -> Result<Value> {
    let kwargs: Kwargs = kwargs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    apply_escaped(&CatalogEnv::new(), false, name, args, &kwargs)
}

/// Run a test
pub fn check(name: &str, args: &[Value]) -> Result<bool> {
    let env = CatalogEnv::new();
    let ctx = StubContext { env: &env, eval_ctx: EvalContext::default() };
    env.call_test(name, args, &Kwargs::new(), &ctx.eval_ctx, Some(&ctx))
}

pub fn json(value: serde_json::Value) -> Value {
    Value::from_json(value)
}

pub fn s(v: &str) -> Value {
    Value::from(v)
}
