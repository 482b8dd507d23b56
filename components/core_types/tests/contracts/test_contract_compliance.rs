//! Contract compliance tests for core_types
//!
//! These tests pin the public surface the other template crates build on.

use futures::FutureExt;

use core_types::{
    CallSite, ContextAccess, EnvironmentAccess, ErrorKind, EvalContext, Function, Kwargs,
    Object, PassArg, Result, TemplateError, UndefinedBehavior, Value, ValueMap,
};

#[derive(Debug)]
struct Counter;

impl Object for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        (name == "count").then(|| Value::from(3))
    }

    fn len(&self) -> Option<usize> {
        Some(3)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct NullEnv;

impl EnvironmentAccess for NullEnv {
    fn undefined(&self, _hint: Option<String>, _obj: Option<Value>, _name: Option<Value>) -> Value {
        Value::undefined_named("x")
    }
    fn undefined_behavior(&self) -> UndefinedBehavior {
        UndefinedBehavior::Default
    }
    fn getattr(&self, obj: &Value, attr: &str) -> Result<Value> {
        Ok(core_types::ops::get_attr(obj, attr)?.unwrap_or(Value::None))
    }
    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        Ok(core_types::ops::get_item(obj, key)?.unwrap_or(Value::None))
    }
    fn call_filter(
        &self,
        name: &str,
        _args: &[Value],
        _kwargs: &Kwargs,
        _eval_ctx: &EvalContext,
        _context: Option<&dyn ContextAccess>,
    ) -> Result<Value> {
        Err(TemplateError::runtime(format!("No filter named '{}' found.", name)))
    }
    fn call_test(
        &self,
        name: &str,
        _args: &[Value],
        _kwargs: &Kwargs,
        _eval_ctx: &EvalContext,
        _context: Option<&dyn ContextAccess>,
    ) -> Result<bool> {
        Err(TemplateError::runtime(format!("No test named '{}' found.", name)))
    }
    fn filter_names(&self) -> Vec<String> {
        Vec::new()
    }
    fn test_names(&self) -> Vec<String> {
        Vec::new()
    }
    fn is_async(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod object_contract_tests {
    use super::*;

    #[test]
    fn test_objects_are_values() {
        let v = Value::from_object(Counter);
        assert_eq!(core_types::ops::len(&v).unwrap(), 3);
        assert_eq!(core_types::ops::get_attr(&v, "count").unwrap(), Some(Value::from(3)));
        assert_eq!(core_types::ops::get_attr(&v, "nope").unwrap(), None);
        assert_eq!(v.type_name(), "Counter");
    }
}

#[cfg(test)]
mod function_contract_tests {
    use super::*;

    #[test]
    fn test_environment_function_receives_environment() {
        let f = Function::with_environment("behavior", |env, _, _| {
            Ok(Value::from(env.undefined_behavior() == UndefinedBehavior::Default))
        });
        assert_eq!(f.pass_arg(), PassArg::Environment);
        let eval_ctx = EvalContext::new(false);
        let site = CallSite {
            context: None,
            eval_ctx: &eval_ctx,
            env: &NullEnv,
        };
        assert_eq!(f.invoke_sync(&site, &[], &Kwargs::new()).unwrap(), Value::from(true));
    }

    #[test]
    fn test_async_function_refused_in_sync_environment() {
        let f = Function::new_async("later", |_, _| async { Ok(Value::None) }.boxed());
        let eval_ctx = EvalContext::new(false);
        let site = CallSite {
            context: None,
            eval_ctx: &eval_ctx,
            env: &NullEnv,
        };
        let err = f.invoke(&site, &[], &Kwargs::new()).err().unwrap();
        assert_eq!(err.kind, ErrorKind::TemplateRuntimeError);
    }

    #[test]
    fn test_context_function_without_context_fails() {
        let f = Function::with_context("ctx", |ctx, _, _| Ok(ctx.resolve("x")));
        let eval_ctx = EvalContext::default();
        let site = CallSite {
            context: None,
            eval_ctx: &eval_ctx,
            env: &NullEnv,
        };
        assert!(f.invoke_sync(&site, &[], &Kwargs::new()).is_err());
    }

    #[test]
    fn test_kwargs_into_value_is_dict() {
        let mut kw = Kwargs::new();
        kw.insert("a", Value::from(1));
        let v = kw.into_value();
        assert_eq!(v.as_map().map(ValueMap::len), Some(1));
    }
}
