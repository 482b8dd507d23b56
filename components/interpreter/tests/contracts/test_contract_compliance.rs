//! Contract compliance tests for interpreter
//! The environment crate builds on these entry points; their shapes must not drift.

use std::sync::Arc;

use bytecode_system::{CompiledTemplate, Instruction, Opcode};
use core_types::{
    ops, ContextAccess, EnvironmentAccess, EvalContext, Function, Kwargs, Object, Result,
    TemplateError, Undefined, UndefinedBehavior, Value, ValueMap,
};
use interpreter::{Context, LoadedTemplate, RenderHost, Suspend, TemplateModule, VM};

struct EmptyHost;

impl EnvironmentAccess for EmptyHost {
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
        Ok(ops::get_attr(obj, attr)?.unwrap_or_else(|| self.undefined(None, Some(obj.clone()), Some(Value::from(attr)))))
    }

    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        Ok(ops::get_item(obj, key)?.unwrap_or_else(|| self.undefined(None, Some(obj.clone()), Some(key.clone()))))
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

impl RenderHost for EmptyHost {
    fn as_environment(&self) -> &dyn EnvironmentAccess {
        self
    }

    fn get_template(&self, name: &Value, _parent: Option<&str>) -> Result<Arc<LoadedTemplate>> {
        Err(TemplateError::not_found(name.as_str().unwrap_or("?")))
    }

    fn filter(&self, _name: &str) -> Option<Arc<Function>> {
        None
    }

    fn test(&self, _name: &str) -> Option<Arc<Function>> {
        None
    }
}

fn hand_built(text: &str) -> Arc<LoadedTemplate> {
    let mut module = CompiledTemplate::new(Some("hand"), None);
    let root = &mut module.chunks[0];
    let idx = root.add_constant(bytecode_system::Constant::from_value(&Value::from(text)).unwrap());
    root.instructions.push(Instruction::at_line(Opcode::EmitRaw(idx), 1));
    root.instructions.push(Instruction::at_line(Opcode::Return, 1));
    Arc::new(LoadedTemplate::new(Arc::new(module), Arc::new(ValueMap::new())))
}

#[test]
fn test_contract_render_hand_built_template() {
    let host: Arc<dyn RenderHost> = Arc::new(EmptyHost);
    let template = hand_built("hi");
    let context = Context::for_template(host.clone(), &template, ValueMap::new(), false);
    let mut vm = VM::render(host, &template, context).unwrap();
    assert!(matches!(vm.resume().unwrap(), Suspend::Chunk(ref s) if s == "hi"));
    assert!(matches!(vm.resume().unwrap(), Suspend::Done));
}

#[test]
fn test_contract_render_host_defaults() {
    let host = EmptyHost;
    assert!(!host.autoescape(Some("x.html")));
    assert!(host.finalize().is_none());
    assert!(host.extension_attribute("ext", "name").is_none());
    assert!(host.is_safe_callable(&Value::from(1)));
}

#[test]
fn test_contract_context_resolution() {
    let host: Arc<dyn RenderHost> = Arc::new(EmptyHost);
    let template = hand_built("");
    let mut vars = ValueMap::new();
    vars.insert(Value::from("a"), Value::from(1));
    let context = Context::for_template(host, &template, vars, false);
    context.set_var("b", Value::from(2));
    assert_eq!(context.resolve("a"), Value::from(1));
    assert_eq!(context.resolve_or_missing("b"), Some(Value::from(2)));
    assert!(context.resolve("c").is_undefined());
    assert_eq!(context.get_all().len(), 2);
    assert_eq!(context.template_name().as_deref(), Some("hand"));
}

#[test]
fn test_contract_idle_vm_is_done() {
    let mut vm = VM::new(Arc::new(EmptyHost));
    assert!(matches!(vm.resume().unwrap(), Suspend::Done));
    assert_eq!(vm.depth(), 0);
    assert!(vm.take_value().is_none());
}

#[test]
fn test_contract_call_value_with_host_function() {
    let double = Function::new("double", |args: &[Value], _: &Kwargs| {
        Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
    });
    let result = VM::call_value(
        Arc::new(EmptyHost),
        Value::from(double),
        vec![Value::from(21)],
        Kwargs::new(),
    )
    .unwrap();
    assert_eq!(result, Value::from(42));
}

#[test]
fn test_contract_template_module_object() {
    let module = TemplateModule::new(Some("m"), ValueMap::new(), "text".to_string());
    assert_eq!(module.type_name(), "TemplateModule");
    assert_eq!(module.body(), "text");
    assert!(module.is_safe());
}
