//! In-memory host used by the interpreter tests

use std::collections::HashMap;
use std::sync::Arc;

use core_types::{
    ops, CallSite, ContextAccess, EnvironmentAccess, EvalContext, Function, Kwargs, Result,
    TemplateError, Undefined, UndefinedBehavior, Value, ValueMap,
};
use futures::FutureExt;
use interpreter::{Context, LoadedTemplate, RenderHost, VM};
use parking_lot::Mutex;
use parser::{generate, parse, CompileEnvironment, Lexer, LexerConfig};

pub struct TestHost {
    sources: HashMap<String, String>,
    filters: HashMap<String, Arc<Function>>,
    tests: HashMap<String, Arc<Function>>,
    loaded: Mutex<HashMap<String, Arc<LoadedTemplate>>>,
    autoescape: bool,
    asynchronous: bool,
    behavior: UndefinedBehavior,
}

impl TestHost {
    pub fn new() -> Self {
        let mut filters = HashMap::new();
        filters.insert(
            "upper".to_string(),
            Arc::new(Function::new("upper", |args: &[Value], _: &Kwargs| {
                Ok(Value::from(ops::to_string(&args[0])?.to_uppercase()))
            })),
        );
        filters.insert(
            "slow_upper".to_string(),
            Arc::new(Function::new_async("slow_upper", |args: Vec<Value>, _: Kwargs| {
                let result = ops::to_string(&args[0]).map(|s| Value::from(s.to_uppercase()));
                async move { result }.boxed()
            })),
        );
        let mut tests = HashMap::new();
        tests.insert(
            "odd".to_string(),
            Arc::new(Function::new("odd", |args: &[Value], _: &Kwargs| {
                Ok(Value::from(args[0].as_i64().is_some_and(|n| n % 2 == 1)))
            })),
        );
        Self {
            sources: HashMap::new(),
            filters,
            tests,
            loaded: Mutex::new(HashMap::new()),
            autoescape: false,
            asynchronous: false,
            behavior: UndefinedBehavior::Default,
        }
    }

    pub fn with_template(mut self, name: &str, source: &str) -> Self {
        self.sources.insert(name.to_string(), source.to_string());
        self
    }

    pub fn autoescaping(mut self) -> Self {
        self.autoescape = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.behavior = UndefinedBehavior::Strict;
        self
    }

    pub fn build(self) -> Arc<TestHost> {
        Arc::new(self)
    }

    pub fn load(&self, name: &str) -> Result<Arc<LoadedTemplate>> {
        if let Some(template) = self.loaded.lock().get(name) {
            return Ok(template.clone());
        }
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::not_found(name))?;
        let lexer = Lexer::new(LexerConfig::default())?;
        let ast = parse(&lexer, source, Some(name), None)?;
        let code = generate(&ast, self, Some(name), None, EvalContext::new(self.autoescape))?;
        let template = Arc::new(LoadedTemplate::new(Arc::new(code), Arc::new(ValueMap::new())));
        self.loaded.lock().insert(name.to_string(), template.clone());
        Ok(template)
    }
}

pub fn start(host: &Arc<TestHost>, name: &str, vars: ValueMap) -> Result<VM> {
    let template = host.load(name)?;
    let render_host: Arc<dyn RenderHost> = host.clone();
    let context = Context::for_template(render_host.clone(), &template, vars, false);
    VM::render(render_host, &template, context)
}

pub fn render(host: &Arc<TestHost>, name: &str, vars: ValueMap) -> Result<String> {
    start(host, name, vars)?.run()
}

pub fn render_source(source: &str, vars: ValueMap) -> Result<String> {
    let host = TestHost::new().with_template("page", source).build();
    render(&host, "page", vars)
}

pub fn vars(json: serde_json::Value) -> ValueMap {
    match Value::from_json(json) {
        Value::Map(map) => map.as_ref().clone(),
        _ => ValueMap::new(),
    }
}

impl CompileEnvironment for TestHost {
    fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    fn has_test(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    fn is_async(&self) -> bool {
        self.asynchronous
    }
}

impl EnvironmentAccess for TestHost {
    fn undefined(&self, hint: Option<String>, obj: Option<Value>, name: Option<Value>) -> Value {
        Value::Undefined(Arc::new(Undefined {
            behavior: self.behavior,
            hint,
            obj,
            name,
            exc: core_types::ErrorKind::UndefinedError,
        }))
    }

    fn undefined_behavior(&self) -> UndefinedBehavior {
        self.behavior
    }

    fn getattr(&self, obj: &Value, attr: &str) -> Result<Value> {
        Ok(match ops::get_attr(obj, attr)? {
            Some(value) => value,
            None => self.undefined(None, Some(obj.clone()), Some(Value::from(attr))),
        })
    }

    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        Ok(match ops::get_item(obj, key)? {
            Some(value) => value,
            None => self.undefined(None, Some(obj.clone()), Some(key.clone())),
        })
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
            .ok_or_else(|| TemplateError::runtime(format!("No filter named '{}' found.", name)))?;
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
            .ok_or_else(|| TemplateError::runtime(format!("No test named '{}' found.", name)))?;
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
        self.asynchronous
    }
}

impl RenderHost for TestHost {
    fn as_environment(&self) -> &dyn EnvironmentAccess {
        self
    }

    fn get_template(&self, name: &Value, _parent: Option<&str>) -> Result<Arc<LoadedTemplate>> {
        let name = name
            .as_str()
            .ok_or_else(|| TemplateError::type_error("template name must be a string"))?;
        self.load(name)
    }

    fn filter(&self, name: &str) -> Option<Arc<Function>> {
        self.filters.get(name).cloned()
    }

    fn test(&self, name: &str) -> Option<Arc<Function>> {
        self.tests.get(name).cloned()
    }

    fn autoescape(&self, _template: Option<&str>) -> bool {
        self.autoescape
    }
}
