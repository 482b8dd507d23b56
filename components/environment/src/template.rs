//! Compiled templates and what rendering produces
//!
//! A [`Template`] pairs compiled code with the environment it was loaded
//! from. It renders to a string, to a blocking iterator of chunks, to an async
//! stream, or evaluates to a [`Module`] exposing its top-level exports.

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytecode_system::CompiledTemplate;
use core_types::{ErrorKind, Kwargs, Object, Result, TemplateError, Value, ValueMap};
use futures::stream::BoxStream;
use interpreter::{Context, LoadedTemplate, RenderIter, TemplateModule, VM};

use crate::environment::Environment;
use crate::loaders::UpToDate;

/// A loaded, compiled template
#[derive(Clone)]
pub struct Template {
    env: Environment,
    loaded: Arc<LoadedTemplate>,
    uptodate: Option<UpToDate>,
}

/// Turn render arguments into the variable map of the context
fn context_vars(vars: Value) -> Result<ValueMap> {
    match vars {
        Value::None => Ok(ValueMap::new()),
        Value::Map(map) => Ok(Arc::try_unwrap(map).unwrap_or_else(|map| map.as_ref().clone())),
        other => Err(TemplateError::type_error(format!(
            "template context must be a mapping, got {}",
            other.type_name()
        ))),
    }
}

impl Template {
    pub(crate) fn new(env: Environment, loaded: Arc<LoadedTemplate>, uptodate: Option<UpToDate>) -> Self {
        Self { env, loaded, uptodate }
    }

    pub(crate) fn loaded(&self) -> &Arc<LoadedTemplate> {
        &self.loaded
    }

    /// Environment the template belongs to
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Load name, None for templates built from strings
    pub fn name(&self) -> Option<&str> {
        self.loaded.name()
    }

    /// Source file, if the loader reported one
    pub fn filename(&self) -> Option<&str> {
        self.loaded.filename()
    }

    /// Template globals (environment globals plus per-template ones)
    pub fn globals(&self) -> &ValueMap {
        self.loaded.globals()
    }

    /// Compiled code
    pub fn code(&self) -> &CompiledTemplate {
        self.loaded.code()
    }

    /// Pairs of (instruction offset, template line) of the root chunk
    pub fn debug_info(&self) -> Vec<(usize, u32)> {
        self.loaded.code().debug_info()
    }

    /// False once the loader reports that the source changed
    pub fn is_up_to_date(&self) -> bool {
        self.uptodate.as_ref().map_or(true, |f| f())
    }

    /// Fresh render context over `vars`
    pub fn new_context(&self, vars: Value, shared: bool) -> Result<Arc<Context>> {
        Ok(Context::for_template(
            self.env.host(),
            &self.loaded,
            context_vars(vars)?,
            shared,
        ))
    }

    fn vm(&self, vars: Value) -> Result<VM> {
        if self.env.is_async() {
            tracing::trace!(template = ?self.name(), "rendering async template synchronously");
        }
        let context = self.new_context(vars, false)?;
        VM::render(self.env.host(), &self.loaded, context)
    }

    /// Render to a string
    ///
    /// ```
    /// use environment::Environment;
    ///
    /// let env = Environment::new();
    /// let tmpl = env.from_string("{% for x in items %}{{ x }}{% endfor %}").unwrap();
    /// let vars = core_types::Value::from_json(serde_json::json!({"items": [1, 2, 3]}));
    /// assert_eq!(tmpl.render(vars).unwrap(), "123");
    /// ```
    pub fn render(&self, vars: impl Into<Value>) -> Result<String> {
        self.vm(vars.into())?.run()
    }

    /// Render, awaiting async callables instead of blocking on them
    pub async fn render_async(&self, vars: impl Into<Value>) -> Result<String> {
        self.vm(vars.into())?.run_async().await
    }

    /// Render lazily; every item is a chunk of output
    pub fn generate(&self, vars: impl Into<Value>) -> Result<RenderIter> {
        Ok(self.vm(vars.into())?.into_chunks())
    }

    /// Async counterpart of [`Template::generate`]
    pub fn generate_async(&self, vars: impl Into<Value>) -> Result<BoxStream<'static, Result<String>>> {
        Ok(self.vm(vars.into())?.into_stream())
    }

    /// Render into a [`TemplateStream`]
    pub fn stream(&self, vars: impl Into<Value>) -> Result<TemplateStream> {
        Ok(TemplateStream::new(self.generate(vars)?))
    }

    /// Evaluate the template as a module over `vars`
    pub fn make_module(&self, vars: impl Into<Value>) -> Result<Module> {
        let context = self.new_context(vars.into(), false)?;
        let value = VM::make_module(self.env.host(), &self.loaded, context, false)?;
        Module::from_value(self.env.clone(), value)
    }

    /// Async counterpart of [`Template::make_module`]
    pub async fn make_module_async(&self, vars: impl Into<Value>) -> Result<Module> {
        let context = self.new_context(vars.into(), false)?;
        let value = VM::make_module_async(self.env.host(), &self.loaded, context, false).await?;
        Module::from_value(self.env.clone(), value)
    }

    /// The module without a context, evaluated once and cached
    pub fn module(&self) -> Result<Module> {
        let context = self.new_context(Value::None, false)?;
        let value = VM::make_module(self.env.host(), &self.loaded, context, true)?;
        Module::from_value(self.env.clone(), value)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "<Template {:?}>", name),
            None => f.write_str("<Template memory>"),
        }
    }
}

impl Object for Template {
    fn type_name(&self) -> &str {
        "Template"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name())),
            "filename" => Some(Value::from(self.filename())),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A template evaluated as a module
///
/// Exports are the top-level assignments and macros; the rendered body is
/// available through [`Module::body`] and `Display`.
#[derive(Clone)]
pub struct Module {
    env: Environment,
    value: Value,
}

impl Module {
    fn from_value(env: Environment, value: Value) -> Result<Self> {
        if value.downcast_object_ref::<TemplateModule>().is_none() {
            return Err(TemplateError::runtime(format!(
                "module evaluation produced {}",
                value.type_name()
            )));
        }
        Ok(Self { env, value })
    }

    fn inner(&self) -> &TemplateModule {
        match self.value.downcast_object_ref::<TemplateModule>() {
            Some(module) => module,
            None => unreachable!("checked in Module::from_value"),
        }
    }

    /// Name of the template the module came from
    pub fn name(&self) -> Option<&str> {
        self.inner().name()
    }

    /// Exported names and values
    pub fn exports(&self) -> &ValueMap {
        self.inner().exports()
    }

    /// One export
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner().get(name)
    }

    /// Rendered template body
    pub fn body(&self) -> &str {
        self.inner().body()
    }

    /// The module as a template value
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Call an exported macro or function
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let callee = self.get(name).ok_or_else(|| {
            TemplateError::new(
                ErrorKind::UndefinedError,
                format!("module {:?} has no attribute '{}'", self.name().unwrap_or("<memory>"), name),
            )
        })?;
        VM::call_value(self.env.host(), callee, args, kwargs)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.body())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("exports", &self.exports().len())
            .finish()
    }
}

/// Output of [`Template::stream`]
///
/// Yields chunks as the template produces them, or groups of chunks once
/// buffering is enabled.
pub struct TemplateStream {
    chunks: RenderIter,
    buffer: Option<usize>,
}

impl TemplateStream {
    fn new(chunks: RenderIter) -> Self {
        Self { chunks, buffer: None }
    }

    /// Join `size` chunks into every yielded item
    pub fn enable_buffering(&mut self, size: usize) -> Result<()> {
        if size <= 1 {
            return Err(TemplateError::new(ErrorKind::InvalidOperation, "buffer size too small"));
        }
        self.buffer = Some(size);
        Ok(())
    }

    /// Yield every chunk on its own
    pub fn disable_buffering(&mut self) {
        self.buffer = None;
    }

    /// True while buffering is enabled
    pub fn buffered(&self) -> bool {
        self.buffer.is_some()
    }

    /// Write everything that is left to `out`
    pub fn dump<W: Write>(self, out: &mut W) -> Result<()> {
        for chunk in self {
            out.write_all(chunk?.as_bytes()).map_err(|err| {
                TemplateError::runtime(format!("failed to write template output: {}", err))
            })?;
        }
        out.flush()
            .map_err(|err| TemplateError::runtime(format!("failed to write template output: {}", err)))
    }
}

impl Iterator for TemplateStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let Some(size) = self.buffer else {
            return self.chunks.next();
        };
        let mut joined = String::new();
        let mut taken = 0;
        while taken < size {
            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    joined.push_str(&chunk);
                    taken += 1;
                }
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        (taken > 0).then_some(Ok(joined))
    }
}

impl fmt::Debug for TemplateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateStream")
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// A compiled standalone expression, see [`Environment::compile_expression`]
#[derive(Clone)]
pub struct TemplateExpression {
    env: Environment,
    loaded: Arc<LoadedTemplate>,
    undefined_to_none: bool,
}

impl TemplateExpression {
    pub(crate) const RESULT: &'static str = "result";

    pub(crate) fn new(env: Environment, loaded: Arc<LoadedTemplate>, undefined_to_none: bool) -> Self {
        Self {
            env,
            loaded,
            undefined_to_none,
        }
    }

    /// Evaluate with `vars` as the context
    pub fn call(&self, vars: impl Into<Value>) -> Result<Value> {
        let context = Context::for_template(self.env.host(), &self.loaded, context_vars(vars.into())?, false);
        let module = VM::make_module(self.env.host(), &self.loaded, context, false)?;
        let result = module
            .downcast_object_ref::<TemplateModule>()
            .and_then(|m| m.get(Self::RESULT))
            .unwrap_or(Value::None);
        if self.undefined_to_none && result.is_undefined() {
            return Ok(Value::None);
        }
        Ok(result)
    }
}

impl fmt::Debug for TemplateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateExpression")
            .field("undefined_to_none", &self.undefined_to_none)
            .finish()
    }
}
