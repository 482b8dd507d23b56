//! The environment: configuration, compilation pipeline and template cache
//!
//! An [`Environment`] is built once through an [`EnvironmentBuilder`] and then
//! shared by every render. It owns the lexer, the filter, test and global
//! tables, the loader, the optional bytecode cache and sandbox policy, and an
//! LRU cache of compiled templates.
//!
//! # Compilation pipeline
//!
//! 1. Extension `preprocess` hooks rewrite the source
//! 2. The lexer tokenizes it and extension `filter_stream` hooks run
//! 3. The parser builds the AST, handing extension tags to their extension
//! 4. The optimizer folds constants (unless disabled)
//! 5. The code generator emits a [`CompiledTemplate`], which gets a peephole
//!    pass (unless disabled)

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use builtins::FunctionMap;
use bytecode_system::CompiledTemplate;
use core_types::{
    ops, BinOp, CallSite, ContextAccess, EnvironmentAccess, ErrorKind, EvalContext, Function,
    Kwargs, PassArg, Result, TemplateError, UnaryOp, Undefined, UndefinedBehavior, Value,
    ValueMap,
};
use indexmap::IndexMap;
use interpreter::{LoadedTemplate, RenderHost};
use parser::{
    generate, optimize, CompileEnvironment, Expr, Extension, Lexer, LexerConfig, NameCtx,
    Parser, StartState, Stmt, Token, TokenStream,
};

use crate::bytecode_cache::BytecodeCache;
use crate::cache::SharedLruCache;
use crate::config::{Autoescape, CacheSize, NewlineSequence};
use crate::loaders::{Loader, TemplateSource, UpToDate};
use crate::sandbox::{unsafe_undefined, DefaultSandbox, SandboxPolicy};
use crate::template::{Template, TemplateExpression};

/// Rewrites a template name relative to the template that loads it
pub type JoinPath = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Settings an [`Environment`] is built from
///
/// # Example
///
/// ```
/// use environment::{Autoescape, Environment};
///
/// let env = Environment::builder()
///     .variable_delimiters("${", "}")
///     .autoescape(Autoescape::Enabled)
///     .trim_blocks(true)
///     .build()
///     .unwrap();
/// let tmpl = env.from_string("${ '<b>' }").unwrap();
/// assert_eq!(tmpl.render(()).unwrap(), "&lt;b&gt;");
/// ```
#[derive(Clone)]
pub struct EnvironmentBuilder {
    lexer: LexerConfig,
    newline_sequence: NewlineSequence,
    autoescape: Autoescape,
    undefined: UndefinedBehavior,
    finalize: Option<Arc<Function>>,
    cache_size: CacheSize,
    auto_reload: bool,
    bytecode_cache: Option<Arc<dyn BytecodeCache>>,
    loader: Option<Arc<dyn Loader>>,
    enable_async: bool,
    optimized: bool,
    extensions: Vec<Arc<dyn Extension>>,
    filters: FunctionMap,
    tests: FunctionMap,
    globals: ValueMap,
    sandbox: Option<Arc<dyn SandboxPolicy>>,
    policies: IndexMap<String, Value>,
    join_path: Option<JoinPath>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        let mut policies = IndexMap::new();
        policies.insert("truncate.leeway".to_string(), Value::from(5));
        policies.insert("urlize.rel".to_string(), Value::from("noopener"));
        policies.insert("urlize.target".to_string(), Value::None);
        policies.insert("json.indent".to_string(), Value::None);
        Self {
            lexer: LexerConfig::default(),
            newline_sequence: NewlineSequence::Lf,
            autoescape: Autoescape::Disabled,
            undefined: UndefinedBehavior::Default,
            finalize: None,
            cache_size: CacheSize::default(),
            auto_reload: true,
            bytecode_cache: None,
            loader: None,
            enable_async: false,
            optimized: true,
            extensions: Vec::new(),
            filters: builtins::default_filters(),
            tests: builtins::default_tests(),
            globals: builtins::default_globals(),
            sandbox: None,
            policies,
            join_path: None,
        }
    }
}

impl EnvironmentBuilder {
    /// Builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// `{%` and `%}` replacements
    pub fn block_delimiters(mut self, start: &str, end: &str) -> Self {
        self.lexer.block_start = start.to_string();
        self.lexer.block_end = end.to_string();
        self
    }

    /// `{{` and `}}` replacements
    pub fn variable_delimiters(mut self, start: &str, end: &str) -> Self {
        self.lexer.variable_start = start.to_string();
        self.lexer.variable_end = end.to_string();
        self
    }

    /// `{#` and `#}` replacements
    pub fn comment_delimiters(mut self, start: &str, end: &str) -> Self {
        self.lexer.comment_start = start.to_string();
        self.lexer.comment_end = end.to_string();
        self
    }

    /// Prefix that turns a whole line into a statement
    pub fn line_statement_prefix(mut self, prefix: Option<&str>) -> Self {
        self.lexer.line_statement_prefix = prefix.map(str::to_string);
        self
    }

    /// Prefix that starts a comment running to the end of the line
    pub fn line_comment_prefix(mut self, prefix: Option<&str>) -> Self {
        self.lexer.line_comment_prefix = prefix.map(str::to_string);
        self
    }

    /// Drop the first newline after a block tag
    pub fn trim_blocks(mut self, enabled: bool) -> Self {
        self.lexer.trim_blocks = enabled;
        self
    }

    /// Strip leading whitespace on a line up to a block tag
    pub fn lstrip_blocks(mut self, enabled: bool) -> Self {
        self.lexer.lstrip_blocks = enabled;
        self
    }

    /// Line ending used for newlines in template data
    pub fn newline_sequence(mut self, newline: NewlineSequence) -> Self {
        self.newline_sequence = newline;
        self
    }

    /// Keep one trailing newline of the source
    pub fn keep_trailing_newline(mut self, enabled: bool) -> Self {
        self.lexer.keep_trailing_newline = enabled;
        self
    }

    /// Autoescape setting
    pub fn autoescape(mut self, autoescape: impl Into<Autoescape>) -> Self {
        self.autoescape = autoescape.into();
        self
    }

    /// Behavior of undefined values
    pub fn undefined(mut self, behavior: UndefinedBehavior) -> Self {
        self.undefined = behavior;
        self
    }

    /// Callable applied to every printed expression before escaping
    pub fn finalize(mut self, finalize: Function) -> Self {
        self.finalize = Some(Arc::new(finalize));
        self
    }

    /// Size of the compiled template cache
    pub fn cache_size(mut self, size: CacheSize) -> Self {
        self.cache_size = size;
        self
    }

    /// Recompile cached templates whose source changed
    pub fn auto_reload(mut self, enabled: bool) -> Self {
        self.auto_reload = enabled;
        self
    }

    /// Persistent cache for compiled templates
    pub fn bytecode_cache(mut self, cache: Arc<dyn BytecodeCache>) -> Self {
        self.bytecode_cache = Some(cache);
        self
    }

    /// Where named templates come from
    pub fn loader<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Like [`EnvironmentBuilder::loader`] for a loader that is shared elsewhere
    pub fn shared_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Compile templates for async rendering
    pub fn enable_async(mut self, enabled: bool) -> Self {
        self.enable_async = enabled;
        self
    }

    /// Run the optimizer and the peephole pass
    pub fn optimized(mut self, enabled: bool) -> Self {
        self.optimized = enabled;
        self
    }

    /// Register a syntax extension. A later extension with the same
    /// identifier replaces an earlier one.
    pub fn extension<E: Extension + 'static>(mut self, extension: E) -> Self {
        self.extensions
            .retain(|e| e.identifier() != extension.identifier());
        self.extensions.push(Arc::new(extension));
        self
    }

    /// Register a filter under `name`
    pub fn filter(mut self, name: &str, filter: Function) -> Self {
        self.filters.insert(name.to_string(), Arc::new(filter));
        self
    }

    /// Register a test under `name`
    pub fn test(mut self, name: &str, test: Function) -> Self {
        self.tests.insert(name.to_string(), Arc::new(test));
        self
    }

    /// Add a global variable
    pub fn global(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.globals.insert(Value::from(name), value.into());
        self
    }

    /// Render under a sandbox policy
    pub fn sandbox<S: SandboxPolicy + 'static>(mut self, policy: S) -> Self {
        self.sandbox = Some(Arc::new(policy));
        self
    }

    /// Render under [`DefaultSandbox`]
    pub fn sandboxed(self) -> Self {
        self.sandbox(DefaultSandbox::new())
    }

    /// Set a policy value read by builtins (`truncate.leeway`,
    /// `urlize.rel`, `urlize.target`, `urlize.extra_schemes`, `json.indent`)
    pub fn policy(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.policies.insert(key.to_string(), value.into());
        self
    }

    /// How `extends`, `include` and `import` names are resolved against the
    /// loading template
    pub fn join_path<F>(mut self, join: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.join_path = Some(Arc::new(join));
        self
    }

    fn validate(&self) -> Result<()> {
        let starts = [
            &self.lexer.block_start,
            &self.lexer.variable_start,
            &self.lexer.comment_start,
        ];
        let distinct = starts[0] != starts[1] && starts[1] != starts[2] && starts[0] != starts[2];
        if !distinct || starts.iter().any(|s| s.is_empty()) {
            return Err(TemplateError::new(
                ErrorKind::InvalidOperation,
                "block, variable and comment start strings must be different.",
            ));
        }
        Ok(())
    }

    /// Validate the configuration and create the environment
    pub fn build(mut self) -> Result<Environment> {
        self.validate()?;
        self.lexer.newline_sequence = self.newline_sequence.as_str().to_string();
        self.policies.insert(
            "newline_sequence".to_string(),
            Value::from(self.newline_sequence.as_str()),
        );
        self.extensions.sort_by_key(|e| e.priority());
        let env = Environment::from_config(self);
        env.shared.lexer()?;
        Ok(env)
    }
}

impl fmt::Debug for EnvironmentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentBuilder")
            .field("lexer", &self.lexer)
            .field("autoescape", &self.autoescape)
            .field("undefined", &self.undefined)
            .field("cache_size", &self.cache_size)
            .field("enable_async", &self.enable_async)
            .field("sandboxed", &self.sandbox.is_some())
            .finish()
    }
}

#[derive(Clone)]
struct CacheEntry {
    loaded: Arc<LoadedTemplate>,
    uptodate: Option<UpToDate>,
}

/// Environment state shared by every handle and every render
pub(crate) struct Shared {
    config: EnvironmentBuilder,
    lexer: OnceLock<std::result::Result<Lexer, TemplateError>>,
    cache: SharedLruCache<String, CacheEntry>,
    globals: Arc<ValueMap>,
    me: Weak<Shared>,
}

/// Handle to a shared template environment
///
/// Cloning is cheap; all clones see the same cache and configuration.
///
/// # Example
///
/// ```
/// use environment::{DictLoader, Environment};
///
/// let env = Environment::builder()
///     .loader(DictLoader::new([
///         ("base.html", "<h1>{% block title %}{% endblock %}</h1>"),
///         ("page.html", "{% extends 'base.html' %}{% block title %}Hi {{ name }}{% endblock %}"),
///     ]))
///     .build()
///     .unwrap();
///
/// let tmpl = env.get_template("page.html").unwrap();
/// let ctx = serde_json::json!({"name": "Ann"});
/// assert_eq!(tmpl.render(core_types::Value::from_json(ctx)).unwrap(), "<h1>Hi Ann</h1>");
/// ```
#[derive(Clone)]
pub struct Environment {
    pub(crate) shared: Arc<Shared>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.shared.config)
            .field("cached", &self.shared.cache.len())
            .finish()
    }
}

impl Environment {
    /// Environment with the default configuration
    pub fn new() -> Self {
        Self::from_config(EnvironmentBuilder::default())
    }

    /// Start configuring a new environment
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    fn from_config(config: EnvironmentBuilder) -> Self {
        let globals = Arc::new(config.globals.clone());
        let cache = SharedLruCache::new(config.cache_size.capacity());
        let shared = Arc::new_cyclic(|me| Shared {
            config,
            lexer: OnceLock::new(),
            cache,
            globals,
            me: me.clone(),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Builder preloaded with this environment's configuration. The
    /// environment built from it has its own template cache.
    pub fn overlay(&self) -> EnvironmentBuilder {
        self.shared.config.clone()
    }

    pub(crate) fn host(&self) -> Arc<dyn RenderHost> {
        self.shared.clone()
    }

    /// True if templates are compiled for async rendering
    pub fn is_async(&self) -> bool {
        self.shared.config.enable_async
    }

    /// True if a sandbox policy is installed
    pub fn is_sandboxed(&self) -> bool {
        self.shared.config.sandbox.is_some()
    }

    /// Undefined policy
    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.shared.config.undefined
    }

    /// Initial autoescape state for a template name
    pub fn autoescape_for(&self, name: Option<&str>) -> bool {
        self.shared.config.autoescape.for_template(name)
    }

    /// Lexer settings
    pub fn lexer_config(&self) -> Result<&LexerConfig> {
        Ok(self.shared.lexer()?.config())
    }

    /// Registered filters
    pub fn filters(&self) -> &FunctionMap {
        &self.shared.config.filters
    }

    /// Registered tests
    pub fn tests(&self) -> &FunctionMap {
        &self.shared.config.tests
    }

    /// Environment globals
    pub fn globals(&self) -> &ValueMap {
        &self.shared.globals
    }

    /// Registered extensions, in priority order
    pub fn extensions(&self) -> &[Arc<dyn Extension>] {
        &self.shared.config.extensions
    }

    /// Policy value by key
    pub fn policy(&self, key: &str) -> Option<&Value> {
        self.shared.config.policies.get(key)
    }

    /// Names currently in the template cache, least recently used first
    pub fn cached_templates(&self) -> Vec<String> {
        self.shared.cache.keys()
    }

    /// Forget all compiled templates
    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    /// Resolve `name` relative to the template `parent`. Without a custom
    /// join function the name is returned unchanged.
    pub fn join_path(&self, name: &str, parent: &str) -> String {
        self.shared.join_path(name, parent)
    }

    /// Run the `preprocess` hook of every extension
    pub fn preprocess(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> String {
        self.shared.preprocess(source, name, filename)
    }

    /// Raw tokens of a template, including whitespace and comments
    pub fn lex(&self, source: &str, name: Option<&str>) -> Result<Vec<Token>> {
        let source = self.preprocess(source, name, None);
        self.shared.lexer()?.tokeniter(&source, name)
    }

    /// Parse a template into its AST
    pub fn parse(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<parser::Template> {
        self.shared.parse(source, name, filename)
    }

    /// Compile a template source into a module
    pub fn compile(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<CompiledTemplate> {
        self.shared.compile(source, name, filename)
    }

    /// Compile a template that is not loaded by name
    pub fn from_string(&self, source: &str) -> Result<Template> {
        self.from_string_with_globals(source, ValueMap::new())
    }

    /// Like [`Environment::from_string`] with extra template globals
    pub fn from_string_with_globals(&self, source: &str, globals: ValueMap) -> Result<Template> {
        let code = self.shared.compile(source, None, None)?;
        let loaded = LoadedTemplate::new(Arc::new(code), self.shared.make_globals(globals));
        Ok(Template::new(self.clone(), Arc::new(loaded), None))
    }

    /// Load a template through the loader and cache
    pub fn get_template(&self, name: &str) -> Result<Template> {
        self.shared.load_template(name, None)
    }

    /// Load `name` as seen from the template `parent`
    pub fn get_template_with_parent(&self, name: &str, parent: &str) -> Result<Template> {
        self.shared.load_template(&self.join_path(name, parent), None)
    }

    /// Load a template with extra template globals
    pub fn get_template_with_globals(&self, name: &str, globals: ValueMap) -> Result<Template> {
        self.shared.load_template(name, Some(globals))
    }

    /// First of `names` that exists
    pub fn select_template<S: AsRef<str>>(&self, names: &[S]) -> Result<Template> {
        let values: Vec<Value> = names.iter().map(|n| Value::from(n.as_ref())).collect();
        self.shared.select_template(&values, None)
    }

    /// A template name, a list of names or a template
    pub fn get_or_select_template(&self, name: &Value) -> Result<Template> {
        self.shared.get_or_select_template(name, None)
    }

    /// Source of a named template, straight from the loader
    pub fn get_source(&self, name: &str) -> Result<TemplateSource> {
        self.shared.loader()?.get_source(self, name)
    }

    /// Every template the loader can produce, optionally filtered
    pub fn list_templates(&self, filter: Option<&dyn Fn(&str) -> bool>) -> Result<Vec<String>> {
        let loader = self.shared.loader()?;
        let names = loader.list_templates()?;
        Ok(match filter {
            Some(keep) => names.into_iter().filter(|n| keep(n)).collect(),
            None => names,
        })
    }

    /// [`Environment::list_templates`] restricted to file extensions
    pub fn list_templates_with_extensions(&self, extensions: &[&str]) -> Result<Vec<String>> {
        let keep = |name: &str| {
            name.rsplit_once('.')
                .map_or(false, |(_, ext)| extensions.contains(&ext))
        };
        self.list_templates(Some(&keep))
    }

    /// Compile a single expression into a callable
    ///
    /// ```
    /// use core_types::Value;
    /// use environment::Environment;
    ///
    /// let env = Environment::new();
    /// let expr = env.compile_expression("foo == 42", true).unwrap();
    /// let vars = Value::from_json(serde_json::json!({"foo": 42}));
    /// assert_eq!(expr.call(vars).unwrap(), Value::from(true));
    /// ```
    pub fn compile_expression(&self, source: &str, undefined_to_none: bool) -> Result<TemplateExpression> {
        let lexer = self.shared.lexer()?;
        let mut parser = Parser::from_source_in(lexer, source, StartState::Variable, &self.shared.config.extensions)?;
        let node = parser.parse_expression(true)?;
        if !parser.stream.eos() {
            let token = parser.stream.current.clone();
            return Err(TemplateError::syntax("chunk after expression", token.lineno, None, None));
        }
        let ast = parser::Template {
            body: vec![Stmt::Assign {
                target: Expr::Name {
                    name: TemplateExpression::RESULT.to_string(),
                    ctx: NameCtx::Store,
                    lineno: 1,
                },
                node,
                lineno: 1,
            }],
        };
        let code = self.shared.generate(ast, None, None)?;
        let loaded = LoadedTemplate::new(Arc::new(code), self.shared.globals.clone());
        Ok(TemplateExpression::new(self.clone(), Arc::new(loaded), undefined_to_none))
    }

    /// Apply a filter from Rust code
    pub fn call_filter(&self, name: &str, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        let mut all = vec![value];
        all.extend_from_slice(args);
        let eval_ctx = EvalContext::new(self.autoescape_for(None));
        self.shared.call_filter(name, &all, kwargs, &eval_ctx, None)
    }

    /// Apply a test from Rust code
    pub fn call_test(&self, name: &str, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<bool> {
        let mut all = vec![value];
        all.extend_from_slice(args);
        let eval_ctx = EvalContext::new(self.autoescape_for(None));
        self.shared.call_test(name, &all, kwargs, &eval_ctx, None)
    }

    /// Attribute lookup with sandbox checks; missing attributes are undefined
    pub fn getattr(&self, obj: &Value, attr: &str) -> Result<Value> {
        self.shared.getattr(obj, attr)
    }

    /// Item lookup with sandbox checks; missing items are undefined
    pub fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        self.shared.getitem(obj, key)
    }
}

impl Shared {
    pub(crate) fn lexer(&self) -> Result<&Lexer> {
        self.lexer
            .get_or_init(|| Lexer::new(self.config.lexer.clone()))
            .as_ref()
            .map_err(Clone::clone)
    }

    fn environment(&self) -> Result<Environment> {
        self.me
            .upgrade()
            .map(Environment::from_shared)
            .ok_or_else(|| TemplateError::runtime("environment was dropped during rendering"))
    }

    fn loader(&self) -> Result<&Arc<dyn Loader>> {
        self.config
            .loader
            .as_ref()
            .ok_or_else(|| TemplateError::type_error("no loader for this environment specified"))
    }

    fn join_path(&self, name: &str, parent: &str) -> String {
        match &self.config.join_path {
            Some(join) => join(name, parent),
            None => name.to_string(),
        }
    }

    fn make_globals(&self, extra: ValueMap) -> Arc<ValueMap> {
        if extra.is_empty() {
            return self.globals.clone();
        }
        let mut merged = self.globals.as_ref().clone();
        merged.extend(extra);
        Arc::new(merged)
    }

    fn preprocess(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> String {
        self.config
            .extensions
            .iter()
            .fold(source.to_string(), |source, ext| ext.preprocess(source, name, filename))
    }

    fn parse(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<parser::Template> {
        let source = self.preprocess(source, name, filename);
        let mut tokens = self.lexer()?.tokenize(&source, name, filename)?;
        for ext in &self.config.extensions {
            tokens = ext.filter_stream(tokens)?;
        }
        let stream = TokenStream::new(tokens, name, filename);
        Parser::new(stream, &self.config.extensions).parse()
    }

    fn generate(&self, ast: parser::Template, name: Option<&str>, filename: Option<&str>) -> Result<CompiledTemplate> {
        let eval_ctx = EvalContext::new(self.config.autoescape.for_template(name));
        let ast = if self.config.optimized {
            optimize(ast, self, eval_ctx)
        } else {
            ast
        };
        let mut code = generate(&ast, self, name, filename, eval_ctx)?;
        if self.config.optimized {
            code.optimize();
        }
        tracing::debug!(
            template = ?name,
            instructions = code.instruction_count(),
            "compiled template"
        );
        Ok(code)
    }

    fn compile(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<CompiledTemplate> {
        let ast = self.parse(source, name, filename)?;
        self.generate(ast, name, filename)
    }

    /// Compile through the bytecode cache, if one is configured
    fn compile_cached(&self, name: &str, source: &str, filename: Option<&str>) -> Result<CompiledTemplate> {
        let Some(bcc) = &self.config.bytecode_cache else {
            return self.compile(source, Some(name), filename);
        };
        let mut bucket = bcc.get_bucket(name, filename, source)?;
        if let Some(code) = bucket.code() {
            tracing::debug!(template = name, "bytecode cache hit");
            return Ok(code.clone());
        }
        let code = self.compile(source, Some(name), filename)?;
        bucket.set_code(code.clone());
        bcc.set_bucket(&bucket)?;
        Ok(code)
    }

    fn load_template(&self, name: &str, globals: Option<ValueMap>) -> Result<Template> {
        let env = self.environment()?;
        let loader = self.loader()?;
        let entry = match self.cache.get(&name.to_string()) {
            Some(entry) if !self.config.auto_reload || entry.uptodate.as_ref().map_or(true, |f| f()) => {
                tracing::trace!(template = name, "template cache hit");
                entry
            }
            stale => {
                if stale.is_some() {
                    tracing::debug!(template = name, "template source changed, reloading");
                } else {
                    tracing::trace!(template = name, "template cache miss");
                }
                let found = loader.get_source(&env, name)?;
                let code = self.compile_cached(name, &found.source, found.filename.as_deref())?;
                let entry = CacheEntry {
                    loaded: Arc::new(LoadedTemplate::new(Arc::new(code), self.globals.clone())),
                    uptodate: found.uptodate,
                };
                if let Some((evicted, _)) = self.cache.insert(name.to_string(), entry.clone()) {
                    tracing::debug!(template = %evicted, "evicted template from cache");
                }
                entry
            }
        };
        let loaded = match globals {
            Some(extra) if !extra.is_empty() => Arc::new(LoadedTemplate::new(
                entry.loaded.code().clone(),
                self.make_globals(extra),
            )),
            _ => entry.loaded,
        };
        Ok(Template::new(env, loaded, entry.uptodate))
    }

    fn template_name(value: &Value) -> Result<&str> {
        match value {
            Value::Undefined(u) => Err(u.error()),
            other => other.as_str().ok_or_else(|| {
                TemplateError::type_error(format!(
                    "template name must be a string, got {}",
                    other.type_name()
                ))
            }),
        }
    }

    fn select_template(&self, names: &[Value], parent: Option<&str>) -> Result<Template> {
        for name in names {
            if let Some(template) = name.downcast_object_ref::<Template>() {
                return Ok(template.clone());
            }
            let attempt = Self::template_name(name).and_then(|name| {
                let name = match parent {
                    Some(parent) => self.join_path(name, parent),
                    None => name.to_string(),
                };
                self.load_template(&name, None)
            });
            match attempt {
                Ok(template) => return Ok(template),
                Err(err) if err.kind == ErrorKind::TemplateNotFound || err.kind == ErrorKind::UndefinedError => {}
                Err(err) => return Err(err),
            }
        }
        let tried: Vec<String> = names
            .iter()
            .map(|n| n.as_str().map_or_else(|| n.repr(), str::to_string))
            .collect();
        Err(TemplateError::none_found(&tried))
    }

    fn get_or_select_template(&self, name: &Value, parent: Option<&str>) -> Result<Template> {
        if let Some(template) = name.downcast_object_ref::<Template>() {
            return Ok(template.clone());
        }
        match name {
            Value::List(items) | Value::Tuple(items) => self.select_template(items, parent),
            other => {
                let name = Self::template_name(other)?;
                let name = match parent {
                    Some(parent) => self.join_path(name, parent),
                    None => name.to_string(),
                };
                self.load_template(&name, None)
            }
        }
    }

    fn dispatch(
        &self,
        catalog: &FunctionMap,
        kind: &str,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<Value> {
        let function = catalog
            .get(name)
            .ok_or_else(|| TemplateError::runtime(format!("No {} named '{}'.", kind, name)))?;
        if matches!(function.pass_arg(), PassArg::Context) && context.is_none() {
            return Err(TemplateError::runtime(format!(
                "Attempted to invoke a context {} without context",
                kind
            )));
        }
        let site = CallSite {
            context,
            eval_ctx,
            env: self,
        };
        function.invoke_sync(&site, args, kwargs)
    }

    /// Can `function` run without a render context at compile time?
    fn foldable(&self, function: &Function) -> bool {
        !function.is_async() && !matches!(function.pass_arg(), PassArg::Context)
    }
}

impl EnvironmentAccess for Shared {
    fn undefined(&self, hint: Option<String>, obj: Option<Value>, name: Option<Value>) -> Value {
        Value::Undefined(Arc::new(Undefined {
            behavior: self.config.undefined,
            hint,
            obj,
            name,
            exc: ErrorKind::UndefinedError,
        }))
    }

    fn undefined_behavior(&self) -> UndefinedBehavior {
        self.config.undefined
    }

    fn getattr(&self, obj: &Value, attr: &str) -> Result<Value> {
        match ops::get_attr(obj, attr)? {
            Some(value) => match &self.config.sandbox {
                Some(policy) if !policy.is_safe_attribute(obj, attr, &value) => {
                    Ok(unsafe_undefined(obj, attr, self.config.undefined))
                }
                _ => Ok(value),
            },
            None => Ok(self.undefined(None, Some(obj.clone()), Some(Value::from(attr)))),
        }
    }

    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value> {
        if let Some(value) = ops::get_item(obj, key)? {
            return Ok(match (&self.config.sandbox, key.as_str()) {
                (Some(policy), Some(attr)) if !policy.is_safe_attribute(obj, attr, &value) => {
                    unsafe_undefined(obj, attr, self.config.undefined)
                }
                _ => value,
            });
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
        self.dispatch(&self.config.filters, "filter", name, args, kwargs, eval_ctx, context)
    }

    fn call_test(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<bool> {
        let value = self.dispatch(&self.config.tests, "test", name, args, kwargs, eval_ctx, context)?;
        ops::is_true(&value)
    }

    fn filter_names(&self) -> Vec<String> {
        self.config.filters.keys().cloned().collect()
    }

    fn test_names(&self) -> Vec<String> {
        self.config.tests.keys().cloned().collect()
    }

    fn is_async(&self) -> bool {
        self.config.enable_async
    }

    fn max_range(&self) -> Option<usize> {
        self.config.sandbox.as_ref().and_then(|s| s.max_range())
    }

    fn policy(&self, key: &str) -> Option<Value> {
        self.config
            .policies
            .get(key)
            .filter(|v| !v.is_none())
            .cloned()
    }
}

impl RenderHost for Shared {
    fn as_environment(&self) -> &dyn EnvironmentAccess {
        self
    }

    fn get_template(&self, name: &Value, parent: Option<&str>) -> Result<Arc<LoadedTemplate>> {
        self.get_or_select_template(name, parent)
            .map(|template| template.loaded().clone())
    }

    fn filter(&self, name: &str) -> Option<Arc<Function>> {
        self.config.filters.get(name).cloned()
    }

    fn test(&self, name: &str) -> Option<Arc<Function>> {
        self.config.tests.get(name).cloned()
    }

    fn autoescape(&self, template: Option<&str>) -> bool {
        self.config.autoescape.for_template(template)
    }

    fn finalize(&self) -> Option<Arc<Function>> {
        self.config.finalize.clone()
    }

    fn extension_attribute(&self, extension: &str, name: &str) -> Option<Value> {
        self.config
            .extensions
            .iter()
            .find(|e| e.identifier() == extension)
            .and_then(|e| e.attribute(name))
    }

    fn is_safe_callable(&self, value: &Value) -> bool {
        self.config
            .sandbox
            .as_ref()
            .map_or(true, |policy| policy.is_safe_callable(value))
    }

    fn binary_op(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value> {
        match &self.config.sandbox {
            Some(policy) if policy.intercepts_binop(op) => policy.call_binop(op, left, right),
            _ => ops::binary_op(op, left, right),
        }
    }

    fn unary_op(&self, op: UnaryOp, value: &Value) -> Result<Value> {
        match &self.config.sandbox {
            Some(policy) if policy.intercepts_unop(op) => policy.call_unop(op, value),
            _ => ops::unary_op(op, value),
        }
    }
}

impl CompileEnvironment for Shared {
    fn has_filter(&self, name: &str) -> bool {
        self.config.filters.contains_key(name)
    }

    fn has_test(&self, name: &str) -> bool {
        self.config.tests.contains_key(name)
    }

    fn fold_filter(&self, name: &str, args: &[Value], kwargs: &Kwargs, eval_ctx: &EvalContext) -> Option<Result<Value>> {
        let function = self.config.filters.get(name)?;
        if !self.foldable(function) {
            return None;
        }
        let site = CallSite {
            context: None,
            eval_ctx,
            env: self,
        };
        Some(function.invoke_sync(&site, args, kwargs))
    }

    fn fold_test(&self, name: &str, args: &[Value], kwargs: &Kwargs, eval_ctx: &EvalContext) -> Option<Result<bool>> {
        let function = self.config.tests.get(name)?;
        if !self.foldable(function) {
            return None;
        }
        let site = CallSite {
            context: None,
            eval_ctx,
            env: self,
        };
        Some(function.invoke_sync(&site, args, kwargs).and_then(|v| ops::is_true(&v)))
    }

    fn intercepts_binop(&self, op: BinOp) -> bool {
        self.config
            .sandbox
            .as_ref()
            .map_or(false, |policy| policy.intercepts_binop(op))
    }

    fn intercepts_unop(&self, op: UnaryOp) -> bool {
        self.config
            .sandbox
            .as_ref()
            .map_or(false, |policy| policy.intercepts_unop(op))
    }

    fn fold_getattr(&self, obj: &Value, attr: &str) -> Option<Value> {
        let value = ops::get_attr(obj, attr).ok().flatten()?;
        match &self.config.sandbox {
            Some(policy) if !policy.is_safe_attribute(obj, attr, &value) => None,
            _ => Some(value),
        }
    }

    fn fold_getitem(&self, obj: &Value, key: &Value) -> Option<Value> {
        let value = ops::get_item(obj, key).ok().flatten()?;
        match (&self.config.sandbox, key.as_str()) {
            (Some(policy), Some(attr)) if !policy.is_safe_attribute(obj, attr, &value) => None,
            _ => Some(value),
        }
    }

    fn has_finalize(&self) -> bool {
        self.config.finalize.is_some()
    }

    fn finalize_constant(&self, value: &Value, eval_ctx: &EvalContext) -> Option<Value> {
        let Some(finalize) = &self.config.finalize else {
            return Some(value.clone());
        };
        if !self.foldable(finalize) {
            return None;
        }
        let site = CallSite {
            context: None,
            eval_ctx,
            env: self,
        };
        finalize
            .invoke_sync(&site, std::slice::from_ref(value), &Kwargs::new())
            .ok()
    }

    fn is_async(&self) -> bool {
        self.config.enable_async
    }
}
