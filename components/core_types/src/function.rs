//! Host callables and their capability flags.
//!
//! A filter, test or global function opts into receiving the active context,
//! the evaluation context or the environment by the variant of [`Callable`]
//! it is registered with. The caller never needs to know: [`Function::invoke`]
//! looks at the variant and passes the right implicit argument.

use std::fmt;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::error::{Result, TemplateError};
use crate::undefined::UndefinedBehavior;
use crate::value::{Value, ValueMap};

/// Keyword arguments of a call, in call-site order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwargs {
    entries: IndexMap<String, Value>,
}

impl Kwargs {
    /// Empty keyword arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a keyword argument
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Look up a keyword argument
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Remove and return a keyword argument
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    /// True if a keyword with this name was passed
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of keyword arguments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no keyword arguments were passed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First keyword name, used in "unexpected keyword" errors
    pub fn first_name(&self) -> Option<&str> {
        self.entries.keys().next().map(String::as_str)
    }

    /// Convert into a template dict
    pub fn into_value(self) -> Value {
        Value::from(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect::<ValueMap>(),
        )
    }

    /// Fail if any keyword outside `allowed` was passed
    pub fn check_allowed(&self, function: &str, allowed: &[&str]) -> Result<()> {
        match self.entries.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(name) => Err(TemplateError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            ))),
            None => Ok(()),
        }
    }
}

impl FromIterator<(String, Value)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Evaluation-time settings that may change while rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvalContext {
    /// Whether output is escaped
    pub autoescape: bool,
    /// Set once an `{% autoescape %}` with a non-constant value has been seen
    pub volatile: bool,
}

impl EvalContext {
    /// Evaluation context with the given autoescape default
    pub fn new(autoescape: bool) -> Self {
        Self {
            autoescape,
            volatile: false,
        }
    }
}

/// What a callable can see of the environment it runs in
pub trait EnvironmentAccess: Send + Sync {
    /// Build an undefined value with the configured policy
    fn undefined(&self, hint: Option<String>, obj: Option<Value>, name: Option<Value>) -> Value;

    /// Configured undefined policy
    fn undefined_behavior(&self) -> UndefinedBehavior;

    /// Attribute lookup honoring the sandbox; missing attributes become undefined
    fn getattr(&self, obj: &Value, attr: &str) -> Result<Value>;

    /// Item lookup honoring the sandbox; missing items become undefined
    fn getitem(&self, obj: &Value, key: &Value) -> Result<Value>;

    /// Invoke a filter by name; `args[0]` is the filtered value
    fn call_filter(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<Value>;

    /// Invoke a test by name; `args[0]` is the tested value
    fn call_test(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
        eval_ctx: &EvalContext,
        context: Option<&dyn ContextAccess>,
    ) -> Result<bool>;

    /// Registered filter names
    fn filter_names(&self) -> Vec<String>;

    /// Registered test names
    fn test_names(&self) -> Vec<String>;

    /// True if the environment renders asynchronously
    fn is_async(&self) -> bool;

    /// Upper bound for `range()` imposed by the sandbox
    fn max_range(&self) -> Option<usize> {
        None
    }

    /// Named policy value (e.g. `truncate.leeway`)
    fn policy(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// What a context-aware callable can see of the active render context
pub trait ContextAccess {
    /// Resolve a name, returning undefined when missing
    fn resolve(&self, name: &str) -> Value;

    /// Resolve a name, returning None when missing
    fn resolve_or_missing(&self, name: &str) -> Option<Value>;

    /// All variables visible in the context (parent and template-set)
    fn get_all(&self) -> ValueMap;

    /// Name of the template being rendered
    fn template_name(&self) -> Option<String>;

    /// Current evaluation context
    fn eval_context(&self) -> EvalContext;

    /// The environment the context belongs to
    fn environment(&self) -> &dyn EnvironmentAccess;
}

/// Result type of host callables
pub type FunctionResult = Result<Value>;

type PlainFn = dyn Fn(&[Value], &Kwargs) -> FunctionResult + Send + Sync;
type ContextFn = dyn Fn(&dyn ContextAccess, &[Value], &Kwargs) -> FunctionResult + Send + Sync;
type EvalContextFn =
    dyn Fn(&EvalContext, &dyn EnvironmentAccess, &[Value], &Kwargs) -> FunctionResult + Send + Sync;
type EnvironmentFn =
    dyn Fn(&dyn EnvironmentAccess, &[Value], &Kwargs) -> FunctionResult + Send + Sync;
type AsyncFn = dyn Fn(Vec<Value>, Kwargs) -> BoxFuture<'static, FunctionResult> + Send + Sync;

/// The implementation of a host function, tagged by what it wants injected
pub enum Callable {
    /// Receives only the call arguments
    Plain(Box<PlainFn>),
    /// Receives the active render context first
    PassContext(Box<ContextFn>),
    /// Receives the evaluation context and the environment first
    PassEvalContext(Box<EvalContextFn>),
    /// Receives the environment first
    PassEnvironment(Box<EnvironmentFn>),
    /// Returns a future; only usable in async environments
    Async(Box<AsyncFn>),
}

/// Which implicit argument a callable receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassArg {
    /// Nothing injected
    Nothing,
    /// Active context
    Context,
    /// Evaluation context
    EvalContext,
    /// Environment
    Environment,
}

/// Everything a call site can inject
pub struct CallSite<'a> {
    /// Active render context, if there is one
    pub context: Option<&'a dyn ContextAccess>,
    /// Evaluation context at the call site
    pub eval_ctx: &'a EvalContext,
    /// Environment
    pub env: &'a dyn EnvironmentAccess,
}

/// Outcome of invoking a host function
pub enum CallOutcome {
    /// Value is available immediately
    Ready(Value),
    /// Value must be awaited
    Pending(BoxFuture<'static, FunctionResult>),
}

/// A named host function with capability flags
pub struct Function {
    name: String,
    callable: Callable,
    unsafe_callable: bool,
}

impl Function {
    /// Plain function
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> FunctionResult + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::Plain(Box::new(f)))
    }

    /// Function that receives the active context
    pub fn with_context<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn ContextAccess, &[Value], &Kwargs) -> FunctionResult + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::PassContext(Box::new(f)))
    }

    /// Function that receives the evaluation context and the environment
    ///
    /// Unlike [`Function::with_context`] this is callable outside a render.
    pub fn with_eval_context<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EvalContext, &dyn EnvironmentAccess, &[Value], &Kwargs) -> FunctionResult
            + Send
            + Sync
            + 'static,
    {
        Self::from_callable(name, Callable::PassEvalContext(Box::new(f)))
    }

    /// Function that receives the environment
    pub fn with_environment<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn EnvironmentAccess, &[Value], &Kwargs) -> FunctionResult + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::PassEnvironment(Box::new(f)))
    }

    /// Async function
    pub fn new_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> BoxFuture<'static, FunctionResult> + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::Async(Box::new(f)))
    }

    /// Build from an explicit callable
    pub fn from_callable(name: impl Into<String>, callable: Callable) -> Self {
        Self {
            name: name.into(),
            callable,
            unsafe_callable: false,
        }
    }

    /// Mark the function as unsafe for sandboxed environments
    pub fn mark_unsafe(mut self) -> Self {
        self.unsafe_callable = true;
        self
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the sandbox must refuse calling this
    pub fn is_unsafe(&self) -> bool {
        self.unsafe_callable
    }

    /// True if the function returns a future
    pub fn is_async(&self) -> bool {
        matches!(self.callable, Callable::Async(_))
    }

    /// Which implicit argument this function receives
    pub fn pass_arg(&self) -> PassArg {
        match self.callable {
            Callable::Plain(_) | Callable::Async(_) => PassArg::Nothing,
            Callable::PassContext(_) => PassArg::Context,
            Callable::PassEvalContext(_) => PassArg::EvalContext,
            Callable::PassEnvironment(_) => PassArg::Environment,
        }
    }

    /// Invoke, injecting whatever the function asked for
    pub fn invoke(&self, site: &CallSite<'_>, args: &[Value], kwargs: &Kwargs) -> Result<CallOutcome> {
        match &self.callable {
            Callable::Plain(f) => f(args, kwargs).map(CallOutcome::Ready),
            Callable::PassContext(f) => match site.context {
                Some(ctx) => f(ctx, args, kwargs).map(CallOutcome::Ready),
                None => Err(TemplateError::runtime(format!(
                    "'{}' requires a render context",
                    self.name
                ))),
            },
            Callable::PassEvalContext(f) => f(site.eval_ctx, site.env, args, kwargs).map(CallOutcome::Ready),
            Callable::PassEnvironment(f) => f(site.env, args, kwargs).map(CallOutcome::Ready),
            Callable::Async(f) => {
                if !site.env.is_async() {
                    return Err(TemplateError::runtime(format!(
                        "async function '{}' called in a synchronous environment",
                        self.name
                    )));
                }
                Ok(CallOutcome::Pending(f(args.to_vec(), kwargs.clone())))
            }
        }
    }

    /// Invoke and require an immediate result
    pub fn invoke_sync(&self, site: &CallSite<'_>, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        match self.invoke(site, args, kwargs)? {
            CallOutcome::Ready(value) => Ok(value),
            CallOutcome::Pending(fut) => futures::executor::block_on(fut),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("pass_arg", &self.pass_arg())
            .field("is_async", &self.is_async())
            .finish()
    }
}
