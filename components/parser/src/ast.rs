//! Abstract Syntax Tree node definitions

use core_types::{BinOp, CmpOp, UnaryOp, Value};

/// How a name is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCtx {
    /// Read
    Load,
    /// Assigned
    Store,
    /// Bound as a function parameter
    Param,
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    /// Top-level statements
    pub body: Vec<Stmt>,
}

/// `{% if %}` with its `elif` chain. Elif branches are `If` nodes whose own
/// `elif_` and `else_` are empty.
#[derive(Debug, Clone, PartialEq)]
pub struct If {
    /// Condition
    pub test: Expr,
    /// Statements when the condition holds
    pub body: Vec<Stmt>,
    /// `elif` branches, in order
    pub elif_: Vec<If>,
    /// `else` statements
    pub else_: Vec<Stmt>,
    /// Source line
    pub lineno: u32,
}

/// A `key=value` argument
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Argument name
    pub key: String,
    /// Argument value
    pub value: Expr,
}

/// Arguments of a call, filter or test
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    /// Positional arguments
    pub args: Vec<Expr>,
    /// Keyword arguments
    pub kwargs: Vec<Keyword>,
    /// `*args`
    pub dyn_args: Option<Box<Expr>>,
    /// `**kwargs`
    pub dyn_kwargs: Option<Box<Expr>>,
}

impl CallArgs {
    /// True if there are no arguments at all
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty() && self.dyn_args.is_none() && self.dyn_kwargs.is_none()
    }
}

/// One link of a comparison chain
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    /// Comparison operator
    pub op: CmpOp,
    /// Right-hand side
    pub expr: Expr,
}

/// A dict literal entry
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    /// Key expression
    pub key: Expr,
    /// Value expression
    pub value: Expr,
}

/// Template statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Output of data and `{{ }}` expressions
    Output {
        /// Expressions and template data to write
        nodes: Vec<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `{% extends %}`
    Extends {
        /// Parent template name expression
        template: Expr,
        /// Source line
        lineno: u32,
    },

    /// `{% for %}`
    For {
        /// Loop target
        target: Expr,
        /// Iterable
        iter: Expr,
        /// Loop body
        body: Vec<Stmt>,
        /// Rendered when the loop produced no iteration
        else_: Vec<Stmt>,
        /// Inline filter condition
        test: Option<Expr>,
        /// The loop can be called recursively through `loop()`
        recursive: bool,
        /// Source line
        lineno: u32,
    },

    /// `{% if %}`
    If(If),

    /// `{% macro %}`
    Macro {
        /// Macro name
        name: String,
        /// Parameter names
        args: Vec<String>,
        /// Defaults of the trailing parameters
        defaults: Vec<Expr>,
        /// Macro body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// `{% call %}`
    CallBlock {
        /// The macro call receiving `caller`
        call: Expr,
        /// Parameter names of `caller`
        args: Vec<String>,
        /// Defaults of the trailing parameters
        defaults: Vec<Expr>,
        /// Body of `caller`
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// `{% filter %}`
    FilterBlock {
        /// Filter chain applied to the body; the innermost filter has no node
        filter: Expr,
        /// Filtered body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// `{% with %}`
    With {
        /// Bound names
        targets: Vec<Expr>,
        /// Values, evaluated in the enclosing scope
        values: Vec<Expr>,
        /// Body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// `{% block %}`
    Block {
        /// Block name
        name: String,
        /// Block body
        body: Vec<Stmt>,
        /// The block sees the variables of its enclosing scope
        scoped: bool,
        /// A child template must override the block
        required: bool,
        /// Source line
        lineno: u32,
    },

    /// `{% include %}`
    Include {
        /// Template name expression (string or list of names)
        template: Expr,
        /// Share the current context
        with_context: bool,
        /// Render nothing if the template does not exist
        ignore_missing: bool,
        /// Source line
        lineno: u32,
    },

    /// `{% import ... as name %}`
    Import {
        /// Template name expression
        template: Expr,
        /// Name the module is bound to
        target: String,
        /// Evaluate the module with the current context
        with_context: bool,
        /// Source line
        lineno: u32,
    },

    /// `{% from ... import ... %}`
    FromImport {
        /// Template name expression
        template: Expr,
        /// Imported names with their optional aliases
        names: Vec<(String, Option<String>)>,
        /// Evaluate the module with the current context
        with_context: bool,
        /// Source line
        lineno: u32,
    },

    /// An expression evaluated for its side effects
    ExprStmt {
        /// The expression
        node: Expr,
        /// Source line
        lineno: u32,
    },

    /// `{% set x = ... %}`
    Assign {
        /// Assignment target
        target: Expr,
        /// Value
        node: Expr,
        /// Source line
        lineno: u32,
    },

    /// `{% set x %}...{% endset %}`
    AssignBlock {
        /// Assignment target
        target: Expr,
        /// Optional filter applied to the captured body
        filter: Option<Expr>,
        /// Captured body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// `{% break %}`
    Break {
        /// Source line
        lineno: u32,
    },

    /// `{% continue %}`
    Continue {
        /// Source line
        lineno: u32,
    },

    /// A new variable scope
    Scope {
        /// Body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// Render the body with extra variables layered over the context
    OverlayScope {
        /// Expression producing a dict of variables
        context: Expr,
        /// Body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },

    /// Change evaluation settings for the rest of the scope
    EvalContextModifier {
        /// Settings, currently only `autoescape`
        options: Vec<Keyword>,
        /// Source line
        lineno: u32,
    },

    /// Change evaluation settings for the body only
    ScopedEvalContextModifier {
        /// Settings, currently only `autoescape`
        options: Vec<Keyword>,
        /// Body
        body: Vec<Stmt>,
        /// Source line
        lineno: u32,
    },
}

impl Stmt {
    /// Source line of the statement
    pub fn lineno(&self) -> u32 {
        match self {
            Stmt::If(node) => node.lineno,
            Stmt::Output { lineno, .. }
            | Stmt::Extends { lineno, .. }
            | Stmt::For { lineno, .. }
            | Stmt::Macro { lineno, .. }
            | Stmt::CallBlock { lineno, .. }
            | Stmt::FilterBlock { lineno, .. }
            | Stmt::With { lineno, .. }
            | Stmt::Block { lineno, .. }
            | Stmt::Include { lineno, .. }
            | Stmt::Import { lineno, .. }
            | Stmt::FromImport { lineno, .. }
            | Stmt::ExprStmt { lineno, .. }
            | Stmt::Assign { lineno, .. }
            | Stmt::AssignBlock { lineno, .. }
            | Stmt::Break { lineno }
            | Stmt::Continue { lineno }
            | Stmt::Scope { lineno, .. }
            | Stmt::OverlayScope { lineno, .. }
            | Stmt::EvalContextModifier { lineno, .. }
            | Stmt::ScopedEvalContextModifier { lineno, .. } => *lineno,
        }
    }

    /// Node type name, as shown in AST dumps
    pub fn type_name(&self) -> &'static str {
        match self {
            Stmt::Output { .. } => "Output",
            Stmt::Extends { .. } => "Extends",
            Stmt::For { .. } => "For",
            Stmt::If(_) => "If",
            Stmt::Macro { .. } => "Macro",
            Stmt::CallBlock { .. } => "CallBlock",
            Stmt::FilterBlock { .. } => "FilterBlock",
            Stmt::With { .. } => "With",
            Stmt::Block { .. } => "Block",
            Stmt::Include { .. } => "Include",
            Stmt::Import { .. } => "Import",
            Stmt::FromImport { .. } => "FromImport",
            Stmt::ExprStmt { .. } => "ExprStmt",
            Stmt::Assign { .. } => "Assign",
            Stmt::AssignBlock { .. } => "AssignBlock",
            Stmt::Break { .. } => "Break",
            Stmt::Continue { .. } => "Continue",
            Stmt::Scope { .. } => "Scope",
            Stmt::OverlayScope { .. } => "OverlayScope",
            Stmt::EvalContextModifier { .. } => "EvalContextModifier",
            Stmt::ScopedEvalContextModifier { .. } => "ScopedEvalContextModifier",
        }
    }
}

/// Template expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Variable reference
    Name {
        /// Variable name
        name: String,
        /// Load, store or parameter
        ctx: NameCtx,
        /// Source line
        lineno: u32,
    },

    /// `ns.attr` as an assignment target
    NSRef {
        /// Namespace variable
        name: String,
        /// Attribute to assign
        attr: String,
        /// Source line
        lineno: u32,
    },

    /// Literal or folded constant
    Const {
        /// The value
        value: Value,
        /// Source line
        lineno: u32,
    },

    /// Literal template text
    TemplateData {
        /// The text
        data: String,
        /// Source line
        lineno: u32,
    },

    /// Tuple literal or unpacking target
    Tuple {
        /// Items
        items: Vec<Expr>,
        /// Load or store
        ctx: NameCtx,
        /// Source line
        lineno: u32,
    },

    /// List literal
    List {
        /// Items
        items: Vec<Expr>,
        /// Source line
        lineno: u32,
    },

    /// Dict literal
    Dict {
        /// Entries
        items: Vec<Pair>,
        /// Source line
        lineno: u32,
    },

    /// `expr1 if test else expr2`
    CondExpr {
        /// Condition
        test: Box<Expr>,
        /// Value when true
        expr1: Box<Expr>,
        /// Value when false; undefined if missing
        expr2: Option<Box<Expr>>,
        /// Source line
        lineno: u32,
    },

    /// Arithmetic
    BinOp {
        /// Operator
        op: BinOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `and`, evaluating to the deciding operand
    And {
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `or`, evaluating to the deciding operand
    Or {
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `not`, unary `-` and `+`
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        node: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// Comparison chain such as `a < b <= c`
    Compare {
        /// Leftmost operand
        expr: Box<Expr>,
        /// Following operators and operands
        ops: Vec<Operand>,
        /// Source line
        lineno: u32,
    },

    /// `~` string concatenation
    Concat {
        /// Operands
        nodes: Vec<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `obj.attr`
    Getattr {
        /// Object
        node: Box<Expr>,
        /// Attribute name
        attr: String,
        /// Source line
        lineno: u32,
    },

    /// `obj[arg]`
    Getitem {
        /// Object
        node: Box<Expr>,
        /// Subscript, possibly a [`Expr::Slice`]
        arg: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// `start:stop:step` inside a subscript
    Slice {
        /// Start
        start: Option<Box<Expr>>,
        /// Stop
        stop: Option<Box<Expr>>,
        /// Step
        step: Option<Box<Expr>>,
        /// Source line
        lineno: u32,
    },

    /// Function call
    Call {
        /// Callee
        node: Box<Expr>,
        /// Arguments
        args: CallArgs,
        /// Source line
        lineno: u32,
    },

    /// `value|filter(args)`
    Filter {
        /// Filtered value; None for the head of a filter block
        node: Option<Box<Expr>>,
        /// Filter name
        name: String,
        /// Arguments after the value
        args: CallArgs,
        /// Source line
        lineno: u32,
    },

    /// `value is test(args)`
    Test {
        /// Tested value
        node: Box<Expr>,
        /// Test name
        name: String,
        /// Arguments after the value
        args: CallArgs,
        /// Source line
        lineno: u32,
    },

    /// Mark the value safe
    MarkSafe {
        /// Wrapped expression
        expr: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// Mark the value safe only when autoescaping
    MarkSafeIfAutoescape {
        /// Wrapped expression
        expr: Box<Expr>,
        /// Source line
        lineno: u32,
    },

    /// An attribute of a registered extension
    ExtensionAttribute {
        /// Extension identifier
        identifier: String,
        /// Attribute name
        name: String,
        /// Source line
        lineno: u32,
    },
}

const RESERVED_NAMES: &[&str] = &["true", "false", "none", "True", "False", "None"];

impl Expr {
    /// Name expression in load context
    pub fn name(name: impl Into<String>, lineno: u32) -> Self {
        Expr::Name {
            name: name.into(),
            ctx: NameCtx::Load,
            lineno,
        }
    }

    /// Constant expression
    pub fn constant(value: impl Into<Value>, lineno: u32) -> Self {
        Expr::Const {
            value: value.into(),
            lineno,
        }
    }

    /// Source line of the expression
    pub fn lineno(&self) -> u32 {
        match self {
            Expr::Name { lineno, .. }
            | Expr::NSRef { lineno, .. }
            | Expr::Const { lineno, .. }
            | Expr::TemplateData { lineno, .. }
            | Expr::Tuple { lineno, .. }
            | Expr::List { lineno, .. }
            | Expr::Dict { lineno, .. }
            | Expr::CondExpr { lineno, .. }
            | Expr::BinOp { lineno, .. }
            | Expr::And { lineno, .. }
            | Expr::Or { lineno, .. }
            | Expr::Unary { lineno, .. }
            | Expr::Compare { lineno, .. }
            | Expr::Concat { lineno, .. }
            | Expr::Getattr { lineno, .. }
            | Expr::Getitem { lineno, .. }
            | Expr::Slice { lineno, .. }
            | Expr::Call { lineno, .. }
            | Expr::Filter { lineno, .. }
            | Expr::Test { lineno, .. }
            | Expr::MarkSafe { lineno, .. }
            | Expr::MarkSafeIfAutoescape { lineno, .. }
            | Expr::ExtensionAttribute { lineno, .. } => *lineno,
        }
    }

    /// Node type name, as shown in AST dumps and assignment errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Expr::Name { .. } => "Name",
            Expr::NSRef { .. } => "NSRef",
            Expr::Const { .. } => "Const",
            Expr::TemplateData { .. } => "TemplateData",
            Expr::Tuple { .. } => "Tuple",
            Expr::List { .. } => "List",
            Expr::Dict { .. } => "Dict",
            Expr::CondExpr { .. } => "CondExpr",
            Expr::BinOp { .. } => "BinOp",
            Expr::And { .. } => "And",
            Expr::Or { .. } => "Or",
            Expr::Unary { .. } => "Unary",
            Expr::Compare { .. } => "Compare",
            Expr::Concat { .. } => "Concat",
            Expr::Getattr { .. } => "Getattr",
            Expr::Getitem { .. } => "Getitem",
            Expr::Slice { .. } => "Slice",
            Expr::Call { .. } => "Call",
            Expr::Filter { .. } => "Filter",
            Expr::Test { .. } => "Test",
            Expr::MarkSafe { .. } => "MarkSafe",
            Expr::MarkSafeIfAutoescape { .. } => "MarkSafeIfAutoescape",
            Expr::ExtensionAttribute { .. } => "ExtensionAttribute",
        }
    }

    /// True if the expression is a valid assignment target
    pub fn can_assign(&self) -> bool {
        match self {
            Expr::Name { name, .. } => !RESERVED_NAMES.contains(&name.as_str()),
            Expr::Tuple { items, .. } => items.iter().all(Expr::can_assign),
            Expr::NSRef { .. } => true,
            _ => false,
        }
    }

    /// Set the context of names and tuples, recursively
    pub fn set_ctx(&mut self, new_ctx: NameCtx) {
        match self {
            Expr::Name { ctx, .. } => *ctx = new_ctx,
            Expr::Tuple { items, ctx, .. } => {
                *ctx = new_ctx;
                for item in items {
                    item.set_ctx(new_ctx);
                }
            }
            _ => {}
        }
    }

    /// Constant value, if this is a [`Expr::Const`]
    pub fn as_const_value(&self) -> Option<&Value> {
        match self {
            Expr::Const { value, .. } => Some(value),
            _ => None,
        }
    }
}
