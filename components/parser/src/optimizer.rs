//! Constant folding over the AST
//!
//! Any expression whose value can be computed from literals alone is
//! replaced by a [`Expr::Const`]. Failing to fold is never an error: the
//! expression is simply left for the runtime, which reports whatever went
//! wrong with the right line and context.

use bytecode_system::Constant;
use core_types::{markup, ops, EvalContext, Kwargs, Value, ValueMap};

use crate::ast::{CallArgs, Expr, Keyword, Stmt, Template};
use crate::compile_env::CompileEnvironment;
use crate::visitor::{rebuild_expr, rebuild_stmt, Transformer};

/// The expression cannot be evaluated at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impossible;

type Folded = std::result::Result<Value, Impossible>;

fn possible<T, E>(r: std::result::Result<T, E>) -> std::result::Result<T, Impossible> {
    r.map_err(|_| Impossible)
}

/// Value of an expression if it only depends on literals
pub fn as_const(expr: &Expr, env: &dyn CompileEnvironment, ctx: &EvalContext) -> Folded {
    match expr {
        Expr::Const { value, .. } => Ok(value.clone()),
        Expr::Tuple { items, .. } => Ok(Value::tuple(const_items(items, env, ctx)?)),
        Expr::List { items, .. } => Ok(Value::from(const_items(items, env, ctx)?)),
        Expr::Dict { items, .. } => {
            let mut map = ValueMap::new();
            for pair in items {
                map.insert(as_const(&pair.key, env, ctx)?, as_const(&pair.value, env, ctx)?);
            }
            Ok(Value::from(map))
        }
        Expr::CondExpr { test, expr1, expr2, .. } => {
            if possible(ops::is_true(&as_const(test, env, ctx)?))? {
                as_const(expr1, env, ctx)
            } else {
                match expr2 {
                    Some(expr2) => as_const(expr2, env, ctx),
                    None => Err(Impossible),
                }
            }
        }
        Expr::BinOp { op, left, right, .. } => {
            if env.intercepts_binop(*op) {
                return Err(Impossible);
            }
            let left = as_const(left, env, ctx)?;
            let right = as_const(right, env, ctx)?;
            possible(ops::binary_op(*op, &left, &right))
        }
        Expr::Unary { op, node, .. } => {
            if env.intercepts_unop(*op) {
                return Err(Impossible);
            }
            possible(ops::unary_op(*op, &as_const(node, env, ctx)?))
        }
        Expr::And { left, right, .. } => {
            let left = as_const(left, env, ctx)?;
            if possible(ops::is_true(&left))? {
                as_const(right, env, ctx)
            } else {
                Ok(left)
            }
        }
        Expr::Or { left, right, .. } => {
            let left = as_const(left, env, ctx)?;
            if possible(ops::is_true(&left))? {
                Ok(left)
            } else {
                as_const(right, env, ctx)
            }
        }
        Expr::Compare { expr, ops: operands, .. } => {
            let mut value = as_const(expr, env, ctx)?;
            for operand in operands {
                let next = as_const(&operand.expr, env, ctx)?;
                let result = possible(match operand.op {
                    core_types::CmpOp::In => ops::contains(&next, &value),
                    core_types::CmpOp::NotIn => ops::contains(&next, &value).map(|r| !r),
                    op => ops::compare(op, &value, &next),
                })?;
                if !result {
                    return Ok(Value::from(false));
                }
                value = next;
            }
            Ok(Value::from(true))
        }
        Expr::Concat { nodes, .. } => {
            let mut out = String::new();
            for node in nodes {
                out.push_str(&possible(ops::to_string(&as_const(node, env, ctx)?))?);
            }
            Ok(Value::from(out))
        }
        Expr::Getattr { node, attr, .. } => {
            if ctx.volatile {
                return Err(Impossible);
            }
            let obj = as_const(node, env, ctx)?;
            env.fold_getattr(&obj, attr).ok_or(Impossible)
        }
        Expr::Getitem { node, arg, .. } => {
            if ctx.volatile {
                return Err(Impossible);
            }
            let obj = as_const(node, env, ctx)?;
            match arg.as_ref() {
                Expr::Slice { start, stop, step, .. } => {
                    let part = |p: &Option<Box<Expr>>| match p {
                        Some(e) => as_const(e, env, ctx),
                        None => Ok(Value::None),
                    };
                    possible(ops::slice(&obj, &part(start)?, &part(stop)?, &part(step)?))
                }
                key => env.fold_getitem(&obj, &as_const(key, env, ctx)?).ok_or(Impossible),
            }
        }
        Expr::Filter { node, name, args, .. } => {
            if ctx.volatile {
                return Err(Impossible);
            }
            let Some(node) = node else {
                return Err(Impossible);
            };
            let (mut values, kwargs) = const_call_args(args, env, ctx)?;
            values.insert(0, as_const(node, env, ctx)?);
            match env.fold_filter(name, &values, &kwargs, ctx) {
                Some(result) => possible(result),
                None => Err(Impossible),
            }
        }
        Expr::Test { node, name, args, .. } => {
            if ctx.volatile {
                return Err(Impossible);
            }
            let (mut values, kwargs) = const_call_args(args, env, ctx)?;
            values.insert(0, as_const(node, env, ctx)?);
            match env.fold_test(name, &values, &kwargs, ctx) {
                Some(result) => possible(result).map(Value::from),
                None => Err(Impossible),
            }
        }
        Expr::MarkSafe { expr, .. } => possible(markup::mark_safe(&as_const(expr, env, ctx)?)),
        Expr::MarkSafeIfAutoescape { expr, .. } => {
            if ctx.volatile {
                return Err(Impossible);
            }
            let value = as_const(expr, env, ctx)?;
            if ctx.autoescape {
                possible(markup::mark_safe(&value))
            } else {
                Ok(value)
            }
        }
        Expr::Name { .. }
        | Expr::NSRef { .. }
        | Expr::TemplateData { .. }
        | Expr::Slice { .. }
        | Expr::Call { .. }
        | Expr::ExtensionAttribute { .. } => Err(Impossible),
    }
}

fn const_items(items: &[Expr], env: &dyn CompileEnvironment, ctx: &EvalContext) -> std::result::Result<Vec<Value>, Impossible> {
    items.iter().map(|i| as_const(i, env, ctx)).collect()
}

fn const_call_args(
    args: &CallArgs,
    env: &dyn CompileEnvironment,
    ctx: &EvalContext,
) -> std::result::Result<(Vec<Value>, Kwargs), Impossible> {
    let mut values = const_items(&args.args, env, ctx)?;
    let mut kwargs = Kwargs::new();
    for kw in &args.kwargs {
        kwargs.insert(kw.key.clone(), as_const(&kw.value, env, ctx)?);
    }
    if let Some(dyn_args) = &args.dyn_args {
        values.extend(possible(ops::try_iter(&as_const(dyn_args, env, ctx)?))?);
    }
    if let Some(dyn_kwargs) = &args.dyn_kwargs {
        let extra = as_const(dyn_kwargs, env, ctx)?;
        let map = extra.as_map().ok_or(Impossible)?;
        for (k, v) in map.iter() {
            let key = k.as_str().ok_or(Impossible)?;
            kwargs.insert(key, v.clone());
        }
    }
    Ok((values, kwargs))
}

/// Folding pass. Keeps track of `{% autoescape %}` scopes so autoescape
/// dependent nodes fold with the setting in effect where they appear.
pub struct Optimizer<'e> {
    env: &'e dyn CompileEnvironment,
    eval_ctx: EvalContext,
}

impl<'e> Optimizer<'e> {
    /// Create an optimizer starting from the template's evaluation context
    pub fn new(env: &'e dyn CompileEnvironment, eval_ctx: EvalContext) -> Self {
        Self { env, eval_ctx }
    }

    /// Fold a whole template
    pub fn optimize(&mut self, template: Template) -> Template {
        Template {
            body: self.transform_body(template.body),
        }
    }

    fn apply_modifiers(&mut self, options: &[Keyword]) {
        for kw in options {
            if kw.key != "autoescape" {
                continue;
            }
            match as_const(&kw.value, self.env, &self.eval_ctx) {
                Ok(value) => self.eval_ctx.autoescape = value.is_true(),
                Err(Impossible) => self.eval_ctx.volatile = true,
            }
        }
    }
}

impl Transformer for Optimizer<'_> {
    fn transform_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        match stmt {
            Stmt::EvalContextModifier { .. } => {
                let stmt = rebuild_stmt(self, stmt);
                if let Stmt::EvalContextModifier { options, .. } = &stmt {
                    self.apply_modifiers(options);
                }
                vec![stmt]
            }
            Stmt::ScopedEvalContextModifier { options, body, lineno } => {
                let saved = self.eval_ctx;
                let options: Vec<Keyword> = options
                    .into_iter()
                    .map(|kw| Keyword {
                        key: kw.key,
                        value: self.transform_expr(kw.value),
                    })
                    .collect();
                self.apply_modifiers(&options);
                let body = self.transform_body(body);
                self.eval_ctx = saved;
                vec![Stmt::ScopedEvalContextModifier { options, body, lineno }]
            }
            other => vec![rebuild_stmt(self, other)],
        }
    }

    fn transform_expr(&mut self, expr: Expr) -> Expr {
        let expr = rebuild_expr(self, expr);
        if matches!(expr, Expr::TemplateData { .. } | Expr::Const { .. }) {
            return expr;
        }
        match as_const(&expr, self.env, &self.eval_ctx) {
            Ok(value) if Constant::from_value(&value).is_some() => Expr::Const {
                value,
                lineno: expr.lineno(),
            },
            _ => expr,
        }
    }
}

/// Fold a template with the given environment
pub fn optimize(template: Template, env: &dyn CompileEnvironment, eval_ctx: EvalContext) -> Template {
    Optimizer::new(env, eval_ctx).optimize(template)
}
