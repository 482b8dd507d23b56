//! Generic AST traversal
//!
//! [`Visitor`] walks a tree by reference; [`Transformer`] consumes it and
//! rebuilds it, where every statement may be replaced by zero, one or many
//! statements. Both default to visiting children in source order, so an
//! implementation only overrides the node kinds it cares about.

use crate::ast::{CallArgs, Expr, If, Keyword, Operand, Pair, Stmt};

/// Read-only traversal
pub trait Visitor {
    /// Visit a statement; the default walks its children
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    /// Visit an expression; the default walks its children
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Visit a list of statements
    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }
}

fn walk_call_args<V: Visitor + ?Sized>(v: &mut V, args: &CallArgs) {
    for arg in &args.args {
        v.visit_expr(arg);
    }
    for kw in &args.kwargs {
        v.visit_expr(&kw.value);
    }
    if let Some(e) = &args.dyn_args {
        v.visit_expr(e);
    }
    if let Some(e) = &args.dyn_kwargs {
        v.visit_expr(e);
    }
}

fn walk_if<V: Visitor + ?Sized>(v: &mut V, node: &If) {
    v.visit_expr(&node.test);
    v.visit_body(&node.body);
    for elif in &node.elif_ {
        walk_if(v, elif);
    }
    v.visit_body(&node.else_);
}

/// Visit every child of a statement
pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Output { nodes, .. } => nodes.iter().for_each(|n| v.visit_expr(n)),
        Stmt::Extends { template, .. } => v.visit_expr(template),
        Stmt::For {
            target,
            iter,
            body,
            else_,
            test,
            ..
        } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            v.visit_body(body);
            v.visit_body(else_);
            if let Some(test) = test {
                v.visit_expr(test);
            }
        }
        Stmt::If(node) => walk_if(v, node),
        Stmt::Macro { defaults, body, .. } => {
            defaults.iter().for_each(|d| v.visit_expr(d));
            v.visit_body(body);
        }
        Stmt::CallBlock {
            call, defaults, body, ..
        } => {
            v.visit_expr(call);
            defaults.iter().for_each(|d| v.visit_expr(d));
            v.visit_body(body);
        }
        Stmt::FilterBlock { filter, body, .. } => {
            v.visit_body(body);
            v.visit_expr(filter);
        }
        Stmt::With {
            targets, values, body, ..
        } => {
            targets.iter().for_each(|t| v.visit_expr(t));
            values.iter().for_each(|e| v.visit_expr(e));
            v.visit_body(body);
        }
        Stmt::Block { body, .. } | Stmt::Scope { body, .. } => v.visit_body(body),
        Stmt::Include { template, .. } | Stmt::Import { template, .. } | Stmt::FromImport { template, .. } => {
            v.visit_expr(template)
        }
        Stmt::ExprStmt { node, .. } => v.visit_expr(node),
        Stmt::Assign { target, node, .. } => {
            v.visit_expr(target);
            v.visit_expr(node);
        }
        Stmt::AssignBlock {
            target, filter, body, ..
        } => {
            v.visit_expr(target);
            if let Some(filter) = filter {
                v.visit_expr(filter);
            }
            v.visit_body(body);
        }
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
        Stmt::OverlayScope { context, body, .. } => {
            v.visit_expr(context);
            v.visit_body(body);
        }
        Stmt::EvalContextModifier { options, .. } => options.iter().for_each(|kw| v.visit_expr(&kw.value)),
        Stmt::ScopedEvalContextModifier { options, body, .. } => {
            options.iter().for_each(|kw| v.visit_expr(&kw.value));
            v.visit_body(body);
        }
    }
}

/// Visit every child of an expression
pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Name { .. }
        | Expr::NSRef { .. }
        | Expr::Const { .. }
        | Expr::TemplateData { .. }
        | Expr::ExtensionAttribute { .. } => {}
        Expr::Tuple { items, .. } | Expr::List { items, .. } | Expr::Concat { nodes: items, .. } => {
            items.iter().for_each(|i| v.visit_expr(i))
        }
        Expr::Dict { items, .. } => {
            for pair in items {
                v.visit_expr(&pair.key);
                v.visit_expr(&pair.value);
            }
        }
        Expr::CondExpr { test, expr1, expr2, .. } => {
            v.visit_expr(test);
            v.visit_expr(expr1);
            if let Some(e) = expr2 {
                v.visit_expr(e);
            }
        }
        Expr::BinOp { left, right, .. } | Expr::And { left, right, .. } | Expr::Or { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Unary { node, .. } | Expr::Getattr { node, .. } => v.visit_expr(node),
        Expr::MarkSafe { expr, .. } | Expr::MarkSafeIfAutoescape { expr, .. } => v.visit_expr(expr),
        Expr::Compare { expr, ops, .. } => {
            v.visit_expr(expr);
            ops.iter().for_each(|op| v.visit_expr(&op.expr));
        }
        Expr::Getitem { node, arg, .. } => {
            v.visit_expr(node);
            v.visit_expr(arg);
        }
        Expr::Slice { start, stop, step, .. } => {
            for part in [start, stop, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        Expr::Call { node, args, .. } => {
            v.visit_expr(node);
            walk_call_args(v, args);
        }
        Expr::Filter { node, args, .. } => {
            if let Some(node) = node {
                v.visit_expr(node);
            }
            walk_call_args(v, args);
        }
        Expr::Test { node, args, .. } => {
            v.visit_expr(node);
            walk_call_args(v, args);
        }
    }
}

/// Rebuilding traversal
pub trait Transformer {
    /// Transform a statement into its replacements; the default rebuilds
    /// the statement from transformed children
    fn transform_stmt(&mut self, stmt: Stmt) -> Vec<Stmt> {
        vec![rebuild_stmt(self, stmt)]
    }

    /// Transform an expression; the default rebuilds it from transformed
    /// children
    fn transform_expr(&mut self, expr: Expr) -> Expr {
        rebuild_expr(self, expr)
    }

    /// Transform a list of statements, splicing replacements in place
    fn transform_body(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        body.into_iter().flat_map(|s| self.transform_stmt(s)).collect()
    }
}

fn rebuild_boxed<T: Transformer + ?Sized>(t: &mut T, expr: Box<Expr>) -> Box<Expr> {
    Box::new(t.transform_expr(*expr))
}

fn rebuild_exprs<T: Transformer + ?Sized>(t: &mut T, exprs: Vec<Expr>) -> Vec<Expr> {
    exprs.into_iter().map(|e| t.transform_expr(e)).collect()
}

fn rebuild_keywords<T: Transformer + ?Sized>(t: &mut T, kws: Vec<Keyword>) -> Vec<Keyword> {
    kws.into_iter()
        .map(|kw| Keyword {
            key: kw.key,
            value: t.transform_expr(kw.value),
        })
        .collect()
}

fn rebuild_call_args<T: Transformer + ?Sized>(t: &mut T, args: CallArgs) -> CallArgs {
    CallArgs {
        args: rebuild_exprs(t, args.args),
        kwargs: rebuild_keywords(t, args.kwargs),
        dyn_args: args.dyn_args.map(|e| rebuild_boxed(t, e)),
        dyn_kwargs: args.dyn_kwargs.map(|e| rebuild_boxed(t, e)),
    }
}

fn rebuild_if<T: Transformer + ?Sized>(t: &mut T, node: If) -> If {
    If {
        test: t.transform_expr(node.test),
        body: t.transform_body(node.body),
        elif_: node.elif_.into_iter().map(|e| rebuild_if(t, e)).collect(),
        else_: t.transform_body(node.else_),
        lineno: node.lineno,
    }
}

/// Rebuild a statement from transformed children
pub fn rebuild_stmt<T: Transformer + ?Sized>(t: &mut T, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Output { nodes, lineno } => Stmt::Output {
            nodes: rebuild_exprs(t, nodes),
            lineno,
        },
        Stmt::Extends { template, lineno } => Stmt::Extends {
            template: t.transform_expr(template),
            lineno,
        },
        Stmt::For {
            target,
            iter,
            body,
            else_,
            test,
            recursive,
            lineno,
        } => Stmt::For {
            target: t.transform_expr(target),
            iter: t.transform_expr(iter),
            body: t.transform_body(body),
            else_: t.transform_body(else_),
            test: test.map(|e| t.transform_expr(e)),
            recursive,
            lineno,
        },
        Stmt::If(node) => Stmt::If(rebuild_if(t, node)),
        Stmt::Macro {
            name,
            args,
            defaults,
            body,
            lineno,
        } => Stmt::Macro {
            name,
            args,
            defaults: rebuild_exprs(t, defaults),
            body: t.transform_body(body),
            lineno,
        },
        Stmt::CallBlock {
            call,
            args,
            defaults,
            body,
            lineno,
        } => Stmt::CallBlock {
            call: t.transform_expr(call),
            args,
            defaults: rebuild_exprs(t, defaults),
            body: t.transform_body(body),
            lineno,
        },
        Stmt::FilterBlock { filter, body, lineno } => {
            let body = t.transform_body(body);
            Stmt::FilterBlock {
                filter: t.transform_expr(filter),
                body,
                lineno,
            }
        }
        Stmt::With {
            targets,
            values,
            body,
            lineno,
        } => Stmt::With {
            targets: rebuild_exprs(t, targets),
            values: rebuild_exprs(t, values),
            body: t.transform_body(body),
            lineno,
        },
        Stmt::Block {
            name,
            body,
            scoped,
            required,
            lineno,
        } => Stmt::Block {
            name,
            body: t.transform_body(body),
            scoped,
            required,
            lineno,
        },
        Stmt::Include {
            template,
            with_context,
            ignore_missing,
            lineno,
        } => Stmt::Include {
            template: t.transform_expr(template),
            with_context,
            ignore_missing,
            lineno,
        },
        Stmt::Import {
            template,
            target,
            with_context,
            lineno,
        } => Stmt::Import {
            template: t.transform_expr(template),
            target,
            with_context,
            lineno,
        },
        Stmt::FromImport {
            template,
            names,
            with_context,
            lineno,
        } => Stmt::FromImport {
            template: t.transform_expr(template),
            names,
            with_context,
            lineno,
        },
        Stmt::ExprStmt { node, lineno } => Stmt::ExprStmt {
            node: t.transform_expr(node),
            lineno,
        },
        Stmt::Assign { target, node, lineno } => Stmt::Assign {
            target: t.transform_expr(target),
            node: t.transform_expr(node),
            lineno,
        },
        Stmt::AssignBlock {
            target,
            filter,
            body,
            lineno,
        } => Stmt::AssignBlock {
            target: t.transform_expr(target),
            filter: filter.map(|f| t.transform_expr(f)),
            body: t.transform_body(body),
            lineno,
        },
        Stmt::Break { lineno } => Stmt::Break { lineno },
        Stmt::Continue { lineno } => Stmt::Continue { lineno },
        Stmt::Scope { body, lineno } => Stmt::Scope {
            body: t.transform_body(body),
            lineno,
        },
        Stmt::OverlayScope { context, body, lineno } => Stmt::OverlayScope {
            context: t.transform_expr(context),
            body: t.transform_body(body),
            lineno,
        },
        Stmt::EvalContextModifier { options, lineno } => Stmt::EvalContextModifier {
            options: rebuild_keywords(t, options),
            lineno,
        },
        Stmt::ScopedEvalContextModifier { options, body, lineno } => Stmt::ScopedEvalContextModifier {
            options: rebuild_keywords(t, options),
            body: t.transform_body(body),
            lineno,
        },
    }
}

/// Rebuild an expression from transformed children
pub fn rebuild_expr<T: Transformer + ?Sized>(t: &mut T, expr: Expr) -> Expr {
    match expr {
        leaf @ (Expr::Name { .. }
        | Expr::NSRef { .. }
        | Expr::Const { .. }
        | Expr::TemplateData { .. }
        | Expr::ExtensionAttribute { .. }) => leaf,
        Expr::Tuple { items, ctx, lineno } => Expr::Tuple {
            items: rebuild_exprs(t, items),
            ctx,
            lineno,
        },
        Expr::List { items, lineno } => Expr::List {
            items: rebuild_exprs(t, items),
            lineno,
        },
        Expr::Dict { items, lineno } => Expr::Dict {
            items: items
                .into_iter()
                .map(|p| Pair {
                    key: t.transform_expr(p.key),
                    value: t.transform_expr(p.value),
                })
                .collect(),
            lineno,
        },
        Expr::CondExpr {
            test,
            expr1,
            expr2,
            lineno,
        } => Expr::CondExpr {
            test: rebuild_boxed(t, test),
            expr1: rebuild_boxed(t, expr1),
            expr2: expr2.map(|e| rebuild_boxed(t, e)),
            lineno,
        },
        Expr::BinOp { op, left, right, lineno } => Expr::BinOp {
            op,
            left: rebuild_boxed(t, left),
            right: rebuild_boxed(t, right),
            lineno,
        },
        Expr::And { left, right, lineno } => Expr::And {
            left: rebuild_boxed(t, left),
            right: rebuild_boxed(t, right),
            lineno,
        },
        Expr::Or { left, right, lineno } => Expr::Or {
            left: rebuild_boxed(t, left),
            right: rebuild_boxed(t, right),
            lineno,
        },
        Expr::Unary { op, node, lineno } => Expr::Unary {
            op,
            node: rebuild_boxed(t, node),
            lineno,
        },
        Expr::Compare { expr, ops, lineno } => Expr::Compare {
            expr: rebuild_boxed(t, expr),
            ops: ops
                .into_iter()
                .map(|o| Operand {
                    op: o.op,
                    expr: t.transform_expr(o.expr),
                })
                .collect(),
            lineno,
        },
        Expr::Concat { nodes, lineno } => Expr::Concat {
            nodes: rebuild_exprs(t, nodes),
            lineno,
        },
        Expr::Getattr { node, attr, lineno } => Expr::Getattr {
            node: rebuild_boxed(t, node),
            attr,
            lineno,
        },
        Expr::Getitem { node, arg, lineno } => Expr::Getitem {
            node: rebuild_boxed(t, node),
            arg: rebuild_boxed(t, arg),
            lineno,
        },
        Expr::Slice {
            start,
            stop,
            step,
            lineno,
        } => Expr::Slice {
            start: start.map(|e| rebuild_boxed(t, e)),
            stop: stop.map(|e| rebuild_boxed(t, e)),
            step: step.map(|e| rebuild_boxed(t, e)),
            lineno,
        },
        Expr::Call { node, args, lineno } => Expr::Call {
            node: rebuild_boxed(t, node),
            args: rebuild_call_args(t, args),
            lineno,
        },
        Expr::Filter {
            node,
            name,
            args,
            lineno,
        } => Expr::Filter {
            node: node.map(|e| rebuild_boxed(t, e)),
            name,
            args: rebuild_call_args(t, args),
            lineno,
        },
        Expr::Test {
            node,
            name,
            args,
            lineno,
        } => Expr::Test {
            node: rebuild_boxed(t, node),
            name,
            args: rebuild_call_args(t, args),
            lineno,
        },
        Expr::MarkSafe { expr, lineno } => Expr::MarkSafe {
            expr: rebuild_boxed(t, expr),
            lineno,
        },
        Expr::MarkSafeIfAutoescape { expr, lineno } => Expr::MarkSafeIfAutoescape {
            expr: rebuild_boxed(t, expr),
            lineno,
        },
    }
}

/// Every expression of a tree matching a predicate, in traversal order
pub fn find_all<'a>(body: &'a [Stmt], pred: impl Fn(&Expr) -> bool) -> Vec<&'a Expr> {
    struct Finder<'a, F> {
        pred: F,
        found: Vec<&'a Expr>,
    }

    // Walking by hand keeps the borrow tied to the tree instead of the visitor.
    fn stmt<'a, F: Fn(&Expr) -> bool>(f: &mut Finder<'a, F>, s: &'a Stmt) {
        let mut exprs: Vec<&'a Expr> = Vec::new();
        let mut bodies: Vec<&'a [Stmt]> = Vec::new();
        stmt_children(s, &mut exprs, &mut bodies);
        for e in exprs {
            expr(f, e);
        }
        for b in bodies {
            for s in b {
                stmt(f, s);
            }
        }
    }

    fn expr<'a, F: Fn(&Expr) -> bool>(f: &mut Finder<'a, F>, e: &'a Expr) {
        if (f.pred)(e) {
            f.found.push(e);
        }
        for child in expr_children(e) {
            expr(f, child);
        }
    }

    let mut finder = Finder { pred, found: Vec::new() };
    for s in body {
        stmt(&mut finder, s);
    }
    finder.found
}

fn stmt_children<'a>(s: &'a Stmt, exprs: &mut Vec<&'a Expr>, bodies: &mut Vec<&'a [Stmt]>) {
    fn push_if<'a>(node: &'a If, exprs: &mut Vec<&'a Expr>, bodies: &mut Vec<&'a [Stmt]>) {
        exprs.push(&node.test);
        bodies.push(&node.body);
        for elif in &node.elif_ {
            push_if(elif, exprs, bodies);
        }
        bodies.push(&node.else_);
    }
    match s {
        Stmt::Output { nodes, .. } => exprs.extend(nodes),
        Stmt::Extends { template, .. }
        | Stmt::Include { template, .. }
        | Stmt::Import { template, .. }
        | Stmt::FromImport { template, .. } => exprs.push(template),
        Stmt::For {
            target,
            iter,
            body,
            else_,
            test,
            ..
        } => {
            exprs.push(target);
            exprs.push(iter);
            exprs.extend(test.iter());
            bodies.push(body);
            bodies.push(else_);
        }
        Stmt::If(node) => push_if(node, exprs, bodies),
        Stmt::Macro { defaults, body, .. } => {
            exprs.extend(defaults);
            bodies.push(body);
        }
        Stmt::CallBlock {
            call, defaults, body, ..
        } => {
            exprs.push(call);
            exprs.extend(defaults);
            bodies.push(body);
        }
        Stmt::FilterBlock { filter, body, .. } => {
            exprs.push(filter);
            bodies.push(body);
        }
        Stmt::With {
            targets, values, body, ..
        } => {
            exprs.extend(targets);
            exprs.extend(values);
            bodies.push(body);
        }
        Stmt::Block { body, .. } | Stmt::Scope { body, .. } => bodies.push(body),
        Stmt::ExprStmt { node, .. } => exprs.push(node),
        Stmt::Assign { target, node, .. } => {
            exprs.push(target);
            exprs.push(node);
        }
        Stmt::AssignBlock {
            target, filter, body, ..
        } => {
            exprs.push(target);
            exprs.extend(filter.iter());
            bodies.push(body);
        }
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
        Stmt::OverlayScope { context, body, .. } => {
            exprs.push(context);
            bodies.push(body);
        }
        Stmt::EvalContextModifier { options, .. } => exprs.extend(options.iter().map(|kw| &kw.value)),
        Stmt::ScopedEvalContextModifier { options, body, .. } => {
            exprs.extend(options.iter().map(|kw| &kw.value));
            bodies.push(body);
        }
    }
}

/// Direct child expressions of an expression
pub fn expr_children(e: &Expr) -> Vec<&Expr> {
    fn call_args<'a>(out: &mut Vec<&'a Expr>, args: &'a CallArgs) {
        out.extend(&args.args);
        out.extend(args.kwargs.iter().map(|kw| &kw.value));
        out.extend(args.dyn_args.as_deref());
        out.extend(args.dyn_kwargs.as_deref());
    }
    let mut out = Vec::new();
    match e {
        Expr::Name { .. }
        | Expr::NSRef { .. }
        | Expr::Const { .. }
        | Expr::TemplateData { .. }
        | Expr::ExtensionAttribute { .. } => {}
        Expr::Tuple { items, .. } | Expr::List { items, .. } | Expr::Concat { nodes: items, .. } => out.extend(items),
        Expr::Dict { items, .. } => {
            for pair in items {
                out.push(&pair.key);
                out.push(&pair.value);
            }
        }
        Expr::CondExpr { test, expr1, expr2, .. } => {
            out.push(test);
            out.push(expr1);
            out.extend(expr2.as_deref());
        }
        Expr::BinOp { left, right, .. } | Expr::And { left, right, .. } | Expr::Or { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        Expr::Unary { node, .. } | Expr::Getattr { node, .. } => out.push(node),
        Expr::MarkSafe { expr, .. } | Expr::MarkSafeIfAutoescape { expr, .. } => out.push(expr),
        Expr::Compare { expr, ops, .. } => {
            out.push(expr);
            out.extend(ops.iter().map(|o| &o.expr));
        }
        Expr::Getitem { node, arg, .. } => {
            out.push(node);
            out.push(arg);
        }
        Expr::Slice { start, stop, step, .. } => {
            out.extend(start.as_deref());
            out.extend(stop.as_deref());
            out.extend(step.as_deref());
        }
        Expr::Call { node, args, .. } | Expr::Test { node, args, .. } => {
            out.push(node);
            call_args(&mut out, args);
        }
        Expr::Filter { node, args, .. } => {
            out.extend(node.as_deref());
            call_args(&mut out, args);
        }
    }
    out
}

/// Every statement of a tree (including nested ones) matching a predicate
pub fn find_all_stmts<'a>(body: &'a [Stmt], pred: &dyn Fn(&Stmt) -> bool) -> Vec<&'a Stmt> {
    let mut found = Vec::new();
    let mut stack: Vec<&'a Stmt> = body.iter().rev().collect();
    while let Some(s) = stack.pop() {
        if pred(s) {
            found.push(s);
        }
        let mut exprs = Vec::new();
        let mut bodies = Vec::new();
        stmt_children(s, &mut exprs, &mut bodies);
        for b in bodies.into_iter().rev() {
            stack.extend(b.iter().rev());
        }
    }
    found
}
