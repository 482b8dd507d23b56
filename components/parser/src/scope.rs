//! Identifier tracking for code generation
//!
//! Every compile-time frame owns a [`Symbols`] node recording, per name,
//! the identifier the generated code uses for it and how that identifier
//! gets its value when the frame is entered: it is a parameter, it is
//! resolved from the render context, it aliases a variable of an enclosing
//! frame, or it starts out unbound.
//!
//! Nodes live in a [`SymbolTable`] arena and point at their parent by
//! index. Analysis never descends into `block`, scope or overlay bodies:
//! those get their own nodes when the code generator reaches them, so names
//! assigned inside cannot leak into the enclosing frame.

use std::collections::BTreeSet;
use std::fmt;

use core_types::{Result, TemplateError};
use indexmap::IndexMap;

use crate::ast::{Expr, If, Keyword, NameCtx, Stmt};
use crate::visitor::{walk_expr, walk_stmt, Visitor};

/// Index of a symbols node in its table
pub type SymId = usize;

/// Index of a generated function body
pub type BodyId = usize;

/// A variable of the generated code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
    /// Function body owning the variable
    pub body: BodyId,
    /// Nesting level of the frame that defined it
    pub level: u32,
    /// Template-level name
    pub name: String,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l_{}_{}", self.level, self.name)
    }
}

/// How a variable gets its value when its frame is entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Load {
    /// Bound by the frame itself (loop target, macro argument)
    Parameter,
    /// Looked up in the render context under this name
    Resolve(String),
    /// Copied from a variable of an enclosing frame
    Alias(Ident),
    /// Starts out unbound
    Undefined,
}

/// Symbols of one frame
#[derive(Debug, Clone)]
pub struct Symbols {
    /// Nesting level
    pub level: u32,
    /// Enclosing frame's symbols
    pub parent: Option<SymId>,
    /// Function body the frame's variables live in
    pub body: BodyId,
    refs: IndexMap<String, Ident>,
    loads: IndexMap<Ident, Load>,
    stores: BTreeSet<String>,
}

impl Symbols {
    /// Variables to initialize on frame entry, in definition order
    pub fn loads(&self) -> impl Iterator<Item = (&Ident, &Load)> {
        self.loads.iter()
    }

    /// Names assigned in this frame
    pub fn stores(&self) -> &BTreeSet<String> {
        &self.stores
    }
}

/// Which part of a `for` statement to analyze
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForBranch {
    /// Loop body, with the target bound as parameters
    Body,
    /// `else` section
    Else,
    /// Inline `if` filter, with the target bound as parameters
    Test,
}

/// Arena of symbols nodes
#[derive(Debug, Default)]
pub struct SymbolTable {
    nodes: Vec<Symbols>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: u32, parent: Option<SymId>, body: BodyId) -> SymId {
        self.nodes.push(Symbols {
            level,
            parent,
            body,
            refs: IndexMap::new(),
            loads: IndexMap::new(),
            stores: BTreeSet::new(),
        });
        self.nodes.len() - 1
    }

    /// New node without a parent
    pub fn root(&mut self, level: u32, body: BodyId) -> SymId {
        self.push(level, None, body)
    }

    /// New node one level below `parent`
    pub fn child(&mut self, parent: SymId, body: BodyId) -> SymId {
        let level = self.nodes[parent].level + 1;
        self.push(level, Some(parent), body)
    }

    /// Independent copy of a node, sharing its parent
    pub fn copy(&mut self, id: SymId) -> SymId {
        let copy = self.nodes[id].clone();
        self.nodes.push(copy);
        self.nodes.len() - 1
    }

    /// Access a node
    pub fn get(&self, id: SymId) -> &Symbols {
        &self.nodes[id]
    }

    fn define_ref(&mut self, id: SymId, name: &str, load: Option<Load>) -> Ident {
        let node = &mut self.nodes[id];
        let ident = Ident {
            body: node.body,
            level: node.level,
            name: name.to_string(),
        };
        node.refs.insert(name.to_string(), ident.clone());
        if let Some(load) = load {
            node.loads.insert(ident.clone(), load);
        }
        ident
    }

    /// Identifier a name refers to, searching enclosing frames
    pub fn find_ref(&self, id: SymId, name: &str) -> Option<Ident> {
        let mut node = Some(id);
        while let Some(current) = node {
            if let Some(ident) = self.nodes[current].refs.get(name) {
                return Some(ident.clone());
            }
            node = self.nodes[current].parent;
        }
        None
    }

    /// Like [`SymbolTable::find_ref`], failing for unknown names
    pub fn reference(&self, id: SymId, name: &str, lineno: u32) -> Result<Ident> {
        self.find_ref(id, name).ok_or_else(|| {
            TemplateError::compile(
                format!("Tried to resolve a name to a reference that was unknown to the frame ('{}')", name),
                lineno,
            )
        })
    }

    /// How an identifier is initialized, searching enclosing frames
    pub fn find_load(&self, id: SymId, ident: &Ident) -> Option<&Load> {
        let mut node = Some(id);
        while let Some(current) = node {
            if let Some(load) = self.nodes[current].loads.get(ident) {
                return Some(load);
            }
            node = self.nodes[current].parent;
        }
        None
    }

    /// Record an assignment to `name`
    pub fn store(&mut self, id: SymId, name: &str) {
        self.nodes[id].stores.insert(name.to_string());
        if self.nodes[id].refs.contains_key(name) {
            return;
        }
        if let Some(parent) = self.nodes[id].parent {
            if let Some(outer) = self.find_ref(parent, name) {
                self.define_ref(id, name, Some(Load::Alias(outer)));
                return;
            }
        }
        self.define_ref(id, name, Some(Load::Undefined));
    }

    /// Bind `name` as a parameter of the frame
    pub fn declare_parameter(&mut self, id: SymId, name: &str) -> Ident {
        self.nodes[id].stores.insert(name.to_string());
        self.define_ref(id, name, Some(Load::Parameter))
    }

    /// Record a read of `name`
    pub fn load(&mut self, id: SymId, name: &str) {
        if self.find_ref(id, name).is_none() {
            self.define_ref(id, name, Some(Load::Resolve(name.to_string())));
        }
    }

    /// Merge the symbols of alternative branches back into `id`. A name
    /// assigned in only some of the branches falls back to the enclosing
    /// variable, or to the context, when the other branches run.
    pub fn branch_update(&mut self, id: SymId, branches: &[SymId]) {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for &branch in branches {
            for target in &self.nodes[branch].stores {
                if self.nodes[id].stores.contains(target) {
                    continue;
                }
                *counts.entry(target.clone()).or_insert(0) += 1;
            }
        }

        for &branch in branches {
            let Symbols { refs, loads, stores, .. } = self.nodes[branch].clone();
            let node = &mut self.nodes[id];
            node.refs.extend(refs);
            node.loads.extend(loads);
            node.stores.extend(stores);
        }

        for (name, count) in counts {
            if count == branches.len() {
                continue;
            }
            let Some(target) = self.find_ref(id, &name) else {
                continue;
            };
            let outer = self.nodes[id].parent.and_then(|parent| self.find_ref(parent, &name));
            let load = match outer {
                Some(outer) => Load::Alias(outer),
                None => Load::Resolve(name),
            };
            self.nodes[id].loads.insert(target, load);
        }
    }

    /// Every name assigned in this frame or an enclosing one, with the
    /// identifier it resolves to from here
    pub fn dump_stores(&self, id: SymId) -> IndexMap<String, Ident> {
        let mut out = IndexMap::new();
        let mut node = Some(id);
        while let Some(current) = node {
            for name in &self.nodes[current].stores {
                if out.contains_key(name) {
                    continue;
                }
                if let Some(ident) = self.find_ref(id, name) {
                    out.insert(name.clone(), ident);
                }
            }
            node = self.nodes[current].parent;
        }
        out
    }

    /// Parameters of this frame
    pub fn param_targets(&self, id: SymId) -> BTreeSet<Ident> {
        self.nodes[id]
            .loads
            .iter()
            .filter(|(_, load)| **load == Load::Parameter)
            .map(|(ident, _)| ident.clone())
            .collect()
    }

    fn frame_visitor(&mut self, id: SymId) -> FrameSymbolVisitor<'_> {
        FrameSymbolVisitor { table: self, symbols: id }
    }

    /// Analyze a list of statements forming the frame's body
    pub fn analyze_body(&mut self, id: SymId, body: &[Stmt]) {
        self.frame_visitor(id).visit_body(body);
    }

    /// Analyze a macro or call block: parameters, defaults and body
    pub fn analyze_macro(&mut self, id: SymId, args: &[String], defaults: &[Expr], body: &[Stmt]) {
        for arg in args {
            self.declare_parameter(id, arg);
        }
        let mut visitor = self.frame_visitor(id);
        for default in defaults {
            visitor.visit_expr(default);
        }
        visitor.visit_body(body);
    }

    /// Analyze a filter block: body, then the filter chain
    pub fn analyze_filter_block(&mut self, id: SymId, filter: &Expr, body: &[Stmt]) {
        let mut visitor = self.frame_visitor(id);
        visitor.visit_body(body);
        visitor.visit_expr(filter);
    }

    /// Analyze one branch of a `for` statement
    pub fn analyze_for(&mut self, id: SymId, node: &Stmt, branch: ForBranch) {
        let Stmt::For {
            target,
            body,
            else_,
            test,
            ..
        } = node
        else {
            return;
        };
        let mut visitor = self.frame_visitor(id);
        match branch {
            ForBranch::Body => {
                visitor.declare_target(target);
                visitor.visit_body(body);
            }
            ForBranch::Else => visitor.visit_body(else_),
            ForBranch::Test => {
                visitor.declare_target(target);
                if let Some(test) = test {
                    visitor.visit_expr(test);
                }
            }
        }
    }

    /// Analyze a `with` statement: targets, then body
    pub fn analyze_with(&mut self, id: SymId, targets: &[Expr], body: &[Stmt]) {
        let mut visitor = self.frame_visitor(id);
        for target in targets {
            visitor.visit_expr(target);
        }
        visitor.visit_body(body);
    }

    /// Analyze the options and body of an evaluation-context modifier
    pub fn analyze_modifier(&mut self, id: SymId, options: &[Keyword], body: &[Stmt]) {
        let mut visitor = self.frame_visitor(id);
        for kw in options {
            visitor.visit_expr(&kw.value);
        }
        visitor.visit_body(body);
    }
}

/// Records names of a single frame, stopping at nested scopes
struct FrameSymbolVisitor<'t> {
    table: &'t mut SymbolTable,
    symbols: SymId,
}

impl FrameSymbolVisitor<'_> {
    fn declare_target(&mut self, target: &Expr) {
        match target {
            Expr::Name { name, .. } => {
                self.table.declare_parameter(self.symbols, name);
            }
            Expr::Tuple { items, .. } => items.iter().for_each(|item| self.declare_target(item)),
            other => self.visit_expr(other),
        }
    }

    fn visit_if(&mut self, node: &If) {
        self.visit_expr(&node.test);
        let original = self.symbols;

        let body = self.table.copy(original);
        self.symbols = body;
        self.visit_body(&node.body);

        let elif = self.table.copy(original);
        self.symbols = elif;
        for branch in &node.elif_ {
            self.visit_if(branch);
        }

        let else_ = self.table.copy(original);
        self.symbols = else_;
        self.visit_body(&node.else_);

        self.symbols = original;
        self.table.branch_update(original, &[body, elif, else_]);
    }
}

impl Visitor for FrameSymbolVisitor<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::If(node) => self.visit_if(node),
            Stmt::Macro { name, .. } => self.table.store(self.symbols, name),
            Stmt::Import { template, target, .. } => {
                self.visit_expr(template);
                self.table.store(self.symbols, target);
            }
            Stmt::FromImport { template, names, .. } => {
                self.visit_expr(template);
                for (name, alias) in names {
                    self.table.store(self.symbols, alias.as_deref().unwrap_or(name));
                }
            }
            Stmt::Assign { target, node, .. } => {
                self.visit_expr(node);
                self.visit_expr(target);
            }
            Stmt::For { iter, .. } => self.visit_expr(iter),
            Stmt::CallBlock { call, .. } => self.visit_expr(call),
            Stmt::FilterBlock { filter, .. } => self.visit_expr(filter),
            Stmt::With { values, .. } => values.iter().for_each(|v| self.visit_expr(v)),
            Stmt::AssignBlock { target, .. } => self.visit_expr(target),
            Stmt::Scope { .. } | Stmt::Block { .. } | Stmt::OverlayScope { .. } => {}
            other => walk_stmt(self, other),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name { name, ctx, .. } => match ctx {
                NameCtx::Param => {
                    self.table.declare_parameter(self.symbols, name);
                }
                NameCtx::Store => self.table.store(self.symbols, name),
                NameCtx::Load => self.table.load(self.symbols, name),
            },
            Expr::NSRef { name, .. } => self.table.load(self.symbols, name),
            other => walk_expr(self, other),
        }
    }
}

/// Which of `names` the statements read before assigning them. Does not
/// descend into blocks.
pub fn find_undeclared(body: &[Stmt], names: &[&str]) -> BTreeSet<String> {
    struct UndeclaredNameVisitor {
        names: BTreeSet<String>,
        undeclared: BTreeSet<String>,
    }

    impl UndeclaredNameVisitor {
        fn discard(&mut self, name: &str) {
            self.names.remove(name);
        }
    }

    impl Visitor for UndeclaredNameVisitor {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            match stmt {
                Stmt::Block { .. } => {}
                Stmt::Macro { args, defaults, body, .. } => {
                    args.iter().for_each(|a| self.discard(a));
                    defaults.iter().for_each(|d| self.visit_expr(d));
                    self.visit_body(body);
                }
                Stmt::CallBlock {
                    call,
                    args,
                    defaults,
                    body,
                    ..
                } => {
                    self.visit_expr(call);
                    args.iter().for_each(|a| self.discard(a));
                    defaults.iter().for_each(|d| self.visit_expr(d));
                    self.visit_body(body);
                }
                other => walk_stmt(self, other),
            }
        }

        fn visit_expr(&mut self, expr: &Expr) {
            if let Expr::Name { name, ctx, .. } = expr {
                if *ctx == NameCtx::Load && self.names.contains(name) {
                    self.undeclared.insert(name.clone());
                } else {
                    self.names.remove(name);
                }
                return;
            }
            walk_expr(self, expr);
        }
    }

    let mut visitor = UndeclaredNameVisitor {
        names: names.iter().map(|n| n.to_string()).collect(),
        undeclared: BTreeSet::new(),
    };
    visitor.visit_body(body);
    visitor.undeclared
}
