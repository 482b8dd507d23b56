//! Bytecode generation from the template AST
//!
//! The generator walks a parsed (and usually optimized) [`Template`] and
//! produces one [`Chunk`] per template function: the root, every block,
//! every macro and call block, and the body of every recursive loop.
//! Chunks are numbered in creation order, so a closure instruction can
//! refer to a nested function by index.
//!
//! Variables are resolved at compile time through the [`SymbolTable`]:
//! each frame knows which of its names are parameters, which are looked up
//! in the render context on entry, and which alias a variable of an
//! enclosing frame. Every identifier gets a slot in the chunk of the
//! function that owns it, and nested functions address it by scope depth.

use std::collections::{BTreeSet, HashMap};

use bytecode_system::{
    CallShape, Chunk, ChunkKind, CompiledTemplate, Constant, Escape, Label, LocalRef,
    MacroSignature, Opcode,
};
use core_types::{markup, ops, repr_str, EvalContext, Result, TemplateError, Value};
use indexmap::IndexMap;

use crate::ast::{CallArgs, Expr, If, Keyword, NameCtx, Stmt, Template};
use crate::compile_env::CompileEnvironment;
use crate::optimizer::as_const;
use crate::scope::{find_undeclared, BodyId, ForBranch, Ident, Load, SymId, SymbolTable};
use crate::visitor::{find_all, find_all_stmts};

/// Compile-time state of the scope being generated
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    symbols: SymId,
    body: BodyId,
    /// Statements directly in the template root, or in an `if` there
    toplevel: bool,
    /// Statements directly in the template root
    rootlevel: bool,
    loop_frame: bool,
    block_frame: bool,
    /// Unknown filters and tests are reported at runtime
    soft_frame: bool,
    /// Output must be suppressed once a parent template is set
    require_output_check: bool,
}

impl Frame {
    fn new(symbols: SymId, body: BodyId) -> Self {
        Self {
            symbols,
            body,
            ..Self::default()
        }
    }

    fn soft(&self) -> Self {
        Self {
            rootlevel: false,
            soft_frame: true,
            ..*self
        }
    }
}

/// Whether the rest of a statement list is still generated
enum Flow {
    Continue,
    Exit,
}

/// Runtime state opened by a statement that a `break` or `continue`
/// jumping out of it has to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    Capture,
    Autoescape,
    Overlay,
}

struct LoopLabels {
    head: Label,
    breaks: Vec<Label>,
    cleanup_depth: usize,
    clears: Vec<LocalRef>,
}

/// A function being generated
struct Body {
    chunk: Chunk,
    parent: Option<BodyId>,
    slots: HashMap<Ident, u16>,
    loops: Vec<LoopLabels>,
    cleanups: Vec<Cleanup>,
}

/// Turns a template AST into a [`CompiledTemplate`]
pub struct CodeGenerator<'e> {
    env: &'e dyn CompileEnvironment,
    name: Option<String>,
    filename: Option<String>,
    initial_ctx: EvalContext,
    eval_ctx: EvalContext,
    symbols: SymbolTable,
    bodies: Vec<Body>,
    blocks: IndexMap<String, u32>,
    extends_so_far: u32,
    has_known_extends: bool,
    param_def_block: Vec<BTreeSet<Ident>>,
    assign_stack: Vec<BTreeSet<String>>,
    resolved: BTreeSet<String>,
    first_output: Option<u32>,
}

impl<'e> CodeGenerator<'e> {
    /// Create a generator for the template called `name`
    pub fn new(
        env: &'e dyn CompileEnvironment,
        name: Option<&str>,
        filename: Option<&str>,
        eval_ctx: EvalContext,
    ) -> Self {
        Self {
            env,
            name: name.map(str::to_string),
            filename: filename.map(str::to_string),
            initial_ctx: eval_ctx,
            eval_ctx,
            symbols: SymbolTable::new(),
            bodies: Vec::new(),
            blocks: IndexMap::new(),
            extends_so_far: 0,
            has_known_extends: false,
            param_def_block: Vec::new(),
            assign_stack: Vec::new(),
            resolved: BTreeSet::new(),
            first_output: None,
        }
    }

    /// Names the last generated template looks up in the render context
    pub fn resolved_names(&self) -> &BTreeSet<String> {
        &self.resolved
    }

    /// Generate the compiled module for a template
    pub fn generate(&mut self, template: &Template) -> Result<CompiledTemplate> {
        self.reset();
        let code = self
            .generate_module(template)
            .map_err(|e| e.with_template(self.name.as_deref(), self.filename.as_deref()))?;
        tracing::debug!(
            template = ?self.name,
            chunks = code.chunks.len(),
            instructions = code.chunks.iter().map(|c| c.instructions.len()).sum::<usize>(),
            "compiled"
        );
        Ok(code)
    }

    fn reset(&mut self) {
        self.eval_ctx = self.initial_ctx;
        self.symbols = SymbolTable::new();
        self.bodies.clear();
        self.blocks.clear();
        self.extends_so_far = 0;
        self.has_known_extends = false;
        self.param_def_block.clear();
        self.assign_stack.clear();
        self.resolved.clear();
        self.first_output = None;
    }

    fn generate_module(&mut self, template: &Template) -> Result<CompiledTemplate> {
        let mut block_nodes: IndexMap<&str, &Stmt> = IndexMap::new();
        for stmt in find_all_stmts(&template.body, &|s| matches!(s, Stmt::Block { .. })) {
            if let Stmt::Block { name, lineno, .. } = stmt {
                if block_nodes.contains_key(name.as_str()) {
                    return Err(fail(format!("block {} defined twice", repr_str(name)), *lineno));
                }
                block_nodes.insert(name, stmt);
            }
        }
        let have_extends =
            !find_all_stmts(&template.body, &|s| matches!(s, Stmt::Extends { .. })).is_empty();
        let last_line = template.body.last().map_or(1, Stmt::lineno);

        let root = self.new_body(None, ChunkKind::Root);
        let mut frame = Frame::new(self.symbols.root(0, root), root);
        if find_undeclared(&template.body, &["self"]).contains("self") {
            let ident = self.symbols.declare_parameter(frame.symbols, "self");
            let local = self.local_ref(root, &ident, 1)?;
            self.emit(root, Opcode::MakeTemplateRef, 1);
            self.emit(root, Opcode::StoreLocal(local), 1);
        }
        self.symbols.analyze_body(frame.symbols, &template.body);
        frame.toplevel = true;
        frame.rootlevel = true;
        frame.require_output_check = have_extends;
        self.enter_frame(&frame, 1)?;
        self.visit_body(&template.body, &frame)?;
        if have_extends {
            self.emit(root, Opcode::RenderParent, last_line);
        }
        self.emit(root, Opcode::Return, last_line);

        for (name, node) in block_nodes {
            let Stmt::Block { body, lineno, .. } = node else {
                continue;
            };
            let lineno = *lineno;
            let id = self.new_body(None, ChunkKind::Block(name.to_string()));
            let mut frame = Frame::new(self.symbols.root(0, id), id);
            frame.block_frame = true;
            let undeclared = find_undeclared(body, &["self", "super"]);
            if undeclared.contains("self") {
                let ident = self.symbols.declare_parameter(frame.symbols, "self");
                let local = self.local_ref(id, &ident, lineno)?;
                self.emit(id, Opcode::MakeTemplateRef, lineno);
                self.emit(id, Opcode::StoreLocal(local), lineno);
            }
            if undeclared.contains("super") {
                let ident = self.symbols.declare_parameter(frame.symbols, "super");
                let local = self.local_ref(id, &ident, lineno)?;
                self.emit(id, Opcode::MakeSuper, lineno);
                self.emit(id, Opcode::StoreLocal(local), lineno);
            }
            self.symbols.analyze_body(frame.symbols, body);
            self.enter_frame(&frame, lineno)?;
            self.visit_body(body, &frame)?;
            self.emit(id, Opcode::Return, lineno);
            self.blocks.insert(name.to_string(), id as u32);
        }

        let mut module = CompiledTemplate::new(self.name.as_deref(), self.filename.as_deref());
        module.chunks = std::mem::take(&mut self.bodies)
            .into_iter()
            .map(|b| b.chunk)
            .collect();
        module.blocks = std::mem::take(&mut self.blocks);
        Ok(module)
    }

    // ----- chunk plumbing -------------------------------------------------

    fn new_body(&mut self, parent: Option<BodyId>, kind: ChunkKind) -> BodyId {
        self.bodies.push(Body {
            chunk: Chunk::new(kind),
            parent,
            slots: HashMap::new(),
            loops: Vec::new(),
            cleanups: Vec::new(),
        });
        self.bodies.len() - 1
    }

    fn emit(&mut self, body: BodyId, opcode: Opcode, line: u32) -> Label {
        self.bodies[body].chunk.emit(opcode, line)
    }

    /// Point the jump at `at` to the next instruction
    fn patch_here(&mut self, body: BodyId, at: Label) {
        let chunk = &mut self.bodies[body].chunk;
        let target = chunk.next_label();
        chunk.patch_jump(at, target);
    }

    fn load_const(&mut self, body: BodyId, value: &Value, line: u32) -> Result<()> {
        let constant = Constant::from_value(value).ok_or_else(|| {
            fail(
                format!("cannot compile a constant of type {}", value.type_name()),
                line,
            )
        })?;
        let idx = self.bodies[body].chunk.add_constant(constant);
        self.emit(body, Opcode::LoadConst(idx), line);
        Ok(())
    }

    fn emit_raw(&mut self, body: BodyId, text: String, line: u32) {
        let idx = self.bodies[body].chunk.add_constant(Constant::Str(text));
        self.emit(body, Opcode::EmitRaw(idx), line);
    }

    /// Slot address of `ident` seen from the function `from`
    fn local_ref(&mut self, from: BodyId, ident: &Ident, line: u32) -> Result<LocalRef> {
        let mut depth: u16 = 0;
        let mut body = from;
        while body != ident.body {
            body = self.bodies[body].parent.ok_or_else(|| {
                fail(
                    format!("variable {} is not reachable from this scope", repr_str(&ident.name)),
                    line,
                )
            })?;
            depth += 1;
        }
        let owner = &mut self.bodies[ident.body];
        let slot = match owner.slots.get(ident) {
            Some(slot) => *slot,
            None => {
                let slot = owner.chunk.add_slot(ident.to_string());
                owner.slots.insert(ident.clone(), slot);
                slot
            }
        };
        Ok(LocalRef { depth, slot })
    }

    fn escape_mode(&self) -> Escape {
        if self.eval_ctx.volatile {
            Escape::Runtime
        } else if self.eval_ctx.autoescape {
            Escape::On
        } else {
            Escape::Off
        }
    }

    fn position(&self, lineno: u32) -> String {
        match &self.name {
            Some(name) => format!("line {} in {}", lineno, repr_str(name)),
            None => format!("line {}", lineno),
        }
    }

    fn begin_capture(&mut self, body: BodyId, line: u32) {
        self.emit(body, Opcode::BeginCapture, line);
        self.bodies[body].cleanups.push(Cleanup::Capture);
    }

    fn end_capture(&mut self, body: BodyId, mode: Escape, line: u32) -> Result<()> {
        if self.bodies[body].cleanups.last() != Some(&Cleanup::Capture) {
            return Err(fail("filter without a value outside of a filter section", line));
        }
        self.bodies[body].cleanups.pop();
        self.emit(body, Opcode::EndCapture(mode), line);
        Ok(())
    }

    /// Close everything opened since `depth` without touching the
    /// compile-time cleanup stack
    fn emit_cleanups(&mut self, body: BodyId, depth: usize, line: u32) {
        let pending: Vec<Cleanup> = self.bodies[body].cleanups[depth..].to_vec();
        for cleanup in pending.into_iter().rev() {
            let op = match cleanup {
                Cleanup::Capture => Opcode::DiscardCapture,
                Cleanup::Autoescape => Opcode::PopAutoescape,
                Cleanup::Overlay => Opcode::PopOverlay,
            };
            self.emit(body, op, line);
        }
    }

    // ----- frames ---------------------------------------------------------

    fn inner_frame(&mut self, frame: &Frame, body: BodyId) -> Frame {
        Frame {
            require_output_check: frame.require_output_check,
            ..Frame::new(self.symbols.child(frame.symbols, body), body)
        }
    }

    fn loads_of(&self, frame: &Frame) -> Vec<(Ident, Load)> {
        self.symbols
            .get(frame.symbols)
            .loads()
            .map(|(ident, load)| (ident.clone(), load.clone()))
            .collect()
    }

    fn enter_frame(&mut self, frame: &Frame, line: u32) -> Result<()> {
        for (ident, load) in self.loads_of(frame) {
            let op = match load {
                Load::Parameter => continue,
                Load::Resolve(name) => {
                    let local = self.local_ref(frame.body, &ident, line)?;
                    self.resolved.insert(name.clone());
                    Opcode::ResolveLocal { local, name }
                }
                Load::Alias(outer) => Opcode::CopyLocal {
                    from: self.local_ref(frame.body, &outer, line)?,
                    to: self.local_ref(frame.body, &ident, line)?,
                },
                Load::Undefined => Opcode::ClearLocal(self.local_ref(frame.body, &ident, line)?),
            };
            self.emit(frame.body, op, line);
        }
        Ok(())
    }

    fn frame_clears(&mut self, frame: &Frame, line: u32) -> Result<Vec<LocalRef>> {
        self.loads_of(frame)
            .iter()
            .map(|(ident, _)| self.local_ref(frame.body, ident, line))
            .collect()
    }

    /// Unbind the frame's variables. Function bodies skip this since their
    /// scope ends with them.
    fn leave_frame(&mut self, frame: &Frame, function_scope: bool, line: u32) -> Result<()> {
        if function_scope {
            return Ok(());
        }
        for local in self.frame_clears(frame, line)? {
            self.emit(frame.body, Opcode::ClearLocal(local), line);
        }
        Ok(())
    }

    fn build_locals(&mut self, frame: &Frame, line: u32) -> Result<()> {
        let stores = self.symbols.dump_stores(frame.symbols);
        let mut locals = Vec::with_capacity(stores.len());
        for (name, ident) in stores {
            locals.push((name, self.local_ref(frame.body, &ident, line)?));
        }
        self.emit(frame.body, Opcode::BuildLocals(locals), line);
        Ok(())
    }

    /// None when the output can never be rendered, otherwise the jump that
    /// skips it once a parent template is set
    fn output_guard(&mut self, frame: &Frame, line: u32) -> Option<Option<Label>> {
        if !frame.require_output_check {
            return Some(None);
        }
        if self.has_known_extends {
            return None;
        }
        if self.extends_so_far > 0 {
            return Some(Some(self.emit(frame.body, Opcode::JumpIfParentSet(0), line)));
        }
        Some(None)
    }

    fn close_guard(&mut self, frame: &Frame, guard: Option<Label>) {
        if let Some(at) = guard {
            self.patch_here(frame.body, at);
        }
    }

    /// Remember the first output of the template root so a later
    /// `extends` can be rejected
    fn note_output(&mut self, frame: &Frame, line: u32) {
        if frame.body == 0
            && self.extends_so_far == 0
            && self.first_output.is_none()
            && !self.bodies[0].cleanups.contains(&Cleanup::Capture)
        {
            self.first_output = Some(line);
        }
    }

    // ----- statements -----------------------------------------------------

    fn visit_body(&mut self, body: &[Stmt], frame: &Frame) -> Result<()> {
        for stmt in body {
            if let Flow::Exit = self.visit_stmt(stmt, frame)? {
                break;
            }
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt, frame: &Frame) -> Result<Flow> {
        match stmt {
            Stmt::Output { nodes, lineno } => self.visit_output(nodes, *lineno, frame)?,
            Stmt::Extends { template, lineno } => return self.visit_extends(template, *lineno, frame),
            Stmt::For { .. } => self.visit_for(stmt, frame)?,
            Stmt::If(node) => self.visit_if(node, frame)?,
            Stmt::Macro {
                name,
                args,
                defaults,
                body,
                lineno,
            } => {
                let id = self.function_body(name, false, args, defaults, body, frame, *lineno)?;
                self.emit(frame.body, Opcode::MakeClosure(id as u32), *lineno);
                let ident = self.symbols.reference(frame.symbols, name, *lineno)?;
                let local = self.local_ref(frame.body, &ident, *lineno)?;
                self.emit(frame.body, Opcode::StoreLocal(local), *lineno);
                if frame.toplevel {
                    self.emit(
                        frame.body,
                        Opcode::StoreContextVar {
                            name: name.clone(),
                            local,
                        },
                        *lineno,
                    );
                    if !name.starts_with('_') {
                        self.emit(frame.body, Opcode::Export(name.clone()), *lineno);
                    }
                }
            }
            Stmt::CallBlock {
                call,
                args,
                defaults,
                body,
                lineno,
            } => {
                let Some(guard) = self.output_guard(frame, *lineno) else {
                    return Ok(Flow::Continue);
                };
                let Expr::Call {
                    node,
                    args: call_args,
                    lineno: call_line,
                } = call
                else {
                    return Err(fail("expected a call expression in a call block", *lineno));
                };
                let id = self.function_body("caller", true, args, defaults, body, frame, *lineno)?;
                self.visit_call(node, call_args, frame, *call_line, Some(id))?;
                self.emit(frame.body, Opcode::Emit(Escape::Off), *lineno);
                self.close_guard(frame, guard);
                self.note_output(frame, *lineno);
            }
            Stmt::FilterBlock { filter, body, lineno } => {
                let Some(guard) = self.output_guard(frame, *lineno) else {
                    return Ok(Flow::Continue);
                };
                let filter_frame = self.inner_frame(frame, frame.body);
                self.symbols.analyze_filter_block(filter_frame.symbols, filter, body);
                self.enter_frame(&filter_frame, *lineno)?;
                self.begin_capture(frame.body, *lineno);
                self.visit_body(body, &filter_frame)?;
                self.visit_expr(filter, &filter_frame)?;
                self.emit(frame.body, Opcode::Emit(Escape::Off), *lineno);
                self.leave_frame(&filter_frame, false, *lineno)?;
                self.close_guard(frame, guard);
                self.note_output(frame, *lineno);
            }
            Stmt::With {
                targets,
                values,
                body,
                lineno,
            } => {
                let with_frame = self.inner_frame(frame, frame.body);
                self.symbols.analyze_with(with_frame.symbols, targets, body);
                self.enter_frame(&with_frame, *lineno)?;
                for (target, value) in targets.iter().zip(values) {
                    self.visit_expr(value, frame)?;
                    self.store_target(target, &with_frame)?;
                }
                self.visit_body(body, &with_frame)?;
                self.leave_frame(&with_frame, false, *lineno)?;
            }
            Stmt::Block {
                name,
                scoped,
                required,
                lineno,
                ..
            } => {
                let mut guard = None;
                if frame.toplevel {
                    if self.has_known_extends {
                        return Ok(Flow::Continue);
                    }
                    if self.extends_so_far > 0 {
                        guard = Some(self.emit(frame.body, Opcode::JumpIfParentSet(0), *lineno));
                    }
                }
                if *scoped {
                    self.build_locals(frame, *lineno)?;
                }
                self.emit(
                    frame.body,
                    Opcode::RenderBlock {
                        name: name.clone(),
                        scoped: *scoped,
                        required: *required,
                    },
                    *lineno,
                );
                self.close_guard(frame, guard);
                self.note_output(frame, *lineno);
            }
            Stmt::Include {
                template,
                with_context,
                ignore_missing,
                lineno,
            } => {
                let Some(guard) = self.output_guard(frame, *lineno) else {
                    return Ok(Flow::Continue);
                };
                self.visit_expr(template, frame)?;
                if *with_context {
                    self.build_locals(frame, *lineno)?;
                }
                self.emit(
                    frame.body,
                    Opcode::Include {
                        with_context: *with_context,
                        ignore_missing: *ignore_missing,
                    },
                    *lineno,
                );
                self.close_guard(frame, guard);
                self.note_output(frame, *lineno);
            }
            Stmt::Import {
                template,
                target,
                with_context,
                lineno,
            } => {
                self.import_module(template, *with_context, frame, *lineno)?;
                let ident = self.symbols.reference(frame.symbols, target, *lineno)?;
                let local = self.local_ref(frame.body, &ident, *lineno)?;
                self.emit(frame.body, Opcode::StoreLocal(local), *lineno);
                if frame.toplevel {
                    self.publish_import(target, local, frame, *lineno);
                }
            }
            Stmt::FromImport {
                template,
                names,
                with_context,
                lineno,
            } => {
                self.import_module(template, *with_context, frame, *lineno)?;
                let position = self.position(*lineno);
                let mut bound = Vec::with_capacity(names.len());
                for (name, alias) in names {
                    let alias = alias.as_deref().unwrap_or(name);
                    let ident = self.symbols.reference(frame.symbols, alias, *lineno)?;
                    let local = self.local_ref(frame.body, &ident, *lineno)?;
                    self.emit(frame.body, Opcode::Dup, *lineno);
                    self.emit(
                        frame.body,
                        Opcode::ImportName {
                            name: name.clone(),
                            position: position.clone(),
                        },
                        *lineno,
                    );
                    self.emit(frame.body, Opcode::StoreLocal(local), *lineno);
                    bound.push((alias, local));
                }
                self.emit(frame.body, Opcode::Pop, *lineno);
                if frame.toplevel {
                    for (alias, local) in bound {
                        self.publish_import(alias, local, frame, *lineno);
                    }
                }
            }
            Stmt::ExprStmt { node, lineno } => {
                self.visit_expr(node, frame)?;
                self.emit(frame.body, Opcode::Pop, *lineno);
            }
            Stmt::Assign { target, node, lineno } => {
                self.assign_stack.push(BTreeSet::new());
                self.visit_expr(node, frame)?;
                self.store_target(target, frame)?;
                self.pop_assign_tracking(frame, *lineno)?;
            }
            Stmt::AssignBlock {
                target,
                filter,
                body,
                lineno,
            } => {
                self.assign_stack.push(BTreeSet::new());
                let mut block_frame = self.inner_frame(frame, frame.body);
                block_frame.require_output_check = false;
                self.symbols.analyze_body(block_frame.symbols, body);
                self.enter_frame(&block_frame, *lineno)?;
                self.begin_capture(frame.body, *lineno);
                self.visit_body(body, &block_frame)?;
                let mode = self.escape_mode();
                match filter {
                    Some(filter) => {
                        self.visit_expr(filter, &block_frame)?;
                        self.emit(frame.body, Opcode::MarkSafeIfAutoescape(mode), *lineno);
                    }
                    None => self.end_capture(frame.body, mode, *lineno)?,
                }
                self.store_target(target, frame)?;
                self.pop_assign_tracking(frame, *lineno)?;
                self.leave_frame(&block_frame, false, *lineno)?;
            }
            Stmt::Break { lineno } => {
                let body = frame.body;
                let Some(labels) = self.bodies[body].loops.last() else {
                    return Err(fail("'break' outside of a loop", *lineno));
                };
                let depth = labels.cleanup_depth;
                let clears = labels.clears.clone();
                self.emit_cleanups(body, depth, *lineno);
                self.emit(body, Opcode::Pop, *lineno);
                for local in clears {
                    self.emit(body, Opcode::ClearLocal(local), *lineno);
                }
                let jump = self.emit(body, Opcode::Jump(0), *lineno);
                if let Some(labels) = self.bodies[body].loops.last_mut() {
                    labels.breaks.push(jump);
                }
            }
            Stmt::Continue { lineno } => {
                let body = frame.body;
                let Some(labels) = self.bodies[body].loops.last() else {
                    return Err(fail("'continue' outside of a loop", *lineno));
                };
                let (depth, head) = (labels.cleanup_depth, labels.head);
                self.emit_cleanups(body, depth, *lineno);
                self.emit(body, Opcode::Jump(head), *lineno);
            }
            Stmt::Scope { body, lineno } => {
                let scope_frame = self.inner_frame(frame, frame.body);
                self.symbols.analyze_body(scope_frame.symbols, body);
                self.enter_frame(&scope_frame, *lineno)?;
                self.visit_body(body, &scope_frame)?;
                self.leave_frame(&scope_frame, false, *lineno)?;
            }
            Stmt::OverlayScope { context, body, lineno } => {
                self.build_locals(frame, *lineno)?;
                self.visit_expr(context, frame)?;
                self.emit(frame.body, Opcode::PushOverlay, *lineno);
                self.bodies[frame.body].cleanups.push(Cleanup::Overlay);
                let level = self.symbols.get(frame.symbols).level + 1;
                let scope_frame = Frame {
                    require_output_check: frame.require_output_check,
                    ..Frame::new(self.symbols.root(level, frame.body), frame.body)
                };
                self.symbols.analyze_body(scope_frame.symbols, body);
                self.enter_frame(&scope_frame, *lineno)?;
                self.visit_body(body, &scope_frame)?;
                self.leave_frame(&scope_frame, false, *lineno)?;
                self.emit(frame.body, Opcode::PopOverlay, *lineno);
                self.bodies[frame.body].cleanups.pop();
            }
            Stmt::EvalContextModifier { options, lineno } => {
                self.modify_eval_ctx(options, frame, *lineno, false)?;
            }
            Stmt::ScopedEvalContextModifier {
                options,
                body,
                lineno,
            } => {
                let saved = self.eval_ctx;
                let pushed = self.modify_eval_ctx(options, frame, *lineno, true)?;
                self.visit_body(body, frame)?;
                self.eval_ctx = saved;
                for _ in 0..pushed {
                    self.emit(frame.body, Opcode::PopAutoescape, *lineno);
                    self.bodies[frame.body].cleanups.pop();
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn visit_output(&mut self, nodes: &[Expr], lineno: u32, frame: &Frame) -> Result<()> {
        let Some(guard) = self.output_guard(frame, lineno) else {
            return Ok(());
        };
        let mode = self.escape_mode();
        let mut pending = String::new();
        let mut pending_line = lineno;
        let mut trivial = true;
        for node in nodes {
            match self.output_const(node) {
                Some(text) => {
                    if pending.is_empty() {
                        pending_line = node.lineno();
                    }
                    if !text.trim().is_empty() {
                        trivial = false;
                    }
                    pending.push_str(&text);
                }
                None => {
                    if !pending.is_empty() {
                        self.emit_raw(frame.body, std::mem::take(&mut pending), pending_line);
                    }
                    trivial = false;
                    self.visit_expr(node, frame)?;
                    if self.env.has_finalize() {
                        self.emit(frame.body, Opcode::Finalize, node.lineno());
                    }
                    self.emit(frame.body, Opcode::Emit(mode), node.lineno());
                }
            }
        }
        if !pending.is_empty() {
            self.emit_raw(frame.body, pending, pending_line);
        }
        self.close_guard(frame, guard);
        if !trivial {
            self.note_output(frame, lineno);
        }
        Ok(())
    }

    /// Rendered text of an output node known at compile time
    fn output_const(&self, node: &Expr) -> Option<String> {
        if let Expr::TemplateData { data, .. } = node {
            return Some(data.clone());
        }
        if self.eval_ctx.volatile {
            return None;
        }
        let value = as_const(node, self.env, &self.eval_ctx).ok()?;
        let value = self.env.finalize_constant(&value, &self.eval_ctx)?;
        let value = if self.eval_ctx.autoescape {
            markup::escape(&value).ok()?
        } else {
            value
        };
        ops::to_string(&value).ok()
    }

    fn visit_extends(&mut self, template: &Expr, lineno: u32, frame: &Frame) -> Result<Flow> {
        if !frame.toplevel {
            return Err(fail("cannot use extend from a non top-level scope", lineno));
        }
        if let Some(line) = self.first_output {
            return Err(fail(
                format!("cannot use extends after output on line {}", line),
                lineno,
            ));
        }
        if self.extends_so_far > 0 && self.has_known_extends {
            // A second unconditional extends only fails at runtime.
            self.visit_expr(template, frame)?;
            self.emit(frame.body, Opcode::Extends, lineno);
            return Ok(Flow::Exit);
        }
        self.visit_expr(template, frame)?;
        self.emit(frame.body, Opcode::Extends, lineno);
        if frame.rootlevel {
            self.has_known_extends = true;
        }
        self.extends_so_far += 1;
        Ok(Flow::Continue)
    }

    fn visit_if(&mut self, node: &If, frame: &Frame) -> Result<()> {
        let soft = frame.soft();
        let body = frame.body;
        self.visit_expr(&node.test, &soft)?;
        let mut next = self.emit(body, Opcode::JumpIfFalse(0), node.lineno);
        self.visit_body(&node.body, &soft)?;
        let mut ends = Vec::new();
        for elif in &node.elif_ {
            ends.push(self.emit(body, Opcode::Jump(0), elif.lineno));
            self.patch_here(body, next);
            self.visit_expr(&elif.test, &soft)?;
            next = self.emit(body, Opcode::JumpIfFalse(0), elif.lineno);
            self.visit_body(&elif.body, &soft)?;
        }
        if !node.else_.is_empty() {
            ends.push(self.emit(body, Opcode::Jump(0), node.lineno));
            self.patch_here(body, next);
            self.visit_body(&node.else_, &soft)?;
        } else {
            self.patch_here(body, next);
        }
        for end in ends {
            self.patch_here(body, end);
        }
        Ok(())
    }

    fn visit_for(&mut self, stmt: &Stmt, frame: &Frame) -> Result<()> {
        let Stmt::For {
            target,
            iter,
            body,
            else_,
            test,
            recursive,
            lineno,
        } = stmt
        else {
            return Ok(());
        };
        let lineno = *lineno;
        let assigns_loop = find_all(std::slice::from_ref(stmt), |e| {
            matches!(e, Expr::Name { name, ctx: NameCtx::Store, .. } if name == "loop")
        });
        if !assigns_loop.is_empty() {
            return Err(fail(
                "Can't assign to special loop variable in for-loop target",
                lineno,
            ));
        }

        let lb = if *recursive {
            self.new_body(Some(frame.body), ChunkKind::Loop { iter_slot: 0 })
        } else {
            frame.body
        };
        let mut loop_frame = self.inner_frame(frame, lb);
        loop_frame.loop_frame = true;
        let test_frame = self.inner_frame(frame, lb);
        let else_frame = self.inner_frame(frame, lb);

        let extended = *recursive
            || find_undeclared(body, &["loop"]).contains("loop")
            || find_all_stmts(std::slice::from_ref(stmt), &|s| {
                matches!(s, Stmt::Block { scoped: true, .. })
            })
            .into_iter()
            .next()
            .is_some();
        let loop_ident = extended.then(|| self.symbols.declare_parameter(loop_frame.symbols, "loop"));
        self.symbols.analyze_for(loop_frame.symbols, stmt, ForBranch::Body);
        if !else_.is_empty() {
            self.symbols.analyze_for(else_frame.symbols, stmt, ForBranch::Else);
        }
        if test.is_some() {
            self.symbols.analyze_for(test_frame.symbols, stmt, ForBranch::Test);
        }

        if *recursive {
            let iter_slot = self.bodies[lb].chunk.add_slot("reciter");
            self.bodies[lb].chunk.kind = ChunkKind::Loop { iter_slot };
            self.begin_capture(lb, lineno);
            self.emit(lb, Opcode::LoadLocal(LocalRef::local(iter_slot)), lineno);
        } else {
            self.visit_expr(iter, frame)?;
        }

        if let Some(test) = test {
            self.enter_frame(&test_frame, lineno)?;
            self.emit(lb, Opcode::StartFilter, lineno);
            let next = self.emit(lb, Opcode::FilterNext(0), lineno);
            self.emit(lb, Opcode::Dup, lineno);
            self.store_target(target, &test_frame)?;
            self.visit_expr(test, &test_frame)?;
            self.emit(lb, Opcode::FilterKeep, lineno);
            self.emit(lb, Opcode::Jump(next), lineno);
            self.patch_here(lb, next);
            self.leave_frame(&test_frame, true, lineno)?;
        }

        self.emit(lb, Opcode::PushLoop { recursive: *recursive }, lineno);
        if let Some(ident) = &loop_ident {
            let local = self.local_ref(lb, ident, lineno)?;
            self.emit(lb, Opcode::Dup, lineno);
            self.emit(lb, Opcode::StoreLocal(local), lineno);
        }
        let head = self.emit(lb, Opcode::Iterate(0), lineno);
        self.store_target(target, &loop_frame)?;
        self.enter_frame(&loop_frame, lineno)?;

        let function_scope = *recursive && else_.is_empty();
        let clears = if function_scope {
            Vec::new()
        } else {
            self.frame_clears(&loop_frame, lineno)?
        };
        let cleanup_depth = self.bodies[lb].cleanups.len();
        self.bodies[lb].loops.push(LoopLabels {
            head,
            breaks: Vec::new(),
            cleanup_depth,
            clears,
        });
        self.visit_body(body, &loop_frame)?;
        self.emit(lb, Opcode::Jump(head), lineno);
        let labels = self.bodies[lb].loops.pop();

        self.patch_here(lb, head);
        if else_.is_empty() {
            self.emit(lb, Opcode::Pop, lineno);
        } else {
            self.emit(lb, Opcode::LoopWasEmpty, lineno);
        }
        self.leave_frame(&loop_frame, function_scope, lineno)?;
        if !else_.is_empty() {
            let skip = self.emit(lb, Opcode::JumpIfFalse(0), lineno);
            self.enter_frame(&else_frame, lineno)?;
            self.visit_body(else_, &else_frame)?;
            self.leave_frame(&else_frame, false, lineno)?;
            self.patch_here(lb, skip);
        }
        for jump in labels.map(|l| l.breaks).unwrap_or_default() {
            self.patch_here(lb, jump);
        }

        if let Some(top) = self.assign_stack.last_mut() {
            for name in self.symbols.get(loop_frame.symbols).stores() {
                top.remove(name);
            }
        }

        if *recursive {
            let mode = self.escape_mode();
            self.end_capture(lb, mode, lineno)?;
            self.emit(lb, Opcode::ReturnValue, lineno);
            self.emit(frame.body, Opcode::MakeClosure(lb as u32), lineno);
            self.visit_expr(iter, frame)?;
            self.emit(frame.body, Opcode::Call(CallShape::positional(1)), lineno);
            self.emit(frame.body, Opcode::Emit(Escape::Off), lineno);
            self.note_output(frame, lineno);
        }
        Ok(())
    }

    /// Generate the chunk of a macro or of a call block's `caller`
    #[allow(clippy::too_many_arguments)]
    fn function_body(
        &mut self,
        name: &str,
        call_block: bool,
        args: &[String],
        defaults: &[Expr],
        body: &[Stmt],
        frame: &Frame,
        lineno: u32,
    ) -> Result<BodyId> {
        let id = self.new_body(Some(frame.body), ChunkKind::Root);
        let mut fn_frame = self.inner_frame(frame, id);
        self.symbols.analyze_macro(fn_frame.symbols, args, defaults, body);

        let mut params = Vec::with_capacity(args.len() + 3);
        for arg in args {
            params.push(self.symbols.reference(fn_frame.symbols, arg, lineno)?);
        }
        let first_default = args.len().saturating_sub(defaults.len());
        let undeclared = find_undeclared(body, &["caller", "kwargs", "varargs"]);
        let mut caller = false;
        if undeclared.contains("caller") {
            match args.iter().position(|a| a == "caller") {
                Some(idx) if idx < first_default => {
                    return Err(fail(
                        "When defining macros or call blocks the special 'caller' argument must be omitted or be given a default.",
                        lineno,
                    ));
                }
                Some(_) => {}
                None => params.push(self.symbols.declare_parameter(fn_frame.symbols, "caller")),
            }
            caller = true;
        }
        let catch_kwargs = undeclared.contains("kwargs") && !args.iter().any(|a| a == "kwargs");
        if catch_kwargs {
            params.push(self.symbols.declare_parameter(fn_frame.symbols, "kwargs"));
        }
        let catch_varargs = undeclared.contains("varargs") && !args.iter().any(|a| a == "varargs");
        if catch_varargs {
            params.push(self.symbols.declare_parameter(fn_frame.symbols, "varargs"));
        }
        fn_frame.require_output_check = false;

        let mut param_slots = Vec::with_capacity(params.len());
        for ident in &params {
            param_slots.push(self.local_ref(id, ident, lineno)?.slot);
        }
        let signature = MacroSignature {
            name: name.to_string(),
            arguments: args.to_vec(),
            param_slots,
            catch_kwargs,
            catch_varargs,
            caller,
        };
        self.bodies[id].chunk.kind = if call_block {
            ChunkKind::CallBlock(signature)
        } else {
            ChunkKind::Macro(signature)
        };

        self.begin_capture(id, lineno);
        self.enter_frame(&fn_frame, lineno)?;
        self.param_def_block.push(self.symbols.param_targets(fn_frame.symbols));
        for (idx, arg) in args.iter().enumerate() {
            let ident = &params[idx];
            let local = self.local_ref(id, ident, lineno)?;
            let skip = self.emit(id, Opcode::JumpIfBound { local, target: 0 }, lineno);
            match idx.checked_sub(first_default).and_then(|i| defaults.get(i)) {
                Some(default) => self.visit_expr(default, &fn_frame)?,
                None => {
                    self.emit(
                        id,
                        Opcode::LoadUndefined {
                            name: Some(arg.clone()),
                            hint: Some(format!("parameter {} was not provided", repr_str(arg))),
                        },
                        lineno,
                    );
                }
            }
            self.emit(id, Opcode::StoreLocal(local), lineno);
            self.patch_here(id, skip);
            if let Some(pending) = self.param_def_block.last_mut() {
                pending.remove(ident);
            }
        }
        self.param_def_block.pop();
        self.visit_body(body, &fn_frame)?;
        self.end_capture(id, Escape::Off, lineno)?;
        self.emit(id, Opcode::ReturnValue, lineno);
        Ok(id)
    }

    fn import_module(&mut self, template: &Expr, with_context: bool, frame: &Frame, lineno: u32) -> Result<()> {
        self.visit_expr(template, frame)?;
        if with_context {
            self.build_locals(frame, lineno)?;
        }
        self.emit(frame.body, Opcode::Import { with_context }, lineno);
        Ok(())
    }

    fn publish_import(&mut self, name: &str, local: LocalRef, frame: &Frame, lineno: u32) {
        self.emit(
            frame.body,
            Opcode::StoreContextVar {
                name: name.to_string(),
                local,
            },
            lineno,
        );
        if !name.starts_with('_') {
            self.emit(frame.body, Opcode::Unexport(name.to_string()), lineno);
        }
    }

    /// Emit autoescape switches and track them at compile time. Returns the
    /// number of runtime pushes.
    fn modify_eval_ctx(&mut self, options: &[Keyword], frame: &Frame, lineno: u32, scoped: bool) -> Result<usize> {
        let mut pushed = 0;
        for keyword in options.iter().filter(|k| k.key == "autoescape") {
            self.visit_expr(&keyword.value, frame)?;
            self.emit(frame.body, Opcode::PushAutoescape, lineno);
            if scoped {
                self.bodies[frame.body].cleanups.push(Cleanup::Autoescape);
            }
            pushed += 1;
            match as_const(&keyword.value, self.env, &self.eval_ctx) {
                Ok(value) => self.eval_ctx.autoescape = value.is_true(),
                Err(_) => self.eval_ctx.volatile = true,
            }
        }
        Ok(pushed)
    }

    fn store_target(&mut self, target: &Expr, frame: &Frame) -> Result<()> {
        match target {
            Expr::Name { name, lineno, .. } => {
                if frame.toplevel || frame.loop_frame || frame.block_frame {
                    if let Some(top) = self.assign_stack.last_mut() {
                        top.insert(name.clone());
                    }
                }
                let ident = self.symbols.reference(frame.symbols, name, *lineno)?;
                let local = self.local_ref(frame.body, &ident, *lineno)?;
                self.emit(frame.body, Opcode::StoreLocal(local), *lineno);
            }
            Expr::Tuple { items, lineno, .. } => {
                let n = count(items.len(), *lineno)?;
                self.emit(frame.body, Opcode::UnpackSequence(n), *lineno);
                for item in items {
                    self.store_target(item, frame)?;
                }
            }
            Expr::NSRef { name, attr, lineno } => {
                let ident = self.symbols.reference(frame.symbols, name, *lineno)?;
                let local = self.local_ref(frame.body, &ident, *lineno)?;
                self.emit(
                    frame.body,
                    Opcode::LoadName {
                        local,
                        name: name.clone(),
                    },
                    *lineno,
                );
                self.emit(frame.body, Opcode::SetNamespaceAttr(attr.clone()), *lineno);
            }
            other => {
                return Err(fail(
                    format!("can't assign to {}", other.type_name()),
                    other.lineno(),
                ))
            }
        }
        Ok(())
    }

    /// Publish the names assigned by the statement that just finished when
    /// it ran at template level
    fn pop_assign_tracking(&mut self, frame: &Frame, lineno: u32) -> Result<()> {
        let names = self.assign_stack.pop().unwrap_or_default();
        if !frame.toplevel || frame.loop_frame || frame.block_frame || names.is_empty() {
            return Ok(());
        }
        for name in &names {
            let ident = self.symbols.reference(frame.symbols, name, lineno)?;
            let local = self.local_ref(frame.body, &ident, lineno)?;
            self.emit(
                frame.body,
                Opcode::StoreContextVar {
                    name: name.clone(),
                    local,
                },
                lineno,
            );
        }
        for name in names.into_iter().filter(|n| !n.starts_with('_')) {
            self.emit(frame.body, Opcode::Export(name), lineno);
        }
        Ok(())
    }

    // ----- expressions ----------------------------------------------------

    fn visit_expr(&mut self, expr: &Expr, frame: &Frame) -> Result<()> {
        let body = frame.body;
        match expr {
            Expr::Name { name, lineno, .. } => self.load_name(name, frame, *lineno)?,
            Expr::NSRef { lineno, .. } => {
                return Err(fail("namespace references can only be assigned to", *lineno));
            }
            Expr::Const { value, lineno } => self.load_const(body, value, *lineno)?,
            Expr::TemplateData { data, lineno } => {
                let idx = self.bodies[body].chunk.add_constant(Constant::Str(data.clone()));
                self.emit(body, Opcode::LoadConst(idx), *lineno);
                let mode = self.escape_mode();
                self.emit(body, Opcode::MarkSafeIfAutoescape(mode), *lineno);
            }
            Expr::Tuple { items, lineno, .. } => {
                self.visit_all(items, frame)?;
                let n = count(items.len(), *lineno)?;
                self.emit(body, Opcode::BuildTuple(n), *lineno);
            }
            Expr::List { items, lineno } => {
                self.visit_all(items, frame)?;
                let n = count(items.len(), *lineno)?;
                self.emit(body, Opcode::BuildList(n), *lineno);
            }
            Expr::Dict { items, lineno } => {
                for pair in items {
                    self.visit_expr(&pair.key, frame)?;
                    self.visit_expr(&pair.value, frame)?;
                }
                let n = count(items.len(), *lineno)?;
                self.emit(body, Opcode::BuildMap(n), *lineno);
            }
            Expr::CondExpr {
                test,
                expr1,
                expr2,
                lineno,
            } => {
                let soft = frame.soft();
                self.visit_expr(test, &soft)?;
                let otherwise = self.emit(body, Opcode::JumpIfFalse(0), *lineno);
                self.visit_expr(expr1, &soft)?;
                let end = self.emit(body, Opcode::Jump(0), *lineno);
                self.patch_here(body, otherwise);
                match expr2 {
                    Some(expr2) => self.visit_expr(expr2, &soft)?,
                    None => {
                        let hint = format!(
                            "the inline if-expression on {} evaluated to false and no else section was defined.",
                            self.position(*lineno)
                        );
                        self.emit(
                            body,
                            Opcode::LoadUndefined {
                                name: None,
                                hint: Some(hint),
                            },
                            *lineno,
                        );
                    }
                }
                self.patch_here(body, end);
            }
            Expr::BinOp {
                op,
                left,
                right,
                lineno,
            } => {
                self.visit_expr(left, frame)?;
                self.visit_expr(right, frame)?;
                self.emit(body, Opcode::BinaryOp(*op), *lineno);
            }
            Expr::And { left, right, lineno } => {
                self.visit_expr(left, frame)?;
                let end = self.emit(body, Opcode::JumpIfFalseOrPop(0), *lineno);
                self.visit_expr(right, frame)?;
                self.patch_here(body, end);
            }
            Expr::Or { left, right, lineno } => {
                self.visit_expr(left, frame)?;
                let end = self.emit(body, Opcode::JumpIfTrueOrPop(0), *lineno);
                self.visit_expr(right, frame)?;
                self.patch_here(body, end);
            }
            Expr::Unary { op, node, lineno } => {
                self.visit_expr(node, frame)?;
                self.emit(body, Opcode::UnaryOp(*op), *lineno);
            }
            Expr::Compare { expr, ops, lineno } => {
                self.visit_expr(expr, frame)?;
                let mut short_circuits = Vec::new();
                for (i, operand) in ops.iter().enumerate() {
                    self.visit_expr(&operand.expr, frame)?;
                    if i + 1 < ops.len() {
                        self.emit(body, Opcode::CompareChain(operand.op), *lineno);
                        short_circuits.push(self.emit(body, Opcode::JumpIfFalseOrPop(0), *lineno));
                    } else {
                        self.emit(body, Opcode::Compare(operand.op), *lineno);
                    }
                }
                if !short_circuits.is_empty() {
                    let end = self.emit(body, Opcode::Jump(0), *lineno);
                    for at in short_circuits {
                        self.patch_here(body, at);
                    }
                    // drop the operand left below the false result
                    self.emit(body, Opcode::Swap, *lineno);
                    self.emit(body, Opcode::Pop, *lineno);
                    self.patch_here(body, end);
                }
            }
            Expr::Concat { nodes, lineno } => {
                self.visit_all(nodes, frame)?;
                let n = count(nodes.len(), *lineno)?;
                let mode = self.escape_mode();
                self.emit(body, Opcode::Concat(n, mode), *lineno);
            }
            Expr::Getattr { node, attr, lineno } => {
                self.visit_expr(node, frame)?;
                self.emit(body, Opcode::GetAttr(attr.clone()), *lineno);
            }
            Expr::Getitem { node, arg, lineno } => {
                self.visit_expr(node, frame)?;
                match arg.as_ref() {
                    Expr::Slice {
                        start, stop, step, ..
                    } => {
                        for bound in [start, stop, step] {
                            match bound {
                                Some(bound) => self.visit_expr(bound, frame)?,
                                None => self.load_const(body, &Value::None, *lineno)?,
                            }
                        }
                        self.emit(body, Opcode::Slice, *lineno);
                    }
                    other => {
                        self.visit_expr(other, frame)?;
                        self.emit(body, Opcode::GetItem, *lineno);
                    }
                }
            }
            Expr::Slice { lineno, .. } => {
                return Err(fail("slices are only valid inside a subscript", *lineno));
            }
            Expr::Call { node, args, lineno } => self.visit_call(node, args, frame, *lineno, None)?,
            Expr::Filter {
                node,
                name,
                args,
                lineno,
            } => {
                if !frame.soft_frame && !self.env.has_filter(name) {
                    return Err(fail(format!("No filter named {}.", repr_str(name)), *lineno));
                }
                match node {
                    Some(node) => self.visit_expr(node, frame)?,
                    None => {
                        let mode = self.escape_mode();
                        self.end_capture(body, mode, *lineno)?;
                    }
                }
                let shape = self.visit_args(args, frame, None, *lineno)?;
                self.emit(
                    body,
                    Opcode::CallFilter {
                        name: name.clone(),
                        shape,
                    },
                    *lineno,
                );
            }
            Expr::Test {
                node,
                name,
                args,
                lineno,
            } => {
                if !frame.soft_frame && !self.env.has_test(name) {
                    return Err(fail(format!("No test named {}.", repr_str(name)), *lineno));
                }
                self.visit_expr(node, frame)?;
                let shape = self.visit_args(args, frame, None, *lineno)?;
                self.emit(
                    body,
                    Opcode::CallTest {
                        name: name.clone(),
                        shape,
                    },
                    *lineno,
                );
            }
            Expr::MarkSafe { expr, lineno } => {
                self.visit_expr(expr, frame)?;
                self.emit(body, Opcode::MarkSafe, *lineno);
            }
            Expr::MarkSafeIfAutoescape { expr, lineno } => {
                self.visit_expr(expr, frame)?;
                let mode = self.escape_mode();
                self.emit(body, Opcode::MarkSafeIfAutoescape(mode), *lineno);
            }
            Expr::ExtensionAttribute {
                identifier,
                name,
                lineno,
            } => {
                self.emit(
                    body,
                    Opcode::ExtensionAttribute {
                        extension: identifier.clone(),
                        name: name.clone(),
                    },
                    *lineno,
                );
            }
        }
        Ok(())
    }

    fn visit_all(&mut self, exprs: &[Expr], frame: &Frame) -> Result<()> {
        for expr in exprs {
            self.visit_expr(expr, frame)?;
        }
        Ok(())
    }

    fn load_name(&mut self, name: &str, frame: &Frame, lineno: u32) -> Result<()> {
        let ident = self.symbols.reference(frame.symbols, name, lineno)?;
        let local = self.local_ref(frame.body, &ident, lineno)?;
        let bound = ident.body == frame.body
            && matches!(self.symbols.find_load(frame.symbols, &ident), Some(Load::Parameter))
            && !self
                .param_def_block
                .last()
                .map_or(false, |pending| pending.contains(&ident));
        let op = if bound {
            Opcode::LoadLocal(local)
        } else {
            Opcode::LoadName {
                local,
                name: name.to_string(),
            }
        };
        self.emit(frame.body, op, lineno);
        Ok(())
    }

    fn visit_call(
        &mut self,
        node: &Expr,
        args: &CallArgs,
        frame: &Frame,
        lineno: u32,
        caller: Option<BodyId>,
    ) -> Result<()> {
        if let Expr::Getattr { node: receiver, attr, .. } = node {
            self.visit_expr(receiver, frame)?;
            let shape = self.visit_args(args, frame, caller, lineno)?;
            self.emit(
                frame.body,
                Opcode::CallMethod {
                    name: attr.clone(),
                    shape,
                },
                lineno,
            );
        } else {
            self.visit_expr(node, frame)?;
            let shape = self.visit_args(args, frame, caller, lineno)?;
            self.emit(frame.body, Opcode::Call(shape), lineno);
        }
        Ok(())
    }

    fn visit_args(
        &mut self,
        args: &CallArgs,
        frame: &Frame,
        caller: Option<BodyId>,
        lineno: u32,
    ) -> Result<CallShape> {
        self.visit_all(&args.args, frame)?;
        let mut kwargs = Vec::with_capacity(args.kwargs.len() + 1);
        for keyword in &args.kwargs {
            self.visit_expr(&keyword.value, frame)?;
            kwargs.push(keyword.key.clone());
        }
        if let Some(caller) = caller {
            self.emit(frame.body, Opcode::MakeClosure(caller as u32), lineno);
            kwargs.push("caller".to_string());
        }
        if let Some(dyn_args) = &args.dyn_args {
            self.visit_expr(dyn_args, frame)?;
        }
        if let Some(dyn_kwargs) = &args.dyn_kwargs {
            self.visit_expr(dyn_kwargs, frame)?;
        }
        Ok(CallShape {
            args: count(args.args.len(), lineno)?,
            kwargs,
            dyn_args: args.dyn_args.is_some(),
            dyn_kwargs: args.dyn_kwargs.is_some(),
        })
    }
}

fn fail(message: impl Into<String>, line: u32) -> TemplateError {
    TemplateError::compile(message, line)
}

fn count(n: usize, line: u32) -> Result<u16> {
    u16::try_from(n).map_err(|_| fail("too many items in a single expression", line))
}

/// Generate the compiled module of a parsed template
pub fn generate(
    template: &Template,
    env: &dyn CompileEnvironment,
    name: Option<&str>,
    filename: Option<&str>,
    eval_ctx: EvalContext,
) -> Result<CompiledTemplate> {
    CodeGenerator::new(env, name, filename, eval_ctx).generate(template)
}
