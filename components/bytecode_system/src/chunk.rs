//! Code objects
//!
//! A [`Chunk`] holds the instructions of one template function: the template
//! root, a block, a macro, a call block's `caller`, or the body of a
//! recursive loop.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::instruction::Instruction;
use crate::opcode::{Label, Opcode};
use crate::optimizer::Optimizer;

/// How a macro binds its arguments
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MacroSignature {
    /// Macro name (`caller` for call blocks)
    pub name: String,
    /// Declared parameter names, in order
    pub arguments: Vec<String>,
    /// Slots receiving the bound arguments: one per declared parameter, then
    /// the synthesized `caller`, `kwargs` and `varargs` in that order when
    /// the corresponding flag is set
    pub param_slots: Vec<u16>,
    /// Extra keyword arguments are collected into `kwargs`
    pub catch_kwargs: bool,
    /// Extra positional arguments are collected into `varargs`
    pub catch_varargs: bool,
    /// The body references `caller`
    pub caller: bool,
}

impl MacroSignature {
    /// True if `caller` is one of the declared parameters
    pub fn explicit_caller(&self) -> bool {
        self.arguments.iter().any(|a| a == "caller")
    }
}

/// What kind of template function a chunk implements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Template root
    Root,
    /// Named block
    Block(String),
    /// `{% macro %}`
    Macro(MacroSignature),
    /// The `caller` of a `{% call %}` block
    CallBlock(MacroSignature),
    /// Body of a recursive for loop; the iterable arrives in `iter_slot`
    Loop {
        /// Slot receiving the iterable
        iter_slot: u16,
    },
}

/// Compiled code of one template function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Function kind
    pub kind: ChunkKind,
    /// Instruction sequence
    pub instructions: Vec<Instruction>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Debug name of every local slot
    pub slot_names: Vec<String>,
}

impl Chunk {
    /// Create an empty chunk
    pub fn new(kind: ChunkKind) -> Self {
        Self {
            kind,
            instructions: Vec::new(),
            constants: Vec::new(),
            slot_names: Vec::new(),
        }
    }

    /// Append an instruction and return its label
    pub fn emit(&mut self, opcode: Opcode, line: u32) -> Label {
        self.instructions.push(Instruction::at_line(opcode, line));
        (self.instructions.len() - 1) as Label
    }

    /// Label the next emitted instruction will get
    pub fn next_label(&self) -> Label {
        self.instructions.len() as Label
    }

    /// Point the jump at `at` to `target`
    pub fn patch_jump(&mut self, at: Label, target: Label) {
        if let Some(slot) = self
            .instructions
            .get_mut(at as usize)
            .and_then(|inst| inst.opcode.jump_target_mut())
        {
            *slot = target;
        }
    }

    /// Add a constant, reusing an equal entry, and return its index
    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|c| c == &constant) {
            return idx as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    /// Allocate a local slot
    pub fn add_slot(&mut self, name: impl Into<String>) -> u16 {
        self.slot_names.push(name.into());
        (self.slot_names.len() - 1) as u16
    }

    /// Number of local slots
    pub fn slot_count(&self) -> usize {
        self.slot_names.len()
    }

    /// Name shown in tracebacks
    pub fn function_name(&self) -> String {
        match &self.kind {
            ChunkKind::Root => "template".to_string(),
            ChunkKind::Block(name) => format!("block '{}'", name),
            ChunkKind::Macro(sig) => format!("macro '{}'", sig.name),
            ChunkKind::CallBlock(_) => "caller".to_string(),
            ChunkKind::Loop { .. } => "loop".to_string(),
        }
    }

    /// Line of the instruction at `pc`
    pub fn line_at(&self, pc: usize) -> u32 {
        self.instructions.get(pc).map(|i| i.line).unwrap_or(0)
    }

    /// Run the peephole optimizer on this chunk
    pub fn optimize(&mut self) {
        Optimizer::new().optimize(self);
    }

    /// Human readable listing
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} ==", self.function_name());
        for (i, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "  const {:>3}: {:?}", i, constant);
        }
        let mut last_line = None;
        for (pc, inst) in self.instructions.iter().enumerate() {
            let line = if last_line == Some(inst.line) {
                "   |".to_string()
            } else {
                format!("{:>4}", inst.line)
            };
            last_line = Some(inst.line);
            let _ = writeln!(out, "{} {:>5}  {}", line, pc, inst.opcode);
        }
        out
    }
}
