//! Bytecode optimization passes
//!
//! Implements jump threading, dead code elimination and fusion of adjacent
//! raw output instructions. Expression level folding happens on the AST
//! before code generation; these passes only clean up the shape of the
//! generated code.

use std::collections::HashSet;

use crate::chunk::Chunk;
use crate::constant::Constant;
use crate::opcode::{Label, Opcode};

/// Bytecode optimizer that applies multiple optimization passes
pub struct Optimizer {
    /// Maximum number of optimization passes to run
    max_passes: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Create a new optimizer with default settings
    pub fn new() -> Self {
        Self { max_passes: 10 }
    }

    /// Set maximum number of optimization passes
    pub fn with_max_passes(mut self, max: usize) -> Self {
        self.max_passes = max;
        self
    }

    /// Run all optimization passes on the chunk
    pub fn optimize(&self, chunk: &mut Chunk) {
        for _ in 0..self.max_passes {
            if !self.run_single_pass(chunk) {
                break;
            }
        }
    }

    /// Run a single optimization pass, returns true if any changes were made
    fn run_single_pass(&self, chunk: &mut Chunk) -> bool {
        let mut changed = false;
        changed |= self.thread_jumps(chunk);
        changed |= self.eliminate_dead_code(chunk);
        changed |= self.remove_redundant_jumps(chunk);
        changed |= self.fuse_raw_output(chunk);
        changed
    }

    /// Retarget jumps that land on an unconditional jump
    fn thread_jumps(&self, chunk: &mut Chunk) -> bool {
        let mut changed = false;
        for i in 0..chunk.instructions.len() {
            let Some(mut target) = chunk.instructions[i].opcode.jump_target() else {
                continue;
            };
            let mut hops = 0;
            while let Some(Opcode::Jump(next)) = chunk.instructions.get(target as usize).map(|inst| &inst.opcode) {
                if *next == target || hops > chunk.instructions.len() {
                    break;
                }
                target = *next;
                hops += 1;
            }
            if let Some(slot) = chunk.instructions[i].opcode.jump_target_mut() {
                if *slot != target {
                    *slot = target;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Remove instructions no control flow path reaches
    fn eliminate_dead_code(&self, chunk: &mut Chunk) -> bool {
        let len = chunk.instructions.len();
        if len == 0 {
            return false;
        }
        let mut reachable = vec![false; len];
        let mut work = vec![0usize];
        while let Some(pc) = work.pop() {
            if pc >= len || reachable[pc] {
                continue;
            }
            reachable[pc] = true;
            let opcode = &chunk.instructions[pc].opcode;
            if let Some(target) = opcode.jump_target() {
                work.push(target as usize);
            }
            if !opcode.is_terminator() {
                work.push(pc + 1);
            }
        }
        if reachable.iter().all(|r| *r) {
            return false;
        }
        compact(chunk, &reachable);
        true
    }

    /// Drop jumps to the very next instruction
    fn remove_redundant_jumps(&self, chunk: &mut Chunk) -> bool {
        let keep: Vec<bool> = chunk
            .instructions
            .iter()
            .enumerate()
            .map(|(pc, inst)| !matches!(inst.opcode, Opcode::Jump(t) if t as usize == pc + 1))
            .collect();
        if keep.iter().all(|k| *k) {
            return false;
        }
        compact(chunk, &keep);
        true
    }

    /// Merge consecutive raw outputs into one constant
    fn fuse_raw_output(&self, chunk: &mut Chunk) -> bool {
        let targets = jump_targets(chunk);
        let mut keep = vec![true; chunk.instructions.len()];
        let mut changed = false;
        let mut i = 0;
        while i < chunk.instructions.len() {
            let Opcode::EmitRaw(first) = chunk.instructions[i].opcode else {
                i += 1;
                continue;
            };
            let mut text = match chunk.constants.get(first as usize).and_then(Constant::as_str) {
                Some(s) => s.to_string(),
                None => {
                    i += 1;
                    continue;
                }
            };
            let mut j = i + 1;
            while j < chunk.instructions.len() && !targets.contains(&(j as Label)) {
                let Opcode::EmitRaw(next) = chunk.instructions[j].opcode else {
                    break;
                };
                match chunk.constants.get(next as usize).and_then(Constant::as_str) {
                    Some(s) => text.push_str(s),
                    None => break,
                }
                keep[j] = false;
                j += 1;
            }
            if j > i + 1 {
                let idx = chunk.add_constant(Constant::Str(text));
                chunk.instructions[i].opcode = Opcode::EmitRaw(idx);
                changed = true;
            }
            i = j;
        }
        if changed {
            compact(chunk, &keep);
        }
        changed
    }
}

fn jump_targets(chunk: &Chunk) -> HashSet<Label> {
    chunk
        .instructions
        .iter()
        .filter_map(|inst| inst.opcode.jump_target())
        .collect()
}

/// Keep the flagged instructions and remap jump targets. A target that was
/// removed moves to the next surviving instruction.
fn compact(chunk: &mut Chunk, keep: &[bool]) {
    let mut new_index = Vec::with_capacity(keep.len() + 1);
    let mut count = 0u32;
    for k in keep {
        new_index.push(count);
        if *k {
            count += 1;
        }
    }
    new_index.push(count);

    let old = std::mem::take(&mut chunk.instructions);
    chunk.instructions = old
        .into_iter()
        .zip(keep.iter())
        .filter_map(|(inst, k)| k.then_some(inst))
        .collect();
    for inst in &mut chunk.instructions {
        if let Some(target) = inst.opcode.jump_target_mut() {
            let old_target = (*target as usize).min(keep.len());
            *target = new_index[old_target];
        }
    }
}
