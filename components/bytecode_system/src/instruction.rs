//! Bytecode instruction representation
//!
//! Every instruction remembers the template line it was generated from so
//! runtime errors can point back at the source.

use serde::{Deserialize, Serialize};

use crate::opcode::Opcode;

/// A single bytecode instruction with its source line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The opcode for this instruction
    pub opcode: Opcode,
    /// Template line (1-based, 0 if unknown)
    pub line: u32,
}

impl Instruction {
    /// Create a new instruction without line information
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, line: 0 }
    }

    /// Create a new instruction at the given line
    pub fn at_line(opcode: Opcode, line: u32) -> Self {
        Self { opcode, line }
    }
}
