//! Compiled template modules and their cache format
//!
//! A [`CompiledTemplate`] is everything the code generator produces for one
//! template source: the root function, one chunk per block, macro, call block
//! and recursive loop, and the block name table.
//!
//! The serialized form starts with a fixed header so stale or foreign blobs
//! are refused instead of half-decoded:
//!
//! ```text
//! b"CTPL" | format version (u8) | producer tag length (u8) | producer tag | body
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use core_types::{ErrorKind, Result, TemplateError};

use crate::chunk::{Chunk, ChunkKind};

/// Magic bytes at the start of every serialized module
pub const MAGIC: &[u8; 4] = b"CTPL";

/// Format version; bump whenever the opcode set changes shape
pub const FORMAT_VERSION: u8 = 1;

/// Identifies the producer of a blob; blobs written by another build are refused
pub const PRODUCER_TAG: &str = concat!("corten-template-", env!("CARGO_PKG_VERSION"));

/// Output of the code generator for one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    /// Load name of the template
    pub name: Option<String>,
    /// Filename the source came from
    pub filename: Option<String>,
    /// All functions; index 0 is the root
    pub chunks: Vec<Chunk>,
    /// Block name to chunk index, in definition order
    pub blocks: IndexMap<String, u32>,
}

impl CompiledTemplate {
    /// Create a module with an empty root chunk
    pub fn new(name: Option<&str>, filename: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            filename: filename.map(str::to_string),
            chunks: vec![Chunk::new(ChunkKind::Root)],
            blocks: IndexMap::new(),
        }
    }

    /// The root function
    pub fn root(&self) -> &Chunk {
        &self.chunks[0]
    }

    /// Chunk by index
    pub fn chunk(&self, idx: u32) -> Option<&Chunk> {
        self.chunks.get(idx as usize)
    }

    /// Chunk index of a block
    pub fn block(&self, name: &str) -> Option<u32> {
        self.blocks.get(name).copied()
    }

    /// Add a chunk and return its index
    pub fn add_chunk(&mut self, chunk: Chunk) -> u32 {
        self.chunks.push(chunk);
        (self.chunks.len() - 1) as u32
    }

    /// Run the peephole optimizer over every chunk
    pub fn optimize(&mut self) {
        for chunk in &mut self.chunks {
            chunk.optimize();
        }
    }

    /// Total number of instructions across all chunks
    pub fn instruction_count(&self) -> usize {
        self.chunks.iter().map(|c| c.instructions.len()).sum()
    }

    /// (instruction index, template line) pairs of the root function where the
    /// line changes
    pub fn debug_info(&self) -> Vec<(usize, u32)> {
        let mut info = Vec::new();
        let mut last = None;
        for (pc, inst) in self.root().instructions.iter().enumerate() {
            if last != Some(inst.line) {
                info.push((pc, inst.line));
                last = Some(inst.line);
            }
        }
        info
    }

    /// Listing of every chunk
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (idx, chunk) in self.chunks.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&format!("#{} ", idx));
            out.push_str(&chunk.disassemble());
        }
        out
    }

    /// Serialize for the bytecode cache
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self).map_err(|e| {
            TemplateError::new(ErrorKind::BadSerialization, format!("cannot serialize module: {}", e))
        })?;
        let mut bytes = Vec::with_capacity(body.len() + 6 + PRODUCER_TAG.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.push(PRODUCER_TAG.len() as u8);
        bytes.extend_from_slice(PRODUCER_TAG.as_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decode a blob written by [`CompiledTemplate::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bad = |msg: &str| TemplateError::new(ErrorKind::BadSerialization, msg.to_string());
        if bytes.len() < 6 || &bytes[..4] != MAGIC {
            return Err(bad("bad magic"));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(bad("unsupported format version"));
        }
        let tag_len = bytes[5] as usize;
        let body_start = 6 + tag_len;
        if bytes.len() < body_start || &bytes[6..body_start] != PRODUCER_TAG.as_bytes() {
            return Err(bad("blob written by a different producer"));
        }
        serde_json::from_slice(&bytes[body_start..])
            .map_err(|e| TemplateError::new(ErrorKind::BadSerialization, format!("corrupt module: {}", e)))
    }
}
