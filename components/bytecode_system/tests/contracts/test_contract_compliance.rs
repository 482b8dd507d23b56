//! Contract compliance tests for bytecode_system
//! The code generator and the interpreter both depend on these shapes.

use bytecode_system::{CallShape, Chunk, ChunkKind, CompiledTemplate, Instruction, LocalRef, Opcode, FORMAT_VERSION, MAGIC};

#[test]
fn test_contract_cache_header() {
    assert_eq!(MAGIC, b"CTPL");
    let bytes = CompiledTemplate::new(None, None).to_bytes().unwrap();
    assert_eq!(&bytes[..4], b"CTPL");
    assert_eq!(bytes[4], FORMAT_VERSION);
}

#[test]
fn test_contract_root_is_chunk_zero() {
    let module = CompiledTemplate::new(Some("x"), None);
    assert_eq!(module.chunks.len(), 1);
    assert_eq!(module.root().kind, ChunkKind::Root);
}

#[test]
fn test_contract_jumping_opcodes_expose_targets() {
    let jumps = [
        Opcode::Jump(1),
        Opcode::JumpIfFalse(1),
        Opcode::JumpIfTrue(1),
        Opcode::JumpIfFalseOrPop(1),
        Opcode::JumpIfTrueOrPop(1),
        Opcode::Iterate(1),
        Opcode::FilterNext(1),
        Opcode::JumpIfParentSet(1),
        Opcode::JumpIfBound {
            local: LocalRef::local(0),
            target: 1,
        },
    ];
    for op in jumps {
        assert_eq!(op.jump_target(), Some(1), "{}", op);
    }
}

#[test]
fn test_contract_instruction_carries_line() {
    let inst = Instruction::at_line(Opcode::Call(CallShape::positional(2)), 7);
    assert_eq!(inst.line, 7);
    let mut chunk = Chunk::new(ChunkKind::Root);
    chunk.emit(inst.opcode.clone(), inst.line);
    assert_eq!(chunk.instructions[0], inst);
}
