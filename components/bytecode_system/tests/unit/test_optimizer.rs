//! Tests for the peephole optimizer

use bytecode_system::{Chunk, ChunkKind, Constant, Escape, LocalRef, Opcode, Optimizer};

fn opcodes(chunk: &Chunk) -> Vec<Opcode> {
    chunk.instructions.iter().map(|i| i.opcode.clone()).collect()
}

#[test]
fn test_raw_runs_fuse_into_one_constant() {
    let mut chunk = Chunk::new(ChunkKind::Root);
    for part in ["<ul>", "\n", "  "] {
        let idx = chunk.add_constant(Constant::Str(part.into()));
        chunk.emit(Opcode::EmitRaw(idx), 1);
    }
    chunk.emit(Opcode::Return, 1);
    Optimizer::new().optimize(&mut chunk);
    let ops = opcodes(&chunk);
    assert_eq!(ops.len(), 2);
    let Opcode::EmitRaw(idx) = ops[0] else {
        panic!("expected raw output, got {:?}", ops[0]);
    };
    assert_eq!(chunk.constants[idx as usize].as_str(), Some("<ul>\n  "));
}

#[test]
fn test_loop_shape_survives() {
    // for x in items: emit x
    let mut chunk = Chunk::new(ChunkKind::Root);
    let slot = LocalRef::local(chunk.add_slot("l_1_x"));
    chunk.emit(Opcode::LoadLocal(LocalRef::local(0)), 1);
    chunk.emit(Opcode::PushLoop { recursive: false }, 1);
    let head = chunk.emit(Opcode::Iterate(0), 1);
    chunk.emit(Opcode::StoreLocal(slot), 1);
    chunk.emit(Opcode::LoadLocal(slot), 1);
    chunk.emit(Opcode::Emit(Escape::On), 1);
    chunk.emit(Opcode::Jump(head), 1);
    let exit = chunk.emit(Opcode::Pop, 1);
    chunk.patch_jump(head, exit);
    chunk.emit(Opcode::Return, 1);

    let before = opcodes(&chunk);
    Optimizer::new().optimize(&mut chunk);
    assert_eq!(opcodes(&chunk), before);
}

#[test]
fn test_max_passes_zero_is_a_no_op() {
    let mut chunk = Chunk::new(ChunkKind::Root);
    chunk.emit(Opcode::Jump(1), 1);
    chunk.emit(Opcode::Return, 1);
    Optimizer::new().with_max_passes(0).optimize(&mut chunk);
    assert_eq!(chunk.instructions.len(), 2);
    Optimizer::new().optimize(&mut chunk);
    assert_eq!(opcodes(&chunk), vec![Opcode::Return]);
}
