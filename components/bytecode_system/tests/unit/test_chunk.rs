//! Tests for Chunk and CompiledTemplate

use bytecode_system::{Chunk, ChunkKind, CompiledTemplate, Constant, LocalRef, MacroSignature, Opcode};

#[test]
fn test_chunk_creation() {
    let chunk = Chunk::new(ChunkKind::Root);
    assert!(chunk.instructions.is_empty());
    assert!(chunk.constants.is_empty());
    assert_eq!(chunk.slot_count(), 0);
}

#[test]
fn test_chunk_records_lines() {
    let mut chunk = Chunk::new(ChunkKind::Root);
    chunk.emit(Opcode::Pop, 3);
    chunk.emit(Opcode::Return, 5);
    assert_eq!(chunk.line_at(0), 3);
    assert_eq!(chunk.line_at(1), 5);
    assert_eq!(chunk.line_at(99), 0);
}

#[test]
fn test_slots_are_named() {
    let mut chunk = Chunk::new(ChunkKind::Root);
    let a = chunk.add_slot("l_0_a");
    let b = chunk.add_slot("l_0_b");
    assert_eq!((a, b), (0, 1));
    assert_eq!(chunk.slot_names, vec!["l_0_a", "l_0_b"]);
}

#[test]
fn test_macro_signature_explicit_caller() {
    let sig = MacroSignature {
        name: "m".into(),
        arguments: vec!["a".into(), "caller".into()],
        param_slots: vec![0, 1],
        ..MacroSignature::default()
    };
    assert!(sig.explicit_caller());
    assert!(!MacroSignature::default().explicit_caller());
}

#[test]
fn test_module_block_table() {
    let mut module = CompiledTemplate::new(Some("base.html"), Some("/t/base.html"));
    let idx = module.add_chunk(Chunk::new(ChunkKind::Block("title".into())));
    module.blocks.insert("title".into(), idx);
    assert_eq!(module.block("title"), Some(1));
    assert_eq!(module.block("missing"), None);
    assert_eq!(module.chunk(idx).map(Chunk::function_name).as_deref(), Some("block 'title'"));
}

#[test]
fn test_module_round_trip_keeps_every_chunk() {
    let mut module = CompiledTemplate::new(Some("m.html"), None);
    let sig = MacroSignature {
        name: "field".into(),
        arguments: vec!["name".into()],
        param_slots: vec![0],
        catch_kwargs: true,
        catch_varargs: false,
        caller: false,
    };
    let mut chunk = Chunk::new(ChunkKind::Macro(sig));
    chunk.add_slot("l_1_name");
    let c = chunk.add_constant(Constant::Map(vec![(Constant::Str("k".into()), Constant::Float(1.5))]));
    chunk.emit(Opcode::LoadConst(c), 1);
    chunk.emit(Opcode::StoreLocal(LocalRef::local(0)), 1);
    chunk.emit(Opcode::Return, 1);
    module.add_chunk(chunk);
    module.chunks[0].emit(Opcode::MakeClosure(1), 1);
    module.chunks[0].emit(Opcode::Return, 1);

    let restored = CompiledTemplate::from_bytes(&module.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, module);
    assert!(restored.disassemble().contains("macro 'field'"));
}

#[test]
fn test_truncated_blob_is_rejected() {
    let module = CompiledTemplate::new(None, None);
    let bytes = module.to_bytes().unwrap();
    assert!(CompiledTemplate::from_bytes(&bytes[..bytes.len() - 3]).is_err());
}
