//! Unit tests for CFG construction

mod utils;

use pktvm_core::jit::bytecode::{Opcode, SuccessorArity};
use pktvm_core::jit::cfg::builder::CfgBuilder;
use pktvm_core::jit::cfg::{Cfg, ENTRY_BLOCK, EXIT_BLOCK};
use pktvm_core::jit::error::JitError;
use utils::insn;

/// push 1 / jump.z +4 / push 10 / jump +6 / push 20 (falls through) / ret
fn diamond() -> Vec<pktvm_core::jit::bytecode::InsnRecord> {
    vec![
        insn(Opcode::PushConst).leader().arg(1).build(),
        insn(Opcode::JumpZero)
            .end()
            .branch(4)
            .arity(SuccessorArity::Two)
            .build(),
        insn(Opcode::PushConst).leader().arg(10).build(),
        insn(Opcode::Jump)
            .end()
            .branch(6)
            .arity(SuccessorArity::One)
            .build(),
        insn(Opcode::PushConst).leader().arg(20).build(),
        insn(Opcode::Pop).end().arity(SuccessorArity::None).build(),
        insn(Opcode::Ret).leader().ret().build(),
    ]
}

#[test]
fn leader_count_determines_block_count() {
    let insns = diamond();
    let mut cfg = Cfg::new();
    let region = CfgBuilder::extend(&mut cfg, &insns, None).unwrap();

    // 4 leaders plus the ENTRY and EXIT sentinels
    assert_eq!(cfg.block_count(), 6);
    assert_eq!(region.blocks.len(), 4);
    assert_eq!(region.entry_block, 2);
}

#[test]
fn edges_match_the_successor_table() {
    let insns = diamond();
    let mut cfg = Cfg::new();
    let region = CfgBuilder::extend(&mut cfg, &insns, None).unwrap();

    let b = |pc: u32| *region.leaders.get(&pc).unwrap();
    assert_eq!(cfg.nodes[ENTRY_BLOCK as usize].successors.as_slice(), &[b(0)]);

    // Two-way branch: explicit target plus fallthrough
    let mut first = cfg.nodes[b(0) as usize].successors.to_vec();
    first.sort_unstable();
    assert_eq!(first, vec![b(2), b(4)]);

    // One-way branch
    assert_eq!(cfg.nodes[b(2) as usize].successors.as_slice(), &[b(6)]);
    // Implicit fallthrough
    assert_eq!(cfg.nodes[b(4) as usize].successors.as_slice(), &[b(6)]);
    // Return edge to the sentinel
    assert_eq!(cfg.nodes[b(6) as usize].successors.as_slice(), &[EXIT_BLOCK]);
}

#[test]
fn block_pc_ranges_cover_the_segment() {
    let insns = diamond();
    let mut cfg = Cfg::new();
    let region = CfgBuilder::extend(&mut cfg, &insns, None).unwrap();

    let b0 = &cfg.nodes[*region.leaders.get(&0).unwrap() as usize];
    assert_eq!((b0.start_pc, b0.end_pc), (0, 1));
    let b4 = &cfg.nodes[*region.leaders.get(&4).unwrap() as usize];
    assert_eq!((b4.start_pc, b4.end_pc), (4, 5));
}

#[test]
fn switch_adds_default_and_case_edges() {
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(2).build(),
        insn(Opcode::Switch).end().switch(2, &[(0, 3), (1, 4)]).build(),
        insn(Opcode::Ret).leader().ret().build(),
        insn(Opcode::Ret).leader().ret().build(),
        insn(Opcode::Ret).leader().ret().build(),
    ];
    let mut cfg = Cfg::new();
    let region = CfgBuilder::extend(&mut cfg, &insns, None).unwrap();

    let b = |pc: u32| *region.leaders.get(&pc).unwrap();
    let mut succs = cfg.nodes[b(0) as usize].successors.to_vec();
    succs.sort_unstable();
    assert_eq!(succs, vec![b(2), b(3), b(4)]);
}

#[test]
fn unresolved_target_is_malformed_bytecode() {
    // The branch lands on pc 3, which is not a leader
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(1).build(),
        insn(Opcode::JumpZero)
            .end()
            .branch(3)
            .arity(SuccessorArity::Two)
            .build(),
        insn(Opcode::PushConst).leader().arg(2).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let mut cfg = Cfg::new();
    let err = CfgBuilder::extend(&mut cfg, &insns, None).unwrap_err();
    match err {
        JitError::MalformedBytecode { pc, .. } => assert_eq!(pc, 1),
        other => panic!("expected MalformedBytecode, got {other:?}"),
    }
}

#[test]
fn repeated_invocations_extend_one_graph() {
    let seg = |v: i64| {
        vec![
            insn(Opcode::PushConst).leader().arg(v).build(),
            insn(Opcode::Pop).build(),
            insn(Opcode::Ret).ret().build(),
        ]
    };
    let mut cfg = Cfg::new();
    let first = CfgBuilder::extend(&mut cfg, &seg(1), Some(0)).unwrap();
    let second = CfgBuilder::extend(&mut cfg, &seg(2), Some(1)).unwrap();

    // Ids continue monotonically instead of restarting
    assert_eq!(first.entry_block, 2);
    assert_eq!(second.entry_block, 3);
    assert_eq!(cfg.block_count(), 4);

    // Each invocation hangs off ENTRY and stamps its handler tag
    let mut entry_succs = cfg.nodes[ENTRY_BLOCK as usize].successors.to_vec();
    entry_succs.sort_unstable();
    assert_eq!(entry_succs, vec![2, 3]);
    assert_eq!(cfg.nodes[2].handler, Some(0));
    assert_eq!(cfg.nodes[3].handler, Some(1));
}

#[test]
fn blocks_start_with_empty_statement_lists() {
    let insns = diamond();
    let mut cfg = Cfg::new();
    CfgBuilder::extend(&mut cfg, &insns, None).unwrap();
    assert!(cfg.nodes.iter().all(|b| b.stmts.is_empty()));
}
