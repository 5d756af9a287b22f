//! Unit tests for the stack-to-register IR translator

mod utils;

use pktvm_core::jit::bytecode::{Opcode, SuccessorArity};
use pktvm_core::jit::error::JitError;
use pktvm_core::jit::ir::node::{IrOp, Payload};
use pktvm_core::jit::ir::registers::{SPACE_LOCAL, SPACE_STACK};
use pktvm_core::jit::pipeline::{JitOptions, JitPipeline};
use utils::{compile, insn, program};

#[test]
fn straight_line_arithmetic_builds_one_tree() {
    // push 1; push 2; add; loc.store 0; ret
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(1).build(),
        insn(Opcode::PushConst).arg(2).build(),
        insn(Opcode::Add).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    let block = &session.cfg.nodes[2];
    // One store statement and one ret; the constants were folded into the tree
    assert_eq!(block.stmts.len(), 2);
    let store = session.arena.node(block.stmts[0]);
    assert_eq!(store.op, IrOp::RegStore);
    assert_eq!(store.reg.space, SPACE_LOCAL);
    let add = session.arena.node(store.kids[0].unwrap());
    assert_eq!(add.op, IrOp::Add);
    let lhs = session.arena.node(add.kids[0].unwrap());
    let rhs = session.arena.node(add.kids[1].unwrap());
    assert_eq!(lhs.payload, Payload::Const(1));
    assert_eq!(rhs.payload, Payload::Const(2));

    utils::assert_statement_ownership(&session);
}

#[test]
fn every_listed_node_is_a_statement() {
    // A diamond with values flowing across the join
    let insns = vec![
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
    ];
    let session = compile(&program(insns, JitOptions::default()));
    utils::assert_statement_ownership(&session);
}

#[test]
fn block_exit_spills_into_depth_registers() {
    // push 42; jump 2 | loc.store 5; ret
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(42).build(),
        insn(Opcode::Jump)
            .end()
            .branch(2)
            .arity(SuccessorArity::One)
            .build(),
        insn(Opcode::LocStore).leader().arg(5).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    // First block: the pending constant is stored into stack register 0
    let first = &session.cfg.nodes[2];
    let spill = session.arena.node(*first.stmts.last().unwrap());
    assert_eq!(spill.op, IrOp::RegStore);
    assert_eq!(spill.reg.space, SPACE_STACK);
    assert_eq!(spill.reg.name, 0);
    assert_eq!(
        session.arena.node(spill.kids[0].unwrap()).payload,
        Payload::Const(42)
    );

    // Second block: the local store consumes a load of that same register
    let second = &session.cfg.nodes[3];
    let store = session.arena.node(second.stmts[0]);
    assert_eq!(store.op, IrOp::RegStore);
    assert_eq!(store.reg.space, SPACE_LOCAL);
    assert_eq!(store.reg.name, 5);
    let load = session.arena.node(store.kids[0].unwrap());
    assert_eq!(load.op, IrOp::RegLoad);
    assert_eq!(load.reg.space, SPACE_STACK);
    assert_eq!(load.reg.name, 0);
}

#[test]
fn dup_stores_once_and_loads_twice() {
    // push 7; dup; add; loc.store 0; ret
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(7).build(),
        insn(Opcode::Dup).build(),
        insn(Opcode::Add).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    let block = &session.cfg.nodes[2];
    assert_eq!(block.stmts.len(), 3);

    let tmp_store = session.arena.node(block.stmts[0]);
    assert_eq!(tmp_store.op, IrOp::RegStore);
    assert_eq!(
        session.arena.node(tmp_store.kids[0].unwrap()).payload,
        Payload::Const(7)
    );

    let local_store = session.arena.node(block.stmts[1]);
    let add = session.arena.node(local_store.kids[0].unwrap());
    assert_eq!(add.op, IrOp::Add);
    let lhs = session.arena.node(add.kids[0].unwrap());
    let rhs = session.arena.node(add.kids[1].unwrap());
    assert_eq!(lhs.op, IrOp::RegLoad);
    assert_eq!(rhs.op, IrOp::RegLoad);
    // Both loads read the register the dup spilled into
    assert_eq!(lhs.reg, tmp_store.reg);
    assert_eq!(rhs.reg, tmp_store.reg);
}

#[test]
fn memory_access_synthesizes_one_linked_check() {
    // push 10; pkt.load.8; loc.store 0; ret
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(10).build(),
        insn(Opcode::PktLoad8).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    assert_eq!(utils::count_checks(&session), 1);
    assert_eq!(session.links.len(), 1);

    // The check precedes its access in the statement list
    let block = &session.cfg.nodes[2];
    let check_pos = block
        .stmts
        .iter()
        .position(|&s| session.arena.node(s).op == IrOp::Check)
        .unwrap();
    assert_eq!(check_pos, 0);

    // The check duplicates the offset and carries the access width
    let check = session.arena.node(block.stmts[check_pos]);
    assert_eq!(
        session.arena.node(check.kids[0].unwrap()).payload,
        Payload::Const(10)
    );
    assert_eq!(
        session.arena.node(check.kids[1].unwrap()).payload,
        Payload::Const(1)
    );
}

#[test]
fn disabled_bounds_checking_emits_no_checks() {
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(10).build(),
        insn(Opcode::PktLoad8).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let options = JitOptions {
        bounds_check: false,
        ..JitOptions::default()
    };
    let session = compile(&program(insns, options));
    assert_eq!(utils::count_checks(&session), 0);
    assert!(session.links.is_empty());
}

#[test]
fn pattern_match_checks_both_offsets() {
    // push 12; push 30; push 4; match.eq -> 5 | ret | ret
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(12).build(),
        insn(Opcode::PushConst).arg(30).build(),
        insn(Opcode::PushConst).arg(4).build(),
        insn(Opcode::MatchEq)
            .end()
            .branch(5)
            .arity(SuccessorArity::Two)
            .build(),
        insn(Opcode::Ret).leader().ret().build(),
        insn(Opcode::Ret).leader().ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    // One packet check and one data check, each with its own length copy
    assert_eq!(utils::count_checks(&session), 2);
    let checks = utils::checks_in_block(&session, 2);
    assert_eq!(checks.len(), 2);
    for &check in checks.iter() {
        let node = session.arena.node(check);
        assert_eq!(
            session.arena.node(node.kids[1].unwrap()).payload,
            Payload::Const(4)
        );
    }

    // The jump consumes the two offsets as its comparison pair
    let block = &session.cfg.nodes[2];
    let jump = session.arena.node(*block.stmts.last().unwrap());
    assert_eq!(jump.op, IrOp::Jump);
    assert_eq!(
        session.arena.node(jump.kids[0].unwrap()).payload,
        Payload::Const(12)
    );
    assert_eq!(
        session.arena.node(jump.kids[1].unwrap()).payload,
        Payload::Const(30)
    );
}

#[test]
fn static_constant_violation_aborts_translation() {
    // Scenario: a constant offset of 1000 against a 64-byte data region
    let insns = vec![
        insn(Opcode::PushConst).leader().arg(1000).build(),
        insn(Opcode::DataLoad8).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let options = JitOptions {
        data_size: Some(64),
        ..JitOptions::default()
    };
    let err = JitPipeline::compile(&program(insns, options)).unwrap_err();
    match err {
        JitError::StaticBoundsViolation { region, size, .. } => {
            assert_eq!(region, "data");
            assert_eq!(size, 64);
        }
        other => panic!("expected StaticBoundsViolation, got {other:?}"),
    }
}

#[test]
fn coprocessor_init_pushes_a_result() {
    // cop.init 2.1; loc.store 0; cop.run 2.4; ret
    let insns = vec![
        insn(Opcode::CopInit).leader().args(2, 1).build(),
        insn(Opcode::LocStore).arg(0).build(),
        insn(Opcode::CopRun).args(2, 4).build(),
        insn(Opcode::Ret).ret().build(),
    ];
    let session = compile(&program(insns, JitOptions::default()));

    let block = &session.cfg.nodes[2];
    // store(loc0, coproc-init), coproc-run, ret
    assert_eq!(block.stmts.len(), 3);
    let store = session.arena.node(block.stmts[0]);
    let init = session.arena.node(store.kids[0].unwrap());
    assert_eq!(init.op, IrOp::Coproc);
    assert_eq!(init.payload, Payload::Coproc { id: 2, op: 1 });
    let run = session.arena.node(block.stmts[1]);
    assert_eq!(run.op, IrOp::Coproc);
    assert!(!run.reg.is_valid());
}
