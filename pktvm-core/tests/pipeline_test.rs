//! Integration tests for the full middle-end pipeline

mod utils;

use pktvm_core::jit::bytecode::Opcode;
use pktvm_core::jit::dump::dump_cfg;
use pktvm_core::jit::pipeline::JitOptions;
use pktvm_core::jit::program::{Program, Segment};
use utils::insn;

fn port_segment(offset: i64, port: u32) -> Segment {
    Segment {
        port,
        insns: vec![
            insn(Opcode::PushConst).leader().arg(offset).build(),
            insn(Opcode::PktLoad8).build(),
            insn(Opcode::LocStore).arg(0).build(),
            insn(Opcode::SendPkt).arg(port as i64).build(),
            insn(Opcode::Ret).ret().build(),
        ],
    }
}

#[test]
fn multiple_ports_share_one_cfg() {
    let program = Program {
        segments: vec![port_segment(10, 0), port_segment(20, 1)],
        options: JitOptions::default(),
        idoms: Vec::new(),
    };
    let session = utils::compile(&program);

    assert_eq!(session.stats.segments, 2);
    // One block per port plus the two sentinels
    assert_eq!(session.stats.blocks, 4);
    assert_eq!(session.cfg.nodes[0].successors.len(), 2);
    assert_eq!(session.cfg.nodes[2].handler, Some(0));
    assert_eq!(session.cfg.nodes[3].handler, Some(1));

    // Per-port checks target different offsets, so nothing is eliminated
    assert_eq!(session.stats.checks_emitted, 2);
    assert_eq!(session.stats.checks_removed, 0);

    utils::assert_statement_ownership(&session);
}

#[test]
fn stage_order_leaves_sized_ir_behind() {
    let program = Program {
        segments: vec![port_segment(10, 0)],
        options: JitOptions::default(),
        idoms: Vec::new(),
    };
    let session = utils::compile(&program);

    // Every statement tree ends up with a resolved width somewhere along it
    let block = &session.cfg.nodes[2];
    assert!(!block.stmts.is_empty());
    for &stmt in block.stmts.iter() {
        let node = session.arena.node(stmt);
        if node.op == pktvm_core::jit::ir::node::IrOp::RegStore {
            assert!(node.size > 0, "unsized store statement");
        }
    }
}

#[test]
fn dump_lists_blocks_edges_and_trees() {
    let program = Program {
        segments: vec![port_segment(10, 0)],
        options: JitOptions::default(),
        idoms: Vec::new(),
    };
    let session = utils::compile(&program);
    let listing = dump_cfg(&session.cfg, &session.arena);

    assert!(listing.contains("block 0 (entry)"));
    assert!(listing.contains("block 1 (exit)"));
    assert!(listing.contains("(check packet:1"));
    assert!(listing.contains("(send port0)"));
    assert!(listing.contains("(const 10"));
}
