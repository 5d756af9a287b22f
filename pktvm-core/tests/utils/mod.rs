//! Test Utilities
//!
//! Shared builders for instruction records and program descriptions, plus
//! assertion helpers over compiled sessions.

// Not every test binary uses every helper
#![allow(dead_code)]

use pktvm_core::jit::bytecode::{InsnRecord, Opcode, SuccessorArity};
use pktvm_core::jit::ir::node::{IrArena, IrOp, NodeId, NodeRole};
use pktvm_core::jit::pipeline::{JitOptions, JitPipeline, JitSession};
use pktvm_core::jit::program::{IdomEntry, Program, Segment};

/// Fluent builder for one instruction record.
pub struct Insn(InsnRecord);

impl Insn {
    pub fn new(opcode: Opcode) -> Self {
        Self(InsnRecord::new(opcode))
    }

    pub fn leader(mut self) -> Self {
        self.0.flags.leader = true;
        self
    }

    pub fn end(mut self) -> Self {
        self.0.flags.block_end = true;
        self
    }

    pub fn ret(mut self) -> Self {
        self.0.flags.block_end = true;
        self.0.flags.ret = true;
        self
    }

    pub fn branch(mut self, target: u32) -> Self {
        self.0.flags.branch = true;
        self.0.target = target;
        self
    }

    pub fn arity(mut self, arity: SuccessorArity) -> Self {
        self.0.arity = arity;
        self
    }

    pub fn arg(mut self, value: i64) -> Self {
        self.0.args[0] = value;
        self
    }

    pub fn args(mut self, a: i64, b: i64) -> Self {
        self.0.args = [a, b];
        self
    }

    pub fn switch(mut self, default: u32, cases: &[(i64, u32)]) -> Self {
        self.0.arity = SuccessorArity::Switch;
        self.0.switch_default = default;
        self.0.switch_cases = cases.to_vec();
        self
    }

    pub fn build(self) -> InsnRecord {
        self.0
    }
}

/// Shorthand for `Insn::new`.
pub fn insn(opcode: Opcode) -> Insn {
    Insn::new(opcode)
}

/// Wrap one instruction list into a single-segment program on port 0.
pub fn program(insns: Vec<InsnRecord>, options: JitOptions) -> Program {
    Program {
        segments: vec![Segment { port: 0, insns }],
        options,
        idoms: Vec::new(),
    }
}

/// Wrap one instruction list plus an immediate-dominator table.
pub fn program_with_idoms(
    insns: Vec<InsnRecord>,
    options: JitOptions,
    idoms: &[(u32, u32)],
) -> Program {
    Program {
        segments: vec![Segment { port: 0, insns }],
        options,
        idoms: idoms
            .iter()
            .map(|&(block, idom)| IdomEntry { block, idom })
            .collect(),
    }
}

/// Compile a program, panicking on failure.
pub fn compile(program: &Program) -> JitSession {
    JitPipeline::compile(program).expect("pipeline should succeed")
}

/// Count the check statements across all blocks.
pub fn count_checks(session: &JitSession) -> usize {
    session
        .cfg
        .nodes
        .iter()
        .flat_map(|b| b.stmts.iter())
        .filter(|&&s| session.arena.node(s).op == IrOp::Check)
        .count()
}

/// Check statements of one block.
pub fn checks_in_block(session: &JitSession, block: u32) -> Vec<NodeId> {
    session.cfg.nodes[block as usize]
        .stmts
        .iter()
        .copied()
        .filter(|&s| session.arena.node(s).op == IrOp::Check)
        .collect()
}

/// Assert that every listed node is a statement of its block and that every
/// node reachable underneath it is owned as a child.
pub fn assert_statement_ownership(session: &JitSession) {
    for block in session.cfg.nodes.iter() {
        for &stmt in block.stmts.iter() {
            assert_eq!(
                session.arena.node(stmt).role,
                NodeRole::Statement { block: block.id },
                "statement {stmt} of block {} has the wrong role",
                block.id
            );
            assert_subtree_owned(&session.arena, stmt);
        }
    }
}

fn assert_subtree_owned(arena: &IrArena, parent: NodeId) {
    for kid in arena.node(parent).kids.into_iter().flatten() {
        assert_eq!(
            arena.node(kid).role,
            NodeRole::Child { parent },
            "node {kid} under {parent} is not owned as a child"
        );
        assert_subtree_owned(arena, kid);
    }
}

/// Snapshot of every node's annotated width, for idempotence checks.
pub fn size_snapshot(session: &JitSession) -> Vec<u8> {
    (0..session.arena.len())
        .map(|i| session.arena.node(NodeId(i as u32)).size)
        .collect()
}
