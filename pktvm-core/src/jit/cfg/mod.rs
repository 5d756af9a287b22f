//! Control Flow Graph Substrate
//!
//! This module provides the basic-block/CFG representation shared by the
//! builder, the translator and both optimization passes. The graph owns the
//! blocks and the directed edges between them; blocks hold ordered statement
//! lists of IR node ids but never own edges themselves.
//!
//! Two sentinel blocks always exist: ENTRY (id 0) and EXIT (id 1). Every
//! builder invocation hangs its first block off ENTRY, and return paths end
//! in EXIT.
//!
//! # Memory Optimizations
//! - `BasicBlock.successors` and `predecessors` use `SmallVec<[u32; 2]>`
//!   (most blocks have at most two of each)
//! - Traversal visited sets use `BitVec` (1 bit per block)
//! - Block ids are `u32`
//!
//! # Traversal
//! Depth-first traversal is iterative (explicit stack) and exposes preorder,
//! postorder and reverse-postorder block sequences plus a visitor-hook walk.
//! Dominance is not computed here: the immediate-dominator link on each block
//! is attached by an external pass before bounds-check elimination runs.

pub mod builder;

use crate::jit::error::{JitError, JitResult};
use crate::jit::ir::node::NodeId;
use bitvec::prelude::*;
use smallvec::SmallVec;

/// Id of the ENTRY sentinel block.
pub const ENTRY_BLOCK: u32 = 0;
/// Id of the EXIT sentinel block.
pub const EXIT_BLOCK: u32 = 1;

/// Basic block in the control flow graph.
///
/// A maximal straight-line run of bytecode instructions, identified by the
/// half-open program-counter range `[start_pc, end_pc]` into the instruction
/// array of its builder invocation. The statement list is empty until the
/// translator fills it.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Block id, unique within the CFG
    pub id: u32,
    /// First instruction index of this block
    pub start_pc: u32,
    /// Last instruction index of this block (inclusive)
    pub end_pc: u32,
    /// Monotone in-order position assigned at creation
    pub order: u32,
    /// Opaque handler tag propagated from the builder invocation
    /// (one logical input port per invocation)
    pub handler: Option<u32>,
    /// Immediate dominator, attached externally before check elimination
    pub idom: Option<u32>,
    /// Ordered IR statement list, filled by the translator
    pub stmts: Vec<NodeId>,
    /// Successor block ids
    pub successors: SmallVec<[u32; 2]>,
    /// Predecessor block ids
    pub predecessors: SmallVec<[u32; 2]>,
}

impl BasicBlock {
    /// True for the ENTRY/EXIT sentinels, which carry no instructions.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.id == ENTRY_BLOCK || self.id == EXIT_BLOCK
    }
}

/// Directed edge between two basic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
}

/// Control flow graph.
///
/// Owns the blocks and edges; mutated in place by the translator and the
/// optimization passes, and discarded with the compilation session.
#[derive(Debug)]
pub struct Cfg {
    /// Basic blocks, indexed by id
    pub nodes: Vec<BasicBlock>,
    /// Directed edges (deduplicated)
    pub edges: Vec<Edge>,
}

impl Cfg {
    /// Create a CFG containing only the ENTRY and EXIT sentinels.
    pub fn new() -> Self {
        let mut cfg = Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        cfg.push_block(0, None); // ENTRY
        cfg.push_block(0, None); // EXIT
        cfg
    }

    fn push_block(&mut self, start_pc: u32, handler: Option<u32>) -> u32 {
        let id: u32 = self.nodes.len() as u32;
        self.nodes.push(BasicBlock {
            id,
            start_pc,
            end_pc: start_pc,
            order: id,
            handler,
            idom: None,
            stmts: Vec::new(),
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        });
        id
    }

    /// Number of blocks, sentinels included.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.nodes.len()
    }

    /// Append a new ordinary block starting at `start_pc`.
    ///
    /// Ids and in-order positions continue monotonically from the current
    /// block count, so repeated builder invocations extend the graph instead
    /// of rebuilding it.
    pub fn add_block(&mut self, start_pc: u32, handler: Option<u32>) -> u32 {
        self.push_block(start_pc, handler)
    }

    /// Insert a directed edge, updating successor/predecessor lists.
    ///
    /// Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: u32, to: u32) {
        let edge = Edge { from, to };
        if self.edges.contains(&edge) {
            return;
        }
        self.edges.push(edge);
        let succs = &mut self.nodes[from as usize].successors;
        if !succs.contains(&to) {
            succs.push(to);
        }
        let preds = &mut self.nodes[to as usize].predecessors;
        if !preds.contains(&from) {
            preds.push(from);
        }
    }

    /// Attach the externally computed immediate dominator of `block`.
    pub fn set_immediate_dominator(&mut self, block: u32, idom: u32) {
        self.nodes[block as usize].idom = Some(idom);
    }

    /// Blocks in depth-first preorder from `start`.
    pub fn preorder(&self, start: u32) -> Vec<u32> {
        let mut order: Vec<u32> = Vec::with_capacity(self.nodes.len());
        self.visit_depth_first(start, &mut |_, id| order.push(id), &mut |_, _| {});
        order
    }

    /// Blocks in depth-first postorder from `start`.
    pub fn postorder(&self, start: u32) -> Vec<u32> {
        let mut order: Vec<u32> = Vec::with_capacity(self.nodes.len());
        self.visit_depth_first(start, &mut |_, _| {}, &mut |_, id| order.push(id));
        order
    }

    /// Blocks in reverse postorder from `start` (dataflow iteration order).
    pub fn reverse_postorder(&self, start: u32) -> Vec<u32> {
        let mut order = self.postorder(start);
        order.reverse();
        order
    }

    /// Iterative depth-first walk with entry and exit hooks.
    ///
    /// `pre` runs when a block is first reached, `post` after all of its
    /// successors have been fully visited. Each block is visited once.
    pub fn visit_depth_first(
        &self,
        start: u32,
        pre: &mut dyn FnMut(&Cfg, u32),
        post: &mut dyn FnMut(&Cfg, u32),
    ) {
        let mut visited: BitVec<u32> = bitvec![u32, Lsb0; 0; self.nodes.len()];
        // (block, expanded) pairs; a block is expanded once, then revisited
        // on the stack to fire its post hook
        let mut stack: Vec<(u32, bool)> = vec![(start, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                post(self, id);
                continue;
            }
            let idx = id as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited.set(idx, true);
            pre(self, id);
            stack.push((id, true));
            // Reverse so the first successor is visited first
            for &succ in self.nodes[idx].successors.iter().rev() {
                if !visited[succ as usize] {
                    stack.push((succ, false));
                }
            }
        }
    }

    /// Walk the immediate-dominator chain upward from `block`, exclusive.
    ///
    /// Returns the chain in walk order. A chain longer than the block count
    /// means the dominator links form a cycle, which is a compiler defect.
    pub fn dominator_chain(&self, block: u32) -> JitResult<Vec<u32>> {
        let mut chain: Vec<u32> = Vec::new();
        let mut current = self.nodes[block as usize].idom;
        while let Some(d) = current {
            chain.push(d);
            if chain.len() > self.nodes.len() {
                return Err(JitError::internal(format!(
                    "dominator chain from block {block} does not reach the graph root"
                )));
            }
            if d == ENTRY_BLOCK {
                break;
            }
            current = self.nodes[d as usize].idom;
        }
        Ok(chain)
    }
}
