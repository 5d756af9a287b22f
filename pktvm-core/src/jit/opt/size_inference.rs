//! Operand-Size Inference
//!
//! Determines, for every virtual register and every tree node, the minimal
//! bit width (1, 2, 4 or 8 bytes) required by all of its consumers, and
//! annotates nodes with that width for machine-code selection.
//!
//! # Algorithm
//! Three ordered sweeps over the CFG in an externally supplied traversal
//! order, plus a final rewrite, all monotone over the width lattice:
//! 1. **Find live-range sizes** (children before parents): compute a
//!    candidate width per node from access widths, arithmetic widening rules
//!    and literal magnitudes, and merge (max) the candidate into a
//!    per-register-identity table.
//! 2. **Propagate** (run twice so an increase found in the first round
//!    settles in the second): push each node's demanded width down into its
//!    subtrees, except into the address child of a memory access, which keeps
//!    its own natural width; every register identity touched on the way has
//!    its table entry raised to match.
//! 3. **Set live-range sizes** (children before parents): write each
//!    register's final table width onto every node referencing it and give
//!    every remaining unsized constant its resolved width.
//!
//! # Constant sizing heuristic
//! The literal is treated as negative when its top bit is set and sized by
//! the magnitude of its absolute value, with every size above a 16-bit word
//! collapsing to 4 bytes (no 24-bit granularity). This is a documented
//! heuristic, not a sound sign analysis: a 32-bit literal such as
//! `0xFFFF_FFF0` arrives zero-extended, reads as a positive magnitude and
//! sizes to 4 bytes, because such literals are legitimately full bit-masks
//! rather than negative numbers. Preserve the heuristic as-is.

use crate::jit::cfg::Cfg;
use crate::jit::ir::node::{IrArena, IrOp, NodeId, Payload};
use crate::jit::ir::registers::RegisterId;
use std::collections::HashMap;

/// Width in bytes a literal demands, by the documented heuristic.
pub fn const_size(value: i64) -> u8 {
    let magnitude: u64 = if value < 0 {
        value.wrapping_neg() as u64
    } else {
        value as u64
    };
    // Scan from the most significant byte down; sizes above a word collapse
    // into a doubleword
    if magnitude > 0xFFFF {
        4
    } else if magnitude > 0xFF {
        2
    } else {
        1
    }
}

/// Whole-program operand-size inference pass.
///
/// Holds the per-register-identity width table for one run; create a fresh
/// instance per invocation.
#[derive(Debug, Default)]
pub struct SizeInference {
    /// Maximal width demanded of each register identity, in bytes
    table: HashMap<RegisterId, u8>,
}

impl SizeInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the three sweeps over `order` (typically reverse postorder).
    ///
    /// Running the pass a second time on an already-sized CFG changes no
    /// node's width: every step is a max over the previous annotation.
    pub fn run(mut self, cfg: &mut Cfg, arena: &mut IrArena, order: &[u32]) {
        // Sweep 1: candidate widths, children before parents
        for &block in order {
            let stmts: Vec<NodeId> = cfg.nodes[block as usize].stmts.clone();
            for stmt in stmts {
                self.find_sizes(arena, stmt);
            }
        }

        // Sweep 2: demand propagation, twice so increases settle
        for _ in 0..2 {
            for &block in order {
                let stmts: Vec<NodeId> = cfg.nodes[block as usize].stmts.clone();
                for stmt in stmts {
                    self.propagate(arena, stmt, 0);
                }
            }
        }

        // Sweep 3: write final table widths and touch remaining constants
        for &block in order {
            let stmts: Vec<NodeId> = cfg.nodes[block as usize].stmts.clone();
            for stmt in stmts {
                self.finalize(arena, stmt);
            }
        }
    }

    /// Merge a candidate width into the register table, keeping the max.
    fn merge(&mut self, reg: RegisterId, width: u8) {
        if !reg.is_valid() || width == 0 {
            return;
        }
        let entry = self.table.entry(reg).or_insert(0);
        if width > *entry {
            *entry = width;
        }
    }

    /// Sweep 1 worker: returns the node's candidate width.
    fn find_sizes(&mut self, arena: &mut IrArena, id: NodeId) -> u8 {
        let kids = arena.node(id).kids;
        let mut kid_size = [0u8; 2];
        for (slot, kid) in kids.iter().enumerate() {
            if let Some(kid) = *kid {
                kid_size[slot] = self.find_sizes(arena, kid);
            }
        }

        let node = arena.node(id);
        let candidate: u8 = match node.op {
            IrOp::Const => match node.payload {
                Payload::Const(v) => const_size(v),
                _ => 0,
            },
            IrOp::MemLoad | IrOp::MemStore => {
                let width = match node.payload {
                    Payload::Mem { width, .. } => width,
                    _ => 0,
                };
                // Accessing memory nudges the address operand up to at least
                // word width
                if let Some(addr) = kids[0] {
                    self.raise_floor(arena, addr, 2);
                }
                width
            }
            // Two-operand widening ops take the max of both operands
            IrOp::Add | IrOp::Sub | IrOp::Mod | IrOp::Xor | IrOp::And | IrOp::Or => {
                kid_size[0].max(kid_size[1])
            }
            // Multiplication doubles the operand width, bounded by the
            // largest representable size
            IrOp::Mul => {
                let doubled = kid_size[0].max(kid_size[1]).saturating_mul(2);
                if doubled > 8 {
                    8
                } else {
                    doubled
                }
            }
            // Comparisons and register copies inherit a child's width
            IrOp::Jump | IrOp::RegStore => kid_size[0].max(kid_size[1]),
            IrOp::RegLoad => self.table.get(&node.reg).copied().unwrap_or(0),
            IrOp::Neg | IrOp::Not | IrOp::Shl | IrOp::Shr | IrOp::Rotl | IrOp::Rotr => kid_size[0],
            IrOp::Check | IrOp::Switch => kid_size[0].max(kid_size[1]),
            IrOp::Ret | IrOp::Coproc | IrOp::SendPkt => 0,
        };

        let node = arena.node_mut(id);
        if candidate > node.size {
            node.size = candidate;
        }
        let final_size = node.size;
        let reg = node.reg;
        self.merge(reg, final_size);
        final_size
    }

    /// Raise a node's width (and its register's table entry) to `floor`.
    fn raise_floor(&mut self, arena: &mut IrArena, id: NodeId, floor: u8) {
        let node = arena.node_mut(id);
        if node.size < floor {
            node.size = floor;
        }
        let reg = node.reg;
        self.merge(reg, floor);
    }

    /// Sweep 2 worker: push demanded widths down the tree.
    fn propagate(&mut self, arena: &mut IrArena, id: NodeId, suggestion: u8) {
        let (op, reg, size, kids) = {
            let node = arena.node(id);
            (node.op, node.reg, node.size, node.kids)
        };

        // Demand is the node's own annotation joined with its register's
        // table entry and the parent's suggestion
        let mut demand = size.max(suggestion);
        if reg.is_valid() {
            demand = demand.max(self.table.get(&reg).copied().unwrap_or(0));
            self.merge(reg, demand);
        }

        match op {
            IrOp::Const => {
                // A constant takes the parent's suggestion only if it has no
                // width yet, and the max of the two otherwise
                let node = arena.node_mut(id);
                if node.size == 0 {
                    node.size = suggestion;
                } else if suggestion > node.size {
                    node.size = suggestion;
                }
                let reg = node.reg;
                let size = node.size;
                self.merge(reg, size);
            }
            IrOp::MemLoad | IrOp::MemStore => {
                // The address child keeps its own natural width
                if let Some(addr) = kids[0] {
                    self.propagate(arena, addr, 0);
                }
                if op == IrOp::MemStore {
                    if let Some(value) = kids[1] {
                        self.propagate(arena, value, demand);
                    }
                }
            }
            _ => {
                if demand > size {
                    arena.node_mut(id).size = demand;
                }
                for kid in kids.into_iter().flatten() {
                    self.propagate(arena, kid, demand);
                }
            }
        }
    }

    /// Sweep 3 worker: finalize widths, children before parents.
    fn finalize(&mut self, arena: &mut IrArena, id: NodeId) {
        let kids = arena.node(id).kids;
        for kid in kids.into_iter().flatten() {
            self.finalize(arena, kid);
        }

        let node = arena.node_mut(id);
        if node.reg.is_valid() {
            if let Some(&width) = self.table.get(&node.reg) {
                if width > node.size {
                    node.size = width;
                }
            }
        }
        if node.op == IrOp::Const && node.size == 0 {
            if let Payload::Const(v) = node.payload {
                node.size = const_size(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_magnitudes() {
        assert_eq!(const_size(0), 1);
        assert_eq!(const_size(0xFF), 1);
        assert_eq!(const_size(0x100), 2);
        assert_eq!(const_size(0xFFFF), 2);
        assert_eq!(const_size(0x10000), 4);
        // Sizes above a word collapse into a doubleword
        assert_eq!(const_size(0xFF_FFFF), 4);
    }

    #[test]
    fn negative_literals_size_by_magnitude() {
        assert_eq!(const_size(-16), 1);
        assert_eq!(const_size(-300), 2);
        // A zero-extended 32-bit mask reads as a positive magnitude
        assert_eq!(const_size(0xFFFF_FFF0u32 as i64), 4);
    }
}
