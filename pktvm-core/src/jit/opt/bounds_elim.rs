//! Redundant Bounds-Check Elimination
//!
//! Removes or folds bounds-check nodes (packet/info/data) that are provably
//! implied by an earlier check on the same path, and turns checks against a
//! statically sized region with a constant offset into compile-time errors
//! when they cannot succeed.
//!
//! # Classification
//! A check's offset expression is classified into a cache key:
//! - two compile-time constants → key `Constant`, bound = their sum plus the
//!   check length
//! - a register load, optionally inside an add with a constant → key = the
//!   register identity, bound = the constant addend (0 if none) plus the
//!   check length
//! Anything else (offsets derived from loads, dynamic lengths) is left in
//! place and counted as not optimizable.
//!
//! # Variants
//! - **Per-block** (optimization level ≥ 1): each block keeps at most one
//!   cached (key → max offset, valid) entry per memory kind. A later check
//!   whose key matches a still-valid entry is removed when the cached bound
//!   covers it; a later check with a larger bound is kept, its constant
//!   offset recomputation folded, and it becomes the new cached bound. A
//!   cached bound eliminates at most one downstream check.
//! - **Dominator-based** (level ≥ 2, additionally gated by the explicit
//!   `cross_block_elim` flag): the per-block caches of the dominator chain
//!   are consulted the same way.
//! - **Path-merge** (same gate): a cycle-safe depth-first union of bounds
//!   across all predecessors of every block feeding a send terminal produces
//!   one path-safe worst-case bound per key. A back edge aborts that branch
//!   of the walk, so checks on a cyclic path are never unsoundly eliminated.

use crate::jit::bytecode::MemKind;
use crate::jit::cfg::{Cfg, ENTRY_BLOCK};
use crate::jit::error::{JitError, JitResult};
use crate::jit::ir::node::{IrArena, IrOp, NodeId, Payload};
use crate::jit::ir::registers::RegisterId;
use crate::jit::ir::translate::CheckLinks;
use crate::jit::pipeline::JitOptions;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome counters reported by the pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BoundsElimStats {
    /// Checks removed outright
    pub removed: usize,
    /// Checks kept with their offset recomputation folded
    pub rewritten: usize,
    /// Checks whose offset or length could not be classified
    pub not_optimizable: usize,
}

/// Cache key of a classified check offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckKey {
    /// Offset is a compile-time constant (or a sum of two)
    Constant,
    /// Offset is a register, optionally plus a constant
    Reg(RegisterId),
}

/// Per-block, per-memory-kind cached bound.
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    key: CheckKey,
    bound: i64,
    /// Consumed after eliminating one downstream check
    valid: bool,
}

/// Decision taken against the per-block cache.
enum CacheAction {
    Remove,
    Fold,
    Seed,
}

/// A classified check, ready for cache comparison.
#[derive(Debug, Clone, Copy)]
struct Classified {
    kind: MemKind,
    key: CheckKey,
    /// Constant offset part plus check length
    bound: i64,
}

/// Bounds-check elimination pass over a translated, sized CFG.
#[derive(Debug, Default)]
pub struct BoundsElim {
    cache: HashMap<(u32, MemKind), CacheEntry>,
    stats: BoundsElimStats,
}

impl BoundsElim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pass over `order` (typically reverse postorder).
    pub fn run(
        mut self,
        cfg: &mut Cfg,
        arena: &mut IrArena,
        links: &mut CheckLinks,
        opts: &JitOptions,
        order: &[u32],
    ) -> JitResult<BoundsElimStats> {
        if opts.opt_level == 0 {
            return Ok(self.stats);
        }

        self.local_pass(cfg, arena, links, opts, order)?;

        if opts.opt_level >= 2 && opts.cross_block_elim {
            self.dominator_pass(cfg, arena, links, order)?;
            self.path_merge_pass(cfg, arena, links)?;
        }

        log::debug!(
            "bounds-check elimination: {} removed, {} rewritten, {} not optimizable",
            self.stats.removed,
            self.stats.rewritten,
            self.stats.not_optimizable
        );
        Ok(self.stats)
    }

    /// Per-block analysis and rewrite, single pass in statement order.
    fn local_pass(
        &mut self,
        cfg: &mut Cfg,
        arena: &mut IrArena,
        links: &mut CheckLinks,
        opts: &JitOptions,
        order: &[u32],
    ) -> JitResult<()> {
        for &block in order {
            if cfg.nodes[block as usize].is_sentinel() {
                continue;
            }
            let checks = check_stmts(cfg, arena, block);
            for check in checks {
                let classified = match self.classify(arena, check)? {
                    Some(c) => c,
                    None => {
                        self.stats.not_optimizable += 1;
                        continue;
                    }
                };
                self.static_violation(arena, check, &classified, opts)?;

                let fresh = CacheEntry {
                    key: classified.key,
                    bound: classified.bound,
                    valid: true,
                };
                let action = match self.cache.get_mut(&(block, classified.kind)) {
                    Some(entry) if entry.valid && entry.key == classified.key => {
                        if entry.bound >= classified.bound {
                            entry.valid = false;
                            CacheAction::Remove
                        } else {
                            // The larger check survives as the covering one;
                            // its constant recomputation is folded away and
                            // the superseded entry is consumed
                            *entry = fresh;
                            CacheAction::Fold
                        }
                    }
                    _ => CacheAction::Seed,
                };
                match action {
                    CacheAction::Remove => self.remove_check(cfg, arena, links, block, check)?,
                    CacheAction::Fold => {
                        fold_offset(arena, check)?;
                        self.stats.rewritten += 1;
                    }
                    CacheAction::Seed => {
                        self.cache.insert((block, classified.kind), fresh);
                    }
                }
            }
        }
        Ok(())
    }

    /// Dominator-chain analysis: a check is covered by a still-valid bound
    /// cached in any of its block's dominators.
    fn dominator_pass(
        &mut self,
        cfg: &mut Cfg,
        arena: &mut IrArena,
        links: &mut CheckLinks,
        order: &[u32],
    ) -> JitResult<()> {
        for &block in order {
            if cfg.nodes[block as usize].is_sentinel() {
                continue;
            }
            let chain = cfg.dominator_chain(block)?;
            let checks = check_stmts(cfg, arena, block);
            for check in checks {
                let classified = match self.classify(arena, check)? {
                    Some(c) => c,
                    None => continue,
                };
                for &dom in chain.iter() {
                    let covered = match self.cache.get_mut(&(dom, classified.kind)) {
                        Some(entry) if entry.valid && entry.key == classified.key => {
                            if entry.bound >= classified.bound {
                                entry.valid = false;
                                true
                            } else {
                                false
                            }
                        }
                        _ => continue,
                    };
                    if covered {
                        self.remove_check(cfg, arena, links, block, check)?;
                    } else {
                        // The dominator's smaller bound cannot cover this
                        // check; keep it with its recomputation folded
                        fold_offset(arena, check)?;
                        self.stats.rewritten += 1;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// Path-merge analysis toward the send terminals.
    fn path_merge_pass(
        &mut self,
        cfg: &mut Cfg,
        arena: &mut IrArena,
        links: &mut CheckLinks,
    ) -> JitResult<()> {
        // Every block from which a send terminal is reachable participates
        let feeders = send_feeders(cfg, arena);
        for block in 0..cfg.block_count() as u32 {
            if !feeders[block as usize] || cfg.nodes[block as usize].is_sentinel() {
                continue;
            }
            let checks = check_stmts(cfg, arena, block);
            for check in checks {
                let classified = match self.classify(arena, check)? {
                    Some(c) => c,
                    None => continue,
                };
                let mut on_path: BitVec<u32> = bitvec![u32, Lsb0; 0; cfg.block_count()];
                on_path.set(block as usize, true);
                let merged = self.merge_pred_bounds(cfg, block, &classified, &mut on_path, 0)?;
                if let Some(bound) = merged {
                    if bound >= classified.bound {
                        self.remove_check(cfg, arena, links, block, check)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Union (minimum) of the cached bounds across all predecessor paths.
    ///
    /// Returns `None` when any path reaches ENTRY without a bound or closes a
    /// cycle; the caller must then leave the check in place.
    fn merge_pred_bounds(
        &self,
        cfg: &Cfg,
        block: u32,
        classified: &Classified,
        on_path: &mut BitVec<u32>,
        depth: usize,
    ) -> JitResult<Option<i64>> {
        if depth > cfg.block_count() {
            return Err(JitError::internal(
                "predecessor walk exceeded the block count",
            ));
        }
        let preds: Vec<u32> = cfg.nodes[block as usize].predecessors.to_vec();
        if preds.is_empty() {
            return Ok(None);
        }
        let mut worst: Option<i64> = None;
        for &pred in preds.iter() {
            if pred == ENTRY_BLOCK {
                // No bound is proven on the path from entry
                return Ok(None);
            }
            if on_path[pred as usize] {
                // Back edge: abort this branch of the walk
                return Ok(None);
            }
            let bound = match self.cache.get(&(pred, classified.kind)) {
                Some(entry) if entry.valid && entry.key == classified.key => entry.bound,
                _ => {
                    on_path.set(pred as usize, true);
                    let merged = self.merge_pred_bounds(cfg, pred, classified, on_path, depth + 1)?;
                    on_path.set(pred as usize, false);
                    match merged {
                        Some(b) => b,
                        None => return Ok(None),
                    }
                }
            };
            worst = Some(match worst {
                Some(w) => w.min(bound),
                None => bound,
            });
        }
        Ok(worst)
    }

    /// Classify a check's offset and length expressions.
    fn classify(&self, arena: &IrArena, check: NodeId) -> JitResult<Option<Classified>> {
        let node = arena.node(check);
        let kind = match node.payload {
            Payload::Mem { kind, .. } => kind,
            _ => {
                return Err(JitError::internal(format!(
                    "check node {check} carries no memory payload"
                )))
            }
        };
        let (offset, length) = match (node.kids[0], node.kids[1]) {
            (Some(o), Some(l)) => (o, l),
            _ => {
                return Err(JitError::internal(format!(
                    "check node {check} is missing an operand"
                )))
            }
        };

        // The length must be a compile-time constant
        let length = match const_value(arena, length) {
            Some(l) => l,
            None => return Ok(None),
        };

        let off = arena.node(offset);
        let (key, base) = match off.op {
            IrOp::Const => match const_value(arena, offset) {
                Some(v) => (CheckKey::Constant, v),
                None => return Ok(None),
            },
            IrOp::RegLoad => (CheckKey::Reg(off.reg), 0),
            IrOp::Add => {
                let a = off.kids[0];
                let b = off.kids[1];
                match (a, b) {
                    (Some(a), Some(b)) => {
                        match (const_value(arena, a), const_value(arena, b)) {
                            // Two compile-time constants sum into one key
                            (Some(x), Some(y)) => (CheckKey::Constant, x + y),
                            (Some(c), None) if arena.node(b).op == IrOp::RegLoad => {
                                (CheckKey::Reg(arena.node(b).reg), c)
                            }
                            (None, Some(c)) if arena.node(a).op == IrOp::RegLoad => {
                                (CheckKey::Reg(arena.node(a).reg), c)
                            }
                            _ => return Ok(None),
                        }
                    }
                    _ => return Ok(None),
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(Classified {
            kind,
            key,
            bound: base + length,
        }))
    }

    /// Abort compilation for a constant check that exceeds a statically
    /// sized region.
    fn static_violation(
        &self,
        arena: &IrArena,
        check: NodeId,
        classified: &Classified,
        opts: &JitOptions,
    ) -> JitResult<()> {
        if classified.key != CheckKey::Constant {
            return Ok(());
        }
        if let Some(size) = opts.region_size(classified.kind) {
            if classified.bound > i64::from(size) {
                return Err(JitError::StaticBoundsViolation {
                    pc: arena.node(check).pc,
                    offset: classified.bound,
                    region: classified.kind.as_str(),
                    size,
                });
            }
        }
        Ok(())
    }

    /// Remove a covered check from its block and forget its access link.
    fn remove_check(
        &mut self,
        cfg: &mut Cfg,
        arena: &mut IrArena,
        links: &mut CheckLinks,
        block: u32,
        check: NodeId,
    ) -> JitResult<()> {
        arena.remove_stmt(&mut cfg.nodes[block as usize].stmts, block, check)?;
        links.unlink_check(check);
        self.stats.removed += 1;
        Ok(())
    }
}

/// Fold a constant-plus-constant offset recomputation into one literal.
fn fold_offset(arena: &mut IrArena, check: NodeId) -> JitResult<()> {
    let offset = match arena.node(check).kids[0] {
        Some(o) => o,
        None => return Ok(()),
    };
    let node = arena.node(offset);
    if node.op != IrOp::Add {
        return Ok(());
    }
    let (a, b) = match (node.kids[0], node.kids[1]) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(()),
    };
    if let (Some(x), Some(y)) = (const_value(arena, a), const_value(arena, b)) {
        let pc = arena.node(check).pc;
        if arena.take_kid(check, 0).is_none() {
            return Err(JitError::internal("check offset vanished during fold"));
        }
        let folded = arena.alloc(IrOp::Const, Payload::Const(x + y), pc);
        arena.set_kid(check, 0, folded)?;
    }
    Ok(())
}

/// Literal value of a constant node.
fn const_value(arena: &IrArena, id: NodeId) -> Option<i64> {
    let node = arena.node(id);
    if node.op == IrOp::Const {
        if let Payload::Const(v) = node.payload {
            return Some(v);
        }
    }
    None
}

/// Check statements of a block, in list order.
fn check_stmts(cfg: &Cfg, arena: &IrArena, block: u32) -> Vec<NodeId> {
    cfg.nodes[block as usize]
        .stmts
        .iter()
        .copied()
        .filter(|&s| arena.node(s).op == IrOp::Check)
        .collect()
}

/// Blocks from which a send terminal is reachable, terminals included.
fn send_feeders(cfg: &Cfg, arena: &IrArena) -> BitVec<u32> {
    let mut feeders: BitVec<u32> = bitvec![u32, Lsb0; 0; cfg.block_count()];
    let mut work: Vec<u32> = Vec::new();
    for block in cfg.nodes.iter() {
        let is_terminal = block
            .stmts
            .iter()
            .any(|&s| arena.node(s).op == IrOp::SendPkt);
        if is_terminal {
            work.push(block.id);
        }
    }
    while let Some(b) = work.pop() {
        if feeders[b as usize] {
            continue;
        }
        feeders.set(b as usize, true);
        for &pred in cfg.nodes[b as usize].predecessors.iter() {
            if !feeders[pred as usize] {
                work.push(pred);
            }
        }
    }
    feeders
}
