//! CFG Builder
//!
//! Consumes the per-instruction analysis records of one bytecode segment and
//! produces the basic-block skeleton plus control edges. Instruction lists
//! stay empty here; the translator fills them afterwards.
//!
//! # Construction Algorithm
//! 1. **Block pass**: a linear scan opens a new block at every leader-flagged
//!    instruction and extends the current block otherwise, recording the
//!    leader pc → block id map for this segment.
//! 2. **Edge pass**: at every block-end instruction, edges are resolved from
//!    the declared successor arity (none → fallthrough, one → branch target,
//!    two → both), from the switch case table, or to the EXIT sentinel for
//!    return-flagged instructions.
//!
//! An ENTRY edge to the segment's first block is always added. Block ids
//! continue from the current block count, so repeated invocations extend one
//! shared CFG (one sub-graph per logical input port); the optional handler
//! tag is propagated onto every block the invocation creates.
//!
//! A branch or switch target that is not a block leader is a malformed-
//! bytecode error, never silently tolerated.

use crate::jit::bytecode::{InsnRecord, SuccessorArity};
use crate::jit::cfg::{Cfg, ENTRY_BLOCK, EXIT_BLOCK};
use crate::jit::error::{JitError, JitResult};
use std::collections::HashMap;

/// Result of one builder invocation over one bytecode segment.
///
/// The leader map is needed again by the translator to resolve jump and
/// switch targets from instruction indices to block ids.
#[derive(Debug, Clone)]
pub struct BuiltRegion {
    /// First block created by this invocation
    pub entry_block: u32,
    /// Ids of every block created by this invocation, in creation order
    pub blocks: Vec<u32>,
    /// Leader pc → block id for this segment
    pub leaders: HashMap<u32, u32>,
}

impl BuiltRegion {
    /// Resolve a branch/switch target pc to its basic block.
    ///
    /// # Errors
    /// `MalformedBytecode` if the target is not a block leader. The `at` pc
    /// identifies the referencing instruction for the diagnostic.
    pub fn resolve(&self, target: u32, at: u32) -> JitResult<u32> {
        self.leaders.get(&target).copied().ok_or_else(|| {
            JitError::malformed(at, format!("branch target {target} is not a block leader"))
        })
    }
}

/// Builder producing the basic-block skeleton of a CFG.
pub struct CfgBuilder;

impl CfgBuilder {
    /// Extend `cfg` with the blocks and edges of one bytecode segment.
    ///
    /// # Arguments
    /// * `cfg` - Graph to extend (sentinels already present)
    /// * `insns` - Analysis records; the array index of a record is its pc
    /// * `handler` - Opaque tag stamped on every block this invocation creates
    ///
    /// # Errors
    /// `MalformedBytecode` if the segment is empty, does not start with a
    /// leader, or references a branch/switch target that is not a leader.
    pub fn extend(
        cfg: &mut Cfg,
        insns: &[InsnRecord],
        handler: Option<u32>,
    ) -> JitResult<BuiltRegion> {
        if insns.is_empty() {
            return Err(JitError::malformed(0, "empty bytecode segment"));
        }
        if !insns[0].flags.leader {
            return Err(JitError::malformed(
                0,
                "first instruction of a segment must be a block leader",
            ));
        }

        // Block pass: open a block per leader, extend otherwise
        let mut leaders: HashMap<u32, u32> = HashMap::new();
        let mut blocks: Vec<u32> = Vec::new();
        let mut current: u32 = u32::MAX;
        for (pc, insn) in insns.iter().enumerate() {
            let pc = pc as u32;
            if insn.flags.leader {
                current = cfg.add_block(pc, handler);
                leaders.insert(pc, current);
                blocks.push(current);
            } else {
                cfg.nodes[current as usize].end_pc = pc;
            }
        }

        let region = BuiltRegion {
            entry_block: blocks[0],
            blocks,
            leaders,
        };
        cfg.add_edge(ENTRY_BLOCK, region.entry_block);

        // Edge pass: resolve successors at every block end
        for (pc, insn) in insns.iter().enumerate() {
            let pc = pc as u32;
            if !insn.flags.block_end {
                continue;
            }
            let block = Self::block_of(&region, cfg, pc)?;

            if insn.arity == SuccessorArity::Switch {
                cfg.add_edge(block, region.resolve(insn.switch_default, pc)?);
                for &(_, case_target) in insn.switch_cases.iter() {
                    cfg.add_edge(block, region.resolve(case_target, pc)?);
                }
            } else if insn.flags.ret {
                cfg.add_edge(block, EXIT_BLOCK);
            } else {
                match insn.arity {
                    SuccessorArity::None => {
                        cfg.add_edge(block, region.resolve(pc + 1, pc)?);
                    }
                    SuccessorArity::One => {
                        cfg.add_edge(block, region.resolve(insn.target, pc)?);
                    }
                    SuccessorArity::Two => {
                        cfg.add_edge(block, region.resolve(insn.target, pc)?);
                        cfg.add_edge(block, region.resolve(pc + 1, pc)?);
                    }
                    SuccessorArity::Switch => unreachable!(),
                }
            }
        }

        Ok(region)
    }

    /// Block containing `pc`, walking back to the nearest leader.
    fn block_of(region: &BuiltRegion, cfg: &Cfg, pc: u32) -> JitResult<u32> {
        let mut p = pc;
        loop {
            if let Some(&b) = region.leaders.get(&p) {
                // The record range must actually cover pc
                if cfg.nodes[b as usize].end_pc >= pc {
                    return Ok(b);
                }
                return Err(JitError::internal(format!(
                    "block {b} does not cover its block-end instruction at pc {pc}"
                )));
            }
            if p == 0 {
                return Err(JitError::malformed(pc, "instruction precedes every leader"));
            }
            p -= 1;
        }
    }
}
