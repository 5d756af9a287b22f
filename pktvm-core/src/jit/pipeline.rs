//! Compilation Pipeline
//!
//! Orchestrates the JIT middle-end stages strictly in order over one shared
//! CFG: build → translate → size inference → bounds-check elimination. No
//! stage begins before the previous one fully completes, and nothing here is
//! concurrent: this is an offline, single-threaded compilation step.
//!
//! The pipeline hands back a [`JitSession`] whose CFG holds fully typed,
//! sized tree IR with bounds checks minimized, ready for SSA construction,
//! register allocation and machine-code emission (all outside this crate).

use crate::jit::bytecode::{InsnRecord, MemKind};
use crate::jit::cfg::builder::{BuiltRegion, CfgBuilder};
use crate::jit::cfg::{Cfg, ENTRY_BLOCK};
use crate::jit::error::JitResult;
use crate::jit::ir::node::IrArena;
use crate::jit::ir::registers::RegisterPool;
use crate::jit::ir::translate::{CheckLinks, Translator};
use crate::jit::opt::bounds_elim::BoundsElim;
use crate::jit::opt::size_inference::SizeInference;
use crate::jit::program::Program;
use serde::{Deserialize, Serialize};

/// Recognized compilation options.
///
/// Non-default optimization behavior is opt-in: the per-block bounds-check
/// pass runs from level 1, and the dominator/path-merge variants additionally
/// require both level 2 and the explicit `cross_block_elim` gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitOptions {
    /// Synthesize bounds checks for memory and pattern-match accesses
    pub bounds_check: bool,
    /// Optimization level (0 disables check elimination entirely)
    pub opt_level: u8,
    /// Gate for the dominator-chain and path-merge elimination variants
    pub cross_block_elim: bool,
    /// Statically declared packet-buffer size, if any
    pub packet_size: Option<u32>,
    /// Statically declared info-memory size, if any
    pub info_size: Option<u32>,
    /// Statically declared data-memory size, if any
    pub data_size: Option<u32>,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            bounds_check: true,
            opt_level: 1,
            cross_block_elim: false,
            packet_size: None,
            info_size: None,
            data_size: None,
        }
    }
}

impl JitOptions {
    /// Statically declared size of a memory region, if known.
    pub fn region_size(&self, kind: MemKind) -> Option<u32> {
        match kind {
            MemKind::Packet => self.packet_size,
            MemKind::Info => self.info_size,
            MemKind::Data => self.data_size,
        }
    }
}

/// Statistics collected during pipeline execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub segments: usize,
    pub blocks: usize,
    pub ir_nodes: usize,
    pub checks_emitted: usize,
    pub checks_removed: usize,
    pub checks_rewritten: usize,
    pub checks_not_optimizable: usize,
}

/// State of one compilation session.
///
/// Owns the CFG, the IR arena, the register pool and the access↔check link
/// table. All of it is scoped to this session: dropping the session discards
/// every interned register identity and every node.
#[derive(Debug)]
pub struct JitSession {
    pub cfg: Cfg,
    pub arena: IrArena,
    pub pool: RegisterPool,
    pub links: CheckLinks,
    pub options: JitOptions,
    pub stats: PipelineStats,
    /// Regions built so far, one per segment
    pub regions: Vec<BuiltRegion>,
}

impl JitSession {
    /// Open a session with an empty CFG (sentinels only).
    pub fn new(options: JitOptions) -> Self {
        Self {
            cfg: Cfg::new(),
            arena: IrArena::new(),
            pool: RegisterPool::new(),
            links: CheckLinks::new(),
            options,
            stats: PipelineStats::default(),
            regions: Vec::new(),
        }
    }
}

/// Pipeline orchestrator.
pub struct JitPipeline;

impl JitPipeline {
    /// Compile a whole program description into a finished session.
    ///
    /// # Errors
    /// Any stage error (malformed bytecode, static bounds violation,
    /// internal invariant) aborts the compilation.
    pub fn compile(program: &Program) -> JitResult<JitSession> {
        let mut session = JitSession::new(program.options.clone());

        log::info!(
            "compiling {} segment(s), opt level {}",
            program.segments.len(),
            session.options.opt_level
        );

        // Stage 1+2 per segment: build the skeleton, then translate it
        for segment in program.segments.iter() {
            let region = Self::stage_build(&mut session, &segment.insns, Some(segment.port))?;
            Self::stage_translate(&mut session, &segment.insns, &region)?;
            session.regions.push(region);
            session.stats.segments += 1;
        }

        // Externally computed dominators arrive with the program description
        for entry in program.idoms.iter() {
            session.cfg.set_immediate_dominator(entry.block, entry.idom);
        }

        Self::stage_infer_sizes(&mut session);
        Self::stage_eliminate_checks(&mut session)?;

        session.stats.blocks = session.cfg.block_count();
        session.stats.ir_nodes = session.arena.len();
        log::info!(
            "compilation complete: {} blocks, {} nodes, {}/{} checks removed",
            session.stats.blocks,
            session.stats.ir_nodes,
            session.stats.checks_removed,
            session.stats.checks_emitted
        );
        Ok(session)
    }

    /// Stage: extend the CFG with one bytecode segment.
    pub fn stage_build(
        session: &mut JitSession,
        insns: &[InsnRecord],
        handler: Option<u32>,
    ) -> JitResult<BuiltRegion> {
        log::info!("stage: building CFG ({} instructions)", insns.len());
        CfgBuilder::extend(&mut session.cfg, insns, handler)
    }

    /// Stage: translate one built segment into tree IR.
    pub fn stage_translate(
        session: &mut JitSession,
        insns: &[InsnRecord],
        region: &BuiltRegion,
    ) -> JitResult<()> {
        log::info!("stage: translating from block {}", region.entry_block);
        let translator = Translator::new(
            &mut session.cfg,
            &mut session.arena,
            &mut session.pool,
            &mut session.links,
            insns,
            region,
            &session.options,
        );
        let emitted = translator.run(region.entry_block)?;
        session.stats.checks_emitted += emitted;
        Ok(())
    }

    /// Stage: operand-size inference over the whole CFG.
    pub fn stage_infer_sizes(session: &mut JitSession) {
        log::info!("stage: inferring operand sizes");
        let order = session.cfg.reverse_postorder(ENTRY_BLOCK);
        SizeInference::new().run(&mut session.cfg, &mut session.arena, &order);
    }

    /// Stage: redundant bounds-check elimination.
    pub fn stage_eliminate_checks(session: &mut JitSession) -> JitResult<()> {
        log::info!("stage: eliminating redundant bounds checks");
        let order = session.cfg.reverse_postorder(ENTRY_BLOCK);
        let stats = BoundsElim::new().run(
            &mut session.cfg,
            &mut session.arena,
            &mut session.links,
            &session.options,
            &order,
        )?;
        session.stats.checks_removed += stats.removed;
        session.stats.checks_rewritten += stats.rewritten;
        session.stats.checks_not_optimizable += stats.not_optimizable;
        Ok(())
    }
}
