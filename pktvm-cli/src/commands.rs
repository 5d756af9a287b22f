//! CLI command implementations.

use anyhow::{Context, Result};
use pktvm_core::jit::cfg::builder::CfgBuilder;
use pktvm_core::jit::cfg::Cfg;
use pktvm_core::jit::dump::dump_cfg;
use pktvm_core::jit::pipeline::JitPipeline;
use pktvm_core::jit::program::Program;
use std::path::Path;

/// Run the full pipeline on a program description and emit the IR dump.
pub fn compile_program(
    program_path: &Path,
    output: Option<&Path>,
    opt_level: Option<u8>,
    no_bounds_check: bool,
    cross_block: bool,
    stats: bool,
) -> Result<()> {
    let mut program = Program::from_file(program_path)?;
    if let Some(level) = opt_level {
        program.options.opt_level = level;
    }
    if no_bounds_check {
        program.options.bounds_check = false;
    }
    if cross_block {
        program.options.cross_block_elim = true;
    }

    let session = JitPipeline::compile(&program)?;
    let listing = dump_cfg(&session.cfg, &session.arena);

    match output {
        Some(path) => {
            std::fs::write(path, listing)
                .with_context(|| format!("writing {}", path.display()))?;
            log::info!("IR dump written to {}", path.display());
        }
        None => print!("{listing}"),
    }

    if stats {
        println!("{}", serde_json::to_string_pretty(&session.stats)?);
    }
    Ok(())
}

/// Build the CFG skeleton only and print it.
pub fn dump_cfg_only(program_path: &Path) -> Result<()> {
    let program = Program::from_file(program_path)?;
    let mut cfg = Cfg::new();
    for segment in program.segments.iter() {
        CfgBuilder::extend(&mut cfg, &segment.insns, Some(segment.port))?;
    }
    let arena = pktvm_core::jit::ir::node::IrArena::new();
    print!("{}", dump_cfg(&cfg, &arena));
    Ok(())
}
