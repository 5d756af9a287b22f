// CLI application
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pktvm_cli::commands::{compile_program, dump_cfg_only};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pktvm")]
#[command(about = "Packet-filter bytecode JIT driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the full middle-end pipeline on a program description
    Compile {
        /// Path to the JSON program description
        #[arg(short, long)]
        program: PathBuf,

        /// Write the IR dump to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the program's optimization level
        #[arg(long)]
        opt_level: Option<u8>,

        /// Disable bounds-check synthesis
        #[arg(long)]
        no_bounds_check: bool,

        /// Enable the dominator/path-merge elimination variants
        #[arg(long)]
        cross_block: bool,

        /// Print pipeline statistics as JSON
        #[arg(long)]
        stats: bool,
    },
    /// Build and print the CFG skeleton without translating
    DumpCfg {
        /// Path to the JSON program description
        #[arg(short, long)]
        program: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            program,
            output,
            opt_level,
            no_bounds_check,
            cross_block,
            stats,
        } => {
            let pb = create_progress_bar("Compiling filter program...");
            compile_program(
                &program,
                output.as_deref(),
                opt_level,
                no_bounds_check,
                cross_block,
                stats,
            )?;
            pb.finish_with_message("Compilation complete");
        }
        Commands::DumpCfg { program } => {
            let pb = create_progress_bar("Building CFG...");
            dump_cfg_only(&program)?;
            pb.finish_with_message("CFG built");
        }
    }

    Ok(())
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb
}
