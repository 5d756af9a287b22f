//! Serialized Program Descriptions
//!
//! A [`Program`] is the serde-loadable form of one compilation unit: the
//! analyzed instruction records of each input-port segment, the compilation
//! options, and (optionally) the externally computed immediate-dominator
//! table. The CLI and the test suite feed the pipeline through this type;
//! in-process callers can invoke the builder/translator stages directly.

use crate::jit::bytecode::InsnRecord;
use crate::jit::pipeline::JitOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One bytecode segment, entered from a logical input port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Input port whose traffic enters this segment
    pub port: u32,
    /// Analyzer records; the array index of a record is its pc
    pub insns: Vec<InsnRecord>,
}

/// Externally computed immediate dominator of one block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdomEntry {
    pub block: u32,
    pub idom: u32,
}

/// A complete compilation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub options: JitOptions,
    /// Immediate-dominator table, attached to blocks before check elimination
    #[serde(default)]
    pub idoms: Vec<IdomEntry>,
}

impl Program {
    /// Parse a program description from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid program description")
    }

    /// Load a program description from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text)
    }
}
