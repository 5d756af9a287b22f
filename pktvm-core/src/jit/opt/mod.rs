//! Whole-program IR Passes
//!
//! Both passes run after translation, strictly in order: operand-size
//! inference first, then redundant bounds-check elimination. Each consumes
//! and rewrites the CFG's tree IR in place.

pub mod bounds_elim;
pub mod size_inference;
