pub mod bytecode;
pub mod cfg;
pub mod dump;
pub mod error;
pub mod ir;
pub mod opt;
pub mod pipeline;
pub mod program;
