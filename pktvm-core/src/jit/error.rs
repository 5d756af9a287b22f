//! JIT Error Handling
//!
//! This module provides the error types for the JIT middle-end using `thiserror`.
//! All errors are unrecoverable at the point of detection: none of them may be
//! downgraded to a warning or silently tolerated.
//!
//! # Error Categories
//! - **Malformed bytecode**: unresolved branch/switch targets, unknown opcodes,
//!   stack imbalance the verifier should have caught
//! - **Static bounds violations**: compile-time-constant accesses proven to
//!   exceed the declared size of a memory region
//! - **Internal invariant violations**: defects in the compiler itself (bad
//!   node ownership, runaway dominator walks)

use thiserror::Error;

/// JIT middle-end error types.
///
/// Uses `thiserror` for zero-cost error handling with detailed messages.
/// The two bytecode-facing variants carry the offending program counter so the
/// report is actionable; internal errors only carry enough to reproduce, since
/// they indicate a bug in the compiler rather than in the compiled program.
#[derive(Error, Debug, Clone)]
pub enum JitError {
    /// The bytecode violates a structural assumption of the builder or
    /// translator (branch into the middle of a block, unknown opcode,
    /// operand stack underflow).
    #[error("malformed bytecode at pc {pc}: {message}")]
    MalformedBytecode { pc: u32, message: String },

    /// A compile-time-constant memory access exceeds the declared size of the
    /// targeted memory region. This aborts compilation; it is never emitted as
    /// a runtime check.
    #[error("static out-of-bounds access at pc {pc}: offset {offset} exceeds {region} region of size {size}")]
    StaticBoundsViolation {
        pc: u32,
        offset: i64,
        region: &'static str,
        size: u32,
    },

    /// An internal invariant of the compiler does not hold. This is a defect
    /// in the JIT, not in the compiled program, and must fail loudly.
    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl JitError {
    /// Create a malformed-bytecode error with context.
    pub fn malformed(pc: u32, message: impl Into<String>) -> Self {
        Self::MalformedBytecode {
            pc,
            message: message.into(),
        }
    }

    /// Create an internal-invariant error with context.
    #[cold] // Error paths are cold
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the JIT middle-end.
pub type JitResult<T> = Result<T, JitError>;
