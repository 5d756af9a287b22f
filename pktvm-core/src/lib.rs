//! pktvm-core: JIT middle-end for a packet-processing bytecode VM.
//!
//! Translates verified stack-machine bytecode into sized, bounds-check
//! minimized tree IR over a control-flow graph, ready for SSA construction,
//! register allocation and machine-code emission.

pub mod jit;
