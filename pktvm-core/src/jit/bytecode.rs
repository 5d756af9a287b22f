//! Packet-Filter Bytecode Definitions
//!
//! This module defines the stack-machine opcode set consumed by the CFG
//! builder and the IR translator, together with the per-instruction analysis
//! records produced by the external bytecode verifier.
//!
//! The JIT never decodes raw bytes itself: the verifier/analyzer runs first
//! and hands over one [`InsnRecord`] per instruction, already annotated with
//! block-leader/block-end flags, successor arity and resolved branch targets.
//!
//! # Memory Optimizations
//! - `Opcode`, `MemKind`, `SuccessorArity` and `OpCategory` use `#[repr(u8)]`
//! - Switch case tables use a plain `Vec` (only SWITCH instructions carry one)

use serde::{Deserialize, Serialize};

/// Memory region addressed by a load, store or bounds check.
///
/// The virtual machine exposes three byte-addressable regions: the packet
/// buffer itself, the per-packet info (metadata) area, and the filter's
/// private data memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)] // 1 byte per value
pub enum MemKind {
    /// The packet buffer (runtime-sized unless declared otherwise)
    Packet = 0,
    /// The per-packet info/metadata area
    Info = 1,
    /// The filter's private data memory
    Data = 2,
}

impl MemKind {
    /// Short region name used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            MemKind::Packet => "packet",
            MemKind::Info => "info",
            MemKind::Data => "data",
        }
    }
}

/// Number of control-flow successors an instruction declares.
///
/// Produced by the external analyzer; the builder trusts it when resolving
/// edges at block ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)] // 1 byte per value
pub enum SuccessorArity {
    /// Implicit fallthrough to pc+1
    None = 0,
    /// One explicit branch target
    One = 1,
    /// Branch target plus fallthrough
    Two = 2,
    /// Default target plus one target per case
    Switch = 3,
}

/// Opcode categories used by the translator's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)] // 1 byte per value
pub enum OpCategory {
    /// Push/pop/dup manipulation of the operand stack
    Stack = 0,
    /// Load/store against the local-variable register namespace
    Local = 1,
    /// Unconditional and conditional jumps, return
    Jump = 2,
    /// Multi-way switch
    Switch = 3,
    /// Field pattern match (two offsets and a length)
    PatternMatch = 4,
    /// Coprocessor access (read/write/run/init)
    Coprocessor = 5,
    /// Packet/info/data memory access
    Memory = 6,
    /// Plain unary/binary computation
    Arith = 7,
    /// Emit the packet on an output port
    Send = 8,
}

/// Stack-machine opcodes.
///
/// The set mirrors the packet-filter VM instruction encoding: stack and local
/// manipulation, arithmetic, conditional jumps, a SWITCH, field pattern
/// matches, coprocessor access, and width/region-qualified memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)] // 1 byte per opcode
pub enum Opcode {
    // -- stack ops --
    /// Push a literal constant (args[0])
    PushConst = 0,
    /// Discard the top of stack
    Pop = 1,
    /// Duplicate the top of stack
    Dup = 2,

    // -- local ops --
    /// Push the value of local slot args[0]
    LocLoad = 3,
    /// Pop into local slot args[0]
    LocStore = 4,

    // -- arithmetic --
    Add = 5,
    Sub = 6,
    Mul = 7,
    Mod = 8,
    Neg = 9,
    And = 10,
    Or = 11,
    Xor = 12,
    Not = 13,
    Shl = 14,
    Shr = 15,
    Rotl = 16,
    Rotr = 17,

    // -- jumps --
    /// Unconditional jump to the branch target
    Jump = 18,
    JumpEq = 19,
    JumpNe = 20,
    JumpLt = 21,
    JumpLe = 22,
    JumpGt = 23,
    JumpGe = 24,
    /// Jump if the single popped operand is zero
    JumpZero = 25,
    /// Jump if the single popped operand is nonzero
    JumpNonZero = 26,
    /// Multi-way jump over a case table
    Switch = 27,
    /// Return from the filter
    Ret = 28,

    // -- pattern match --
    /// Compare a packet field against a data field (offset1, offset2, length)
    MatchEq = 29,
    /// Negated field comparison
    MatchNe = 30,

    // -- coprocessor --
    /// Initialize coprocessor args[0] with sub-operation args[1], pushing a result
    CopInit = 31,
    /// Push the value of coprocessor args[0]'s mapped register args[1]
    CopRead = 32,
    /// Pop into coprocessor args[0]'s mapped register args[1]
    CopWrite = 33,
    /// Run sub-operation args[1] on coprocessor args[0]
    CopRun = 34,

    // -- packet memory --
    PktLoad8 = 35,
    PktLoad16 = 36,
    PktLoad32 = 37,
    PktStore8 = 38,
    PktStore16 = 39,
    PktStore32 = 40,

    // -- info memory --
    InfoLoad8 = 41,
    InfoLoad16 = 42,
    InfoLoad32 = 43,
    InfoStore8 = 44,
    InfoStore16 = 45,
    InfoStore32 = 46,

    // -- data memory --
    DataLoad8 = 47,
    DataLoad16 = 48,
    DataLoad32 = 49,
    DataStore8 = 50,
    DataStore16 = 51,
    DataStore32 = 52,

    /// Emit the packet on output port args[0]
    SendPkt = 53,
}

impl Opcode {
    /// Dispatch category of this opcode.
    #[inline] // Hot path, called for every instruction
    pub fn category(self) -> OpCategory {
        use Opcode::*;
        match self {
            PushConst | Pop | Dup => OpCategory::Stack,
            LocLoad | LocStore => OpCategory::Local,
            Jump | JumpEq | JumpNe | JumpLt | JumpLe | JumpGt | JumpGe | JumpZero
            | JumpNonZero | Ret => OpCategory::Jump,
            Switch => OpCategory::Switch,
            MatchEq | MatchNe => OpCategory::PatternMatch,
            CopInit | CopRead | CopWrite | CopRun => OpCategory::Coprocessor,
            PktLoad8 | PktLoad16 | PktLoad32 | PktStore8 | PktStore16 | PktStore32
            | InfoLoad8 | InfoLoad16 | InfoLoad32 | InfoStore8 | InfoStore16 | InfoStore32
            | DataLoad8 | DataLoad16 | DataLoad32 | DataStore8 | DataStore16 | DataStore32 => {
                OpCategory::Memory
            }
            SendPkt => OpCategory::Send,
            _ => OpCategory::Arith,
        }
    }

    /// Memory region addressed by this opcode, if it is a memory access.
    #[inline]
    pub fn mem_kind(self) -> Option<MemKind> {
        use Opcode::*;
        match self {
            PktLoad8 | PktLoad16 | PktLoad32 | PktStore8 | PktStore16 | PktStore32 => {
                Some(MemKind::Packet)
            }
            InfoLoad8 | InfoLoad16 | InfoLoad32 | InfoStore8 | InfoStore16 | InfoStore32 => {
                Some(MemKind::Info)
            }
            DataLoad8 | DataLoad16 | DataLoad32 | DataStore8 | DataStore16 | DataStore32 => {
                Some(MemKind::Data)
            }
            _ => None,
        }
    }

    /// Access width in bytes (1, 2 or 4) for memory opcodes.
    #[inline]
    pub fn access_width(self) -> Option<u8> {
        use Opcode::*;
        match self {
            PktLoad8 | PktStore8 | InfoLoad8 | InfoStore8 | DataLoad8 | DataStore8 => Some(1),
            PktLoad16 | PktStore16 | InfoLoad16 | InfoStore16 | DataLoad16 | DataStore16 => {
                Some(2)
            }
            PktLoad32 | PktStore32 | InfoLoad32 | InfoStore32 | DataLoad32 | DataStore32 => {
                Some(4)
            }
            _ => None,
        }
    }

    /// True for memory opcodes that write to their region.
    #[inline]
    pub fn is_store(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            PktStore8
                | PktStore16
                | PktStore32
                | InfoStore8
                | InfoStore16
                | InfoStore32
                | DataStore8
                | DataStore16
                | DataStore32
        )
    }

    /// Number of operands popped from the symbolic stack.
    ///
    /// Stack, pattern-match and coprocessor opcodes manage their own pops in
    /// the translator; this count drives the jump and default dispatch paths.
    #[inline]
    pub fn pop_count(self) -> u8 {
        use Opcode::*;
        match self {
            Jump | Ret => 0,
            JumpZero | JumpNonZero => 1,
            JumpEq | JumpNe | JumpLt | JumpLe | JumpGt | JumpGe => 2,
            Neg | Not => 1,
            Add | Sub | Mul | Mod | And | Or | Xor | Shl | Shr | Rotl | Rotr => 2,
            PktLoad8 | PktLoad16 | PktLoad32 | InfoLoad8 | InfoLoad16 | InfoLoad32
            | DataLoad8 | DataLoad16 | DataLoad32 => 1,
            PktStore8 | PktStore16 | PktStore32 | InfoStore8 | InfoStore16 | InfoStore32
            | DataStore8 | DataStore16 | DataStore32 => 2,
            _ => 0,
        }
    }

    /// True if the opcode leaves a value on the stack.
    #[inline]
    pub fn pushes_value(self) -> bool {
        use Opcode::*;
        match self {
            PushConst | LocLoad | CopInit | CopRead => true,
            Add | Sub | Mul | Mod | Neg | And | Or | Xor | Not | Shl | Shr | Rotl | Rotr => true,
            PktLoad8 | PktLoad16 | PktLoad32 | InfoLoad8 | InfoLoad16 | InfoLoad32
            | DataLoad8 | DataLoad16 | DataLoad32 => true,
            _ => false,
        }
    }

    /// Instruction mnemonic for dumps and diagnostics.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            PushConst => "push",
            Pop => "pop",
            Dup => "dup",
            LocLoad => "loc.load",
            LocStore => "loc.store",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Mod => "mod",
            Neg => "neg",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Shl => "shl",
            Shr => "shr",
            Rotl => "rotl",
            Rotr => "rotr",
            Jump => "jump",
            JumpEq => "jump.eq",
            JumpNe => "jump.ne",
            JumpLt => "jump.lt",
            JumpLe => "jump.le",
            JumpGt => "jump.gt",
            JumpGe => "jump.ge",
            JumpZero => "jump.z",
            JumpNonZero => "jump.nz",
            Switch => "switch",
            Ret => "ret",
            MatchEq => "match.eq",
            MatchNe => "match.ne",
            CopInit => "cop.init",
            CopRead => "cop.read",
            CopWrite => "cop.write",
            CopRun => "cop.run",
            PktLoad8 => "pkt.load.8",
            PktLoad16 => "pkt.load.16",
            PktLoad32 => "pkt.load.32",
            PktStore8 => "pkt.store.8",
            PktStore16 => "pkt.store.16",
            PktStore32 => "pkt.store.32",
            InfoLoad8 => "info.load.8",
            InfoLoad16 => "info.load.16",
            InfoLoad32 => "info.load.32",
            InfoStore8 => "info.store.8",
            InfoStore16 => "info.store.16",
            InfoStore32 => "info.store.32",
            DataLoad8 => "data.load.8",
            DataLoad16 => "data.load.16",
            DataLoad32 => "data.load.32",
            DataStore8 => "data.store.8",
            DataStore16 => "data.store.16",
            DataStore32 => "data.store.32",
            SendPkt => "pkt.send",
        }
    }
}

/// Analyzer flags attached to each instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsnFlags {
    /// This instruction starts a new basic block
    pub leader: bool,
    /// This instruction ends its basic block
    pub block_end: bool,
    /// This instruction is a branch
    pub branch: bool,
    /// This instruction leaves the filter (edge to the EXIT sentinel)
    pub ret: bool,
}

/// Per-instruction record produced by the external bytecode analyzer.
///
/// The record's position in the instruction array is its program counter;
/// `target` and the switch table hold instruction indices that the builder
/// resolves to basic-block ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsnRecord {
    /// Instruction kind
    pub opcode: Opcode,
    /// Analyzer flags (leader/end/branch/return)
    #[serde(default)]
    pub flags: InsnFlags,
    /// Declared successor arity
    pub arity: SuccessorArity,
    /// Raw operand fields (literal value, local index, coprocessor id/op, port)
    #[serde(default)]
    pub args: [i64; 2],
    /// Explicit branch-target pc for one- and two-successor instructions
    #[serde(default)]
    pub target: u32,
    /// Default-target pc for SWITCH
    #[serde(default)]
    pub switch_default: u32,
    /// Ordered (case value, target pc) pairs for SWITCH
    #[serde(default)]
    pub switch_cases: Vec<(i64, u32)>,
}

impl InsnRecord {
    /// Create a plain record with no flags and no successors declared.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            flags: InsnFlags::default(),
            arity: SuccessorArity::None,
            args: [0, 0],
            target: 0,
            switch_default: 0,
            switch_cases: Vec::new(),
        }
    }
}
