//! Tree IR Nodes and Arena
//!
//! The translator produces small expression/statement trees per basic block.
//! All nodes live in one arena and are referenced by index; a node is owned
//! either by its parent's child slot or by its basic block's statement list,
//! never both at once. The owning side is recorded in a [`NodeRole`] tag, and
//! every transition between the two roles is an explicit arena operation.
//!
//! # Memory Optimizations
//! - `IrOp` uses `#[repr(u8)]`
//! - Child links are `Option<NodeId>` (NodeId is a `u32` newtype)
//! - Payloads are a tagged enum, matched exhaustively; no runtime downcasts

use crate::jit::bytecode::MemKind;
use crate::jit::error::{JitError, JitResult};
use crate::jit::ir::registers::RegisterId;
use std::fmt;

/// Index of a node in the [`IrArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// IR operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)] // 1 byte per value
pub enum IrOp {
    /// Literal constant (payload `Const`)
    Const = 0,
    /// Read a virtual register
    RegLoad = 1,
    /// Write a virtual register (child 0 is the value)
    RegStore = 2,

    Add = 3,
    Sub = 4,
    Mul = 5,
    Mod = 6,
    Neg = 7,
    And = 8,
    Or = 9,
    Xor = 10,
    Not = 11,
    Shl = 12,
    Shr = 13,
    Rotl = 14,
    Rotr = 15,

    /// Memory read (payload `Mem`; child 0 is the address)
    MemLoad = 16,
    /// Memory write (payload `Mem`; child 0 address, child 1 value)
    MemStore = 17,
    /// Bounds check (payload `Mem`; child 0 offset, child 1 length)
    Check = 18,

    /// Conditional or unconditional jump (payload `Jump`)
    Jump = 19,
    /// Multi-way jump (payload `Switch`; child 0 is the selector)
    Switch = 20,
    /// Leave the filter
    Ret = 21,
    /// Coprocessor operation (payload `Coproc`)
    Coproc = 22,
    /// Emit the packet on an output port (payload `SendPort`)
    SendPkt = 23,
}

impl IrOp {
    /// Mnemonic used by the IR dump.
    pub fn mnemonic(self) -> &'static str {
        match self {
            IrOp::Const => "const",
            IrOp::RegLoad => "load",
            IrOp::RegStore => "store",
            IrOp::Add => "add",
            IrOp::Sub => "sub",
            IrOp::Mul => "mul",
            IrOp::Mod => "mod",
            IrOp::Neg => "neg",
            IrOp::And => "and",
            IrOp::Or => "or",
            IrOp::Xor => "xor",
            IrOp::Not => "not",
            IrOp::Shl => "shl",
            IrOp::Shr => "shr",
            IrOp::Rotl => "rotl",
            IrOp::Rotr => "rotr",
            IrOp::MemLoad => "mload",
            IrOp::MemStore => "mstore",
            IrOp::Check => "check",
            IrOp::Jump => "jump",
            IrOp::Switch => "switch",
            IrOp::Ret => "ret",
            IrOp::Coproc => "coproc",
            IrOp::SendPkt => "send",
        }
    }
}

/// Jump condition evaluated over the jump node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)] // 1 byte per value
pub enum JumpCond {
    /// Unconditional (both targets equal)
    Always = 0,
    Eq = 1,
    Ne = 2,
    Lt = 3,
    Le = 4,
    Gt = 5,
    Ge = 6,
    /// Single operand compared against zero
    Zero = 7,
    NonZero = 8,
}

/// Auxiliary data carried by specific node kinds.
///
/// One tagged enum instead of a node-subclass hierarchy: every consumer
/// matches exhaustively and the compiler checks coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No auxiliary data
    None,
    /// Literal value
    Const(i64),
    /// Resolved jump targets (basic-block ids)
    Jump {
        cond: JumpCond,
        on_true: u32,
        on_false: u32,
    },
    /// Resolved switch table (basic-block ids)
    Switch {
        default: u32,
        cases: Vec<(i64, u32)>,
    },
    /// Memory region and access width in bytes (0 = dynamic length)
    Mem { kind: MemKind, width: u8 },
    /// Coprocessor id and sub-operation
    Coproc { id: u32, op: u32 },
    /// Output port number
    SendPort(u32),
}

/// Current owner of a node.
///
/// A node is a *statement* (reachable only from a block's list) or an
/// *expression* (reachable only as a child) at any instant. `Detached` is the
/// transient state between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owned by nobody (freshly allocated, or mid-transition)
    Detached,
    /// Member of basic block `block`'s statement list
    Statement { block: u32 },
    /// Child of `parent`
    Child { parent: NodeId },
}

/// One tree IR node.
#[derive(Debug, Clone)]
pub struct IrNode {
    /// Operation kind
    pub op: IrOp,
    /// Child slots (owned exclusively while the role is `Child`)
    pub kids: [Option<NodeId>; 2],
    /// Defined register for defining nodes; referenced register for
    /// `RegLoad`/`RegStore`; `RegisterId::INVALID` otherwise
    pub reg: RegisterId,
    /// Operand size in bytes (0 until size inference assigns one)
    pub size: u8,
    /// Program counter of the originating bytecode instruction
    pub pc: u32,
    /// Reference count for the few DAG-shared node kinds
    pub refcount: u32,
    /// Kind-specific auxiliary data
    pub payload: Payload,
    /// Current owner
    pub role: NodeRole,
}

/// Arena owning every IR node of one compilation session.
#[derive(Debug, Default)]
pub struct IrArena {
    nodes: Vec<IrNode>,
}

impl IrArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes ever allocated in this session.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a detached node with no children and no register.
    pub fn alloc(&mut self, op: IrOp, payload: Payload, pc: u32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(IrNode {
            op,
            kids: [None, None],
            reg: RegisterId::INVALID,
            size: 0,
            pc,
            refcount: 1,
            payload,
            role: NodeRole::Detached,
        });
        id
    }

    /// Immutable access to a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &IrNode {
        &self.nodes[id.index()]
    }

    /// Mutable access to a node.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut IrNode {
        &mut self.nodes[id.index()]
    }

    /// Attach `kid` into `parent`'s child slot `slot`.
    ///
    /// The kid must be detached: attaching a statement or an already-owned
    /// expression is an internal invariant violation.
    pub fn set_kid(&mut self, parent: NodeId, slot: usize, kid: NodeId) -> JitResult<()> {
        if self.node(kid).role != NodeRole::Detached {
            return Err(JitError::internal(format!(
                "node {kid} attached to {parent} while owned ({:?})",
                self.node(kid).role
            )));
        }
        if self.node(parent).kids[slot].is_some() {
            return Err(JitError::internal(format!(
                "child slot {slot} of {parent} is already occupied"
            )));
        }
        self.node_mut(parent).kids[slot] = Some(kid);
        self.node_mut(kid).role = NodeRole::Child { parent };
        Ok(())
    }

    /// Detach and return `parent`'s child in slot `slot`, if any.
    pub fn take_kid(&mut self, parent: NodeId, slot: usize) -> Option<NodeId> {
        let kid = self.node_mut(parent).kids[slot].take()?;
        self.node_mut(kid).role = NodeRole::Detached;
        Some(kid)
    }

    /// Append a detached node to `block`'s statement list.
    pub fn append_stmt(&mut self, stmts: &mut Vec<NodeId>, block: u32, id: NodeId) -> JitResult<()> {
        if self.node(id).role != NodeRole::Detached {
            return Err(JitError::internal(format!(
                "node {id} appended to block {block} while owned ({:?})",
                self.node(id).role
            )));
        }
        self.node_mut(id).role = NodeRole::Statement { block };
        stmts.push(id);
        Ok(())
    }

    /// Remove a node from its block's statement list, making it detached.
    ///
    /// Returns an internal error if the node is not a statement of `block` or
    /// is missing from the list.
    pub fn remove_stmt(&mut self, stmts: &mut Vec<NodeId>, block: u32, id: NodeId) -> JitResult<()> {
        match self.node(id).role {
            NodeRole::Statement { block: b } if b == block => {}
            other => {
                return Err(JitError::internal(format!(
                    "node {id} removed from block {block} but its role is {other:?}"
                )))
            }
        }
        match stmts.iter().position(|&s| s == id) {
            Some(pos) => {
                stmts.remove(pos);
            }
            None => {
                return Err(JitError::internal(format!(
                    "node {id} claims membership in block {block} but is not listed"
                )))
            }
        }
        self.node_mut(id).role = NodeRole::Detached;
        Ok(())
    }

    /// Recursively copy a subtree; the copy is detached.
    ///
    /// The source's reference count records how many trees observe the value
    /// (bounds checks duplicate their access's operands).
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        self.node_mut(id).refcount += 1;
        let src = self.node(id).clone();
        let copy = NodeId(self.nodes.len() as u32);
        self.nodes.push(IrNode {
            kids: [None, None],
            role: NodeRole::Detached,
            refcount: 1,
            ..src
        });
        for slot in 0..2 {
            if let Some(kid) = self.node(id).kids[slot] {
                let kid_copy = self.deep_copy(kid);
                self.nodes[copy.index()].kids[slot] = Some(kid_copy);
                self.nodes[kid_copy.index()].role = NodeRole::Child { parent: copy };
            }
        }
        copy
    }

    /// True if the node currently sits in a statement list.
    #[inline]
    pub fn is_statement(&self, id: NodeId) -> bool {
        matches!(self.node(id).role, NodeRole::Statement { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_transition_explicitly() {
        let mut arena = IrArena::new();
        let mut stmts: Vec<NodeId> = Vec::new();
        let a = arena.alloc(IrOp::Const, Payload::Const(1), 0);
        let b = arena.alloc(IrOp::Neg, Payload::None, 0);

        arena.set_kid(b, 0, a).unwrap();
        assert_eq!(arena.node(a).role, NodeRole::Child { parent: b });
        // A child cannot also become a statement
        assert!(arena.append_stmt(&mut stmts, 2, a).is_err());

        arena.append_stmt(&mut stmts, 2, b).unwrap();
        assert!(arena.is_statement(b));
        // A statement cannot also become a child
        let c = arena.alloc(IrOp::Not, Payload::None, 0);
        assert!(arena.set_kid(c, 0, b).is_err());

        arena.remove_stmt(&mut stmts, 2, b).unwrap();
        assert_eq!(arena.node(b).role, NodeRole::Detached);
        assert!(stmts.is_empty());
    }

    #[test]
    fn deep_copy_detaches_the_copy() {
        let mut arena = IrArena::new();
        let a = arena.alloc(IrOp::Const, Payload::Const(7), 3);
        let b = arena.alloc(IrOp::Neg, Payload::None, 3);
        arena.set_kid(b, 0, a).unwrap();

        let copy = arena.deep_copy(b);
        assert_eq!(arena.node(copy).role, NodeRole::Detached);
        let kid = arena.node(copy).kids[0].unwrap();
        assert_ne!(kid, a);
        assert_eq!(arena.node(kid).payload, Payload::Const(7));
        assert_eq!(arena.node(kid).role, NodeRole::Child { parent: copy });
    }
}
