//! Stack-to-Register IR Translator
//!
//! Walks the CFG depth-first from a segment's entry block and populates each
//! basic block's statement list with tree IR, converting the implicit
//! bytecode operand stack into explicit register definitions and uses.
//!
//! # Traversal
//! The walk is an explicit worklist DFS. The symbolic operand stack is a
//! plain clonable value: it is *copied* on every descent into a successor,
//! never merged, so divergent CFG paths evaluate independently. Correctness
//! does not depend on stacks agreeing across predecessors, only on the
//! end-of-block spill contract: no physical stack state crosses a block
//! boundary, only depth-named registers do.
//!
//! # Operand acquisition
//! Popping a node that is still physically present in the block's statement
//! list either removes it outright (a pure expression being consumed) or, if
//! the node is a register store, leaves the store in place and hands back a
//! freshly built load of the same register. A node never serves as a
//! statement and as another node's child at the same time.
//!
//! # End-of-block contract
//! After the last instruction of a block, every node remaining on the
//! symbolic stack is converted into an explicit store into the stack-space
//! register named by its depth (deepest element lowest), and the successor
//! paths resume from loads of those registers.

use crate::jit::bytecode::{InsnRecord, MemKind, OpCategory, Opcode};
use crate::jit::cfg::builder::BuiltRegion;
use crate::jit::cfg::Cfg;
use crate::jit::error::{JitError, JitResult};
use crate::jit::ir::node::{IrArena, IrOp, JumpCond, NodeId, NodeRole, Payload};
use crate::jit::ir::registers::{RegisterId, RegisterPool, SPACE_COPRO, SPACE_LOCAL, SPACE_STACK, SPACE_TMP};
use crate::jit::pipeline::JitOptions;
use bitvec::prelude::*;
use std::collections::HashMap;

/// Side table pairing each memory access node with its bounds-check node.
///
/// Owned by the compilation session instead of being pointer fields inside
/// the nodes; the bounds-check eliminator consults it to find the companion
/// of an access and to forget removed checks.
#[derive(Debug, Default)]
pub struct CheckLinks {
    check_of: HashMap<NodeId, NodeId>,
    access_of: HashMap<NodeId, NodeId>,
}

impl CheckLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the access ↔ check pairing.
    pub fn link(&mut self, access: NodeId, check: NodeId) {
        self.check_of.insert(access, check);
        self.access_of.insert(check, access);
    }

    /// Companion check of an access node, if still present.
    pub fn check_of(&self, access: NodeId) -> Option<NodeId> {
        self.check_of.get(&access).copied()
    }

    /// Companion access of a check node, if any.
    pub fn access_of(&self, check: NodeId) -> Option<NodeId> {
        self.access_of.get(&check).copied()
    }

    /// Forget a removed check.
    pub fn unlink_check(&mut self, check: NodeId) {
        if let Some(access) = self.access_of.remove(&check) {
            self.check_of.remove(&access);
        }
    }

    /// Number of live pairings.
    pub fn len(&self) -> usize {
        self.access_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.access_of.is_empty()
    }
}

/// Translator for one bytecode segment.
pub struct Translator<'a> {
    cfg: &'a mut Cfg,
    arena: &'a mut IrArena,
    pool: &'a mut RegisterPool,
    links: &'a mut CheckLinks,
    insns: &'a [InsnRecord],
    region: &'a BuiltRegion,
    opts: &'a JitOptions,
    checks_emitted: usize,
}

impl<'a> Translator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &'a mut Cfg,
        arena: &'a mut IrArena,
        pool: &'a mut RegisterPool,
        links: &'a mut CheckLinks,
        insns: &'a [InsnRecord],
        region: &'a BuiltRegion,
        opts: &'a JitOptions,
    ) -> Self {
        Self {
            cfg,
            arena,
            pool,
            links,
            insns,
            region,
            opts,
            checks_emitted: 0,
        }
    }

    /// Translate every block reachable from `start_block`.
    ///
    /// Returns the number of bounds-check nodes emitted.
    pub fn run(mut self, start_block: u32) -> JitResult<usize> {
        let mut visited: BitVec<u32> = bitvec![u32, Lsb0; 0; self.cfg.block_count()];
        let mut work: Vec<(u32, Vec<RegisterId>)> = vec![(start_block, Vec::new())];

        while let Some((block, in_stack)) = work.pop() {
            let idx = block as usize;
            if visited[idx] {
                continue;
            }
            visited.set(idx, true);
            if self.cfg.nodes[idx].is_sentinel() {
                continue;
            }

            let out_stack = self.translate_block(block, &in_stack)?;

            // Copy, not merge: every successor path gets its own stack value
            let succs: Vec<u32> = self.cfg.nodes[idx].successors.to_vec();
            for &succ in succs.iter().rev() {
                if !visited[succ as usize] {
                    work.push((succ, out_stack.clone()));
                }
            }
        }
        Ok(self.checks_emitted)
    }

    /// Translate the instructions of one basic block.
    ///
    /// `in_regs` names the depth registers holding the symbolic stack at
    /// entry; the return value names them at exit.
    fn translate_block(&mut self, block: u32, in_regs: &[RegisterId]) -> JitResult<Vec<RegisterId>> {
        let (start, end) = {
            let b = &self.cfg.nodes[block as usize];
            (b.start_pc, b.end_pc)
        };

        // Re-materialize the inherited stack as loads of the depth registers
        let mut stack: Vec<NodeId> = Vec::with_capacity(in_regs.len());
        for &r in in_regs {
            let load = self.reg_load(r, start);
            stack.push(load);
        }
        for pc in start..=end {
            let insn = &self.insns[pc as usize];
            self.dispatch(block, pc, insn, &mut stack)?;
        }

        // End-of-block spill: deepest element gets the lowest depth register
        let pending: Vec<NodeId> = stack.drain(..).collect();
        let mut out_regs: Vec<RegisterId> = Vec::with_capacity(pending.len());
        for (depth, n) in pending.into_iter().enumerate() {
            let r = RegisterId::new(SPACE_STACK, depth as u32);
            self.pool.observe(r);
            let value = self.resolve_operand(block, end, n)?;
            let store = self.arena.alloc(IrOp::RegStore, Payload::None, end);
            self.arena.node_mut(store).reg = r;
            self.arena.set_kid(store, 0, value)?;
            self.append(block, store)?;
            out_regs.push(r);
        }
        Ok(out_regs)
    }

    /// Translate a single instruction.
    fn dispatch(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let opcode = insn.opcode;
        match opcode.category() {
            OpCategory::Stack => self.dispatch_stack(block, pc, insn, stack),
            OpCategory::Local => self.dispatch_local(block, pc, insn, stack),
            OpCategory::Jump => self.dispatch_jump(block, pc, insn, stack),
            OpCategory::Switch => self.dispatch_switch(block, pc, insn, stack),
            OpCategory::PatternMatch => self.dispatch_pattern(block, pc, insn, stack),
            OpCategory::Coprocessor => self.dispatch_coprocessor(block, pc, insn, stack),
            OpCategory::Memory => self.dispatch_memory(block, pc, insn, stack),
            OpCategory::Send => {
                let port = insn.args[0] as u32;
                let node = self.arena.alloc(IrOp::SendPkt, Payload::SendPort(port), pc);
                self.append(block, node)
            }
            OpCategory::Arith => self.dispatch_default(block, pc, insn, stack),
        }
    }

    fn dispatch_stack(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        match insn.opcode {
            Opcode::PushConst => {
                let node = self.arena.alloc(IrOp::Const, Payload::Const(insn.args[0]), pc);
                let r = self.stack_reg(stack.len());
                self.arena.node_mut(node).reg = r;
                self.emit_value(block, node, stack)
            }
            Opcode::Pop => {
                let _ = self.get_operand(block, pc, stack)?;
                Ok(())
            }
            Opcode::Dup => {
                let value = self.get_operand(block, pc, stack)?;
                let r = self.pool.get_new(SPACE_TMP);
                let store = self.arena.alloc(IrOp::RegStore, Payload::None, pc);
                self.arena.node_mut(store).reg = r;
                self.arena.set_kid(store, 0, value)?;
                self.append(block, store)?;
                let first = self.reg_load(r, pc);
                self.emit_value(block, first, stack)?;
                let second = self.reg_load(r, pc);
                self.emit_value(block, second, stack)
            }
            other => Err(JitError::malformed(
                pc,
                format!("unknown stack opcode {other:?}"),
            )),
        }
    }

    fn dispatch_local(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let local = RegisterId::new(SPACE_LOCAL, insn.args[0] as u32);
        self.pool.observe(local);
        match insn.opcode {
            Opcode::LocLoad => {
                let load = self.reg_load(local, pc);
                self.emit_value(block, load, stack)
            }
            Opcode::LocStore => {
                let value = self.get_operand(block, pc, stack)?;
                let store = self.arena.alloc(IrOp::RegStore, Payload::None, pc);
                self.arena.node_mut(store).reg = local;
                self.arena.set_kid(store, 0, value)?;
                self.append(block, store)
            }
            other => Err(JitError::malformed(
                pc,
                format!("unknown local opcode {other:?}"),
            )),
        }
    }

    fn dispatch_jump(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        if insn.opcode == Opcode::Ret {
            let node = self.arena.alloc(IrOp::Ret, Payload::None, pc);
            return self.append(block, node);
        }

        let cond = jump_cond(insn.opcode)
            .ok_or_else(|| JitError::malformed(pc, format!("unknown jump opcode {:?}", insn.opcode)))?;

        // Second operand popped first
        let mut rhs: Option<NodeId> = None;
        let mut lhs: Option<NodeId> = None;
        match insn.opcode.pop_count() {
            0 => {}
            1 => lhs = Some(self.get_operand(block, pc, stack)?),
            2 => {
                rhs = Some(self.get_operand(block, pc, stack)?);
                lhs = Some(self.get_operand(block, pc, stack)?);
            }
            n => {
                return Err(JitError::internal(format!(
                    "jump opcode declares {n} operands"
                )))
            }
        }

        let on_true = self.region.resolve(insn.target, pc)?;
        let on_false = if cond == JumpCond::Always {
            on_true
        } else {
            self.region.resolve(pc + 1, pc)?
        };

        let node = self.arena.alloc(
            IrOp::Jump,
            Payload::Jump {
                cond,
                on_true,
                on_false,
            },
            pc,
        );
        if let Some(l) = lhs {
            self.arena.set_kid(node, 0, l)?;
        }
        if let Some(r) = rhs {
            self.arena.set_kid(node, 1, r)?;
        }
        self.append(block, node)
    }

    fn dispatch_switch(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let selector = self.get_operand(block, pc, stack)?;
        // Case targets arrive as instruction indices; resolve to block ids
        let default = self.region.resolve(insn.switch_default, pc)?;
        let mut cases: Vec<(i64, u32)> = Vec::with_capacity(insn.switch_cases.len());
        for &(value, target) in insn.switch_cases.iter() {
            cases.push((value, self.region.resolve(target, pc)?));
        }
        let node = self
            .arena
            .alloc(IrOp::Switch, Payload::Switch { default, cases }, pc);
        self.arena.set_kid(node, 0, selector)?;
        self.append(block, node)
    }

    /// Pattern matches pop (offset-1, offset-2, length) and branch on the
    /// comparison outcome. With bounds checking enabled, one check per offset
    /// is synthesized against the declared length; each check independently
    /// duplicates the length operand, and the jump consumes the offsets as a
    /// dummy comparison pair.
    fn dispatch_pattern(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let length = self.get_operand(block, pc, stack)?;
        let off2 = self.get_operand(block, pc, stack)?;
        let off1 = self.get_operand(block, pc, stack)?;

        if self.opts.bounds_check {
            let off1_copy = self.arena.deep_copy(off1);
            let len_copy = self.arena.deep_copy(length);
            self.emit_check(block, pc, MemKind::Packet, 0, off1_copy, len_copy, None)?;

            let off2_copy = self.arena.deep_copy(off2);
            let len_copy = self.arena.deep_copy(length);
            self.emit_check(block, pc, MemKind::Data, 0, off2_copy, len_copy, None)?;
        }

        let cond = if insn.opcode == Opcode::MatchEq {
            JumpCond::Eq
        } else {
            JumpCond::Ne
        };
        let on_true = self.region.resolve(insn.target, pc)?;
        let on_false = self.region.resolve(pc + 1, pc)?;
        let node = self.arena.alloc(
            IrOp::Jump,
            Payload::Jump {
                cond,
                on_true,
                on_false,
            },
            pc,
        );
        self.arena.set_kid(node, 0, off1)?;
        self.arena.set_kid(node, 1, off2)?;
        self.append(block, node)
    }

    fn dispatch_coprocessor(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let cop_id = insn.args[0] as u32;
        let cop_arg = insn.args[1] as u32;
        match insn.opcode {
            Opcode::CopRead => {
                let reg = self.coprocessor_reg(cop_id, cop_arg);
                let load = self.reg_load(reg, pc);
                self.emit_value(block, load, stack)
            }
            Opcode::CopWrite => {
                let reg = self.coprocessor_reg(cop_id, cop_arg);
                let value = self.get_operand(block, pc, stack)?;
                let store = self.arena.alloc(IrOp::RegStore, Payload::None, pc);
                self.arena.node_mut(store).reg = reg;
                self.arena.set_kid(store, 0, value)?;
                self.append(block, store)
            }
            Opcode::CopRun => {
                let node = self.arena.alloc(
                    IrOp::Coproc,
                    Payload::Coproc {
                        id: cop_id,
                        op: cop_arg,
                    },
                    pc,
                );
                self.append(block, node)
            }
            Opcode::CopInit => {
                // Only the init variant pushes a result
                let node = self.arena.alloc(
                    IrOp::Coproc,
                    Payload::Coproc {
                        id: cop_id,
                        op: cop_arg,
                    },
                    pc,
                );
                let r = self.stack_reg(stack.len());
                self.arena.node_mut(node).reg = r;
                self.emit_value(block, node, stack)
            }
            other => Err(JitError::malformed(
                pc,
                format!("unknown coprocessor opcode {other:?}"),
            )),
        }
    }

    fn dispatch_memory(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let opcode = insn.opcode;
        let kind = opcode
            .mem_kind()
            .ok_or_else(|| JitError::internal(format!("{opcode:?} dispatched as memory access")))?;
        let width = opcode
            .access_width()
            .ok_or_else(|| JitError::internal(format!("{opcode:?} has no access width")))?;

        let (addr, value) = if opcode.is_store() {
            let value = self.get_operand(block, pc, stack)?;
            let addr = self.get_operand(block, pc, stack)?;
            (addr, Some(value))
        } else {
            (self.get_operand(block, pc, stack)?, None)
        };

        // A constant access proven to exceed a statically sized region is a
        // compile-time error, not a runtime check
        if let Some(offset) = self.classify_const(addr) {
            if let Some(region_size) = self.opts.region_size(kind) {
                if offset + i64::from(width) > i64::from(region_size) {
                    return Err(JitError::StaticBoundsViolation {
                        pc,
                        offset,
                        region: kind.as_str(),
                        size: region_size,
                    });
                }
            }
        }

        let access = self.arena.alloc(
            if opcode.is_store() {
                IrOp::MemStore
            } else {
                IrOp::MemLoad
            },
            Payload::Mem { kind, width },
            pc,
        );

        if self.opts.bounds_check {
            let offset_copy = self.arena.deep_copy(addr);
            let length = self.arena.alloc(IrOp::Const, Payload::Const(i64::from(width)), pc);
            self.emit_check(block, pc, kind, width, offset_copy, length, Some(access))?;
        }

        self.arena.set_kid(access, 0, addr)?;
        if let Some(v) = value {
            self.arena.set_kid(access, 1, v)?;
            // Memory-defining stores draw from the session allocator
            let r = self.pool.get_new(SPACE_TMP);
            self.arena.node_mut(access).reg = r;
            self.append(block, access)
        } else {
            // Loads define the register at the top of the current stack depth
            let r = self.stack_reg(stack.len());
            self.arena.node_mut(access).reg = r;
            self.emit_value(block, access, stack)
        }
    }

    /// Default path: pop the declared operand count (second popped first),
    /// build a unary/binary node, and push the result if the opcode yields one.
    fn dispatch_default(
        &mut self,
        block: u32,
        pc: u32,
        insn: &InsnRecord,
        stack: &mut Vec<NodeId>,
    ) -> JitResult<()> {
        let op = arith_op(insn.opcode)
            .ok_or_else(|| JitError::malformed(pc, format!("unknown opcode {:?}", insn.opcode)))?;

        let mut rhs: Option<NodeId> = None;
        let mut lhs: Option<NodeId> = None;
        match insn.opcode.pop_count() {
            0 => {}
            1 => lhs = Some(self.get_operand(block, pc, stack)?),
            2 => {
                rhs = Some(self.get_operand(block, pc, stack)?);
                lhs = Some(self.get_operand(block, pc, stack)?);
            }
            n => {
                return Err(JitError::internal(format!(
                    "opcode {:?} declares {n} operands",
                    insn.opcode
                )))
            }
        }

        let node = self.arena.alloc(op, Payload::None, pc);
        if let Some(l) = lhs {
            self.arena.set_kid(node, 0, l)?;
        }
        if let Some(r) = rhs {
            self.arena.set_kid(node, 1, r)?;
        }

        if insn.opcode.pushes_value() {
            let r = self.stack_reg(stack.len());
            self.arena.node_mut(node).reg = r;
            self.emit_value(block, node, stack)
        } else {
            self.append(block, node)
        }
    }

    // -- helpers --

    /// Append a check statement and link it to its access, if any.
    fn emit_check(
        &mut self,
        block: u32,
        pc: u32,
        kind: MemKind,
        width: u8,
        offset: NodeId,
        length: NodeId,
        access: Option<NodeId>,
    ) -> JitResult<()> {
        let check = self.arena.alloc(IrOp::Check, Payload::Mem { kind, width }, pc);
        self.arena.set_kid(check, 0, offset)?;
        self.arena.set_kid(check, 1, length)?;
        self.append(block, check)?;
        if let Some(access) = access {
            self.links.link(access, check);
        }
        self.checks_emitted += 1;
        Ok(())
    }

    /// The stack-space register for a given depth.
    fn stack_reg(&mut self, depth: usize) -> RegisterId {
        let r = RegisterId::new(SPACE_STACK, depth as u32);
        self.pool.observe(r);
        r
    }

    /// The register a coprocessor slot is mapped to.
    fn coprocessor_reg(&mut self, cop_id: u32, slot: u32) -> RegisterId {
        // Coprocessor slots share one space, 256 names per coprocessor
        let r = RegisterId::new(SPACE_COPRO, cop_id * 256 + slot);
        self.pool.observe(r);
        r
    }

    /// Allocate a detached load of `reg`.
    fn reg_load(&mut self, reg: RegisterId, pc: u32) -> NodeId {
        let load = self.arena.alloc(IrOp::RegLoad, Payload::None, pc);
        self.arena.node_mut(load).reg = reg;
        load
    }

    fn append(&mut self, block: u32, id: NodeId) -> JitResult<()> {
        self.arena
            .append_stmt(&mut self.cfg.nodes[block as usize].stmts, block, id)
    }

    fn emit_value(&mut self, block: u32, id: NodeId, stack: &mut Vec<NodeId>) -> JitResult<()> {
        self.append(block, id)?;
        stack.push(id);
        Ok(())
    }

    /// Pop one operand off the symbolic stack.
    fn get_operand(&mut self, block: u32, pc: u32, stack: &mut Vec<NodeId>) -> JitResult<NodeId> {
        let n = stack
            .pop()
            .ok_or_else(|| JitError::malformed(pc, "operand stack underflow"))?;
        self.resolve_operand(block, pc, n)
    }

    /// Turn a popped stack entry into a usable expression.
    fn resolve_operand(&mut self, block: u32, pc: u32, n: NodeId) -> JitResult<NodeId> {
        match self.arena.node(n).role {
            NodeRole::Statement { block: b } if b == block => {
                if self.arena.node(n).op == IrOp::RegStore {
                    // The store stays a statement; its value is re-read
                    let reg = self.arena.node(n).reg;
                    Ok(self.reg_load(reg, pc))
                } else {
                    self.arena
                        .remove_stmt(&mut self.cfg.nodes[block as usize].stmts, block, n)?;
                    Ok(n)
                }
            }
            NodeRole::Statement { block: b } => Err(JitError::internal(format!(
                "operand {n} belongs to block {b} but is consumed in block {block}"
            ))),
            NodeRole::Detached => Ok(n),
            NodeRole::Child { parent } => Err(JitError::internal(format!(
                "operand {n} is already owned by {parent}"
            ))),
        }
    }

    /// Constant offset of an address expression, if statically known.
    fn classify_const(&self, addr: NodeId) -> Option<i64> {
        let node = self.arena.node(addr);
        match node.op {
            IrOp::Const => match node.payload {
                Payload::Const(v) => Some(v),
                _ => None,
            },
            IrOp::Add => {
                let a = self.kid_const(addr, 0)?;
                let b = self.kid_const(addr, 1)?;
                Some(a + b)
            }
            _ => None,
        }
    }

    fn kid_const(&self, parent: NodeId, slot: usize) -> Option<i64> {
        let kid = self.arena.node(parent).kids[slot]?;
        let node = self.arena.node(kid);
        if node.op == IrOp::Const {
            if let Payload::Const(v) = node.payload {
                return Some(v);
            }
        }
        None
    }
}

/// Jump condition declared by a jump opcode.
fn jump_cond(op: Opcode) -> Option<JumpCond> {
    match op {
        Opcode::Jump => Some(JumpCond::Always),
        Opcode::JumpEq => Some(JumpCond::Eq),
        Opcode::JumpNe => Some(JumpCond::Ne),
        Opcode::JumpLt => Some(JumpCond::Lt),
        Opcode::JumpLe => Some(JumpCond::Le),
        Opcode::JumpGt => Some(JumpCond::Gt),
        Opcode::JumpGe => Some(JumpCond::Ge),
        Opcode::JumpZero => Some(JumpCond::Zero),
        Opcode::JumpNonZero => Some(JumpCond::NonZero),
        _ => None,
    }
}

/// IR operation for a default-path opcode.
fn arith_op(op: Opcode) -> Option<IrOp> {
    match op {
        Opcode::Add => Some(IrOp::Add),
        Opcode::Sub => Some(IrOp::Sub),
        Opcode::Mul => Some(IrOp::Mul),
        Opcode::Mod => Some(IrOp::Mod),
        Opcode::Neg => Some(IrOp::Neg),
        Opcode::And => Some(IrOp::And),
        Opcode::Or => Some(IrOp::Or),
        Opcode::Xor => Some(IrOp::Xor),
        Opcode::Not => Some(IrOp::Not),
        Opcode::Shl => Some(IrOp::Shl),
        Opcode::Shr => Some(IrOp::Shr),
        Opcode::Rotl => Some(IrOp::Rotl),
        Opcode::Rotr => Some(IrOp::Rotr),
        _ => None,
    }
}
