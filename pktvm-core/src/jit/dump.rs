//! IR and CFG Text Dumps
//!
//! Renders a compiled session into a human-readable listing: one section per
//! basic block with its pc range, edges and statement trees. Expressions are
//! printed as s-expressions, registers as `r<space>.<name>.<version>`.

use crate::jit::cfg::Cfg;
use crate::jit::ir::node::{IrArena, NodeId, Payload};

/// Render the whole CFG with its IR statement lists.
pub fn dump_cfg(cfg: &Cfg, arena: &IrArena) -> String {
    let mut out = String::new();
    for block in cfg.nodes.iter() {
        if block.is_sentinel() {
            out.push_str(&format!(
                "block {} ({})\n",
                block.id,
                if block.id == 0 { "entry" } else { "exit" }
            ));
        } else {
            out.push_str(&format!(
                "block {} (pc {}..{}, port {:?})\n",
                block.id, block.start_pc, block.end_pc, block.handler
            ));
        }
        if !block.successors.is_empty() {
            let succs: Vec<String> = block.successors.iter().map(|s| s.to_string()).collect();
            out.push_str(&format!("  -> {}\n", succs.join(", ")));
        }
        for &stmt in block.stmts.iter() {
            out.push_str("  ");
            out.push_str(&dump_node(arena, stmt));
            out.push('\n');
        }
    }
    out
}

/// Render one IR subtree as an s-expression.
pub fn dump_node(arena: &IrArena, id: NodeId) -> String {
    let node = arena.node(id);
    let mut s = String::from("(");
    s.push_str(node.op.mnemonic());

    match &node.payload {
        Payload::Const(v) => s.push_str(&format!(" {v}")),
        Payload::Jump {
            cond,
            on_true,
            on_false,
        } => s.push_str(&format!(" {cond:?} b{on_true} b{on_false}")),
        Payload::Switch { default, cases } => {
            s.push_str(&format!(" default=b{default}"));
            for (value, target) in cases.iter() {
                s.push_str(&format!(" {value}=>b{target}"));
            }
        }
        Payload::Mem { kind, width } => s.push_str(&format!(" {}:{width}", kind.as_str())),
        Payload::Coproc { id, op } => s.push_str(&format!(" cop{id}.{op}")),
        Payload::SendPort(port) => s.push_str(&format!(" port{port}")),
        Payload::None => {}
    }

    if node.reg.is_valid() {
        s.push_str(&format!(" {}", node.reg));
    }
    if node.size != 0 {
        s.push_str(&format!(" w{}", node.size));
    }
    for kid in node.kids.into_iter().flatten() {
        s.push(' ');
        s.push_str(&dump_node(arena, kid));
    }
    s.push(')');
    s
}
