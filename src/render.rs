//! Graphviz DOT emission (spec §4.7): one record-shaped node per block,
//! listing its instructions, with solid edges for direct/indirect
//! control flow and (optionally) dashed edges for fallthrough.
//!
//! Grounded on `graphviz_output` in the original `graphviz.c`: same
//! three passes (per-block instruction table, then edges), same
//! optional max-stack columns and source-tree highlighting, collapsed
//! from HTML-table-with-inline-colors down to DOT's plain `record`
//! shape since this crate has no use for the original's color palette.

use std::fmt::Write as _;

use crate::block::EdgeKind;
use crate::cfg::BlockGraph;
use crate::ir::{Opcode, Operand, TempKind};
use crate::mfp::LatticeValue;

/// Rendering knobs the CLI exposes (spec §6 `--dump-cfg`/`-c`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderSettings {
    pub dashed_fallthrough_edges: bool,
    pub show_max_stack: bool,
}

pub fn temp_name(kind: TempKind, index: u32) -> String {
    match kind {
        TempKind::Global { mem_offset } => format!("g{mem_offset:#x}"),
        TempKind::Local => format!("t{index}"),
        TempKind::Constant => String::new(),
    }
}

pub fn operand_label(operand: Operand) -> String {
    match operand {
        Operand::Constant(v) => format!("${v:#x}"),
        Operand::Temp(t) if t.is_constant() => match t.value {
            Some(v) => format!("${v:#x}"),
            None => "$?".to_string(),
        },
        Operand::Temp(t) => temp_name(t.kind, t.index),
    }
}

pub fn opcode_mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::InsnStart => "insn_start",
        Opcode::Call => "call",
        Opcode::ExitTb => "exit_tb",
        Opcode::MovI32 => "mov_i32",
        Opcode::MovI64 => "mov_i64",
        Opcode::AddI32 => "add_i32",
        Opcode::AddI64 => "add_i64",
        Opcode::SubI32 => "sub_i32",
        Opcode::SubI64 => "sub_i64",
        Opcode::QemuLdA32I32 => "qemu_ld_a32_i32",
        Opcode::QemuLdA64I32 => "qemu_ld_a64_i32",
        Opcode::QemuLdA32I64 => "qemu_ld_a32_i64",
        Opcode::QemuLdA64I64 => "qemu_ld_a64_i64",
        Opcode::QemuStA32I32 => "qemu_st_a32_i32",
        Opcode::QemuStA64I32 => "qemu_st_a64_i32",
        Opcode::QemuStA32I64 => "qemu_st_a32_i64",
        Opcode::QemuStA64I64 => "qemu_st_a64_i64",
        Opcode::Other => "op",
    }
}

fn escape_record_label(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('"', "\\\"")
}

fn stack_column(value: LatticeValue) -> String {
    match value {
        LatticeValue::Top => "?".to_string(),
        LatticeValue::Bottom => "-".to_string(),
        LatticeValue::Finite(n) => n.to_string(),
    }
}

/// Renders the whole graph as a `digraph { ... }` body. `root` is unused
/// beyond anchoring iteration order, which `graph.iter()` already
/// provides; kept as a parameter so call sites read the same as the
/// other top-level entry points that take `(graph, root)`.
pub fn render_dot(graph: &BlockGraph, settings: RenderSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {{");
    let _ = writeln!(out, "  node [shape=record, fontname=\"monospace\"];");
    let _ = writeln!(out, "  edge [fontname=\"monospace\"];");

    for block_id in graph.iter() {
        let block = graph.get(block_id);
        let mut label = String::new();
        let _ = write!(label, "{{{:#x}", block.guest_addr);
        for (i, inst) in block.instructions().iter().enumerate() {
            label.push_str("|<i");
            let _ = write!(label, "{i}> ");
            if let Some(settings_stack) = block.stack_state.as_ref().filter(|_| settings.show_max_stack) {
                let state = settings_stack[i];
                let _ = write!(label, "r={} w={} ", stack_column(state.max_ld_size), stack_column(state.max_st_size));
            }
            if inst.opcode == Opcode::InsnStart {
                if let Some(addr) = inst.insn_start_address() {
                    let _ = write!(label, "; {addr:#x}");
                }
                continue;
            }
            label.push_str(opcode_mnemonic(inst.opcode));
            let mut operands: Vec<String> = Vec::new();
            operands.extend(inst.outputs.iter().map(|&o| operand_label(o)));
            operands.extend(inst.inputs.iter().map(|&o| operand_label(o)));
            operands.extend(inst.constants.iter().map(|&o| operand_label(o)));
            if !operands.is_empty() {
                label.push(' ');
                label.push_str(&operands.join(", "));
            }
        }
        label.push('}');
        let _ = writeln!(out, "  \"{:#x}\" [label=\"{}\"];", block.guest_addr, escape_record_label(&label));
    }

    for block_id in graph.iter() {
        let block = graph.get(block_id);
        for edge in &block.succ {
            let style = match edge.kind {
                EdgeKind::Fallthrough if settings.dashed_fallthrough_edges => " [style=dashed]",
                _ => "",
            };
            let _ = writeln!(
                out,
                "  \"{:#x}\" -> \"{:#x}\"{style};",
                block.guest_addr,
                graph.get(edge.other).guest_addr
            );
        }
    }

    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::ir::Instruction;

    #[test]
    fn renders_one_node_per_block_and_one_edge_per_successor() {
        let mut graph = BlockGraph::new();
        let a = graph.push_block(Block::new(
            0x1000,
            4,
            vec![Instruction {
                opcode: Opcode::ExitTb,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            }],
        ));
        let b = graph.push_block(Block::new(
            0x1004,
            4,
            vec![Instruction {
                opcode: Opcode::ExitTb,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            }],
        ));
        graph.add_edge(a, 0, b, EdgeKind::Fallthrough).unwrap();

        let dot = render_dot(&graph, RenderSettings::default());
        assert_eq!(dot.matches("[label=").count(), 2);
        assert!(dot.contains("\"0x1000\" -> \"0x1004\""));
    }

    #[test]
    fn dashed_fallthrough_setting_adds_the_style_attribute() {
        let mut graph = BlockGraph::new();
        let a = graph.push_block(Block::new(0x2000, 4, vec![Instruction {
            opcode: Opcode::ExitTb,
            outputs: vec![],
            inputs: vec![],
            constants: vec![],
        }]));
        let b = graph.push_block(Block::new(0x2004, 4, vec![Instruction {
            opcode: Opcode::ExitTb,
            outputs: vec![],
            inputs: vec![],
            constants: vec![],
        }]));
        graph.add_edge(a, 0, b, EdgeKind::Fallthrough).unwrap();

        let dot = render_dot(&graph, RenderSettings { dashed_fallthrough_edges: true, show_max_stack: false });
        assert!(dot.contains("style=dashed"));
    }
}
