//! `--dump-ir`/`-i`: the lifted IR, one instruction per line, in block
//! order (spec §6). Grounded on the teacher's `dump_functions.rs`, which
//! walks a list and writes one line per entry to stdout.

use std::fmt::Write as _;

use liftgraph::cfg::BlockGraph;
use liftgraph::ir::Opcode;
use liftgraph::render::{opcode_mnemonic, operand_label};

pub fn dump_ir(graph: &BlockGraph) -> String {
    let mut out = String::new();
    for block_id in graph.iter() {
        let block = graph.get(block_id);
        let _ = writeln!(out, "; block {:#x}", block.guest_addr);
        for inst in block.instructions() {
            if inst.opcode == Opcode::InsnStart {
                if let Some(addr) = inst.insn_start_address() {
                    let _ = writeln!(out, "{addr:#x}:");
                }
                continue;
            }
            let mut line = format!("  {}", opcode_mnemonic(inst.opcode));
            let mut operands: Vec<String> = Vec::new();
            operands.extend(inst.outputs.iter().map(|&o| operand_label(o)));
            operands.extend(inst.inputs.iter().map(|&o| operand_label(o)));
            operands.extend(inst.constants.iter().map(|&o| operand_label(o)));
            if !operands.is_empty() {
                line.push(' ');
                line.push_str(&operands.join(", "));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
