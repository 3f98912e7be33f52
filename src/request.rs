//! Top-level request orchestration (spec §2 "Control flow per request"):
//! load bytes, lift sequentially until the region is consumed, build the
//! CFG, optionally run the source-tree query, optionally run the
//! max-stack fixpoint, hand the result to the renderer.
//!
//! The teacher has no single-request-object equivalent (`idb-rs` is a
//! library of independent section parsers driven straight from its CLI
//! `tools/*.rs` files); this module plays the same role `tools/tools.rs`'s
//! per-`Operation` dispatch does there, just gathered into one pipeline
//! function since every flag here composes over one lift-and-analyze run
//! instead of selecting between independent dumps.

use anyhow::{bail, ensure, Context, Result};

use crate::arch::Architecture;
use crate::block::BlockId;
use crate::builder;
use crate::cfg::BlockGraph;
use crate::lifter::{self, LiftFlags, Lifter};
use crate::mfp::{self, MfpStackState};
use crate::srctree;

/// One `--analyze-reg-src` query: guest address of the source-level
/// instruction, IR-instruction offset within that guest instruction, and
/// operand index including outputs (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct SourceQuery {
    pub guest_addr: u64,
    pub ir_offset_in_instruction: usize,
    pub operand_index: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub lift_flags: LiftFlags,
    pub run_max_stack: bool,
    pub source_query: Option<SourceQuery>,
}

/// The fully lifted and analyzed function, ready for the renderer.
pub struct AnalyzedFunction {
    pub graph: BlockGraph,
    pub root: Option<BlockId>,
}

/// Lifts `bytes` (a region starting at `guest_addr`, `arm_thumb` forced on
/// when `guest_addr`'s low bit was set) one block at a time until the
/// region is consumed, recovering from lifter failures by skipping ahead
/// (spec §7 error kind 4), then builds the CFG and runs whichever
/// analyses `options` asks for.
/// Whether `guest_addr`'s low bit marks Thumb encoding, and the base
/// address with that bit cleared. Only meaningful for `Architecture::arm`
/// (spec §4.2); split out so the mask arithmetic is testable without a
/// lifter backend.
fn thumb_base_addr(arch: Architecture, guest_addr: u64) -> (bool, u64) {
    (arch == Architecture::arm && guest_addr & 1 != 0, guest_addr & !1)
}

pub fn run(arch: Architecture, guest_addr: u64, bytes: &[u8], options: RequestOptions) -> Result<AnalyzedFunction> {
    // Computed ahead of `load_lifter` so the low-bit mask always applies to
    // `guest_addr` regardless of which architectures have a backend; this
    // path is untestable end-to-end until an ARM backend ships (DESIGN.md).
    let (thumb, base_addr) = thumb_base_addr(arch, guest_addr);
    let mut flags = options.lift_flags;
    if thumb {
        flags = flags.union(LiftFlags::from_raw(lifter::ARM_THUMB));
    }

    let mut backend = lifter::load_lifter(arch)?;
    let arch_info = backend.arch_info();

    let lifted = lift_region(backend.as_mut(), bytes, base_addr, flags);

    let (mut graph, root) = builder::build_cfg(lifted, arch_info.pc_offset).context("building the control-flow graph")?;

    if let Some(query) = options.source_query {
        run_source_query(&graph, arch_info, query).map(|(tree, id)| srctree::flatten_sources(&mut graph, &tree, id)).unwrap_or_else(|err| {
            log::warn!("source-tree query not resolved: {err:#}");
        });
    }

    if options.run_max_stack {
        if let Some(root_id) = root {
            let states = mfp::run(&graph, root_id, arch_info, backend.as_ref());
            for (block_id, per_instruction) in states {
                graph.get_mut(block_id).stack_state = Some(per_instruction);
            }
        }
    }

    Ok(AnalyzedFunction { graph, root })
}

/// Lifts blocks from `base_addr` until `bytes` is consumed. A failed
/// translation (`instruction_count == 0`) advances by its own reported
/// size, or by one byte if that size is also zero, so a pathological
/// lifter backend can never stall the loop (spec §7).
fn lift_region(lifter: &mut dyn Lifter, bytes: &[u8], base_addr: u64, flags: LiftFlags) -> Vec<lifter::LiftedBlock> {
    let mut out = Vec::new();
    let mut offset: usize = 0;
    while offset < bytes.len() {
        let addr = base_addr + offset as u64;
        let remaining = &bytes[offset..];
        let block = lifter.translate_block(remaining, remaining.len(), addr, flags);
        if block.translation_failed() {
            log::warn!("lifter failed to translate block at {addr:#x}; skipping");
            let advance = if block.size_in_bytes == 0 { 1 } else { block.size_in_bytes };
            offset += advance as usize;
            continue;
        }
        offset += block.size_in_bytes as usize;
        out.push(block);
    }
    out
}

fn run_source_query(graph: &BlockGraph, arch: crate::ir::ArchInfo, query: SourceQuery) -> Result<(crate::arena::Arena<srctree::SrcInfo>, srctree::SrcInfoId)> {
    let block = graph
        .find_containing(query.guest_addr)
        .with_context(|| format!("address {:#x} is outside the lifted region", query.guest_addr))?;
    let insn_start = graph
        .get(block)
        .instruction_index_for_addr(query.guest_addr)
        .with_context(|| format!("no instruction boundary at {:#x}", query.guest_addr))?;
    let instruction = insn_start + query.ir_offset_in_instruction;
    let count = graph.get(block).instruction_count();
    ensure!(
        instruction < count,
        "IR offset {} from {:#x} runs past the end of the block",
        query.ir_offset_in_instruction,
        query.guest_addr
    );
    let inst = &graph.get(block).instructions()[instruction];
    if query.operand_index < inst.nb_oargs() {
        bail!("operand index {} names an output; source-tracing only applies to inputs", query.operand_index);
    }
    Ok(srctree::trace(graph, arch, block, instruction, query.operand_index))
}

/// Pulls `block_id`'s materialized max-stack state back out, for callers
/// (the renderer, tests) that want it keyed by block rather than reaching
/// into `Block` directly.
pub fn stack_states(graph: &BlockGraph, block_id: BlockId) -> Option<&[MfpStackState]> {
    graph.get(block_id).stack_state.as_deref()
}
