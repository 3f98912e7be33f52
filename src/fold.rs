//! Stack-offset folder (spec §4.4): decides whether a `qemu_ld`/`qemu_st`
//! addresses the stack and, if so, the displacement from SP/BP.
//!
//! Grounded on `is_stack_ld`/`is_stack_st` in the original `common.c`,
//! generalized per the specification to fold through the full backward
//! source tree (`srctree`) rather than one local add instruction, so a
//! stack address reaching a memory op through a control-flow join is
//! summarized by the worst case instead of lost.

use crate::arena::Arena;
use crate::block::BlockId;
use crate::cfg::BlockGraph;
use crate::ir::{ArchInfo, Operand};
use crate::srctree::{self, SrcInfo, SrcInfoBranch, SrcInfoId};

/// Always `true` in this crate; threaded through explicitly because the
/// combinator is meaningful for the other direction too (spec §9:
/// "treat `false` as reachable but untested").
pub const STACK_GROWS_DOWN: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessKind {
    Load,
    Store,
}

/// Returns the displacement magnitude if `instruction` in `block` is a
/// stack load, `None` otherwise (not a `qemu_ld`, or its address does not
/// fold to `SP + k` / `BP + k`).
pub fn classify_load(graph: &BlockGraph, arch: ArchInfo, block: BlockId, instruction: usize) -> Option<i64> {
    classify_stack_access(graph, arch, block, instruction, AccessKind::Load)
}

/// Same as [`classify_load`] for `qemu_st`.
pub fn classify_store(graph: &BlockGraph, arch: ArchInfo, block: BlockId, instruction: usize) -> Option<i64> {
    classify_stack_access(graph, arch, block, instruction, AccessKind::Store)
}

fn classify_stack_access(
    graph: &BlockGraph,
    arch: ArchInfo,
    block: BlockId,
    instruction: usize,
    kind: AccessKind,
) -> Option<i64> {
    let inst = &graph.get(block).instructions()[instruction];
    let is_match = match kind {
        AccessKind::Load => inst.opcode.is_qemu_ld(),
        AccessKind::Store => inst.opcode.is_qemu_st(),
    };
    if !is_match {
        return None;
    }
    let addr_pos = match kind {
        AccessKind::Load => 0,
        AccessKind::Store => 1,
    };
    let addr_operand = *inst.inputs.get(addr_pos)?;
    let operand_index = inst.nb_oargs() + addr_pos;

    let (tree, root) = srctree::trace(graph, arch, block, instruction, operand_index);
    let root_node = tree.get(root);
    let branch = root_node.children.first();
    let value = fold_operand(graph, arch, addr_operand, branch, &tree, STACK_GROWS_DOWN)?;
    Some(value.abs())
}

/// Evaluates one operand: a constant folds to itself, SP/BP folds to 0,
/// any other temp needs the corresponding source-tree branch.
fn fold_operand(
    graph: &BlockGraph,
    arch: ArchInfo,
    operand: Operand,
    branch: Option<&SrcInfoBranch>,
    tree: &Arena<SrcInfo>,
    stack_grows_down: bool,
) -> Option<i64> {
    match operand {
        Operand::Constant(v) => Some(v),
        Operand::Temp(t) if t.is_constant() => t.value,
        Operand::Temp(t) => {
            if let Some(off) = t.global_offset() {
                if off == arch.sp_offset || off == arch.bp_offset {
                    return Some(0);
                }
            }
            fold_branch(graph, arch, branch?, tree, stack_grows_down)
        }
    }
}

/// Folds every alternative definition site in `branch` and combines them
/// by "largest stack offset" (spec §4.4). An empty branch (no defining
/// site was found — the source tree ran off the top of the function, or
/// the operand aliases a global other than SP/BP) fails the fold.
fn fold_branch(
    graph: &BlockGraph,
    arch: ArchInfo,
    branch: &SrcInfoBranch,
    tree: &Arena<SrcInfo>,
    stack_grows_down: bool,
) -> Option<i64> {
    if branch.alternatives.is_empty() {
        return None;
    }
    let mut values = Vec::with_capacity(branch.alternatives.len());
    for &alt in &branch.alternatives {
        values.push(fold_node(graph, arch, tree, alt, stack_grows_down)?);
    }
    Some(combine(&values, stack_grows_down))
}

fn combine(values: &[i64], stack_grows_down: bool) -> i64 {
    if stack_grows_down {
        values.iter().copied().min().expect("non-empty")
    } else {
        values.iter().copied().max().expect("non-empty")
    }
}

/// Folds the value defined at one source-tree node: an `add`/`sub` folds
/// both operands and combines arithmetically, a `mov` passes its operand
/// through, a `qemu_ld` (spill/reload aliasing) folds through the
/// matching store found via its `STACK_LOAD` child, a `qemu_st` folds its
/// value operand. Any other opcode fails the fold.
fn fold_node(graph: &BlockGraph, arch: ArchInfo, tree: &Arena<SrcInfo>, id: SrcInfoId, stack_grows_down: bool) -> Option<i64> {
    let node = tree.get(id);
    let inst = &graph.get(node.block).instructions()[node.instruction];

    if inst.opcode.is_mov() {
        fold_operand(graph, arch, inst.inputs[0], node.children.first(), tree, stack_grows_down)
    } else if inst.opcode.is_add() {
        let a = fold_operand(graph, arch, inst.inputs[0], node.children.first(), tree, stack_grows_down)?;
        let b = fold_operand(graph, arch, inst.inputs[1], node.children.get(1), tree, stack_grows_down)?;
        Some(wrapping_add(a, b, inst.opcode.is_64bit()))
    } else if inst.opcode.is_sub() {
        let a = fold_operand(graph, arch, inst.inputs[0], node.children.first(), tree, stack_grows_down)?;
        let b = fold_operand(graph, arch, inst.inputs[1], node.children.get(1), tree, stack_grows_down)?;
        Some(wrapping_sub(a, b, inst.opcode.is_64bit()))
    } else if inst.opcode.is_qemu_ld() {
        // Aliasing: the value of a reloaded temp is whatever was stored
        // at the matching offset (child slot 0; slot 1 traces the load's
        // own address operand, kept only for `flatten_sources`).
        fold_branch(graph, arch, node.children.first()?, tree, stack_grows_down)
    } else if inst.opcode.is_qemu_st() {
        fold_operand(graph, arch, inst.inputs[0], node.children.first(), tree, stack_grows_down)
    } else {
        None
    }
}

fn wrapping_add(a: i64, b: i64, is_64bit: bool) -> i64 {
    if is_64bit {
        a.wrapping_add(b)
    } else {
        (a as i32).wrapping_add(b as i32) as i64
    }
}

fn wrapping_sub(a: i64, b: i64, is_64bit: bool) -> i64 {
    if is_64bit {
        a.wrapping_sub(b)
    } else {
        (a as i32).wrapping_sub(b as i32) as i64
    }
}
