//! Monotone dataflow fixpoint computing the maximum stack-load and
//! stack-store offsets reachable at each instruction (spec §4.6).
//!
//! Grounded on `compute_max_stack_size`/`mfp_transfer_max_stack_size` in
//! the original `analyze-max-stack.c`: a FIFO worklist of CFG edges,
//! transfer over a block from its entry state, join at the destination,
//! re-enqueue on change. The lattice sentinels are a tagged variant here
//! (`LatticeValue`) rather than `-1`/`INT64_MAX` per the design notes
//! (spec §9), and the worklist is an unbounded `VecDeque` rather than a
//! fixed-capacity ring buffer — termination still follows from
//! monotonicity over a lattice of finite height, so there is nothing to
//! overflow.

use std::collections::{HashMap, VecDeque};

use crate::block::BlockId;
use crate::cfg::BlockGraph;
use crate::fold;
use crate::ir::{ArchInfo, Opcode, PcWrite};
use crate::lifter::Lifter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeValue {
    Bottom,
    Finite(i64),
    Top,
}

impl LatticeValue {
    fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Bottom, x) | (x, Self::Bottom) => x,
            (Self::Finite(a), Self::Finite(b)) => Self::Finite(a.max(b)),
        }
    }

    /// Conjunctive-use building block: `self <= other` on this one-sided
    /// lattice. Whether a *combined* state is subsumed is `MfpStackState`'s
    /// job, and it is conjunctive across both components (spec §9 — the
    /// fix for the draft's `||` bug).
    fn le(self, other: Self) -> bool {
        match (self, other) {
            (Self::Bottom, _) => true,
            (_, Self::Top) => true,
            (Self::Finite(a), Self::Finite(b)) => a <= b,
            (Self::Top, Self::Top) => true,
            _ => false,
        }
    }

    fn bump(self, candidate: i64) -> Self {
        self.join(Self::Finite(candidate))
    }
}

/// Per-instruction lattice state: the product of two `LatticeValue`
/// lattices, one per access direction (spec §3 "MfpStackState").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfpStackState {
    pub max_ld_size: LatticeValue,
    pub max_st_size: LatticeValue,
}

impl MfpStackState {
    pub const BOTTOM: Self = Self {
        max_ld_size: LatticeValue::Bottom,
        max_st_size: LatticeValue::Bottom,
    };
    pub const ENTRY: Self = Self {
        max_ld_size: LatticeValue::Finite(0),
        max_st_size: LatticeValue::Finite(0),
    };
    pub const TOP: Self = Self {
        max_ld_size: LatticeValue::Top,
        max_st_size: LatticeValue::Top,
    };

    fn join(self, other: Self) -> Self {
        Self {
            max_ld_size: self.max_ld_size.join(other.max_ld_size),
            max_st_size: self.max_st_size.join(other.max_st_size),
        }
    }

    /// `true` iff `self` is already accounted for by `other` on *both*
    /// components. Using `&&` here (not `||`) is the deliberate fix
    /// called out in spec §9: an `||` predicate would let a state that
    /// regresses one component through while improving the other be
    /// treated as already-subsumed, silently losing precision.
    fn subsumed_by(self, other: Self) -> bool {
        self.max_ld_size.le(other.max_ld_size) && self.max_st_size.le(other.max_st_size)
    }
}

/// Transfers `entry` forward across every instruction of `block_id`,
/// returning the post-instruction state at each index (spec §4.6
/// "Transfer").
fn transfer(graph: &BlockGraph, arch: ArchInfo, lifter: &dyn Lifter, block_id: BlockId, entry: MfpStackState) -> Vec<MfpStackState> {
    let block = graph.get(block_id);
    let mut state = entry;
    let mut out = Vec::with_capacity(block.instruction_count());
    for (i, inst) in block.instructions().iter().enumerate() {
        if let Some(offset) = fold::classify_load(graph, arch, block_id, i) {
            state.max_ld_size = state.max_ld_size.bump(offset);
        } else if let Some(offset) = fold::classify_store(graph, arch, block_id, i) {
            state.max_st_size = state.max_st_size.bump(offset);
        } else if inst.opcode == Opcode::Call {
            let info = lifter.helper_info(inst);
            if !info.func_flags.no_write_globals() {
                state = MfpStackState::TOP;
            }
        } else if let Some(pc_write) = inst.pc_write(arch.pc_offset) {
            let unresolved = match pc_write {
                PcWrite::Indirect => true,
                PcWrite::Direct(addr) => graph.find_containing(addr).is_none(),
            };
            if unresolved {
                state = MfpStackState::TOP;
            }
        }
        out.push(state);
    }
    out
}

/// Runs the fixpoint to convergence, then re-runs the transfer once more
/// on every block with its now-stable entry state to materialize the
/// per-instruction array (spec §4.6's closing "final pass").
pub fn run(graph: &BlockGraph, root: BlockId, arch: ArchInfo, lifter: &dyn Lifter) -> HashMap<BlockId, Vec<MfpStackState>> {
    let mut entry: HashMap<BlockId, MfpStackState> = graph
        .iter()
        .map(|id| (id, if id == root { MfpStackState::ENTRY } else { MfpStackState::BOTTOM }))
        .collect();

    let mut worklist: VecDeque<(BlockId, BlockId)> = VecDeque::new();
    for block_id in graph.iter() {
        for edge in &graph.get(block_id).succ {
            worklist.push_back((block_id, edge.other));
        }
    }

    while let Some((src, dst)) = worklist.pop_front() {
        let src_entry = entry[&src];
        let transferred = transfer(graph, arch, lifter, src, src_entry);
        let new_state = transferred.last().copied().unwrap_or(src_entry);
        let dst_entry = entry[&dst];
        if !new_state.subsumed_by(dst_entry) {
            entry.insert(dst, dst_entry.join(new_state));
            for edge in &graph.get(dst).succ {
                worklist.push_back((dst, edge.other));
            }
        }
    }

    graph
        .iter()
        .map(|block_id| {
            let block_entry = entry[&block_id];
            (block_id, transfer(graph, arch, lifter, block_id, block_entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifter::synthetic::X86_64Lifter;
    use crate::lifter::LiftFlags;

    fn lift_and_build(bytes: &[u8]) -> (BlockGraph, BlockId, ArchInfo, X86_64Lifter) {
        let mut lifter = X86_64Lifter::new();
        let arch = lifter.arch_info();
        let lifted = lifter.translate_block(bytes, bytes.len(), 0x1000, LiftFlags::EMPTY);
        let (graph, root) = crate::builder::build_cfg(vec![lifted], arch.pc_offset).unwrap();
        (graph, root.unwrap(), arch, lifter)
    }

    #[test]
    fn straight_line_ret_has_zero_stack_everywhere() {
        let (graph, root, arch, lifter) = lift_and_build(&[0xC3]);
        let result = run(&graph, root, arch, &lifter);
        let states = &result[&root];
        assert!(states.iter().all(|s| s.max_ld_size == LatticeValue::Finite(0) && s.max_st_size == LatticeValue::Finite(0)));
    }

    #[test]
    fn push_pop_reaches_eight_bytes() {
        // push rax; pop rcx; ret
        let (graph, root, arch, lifter) = lift_and_build(&[0x50, 0x59, 0xC3]);
        let result = run(&graph, root, arch, &lifter);
        let states = &result[&root];
        assert!(states.iter().any(|s| s.max_st_size == LatticeValue::Finite(8)));
        assert!(states.iter().any(|s| s.max_ld_size == LatticeValue::Finite(8)));
    }

    #[test]
    fn unresolved_helper_call_propagates_top() {
        // cpuid; ret
        let (graph, root, arch, lifter) = lift_and_build(&[0x0F, 0xA2, 0xC3]);
        let result = run(&graph, root, arch, &lifter);
        let states = &result[&root];
        assert_eq!(states.last().unwrap().max_ld_size, LatticeValue::Top);
        assert_eq!(states.last().unwrap().max_st_size, LatticeValue::Top);
    }
}
