//! The CFG's node and edge types (spec §3 "Block (TbNode)" / "Edge").
//!
//! A block's instruction range is `(storage, start..end)`: `storage` is an
//! `Rc<Vec<Instruction>>` shared by every block split off the same lifted
//! translation block, so splitting only ever adjusts a `Range<usize>` —
//! no instruction is copied.

use std::ops::Range;
use std::rc::Rc;

use crate::arena::Id;
use crate::ir::Instruction;
use crate::mfp::MfpStackState;
use crate::srctree::SrcInfoId;

pub type BlockId = Id<Block>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Direct,
    Indirect,
    Fallthrough,
}

/// An edge endpoint. Used identically in a block's `succ` and `pred`
/// lists: `other` always names the block at the far end, regardless of
/// which list it sits in (mirrors the original `TbNode::succ`/`pred`
/// arrays, which both store the same `Edge` shape).
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src_instruction: usize,
    pub other: BlockId,
    pub kind: EdgeKind,
}

pub struct Block {
    pub guest_addr: u64,
    pub size_in_bytes: u64,
    storage: Rc<Vec<Instruction>>,
    range: Range<usize>,
    pub next: Option<BlockId>,
    pub succ: Vec<Edge>,
    pub pred: Vec<Edge>,
    /// Lazily populated by the max-stack fixpoint (§4.6).
    pub stack_state: Option<Vec<MfpStackState>>,
    /// Lazily populated by `flatten_sources` (§4.5): `reg_src_info[i]` is
    /// the source-tree node, if any, that explains instruction `i`.
    pub reg_src_info: Option<Vec<Option<SrcInfoId>>>,
}

impl Block {
    pub(crate) fn new(guest_addr: u64, size_in_bytes: u64, instructions: Vec<Instruction>) -> Self {
        let len = instructions.len();
        Self {
            guest_addr,
            size_in_bytes,
            storage: Rc::new(instructions),
            range: 0..len,
            next: None,
            succ: Vec::new(),
            pred: Vec::new(),
            stack_state: None,
            reg_src_info: None,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.storage[self.range.clone()]
    }

    pub fn instruction_count(&self) -> usize {
        self.range.len()
    }

    pub fn end_addr(&self) -> u64 {
        self.guest_addr + self.size_in_bytes
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.guest_addr && addr < self.end_addr()
    }

    /// Instruction index (local to this block) whose `insn_start` marks
    /// `addr`, if any.
    pub fn instruction_index_for_addr(&self, addr: u64) -> Option<usize> {
        self.instructions()
            .iter()
            .position(|inst| inst.insn_start_address() == Some(addr))
    }

    pub(crate) fn storage_handle(&self) -> Rc<Vec<Instruction>> {
        self.storage.clone()
    }

    pub(crate) fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub(crate) fn set_range(&mut self, range: Range<usize>) {
        self.range = range;
    }

    pub(crate) fn set_storage(&mut self, storage: Rc<Vec<Instruction>>) {
        self.storage = storage;
    }
}
