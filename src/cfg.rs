//! `BlockGraph`: the arena-backed container of `Block`s plus the
//! insertion-order linked list and edge bookkeeping shared by the builder
//! (§4.3), the folder (§4.4), the source-tree search (§4.5) and the
//! fixpoint (§4.6).

use crate::arena::{Arena, ArenaStats};
use crate::block::{Block, BlockId, Edge, EdgeKind};
use crate::error::{AnalysisError, MAX_EDGES};

pub struct BlockGraph {
    blocks: Arena<Block>,
    head: Option<BlockId>,
    tail: Option<BlockId>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self {
            blocks: Arena::new(),
            head: None,
            tail: None,
        }
    }

    pub fn get(&self, id: BlockId) -> &Block {
        self.blocks.get(id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks.get_mut(id)
    }

    pub fn root(&self) -> Option<BlockId> {
        self.head
    }

    /// Appends a freshly lifted block to the end of the insertion-order
    /// list.
    pub fn push_block(&mut self, block: Block) -> BlockId {
        let id = self.blocks.alloc(block);
        if let Some(tail) = self.tail {
            self.blocks.get_mut(tail).next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        id
    }

    /// Inserts `new_id` immediately after `after` in the insertion-order
    /// list, threading it in front of whatever `after` used to point to.
    /// Used by the splitter: the new upper half always follows the
    /// shrunk lower half.
    pub fn link_after(&mut self, after: BlockId, new_id: BlockId) {
        let old_next = self.blocks.get(after).next;
        self.blocks.get_mut(after).next = Some(new_id);
        self.blocks.get_mut(new_id).next = old_next;
        if self.tail == Some(after) {
            self.tail = Some(new_id);
        }
    }

    /// Walks the insertion-order list from the root.
    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.head, move |&id| self.blocks.get(id).next)
    }

    pub fn block_count(&self) -> usize {
        self.iter().count()
    }

    /// Occupancy of the block arena backing this graph, for `--debug`
    /// reporting (spec §6: "print arena usage ... per arena").
    pub fn arena_stats(&self) -> ArenaStats {
        self.blocks.stats()
    }

    /// Linear scan by guest-address range (spec §4.3: "linear scan is
    /// acceptable given block counts").
    pub fn find_containing(&self, addr: u64) -> Option<BlockId> {
        self.iter().find(|&id| self.blocks.get(id).contains_addr(addr))
    }

    /// Adds an edge `src -(kind)-> dst` recorded at `src`'s instruction
    /// `src_instruction`, plus the matching reverse entry in `dst.pred`.
    /// Idempotent on `(src, dst)`: a second call with the same endpoints
    /// is a no-op (spec §4.3), which is what lets repeated direct targets
    /// landing on the same split stay duplicate-free.
    pub fn add_edge(
        &mut self,
        src: BlockId,
        src_instruction: usize,
        dst: BlockId,
        kind: EdgeKind,
    ) -> Result<(), AnalysisError> {
        if self.blocks.get(src).succ.iter().any(|e| e.other == dst) {
            return Ok(());
        }
        if self.blocks.get(src).succ.len() >= MAX_EDGES {
            return Err(AnalysisError::EdgeCapacityExceeded {
                block_address: self.blocks.get(src).guest_addr,
                capacity: MAX_EDGES,
            });
        }
        if self.blocks.get(dst).pred.len() >= MAX_EDGES {
            return Err(AnalysisError::EdgeCapacityExceeded {
                block_address: self.blocks.get(dst).guest_addr,
                capacity: MAX_EDGES,
            });
        }
        self.blocks.get_mut(src).succ.push(Edge {
            src_instruction,
            other: dst,
            kind,
        });
        self.blocks.get_mut(dst).pred.push(Edge {
            src_instruction,
            other: src,
            kind,
        });
        Ok(())
    }

    /// Rewrites the one `pred` entry on `dst` that records the edge
    /// `old --(old_src_instruction)--> dst`, re-homing it to
    /// `new --(new_src_instruction)--> dst` (spec §4.3 step: "For every
    /// successor `s` of the new block, rewrite `s.pred` entries that
    /// pointed to the original block..."). Used by the splitter, which
    /// moves an outbound edge from the shrunk original to the new block.
    pub fn rehome_predecessor(
        &mut self,
        dst: BlockId,
        old: BlockId,
        old_src_instruction: usize,
        new: BlockId,
        new_src_instruction: usize,
    ) {
        for edge in self.blocks.get_mut(dst).pred.iter_mut() {
            if edge.other == old && edge.src_instruction == old_src_instruction {
                edge.other = new;
                edge.src_instruction = new_src_instruction;
            }
        }
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new()
    }
}
