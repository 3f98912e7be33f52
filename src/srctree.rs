//! Demand-driven backward slice producing a tree of definition sites for
//! one (block, instruction, operand) (spec §4.5).
//!
//! Grounded on `find_sources` in the original `analyze-reg-src.c`: a
//! worklist of search frames, each either chasing a temp's defining
//! instruction or aliasing a stack load to its matching store, extended
//! across predecessors with a per-path visited-block set for loop
//! detection. The original used a fixed-size ring buffer of `Src`
//! entries; this uses the crate's own temporary arena for the same
//! purpose — `Frame`s live in an `Arena<Frame>` scoped to one `trace`
//! call, with a plain `VecDeque<Id<Frame>>` as the FIFO order over it,
//! and the arena is rewound to its pre-trace mark before returning.

use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use crate::arena::{Arena, Id};
use crate::block::BlockId;
use crate::cfg::BlockGraph;
use crate::error::MAX_BRANCHES_PER_CHILD;
use crate::fold;
use crate::ir::{ArchInfo, Instruction, Operand};

pub type SrcInfoId = Id<SrcInfo>;

/// One node in the source tree: the defining instruction found for some
/// operand, plus one branch slot per input operand of that instruction
/// (spec §3 "SrcInfo"). The root node (returned by [`trace`]) has
/// `op_index == -1` and a single child holding the traced operand's own
/// alternatives.
#[derive(Debug)]
pub struct SrcInfo {
    pub block: BlockId,
    pub instruction: usize,
    pub op_index: i32,
    pub children: Vec<SrcInfoBranch>,
}

/// A bounded list of alternative definition sites for one operand slot,
/// populated across merging predecessors. Excess alternatives beyond
/// `MAX_BRANCHES_PER_CHILD` are dropped (spec §4.5, §9).
#[derive(Debug, Default)]
pub struct SrcInfoBranch {
    pub alternatives: Vec<SrcInfoId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Temp(u32),
    StackLoad(i64),
}

#[derive(Clone)]
struct Frame {
    block: BlockId,
    scan_index: usize,
    parent: SrcInfoId,
    parent_child_index: usize,
    kind: FrameKind,
    visited: Rc<HashSet<BlockId>>,
}

/// Traces the definition chain of input operand `operand_index` of the
/// instruction at `(block, instruction)`. `operand_index` is relative to
/// the instruction's full operand numbering (`operand_index - nb_oargs`
/// is the input position); `operand_index < nb_oargs` is a caller error.
pub fn trace(graph: &BlockGraph, arch: ArchInfo, block: BlockId, instruction: usize, operand_index: usize) -> (Arena<SrcInfo>, SrcInfoId) {
    let mut tree = Arena::new();
    let root = tree.alloc(SrcInfo {
        block,
        instruction,
        op_index: -1,
        children: vec![SrcInfoBranch::default()],
    });

    let inst = &graph.get(block).instructions()[instruction];
    let nb_oargs = inst.nb_oargs();
    assert!(operand_index >= nb_oargs, "operand_index must name an input operand");
    let input_pos = operand_index - nb_oargs;
    let operand = inst.inputs.get(input_pos).copied();

    let mut frames: Arena<Frame> = Arena::new();
    let marker = frames.mark();
    let mut order: VecDeque<Id<Frame>> = VecDeque::new();
    if let Some(Operand::Temp(t)) = operand {
        if !t.is_constant() && t.global_offset().is_none() {
            let mut visited = HashSet::new();
            visited.insert(block);
            let id = frames.alloc(Frame {
                block,
                scan_index: instruction,
                parent: root,
                parent_child_index: 0,
                kind: FrameKind::Temp(t.index),
                visited: Rc::new(visited),
            });
            order.push_back(id);
        }
    }

    while let Some(frame_id) = order.pop_front() {
        let frame = frames.get(frame_id).clone();
        process_frame(graph, arch, &mut tree, frame, &mut frames, &mut order);
    }

    frames.reset_to(marker);
    (tree, root)
}

fn find_output_position(inst: &Instruction, temp_index: u32) -> Option<usize> {
    inst.outputs
        .iter()
        .position(|o| matches!(o, Operand::Temp(t) if t.index == temp_index))
}

fn process_frame(
    graph: &BlockGraph,
    arch: ArchInfo,
    tree: &mut Arena<SrcInfo>,
    frame: Frame,
    frames: &mut Arena<Frame>,
    order: &mut VecDeque<Id<Frame>>,
) {
    let instructions = graph.get(frame.block).instructions();
    let mut k = frame.scan_index;
    while k > 0 {
        k -= 1;
        let inst = &instructions[k];
        let defining_out_pos = match frame.kind {
            FrameKind::Temp(idx) => find_output_position(inst, idx),
            FrameKind::StackLoad(offset) => {
                if inst.opcode.is_qemu_st() && fold::classify_store(graph, arch, frame.block, k) == Some(offset) {
                    Some(0)
                } else {
                    None
                }
            }
        };
        let Some(out_pos) = defining_out_pos else {
            continue;
        };

        let is_qemu_ld_site = matches!(frame.kind, FrameKind::Temp(_)) && inst.opcode.is_qemu_ld();
        let children_len = if is_qemu_ld_site { 2 } else { inst.nb_iargs() };
        let new_id = tree.alloc(SrcInfo {
            block: frame.block,
            instruction: k,
            op_index: out_pos as i32,
            children: (0..children_len).map(|_| SrcInfoBranch::default()).collect(),
        });

        let accepted = {
            let branch = &mut tree.get_mut(frame.parent).children[frame.parent_child_index];
            if branch.alternatives.len() < MAX_BRANCHES_PER_CHILD {
                branch.alternatives.push(new_id);
                true
            } else {
                log::debug!(
                    "source-tree branch cap reached at block {:#x} instruction {k}; dropping alternative",
                    graph.get(frame.block).guest_addr
                );
                false
            }
        };
        if !accepted {
            return;
        }

        if is_qemu_ld_site {
            if let Some(offset) = fold::classify_load(graph, arch, frame.block, k) {
                let id = frames.alloc(Frame {
                    block: frame.block,
                    scan_index: k,
                    parent: new_id,
                    parent_child_index: 0,
                    kind: FrameKind::StackLoad(offset),
                    visited: frame.visited.clone(),
                });
                order.push_back(id);
            }
            if let Some(Operand::Temp(t)) = inst.inputs.first() {
                if !t.is_constant() {
                    let id = frames.alloc(Frame {
                        block: frame.block,
                        scan_index: k,
                        parent: new_id,
                        parent_child_index: 1,
                        kind: FrameKind::Temp(t.index),
                        visited: frame.visited.clone(),
                    });
                    order.push_back(id);
                }
            }
        } else {
            for (pos, input) in inst.inputs.iter().enumerate() {
                if let Operand::Temp(t) = input {
                    if !t.is_constant() {
                        let id = frames.alloc(Frame {
                            block: frame.block,
                            scan_index: k,
                            parent: new_id,
                            parent_child_index: pos,
                            kind: FrameKind::Temp(t.index),
                            visited: frame.visited.clone(),
                        });
                        order.push_back(id);
                    }
                }
            }
        }
        return;
    }

    for edge in &graph.get(frame.block).pred {
        let pred = edge.other;
        if frame.visited.contains(&pred) {
            continue;
        }
        let mut visited = (*frame.visited).clone();
        visited.insert(pred);
        let pred_instruction_count = graph.get(pred).instruction_count();
        let id = frames.alloc(Frame {
            block: pred,
            scan_index: pred_instruction_count,
            parent: frame.parent,
            parent_child_index: frame.parent_child_index,
            kind: frame.kind,
            visited: Rc::new(visited),
        });
        order.push_back(id);
    }
}

/// Walks the tree produced by [`trace`] and records each non-root node
/// into its owning block's `reg_src_info[instruction]`, so the renderer
/// can highlight source instructions for the queried operand.
pub fn flatten_sources(graph: &mut BlockGraph, tree: &Arena<SrcInfo>, root: SrcInfoId) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let (block, instruction, op_index, alts): (BlockId, usize, i32, Vec<SrcInfoId>) = {
            let node = tree.get(id);
            (
                node.block,
                node.instruction,
                node.op_index,
                node.children.iter().flat_map(|b| b.alternatives.iter().copied()).collect(),
            )
        };
        if op_index >= 0 {
            let count = graph.get(block).instruction_count();
            let slots = graph.get_mut(block).reg_src_info.get_or_insert_with(|| vec![None; count]);
            slots[instruction] = Some(id);
        }
        stack.extend(alts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::cfg::BlockGraph;
    use crate::ir::{Instruction, Opcode, Temp, TempKind};

    const ARCH: ArchInfo = ArchInfo {
        pc_offset: 0,
        sp_offset: 8,
        bp_offset: 16,
        word_size_bits: 64,
    };

    fn local(index: u32) -> Operand {
        Operand::Temp(Temp {
            index,
            kind: TempKind::Local,
            value: None,
        })
    }

    fn constant(index: u32, value: i64) -> Operand {
        Operand::Temp(Temp {
            index,
            kind: TempKind::Constant,
            value: Some(value),
        })
    }

    #[test]
    fn single_block_definition_is_found() {
        // t1 = 5; t2 = mov t1; (query t2's own mov input)
        let instructions = vec![
            Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![local(1)],
                inputs: vec![constant(0, 5)],
                constants: vec![],
            },
            Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![local(2)],
                inputs: vec![local(1)],
                constants: vec![],
            },
        ];
        let mut graph = BlockGraph::new();
        let block = graph.push_block(Block::new(0x1000, 8, instructions));
        let (tree, root) = trace(&graph, ARCH, block, 1, 1);
        let root_children = &tree.get(root).children[0].alternatives;
        assert_eq!(root_children.len(), 1);
        let site = tree.get(root_children[0]);
        assert_eq!(site.instruction, 0);
    }

    #[test]
    fn cyclic_cfg_terminates() {
        // A single self-looping block; tracing a temp never defined
        // there must terminate instead of looping forever.
        let instructions = vec![Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![local(2)],
            inputs: vec![local(99)],
            constants: vec![],
        }];
        let mut graph = BlockGraph::new();
        let block = graph.push_block(Block::new(0x2000, 4, instructions));
        graph.add_edge(block, 0, block, crate::block::EdgeKind::Direct).unwrap();
        let (tree, root) = trace(&graph, ARCH, block, 0, 1);
        // No definition exists anywhere reachable; the branch stays empty.
        assert!(tree.get(root).children[0].alternatives.is_empty());
    }

    #[test]
    fn predecessor_merge_collects_both_definitions() {
        // pred_a: t1 = 1             pred_b: t1 = 2
        //                  \           /
        //                   succ: t2 = mov t1     (query t2's source)
        let def_a = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![local(1)],
            inputs: vec![constant(0, 1)],
            constants: vec![],
        };
        let def_b = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![local(1)],
            inputs: vec![constant(0, 2)],
            constants: vec![],
        };
        let use_site = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![local(2)],
            inputs: vec![local(1)],
            constants: vec![],
        };
        let mut graph = BlockGraph::new();
        let pred_a = graph.push_block(Block::new(0x1000, 4, vec![def_a]));
        let pred_b = graph.push_block(Block::new(0x2000, 4, vec![def_b]));
        let succ = graph.push_block(Block::new(0x3000, 4, vec![use_site]));
        graph.add_edge(pred_a, 0, succ, crate::block::EdgeKind::Fallthrough).unwrap();
        graph.add_edge(pred_b, 0, succ, crate::block::EdgeKind::Fallthrough).unwrap();

        let (tree, root) = trace(&graph, ARCH, succ, 0, 1);
        let alts = &tree.get(root).children[0].alternatives;
        assert_eq!(alts.len(), 2);
    }
}
