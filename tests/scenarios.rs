//! End-to-end coverage of the six concrete scenarios, each driving the
//! real lift -> build -> analyze pipeline (or, where the synthetic
//! lifter's ISA subset cannot express the scenario, a hand-built
//! instruction stream run through the same public `build_cfg`/`srctree`
//! entry points a real caller would use).

use liftgraph::block::{BlockId, EdgeKind};
use liftgraph::builder::build_cfg;
use liftgraph::cfg::BlockGraph;
use liftgraph::ir::{ArchInfo, Instruction, Opcode, Operand, Temp, TempKind};
use liftgraph::lifter::synthetic::X86_64Lifter;
use liftgraph::lifter::{LiftFlags, LiftedBlock, Lifter};
use liftgraph::mfp::{self, LatticeValue};
use liftgraph::render::{render_dot, RenderSettings};
use liftgraph::srctree;

use rstest::rstest;

fn lift(bytes: &[u8], guest_addr: u64) -> (BlockGraph, BlockId, ArchInfo, X86_64Lifter) {
    let mut lifter = X86_64Lifter::new();
    let arch = lifter.arch_info();
    let lifted = lifter.translate_block(bytes, bytes.len(), guest_addr, LiftFlags::EMPTY);
    let (graph, root) = build_cfg(vec![lifted], arch.pc_offset).unwrap();
    (graph, root.unwrap(), arch, lifter)
}

#[rstest]
#[case::ret_only(&[0xC3])]
#[case::mov_imm_then_ret(&[0x48, 0xC7, 0xC0, 0x05, 0x00, 0x00, 0x00, 0xC3])]
fn scenario_1_straight_line_has_no_stack_traffic(#[case] bytes: &[u8]) {
    let (graph, root, arch, lifter) = lift(bytes, 0x1000);
    assert_eq!(graph.get(root).succ.len(), 0);
    let states = mfp::run(&graph, root, arch, &lifter);
    assert!(states[&root].iter().all(|s| s.max_ld_size == LatticeValue::Finite(0) && s.max_st_size == LatticeValue::Finite(0)));
}

#[test]
fn scenario_2_single_push_pop_reaches_eight_bytes_and_nothing_more() {
    // push rbp; mov rbp, rsp; pop rbp; ret
    let bytes = [0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3];
    let (graph, root, arch, lifter) = lift(&bytes, 0x1000);
    let states = mfp::run(&graph, root, arch, &lifter);
    let block_states = &states[&root];

    let saw_max_store_of_8 = block_states.iter().any(|s| s.max_st_size == LatticeValue::Finite(8));
    let saw_max_load_of_8 = block_states.iter().any(|s| s.max_ld_size == LatticeValue::Finite(8));
    assert!(saw_max_store_of_8);
    assert!(saw_max_load_of_8);
    // Before the push executes, nothing has touched the stack yet.
    assert_eq!(block_states[0].max_st_size, LatticeValue::Finite(0));
    assert_eq!(block_states[0].max_ld_size, LatticeValue::Finite(0));
    // Nothing in this function ever exceeds one word.
    assert!(block_states.iter().all(|s| s.max_st_size != LatticeValue::Finite(16) && s.max_ld_size != LatticeValue::Finite(16)));
}

fn insn_start(addr: u64) -> Instruction {
    Instruction {
        opcode: Opcode::InsnStart,
        outputs: vec![],
        inputs: vec![],
        constants: vec![Operand::Constant(addr as i64)],
    }
}

fn exit_tb() -> Instruction {
    Instruction {
        opcode: Opcode::ExitTb,
        outputs: vec![],
        inputs: vec![],
        constants: vec![],
    }
}

fn direct_jump(index: u32, pc_offset: u32, target: u64) -> Instruction {
    Instruction {
        opcode: Opcode::MovI64,
        outputs: vec![global(pc_offset, index)],
        inputs: vec![constant(target as i64)],
        constants: vec![],
    }
}

fn global(mem_offset: u32, index: u32) -> Operand {
    Operand::Temp(Temp {
        index,
        kind: TempKind::Global { mem_offset },
        value: None,
    })
}

fn local(index: u32) -> Operand {
    Operand::Temp(Temp {
        index,
        kind: TempKind::Local,
        value: None,
    })
}

fn constant(value: i64) -> Operand {
    Operand::Temp(Temp {
        index: 0,
        kind: TempKind::Constant,
        value: Some(value),
    })
}

#[test]
fn scenario_3_direct_branch_to_mid_block_target_splits_it_and_is_deterministic() {
    const PC_OFFSET: u32 = 0;

    // A: jmp 0x2004 (lands mid-block inside B)
    // B: insn@0x2000 (a plain mov); insn@0x2004 (split target): ret
    fn build() -> (BlockGraph, BlockId) {
        let block_a = LiftedBlock {
            guest_addr: 0x1000,
            size_in_bytes: 5,
            instructions: vec![insn_start(0x1000), direct_jump(5_001, PC_OFFSET, 0x2004), exit_tb()],
        };
        let block_b = LiftedBlock {
            guest_addr: 0x2000,
            size_in_bytes: 8,
            instructions: vec![
                insn_start(0x2000),
                Instruction {
                    opcode: Opcode::MovI64,
                    outputs: vec![global(24, 5_002)],
                    inputs: vec![constant(1)],
                    constants: vec![],
                },
                insn_start(0x2004),
                exit_tb(),
            ],
        };
        let (graph, root) = build_cfg(vec![block_a, block_b], PC_OFFSET).unwrap();
        (graph, root.unwrap())
    }

    // Building twice from the same inputs is deterministic: both runs
    // must land on the identical split structure.
    for (graph, root) in [build(), build()] {
        let a_succ = &graph.get(root).succ;
        assert_eq!(a_succ.len(), 1);
        assert_eq!(a_succ[0].kind, EdgeKind::Direct);

        let b1 = graph.get(root).next.unwrap();
        let b2 = graph.get(b1).next.unwrap();
        assert_eq!(graph.get(b2).guest_addr, 0x2004);
        assert_eq!(a_succ[0].other, b2);

        let b1_succ = &graph.get(b1).succ;
        assert_eq!(b1_succ.len(), 1);
        assert_eq!(b1_succ[0].kind, EdgeKind::Fallthrough);
        assert_eq!(b1_succ[0].other, b2);
    }
}

#[test]
fn scenario_3_rendered_cfg_has_one_node_per_block_and_a_solid_direct_edge() {
    const PC_OFFSET: u32 = 0;
    let block_a = LiftedBlock {
        guest_addr: 0x1000,
        size_in_bytes: 4,
        instructions: vec![insn_start(0x1000), direct_jump(9_001, PC_OFFSET, 0x1004), exit_tb()],
    };
    let block_b = LiftedBlock {
        guest_addr: 0x1004,
        size_in_bytes: 4,
        instructions: vec![insn_start(0x1004), exit_tb()],
    };
    let (graph, root) = build_cfg(vec![block_a, block_b], PC_OFFSET).unwrap();
    assert_eq!(graph.get(root.unwrap()).succ.len(), 1);

    let dot = render_dot(&graph, RenderSettings::default());
    assert_eq!(dot.matches("[label=").count(), 2);
    assert!(dot.contains("\"0x1000\" -> \"0x1004\""));
    assert!(!dot.contains("style=dashed"));

    insta::assert_snapshot!(dot, @r#"digraph {
  node [shape=record, fontname="monospace"];
  edge [fontname="monospace"];
  "0x1000" [label="\{0x1000\|\<i0\> ; 0x1000\|\<i1\> mov_i64 g0x0, $0x1004\|\<i2\> exit_tb\}"];
  "0x1004" [label="\{0x1004\|\<i0\> ; 0x1004\|\<i1\> exit_tb\}"];
  "0x1000" -> "0x1004";
}
"#);
}

#[test]
fn scenario_4_helper_call_lacking_no_write_globals_propagates_top_to_every_successor() {
    // cpuid; ret -- the synthetic backend's cpuid helper never sets
    // NO_WRITE_GLOBALS.
    let bytes = [0x0F, 0xA2, 0xC3];
    let (graph, root, arch, lifter) = lift(&bytes, 0x1000);

    let call_inst = graph.get(root).instructions().iter().find(|i| i.opcode == Opcode::Call).unwrap();
    assert!(!lifter.helper_info(call_inst).func_flags.no_write_globals());

    let states = mfp::run(&graph, root, arch, &lifter);
    let final_state = states[&root].last().copied().unwrap();
    assert_eq!(final_state.max_ld_size, LatticeValue::Top);
    assert_eq!(final_state.max_st_size, LatticeValue::Top);
}

#[test]
fn scenario_5_spill_reload_source_tree_reaches_the_matching_store() {
    const ARCH: ArchInfo = ArchInfo {
        pc_offset: 0,
        sp_offset: 8,
        bp_offset: 16,
        word_size_bits: 64,
    };
    const RDI_OFFSET: u32 = 64;
    const RAX_OFFSET: u32 = 24;

    // t1 = bp - 8; qemu_st [t1], rdi        (spill rdi)
    // t2 = bp - 8; t3 = qemu_ld [t2]        (reload)
    // rax = mov t3
    let instructions = vec![
        Instruction {
            opcode: Opcode::SubI64,
            outputs: vec![local(1)],
            inputs: vec![global(ARCH.bp_offset, 100), constant(8)],
            constants: vec![],
        },
        Instruction {
            opcode: Opcode::QemuStA64I64,
            outputs: vec![],
            inputs: vec![global(RDI_OFFSET, 101), local(1)],
            constants: vec![],
        },
        Instruction {
            opcode: Opcode::SubI64,
            outputs: vec![local(3)],
            inputs: vec![global(ARCH.bp_offset, 100), constant(8)],
            constants: vec![],
        },
        Instruction {
            opcode: Opcode::QemuLdA64I64,
            outputs: vec![local(4)],
            inputs: vec![local(3)],
            constants: vec![],
        },
        Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![global(RAX_OFFSET, 102)],
            inputs: vec![local(4)],
            constants: vec![],
        },
    ];
    let lifted = LiftedBlock {
        guest_addr: 0x1000,
        size_in_bytes: 20,
        instructions,
    };
    let (graph, root) = build_cfg(vec![lifted], ARCH.pc_offset).unwrap();
    let block = root.unwrap();

    // Query the source of the final mov's own input (rax <- t4).
    let (tree, root_node) = srctree::trace(&graph, ARCH, block, 4, 1);
    let root_alt = tree.get(root_node).children[0].alternatives[0];
    let load_node = tree.get(root_alt);
    assert_eq!(load_node.instruction, 3);

    // The reload's matching store (aliased through the stack-load branch).
    let stack_load_alt = load_node.children[0].alternatives[0];
    let store_node = tree.get(stack_load_alt);
    assert_eq!(store_node.instruction, 1);

    // The folder independently confirms both accesses hit the same slot.
    assert_eq!(liftgraph::fold::classify_load(&graph, ARCH, block, 3), Some(8));
    assert_eq!(liftgraph::fold::classify_store(&graph, ARCH, block, 1), Some(8));
}

#[test]
fn scenario_6_indirect_jump_adds_no_edge_and_still_converges() {
    // jmp rax -- an indirect PC-write with no resolvable target.
    let bytes = [0x48, 0xFF, 0xE0];
    let (graph, root, arch, lifter) = lift(&bytes, 0x1000);
    assert_eq!(graph.get(root).succ.len(), 0);

    let states = mfp::run(&graph, root, arch, &lifter);
    let final_state = states[&root].last().copied().unwrap();
    assert_eq!(final_state.max_ld_size, LatticeValue::Top);
    assert_eq!(final_state.max_st_size, LatticeValue::Top);
}
