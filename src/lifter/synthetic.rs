//! A small, deterministic x86-64 lifter covering just enough of the ISA
//! (`ret`, `push`/`pop r64`, `mov r64, r64`/`mov r64, imm32`, `jmp rel8`/
//! `rel32`, `jmp r64`, `cpuid`) to drive the CLI and test suite without a
//! real dynamic-translation backend on hand. It is named `synthetic`
//! rather than `x86_64` on purpose: swapping in a production backend means
//! implementing `Lifter` again, not extending this one.

use super::{LiftFlags, LiftedBlock, Lifter};
use crate::ir::{ArchInfo, CallFlags, HelperInfo, Instruction, Opcode, Operand, Temp, TempKind};

pub const PC_OFFSET: u32 = 0;
pub const SP_OFFSET: u32 = 8;
pub const BP_OFFSET: u32 = 16;

const GPR_OFFSETS: [u32; 8] = [24, 32, 40, SP_OFFSET, BP_OFFSET, 48, 56, 64];

fn gpr_offset(reg: u8) -> u32 {
    GPR_OFFSETS[(reg & 0x7) as usize]
}

fn global(mem_offset: u32) -> Operand {
    Operand::Temp(Temp {
        index: 1_000 + mem_offset,
        kind: TempKind::Global { mem_offset },
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

/// Allocates local-temp indices within one block; local identity only
/// needs to be unique per block, never across blocks (spec §3).
struct LocalTemps(u32);

impl LocalTemps {
    fn next(&mut self) -> Operand {
        self.0 += 1;
        Operand::Temp(Temp {
            index: self.0,
            kind: TempKind::Local,
            value: None,
        })
    }
}

pub struct X86_64Lifter;

impl X86_64Lifter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for X86_64Lifter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum Decoded {
    Ret,
    Push(u8),
    Pop(u8),
    MovRegReg { dst: u8, src: u8 },
    MovRegImm { dst: u8, imm: i32 },
    JmpRel(i64),
    JmpReg(u8),
    Cpuid,
}

/// Decodes one instruction at `bytes[0..]`. Returns the decoded form and
/// its length in bytes, or `None` on an unrecognized encoding.
fn decode_one(bytes: &[u8]) -> Option<(Decoded, usize)> {
    match *bytes.first()? {
        0xC3 => Some((Decoded::Ret, 1)),
        b @ 0x50..=0x57 => Some((Decoded::Push(b - 0x50), 1)),
        b @ 0x58..=0x5F => Some((Decoded::Pop(b - 0x58), 1)),
        0xEB => {
            let rel = *bytes.get(1)? as i8 as i64;
            Some((Decoded::JmpRel(rel), 2))
        }
        0xE9 => {
            let imm = i32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?);
            Some((Decoded::JmpRel(imm as i64), 5))
        }
        0x0F => {
            if *bytes.get(1)? == 0xA2 {
                Some((Decoded::Cpuid, 2))
            } else {
                None
            }
        }
        0x48 => {
            let op = *bytes.get(1)?;
            let modrm = *bytes.get(2)?;
            let reg = (modrm >> 3) & 0x7;
            let rm = modrm & 0x7;
            let is_reg_direct = (modrm >> 6) == 0b11;
            if !is_reg_direct {
                return None;
            }
            match op {
                0x89 => Some((Decoded::MovRegReg { dst: rm, src: reg }, 3)),
                0xC7 if reg == 0 => {
                    let imm = i32::from_le_bytes(bytes.get(3..7)?.try_into().ok()?);
                    Some((Decoded::MovRegImm { dst: rm, imm }, 7))
                }
                0xFF if reg == 4 => Some((Decoded::JmpReg(rm), 3)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Emits the IR for one decoded guest instruction at `guest_addr`, pushing
/// into `out`. Returns `true` if this instruction ends the block (a
/// control transfer), matching how a real TCG block's translation loop
/// decides to stop.
fn emit(
    out: &mut Vec<Instruction>,
    temps: &mut LocalTemps,
    decoded: Decoded,
    guest_addr: u64,
) -> bool {
    out.push(Instruction {
        opcode: Opcode::InsnStart,
        outputs: vec![],
        inputs: vec![],
        constants: vec![constant(guest_addr as i64)],
    });

    match decoded {
        Decoded::Ret => {
            let loaded = temps.next();
            let addr = temps.next();
            out.push(Instruction {
                opcode: Opcode::AddI64,
                outputs: vec![addr],
                inputs: vec![global(SP_OFFSET), constant(0)],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::QemuLdA64I64,
                outputs: vec![loaded],
                inputs: vec![addr],
                constants: vec![],
            });
            let new_sp = temps.next();
            out.push(Instruction {
                opcode: Opcode::AddI64,
                outputs: vec![new_sp],
                inputs: vec![global(SP_OFFSET), constant(8)],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(SP_OFFSET)],
                inputs: vec![new_sp],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(PC_OFFSET)],
                inputs: vec![loaded],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::ExitTb,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            });
            true
        }
        Decoded::Push(reg) => {
            // The address is expressed directly against the SP leaf
            // (SP - 8), not against whatever the running SP delta happens
            // to be: the folder classifies each access from its own local
            // add/sub chain, it does not replay prior updates to the SP
            // global (spec §4.4 — SP/BP leaves always fold to 0).
            let addr = temps.next();
            out.push(Instruction {
                opcode: Opcode::SubI64,
                outputs: vec![addr],
                inputs: vec![global(SP_OFFSET), constant(8)],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::QemuStA64I64,
                outputs: vec![],
                inputs: vec![global(gpr_offset(reg)), addr],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(SP_OFFSET)],
                inputs: vec![addr],
                constants: vec![],
            });
            false
        }
        Decoded::Pop(reg) => {
            let addr = temps.next();
            out.push(Instruction {
                opcode: Opcode::SubI64,
                outputs: vec![addr],
                inputs: vec![global(SP_OFFSET), constant(8)],
                constants: vec![],
            });
            let loaded = temps.next();
            out.push(Instruction {
                opcode: Opcode::QemuLdA64I64,
                outputs: vec![loaded],
                inputs: vec![addr],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(gpr_offset(reg))],
                inputs: vec![loaded],
                constants: vec![],
            });
            let new_sp = temps.next();
            out.push(Instruction {
                opcode: Opcode::AddI64,
                outputs: vec![new_sp],
                inputs: vec![global(SP_OFFSET), constant(8)],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(SP_OFFSET)],
                inputs: vec![new_sp],
                constants: vec![],
            });
            false
        }
        Decoded::MovRegReg { dst, src } => {
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(gpr_offset(dst))],
                inputs: vec![global(gpr_offset(src))],
                constants: vec![],
            });
            false
        }
        Decoded::MovRegImm { dst, imm } => {
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(gpr_offset(dst))],
                inputs: vec![constant(imm as i64)],
                constants: vec![],
            });
            false
        }
        Decoded::JmpRel(rel) => {
            let target = (guest_addr as i64 + rel) as u64;
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(PC_OFFSET)],
                inputs: vec![constant(target as i64)],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::ExitTb,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            });
            true
        }
        Decoded::JmpReg(reg) => {
            out.push(Instruction {
                opcode: Opcode::MovI64,
                outputs: vec![global(PC_OFFSET)],
                inputs: vec![global(gpr_offset(reg))],
                constants: vec![],
            });
            out.push(Instruction {
                opcode: Opcode::ExitTb,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            });
            true
        }
        Decoded::Cpuid => {
            out.push(Instruction {
                opcode: Opcode::Call,
                outputs: vec![],
                inputs: vec![],
                constants: vec![],
            });
            false
        }
    }
}

impl Lifter for X86_64Lifter {
    fn translate_block(
        &mut self,
        bytes: &[u8],
        max_len: usize,
        guest_addr: u64,
        _flags: LiftFlags,
    ) -> LiftedBlock {
        let mut instructions = Vec::new();
        let mut temps = LocalTemps(0);
        let mut pos = 0usize;
        let limit = max_len.min(bytes.len());

        loop {
            let Some((decoded, len)) = decode_one(&bytes[pos..limit]) else {
                break;
            };
            if pos + len > limit {
                break;
            }
            let ends_block = emit(&mut instructions, &mut temps, decoded, guest_addr + pos as u64);
            pos += len;
            if ends_block {
                break;
            }
        }

        LiftedBlock {
            guest_addr,
            size_in_bytes: pos as u64,
            instructions,
        }
    }

    fn arch_info(&self) -> ArchInfo {
        ArchInfo {
            pc_offset: PC_OFFSET,
            sp_offset: SP_OFFSET,
            bp_offset: BP_OFFSET,
            word_size_bits: 64,
        }
    }

    fn helper_info(&self, call_inst: &Instruction) -> HelperInfo {
        assert_eq!(call_inst.opcode, Opcode::Call, "helper_info called on a non-call instruction");
        HelperInfo {
            func_name: "helper_cpuid".to_string(),
            func_flags: CallFlags::EMPTY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ret_only_block_lifts_to_a_single_exit() {
        let mut lifter = X86_64Lifter::new();
        let block = lifter.translate_block(&[0xC3], 16, 0x1000, LiftFlags::EMPTY);
        assert_eq!(block.size_in_bytes, 1);
        assert!(block.instructions.iter().any(|i| i.opcode == Opcode::ExitTb));
        assert!(!block.translation_failed());
    }

    #[test]
    fn push_pop_round_trips_through_the_stack() {
        // push rax; pop rcx; ret
        let bytes = [0x50, 0x59, 0xC3];
        let mut lifter = X86_64Lifter::new();
        let block = lifter.translate_block(&bytes, bytes.len(), 0x2000, LiftFlags::EMPTY);
        assert_eq!(block.size_in_bytes, bytes.len() as u64);
        let stores = block.instructions.iter().filter(|i| i.opcode.is_qemu_st()).count();
        let loads = block.instructions.iter().filter(|i| i.opcode.is_qemu_ld()).count();
        assert_eq!(stores, 1);
        // one load from the push/pop spill, one more from `ret`'s own load
        assert_eq!(loads, 2);
    }

    #[test]
    fn unknown_bytes_fail_translation() {
        let mut lifter = X86_64Lifter::new();
        let block = lifter.translate_block(&[0x0F, 0xFF], 16, 0x3000, LiftFlags::EMPTY);
        assert!(block.translation_failed());
    }

    #[test]
    fn jmp_reg_is_an_indirect_pc_write() {
        // jmp rax
        let bytes = [0x48, 0xFF, 0xE0];
        let mut lifter = X86_64Lifter::new();
        let block = lifter.translate_block(&bytes, bytes.len(), 0x4000, LiftFlags::EMPTY);
        let pc_write = block
            .instructions
            .iter()
            .find_map(|i| i.pc_write(PC_OFFSET));
        assert_eq!(pc_write, Some(crate::ir::PcWrite::Indirect));
    }
}
