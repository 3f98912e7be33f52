//! The lifted IR data model (spec §3). Instructions are supplied by the
//! lifter and are read-only to the rest of the crate; everything here is
//! plain data plus the handful of opcodes the core recognizes by name.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Opcodes the core inspects by name. A real lifter backend emits many
/// more opcodes than this (arithmetic, logical, float, vector, ...); they
/// pass through the analyses unrecognized, which is exactly what the
/// symbolic folder (§4.4) and the fixpoint transfer (§4.6) want: anything
/// not in this set is opaque data-flow, not a branch or a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    InsnStart = 0,
    Call,
    ExitTb,
    MovI32,
    MovI64,
    AddI32,
    AddI64,
    SubI32,
    SubI64,
    QemuLdA32I32,
    QemuLdA64I32,
    QemuLdA32I64,
    QemuLdA64I64,
    QemuStA32I32,
    QemuStA64I32,
    QemuStA32I64,
    QemuStA64I64,
    /// Anything the core does not special-case. Distinct raw opcode values
    /// beyond the ones above all collapse to this when round-tripped from
    /// a lifter-supplied u16; only the special-cased ones need a name.
    Other,
}

impl Opcode {
    pub fn is_qemu_ld(self) -> bool {
        matches!(
            self,
            Opcode::QemuLdA32I32 | Opcode::QemuLdA64I32 | Opcode::QemuLdA32I64 | Opcode::QemuLdA64I64
        )
    }

    pub fn is_qemu_st(self) -> bool {
        matches!(
            self,
            Opcode::QemuStA32I32 | Opcode::QemuStA64I32 | Opcode::QemuStA32I64 | Opcode::QemuStA64I64
        )
    }

    pub fn is_mov(self) -> bool {
        matches!(self, Opcode::MovI32 | Opcode::MovI64)
    }

    pub fn is_add(self) -> bool {
        matches!(self, Opcode::AddI32 | Opcode::AddI64)
    }

    pub fn is_sub(self) -> bool {
        matches!(self, Opcode::SubI32 | Opcode::SubI64)
    }

    /// `true` for the 64-bit-width variant of an add/sub/mov family member.
    pub fn is_64bit(self) -> bool {
        matches!(
            self,
            Opcode::MovI64
                | Opcode::AddI64
                | Opcode::SubI64
                | Opcode::QemuLdA32I64
                | Opcode::QemuLdA64I64
                | Opcode::QemuStA32I64
                | Opcode::QemuStA64I64
        )
    }
}

/// Which architectural concept a temp stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempKind {
    /// Aliases an architectural register at a known memory offset.
    Global { mem_offset: u32 },
    /// Block-local scratch value, not backed by any architectural state.
    Local,
    /// Compile-time constant; `value` on the owning `Temp` is meaningful.
    Constant,
}

/// One IR operand slot. `index` is stable within the owning translation
/// block: two operands with the same `index` and the same block refer to
/// the same symbolic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp {
    pub index: u32,
    pub kind: TempKind,
    pub value: Option<i64>,
}

impl Temp {
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, TempKind::Constant)
    }

    pub fn global_offset(&self) -> Option<u32> {
        match self.kind {
            TempKind::Global { mem_offset } => Some(mem_offset),
            _ => None,
        }
    }
}

/// An operand reference as it appears in an instruction's argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Temp(Temp),
    Constant(i64),
}

impl Operand {
    pub fn as_temp(&self) -> Option<&Temp> {
        match self {
            Operand::Temp(t) => Some(t),
            Operand::Constant(_) => None,
        }
    }
}

/// One lifted IR instruction. Output/input/constant operands are stored
/// contiguously in lifter-owned storage; `Instruction` itself just borrows
/// the counts needed to slice them (mirrors `nb_oargs`/`nb_iargs`/`nb_cargs`
/// in the spec).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub outputs: Vec<Operand>,
    pub inputs: Vec<Operand>,
    pub constants: Vec<Operand>,
}

impl Instruction {
    pub fn nb_oargs(&self) -> usize {
        self.outputs.len()
    }

    pub fn nb_iargs(&self) -> usize {
        self.inputs.len()
    }

    pub fn nb_cargs(&self) -> usize {
        self.constants.len()
    }

    /// The guest address an `insn_start` marks, if this is one.
    pub fn insn_start_address(&self) -> Option<u64> {
        if self.opcode != Opcode::InsnStart {
            return None;
        }
        match self.constants.first() {
            Some(Operand::Constant(v)) => Some(*v as u64),
            _ => None,
        }
    }

    /// `Some((direct, target))` if this is a PC-write: an instruction whose
    /// first output is the global temp aliasing the program counter.
    /// `direct` is true when the written value is a constant temp.
    pub fn pc_write(&self, pc_offset: u32) -> Option<PcWrite> {
        if !self.opcode.is_mov() {
            return None;
        }
        let dst = self.outputs.first()?.as_temp()?;
        if dst.global_offset() != Some(pc_offset) {
            return None;
        }
        let src = self.inputs.first()?;
        match src {
            Operand::Temp(t) if t.is_constant() => Some(PcWrite::Direct(t.value? as u64)),
            Operand::Temp(_) => Some(PcWrite::Indirect),
            Operand::Constant(v) => Some(PcWrite::Direct(*v as u64)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcWrite {
    Direct(u64),
    Indirect,
}

/// Architecture descriptor returned by the lifter (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct ArchInfo {
    pub pc_offset: u32,
    pub sp_offset: u32,
    pub bp_offset: u32,
    pub word_size_bits: u32,
}

crate::flag_set!(
    CallFlags,
    NO_WRITE_GLOBALS no_write_globals "the helper cannot alter any global, including architectural registers",
);

pub const NO_WRITE_GLOBALS: u32 = 1 << 0;

/// Metadata about a `call` instruction's helper (spec §4.2).
#[derive(Debug, Clone)]
pub struct HelperInfo {
    pub func_name: String,
    pub func_flags: CallFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(index: u32, mem_offset: u32) -> Temp {
        Temp {
            index,
            kind: TempKind::Global { mem_offset },
            value: None,
        }
    }

    fn constant(index: u32, value: i64) -> Temp {
        Temp {
            index,
            kind: TempKind::Constant,
            value: Some(value),
        }
    }

    #[test]
    fn direct_pc_write_is_recognized() {
        let inst = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![Operand::Temp(global(0, 16))],
            inputs: vec![Operand::Temp(constant(1, 0x4010))],
            constants: vec![],
        };
        assert_eq!(inst.pc_write(16), Some(PcWrite::Direct(0x4010)));
    }

    #[test]
    fn indirect_pc_write_is_recognized() {
        let inst = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![Operand::Temp(global(0, 16))],
            inputs: vec![Operand::Temp(global(2, 24))],
            constants: vec![],
        };
        assert_eq!(inst.pc_write(16), Some(PcWrite::Indirect));
    }

    #[test]
    fn non_pc_write_is_not_a_branch() {
        let inst = Instruction {
            opcode: Opcode::MovI64,
            outputs: vec![Operand::Temp(global(0, 8))],
            inputs: vec![Operand::Temp(constant(1, 1))],
            constants: vec![],
        };
        assert_eq!(inst.pc_write(16), None);
    }

    #[test]
    fn call_flags_round_trip() {
        let flags = CallFlags::from_raw(NO_WRITE_GLOBALS);
        assert!(flags.no_write_globals());
        assert!(!CallFlags::EMPTY.no_write_globals());
    }
}
