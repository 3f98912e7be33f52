//! The narrow interface the core consumes from the machine-code-to-IR
//! lifter (spec §4.2). The lifter is an external collaborator — a
//! variant-per-architecture backend selected at load time — so the core
//! is generic over this trait rather than over any one backend.

pub mod synthetic;

use crate::arch::Architecture;
use crate::ir::{ArchInfo, HelperInfo, Instruction};

crate::flag_set!(
    LiftFlags,
    OPTIMIZE optimize "lifter-side peephole optimization is enabled",
    HELPER_TO_TCG helper_to_tcg "helper calls are inlined into IR rather than left as calls (experimental)",
    ARM_THUMB arm_thumb "the block is lifted as Thumb-encoded ARM",
);

pub const OPTIMIZE: u32 = 1 << 0;
pub const HELPER_TO_TCG: u32 = 1 << 1;
pub const ARM_THUMB: u32 = 1 << 2;

/// One lifted basic block: its guest start address, byte length, and
/// instruction stream. `instruction_count == 0` signals a failed
/// translation (spec §4.2); callers check `instructions.is_empty()`.
#[derive(Debug, Clone)]
pub struct LiftedBlock {
    pub guest_addr: u64,
    pub size_in_bytes: u64,
    pub instructions: Vec<Instruction>,
}

impl LiftedBlock {
    pub fn translation_failed(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// The three queries the core issues against a lifter backend.
pub trait Lifter {
    /// Lifts one basic block starting at `guest_addr` from `bytes`
    /// (at most `max_len` bytes are consulted). `flags.arm_thumb` is
    /// forced on by the caller when `guest_addr`'s low bit was set before
    /// it was cleared (spec §4.2) — the lifter itself does not inspect the
    /// raw address for the Thumb bit.
    fn translate_block(
        &mut self,
        bytes: &[u8],
        max_len: usize,
        guest_addr: u64,
        flags: LiftFlags,
    ) -> LiftedBlock;

    /// The architecture descriptor (PC/SP/BP global offsets, word size)
    /// for this backend instance.
    fn arch_info(&self) -> ArchInfo;

    /// Metadata for a `call` instruction's helper. Panics if `call_inst`
    /// is not a `call` — callers only invoke this after checking the
    /// opcode.
    fn helper_info(&self, call_inst: &Instruction) -> HelperInfo;
}

/// Selects a lifter backend for `arch`. Fails (spec §4.2: "an unknown
/// architecture ... is a fatal request error") for anything
/// `Architecture::from_name`/`from_object` could not resolve to a
/// supported variant, or for architectures this crate ships no backend
/// for.
pub fn load_lifter(arch: Architecture) -> anyhow::Result<Box<dyn Lifter>> {
    match arch {
        Architecture::x86_64 => Ok(Box::new(synthetic::X86_64Lifter::new())),
        other => Err(anyhow::anyhow!(
            "no lifter backend available for architecture {other}"
        )),
    }
}
