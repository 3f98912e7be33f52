//! The fixed set of architecture names the CLI accepts for `--arch`, and
//! the mapping from an ELF `e_machine`/class/endianness triple onto one of
//! them (spec §6, §4.8). Grounded on the original `arch.h` table: a flat
//! enum plus a name lookup, rather than anything clever.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[allow(non_camel_case_types)]
pub enum Architecture {
    #[value(name = "x86_64")]
    x86_64,
    aarch64,
    arm,
    riscv64,
    mips,
    ppc64le,
}

impl Architecture {
    pub const ALL: [Architecture; 6] = [
        Architecture::x86_64,
        Architecture::aarch64,
        Architecture::arm,
        Architecture::riscv64,
        Architecture::mips,
        Architecture::ppc64le,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Architecture::x86_64 => "x86_64",
            Architecture::aarch64 => "aarch64",
            Architecture::arm => "arm",
            Architecture::riscv64 => "riscv64",
            Architecture::mips => "mips",
            Architecture::ppc64le => "ppc64le",
        }
    }

    /// Case-sensitive exact match against one of the fixed architecture
    /// names (spec §6: "`--arch`/`-a <name>` ... Case-sensitive exact
    /// match").
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Maps an `object` crate architecture descriptor onto our own enum.
    /// Returns `None` for anything we have no lifter for, which the
    /// caller turns into a fatal "unknown architecture" configuration
    /// error (spec §4.2).
    pub fn from_object(arch: object::Architecture) -> Option<Self> {
        use object::Architecture as A;
        match arch {
            A::X86_64 => Some(Architecture::x86_64),
            A::Aarch64 | A::Aarch64_Ilp32 => Some(Architecture::aarch64),
            A::Arm => Some(Architecture::arm),
            A::Riscv64 => Some(Architecture::riscv64),
            A::Mips | A::Mips64 => Some(Architecture::mips),
            A::PowerPc64 => Some(Architecture::ppc64le),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn value_enum_accepts_the_exact_name_clap_sees_on_the_command_line() {
        assert_eq!(Architecture::from_str("x86_64", true), Ok(Architecture::x86_64));
        assert!(Architecture::from_str("x86-64", true).is_err());
    }

    #[test]
    fn from_name_is_case_sensitive() {
        assert_eq!(Architecture::from_name("x86_64"), Some(Architecture::x86_64));
        assert_eq!(Architecture::from_name("X86_64"), None);
        assert_eq!(Architecture::from_name("bogus"), None);
    }

    #[test]
    fn every_variant_round_trips_through_its_name() {
        for arch in Architecture::ALL {
            assert_eq!(Architecture::from_name(arch.name()), Some(arch));
        }
    }
}
