//! # The processor state (PSTATE)
//!
//! Unlike the CPSR view software sees, the emulated state keeps every field
//! unpacked. The CPSR/SPSR images are assembled and parsed on demand in
//! [`psr`](super::psr), gated on the configured features, so the unpacked
//! struct can afford to carry all fields of all generations at once.
//!
//! Two fields together select the instruction set being decoded:
//!
//! - `rw` - the register/address width: 26-bit (ARMv1/v2 and the 26-bit
//!   compatibility modes of early 32-bit cores), 32-bit or 64-bit.
//! - `jt` - the AArch32 J/T selector: ARM, Thumb, Jazelle or ThumbEE.
//!
//! [`Pstate::isa`] derives the active [`Isa`] from them; nothing else in the
//! core is allowed to guess the instruction set a different way.

use serde::{Deserialize, Serialize};

use crate::config::Isa;
use crate::cpu::cpu_modes::Mode;

/// AArch32 condition mnemonics: the top nibble of every ARM encoding and
/// the predicate base of Thumb conditional branches and IT blocks.
///
/// The flag logic lives in [`Condition::holds`] so the vocabulary and its
/// one behavior stay together. The [`Display`](std::fmt::Display)
/// rendering is the mnemonic suffix the execution trace's disassembly
/// appends to instruction names (empty for `AL`, which is what assembler
/// listings omit).
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Condition {
    /// Z set (equal).
    EQ = 0x0,
    /// Z clear (not equal).
    NE = 0x1,
    /// C set (unsigned higher or same).
    CS = 0x2,
    /// C clear (unsigned lower).
    CC = 0x3,
    /// N set (negative).
    MI = 0x4,
    /// N clear (positive or zero).
    PL = 0x5,
    /// V set (overflow).
    VS = 0x6,
    /// V clear (no overflow).
    VC = 0x7,
    /// C set and Z clear (unsigned higher).
    HI = 0x8,
    /// C clear or Z set (unsigned lower or same).
    LS = 0x9,
    /// N equals V (greater or equal).
    GE = 0xA,
    /// N not equal to V (less than).
    LT = 0xB,
    /// Z clear and N equals V (greater than).
    GT = 0xC,
    /// Z set or N not equal to V (less than or equal).
    LE = 0xD,
    /// Always executed.
    AL = 0xE,
    /// Never (ARMv1/v2); from ARMv5 the encoding space of unconditional
    /// instructions, which the decoders claim before predication runs.
    NV = 0xF,
}

impl Condition {
    /// Decodes a 4-bit condition field.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0xF {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            _ => Self::NV,
        }
    }

    /// Whether the condition passes against the current flags. `NV` never
    /// passes here.
    #[must_use]
    pub fn holds(self, pstate: &Pstate) -> bool {
        match self {
            Self::EQ => pstate.z,
            Self::NE => !pstate.z,
            Self::CS => pstate.c,
            Self::CC => !pstate.c,
            Self::MI => pstate.n,
            Self::PL => !pstate.n,
            Self::VS => pstate.v,
            Self::VC => !pstate.v,
            Self::HI => pstate.c && !pstate.z,
            Self::LS => !pstate.c || pstate.z,
            Self::GE => pstate.n == pstate.v,
            Self::LT => pstate.n != pstate.v,
            Self::GT => !pstate.z && (pstate.n == pstate.v),
            Self::LE => pstate.z || (pstate.n != pstate.v),
            Self::AL => true,
            Self::NV => false,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if matches!(self, Self::AL) {
            return Ok(());
        }
        write!(f, "{self:?}")
    }
}

/// Register/address width of the execution state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterWidth {
    /// 26-bit addressing, ARMv1..ARMv3 and compatibility configurations.
    #[default]
    Rw26,
    /// AArch32.
    Rw32,
    /// AArch64.
    Rw64,
}

/// AArch32 instruction-set selector, the architectural J:T bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JtState {
    #[default]
    Arm = 0,
    Thumb = 1,
    Jazelle = 2,
    ThumbEe = 3,
}

/// The structured program state.
///
/// Fields are only meaningful for the generations that define them; the
/// CPSR packing in [`psr`](super::psr) masks the rest out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pstate {
    /// Register/address width (v3+ selectable, fixed before).
    pub rw: RegisterWidth,
    /// [AArch32] processor mode (v1: 2 bits, v3+: 4 bits).
    pub mode: Mode,
    /// FIQ disable (privileged) (v1+).
    pub f: bool,
    /// IRQ disable (privileged) (v1+).
    pub i: bool,
    /// [AArch32] instruction set (v4T+, v5TEJ+).
    pub jt: JtState,
    /// [AArch32] sticky overflow / cumulative saturation (v5TE+).
    pub q: bool,
    /// Imprecise data abort disable (privileged) (v6+).
    pub a: bool,
    /// [AArch32] greater-than-or-equal bits (v6+).
    pub ge: u8,
    /// [AArch32] big endian data accesses (v6+).
    pub e: bool,
    /// [AArch32] if-then state bits (Thumb/ThumbEE only) (v6T2+).
    pub it: u8,
    /// [AArch64] use the SP of the current EL instead of SP_EL0 (v8+).
    pub sp: bool,
    /// [AArch64] exception level (v8+).
    pub el: u8,
    /// [AArch64] breakpoint exception disable (v8+).
    pub d: bool,
    /// Illegal execution state (v8+).
    pub il: bool,
    /// Software step (v8+).
    pub ss: bool,
    /// Privileged access never (v8.1+).
    pub pan: bool,
    /// [AArch64] user access override (v8.2+).
    pub uao: bool,
    /// Overflow (v1+).
    pub v: bool,
    /// Carry (v1+).
    pub c: bool,
    /// Zero (v1+).
    pub z: bool,
    /// Negative / less than (v1+).
    pub n: bool,
}

impl Pstate {
    /// The instruction set currently selected by (rw, jt).
    #[must_use]
    pub fn isa(&self) -> Isa {
        match self.rw {
            RegisterWidth::Rw26 => Isa::Arm26,
            RegisterWidth::Rw32 => match self.jt {
                JtState::Arm => Isa::Arm32,
                JtState::Thumb => Isa::Thumb,
                JtState::Jazelle => Isa::Jazelle,
                JtState::ThumbEe => Isa::ThumbEe,
            },
            RegisterWidth::Rw64 => Isa::Arm64,
        }
    }

    /// Evaluates an AArch32 condition code against the flags.
    #[must_use]
    pub fn check_condition(&self, cond: Condition) -> bool {
        cond.holds(self)
    }

    /// A64 condition evaluation: encoding 0xF behaves as "always" rather
    /// than "never".
    #[must_use]
    pub fn check_condition_a64(&self, code: u8) -> bool {
        if code & 0xF == 0xF {
            true
        } else {
            Condition::from_bits(code).holds(self)
        }
    }

    /// Privileged state: AArch32 mode other than User, AArch64 EL above 0.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        match self.rw {
            RegisterWidth::Rw26 | RegisterWidth::Rw32 => self.mode.is_privileged(),
            RegisterWidth::Rw64 => self.el != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn isa_derivation() {
        let mut pstate = Pstate::default();
        assert_eq!(pstate.isa(), Isa::Arm26);

        pstate.rw = RegisterWidth::Rw32;
        assert_eq!(pstate.isa(), Isa::Arm32);
        pstate.jt = JtState::Thumb;
        assert_eq!(pstate.isa(), Isa::Thumb);
        pstate.jt = JtState::Jazelle;
        assert_eq!(pstate.isa(), Isa::Jazelle);
        pstate.jt = JtState::ThumbEe;
        assert_eq!(pstate.isa(), Isa::ThumbEe);

        pstate.rw = RegisterWidth::Rw64;
        assert_eq!(pstate.isa(), Isa::Arm64);
    }

    #[test]
    fn al_always_passes_nv_never_does() {
        let mut pstate = Pstate::default();
        for bits in 0..16u8 {
            pstate.n = bits & 1 != 0;
            pstate.z = bits & 2 != 0;
            pstate.c = bits & 4 != 0;
            pstate.v = bits & 8 != 0;
            assert!(pstate.check_condition(Condition::AL));
            assert!(!pstate.check_condition(Condition::NV));
            assert!(pstate.check_condition_a64(0xF));
        }
    }

    #[test]
    fn signed_comparisons() {
        let mut pstate = Pstate::default();

        // N == V: GE holds, LT does not.
        pstate.n = true;
        pstate.v = true;
        assert!(pstate.check_condition(Condition::GE));
        assert!(!pstate.check_condition(Condition::LT));

        // Z set masks GT even when N == V.
        pstate.z = true;
        assert!(!pstate.check_condition(Condition::GT));
        assert!(pstate.check_condition(Condition::LE));
    }

    #[test]
    fn unsigned_comparisons() {
        let mut pstate = Pstate::default();
        pstate.c = true;
        assert!(pstate.check_condition(Condition::HI));
        pstate.z = true;
        assert!(!pstate.check_condition(Condition::HI));
        assert!(pstate.check_condition(Condition::LS));
    }

    #[test]
    fn condition_fields_decode_and_render() {
        for bits in 0..16u8 {
            assert_eq!(Condition::from_bits(bits) as u8, bits);
        }
        // The trace disassembly appends these as instruction suffixes;
        // AL stays silent the way assembler listings write it.
        assert_eq!(Condition::EQ.to_string(), "EQ");
        assert_eq!(Condition::LT.to_string(), "LT");
        assert_eq!(Condition::AL.to_string(), "");
        assert_eq!(Condition::NV.to_string(), "NV");
    }
}
