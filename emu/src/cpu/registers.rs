//! # The register file
//!
//! All architectural registers live in one flat array of 64-bit slots.
//! Which slot an AArch32 register number refers to depends on the current
//! mode ("register banking"): exception modes get private copies of R13/R14
//! and FIQ additionally banks R8-R12, so handlers can run without saving the
//! interrupted program's pointers.
//!
//! Banking is pure view selection: a 16x16 mode/register lookup table maps
//! to a backing slot, so a write through one mode's view is immediately
//! visible through every other mode that maps the same slot. There are no
//! per-mode shadow copies to swap. ARMv1 had fewer banked FIQ registers
//! (R10-R14 only), which gets its own table variant.
//!
//! The slot layout follows the AArch32/AArch64 correspondence: slots 0-30
//! double as the A64 x0-x30, which places the banked AArch32 registers in
//! the upper half of that range. The program counter is a separate slot,
//! never addressed through the banking table as "register 15" storage.
//!
//! ## Program counter reads
//!
//! The stored PC always points at the *next* instruction (it is advanced at
//! fetch). An AArch32 read of R15 adds another +4 in ARM state or +2 in
//! Thumb state on top, producing the architectural "PC+8"/"PC+4" of the
//! classic three-stage pipeline. Stores of R15 add a further
//! implementation-defined displacement on pre-v7 cores.

use serde::{Deserialize, Serialize};

use crate::config::ArmVersion;
use crate::cpu::core::ArmCore;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::pstate::{JtState, RegisterWidth};

/// Slot indices into the flat register file.
///
/// Indices 0-30 match the A64 general registers; the AArch32 banked
/// registers occupy 15-30 per the architectural mapping.
pub mod slot {
    pub const R13_HYP: usize = 15;
    pub const R14_IRQ: usize = 16;
    pub const R13_IRQ: usize = 17;
    pub const R14_SVC: usize = 18;
    pub const R13_SVC: usize = 19;
    pub const R14_ABT: usize = 20;
    pub const R13_ABT: usize = 21;
    pub const R14_UND: usize = 22;
    pub const R13_UND: usize = 23;
    pub const R8_FIQ: usize = 24;
    pub const R9_FIQ: usize = 25;
    pub const R10_FIQ: usize = 26;
    pub const R11_FIQ: usize = 27;
    pub const R12_FIQ: usize = 28;
    pub const R13_FIQ: usize = 29;
    pub const R14_FIQ: usize = 30;

    pub const A64_LR: usize = 30;

    // These come sequentially so SP_EL0 + el addresses the banked SP.
    pub const SP_EL0: usize = 31;
    pub const SP_EL1: usize = 32;
    pub const SP_EL2: usize = 33;
    pub const SP_EL3: usize = 34;

    pub const PC: usize = 35;
    pub const R14_MON: usize = 36;
    pub const R13_MON: usize = 37;

    // These come sequentially so ELR_EL1 + (el - 1) addresses the ELR.
    pub const ELR_EL1: usize = 38;
    pub const ELR_EL2: usize = 39;
    pub const ELR_EL3: usize = 40;

    pub const SPSR_EL1: usize = 41;
    pub const SPSR_EL2: usize = 42;
    pub const SPSR_EL3: usize = 43;
    pub const SPSR_ABT: usize = 44;
    pub const SPSR_UND: usize = 45;
    pub const SPSR_IRQ: usize = 46;
    pub const SPSR_FIQ: usize = 47;

    pub const COUNT: usize = 48;

    // Synonyms between the AArch32 and AArch64 names.
    pub const ELR_HYP: usize = ELR_EL2;
    pub const SPSR_SVC: usize = SPSR_EL1;
    pub const SPSR_HYP: usize = SPSR_EL2;
    pub const SPSR_MON: usize = SPSR_EL3;
}

/// Architectural register numbers used throughout the decoders.
pub const A32_SP: u32 = 13;
pub const A32_LR: u32 = 14;
pub const A32_PC: u32 = 15;
pub const A64_SP: u32 = 31;

const USR_ROW: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, slot::PC];
const FIQ_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    slot::R8_FIQ,
    slot::R9_FIQ,
    slot::R10_FIQ,
    slot::R11_FIQ,
    slot::R12_FIQ,
    slot::R13_FIQ,
    slot::R14_FIQ,
    slot::PC,
];
const IRQ_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_IRQ,
    slot::R14_IRQ,
    slot::PC,
];
const SVC_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_SVC,
    slot::R14_SVC,
    slot::PC,
];
const MON_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_MON,
    slot::R14_MON,
    slot::PC,
];
const ABT_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_ABT,
    slot::R14_ABT,
    slot::PC,
];
// Hyp banks only its stack pointer; the link register is ELR_HYP, which is
// not a general register.
const HYP_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_HYP,
    14,
    slot::PC,
];
const UND_ROW: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    11,
    12,
    slot::R13_UND,
    slot::R14_UND,
    slot::PC,
];

/// Mode (4 bits) x register (4 bits) to backing slot, ARMv2 and later.
/// Reserved mode encodings fall back to the user view; they cannot be
/// entered because [`Mode`] rejects them.
const A32_REGISTER_FOR_MODE: [[usize; 16]; 16] = [
    USR_ROW, FIQ_ROW, IRQ_ROW, SVC_ROW, USR_ROW, USR_ROW, MON_ROW, ABT_ROW, USR_ROW, USR_ROW,
    HYP_ROW, UND_ROW, USR_ROW, USR_ROW, USR_ROW, USR_ROW,
];

// ARMv1 banked two fewer FIQ registers: R8 and R9 are shared with User.
const FIQ_ROW_V1: [usize; 16] = [
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    slot::R10_FIQ,
    slot::R11_FIQ,
    slot::R12_FIQ,
    slot::R13_FIQ,
    slot::R14_FIQ,
    slot::PC,
];

const A32_REGISTER_FOR_MODE_V1: [[usize; 16]; 4] = [USR_ROW, FIQ_ROW_V1, IRQ_ROW, SVC_ROW];

/// SPSR slot per mode; User and System have none.
const A32_SPSR_FOR_MODE: [Option<usize>; 16] = [
    None,
    Some(slot::SPSR_FIQ),
    Some(slot::SPSR_IRQ),
    Some(slot::SPSR_SVC),
    None,
    None,
    Some(slot::SPSR_MON),
    Some(slot::SPSR_ABT),
    None,
    None,
    Some(slot::SPSR_HYP),
    Some(slot::SPSR_UND),
    None,
    None,
    None,
    None,
];

#[must_use]
pub(crate) fn a32_slot(version: ArmVersion, mode: Mode, regnum: u32) -> usize {
    let regnum = (regnum & 0xF) as usize;
    if version == ArmVersion::V1 {
        A32_REGISTER_FOR_MODE_V1[mode as usize & 3][regnum]
    } else {
        A32_REGISTER_FOR_MODE[mode as usize][regnum]
    }
}

#[must_use]
pub(crate) fn a32_spsr_slot(mode: Mode) -> Option<usize> {
    A32_SPSR_FOR_MODE[mode as usize]
}

/// The flat storage behind every architectural register.
#[derive(Clone)]
pub struct RegisterFile {
    slots: [u64; slot::COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            slots: [0; slot::COUNT],
        }
    }
}

// The slot count is beyond the array sizes serde derives for, so the file
// serializes as a sequence.
impl Serialize for RegisterFile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.slots.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RegisterFile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<u64>::deserialize(deserializer)?;
        let slots: [u64; slot::COUNT] = values
            .try_into()
            .map_err(|_| serde::de::Error::custom("register file must hold every slot"))?;
        Ok(Self { slots })
    }
}

impl RegisterFile {
    #[must_use]
    pub fn get(&self, slot: usize) -> u64 {
        self.slots[slot]
    }

    pub fn set(&mut self, slot: usize, value: u64) {
        self.slots[slot] = value;
    }

    #[must_use]
    pub fn snapshot(&self) -> [u64; slot::COUNT] {
        self.slots
    }
}

impl ArmCore {
    #[must_use]
    pub(crate) fn a32_slot_for(&self, regnum: u32, mode: Mode) -> usize {
        a32_slot(self.config.version, mode, regnum)
    }

    /// Reads an AArch32 register through an arbitrary mode's view.
    #[must_use]
    pub fn a32_get_mode(&self, regnum: u32, mode: Mode) -> u32 {
        self.regs.get(self.a32_slot_for(regnum, mode)) as u32
    }

    /// Writes an AArch32 register through an arbitrary mode's view.
    pub fn a32_set_mode(&mut self, regnum: u32, mode: Mode, value: u32) {
        let slot = self.a32_slot_for(regnum, mode);
        self.regs.set(slot, u64::from(value));
    }

    /// Reads an AArch32 register in the current mode. R15 reads one
    /// instruction ahead of the stored PC (+4 in ARM, +2 in Thumb state).
    #[must_use]
    pub fn a32_get(&self, regnum: u32) -> u32 {
        let regnum = regnum & 0xF;
        let mut value = self.a32_get_mode(regnum, self.pstate.mode);
        if regnum == A32_PC {
            match self.pstate.jt {
                JtState::Arm => value = value.wrapping_add(4),
                JtState::Thumb | JtState::ThumbEe => value = value.wrapping_add(2),
                JtState::Jazelle => {}
            }
        }
        value
    }

    /// Reads a register as the first operand of a data-processing
    /// instruction: in 26-bit state R15 reads as the PC merged with the
    /// flag and interrupt bits.
    #[must_use]
    pub(crate) fn a32_get_lhs(&self, regnum: u32) -> u32 {
        let regnum = regnum & 0xF;
        if self.pstate.rw == RegisterWidth::Rw26 && regnum == A32_PC {
            self.a26_get_pc().wrapping_add(4)
        } else {
            self.a32_get(regnum)
        }
    }

    /// Reads a register for STR/STM: R15 gets the additional
    /// implementation-defined displacement of pre-v7 cores.
    #[must_use]
    pub(crate) fn a32_get_str(&self, regnum: u32) -> u32 {
        let regnum = regnum & 0xF;
        let value = self.a32_get(regnum);
        if regnum == A32_PC {
            value.wrapping_add(self.stored_pc_displacement())
        } else {
            value
        }
    }

    /// The extra displacement of a stored R15 beyond the pipeline offset.
    /// Implementation defined before v7; every part this core models used 4.
    #[must_use]
    pub(crate) fn stored_pc_displacement(&self) -> u32 {
        if self.config.version >= ArmVersion::V7 {
            0
        } else {
            4
        }
    }

    /// R15 as an MCR source operand reads a further +4 before v5.
    #[must_use]
    pub(crate) fn mcr_pc_offset(&self) -> u32 {
        if self.config.version >= ArmVersion::V5 {
            0
        } else {
            4
        }
    }

    /// Writes an AArch32 register in the current mode. Writes to R15 apply
    /// the width mask: 26-bit addresses in ARM26 state, word/half-word
    /// alignment per instruction set otherwise.
    pub fn a32_set(&mut self, regnum: u32, value: u32) {
        let regnum = regnum & 0xF;
        if regnum == A32_PC {
            if self.pstate.rw == RegisterWidth::Rw26 {
                self.regs.set(slot::PC, u64::from(value & 0x03FF_FFFC));
            } else {
                self.a32_set_pc(value);
            }
        } else {
            self.a32_set_mode(regnum, self.pstate.mode, value);
        }
    }

    /// Sets the AArch32 program counter, applying the alignment mask of the
    /// current instruction set.
    pub(crate) fn a32_set_pc(&mut self, value: u32) {
        let masked = match self.pstate.jt {
            JtState::Arm => value & 0xFFFF_FFFC,
            JtState::Thumb | JtState::ThumbEe => value & 0xFFFF_FFFE,
            JtState::Jazelle => value,
        };
        self.regs.set(slot::PC, u64::from(masked));
    }

    /// Sets PC and lets bit 0 select ARM/Thumb state. Jazelle and ThumbEE
    /// stay in their current set, and a state the part cannot enter is
    /// remapped to the nearest supported one.
    pub(crate) fn a32_set_pc_interworking(&mut self, value: u32) {
        match self.pstate.jt {
            JtState::Arm | JtState::Thumb => {
                let selected = if value & 1 != 0 {
                    JtState::Thumb
                } else {
                    JtState::Arm
                };
                self.pstate.jt = self.filter_jt(selected);
            }
            JtState::Jazelle | JtState::ThumbEe => {}
        }
        self.a32_set_pc(value);
    }

    /// Register write where an R15 target may switch ARM/Thumb state.
    pub(crate) fn a32_set_interworking(&mut self, regnum: u32, value: u32) {
        let regnum = regnum & 0xF;
        if regnum == A32_PC {
            if self.pstate.rw == RegisterWidth::Rw26 {
                self.regs.set(slot::PC, u64::from(value & 0x03FF_FFFC));
            } else {
                self.a32_set_pc_interworking(value);
            }
        } else {
            self.a32_set_mode(regnum, self.pstate.mode, value);
        }
    }

    /// LDR/LDM-class writes interwork from v5 on.
    pub(crate) fn a32_set_interworking_v5(&mut self, regnum: u32, value: u32) {
        if self.config.version < ArmVersion::V5 {
            self.a32_set(regnum, value);
        } else {
            self.a32_set_interworking(regnum, value);
        }
    }

    /// ALU-result writes interwork from v7 on (when the CPSR is untouched).
    pub(crate) fn a32_set_interworking_v7(&mut self, regnum: u32, value: u32) {
        if self.config.version < ArmVersion::V7 {
            self.a32_set(regnum, value);
        } else {
            self.a32_set_interworking(regnum, value);
        }
    }

    /// Reads an A64 register. Register 31 is the zero register when the
    /// instruction suppresses SP, otherwise the stack pointer selected by
    /// PSTATE (sp, el).
    #[must_use]
    pub fn a64_get64(&self, regnum: u32, suppress_sp: bool) -> u64 {
        let regnum = (regnum & 0x1F) as usize;
        if regnum != A64_SP as usize {
            self.regs.get(regnum)
        } else if suppress_sp {
            0
        } else if !self.pstate.sp {
            self.regs.get(slot::SP_EL0)
        } else {
            self.regs.get(slot::SP_EL0 + self.pstate.el as usize)
        }
    }

    pub fn a64_set64(&mut self, regnum: u32, suppress_sp: bool, value: u64) {
        let regnum = (regnum & 0x1F) as usize;
        if regnum != A64_SP as usize {
            self.regs.set(regnum, value);
        } else if suppress_sp {
        } else if !self.pstate.sp {
            self.regs.set(slot::SP_EL0, value);
        } else {
            self.regs.set(slot::SP_EL0 + self.pstate.el as usize, value);
        }
    }

    /// W-register read: the low half of the X register.
    #[must_use]
    pub fn a64_get32(&self, regnum: u32, suppress_sp: bool) -> u32 {
        self.a64_get64(regnum, suppress_sp) as u32
    }

    /// W-register write: zero-extends into the X register.
    pub fn a64_set32(&mut self, regnum: u32, suppress_sp: bool, value: u32) {
        self.a64_set64(regnum, suppress_sp, u64::from(value));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Isa;
    use crate::cpu::testing::core;

    #[test]
    fn low_registers_are_never_banked() {
        for mode in [
            Mode::User,
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Monitor,
            Mode::Abort,
            Mode::Hypervisor,
            Mode::Undefined,
            Mode::System,
        ] {
            for regnum in 0..8 {
                assert_eq!(a32_slot(ArmVersion::V7, mode, regnum), regnum as usize);
            }
        }
    }

    #[test]
    fn sp_is_banked_per_mode() {
        assert_eq!(a32_slot(ArmVersion::V7, Mode::Supervisor, 13), slot::R13_SVC);
        assert_eq!(a32_slot(ArmVersion::V7, Mode::Fiq, 13), slot::R13_FIQ);
        assert_eq!(a32_slot(ArmVersion::V7, Mode::Irq, 13), slot::R13_IRQ);
        assert_eq!(a32_slot(ArmVersion::V7, Mode::User, 13), 13);
        // System shares the User view.
        assert_eq!(a32_slot(ArmVersion::V7, Mode::System, 13), 13);
        // Hyp banks SP but not LR.
        assert_eq!(a32_slot(ArmVersion::V7, Mode::Hypervisor, 13), slot::R13_HYP);
        assert_eq!(a32_slot(ArmVersion::V7, Mode::Hypervisor, 14), 14);
    }

    #[test]
    fn armv1_shares_r8_r9_with_fiq() {
        assert_eq!(a32_slot(ArmVersion::V1, Mode::Fiq, 8), 8);
        assert_eq!(a32_slot(ArmVersion::V1, Mode::Fiq, 9), 9);
        assert_eq!(a32_slot(ArmVersion::V1, Mode::Fiq, 10), slot::R10_FIQ);
        assert_eq!(a32_slot(ArmVersion::V2, Mode::Fiq, 8), slot::R8_FIQ);
    }

    #[test]
    fn mode_banking_keeps_values_apart() {
        // Enter SVC, set R13, switch to FIQ, set R13, switch back: the SVC
        // value survives, and User sees yet another slot.
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);

        cpu.pstate.mode = Mode::Supervisor;
        cpu.a32_set(13, 0x1000);
        cpu.pstate.mode = Mode::Fiq;
        cpu.a32_set(13, 0x2000);
        cpu.pstate.mode = Mode::Supervisor;
        assert_eq!(cpu.a32_get(13), 0x1000);

        cpu.pstate.mode = Mode::User;
        assert_eq!(cpu.a32_get(13), 0);
        cpu.a32_set(13, 0x3000);

        cpu.pstate.mode = Mode::Fiq;
        assert_eq!(cpu.a32_get(13), 0x2000);
        cpu.pstate.mode = Mode::User;
        assert_eq!(cpu.a32_get(13), 0x3000);
    }

    #[test]
    fn banked_write_is_visible_through_aliasing_modes() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.pstate.mode = Mode::System;
        cpu.a32_set(14, 0xABCD);
        // System and User share every slot.
        assert_eq!(cpu.a32_get_mode(14, Mode::User), 0xABCD);
        // IRQ does not alias R14.
        assert_eq!(cpu.a32_get_mode(14, Mode::Irq), 0);
    }

    #[test]
    fn pc_reads_ahead() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.regs.set(slot::PC, 0x100);

        cpu.pstate.jt = JtState::Arm;
        assert_eq!(cpu.a32_get(15), 0x104);
        cpu.pstate.jt = JtState::Thumb;
        assert_eq!(cpu.a32_get(15), 0x102);
    }

    #[test]
    fn pc_writes_are_masked() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);

        cpu.pstate.jt = JtState::Arm;
        cpu.a32_set(15, 0x1003);
        assert_eq!(cpu.regs.get(slot::PC), 0x1000);

        cpu.pstate.jt = JtState::Thumb;
        cpu.a32_set(15, 0x1003);
        assert_eq!(cpu.regs.get(slot::PC), 0x1002);
    }

    #[test]
    fn interworking_write_switches_state() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);

        cpu.pstate.jt = JtState::Arm;
        cpu.a32_set_interworking(15, 0x2001);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
        assert_eq!(cpu.regs.get(slot::PC), 0x2000);

        cpu.a32_set_interworking(15, 0x3000);
        assert_eq!(cpu.pstate.jt, JtState::Arm);
        assert_eq!(cpu.regs.get(slot::PC), 0x3000);
    }

    #[test]
    fn interworking_gates_by_version() {
        let mut cpu = core(ArmVersion::V4, &[Isa::Arm32, Isa::Thumb]);
        cpu.pstate.jt = JtState::Arm;
        cpu.a32_set_interworking_v5(15, 0x2001);
        // v4 loads to PC do not switch state.
        assert_eq!(cpu.pstate.jt, JtState::Arm);

        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Thumb]);
        cpu.pstate.jt = JtState::Arm;
        cpu.a32_set_interworking_v5(15, 0x2001);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);

        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Thumb]);
        cpu.pstate.jt = JtState::Arm;
        cpu.a32_set_interworking_v7(15, 0x2001);
        // ALU results only interwork from v7.
        assert_eq!(cpu.pstate.jt, JtState::Arm);
    }

    #[test]
    fn a64_register_31_is_sp_or_zero() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);

        cpu.a64_set64(31, false, 0x8000);
        assert_eq!(cpu.a64_get64(31, false), 0x8000);
        assert_eq!(cpu.a64_get64(31, true), 0);

        // Suppressed writes go nowhere.
        cpu.a64_set64(31, true, 0xDEAD);
        assert_eq!(cpu.regs.get(slot::SP_EL0), 0x8000);

        // With PSTATE.sp set, the banked SP of the current EL is used.
        cpu.pstate.sp = true;
        cpu.pstate.el = 1;
        cpu.a64_set64(31, false, 0x9000);
        assert_eq!(cpu.regs.get(slot::SP_EL1), 0x9000);
        assert_eq!(cpu.regs.get(slot::SP_EL0), 0x8000);
    }

    #[test]
    fn a64_w_write_zero_extends() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.regs.set(3, 0xFFFF_FFFF_FFFF_FFFF);
        cpu.a64_set32(3, true, 0x1234);
        assert_eq!(cpu.a64_get64(3, true), 0x1234);
    }
}
