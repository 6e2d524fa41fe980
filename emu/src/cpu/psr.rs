//! # CPSR/SPSR packing
//!
//! The emulated state keeps PSTATE unpacked ([`Pstate`](super::pstate)); the
//! 32-bit CPSR/SPSR images software reads and writes are assembled here on
//! demand. Packing is gated by the configured features: a field the part
//! does not implement reads as zero and ignores writes, and the mode/state
//! selector bits of unsupported instruction sets read as one so that
//! software always observes a legal state value.

use crate::bitwise::Bits;
use crate::config::{ArmFeature, ArmVersion, Isa};
use crate::cpu::core::ArmCore;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::pstate::{JtState, RegisterWidth};
use crate::cpu::registers::{a32_spsr_slot, slot};

pub const CPSR_M_MASK: u32 = 0x0000_001F;
pub const CPSR_MODE_MASK: u32 = 0x0000_000F;
/// 26-bit parts only implement the low two mode bits.
pub const CPSR_A26_MODE_MASK: u32 = 0x0000_0003;
/// Register width selector: clear in 26-bit state.
pub const CPSR_M4: u32 = 0x0000_0010;
pub const CPSR_T: u32 = 0x0000_0020;
pub const CPSR_T_SHIFT: u32 = 5;
pub const CPSR_F: u32 = 0x0000_0040;
pub const CPSR_I: u32 = 0x0000_0080;
pub const CPSR_A: u32 = 0x0000_0100;
/// [AArch32] big-endian data (v6+); the same bit is the AArch64 D flag.
pub const CPSR_E: u32 = 0x0000_0200;
pub const CPSR_D: u32 = 0x0000_0200;
/// If-then state, split across bits 26:25 and 15:10.
pub const CPSR_IT_MASK: u32 = 0x0600_FC00;
pub const CPSR_IT0_MASK: u32 = 0x0600_0000;
pub const CPSR_IT0_SHIFT: u32 = 25;
pub const CPSR_IT1_MASK: u32 = 0x0000_FC00;
pub const CPSR_IT1_SHIFT: u32 = 10 - 2;
pub const CPSR_GE_MASK: u32 = 0x000F_0000;
pub const CPSR_GE_SHIFT: u32 = 16;
pub const CPSR_IL: u32 = 0x0010_0000;
pub const CPSR_SS: u32 = 0x0020_0000;
pub const CPSR_PAN: u32 = 0x0040_0000;
pub const CPSR_UAO: u32 = 0x0080_0000;
pub const CPSR_J: u32 = 0x0100_0000;
pub const CPSR_J_SHIFT: u32 = 24 - 1;
pub const CPSR_Q: u32 = 0x0800_0000;
pub const CPSR_V: u32 = 0x1000_0000;
pub const CPSR_C: u32 = 0x2000_0000;
pub const CPSR_Z: u32 = 0x4000_0000;
pub const CPSR_N: u32 = 0x8000_0000;

/// [AArch64] SPSel and exception level.
pub const CPSR_SP: u32 = 0x0000_0001;
pub const CPSR_EL_MASK: u32 = 0x0000_000C;
pub const CPSR_EL_SHIFT: u32 = 2;

/// 26-bit state packs the interrupt disables into the PC word.
pub const CPSR_A26_F: u32 = 0x0400_0000;
pub const CPSR_A26_I: u32 = 0x0800_0000;

/// The CPSR bits each instruction set needs set (beyond the defaults).
const fn isa_cpsr_settings(isa: Isa) -> u32 {
    match isa {
        Isa::Arm26 | Isa::Arm64 => 0,
        Isa::Arm32 => CPSR_M4,
        Isa::Thumb => CPSR_M4 | CPSR_T,
        Isa::Jazelle => CPSR_M4 | CPSR_J,
        Isa::ThumbEe => CPSR_M4 | CPSR_T | CPSR_J,
    }
}

/// Builds the byte-granular mask an MSR field specifier selects.
#[must_use]
pub(crate) fn psr_field_mask(bits24: bool, bits16: bool, bits8: bool, bits0: bool) -> u32 {
    let mut mask = 0;
    if bits24 {
        mask |= 0xFF00_0000;
    }
    if bits16 {
        mask |= 0x00FF_0000;
    }
    if bits8 {
        mask |= 0x0000_FF00;
    }
    if bits0 {
        mask |= 0x0000_00FF;
    }
    mask
}

fn jt_from_bits(bits: u32) -> JtState {
    match bits & 3 {
        0 => JtState::Arm,
        1 => JtState::Thumb,
        2 => JtState::Jazelle,
        _ => JtState::ThumbEe,
    }
}

impl ArmCore {
    /// The xPSR bits this configuration implements.
    #[must_use]
    pub(crate) fn xpsr_mask(&self) -> u32 {
        let version = self.config.version;
        let mut mask = CPSR_N | CPSR_Z | CPSR_C | CPSR_V | CPSR_I | CPSR_F | CPSR_A26_MODE_MASK;
        if version >= ArmVersion::V3 {
            mask |= CPSR_MODE_MASK;
        }
        if version >= ArmVersion::V6 {
            mask |= CPSR_GE_MASK | CPSR_E | CPSR_A;
        }
        if version >= ArmVersion::V8 {
            mask |= CPSR_SS | CPSR_IL;
        }
        if version >= ArmVersion::V81 {
            mask |= CPSR_PAN;
        }
        if version >= ArmVersion::V82 {
            mask |= CPSR_UAO;
        }

        if self.config.features.has(ArmFeature::Thumb2) {
            mask |= CPSR_IT_MASK;
        }
        if self.config.features.has(ArmFeature::EnhDsp) {
            mask |= CPSR_Q;
        }

        for isa in Isa::ALL {
            if self.supported_isas.contains(isa) {
                mask |= isa_cpsr_settings(isa);
            }
        }
        mask
    }

    /// Mode/state selector bits that must read as one because no supported
    /// instruction set clears them.
    #[must_use]
    pub(crate) fn xpsr_always_set(&self) -> u32 {
        let mut value = CPSR_M4 | CPSR_T | CPSR_J;
        for isa in Isa::ALL {
            if self.supported_isas.contains(isa) {
                value &= !isa_cpsr_settings(isa);
            }
        }
        value
    }

    /// Remaps an attempted switch to an unsupported instruction set to the
    /// nearest supported one; software errors stay in a legal state.
    pub(crate) fn filter_jt(&self, jt: JtState) -> JtState {
        let features = self.config.features;
        match jt {
            JtState::Arm
                if !features.has(ArmFeature::Arm26) && !features.has(ArmFeature::Arm32) =>
            {
                JtState::Thumb
            }
            JtState::Thumb if !features.has(ArmFeature::Thumb) => JtState::Arm,
            JtState::Jazelle if !features.has(ArmFeature::Jazelle) => JtState::Arm,
            JtState::ThumbEe if self.config.version != ArmVersion::V7 => JtState::Thumb,
            other => other,
        }
    }

    /// Assembles the AArch32 CPSR from PSTATE.
    #[must_use]
    pub fn a32_get_cpsr(&self) -> u32 {
        let pstate = &self.pstate;
        let features = self.config.features;
        let mut cpsr = pstate.mode as u32;
        if pstate.rw == RegisterWidth::Rw32 {
            cpsr |= CPSR_M4;
        }
        if pstate.f {
            cpsr |= CPSR_F;
        }
        if pstate.i {
            cpsr |= CPSR_I;
        }
        if pstate.v {
            cpsr |= CPSR_V;
        }
        if pstate.c {
            cpsr |= CPSR_C;
        }
        if pstate.z {
            cpsr |= CPSR_Z;
        }
        if pstate.n {
            cpsr |= CPSR_N;
        }
        if features.has(ArmFeature::Thumb) && (pstate.jt as u32) & 1 != 0 {
            cpsr |= CPSR_T;
        }
        if (features.has(ArmFeature::Jazelle) || self.config.version == ArmVersion::V7)
            && (pstate.jt as u32) & 2 != 0
        {
            cpsr |= CPSR_J;
        }
        if features.has(ArmFeature::EnhDsp) && pstate.q {
            cpsr |= CPSR_Q;
        }
        if self.config.version >= ArmVersion::V6 {
            if pstate.a {
                cpsr |= CPSR_A;
            }
            if pstate.e {
                cpsr |= CPSR_E;
            }
            cpsr |= u32::from(pstate.ge) << CPSR_GE_SHIFT;
        }
        if features.has(ArmFeature::Thumb2) {
            let it = u32::from(pstate.it);
            cpsr |= ((it << CPSR_IT0_SHIFT) & CPSR_IT0_MASK) | ((it << CPSR_IT1_SHIFT) & CPSR_IT1_MASK);
        }
        if self.config.version >= ArmVersion::V81 && pstate.pan {
            cpsr |= CPSR_PAN;
        }
        cpsr
    }

    /// Applies a masked CPSR write. Fields outside the mask, and fields the
    /// configured version does not own, are left untouched. Flipping the M4
    /// width bit is only honoured on a processor that can actually change
    /// between the 26- and 32-bit schemes.
    pub fn a32_set_cpsr(&mut self, mask: u32, cpsr: u32) {
        let features = self.config.features;

        if mask & CPSR_M4 != 0
            && features.has(ArmFeature::Arm26)
            && features.has(ArmFeature::Arm32)
            && !self.is_prog26()
        {
            self.pstate.rw = if cpsr & CPSR_M4 != 0 {
                RegisterWidth::Rw32
            } else {
                RegisterWidth::Rw26
            };
        }

        if mask & CPSR_MODE_MASK != 0 {
            let mut bits = cpsr & CPSR_MODE_MASK;
            if self.pstate.rw == RegisterWidth::Rw26 {
                bits &= CPSR_A26_MODE_MASK;
            }
            match Mode::try_from(bits) {
                Ok(mode) => self.pstate.mode = mode,
                Err(bits) => {
                    tracing::debug!(
                        "ignoring write of reserved mode bits 0b{bits:04b} to CPSR"
                    );
                }
            }
        } else if self.pstate.rw == RegisterWidth::Rw26 {
            let bits = (self.pstate.mode as u32) & CPSR_A26_MODE_MASK;
            self.pstate.mode = Mode::try_from(bits).unwrap_or(Mode::User);
        }

        if mask & CPSR_F != 0 {
            self.pstate.f = cpsr & CPSR_F != 0;
        }
        if mask & CPSR_I != 0 {
            self.pstate.i = cpsr & CPSR_I != 0;
        }
        if mask & CPSR_N != 0 {
            self.pstate.n = cpsr & CPSR_N != 0;
        }
        if mask & CPSR_C != 0 {
            self.pstate.c = cpsr & CPSR_C != 0;
        }
        if mask & CPSR_Z != 0 {
            self.pstate.z = cpsr & CPSR_Z != 0;
        }
        if mask & CPSR_V != 0 {
            self.pstate.v = cpsr & CPSR_V != 0;
        }

        if mask & (CPSR_T | CPSR_J) != 0 {
            let mut jt = self.pstate.jt as u32;
            if mask & CPSR_T != 0 {
                jt = (jt & 2) | u32::from(cpsr & CPSR_T != 0);
            }
            if mask & CPSR_J != 0 {
                jt = (jt & 1) | (u32::from(cpsr & CPSR_J != 0) << 1);
            }
            self.pstate.jt = self.filter_jt(jt_from_bits(jt));
        }

        if mask & CPSR_Q != 0 && features.has(ArmFeature::EnhDsp) {
            self.pstate.q = cpsr & CPSR_Q != 0;
        }
        if self.config.version >= ArmVersion::V6 {
            if mask & CPSR_A != 0 {
                self.pstate.a = cpsr & CPSR_A != 0;
            }
            if mask & CPSR_E != 0 {
                self.pstate.e = cpsr & CPSR_E != 0;
            }
            if mask & CPSR_GE_MASK != 0 {
                let kept = u32::from(self.pstate.ge) & ((!mask & CPSR_GE_MASK) >> CPSR_GE_SHIFT);
                let written = (cpsr & mask & CPSR_GE_MASK) >> CPSR_GE_SHIFT;
                self.pstate.ge = (kept | written) as u8;
            }
        }
        if mask & CPSR_IT_MASK != 0 && features.has(ArmFeature::Thumb2) {
            let kept_mask = ((!mask & CPSR_IT0_MASK) >> CPSR_IT0_SHIFT)
                | ((!mask & CPSR_IT1_MASK) >> CPSR_IT1_SHIFT);
            let written = ((cpsr & mask & CPSR_IT0_MASK) >> CPSR_IT0_SHIFT)
                | ((cpsr & mask & CPSR_IT1_MASK) >> CPSR_IT1_SHIFT);
            self.pstate.it = ((u32::from(self.pstate.it) & kept_mask) | written) as u8;
        }
        if mask & CPSR_PAN != 0 && self.config.version >= ArmVersion::V81 {
            self.pstate.pan = cpsr & CPSR_PAN != 0;
        }
        if mask & CPSR_UAO != 0 && self.config.version >= ArmVersion::V82 {
            self.pstate.uao = cpsr & CPSR_UAO != 0;
        }
    }

    /// Assembles the AArch64 SPSR image of the current state, used on
    /// exception entry (the taken-from state may be AArch32).
    #[must_use]
    pub(crate) fn a64_get_cpsr(&self) -> u32 {
        let pstate = &self.pstate;
        let mut cpsr = u32::from(pstate.sp)
            | (u32::from(pstate.el) << CPSR_EL_SHIFT)
            | if pstate.rw == RegisterWidth::Rw32 {
                CPSR_M4
            } else {
                0
            };
        if pstate.rw == RegisterWidth::Rw32 {
            cpsr |= ((pstate.jt as u32 & 1) << CPSR_T_SHIFT) | ((pstate.jt as u32 & 2) << CPSR_J_SHIFT);
            cpsr |= u32::from(pstate.ge) << CPSR_GE_SHIFT;
            let it = u32::from(pstate.it);
            cpsr |= ((it << CPSR_IT0_SHIFT) & CPSR_IT0_MASK) | ((it << CPSR_IT1_SHIFT) & CPSR_IT1_MASK);
            if pstate.e {
                cpsr |= CPSR_E;
            }
            if pstate.q {
                cpsr |= CPSR_Q;
            }
        } else if pstate.d {
            cpsr |= CPSR_D;
        }
        if pstate.f {
            cpsr |= CPSR_F;
        }
        if pstate.i {
            cpsr |= CPSR_I;
        }
        if pstate.a {
            cpsr |= CPSR_A;
        }
        if pstate.il {
            cpsr |= CPSR_IL;
        }
        if pstate.ss {
            cpsr |= CPSR_SS;
        }
        if pstate.v {
            cpsr |= CPSR_V;
        }
        if pstate.c {
            cpsr |= CPSR_C;
        }
        if pstate.z {
            cpsr |= CPSR_Z;
        }
        if pstate.n {
            cpsr |= CPSR_N;
        }
        if self.config.version >= ArmVersion::V81 && pstate.pan {
            cpsr |= CPSR_PAN;
        }
        if self.config.version >= ArmVersion::V82 && pstate.uao {
            cpsr |= CPSR_UAO;
        }
        cpsr
    }

    /// Restores PSTATE from an AArch64 SPSR image (exception return). The
    /// M4 bit selects whether the saved state was AArch32.
    pub(crate) fn a64_set_cpsr(&mut self, cpsr: u32) {
        if cpsr & CPSR_M4 != 0 {
            self.pstate.rw = RegisterWidth::Rw32;
            match Mode::try_from(cpsr & CPSR_MODE_MASK) {
                Ok(mode) => self.pstate.mode = mode,
                Err(bits) => {
                    tracing::debug!("SPSR restores reserved mode bits 0b{bits:04b}, keeping mode");
                }
            }
            self.pstate.jt = jt_from_bits(
                ((cpsr & CPSR_T) >> CPSR_T_SHIFT) | ((cpsr & CPSR_J) >> CPSR_J_SHIFT),
            );
            self.pstate.e = cpsr & CPSR_E != 0;
            self.pstate.ge = ((cpsr & CPSR_GE_MASK) >> CPSR_GE_SHIFT) as u8;
            self.pstate.it = (((cpsr & CPSR_IT0_MASK) >> CPSR_IT0_SHIFT)
                | ((cpsr & CPSR_IT1_MASK) >> CPSR_IT1_SHIFT)) as u8;
            self.pstate.q = cpsr & CPSR_Q != 0;
        } else {
            self.pstate.rw = RegisterWidth::Rw64;
            self.pstate.el = ((cpsr & CPSR_EL_MASK) >> CPSR_EL_SHIFT) as u8;
            self.pstate.sp = cpsr & CPSR_SP != 0;
            self.pstate.d = cpsr & CPSR_D != 0;
        }

        self.pstate.f = cpsr & CPSR_F != 0;
        self.pstate.i = cpsr & CPSR_I != 0;
        self.pstate.a = cpsr & CPSR_A != 0;
        self.pstate.il = cpsr & CPSR_IL != 0;
        self.pstate.ss = cpsr & CPSR_SS != 0;
        if self.config.version >= ArmVersion::V81 {
            self.pstate.pan = cpsr & CPSR_PAN != 0;
        }
    }

    /// The SPSR of the current mode; modes without one read as zero.
    #[must_use]
    pub(crate) fn a32_get_spsr(&self) -> u32 {
        match a32_spsr_slot(self.pstate.mode) {
            Some(spsr) => self.regs.get(spsr) as u32,
            None => 0,
        }
    }

    /// Masked write to the current mode's SPSR; silently ignored for modes
    /// without one (User/System), which is the v3 unpredictable case.
    pub(crate) fn a32_set_spsr(&mut self, mask: u32, value: u32) {
        let Some(spsr) = a32_spsr_slot(self.pstate.mode) else {
            return;
        };
        let mask = mask & self.xpsr_mask();
        let value = value | self.xpsr_always_set();
        let old = self.regs.get(spsr) as u32;
        self.regs
            .set(spsr, u64::from((old & !mask) | (value & mask)));
    }

    #[must_use]
    pub(crate) fn a32_spsr_valid(&self) -> bool {
        a32_spsr_slot(self.pstate.mode).is_some()
    }

    /// The 26-bit combined PC: address bits 25:2 merged with the flags and
    /// the interrupt disables.
    #[must_use]
    pub(crate) fn a26_get_pc(&self) -> u32 {
        let pstate = &self.pstate;
        (self.regs.get(slot::PC) as u32 & 0x03FF_FFFC)
            | ((pstate.mode as u32) & CPSR_A26_MODE_MASK)
            | if pstate.f { CPSR_A26_F } else { 0 }
            | if pstate.i { CPSR_A26_I } else { 0 }
            | if pstate.v { CPSR_V } else { 0 }
            | if pstate.c { CPSR_C } else { 0 }
            | if pstate.z { CPSR_Z } else { 0 }
            | if pstate.n { CPSR_N } else { 0 }
    }

    /// Copies only the NZCV nibble out of a CPSR image.
    pub(crate) fn a32_set_cpsr_nzcv(&mut self, value: u32) {
        self.pstate.v = value & CPSR_V != 0;
        self.pstate.c = value & CPSR_C != 0;
        self.pstate.z = value & CPSR_Z != 0;
        self.pstate.n = value & CPSR_N != 0;
    }

    /// Flag restore for flag-setting instructions that write R15: 26-bit
    /// state recovers the flags (and, when privileged, the interrupt
    /// disables) from the result word; 32-bit state copies SPSR to CPSR.
    pub(crate) fn a32_copy_flags_or_spsr(&mut self, value: u32) {
        if self.is_arm26() {
            self.a32_set_cpsr_nzcv(value);
            if self.pstate.mode != Mode::User {
                self.pstate.i = value & CPSR_A26_I != 0;
                self.pstate.f = value & CPSR_A26_F != 0;
            }
        } else {
            if !self.a32_spsr_valid() {
                // Unpredictable; v3 leaves the CPSR alone.
                return;
            }
            let spsr = self.a32_get_spsr();
            self.a32_set_cpsr(u32::MAX, spsr);
        }
    }

    /// IT-state helpers (Thumb-2 and ThumbEE only).
    #[must_use]
    pub(crate) fn t32_in_it_block(&self) -> bool {
        self.pstate.it & 0xF != 0
    }

    #[must_use]
    pub(crate) fn t32_last_in_it_block(&self) -> bool {
        self.pstate.it & 0xF == 0x8
    }

    /// Shifts the IT state after each instruction in a block.
    pub(crate) fn t32_advance_it(&mut self) {
        if !self.t32_in_it_block() {
            return;
        }
        let itstate = self.pstate.it;
        self.pstate.it = if itstate & 0x07 == 0 {
            0
        } else {
            (itstate & 0xE0) | ((itstate << 1) & 0x1F)
        };
    }

    /// Whether the current instruction passes its IT predicate.
    #[must_use]
    pub(crate) fn t32_check_it_condition(&self) -> bool {
        if !self.t32_in_it_block() {
            return true;
        }
        let itstate = u32::from(self.pstate.it);
        let base = crate::cpu::pstate::Condition::from_bits(((itstate & 0xE0) >> 4) as u8);
        let mut condition = self.pstate.check_condition(base);
        if itstate.get_bit(4) {
            condition = !condition;
        }
        condition
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cpu::testing::core;

    #[test]
    fn cpsr_flags_round_trip() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.a32_set_cpsr(u32::MAX, CPSR_N | CPSR_C | CPSR_M4 | Mode::Supervisor as u32);

        assert!(cpu.pstate.n);
        assert!(!cpu.pstate.z);
        assert!(cpu.pstate.c);
        assert_eq!(cpu.pstate.mode, Mode::Supervisor);

        let image = cpu.a32_get_cpsr();
        assert_eq!(image & (CPSR_N | CPSR_Z | CPSR_C | CPSR_V), CPSR_N | CPSR_C);
        assert_eq!(image & CPSR_M_MASK, CPSR_M4 | Mode::Supervisor as u32);
    }

    #[test]
    fn masked_write_leaves_other_fields() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.pstate.mode = Mode::Supervisor;
        cpu.pstate.i = true;

        // A flags-only write must not touch the control byte.
        cpu.a32_set_cpsr(psr_field_mask(true, false, false, false), CPSR_Z);
        assert!(cpu.pstate.z);
        assert!(cpu.pstate.i);
        assert_eq!(cpu.pstate.mode, Mode::Supervisor);
    }

    #[test]
    fn unsupported_jt_is_remapped() {
        // No Jazelle on this part: asking for J keeps ARM state.
        let mut cpu = core(ArmVersion::V6, &[Isa::Arm32, Isa::Thumb]);
        cpu.a32_set_cpsr(u32::MAX, CPSR_M4 | CPSR_J);
        assert_eq!(cpu.pstate.jt, JtState::Arm);

        // Thumb is supported and sticks.
        cpu.a32_set_cpsr(u32::MAX, CPSR_M4 | CPSR_T);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
    }

    #[test]
    fn m4_flip_needs_a_26_bit_capable_part() {
        // A pure 32-bit part must reject the 26-bit width request.
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.set_isa(Isa::Arm32);
        cpu.a32_set_cpsr(u32::MAX, Mode::Supervisor as u32);
        assert_eq!(cpu.pstate.rw, RegisterWidth::Rw32);

        // A v3 part with both schemes honours it.
        let mut cpu = core(ArmVersion::V3, &[Isa::Arm26, Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.a32_set_cpsr(u32::MAX, Mode::Supervisor as u32);
        assert_eq!(cpu.pstate.rw, RegisterWidth::Rw26);
    }

    #[test]
    fn ge_and_it_fields_pack() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.config.features.insert(ArmFeature::Thumb2);
        cpu.pstate.ge = 0b1010;
        cpu.pstate.it = 0xA7;

        let image = cpu.a32_get_cpsr();
        assert_eq!((image & CPSR_GE_MASK) >> CPSR_GE_SHIFT, 0b1010);

        let mut other = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        other.config.features.insert(ArmFeature::Thumb2);
        other.a32_set_cpsr(u32::MAX, image);
        assert_eq!(other.pstate.ge, 0b1010);
        assert_eq!(other.pstate.it, 0xA7);
    }

    #[test]
    fn ge_ignored_before_v6() {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32]);
        cpu.a32_set_cpsr(u32::MAX, 0b1111 << CPSR_GE_SHIFT);
        assert_eq!(cpu.pstate.ge, 0);
        assert_eq!(cpu.a32_get_cpsr() & CPSR_GE_MASK, 0);
    }

    #[test]
    fn a64_cpsr_round_trips_el_and_sp() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.pstate.el = 2;
        cpu.pstate.sp = true;
        cpu.pstate.d = true;
        cpu.pstate.n = true;

        let image = cpu.a64_get_cpsr();
        let mut other = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        other.set_isa(Isa::Arm64);
        other.a64_set_cpsr(image);

        assert_eq!(other.pstate.el, 2);
        assert!(other.pstate.sp);
        assert!(other.pstate.d);
        assert!(other.pstate.n);
        assert_eq!(other.pstate.rw, RegisterWidth::Rw64);
    }

    #[test]
    fn a64_cpsr_restores_aarch32_state() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Thumb, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.a64_set_cpsr(CPSR_M4 | CPSR_T | Mode::Supervisor as u32);

        assert_eq!(cpu.pstate.rw, RegisterWidth::Rw32);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
        assert_eq!(cpu.pstate.mode, Mode::Supervisor);
    }

    #[test]
    fn spsr_only_exists_in_exception_modes() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.pstate.mode = Mode::User;
        assert!(!cpu.a32_spsr_valid());
        cpu.a32_set_spsr(u32::MAX, CPSR_N);
        assert_eq!(cpu.a32_get_spsr(), 0);

        cpu.pstate.mode = Mode::Supervisor;
        assert!(cpu.a32_spsr_valid());
        cpu.a32_set_spsr(u32::MAX, CPSR_N | CPSR_M4 | Mode::Supervisor as u32);
        assert_eq!(cpu.a32_get_spsr() & CPSR_N, CPSR_N);
    }

    #[test]
    fn it_state_advances_and_terminates() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.config.features.insert(ArmFeature::Thumb2);

        // ITTEE EQ: base condition 0000, mask 0111 -> itstate 0x07
        // packed as cond:mask per the architectural layout.
        cpu.pstate.it = 0b0000_0111;
        assert!(cpu.t32_in_it_block());

        let mut steps = 0;
        while cpu.t32_in_it_block() {
            cpu.t32_advance_it();
            steps += 1;
            assert!(steps <= 4);
        }
        assert_eq!(cpu.pstate.it, 0);
    }
}
