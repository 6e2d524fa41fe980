//! # The coprocessor gateway
//!
//! Sixteen slots, each holding a [`Coprocessor`] trait object. CDP, LDC/STC,
//! MCR/MRC and MCRR/MRRC dispatch into the slot named by the opcode; an
//! absent slot or an unimplemented operation raises Undefined, which is what
//! real hardware does when no coprocessor responds.
//!
//! The populated slots are:
//!
//! - 1-2: the legacy FPA, when configured
//! - 10-11: VFP, when any VFP-class feature is present
//! - 14: debug, ThumbEE and Jazelle control registers
//! - 15: system control
//!
//! Floating-point ARITHMETIC is out of scope; the FPA/VFP units here carry
//! the register files and the transfer surface so that context switch code
//! and the debugger see real state.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::core::ArmCore;
use crate::cpu::exception::{Exception, ExecResult};

/// One coprocessor slot. Every operation defaults to Undefined.
pub trait Coprocessor {
    fn cdp(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult {
        let _ = (cpu, opcode);
        Err(Exception::Undefined)
    }

    fn ldc_stc(&mut self, cpu: &mut ArmCore, opcode: u32, address: u32) -> ExecResult {
        let _ = (cpu, opcode, address);
        Err(Exception::Undefined)
    }

    fn mcr(&mut self, cpu: &mut ArmCore, opcode: u32, value: u32) -> ExecResult {
        let _ = (cpu, opcode, value);
        Err(Exception::Undefined)
    }

    fn mrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<u32> {
        let _ = (cpu, opcode);
        Err(Exception::Undefined)
    }

    fn mcrr(&mut self, cpu: &mut ArmCore, opcode: u32, low: u32, high: u32) -> ExecResult {
        let _ = (cpu, opcode, low, high);
        Err(Exception::Undefined)
    }

    fn mrrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<(u32, u32)> {
        let _ = (cpu, opcode);
        Err(Exception::Undefined)
    }
}

/// The (opc1, CRn, CRm, opc2) coordinate of an MCR/MRC-style opcode.
fn coord(opcode: u32) -> (u32, u32, u32, u32) {
    (
        opcode.get_bits(21..=23),
        opcode.get_bits(16..=19),
        opcode.get_bits(0..=3),
        opcode.get_bits(5..=7),
    )
}

impl ArmCore {
    fn take_coproc(&mut self, cp: usize) -> ExecResult<Box<dyn Coprocessor>> {
        self.coproc[cp & 0xF].take().ok_or(Exception::Undefined)
    }

    pub(crate) fn coproc_cdp(&mut self, cp: usize, opcode: u32) -> ExecResult {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.cdp(self, opcode);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    pub(crate) fn coproc_ldc_stc(&mut self, cp: usize, opcode: u32, address: u32) -> ExecResult {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.ldc_stc(self, opcode, address);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    pub(crate) fn coproc_mcr(&mut self, cp: usize, opcode: u32, value: u32) -> ExecResult {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.mcr(self, opcode, value);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    pub(crate) fn coproc_mrc(&mut self, cp: usize, opcode: u32) -> ExecResult<u32> {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.mrc(self, opcode);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    pub(crate) fn coproc_mcrr(&mut self, cp: usize, opcode: u32, low: u32, high: u32) -> ExecResult {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.mcrr(self, opcode, low, high);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    pub(crate) fn coproc_mrrc(&mut self, cp: usize, opcode: u32) -> ExecResult<(u32, u32)> {
        let mut unit = self.take_coproc(cp)?;
        let result = unit.mrrc(self, opcode);
        self.coproc[cp & 0xF] = Some(unit);
        result
    }

    /// Installs a host-supplied coprocessor in a slot.
    pub fn set_coprocessor(&mut self, cp: usize, unit: Box<dyn Coprocessor>) {
        self.coproc[cp & 0xF] = Some(unit);
    }
}

// ----------------------------------------------------------------------
// cp15: system control
// ----------------------------------------------------------------------

/// The system-control coprocessor: SCTLR/SCR/HCR/VBAR plus the read-only
/// identification registers. Cache and TLB maintenance writes (c7, c8) are
/// accepted and ignored; there is nothing to maintain here.
pub struct SystemControl;

impl Coprocessor for SystemControl {
    fn mrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<u32> {
        match coord(opcode) {
            (0, 0, 0, 0) => Ok(cpu.midr()),
            (0, 0, 1, 0) => Ok(cpu.id_pfr0()),
            (0, 1, 0, 0) => Ok(cpu.sysregs.sctlr_el1),
            (0, 1, 1, 0) => Ok(cpu.sysregs.scr_el3),
            (4, 1, 0, 0) => Ok(cpu.sysregs.sctlr_el2),
            (4, 1, 1, 0) => Ok(cpu.sysregs.hcr_el2 as u32),
            (4, 1, 1, 4) => Ok((cpu.sysregs.hcr_el2 >> 32) as u32),
            (0, 12, 0, 0) => Ok(cpu.sysregs.vbar_el1 as u32),
            (4, 12, 0, 0) => Ok(cpu.sysregs.vbar_el2 as u32),
            _ => Err(Exception::Undefined),
        }
    }

    fn mcr(&mut self, cpu: &mut ArmCore, opcode: u32, value: u32) -> ExecResult {
        match coord(opcode) {
            (0, 1, 0, 0) => cpu.sysregs.sctlr_el1 = value,
            (0, 1, 1, 0) => cpu.sysregs.scr_el3 = value,
            (4, 1, 0, 0) => cpu.sysregs.sctlr_el2 = value,
            (4, 1, 1, 0) => {
                cpu.sysregs.hcr_el2 =
                    (cpu.sysregs.hcr_el2 & 0xFFFF_FFFF_0000_0000) | u64::from(value);
            }
            (4, 1, 1, 4) => {
                cpu.sysregs.hcr_el2 =
                    (cpu.sysregs.hcr_el2 & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            (0, 12, 0, 0) => cpu.sysregs.vbar_el1 = u64::from(value),
            (4, 12, 0, 0) => cpu.sysregs.vbar_el2 = u64::from(value),
            (0, 7, _, _) | (0, 8, _, _) => {} // cache/TLB maintenance
            _ => return Err(Exception::Undefined),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// cp14: debug, ThumbEE and Jazelle control
// ----------------------------------------------------------------------

/// cp14 carries the ThumbEE handler base and the Jazelle configuration
/// block. Jazelle registers read as zero in unprivileged state on real
/// parts; this core leaves the access control to the host.
pub struct DebugControl;

impl Coprocessor for DebugControl {
    fn mrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<u32> {
        match coord(opcode) {
            (6, 1, 0, 0) => Ok(cpu.sysregs.teehbr),
            (7, 0, 0, 0) => Ok(cpu.sysregs.jidr),
            (7, 1, 0, 0) => Ok(cpu.sysregs.joscr),
            (7, 2, 0, 0) => Ok(cpu.sysregs.jmcr),
            (7, 3, 0, 0) => Ok(cpu.sysregs.jaolr),
            _ => Err(Exception::Undefined),
        }
    }

    fn mcr(&mut self, cpu: &mut ArmCore, opcode: u32, value: u32) -> ExecResult {
        match coord(opcode) {
            (6, 1, 0, 0) => cpu.sysregs.teehbr = value,
            (7, 1, 0, 0) => cpu.sysregs.joscr = value,
            (7, 2, 0, 0) => cpu.sysregs.jmcr = value,
            (7, 3, 0, 0) => cpu.sysregs.jaolr = value,
            _ => return Err(Exception::Undefined),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// VFP register bank (cp10/cp11)
// ----------------------------------------------------------------------

/// The VFP register file: 32 64-bit lanes stored as integers, with the
/// single/double views constructed on demand (no host-endianness games).
/// `format_bits` tracks, per pair, whether the last write was a double;
/// the external debugger uses it to pick a display format.
#[derive(Clone, Serialize, Deserialize)]
pub struct VfpBank {
    pub lanes: [u64; 32],
    pub format_bits: u32,
    pub fpsid: u32,
    pub fpscr: u32,
    pub fpexc: u32,
}

impl Default for VfpBank {
    fn default() -> Self {
        Self {
            lanes: [0; 32],
            format_bits: 0,
            fpsid: 0,
            fpscr: 0,
            fpexc: 0,
        }
    }
}

impl VfpBank {
    /// Single-precision view: register `i` is a half of lane `i >> 1`.
    #[must_use]
    pub fn s(&self, index: usize) -> u32 {
        let lane = self.lanes[(index >> 1) & 0x1F];
        if index & 1 == 0 {
            lane as u32
        } else {
            (lane >> 32) as u32
        }
    }

    pub fn set_s(&mut self, index: usize, value: u32) {
        let slot = (index >> 1) & 0x1F;
        let lane = self.lanes[slot];
        self.lanes[slot] = if index & 1 == 0 {
            (lane & 0xFFFF_FFFF_0000_0000) | u64::from(value)
        } else {
            (lane & 0x0000_0000_FFFF_FFFF) | (u64::from(value) << 32)
        };
        self.format_bits.set_bit_off((slot & 0x1F) as u8);
    }

    /// Double-precision view: register `i` is lane `i`.
    #[must_use]
    pub fn d(&self, index: usize) -> u64 {
        self.lanes[index & 0x1F]
    }

    pub fn set_d(&mut self, index: usize, value: u64) {
        self.lanes[index & 0x1F] = value;
        self.format_bits.set_bit_on((index & 0x1F) as u8);
    }
}

/// The VFP transfer surface: FMSR/FMRS, FMDRR-class pair moves, FMXR/FMRX
/// and the load/store multiples. Arithmetic CDP raises Undefined.
pub struct Vfp;

impl Vfp {
    /// Single register number of an MCR/MRC-form transfer: CRn:opc2[2].
    fn single_reg(opcode: u32) -> usize {
        ((opcode.get_bits(16..=19) << 1) | opcode.get_bits(7..=7)) as usize
    }

    /// Double register number of an MCRR/MRRC-form transfer: opc1[0]:CRm.
    fn double_reg(opcode: u32) -> usize {
        (opcode.get_bits(0..=3) | (opcode.get_bits(5..=5) << 4)) as usize
    }
}

impl Coprocessor for Vfp {
    fn mcr(&mut self, cpu: &mut ArmCore, opcode: u32, value: u32) -> ExecResult {
        match opcode.get_bits(21..=23) {
            // FMSR: general register to single
            0b000 => {
                cpu.vfp.set_s(Self::single_reg(opcode), value);
                Ok(())
            }
            // FMDLR/FMDHR: low/high half of a double
            0b001 => {
                let reg = Self::single_reg(opcode) >> 1;
                let old = cpu.vfp.d(reg);
                cpu.vfp
                    .set_d(reg, (old & 0xFFFF_FFFF_0000_0000) | u64::from(value));
                Ok(())
            }
            0b010 => {
                let reg = Self::single_reg(opcode) >> 1;
                let old = cpu.vfp.d(reg);
                cpu.vfp
                    .set_d(reg, (old & 0xFFFF_FFFF) | (u64::from(value) << 32));
                Ok(())
            }
            // FMXR: system registers
            0b111 => {
                match opcode.get_bits(16..=19) {
                    0 => cpu.vfp.fpsid = value,
                    1 => cpu.vfp.fpscr = value,
                    8 => cpu.vfp.fpexc = value,
                    _ => return Err(Exception::Undefined),
                }
                Ok(())
            }
            _ => Err(Exception::Undefined),
        }
    }

    fn mrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<u32> {
        match opcode.get_bits(21..=23) {
            0b000 => Ok(cpu.vfp.s(Self::single_reg(opcode))),
            0b001 => Ok(cpu.vfp.d(Self::single_reg(opcode) >> 1) as u32),
            0b010 => Ok((cpu.vfp.d(Self::single_reg(opcode) >> 1) >> 32) as u32),
            0b111 => match opcode.get_bits(16..=19) {
                0 => Ok(cpu.vfp.fpsid),
                1 => Ok(cpu.vfp.fpscr),
                8 => Ok(cpu.vfp.fpexc),
                _ => Err(Exception::Undefined),
            },
            _ => Err(Exception::Undefined),
        }
    }

    fn mcrr(&mut self, cpu: &mut ArmCore, opcode: u32, low: u32, high: u32) -> ExecResult {
        cpu.vfp.set_d(
            Self::double_reg(opcode),
            u64::from(low) | (u64::from(high) << 32),
        );
        Ok(())
    }

    fn mrrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<(u32, u32)> {
        let value = cpu.vfp.d(Self::double_reg(opcode));
        Ok((value as u32, (value >> 32) as u32))
    }

    fn ldc_stc(&mut self, cpu: &mut ArmCore, opcode: u32, address: u32) -> ExecResult {
        let load = opcode.get_bit(20);
        let doubles = opcode.get_bits(8..=11) == 11;
        let mut address = u64::from(address);

        if doubles {
            let base = ((opcode.get_bits(22..=22) << 4) | opcode.get_bits(12..=15)) as usize;
            let count = (opcode.get_bits(0..=7) as usize / 2).max(1);
            for reg in base..(base + count).min(32) {
                if load {
                    let value = cpu.data_read64(address, false)?;
                    cpu.vfp.set_d(reg, value);
                } else {
                    cpu.data_write64(address, cpu.vfp.d(reg), false)?;
                }
                address += 8;
            }
        } else {
            let base = ((opcode.get_bits(12..=15) << 1) | opcode.get_bits(22..=22)) as usize;
            let count = (opcode.get_bits(0..=7) as usize).max(1);
            for reg in base..(base + count).min(64) {
                if load {
                    let value = cpu.data_read32(address, false)?;
                    cpu.vfp.set_s(reg, value);
                } else {
                    let value = cpu.vfp.s(reg);
                    cpu.data_write32(address, value, false)?;
                }
                address += 4;
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// FPA register bank (cp1/cp2)
// ----------------------------------------------------------------------

/// The legacy Floating Point Accelerator state: eight extended registers
/// (held as f64 bit patterns) and the status/control pair.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FpaBank {
    pub f: [u64; 8],
    pub fpsr: u32,
    pub fpcr: u32,
}

/// FPA transfer surface: LDF/STF through LDC/STC and the WFS/RFS/WFC/RFC
/// status moves. Arithmetic CDP raises Undefined, like an absent unit; the
/// host traps it and emulates if it cares.
pub struct Fpa;

impl Coprocessor for Fpa {
    fn mcr(&mut self, cpu: &mut ArmCore, opcode: u32, value: u32) -> ExecResult {
        match opcode.get_bits(21..=23) {
            // WFS / WFC
            0b010 => {
                cpu.fpa.fpsr = value;
                Ok(())
            }
            0b011 => {
                cpu.fpa.fpcr = value;
                Ok(())
            }
            _ => Err(Exception::Undefined),
        }
    }

    fn mrc(&mut self, cpu: &mut ArmCore, opcode: u32) -> ExecResult<u32> {
        match opcode.get_bits(21..=23) {
            // RFS / RFC
            0b010 => Ok(cpu.fpa.fpsr),
            0b011 => Ok(cpu.fpa.fpcr),
            _ => Err(Exception::Undefined),
        }
    }

    fn ldc_stc(&mut self, cpu: &mut ArmCore, opcode: u32, address: u32) -> ExecResult {
        let load = opcode.get_bit(20);
        let reg = opcode.get_bits(12..=14) as usize;
        let address = u64::from(address);
        if load {
            cpu.fpa.f[reg] = cpu.data_read64(address, false)?;
        } else {
            cpu.data_write64(address, cpu.fpa.f[reg], false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ArmVersion, Isa};
    use crate::cpu::testing::core;

    #[test]
    fn empty_slot_is_undefined() {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32]);
        assert_eq!(cpu.coproc_cdp(7, 0), Err(Exception::Undefined));
        assert_eq!(cpu.coproc_mrc(7, 0), Err(Exception::Undefined));
    }

    #[test]
    fn sctlr_round_trips_through_cp15() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        // MCR p15, 0, Rt, c1, c0, 0
        let opcode = 0b1110_1110_0000_0001_0000_1111_0001_0000;
        cpu.coproc_mcr(15, opcode, 0x0000_2001).unwrap();
        assert_eq!(cpu.sysregs.sctlr_el1, 0x0000_2001);
        assert_eq!(cpu.coproc_mrc(15, opcode), Ok(0x0000_2001));
    }

    #[test]
    fn hcr_write_is_split_across_words() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        // MCR p15, 4, Rt, c1, c1, 0 (HCR) and opc2=4 (HCR2)
        let hcr = 0b1110_1110_1000_0001_0000_1111_0001_0001;
        let hcr2 = 0b1110_1110_1000_0001_0000_1111_1001_0001;
        cpu.coproc_mcr(15, hcr, 0x8000_0000).unwrap();
        cpu.coproc_mcr(15, hcr2, 0x0000_0004).unwrap();
        assert_eq!(cpu.sysregs.hcr_el2, 0x0000_0004_8000_0000);
    }

    #[test]
    fn jazelle_block_lives_on_cp14() {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Jazelle]);
        // MCR p14, 7, Rt, c2, c0, 0 (JMCR)
        let jmcr = 0b1110_1110_1110_0010_0000_1110_0001_0000;
        cpu.coproc_mcr(14, jmcr, 3).unwrap();
        assert_eq!(cpu.sysregs.jmcr, 3);
        assert_eq!(cpu.coproc_mrc(14, jmcr), Ok(3));
    }

    #[test]
    fn vfp_single_and_double_views_alias() {
        let mut bank = VfpBank::default();
        bank.set_d(1, 0x1122_3344_5566_7788);
        assert_eq!(bank.s(2), 0x5566_7788);
        assert_eq!(bank.s(3), 0x1122_3344);
        assert!(bank.format_bits.get_bit(1));

        bank.set_s(2, 0xAABB_CCDD);
        assert_eq!(bank.d(1), 0x1122_3344_AABB_CCDD);
        // A single write downgrades the pair's format.
        assert!(!bank.format_bits.get_bit(1));
    }

    #[test]
    fn fpa_status_moves() {
        let mut cpu = core(ArmVersion::V3, &[Isa::Arm32]);
        cpu.config.features.insert(crate::config::ArmFeature::Fpa);
        // WFS: MCR p1, 2, Rt, ...
        let wfs = 0b1110_1110_0100_0000_0000_0001_0001_0000;
        let mut fpa = Fpa;
        fpa.mcr(&mut cpu, wfs, 0x8000_0000).unwrap();
        assert_eq!(cpu.fpa.fpsr, 0x8000_0000);
        assert_eq!(fpa.mrc(&mut cpu, wfs), Ok(0x8000_0000));
    }
}
