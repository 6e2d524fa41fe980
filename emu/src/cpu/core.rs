//! The CPU core: state container, fetch paths and the step loop.
//!
//! One [`ArmCore`] emulates every generation the configuration enables. Each
//! call to [`ArmCore::step`] dispatches on PSTATE (rw, jt) to one of the four
//! per-ISA step functions (ARM26 shares the ARM32 path), which fetch, decode
//! and execute a single instruction. Faults travel back to the step function
//! as an [`Exception`] value, where they are either vectored architecturally
//! or surfaced to the host when `capture_breaks` is set.

use std::sync::{Arc, Mutex};

use crate::config::{ArmConfig, ArmFeature, ArmVersion, ConfigError, Isa, IsaSet};
use crate::cpu::coprocessor::{Coprocessor, DebugControl, Fpa, FpaBank, SystemControl, Vfp, VfpBank};
use crate::cpu::exception::{Exception, ExecResult, StepResult};
use crate::cpu::jazelle::stack::FastStack;
use crate::cpu::pstate::{JtState, Pstate, RegisterWidth};
use crate::cpu::registers::{slot, RegisterFile};
use crate::cpu::sysregs::{self, SystemRegs};
use crate::memory::{endian, Endianness, MemoryInterface};

pub struct ArmCore {
    pub config: ArmConfig,
    pub supported_isas: IsaSet,

    /// When set, faults are returned to the monitor through [`ArmCore::step`]
    /// instead of being handled by architectural exception entry.
    pub capture_breaks: bool,
    pub result: StepResult,

    pub pstate: Pstate,
    pub(crate) regs: RegisterFile,
    pub(crate) old_pc: u64,

    pub(crate) sysregs: SystemRegs,
    pub(crate) vfp: VfpBank,
    pub(crate) fpa: FpaBank,
    pub(crate) jstack: FastStack,

    pub(crate) coproc: [Option<Box<dyn Coprocessor>>; 16],

    pub memory: Arc<Mutex<dyn MemoryInterface>>,
    /// Advisory (lowest, highest) range touched by data writes, consumed by
    /// the external debugger.
    pub(crate) memory_change: Option<(u64, u64)>,

    pub(crate) el2_supported: bool,
    pub(crate) el3_supported: bool,
    /// Lowest EL that only exists in AArch64 (4 = fully 32-bit part).
    pub(crate) lowest_64bit_only_el: u8,
}

impl ArmCore {
    /// Builds a core from a validated configuration. The configuration is
    /// normalized first so the feature set, the implementation levels and
    /// the ISA set agree with each other.
    pub fn new(
        config: ArmConfig,
        supported_isas: IsaSet,
        memory: Arc<Mutex<dyn MemoryInterface>>,
    ) -> Result<Self, ConfigError> {
        config.validate(supported_isas)?;

        let mut config = config;
        let mut supported_isas = supported_isas;
        config.normalize(&mut supported_isas);

        let mut coproc: [Option<Box<dyn Coprocessor>>; 16] = std::array::from_fn(|_| None);
        if config.features.has(ArmFeature::Fpa) {
            coproc[1] = Some(Box::new(Fpa));
            coproc[2] = Some(Box::new(Fpa));
        }
        if config.supports_vfp_registers() {
            coproc[10] = Some(Box::new(Vfp));
            coproc[11] = Some(Box::new(Vfp));
        }
        coproc[14] = Some(Box::new(DebugControl));
        coproc[15] = Some(Box::new(SystemControl));

        let mut sysregs = SystemRegs::default();
        if !config.features.has(ArmFeature::Arm26) {
            sysregs.sctlr_el1 |= sysregs::SCTLR_P | sysregs::SCTLR_D;
        }

        Ok(Self {
            el2_supported: config.features.has(ArmFeature::Virtualization),
            el3_supported: config.features.has(ArmFeature::Security),
            lowest_64bit_only_el: if config.features.has(ArmFeature::Arm64) {
                3
            } else {
                4
            },
            config,
            supported_isas,
            capture_breaks: false,
            result: StepResult::Ok,
            pstate: Pstate::default(),
            regs: RegisterFile::default(),
            old_pc: 0,
            sysregs,
            vfp: VfpBank::default(),
            fpa: FpaBank::default(),
            jstack: FastStack::default(),
            coproc,
            memory,
            memory_change: None,
        })
    }

    #[must_use]
    pub fn is_supported_isa(&self, isa: Isa) -> bool {
        match isa {
            Isa::Arm26 => self.config.features.has(ArmFeature::Arm26),
            Isa::Arm32 => self.config.features.has(ArmFeature::Arm32),
            Isa::Thumb => self.config.features.has(ArmFeature::Thumb),
            Isa::Jazelle => self.config.features.has(ArmFeature::Jazelle),
            Isa::ThumbEe => {
                self.config.features.has(ArmFeature::Thumb) && self.config.version == ArmVersion::V7
            }
            Isa::Arm64 => self.config.features.has(ArmFeature::Arm64),
        }
    }

    /// Programs PSTATE for the given instruction set. Used by loaders to
    /// select the startup state; at runtime the state changes through
    /// interworking branches and exception entry instead.
    pub fn set_isa(&mut self, isa: Isa) {
        match isa {
            Isa::Arm26 => {
                self.pstate.rw = RegisterWidth::Rw26;
                self.pstate.jt = JtState::Arm;
            }
            Isa::Arm32 => {
                self.pstate.rw = RegisterWidth::Rw32;
                self.pstate.jt = JtState::Arm;
                self.sysregs.sctlr_el1 |= sysregs::SCTLR_P | sysregs::SCTLR_D;
            }
            Isa::Thumb => {
                self.pstate.rw = RegisterWidth::Rw32;
                self.pstate.jt = JtState::Thumb;
            }
            Isa::Jazelle => {
                self.pstate.rw = RegisterWidth::Rw32;
                self.pstate.jt = JtState::Jazelle;
                self.jstack = FastStack::default();
            }
            Isa::ThumbEe => {
                self.pstate.rw = RegisterWidth::Rw32;
                self.pstate.jt = JtState::ThumbEe;
            }
            Isa::Arm64 => {
                self.pstate.rw = RegisterWidth::Rw64;
                self.pstate.jt = JtState::Arm;
            }
        }
    }

    #[must_use]
    pub fn current_isa(&self) -> Isa {
        self.pstate.isa()
    }

    /// Executes one instruction and returns the outcome. `StepResult::Ok`
    /// covers both plain execution and an architecturally vectored fault;
    /// anything else is only returned with `capture_breaks` set.
    pub fn step(&mut self) -> StepResult {
        self.result = StepResult::Ok;
        match self.pstate.isa() {
            Isa::Arm26 | Isa::Arm32 => self.a32_step(),
            Isa::Thumb | Isa::ThumbEe => self.t32_step(),
            Isa::Jazelle => self.j32_step(),
            Isa::Arm64 => self.a64_step(),
        }
        self.result
    }

    /// Injects an interrupt request, as a pin would.
    pub fn irq(&mut self) -> StepResult {
        self.result = StepResult::Ok;
        self.handle_exception(Exception::Irq);
        self.result
    }

    /// Injects a fast interrupt request.
    pub fn fiq(&mut self) -> StepResult {
        self.result = StepResult::Ok;
        self.handle_exception(Exception::Fiq);
        self.result
    }

    /// Injects a system error (asynchronous external abort).
    pub fn serror(&mut self) -> StepResult {
        self.result = StepResult::Ok;
        self.handle_exception(Exception::SError);
        self.result
    }

    /// Performs a reset: vectors to the highest implemented exception level.
    pub fn reset(&mut self) -> StepResult {
        self.result = StepResult::Ok;
        self.handle_exception(Exception::Reset);
        self.result
    }

    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.pstate.is_privileged()
    }

    /// A 26-bit program counter: either a real 26-bit part, or a 32-bit part
    /// configured for 26-bit exception compatibility through SCTLR.P. The
    /// bit was redefined in ARMv8.
    #[must_use]
    pub(crate) fn is_prog26(&self) -> bool {
        if !self.is_supported_isa(Isa::Arm26) {
            false
        } else if !self.is_supported_isa(Isa::Arm32) {
            true
        } else {
            self.config.version < ArmVersion::V8
                && self.sysregs.sctlr_el1 & sysregs::SCTLR_P == 0
        }
    }

    /// 26-bit data addressing (SCTLR.D), gating the address-exception check.
    #[must_use]
    pub(crate) fn is_data26(&self) -> bool {
        if !self.is_supported_isa(Isa::Arm26) {
            false
        } else if !self.is_supported_isa(Isa::Arm32) {
            true
        } else {
            self.config.version < ArmVersion::V8
                && self.sysregs.sctlr_el1 & sysregs::SCTLR_D == 0
        }
    }

    #[must_use]
    pub(crate) fn is_arm26(&self) -> bool {
        self.pstate.rw == RegisterWidth::Rw26
    }

    // ------------------------------------------------------------------
    // Endianness selection
    // ------------------------------------------------------------------

    pub(crate) fn a32_instruction_endianness(&self) -> Endianness {
        if self.sysregs.sctlr_el1 & sysregs::SCTLR_B != 0 {
            Endianness::Swapped
        } else {
            Endianness::Little
        }
    }

    pub(crate) fn a32_data_endianness(&self) -> Endianness {
        if self.sysregs.sctlr_el1 & sysregs::SCTLR_B != 0 {
            Endianness::Swapped
        } else if self.pstate.e {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    pub(crate) fn a64_data_endianness(&self) -> Endianness {
        let big = match self.pstate.el {
            0 => self.sysregs.sctlr_el1 & sysregs::SCTLR_E0E != 0,
            1 => self.sysregs.sctlr_el1 & sysregs::SCTLR_EE != 0,
            2 => self.sysregs.sctlr_el2 & sysregs::SCTLR_EE != 0,
            _ => self.sysregs.sctlr_el3 & sysregs::SCTLR_EE != 0,
        };
        if big {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    pub(crate) fn data_endianness(&self) -> Endianness {
        match self.pstate.rw {
            RegisterWidth::Rw26 | RegisterWidth::Rw32 => self.a32_data_endianness(),
            RegisterWidth::Rw64 => self.a64_data_endianness(),
        }
    }

    // ------------------------------------------------------------------
    // Data memory access
    // ------------------------------------------------------------------

    fn data_privilege(&self, user_mode: bool) -> bool {
        if user_mode {
            false
        } else {
            self.is_privileged()
        }
    }

    pub(crate) fn note_memory_change(&mut self, address: u64, size: u64) {
        let high = address + (size - 1);
        self.memory_change = Some(match self.memory_change {
            None => (address, high),
            Some((lowest, highest)) => (lowest.min(address), highest.max(high)),
        });
    }

    /// The advisory write range since the last [`Self::clear_memory_change`].
    #[must_use]
    pub fn memory_change(&self) -> Option<(u64, u64)> {
        self.memory_change
    }

    pub fn clear_memory_change(&mut self) {
        self.memory_change = None;
    }

    pub(crate) fn data_read8(&mut self, address: u64, user_mode: bool) -> ExecResult<u8> {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let mut memory = self.memory.lock().unwrap();
        endian::read8(&mut *memory, address, endian, privileged).ok_or(Exception::DataAbort)
    }

    pub(crate) fn data_read16(&mut self, address: u64, user_mode: bool) -> ExecResult<u16> {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let mut memory = self.memory.lock().unwrap();
        endian::read16(&mut *memory, address, endian, privileged).ok_or(Exception::DataAbort)
    }

    pub(crate) fn data_read32(&mut self, address: u64, user_mode: bool) -> ExecResult<u32> {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let mut memory = self.memory.lock().unwrap();
        endian::read32(&mut *memory, address, endian, privileged).ok_or(Exception::DataAbort)
    }

    pub(crate) fn data_read64(&mut self, address: u64, user_mode: bool) -> ExecResult<u64> {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let mut memory = self.memory.lock().unwrap();
        endian::read64(&mut *memory, address, endian, privileged).ok_or(Exception::DataAbort)
    }

    pub(crate) fn data_write8(&mut self, address: u64, value: u8, user_mode: bool) -> ExecResult {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let ok = {
            let mut memory = self.memory.lock().unwrap();
            endian::write8(&mut *memory, address, value, endian, privileged)
        };
        if !ok {
            return Err(Exception::DataAbort);
        }
        self.note_memory_change(address, 1);
        Ok(())
    }

    pub(crate) fn data_write16(&mut self, address: u64, value: u16, user_mode: bool) -> ExecResult {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let ok = {
            let mut memory = self.memory.lock().unwrap();
            endian::write16(&mut *memory, address, value, endian, privileged)
        };
        if !ok {
            return Err(Exception::DataAbort);
        }
        self.note_memory_change(address, 2);
        Ok(())
    }

    pub(crate) fn data_write32(&mut self, address: u64, value: u32, user_mode: bool) -> ExecResult {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let ok = {
            let mut memory = self.memory.lock().unwrap();
            endian::write32(&mut *memory, address, value, endian, privileged)
        };
        if !ok {
            return Err(Exception::DataAbort);
        }
        self.note_memory_change(address, 4);
        Ok(())
    }

    pub(crate) fn data_write64(&mut self, address: u64, value: u64, user_mode: bool) -> ExecResult {
        let endian = self.data_endianness();
        let privileged = self.data_privilege(user_mode);
        let ok = {
            let mut memory = self.memory.lock().unwrap();
            endian::write64(&mut *memory, address, value, endian, privileged)
        };
        if !ok {
            return Err(Exception::DataAbort);
        }
        self.note_memory_change(address, 8);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instruction fetch
    // ------------------------------------------------------------------

    /// ARM26/ARM32 fetch: a 32-bit word at PC (low bits masked), advancing
    /// PC. A 26-bit state wraps the program counter after advancing; only
    /// the ARM instruction set can run with rw = 26.
    pub(crate) fn a32_fetch32(&mut self) -> ExecResult<u32> {
        let endian = self.a32_instruction_endianness();
        let privileged = self.is_privileged();
        let pc = self.regs.get(slot::PC);
        let value = {
            let mut memory = self.memory.lock().unwrap();
            endian::read32(&mut *memory, pc & !3, endian, privileged)
                .ok_or(Exception::PrefetchAbort)?
        };
        let mut next = pc.wrapping_add(4);
        if self.pstate.rw == RegisterWidth::Rw26 {
            next &= 0x03FF_FFFF;
        }
        self.regs.set(slot::PC, next);
        Ok(value)
    }

    /// A64 fetch: PC must be word aligned, the stream is little-endian.
    pub(crate) fn a64_fetch32(&mut self) -> ExecResult<u32> {
        let pc = self.regs.get(slot::PC);
        if pc & 3 != 0 {
            return Err(Exception::UnalignedPc);
        }
        let privileged = self.is_privileged();
        let value = {
            let mut memory = self.memory.lock().unwrap();
            endian::read32(&mut *memory, pc, Endianness::Little, privileged)
                .ok_or(Exception::PrefetchAbort)?
        };
        self.regs.set(slot::PC, pc.wrapping_add(4));
        Ok(value)
    }

    /// Thumb/ThumbEE fetch: one half-word at PC (bit 0 masked).
    pub(crate) fn t32_fetch16(&mut self) -> ExecResult<u16> {
        let endian = self.a32_instruction_endianness();
        let privileged = self.is_privileged();
        let pc = self.regs.get(slot::PC);
        let value = {
            let mut memory = self.memory.lock().unwrap();
            endian::read16(&mut *memory, pc & !1, endian, privileged)
                .ok_or(Exception::PrefetchAbort)?
        };
        self.regs.set(slot::PC, pc.wrapping_add(2));
        Ok(value)
    }

    /// Jazelle fetch: single bytes; the bytecode stream is logically
    /// big-endian independent of the data endianness.
    pub(crate) fn j32_fetch8(&mut self) -> ExecResult<u8> {
        let endian = self.a32_instruction_endianness();
        let privileged = self.is_privileged();
        let pc = self.regs.get(slot::PC);
        let value = {
            let mut memory = self.memory.lock().unwrap();
            endian::read8(&mut *memory, pc, endian, privileged)
                .ok_or(Exception::JazellePrefetchAbort)?
        };
        self.regs.set(slot::PC, pc.wrapping_add(1));
        Ok(value)
    }

    pub(crate) fn j32_fetch16be(&mut self) -> ExecResult<u16> {
        let high = self.j32_fetch8()?;
        let low = self.j32_fetch8()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    pub(crate) fn j32_fetch32be(&mut self) -> ExecResult<u32> {
        let high = self.j32_fetch16be()?;
        let low = self.j32_fetch16be()?;
        Ok((u32::from(high) << 16) | u32::from(low))
    }

    /// Rounds PC up to the next word boundary (tableswitch padding).
    pub(crate) fn j32_align_pc32(&mut self) {
        let pc = self.regs.get(slot::PC);
        self.regs.set(slot::PC, (pc + 3) & !3);
    }

    // ------------------------------------------------------------------
    // Exclusive monitor
    // ------------------------------------------------------------------

    pub(crate) fn mark_exclusive(&mut self, base: u64, size: u64) {
        self.sysregs.exclusive_start = base;
        self.sysregs.exclusive_end = base + size - 1;
    }

    pub(crate) fn check_exclusive(&self, base: u64, size: u64) -> bool {
        self.sysregs.exclusive_start < base + size && base <= self.sysregs.exclusive_end
    }

    pub(crate) fn clear_exclusive(&mut self) {
        self.sysregs.exclusive_start = u64::MAX;
        self.sysregs.exclusive_end = 0;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cpu::testing::core as core_with;
    use crate::memory::SystemMemory;

    #[test]
    fn set_isa_round_trips() {
        let mut cpu = core_with(
            ArmVersion::V7,
            &[Isa::Arm32, Isa::Thumb, Isa::ThumbEe, Isa::Jazelle],
        );
        for isa in [Isa::Arm32, Isa::Thumb, Isa::ThumbEe, Isa::Jazelle] {
            cpu.set_isa(isa);
            assert_eq!(cpu.current_isa(), isa);
        }
    }

    #[test]
    fn exclusive_monitor_lifecycle() {
        let mut cpu = core_with(ArmVersion::V7, &[Isa::Arm32]);
        assert!(!cpu.check_exclusive(0x1000, 4));

        cpu.mark_exclusive(0x1000, 4);
        assert!(cpu.check_exclusive(0x1000, 4));
        assert!(cpu.check_exclusive(0x1002, 1));
        assert!(!cpu.check_exclusive(0x1004, 4));

        cpu.clear_exclusive();
        assert!(!cpu.check_exclusive(0x1000, 4));
    }

    #[test]
    fn memory_change_range_accumulates() {
        let mut cpu = core_with(ArmVersion::V7, &[Isa::Arm32]);
        assert_eq!(cpu.memory_change(), None);

        cpu.data_write32(0x100, 1, false).unwrap();
        assert_eq!(cpu.memory_change(), Some((0x100, 0x103)));
        cpu.data_write8(0x80, 2, false).unwrap();
        assert_eq!(cpu.memory_change(), Some((0x80, 0x103)));
        cpu.data_write16(0x200, 3, false).unwrap();
        assert_eq!(cpu.memory_change(), Some((0x80, 0x201)));

        cpu.clear_memory_change();
        assert_eq!(cpu.memory_change(), None);
    }

    #[test]
    fn arm26_fetch_wraps_pc() {
        let memory = Arc::new(Mutex::new(SystemMemory::new(0x03FF_F000, 0x1000)));
        let mut cpu = ArmCore::new(
            ArmConfig::new(ArmVersion::V2),
            IsaSet::of(&[Isa::Arm26]),
            memory,
        )
        .unwrap();
        cpu.set_isa(Isa::Arm26);
        cpu.data_write32(0x03FF_FFFC, 0xE1A0_0000, false).unwrap();
        cpu.regs.set(slot::PC, 0x03FF_FFFC);

        let opcode = cpu.a32_fetch32().unwrap();
        assert_eq!(opcode, 0xE1A0_0000);
        // The 26-bit program counter wraps after advancing.
        assert_eq!(cpu.regs.get(slot::PC), 0);
    }

    #[test]
    fn a64_fetch_requires_alignment() {
        let mut cpu = core_with(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.regs.set(slot::PC, 0x102);
        assert_eq!(cpu.a64_fetch32(), Err(Exception::UnalignedPc));
    }

    #[test]
    fn jazelle_fetch_is_big_endian() {
        let mut cpu = core_with(ArmVersion::V5, &[Isa::Arm32, Isa::Jazelle]);
        cpu.set_isa(Isa::Jazelle);
        cpu.data_write8(0x100, 0x12, false).unwrap();
        cpu.data_write8(0x101, 0x34, false).unwrap();
        cpu.regs.set(slot::PC, 0x100);
        assert_eq!(cpu.j32_fetch16be().unwrap(), 0x1234);
    }
}
