//! # Fault classification and exception entry
//!
//! Every faulting primitive deep inside the instruction semantics returns an
//! [`Exception`] through `Result`, and the per-ISA step functions hand it to
//! [`ArmCore::handle_exception`]. From there one of two things happens:
//!
//! - with `capture_breaks` set, the fault kind is surfaced to the host as a
//!   [`StepResult`] and no architectural state changes;
//! - otherwise the core performs architectural exception entry: pick the
//!   target EL or AArch32 mode, save the return state, mask interrupts and
//!   redirect PC to the vector.
//!
//! The program counter was already advanced by fetch when a fault is
//! raised, so each entry path first rewinds to the faulting instruction and
//! then applies the architectural displacement of its fault class (+4 for
//! prefetch aborts and interrupts, +8 for data aborts, none for SVC).

use crate::config::{ArmVersion, Isa};
use crate::cpu::core::ArmCore;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::jazelle::{
    J32_EXCEPTION_JAZELLE_DISABLED, J32_EXCEPTION_JAZELLE_INVALID, J32_EXCEPTION_NULLPTR,
    J32_EXCEPTION_OUT_OF_BOUNDS, J32_EXCEPTION_PREFETCH_ABORT,
};
use crate::cpu::pstate::{JtState, RegisterWidth};
use crate::cpu::registers::{slot, A32_LR};
use crate::cpu::sysregs::{
    HCR_EL2_E2H, HCR_EL2_RW, HCR_EL2_TGE, SCR_EL3_RW, SCTLR_EE, SCTLR_SPAN, SCTLR_TE, SCTLR_V,
};

pub const A32_VECTOR_RESET: u32 = 0x0000_0000;
pub const A32_VECTOR_UNDEFINED: u32 = 0x0000_0004;
pub const A32_VECTOR_SWI: u32 = 0x0000_0008;
pub const A32_VECTOR_PREFETCH_ABORT: u32 = 0x0000_000C;
pub const A32_VECTOR_DATA_ABORT: u32 = 0x0000_0010;
pub const A32_VECTOR_ADDRESS: u32 = 0x0000_0014;
pub const A32_VECTOR_IRQ: u32 = 0x0000_0018;
pub const A32_VECTOR_FIQ: u32 = 0x0000_001C;

pub const A64_VECTOR_SYNCHRONOUS: u32 = 0x000;
pub const A64_VECTOR_IRQ: u32 = 0x080;
pub const A64_VECTOR_FIQ: u32 = 0x100;
pub const A64_VECTOR_SERROR: u32 = 0x180;

/// An architectural fault, raised from instruction semantics and resolved
/// at the top of `step()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    Svc,
    Smc,
    Hvc,
    PrefetchAbort,
    DataAbort,
    /// 26-bit address exception (data access above 64 MiB), ARMv3 only.
    Address26,
    Irq,
    Fiq,
    Breakpoint,
    Unaligned,
    UnalignedPc,
    UnalignedSp,
    SError,
    SoftwareStep,
    /// Jazelle break: the handler-table index (the bytecode value for
    /// unsupported bytecodes, or one of the `J32_EXCEPTION_*` codes).
    JazelleTrap(u32),
    ThumbEeNullPtr,
    ThumbEeOutOfBounds,
    /// A fetch fault in Jazelle state; vectors through the handler table
    /// rather than the prefetch-abort vector.
    JazellePrefetchAbort,
}

/// Shorthand for fallible instruction semantics.
pub type ExecResult<T = ()> = Result<T, Exception>;

/// Outcome of one [`ArmCore::step`]. Everything but `Ok` is only produced
/// in capture-breaks mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepResult {
    #[default]
    Ok,
    Reset,
    Svc,
    Undefined,
    PrefetchAbort,
    DataAbort,
    Address26,
    Irq,
    Fiq,
    Breakpoint,
    Unaligned,
    UnalignedPc,
    UnalignedSp,
    SError,
    Smc,
    Hvc,
    SoftwareStep,
    JazelleUndefined,
    JazelleNullPtr,
    JazelleOutOfBounds,
    JazelleDisabled,
    JazelleInvalid,
    JazellePrefetchAbort,
    ThumbEeOutOfBounds,
    ThumbEeNullPtr,
}

impl From<Exception> for StepResult {
    fn from(kind: Exception) -> Self {
        match kind {
            Exception::Reset => Self::Reset,
            Exception::Undefined => Self::Undefined,
            Exception::Svc => Self::Svc,
            Exception::Smc => Self::Smc,
            Exception::Hvc => Self::Hvc,
            Exception::PrefetchAbort => Self::PrefetchAbort,
            Exception::DataAbort => Self::DataAbort,
            Exception::Address26 => Self::Address26,
            Exception::Irq => Self::Irq,
            Exception::Fiq => Self::Fiq,
            Exception::Breakpoint => Self::Breakpoint,
            Exception::Unaligned => Self::Unaligned,
            Exception::UnalignedPc => Self::UnalignedPc,
            Exception::UnalignedSp => Self::UnalignedSp,
            Exception::SError => Self::SError,
            Exception::SoftwareStep => Self::SoftwareStep,
            Exception::JazellePrefetchAbort => Self::JazellePrefetchAbort,
            Exception::ThumbEeNullPtr => Self::ThumbEeNullPtr,
            Exception::ThumbEeOutOfBounds => Self::ThumbEeOutOfBounds,
            Exception::JazelleTrap(index) => match index {
                J32_EXCEPTION_NULLPTR => Self::JazelleNullPtr,
                J32_EXCEPTION_OUT_OF_BOUNDS => Self::JazelleOutOfBounds,
                J32_EXCEPTION_JAZELLE_DISABLED => Self::JazelleDisabled,
                J32_EXCEPTION_JAZELLE_INVALID => Self::JazelleInvalid,
                J32_EXCEPTION_PREFETCH_ABORT => Self::JazellePrefetchAbort,
                _ => Self::JazelleUndefined,
            },
        }
    }
}

impl ArmCore {
    /// Surfaces a fault to the monitor instead of vectoring.
    fn break_emulation(&mut self, kind: Exception) {
        self.t32_advance_it();
        self.result = kind.into();
    }

    /// Whether exceptions targeting `selected_el` are taken to AArch64.
    pub(crate) fn el_uses_aarch64(&self, selected_el: u8) -> bool {
        if self.lowest_64bit_only_el > 3 {
            // No AArch64 anywhere on this part.
            return false;
        }
        if selected_el >= self.lowest_64bit_only_el {
            return true;
        }
        if selected_el == 3 {
            return false;
        }
        // check EL2
        if self.el3_supported && self.sysregs.scr_el3 & SCR_EL3_RW == 0 {
            return false;
        }
        if selected_el == 2 {
            return true;
        }
        // check EL1
        if self.el2_supported
            && self.sysregs.hcr_el2 & HCR_EL2_RW == 0
            && self.sysregs.hcr_el2 & (HCR_EL2_E2H | HCR_EL2_TGE) != (HCR_EL2_E2H | HCR_EL2_TGE)
        {
            return false;
        }
        if selected_el == 1 {
            return true;
        }
        self.pstate.rw == RegisterWidth::Rw64
    }

    /// AArch64 exception entry: selects the vector slot relative to
    /// VBAR_ELn, saves the return state into ELR/SPSR and masks everything.
    pub(crate) fn a64_vector(&mut self, base_offset: u32, target_el: u8) {
        self.t32_advance_it();
        self.clear_exclusive();

        let target_el = target_el.clamp(1, 3);
        let current_el = self.pstate.el;
        let mut address = u64::from(base_offset);
        if target_el > current_el {
            let check_el = target_el - 1;
            if self.el_uses_aarch64(check_el) {
                address += 0x600;
            } else {
                address += 0x400;
            }
        } else if self.pstate.sp {
            address += 0x200;
        }

        address += match target_el {
            1 => self.sysregs.vbar_el1,
            2 => self.sysregs.vbar_el2,
            _ => self.sysregs.vbar_el3,
        } & !0x7FF;

        let elr = slot::ELR_EL1 + usize::from(target_el - 1);
        let spsr = slot::SPSR_EL1 + usize::from(target_el - 1);
        self.regs.set(elr, self.regs.get(slot::PC));
        let saved = self.a64_get_cpsr();
        self.regs.set(spsr, u64::from(saved));

        self.regs.set(slot::PC, address);

        self.pstate.rw = RegisterWidth::Rw64;
        self.pstate.jt = JtState::Arm;
        self.pstate.el = target_el;
        self.pstate.sp = true;

        self.pstate.d = true;
        self.pstate.a = true;
        self.pstate.i = true;
        self.pstate.f = true;

        self.pstate.it = 0;
        self.pstate.ss = false;
        self.pstate.il = false;

        if self.config.version >= ArmVersion::V81 {
            self.pstate.pan = self.sysregs.sctlr_el1 & SCTLR_SPAN != 0;
        }
    }

    /// AArch32 exception entry. A 26-bit configuration saves the combined
    /// PC+flags word into the banked R14 and has no SPSR to fill.
    pub(crate) fn a32_vector(&mut self, vector: u32, mode: Mode) {
        self.t32_advance_it();
        self.clear_exclusive();

        if !self.is_prog26() {
            let return_pc = self.regs.get(slot::PC) as u32;
            if mode == Mode::Hypervisor {
                self.regs.set(slot::ELR_HYP, u64::from(return_pc));
            } else {
                self.a32_set_mode(14, mode, return_pc);
            }
            if let Some(spsr) = crate::cpu::registers::a32_spsr_slot(mode) {
                let saved = self.a32_get_cpsr();
                self.regs.set(spsr, u64::from(saved));
            }
        } else {
            let packed = self.a26_get_pc();
            self.a32_set_mode(14, mode, packed);
        }

        let mut target = u64::from(vector);
        if self.sysregs.sctlr_el1 & SCTLR_V != 0 {
            target += 0xFFFF_0000;
        }
        self.regs.set(slot::PC, target);

        self.pstate.i = true;
        self.pstate.mode = mode;
        self.pstate.rw = if self.is_prog26() {
            RegisterWidth::Rw26
        } else {
            RegisterWidth::Rw32
        };
        if vector == A32_VECTOR_RESET || vector == A32_VECTOR_FIQ {
            self.pstate.f = true;
        }
        self.pstate.jt = if self.config.version >= ArmVersion::V7
            && self.sysregs.sctlr_el1 & SCTLR_TE != 0
        {
            JtState::Thumb
        } else {
            JtState::Arm
        };
        self.pstate.e =
            self.config.version >= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_EE != 0;
        if self.config.version >= ArmVersion::V6 {
            self.pstate.a = true;
        }
        self.pstate.it = 0;
        if self.config.version >= ArmVersion::V8 {
            self.pstate.ss = true;
            self.pstate.il = true;
        }
        if self.config.version >= ArmVersion::V81 {
            self.pstate.pan = self.sysregs.sctlr_el1 & SCTLR_SPAN != 0;
        }
    }

    /// The 26/32-bit mode a fault vectors into: pre-v3 parts lacked the
    /// dedicated Abort and Undefined modes.
    fn abort_class_mode(&self) -> Mode {
        if self.is_prog26() {
            Mode::Supervisor
        } else {
            Mode::Abort
        }
    }

    fn undefined_class_mode(&self) -> Mode {
        if self.is_prog26() {
            Mode::Supervisor
        } else {
            Mode::Undefined
        }
    }

    /// The instruction width to re-point PC past the faulting instruction.
    fn current_instruction_width(&self) -> u64 {
        match self.pstate.isa() {
            Isa::Arm26 | Isa::Arm32 => 4,
            Isa::Thumb | Isa::ThumbEe => 2,
            // Jazelle cannot issue an undefined-instruction exception, and
            // A64 never reaches the AArch32 entry path.
            Isa::Jazelle | Isa::Arm64 => 0,
        }
    }

    fn rewind_pc(&mut self) {
        self.regs.set(slot::PC, self.old_pc);
    }

    fn advance_pc(&mut self, displacement: u64) {
        let pc = self.regs.get(slot::PC);
        self.regs.set(slot::PC, pc.wrapping_add(displacement));
    }

    /// The catch site of every raised fault: either report it (capture
    /// mode) or perform the architectural entry sequence for its class.
    pub(crate) fn handle_exception(&mut self, kind: Exception) {
        logger::exception(self.old_pc, format_args!("{kind:?}"));
        match kind {
            Exception::Reset => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el3_supported {
                    if self.lowest_64bit_only_el <= 3 {
                        self.a64_vector(A64_VECTOR_SYNCHRONOUS, 3);
                    } else {
                        self.a32_vector(A32_VECTOR_RESET, Mode::Supervisor);
                    }
                } else if self.el2_supported {
                    if self.lowest_64bit_only_el <= 2 {
                        self.a64_vector(A64_VECTOR_SYNCHRONOUS, 2);
                    } else {
                        self.a32_vector(A32_VECTOR_RESET, Mode::Hypervisor);
                    }
                } else if self.lowest_64bit_only_el <= 1 {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, 1);
                } else {
                    self.a32_vector(A32_VECTOR_RESET, Mode::Supervisor);
                }
            }

            Exception::Undefined => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    let width = self.current_instruction_width();
                    self.advance_pc(width);
                    let mode = self.undefined_class_mode();
                    self.a32_vector(A32_VECTOR_UNDEFINED, mode);
                }
            }

            Exception::Svc => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    self.a32_vector(A32_VECTOR_SWI, Mode::Supervisor);
                }
            }

            Exception::Hvc => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(2) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(2));
                } else {
                    self.a32_vector(A32_VECTOR_SWI, Mode::Hypervisor);
                }
            }

            Exception::Smc => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(3) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, 3);
                } else {
                    self.a32_vector(A32_VECTOR_SWI, Mode::Monitor);
                }
            }

            Exception::PrefetchAbort => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    self.advance_pc(4);
                    let mode = self.abort_class_mode();
                    self.a32_vector(A32_VECTOR_PREFETCH_ABORT, mode);
                }
            }

            Exception::DataAbort => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    self.advance_pc(8);
                    let mode = self.abort_class_mode();
                    self.a32_vector(A32_VECTOR_DATA_ABORT, mode);
                }
            }

            Exception::Address26 => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else {
                    self.advance_pc(8);
                    self.a32_vector(A32_VECTOR_ADDRESS, Mode::Supervisor);
                }
            }

            Exception::Irq => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_IRQ, self.pstate.el.max(1));
                } else {
                    self.advance_pc(4);
                    self.a32_vector(A32_VECTOR_IRQ, Mode::Irq);
                }
            }

            Exception::Fiq => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_FIQ, self.pstate.el.max(1));
                } else {
                    self.advance_pc(4);
                    self.a32_vector(A32_VECTOR_FIQ, Mode::Fiq);
                }
            }

            Exception::SError => {
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SERROR, self.pstate.el.max(1));
                } else {
                    self.advance_pc(4);
                    self.a32_vector(A32_VECTOR_DATA_ABORT, Mode::Abort);
                }
            }

            Exception::Breakpoint => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    // Reported as a prefetch abort; not defined on 26-bit
                    // processors.
                    self.advance_pc(4);
                    self.a32_vector(A32_VECTOR_PREFETCH_ABORT, Mode::Abort);
                }
            }

            Exception::Unaligned => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    self.advance_pc(8);
                    let mode = self.abort_class_mode();
                    self.a32_vector(A32_VECTOR_DATA_ABORT, mode);
                }
            }

            Exception::UnalignedPc => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else if self.el_uses_aarch64(1) {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                } else {
                    self.advance_pc(4);
                    self.a32_vector(A32_VECTOR_PREFETCH_ABORT, Mode::Abort);
                }
            }

            Exception::UnalignedSp => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                }
            }

            Exception::SoftwareStep => {
                self.rewind_pc();
                if self.capture_breaks {
                    self.break_emulation(kind);
                } else {
                    self.a64_vector(A64_VECTOR_SYNCHRONOUS, self.pstate.el.max(1));
                }
            }

            Exception::JazelleTrap(index) => self.j32_break(index),
            Exception::JazellePrefetchAbort => self.j32_break(J32_EXCEPTION_PREFETCH_ABORT),

            Exception::ThumbEeNullPtr => {
                if self.capture_breaks {
                    self.result = StepResult::ThumbEeNullPtr;
                } else {
                    let pc = self.regs.get(slot::PC) as u32;
                    self.a32_set(A32_LR, pc | 1);
                    self.pstate.it = 0;
                    self.regs
                        .set(slot::PC, u64::from(self.sysregs.teehbr.wrapping_sub(4)));
                }
            }

            Exception::ThumbEeOutOfBounds => {
                if self.capture_breaks {
                    self.result = StepResult::ThumbEeOutOfBounds;
                } else {
                    let pc = self.regs.get(slot::PC) as u32;
                    self.a32_set(A32_LR, pc | 1);
                    self.pstate.it = 0;
                    self.regs
                        .set(slot::PC, u64::from(self.sysregs.teehbr.wrapping_sub(8)));
                }
            }
        }
    }

    /// Jazelle break: spill the register-cached stack, rewind to the
    /// faulting bytecode and enter the ARM handler table (or report).
    fn j32_break(&mut self, index: u32) {
        self.j32_spill_fast_stack();
        self.rewind_pc();
        if !self.capture_breaks {
            let pc = self.regs.get(slot::PC) as u32;
            self.a32_set(A32_LR, pc);
            self.pstate.jt = JtState::Arm;
            let handler_base = self.a32_get(crate::cpu::jazelle::J32_SHT) & 0xFFFF_F000;
            self.regs
                .set(slot::PC, u64::from(handler_base + (index << 2)));
        } else {
            self.result = Exception::JazelleTrap(index).into();
        }
    }

    /// AArch32 exception return: restore PC from the banked link register
    /// (ELR_hyp in Hyp mode) and the CPSR from the SPSR.
    pub(crate) fn a32_eret(&mut self) {
        if self.pstate.mode == Mode::Hypervisor {
            let elr = self.regs.get(slot::ELR_HYP);
            self.regs.set(slot::PC, elr);
        } else {
            let lr = self.regs.get(self.a32_slot_for(14, self.pstate.mode));
            self.regs.set(slot::PC, lr);
        }
        let spsr = self.a32_get_spsr();
        self.a32_set_cpsr(u32::MAX, spsr);
    }

    /// AArch64 exception return: PC from ELR_ELn, PSTATE from SPSR_ELn.
    pub(crate) fn a64_eret(&mut self) {
        let el = usize::from(self.pstate.el.max(1) - 1);
        let elr = self.regs.get(slot::ELR_EL1 + el);
        let spsr = self.regs.get(slot::SPSR_EL1 + el) as u32;
        self.regs.set(slot::PC, elr);
        self.a64_set_cpsr(spsr);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cpu::testing::core;

    #[test]
    fn capture_mode_reports_without_state_change() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.capture_breaks = true;
        cpu.pstate.mode = Mode::User;
        cpu.regs.set(slot::PC, 0x104);
        cpu.old_pc = 0x100;

        cpu.handle_exception(Exception::Svc);
        assert_eq!(cpu.result, StepResult::Svc);
        assert_eq!(cpu.pstate.mode, Mode::User);
    }

    #[test]
    fn svc_enters_supervisor_with_saved_state() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.pstate.mode = Mode::User;
        cpu.pstate.n = true;
        cpu.regs.set(slot::PC, 0x104);
        let cpsr_before = cpu.a32_get_cpsr();

        cpu.handle_exception(Exception::Svc);

        assert_eq!(cpu.pstate.mode, Mode::Supervisor);
        assert!(cpu.pstate.i);
        assert_eq!(cpu.regs.get(slot::PC), u64::from(A32_VECTOR_SWI));
        // LR_svc holds the return address, SPSR_svc the old CPSR.
        assert_eq!(cpu.a32_get_mode(14, Mode::Supervisor), 0x104);
        assert_eq!(cpu.regs.get(slot::SPSR_SVC) as u32, cpsr_before);
    }

    #[test]
    fn data_abort_return_address_is_pc_plus_8() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.pstate.mode = Mode::User;
        cpu.old_pc = 0x100;
        cpu.regs.set(slot::PC, 0x104); // advanced by fetch

        cpu.handle_exception(Exception::DataAbort);

        assert_eq!(cpu.pstate.mode, Mode::Abort);
        assert_eq!(cpu.a32_get_mode(14, Mode::Abort), 0x108);
        assert_eq!(cpu.regs.get(slot::PC), u64::from(A32_VECTOR_DATA_ABORT));
    }

    #[test]
    fn prefetch_abort_return_address_is_pc_plus_4() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.pstate.mode = Mode::User;
        cpu.old_pc = 0x100;
        cpu.regs.set(slot::PC, 0x104);

        cpu.handle_exception(Exception::PrefetchAbort);
        assert_eq!(cpu.a32_get_mode(14, Mode::Abort), 0x104);
    }

    #[test]
    fn fiq_masks_both_interrupts() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.regs.set(slot::PC, 0x100);

        cpu.handle_exception(Exception::Fiq);
        assert!(cpu.pstate.i);
        assert!(cpu.pstate.f);
        assert_eq!(cpu.pstate.mode, Mode::Fiq);

        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.handle_exception(Exception::Irq);
        assert!(cpu.pstate.i);
        assert!(!cpu.pstate.f);
    }

    #[test]
    fn high_vectors_follow_sctlr_v() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.sysregs.sctlr_el1 |= SCTLR_V;
        cpu.handle_exception(Exception::Svc);
        assert_eq!(
            cpu.regs.get(slot::PC),
            0xFFFF_0000 + u64::from(A32_VECTOR_SWI)
        );
    }

    #[test]
    fn thumb_vector_entry_follows_sctlr_te() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb]);
        cpu.set_isa(Isa::Arm32);
        cpu.sysregs.sctlr_el1 |= SCTLR_TE;
        cpu.handle_exception(Exception::Svc);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
    }

    #[test]
    fn undefined_on_26_bit_part_uses_svc() {
        let mut cpu = core(ArmVersion::V2, &[Isa::Arm26]);
        cpu.set_isa(Isa::Arm26);
        cpu.old_pc = 0x100;
        cpu.regs.set(slot::PC, 0x104);
        cpu.pstate.n = true;
        cpu.pstate.mode = Mode::User;

        cpu.handle_exception(Exception::Undefined);

        assert_eq!(cpu.pstate.mode, Mode::Supervisor);
        assert_eq!(cpu.pstate.rw, RegisterWidth::Rw26);
        // The banked R14 holds the packed PC+flags word.
        let packed = cpu.a32_get_mode(14, Mode::Supervisor);
        assert_eq!(packed & 0x03FF_FFFC, 0x104);
        assert!(packed & crate::cpu::psr::CPSR_N != 0);
    }

    #[test]
    fn a64_exception_from_el0_uses_lower_el_slot() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.pstate.el = 0;
        cpu.sysregs.vbar_el1 = 0x8_0000;
        cpu.regs.set(slot::PC, 0x4000);

        cpu.handle_exception(Exception::Svc);

        assert_eq!(cpu.pstate.el, 1);
        assert!(cpu.pstate.sp);
        assert!(cpu.pstate.d && cpu.pstate.a && cpu.pstate.i && cpu.pstate.f);
        // Lower EL, AArch64: base + 0x400 + 0x600? No: 0x400 for AArch32,
        // 0x600 for AArch64 origin. EL0 here is AArch64.
        assert_eq!(cpu.regs.get(slot::PC), 0x8_0000 + 0x600);
        assert_eq!(cpu.regs.get(slot::ELR_EL1), 0x4000);
    }

    #[test]
    fn a64_exception_same_el_with_sp_selected() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.pstate.el = 1;
        cpu.pstate.sp = true;
        cpu.sysregs.vbar_el1 = 0x8_0000;
        cpu.regs.set(slot::PC, 0x4000);

        cpu.handle_exception(Exception::Svc);
        assert_eq!(cpu.regs.get(slot::PC), 0x8_0000 + 0x200);
    }

    #[test]
    fn a64_eret_restores_saved_state() {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu.pstate.el = 0;
        cpu.pstate.z = true;
        cpu.regs.set(slot::PC, 0x4000);
        cpu.handle_exception(Exception::Svc);

        // Handler returns.
        cpu.a64_eret();
        assert_eq!(cpu.regs.get(slot::PC), 0x4000);
        assert_eq!(cpu.pstate.el, 0);
        assert!(cpu.pstate.z);
    }

    #[test]
    fn a32_eret_restores_spsr() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        cpu.pstate.mode = Mode::User;
        cpu.pstate.c = true;
        cpu.regs.set(slot::PC, 0x200);
        cpu.handle_exception(Exception::Irq);
        assert_eq!(cpu.pstate.mode, Mode::Irq);

        cpu.pstate.c = false;
        cpu.a32_eret();
        assert_eq!(cpu.pstate.mode, Mode::User);
        assert!(cpu.pstate.c);
        assert_eq!(cpu.regs.get(slot::PC), 0x204);
    }
}
