//! # The CPU core
//!
//! One [`core::ArmCore`] interprets every instruction set its configuration
//! enables. The module layout follows the data flow of a single step:
//!
//! - [`core`] - state container, fetch, the step dispatcher
//! - [`pstate`] / [`psr`] - the unpacked processor state, its condition
//!   vocabulary and its CPSR view
//! - [`registers`] - the flat banked register file
//! - [`cpu_modes`] - the AArch32 mode vocabulary
//! - [`arm`], [`thumb`], [`a64`], [`jazelle`] - the per-ISA decoders and
//!   their execution routines
//! - [`exception`] - fault classification and vectoring
//! - [`coprocessor`] - the 16-slot coprocessor gateway (system control,
//!   debug/Jazelle control, VFP and FPA register banks)
//! - [`sysregs`] - system register storage and identification registers
//! - [`debug`] - serializable state snapshots for external debuggers

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod a64;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_lossless)]
pub mod arm;

pub mod coprocessor;

#[allow(clippy::cast_possible_truncation)]
pub mod core;
pub mod cpu_modes;
pub mod debug;
pub mod exception;
pub mod flags;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod jazelle;
pub mod pstate;

#[allow(clippy::cast_possible_truncation)]
pub mod psr;
pub mod registers;
pub mod sysregs;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod thumb;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use crate::config::{ArmConfig, ArmVersion, Isa, IsaSet};
    use crate::cpu::core::ArmCore;
    use crate::memory::SystemMemory;

    /// A core over 128 KiB of RAM at address zero, enough for every test.
    pub(crate) fn core(version: ArmVersion, isas: &[Isa]) -> ArmCore {
        let memory = Arc::new(Mutex::new(SystemMemory::new(0, 0x2_0000)));
        ArmCore::new(ArmConfig::new(version), IsaSet::of(isas), memory).unwrap()
    }
}
