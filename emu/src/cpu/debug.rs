//! Serializable core snapshots for external debuggers.
//!
//! A [`DebugState`] captures everything a register/status printer needs:
//! every physical register slot, the packed CPSR view, the unpacked
//! PSTATE, the floating-point banks, the top of the Jazelle operand stack
//! and the advisory memory-change range. Snapshots are plain data, so a
//! host can serialize them or diff two of them to drive a "changed since
//! last stop" display.

use serde::{Deserialize, Serialize};

use crate::config::Isa;
use crate::cpu::coprocessor::{FpaBank, VfpBank};
use crate::cpu::core::ArmCore;
use crate::cpu::jazelle::{J32_SHT, J32_TOS};
use crate::cpu::pstate::{Pstate, RegisterWidth};
use crate::cpu::registers::slot;
use crate::memory::endian;

#[derive(Clone, Serialize, Deserialize)]
pub struct DebugState {
    /// Every physical register slot, banked copies included.
    pub registers: Vec<u64>,
    /// The packed CPSR as software would read it (A64 SPSR format when in
    /// 64-bit state).
    pub cpsr: u32,
    pub pstate: Pstate,
    pub isa: Isa,
    /// FPA registers, when the part carries the coprocessor.
    pub fpa: Option<FpaBank>,
    /// VFP lanes with the per-pair format map ("last written as D").
    pub vfp: Option<VfpBank>,
    /// The four top Jazelle operand-stack words, top first.
    pub jazelle_stack: [u32; 4],
    /// The Jazelle view of R5 (handler base + cache bits) and TOS.
    pub jazelle_control: u32,
    pub jazelle_tos: u32,
    /// Advisory (lowest, highest) range touched by writes.
    pub memory_change: Option<(u64, u64)>,
}

/// Field-wise difference between two snapshots.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DebugDiff {
    /// (slot, before, after) for every changed register.
    pub registers: Vec<(usize, u64, u64)>,
    pub cpsr: Option<(u32, u32)>,
    pub memory_change: Option<(u64, u64)>,
}

impl DebugState {
    /// What changed between `self` (before) and `after`.
    #[must_use]
    pub fn diff(&self, after: &DebugState) -> DebugDiff {
        let mut registers = Vec::new();
        for index in 0..slot::COUNT {
            if self.registers[index] != after.registers[index] {
                registers.push((index, self.registers[index], after.registers[index]));
            }
        }
        DebugDiff {
            registers,
            cpsr: (self.cpsr != after.cpsr).then_some((self.cpsr, after.cpsr)),
            memory_change: after.memory_change,
        }
    }
}

impl ArmCore {
    /// Captures the complete observable state. The Jazelle stack view is
    /// assembled from the register cache and memory without disturbing
    /// either.
    #[must_use]
    pub fn get_debug_state(&self) -> DebugState {
        let cpsr = match self.pstate.rw {
            RegisterWidth::Rw64 => self.a64_get_cpsr(),
            _ => self.a32_get_cpsr(),
        };

        let mut jazelle_stack = [0u32; 4];
        let cached = u32::from(self.jstack.count);
        let tos = self.a32_get_mode(J32_TOS, self.pstate.mode);
        let endianness = self.a32_data_endianness();
        for (depth, slot_value) in jazelle_stack.iter_mut().enumerate() {
            let depth = depth as u32;
            *slot_value = if depth < cached {
                self.a32_get_mode(self.jstack.element_register(depth), self.pstate.mode)
            } else {
                let address = tos.wrapping_sub(4 * (1 + depth - cached));
                let mut memory = self.memory.lock().unwrap();
                endian::read32(&mut *memory, u64::from(address), endianness, true).unwrap_or(0)
            };
        }

        let control = (self.a32_get_mode(J32_SHT, self.pstate.mode) & !0x1F)
            | self.jstack.r5_bits();

        DebugState {
            registers: self.regs.snapshot().to_vec(),
            cpsr,
            pstate: self.pstate,
            isa: self.pstate.isa(),
            fpa: self
                .config
                .features
                .has(crate::config::ArmFeature::Fpa)
                .then(|| self.fpa.clone()),
            vfp: self
                .config
                .supports_vfp_registers()
                .then(|| self.vfp.clone()),
            jazelle_stack,
            jazelle_control: control,
            jazelle_tos: tos,
            memory_change: self.memory_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ArmVersion, Isa};
    use crate::cpu::testing::core;

    #[test]
    fn snapshot_diff_tracks_register_writes() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.set_isa(Isa::Arm32);
        let before = cpu.get_debug_state();

        cpu.a32_set(3, 0x1234);
        cpu.pstate.n = true;
        let after = cpu.get_debug_state();

        let diff = before.diff(&after);
        assert_eq!(diff.registers, vec![(3, 0, 0x1234)]);
        assert!(diff.cpsr.is_some());
    }

    #[test]
    fn snapshot_sees_cached_jazelle_stack() {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Jazelle]);
        cpu.set_isa(Isa::Jazelle);
        cpu.a32_set(crate::cpu::jazelle::J32_TOS, 0x4000);
        for value in [0x11u32, 0x22, 0x33, 0x44, 0x55] {
            cpu.j32_push_word(value).unwrap();
        }

        let state = cpu.get_debug_state();
        assert_eq!(state.jazelle_stack, [0x55, 0x44, 0x33, 0x22]);
        assert_eq!(state.jazelle_tos, 0x4004);
        assert_eq!(state.jazelle_control & 0x1C, 4 << 2);
        // Taking the snapshot disturbed nothing.
        assert_eq!(cpu.j32_pop_word().unwrap(), 0x55);
    }

    #[test]
    fn snapshot_carries_vfp_when_featured() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        assert!(cpu.get_debug_state().vfp.is_none());

        cpu.config.features.insert(crate::config::ArmFeature::Vfp);
        cpu.vfp.set_d(2, 0x4000_0000_0000_0000);
        let state = cpu.get_debug_state();
        let vfp = state.vfp.unwrap();
        assert_eq!(vfp.d(2), 0x4000_0000_0000_0000);
        assert!(crate::bitwise::Bits::get_bit(vfp.format_bits, 2));
    }
}
