//! ALU primitives shared by the ARM and Thumb execution paths: the barrel
//! shifter with its carry side channel, the flag calculus and the operand-2
//! descriptors.
//!
//! Carry rules: logical operations take carry from the shifter, arithmetic
//! operations from the adder. The majority formula used here computes the
//! adder carry for any `res = op1 + op2 (+ carry-in)` without widening;
//! subtraction feeds the complemented second operand through the same
//! formula.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::core::ArmCore;
use crate::cpu::registers::A32_PC;

/// Barrel shifter operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftKind {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl From<u32> for ShiftKind {
    fn from(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

impl std::fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lsl => f.write_str("LSL"),
            Self::Lsr => f.write_str("LSR"),
            Self::Asr => f.write_str("ASR"),
            Self::Ror => f.write_str("ROR"),
        }
    }
}

/// How the second operand of a data-processing instruction is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluSecondOperandInfo {
    /// 8-bit immediate rotated right by an even amount.
    Immediate { base: u32, shift: u32 },
    /// Register with an immediate or register-specified shift.
    Register {
        register: u32,
        shift: ShiftOperator,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOperator {
    /// Shift by a constant; LSR/ASR/ROR encode 32 as 0.
    Immediate { kind: ShiftKind, amount: u32 },
    /// Shift by the low byte of a register.
    Register { kind: ShiftKind, register: u32 },
    /// Rotate right with extend (ROR #0 encoding).
    Rrx,
}

impl std::fmt::Display for AluSecondOperandInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate { base, shift } => {
                write!(f, "#{}", base.rotate_right(*shift))
            }
            Self::Register { register, shift } => match shift {
                ShiftOperator::Immediate { kind, amount } => {
                    if *amount == 0 && *kind == ShiftKind::Lsl {
                        write!(f, "R{register}")
                    } else {
                        write!(f, "R{register}, {kind} #{amount}")
                    }
                }
                ShiftOperator::Register { kind, register: rs } => {
                    write!(f, "R{register}, {kind} R{rs}")
                }
                ShiftOperator::Rrx => write!(f, "R{register}, RRX"),
            },
        }
    }
}

/// Decodes the operand-2 field of a register-form data-processing opcode.
#[must_use]
pub fn decode_register_operand(opcode: u32) -> AluSecondOperandInfo {
    let register = opcode.get_bits(0..=3);
    let shift = if opcode.get_bits(4..=11) == 0 {
        ShiftOperator::Immediate {
            kind: ShiftKind::Lsl,
            amount: 0,
        }
    } else if opcode.get_bits(4..=11) == 0b0000_0110 {
        ShiftOperator::Rrx
    } else if opcode.get_bit(4) {
        ShiftOperator::Register {
            kind: ShiftKind::from(opcode.get_bits(5..=6)),
            register: opcode.get_bits(8..=11),
        }
    } else {
        let mut amount = opcode.get_bits(7..=11);
        let kind = ShiftKind::from(opcode.get_bits(5..=6));
        if amount == 0 && kind != ShiftKind::Lsl {
            // LSR/ASR/ROR encode a 32-bit shift as zero (ROR #0 is RRX and
            // was handled above).
            amount = 32;
        }
        ShiftOperator::Immediate { kind, amount }
    };
    AluSecondOperandInfo::Register { register, shift }
}

impl ArmCore {
    pub(crate) fn a32_lsl(&mut self, value: u32, amount: u32, store_carry: bool) -> u32 {
        if amount == 0 {
            return value;
        }
        if store_carry {
            self.pstate.c = amount <= 32 && (value >> (32 - amount)) & 1 != 0;
        }
        if amount < 32 {
            value << amount
        } else {
            0
        }
    }

    pub(crate) fn a32_lsr(&mut self, value: u32, amount: u32, store_carry: bool) -> u32 {
        if amount == 0 {
            return value;
        }
        if store_carry {
            self.pstate.c = amount <= 32 && (value >> (amount - 1)) & 1 != 0;
        }
        if amount < 32 {
            value >> amount
        } else {
            0
        }
    }

    pub(crate) fn a32_asr(&mut self, value: u32, amount: u32, store_carry: bool) -> u32 {
        if amount == 0 {
            return value;
        }
        if store_carry {
            let bit = if amount <= 32 {
                (value >> (amount - 1)) & 1
            } else {
                value >> 31
            };
            self.pstate.c = bit != 0;
        }
        if amount < 32 {
            ((value as i32) >> amount) as u32
        } else {
            ((value as i32) >> 31) as u32
        }
    }

    pub(crate) fn a32_ror(&mut self, value: u32, amount: u32, store_carry: bool) -> u32 {
        if amount == 0 {
            return value;
        }
        let amount = amount & 0x1F;
        if store_carry {
            if amount == 0 {
                self.pstate.c = value.get_bit(31);
            } else {
                self.pstate.c = (value >> (amount - 1)) & 1 != 0;
            }
        }
        value.rotate_right(amount)
    }

    pub(crate) fn a32_rrx(&mut self, value: u32, store_carry: bool) -> u32 {
        let carry_in = u32::from(self.pstate.c);
        if store_carry {
            self.pstate.c = value & 1 != 0;
        }
        (value >> 1) | (carry_in << 31)
    }

    pub(crate) fn a32_shift(
        &mut self,
        kind: ShiftKind,
        value: u32,
        amount: u32,
        store_carry: bool,
    ) -> u32 {
        match kind {
            ShiftKind::Lsl => self.a32_lsl(value, amount, store_carry),
            ShiftKind::Lsr => self.a32_lsr(value, amount, store_carry),
            ShiftKind::Asr => self.a32_asr(value, amount, store_carry),
            ShiftKind::Ror => self.a32_ror(value, amount, store_carry),
        }
    }

    /// Evaluates an operand-2 descriptor against the current state,
    /// optionally updating the shifter carry.
    pub(crate) fn a32_shifter_operand(
        &mut self,
        operand: AluSecondOperandInfo,
        store_carry: bool,
    ) -> u32 {
        match operand {
            AluSecondOperandInfo::Immediate { base, shift } => {
                let value = base.rotate_right(shift);
                if store_carry && shift != 0 {
                    self.pstate.c = value.get_bit(31);
                }
                value
            }
            AluSecondOperandInfo::Register { register, shift } => {
                let mut value = self.a32_get(register);
                match shift {
                    ShiftOperator::Immediate { kind, amount } => {
                        self.a32_shift(kind, value, amount, store_carry)
                    }
                    ShiftOperator::Register { kind, register: rs } => {
                        // R15 as the shifted operand of a shift-by-register
                        // reads a further word ahead on v2-class cores.
                        if register == A32_PC {
                            value = value.wrapping_add(self.register_shift_pc_offset());
                        }
                        let amount = self.a32_get(rs) & 0xFF;
                        if amount == 0 {
                            value
                        } else {
                            self.a32_shift(kind, value, amount, store_carry)
                        }
                    }
                    ShiftOperator::Rrx => self.a32_rrx(value, store_carry),
                }
            }
        }
    }

    /// The pre-v5 extra PC displacement in shift-by-register forms.
    #[must_use]
    pub(crate) fn register_shift_pc_offset(&self) -> u32 {
        if self.config.version >= crate::config::ArmVersion::V5 {
            0
        } else {
            4
        }
    }

    // --------------------------------------------------------------
    // Flag calculus
    // --------------------------------------------------------------

    pub(crate) fn a32_test_nz(&mut self, res: u32) {
        self.pstate.z = res == 0;
        self.pstate.n = res.get_bit(31);
    }

    /// N/Z/C/V for an addition-shaped result (`res = op1 + op2 + cin`).
    pub(crate) fn a32_test_nzcv(&mut self, res: u32, op1: u32, op2: u32) {
        self.pstate.c = ((op1 & op2) | (op1 & !res) | (op2 & !res)).get_bit(31);
        self.pstate.v = ((op1 & op2 & !res) | (!op1 & !op2 & res)).get_bit(31);
        self.a32_test_nz(res);
    }

    /// NZ update that turns into the SPSR/flag-word restore when the
    /// destination is R15.
    pub(crate) fn a32_or_a26_test_nz(&mut self, res: u32, destination_is_pc: bool) {
        if destination_is_pc {
            self.a32_copy_flags_or_spsr(res);
        } else {
            self.a32_test_nz(res);
        }
    }

    pub(crate) fn a32_or_a26_test_nzcv(
        &mut self,
        res: u32,
        op1: u32,
        op2: u32,
        destination_is_pc: bool,
    ) {
        if destination_is_pc {
            self.a32_copy_flags_or_spsr(res);
        } else {
            self.a32_test_nzcv(res, op1, op2);
        }
    }

    /// Clears (ARM) or sets (Thumb) bit 0 so a subsequent interworking
    /// assignment keeps the current state; flag-setting arithmetic to R15
    /// already replaced the CPSR, so the bit carries no information.
    #[must_use]
    pub(crate) fn a32_avoid_interworking(&self, value: u32) -> u32 {
        match self.pstate.jt {
            crate::cpu::pstate::JtState::Arm => value & !1,
            _ => value | 1,
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
    fn lsl_carry_out() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        assert_eq!(cpu.a32_lsl(0x8000_0001, 1, true), 2);
        assert!(cpu.pstate.c);

        assert_eq!(cpu.a32_lsl(1, 32, true), 0);
        assert!(cpu.pstate.c);

        assert_eq!(cpu.a32_lsl(1, 33, true), 0);
        assert!(!cpu.pstate.c);

        // Zero shift leaves the carry alone.
        cpu.pstate.c = true;
        assert_eq!(cpu.a32_lsl(5, 0, true), 5);
        assert!(cpu.pstate.c);
    }

    #[test]
    fn asr_saturates_to_sign() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        assert_eq!(cpu.a32_asr(0x8000_0000, 40, true), 0xFFFF_FFFF);
        assert!(cpu.pstate.c);
        assert_eq!(cpu.a32_asr(0x4000_0000, 40, true), 0);
        assert!(!cpu.pstate.c);
    }

    #[test]
    fn ror_then_counter_rotation_is_identity() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        let value = 0xDEAD_BEEF;
        for amount in 1..32 {
            let rotated = cpu.a32_ror(value, amount, false);
            assert_eq!(cpu.a32_ror(rotated, 32 - amount, false), value);
        }
    }

    #[test]
    fn rrx_threads_the_carry() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.pstate.c = true;
        assert_eq!(cpu.a32_rrx(2, true), 0x8000_0001);
        assert!(!cpu.pstate.c);
    }

    #[test]
    fn immediate_operand_carry_needs_rotation() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.pstate.c = false;
        let value = cpu.a32_shifter_operand(
            AluSecondOperandInfo::Immediate { base: 0xFF, shift: 8 },
            true,
        );
        assert_eq!(value, 0xFF00_0000);
        assert!(cpu.pstate.c);

        cpu.pstate.c = true;
        let value = cpu.a32_shifter_operand(
            AluSecondOperandInfo::Immediate { base: 0x0F, shift: 0 },
            true,
        );
        assert_eq!(value, 0x0F);
        // Unrotated immediates leave the carry alone.
        assert!(cpu.pstate.c);
    }

    #[test]
    fn shift_by_register_uses_low_byte() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        cpu.a32_set(1, 0xF0);
        cpu.a32_set(2, 0x0000_0100); // low byte zero: no shift, carry kept
        cpu.pstate.c = true;

        let operand = AluSecondOperandInfo::Register {
            register: 1,
            shift: ShiftOperator::Register {
                kind: ShiftKind::Lsl,
                register: 2,
            },
        };
        assert_eq!(cpu.a32_shifter_operand(operand, true), 0xF0);
        assert!(cpu.pstate.c);
    }

    #[test]
    fn addition_flags() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        let res = 0x7FFF_FFFFu32.wrapping_add(1);
        cpu.a32_test_nzcv(res, 0x7FFF_FFFF, 1);
        assert!(cpu.pstate.n);
        assert!(cpu.pstate.v);
        assert!(!cpu.pstate.c);
        assert!(!cpu.pstate.z);

        let res = 0xFFFF_FFFFu32.wrapping_add(1);
        cpu.a32_test_nzcv(res, 0xFFFF_FFFF, 1);
        assert!(cpu.pstate.c);
        assert!(cpu.pstate.z);
        assert!(!cpu.pstate.v);
    }

    #[test]
    fn subtraction_flags_via_complement() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32]);
        // 5 - 3: no borrow means carry set.
        let res = 5u32.wrapping_sub(3);
        cpu.a32_test_nzcv(res, 5, !3);
        assert!(cpu.pstate.c);
        assert!(!cpu.pstate.n);

        // 3 - 5 borrows: carry clear, negative.
        let res = 3u32.wrapping_sub(5);
        cpu.a32_test_nzcv(res, 3, !5);
        assert!(!cpu.pstate.c);
        assert!(cpu.pstate.n);
    }

    #[test]
    fn register_operand_decoding() {
        // Plain register.
        assert_eq!(
            decode_register_operand(0x0000_0003),
            AluSecondOperandInfo::Register {
                register: 3,
                shift: ShiftOperator::Immediate {
                    kind: ShiftKind::Lsl,
                    amount: 0
                },
            }
        );
        // LSR #32 encoded as zero.
        assert_eq!(
            decode_register_operand(0x0000_0023),
            AluSecondOperandInfo::Register {
                register: 3,
                shift: ShiftOperator::Immediate {
                    kind: ShiftKind::Lsr,
                    amount: 32
                },
            }
        );
        // RRX.
        assert_eq!(
            decode_register_operand(0x0000_0063),
            AluSecondOperandInfo::Register {
                register: 3,
                shift: ShiftOperator::Rrx,
            }
        );
        // Shift by register.
        assert_eq!(
            decode_register_operand(0x0000_0413),
            AluSecondOperandInfo::Register {
                register: 3,
                shift: ShiftOperator::Register {
                    kind: ShiftKind::Lsl,
                    register: 4
                },
            }
        );
    }
}
