//! ARM (A32/A26) instruction execution.
//!
//! The load/store primitives here are shared with the Thumb path, which
//! decodes to the same operations with restricted operands. Memory access
//! legality follows the configured generation: the strict-alignment trap
//! (SCTLR.A), the rotated unaligned loads of v6-and-earlier (SCTLR.U
//! clear), the 26-bit address exception, and the ThumbEE null-pointer
//! check all live in these primitives.

use crate::bitwise::{sign_extend32, Bits};
use crate::config::{ArmFeature, ArmVersion};
use crate::cpu::arm::alu::AluSecondOperandInfo;
use crate::cpu::arm::instructions::{
    ArmAluOp, ArmInstruction, ArmOpcode, BitFieldKind, ExclusiveVariant, ExtendKind,
    HalfwordMultiplyVariant, MultiplyLongVariant, MultiplyVariant, ParallelClass, ParallelOp,
    PsrKind, PsrOpKind, ReverseKind, SaturatingVariant, SingleDataTransferOffsetInfo,
};
use crate::cpu::core::ArmCore;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::exception::{Exception, ExecResult};
use crate::cpu::flags::{
    HalfwordOffsetKind, HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, ReadWriteKind,
};
use crate::cpu::pstate::JtState;
use crate::cpu::psr::psr_field_mask;
use crate::cpu::registers::{slot, A32_LR, A32_PC};
use crate::cpu::sysregs::{SCTLR_A, SCTLR_U};

impl ArmCore {
    /// One ARM26/ARM32 step: fetch, decode, predicate, execute.
    pub(crate) fn a32_step(&mut self) {
        self.old_pc = self.regs.get(slot::PC);
        if let Err(kind) = self.a32_step_inner() {
            self.handle_exception(kind);
        }
    }

    fn a32_step_inner(&mut self) -> ExecResult {
        let raw = self.a32_fetch32()?;
        let opcode = ArmOpcode::decode(raw, &self.config);

        let isa = if self.is_arm26() { "ARM26" } else { "ARM" };
        logger::instruction(self.old_pc, isa, &opcode);

        if !self.pstate.check_condition(opcode.condition) {
            return Ok(());
        }
        self.execute_arm(opcode)
    }

    pub(crate) fn execute_arm(&mut self, opcode: ArmOpcode) -> ExecResult {
        let raw = opcode.raw;
        match opcode.instruction {
            ArmInstruction::DataProcessing {
                alu_instruction,
                set_conditions,
                rn,
                destination,
                op2,
            } => self.a32_data_processing(alu_instruction, set_conditions, rn, destination, op2),
            ArmInstruction::Multiply {
                variant,
                set_conditions,
                rd,
                rn,
                rs,
                rm,
            } => self.a32_multiply(variant, set_conditions, rd, rn, rs, rm),
            ArmInstruction::MultiplyLong {
                variant,
                set_conditions,
                rdhi,
                rdlo,
                rs,
                rm,
            } => self.a32_multiply_long(variant, set_conditions, rdhi, rdlo, rs, rm),
            ArmInstruction::HalfwordMultiply {
                variant,
                rd,
                rn,
                rs,
                rm,
                x,
                y,
            } => self.a32_halfword_multiply(variant, rd, rn, rs, rm, x, y),
            ArmInstruction::Saturating { variant, rd, rn, rm } => {
                self.a32_saturating(variant, rd, rn, rm)
            }
            ArmInstruction::CountLeadingZeros { rd, rm } => {
                let value = self.a32_get(rm).leading_zeros();
                self.a32_set(rd, value);
                Ok(())
            }
            ArmInstruction::PsrTransfer { psr, kind } => self.a32_psr_transfer(psr, kind),
            ArmInstruction::BranchAndExchange { register } => {
                let target = self.a32_get(register);
                self.a32_set_pc_interworking(target);
                Ok(())
            }
            ArmInstruction::BranchLinkExchangeRegister { register } => {
                let target = self.a32_get(register);
                let link = self.regs.get(slot::PC) as u32;
                self.a32_set(A32_LR, link);
                self.a32_set_pc_interworking(target);
                Ok(())
            }
            ArmInstruction::BranchAndExchangeJazelle { register } => self.a32_bxj(register),
            ArmInstruction::Branch { link, offset } => {
                let target = self.a32_get(A32_PC).wrapping_add(offset as u32);
                if link {
                    let return_address = self.regs.get(slot::PC) as u32;
                    self.a32_set(A32_LR, return_address);
                }
                self.a32_set(A32_PC, target);
                Ok(())
            }
            ArmInstruction::BranchLinkExchangeImmediate { offset } => {
                let target = self.a32_get(A32_PC).wrapping_add(offset as u32);
                let return_address = self.regs.get(slot::PC) as u32;
                self.a32_set(A32_LR, return_address);
                self.pstate.jt = self.filter_jt(JtState::Thumb);
                self.a32_set_pc(target);
                Ok(())
            }
            ArmInstruction::SingleDataTransfer {
                kind,
                quantity,
                translation,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset_info,
            } => {
                let offset_value = match offset_info {
                    SingleDataTransferOffsetInfo::Immediate { offset } => offset,
                    SingleDataTransferOffsetInfo::RegisterShift { register, shift } => self
                        .a32_shifter_operand(
                            AluSecondOperandInfo::Register { register, shift },
                            false,
                        ),
                };
                let offset = match offsetting {
                    Offsetting::Up => offset_value,
                    Offsetting::Down => offset_value.wrapping_neg(),
                };
                let preindexed = indexing == Indexing::Pre;
                let write_back = write_back || indexing == Indexing::Post;
                match (kind, quantity) {
                    (LoadStoreKind::Load, ReadWriteKind::Word) => {
                        let value = self.a32_ldr(
                            base_register,
                            offset,
                            preindexed,
                            write_back,
                            translation,
                        )?;
                        self.a32_set_interworking_v5(rd, value);
                    }
                    (LoadStoreKind::Load, ReadWriteKind::Byte) => {
                        let value = self.a32_ldrb(
                            base_register,
                            offset,
                            preindexed,
                            write_back,
                            translation,
                        )?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Word) => {
                        let value = self.a32_get_str(rd);
                        self.a32_str(
                            value,
                            base_register,
                            offset,
                            preindexed,
                            write_back,
                            translation,
                        )?;
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Byte) => {
                        let value = self.a32_get_str(rd);
                        self.a32_strb(
                            value,
                            base_register,
                            offset,
                            preindexed,
                            write_back,
                            translation,
                        )?;
                    }
                }
                Ok(())
            }
            ArmInstruction::HalfwordDataTransfer {
                kind,
                transfer,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset,
            } => {
                let offset_value = match offset {
                    HalfwordOffsetKind::Immediate { offset } => offset,
                    HalfwordOffsetKind::Register { register } => self.a32_get(register),
                };
                let offset = match offsetting {
                    Offsetting::Up => offset_value,
                    Offsetting::Down => offset_value.wrapping_neg(),
                };
                let preindexed = indexing == Indexing::Pre;
                let write_back = write_back || indexing == Indexing::Post;
                match (kind, transfer) {
                    (LoadStoreKind::Load, HalfwordTransferKind::UnsignedHalfword) => {
                        let value =
                            self.a32_ldrh(base_register, offset, preindexed, write_back, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Load, HalfwordTransferKind::SignedByte) => {
                        let value =
                            self.a32_ldrsb(base_register, offset, preindexed, write_back, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Load, HalfwordTransferKind::SignedHalfword) => {
                        let value =
                            self.a32_ldrsh(base_register, offset, preindexed, write_back, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Store, _) => {
                        let value = self.a32_get_str(rd);
                        self.a32_strh(
                            value,
                            base_register,
                            offset,
                            preindexed,
                            write_back,
                            false,
                        )?;
                    }
                }
                Ok(())
            }
            ArmInstruction::DoublewordDataTransfer {
                kind,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset,
            } => {
                let offset_value = match offset {
                    HalfwordOffsetKind::Immediate { offset } => offset,
                    HalfwordOffsetKind::Register { register } => self.a32_get(register),
                };
                let offset = match offsetting {
                    Offsetting::Up => offset_value,
                    Offsetting::Down => offset_value.wrapping_neg(),
                };
                let preindexed = indexing == Indexing::Pre;
                let write_back = write_back || indexing == Indexing::Post;
                match kind {
                    LoadStoreKind::Load => {
                        self.a32_ldrd(rd, rd + 1, base_register, offset, preindexed, write_back)
                    }
                    LoadStoreKind::Store => {
                        self.a32_strd(rd, rd + 1, base_register, offset, preindexed, write_back)
                    }
                }
            }
            ArmInstruction::BlockDataTransfer {
                kind,
                indexing,
                offsetting,
                load_psr,
                write_back,
                rn,
                register_list,
            } => {
                let upward = offsetting == Offsetting::Up;
                let before = indexing == Indexing::Pre;
                match kind {
                    LoadStoreKind::Load => self.a32_ldm(
                        register_list,
                        rn,
                        upward,
                        before,
                        write_back,
                        load_psr,
                    ),
                    LoadStoreKind::Store => self.a32_stm(
                        register_list,
                        rn,
                        upward,
                        before,
                        write_back,
                        load_psr,
                    ),
                }
            }
            ArmInstruction::SingleDataSwap { byte, rd, rm, rn } => {
                self.a32_swap(byte, rd, rm, rn)
            }
            ArmInstruction::Exclusive { variant, rd, rm, rn } => {
                self.a32_exclusive(variant, rd, rm, rn)
            }
            ArmInstruction::ReturnFromException {
                rn,
                indexing,
                offsetting,
                write_back,
            } => self.a32_rfe(
                rn,
                offsetting == Offsetting::Up,
                indexing == Indexing::Pre,
                write_back,
            ),
            ArmInstruction::SaveReturnState {
                mode,
                indexing,
                offsetting,
                write_back,
            } => self.a32_srs(
                mode,
                offsetting == Offsetting::Up,
                indexing == Indexing::Pre,
                write_back,
            ),
            ArmInstruction::MoveHalfword { top, rd, immediate } => {
                let value = if top {
                    (self.a32_get(rd) & 0xFFFF) | (immediate << 16)
                } else {
                    immediate
                };
                self.a32_set(rd, value);
                Ok(())
            }
            ArmInstruction::ParallelAddSub { class, op, rd, rn, rm } => {
                self.a32_parallel_add_sub(class, op, rd, rn, rm)
            }
            ArmInstruction::Extend {
                kind,
                rd,
                rn,
                rm,
                rotation,
            } => {
                let rotated = self.a32_get(rm).rotate_right(rotation);
                let extended = match kind {
                    ExtendKind::Sxtb => sign_extend32(8, rotated & 0xFF),
                    ExtendKind::Sxth => sign_extend32(16, rotated & 0xFFFF),
                    ExtendKind::Uxtb => rotated & 0xFF,
                    ExtendKind::Uxth => rotated & 0xFFFF,
                };
                let value = if rn == 0xF {
                    extended
                } else {
                    self.a32_get(rn).wrapping_add(extended)
                };
                self.a32_set(rd, value);
                Ok(())
            }
            ArmInstruction::Reverse { kind, rd, rm } => {
                let value = self.a32_get(rm);
                let result = match kind {
                    ReverseKind::Rev => value.swap_bytes(),
                    ReverseKind::Rev16 => ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF),
                    ReverseKind::Revsh => {
                        sign_extend32(16, ((value & 0xFF) << 8) | ((value >> 8) & 0xFF))
                    }
                    ReverseKind::Rbit => value.reverse_bits(),
                };
                self.a32_set(rd, result);
                Ok(())
            }
            ArmInstruction::BitField {
                kind,
                rd,
                rn,
                lsb,
                msb_or_width,
            } => {
                let result = match kind {
                    BitFieldKind::Bfc => {
                        let msb = msb_or_width;
                        let mask = field_mask(lsb, msb);
                        self.a32_get(rd) & !mask
                    }
                    BitFieldKind::Bfi => {
                        let msb = msb_or_width;
                        let mask = field_mask(lsb, msb);
                        (self.a32_get(rd) & !mask) | ((self.a32_get(rn) << lsb) & mask)
                    }
                    BitFieldKind::Sbfx => {
                        let width = msb_or_width + 1;
                        sign_extend32(width, (self.a32_get(rn) >> lsb) & low_mask(width))
                    }
                    BitFieldKind::Ubfx => {
                        let width = msb_or_width + 1;
                        (self.a32_get(rn) >> lsb) & low_mask(width)
                    }
                };
                self.a32_set(rd, result);
                Ok(())
            }
            ArmInstruction::SetEndianness { big } => {
                self.pstate.e = big;
                Ok(())
            }
            ArmInstruction::ChangeProcessorState {
                imod,
                change_mode,
                aif,
                mode,
            } => {
                if self.is_privileged() {
                    if imod == 0b10 || imod == 0b11 {
                        let enable = imod == 0b10;
                        if aif.get_bit(2) {
                            self.pstate.a = !enable;
                        }
                        if aif.get_bit(1) {
                            self.pstate.i = !enable;
                        }
                        if aif.get_bit(0) {
                            self.pstate.f = !enable;
                        }
                    }
                    if change_mode {
                        if let Ok(mode) = Mode::try_from(mode) {
                            self.pstate.mode = mode;
                        }
                    }
                }
                Ok(())
            }
            ArmInstruction::ExceptionReturn => {
                self.a32_eret();
                Ok(())
            }
            ArmInstruction::SoftwareInterrupt { .. } => Err(Exception::Svc),
            ArmInstruction::Breakpoint { .. } => Err(Exception::Breakpoint),
            ArmInstruction::ClearExclusive => {
                self.clear_exclusive();
                Ok(())
            }
            ArmInstruction::CoprocessorDataTransfer {
                kind: _,
                indexing,
                offsetting,
                write_back,
                coprocessor,
                crd: _,
                base_register,
                offset,
            } => {
                let offset = match offsetting {
                    Offsetting::Up => offset,
                    Offsetting::Down => offset.wrapping_neg(),
                };
                self.a32_perform_ldc_stc(
                    raw,
                    coprocessor as usize,
                    base_register,
                    offset,
                    indexing == Indexing::Pre,
                    write_back || indexing == Indexing::Post,
                )
            }
            ArmInstruction::CoprocessorDataOperation { coprocessor } => {
                self.coproc_cdp(coprocessor as usize, raw)
            }
            ArmInstruction::CoprocessorRegisterTransfer {
                kind,
                coprocessor,
                rd,
            } => match kind {
                LoadStoreKind::Store => {
                    let mut value = self.a32_get(rd);
                    if rd == A32_PC {
                        value = value.wrapping_add(self.mcr_pc_offset());
                    }
                    self.coproc_mcr(coprocessor as usize, raw, value)
                }
                LoadStoreKind::Load => {
                    let value = self.coproc_mrc(coprocessor as usize, raw)?;
                    if rd == A32_PC {
                        // MRC to R15 transfers the top nibble into the flags.
                        self.a32_set_cpsr_nzcv(value);
                    } else {
                        self.a32_set(rd, value);
                    }
                    Ok(())
                }
            },
            ArmInstruction::CoprocessorDoubleRegisterTransfer {
                kind,
                coprocessor,
                rd,
                rn,
            } => match kind {
                LoadStoreKind::Store => {
                    let low = self.a32_get(rd);
                    let high = self.a32_get(rn);
                    self.coproc_mcrr(coprocessor as usize, raw, low, high)
                }
                LoadStoreKind::Load => {
                    let (low, high) = self.coproc_mrrc(coprocessor as usize, raw)?;
                    self.a32_set(rd, low);
                    self.a32_set(rn, high);
                    Ok(())
                }
            },
            ArmInstruction::Nop => Ok(()),
            ArmInstruction::Undefined => Err(Exception::Undefined),
        }
    }

    // --------------------------------------------------------------
    // Data processing
    // --------------------------------------------------------------

    pub(crate) fn a32_data_processing(
        &mut self,
        alu: ArmAluOp,
        set_conditions: bool,
        rn: u32,
        rd: u32,
        op2: AluSecondOperandInfo,
    ) -> ExecResult {
        use ArmAluOp::*;

        let dest_is_pc = rd == A32_PC;
        let logical = matches!(alu, And | Eor | Tst | Teq | Orr | Mov | Bic | Mvn);
        let store_carry = set_conditions && logical && !dest_is_pc;
        let operand = self.a32_shifter_operand(op2, store_carry);
        let op1 = self.a32_get_lhs(rn);
        let carry = u32::from(self.pstate.c);

        let result = match alu {
            And | Tst => {
                let res = op1 & operand;
                if set_conditions {
                    self.a32_or_a26_test_nz(res, dest_is_pc);
                }
                res
            }
            Eor | Teq => {
                let res = op1 ^ operand;
                if set_conditions {
                    self.a32_or_a26_test_nz(res, dest_is_pc);
                }
                res
            }
            Orr => {
                let res = op1 | operand;
                if set_conditions {
                    self.a32_or_a26_test_nz(res, dest_is_pc);
                }
                res
            }
            Bic => {
                let res = op1 & !operand;
                if set_conditions {
                    self.a32_or_a26_test_nz(res, dest_is_pc);
                }
                res
            }
            Mov => {
                if set_conditions {
                    self.a32_or_a26_test_nz(operand, dest_is_pc);
                }
                operand
            }
            Mvn => {
                let res = !operand;
                if set_conditions {
                    self.a32_or_a26_test_nz(res, dest_is_pc);
                }
                res
            }
            Add | Cmn => {
                let res = op1.wrapping_add(operand);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, op1, operand, dest_is_pc);
                }
                res
            }
            Adc => {
                let res = op1.wrapping_add(operand).wrapping_add(carry);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, op1, operand, dest_is_pc);
                }
                res
            }
            Sub | Cmp => {
                let res = op1.wrapping_sub(operand);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, op1, !operand, dest_is_pc);
                }
                res
            }
            Sbc => {
                let res = op1
                    .wrapping_sub(operand)
                    .wrapping_sub(1 - carry);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, op1, !operand, dest_is_pc);
                }
                res
            }
            Rsb => {
                let res = operand.wrapping_sub(op1);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, operand, !op1, dest_is_pc);
                }
                res
            }
            Rsc => {
                let res = operand.wrapping_sub(op1).wrapping_sub(1 - carry);
                if set_conditions {
                    self.a32_or_a26_test_nzcv(res, operand, !op1, dest_is_pc);
                }
                res
            }
        };

        let writes_result = !matches!(alu, Tst | Teq | Cmp | Cmn);
        if writes_result {
            if set_conditions {
                // A flag-setting write already replaced the CPSR when the
                // destination is R15; the plain write applies the mask of
                // the (possibly restored) instruction set.
                self.a32_set(rd, result);
            } else {
                self.a32_set_interworking_v7(rd, result);
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------
    // Multiplies
    // --------------------------------------------------------------

    pub(crate) fn a32_multiply(
        &mut self,
        variant: MultiplyVariant,
        set_conditions: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    ) -> ExecResult {
        let op1 = self.a32_get(rm);
        let op2 = self.a32_get(rs);
        let acc = self.a32_get(rn);
        let result = match variant {
            MultiplyVariant::Mul => op1.wrapping_mul(op2),
            MultiplyVariant::Mla => op1.wrapping_mul(op2).wrapping_add(acc),
            MultiplyVariant::Mls => acc.wrapping_sub(op1.wrapping_mul(op2)),
        };
        if set_conditions {
            self.a32_or_a26_test_nz(result, rd == A32_PC);
        }
        self.a32_set(rd, result);
        Ok(())
    }

    pub(crate) fn a32_multiply_long(
        &mut self,
        variant: MultiplyLongVariant,
        set_conditions: bool,
        rdhi: u32,
        rdlo: u32,
        rs: u32,
        rm: u32,
    ) -> ExecResult {
        let op1 = self.a32_get(rm);
        let op2 = self.a32_get(rs);
        let accumulator = (u64::from(self.a32_get(rdhi)) << 32) | u64::from(self.a32_get(rdlo));

        let result = match variant {
            MultiplyLongVariant::Umull => u64::from(op1).wrapping_mul(u64::from(op2)),
            MultiplyLongVariant::Umlal => u64::from(op1)
                .wrapping_mul(u64::from(op2))
                .wrapping_add(accumulator),
            MultiplyLongVariant::Smull => {
                (i64::from(op1 as i32).wrapping_mul(i64::from(op2 as i32))) as u64
            }
            MultiplyLongVariant::Smlal => (i64::from(op1 as i32)
                .wrapping_mul(i64::from(op2 as i32)))
            .wrapping_add(accumulator as i64) as u64,
        };

        if set_conditions {
            self.pstate.z = result == 0;
            self.pstate.n = result.get_bit(63);
        }
        self.a32_set(rdlo, result as u32);
        self.a32_set(rdhi, (result >> 32) as u32);
        Ok(())
    }

    fn a32_halfword_multiply(
        &mut self,
        variant: HalfwordMultiplyVariant,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
        x: bool,
        y: bool,
    ) -> ExecResult {
        let half = |value: u32, top: bool| -> i32 {
            if top {
                (value >> 16) as u16 as i16 as i32
            } else {
                value as u16 as i16 as i32
            }
        };
        let rm_value = self.a32_get(rm);
        let rs_value = self.a32_get(rs);

        match variant {
            HalfwordMultiplyVariant::Smla => {
                let product = half(rm_value, x).wrapping_mul(half(rs_value, y));
                let acc = self.a32_get(rn) as i32;
                let result = self.a32_saturating_accumulate(product, acc);
                self.a32_set(rd, result as u32);
            }
            HalfwordMultiplyVariant::Smlaw => {
                let product =
                    ((i64::from(rm_value as i32) * i64::from(half(rs_value, y))) >> 16) as i32;
                let acc = self.a32_get(rn) as i32;
                let result = self.a32_saturating_accumulate(product, acc);
                self.a32_set(rd, result as u32);
            }
            HalfwordMultiplyVariant::Smulw => {
                let result =
                    ((i64::from(rm_value as i32) * i64::from(half(rs_value, y))) >> 16) as i32;
                self.a32_set(rd, result as u32);
            }
            HalfwordMultiplyVariant::Smlal => {
                let product = i64::from(half(rm_value, x)) * i64::from(half(rs_value, y));
                let accumulator =
                    ((u64::from(self.a32_get(rd)) << 32) | u64::from(self.a32_get(rn))) as i64;
                let result = accumulator.wrapping_add(product) as u64;
                self.a32_set(rn, result as u32);
                self.a32_set(rd, (result >> 32) as u32);
            }
            HalfwordMultiplyVariant::Smul => {
                let result = half(rm_value, x).wrapping_mul(half(rs_value, y));
                self.a32_set(rd, result as u32);
            }
        }
        Ok(())
    }

    /// Accumulate step of the DSP multiplies: sets Q on overflow but does
    /// not saturate the result.
    fn a32_saturating_accumulate(&mut self, product: i32, accumulator: i32) -> i32 {
        match product.checked_add(accumulator) {
            Some(value) => value,
            None => {
                self.pstate.q = true;
                product.wrapping_add(accumulator)
            }
        }
    }

    fn a32_saturating(
        &mut self,
        variant: SaturatingVariant,
        rd: u32,
        rn: u32,
        rm: u32,
    ) -> ExecResult {
        let op1 = self.a32_get(rm) as i32;
        let op2 = self.a32_get(rn) as i32;
        let result = match variant {
            SaturatingVariant::QAdd => self.a32_qadd32(op1, op2),
            SaturatingVariant::QSub => self.a32_qsub32(op1, op2),
            SaturatingVariant::QDAdd => {
                let doubled = self.a32_qdouble(op2);
                self.a32_qadd32(op1, doubled)
            }
            SaturatingVariant::QDSub => {
                let doubled = self.a32_qdouble(op2);
                self.a32_qsub32(op1, doubled)
            }
        };
        self.a32_set(rd, result as u32);
        Ok(())
    }

    fn a32_qadd32(&mut self, op1: i32, op2: i32) -> i32 {
        match op1.checked_add(op2) {
            Some(value) => value,
            None => {
                self.pstate.q = true;
                if op1 < 0 {
                    i32::MIN
                } else {
                    i32::MAX
                }
            }
        }
    }

    fn a32_qsub32(&mut self, op1: i32, op2: i32) -> i32 {
        match op1.checked_sub(op2) {
            Some(value) => value,
            None => {
                self.pstate.q = true;
                if op1 < 0 {
                    i32::MIN
                } else {
                    i32::MAX
                }
            }
        }
    }

    fn a32_qdouble(&mut self, value: i32) -> i32 {
        match value.checked_mul(2) {
            Some(doubled) => doubled,
            None => {
                self.pstate.q = true;
                if value < 0 {
                    i32::MIN
                } else {
                    i32::MAX
                }
            }
        }
    }

    // --------------------------------------------------------------
    // PSR transfer
    // --------------------------------------------------------------

    fn a32_psr_transfer(&mut self, psr: PsrKind, kind: PsrOpKind) -> ExecResult {
        match kind {
            PsrOpKind::Mrs { destination } => {
                let value = match psr {
                    PsrKind::Cpsr => self.a32_get_cpsr(),
                    PsrKind::Spsr => self.a32_get_spsr(),
                };
                self.a32_set(destination, value);
            }
            PsrOpKind::Msr { fields, source } => {
                let value = self.a32_get(source);
                self.a32_msr(psr, fields, value);
            }
            PsrOpKind::MsrImmediate { fields, base, shift } => {
                let value = base.rotate_right(shift);
                self.a32_msr(psr, fields, value);
            }
        }
        Ok(())
    }

    fn a32_msr(&mut self, psr: PsrKind, fields: u32, value: u32) {
        let mut mask = psr_field_mask(
            fields.get_bit(3),
            fields.get_bit(2),
            fields.get_bit(1),
            fields.get_bit(0),
        );
        match psr {
            PsrKind::Cpsr => {
                if !self.is_privileged() {
                    // User state may only touch the flag fields.
                    mask &= 0xF80F_0000;
                }
                self.a32_set_cpsr(mask, value);
            }
            PsrKind::Spsr => self.a32_set_spsr(mask, value),
        }
    }

    // --------------------------------------------------------------
    // Jazelle entry
    // --------------------------------------------------------------

    /// BXJ: enter Jazelle state. The branch target register is advisory on
    /// this implementation; execution resumes at the bytecode address in
    /// the link register, and the handler-configuration bits of R5 are
    /// cleared, matching the documented Jazelle entry sequence.
    fn a32_bxj(&mut self, _register: u32) -> ExecResult {
        self.pstate.jt = self.filter_jt(JtState::Jazelle);
        if self.pstate.jt == JtState::Jazelle {
            let target = self.a32_get(A32_LR);
            self.regs.set(slot::PC, u64::from(target));
            let sht = self.a32_get(crate::cpu::jazelle::J32_SHT) & !0x0000_03C0;
            self.a32_set(crate::cpu::jazelle::J32_SHT, sht);
            self.j32_sync_stack_from_r5();
        }
        Ok(())
    }

    // --------------------------------------------------------------
    // Loads and stores
    // --------------------------------------------------------------

    /// 26-bit data address check: the top six bits must be clear.
    pub(crate) fn a26_check_address(&self, address: u32) -> ExecResult {
        if self.is_data26() && address & 0xFC00_0000 != 0 {
            return Err(Exception::Address26);
        }
        Ok(())
    }

    /// ThumbEE null-pointer check on every base register.
    pub(crate) fn e32_check_nullptr(&self, address: u32) -> ExecResult {
        if self.config.version == ArmVersion::V7
            && self.pstate.jt == JtState::ThumbEe
            && address == 0
        {
            return Err(Exception::ThumbEeNullPtr);
        }
        Ok(())
    }

    fn a32_transfer_base(&mut self, base: u32) -> ExecResult<u32> {
        let mut address = self.a32_get(base);
        if base == A32_PC {
            address &= !3;
        }
        self.e32_check_nullptr(address)?;
        Ok(address)
    }

    fn a32_transfer_writeback(
        &mut self,
        base: u32,
        mut address: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
    ) {
        if writeback {
            if !preindexed {
                address = address.wrapping_add(offset);
            }
            self.a32_set(base, address);
        }
    }

    pub(crate) fn a32_ldrb(
        &mut self,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult<u32> {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;
        let result = u32::from(self.data_read8(u64::from(address), usermode)?);
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(result)
    }

    pub(crate) fn a32_ldrsb(
        &mut self,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult<u32> {
        let value = self.a32_ldrb(base, offset, preindexed, writeback, usermode)?;
        Ok(sign_extend32(8, value))
    }

    pub(crate) fn a32_strb(
        &mut self,
        value: u32,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;
        self.data_write8(u64::from(address), value as u8, usermode)?;
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(())
    }

    fn a32_halfword_address(&mut self, address: u32) -> ExecResult<u32> {
        if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
            if address & 1 != 0 {
                return Err(Exception::Unaligned);
            }
            Ok(address)
        } else if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            Ok(address & !1)
        } else {
            Ok(address)
        }
    }

    pub(crate) fn a32_ldrh(
        &mut self,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult<u32> {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;
        let actual = self.a32_halfword_address(address)?;
        let result = u32::from(self.data_read16(u64::from(actual), usermode)?);
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(result)
    }

    pub(crate) fn a32_ldrsh(
        &mut self,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult<u32> {
        let value = self.a32_ldrh(base, offset, preindexed, writeback, usermode)?;
        Ok(sign_extend32(16, value))
    }

    pub(crate) fn a32_strh(
        &mut self,
        value: u32,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;
        let actual = self.a32_halfword_address(address)?;
        self.data_write16(u64::from(actual), value as u16, usermode)?;
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(())
    }

    pub(crate) fn a32_ldr(
        &mut self,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult<u32> {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;

        let result = if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
            if address & 3 != 0 {
                return Err(Exception::Unaligned);
            }
            self.data_read32(u64::from(address), usermode)?
        } else if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            // Rotated unaligned load: the word at the rounded-down address,
            // rotated so the addressed byte lands in the low lane.
            let word = self.data_read32(u64::from(address & !3), usermode)?;
            word.rotate_right((address & 3) * 8)
        } else {
            self.data_read32(u64::from(address), usermode)?
        };

        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(result)
    }

    pub(crate) fn a32_str(
        &mut self,
        value: u32,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
        usermode: bool,
    ) -> ExecResult {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;

        if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
            if address & 3 != 0 {
                return Err(Exception::Unaligned);
            }
            self.data_write32(u64::from(address), value, usermode)?;
        } else if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            self.data_write32(u64::from(address & !3), value, usermode)?;
        } else {
            self.data_write32(u64::from(address), value, usermode)?;
        }

        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(())
    }

    pub(crate) fn a32_ldrd(
        &mut self,
        operand1: u32,
        operand2: u32,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
    ) -> ExecResult {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        let mut actual = address;
        if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
                if address & 7 != 0 {
                    return Err(Exception::Unaligned);
                }
            } else {
                actual &= !7;
            }
        } else {
            // Word alignment, not doubleword alignment, is what later
            // generations require here.
            if address & 3 != 0 {
                return Err(Exception::Unaligned);
            }
        }
        self.a26_check_address(address)?;
        let low = self.data_read32(u64::from(actual), false)?;
        let high = self.data_read32(u64::from(actual.wrapping_add(4)), false)?;
        self.a32_set(operand1, low);
        self.a32_set(operand2, high);
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(())
    }

    pub(crate) fn a32_strd(
        &mut self,
        operand1: u32,
        operand2: u32,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
    ) -> ExecResult {
        let mut address = self.a32_transfer_base(base)?;
        if preindexed {
            address = address.wrapping_add(offset);
        }
        let mut actual = address;
        if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
                if address & 7 != 0 {
                    return Err(Exception::Unaligned);
                }
            } else {
                actual &= !7;
            }
        } else if address & 3 != 0 {
            return Err(Exception::Unaligned);
        }
        self.a26_check_address(address)?;
        let low = self.a32_get(operand1);
        let high = self.a32_get(operand2);
        self.data_write32(u64::from(actual), low, false)?;
        self.data_write32(u64::from(actual.wrapping_add(4)), high, false)?;
        self.a32_transfer_writeback(base, address, offset, preindexed, writeback);
        Ok(())
    }

    fn a32_block_alignment(&mut self, address: u32) -> ExecResult<u32> {
        if self.sysregs.sctlr_el1 & SCTLR_A != 0 {
            if address & 3 != 0 {
                return Err(Exception::Unaligned);
            }
            Ok(address)
        } else if self.config.version <= ArmVersion::V6 && self.sysregs.sctlr_el1 & SCTLR_U == 0 {
            Ok(address & !3)
        } else if address & 3 != 0 {
            Err(Exception::Unaligned)
        } else {
            Ok(address)
        }
    }

    /// LDM: lowest-numbered register from the lowest address. The `^` form
    /// (include_cpsr) transfers the user bank unless R15 is in the list,
    /// in which case it restores the CPSR with the final word.
    pub(crate) fn a32_ldm(
        &mut self,
        register_list: u16,
        stack_register: u32,
        upward: bool,
        change_before: bool,
        writeback: bool,
        include_cpsr: bool,
    ) -> ExecResult {
        let stacksize = u32::from(register_list.count_ones()) << 2;
        let mut address = self.a32_get(stack_register);
        let final_address;

        if upward {
            final_address = address.wrapping_add(stacksize);
        } else {
            address = address.wrapping_sub(stacksize.wrapping_sub(4));
            final_address = address.wrapping_sub(4);
        }
        if change_before {
            address = if upward {
                address.wrapping_add(4)
            } else {
                address.wrapping_sub(4)
            };
        }

        address = self.a32_block_alignment(address)?;
        self.a26_check_address(address)?;

        let user_bank = register_list & 0x8000 == 0 && include_cpsr && !writeback;
        for register_number in 0..15u32 {
            if register_list & (1 << register_number) != 0 {
                let word = self.data_read32(u64::from(address), false)?;
                if user_bank {
                    self.regs.set(register_number as usize, u64::from(word));
                } else {
                    self.a32_set_interworking_v5(register_number, word);
                }
                address = address.wrapping_add(4);
            }
        }

        if register_list & 0x8000 != 0 {
            let word = self.data_read32(u64::from(address), false)?;
            self.regs.set(slot::PC, u64::from(word & !1));
            if self.config.features.has(ArmFeature::Thumb) {
                self.pstate.jt = if word & 1 != 0 {
                    JtState::Thumb
                } else {
                    JtState::Arm
                };
            }
            if include_cpsr {
                self.a32_copy_flags_or_spsr(word);
            }
        }

        if writeback && register_list & (1 << stack_register) == 0 {
            self.a32_set(stack_register, final_address);
        }
        Ok(())
    }

    /// STM. Writeback timing depends on whether Rn is the lowest register
    /// in the list: if it is, the original base value must be stored, so
    /// the base is updated after the transfer.
    pub(crate) fn a32_stm(
        &mut self,
        register_list: u16,
        stack_register: u32,
        upward: bool,
        change_before: bool,
        writeback: bool,
        user_bank: bool,
    ) -> ExecResult {
        let stacksize = u32::from(register_list.count_ones()) << 2;
        let mut address = self.a32_get(stack_register);
        let final_address;

        if upward {
            final_address = address.wrapping_add(stacksize);
        } else {
            address = address.wrapping_sub(stacksize.wrapping_sub(4));
            final_address = address.wrapping_sub(4);
        }
        if change_before {
            address = if upward {
                address.wrapping_add(4)
            } else {
                address.wrapping_sub(4)
            };
        }

        address = self.a32_block_alignment(address)?;

        let test_mask = ((1u32 << (stack_register + 1)) - 1) as u16;
        let test_value = (1u32 << stack_register) as u16;
        let stack_register_is_lowest = register_list & test_mask == test_value;

        if !stack_register_is_lowest && writeback {
            self.a32_set(stack_register, final_address);
        }

        self.a26_check_address(address)?;
        for register_number in 0..16u32 {
            if register_list & (1 << register_number) != 0 {
                let value = if user_bank {
                    self.regs.get(register_number as usize) as u32
                } else {
                    // R15 stores the packed PC+flags word in 26-bit state,
                    // plus the historical extra displacement.
                    let mut value = self.a32_get_lhs(register_number);
                    if register_number == A32_PC {
                        value = value.wrapping_add(self.stored_pc_displacement());
                    }
                    value
                };
                self.data_write32(u64::from(address), value, false)?;
                address = address.wrapping_add(4);
            }
        }

        if stack_register_is_lowest && writeback {
            self.a32_set(stack_register, final_address);
        }
        Ok(())
    }

    /// RFE: pop {PC, CPSR}.
    pub(crate) fn a32_rfe(
        &mut self,
        stack_register: u32,
        upward: bool,
        change_before: bool,
        writeback: bool,
    ) -> ExecResult {
        let mut address = self.a32_get(stack_register);
        let final_address;
        if upward {
            final_address = address.wrapping_add(8);
        } else {
            address = address.wrapping_sub(4);
            final_address = address.wrapping_sub(4);
        }
        if change_before {
            address = if upward {
                address.wrapping_add(4)
            } else {
                address.wrapping_sub(4)
            };
        }

        address = self.a32_block_alignment(address)?;
        self.a26_check_address(address)?;
        let pc = self.data_read32(u64::from(address), false)?;
        let cpsr = self.data_read32(u64::from(address.wrapping_add(4)), false)?;
        self.regs.set(slot::PC, u64::from(pc));
        self.a32_set_cpsr(u32::MAX, cpsr);

        if writeback {
            self.a32_set(stack_register, final_address);
        }
        Ok(())
    }

    /// SRS: push {LR, SPSR} onto the named mode's stack.
    pub(crate) fn a32_srs(
        &mut self,
        mode: u32,
        upward: bool,
        change_before: bool,
        writeback: bool,
    ) -> ExecResult {
        let mode = Mode::try_from(mode).unwrap_or(self.pstate.mode);
        let mut address = self.a32_get_mode(13, mode);
        let final_address;
        if upward {
            final_address = address.wrapping_add(8);
        } else {
            address = address.wrapping_sub(4);
            final_address = address.wrapping_sub(4);
        }
        if change_before {
            address = if upward {
                address.wrapping_add(4)
            } else {
                address.wrapping_sub(4)
            };
        }

        address = self.a32_block_alignment(address)?;
        self.a26_check_address(address)?;
        let lr = self.a32_get(A32_LR);
        let spsr = self.a32_get_spsr();
        self.data_write32(u64::from(address), lr, false)?;
        self.data_write32(u64::from(address.wrapping_add(4)), spsr, false)?;

        if writeback {
            self.a32_set_mode(13, mode, final_address);
        }
        Ok(())
    }

    fn a32_swap(&mut self, byte: bool, rd: u32, rm: u32, rn: u32) -> ExecResult {
        let address = self.a32_get(rn);
        self.a26_check_address(address)?;
        let source = self.a32_get(rm);
        if byte {
            let old = u32::from(self.data_read8(u64::from(address), false)?);
            self.data_write8(u64::from(address), source as u8, false)?;
            self.a32_set(rd, old);
        } else {
            // Word swaps follow the rotated-unaligned-load convention.
            let word = self.data_read32(u64::from(address & !3), false)?;
            let old = word.rotate_right((address & 3) * 8);
            self.data_write32(u64::from(address & !3), source, false)?;
            self.a32_set(rd, old);
        }
        Ok(())
    }

    fn a32_exclusive(
        &mut self,
        variant: ExclusiveVariant,
        rd: u32,
        rm: u32,
        rn: u32,
    ) -> ExecResult {
        let address = u64::from(self.a32_get(rn));
        match variant {
            ExclusiveVariant::Ldrexb => {
                self.mark_exclusive(address, 1);
                let value = self.data_read8(address, false)?;
                self.a32_set(rd, u32::from(value));
            }
            ExclusiveVariant::Ldrexh => {
                if address & 1 != 0 {
                    return Err(Exception::Unaligned);
                }
                self.mark_exclusive(address, 2);
                let value = self.data_read16(address, false)?;
                self.a32_set(rd, u32::from(value));
            }
            ExclusiveVariant::Ldrex => {
                if address & 3 != 0 {
                    return Err(Exception::Unaligned);
                }
                self.mark_exclusive(address, 4);
                let value = self.data_read32(address, false)?;
                self.a32_set(rd, value);
            }
            ExclusiveVariant::Ldrexd => {
                if address & 7 != 0 {
                    return Err(Exception::Unaligned);
                }
                self.mark_exclusive(address, 8);
                let low = self.data_read32(address, false)?;
                let high = self.data_read32(address + 4, false)?;
                self.a32_set(rd, low);
                self.a32_set(rd + 1, high);
            }
            ExclusiveVariant::Strexb => {
                let ok = self.check_exclusive(address, 1);
                if ok {
                    let value = self.a32_get(rm) as u8;
                    self.data_write8(address, value, false)?;
                }
                self.clear_exclusive();
                self.a32_set(rd, u32::from(!ok));
            }
            ExclusiveVariant::Strexh => {
                if address & 1 != 0 {
                    return Err(Exception::Unaligned);
                }
                let ok = self.check_exclusive(address, 2);
                if ok {
                    let value = self.a32_get(rm) as u16;
                    self.data_write16(address, value, false)?;
                }
                self.clear_exclusive();
                self.a32_set(rd, u32::from(!ok));
            }
            ExclusiveVariant::Strex => {
                if address & 3 != 0 {
                    return Err(Exception::Unaligned);
                }
                let ok = self.check_exclusive(address, 4);
                if ok {
                    let value = self.a32_get(rm);
                    self.data_write32(address, value, false)?;
                }
                self.clear_exclusive();
                self.a32_set(rd, u32::from(!ok));
            }
            ExclusiveVariant::Strexd => {
                if address & 7 != 0 {
                    return Err(Exception::Unaligned);
                }
                let ok = self.check_exclusive(address, 8);
                if ok {
                    let low = self.a32_get(rm);
                    let high = self.a32_get(rm + 1);
                    self.data_write32(address, low, false)?;
                    self.data_write32(address + 4, high, false)?;
                }
                self.clear_exclusive();
                self.a32_set(rd, u32::from(!ok));
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------
    // Parallel add/subtract with GE bits
    // --------------------------------------------------------------

    fn set_ge(&mut self, bit: u32, condition: bool) {
        if condition {
            self.pstate.ge |= 1 << bit;
        } else {
            self.pstate.ge &= !(1 << bit);
        }
    }

    fn a32_parallel_add_sub(
        &mut self,
        class: ParallelClass,
        op: ParallelOp,
        rd: u32,
        rn: u32,
        rm: u32,
    ) -> ExecResult {
        let op1 = self.a32_get(rn);
        let op2 = self.a32_get(rm);
        let add = matches!(op, ParallelOp::Add8 | ParallelOp::Add16);

        let result = match op {
            ParallelOp::Add16 | ParallelOp::Sub16 => {
                let mut out = 0u32;
                for lane in 0..2 {
                    let a = (op1 >> (lane * 16)) as u16;
                    let b = (op2 >> (lane * 16)) as u16;
                    let value = match class {
                        ParallelClass::Signed => {
                            let sum = if add {
                                i32::from(a as i16) + i32::from(b as i16)
                            } else {
                                i32::from(a as i16) - i32::from(b as i16)
                            };
                            self.set_ge(lane * 2, sum >= 0);
                            self.set_ge(lane * 2 + 1, sum >= 0);
                            sum as u16
                        }
                        ParallelClass::Unsigned => {
                            let sum = if add {
                                u32::from(a) + u32::from(b)
                            } else {
                                u32::from(a).wrapping_sub(u32::from(b))
                            };
                            let ge = if add { sum >= 0x1_0000 } else { a >= b };
                            self.set_ge(lane * 2, ge);
                            self.set_ge(lane * 2 + 1, ge);
                            sum as u16
                        }
                        ParallelClass::SignedSaturating => {
                            if add {
                                (a as i16).saturating_add(b as i16) as u16
                            } else {
                                (a as i16).saturating_sub(b as i16) as u16
                            }
                        }
                        ParallelClass::UnsignedSaturating => {
                            if add {
                                a.saturating_add(b)
                            } else {
                                a.saturating_sub(b)
                            }
                        }
                        ParallelClass::SignedHalving => {
                            let sum = if add {
                                i32::from(a as i16) + i32::from(b as i16)
                            } else {
                                i32::from(a as i16) - i32::from(b as i16)
                            };
                            (sum >> 1) as u16
                        }
                        ParallelClass::UnsignedHalving => {
                            let sum = if add {
                                u32::from(a) + u32::from(b)
                            } else {
                                u32::from(a).wrapping_sub(u32::from(b))
                            };
                            (sum >> 1) as u16
                        }
                    };
                    out |= u32::from(value) << (lane * 16);
                }
                out
            }
            ParallelOp::Add8 | ParallelOp::Sub8 => {
                let mut out = 0u32;
                for lane in 0..4 {
                    let a = (op1 >> (lane * 8)) as u8;
                    let b = (op2 >> (lane * 8)) as u8;
                    let value = match class {
                        ParallelClass::Signed => {
                            let sum = if add {
                                i32::from(a as i8) + i32::from(b as i8)
                            } else {
                                i32::from(a as i8) - i32::from(b as i8)
                            };
                            self.set_ge(lane, sum >= 0);
                            sum as u8
                        }
                        ParallelClass::Unsigned => {
                            let sum = if add {
                                u32::from(a) + u32::from(b)
                            } else {
                                u32::from(a).wrapping_sub(u32::from(b))
                            };
                            let ge = if add { sum >= 0x100 } else { a >= b };
                            self.set_ge(lane, ge);
                            sum as u8
                        }
                        ParallelClass::SignedSaturating => {
                            if add {
                                (a as i8).saturating_add(b as i8) as u8
                            } else {
                                (a as i8).saturating_sub(b as i8) as u8
                            }
                        }
                        ParallelClass::UnsignedSaturating => {
                            if add {
                                a.saturating_add(b)
                            } else {
                                a.saturating_sub(b)
                            }
                        }
                        ParallelClass::SignedHalving => {
                            let sum = if add {
                                i32::from(a as i8) + i32::from(b as i8)
                            } else {
                                i32::from(a as i8) - i32::from(b as i8)
                            };
                            (sum >> 1) as u8
                        }
                        ParallelClass::UnsignedHalving => {
                            let sum = if add {
                                u32::from(a) + u32::from(b)
                            } else {
                                u32::from(a).wrapping_sub(u32::from(b))
                            };
                            (sum >> 1) as u8
                        }
                    };
                    out |= u32::from(value) << (lane * 8);
                }
                out
            }
        };

        self.a32_set(rd, result);
        Ok(())
    }

    /// LDC/STC address generation and coprocessor hand-off.
    pub(crate) fn a32_perform_ldc_stc(
        &mut self,
        raw: u32,
        coprocessor: usize,
        base: u32,
        offset: u32,
        preindexed: bool,
        writeback: bool,
    ) -> ExecResult {
        let mut address = self.a32_get(base);
        if base == A32_PC {
            address &= !3;
        }
        if preindexed {
            address = address.wrapping_add(offset);
        }
        self.a26_check_address(address)?;
        self.coproc_ldc_stc(coprocessor, raw, address)?;
        if writeback {
            if !preindexed {
                address = address.wrapping_add(offset);
            }
            self.a32_set(base, address);
        }
        Ok(())
    }
}

fn field_mask(lsb: u32, msb: u32) -> u32 {
    if msb < lsb {
        return 0;
    }
    let width = msb - lsb + 1;
    low_mask(width) << lsb
}

fn low_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Isa;
    use crate::cpu::exception::StepResult;
    use crate::cpu::testing::core;

    fn arm_core(version: ArmVersion) -> ArmCore {
        let mut cpu = core(version, &[Isa::Arm32, Isa::Thumb]);
        cpu.config.features.insert(ArmFeature::Mull);
        cpu.config.features.insert(ArmFeature::EnhDsp);
        cpu.config.features.insert(ArmFeature::DspPair);
        cpu.config.features.insert(ArmFeature::Swp);
        cpu.set_isa(Isa::Arm32);
        cpu
    }

    fn execute(cpu: &mut ArmCore, raw: u32) {
        let opcode = ArmOpcode::decode(raw, &cpu.config);
        if let Err(kind) = cpu.execute_arm(opcode) {
            cpu.handle_exception(kind);
        }
    }

    #[test]
    fn add_with_flags() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(1, 0x7FFF_FFFF);
        cpu.a32_set(2, 1);
        // ADDS R0, R1, R2
        execute(&mut cpu, 0xE091_0002);
        assert_eq!(cpu.a32_get(0), 0x8000_0000);
        assert!(cpu.pstate.n);
        assert!(cpu.pstate.v);
        assert!(!cpu.pstate.c);
    }

    #[test]
    fn subs_sets_borrow_inverted_carry() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(1, 5);
        cpu.a32_set(2, 3);
        // SUBS R0, R1, R2
        execute(&mut cpu, 0xE051_0002);
        assert_eq!(cpu.a32_get(0), 2);
        assert!(cpu.pstate.c);

        cpu.a32_set(1, 3);
        cpu.a32_set(2, 5);
        execute(&mut cpu, 0xE051_0002);
        assert_eq!(cpu.a32_get(0), -2i32 as u32);
        assert!(!cpu.pstate.c);
        assert!(cpu.pstate.n);
    }

    #[test]
    fn movs_immediate_with_rotation_updates_carry() {
        let mut cpu = arm_core(ArmVersion::V5);
        // MOVS R0, #0xFF000000 (0xFF ror 8)
        execute(&mut cpu, 0xE3B0_04FF);
        assert_eq!(cpu.a32_get(0), 0xFF00_0000);
        assert!(cpu.pstate.c);
        assert!(cpu.pstate.n);
    }

    #[test]
    fn branch_and_link() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.regs.set(slot::PC, 0x104); // as if fetch advanced past 0x100
        // BL #+60
        execute(&mut cpu, 0xEB00_000F);
        assert_eq!(cpu.a32_get_mode(14, Mode::User), 0x104);
        assert_eq!(cpu.regs.get(slot::PC), 0x104 + 4 + 60);
    }

    #[test]
    fn bx_switches_to_thumb() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(2, 0x2001);
        execute(&mut cpu, 0xE12F_FF12);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
        assert_eq!(cpu.regs.get(slot::PC), 0x2000);
    }

    #[test]
    fn ldr_str_round_trip() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(0, 0x1000);
        cpu.a32_set(1, 0xCAFE_F00D);
        // STR R1, [R0, #4]
        execute(&mut cpu, 0xE580_1004);
        // LDR R2, [R0, #4]
        execute(&mut cpu, 0xE590_2004);
        assert_eq!(cpu.a32_get(2), 0xCAFE_F00D);
        assert_eq!(cpu.memory_change(), Some((0x1004, 0x1007)));
    }

    #[test]
    fn unaligned_rotated_load_on_v6() {
        // S1: word 0xDDCCBBAA at 0x1000, LDR at 0x1002 with A=0, U=0 reads
        // the word rotated right by 16.
        let mut cpu = arm_core(ArmVersion::V6);
        assert_eq!(cpu.sysregs.sctlr_el1 & (SCTLR_A | SCTLR_U), 0);
        cpu.data_write32(0x1000, 0xDDCC_BBAA, false).unwrap();
        cpu.a32_set(1, 0x1002);
        // LDR R0, [R1]
        execute(&mut cpu, 0xE591_0000);
        assert_eq!(cpu.a32_get(0), 0xBBAA_DDCC);
    }

    #[test]
    fn unaligned_load_faults_with_strict_alignment() {
        let mut cpu = arm_core(ArmVersion::V6);
        cpu.capture_breaks = true;
        cpu.sysregs.sctlr_el1 |= SCTLR_A;
        cpu.a32_set(1, 0x1002);
        execute(&mut cpu, 0xE591_0000);
        assert_eq!(cpu.result, StepResult::Unaligned);
    }

    #[test]
    fn v7_reads_unaligned_natively() {
        let mut cpu = arm_core(ArmVersion::V7);
        cpu.data_write32(0x1000, 0xDDCC_BBAA, false).unwrap();
        cpu.data_write32(0x1004, 0x1111_22EE, false).unwrap();
        cpu.a32_set(1, 0x1002);
        execute(&mut cpu, 0xE591_0000);
        assert_eq!(cpu.a32_get(0), 0x22EE_DDCC);
    }

    #[test]
    fn ldm_stm_round_trip_with_writeback() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(13, 0x1000);
        for r in [1u32, 5, 7] {
            cpu.a32_set(r, 0x100 + r);
        }
        // STMIA R13!, {R1, R5, R7}
        execute(&mut cpu, 0xE8AD_00A2);
        assert_eq!(cpu.a32_get(13), 0x100C);
        assert_eq!(cpu.data_read32(0x1000, false).unwrap(), 0x101);
        assert_eq!(cpu.data_read32(0x1004, false).unwrap(), 0x105);
        assert_eq!(cpu.data_read32(0x1008, false).unwrap(), 0x107);

        for r in [1u32, 5, 7] {
            cpu.a32_set(r, 0);
        }
        cpu.a32_set(13, 0x1000);
        // LDMIA R13!, {R1, R5, R7}
        execute(&mut cpu, 0xE8BD_00A2);
        assert_eq!(cpu.a32_get(1), 0x101);
        assert_eq!(cpu.a32_get(5), 0x105);
        assert_eq!(cpu.a32_get(7), 0x107);
        assert_eq!(cpu.a32_get(13), 0x100C);
    }

    #[test]
    fn stm_descending_stores_lowest_register_lowest() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(13, 0x1000);
        cpu.a32_set(1, 0xA1);
        cpu.a32_set(2, 0xA2);
        // STMDB R13!, {R1, R2}
        execute(&mut cpu, 0xE92D_0006);
        assert_eq!(cpu.a32_get(13), 0xFF8);
        assert_eq!(cpu.data_read32(0xFF8, false).unwrap(), 0xA1);
        assert_eq!(cpu.data_read32(0xFFC, false).unwrap(), 0xA2);
    }

    #[test]
    fn multiply_long_accumulates() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(2, 0xFFFF_FFFF);
        cpu.a32_set(3, 2);
        // UMULL R0, R1, R2, R3
        execute(&mut cpu, 0xE081_0392);
        assert_eq!(cpu.a32_get(0), 0xFFFF_FFFE);
        assert_eq!(cpu.a32_get(1), 1);

        // SMULL with negatives
        cpu.a32_set(2, -3i32 as u32);
        cpu.a32_set(3, 4);
        execute(&mut cpu, 0xE0C1_0392);
        assert_eq!(cpu.a32_get(0), -12i64 as u32);
        assert_eq!(cpu.a32_get(1), 0xFFFF_FFFF);
    }

    #[test]
    fn qadd_saturates_and_sets_q() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.a32_set(1, 0x7FFF_FFFF);
        cpu.a32_set(2, 1);
        // QADD R0, R2, R1: Rd = sat(Rm + Rn) with Rm=R2, Rn=R1
        execute(&mut cpu, 0xE101_0052);
        assert_eq!(cpu.a32_get(0), 0x7FFF_FFFF);
        assert!(cpu.pstate.q);
    }

    #[test]
    fn swp_exchanges_word() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.data_write32(0x1000, 0xAABB_CCDD, false).unwrap();
        cpu.a32_set(0, 0x1000);
        cpu.a32_set(2, 0x1122_3344);
        // SWP R1, R2, [R0]
        execute(&mut cpu, 0xE100_1092);
        assert_eq!(cpu.a32_get(1), 0xAABB_CCDD);
        assert_eq!(cpu.data_read32(0x1000, false).unwrap(), 0x1122_3344);
    }

    #[test]
    fn exclusive_pair_succeeds_then_fails() {
        let mut cpu = arm_core(ArmVersion::V7);
        cpu.data_write32(0x1000, 7, false).unwrap();
        cpu.a32_set(0, 0x1000);
        cpu.a32_set(2, 9);
        // LDREX R1, [R0]
        execute(&mut cpu, 0xE190_1F9F);
        assert_eq!(cpu.a32_get(1), 7);
        // STREX R3, R2, [R0] succeeds
        execute(&mut cpu, 0xE180_3F92);
        assert_eq!(cpu.a32_get(3), 0);
        assert_eq!(cpu.data_read32(0x1000, false).unwrap(), 9);
        // A second STREX without a reservation fails.
        execute(&mut cpu, 0xE180_3F92);
        assert_eq!(cpu.a32_get(3), 1);
    }

    #[test]
    fn mrs_msr_flags() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.pstate.n = true;
        cpu.pstate.c = true;
        // MRS R0, CPSR
        execute(&mut cpu, 0xE10F_0000);
        let cpsr = cpu.a32_get(0);
        assert!(cpsr & crate::cpu::psr::CPSR_N != 0);

        // MSR CPSR_f, #0x40000000 (Z only)
        execute(&mut cpu, 0xE328_F101);
        assert!(cpu.pstate.z);
        assert!(!cpu.pstate.n);
        // Control byte untouched by a flags-only write.
        assert_eq!(cpu.pstate.mode, Mode::User);
    }

    #[test]
    fn user_mode_msr_cannot_mask_interrupts() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.pstate.mode = Mode::User;
        // MSR CPSR_c, #0xC0 (attempt to set I and F)
        execute(&mut cpu, 0xE321_F0C0);
        assert!(!cpu.pstate.i);
        assert!(!cpu.pstate.f);

        cpu.pstate.mode = Mode::Supervisor;
        execute(&mut cpu, 0xE321_F0C0);
        assert!(cpu.pstate.i);
        assert!(cpu.pstate.f);
    }

    #[test]
    fn movs_pc_restores_spsr() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.pstate.mode = Mode::Supervisor;
        // Shape an SPSR that returns to User with flags set.
        cpu.a32_set_spsr(
            u32::MAX,
            crate::cpu::psr::CPSR_N | crate::cpu::psr::CPSR_M4 | Mode::User as u32,
        );
        cpu.a32_set_mode(14, Mode::Supervisor, 0x8004);
        // MOVS PC, LR
        execute(&mut cpu, 0xE1B0_F00E);
        assert_eq!(cpu.pstate.mode, Mode::User);
        assert!(cpu.pstate.n);
        assert_eq!(cpu.regs.get(slot::PC), 0x8004);
    }

    #[test]
    fn swi_vectors_to_supervisor() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.regs.set(slot::PC, 0x104);
        cpu.old_pc = 0x100;
        execute(&mut cpu, 0xEF00_0011);
        assert_eq!(cpu.pstate.mode, Mode::Supervisor);
        assert_eq!(
            cpu.regs.get(slot::PC),
            u64::from(crate::cpu::exception::A32_VECTOR_SWI)
        );
    }

    #[test]
    fn parallel_uadd8_sets_ge_per_lane() {
        let mut cpu = arm_core(ArmVersion::V6);
        cpu.a32_set(2, 0x00FF_0001);
        cpu.a32_set(3, 0x0001_0001);
        // UADD8 R1, R2, R3
        execute(&mut cpu, 0xE652_1F93);
        assert_eq!(cpu.a32_get(1), 0x0000_0002);
        // Lane 2 (0xFF + 0x01) carried; lane 0 (1+1) did not.
        assert_eq!(cpu.pstate.ge & 0b0100, 0b0100);
        assert_eq!(cpu.pstate.ge & 0b0001, 0);
    }

    #[test]
    fn extend_and_reverse() {
        let mut cpu = arm_core(ArmVersion::V6);
        cpu.a32_set(2, 0x0000_00F0);
        // SXTB R1, R2
        execute(&mut cpu, 0xE6AF_1072);
        assert_eq!(cpu.a32_get(1), 0xFFFF_FFF0);

        cpu.a32_set(2, 0x1122_3344);
        // REV R1, R2
        execute(&mut cpu, 0xE6BF_1F32);
        assert_eq!(cpu.a32_get(1), 0x4433_2211);
    }

    #[test]
    fn coprocessor_transfer_reaches_cp15() {
        let mut cpu = arm_core(ArmVersion::V7);
        cpu.sysregs.sctlr_el1 = 0x1234;
        // MRC p15, 0, R0, c1, c0, 0
        execute(&mut cpu, 0xEE11_0F10);
        assert_eq!(cpu.a32_get(0), 0x1234);
    }

    #[test]
    fn absent_coprocessor_is_undefined() {
        let mut cpu = arm_core(ArmVersion::V5);
        cpu.capture_breaks = true;
        cpu.old_pc = 0x100;
        // MRC p7, 0, R0, c0, c0, 0
        execute(&mut cpu, 0xEE10_0710);
        assert_eq!(cpu.result, StepResult::Undefined);
    }

    #[test]
    fn address_exception_in_26_bit_data_space() {
        let mut cpu = core(ArmVersion::V2, &[Isa::Arm26]);
        cpu.set_isa(Isa::Arm26);
        cpu.capture_breaks = true;
        cpu.old_pc = 0x100;
        cpu.a32_set(1, 0x0400_0000); // above the 26-bit window
        // LDR R0, [R1]
        execute(&mut cpu, 0xE591_0000);
        assert_eq!(cpu.result, StepResult::Address26);
    }
}
