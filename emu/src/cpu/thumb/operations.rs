//! Thumb, Thumb-2 and ThumbEE execution.
//!
//! The 16-bit instructions are restricted-operand forms of the ARM
//! operations, so execution delegates to the shared primitives wherever one
//! exists. A 16-bit data-processing instruction sets the flags outside an
//! IT block and leaves them alone inside one; the 32-bit encodings carry an
//! explicit S bit instead.

use crate::bitwise::{sign_extend32, Bits};
use crate::config::ArmVersion;
use crate::cpu::arm::alu::ShiftKind;
use crate::cpu::arm::instructions::{ArmOpcode, BitFieldKind, ExtendKind, ReverseKind};
use crate::cpu::core::ArmCore;
use crate::cpu::exception::{Exception, ExecResult};
use crate::cpu::flags::{Indexing, LoadStoreKind, Offsetting, ReadWriteKind};
use crate::cpu::pstate::JtState;
use crate::cpu::psr::psr_field_mask;
use crate::cpu::registers::{slot, A32_LR, A32_PC, A32_SP};
use crate::cpu::thumb::instruction::{
    has_thumb2, is_wide_prefix, HiRegisterOp as HiRegOp, MoveCompareOp, ThumbAluOp,
    ThumbInstruction, ThumbOpcode, WideOffset, WideSize,
};

impl ArmCore {
    /// One Thumb/ThumbEE step. A fault terminates any IT block.
    pub(crate) fn t32_step(&mut self) {
        self.old_pc = self.regs.get(slot::PC);
        if let Err(kind) = self.t32_step_inner() {
            self.handle_exception(kind);
            self.pstate.it = 0;
        }
    }

    fn t32_step_inner(&mut self) -> ExecResult {
        let thumbee = self.pstate.jt == JtState::ThumbEe;
        let hw1 = self.t32_fetch16()?;

        let opcode = if is_wide_prefix(hw1) && has_thumb2(&self.config) {
            let hw2 = self.t32_fetch16()?;
            ThumbOpcode::decode32(hw1, hw2, &self.config, thumbee)
        } else if hw1 & 0xF800 == 0xF000 {
            // The pre-Thumb-2 BL/BLX sequence is the one two-half-word
            // instruction of the original Thumb.
            let hw2 = self.t32_fetch16()?;
            ThumbOpcode::decode_bl_pair(hw1, hw2)
        } else {
            ThumbOpcode::decode16(hw1, &self.config, thumbee)
        };

        let isa = if thumbee { "ThumbEE" } else { "Thumb" };
        logger::instruction(self.old_pc, isa, &opcode);

        if !self.t32_check_it_condition() {
            self.t32_advance_it();
            return Ok(());
        }

        let sets_it = matches!(opcode.instruction, ThumbInstruction::IfThen { .. });
        self.execute_thumb(opcode)?;
        if !sets_it {
            self.t32_advance_it();
        }
        Ok(())
    }

    pub(crate) fn execute_thumb(&mut self, opcode: ThumbOpcode) -> ExecResult {
        use ThumbInstruction::*;

        // 16-bit data processing sets flags only outside an IT block.
        let set_flags = !self.t32_in_it_block();

        match opcode.instruction {
            MoveShiftedRegister {
                shift,
                offset5,
                rs,
                rd,
            } => {
                let amount = if offset5 == 0 && shift != ShiftKind::Lsl {
                    32
                } else {
                    offset5
                };
                let value = self.a32_get(rs);
                let result = self.a32_shift(shift, value, amount, set_flags);
                if set_flags {
                    self.a32_test_nz(result);
                }
                self.a32_set(rd, result);
                Ok(())
            }
            AddSubtract {
                immediate,
                subtract,
                rn_offset3,
                rs,
                rd,
            } => {
                let op1 = self.a32_get(rs);
                let op2 = if immediate {
                    rn_offset3
                } else {
                    self.a32_get(rn_offset3)
                };
                let result = if subtract {
                    let res = op1.wrapping_sub(op2);
                    if set_flags {
                        self.a32_test_nzcv(res, op1, !op2);
                    }
                    res
                } else {
                    let res = op1.wrapping_add(op2);
                    if set_flags {
                        self.a32_test_nzcv(res, op1, op2);
                    }
                    res
                };
                self.a32_set(rd, result);
                Ok(())
            }
            MoveCompareAddSubImm { op, rd, offset8 } => {
                let op1 = self.a32_get(rd);
                match op {
                    MoveCompareOp::Mov => {
                        if set_flags {
                            self.a32_test_nz(offset8);
                        }
                        self.a32_set(rd, offset8);
                    }
                    MoveCompareOp::Cmp => {
                        let res = op1.wrapping_sub(offset8);
                        self.a32_test_nzcv(res, op1, !offset8);
                    }
                    MoveCompareOp::Add => {
                        let res = op1.wrapping_add(offset8);
                        if set_flags {
                            self.a32_test_nzcv(res, op1, offset8);
                        }
                        self.a32_set(rd, res);
                    }
                    MoveCompareOp::Sub => {
                        let res = op1.wrapping_sub(offset8);
                        if set_flags {
                            self.a32_test_nzcv(res, op1, !offset8);
                        }
                        self.a32_set(rd, res);
                    }
                }
                Ok(())
            }
            AluOperation { op, rs, rd } => self.t16_alu_operation(op, rs, rd, set_flags),
            HiRegisterOp { op, rs, rd } => {
                match op {
                    HiRegOp::Add => {
                        let result = self.a32_get(rd).wrapping_add(self.a32_get(rs));
                        if rd == A32_PC {
                            self.a32_set(rd, result & !1);
                        } else {
                            self.a32_set(rd, result);
                        }
                    }
                    HiRegOp::Cmp => {
                        let op1 = self.a32_get(rd);
                        let op2 = self.a32_get(rs);
                        let res = op1.wrapping_sub(op2);
                        self.a32_test_nzcv(res, op1, !op2);
                    }
                    HiRegOp::Mov => {
                        let value = self.a32_get(rs);
                        self.a32_set(rd, value);
                    }
                    HiRegOp::BranchExchange { link } => {
                        let target = self.a32_get(rs);
                        if link {
                            if self.config.version < ArmVersion::V5 {
                                return Err(Exception::Undefined);
                            }
                            let return_address = self.regs.get(slot::PC) as u32 | 1;
                            self.a32_set(A32_LR, return_address);
                        }
                        self.a32_set_pc_interworking(target);
                    }
                }
                Ok(())
            }
            PcRelativeLoad { rd, word8 } => {
                let base = self.a32_get(A32_PC) & !3;
                let value = self.data_read32(u64::from(base.wrapping_add(word8)), false)?;
                self.a32_set(rd, value);
                Ok(())
            }
            LoadStoreRegisterOffset {
                kind,
                quantity,
                ro,
                rb,
                rd,
            } => {
                let offset = self.a32_get(ro);
                match (kind, quantity) {
                    (LoadStoreKind::Load, ReadWriteKind::Word) => {
                        let value = self.a32_ldr(rb, offset, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Load, ReadWriteKind::Byte) => {
                        let value = self.a32_ldrb(rb, offset, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Word) => {
                        let value = self.a32_get(rd);
                        self.a32_str(value, rb, offset, true, false, false)?;
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Byte) => {
                        let value = self.a32_get(rd);
                        self.a32_strb(value, rb, offset, true, false, false)?;
                    }
                }
                Ok(())
            }
            LoadStoreSignExtended {
                h,
                sign_extend,
                ro,
                rb,
                rd,
            } => {
                let offset = self.a32_get(ro);
                match (sign_extend, h) {
                    (false, false) => {
                        let value = self.a32_get(rd);
                        self.a32_strh(value, rb, offset, true, false, false)?;
                    }
                    (false, true) => {
                        let value = self.a32_ldrh(rb, offset, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (true, false) => {
                        let value = self.a32_ldrsb(rb, offset, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (true, true) => {
                        let value = self.a32_ldrsh(rb, offset, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                }
                Ok(())
            }
            LoadStoreImmOffset {
                kind,
                quantity,
                offset5,
                rb,
                rd,
            } => {
                match (kind, quantity) {
                    (LoadStoreKind::Load, ReadWriteKind::Word) => {
                        let value = self.a32_ldr(rb, offset5 << 2, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Load, ReadWriteKind::Byte) => {
                        let value = self.a32_ldrb(rb, offset5, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Word) => {
                        let value = self.a32_get(rd);
                        self.a32_str(value, rb, offset5 << 2, true, false, false)?;
                    }
                    (LoadStoreKind::Store, ReadWriteKind::Byte) => {
                        let value = self.a32_get(rd);
                        self.a32_strb(value, rb, offset5, true, false, false)?;
                    }
                }
                Ok(())
            }
            LoadStoreHalfword {
                kind,
                offset5,
                rb,
                rd,
            } => {
                match kind {
                    LoadStoreKind::Load => {
                        let value = self.a32_ldrh(rb, offset5, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    LoadStoreKind::Store => {
                        let value = self.a32_get(rd);
                        self.a32_strh(value, rb, offset5, true, false, false)?;
                    }
                }
                Ok(())
            }
            SpRelativeLoadStore { kind, rd, word8 } => {
                match kind {
                    LoadStoreKind::Load => {
                        let value = self.a32_ldr(A32_SP, word8, true, false, false)?;
                        self.a32_set(rd, value);
                    }
                    LoadStoreKind::Store => {
                        let value = self.a32_get(rd);
                        self.a32_str(value, A32_SP, word8, true, false, false)?;
                    }
                }
                Ok(())
            }
            LoadAddress { sp, rd, word8 } => {
                let base = if sp {
                    self.a32_get(A32_SP)
                } else {
                    self.a32_get(A32_PC) & !3
                };
                self.a32_set(rd, base.wrapping_add(word8));
                Ok(())
            }
            AddOffsetToSp { negative, word7 } => {
                let sp = self.a32_get(A32_SP);
                let result = if negative {
                    sp.wrapping_sub(word7)
                } else {
                    sp.wrapping_add(word7)
                };
                self.a32_set(A32_SP, result);
                Ok(())
            }
            PushPop {
                kind,
                pc_lr,
                register_list,
            } => {
                let mut list = u16::from(register_list);
                match kind {
                    LoadStoreKind::Store => {
                        if pc_lr {
                            list |= 1 << 14;
                        }
                        self.a32_stm(list, A32_SP, false, true, true, false)
                    }
                    LoadStoreKind::Load => {
                        if pc_lr {
                            list |= 1 << 15;
                        }
                        self.a32_ldm(list, A32_SP, true, false, true, false)
                    }
                }
            }
            MultipleLoadStore {
                kind,
                rb,
                register_list,
            } => {
                let list = u16::from(register_list);
                match kind {
                    LoadStoreKind::Load => self.a32_ldm(list, rb, true, false, true, false),
                    LoadStoreKind::Store => self.a32_stm(list, rb, true, false, true, false),
                }
            }
            ConditionalBranch { condition, offset } => {
                if self.pstate.check_condition(condition) {
                    let target = self.a32_get(A32_PC).wrapping_add(offset as u32);
                    self.a32_set(A32_PC, target);
                }
                Ok(())
            }
            SoftwareInterrupt { .. } => Err(Exception::Svc),
            UnconditionalBranch { offset } => {
                let target = self.a32_get(A32_PC).wrapping_add(offset as u32);
                self.a32_set(A32_PC, target);
                Ok(())
            }
            Breakpoint { .. } => Err(Exception::Breakpoint),
            CompareBranchZero {
                nonzero,
                rn,
                offset,
            } => {
                let zero = self.a32_get(rn) == 0;
                if zero != nonzero {
                    let target = self.a32_get(A32_PC).wrapping_add(offset);
                    self.a32_set(A32_PC, target);
                }
                Ok(())
            }
            IfThen {
                first_condition,
                mask,
            } => {
                self.pstate.it = ((first_condition << 4) | mask) as u8;
                Ok(())
            }
            Extend16 { kind, rs, rd } => {
                let value = self.a32_get(rs);
                let result = match kind {
                    ExtendKind::Sxtb => sign_extend32(8, value & 0xFF),
                    ExtendKind::Sxth => sign_extend32(16, value & 0xFFFF),
                    ExtendKind::Uxtb => value & 0xFF,
                    ExtendKind::Uxth => value & 0xFFFF,
                };
                self.a32_set(rd, result);
                Ok(())
            }
            Reverse16 { kind, rs, rd } => {
                let value = self.a32_get(rs);
                let result = match kind {
                    ReverseKind::Rev => value.swap_bytes(),
                    ReverseKind::Rev16 => {
                        ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF)
                    }
                    ReverseKind::Revsh => {
                        sign_extend32(16, ((value & 0xFF) << 8) | ((value >> 8) & 0xFF))
                    }
                    ReverseKind::Rbit => value.reverse_bits(),
                };
                self.a32_set(rd, result);
                Ok(())
            }
            ChangeProcessorState16 { disable, aif } => {
                if self.is_privileged() {
                    if aif.get_bit(2) {
                        self.pstate.a = disable;
                    }
                    if aif.get_bit(1) {
                        self.pstate.i = disable;
                    }
                    if aif.get_bit(0) {
                        self.pstate.f = disable;
                    }
                }
                Ok(())
            }
            SetEndianness16 { big } => {
                self.pstate.e = big;
                Ok(())
            }
            HandlerBranch { link, handler } => {
                if link {
                    let return_address = self.regs.get(slot::PC) as u32 | 1;
                    self.a32_set(A32_LR, return_address);
                }
                let target = self.sysregs.teehbr.wrapping_add(handler * 32);
                self.regs.set(slot::PC, u64::from(target & !1));
                Ok(())
            }
            CheckArray { rn, rm } => {
                if self.a32_get(rn) <= self.a32_get(rm) {
                    return Err(Exception::ThumbEeOutOfBounds);
                }
                Ok(())
            }
            BranchLinkPair { exchange, offset } => {
                let base = (self.old_pc as u32).wrapping_add(4);
                let target = base.wrapping_add(offset as u32);
                let return_address = self.regs.get(slot::PC) as u32 | 1;
                self.a32_set(A32_LR, return_address);
                if exchange {
                    self.pstate.jt = self.filter_jt(JtState::Arm);
                    self.a32_set_pc(target & !3);
                } else {
                    self.a32_set_pc(target);
                }
                Ok(())
            }
            WideDataProcessing {
                op,
                set_conditions,
                rn,
                rd,
                op2,
            } => self.a32_data_processing(op, set_conditions, rn, rd, op2),
            WideOrn {
                set_conditions,
                rn,
                rd,
                op2,
            } => {
                let operand = self.a32_shifter_operand(op2, set_conditions);
                let result = self.a32_get(rn) | !operand;
                if set_conditions {
                    self.a32_test_nz(result);
                }
                self.a32_set(rd, result);
                Ok(())
            }
            WidePlainAddSub {
                subtract,
                rn,
                rd,
                imm12,
            } => {
                let op1 = self.a32_get(rn);
                let result = if subtract {
                    op1.wrapping_sub(imm12)
                } else {
                    op1.wrapping_add(imm12)
                };
                self.a32_set(rd, result);
                Ok(())
            }
            WideMoveHalfword { top, rd, immediate } => {
                let value = if top {
                    (self.a32_get(rd) & 0xFFFF) | (immediate << 16)
                } else {
                    immediate
                };
                self.a32_set(rd, value);
                Ok(())
            }
            WideBitField {
                kind,
                rd,
                rn,
                lsb,
                msb_or_width,
            } => {
                let result = match kind {
                    BitFieldKind::Bfc => {
                        let mask = bit_field_mask(lsb, lsb + msb_or_width);
                        self.a32_get(rd) & !mask
                    }
                    BitFieldKind::Bfi => {
                        // The T32 encoding carries the msb directly.
                        let mask = bit_field_mask(lsb, msb_or_width.max(lsb));
                        (self.a32_get(rd) & !mask) | ((self.a32_get(rn) << lsb) & mask)
                    }
                    BitFieldKind::Sbfx => {
                        let width = msb_or_width + 1;
                        sign_extend32(width, (self.a32_get(rn) >> lsb) & width_mask(width))
                    }
                    BitFieldKind::Ubfx => {
                        let width = msb_or_width + 1;
                        (self.a32_get(rn) >> lsb) & width_mask(width)
                    }
                };
                self.a32_set(rd, result);
                Ok(())
            }
            WideExtend {
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
            WideReverse { kind, rd, rm } => {
                let value = self.a32_get(rm);
                let result = match kind {
                    ReverseKind::Rev => value.swap_bytes(),
                    ReverseKind::Rev16 => {
                        ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF)
                    }
                    ReverseKind::Revsh => {
                        sign_extend32(16, ((value & 0xFF) << 8) | ((value >> 8) & 0xFF))
                    }
                    ReverseKind::Rbit => value.reverse_bits(),
                };
                self.a32_set(rd, result);
                Ok(())
            }
            WideClz { rd, rm } => {
                let value = self.a32_get(rm).leading_zeros();
                self.a32_set(rd, value);
                Ok(())
            }
            WideMultiply {
                variant,
                rd,
                rn,
                rs,
                rm,
            } => self.a32_multiply(variant, false, rd, rn, rs, rm),
            WideMultiplyLong {
                variant,
                rdhi,
                rdlo,
                rs,
                rm,
            } => self.a32_multiply_long(variant, false, rdhi, rdlo, rs, rm),
            WideDivide { signed, rd, rn, rm } => {
                let dividend = self.a32_get(rn);
                let divisor = self.a32_get(rm);
                let result = if divisor == 0 {
                    // Division by zero writes zero unless trapped.
                    0
                } else if signed {
                    (dividend as i32).wrapping_div(divisor as i32) as u32
                } else {
                    dividend / divisor
                };
                self.a32_set(rd, result);
                Ok(())
            }
            // The 32-bit branches are relative to the instruction address
            // plus 4; PC has advanced past both half-words here, so derive
            // the base from the step's start address.
            WideBranchCond { condition, offset } => {
                if self.pstate.check_condition(condition) {
                    let base = (self.old_pc as u32).wrapping_add(4);
                    self.a32_set(A32_PC, base.wrapping_add(offset as u32));
                }
                Ok(())
            }
            WideBranch { offset } => {
                let base = (self.old_pc as u32).wrapping_add(4);
                self.a32_set(A32_PC, base.wrapping_add(offset as u32));
                Ok(())
            }
            WideBranchLink { exchange, offset } => {
                let base = (self.old_pc as u32).wrapping_add(4);
                let target = base.wrapping_add(offset as u32);
                let return_address = self.regs.get(slot::PC) as u32 | 1;
                self.a32_set(A32_LR, return_address);
                if exchange {
                    self.pstate.jt = self.filter_jt(JtState::Arm);
                    self.a32_set_pc(target & !3);
                } else {
                    self.a32_set_pc(target);
                }
                Ok(())
            }
            TableBranch { halfword, rn, rm } => {
                let base = self.a32_get(rn);
                let index = self.a32_get(rm);
                let entry = if halfword {
                    u32::from(
                        self.data_read16(u64::from(base.wrapping_add(index << 1)), false)?,
                    )
                } else {
                    u32::from(self.data_read8(u64::from(base.wrapping_add(index)), false)?)
                };
                let pc_base = (self.old_pc as u32).wrapping_add(4);
                self.a32_set_pc(pc_base.wrapping_add(entry << 1));
                Ok(())
            }
            WideLoadStore {
                kind,
                size,
                sign_extend,
                rn,
                rt,
                offset,
            } => self.t32_wide_load_store(kind, size, sign_extend, rn, rt, offset),
            WideLoadStoreDual {
                kind,
                rn,
                rt,
                rt2,
                offset,
                indexing,
                offsetting,
                write_back,
            } => {
                let offset = match offsetting {
                    Offsetting::Up => offset,
                    Offsetting::Down => offset.wrapping_neg(),
                };
                let preindexed = indexing == Indexing::Pre;
                let write_back = write_back || indexing == Indexing::Post;
                match kind {
                    LoadStoreKind::Load => {
                        self.a32_ldrd(rt, rt2, rn, offset, preindexed, write_back)
                    }
                    LoadStoreKind::Store => {
                        self.a32_strd(rt, rt2, rn, offset, preindexed, write_back)
                    }
                }
            }
            WideLoadStoreExclusive {
                kind,
                rn,
                rt,
                rd,
                offset,
            } => {
                let address = u64::from(self.a32_get(rn).wrapping_add(offset));
                if address & 3 != 0 {
                    return Err(Exception::Unaligned);
                }
                match kind {
                    LoadStoreKind::Load => {
                        self.mark_exclusive(address, 4);
                        let value = self.data_read32(address, false)?;
                        self.a32_set(rt, value);
                    }
                    LoadStoreKind::Store => {
                        let ok = self.check_exclusive(address, 4);
                        if ok {
                            let value = self.a32_get(rt);
                            self.data_write32(address, value, false)?;
                        }
                        self.clear_exclusive();
                        self.a32_set(rd, u32::from(!ok));
                    }
                }
                Ok(())
            }
            WideLoadStoreMultiple {
                kind,
                rn,
                register_list,
                write_back,
                decrement,
            } => match kind {
                LoadStoreKind::Load => {
                    self.a32_ldm(register_list, rn, !decrement, decrement, write_back, false)
                }
                LoadStoreKind::Store => {
                    self.a32_stm(register_list, rn, !decrement, decrement, write_back, false)
                }
            },
            WideRfe {
                rn,
                decrement,
                write_back,
            } => self.a32_rfe(rn, !decrement, decrement, write_back),
            WideSrs {
                mode,
                decrement,
                write_back,
            } => self.a32_srs(mode, !decrement, decrement, write_back),
            WideMsr { spsr, fields, rn } => {
                let value = self.a32_get(rn);
                let mut mask = psr_field_mask(
                    fields.get_bit(3),
                    fields.get_bit(2),
                    fields.get_bit(1),
                    fields.get_bit(0),
                );
                if spsr {
                    self.a32_set_spsr(mask, value);
                } else {
                    if !self.is_privileged() {
                        mask &= 0xF80F_0000;
                    }
                    self.a32_set_cpsr(mask, value);
                }
                Ok(())
            }
            WideMrs { spsr, rd } => {
                let value = if spsr {
                    self.a32_get_spsr()
                } else {
                    self.a32_get_cpsr()
                };
                self.a32_set(rd, value);
                Ok(())
            }
            EnterLeaveX { enter } => {
                self.pstate.jt = self.filter_jt(if enter {
                    JtState::ThumbEe
                } else {
                    JtState::Thumb
                });
                Ok(())
            }
            WideClearExclusive => {
                self.clear_exclusive();
                Ok(())
            }
            WideCoprocessor { raw } => {
                // The coprocessor encodings share the A32 layout; force the
                // condition field to "always" and run the A32 path.
                let arm = ArmOpcode::decode((raw & 0x0FFF_FFFF) | 0xE000_0000, &self.config);
                self.execute_arm(arm)
            }
            Nop => Ok(()),
            Undefined => Err(Exception::Undefined),
        }
    }

    fn t16_alu_operation(
        &mut self,
        op: ThumbAluOp,
        rs: u32,
        rd: u32,
        set_flags: bool,
    ) -> ExecResult {
        let op1 = self.a32_get(rd);
        let op2 = self.a32_get(rs);
        let carry = u32::from(self.pstate.c);

        match op {
            ThumbAluOp::And => {
                let res = op1 & op2;
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Eor => {
                let res = op1 ^ op2;
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Lsl | ThumbAluOp::Lsr | ThumbAluOp::Asr | ThumbAluOp::Ror => {
                let kind = match op {
                    ThumbAluOp::Lsl => ShiftKind::Lsl,
                    ThumbAluOp::Lsr => ShiftKind::Lsr,
                    ThumbAluOp::Asr => ShiftKind::Asr,
                    _ => ShiftKind::Ror,
                };
                let amount = op2 & 0xFF;
                let res = if amount == 0 {
                    op1
                } else {
                    self.a32_shift(kind, op1, amount, set_flags)
                };
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Adc => {
                let res = op1.wrapping_add(op2).wrapping_add(carry);
                if set_flags {
                    self.a32_test_nzcv(res, op1, op2);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Sbc => {
                let res = op1.wrapping_sub(op2).wrapping_sub(1 - carry);
                if set_flags {
                    self.a32_test_nzcv(res, op1, !op2);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Tst => {
                self.a32_test_nz(op1 & op2);
            }
            ThumbAluOp::Neg => {
                let res = 0u32.wrapping_sub(op2);
                if set_flags {
                    self.a32_test_nzcv(res, 0, !op2);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Cmp => {
                let res = op1.wrapping_sub(op2);
                self.a32_test_nzcv(res, op1, !op2);
            }
            ThumbAluOp::Cmn => {
                let res = op1.wrapping_add(op2);
                self.a32_test_nzcv(res, op1, op2);
            }
            ThumbAluOp::Orr => {
                let res = op1 | op2;
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Mul => {
                let res = op1.wrapping_mul(op2);
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Bic => {
                let res = op1 & !op2;
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
            ThumbAluOp::Mvn => {
                let res = !op2;
                if set_flags {
                    self.a32_test_nz(res);
                }
                self.a32_set(rd, res);
            }
        }
        Ok(())
    }

    fn t32_wide_load_store(
        &mut self,
        kind: LoadStoreKind,
        size: WideSize,
        sign_extend: bool,
        rn: u32,
        rt: u32,
        offset: WideOffset,
    ) -> ExecResult {
        let (offset_value, preindexed, write_back) = match offset {
            WideOffset::Immediate12 { offset } => (offset, true, false),
            WideOffset::Immediate8 {
                offset,
                indexing,
                offsetting,
                write_back,
            } => {
                let value = match offsetting {
                    Offsetting::Up => offset,
                    Offsetting::Down => offset.wrapping_neg(),
                };
                (
                    value,
                    indexing == Indexing::Pre,
                    write_back || indexing == Indexing::Post,
                )
            }
            WideOffset::Register { rm, shift } => (self.a32_get(rm) << shift, true, false),
        };

        match kind {
            LoadStoreKind::Load => {
                let mut value = match size {
                    WideSize::Byte => self.a32_ldrb(rn, offset_value, preindexed, write_back, false)?,
                    WideSize::Halfword => {
                        self.a32_ldrh(rn, offset_value, preindexed, write_back, false)?
                    }
                    WideSize::Word => self.a32_ldr(rn, offset_value, preindexed, write_back, false)?,
                };
                if sign_extend {
                    value = match size {
                        WideSize::Byte => sign_extend32(8, value),
                        WideSize::Halfword => sign_extend32(16, value),
                        WideSize::Word => value,
                    };
                }
                if rt == 15 {
                    self.a32_set_interworking_v5(rt, value);
                } else {
                    self.a32_set(rt, value);
                }
            }
            LoadStoreKind::Store => {
                let value = self.a32_get(rt);
                match size {
                    WideSize::Byte => {
                        self.a32_strb(value, rn, offset_value, preindexed, write_back, false)?;
                    }
                    WideSize::Halfword => {
                        self.a32_strh(value, rn, offset_value, preindexed, write_back, false)?;
                    }
                    WideSize::Word => {
                        self.a32_str(value, rn, offset_value, preindexed, write_back, false)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn bit_field_mask(lsb: u32, msb: u32) -> u32 {
    if msb < lsb {
        return 0;
    }
    width_mask(msb - lsb + 1) << lsb
}

fn width_mask(width: u32) -> u32 {
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
    use crate::config::{ArmFeature, Isa};
    use crate::cpu::exception::StepResult;
    use crate::cpu::testing::core;

    fn thumb_core(version: ArmVersion) -> ArmCore {
        let mut cpu = core(version, &[Isa::Arm32, Isa::Thumb]);
        if version >= ArmVersion::V6 {
            cpu.config.features.insert(ArmFeature::Thumb2);
        }
        cpu.set_isa(Isa::Thumb);
        cpu
    }

    fn execute16(cpu: &mut ArmCore, hw: u16) {
        let thumbee = cpu.pstate.jt == JtState::ThumbEe;
        let opcode = ThumbOpcode::decode16(hw, &cpu.config, thumbee);
        if let Err(kind) = cpu.execute_thumb(opcode) {
            cpu.handle_exception(kind);
        }
    }

    fn execute32(cpu: &mut ArmCore, hw1: u16, hw2: u16) {
        let opcode = ThumbOpcode::decode32(hw1, hw2, &cpu.config, false);
        if let Err(kind) = cpu.execute_thumb(opcode) {
            cpu.handle_exception(kind);
        }
    }

    #[test]
    fn add_subtract_sets_flags() {
        let mut cpu = thumb_core(ArmVersion::V5);
        cpu.a32_set(0, u32::MAX);
        // ADD R1, R0, #1
        execute16(&mut cpu, 0x1C41);
        assert_eq!(cpu.a32_get(1), 0);
        assert!(cpu.pstate.z);
        assert!(cpu.pstate.c);
        assert!(!cpu.pstate.v);
    }

    #[test]
    fn alu_mul_preserves_carry() {
        let mut cpu = thumb_core(ArmVersion::V5);
        cpu.pstate.c = true;
        cpu.a32_set(0, 0xFFFF_FFFF);
        cpu.a32_set(4, 1);
        // MUL R0, R4
        execute16(&mut cpu, 0x4360);
        assert_eq!(cpu.a32_get(0), 0xFFFF_FFFF);
        assert!(cpu.pstate.n);
        assert!(!cpu.pstate.z);
    }

    #[test]
    fn hi_register_add_and_bx() {
        let mut cpu = thumb_core(ArmVersion::V5);
        cpu.a32_set(8, 10);
        cpu.a32_set(1, 10);
        // ADD R1, R8
        execute16(&mut cpu, 0x4441);
        assert_eq!(cpu.a32_get(1), 20);

        // BX LR into ARM state.
        cpu.a32_set(14, 0x3000);
        execute16(&mut cpu, 0x4770);
        assert_eq!(cpu.pstate.jt, JtState::Arm);
        assert_eq!(cpu.regs.get(slot::PC), 0x3000);
    }

    #[test]
    fn pc_relative_load() {
        let mut cpu = thumb_core(ArmVersion::V5);
        cpu.data_write32(0x158, 0x4241_4140, false).unwrap();
        cpu.regs.set(slot::PC, 0x100);
        // LDR R1, [PC, #88]
        execute16(&mut cpu, 0x4916);
        assert_eq!(cpu.a32_get(1), 0x4241_4140);
    }

    #[test]
    fn push_pop_round_trip() {
        let mut cpu = thumb_core(ArmVersion::V5);
        cpu.a32_set(A32_SP, 0x1000);
        cpu.a32_set(4, 0x44);
        cpu.a32_set(5, 0x55);
        cpu.a32_set(14, 0x1234);
        // PUSH {R4, R5, LR}
        execute16(&mut cpu, 0xB530);
        assert_eq!(cpu.a32_get(A32_SP), 0x1000 - 12);

        cpu.a32_set(4, 0);
        cpu.a32_set(5, 0);
        // POP {R4, R5, PC}
        execute16(&mut cpu, 0xBD30);
        assert_eq!(cpu.a32_get(4), 0x44);
        assert_eq!(cpu.a32_get(5), 0x55);
        assert_eq!(cpu.a32_get(A32_SP), 0x1000);
        // The loaded PC interworks: bit 0 clear would select ARM, but the
        // stored value 0x1234 has bit 0 clear within a word-aligned value.
        assert_eq!(cpu.regs.get(slot::PC), 0x1234);
        assert_eq!(cpu.pstate.jt, JtState::Arm);
    }

    #[test]
    fn it_block_gates_execution() {
        // S4: ITTEE EQ with Z=1 executes the two T lanes and skips the two
        // E lanes.
        let mut cpu = thumb_core(ArmVersion::V7);
        cpu.pstate.z = true;
        cpu.pstate.c = true;

        let program: [u16; 5] = [
            0xBF07, // ITTEE EQ
            0x2001, // MOVEQ R0, #1
            0x2102, // MOVEQ R1, #2
            0x2203, // MOVNE R2, #3
            0x2304, // MOVNE R3, #4
        ];
        let mut address = 0x100u64;
        for hw in program {
            let bytes = hw.to_le_bytes();
            cpu.data_write8(address, bytes[0], false).unwrap();
            cpu.data_write8(address + 1, bytes[1], false).unwrap();
            address += 2;
        }
        cpu.regs.set(slot::PC, 0x100);
        for _ in 0..5 {
            cpu.t32_step();
        }

        assert_eq!(cpu.a32_get(0), 1);
        assert_eq!(cpu.a32_get(1), 2);
        assert_eq!(cpu.a32_get(2), 0);
        assert_eq!(cpu.a32_get(3), 0);
        assert_eq!(cpu.pstate.it, 0);
    }

    #[test]
    fn wide_data_processing_immediate() {
        let mut cpu = thumb_core(ArmVersion::V7);
        cpu.a32_set(1, 2);
        // ADDS.W R0, R1, #0x880000 -- modified immediate
        execute32(&mut cpu, 0xF511, 0x0008);
        assert_eq!(cpu.a32_get(0), 2 + 0x0088_0000);
    }

    #[test]
    fn wide_branch_link() {
        let mut cpu = thumb_core(ArmVersion::V7);
        cpu.old_pc = 0x100;
        cpu.regs.set(slot::PC, 0x104);
        execute32(&mut cpu, 0xF000, 0xF802);
        assert_eq!(cpu.a32_get(14), 0x105);
        assert_eq!(cpu.regs.get(slot::PC), 0x100 + 4 + 4);
    }

    #[test]
    fn wide_load_store() {
        let mut cpu = thumb_core(ArmVersion::V7);
        cpu.a32_set(0, 0x1000);
        cpu.a32_set(1, 0xDEAD_BEEF);
        // STR.W R1, [R0, #16]
        execute32(&mut cpu, 0xF8C0, 0x1010);
        assert_eq!(cpu.data_read32(0x1010, false).unwrap(), 0xDEAD_BEEF);

        cpu.a32_set(2, 0);
        // LDR.W R2, [R0, #16]
        execute32(&mut cpu, 0xF8D0, 0x2010);
        assert_eq!(cpu.a32_get(2), 0xDEAD_BEEF);
    }

    #[test]
    fn thumbee_null_base_vectors_to_handler() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb, Isa::ThumbEe]);
        cpu.config.features.insert(ArmFeature::Thumb2);
        cpu.set_isa(Isa::ThumbEe);
        cpu.sysregs.teehbr = 0x8000;
        cpu.regs.set(slot::PC, 0x100);
        cpu.a32_set(1, 0); // null base

        // LDR R0, [R1, #0]
        execute16(&mut cpu, 0x6808);
        // Branches to TEEHBR - 4 with the return address in LR.
        assert_eq!(cpu.regs.get(slot::PC), 0x8000 - 4);
        assert_eq!(cpu.a32_get(14), 0x101);

        // CHKA R0, R2 with R0 <= R2 goes to TEEHBR - 8.
        cpu.regs.set(slot::PC, 0x100);
        cpu.a32_set(0, 3);
        cpu.a32_set(2, 5);
        execute16(&mut cpu, 0xCA10);
        assert_eq!(cpu.regs.get(slot::PC), 0x8000 - 8);
    }

    #[test]
    fn thumbee_capture_reports_null_pointer() {
        let mut cpu = core(ArmVersion::V7, &[Isa::Arm32, Isa::Thumb, Isa::ThumbEe]);
        cpu.config.features.insert(ArmFeature::Thumb2);
        cpu.set_isa(Isa::ThumbEe);
        cpu.capture_breaks = true;
        cpu.a32_set(1, 0);
        execute16(&mut cpu, 0x6808);
        assert_eq!(cpu.result, StepResult::ThumbEeNullPtr);
    }

    #[test]
    fn pre_thumb2_bl_pair_executes_as_unit() {
        let mut cpu = thumb_core(ArmVersion::V4);
        // BL pair at 0x100: F000 F802 -> target 0x100 + 4 + 4.
        cpu.data_write16(0x100, 0xF000, false).unwrap();
        cpu.data_write16(0x102, 0xF802, false).unwrap();
        cpu.regs.set(slot::PC, 0x100);
        cpu.t32_step();
        assert_eq!(cpu.regs.get(slot::PC), 0x108);
        assert_eq!(cpu.a32_get(14), 0x105);
    }
}
