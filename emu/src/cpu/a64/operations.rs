//! A64 instruction execution.
//!
//! Register 31 resolves to the zero register on data-processing operands
//! and to the selected stack pointer on address bases and on add/sub and
//! logical immediates; an SP-relative access with a misaligned SP raises
//! the SP-alignment fault before any memory is touched.

use crate::bitwise::{sign_extend64, Bits};
use crate::cpu::a64::bitmask::{bfm32, bfm64, sbfm32, sbfm64, ubfm32, ubfm64};
use crate::cpu::a64::instructions::{
    A64Instruction, A64Offset, BitfieldOp, BranchRegisterOp, CondSelectOp, DataProc1Op,
    DataProc2Op, DataProc3Op, ExceptionGenOp, LogicalOp, MoveWideOp, PairMode, PstateField,
};
use crate::cpu::core::ArmCore;
use crate::cpu::exception::{Exception, ExecResult};
use crate::cpu::registers::slot;

impl ArmCore {
    pub(crate) fn a64_step(&mut self) {
        self.old_pc = self.regs.get(slot::PC);
        if let Err(kind) = self.a64_step_inner() {
            self.handle_exception(kind);
        }
    }

    fn a64_step_inner(&mut self) -> ExecResult {
        let raw = self.a64_fetch32()?;
        let instruction = A64Instruction::decode(raw);
        logger::instruction(self.old_pc, "A64", format_args!("{instruction:?}"));
        self.execute_a64(instruction)
    }

    fn a64_test_nz64(&mut self, res: u64) {
        self.pstate.z = res == 0;
        self.pstate.n = res.get_bit(63);
    }

    fn a64_test_nzcv64(&mut self, res: u64, op1: u64, op2: u64) {
        self.pstate.c = ((op1 & op2) | (op1 & !res) | (op2 & !res)).get_bit(63);
        self.pstate.v = ((op1 & op2 & !res) | (!op1 & !op2 & res)).get_bit(63);
        self.a64_test_nz64(res);
    }

    /// Addition with optional flag update, in either register width.
    fn a64_add(&mut self, sf: bool, op1: u64, op2: u64, carry: u64, set_flags: bool) -> u64 {
        if sf {
            let res = op1.wrapping_add(op2).wrapping_add(carry);
            if set_flags {
                self.a64_test_nzcv64(res, op1, op2);
            }
            res
        } else {
            let res = (op1 as u32)
                .wrapping_add(op2 as u32)
                .wrapping_add(carry as u32);
            if set_flags {
                self.a32_test_nzcv(res, op1 as u32, op2 as u32);
            }
            u64::from(res)
        }
    }

    fn a64_write(&mut self, sf: bool, rd: u32, suppress_sp: bool, value: u64) {
        if sf {
            self.a64_set64(rd, suppress_sp, value);
        } else {
            self.a64_set32(rd, suppress_sp, value as u32);
        }
    }

    /// Address base read: register 31 is SP here, checked for 16-byte
    /// alignment as required of SP-relative accesses.
    fn a64_base(&mut self, rn: u32) -> ExecResult<u64> {
        let base = self.a64_get64(rn, false);
        if rn == 31 && base & 0xF != 0 {
            return Err(Exception::UnalignedSp);
        }
        Ok(base)
    }

    fn a64_shifted(&self, sf: bool, value: u64, shift_type: u32, amount: u32) -> u64 {
        if sf {
            match shift_type {
                0b00 => {
                    if amount < 64 {
                        value << amount
                    } else {
                        0
                    }
                }
                0b01 => {
                    if amount < 64 {
                        value >> amount
                    } else {
                        0
                    }
                }
                0b10 => {
                    if amount < 64 {
                        ((value as i64) >> amount) as u64
                    } else {
                        ((value as i64) >> 63) as u64
                    }
                }
                _ => value.rotate_right(amount & 0x3F),
            }
        } else {
            let value = value as u32;
            let result = match shift_type {
                0b00 => {
                    if amount < 32 {
                        value << amount
                    } else {
                        0
                    }
                }
                0b01 => {
                    if amount < 32 {
                        value >> amount
                    } else {
                        0
                    }
                }
                0b10 => {
                    if amount < 32 {
                        ((value as i32) >> amount) as u32
                    } else {
                        ((value as i32) >> 31) as u32
                    }
                }
                _ => value.rotate_right(amount & 0x1F),
            };
            u64::from(result)
        }
    }

    /// The {UXTB..SXTX, LSL} extended-register operand.
    fn a64_extend(&self, value: u64, option: u32, amount: u32) -> u64 {
        let extended = match option {
            0b000 => u64::from(value as u8),
            0b001 => u64::from(value as u16),
            0b010 => u64::from(value as u32),
            0b011 => value,
            0b100 => sign_extend64(8, u64::from(value as u8)),
            0b101 => sign_extend64(16, u64::from(value as u16)),
            0b110 => sign_extend64(32, u64::from(value as u32)),
            _ => value,
        };
        extended << amount.min(4)
    }

    pub(crate) fn execute_a64(&mut self, instruction: A64Instruction) -> ExecResult {
        use A64Instruction::*;

        match instruction {
            Adr { page, rd, offset } => {
                let mut base = self.old_pc;
                if page {
                    base &= !0xFFF;
                }
                self.a64_set64(rd, true, base.wrapping_add(offset as u64));
                Ok(())
            }
            AddSubImmediate {
                sf,
                subtract,
                set_flags,
                rd,
                rn,
                immediate,
            } => {
                let op1 = self.a64_get64(rn, false);
                let result = if subtract {
                    self.a64_add(sf, op1, !immediate, 1, set_flags)
                } else {
                    self.a64_add(sf, op1, immediate, 0, set_flags)
                };
                // ADDS/SUBS target the zero register, not SP.
                self.a64_write(sf, rd, set_flags, result);
                Ok(())
            }
            LogicalImmediate { sf, op, rd, rn, mask } => {
                let op1 = self.a64_get64(rn, true);
                let (result, set_flags) = match op {
                    LogicalOp::And => (op1 & mask, false),
                    LogicalOp::Orr => (op1 | mask, false),
                    LogicalOp::Eor => (op1 ^ mask, false),
                    LogicalOp::Ands => (op1 & mask, true),
                };
                if set_flags {
                    if sf {
                        self.a64_test_nz64(result);
                    } else {
                        self.a32_test_nz(result as u32);
                    }
                    self.pstate.c = false;
                    self.pstate.v = false;
                }
                // The plain logical immediates may target SP.
                self.a64_write(sf, rd, set_flags, result);
                Ok(())
            }
            MoveWide {
                sf,
                op,
                rd,
                imm16,
                shift,
            } => {
                let shifted = u64::from(imm16) << shift;
                let result = match op {
                    MoveWideOp::Movz => shifted,
                    MoveWideOp::Movn => !shifted,
                    MoveWideOp::Movk => {
                        let old = self.a64_get64(rd, true);
                        (old & !(0xFFFFu64 << shift)) | shifted
                    }
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            Bitfield {
                sf,
                op,
                rd,
                rn,
                immr,
                imms,
            } => {
                let src = self.a64_get64(rn, true);
                let result = if sf {
                    match op {
                        BitfieldOp::Sbfm => sbfm64(src, immr, imms),
                        BitfieldOp::Ubfm => ubfm64(src, immr, imms),
                        BitfieldOp::Bfm => bfm64(self.a64_get64(rd, true), src, immr, imms),
                    }
                } else {
                    let narrow = src as u32;
                    u64::from(match op {
                        BitfieldOp::Sbfm => sbfm32(narrow, immr, imms),
                        BitfieldOp::Ubfm => ubfm32(narrow, immr, imms),
                        BitfieldOp::Bfm => {
                            bfm32(self.a64_get32(rd, true), narrow, immr, imms)
                        }
                    })
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            Extract { sf, rd, rn, rm, lsb } => {
                let high = self.a64_get64(rn, true);
                let low = self.a64_get64(rm, true);
                let result = if sf {
                    if lsb == 0 {
                        low
                    } else {
                        (low >> lsb) | (high << (64 - lsb))
                    }
                } else {
                    let high = high as u32;
                    let low = low as u32;
                    u64::from(if lsb == 0 {
                        low
                    } else {
                        (low >> lsb) | (high << (32 - lsb))
                    })
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            LogicalShiftedRegister {
                sf,
                op,
                invert,
                rd,
                rn,
                rm,
                shift_type,
                amount,
            } => {
                let op1 = self.a64_get64(rn, true);
                let mut op2 = self.a64_shifted(sf, self.a64_get64(rm, true), shift_type, amount);
                if invert {
                    op2 = !op2;
                    if !sf {
                        op2 &= 0xFFFF_FFFF;
                    }
                }
                let (result, set_flags) = match op {
                    LogicalOp::And => (op1 & op2, false),
                    LogicalOp::Orr => (op1 | op2, false),
                    LogicalOp::Eor => (op1 ^ op2, false),
                    LogicalOp::Ands => (op1 & op2, true),
                };
                if set_flags {
                    if sf {
                        self.a64_test_nz64(result);
                    } else {
                        self.a32_test_nz(result as u32);
                    }
                    self.pstate.c = false;
                    self.pstate.v = false;
                }
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            AddSubShiftedRegister {
                sf,
                subtract,
                set_flags,
                rd,
                rn,
                rm,
                shift_type,
                amount,
            } => {
                let op1 = self.a64_get64(rn, true);
                let op2 = self.a64_shifted(sf, self.a64_get64(rm, true), shift_type, amount);
                let result = if subtract {
                    let complement = if sf { !op2 } else { u64::from(!(op2 as u32)) };
                    self.a64_add(sf, op1, complement, 1, set_flags)
                } else {
                    self.a64_add(sf, op1, op2, 0, set_flags)
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            AddSubExtendedRegister {
                sf,
                subtract,
                set_flags,
                rd,
                rn,
                rm,
                option,
                amount,
            } => {
                // The base operand reads SP, the offset reads XZR.
                let op1 = self.a64_get64(rn, false);
                let mut op2 = self.a64_extend(self.a64_get64(rm, true), option, amount);
                if !sf {
                    op2 &= 0xFFFF_FFFF;
                }
                let result = if subtract {
                    let complement = if sf { !op2 } else { u64::from(!(op2 as u32)) };
                    self.a64_add(sf, op1, complement, 1, set_flags)
                } else {
                    self.a64_add(sf, op1, op2, 0, set_flags)
                };
                self.a64_write(sf, rd, set_flags, result);
                Ok(())
            }
            AddSubCarry {
                sf,
                subtract,
                set_flags,
                rd,
                rn,
                rm,
            } => {
                let op1 = self.a64_get64(rn, true);
                let op2 = self.a64_get64(rm, true);
                let carry = u64::from(self.pstate.c);
                let result = if subtract {
                    let complement = if sf { !op2 } else { u64::from(!(op2 as u32)) };
                    self.a64_add(sf, op1, complement, carry, set_flags)
                } else {
                    self.a64_add(sf, op1, op2, carry, set_flags)
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            CondSelect {
                sf,
                op,
                rd,
                rn,
                rm,
                condition,
            } => {
                let result = if self.pstate.check_condition_a64(condition) {
                    self.a64_get64(rn, true)
                } else {
                    let other = self.a64_get64(rm, true);
                    match op {
                        CondSelectOp::Csel => other,
                        CondSelectOp::Csinc => other.wrapping_add(1),
                        CondSelectOp::Csinv => !other,
                        CondSelectOp::Csneg => other.wrapping_neg(),
                    }
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            DataProc1 { sf, op, rd, rn } => {
                let src = self.a64_get64(rn, true);
                let result = if sf {
                    match op {
                        DataProc1Op::Rbit => src.reverse_bits(),
                        DataProc1Op::Rev16 => {
                            let swapped = src.swap_bytes();
                            ((swapped & 0x00FF_00FF_00FF_00FF) << 8)
                                | ((swapped >> 8) & 0x00FF_00FF_00FF_00FF)
                        }
                        DataProc1Op::Rev32 => {
                            let swapped = src.swap_bytes();
                            swapped.rotate_left(32)
                        }
                        DataProc1Op::Rev => src.swap_bytes(),
                        DataProc1Op::Clz => u64::from(src.leading_zeros()),
                        DataProc1Op::Cls => {
                            u64::from((src ^ ((src as i64 >> 1) as u64)).leading_zeros().max(1) - 1)
                        }
                    }
                } else {
                    let narrow = src as u32;
                    u64::from(match op {
                        DataProc1Op::Rbit => narrow.reverse_bits(),
                        DataProc1Op::Rev16 => {
                            ((narrow & 0x00FF_00FF) << 8) | ((narrow >> 8) & 0x00FF_00FF)
                        }
                        DataProc1Op::Rev32 | DataProc1Op::Rev => narrow.swap_bytes(),
                        DataProc1Op::Clz => narrow.leading_zeros(),
                        DataProc1Op::Cls => {
                            (narrow ^ ((narrow as i32 >> 1) as u32)).leading_zeros().max(1) - 1
                        }
                    })
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            DataProc2 { sf, op, rd, rn, rm } => {
                let op1 = self.a64_get64(rn, true);
                let op2 = self.a64_get64(rm, true);
                let result = if sf {
                    match op {
                        DataProc2Op::Udiv => op1.checked_div(op2).unwrap_or(0),
                        DataProc2Op::Sdiv => {
                            if op2 == 0 {
                                0
                            } else {
                                (op1 as i64).wrapping_div(op2 as i64) as u64
                            }
                        }
                        DataProc2Op::Lslv => self.a64_shifted(true, op1, 0b00, (op2 & 0x3F) as u32),
                        DataProc2Op::Lsrv => self.a64_shifted(true, op1, 0b01, (op2 & 0x3F) as u32),
                        DataProc2Op::Asrv => self.a64_shifted(true, op1, 0b10, (op2 & 0x3F) as u32),
                        DataProc2Op::Rorv => op1.rotate_right((op2 & 0x3F) as u32),
                    }
                } else {
                    let w1 = op1 as u32;
                    let w2 = op2 as u32;
                    u64::from(match op {
                        DataProc2Op::Udiv => w1.checked_div(w2).unwrap_or(0),
                        DataProc2Op::Sdiv => {
                            if w2 == 0 {
                                0
                            } else {
                                (w1 as i32).wrapping_div(w2 as i32) as u32
                            }
                        }
                        DataProc2Op::Lslv => {
                            self.a64_shifted(false, op1, 0b00, w2 & 0x1F) as u32
                        }
                        DataProc2Op::Lsrv => {
                            self.a64_shifted(false, op1, 0b01, w2 & 0x1F) as u32
                        }
                        DataProc2Op::Asrv => {
                            self.a64_shifted(false, op1, 0b10, w2 & 0x1F) as u32
                        }
                        DataProc2Op::Rorv => w1.rotate_right(w2 & 0x1F),
                    })
                };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            DataProc3 {
                sf,
                op,
                rd,
                rn,
                rm,
                ra,
            } => {
                let op1 = self.a64_get64(rn, true);
                let op2 = self.a64_get64(rm, true);
                let acc = self.a64_get64(ra, true);
                let result = match op {
                    DataProc3Op::Madd => acc.wrapping_add(op1.wrapping_mul(op2)),
                    DataProc3Op::Msub => acc.wrapping_sub(op1.wrapping_mul(op2)),
                    DataProc3Op::Smaddl => (acc as i64)
                        .wrapping_add(i64::from(op1 as i32).wrapping_mul(i64::from(op2 as i32)))
                        as u64,
                    DataProc3Op::Smsubl => (acc as i64)
                        .wrapping_sub(i64::from(op1 as i32).wrapping_mul(i64::from(op2 as i32)))
                        as u64,
                    DataProc3Op::Umaddl => {
                        acc.wrapping_add(u64::from(op1 as u32).wrapping_mul(u64::from(op2 as u32)))
                    }
                    DataProc3Op::Umsubl => {
                        acc.wrapping_sub(u64::from(op1 as u32).wrapping_mul(u64::from(op2 as u32)))
                    }
                    DataProc3Op::Smulh => {
                        ((i128::from(op1 as i64) * i128::from(op2 as i64)) >> 64) as u64
                    }
                    DataProc3Op::Umulh => {
                        ((u128::from(op1) * u128::from(op2)) >> 64) as u64
                    }
                };
                let result = if sf { result } else { u64::from(result as u32) };
                self.a64_write(sf, rd, true, result);
                Ok(())
            }
            Branch { link, offset } => {
                if link {
                    let return_address = self.regs.get(slot::PC);
                    self.regs.set(slot::A64_LR, return_address);
                }
                self.regs
                    .set(slot::PC, self.old_pc.wrapping_add(offset as u64));
                Ok(())
            }
            BranchCond { condition, offset } => {
                if self.pstate.check_condition_a64(condition) {
                    self.regs
                        .set(slot::PC, self.old_pc.wrapping_add(offset as u64));
                }
                Ok(())
            }
            CompareBranch {
                sf,
                nonzero,
                rt,
                offset,
            } => {
                let value = if sf {
                    self.a64_get64(rt, true)
                } else {
                    u64::from(self.a64_get32(rt, true))
                };
                if (value == 0) != nonzero {
                    self.regs
                        .set(slot::PC, self.old_pc.wrapping_add(offset as u64));
                }
                Ok(())
            }
            TestBranch {
                nonzero,
                rt,
                bit,
                offset,
            } => {
                let value = self.a64_get64(rt, true);
                if value.get_bit(bit as u8) == nonzero {
                    self.regs
                        .set(slot::PC, self.old_pc.wrapping_add(offset as u64));
                }
                Ok(())
            }
            BranchRegister { op, rn } => {
                let target = self.a64_get64(rn, true);
                if matches!(op, BranchRegisterOp::Blr) {
                    let return_address = self.regs.get(slot::PC);
                    self.regs.set(slot::A64_LR, return_address);
                }
                self.regs.set(slot::PC, target);
                Ok(())
            }
            ExceptionReturn => {
                self.a64_eret();
                Ok(())
            }
            ExceptionGen { op, .. } => Err(match op {
                ExceptionGenOp::Svc => Exception::Svc,
                ExceptionGenOp::Hvc => Exception::Hvc,
                ExceptionGenOp::Smc => Exception::Smc,
                ExceptionGenOp::Brk => Exception::Breakpoint,
            }),
            SystemMove {
                read,
                rt,
                op0,
                op1,
                crn,
                crm,
                op2,
            } => self.a64_system_move(read, rt, (op0, op1, crn, crm, op2)),
            PstateWrite { field, imm } => {
                match field {
                    PstateField::SpSel => self.pstate.sp = imm & 1 != 0,
                    PstateField::DaifSet => {
                        if imm & 0b1000 != 0 {
                            self.pstate.d = true;
                        }
                        if imm & 0b0100 != 0 {
                            self.pstate.a = true;
                        }
                        if imm & 0b0010 != 0 {
                            self.pstate.i = true;
                        }
                        if imm & 0b0001 != 0 {
                            self.pstate.f = true;
                        }
                    }
                    PstateField::DaifClr => {
                        if imm & 0b1000 != 0 {
                            self.pstate.d = false;
                        }
                        if imm & 0b0100 != 0 {
                            self.pstate.a = false;
                        }
                        if imm & 0b0010 != 0 {
                            self.pstate.i = false;
                        }
                        if imm & 0b0001 != 0 {
                            self.pstate.f = false;
                        }
                    }
                }
                Ok(())
            }
            LoadStoreRegister {
                load,
                size,
                sign_extend_32,
                rt,
                rn,
                offset,
            } => self.a64_load_store(load, size, sign_extend_32, rt, rn, offset),
            LoadLiteral {
                size_64,
                signed_word,
                rt,
                offset,
            } => {
                let address = self.old_pc.wrapping_add(offset as u64);
                if signed_word {
                    let value = self.data_read32(address, false)?;
                    self.a64_set64(rt, true, sign_extend64(32, u64::from(value)));
                } else if size_64 {
                    let value = self.data_read64(address, false)?;
                    self.a64_set64(rt, true, value);
                } else {
                    let value = self.data_read32(address, false)?;
                    self.a64_set32(rt, true, value);
                }
                Ok(())
            }
            LoadStorePair {
                load,
                sf,
                signed_word,
                rt,
                rt2,
                rn,
                offset,
                mode,
            } => self.a64_load_store_pair(load, sf, signed_word, rt, rt2, rn, offset, mode),
            LoadStoreExclusive {
                load,
                size,
                rt,
                rn,
                rs,
            } => {
                let address = self.a64_base(rn)?;
                let bytes = 1u64 << size;
                if address & (bytes - 1) != 0 {
                    return Err(Exception::Unaligned);
                }
                if load {
                    self.mark_exclusive(address, bytes);
                    let value = match size {
                        0 => u64::from(self.data_read8(address, false)?),
                        1 => u64::from(self.data_read16(address, false)?),
                        2 => u64::from(self.data_read32(address, false)?),
                        _ => self.data_read64(address, false)?,
                    };
                    self.a64_set64(rt, true, value);
                } else {
                    let ok = self.check_exclusive(address, bytes);
                    if ok {
                        let value = self.a64_get64(rt, true);
                        match size {
                            0 => self.data_write8(address, value as u8, false)?,
                            1 => self.data_write16(address, value as u16, false)?,
                            2 => self.data_write32(address, value as u32, false)?,
                            _ => self.data_write64(address, value, false)?,
                        }
                    }
                    self.clear_exclusive();
                    self.a64_set32(rs, true, u32::from(!ok));
                }
                Ok(())
            }
            ClearExclusive => {
                self.clear_exclusive();
                Ok(())
            }
            Nop => Ok(()),
            Undefined => Err(Exception::Undefined),
        }
    }

    fn a64_load_store(
        &mut self,
        load: bool,
        size: u32,
        sign_extend_32: Option<bool>,
        rt: u32,
        rn: u32,
        offset: A64Offset,
    ) -> ExecResult {
        let base = self.a64_base(rn)?;
        let (address, write_back) = match offset {
            A64Offset::Unsigned { offset } => (base.wrapping_add(offset), None),
            A64Offset::Unscaled { offset } => (base.wrapping_add(offset as u64), None),
            A64Offset::PreIndexed { offset } => {
                let address = base.wrapping_add(offset as u64);
                (address, Some(address))
            }
            A64Offset::PostIndexed { offset } => (base, Some(base.wrapping_add(offset as u64))),
            A64Offset::Register { rm, option, shift } => {
                let offset = self.a64_extend(self.a64_get64(rm, true), option, 0) << shift;
                (base.wrapping_add(offset), None)
            }
        };

        if load {
            let raw = match size {
                0 => u64::from(self.data_read8(address, false)?),
                1 => u64::from(self.data_read16(address, false)?),
                2 => u64::from(self.data_read32(address, false)?),
                _ => self.data_read64(address, false)?,
            };
            match sign_extend_32 {
                None => {
                    if size == 3 {
                        self.a64_set64(rt, true, raw);
                    } else {
                        self.a64_set32(rt, true, raw as u32);
                    }
                }
                Some(to_32) => {
                    let width = 8u32 << size;
                    let extended = sign_extend64(width, raw);
                    if to_32 {
                        self.a64_set32(rt, true, extended as u32);
                    } else {
                        self.a64_set64(rt, true, extended);
                    }
                }
            }
        } else {
            let value = self.a64_get64(rt, true);
            match size {
                0 => self.data_write8(address, value as u8, false)?,
                1 => self.data_write16(address, value as u16, false)?,
                2 => self.data_write32(address, value as u32, false)?,
                _ => self.data_write64(address, value, false)?,
            }
        }

        if let Some(updated) = write_back {
            self.a64_set64(rn, false, updated);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn a64_load_store_pair(
        &mut self,
        load: bool,
        sf: bool,
        signed_word: bool,
        rt: u32,
        rt2: u32,
        rn: u32,
        offset: i64,
        mode: PairMode,
    ) -> ExecResult {
        let base = self.a64_base(rn)?;
        let address = match mode {
            PairMode::Offset | PairMode::PreIndexed => base.wrapping_add(offset as u64),
            PairMode::PostIndexed => base,
        };
        let step = if sf { 8 } else { 4 };

        if load {
            let (first, second) = if sf {
                (
                    self.data_read64(address, false)?,
                    self.data_read64(address + step, false)?,
                )
            } else {
                (
                    u64::from(self.data_read32(address, false)?),
                    u64::from(self.data_read32(address + step, false)?),
                )
            };
            let (first, second) = if signed_word {
                (sign_extend64(32, first), sign_extend64(32, second))
            } else {
                (first, second)
            };
            if sf || signed_word {
                self.a64_set64(rt, true, first);
                self.a64_set64(rt2, true, second);
            } else {
                self.a64_set32(rt, true, first as u32);
                self.a64_set32(rt2, true, second as u32);
            }
        } else {
            let first = self.a64_get64(rt, true);
            let second = self.a64_get64(rt2, true);
            if sf {
                self.data_write64(address, first, false)?;
                self.data_write64(address + step, second, false)?;
            } else {
                self.data_write32(address, first as u32, false)?;
                self.data_write32(address + step, second as u32, false)?;
            }
        }

        match mode {
            PairMode::Offset => {}
            PairMode::PreIndexed => self.a64_set64(rn, false, address),
            PairMode::PostIndexed => {
                self.a64_set64(rn, false, base.wrapping_add(offset as u64));
            }
        }
        Ok(())
    }

    /// The implemented subset of the (op0, op1, CRn, CRm, op2) system
    /// register space. Anything else is Undefined, exactly as an
    /// unimplemented register traps on hardware.
    fn a64_system_move(
        &mut self,
        read: bool,
        rt: u32,
        coordinates: (u32, u32, u32, u32, u32),
    ) -> ExecResult {
        let el = usize::from(self.pstate.el.max(1) - 1);
        if read {
            let value = match coordinates {
                // MIDR_EL1, ID_PFR0_EL1
                (3, 0, 0, 0, 0) => u64::from(self.midr()),
                (3, 0, 0, 1, 0) => u64::from(self.id_pfr0()),
                (3, 0, 1, 0, 0) => u64::from(self.sysregs.sctlr_el1),
                (3, 4, 1, 0, 0) => u64::from(self.sysregs.sctlr_el2),
                (3, 6, 1, 0, 0) => u64::from(self.sysregs.sctlr_el3),
                (3, 4, 1, 1, 0) => self.sysregs.hcr_el2,
                (3, 6, 1, 1, 0) => u64::from(self.sysregs.scr_el3),
                (3, 0, 12, 0, 0) => self.sysregs.vbar_el1,
                (3, 4, 12, 0, 0) => self.sysregs.vbar_el2,
                (3, 6, 12, 0, 0) => self.sysregs.vbar_el3,
                // NZCV
                (3, 3, 4, 2, 0) => {
                    (u64::from(self.pstate.n) << 31)
                        | (u64::from(self.pstate.z) << 30)
                        | (u64::from(self.pstate.c) << 29)
                        | (u64::from(self.pstate.v) << 28)
                }
                // CurrentEL
                (3, 0, 4, 2, 2) => u64::from(self.pstate.el) << 2,
                // SPSR_ELx / ELR_ELx of the current EL
                (3, 0 | 4 | 6, 4, 0, 0) => self.regs.get(slot::SPSR_EL1 + el),
                (3, 0 | 4 | 6, 4, 0, 1) => self.regs.get(slot::ELR_EL1 + el),
                // SP_EL0
                (3, 0, 4, 1, 0) => self.regs.get(slot::SP_EL0),
                _ => return Err(Exception::Undefined),
            };
            self.a64_set64(rt, true, value);
            Ok(())
        } else {
            let value = self.a64_get64(rt, true);
            match coordinates {
                (3, 0, 1, 0, 0) => self.sysregs.sctlr_el1 = value as u32,
                (3, 4, 1, 0, 0) => self.sysregs.sctlr_el2 = value as u32,
                (3, 6, 1, 0, 0) => self.sysregs.sctlr_el3 = value as u32,
                (3, 4, 1, 1, 0) => self.sysregs.hcr_el2 = value,
                (3, 6, 1, 1, 0) => self.sysregs.scr_el3 = value as u32,
                (3, 0, 12, 0, 0) => self.sysregs.vbar_el1 = value,
                (3, 4, 12, 0, 0) => self.sysregs.vbar_el2 = value,
                (3, 6, 12, 0, 0) => self.sysregs.vbar_el3 = value,
                (3, 3, 4, 2, 0) => {
                    self.pstate.n = value.get_bit(31);
                    self.pstate.z = value.get_bit(30);
                    self.pstate.c = value.get_bit(29);
                    self.pstate.v = value.get_bit(28);
                }
                (3, 0 | 4 | 6, 4, 0, 0) => self.regs.set(slot::SPSR_EL1 + el, value),
                (3, 0 | 4 | 6, 4, 0, 1) => self.regs.set(slot::ELR_EL1 + el, value),
                (3, 0, 4, 1, 0) => self.regs.set(slot::SP_EL0, value),
                _ => return Err(Exception::Undefined),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ArmVersion, Isa};
    use crate::cpu::exception::StepResult;
    use crate::cpu::testing::core;

    fn a64_core() -> ArmCore {
        let mut cpu = core(ArmVersion::V8, &[Isa::Arm32, Isa::Arm64]);
        cpu.set_isa(Isa::Arm64);
        cpu
    }

    fn execute(cpu: &mut ArmCore, raw: u32) {
        let instruction = A64Instruction::decode(raw);
        if let Err(kind) = cpu.execute_a64(instruction) {
            cpu.handle_exception(kind);
        }
    }

    #[test]
    fn add_and_subs_flags() {
        let mut cpu = a64_core();
        cpu.a64_set64(1, true, 40);
        // ADD X0, X1, #4
        execute(&mut cpu, 0x9100_1020);
        assert_eq!(cpu.a64_get64(0, true), 44);

        // SUBS W3, W4, #1, LSL #12 with W4 = 0: borrows.
        cpu.a64_set32(4, true, 0);
        execute(&mut cpu, 0x7140_0483);
        assert_eq!(cpu.a64_get32(3, true), 0u32.wrapping_sub(1 << 12));
        assert!(!cpu.pstate.c);
        assert!(cpu.pstate.n);
    }

    #[test]
    fn logical_immediate_masks() {
        let mut cpu = a64_core();
        cpu.a64_set64(1, true, 0x1234_5678_9ABC_DEF0);
        // AND X0, X1, #0xF
        execute(&mut cpu, 0x9240_0C20);
        assert_eq!(cpu.a64_get64(0, true), 0);
        cpu.a64_set64(1, true, 0x1234_5678_9ABC_DEF7);
        execute(&mut cpu, 0x9240_0C20);
        assert_eq!(cpu.a64_get64(0, true), 7);
    }

    #[test]
    fn movz_movk_build_constant() {
        let mut cpu = a64_core();
        // MOVZ X5, #0x1234, LSL #16
        execute(&mut cpu, 0xD2A2_4685);
        assert_eq!(cpu.a64_get64(5, true), 0x1234_0000);
        // MOVK X5, #0xABCD (keep other halves)
        execute(&mut cpu, 0xF295_79A5);
        assert_eq!(cpu.a64_get64(5, true), 0x1234_ABCD);
    }

    #[test]
    fn csel_family_selects() {
        let mut cpu = a64_core();
        cpu.a64_set64(1, true, 0x11);
        cpu.a64_set64(2, true, 0x22);

        cpu.pstate.z = true; // EQ holds
        execute(&mut cpu, 0x9A82_0020); // CSEL X0, X1, X2, EQ
        assert_eq!(cpu.a64_get64(0, true), 0x11);

        cpu.pstate.z = false;
        execute(&mut cpu, 0x9A82_0020);
        assert_eq!(cpu.a64_get64(0, true), 0x22);

        // CSINC W0, W1, W2, NE with NE false increments.
        execute(&mut cpu, 0x1A82_1420);
        assert_eq!(cpu.a64_get32(0, true), 0x11);
        cpu.pstate.z = true;
        execute(&mut cpu, 0x1A82_1420);
        assert_eq!(cpu.a64_get32(0, true), 0x23);
    }

    #[test]
    fn branch_and_link() {
        let mut cpu = a64_core();
        cpu.old_pc = 0x1000;
        cpu.regs.set(slot::PC, 0x1004);
        // BL #+8
        execute(&mut cpu, 0x9400_0002);
        assert_eq!(cpu.regs.get(slot::PC), 0x1008);
        assert_eq!(cpu.regs.get(slot::A64_LR), 0x1004);

        // RET
        execute(&mut cpu, 0xD65F_03C0);
        assert_eq!(cpu.regs.get(slot::PC), 0x1004);
    }

    #[test]
    fn ldr_str_round_trip() {
        let mut cpu = a64_core();
        cpu.a64_set64(0, true, 0x1000);
        cpu.a64_set64(1, true, 0x1122_3344_5566_7788);
        // STR X1, [X0, #16]
        execute(&mut cpu, 0xF900_0801);
        // LDR X2, [X0, #16]
        execute(&mut cpu, 0xF940_0802);
        assert_eq!(cpu.a64_get64(2, true), 0x1122_3344_5566_7788);
    }

    #[test]
    fn post_index_updates_base() {
        let mut cpu = a64_core();
        cpu.a64_set64(0, true, 0x1000);
        cpu.a64_set32(1, true, 0xAABBCCDD);
        // STR W1, [X0], #4
        execute(&mut cpu, 0xB800_4401);
        assert_eq!(cpu.a64_get64(0, true), 0x1004);
        assert_eq!(cpu.data_read32(0x1000, false).unwrap(), 0xAABB_CCDD);
    }

    #[test]
    fn ldp_stp_pairs() {
        let mut cpu = a64_core();
        cpu.pstate.sp = false;
        cpu.a64_set64(31, false, 0x2000);
        cpu.a64_set64(0, true, 0xAAAA);
        cpu.a64_set64(1, true, 0xBBBB);
        // STP X0, X1, [SP, #16]
        execute(&mut cpu, 0xA901_07E0);
        // LDP X2, X3, [SP, #16]
        execute(&mut cpu, 0xA941_0FE2);
        assert_eq!(cpu.a64_get64(2, true), 0xAAAA);
        assert_eq!(cpu.a64_get64(3, true), 0xBBBB);
    }

    #[test]
    fn unaligned_sp_faults() {
        let mut cpu = a64_core();
        cpu.capture_breaks = true;
        cpu.a64_set64(31, false, 0x1004); // not 16-byte aligned
        // LDR X1, [SP, #0]
        execute(&mut cpu, 0xF940_03E1);
        assert_eq!(cpu.result, StepResult::UnalignedSp);
    }

    #[test]
    fn exclusive_sequence() {
        let mut cpu = a64_core();
        cpu.a64_set64(0, true, 0x1000);
        cpu.data_write64(0x1000, 5, false).unwrap();
        // LDXR X1, [X0]
        execute(&mut cpu, 0xC85F_7C01);
        assert_eq!(cpu.a64_get64(1, true), 5);
        // STXR W2, X3, [X0]
        cpu.a64_set64(3, true, 9);
        execute(&mut cpu, 0xC802_7C03);
        assert_eq!(cpu.a64_get32(2, true), 0);
        assert_eq!(cpu.data_read64(0x1000, false).unwrap(), 9);
        // Second attempt fails: the monitor is gone.
        execute(&mut cpu, 0xC802_7C03);
        assert_eq!(cpu.a64_get32(2, true), 1);
    }

    #[test]
    fn mrs_reads_midr_and_nzcv() {
        let mut cpu = a64_core();
        // MRS X0, MIDR_EL1
        execute(&mut cpu, 0xD538_0000);
        assert_eq!(cpu.a64_get64(0, true), u64::from(cpu.midr()));

        cpu.pstate.n = true;
        cpu.pstate.c = true;
        // MRS X1, NZCV
        execute(&mut cpu, 0xD53B_4201);
        assert_eq!(cpu.a64_get64(1, true), (1 << 31) | (1 << 29));
    }

    #[test]
    fn msr_writes_vbar() {
        let mut cpu = a64_core();
        cpu.a64_set64(3, true, 0x8_0000);
        // MSR VBAR_EL1, X3
        execute(&mut cpu, 0xD518_C003);
        assert_eq!(cpu.sysregs.vbar_el1, 0x8_0000);
    }

    #[test]
    fn svc_traps() {
        let mut cpu = a64_core();
        cpu.capture_breaks = true;
        execute(&mut cpu, 0xD400_0001);
        assert_eq!(cpu.result, StepResult::Svc);
    }

    #[test]
    fn bitfield_aliases() {
        let mut cpu = a64_core();
        cpu.a64_set64(1, true, 0xFF00);
        // UBFX X0, X1, #8, #8 (UBFM immr=8 imms=15)
        execute(&mut cpu, 0xD348_3C20);
        assert_eq!(cpu.a64_get64(0, true), 0xFF);
    }
}
