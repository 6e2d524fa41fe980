//! # The Jazelle bytecode engine
//!
//! Hardware Java bytecode execution as v5TEJ-class parts implement it,
//! based on the publicly documented reverse-engineering of the interface.
//! Simple bytecodes (constants, locals, stack manipulation, integer ALU,
//! branches, array element access) execute inline against the
//! register-cached operand stack; everything else spills the cache and
//! enters the ARM software handler whose table base lives in R5, at
//! `(R5 & ~0xFFF) + 4*index`.
//!
//! Register conventions in Jazelle state:
//!
//! | register | role |
//! |----------|------|
//! | R0-R3    | circular operand-stack cache |
//! | R4       | cached copy of local 0 |
//! | R5       | handler table base + cache control bits |
//! | R6       | pointer to the top of the memory-resident stack |
//! | R7       | locals base |
//! | R8       | constant pool |
//!
//! At the `Extension` implementation level two custom 0xFE-prefixed
//! opcodes exist for interworking: `FE 00` pops a word and treats it as an
//! ARM/Thumb interworking target, `FE 01` raises a supervisor call. These
//! never existed in hardware.

pub mod stack;

use crate::bitwise::sign_extend32;
use crate::config::JavaImplementation;
use crate::cpu::core::ArmCore;
use crate::cpu::exception::{Exception, ExecResult};
use crate::cpu::registers::slot;
use crate::cpu::sysregs::{
    JAOLR_ELEMENT_OFF_MASK, JAOLR_ELEMENT_OFF_SHIFT, JAOLR_LENGTH_OFF_MASK,
    JAOLR_LENGTH_OFF_SHIFT, JAOLR_LENGTH_SUB, JAOLR_LENSHIFT_MASK, JAOLR_LENSHIFT_SHIFT, JMCR_CV,
    JMCR_JE, JOSCR_DISABLE_ARRAY_INSTRUCTIONS, JOSCR_FLAT_ARRAY,
};

/// Cached local 0.
pub const J32_LOC0: u32 = 4;
/// Software handler table base (and stack-cache control bits).
pub const J32_SHT: u32 = 5;
/// Top of the memory-resident operand stack.
pub const J32_TOS: u32 = 6;
/// Locals base.
pub const J32_LOC: u32 = 7;
/// Constant pool.
pub const J32_CP: u32 = 8;
/// Caller frame link used by the invoke protocol.
pub const J32_LINK: u32 = 9;

/// Handler-table indices of the non-bytecode Jazelle exceptions.
pub const J32_EXCEPTION_NULLPTR: u32 = 0x100;
pub const J32_EXCEPTION_OUT_OF_BOUNDS: u32 = 0x101;
pub const J32_EXCEPTION_JAZELLE_DISABLED: u32 = 0x102; // JE = 0
pub const J32_EXCEPTION_JAZELLE_INVALID: u32 = 0x103; // CV = 0
pub const J32_EXCEPTION_PREFETCH_ABORT: u32 = 0x104;

impl ArmCore {
    /// One bytecode step.
    pub(crate) fn j32_step(&mut self) {
        self.old_pc = self.regs.get(slot::PC);
        if let Err(kind) = self.j32_step_inner() {
            self.handle_exception(kind);
        }
    }

    fn j32_step_inner(&mut self) -> ExecResult {
        if self.sysregs.jmcr & JMCR_JE == 0 {
            return Err(Exception::JazelleTrap(J32_EXCEPTION_JAZELLE_DISABLED));
        }
        if self.sysregs.jmcr & JMCR_CV == 0 {
            return Err(Exception::JazelleTrap(J32_EXCEPTION_JAZELLE_INVALID));
        }

        let opcode = self.j32_fetch8()?;
        logger::instruction(self.old_pc, "Jazelle", format_args!("<{opcode:02X}>"));

        if self.config.jazelle_level() >= JavaImplementation::Extension
            && (opcode == 0xFF || opcode == 0xFE)
        {
            let second = self.j32_fetch8()?;
            return self.j32_execute_extended((u32::from(opcode) << 8) | u32::from(second));
        }
        if self.config.jazelle_level() < JavaImplementation::Jazelle {
            // The Trivial implementation traps every bytecode.
            return Err(Exception::JazelleTrap(u32::from(opcode)));
        }
        self.j32_execute(opcode)
    }

    /// The custom interworking extensions at 0xFE/0xFF.
    fn j32_execute_extended(&mut self, opcode: u32) -> ExecResult {
        match opcode {
            // ret_from_jazelle: pop an interworking target address.
            0xFE00 => {
                let target = self.j32_pop_word()?;
                self.j32_spill_fast_stack();
                self.pstate.jt = self.filter_jt(crate::cpu::pstate::JtState::Arm);
                self.a32_set_pc_interworking(target);
                Ok(())
            }
            // swi from bytecode.
            0xFE01 => Err(Exception::Svc),
            _ => Err(Exception::JazelleTrap(opcode)),
        }
    }

    fn j32_condition_branch(&mut self, taken: bool) -> ExecResult {
        let offset = sign_extend32(16, u32::from(self.j32_fetch16be()?));
        if taken {
            let target = (self.old_pc as u32).wrapping_add(offset);
            self.regs.set(slot::PC, u64::from(target));
        }
        Ok(())
    }

    fn j32_execute(&mut self, opcode: u8) -> ExecResult {
        match opcode {
            // nop
            0x00 => Ok(()),
            // aconst_null
            0x01 => self.j32_push_word(0),
            // iconst_m1 .. iconst_5
            0x02..=0x08 => self.j32_push_word((i32::from(opcode) - 3) as u32),
            // bipush
            0x10 => {
                let value = sign_extend32(8, u32::from(self.j32_fetch8()?));
                self.j32_push_word(value)
            }
            // sipush
            0x11 => {
                let value = sign_extend32(16, u32::from(self.j32_fetch16be()?));
                self.j32_push_word(value)
            }
            // ldc
            0x12 => {
                let index = u32::from(self.j32_fetch8()?);
                let value = self.j32_load_constant(index)?;
                self.j32_push_word(value)
            }
            // ldc_w
            0x13 => {
                let index = u32::from(self.j32_fetch16be()?);
                let value = self.j32_load_constant(index)?;
                self.j32_push_word(value)
            }
            // ldc2_w
            0x14 => {
                let index = u32::from(self.j32_fetch16be()?);
                let high = self.j32_load_constant(index)?;
                let low = self.j32_load_constant(index + 1)?;
                self.j32_push_dword((u64::from(high) << 32) | u64::from(low))
            }
            // iload, fload, aload
            0x15 | 0x17 | 0x19 => {
                let index = u32::from(self.j32_fetch8()?);
                let value = self.j32_read_local(index)?;
                self.j32_push_word(value)
            }
            // lload, dload
            0x16 | 0x18 => {
                let index = u32::from(self.j32_fetch8()?);
                let value = self.j32_read_local_dword(index)?;
                self.j32_push_dword(value)
            }
            // iload_n, fload_n, aload_n
            0x1A..=0x1D => {
                let value = self.j32_read_local(u32::from(opcode - 0x1A))?;
                self.j32_push_word(value)
            }
            0x22..=0x25 => {
                let value = self.j32_read_local(u32::from(opcode - 0x22))?;
                self.j32_push_word(value)
            }
            0x2A..=0x2D => {
                let value = self.j32_read_local(u32::from(opcode - 0x2A))?;
                self.j32_push_word(value)
            }
            // lload_n, dload_n
            0x1E..=0x21 => {
                let value = self.j32_read_local_dword(u32::from(opcode - 0x1E))?;
                self.j32_push_dword(value)
            }
            0x26..=0x29 => {
                let value = self.j32_read_local_dword(u32::from(opcode - 0x26))?;
                self.j32_push_dword(value)
            }
            // iaload, faload, aaload
            0x2E | 0x30 => self.j32_array_load_word(opcode),
            0x32 => self.j32_array_load_reference(opcode),
            // laload, daload
            0x2F | 0x31 => self.j32_array_load_dword(opcode),
            // baload
            0x33 => self.j32_array_load_byte(opcode),
            // caload
            0x34 => self.j32_array_load_halfword(opcode, false),
            // saload
            0x35 => self.j32_array_load_halfword(opcode, true),
            // istore, fstore, astore
            0x36 | 0x38 | 0x3A => {
                let index = u32::from(self.j32_fetch8()?);
                let value = self.j32_pop_word()?;
                self.j32_write_local(index, value)
            }
            // lstore, dstore
            0x37 | 0x39 => {
                let index = u32::from(self.j32_fetch8()?);
                let value = self.j32_pop_dword()?;
                self.j32_write_local_dword(index, value)
            }
            // istore_n, fstore_n, astore_n
            0x3B..=0x3E => {
                let value = self.j32_pop_word()?;
                self.j32_write_local(u32::from(opcode - 0x3B), value)
            }
            0x43..=0x46 => {
                let value = self.j32_pop_word()?;
                self.j32_write_local(u32::from(opcode - 0x43), value)
            }
            0x4B..=0x4E => {
                let value = self.j32_pop_word()?;
                self.j32_write_local(u32::from(opcode - 0x4B), value)
            }
            // lstore_n, dstore_n
            0x3F..=0x42 => {
                let value = self.j32_pop_dword()?;
                self.j32_write_local_dword(u32::from(opcode - 0x3F), value)
            }
            0x47..=0x4A => {
                let value = self.j32_pop_dword()?;
                self.j32_write_local_dword(u32::from(opcode - 0x47), value)
            }
            // iastore, fastore, aastore
            0x4F | 0x51 => self.j32_array_store_word(opcode),
            0x53 => self.j32_array_store_reference(opcode),
            // lastore, dastore
            0x50 | 0x52 => self.j32_array_store_dword(opcode),
            // bastore
            0x54 => self.j32_array_store_byte(opcode),
            // castore, sastore
            0x55 | 0x56 => self.j32_array_store_halfword(opcode),
            // pop
            0x57 => {
                self.j32_pop_word()?;
                Ok(())
            }
            // pop2
            0x58 => {
                self.j32_pop_word()?;
                self.j32_pop_word()?;
                Ok(())
            }
            // dup
            0x59 => {
                let value = self.j32_peek_word(0)?;
                self.j32_push_word(value)
            }
            // dup_x1
            0x5A => {
                let first = self.j32_pop_word()?;
                let second = self.j32_pop_word()?;
                self.j32_push_word(first)?;
                self.j32_push_word(second)?;
                self.j32_push_word(first)
            }
            // dup_x2
            0x5B => {
                let first = self.j32_pop_word()?;
                let second = self.j32_pop_word()?;
                let third = self.j32_pop_word()?;
                self.j32_push_word(first)?;
                self.j32_push_word(third)?;
                self.j32_push_word(second)?;
                self.j32_push_word(first)
            }
            // dup2
            0x5C => {
                let first = self.j32_peek_word(0)?;
                let second = self.j32_peek_word(1)?;
                self.j32_push_word(second)?;
                self.j32_push_word(first)
            }
            // swap
            0x5F => {
                let first = self.j32_pop_word()?;
                let second = self.j32_pop_word()?;
                self.j32_push_word(first)?;
                self.j32_push_word(second)
            }
            // iadd, isub, imul
            0x60 => self.j32_binary_op(u32::wrapping_add),
            0x64 => self.j32_binary_op(u32::wrapping_sub),
            0x68 => self.j32_binary_op(u32::wrapping_mul),
            // ineg
            0x74 => {
                let value = self.j32_pop_word()?;
                self.j32_push_word(value.wrapping_neg())
            }
            // ishl, ishr, iushr
            0x78 => self.j32_binary_op(|a, b| a.wrapping_shl(b & 0x1F)),
            0x7A => self.j32_binary_op(|a, b| ((a as i32) >> (b & 0x1F)) as u32),
            0x7C => self.j32_binary_op(|a, b| a >> (b & 0x1F)),
            // iand, ior, ixor
            0x7E => self.j32_binary_op(|a, b| a & b),
            0x80 => self.j32_binary_op(|a, b| a | b),
            0x82 => self.j32_binary_op(|a, b| a ^ b),
            // iinc
            0x84 => {
                let index = u32::from(self.j32_fetch8()?);
                let increment = sign_extend32(8, u32::from(self.j32_fetch8()?));
                let value = self.j32_read_local(index)?.wrapping_add(increment);
                self.j32_write_local(index, value)
            }
            // i2b, i2c, i2s
            0x91 => {
                let value = self.j32_pop_word()?;
                self.j32_push_word(sign_extend32(8, value & 0xFF))
            }
            0x92 => {
                let value = self.j32_pop_word()?;
                self.j32_push_word(value & 0xFFFF)
            }
            0x93 => {
                let value = self.j32_pop_word()?;
                self.j32_push_word(sign_extend32(16, value & 0xFFFF))
            }
            // ifeq .. ifle
            0x99..=0x9E => {
                let value = self.j32_pop_word()? as i32;
                let taken = match opcode {
                    0x99 => value == 0,
                    0x9A => value != 0,
                    0x9B => value < 0,
                    0x9C => value >= 0,
                    0x9D => value > 0,
                    _ => value <= 0,
                };
                self.j32_condition_branch(taken)
            }
            // if_icmpeq .. if_icmple, if_acmpeq, if_acmpne
            0x9F..=0xA6 => {
                let second = self.j32_pop_word()? as i32;
                let first = self.j32_pop_word()? as i32;
                let taken = match opcode {
                    0x9F | 0xA5 => first == second,
                    0xA0 | 0xA6 => first != second,
                    0xA1 => first < second,
                    0xA2 => first >= second,
                    0xA3 => first > second,
                    _ => first <= second,
                };
                self.j32_condition_branch(taken)
            }
            // goto
            0xA7 => self.j32_condition_branch(true),
            // tableswitch
            0xAA => {
                let key = self.j32_pop_word()? as i32;
                self.j32_align_pc32();
                let mut target = self.j32_fetch32be()? as i32; // default
                let low = self.j32_fetch32be()? as i32;
                let high = self.j32_fetch32be()? as i32;
                for entry in low..=high {
                    let offset = self.j32_fetch32be()? as i32;
                    if entry == key {
                        target = offset;
                    }
                }
                let destination = (self.old_pc as u32).wrapping_add(target as u32);
                self.regs.set(slot::PC, u64::from(destination));
                Ok(())
            }
            // lookupswitch
            0xAB => {
                let key = self.j32_pop_word()? as i32;
                self.j32_align_pc32();
                let mut target = self.j32_fetch32be()? as i32; // default
                let pairs = self.j32_fetch32be()?;
                for _ in 0..pairs {
                    let candidate = self.j32_fetch32be()? as i32;
                    let offset = self.j32_fetch32be()? as i32;
                    if candidate == key {
                        target = offset;
                    }
                }
                let destination = (self.old_pc as u32).wrapping_add(target as u32);
                self.regs.set(slot::PC, u64::from(destination));
                Ok(())
            }
            // arraylength
            0xBE => {
                let array = self.j32_pop_word()?;
                let length = self.j32_array_length(array)?;
                self.j32_push_word(length)
            }
            // ifnull, ifnonnull
            0xC6 | 0xC7 => {
                let value = self.j32_pop_word()?;
                self.j32_condition_branch((value == 0) == (opcode == 0xC6))
            }
            // goto_w
            0xC8 => {
                let offset = self.j32_fetch32be()?;
                let target = (self.old_pc as u32).wrapping_add(offset);
                self.regs.set(slot::PC, u64::from(target));
                Ok(())
            }
            // Everything else goes to the software handler table.
            _ => Err(Exception::JazelleTrap(u32::from(opcode))),
        }
    }

    fn j32_binary_op(&mut self, op: impl Fn(u32, u32) -> u32) -> ExecResult {
        let second = self.j32_pop_word()?;
        let first = self.j32_pop_word()?;
        self.j32_push_word(op(first, second))
    }

    // --------------------------------------------------------------
    // Locals and constant pool
    // --------------------------------------------------------------

    fn j32_read_local(&mut self, index: u32) -> ExecResult<u32> {
        if index == 0 {
            return Ok(self.a32_get(J32_LOC0));
        }
        let base = self.a32_get(J32_LOC);
        self.data_read32(u64::from(base.wrapping_add(index * 4)), false)
    }

    fn j32_write_local(&mut self, index: u32, value: u32) -> ExecResult {
        if index == 0 {
            self.a32_set(J32_LOC0, value);
        }
        let base = self.a32_get(J32_LOC);
        self.data_write32(u64::from(base.wrapping_add(index * 4)), value, false)
    }

    fn j32_read_local_dword(&mut self, index: u32) -> ExecResult<u64> {
        let base = self.a32_get(J32_LOC);
        self.data_read64(u64::from(base.wrapping_add(index * 4)), false)
    }

    fn j32_write_local_dword(&mut self, index: u32, value: u64) -> ExecResult {
        let base = self.a32_get(J32_LOC);
        self.data_write64(u64::from(base.wrapping_add(index * 4)), value, false)
    }

    /// Refreshes the cached local 0 after a frame change.
    pub fn jazelle_update_locals(&mut self) -> ExecResult {
        let base = self.a32_get(J32_LOC);
        let value = self.data_read32(u64::from(base), false)?;
        self.a32_set(J32_LOC0, value);
        Ok(())
    }

    fn j32_load_constant(&mut self, index: u32) -> ExecResult<u32> {
        let pool = self.a32_get(J32_CP);
        self.data_read32(u64::from(pool.wrapping_add(index * 4)), false)
    }

    // --------------------------------------------------------------
    // Arrays
    // --------------------------------------------------------------

    fn j32_check_arrays_enabled(&self, opcode: u8) -> ExecResult {
        if self.sysregs.joscr & JOSCR_DISABLE_ARRAY_INSTRUCTIONS != 0 {
            return Err(Exception::JazelleTrap(u32::from(opcode)));
        }
        Ok(())
    }

    fn j32_array_length(&mut self, array: u32) -> ExecResult<u32> {
        if array == 0 {
            return Err(Exception::JazelleTrap(J32_EXCEPTION_NULLPTR));
        }
        let offset = (self.sysregs.jaolr & JAOLR_LENGTH_OFF_MASK) >> JAOLR_LENGTH_OFF_SHIFT;
        let address = if self.sysregs.jaolr & JAOLR_LENGTH_SUB != 0 {
            array.wrapping_sub(offset)
        } else {
            array.wrapping_add(offset)
        };
        self.data_read32(u64::from(address), false)
    }

    /// Address of element 0; pointer-indirected unless JOSCR selects flat
    /// arrays.
    fn j32_array_elements(&mut self, array: u32) -> ExecResult<u32> {
        let offset = (self.sysregs.jaolr & JAOLR_ELEMENT_OFF_MASK) >> JAOLR_ELEMENT_OFF_SHIFT;
        let base = array.wrapping_add(offset);
        if self.sysregs.joscr & JOSCR_FLAT_ARRAY != 0 {
            Ok(base)
        } else {
            self.data_read32(u64::from(base), false)
        }
    }

    fn j32_array_index(&mut self, opcode: u8) -> ExecResult<(u32, u32)> {
        self.j32_check_arrays_enabled(opcode)?;
        let index = self.j32_pop_word()?;
        let array = self.j32_pop_word()?;
        let length = self.j32_array_length(array)?;
        if index >= length {
            return Err(Exception::JazelleTrap(J32_EXCEPTION_OUT_OF_BOUNDS));
        }
        let start = self.j32_array_elements(array)?;
        Ok((start, index))
    }

    fn j32_array_load_word(&mut self, opcode: u8) -> ExecResult {
        let (start, index) = self.j32_array_index(opcode)?;
        let value = self.data_read32(u64::from(start.wrapping_add(index * 4)), false)?;
        self.j32_push_word(value)
    }

    fn j32_array_load_dword(&mut self, opcode: u8) -> ExecResult {
        let (start, index) = self.j32_array_index(opcode)?;
        let value = self.data_read64(u64::from(start.wrapping_add(index * 8)), false)?;
        self.j32_push_dword(value)
    }

    fn j32_array_load_byte(&mut self, opcode: u8) -> ExecResult {
        let (start, index) = self.j32_array_index(opcode)?;
        let value = self.data_read8(u64::from(start.wrapping_add(index)), false)?;
        self.j32_push_word(sign_extend32(8, u32::from(value)))
    }

    fn j32_array_load_halfword(&mut self, opcode: u8, signed: bool) -> ExecResult {
        let (start, index) = self.j32_array_index(opcode)?;
        let value = self.data_read16(u64::from(start.wrapping_add(index * 2)), false)?;
        let value = if signed {
            sign_extend32(16, u32::from(value))
        } else {
            u32::from(value)
        };
        self.j32_push_word(value)
    }

    /// Reference elements honour the JAOLR element-width shift.
    fn j32_array_load_reference(&mut self, opcode: u8) -> ExecResult {
        let (start, index) = self.j32_array_index(opcode)?;
        let shift = (self.sysregs.jaolr & JAOLR_LENSHIFT_MASK) >> JAOLR_LENSHIFT_SHIFT;
        let value = self.data_read32(u64::from(start.wrapping_add(index << shift)), false)?;
        self.j32_push_word(value)
    }

    fn j32_array_store_word(&mut self, opcode: u8) -> ExecResult {
        self.j32_check_arrays_enabled(opcode)?;
        let value = self.j32_pop_word()?;
        let (start, index) = self.j32_array_index_popped(opcode)?;
        self.data_write32(u64::from(start.wrapping_add(index * 4)), value, false)
    }

    fn j32_array_store_dword(&mut self, opcode: u8) -> ExecResult {
        self.j32_check_arrays_enabled(opcode)?;
        let value = self.j32_pop_dword()?;
        let (start, index) = self.j32_array_index_popped(opcode)?;
        self.data_write64(u64::from(start.wrapping_add(index * 8)), value, false)
    }

    fn j32_array_store_byte(&mut self, opcode: u8) -> ExecResult {
        self.j32_check_arrays_enabled(opcode)?;
        let value = self.j32_pop_word()?;
        let (start, index) = self.j32_array_index_popped(opcode)?;
        self.data_write8(u64::from(start.wrapping_add(index)), value as u8, false)
    }

    fn j32_array_store_halfword(&mut self, opcode: u8) -> ExecResult {
        self.j32_check_arrays_enabled(opcode)?;
        let value = self.j32_pop_word()?;
        let (start, index) = self.j32_array_index_popped(opcode)?;
        self.data_write16(u64::from(start.wrapping_add(index * 2)), value as u16, false)
    }

    fn j32_array_store_reference(&mut self, opcode: u8) -> ExecResult {
        self.j32_check_arrays_enabled(opcode)?;
        let value = self.j32_pop_word()?;
        let (start, index) = self.j32_array_index_popped(opcode)?;
        let shift = (self.sysregs.jaolr & JAOLR_LENSHIFT_MASK) >> JAOLR_LENSHIFT_SHIFT;
        self.data_write32(u64::from(start.wrapping_add(index << shift)), value, false)
    }

    /// Like [`Self::j32_array_index`] but with the value already popped
    /// (store order: ..., array, index, value).
    fn j32_array_index_popped(&mut self, _opcode: u8) -> ExecResult<(u32, u32)> {
        let index = self.j32_pop_word()?;
        let array = self.j32_pop_word()?;
        let length = self.j32_array_length(array)?;
        if index >= length {
            return Err(Exception::JazelleTrap(J32_EXCEPTION_OUT_OF_BOUNDS));
        }
        let start = self.j32_array_elements(array)?;
        Ok((start, index))
    }

    // --------------------------------------------------------------
    // Host-callable protocol helpers
    // --------------------------------------------------------------

    /// Pushes a word on the Jazelle operand stack.
    pub fn jazelle_push_word(&mut self, value: u32) -> ExecResult {
        self.j32_push_word(value)
    }

    pub fn jazelle_pop_word(&mut self) -> ExecResult<u32> {
        self.j32_pop_word()
    }

    pub fn jazelle_peek_word(&mut self, index: u32) -> ExecResult<u32> {
        self.j32_peek_word(index)
    }

    pub fn jazelle_push_dword(&mut self, value: u64) -> ExecResult {
        self.j32_push_dword(value)
    }

    pub fn jazelle_pop_dword(&mut self) -> ExecResult<u64> {
        self.j32_pop_dword()
    }

    /// Spills the register cache so R6 reflects the whole stack.
    pub fn jazelle_spill_stack(&mut self) {
        self.j32_spill_fast_stack();
    }

    /// The invoke protocol: carve the callee frame out of the operand
    /// stack, push `{PC, old locals base, constant pool, LINK}`, and enter
    /// the method body. The caller provides counts in bytes and updates
    /// the constant pool register afterwards, mirroring how a software
    /// method dispatcher drives the core.
    pub fn jazelle_invoke(
        &mut self,
        argument_bytes: u32,
        local_bytes: u32,
        address: u32,
    ) -> ExecResult {
        let old_locals = self.a32_get(J32_LOC);
        let tos = self.a32_get(J32_TOS);
        let locals = tos.wrapping_sub(argument_bytes);
        self.a32_set(J32_LOC, locals);
        self.a32_set(J32_TOS, locals.wrapping_add(local_bytes));

        let return_pc = self.regs.get(slot::PC) as u32;
        let constant_pool = self.a32_get(J32_CP);
        let link = self.a32_get(J32_LINK);
        self.j32_push_word(return_pc)?;
        self.j32_push_word(old_locals)?;
        self.j32_push_word(constant_pool)?;
        self.j32_push_word(link)?;
        self.j32_spill_fast_stack();

        let new_tos = self.a32_get(J32_TOS);
        self.a32_set(J32_LINK, new_tos);
        self.regs.set(slot::PC, u64::from(address));
        self.jazelle_update_locals()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ArmVersion, Isa};
    use crate::cpu::exception::StepResult;
    use crate::cpu::pstate::JtState;
    use crate::cpu::testing::core;

    fn jazelle_core() -> ArmCore {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Jazelle]);
        cpu.set_isa(Isa::Jazelle);
        cpu.sysregs.jmcr = JMCR_JE | JMCR_CV;
        cpu.a32_set(J32_TOS, 0x4000);
        cpu.a32_set(J32_LOC, 0x3000);
        cpu.a32_set(J32_CP, 0x2000);
        cpu.a32_set(J32_SHT, 0x0001_0000);
        cpu
    }

    fn load_bytecode(cpu: &mut ArmCore, address: u64, code: &[u8]) {
        for (i, byte) in code.iter().enumerate() {
            cpu.data_write8(address + i as u64, *byte, false).unwrap();
        }
        cpu.regs.set(slot::PC, address);
    }

    #[test]
    fn constants_and_arithmetic() {
        let mut cpu = jazelle_core();
        // iconst_2, bipush 40, iadd
        load_bytecode(&mut cpu, 0x100, &[0x05, 0x10, 40, 0x60]);
        for _ in 0..3 {
            cpu.j32_step();
            assert_eq!(cpu.result, StepResult::Ok);
        }
        assert_eq!(cpu.j32_pop_word().unwrap(), 42);
    }

    #[test]
    fn locals_round_trip_with_cached_local_zero() {
        let mut cpu = jazelle_core();
        cpu.data_write32(0x3000, 7, false).unwrap();
        cpu.a32_set(J32_LOC0, 7);
        // iload_0, iconst_1, iadd, istore_1, iload_1
        load_bytecode(&mut cpu, 0x100, &[0x1A, 0x04, 0x60, 0x3C, 0x1B]);
        for _ in 0..5 {
            cpu.j32_step();
            assert_eq!(cpu.result, StepResult::Ok);
        }
        assert_eq!(cpu.j32_pop_word().unwrap(), 8);
        assert_eq!(cpu.data_read32(0x3004, false).unwrap(), 8);
    }

    #[test]
    fn istore_0_updates_the_cache() {
        let mut cpu = jazelle_core();
        // bipush 9, istore_0
        load_bytecode(&mut cpu, 0x100, &[0x10, 9, 0x3B]);
        cpu.j32_step();
        cpu.j32_step();
        assert_eq!(cpu.a32_get(J32_LOC0), 9);
        assert_eq!(cpu.data_read32(0x3000, false).unwrap(), 9);
    }

    #[test]
    fn branches_are_relative_to_the_opcode() {
        let mut cpu = jazelle_core();
        // goto +5 at 0x100 jumps to 0x105.
        load_bytecode(&mut cpu, 0x100, &[0xA7, 0x00, 0x05]);
        cpu.j32_step();
        assert_eq!(cpu.regs.get(slot::PC), 0x105);

        // ifeq with a zero operand takes the branch.
        load_bytecode(&mut cpu, 0x200, &[0x03, 0x99, 0x00, 0x10]);
        cpu.j32_step();
        cpu.j32_step();
        assert_eq!(cpu.regs.get(slot::PC), 0x211);

        // if_icmplt falls through when first >= second.
        load_bytecode(&mut cpu, 0x300, &[0x05, 0x04, 0xA1, 0x00, 0x10]);
        for _ in 0..3 {
            cpu.j32_step();
        }
        assert_eq!(cpu.regs.get(slot::PC), 0x305);
    }

    #[test]
    fn unimplemented_bytecode_enters_handler_table() {
        let mut cpu = jazelle_core();
        cpu.a32_set(J32_SHT, 0x0002_0000 | 0x40); // garbage low bits survive masking
        // invokevirtual (0xB6) is not hardware-executed.
        load_bytecode(&mut cpu, 0x100, &[0xB6, 0x00, 0x01]);
        cpu.j32_step();

        assert_eq!(cpu.result, StepResult::Ok);
        assert_eq!(cpu.pstate.jt, JtState::Arm);
        // LR holds the bytecode address, PC the handler slot.
        assert_eq!(cpu.a32_get(14), 0x100);
        assert_eq!(cpu.regs.get(slot::PC), 0x0002_0000 + (0xB6 << 2));
    }

    #[test]
    fn capture_mode_reports_jazelle_faults() {
        let mut cpu = jazelle_core();
        cpu.capture_breaks = true;
        load_bytecode(&mut cpu, 0x100, &[0xB6, 0x00, 0x01]);
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::JazelleUndefined);

        cpu.sysregs.jmcr = JMCR_CV;
        load_bytecode(&mut cpu, 0x100, &[0x00]);
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::JazelleDisabled);

        cpu.sysregs.jmcr = JMCR_JE;
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::JazelleInvalid);
    }

    #[test]
    fn array_access_with_flat_layout() {
        let mut cpu = jazelle_core();
        // Length word directly before the elements.
        cpu.sysregs.joscr = JOSCR_FLAT_ARRAY;
        cpu.sysregs.jaolr = (1 << (JAOLR_ELEMENT_OFF_SHIFT + 2)) // element offset 4
            | JAOLR_LENGTH_SUB; // length at array - 0
        let array = 0x5000u32;
        cpu.data_write32(u64::from(array), 3, false).unwrap(); // length
        for i in 0..3u32 {
            cpu.data_write32(u64::from(array + 4 + i * 4), 0x10 + i, false)
                .unwrap();
        }

        // aload array, iconst_1, iaload
        cpu.j32_push_word(array).unwrap();
        cpu.j32_push_word(1).unwrap();
        load_bytecode(&mut cpu, 0x100, &[0x2E]);
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::Ok);
        assert_eq!(cpu.j32_pop_word().unwrap(), 0x11);
    }

    #[test]
    fn array_bounds_and_null_checks() {
        let mut cpu = jazelle_core();
        cpu.capture_breaks = true;
        cpu.sysregs.joscr = JOSCR_FLAT_ARRAY;
        cpu.sysregs.jaolr = 1 << (JAOLR_ELEMENT_OFF_SHIFT + 2);
        let array = 0x5000u32;
        cpu.data_write32(u64::from(array), 2, false).unwrap();

        cpu.j32_push_word(array).unwrap();
        cpu.j32_push_word(5).unwrap(); // out of range
        load_bytecode(&mut cpu, 0x100, &[0x2E]);
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::JazelleOutOfBounds);

        cpu.j32_push_word(0).unwrap(); // null array
        cpu.j32_push_word(0).unwrap();
        load_bytecode(&mut cpu, 0x100, &[0x2E]);
        cpu.j32_step();
        assert_eq!(cpu.result, StepResult::JazelleNullPtr);
    }

    #[test]
    fn extension_ret_from_jazelle() {
        let mut cpu = core(ArmVersion::V5, &[Isa::Arm32, Isa::Thumb, Isa::Jazelle]);
        cpu.config.jazelle_implementation = Some(crate::config::JavaImplementation::Extension);
        cpu.set_isa(Isa::Jazelle);
        cpu.sysregs.jmcr = JMCR_JE | JMCR_CV;
        cpu.a32_set(J32_TOS, 0x4000);
        cpu.j32_push_word(0x2001).unwrap();
        load_bytecode(&mut cpu, 0x100, &[0xFE, 0x00]);
        cpu.j32_step();

        assert_eq!(cpu.result, StepResult::Ok);
        assert_eq!(cpu.pstate.jt, JtState::Thumb);
        assert_eq!(cpu.regs.get(slot::PC), 0x2000);
    }

    #[test]
    fn invoke_builds_a_frame() {
        let mut cpu = jazelle_core();
        // Two argument words on the stack.
        cpu.j32_push_word(0xA1).unwrap();
        cpu.j32_push_word(0xA2).unwrap();
        cpu.j32_spill_fast_stack();
        cpu.a32_set(J32_LINK, 0x7777);
        cpu.regs.set(slot::PC, 0x150);

        // Two words of arguments, four words of locals.
        cpu.jazelle_invoke(8, 16, 0x800).unwrap();

        let locals = cpu.a32_get(J32_LOC);
        assert_eq!(locals, 0x4008 - 8);
        // Frame: {return PC, old LOC, CP, LINK} above the locals.
        let frame = u64::from(locals + 16);
        assert_eq!(cpu.data_read32(frame, false).unwrap(), 0x150);
        assert_eq!(cpu.data_read32(frame + 4, false).unwrap(), 0x3000);
        assert_eq!(cpu.data_read32(frame + 8, false).unwrap(), 0x2000);
        assert_eq!(cpu.data_read32(frame + 12, false).unwrap(), 0x7777);
        // LINK points at the new TOS, execution continues in the method.
        assert_eq!(cpu.a32_get(J32_LINK), cpu.a32_get(J32_TOS));
        assert_eq!(cpu.regs.get(slot::PC), 0x800);
        // Local 0 cache reloaded from the first argument.
        assert_eq!(cpu.a32_get(J32_LOC0), 0xA1);
    }
}
