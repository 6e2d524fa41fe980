//! A64 instruction decoding.
//!
//! Fixed 32-bit little-endian encodings, classified by the four-bit group
//! field (bits 28:25) into data-processing-immediate, branches/system,
//! loads/stores and data-processing-register. The SIMD/FP groups decode to
//! `Undefined`; floating point is the coprocessors' business in the
//! AArch32 half of this core and out of scope here.

use crate::bitwise::{sign_extend64, Bits};
use crate::cpu::a64::bitmask::{decode_bitmask32, decode_bitmask64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Orr,
    Eor,
    Ands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveWideOp {
    Movn,
    Movz,
    Movk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldOp {
    Sbfm,
    Bfm,
    Ubfm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondSelectOp {
    Csel,
    Csinc,
    Csinv,
    Csneg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProc1Op {
    Rbit,
    Rev16,
    Rev32,
    Rev,
    Clz,
    Cls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProc2Op {
    Udiv,
    Sdiv,
    Lslv,
    Lsrv,
    Asrv,
    Rorv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProc3Op {
    Madd,
    Msub,
    Smaddl,
    Smsubl,
    Smulh,
    Umaddl,
    Umsubl,
    Umulh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchRegisterOp {
    Br,
    Blr,
    Ret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionGenOp {
    Svc,
    Hvc,
    Smc,
    Brk,
}

/// Addressing forms of the load/store-register group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A64Offset {
    /// Scaled unsigned 12-bit immediate.
    Unsigned { offset: u64 },
    /// Signed 9-bit immediate without writeback (LDUR/STUR).
    Unscaled { offset: i64 },
    /// Signed 9-bit immediate, base updated before the access.
    PreIndexed { offset: i64 },
    /// Signed 9-bit immediate, base updated after the access.
    PostIndexed { offset: i64 },
    /// Extended register offset.
    Register { rm: u32, option: u32, shift: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairMode {
    Offset,
    PreIndexed,
    PostIndexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PstateField {
    SpSel,
    DaifSet,
    DaifClr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A64Instruction {
    /// ADR/ADRP.
    Adr {
        page: bool,
        rd: u32,
        offset: i64,
    },
    AddSubImmediate {
        sf: bool,
        subtract: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        immediate: u64,
    },
    LogicalImmediate {
        sf: bool,
        op: LogicalOp,
        rd: u32,
        rn: u32,
        mask: u64,
    },
    MoveWide {
        sf: bool,
        op: MoveWideOp,
        rd: u32,
        imm16: u32,
        shift: u32,
    },
    Bitfield {
        sf: bool,
        op: BitfieldOp,
        rd: u32,
        rn: u32,
        immr: u32,
        imms: u32,
    },
    Extract {
        sf: bool,
        rd: u32,
        rn: u32,
        rm: u32,
        lsb: u32,
    },
    LogicalShiftedRegister {
        sf: bool,
        op: LogicalOp,
        invert: bool,
        rd: u32,
        rn: u32,
        rm: u32,
        shift_type: u32,
        amount: u32,
    },
    AddSubShiftedRegister {
        sf: bool,
        subtract: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rm: u32,
        shift_type: u32,
        amount: u32,
    },
    AddSubExtendedRegister {
        sf: bool,
        subtract: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rm: u32,
        option: u32,
        amount: u32,
    },
    AddSubCarry {
        sf: bool,
        subtract: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rm: u32,
    },
    CondSelect {
        sf: bool,
        op: CondSelectOp,
        rd: u32,
        rn: u32,
        rm: u32,
        condition: u8,
    },
    DataProc1 {
        sf: bool,
        op: DataProc1Op,
        rd: u32,
        rn: u32,
    },
    DataProc2 {
        sf: bool,
        op: DataProc2Op,
        rd: u32,
        rn: u32,
        rm: u32,
    },
    DataProc3 {
        sf: bool,
        op: DataProc3Op,
        rd: u32,
        rn: u32,
        rm: u32,
        ra: u32,
    },
    Branch {
        link: bool,
        offset: i64,
    },
    BranchCond {
        condition: u8,
        offset: i64,
    },
    CompareBranch {
        sf: bool,
        nonzero: bool,
        rt: u32,
        offset: i64,
    },
    TestBranch {
        nonzero: bool,
        rt: u32,
        bit: u32,
        offset: i64,
    },
    BranchRegister {
        op: BranchRegisterOp,
        rn: u32,
    },
    ExceptionReturn,
    ExceptionGen {
        op: ExceptionGenOp,
        imm16: u32,
    },
    SystemMove {
        read: bool,
        rt: u32,
        op0: u32,
        op1: u32,
        crn: u32,
        crm: u32,
        op2: u32,
    },
    PstateWrite {
        field: PstateField,
        imm: u32,
    },
    LoadStoreRegister {
        load: bool,
        size: u32,
        /// Sign-extending load; the flag selects a 32-bit destination.
        sign_extend_32: Option<bool>,
        rt: u32,
        rn: u32,
        offset: A64Offset,
    },
    LoadLiteral {
        size_64: bool,
        signed_word: bool,
        rt: u32,
        offset: i64,
    },
    LoadStorePair {
        load: bool,
        sf: bool,
        signed_word: bool,
        rt: u32,
        rt2: u32,
        rn: u32,
        offset: i64,
        mode: PairMode,
    },
    LoadStoreExclusive {
        load: bool,
        size: u32,
        rt: u32,
        rn: u32,
        /// Status register of a store-exclusive.
        rs: u32,
    },
    ClearExclusive,
    Nop,
    Undefined,
}

impl A64Instruction {
    #[must_use]
    pub fn decode(opcode: u32) -> Self {
        match opcode.get_bits(25..=28) {
            0b1000 | 0b1001 => decode_dp_immediate(opcode),
            0b1010 | 0b1011 => decode_branch_system(opcode),
            0b0100 | 0b0110 | 0b1100 | 0b1110 => decode_load_store(opcode),
            0b0101 | 0b1101 => decode_dp_register(opcode),
            _ => Self::Undefined,
        }
    }
}

fn decode_dp_immediate(opcode: u32) -> A64Instruction {
    use A64Instruction::*;

    let sf = opcode.get_bit(31);
    let rd = opcode.get_bits(0..=4);
    let rn = opcode.get_bits(5..=9);

    match opcode.get_bits(23..=25) {
        0b000 | 0b001 => {
            let page = opcode.get_bit(31);
            let imm = (opcode.get_bits(5..=23) << 2) | opcode.get_bits(29..=30);
            let offset = sign_extend64(21, u64::from(imm)) as i64;
            Adr {
                page,
                rd,
                offset: if page { offset << 12 } else { offset },
            }
        }
        0b010 => {
            let shift = if opcode.get_bit(22) { 12 } else { 0 };
            AddSubImmediate {
                sf,
                subtract: opcode.get_bit(30),
                set_flags: opcode.get_bit(29),
                rd,
                rn,
                immediate: u64::from(opcode.get_bits(10..=21)) << shift,
            }
        }
        0b100 => {
            let n = opcode.get_bit(22);
            let immr = opcode.get_bits(16..=21);
            let imms = opcode.get_bits(10..=15);
            let mask = if sf {
                decode_bitmask64(n, imms, immr)
            } else {
                decode_bitmask32(n, imms, immr).map(u64::from)
            };
            let Some(mask) = mask else {
                return Undefined;
            };
            let op = match opcode.get_bits(29..=30) {
                0b00 => LogicalOp::And,
                0b01 => LogicalOp::Orr,
                0b10 => LogicalOp::Eor,
                _ => LogicalOp::Ands,
            };
            LogicalImmediate { sf, op, rd, rn, mask }
        }
        0b101 => {
            let op = match opcode.get_bits(29..=30) {
                0b00 => MoveWideOp::Movn,
                0b10 => MoveWideOp::Movz,
                0b11 => MoveWideOp::Movk,
                _ => return Undefined,
            };
            let hw = opcode.get_bits(21..=22);
            if !sf && hw > 1 {
                return Undefined;
            }
            MoveWide {
                sf,
                op,
                rd,
                imm16: opcode.get_bits(5..=20),
                shift: hw * 16,
            }
        }
        0b110 => {
            let op = match opcode.get_bits(29..=30) {
                0b00 => BitfieldOp::Sbfm,
                0b01 => BitfieldOp::Bfm,
                0b10 => BitfieldOp::Ubfm,
                _ => return Undefined,
            };
            let n = opcode.get_bit(22);
            if n != sf {
                return Undefined;
            }
            Bitfield {
                sf,
                op,
                rd,
                rn,
                immr: opcode.get_bits(16..=21),
                imms: opcode.get_bits(10..=15),
            }
        }
        0b111 => {
            if opcode.get_bits(29..=30) != 0 || opcode.get_bit(21) {
                return Undefined;
            }
            Extract {
                sf,
                rd,
                rn,
                rm: opcode.get_bits(16..=20),
                lsb: opcode.get_bits(10..=15),
            }
        }
        _ => Undefined,
    }
}

fn decode_branch_system(opcode: u32) -> A64Instruction {
    use A64Instruction::*;

    if opcode.get_bits(26..=30) == 0b00101 {
        return Branch {
            link: opcode.get_bit(31),
            offset: (sign_extend64(26, u64::from(opcode.get_bits(0..=25))) as i64) << 2,
        };
    }
    if opcode.get_bits(24..=31) == 0b0101_0100 && !opcode.get_bit(4) {
        return BranchCond {
            condition: opcode.get_bits(0..=3) as u8,
            offset: (sign_extend64(19, u64::from(opcode.get_bits(5..=23))) as i64) << 2,
        };
    }
    if opcode.get_bits(25..=30) == 0b011010 {
        return CompareBranch {
            sf: opcode.get_bit(31),
            nonzero: opcode.get_bit(24),
            rt: opcode.get_bits(0..=4),
            offset: (sign_extend64(19, u64::from(opcode.get_bits(5..=23))) as i64) << 2,
        };
    }
    if opcode.get_bits(25..=30) == 0b011011 {
        return TestBranch {
            nonzero: opcode.get_bit(24),
            rt: opcode.get_bits(0..=4),
            bit: (opcode.get_bits(31..=31) << 5) | opcode.get_bits(19..=23),
            offset: (sign_extend64(14, u64::from(opcode.get_bits(5..=18))) as i64) << 2,
        };
    }
    if opcode == 0xD69F_03E0 {
        return ExceptionReturn;
    }
    if opcode.get_bits(25..=31) == 0b1101011 {
        let op = match opcode.get_bits(21..=22) {
            0b00 => BranchRegisterOp::Br,
            0b01 => BranchRegisterOp::Blr,
            0b10 => BranchRegisterOp::Ret,
            _ => return Undefined,
        };
        if opcode.get_bits(10..=20) != 0b11111_0000_00 || opcode.get_bits(0..=4) != 0 {
            return Undefined;
        }
        return BranchRegister {
            op,
            rn: opcode.get_bits(5..=9),
        };
    }
    if opcode.get_bits(24..=31) == 0b1101_0100 {
        let ll = opcode.get_bits(0..=1);
        let opc = opcode.get_bits(21..=23);
        let imm16 = opcode.get_bits(5..=20);
        let op = match (opc, ll) {
            (0b000, 0b01) => ExceptionGenOp::Svc,
            (0b000, 0b10) => ExceptionGenOp::Hvc,
            (0b000, 0b11) => ExceptionGenOp::Smc,
            (0b001, 0b00) => ExceptionGenOp::Brk,
            _ => return Undefined,
        };
        return ExceptionGen { op, imm16 };
    }
    if opcode.get_bits(22..=31) == 0b1101_0101_00 {
        let read = opcode.get_bit(21);
        let op0 = 2 + opcode.get_bits(19..=19);
        let op1 = opcode.get_bits(16..=18);
        let crn = opcode.get_bits(12..=15);
        let crm = opcode.get_bits(8..=11);
        let op2 = opcode.get_bits(5..=7);
        let rt = opcode.get_bits(0..=4);

        if !read && op0 == 2 && crn == 4 {
            // MSR (immediate): PSTATE field writes.
            let field = match (op1, op2) {
                (0b000, 0b101) => PstateField::SpSel,
                (0b011, 0b110) => PstateField::DaifSet,
                (0b011, 0b111) => PstateField::DaifClr,
                _ => return Undefined,
            };
            return PstateWrite { field, imm: crm };
        }
        if !read && op0 == 2 && crn == 2 {
            // NOP, YIELD, WFE/WFI, SEV: hints.
            return Nop;
        }
        if !read && op0 == 2 && crn == 3 {
            // Barriers and CLREX.
            if op2 == 0b010 {
                return ClearExclusive;
            }
            return Nop;
        }
        return SystemMove {
            read,
            rt,
            op0,
            op1,
            crn,
            crm,
            op2,
        };
    }
    Undefined
}

fn decode_load_store(opcode: u32) -> A64Instruction {
    use A64Instruction::*;

    // Exclusives: x001000xx.
    if opcode.get_bits(23..=29) == 0b0010_000 {
        return LoadStoreExclusive {
            load: opcode.get_bit(22),
            size: opcode.get_bits(30..=31),
            rt: opcode.get_bits(0..=4),
            rn: opcode.get_bits(5..=9),
            rs: opcode.get_bits(16..=20),
        };
    }

    // Load literal: xx011000.
    if opcode.get_bits(24..=29) == 0b01_1000 {
        let opc = opcode.get_bits(30..=31);
        let (size_64, signed_word) = match opc {
            0b00 => (false, false),
            0b01 => (true, false),
            0b10 => (true, true), // LDRSW
            _ => return Undefined,
        };
        return LoadLiteral {
            size_64,
            signed_word,
            rt: opcode.get_bits(0..=4),
            offset: (sign_extend64(19, u64::from(opcode.get_bits(5..=23))) as i64) << 2,
        };
    }

    // Pairs: xx101x0xx.
    if opcode.get_bits(25..=29) == 0b10100 {
        let opc = opcode.get_bits(30..=31);
        let (sf, signed_word) = match opc {
            0b00 => (false, false),
            0b01 => (false, true), // LDPSW
            0b10 => (true, false),
            _ => return Undefined,
        };
        let mode = match opcode.get_bits(23..=24) {
            0b01 => PairMode::PostIndexed,
            0b10 => PairMode::Offset,
            0b11 => PairMode::PreIndexed,
            _ => return Undefined,
        };
        let scale = if sf { 3 } else { 2 };
        return LoadStorePair {
            load: opcode.get_bit(22),
            sf,
            signed_word,
            rt: opcode.get_bits(0..=4),
            rt2: opcode.get_bits(10..=14),
            rn: opcode.get_bits(5..=9),
            offset: (sign_extend64(7, u64::from(opcode.get_bits(15..=21))) as i64) << scale,
            mode,
        };
    }

    // Register forms: xx111x00.
    if opcode.get_bits(24..=29) == 0b11_1001 || opcode.get_bits(24..=29) == 0b11_1000 {
        if opcode.get_bit(26) {
            // SIMD/FP transfer forms.
            return Undefined;
        }
        let size = opcode.get_bits(30..=31);
        let opc = opcode.get_bits(22..=23);
        let rt = opcode.get_bits(0..=4);
        let rn = opcode.get_bits(5..=9);

        let (load, sign_extend_32) = match opc {
            0b00 => (false, None),
            0b01 => (true, None),
            0b10 => {
                if size == 0b11 {
                    // PRFM with an immediate: a hint.
                    return Nop;
                }
                (true, Some(false))
            }
            _ => {
                if size >= 0b10 {
                    return Undefined;
                }
                (true, Some(true))
            }
        };

        let offset = if opcode.get_bit(24) {
            A64Offset::Unsigned {
                offset: u64::from(opcode.get_bits(10..=21)) << size,
            }
        } else {
            let imm9 = sign_extend64(9, u64::from(opcode.get_bits(12..=20))) as i64;
            match opcode.get_bits(10..=11) {
                0b00 => A64Offset::Unscaled { offset: imm9 },
                0b01 => A64Offset::PostIndexed { offset: imm9 },
                0b11 => A64Offset::PreIndexed { offset: imm9 },
                _ => {
                    if !opcode.get_bit(21) {
                        return Undefined;
                    }
                    A64Offset::Register {
                        rm: opcode.get_bits(16..=20),
                        option: opcode.get_bits(13..=15),
                        shift: if opcode.get_bit(12) { size } else { 0 },
                    }
                }
            }
        };

        return LoadStoreRegister {
            load,
            size,
            sign_extend_32,
            rt,
            rn,
            offset,
        };
    }

    Undefined
}

fn decode_dp_register(opcode: u32) -> A64Instruction {
    use A64Instruction::*;

    let sf = opcode.get_bit(31);
    let rd = opcode.get_bits(0..=4);
    let rn = opcode.get_bits(5..=9);
    let rm = opcode.get_bits(16..=20);

    if opcode.get_bit(28) && opcode.get_bits(24..=27) == 0b1011 {
        // Three-source data processing.
        let op = match (opcode.get_bits(21..=23), opcode.get_bit(15)) {
            (0b000, false) => DataProc3Op::Madd,
            (0b000, true) => DataProc3Op::Msub,
            (0b001, false) => DataProc3Op::Smaddl,
            (0b001, true) => DataProc3Op::Smsubl,
            (0b010, false) => DataProc3Op::Smulh,
            (0b101, false) => DataProc3Op::Umaddl,
            (0b101, true) => DataProc3Op::Umsubl,
            (0b110, false) => DataProc3Op::Umulh,
            _ => return Undefined,
        };
        return DataProc3 {
            sf,
            op,
            rd,
            rn,
            rm,
            ra: opcode.get_bits(10..=14),
        };
    }

    if !opcode.get_bit(28) && opcode.get_bits(24..=27) == 0b1010 {
        // Logical (shifted register).
        let op = match opcode.get_bits(29..=30) {
            0b00 => LogicalOp::And,
            0b01 => LogicalOp::Orr,
            0b10 => LogicalOp::Eor,
            _ => LogicalOp::Ands,
        };
        return LogicalShiftedRegister {
            sf,
            op,
            invert: opcode.get_bit(21),
            rd,
            rn,
            rm,
            shift_type: opcode.get_bits(22..=23),
            amount: opcode.get_bits(10..=15),
        };
    }

    if !opcode.get_bit(28) && opcode.get_bits(24..=27) == 0b1011 {
        if opcode.get_bit(21) {
            return AddSubExtendedRegister {
                sf,
                subtract: opcode.get_bit(30),
                set_flags: opcode.get_bit(29),
                rd,
                rn,
                rm,
                option: opcode.get_bits(13..=15),
                amount: opcode.get_bits(10..=12),
            };
        }
        return AddSubShiftedRegister {
            sf,
            subtract: opcode.get_bit(30),
            set_flags: opcode.get_bit(29),
            rd,
            rn,
            rm,
            shift_type: opcode.get_bits(22..=23),
            amount: opcode.get_bits(10..=15),
        };
    }

    if opcode.get_bit(28) && opcode.get_bits(21..=27) == 0b1010000 && opcode.get_bits(10..=15) == 0
    {
        return AddSubCarry {
            sf,
            subtract: opcode.get_bit(30),
            set_flags: opcode.get_bit(29),
            rd,
            rn,
            rm,
        };
    }

    if opcode.get_bit(28) && opcode.get_bits(21..=27) == 0b1010100 && opcode.get_bit(11) == false {
        let op = match (opcode.get_bit(30), opcode.get_bit(10)) {
            (false, false) => CondSelectOp::Csel,
            (false, true) => CondSelectOp::Csinc,
            (true, false) => CondSelectOp::Csinv,
            (true, true) => CondSelectOp::Csneg,
        };
        return CondSelect {
            sf,
            op,
            rd,
            rn,
            rm,
            condition: opcode.get_bits(12..=15) as u8,
        };
    }

    if opcode.get_bit(28) && opcode.get_bits(21..=27) == 0b1010110 {
        if opcode.get_bit(30) {
            // One-source group.
            if rm != 0 {
                return Undefined;
            }
            let op = match opcode.get_bits(10..=15) {
                0b000000 => DataProc1Op::Rbit,
                0b000001 => DataProc1Op::Rev16,
                0b000010 => {
                    if sf {
                        DataProc1Op::Rev32
                    } else {
                        DataProc1Op::Rev
                    }
                }
                0b000011 if sf => DataProc1Op::Rev,
                0b000100 => DataProc1Op::Clz,
                0b000101 => DataProc1Op::Cls,
                _ => return Undefined,
            };
            return DataProc1 { sf, op, rd, rn };
        }
        let op = match opcode.get_bits(10..=15) {
            0b000010 => DataProc2Op::Udiv,
            0b000011 => DataProc2Op::Sdiv,
            0b001000 => DataProc2Op::Lslv,
            0b001001 => DataProc2Op::Lsrv,
            0b001010 => DataProc2Op::Asrv,
            0b001011 => DataProc2Op::Rorv,
            _ => return Undefined,
        };
        return DataProc2 { sf, op, rd, rn, rm };
    }

    Undefined
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_add_immediate() {
        // ADD X0, X1, #4
        assert_eq!(
            A64Instruction::decode(0x9100_1020),
            A64Instruction::AddSubImmediate {
                sf: true,
                subtract: false,
                set_flags: false,
                rd: 0,
                rn: 1,
                immediate: 4,
            }
        );
        // SUBS W3, W4, #1, LSL #12
        assert_eq!(
            A64Instruction::decode(0x7140_0483),
            A64Instruction::AddSubImmediate {
                sf: false,
                subtract: true,
                set_flags: true,
                rd: 3,
                rn: 4,
                immediate: 1 << 12,
            }
        );
    }

    #[test]
    fn decodes_logical_immediate() {
        // AND X0, X1, #0xF (N=1, immr=0, imms=000011)
        assert_eq!(
            A64Instruction::decode(0x9240_0C20),
            A64Instruction::LogicalImmediate {
                sf: true,
                op: LogicalOp::And,
                rd: 0,
                rn: 1,
                mask: 0xF,
            }
        );
    }

    #[test]
    fn reserved_bitmask_is_undefined() {
        // imms all-ones at the 64-bit level.
        assert_eq!(
            A64Instruction::decode(0x9240_FC20),
            A64Instruction::Undefined
        );
    }

    #[test]
    fn decodes_movz_movk() {
        // MOVZ X5, #0x1234, LSL #16
        assert_eq!(
            A64Instruction::decode(0xD2A2_4685),
            A64Instruction::MoveWide {
                sf: true,
                op: MoveWideOp::Movz,
                rd: 5,
                imm16: 0x1234,
                shift: 16,
            }
        );
        // A 32-bit MOVZ with hw > 1 is unallocated.
        assert_eq!(
            A64Instruction::decode(0x52C0_0000),
            A64Instruction::Undefined
        );
    }

    #[test]
    fn decodes_branches() {
        // B #+8
        assert_eq!(
            A64Instruction::decode(0x1400_0002),
            A64Instruction::Branch {
                link: false,
                offset: 8
            }
        );
        // BL #-4
        assert_eq!(
            A64Instruction::decode(0x97FF_FFFF),
            A64Instruction::Branch {
                link: true,
                offset: -4
            }
        );
        // B.EQ #+4
        assert_eq!(
            A64Instruction::decode(0x5400_0020),
            A64Instruction::BranchCond {
                condition: 0,
                offset: 4
            }
        );
        // CBNZ X2, #+16
        assert_eq!(
            A64Instruction::decode(0xB500_0082),
            A64Instruction::CompareBranch {
                sf: true,
                nonzero: true,
                rt: 2,
                offset: 16,
            }
        );
        // RET
        assert_eq!(
            A64Instruction::decode(0xD65F_03C0),
            A64Instruction::BranchRegister {
                op: BranchRegisterOp::Ret,
                rn: 30
            }
        );
        // ERET
        assert_eq!(A64Instruction::decode(0xD69F_03E0), A64Instruction::ExceptionReturn);
    }

    #[test]
    fn decodes_svc_and_brk() {
        assert_eq!(
            A64Instruction::decode(0xD400_0001),
            A64Instruction::ExceptionGen {
                op: ExceptionGenOp::Svc,
                imm16: 0
            }
        );
        assert_eq!(
            A64Instruction::decode(0xD420_07E0),
            A64Instruction::ExceptionGen {
                op: ExceptionGenOp::Brk,
                imm16: 0x3F,
            }
        );
    }

    #[test]
    fn decodes_system_moves_and_hints() {
        // MRS X0, MIDR_EL1 (op0=3, op1=0, C0, C0, 0)
        assert_eq!(
            A64Instruction::decode(0xD538_0000),
            A64Instruction::SystemMove {
                read: true,
                rt: 0,
                op0: 3,
                op1: 0,
                crn: 0,
                crm: 0,
                op2: 0,
            }
        );
        // NOP
        assert_eq!(A64Instruction::decode(0xD503_201F), A64Instruction::Nop);
        // CLREX
        assert_eq!(
            A64Instruction::decode(0xD503_305F),
            A64Instruction::ClearExclusive
        );
    }

    #[test]
    fn decodes_loads_and_stores() {
        // LDR X1, [X0, #16]
        assert_eq!(
            A64Instruction::decode(0xF940_0801),
            A64Instruction::LoadStoreRegister {
                load: true,
                size: 3,
                sign_extend_32: None,
                rt: 1,
                rn: 0,
                offset: A64Offset::Unsigned { offset: 16 },
            }
        );
        // STR W1, [X0], #4 (post-index)
        assert_eq!(
            A64Instruction::decode(0xB800_4401),
            A64Instruction::LoadStoreRegister {
                load: false,
                size: 2,
                sign_extend_32: None,
                rt: 1,
                rn: 0,
                offset: A64Offset::PostIndexed { offset: 4 },
            }
        );
        // LDP X0, X1, [SP, #16]
        assert_eq!(
            A64Instruction::decode(0xA941_07E0),
            A64Instruction::LoadStorePair {
                load: true,
                sf: true,
                signed_word: false,
                rt: 0,
                rt2: 1,
                rn: 31,
                offset: 16,
                mode: PairMode::Offset,
            }
        );
    }

    #[test]
    fn decodes_csel_family() {
        // CSEL X0, X1, X2, EQ
        assert_eq!(
            A64Instruction::decode(0x9A82_0020),
            A64Instruction::CondSelect {
                sf: true,
                op: CondSelectOp::Csel,
                rd: 0,
                rn: 1,
                rm: 2,
                condition: 0,
            }
        );
        // CSINC W0, W1, W2, NE
        assert_eq!(
            A64Instruction::decode(0x1A82_1420),
            A64Instruction::CondSelect {
                sf: false,
                op: CondSelectOp::Csinc,
                rd: 0,
                rn: 1,
                rm: 2,
                condition: 1,
            }
        );
    }

    #[test]
    fn decodes_multiply_and_divide() {
        // MADD X0, X1, X2, X3
        assert_eq!(
            A64Instruction::decode(0x9B02_0C20),
            A64Instruction::DataProc3 {
                sf: true,
                op: DataProc3Op::Madd,
                rd: 0,
                rn: 1,
                rm: 2,
                ra: 3,
            }
        );
        // UDIV X0, X1, X2
        assert_eq!(
            A64Instruction::decode(0x9AC2_0820),
            A64Instruction::DataProc2 {
                sf: true,
                op: DataProc2Op::Udiv,
                rd: 0,
                rn: 1,
                rm: 2,
            }
        );
    }
}
