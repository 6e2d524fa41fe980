//! ARM (A32/A26) instruction decoding.
//!
//! [`ArmInstruction::decode`] classifies a fetched word into a structured
//! instruction, gated on the configured version and features: an encoding
//! the part does not implement decodes to `Undefined` and takes the
//! undefined-instruction trap at execution. The decode order follows how
//! many bits each pattern pins down, most-specific first, because several
//! spaces (multiplies, swaps, halfword transfers) overlap the data
//! processing layout.

use crate::bitwise::{sign_extend32, Bits};
use crate::config::{ArmConfig, ArmFeature, ArmVersion};
use crate::cpu::arm::alu::{decode_register_operand, AluSecondOperandInfo, ShiftKind, ShiftOperator};
use crate::cpu::pstate::Condition;
use crate::cpu::flags::{
    HalfwordOffsetKind, HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, ReadWriteKind,
};

/// The sixteen data-processing operations (bits 24:21).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmAluOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl From<u32> for ArmAluOp {
    fn from(bits: u32) -> Self {
        match bits & 0xF {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Sub,
            0x3 => Self::Rsb,
            0x4 => Self::Add,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Rsc,
            0x8 => Self::Tst,
            0x9 => Self::Teq,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mov,
            0xE => Self::Bic,
            _ => Self::Mvn,
        }
    }
}

impl std::fmt::Display for ArmAluOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = format!("{self:?}").to_uppercase();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplyVariant {
    Mul,
    Mla,
    Mls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplyLongVariant {
    Umull,
    Umlal,
    Smull,
    Smlal,
}

/// The v5TE halfword multiply family (bits 22:21 of the 00010xx0 space).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfwordMultiplyVariant {
    /// SMLA<x><y>
    Smla,
    /// SMLAW<y>
    Smlaw,
    /// SMULW<y>
    Smulw,
    /// SMLAL<x><y>
    Smlal,
    /// SMUL<x><y>
    Smul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturatingVariant {
    QAdd,
    QSub,
    QDAdd,
    QDSub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsrKind {
    Cpsr,
    Spsr,
}

impl std::fmt::Display for PsrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpsr => f.write_str("CPSR"),
            Self::Spsr => f.write_str("SPSR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsrOpKind {
    Mrs { destination: u32 },
    Msr { fields: u32, source: u32 },
    MsrImmediate { fields: u32, base: u32, shift: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveVariant {
    Strex,
    Ldrex,
    Strexd,
    Ldrexd,
    Strexb,
    Ldrexb,
    Strexh,
    Ldrexh,
}

/// Unsigned/signed, saturating and halving flavours of the parallel
/// add/subtract family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelClass {
    Signed,
    SignedSaturating,
    SignedHalving,
    Unsigned,
    UnsignedSaturating,
    UnsignedHalving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelOp {
    Add16,
    Sub16,
    Add8,
    Sub8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendKind {
    Sxtb,
    Sxth,
    Uxtb,
    Uxth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseKind {
    Rev,
    Rev16,
    Revsh,
    Rbit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitFieldKind {
    Bfc,
    Bfi,
    Sbfx,
    Ubfx,
}

/// Offset field of LDR/STR-class transfers; register offsets only shift by
/// constants (shift-by-register is unpredictable there).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleDataTransferOffsetInfo {
    Immediate { offset: u32 },
    RegisterShift { register: u32, shift: ShiftOperator },
}

impl std::fmt::Display for SingleDataTransferOffsetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate { offset } => write!(f, "#{offset}"),
            Self::RegisterShift { register, shift } => match shift {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmInstruction {
    DataProcessing {
        alu_instruction: ArmAluOp,
        set_conditions: bool,
        rn: u32,
        destination: u32,
        op2: AluSecondOperandInfo,
    },
    Multiply {
        variant: MultiplyVariant,
        set_conditions: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    },
    MultiplyLong {
        variant: MultiplyLongVariant,
        set_conditions: bool,
        rdhi: u32,
        rdlo: u32,
        rs: u32,
        rm: u32,
    },
    HalfwordMultiply {
        variant: HalfwordMultiplyVariant,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
        x: bool,
        y: bool,
    },
    Saturating {
        variant: SaturatingVariant,
        rd: u32,
        rn: u32,
        rm: u32,
    },
    CountLeadingZeros {
        rd: u32,
        rm: u32,
    },
    PsrTransfer {
        psr: PsrKind,
        kind: PsrOpKind,
    },
    BranchAndExchange {
        register: u32,
    },
    BranchLinkExchangeRegister {
        register: u32,
    },
    BranchAndExchangeJazelle {
        register: u32,
    },
    Branch {
        link: bool,
        offset: i32,
    },
    /// BLX with an immediate target (always switches to Thumb).
    BranchLinkExchangeImmediate {
        offset: i32,
    },
    SingleDataTransfer {
        kind: LoadStoreKind,
        quantity: ReadWriteKind,
        /// The T variants force an unprivileged access.
        translation: bool,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        base_register: u32,
        offset_info: SingleDataTransferOffsetInfo,
    },
    HalfwordDataTransfer {
        kind: LoadStoreKind,
        transfer: HalfwordTransferKind,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        base_register: u32,
        offset: HalfwordOffsetKind,
    },
    DoublewordDataTransfer {
        kind: LoadStoreKind,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        base_register: u32,
        offset: HalfwordOffsetKind,
    },
    BlockDataTransfer {
        kind: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        /// The `^` form: user-bank transfer, or CPSR restore with R15.
        load_psr: bool,
        write_back: bool,
        rn: u32,
        register_list: u16,
    },
    SingleDataSwap {
        byte: bool,
        rd: u32,
        rm: u32,
        rn: u32,
    },
    Exclusive {
        variant: ExclusiveVariant,
        rd: u32,
        rm: u32,
        rn: u32,
    },
    ReturnFromException {
        rn: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
    },
    SaveReturnState {
        mode: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
    },
    MoveHalfword {
        top: bool,
        rd: u32,
        immediate: u32,
    },
    ParallelAddSub {
        class: ParallelClass,
        op: ParallelOp,
        rd: u32,
        rn: u32,
        rm: u32,
    },
    Extend {
        kind: ExtendKind,
        rd: u32,
        /// 0xF means no accumulate (plain extend).
        rn: u32,
        rm: u32,
        rotation: u32,
    },
    Reverse {
        kind: ReverseKind,
        rd: u32,
        rm: u32,
    },
    BitField {
        kind: BitFieldKind,
        rd: u32,
        rn: u32,
        lsb: u32,
        msb_or_width: u32,
    },
    SetEndianness {
        big: bool,
    },
    ChangeProcessorState {
        imod: u32,
        change_mode: bool,
        aif: u32,
        mode: u32,
    },
    ExceptionReturn,
    SoftwareInterrupt {
        comment: u32,
    },
    Breakpoint {
        comment: u32,
    },
    ClearExclusive,
    CoprocessorDataTransfer {
        kind: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        coprocessor: u32,
        crd: u32,
        base_register: u32,
        offset: u32,
    },
    CoprocessorDataOperation {
        coprocessor: u32,
    },
    CoprocessorRegisterTransfer {
        kind: LoadStoreKind,
        coprocessor: u32,
        rd: u32,
    },
    CoprocessorDoubleRegisterTransfer {
        kind: LoadStoreKind,
        coprocessor: u32,
        rd: u32,
        rn: u32,
    },
    Nop,
    Undefined,
}

/// A fetched ARM word together with its decoded classification.
#[derive(Debug, Clone, Copy)]
pub struct ArmOpcode {
    pub instruction: ArmInstruction,
    pub condition: Condition,
    pub raw: u32,
}

impl ArmOpcode {
    #[must_use]
    pub fn decode(raw: u32, config: &ArmConfig) -> Self {
        let condition = Condition::from_bits(raw.get_bits(28..=31) as u8);
        let instruction = if condition == Condition::NV && config.version >= ArmVersion::V5 {
            decode_unconditional(raw, config)
        } else {
            decode_conditional(raw, config)
        };
        Self {
            instruction,
            condition,
            raw,
        }
    }
}

impl std::fmt::Display for ArmOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instruction.disassembler(self.condition))
    }
}

fn halfword_offset(opcode: u32) -> HalfwordOffsetKind {
    if opcode.get_bit(22) {
        HalfwordOffsetKind::Immediate {
            offset: (opcode.get_bits(8..=11) << 4) | opcode.get_bits(0..=3),
        }
    } else {
        HalfwordOffsetKind::Register {
            register: opcode.get_bits(0..=3),
        }
    }
}

/// The v5+ always-execute space (condition field 0b1111).
fn decode_unconditional(opcode: u32, config: &ArmConfig) -> ArmInstruction {
    use ArmInstruction::*;

    if opcode.get_bits(25..=27) == 0b101 {
        // BLX <label>: bit 24 is the extra half-word bit.
        let mut offset = sign_extend32(26, opcode.get_bits(0..=23) << 2) as i32;
        offset |= i32::from(opcode.get_bit(24)) << 1;
        return BranchLinkExchangeImmediate { offset };
    }

    if opcode == 0xF57F_F01F {
        return if config.version >= ArmVersion::V6 {
            ClearExclusive
        } else {
            Undefined
        };
    }
    if opcode & 0xFFF0_FF00 == 0xF570_F000 {
        // Barriers and instruction-stream hints execute as no-ops on a
        // single-core interpreter.
        return Nop;
    }
    if opcode & 0xFD70_F000 == 0xF550_F000 {
        // PLD/PLDW: a prefetch hint.
        return Nop;
    }

    if config.version >= ArmVersion::V6 {
        if opcode & 0xFFFF_FC00 == 0xF101_0000 {
            return SetEndianness {
                big: opcode.get_bit(9),
            };
        }
        if opcode & 0xFFF1_FE20 == 0xF100_0000 {
            return ChangeProcessorState {
                imod: opcode.get_bits(18..=19),
                change_mode: opcode.get_bit(17),
                aif: opcode.get_bits(6..=8),
                mode: opcode.get_bits(0..=4) & 0xF,
            };
        }
        if opcode & 0xFE50_FFFF == 0xF810_0A00 {
            return ReturnFromException {
                rn: opcode.get_bits(16..=19),
                indexing: opcode.get_bit(24).into(),
                offsetting: opcode.get_bit(23).into(),
                write_back: opcode.get_bit(21),
            };
        }
        if opcode & 0xFE5F_FFE0 == 0xF84D_0500 {
            return SaveReturnState {
                mode: opcode.get_bits(0..=3),
                indexing: opcode.get_bit(24).into(),
                offsetting: opcode.get_bit(23).into(),
                write_back: opcode.get_bit(21),
            };
        }
    }

    Undefined
}

fn decode_conditional(opcode: u32, config: &ArmConfig) -> ArmInstruction {
    use ArmInstruction::*;

    let features = config.features;
    let version = config.version;

    if opcode.get_bits(4..=27) == 0b0001_0010_1111_1111_1111_0001 {
        // BX became architectural with Thumb.
        if features.has(ArmFeature::Thumb) || version >= ArmVersion::V5 {
            return BranchAndExchange {
                register: opcode.get_bits(0..=3),
            };
        }
        return Undefined;
    }
    if opcode.get_bits(4..=27) == 0b0001_0010_1111_1111_1111_0010 {
        if features.has(ArmFeature::Jazelle) {
            return BranchAndExchangeJazelle {
                register: opcode.get_bits(0..=3),
            };
        }
        return Undefined;
    }
    if opcode.get_bits(4..=27) == 0b0001_0010_1111_1111_1111_0011 {
        if version >= ArmVersion::V5 {
            return BranchLinkExchangeRegister {
                register: opcode.get_bits(0..=3),
            };
        }
        return Undefined;
    }
    if opcode.get_bits(0..=27) == 0x0160_006E {
        if features.has(ArmFeature::Virtualization) {
            return ExceptionReturn;
        }
        return Undefined;
    }
    if opcode.get_bits(16..=27) == 0x16F && opcode.get_bits(4..=11) == 0xF1 {
        if version >= ArmVersion::V5 {
            return CountLeadingZeros {
                rd: opcode.get_bits(12..=15),
                rm: opcode.get_bits(0..=3),
            };
        }
        return Undefined;
    }
    if opcode.get_bits(20..=27) == 0b0001_0010 && opcode.get_bits(4..=7) == 0b0111 {
        if version >= ArmVersion::V5 {
            return Breakpoint {
                comment: (opcode.get_bits(8..=19) << 4) | opcode.get_bits(0..=3),
            };
        }
        return Undefined;
    }

    // Saturating arithmetic: 00010qq0 .... 0101.
    if opcode.get_bits(23..=27) == 0b00010
        && !opcode.get_bit(20)
        && opcode.get_bits(4..=7) == 0b0101
    {
        if !features.has(ArmFeature::EnhDsp) {
            return Undefined;
        }
        let variant = match opcode.get_bits(21..=22) {
            0b00 => SaturatingVariant::QAdd,
            0b01 => SaturatingVariant::QSub,
            0b10 => SaturatingVariant::QDAdd,
            _ => SaturatingVariant::QDSub,
        };
        return Saturating {
            variant,
            rd: opcode.get_bits(12..=15),
            rn: opcode.get_bits(16..=19),
            rm: opcode.get_bits(0..=3),
        };
    }

    // Halfword multiplies: 00010oo0 .... 1yx0.
    if opcode.get_bits(23..=27) == 0b00010
        && !opcode.get_bit(20)
        && opcode.get_bit(7)
        && !opcode.get_bit(4)
    {
        if !features.has(ArmFeature::EnhDsp) {
            return Undefined;
        }
        let x = opcode.get_bit(5);
        let y = opcode.get_bit(6);
        let variant = match opcode.get_bits(21..=22) {
            0b00 => HalfwordMultiplyVariant::Smla,
            0b01 => {
                if x {
                    HalfwordMultiplyVariant::Smulw
                } else {
                    HalfwordMultiplyVariant::Smlaw
                }
            }
            0b10 => HalfwordMultiplyVariant::Smlal,
            _ => HalfwordMultiplyVariant::Smul,
        };
        return HalfwordMultiply {
            variant,
            rd: opcode.get_bits(16..=19),
            rn: opcode.get_bits(12..=15),
            rs: opcode.get_bits(8..=11),
            rm: opcode.get_bits(0..=3),
            x,
            y,
        };
    }

    // MRS/MSR in the 00010/00110 miscellaneous space.
    if opcode.get_bits(23..=27) == 0b00010
        && opcode.get_bits(20..=21) == 0b00
        && opcode.get_bits(16..=19) == 0b1111
        && opcode.get_bits(0..=11) == 0
    {
        return PsrTransfer {
            psr: if opcode.get_bit(22) {
                PsrKind::Spsr
            } else {
                PsrKind::Cpsr
            },
            kind: PsrOpKind::Mrs {
                destination: opcode.get_bits(12..=15),
            },
        };
    }
    if opcode.get_bits(23..=27) == 0b00010
        && opcode.get_bits(20..=21) == 0b10
        && opcode.get_bits(12..=15) == 0b1111
        && opcode.get_bits(4..=11) == 0
    {
        return PsrTransfer {
            psr: if opcode.get_bit(22) {
                PsrKind::Spsr
            } else {
                PsrKind::Cpsr
            },
            kind: PsrOpKind::Msr {
                fields: opcode.get_bits(16..=19),
                source: opcode.get_bits(0..=3),
            },
        };
    }
    if opcode.get_bits(23..=27) == 0b00110
        && opcode.get_bits(20..=21) == 0b10
        && opcode.get_bits(12..=15) == 0b1111
    {
        return PsrTransfer {
            psr: if opcode.get_bit(22) {
                PsrKind::Spsr
            } else {
                PsrKind::Cpsr
            },
            kind: PsrOpKind::MsrImmediate {
                fields: opcode.get_bits(16..=19),
                base: opcode.get_bits(0..=7),
                shift: opcode.get_bits(8..=11) * 2,
            },
        };
    }

    // MOVW/MOVT (v6T2).
    if opcode.get_bits(20..=27) == 0b0011_0000 || opcode.get_bits(20..=27) == 0b0011_0100 {
        if !features.has(ArmFeature::Thumb2) {
            return Undefined;
        }
        return MoveHalfword {
            top: opcode.get_bit(22),
            rd: opcode.get_bits(12..=15),
            immediate: (opcode.get_bits(16..=19) << 12) | opcode.get_bits(0..=11),
        };
    }

    // Swap: 00010B00 .... 1001.
    if opcode.get_bits(23..=27) == 0b00010
        && opcode.get_bits(20..=21) == 0b00
        && opcode.get_bits(4..=11) == 0b0000_1001
    {
        if !features.has(ArmFeature::Swp) {
            return Undefined;
        }
        return SingleDataSwap {
            byte: opcode.get_bit(22),
            rd: opcode.get_bits(12..=15),
            rm: opcode.get_bits(0..=3),
            rn: opcode.get_bits(16..=19),
        };
    }

    // Exclusives: 000110xx .... 1001 (v6+).
    if opcode.get_bits(23..=27) == 0b00011 && opcode.get_bits(4..=7) == 0b1001 {
        if version < ArmVersion::V6 {
            return Undefined;
        }
        let variant = match opcode.get_bits(20..=22) {
            0b000 => ExclusiveVariant::Strex,
            0b001 => ExclusiveVariant::Ldrex,
            0b010 => ExclusiveVariant::Strexd,
            0b011 => ExclusiveVariant::Ldrexd,
            0b100 => ExclusiveVariant::Strexb,
            0b101 => ExclusiveVariant::Ldrexb,
            0b110 => ExclusiveVariant::Strexh,
            _ => ExclusiveVariant::Ldrexh,
        };
        return Exclusive {
            variant,
            rd: opcode.get_bits(12..=15),
            rm: opcode.get_bits(0..=3),
            rn: opcode.get_bits(16..=19),
        };
    }

    // Long multiplies: 00001... 1001.
    if opcode.get_bits(23..=27) == 0b00001 && opcode.get_bits(4..=7) == 0b1001 {
        if !features.has(ArmFeature::Mull) {
            return Undefined;
        }
        let variant = match opcode.get_bits(21..=22) {
            0b00 => MultiplyLongVariant::Umull,
            0b01 => MultiplyLongVariant::Umlal,
            0b10 => MultiplyLongVariant::Smull,
            _ => MultiplyLongVariant::Smlal,
        };
        return MultiplyLong {
            variant,
            set_conditions: opcode.get_bit(20),
            rdhi: opcode.get_bits(16..=19),
            rdlo: opcode.get_bits(12..=15),
            rs: opcode.get_bits(8..=11),
            rm: opcode.get_bits(0..=3),
        };
    }

    // MUL/MLA/MLS: 000000.. 1001 (MLS: 00000110, v6T2).
    if opcode.get_bits(22..=27) == 0 && opcode.get_bits(4..=7) == 0b1001 {
        let variant = if opcode.get_bit(21) {
            MultiplyVariant::Mla
        } else {
            MultiplyVariant::Mul
        };
        return Multiply {
            variant,
            set_conditions: opcode.get_bit(20),
            rd: opcode.get_bits(16..=19),
            rn: opcode.get_bits(12..=15),
            rs: opcode.get_bits(8..=11),
            rm: opcode.get_bits(0..=3),
        };
    }
    if opcode.get_bits(21..=27) == 0b0000011
        && !opcode.get_bit(20)
        && opcode.get_bits(4..=7) == 0b1001
    {
        if !features.has(ArmFeature::Thumb2) {
            return Undefined;
        }
        return Multiply {
            variant: MultiplyVariant::Mls,
            set_conditions: false,
            rd: opcode.get_bits(16..=19),
            rn: opcode.get_bits(12..=15),
            rs: opcode.get_bits(8..=11),
            rm: opcode.get_bits(0..=3),
        };
    }

    // Halfword and doubleword transfers: 000....1 ..1. with bits 6:5 != 00.
    if opcode.get_bits(25..=27) == 0 && opcode.get_bit(7) && opcode.get_bit(4) {
        let load = opcode.get_bit(20);
        let kind_bits = opcode.get_bits(5..=6);
        let common_rd = opcode.get_bits(12..=15);
        let base_register = opcode.get_bits(16..=19);
        let indexing: Indexing = opcode.get_bit(24).into();
        let offsetting: Offsetting = opcode.get_bit(23).into();
        let write_back = opcode.get_bit(21);
        let offset = halfword_offset(opcode);

        if !load && kind_bits >= 0b10 {
            // LDRD (10) / STRD (11) in the store encodings, v5TE pairs.
            if !features.has(ArmFeature::DspPair) {
                return Undefined;
            }
            return DoublewordDataTransfer {
                kind: if kind_bits == 0b10 {
                    LoadStoreKind::Load
                } else {
                    LoadStoreKind::Store
                },
                write_back,
                indexing,
                offsetting,
                rd: common_rd,
                base_register,
                offset,
            };
        }

        let transfer = match kind_bits {
            0b01 => HalfwordTransferKind::UnsignedHalfword,
            0b10 => HalfwordTransferKind::SignedByte,
            0b11 => HalfwordTransferKind::SignedHalfword,
            _ => return Undefined,
        };
        if !load && transfer != HalfwordTransferKind::UnsignedHalfword {
            return Undefined;
        }
        if transfer != HalfwordTransferKind::UnsignedHalfword && version < ArmVersion::V4 {
            return Undefined;
        }
        return HalfwordDataTransfer {
            kind: if load {
                LoadStoreKind::Load
            } else {
                LoadStoreKind::Store
            },
            transfer,
            write_back,
            indexing,
            offsetting,
            rd: common_rd,
            base_register,
            offset,
        };
    }

    match opcode.get_bits(25..=27) {
        0b000 | 0b001 => {
            let alu_instruction = ArmAluOp::from(opcode.get_bits(21..=24));
            let set_conditions = opcode.get_bit(20);
            // Compare-class ops without S landed in the miscellaneous
            // space, which was handled above.
            if !set_conditions
                && matches!(
                    alu_instruction,
                    ArmAluOp::Tst | ArmAluOp::Teq | ArmAluOp::Cmp | ArmAluOp::Cmn
                )
            {
                return Undefined;
            }
            let op2 = if opcode.get_bit(25) {
                AluSecondOperandInfo::Immediate {
                    base: opcode.get_bits(0..=7),
                    shift: opcode.get_bits(8..=11) * 2,
                }
            } else {
                decode_register_operand(opcode)
            };
            DataProcessing {
                alu_instruction,
                set_conditions,
                rn: opcode.get_bits(16..=19),
                destination: opcode.get_bits(12..=15),
                op2,
            }
        }
        0b011 if opcode.get_bit(4) => decode_media(opcode, config),
        0b010 | 0b011 => {
            let offset_info = if opcode.get_bit(25) {
                SingleDataTransferOffsetInfo::RegisterShift {
                    register: opcode.get_bits(0..=3),
                    shift: match decode_register_operand(opcode) {
                        AluSecondOperandInfo::Register { shift, .. } => shift,
                        AluSecondOperandInfo::Immediate { .. } => unreachable!(),
                    },
                }
            } else {
                SingleDataTransferOffsetInfo::Immediate {
                    offset: opcode.get_bits(0..=11),
                }
            };
            let indexing: Indexing = opcode.get_bit(24).into();
            // Post-indexed with W set is the unprivileged T variant.
            let translation = indexing == Indexing::Post && opcode.get_bit(21);
            SingleDataTransfer {
                kind: if opcode.get_bit(20) {
                    LoadStoreKind::Load
                } else {
                    LoadStoreKind::Store
                },
                quantity: opcode.get_bit(22).into(),
                translation,
                write_back: opcode.get_bit(21),
                indexing,
                offsetting: opcode.get_bit(23).into(),
                rd: opcode.get_bits(12..=15),
                base_register: opcode.get_bits(16..=19),
                offset_info,
            }
        }
        0b100 => BlockDataTransfer {
            kind: if opcode.get_bit(20) {
                LoadStoreKind::Load
            } else {
                LoadStoreKind::Store
            },
            indexing: opcode.get_bit(24).into(),
            offsetting: opcode.get_bit(23).into(),
            load_psr: opcode.get_bit(22),
            write_back: opcode.get_bit(21),
            rn: opcode.get_bits(16..=19),
            register_list: opcode.get_bits(0..=15) as u16,
        },
        0b101 => Branch {
            link: opcode.get_bit(24),
            offset: sign_extend32(26, opcode.get_bits(0..=23) << 2) as i32,
        },
        0b110 => {
            if opcode.get_bits(21..=27) == 0b1100010 {
                // MCRR/MRRC (v5TE).
                if !features.has(ArmFeature::DspPair) {
                    return Undefined;
                }
                return CoprocessorDoubleRegisterTransfer {
                    kind: if opcode.get_bit(20) {
                        LoadStoreKind::Load
                    } else {
                        LoadStoreKind::Store
                    },
                    coprocessor: opcode.get_bits(8..=11),
                    rd: opcode.get_bits(12..=15),
                    rn: opcode.get_bits(16..=19),
                };
            }
            CoprocessorDataTransfer {
                kind: if opcode.get_bit(20) {
                    LoadStoreKind::Load
                } else {
                    LoadStoreKind::Store
                },
                indexing: opcode.get_bit(24).into(),
                offsetting: opcode.get_bit(23).into(),
                write_back: opcode.get_bit(21),
                coprocessor: opcode.get_bits(8..=11),
                crd: opcode.get_bits(12..=15),
                base_register: opcode.get_bits(16..=19),
                offset: opcode.get_bits(0..=7) << 2,
            }
        }
        0b111 => {
            if opcode.get_bits(24..=27) == 0b1111 {
                return SoftwareInterrupt {
                    comment: opcode.get_bits(0..=23),
                };
            }
            if opcode.get_bit(4) {
                CoprocessorRegisterTransfer {
                    kind: if opcode.get_bit(20) {
                        LoadStoreKind::Load
                    } else {
                        LoadStoreKind::Store
                    },
                    coprocessor: opcode.get_bits(8..=11),
                    rd: opcode.get_bits(12..=15),
                }
            } else {
                CoprocessorDataOperation {
                    coprocessor: opcode.get_bits(8..=11),
                }
            }
        }
        _ => Undefined,
    }
}

/// The v6 media space (011 with bit 4 set).
fn decode_media(opcode: u32, config: &ArmConfig) -> ArmInstruction {
    use ArmInstruction::*;

    let version = config.version;
    if version < ArmVersion::V6 {
        return Undefined;
    }

    let rd = opcode.get_bits(12..=15);
    let rn = opcode.get_bits(16..=19);
    let rm = opcode.get_bits(0..=3);

    if opcode.get_bits(23..=24) == 0b00 {
        let class = match opcode.get_bits(20..=22) {
            0b001 => ParallelClass::Signed,
            0b010 => ParallelClass::SignedSaturating,
            0b011 => ParallelClass::SignedHalving,
            0b101 => ParallelClass::Unsigned,
            0b110 => ParallelClass::UnsignedSaturating,
            0b111 => ParallelClass::UnsignedHalving,
            _ => return Undefined,
        };
        let op = match opcode.get_bits(5..=7) {
            0b000 => ParallelOp::Add16,
            0b011 => ParallelOp::Sub16,
            0b100 => ParallelOp::Add8,
            0b111 => ParallelOp::Sub8,
            _ => return Undefined,
        };
        return ParallelAddSub {
            class,
            op,
            rd,
            rn: opcode.get_bits(16..=19),
            rm,
        };
    }

    if opcode.get_bits(23..=24) == 0b01 {
        if opcode.get_bits(4..=7) == 0b0111 {
            let kind = match opcode.get_bits(20..=22) {
                0b010 => ExtendKind::Sxtb,
                0b011 => ExtendKind::Sxth,
                0b110 => ExtendKind::Uxtb,
                0b111 => ExtendKind::Uxth,
                _ => return Undefined,
            };
            return Extend {
                kind,
                rd,
                rn,
                rm,
                rotation: opcode.get_bits(10..=11) * 8,
            };
        }
        if opcode.get_bits(20..=22) == 0b011 && opcode.get_bits(4..=7) == 0b0011 {
            return Reverse {
                kind: ReverseKind::Rev,
                rd,
                rm,
            };
        }
        if opcode.get_bits(20..=22) == 0b011 && opcode.get_bits(4..=7) == 0b1011 {
            return Reverse {
                kind: ReverseKind::Rev16,
                rd,
                rm,
            };
        }
        if opcode.get_bits(20..=22) == 0b111 && opcode.get_bits(4..=7) == 0b0011 {
            if !config.features.has(ArmFeature::Thumb2) {
                return Undefined;
            }
            return Reverse {
                kind: ReverseKind::Rbit,
                rd,
                rm,
            };
        }
        if opcode.get_bits(20..=22) == 0b111 && opcode.get_bits(4..=7) == 0b1011 {
            return Reverse {
                kind: ReverseKind::Revsh,
                rd,
                rm,
            };
        }
        return Undefined;
    }

    // Bitfield space (v6T2).
    if !config.features.has(ArmFeature::Thumb2) {
        return Undefined;
    }
    let lsb = opcode.get_bits(7..=11);
    match (opcode.get_bits(21..=24), opcode.get_bits(4..=6)) {
        (0b1101, 0b010) => BitField {
            kind: BitFieldKind::Sbfx,
            rd,
            rn: rm,
            lsb,
            msb_or_width: opcode.get_bits(16..=20),
        },
        (0b1111, 0b010) => BitField {
            kind: BitFieldKind::Ubfx,
            rd,
            rn: rm,
            lsb,
            msb_or_width: opcode.get_bits(16..=20),
        },
        (0b1110, 0b000) => {
            if rm == 0xF {
                BitField {
                    kind: BitFieldKind::Bfc,
                    rd,
                    rn: 0xF,
                    lsb,
                    msb_or_width: opcode.get_bits(16..=20),
                }
            } else {
                BitField {
                    kind: BitFieldKind::Bfi,
                    rd,
                    rn: rm,
                    lsb,
                    msb_or_width: opcode.get_bits(16..=20),
                }
            }
        }
        _ => Undefined,
    }
}

impl ArmInstruction {
    /// A terse textual rendering for the execution trace.
    #[must_use]
    pub(crate) fn disassembler(&self, condition: Condition) -> String {
        match self {
            Self::DataProcessing {
                alu_instruction,
                set_conditions,
                rn,
                destination,
                op2,
            } => {
                let s = if *set_conditions { "S" } else { "" };
                match alu_instruction {
                    ArmAluOp::Tst | ArmAluOp::Teq | ArmAluOp::Cmp | ArmAluOp::Cmn => {
                        format!("{alu_instruction}{condition} R{rn}, {op2}")
                    }
                    ArmAluOp::Mov | ArmAluOp::Mvn => {
                        format!("{alu_instruction}{condition}{s} R{destination}, {op2}")
                    }
                    _ => format!("{alu_instruction}{condition}{s} R{destination}, R{rn}, {op2}"),
                }
            }
            Self::Multiply { variant, rd, rn, rs, rm, set_conditions } => {
                let s = if *set_conditions { "S" } else { "" };
                match variant {
                    MultiplyVariant::Mul => format!("MUL{condition}{s} R{rd}, R{rm}, R{rs}"),
                    MultiplyVariant::Mla => {
                        format!("MLA{condition}{s} R{rd}, R{rm}, R{rs}, R{rn}")
                    }
                    MultiplyVariant::Mls => {
                        format!("MLS{condition} R{rd}, R{rm}, R{rs}, R{rn}")
                    }
                }
            }
            Self::MultiplyLong { variant, rdhi, rdlo, rs, rm, set_conditions } => {
                let s = if *set_conditions { "S" } else { "" };
                format!("{variant:?}{condition}{s} R{rdlo}, R{rdhi}, R{rm}, R{rs}").to_uppercase()
            }
            Self::HalfwordMultiply { variant, rd, rn, rs, rm, x, y } => {
                let xs = if *x { "T" } else { "B" };
                let ys = if *y { "T" } else { "B" };
                match variant {
                    HalfwordMultiplyVariant::Smla => {
                        format!("SMLA{xs}{ys}{condition} R{rd}, R{rm}, R{rs}, R{rn}")
                    }
                    HalfwordMultiplyVariant::Smlaw => {
                        format!("SMLAW{ys}{condition} R{rd}, R{rm}, R{rs}, R{rn}")
                    }
                    HalfwordMultiplyVariant::Smulw => {
                        format!("SMULW{ys}{condition} R{rd}, R{rm}, R{rs}")
                    }
                    HalfwordMultiplyVariant::Smlal => {
                        format!("SMLAL{xs}{ys}{condition} R{rn}, R{rd}, R{rm}, R{rs}")
                    }
                    HalfwordMultiplyVariant::Smul => {
                        format!("SMUL{xs}{ys}{condition} R{rd}, R{rm}, R{rs}")
                    }
                }
            }
            Self::Saturating { variant, rd, rn, rm } => {
                format!("{variant:?}{condition} R{rd}, R{rm}, R{rn}").to_uppercase()
            }
            Self::CountLeadingZeros { rd, rm } => format!("CLZ{condition} R{rd}, R{rm}"),
            Self::PsrTransfer { psr, kind } => match kind {
                PsrOpKind::Mrs { destination } => {
                    format!("MRS{condition} R{destination}, {psr}")
                }
                PsrOpKind::Msr { fields, source } => {
                    format!("MSR{condition} {psr}_{fields:04b}, R{source}")
                }
                PsrOpKind::MsrImmediate { fields, base, shift } => {
                    format!("MSR{condition} {psr}_{fields:04b}, #{}", base.rotate_right(*shift))
                }
            },
            Self::BranchAndExchange { register } => format!("BX{condition} R{register}"),
            Self::BranchLinkExchangeRegister { register } => format!("BLX{condition} R{register}"),
            Self::BranchAndExchangeJazelle { register } => format!("BXJ{condition} R{register}"),
            Self::Branch { link, offset } => {
                let l = if *link { "L" } else { "" };
                format!("B{l}{condition} #{offset}")
            }
            Self::BranchLinkExchangeImmediate { offset } => format!("BLX #{offset}"),
            Self::SingleDataTransfer {
                kind,
                quantity,
                translation,
                rd,
                base_register,
                offset_info,
                ..
            } => {
                let b = match quantity {
                    ReadWriteKind::Word => "",
                    ReadWriteKind::Byte => "B",
                };
                let t = if *translation { "T" } else { "" };
                format!("{kind}{condition}{b}{t} R{rd}, [R{base_register}, {offset_info}]")
            }
            Self::HalfwordDataTransfer { kind, transfer, rd, base_register, .. } => {
                format!("{kind}{condition}{transfer} R{rd}, [R{base_register}, ...]")
            }
            Self::DoublewordDataTransfer { kind, rd, base_register, .. } => {
                format!("{kind}{condition}D R{rd}, [R{base_register}, ...]")
            }
            Self::BlockDataTransfer {
                kind,
                indexing,
                offsetting,
                load_psr,
                write_back,
                rn,
                register_list,
            } => {
                let op = match kind {
                    LoadStoreKind::Load => "LDM",
                    LoadStoreKind::Store => "STM",
                };
                let dir = match offsetting {
                    Offsetting::Up => "I",
                    Offsetting::Down => "D",
                };
                let when = match indexing {
                    Indexing::Pre => "B",
                    Indexing::Post => "A",
                };
                let mut registers = String::new();
                for i in 0..16u8 {
                    if register_list.get_bit(i) {
                        registers.push_str(&format!("R{i}, "));
                    }
                }
                let w = if *write_back { "!" } else { "" };
                let s = if *load_psr { "^" } else { "" };
                format!("{op}{condition}{dir}{when} R{rn}{w}, {{{registers}}}{s}")
            }
            Self::SingleDataSwap { byte, rd, rm, rn } => {
                let b = if *byte { "B" } else { "" };
                format!("SWP{condition}{b} R{rd}, R{rm}, [R{rn}]")
            }
            Self::Exclusive { variant, rd, rm, rn } => {
                format!("{variant:?}{condition} R{rd}, R{rm}, [R{rn}]").to_uppercase()
            }
            Self::ReturnFromException { rn, .. } => format!("RFE R{rn}"),
            Self::SaveReturnState { mode, .. } => format!("SRS #{mode}"),
            Self::MoveHalfword { top, rd, immediate } => {
                let op = if *top { "MOVT" } else { "MOVW" };
                format!("{op}{condition} R{rd}, #{immediate}")
            }
            Self::ParallelAddSub { class, op, rd, rn, rm } => {
                format!("{class:?}{op:?}{condition} R{rd}, R{rn}, R{rm}").to_uppercase()
            }
            Self::Extend { kind, rd, rn, rm, rotation } => {
                if *rn == 0xF {
                    format!("{kind:?}{condition} R{rd}, R{rm}, ROR #{rotation}").to_uppercase()
                } else {
                    format!("{kind:?}A{condition} R{rd}, R{rn}, R{rm}").to_uppercase()
                }
            }
            Self::Reverse { kind, rd, rm } => {
                format!("{kind:?}{condition} R{rd}, R{rm}").to_uppercase()
            }
            Self::BitField { kind, rd, rn, lsb, msb_or_width } => {
                format!("{kind:?}{condition} R{rd}, R{rn}, #{lsb}, #{msb_or_width}").to_uppercase()
            }
            Self::SetEndianness { big } => {
                format!("SETEND {}", if *big { "BE" } else { "LE" })
            }
            Self::ChangeProcessorState { .. } => "CPS".to_string(),
            Self::ExceptionReturn => format!("ERET{condition}"),
            Self::SoftwareInterrupt { comment } => format!("SWI{condition} #{comment}"),
            Self::Breakpoint { comment } => format!("BKPT #{comment}"),
            Self::ClearExclusive => "CLREX".to_string(),
            Self::CoprocessorDataTransfer { kind, coprocessor, crd, .. } => {
                let op = match kind {
                    LoadStoreKind::Load => "LDC",
                    LoadStoreKind::Store => "STC",
                };
                format!("{op}{condition} p{coprocessor}, c{crd}, ...")
            }
            Self::CoprocessorDataOperation { coprocessor } => {
                format!("CDP{condition} p{coprocessor}, ...")
            }
            Self::CoprocessorRegisterTransfer { kind, coprocessor, rd } => {
                let op = match kind {
                    LoadStoreKind::Load => "MRC",
                    LoadStoreKind::Store => "MCR",
                };
                format!("{op}{condition} p{coprocessor}, R{rd}, ...")
            }
            Self::CoprocessorDoubleRegisterTransfer { kind, coprocessor, rd, rn } => {
                let op = match kind {
                    LoadStoreKind::Load => "MRRC",
                    LoadStoreKind::Store => "MCRR",
                };
                format!("{op}{condition} p{coprocessor}, R{rd}, R{rn}, ...")
            }
            Self::Nop => "NOP".to_string(),
            Self::Undefined => "UDF".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn v5te() -> ArmConfig {
        let mut config = ArmConfig::new(ArmVersion::V5);
        config.features = crate::config::Features::of(&[
            ArmFeature::Arm32,
            ArmFeature::Thumb,
            ArmFeature::Mull,
            ArmFeature::EnhDsp,
            ArmFeature::DspPair,
            ArmFeature::Swp,
        ]);
        config
    }

    fn v7() -> ArmConfig {
        let mut config = v5te();
        config.version = ArmVersion::V7;
        config.features.insert(ArmFeature::Thumb2);
        config
    }

    #[test]
    fn decodes_branch() {
        let opcode = ArmOpcode::decode(0b1110_1010_0000_0000_0000_0000_0000_1111, &v5te());
        assert_eq!(opcode.condition, Condition::AL);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::Branch {
                link: false,
                offset: 15 << 2
            }
        );

        let opcode = ArmOpcode::decode(0b1110_1011_1111_1111_1111_1111_1111_0111, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::Branch {
                link: true,
                offset: -36
            }
        );
    }

    #[test]
    fn decodes_bx_family() {
        let config = v5te();
        assert_eq!(
            ArmOpcode::decode(0xE12F_FF11, &config).instruction,
            ArmInstruction::BranchAndExchange { register: 1 }
        );
        assert_eq!(
            ArmOpcode::decode(0xE12F_FF31, &config).instruction,
            ArmInstruction::BranchLinkExchangeRegister { register: 1 }
        );
        // BXJ needs Jazelle.
        assert_eq!(
            ArmOpcode::decode(0xE12F_FF21, &config).instruction,
            ArmInstruction::Undefined
        );
        let mut config = config;
        config.features.insert(ArmFeature::Jazelle);
        assert_eq!(
            ArmOpcode::decode(0xE12F_FF21, &config).instruction,
            ArmInstruction::BranchAndExchangeJazelle { register: 1 }
        );
    }

    #[test]
    fn decodes_data_processing_immediate() {
        // ADD R1, R2, #0xFF000000 (0xFF ror 8)
        let opcode = ArmOpcode::decode(0xE282_14FF, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::DataProcessing {
                alu_instruction: ArmAluOp::Add,
                set_conditions: false,
                rn: 2,
                destination: 1,
                op2: AluSecondOperandInfo::Immediate { base: 0xFF, shift: 8 },
            }
        );
    }

    #[test]
    fn compare_without_s_is_not_data_processing() {
        // The 0x010F0000 pattern is MRS R0, CPSR.
        let opcode = ArmOpcode::decode(0xE10F_0000, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::PsrTransfer {
                psr: PsrKind::Cpsr,
                kind: PsrOpKind::Mrs { destination: 0 },
            }
        );
    }

    #[test]
    fn decodes_msr_register_with_field_mask() {
        // MSR CPSR_fc, R3
        let opcode = ArmOpcode::decode(0xE129_F003, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::PsrTransfer {
                psr: PsrKind::Cpsr,
                kind: PsrOpKind::Msr {
                    fields: 0b1001,
                    source: 3
                },
            }
        );
    }

    #[test]
    fn decodes_multiplies() {
        // MUL R4, R2, R1
        let opcode = ArmOpcode::decode(0xE004_0192, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::Multiply {
                variant: MultiplyVariant::Mul,
                set_conditions: false,
                rd: 4,
                rn: 0,
                rs: 1,
                rm: 2,
            }
        );

        // UMULL R0, R1, R2, R3
        let opcode = ArmOpcode::decode(0xE081_0392, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::MultiplyLong {
                variant: MultiplyLongVariant::Umull,
                set_conditions: false,
                rdhi: 1,
                rdlo: 0,
                rs: 3,
                rm: 2,
            }
        );
    }

    #[test]
    fn decodes_smlabt() {
        // SMLABT R0, R1, R2, R3: 00010000 0000 0011 0010 1100 0001
        let opcode = ArmOpcode::decode(0xE100_32C1, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::HalfwordMultiply {
                variant: HalfwordMultiplyVariant::Smla,
                rd: 0,
                rn: 3,
                rs: 2,
                rm: 1,
                x: false,
                y: true,
            }
        );
    }

    #[test]
    fn decodes_ldr_str() {
        // LDR R1, [R0, #4]
        let opcode = ArmOpcode::decode(0xE590_1004, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::SingleDataTransfer {
                kind: LoadStoreKind::Load,
                quantity: ReadWriteKind::Word,
                translation: false,
                write_back: false,
                indexing: Indexing::Pre,
                offsetting: Offsetting::Up,
                rd: 1,
                base_register: 0,
                offset_info: SingleDataTransferOffsetInfo::Immediate { offset: 4 },
            }
        );

        // LDRBT R1, [R0], #1
        let opcode = ArmOpcode::decode(0xE4F0_1001, &v5te());
        match opcode.instruction {
            ArmInstruction::SingleDataTransfer {
                translation,
                quantity,
                ..
            } => {
                assert!(translation);
                assert_eq!(quantity, ReadWriteKind::Byte);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn decodes_ldrd_strd_only_with_pairs() {
        // LDRD R2, [R0, #8]
        let raw = 0xE1C0_20D8;
        let opcode = ArmOpcode::decode(raw, &v5te());
        assert_eq!(
            opcode.instruction,
            ArmInstruction::DoublewordDataTransfer {
                kind: LoadStoreKind::Load,
                write_back: false,
                indexing: Indexing::Pre,
                offsetting: Offsetting::Up,
                rd: 2,
                base_register: 0,
                offset: HalfwordOffsetKind::Immediate { offset: 8 },
            }
        );

        let mut config = v5te();
        config.features = crate::config::Features::of(&[ArmFeature::Arm32]);
        assert_eq!(
            ArmOpcode::decode(raw, &config).instruction,
            ArmInstruction::Undefined
        );
    }

    #[test]
    fn decodes_exclusives_from_v6() {
        let mut config = v7();
        // LDREX R1, [R0]
        let raw = 0xE190_1F9F;
        assert_eq!(
            ArmOpcode::decode(raw, &config).instruction,
            ArmInstruction::Exclusive {
                variant: ExclusiveVariant::Ldrex,
                rd: 1,
                rm: 0xF,
                rn: 0,
            }
        );
        config.version = ArmVersion::V5;
        assert_eq!(
            ArmOpcode::decode(raw, &config).instruction,
            ArmInstruction::Undefined
        );
    }

    #[test]
    fn decodes_blx_immediate_in_nv_space() {
        let config = v5te();
        // BLX with H=1: offset | 2.
        let opcode = ArmOpcode::decode(0xFB00_0001, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::BranchLinkExchangeImmediate { offset: (1 << 2) | 2 }
        );
    }

    #[test]
    fn nv_is_plain_condition_before_v5() {
        let mut config = v5te();
        config.version = ArmVersion::V4;
        // In the v4 view this is just a never-executed branch.
        let opcode = ArmOpcode::decode(0xFA00_0001, &config);
        assert_eq!(opcode.condition, Condition::NV);
        assert!(matches!(opcode.instruction, ArmInstruction::Branch { .. }));
    }

    #[test]
    fn decodes_movw_movt() {
        let config = v7();
        // MOVW R0, #0x1234
        let opcode = ArmOpcode::decode(0xE301_0234, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::MoveHalfword {
                top: false,
                rd: 0,
                immediate: 0x1234
            }
        );
        // MOVT R0, #0xFFFF
        let opcode = ArmOpcode::decode(0xE34F_0FFF, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::MoveHalfword {
                top: true,
                rd: 0,
                immediate: 0xFFFF
            }
        );
    }

    #[test]
    fn decodes_parallel_and_extend() {
        let config = v7();
        // UADD8 R1, R2, R3
        let opcode = ArmOpcode::decode(0xE652_1F93, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::ParallelAddSub {
                class: ParallelClass::Unsigned,
                op: ParallelOp::Add8,
                rd: 1,
                rn: 2,
                rm: 3,
            }
        );

        // UXTB R1, R2
        let opcode = ArmOpcode::decode(0xE6EF_1072, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::Extend {
                kind: ExtendKind::Uxtb,
                rd: 1,
                rn: 0xF,
                rm: 2,
                rotation: 0,
            }
        );
    }

    #[test]
    fn decodes_swi_and_bkpt() {
        let config = v5te();
        assert_eq!(
            ArmOpcode::decode(0xEF00_0042, &config).instruction,
            ArmInstruction::SoftwareInterrupt { comment: 0x42 }
        );
        assert_eq!(
            ArmOpcode::decode(0xE120_0070, &config).instruction,
            ArmInstruction::Breakpoint { comment: 0 }
        );
    }

    #[test]
    fn decodes_coprocessor_space() {
        let config = v5te();
        // MRC p15, 0, R0, c1, c0, 0
        let opcode = ArmOpcode::decode(0xEE11_0F10, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::CoprocessorRegisterTransfer {
                kind: LoadStoreKind::Load,
                coprocessor: 15,
                rd: 0,
            }
        );
        // CDP p10
        let opcode = ArmOpcode::decode(0xEE00_0A00, &config);
        assert_eq!(
            opcode.instruction,
            ArmInstruction::CoprocessorDataOperation { coprocessor: 10 }
        );
    }
}
