//! Instruction-word decoding.
//!
//! A PICA vertex-shader instruction is a single 32-bit word with the opcode
//! in bits 26..32. The remaining bits are interpreted per opcode family:
//!
//! ```text
//! common:    [25:21] dest  [20:19] idx  [18:12] src1  [11:7] src2   [6:0] desc
//! inverted:  [25:21] dest  [20:19] idx  [18:14] src1  [13:7] src2   [6:0] desc
//! mad:       [28:24] dest  [23:22] idx  [21:17] src1  [16:10] src2  [9:5] src3  [4:0] desc
//! madi:      [28:24] dest  [23:22] idx  [21:17] src1  [16:12] src2  [11:5] src3 [4:0] desc
//! flow:      [25] refx [24] refy [25:22] uniform id / [23:22] op
//!            [21:10] dest_offset  [7:0] num_instructions
//! cmp:       common fields plus [26:24] op_x  [23:21] op_y
//! ```

use std::fmt;

use super::opcode::{OpCode, OpFamily};
use super::registers::{DestRegister, SourceRegister};

fn bits(word: u32, lo: u32, len: u32) -> u32 {
    (word >> lo) & ((1 << len) - 1)
}

/// Condition combinator of the flow-control family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Or,
    And,
    JustX,
    JustY,
}

impl Combinator {
    fn from_raw(raw: u32) -> Self {
        match raw & 0x3 {
            0 => Combinator::Or,
            1 => Combinator::And,
            2 => Combinator::JustX,
            _ => Combinator::JustY,
        }
    }
}

/// Per-component comparison operator of `CMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Decode a 3-bit operator field; the two top encodings are reserved.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw & 0x7 {
            0 => Some(CompareOp::Eq),
            1 => Some(CompareOp::Ne),
            2 => Some(CompareOp::Lt),
            3 => Some(CompareOp::Le),
            4 => Some(CompareOp::Gt),
            5 => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }
}

/// A raw instruction word with typed field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    /// The raw 6-bit opcode field.
    pub fn raw_opcode(self) -> u8 {
        (self.0 >> 26) as u8
    }

    /// The effective opcode, with multi-slot encodings collapsed.
    pub fn opcode(self) -> OpCode {
        OpCode::from_raw(self.raw_opcode())
    }

    /// Fields of the common (two-source arithmetic) family.
    pub fn common(self) -> Common {
        Common(self.0)
    }

    /// Fields of the MAD family.
    pub fn mad(self) -> Mad {
        Mad(self.0)
    }

    /// Fields of the flow-control family.
    pub fn flow_control(self) -> FlowControl {
        FlowControl(self.0)
    }

    /// Comparison operators of `CMP`.
    pub fn compare(self) -> Compare {
        Compare(self.0)
    }
}

/// Field view for the common arithmetic family.
#[derive(Debug, Clone, Copy)]
pub struct Common(u32);

impl Common {
    pub fn operand_desc_id(self) -> u32 {
        bits(self.0, 0, 7)
    }

    /// Narrow src2 of the regular encodings.
    pub fn src2(self) -> SourceRegister {
        SourceRegister::from_narrow(bits(self.0, 7, 5))
    }

    /// Wide src2 of the inverted encodings (`DPHI`, `SGEI`, `SLTI`).
    pub fn src2_inverted(self) -> SourceRegister {
        SourceRegister::from_wide(bits(self.0, 7, 7))
    }

    /// Wide src1 of the regular encodings.
    pub fn src1(self) -> SourceRegister {
        SourceRegister::from_wide(bits(self.0, 12, 7))
    }

    /// Narrow src1 of the inverted encodings.
    pub fn src1_inverted(self) -> SourceRegister {
        SourceRegister::from_narrow(bits(self.0, 14, 5))
    }

    pub fn address_register_index(self) -> u32 {
        bits(self.0, 19, 2)
    }

    pub fn dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 21, 5))
    }
}

/// Field view for the MAD family.
#[derive(Debug, Clone, Copy)]
pub struct Mad(u32);

impl Mad {
    pub fn operand_desc_id(self) -> u32 {
        bits(self.0, 0, 5)
    }

    /// Narrow src3 of `MAD`.
    pub fn src3(self) -> SourceRegister {
        SourceRegister::from_narrow(bits(self.0, 5, 5))
    }

    /// Wide src3 of `MADI`.
    pub fn src3_inverted(self) -> SourceRegister {
        SourceRegister::from_wide(bits(self.0, 5, 7))
    }

    /// Wide src2 of `MAD`.
    pub fn src2(self) -> SourceRegister {
        SourceRegister::from_wide(bits(self.0, 10, 7))
    }

    /// Narrow src2 of `MADI`.
    pub fn src2_inverted(self) -> SourceRegister {
        SourceRegister::from_narrow(bits(self.0, 12, 5))
    }

    pub fn src1(self) -> SourceRegister {
        SourceRegister::from_narrow(bits(self.0, 17, 5))
    }

    pub fn address_register_index(self) -> u32 {
        bits(self.0, 22, 2)
    }

    pub fn dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 24, 5))
    }
}

/// Field view for the flow-control family.
#[derive(Debug, Clone, Copy)]
pub struct FlowControl(u32);

impl FlowControl {
    /// Length of an `IF` else-branch or a called region.
    pub fn num_instructions(self) -> u32 {
        bits(self.0, 0, 8)
    }

    /// Target instruction index.
    pub fn dest_offset(self) -> u32 {
        bits(self.0, 10, 12)
    }

    pub fn combinator(self) -> Combinator {
        Combinator::from_raw(bits(self.0, 22, 2))
    }

    pub fn bool_uniform_id(self) -> u32 {
        bits(self.0, 22, 4)
    }

    pub fn int_uniform_id(self) -> u32 {
        bits(self.0, 22, 4)
    }

    /// Expected truth value of the Y condition component.
    pub fn refy(self) -> bool {
        bits(self.0, 24, 1) != 0
    }

    /// Expected truth value of the X condition component.
    pub fn refx(self) -> bool {
        bits(self.0, 25, 1) != 0
    }
}

/// Comparison operators of `CMP`, alongside the common fields.
#[derive(Debug, Clone, Copy)]
pub struct Compare(u32);

impl Compare {
    pub fn op_y(self) -> Option<CompareOp> {
        CompareOp::from_raw(bits(self.0, 21, 3))
    }

    pub fn op_x(self) -> Option<CompareOp> {
        CompareOp::from_raw(bits(self.0, 24, 3))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        let mnemonic = op.mnemonic();
        match op.family() {
            OpFamily::Common => {
                let c = self.common();
                if binary_arith(op) {
                    write!(f, "{} {}, {}, {}", mnemonic, c.dest(), c.src1(), c.src2())
                } else {
                    write!(f, "{} {}, {}", mnemonic, c.dest(), c.src1())
                }
            }
            OpFamily::CommonInverted => {
                let c = self.common();
                write!(
                    f,
                    "{} {}, {}, {}",
                    mnemonic,
                    c.dest(),
                    c.src1_inverted(),
                    c.src2_inverted()
                )
            }
            OpFamily::Mad => {
                let m = self.mad();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    mnemonic,
                    m.dest(),
                    m.src1(),
                    m.src2(),
                    m.src3()
                )
            }
            OpFamily::MadInverted => {
                let m = self.mad();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    mnemonic,
                    m.dest(),
                    m.src1(),
                    m.src2_inverted(),
                    m.src3_inverted()
                )
            }
            OpFamily::Compare => {
                let c = self.common();
                let ops = self.compare();
                write!(
                    f,
                    "{} {}, {} ({}, {})",
                    mnemonic,
                    c.src1(),
                    c.src2(),
                    ops.op_x().map_or("??", CompareOp::name),
                    ops.op_y().map_or("??", CompareOp::name)
                )
            }
            OpFamily::FlowControl => {
                let fc = self.flow_control();
                match op {
                    OpCode::End => write!(f, "{}", mnemonic),
                    OpCode::Callu | OpCode::Ifu | OpCode::Jmpu => write!(
                        f,
                        "{} b{}, dest={}, num={}",
                        mnemonic,
                        fc.bool_uniform_id(),
                        fc.dest_offset(),
                        fc.num_instructions()
                    ),
                    OpCode::Loop => {
                        write!(f, "{} i{}, dest={}", mnemonic, fc.int_uniform_id(), fc.dest_offset())
                    }
                    OpCode::Call => write!(
                        f,
                        "{} dest={}, num={}",
                        mnemonic,
                        fc.dest_offset(),
                        fc.num_instructions()
                    ),
                    _ => write!(
                        f,
                        "{} ({:?}, refx={}, refy={}), dest={}, num={}",
                        mnemonic,
                        fc.combinator(),
                        u8::from(fc.refx()),
                        u8::from(fc.refy()),
                        fc.dest_offset(),
                        fc.num_instructions()
                    ),
                }
            }
            OpFamily::Trivial => write!(f, "{}", mnemonic),
            OpFamily::Unknown => write!(f, "{} (0x{:02x})", mnemonic, self.raw_opcode()),
        }
    }
}

fn binary_arith(op: OpCode) -> bool {
    use OpCode::*;
    matches!(op, Add | Dp3 | Dp4 | Dph | Mul | Sge | Slt | Max | Min)
}
