//! The CIL opcodes the weaver reads and emits, with their encodings and static properties.
//!
//! Every opcode knows its byte encoding (two-byte opcodes carry the `0xFE` prefix in their
//! high byte), the kind of operand that follows it, how it affects control flow and, where it
//! does not depend on the operand, its stack effect. Opcodes whose stack effect depends on a
//! call signature or on the enclosing method are resolved by
//! [`crate::assembly::Instruction::stack_behavior`].

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::assembly::instruction::{FlowType, InstructionCategory, OperandType};

/// Prefix byte of two-byte opcodes.
pub const PREFIX_FE: u8 = 0xFE;

/// A CIL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
#[allow(missing_docs)]
pub enum Opcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg.0")]
    Ldarg0,
    #[strum(serialize = "ldarg.1")]
    Ldarg1,
    #[strum(serialize = "ldarg.2")]
    Ldarg2,
    #[strum(serialize = "ldarg.3")]
    Ldarg3,
    #[strum(serialize = "ldloc.0")]
    Ldloc0,
    #[strum(serialize = "ldloc.1")]
    Ldloc1,
    #[strum(serialize = "ldloc.2")]
    Ldloc2,
    #[strum(serialize = "ldloc.3")]
    Ldloc3,
    #[strum(serialize = "stloc.0")]
    Stloc0,
    #[strum(serialize = "stloc.1")]
    Stloc1,
    #[strum(serialize = "stloc.2")]
    Stloc2,
    #[strum(serialize = "stloc.3")]
    Stloc3,
    #[strum(serialize = "ldarg.s")]
    LdargS,
    #[strum(serialize = "ldarga.s")]
    LdargaS,
    #[strum(serialize = "starg.s")]
    StargS,
    #[strum(serialize = "ldloc.s")]
    LdlocS,
    #[strum(serialize = "ldloca.s")]
    LdlocaS,
    #[strum(serialize = "stloc.s")]
    StlocS,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(serialize = "ldc.i4.0")]
    LdcI4_0,
    #[strum(serialize = "ldc.i4.1")]
    LdcI4_1,
    #[strum(serialize = "ldc.i4.2")]
    LdcI4_2,
    #[strum(serialize = "ldc.i4.3")]
    LdcI4_3,
    #[strum(serialize = "ldc.i4.4")]
    LdcI4_4,
    #[strum(serialize = "ldc.i4.5")]
    LdcI4_5,
    #[strum(serialize = "ldc.i4.6")]
    LdcI4_6,
    #[strum(serialize = "ldc.i4.7")]
    LdcI4_7,
    #[strum(serialize = "ldc.i4.8")]
    LdcI4_8,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "jmp")]
    Jmp,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br.s")]
    BrS,
    #[strum(serialize = "brfalse.s")]
    BrfalseS,
    #[strum(serialize = "brtrue.s")]
    BrtrueS,
    #[strum(serialize = "beq.s")]
    BeqS,
    #[strum(serialize = "bge.s")]
    BgeS,
    #[strum(serialize = "bgt.s")]
    BgtS,
    #[strum(serialize = "ble.s")]
    BleS,
    #[strum(serialize = "blt.s")]
    BltS,
    #[strum(serialize = "bne.un.s")]
    BneUnS,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "ldobj")]
    Ldobj,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "stobj")]
    Stobj,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef,
    #[strum(serialize = "stelem.ref")]
    StelemRef,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "leave.s")]
    LeaveS,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "tail.")]
    Tail,
    #[strum(serialize = "initobj")]
    Initobj,
    #[strum(serialize = "rethrow")]
    Rethrow,
}

impl Opcode {
    /// The mnemonic as written in IL assembly.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// The encoding; two-byte opcodes carry [`PREFIX_FE`] in the high byte.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Opcode::Nop => 0x00,
            Opcode::Ldarg0 => 0x02,
            Opcode::Ldarg1 => 0x03,
            Opcode::Ldarg2 => 0x04,
            Opcode::Ldarg3 => 0x05,
            Opcode::Ldloc0 => 0x06,
            Opcode::Ldloc1 => 0x07,
            Opcode::Ldloc2 => 0x08,
            Opcode::Ldloc3 => 0x09,
            Opcode::Stloc0 => 0x0A,
            Opcode::Stloc1 => 0x0B,
            Opcode::Stloc2 => 0x0C,
            Opcode::Stloc3 => 0x0D,
            Opcode::LdargS => 0x0E,
            Opcode::LdargaS => 0x0F,
            Opcode::StargS => 0x10,
            Opcode::LdlocS => 0x11,
            Opcode::LdlocaS => 0x12,
            Opcode::StlocS => 0x13,
            Opcode::Ldnull => 0x14,
            Opcode::LdcI4M1 => 0x15,
            Opcode::LdcI4_0 => 0x16,
            Opcode::LdcI4_1 => 0x17,
            Opcode::LdcI4_2 => 0x18,
            Opcode::LdcI4_3 => 0x19,
            Opcode::LdcI4_4 => 0x1A,
            Opcode::LdcI4_5 => 0x1B,
            Opcode::LdcI4_6 => 0x1C,
            Opcode::LdcI4_7 => 0x1D,
            Opcode::LdcI4_8 => 0x1E,
            Opcode::LdcI4S => 0x1F,
            Opcode::LdcI4 => 0x20,
            Opcode::LdcI8 => 0x21,
            Opcode::LdcR4 => 0x22,
            Opcode::LdcR8 => 0x23,
            Opcode::Dup => 0x25,
            Opcode::Pop => 0x26,
            Opcode::Jmp => 0x27,
            Opcode::Call => 0x28,
            Opcode::Ret => 0x2A,
            Opcode::BrS => 0x2B,
            Opcode::BrfalseS => 0x2C,
            Opcode::BrtrueS => 0x2D,
            Opcode::BeqS => 0x2E,
            Opcode::BgeS => 0x2F,
            Opcode::BgtS => 0x30,
            Opcode::BleS => 0x31,
            Opcode::BltS => 0x32,
            Opcode::BneUnS => 0x33,
            Opcode::Br => 0x38,
            Opcode::Brfalse => 0x39,
            Opcode::Brtrue => 0x3A,
            Opcode::Beq => 0x3B,
            Opcode::Bge => 0x3C,
            Opcode::Bgt => 0x3D,
            Opcode::Ble => 0x3E,
            Opcode::Blt => 0x3F,
            Opcode::BneUn => 0x40,
            Opcode::Switch => 0x45,
            Opcode::Add => 0x58,
            Opcode::Sub => 0x59,
            Opcode::Mul => 0x5A,
            Opcode::Div => 0x5B,
            Opcode::Rem => 0x5D,
            Opcode::And => 0x5F,
            Opcode::Or => 0x60,
            Opcode::Xor => 0x61,
            Opcode::Neg => 0x65,
            Opcode::Not => 0x66,
            Opcode::ConvI4 => 0x69,
            Opcode::ConvI8 => 0x6A,
            Opcode::ConvR8 => 0x6C,
            Opcode::Callvirt => 0x6F,
            Opcode::Ldobj => 0x71,
            Opcode::Ldstr => 0x72,
            Opcode::Newobj => 0x73,
            Opcode::Castclass => 0x74,
            Opcode::Isinst => 0x75,
            Opcode::Throw => 0x7A,
            Opcode::Stobj => 0x81,
            Opcode::Box => 0x8C,
            Opcode::Newarr => 0x8D,
            Opcode::Ldlen => 0x8E,
            Opcode::LdelemRef => 0x9A,
            Opcode::StelemRef => 0xA2,
            Opcode::UnboxAny => 0xA5,
            Opcode::Ldtoken => 0xD0,
            Opcode::Endfinally => 0xDC,
            Opcode::Leave => 0xDD,
            Opcode::LeaveS => 0xDE,
            Opcode::Ceq => 0xFE01,
            Opcode::Cgt => 0xFE02,
            Opcode::Clt => 0xFE04,
            Opcode::Ldarg => 0xFE09,
            Opcode::Ldarga => 0xFE0A,
            Opcode::Starg => 0xFE0B,
            Opcode::Ldloc => 0xFE0C,
            Opcode::Ldloca => 0xFE0D,
            Opcode::Stloc => 0xFE0E,
            Opcode::Tail => 0xFE14,
            Opcode::Initobj => 0xFE15,
            Opcode::Rethrow => 0xFE1A,
        }
    }

    /// Looks an opcode up by its encoding.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Opcode> {
        Opcode::iter().find(|opcode| opcode.code() == code)
    }

    /// Size of the opcode itself in bytes, 1 or 2.
    #[must_use]
    pub fn size(self) -> usize {
        if self.code() > 0xFF {
            2
        } else {
            1
        }
    }

    /// The operand that follows the opcode in the byte stream.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        match self {
            Opcode::LdargS
            | Opcode::LdargaS
            | Opcode::StargS
            | Opcode::LdlocS
            | Opcode::LdlocaS
            | Opcode::StlocS => OperandType::UInt8,
            Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Starg
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Stloc => OperandType::UInt16,
            Opcode::LdcI4S
            | Opcode::BrS
            | Opcode::BrfalseS
            | Opcode::BrtrueS
            | Opcode::BeqS
            | Opcode::BgeS
            | Opcode::BgtS
            | Opcode::BleS
            | Opcode::BltS
            | Opcode::BneUnS
            | Opcode::LeaveS => OperandType::Int8,
            Opcode::LdcI4
            | Opcode::Br
            | Opcode::Brfalse
            | Opcode::Brtrue
            | Opcode::Beq
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt
            | Opcode::BneUn
            | Opcode::Leave => OperandType::Int32,
            Opcode::LdcI8 => OperandType::Int64,
            Opcode::LdcR4 => OperandType::Float32,
            Opcode::LdcR8 => OperandType::Float64,
            Opcode::Jmp
            | Opcode::Call
            | Opcode::Callvirt
            | Opcode::Newobj
            | Opcode::Ldobj
            | Opcode::Stobj
            | Opcode::Ldstr
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Box
            | Opcode::Newarr
            | Opcode::UnboxAny
            | Opcode::Ldtoken
            | Opcode::Initobj => OperandType::Token,
            Opcode::Switch => OperandType::Switch,
            _ => OperandType::None,
        }
    }

    /// How the opcode affects control flow.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            Opcode::Br | Opcode::BrS => FlowType::UnconditionalBranch,
            Opcode::Brfalse
            | Opcode::BrfalseS
            | Opcode::Brtrue
            | Opcode::BrtrueS
            | Opcode::Beq
            | Opcode::BeqS
            | Opcode::Bge
            | Opcode::BgeS
            | Opcode::Bgt
            | Opcode::BgtS
            | Opcode::Ble
            | Opcode::BleS
            | Opcode::Blt
            | Opcode::BltS
            | Opcode::BneUn
            | Opcode::BneUnS => FlowType::ConditionalBranch,
            Opcode::Leave | Opcode::LeaveS => FlowType::Leave,
            Opcode::Switch => FlowType::Switch,
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj | Opcode::Jmp => FlowType::Call,
            Opcode::Ret => FlowType::Return,
            Opcode::Throw | Opcode::Rethrow => FlowType::Throw,
            Opcode::Endfinally => FlowType::EndFinally,
            _ => FlowType::Sequential,
        }
    }

    /// Functional grouping of the opcode.
    #[must_use]
    pub fn category(self) -> InstructionCategory {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Neg => InstructionCategory::Arithmetic,
            Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Not => {
                InstructionCategory::BitwiseLogical
            }
            Opcode::Ceq | Opcode::Cgt | Opcode::Clt => InstructionCategory::Comparison,
            Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvR8
            | Opcode::Box
            | Opcode::UnboxAny
            | Opcode::Castclass
            | Opcode::Isinst => InstructionCategory::Conversion,
            Opcode::Newobj
            | Opcode::Newarr
            | Opcode::Ldlen
            | Opcode::LdelemRef
            | Opcode::StelemRef
            | Opcode::Ldobj
            | Opcode::Stobj
            | Opcode::Initobj
            | Opcode::Ldtoken
            | Opcode::Ldstr => InstructionCategory::ObjectModel,
            Opcode::Tail => InstructionCategory::Prefix,
            Opcode::Nop | Opcode::Dup | Opcode::Pop => InstructionCategory::Misc,
            other => match other.flow_type() {
                FlowType::Sequential => InstructionCategory::LoadStore,
                _ => InstructionCategory::ControlFlow,
            },
        }
    }

    /// The 1-byte-offset form of a long branch.
    #[must_use]
    pub fn short_form(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Br => Opcode::BrS,
            Opcode::Brfalse => Opcode::BrfalseS,
            Opcode::Brtrue => Opcode::BrtrueS,
            Opcode::Beq => Opcode::BeqS,
            Opcode::Bge => Opcode::BgeS,
            Opcode::Bgt => Opcode::BgtS,
            Opcode::Ble => Opcode::BleS,
            Opcode::Blt => Opcode::BltS,
            Opcode::BneUn => Opcode::BneUnS,
            Opcode::Leave => Opcode::LeaveS,
            _ => return None,
        })
    }

    /// The 4-byte-offset form of a short branch, or the opcode itself.
    #[must_use]
    pub fn long_form(self) -> Opcode {
        match self {
            Opcode::BrS => Opcode::Br,
            Opcode::BrfalseS => Opcode::Brfalse,
            Opcode::BrtrueS => Opcode::Brtrue,
            Opcode::BeqS => Opcode::Beq,
            Opcode::BgeS => Opcode::Bge,
            Opcode::BgtS => Opcode::Bgt,
            Opcode::BleS => Opcode::Ble,
            Opcode::BltS => Opcode::Blt,
            Opcode::BneUnS => Opcode::BneUn,
            Opcode::LeaveS => Opcode::Leave,
            other => other,
        }
    }

    /// Stack effect as `(pops, pushes)` for opcodes whose effect does not depend on the
    /// operand or on the enclosing method
    #[must_use]
    pub fn fixed_stack_effect(self) -> Option<(u8, u8)> {
        Some(match self {
            Opcode::Nop
            | Opcode::Br
            | Opcode::BrS
            | Opcode::Leave
            | Opcode::LeaveS
            | Opcode::Endfinally
            | Opcode::Rethrow
            | Opcode::Tail
            | Opcode::Jmp => (0, 0),
            Opcode::Ldarg0
            | Opcode::Ldarg1
            | Opcode::Ldarg2
            | Opcode::Ldarg3
            | Opcode::Ldloc0
            | Opcode::Ldloc1
            | Opcode::Ldloc2
            | Opcode::Ldloc3
            | Opcode::LdargS
            | Opcode::LdargaS
            | Opcode::LdlocS
            | Opcode::LdlocaS
            | Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Ldnull
            | Opcode::LdcI4M1
            | Opcode::LdcI4_0
            | Opcode::LdcI4_1
            | Opcode::LdcI4_2
            | Opcode::LdcI4_3
            | Opcode::LdcI4_4
            | Opcode::LdcI4_5
            | Opcode::LdcI4_6
            | Opcode::LdcI4_7
            | Opcode::LdcI4_8
            | Opcode::LdcI4S
            | Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR4
            | Opcode::LdcR8
            | Opcode::Ldstr
            | Opcode::Ldtoken => (0, 1),
            Opcode::Stloc0
            | Opcode::Stloc1
            | Opcode::Stloc2
            | Opcode::Stloc3
            | Opcode::StlocS
            | Opcode::Stloc
            | Opcode::StargS
            | Opcode::Starg
            | Opcode::Pop
            | Opcode::Brfalse
            | Opcode::BrfalseS
            | Opcode::Brtrue
            | Opcode::BrtrueS
            | Opcode::Switch
            | Opcode::Throw
            | Opcode::Initobj => (1, 0),
            Opcode::Dup => (1, 2),
            Opcode::Beq
            | Opcode::BeqS
            | Opcode::Bge
            | Opcode::BgeS
            | Opcode::Bgt
            | Opcode::BgtS
            | Opcode::Ble
            | Opcode::BleS
            | Opcode::Blt
            | Opcode::BltS
            | Opcode::BneUn
            | Opcode::BneUnS
            | Opcode::Stobj => (2, 0),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Ceq
            | Opcode::Cgt
            | Opcode::Clt
            | Opcode::LdelemRef => (2, 1),
            Opcode::Neg
            | Opcode::Not
            | Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvR8
            | Opcode::Ldobj
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Box
            | Opcode::Newarr
            | Opcode::Ldlen
            | Opcode::UnboxAny => (1, 1),
            Opcode::StelemRef => (3, 0),
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj | Opcode::Ret => return None,
        })
    }
}
