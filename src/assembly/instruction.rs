//! CIL instruction representation, operands and static instruction metadata.
//!
//! Instructions live in the arena of a [`crate::assembly::MethodBody`] and are addressed by
//! [`InstrId`]. Operands are symbolic: branch targets name other instructions by id, call
//! operands carry a [`MemberRef`], type operands a [`TypeSig`]. Nothing is resolved to byte
//! offsets or metadata tokens until [`crate::assembly::BodyEncoder`] lays the body out.
//!
//! # Key Components
//!
//! - [`Instruction`] - An opcode with its symbolic operand
//! - [`Operand`] - Type-safe operand representation
//! - [`Immediate`] - Immediate value types with conversions
//! - [`FlowType`] - Control flow behavior classification
//! - [`StackBehavior`] - Stack effect of one instruction

use std::fmt::{self, UpperHex};

use crate::{
    assembly::opcodes::Opcode,
    metadata::{module::MemberRef, typesig::TypeSig},
};

/// Stable identity of an instruction within one method body's arena.
///
/// Ids are never reused or renumbered: inserting, moving or replacing instructions keeps
/// every id that branch operands, exception regions and the emission cursor hold valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Index into the owning body's arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a local variable in a method body's local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u16);

/// Types of operands for CIL instructions, as encoded in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present.
    None,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Metadata token reference.
    Token,
    /// Switch table operand.
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type, `None` for the variable-size switch
    /// table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// An immediate value embedded in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value.
    Int8(i8),
    /// Signed 32-bit immediate value.
    Int32(i32),
    /// Signed 64-bit immediate value.
    Int64(i64),
    /// 32-bit floating point immediate value.
    Float32(f32),
    /// 64-bit floating point immediate value.
    Float64(f64),
}

impl UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value:02X}"),
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
            Immediate::Float32(value) => write!(f, "{:08X}", value.to_bits()),
            Immediate::Float64(value) => write!(f, "{:016X}", value.to_bits()),
        }
    }
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            // For signed integers, we preserve the bit pattern
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

/// A symbolic instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present.
    None,
    /// Immediate value (constant embedded in instruction).
    Immediate(Immediate),
    /// User string literal.
    String(String),
    /// Local variable.
    Local(LocalId),
    /// Argument slot (slot 0 is `this` on instance methods).
    Argument(u16),
    /// Type reference.
    Type(TypeSig),
    /// Method reference.
    Method(MemberRef),
    /// Branch target.
    Target(InstrId),
    /// Switch table.
    Switch(Vec<InstrId>),
}

impl Operand {
    /// Returns a formatted string representation of the operand, `None` for
    /// [`Operand::None`].
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Immediate(imm) => Some(format!("{imm:?}")),
            Operand::String(s) => Some(format!("{s:?}")),
            Operand::Local(l) => Some(format!("V_{}", l.0)),
            Operand::Argument(a) => Some(format!("A_{a}")),
            Operand::Type(t) => Some(t.full_name()),
            Operand::Method(m) => Some(m.full_name()),
            Operand::Target(t) => Some(format!("{t:?}")),
            Operand::Switch(targets) => Some(format!("switch({})", targets.len())),
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction.
    Sequential,
    /// Conditional branch to another location.
    ConditionalBranch,
    /// Always branches to another location (unconditional jump).
    UnconditionalBranch,
    /// Call to another method.
    Call,
    /// Returns from current method.
    Return,
    /// Multi-way branch (switch statement).
    Switch,
    /// Exception throwing.
    Throw,
    /// End of finally block.
    EndFinally,
    /// Leave protected region (try/catch/finally).
    Leave,
}

/// Stack effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack.
    pub pops: u8,
    /// Number of items pushed to stack.
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops).
    pub net_effect: i8,
}

impl StackBehavior {
    fn new(pops: u8, pushes: u8) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        StackBehavior {
            pops,
            pushes,
            net_effect: pushes as i8 - pops as i8,
        }
    }
}

/// Categorization of instructions by their primary function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCategory {
    /// Arithmetic operations (add, sub, mul, div, rem, neg).
    Arithmetic,
    /// Bitwise and logical operations (and, or, xor, not).
    BitwiseLogical,
    /// Comparison operations (ceq, cgt, clt).
    Comparison,
    /// Control flow operations (br, switch, ret, call).
    ControlFlow,
    /// Type conversion operations (conv.i4, box, unbox.any).
    Conversion,
    /// Load and store operations (ldloc, stloc, ldarg).
    LoadStore,
    /// Object model operations (newobj, newarr, ldtoken).
    ObjectModel,
    /// Prefix instructions (tail.).
    Prefix,
    /// Miscellaneous operations (nop, dup, pop).
    Misc,
}

/// An opcode together with its symbolic operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation.
    pub opcode: Opcode,
    /// The operand data for this instruction.
    pub operand: Operand,
}

impl Instruction {
    /// An instruction with an explicit operand.
    #[must_use]
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// An instruction without operand.
    #[must_use]
    pub fn simple(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Load argument slot `slot`, in its shortest encoding.
    #[must_use]
    pub fn load_arg(slot: u16) -> Self {
        match slot {
            0 => Self::simple(Opcode::Ldarg0),
            1 => Self::simple(Opcode::Ldarg1),
            2 => Self::simple(Opcode::Ldarg2),
            3 => Self::simple(Opcode::Ldarg3),
            s if s <= 0xFF => Self::new(Opcode::LdargS, Operand::Argument(s)),
            s => Self::new(Opcode::Ldarg, Operand::Argument(s)),
        }
    }

    /// Load the address of argument slot `slot`.
    #[must_use]
    pub fn load_arg_address(slot: u16) -> Self {
        if slot <= 0xFF {
            Self::new(Opcode::LdargaS, Operand::Argument(slot))
        } else {
            Self::new(Opcode::Ldarga, Operand::Argument(slot))
        }
    }

    /// Store into argument slot `slot`.
    #[must_use]
    pub fn store_arg(slot: u16) -> Self {
        if slot <= 0xFF {
            Self::new(Opcode::StargS, Operand::Argument(slot))
        } else {
            Self::new(Opcode::Starg, Operand::Argument(slot))
        }
    }

    /// Load local `local`, in its shortest encoding.
    #[must_use]
    pub fn load_local(local: LocalId) -> Self {
        match local.0 {
            0 => Self::simple(Opcode::Ldloc0),
            1 => Self::simple(Opcode::Ldloc1),
            2 => Self::simple(Opcode::Ldloc2),
            3 => Self::simple(Opcode::Ldloc3),
            l if l <= 0xFF => Self::new(Opcode::LdlocS, Operand::Local(local)),
            _ => Self::new(Opcode::Ldloc, Operand::Local(local)),
        }
    }

    /// Load the address of local `local`.
    #[must_use]
    pub fn load_local_address(local: LocalId) -> Self {
        if local.0 <= 0xFF {
            Self::new(Opcode::LdlocaS, Operand::Local(local))
        } else {
            Self::new(Opcode::Ldloca, Operand::Local(local))
        }
    }

    /// Store into local `local`, in its shortest encoding.
    #[must_use]
    pub fn store_local(local: LocalId) -> Self {
        match local.0 {
            0 => Self::simple(Opcode::Stloc0),
            1 => Self::simple(Opcode::Stloc1),
            2 => Self::simple(Opcode::Stloc2),
            3 => Self::simple(Opcode::Stloc3),
            l if l <= 0xFF => Self::new(Opcode::StlocS, Operand::Local(local)),
            _ => Self::new(Opcode::Stloc, Operand::Local(local)),
        }
    }

    /// Load a 32-bit constant, in its shortest encoding.
    #[must_use]
    pub fn load_i4(value: i32) -> Self {
        match value {
            -1 => Self::simple(Opcode::LdcI4M1),
            0 => Self::simple(Opcode::LdcI4_0),
            1 => Self::simple(Opcode::LdcI4_1),
            2 => Self::simple(Opcode::LdcI4_2),
            3 => Self::simple(Opcode::LdcI4_3),
            4 => Self::simple(Opcode::LdcI4_4),
            5 => Self::simple(Opcode::LdcI4_5),
            6 => Self::simple(Opcode::LdcI4_6),
            7 => Self::simple(Opcode::LdcI4_7),
            8 => Self::simple(Opcode::LdcI4_8),
            v => match i8::try_from(v) {
                Ok(short) => Self::new(Opcode::LdcI4S, Operand::Immediate(Immediate::Int8(short))),
                Err(_) => Self::new(Opcode::LdcI4, Operand::Immediate(Immediate::Int32(v))),
            },
        }
    }

    /// A branch to `target`.
    #[must_use]
    pub fn branch(opcode: Opcode, target: InstrId) -> Self {
        Self::new(opcode, Operand::Target(target))
    }

    /// A call, virtual call, constructor call or `ldtoken` on `member`.
    #[must_use]
    pub fn method(opcode: Opcode, member: MemberRef) -> Self {
        Self::new(opcode, Operand::Method(member))
    }

    /// An instruction taking a type operand.
    #[must_use]
    pub fn typed(opcode: Opcode, sig: TypeSig) -> Self {
        Self::new(opcode, Operand::Type(sig))
    }

    /// Human-readable mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// How this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Returns `true` for conditional and unconditional branches, `leave` and `switch`.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        ) || self.opcode == Opcode::Jmp
    }

    /// All instructions this instruction may transfer control to.
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// The argument slot a load instruction reads, by value or by address.
    #[must_use]
    pub fn loaded_argument(&self) -> Option<u16> {
        match (self.opcode, &self.operand) {
            (Opcode::Ldarg0, _) => Some(0),
            (Opcode::Ldarg1, _) => Some(1),
            (Opcode::Ldarg2, _) => Some(2),
            (Opcode::Ldarg3, _) => Some(3),
            (
                Opcode::LdargS | Opcode::Ldarg | Opcode::LdargaS | Opcode::Ldarga,
                Operand::Argument(slot),
            ) => Some(*slot),
            _ => None,
        }
    }

    /// The argument slot a store instruction writes.
    #[must_use]
    pub fn stored_argument(&self) -> Option<u16> {
        match (self.opcode, &self.operand) {
            (Opcode::StargS | Opcode::Starg, Operand::Argument(slot)) => Some(*slot),
            _ => None,
        }
    }

    /// The local a load, address load or store refers to.
    #[must_use]
    pub fn local(&self) -> Option<LocalId> {
        match (self.opcode, &self.operand) {
            (Opcode::Ldloc0 | Opcode::Stloc0, _) => Some(LocalId(0)),
            (Opcode::Ldloc1 | Opcode::Stloc1, _) => Some(LocalId(1)),
            (Opcode::Ldloc2 | Opcode::Stloc2, _) => Some(LocalId(2)),
            (Opcode::Ldloc3 | Opcode::Stloc3, _) => Some(LocalId(3)),
            (_, Operand::Local(local)) => Some(*local),
            _ => None,
        }
    }

    /// The constant pushed by the `ldc.i4` family.
    #[must_use]
    pub fn i4_constant(&self) -> Option<i32> {
        match self.opcode {
            Opcode::LdcI4M1 => Some(-1),
            Opcode::LdcI4_0 => Some(0),
            Opcode::LdcI4_1 => Some(1),
            Opcode::LdcI4_2 => Some(2),
            Opcode::LdcI4_3 => Some(3),
            Opcode::LdcI4_4 => Some(4),
            Opcode::LdcI4_5 => Some(5),
            Opcode::LdcI4_6 => Some(6),
            Opcode::LdcI4_7 => Some(7),
            Opcode::LdcI4_8 => Some(8),
            Opcode::LdcI4S | Opcode::LdcI4 => match self.operand {
                Operand::Immediate(Immediate::Int8(v)) => Some(i32::from(v)),
                Operand::Immediate(Immediate::Int32(v)) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Stack effect of this instruction.
    ///
    /// Calls derive their effect from the referenced signature; `ret` pops the return value
    /// when the enclosing method has one.
    #[must_use]
    pub fn stack_behavior(&self, returns_value: bool) -> StackBehavior {
        if let Some((pops, pushes)) = self.opcode.fixed_stack_effect() {
            return StackBehavior::new(pops, pushes);
        }

        match (self.opcode, &self.operand) {
            (Opcode::Ret, _) => StackBehavior::new(u8::from(returns_value), 0),
            (Opcode::Newobj, Operand::Method(member)) => {
                StackBehavior::new(saturate(member.params.len()), 1)
            }
            (Opcode::Call | Opcode::Callvirt, Operand::Method(member)) => {
                let pops = member.params.len() + usize::from(member.has_this);
                StackBehavior::new(saturate(pops), u8::from(!member.returns.is_void()))
            }
            _ => StackBehavior::new(0, 0),
        }
    }
}

fn saturate(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand.as_string() {
            Some(operand) => write!(f, "{} {}", self.mnemonic(), operand),
            None => f.write_str(self.mnemonic()),
        }
    }
}
