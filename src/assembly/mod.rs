//! CIL instruction model, mutable method bodies and their encoding.
//!
//! This module holds everything that operates on instruction streams without knowing about
//! interception: the opcode table, symbolic instructions and operands, the arena-backed
//! [`MethodBody`] with its emission [`Cursor`], a label-based [`InstructionAssembler`], the
//! structural [`verify`] pass and the byte-level [`BodyEncoder`].
//!
//! # Architecture
//!
//! - [`opcodes`] - Opcode encodings, operand kinds, flow types and fixed stack effects
//! - [`instruction`] - [`Instruction`], [`Operand`], [`InstrId`] and related metadata
//! - [`body`] - [`MethodBody`], [`Cursor`], [`ExceptionRegion`]
//! - [`variable`] - Typed locals and argument slots
//! - [`assembler`] - Fluent instruction assembly with named labels
//! - [`verify`](mod@verify) - Exception-region and control-flow rules
//! - [`encoder`] - Branch sizing, max-stack analysis, header and EH section encoding

pub mod assembler;
pub mod body;
pub mod encoder;
pub mod instruction;
pub mod opcodes;
pub mod variable;
pub mod verify;

pub use assembler::InstructionAssembler;
pub use body::{Cursor, ExceptionRegion, Insertion, MethodBody, RegionKind};
pub use encoder::{BodyEncoder, EncodedBody};
pub use instruction::{
    FlowType, Immediate, InstrId, Instruction, InstructionCategory, LocalId, Operand,
    OperandType, StackBehavior,
};
pub use opcodes::Opcode;
pub use variable::{Slot, Variable};
pub use verify::verify;
