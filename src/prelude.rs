//! # cilweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the cilweave library. Import it to get quick access to everything a weaving pass
//! needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilweave operations.
pub use crate::Error;

/// The result type used throughout cilweave.
pub use crate::Result;

// ================================================================================================
// Metadata
// ================================================================================================

/// Method definitions and their parts.
pub use crate::metadata::{
    AttributeArgument, CustomAttribute, MethodAccessFlags, MethodBuilder, MethodDef, ParamDef,
    TypeSig,
};

/// Module level metadata.
pub use crate::metadata::{ImportTables, MemberRef, ModuleDef, Token};

// ================================================================================================
// Instruction Streams
// ================================================================================================

/// Instructions and method bodies.
pub use crate::assembly::{
    BodyEncoder, Cursor, InstrId, Instruction, InstructionAssembler, MethodBody, Opcode,
    Operand,
};

// ================================================================================================
// Analysis and Weaving
// ================================================================================================

/// Signature inspection.
pub use crate::analysis::SignatureAnalyzer;

/// The weaving engine.
pub use crate::weaver::{
    import_contract, weave_modules, ArtifactCache, BatchReport, Candidate, Capabilities, EventKind, EventLog,
    ExitPathNormalizer, HookContract, InterceptionWeaver, InterceptorDescriptor,
    InterceptorTarget, WeaveOutcome, WeaveReport, WeaverConfig, WeavingSession,
};

// ================================================================================================
// Emulation
// ================================================================================================

/// Executing woven bodies.
pub use crate::emulation::{
    Completion, EmulationLimits, HostRuntime, InterceptorBehavior, Interpreter, Value,
};
