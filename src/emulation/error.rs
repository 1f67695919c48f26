//! Emulation error types.
//!
//! Faults of the emulated program itself (null dereferences, invalid casts, division by
//! zero) are raised as managed exceptions and never surface here. These errors mean the
//! interpreter could not continue: an inconsistent body, an unsupported instruction or an
//! exhausted limit.

use std::fmt;

/// Errors that can occur while interpreting a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Evaluation stack underflow (pop from empty stack).
    StackUnderflow,
    /// Instruction count limit exceeded.
    InstructionLimit {
        /// Maximum allowed.
        limit: u64,
    },
    /// Call depth limit exceeded.
    CallDepthExceeded {
        /// Maximum allowed depth.
        limit: usize,
    },
    /// Type mismatch in operation.
    TypeMismatch {
        /// Operation being performed.
        operation: &'static str,
        /// Expected type.
        expected: &'static str,
        /// Actual type found.
        found: &'static str,
    },
    /// Local variable index out of bounds.
    InvalidLocal {
        /// The requested index.
        index: u16,
        /// Number of locals available.
        count: usize,
    },
    /// Argument index out of bounds.
    InvalidArgument {
        /// The requested index.
        index: u16,
        /// Number of arguments available.
        count: usize,
    },
    /// Wrong number of arguments passed to a method.
    ArgumentCount {
        /// Method being invoked.
        method: String,
        /// Expected number of argument slots, `this` included.
        expected: usize,
        /// Number of values given.
        found: usize,
    },
    /// A managed pointer refers to a frame that is not executing.
    InvalidPointer {
        /// Description of the pointer.
        reason: String,
    },
    /// The interpreter does not implement this instruction.
    UnsupportedInstruction {
        /// Instruction mnemonic.
        mnemonic: &'static str,
    },
    /// A call target is neither defined by the module nor known to the host runtime.
    UnresolvedCall {
        /// `Type::Name` of the target.
        member: String,
    },
    /// A method has no body to execute.
    MissingBody {
        /// Method name.
        method: String,
    },
    /// Invalid heap reference.
    InvalidHeapReference {
        /// The invalid reference.
        reference: usize,
    },
    /// A branch or region boundary names an instruction outside the body.
    InvalidBranchTarget {
        /// Description of the target.
        target: String,
    },
    /// Execution ran past the last instruction.
    FellOffEnd,
    /// `endfinally` executed outside of a running finally handler.
    UnbalancedEndfinally,
    /// `rethrow` executed outside of a catch handler.
    RethrowOutsideHandler,
    /// An instruction was executed while no method was running.
    NoActiveFrame,
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::StackUnderflow => write!(f, "evaluation stack underflow"),
            EmulationError::InstructionLimit { limit } => {
                write!(f, "instruction limit of {limit} exceeded")
            }
            EmulationError::CallDepthExceeded { limit } => {
                write!(f, "call depth limit of {limit} exceeded")
            }
            EmulationError::TypeMismatch {
                operation,
                expected,
                found,
            } => {
                write!(
                    f,
                    "type mismatch in {operation}: expected {expected}, found {found}"
                )
            }
            EmulationError::InvalidLocal { index, count } => {
                write!(f, "local variable index {index} out of bounds (count: {count})")
            }
            EmulationError::InvalidArgument { index, count } => {
                write!(f, "argument index {index} out of bounds (count: {count})")
            }
            EmulationError::ArgumentCount {
                method,
                expected,
                found,
            } => {
                write!(f, "{method} takes {expected} argument(s), {found} given")
            }
            EmulationError::InvalidPointer { reason } => write!(f, "invalid pointer: {reason}"),
            EmulationError::UnsupportedInstruction { mnemonic } => {
                write!(f, "unsupported instruction: {mnemonic}")
            }
            EmulationError::UnresolvedCall { member } => write!(f, "unresolved call: {member}"),
            EmulationError::MissingBody { method } => write!(f, "{method} has no body"),
            EmulationError::InvalidHeapReference { reference } => {
                write!(f, "invalid heap reference: {reference}")
            }
            EmulationError::InvalidBranchTarget { target } => {
                write!(f, "invalid branch target: {target}")
            }
            EmulationError::FellOffEnd => write!(f, "execution fell off the end of the body"),
            EmulationError::UnbalancedEndfinally => {
                write!(f, "endfinally outside of a finally handler")
            }
            EmulationError::RethrowOutsideHandler => {
                write!(f, "rethrow outside of a catch handler")
            }
            EmulationError::NoActiveFrame => write!(f, "no method is executing"),
        }
    }
}

impl std::error::Error for EmulationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = EmulationError::TypeMismatch {
            operation: "add",
            expected: "int32",
            found: "object",
        };
        assert_eq!(
            error.to_string(),
            "type mismatch in add: expected int32, found object"
        );
        assert_eq!(
            EmulationError::UnresolvedCall {
                member: "Demo.Log::Write".to_string()
            }
            .to_string(),
            "unresolved call: Demo.Log::Write"
        );
    }

    #[test]
    fn test_converts_into_crate_error() {
        let error: crate::Error = EmulationError::FellOffEnd.into();
        assert!(matches!(error, crate::Error::Emulation(EmulationError::FellOffEnd)));
        assert!(!error.is_weaving_error());
    }
}
