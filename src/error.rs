use thiserror::Error;

use crate::emulation::EmulationError;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Weaving is a deterministic, offline transformation over an immutable input, so none of
/// these errors is transient: a failed candidate is either skipped and reported, or stops the
/// pass for its module, but it is never retried.
///
/// # Error Categories
///
/// ## Weaving Errors
/// - [`Error::Structural`] - A method body cannot be normalized
/// - [`Error::ContractMissing`] - A hook contract type or member is not referenced by the module
/// - [`Error::UnsupportedTarget`] - The candidate has no body or is otherwise ineligible
///
/// ## Encoding and Execution Errors
/// - [`Error::Malformed`] - The instruction stream cannot be encoded as written
/// - [`Error::Emulation`] - The verification interpreter failed to execute a body
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::{Error, metadata::ModuleDef, weaver::{WeaverConfig, WeavingSession}};
///
/// let mut module = ModuleDef::new("Demo.dll");
/// match WeavingSession::new(&mut module, WeaverConfig::default()) {
///     Ok(_session) => println!("hook contract resolved"),
///     Err(Error::ContractMissing { type_name, member }) => {
///         eprintln!("missing {}::{:?}", type_name, member);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The body shape cannot be normalized.
    ///
    /// Raised for exit patterns the normalizer cannot rewrite safely (a return inside a
    /// protected region, a tail-call prefix in front of a return, a `jmp`) and when the
    /// rewritten stream no longer has exactly one exit.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the offending shape
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// The message to be printed for the Structural error.
        message: String,
        /// The source file in which this error occurred.
        file: &'static str,
        /// The source line in which this error occurred.
        line: u32,
    },

    /// A required hook-contract type or member cannot be resolved.
    ///
    /// This error is fatal for the whole module: without the contract no candidate of the
    /// module can be woven.
    #[error("Hook contract is missing {type_name}{}", member.as_ref().map(|m| format!("::{m}")).unwrap_or_default())]
    ContractMissing {
        /// Fully qualified name of the type that was searched.
        type_name: String,
        /// Name of the member that was searched, `None` when the type itself is missing.
        member: Option<String>,
    },

    /// The target cannot be woven.
    ///
    /// Abstract and external members have no body to rewrite; candidates whose interceptor
    /// metadata does not match the method are rejected as well.
    #[error("Unsupported target {method}: {reason}")]
    UnsupportedTarget {
        /// Full name of the rejected method.
        method: String,
        /// Why the method was rejected.
        reason: String,
    },

    /// The instruction stream could not be encoded.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error.
        message: String,
        /// The source file in which this error occurred.
        file: &'static str,
        /// The source line in which this error occurred.
        line: u32,
    },

    /// Failure while executing a body in the verification interpreter.
    #[error("{0}")]
    Emulation(#[from] EmulationError),
}

impl Error {
    /// Returns `true` if this error must abort the pass for the whole module.
    ///
    /// Only a missing hook contract is module-fatal; structural and target errors only
    /// concern the candidate they were raised for.
    #[must_use]
    pub fn is_fatal_for_module(&self) -> bool {
        matches!(self, Error::ContractMissing { .. })
    }

    /// Returns `true` if this error was raised by the weaving pass itself.
    #[must_use]
    pub fn is_weaving_error(&self) -> bool {
        matches!(
            self,
            Error::Structural { .. } | Error::ContractMissing { .. } | Error::UnsupportedTarget { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_error_captures_location() {
        let error = structural_error!("return inside protected region at {}", 4);
        match &error {
            Error::Structural { message, file, line } => {
                assert_eq!(message, "return inside protected region at 4");
                assert!(file.ends_with("error.rs"));
                assert!(*line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(error.is_weaving_error());
        assert!(!error.is_fatal_for_module());
    }

    #[test]
    fn test_contract_missing_display() {
        let error = Error::ContractMissing {
            type_name: "Aspect.MethodInterceptionArgs".to_string(),
            member: Some("get_Cancel".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Hook contract is missing Aspect.MethodInterceptionArgs::get_Cancel"
        );
        assert!(error.is_fatal_for_module());

        let error = Error::ContractMissing {
            type_name: "System.Exception".to_string(),
            member: None,
        };
        assert_eq!(error.to_string(), "Hook contract is missing System.Exception");
    }

    #[test]
    fn test_malformed_is_not_weaving_error() {
        let error = malformed_error!("undefined label '{}'", "loop");
        assert!(!error.is_weaving_error());
        assert!(error.to_string().contains("undefined label 'loop'"));
    }
}
