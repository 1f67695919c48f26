//! Method and parameter interception.
//!
//! This module rewrites method bodies so that interceptor objects, declared as custom
//! attributes on a method or its parameters, are called around the original code. The
//! woven method
//!
//! - creates one instance of every attached interceptor, initialized from the attribute's
//!   constructor and property arguments,
//! - lets parameter interceptors observe and replace argument values before the body runs,
//! - calls `OnEnter` before the body, `OnException` when it throws and `OnExit` on every
//!   path out of it,
//! - lets any hook cancel the remaining calls and replace the result.
//!
//! # Key Components
//!
//! - [`WeavingSession`] - Weaves the candidates of one module and reports the outcome
//! - [`InterceptionWeaver`] - Rewrites a single method
//! - [`ExitPathNormalizer`] - Funnels every `ret` of a body into one exit
//! - [`HookContract`] - The runtime members woven code calls
//! - [`Candidate`] - A method and the interceptors attached to it
//! - [`EventLog`] - What a pass did, for diagnostics
//!
//! # Example
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! # fn run(module: &mut ModuleDef, candidates: &[Candidate]) -> cilweave::Result<()> {
//! let mut session = WeavingSession::new(module, WeaverConfig::default())?;
//! session.weave_all(candidates)?;
//!
//! let report = session.finish();
//! println!("{} woven, {} failed", report.woven.len(), report.failed.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! A session owns its module exclusively. Independent modules are woven in parallel with
//! [`weave_modules`], which shares one [`ArtifactCache`] between all sessions.

mod config;
mod contract;
mod convert;
mod events;
mod exits;
mod interceptor;
mod method;
mod session;

pub use config::{WeaverConfig, DEFAULT_CATCH_TYPE};
pub use contract::{
    contract_members, import_contract, HookContract, METHOD_ARGS_TYPE, METHOD_BASE_TYPE,
    METHOD_INTERCEPTOR_TYPE, OBJECT_TYPE, PARAMETER_ARGS_TYPE, PARAMETER_INFO_TYPE,
    PARAMETER_INTERCEPTOR_TYPE, RUNTIME_METHOD_HANDLE_TYPE, RUNTIME_TYPE_HANDLE_TYPE,
    SYSTEM_TYPE,
};
pub use convert::{Conversion, SignatureShape};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use exits::{ExitPathNormalizer, NormalizedExit};
pub use interceptor::{
    Candidate, CandidateBuilder, Capabilities, InterceptorDescriptor, InterceptorRole,
    InterceptorTarget,
};
pub use method::{InterceptionWeaver, WovenMethod};
pub use session::{
    weave_modules, ArtifactCache, BatchReport, WeaveOutcome, WeaveReport, WeavingSession,
};
