// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # cilweave
//!
//! A compile-time weaving engine for .NET CIL method bodies. Library authors attach
//! interceptor attributes to methods and parameters; `cilweave` rewrites the instruction
//! stream of each decorated method so that the interceptor hooks run around the original
//! body, without runtime reflection.
//!
//! ## Features
//!
//! - **Signature analysis** - Triviality detection, structural fingerprints, visibility and
//!   parameter usage
//! - **Exit normalization** - Rewrites any number of `ret` instructions into a single exit that
//!   protected regions can leave to
//! - **Interception weaving** - The enter/exit/exception/cancel protocol around method bodies
//!   and the enter protocol for parameters
//! - **Encoding** - Branch sizing, max-stack analysis and ECMA-335 method body headers
//! - **Emulation** - A small CIL interpreter to execute woven bodies against a host
//!   implementation of the interceptor contract
//!
//! ## Quick Start
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let mut module = ModuleDef::new("Demo.dll");
//! import_contract(&mut module);
//!
//! let trace = CustomAttribute::new(MemberRef::constructor("Demo.TraceAttribute", vec![]));
//! let token = MethodBuilder::new("Demo.Calculator", "Add")
//!     .param("a", TypeSig::I4)
//!     .param("b", TypeSig::I4)
//!     .returns(TypeSig::I4)
//!     .attribute(trace)
//!     .implementation(|asm| {
//!         asm.ldarg_1()?.ldarg_2()?.add()?.ret()?;
//!         Ok(())
//!     })
//!     .add_to(&mut module)?;
//!
//! let attribute = module.methods[0].custom_attributes[0].token;
//! let candidate = Candidate::builder(token)
//!     .method_interceptor(attribute, Capabilities::all())
//!     .build();
//!
//! let mut session = WeavingSession::new(&mut module, WeaverConfig::default())?;
//! session.weave(&candidate)?;
//! let report = session.finish();
//! assert_eq!(report.woven, vec![token]);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`metadata`] - Methods, parameters, attributes, type signatures and module imports
//! - [`assembly`] - Instructions, mutable method bodies, verification and encoding
//! - [`analysis`] - Read-only inspection of method signatures and bodies
//! - [`weaver`] - Exit normalization, the interception protocol and weaving sessions
//! - [`emulation`] - Execution of woven bodies for verification
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests.
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilweave::prelude::*;
///
/// let config = WeaverConfig::default();
/// assert!(config.skip_trivial);
/// ```
pub mod prelude;

/// The metadata a weaving pass reads and writes.
///
/// Modules are handed to the weaver already decoded: a [`metadata::ModuleDef`] holds the
/// methods it defines together with the types, members and strings it references.
///
/// # Key Components
///
/// - [`metadata::MethodDef`] - A method with parameters, attributes and an optional body
/// - [`metadata::TypeSig`] - Static types of parameters, locals and results
/// - [`metadata::CustomAttribute`] - Declarative metadata occurrences
/// - [`metadata::MethodBuilder`] - Fluent method construction
pub mod metadata;

/// CIL instructions, mutable method bodies and their encoding.
///
/// # Key Components
///
/// - [`assembly::MethodBody`] - Arena-backed instruction stream with exception regions
/// - [`assembly::InstructionAssembler`] - Fluent, label-based instruction assembly
/// - [`assembly::verify`] - Structural rules for exception regions and branches
/// - [`assembly::BodyEncoder`] - Byte-level encoding of method bodies
pub mod assembly;

/// Read-only analysis of methods.
///
/// See [`analysis::SignatureAnalyzer`].
pub mod analysis;

/// The weaving engine.
///
/// # Key Components
///
/// - [`weaver::ExitPathNormalizer`] - Single-exit normalization of method bodies
/// - [`weaver::InterceptionWeaver`] - The interception protocol for one method
/// - [`weaver::WeavingSession`] - Per-module weaving with reporting and caching
/// - [`weaver::weave_modules`] - Parallel weaving of independent modules
pub mod weaver;

/// Execution of method bodies for verification.
///
/// See [`emulation::Interpreter`] and [`emulation::HostRuntime`].
pub mod emulation;

/// `cilweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
///
/// See [`error::Error`](crate::Error) for the error categories.
pub use error::Error;
