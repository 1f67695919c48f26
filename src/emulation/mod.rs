//! Execution of woven method bodies.
//!
//! Weaving is checked by running the result. The [`Interpreter`] executes CIL bodies of a
//! [`ModuleDef`](crate::metadata::ModuleDef) against a [`HostRuntime`] that implements the
//! hook contract in Rust: interceptor hooks become closures registered per interceptor type,
//! and every hook call is recorded for inspection.
//!
//! The interpreter covers the instruction subset that method bodies and woven code use:
//! argument and local access, constants, integer and floating point arithmetic, branches,
//! calls, boxing, arrays, managed pointers and exception regions.
//!
//! # Key Components
//!
//! - [`Interpreter`] - Runs a method to completion
//! - [`HostRuntime`] - The hook contract and registered interceptor behaviors
//! - [`InterceptorBehavior`] - What an interceptor type does in each hook
//! - [`Heap`] - Objects created during a run
//! - [`Value`] - Stack, local and argument contents
//!
//! # Example
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! # fn run(module: &ModuleDef, token: Token, this: Value) -> cilweave::Result<()> {
//! let mut runtime = HostRuntime::new().with_interceptor(
//!     "Demo.TraceAttribute",
//!     InterceptorBehavior::new().on_exit(|hook| println!("returning {}", hook.result())),
//! );
//! let mut interpreter = Interpreter::new(module, &mut runtime);
//! let completion = interpreter.invoke(token, vec![this, Value::I4(3), Value::I4(4)])?;
//! assert_eq!(completion.returned(), Some(&Value::I4(7)));
//! # Ok(())
//! # }
//! ```

mod error;
mod heap;
mod interpreter;
mod runtime;
mod value;

pub use error::EmulationError;
pub use heap::{Heap, HeapObject, MethodArgsObject, ParameterArgsObject};
pub use interpreter::{Completion, EmulationLimits, Interpreter};
pub use runtime::{
    HookInvocation, HookKind, HostRuntime, InterceptorBehavior, MethodHook, MethodHookFn,
    ParameterHook, ParameterHookFn, StubFn, StubOutcome,
};
pub use value::{Location, ObjectRef, Value};
