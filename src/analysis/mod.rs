//! Read-only analysis of method signatures and bodies.
//!
//! The weaver consults [`SignatureAnalyzer`] to decide whether a candidate is worth
//! instrumenting, to key its per-signature artifacts and to spot parameter interceptors
//! attached to parameters the body never reads.

pub mod signature;

pub use signature::SignatureAnalyzer;
