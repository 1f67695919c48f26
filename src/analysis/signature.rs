//! Read-only inspection of a method's signature and instruction stream.
//!
//! [`SignatureAnalyzer`] answers the questions the weaver asks before touching a candidate:
//! whether the body is a placeholder not worth instrumenting, which structural shape the
//! signature has, how visible the method is and whether a parameter is ever read.
//!
//! # Trivial bodies
//!
//! The following shapes are trivial; every other body is not:
//!
//! | Shape | Instructions |
//! |-------|--------------|
//! | empty | none, or a lone `nop` / `ret` |
//! | no-op | `nop; ret` |
//! | stub | `newobj System.NotImplementedException::.ctor; throw` |
//! | guard | `ldarg <receiver or first parameter>; throw` |
//! | guard | two of `nop` / `ldarg <receiver or first parameter>`, at least one load, then `throw` |
//!
//! # Fingerprints
//!
//! The fingerprint folds the method's full name, its generic parameter names, its parameter
//! type names and its return type name into a base-31 accumulator seeded at 23. Each name
//! is hashed with the 31-polynomial over its UTF-16 code units, and the accumulator is
//! rendered as upper-case hexadecimal of its absolute value.
//!
//! ```rust
//! use cilweave::{analysis::SignatureAnalyzer, metadata::{MethodBuilder, TypeSig}};
//!
//! let method = MethodBuilder::new("Demo.Calculator", "Negate")
//!     .static_method()
//!     .param("value", TypeSig::I4)
//!     .returns(TypeSig::I4)
//!     .implementation(|asm| {
//!         asm.ldc_i4_const(0)?.ldarg(0)?.sub()?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let analyzer = SignatureAnalyzer::new(&method);
//! assert!(!analyzer.is_trivial());
//! assert!(analyzer.reads_slot(0));
//! assert_eq!(analyzer.fingerprint(), SignatureAnalyzer::new(&method).fingerprint());
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    assembly::{Instruction, MethodBody, Opcode, Operand},
    metadata::{MethodAccessFlags, MethodDef},
};

const NOT_IMPLEMENTED_EXCEPTION: &str = "System.NotImplementedException";

/// Read-only view over one method.
#[derive(Debug, Clone, Copy)]
pub struct SignatureAnalyzer<'a> {
    method: &'a MethodDef,
}

impl<'a> SignatureAnalyzer<'a> {
    /// Creates an analyzer for `method`.
    #[must_use]
    pub fn new(method: &'a MethodDef) -> Self {
        SignatureAnalyzer { method }
    }

    /// Returns `true` if the body is one of the placeholder shapes listed in the module
    /// documentation. Methods without a body are trivial.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        let Some(body) = &self.method.body else {
            return true;
        };

        let code: Vec<&Instruction> = body.iter().map(|(_, instruction)| instruction).collect();
        match code.as_slice() {
            [] => true,
            [only] => matches!(only.opcode, Opcode::Nop | Opcode::Ret),
            [first, second] => {
                (first.opcode == Opcode::Nop && second.opcode == Opcode::Ret)
                    || (is_not_implemented(first) && second.opcode == Opcode::Throw)
                    || (self.is_guard_load(first) && second.opcode == Opcode::Throw)
            }
            [first, second, third] => {
                third.opcode == Opcode::Throw
                    && [first, second]
                        .iter()
                        .all(|i| i.opcode == Opcode::Nop || self.is_guard_load(i))
                    && [first, second].iter().any(|i| self.is_guard_load(i))
            }
            _ => false,
        }
    }

    /// Structural hash of the signature, as upper-case hexadecimal.
    ///
    /// Stable for an unchanged method; changes with the return type, any parameter type or
    /// any generic parameter name.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hash: i64 = 23;
        let mut fold = |name: &str| {
            hash = hash.wrapping_mul(31).wrapping_add(i64::from(string_hash(name)));
        };

        fold(&self.method.full_name());
        for generic in &self.method.generic_params {
            fold(&generic.name);
        }
        for param in &self.method.params {
            fold(&param.sig.full_name());
        }
        fold(&self.method.returns.full_name());

        format!("{:X}", hash.unsigned_abs())
    }

    /// Accessibility bits only, with every other modifier masked out.
    #[must_use]
    pub fn visibility(&self) -> MethodAccessFlags {
        self.method.access()
    }

    /// Returns `true` if any instruction loads formal parameter `index`, by value or by
    /// address. On instance methods the receiver occupies slot 0, so formal parameter `index`
    /// lives in slot `index + 1`.
    #[must_use]
    pub fn reads_slot(&self, index: u16) -> bool {
        let slot = self.method.argument_slot(index);
        self.method
            .body
            .as_ref()
            .is_some_and(|body| reads_argument(body, slot))
    }

    fn is_guard_load(&self, instruction: &Instruction) -> bool {
        let Some(slot) = instruction.loaded_argument() else {
            return false;
        };
        if matches!(instruction.opcode, Opcode::LdargaS | Opcode::Ldarga) {
            return false;
        }

        let receiver = self.method.has_this() && slot == 0;
        let first_param = !self.method.params.is_empty() && slot == self.method.argument_slot(0);
        receiver || first_param
    }
}

fn is_not_implemented(instruction: &Instruction) -> bool {
    match (&instruction.opcode, &instruction.operand) {
        (Opcode::Newobj, Operand::Method(ctor)) => {
            ctor.is_constructor() && ctor.declaring_type == NOT_IMPLEMENTED_EXCEPTION
        }
        _ => false,
    }
}

fn reads_argument(body: &MethodBody, slot: u16) -> bool {
    body.iter()
        .any(|(_, instruction)| instruction.loaded_argument() == Some(slot))
}

/// The 31-polynomial string hash over UTF-16 code units, with 32-bit wrapping arithmetic.
fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            builder::MethodBuilder, method::GenericParamDef, module::MemberRef, typesig::TypeSig,
        },
        test::calculator_compute,
        Result,
    };

    fn with_body<F>(is_static: bool, f: F) -> Result<MethodDef>
    where
        F: FnOnce(&mut crate::assembly::InstructionAssembler) -> Result<()> + 'static,
    {
        let mut builder = MethodBuilder::new("Demo.Service", "Run")
            .param("value", TypeSig::Object)
            .param("count", TypeSig::I4);
        if is_static {
            builder = builder.static_method();
        }
        builder.implementation(f).build()
    }

    #[test]
    fn test_trivial_shapes() -> Result<()> {
        let empty = with_body(false, |_| Ok(()))?;
        assert!(SignatureAnalyzer::new(&empty).is_trivial());

        let lone_ret = with_body(false, |asm| {
            asm.ret()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&lone_ret).is_trivial());

        let no_op = with_body(false, |asm| {
            asm.nop()?.ret()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&no_op).is_trivial());

        let stub = with_body(false, |asm| {
            asm.newobj(MemberRef::constructor(NOT_IMPLEMENTED_EXCEPTION, vec![]))?
                .throw()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&stub).is_trivial());

        let receiver_guard = with_body(false, |asm| {
            asm.ldarg_0()?.throw()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&receiver_guard).is_trivial());

        let param_guard = with_body(false, |asm| {
            asm.nop()?.ldarg_1()?.throw()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&param_guard).is_trivial());

        let static_guard = with_body(true, |asm| {
            asm.ldarg_0()?.throw()?;
            Ok(())
        })?;
        assert!(SignatureAnalyzer::new(&static_guard).is_trivial());
        Ok(())
    }

    #[test]
    fn test_non_trivial_shapes() -> Result<()> {
        let other_exception = with_body(false, |asm| {
            asm.newobj(MemberRef::constructor("System.InvalidOperationException", vec![]))?
                .throw()?;
            Ok(())
        })?;
        assert!(!SignatureAnalyzer::new(&other_exception).is_trivial());

        // slot 2 is the second formal parameter
        let second_param_guard = with_body(false, |asm| {
            asm.ldarg_2()?.throw()?;
            Ok(())
        })?;
        assert!(!SignatureAnalyzer::new(&second_param_guard).is_trivial());

        let constant = with_body(false, |asm| {
            asm.ldc_i4_const(1)?.pop()?.ret()?;
            Ok(())
        })?;
        assert!(!SignatureAnalyzer::new(&constant).is_trivial());

        assert!(!SignatureAnalyzer::new(&calculator_compute()).is_trivial());
        Ok(())
    }

    #[test]
    fn test_fingerprint_tracks_signature() {
        let method = calculator_compute();
        let base = SignatureAnalyzer::new(&method).fingerprint();
        assert_eq!(base, SignatureAnalyzer::new(&method).fingerprint());
        assert!(base.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        let mut changed_return = method.clone();
        changed_return.returns = TypeSig::I8;
        assert_ne!(base, SignatureAnalyzer::new(&changed_return).fingerprint());

        let mut changed_param = method.clone();
        changed_param.params[1].sig = TypeSig::String;
        assert_ne!(base, SignatureAnalyzer::new(&changed_param).fingerprint());

        let mut generic = method.clone();
        generic.generic_params.push(GenericParamDef {
            number: 0,
            name: "T".to_string(),
        });
        let with_t = SignatureAnalyzer::new(&generic).fingerprint();
        generic.generic_params[0].name = "U".to_string();
        assert_ne!(with_t, SignatureAnalyzer::new(&generic).fingerprint());
    }

    #[test]
    fn test_string_hash_matches_polynomial() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_reads_slot_offsets_receiver() -> Result<()> {
        let method = calculator_compute();
        let analyzer = SignatureAnalyzer::new(&method);
        assert!(analyzer.reads_slot(0));
        assert!(analyzer.reads_slot(1));

        let by_address = with_body(true, |asm| {
            asm.ldarga(1)?.pop()?.ret()?;
            Ok(())
        })?;
        let analyzer = SignatureAnalyzer::new(&by_address);
        assert!(!analyzer.reads_slot(0));
        assert!(analyzer.reads_slot(1));
        Ok(())
    }

    #[test]
    fn test_visibility_masks_modifiers() -> Result<()> {
        let method = MethodBuilder::new("Demo.Service", "Hidden")
            .static_method()
            .access(MethodAccessFlags::FAMILY)
            .implementation(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()?;
        assert_eq!(
            SignatureAnalyzer::new(&method).visibility(),
            MethodAccessFlags::FAMILY
        );
        Ok(())
    }
}
