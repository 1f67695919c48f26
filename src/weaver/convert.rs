//! Conversions across the `object`-typed hook payload boundary.
//!
//! Payloads carry every argument and result as `object`. Crossing that boundary needs one
//! of two total conversions, chosen from the value's static type:
//!
//! - towards the payload, value types and generic parameters are boxed, references pass as
//!   they are
//! - back from the payload, value types and generic parameters are unboxed with
//!   `unbox.any`, references other than `object` are cast with `castclass`
//!
//! By-reference parameters are converted by their element type; the weaver dereferences
//! them before boxing and stores through them after unboxing.

use crate::{
    assembly::{Instruction, Opcode},
    metadata::{MethodDef, TypeSig},
};

/// One side of the `object` boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// The value already is an object reference of the right type.
    Identity,
    /// Box a value of the given type.
    Box(TypeSig),
    /// Unbox an object to the given value type.
    Unbox(TypeSig),
    /// Cast an object to the given reference type.
    Cast(TypeSig),
}

impl Conversion {
    /// Conversion of a value of type `sig` to `object`.
    #[must_use]
    pub fn to_object(sig: &TypeSig) -> Self {
        let sig = sig.strip_by_ref();
        if sig.is_value_type() || sig.is_generic_param() {
            Conversion::Box(sig.clone())
        } else {
            Conversion::Identity
        }
    }

    /// Conversion of an `object` back to type `sig`.
    #[must_use]
    pub fn from_object(sig: &TypeSig) -> Self {
        let sig = sig.strip_by_ref();
        if sig.is_value_type() || sig.is_generic_param() {
            Conversion::Unbox(sig.clone())
        } else if *sig == TypeSig::Object {
            Conversion::Identity
        } else {
            Conversion::Cast(sig.clone())
        }
    }

    /// The instruction performing the conversion, `None` for [`Conversion::Identity`].
    #[must_use]
    pub fn instruction(&self) -> Option<Instruction> {
        match self {
            Conversion::Identity => None,
            Conversion::Box(sig) => Some(Instruction::typed(Opcode::Box, sig.clone())),
            Conversion::Unbox(sig) => Some(Instruction::typed(Opcode::UnboxAny, sig.clone())),
            Conversion::Cast(sig) => Some(Instruction::typed(Opcode::Castclass, sig.clone())),
        }
    }
}

/// The conversions of one signature shape: every parameter towards and back from the
/// payload and the result towards and back from it.
///
/// A shape keeps the types it was computed for. Fingerprints can collide, so a shape found
/// by fingerprint is only used for a method it [fits](SignatureShape::fits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureShape {
    /// Fingerprint of the signature the shape was computed for.
    pub fingerprint: String,
    /// Formal parameter types the conversions were derived from.
    pub params: Vec<TypeSig>,
    /// Return type the result conversions were derived from.
    pub returns: TypeSig,
    /// Per formal parameter: (to object, from object).
    pub parameters: Vec<(Conversion, Conversion)>,
    /// For non-void results: (to object, from object).
    pub result: Option<(Conversion, Conversion)>,
}

impl SignatureShape {
    /// Computes the conversions for `params` and `returns`.
    #[must_use]
    pub fn new(fingerprint: String, params: &[TypeSig], returns: &TypeSig) -> Self {
        SignatureShape {
            fingerprint,
            params: params.to_vec(),
            returns: returns.clone(),
            parameters: params
                .iter()
                .map(|sig| (Conversion::to_object(sig), Conversion::from_object(sig)))
                .collect(),
            result: (!returns.is_void())
                .then(|| (Conversion::to_object(returns), Conversion::from_object(returns))),
        }
    }

    /// Computes the conversions for the signature of `method`.
    #[must_use]
    pub fn of(fingerprint: String, method: &MethodDef) -> Self {
        let params: Vec<TypeSig> = method.params.iter().map(|p| p.sig.clone()).collect();
        Self::new(fingerprint, &params, &method.returns)
    }

    /// Returns `true` if the shape was computed for exactly the signature of `method`.
    #[must_use]
    pub fn fits(&self, method: &MethodDef) -> bool {
        self.returns == method.returns
            && self.params.len() == method.params.len()
            && self
                .params
                .iter()
                .zip(&method.params)
                .all(|(sig, param)| *sig == param.sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types_box_and_unbox() {
        assert_eq!(Conversion::to_object(&TypeSig::I4), Conversion::Box(TypeSig::I4));
        assert_eq!(
            Conversion::from_object(&TypeSig::I4),
            Conversion::Unbox(TypeSig::I4)
        );

        let generic = TypeSig::GenericParam("T".to_string());
        assert_eq!(
            Conversion::to_object(&generic),
            Conversion::Box(generic.clone())
        );
        assert_eq!(
            Conversion::from_object(&generic),
            Conversion::Unbox(generic)
        );
    }

    #[test]
    fn test_references_pass_or_cast() {
        assert_eq!(Conversion::to_object(&TypeSig::String), Conversion::Identity);
        assert_eq!(
            Conversion::from_object(&TypeSig::String),
            Conversion::Cast(TypeSig::String)
        );
        assert_eq!(Conversion::from_object(&TypeSig::Object), Conversion::Identity);
        assert!(Conversion::Identity.instruction().is_none());
    }

    #[test]
    fn test_by_ref_converts_element_type() {
        let by_ref = TypeSig::by_ref(TypeSig::I8);
        assert_eq!(Conversion::to_object(&by_ref), Conversion::Box(TypeSig::I8));
        let instruction = Conversion::from_object(&by_ref).instruction();
        assert_eq!(
            instruction.map(|i| i.opcode),
            Some(Opcode::UnboxAny)
        );
    }

    #[test]
    fn test_shape_of_void_method() {
        let shape = SignatureShape::new("1F".to_string(), &[TypeSig::String], &TypeSig::Void);
        assert!(shape.result.is_none());
        assert_eq!(
            shape.parameters,
            vec![(Conversion::Identity, Conversion::Cast(TypeSig::String))]
        );
    }

    #[test]
    fn test_shape_fits_only_its_signature() {
        let method = crate::test::calculator_compute();
        let shape = SignatureShape::of("F00".to_string(), &method);
        assert!(shape.fits(&method));

        let mut widened = method.clone();
        widened.params[1].sig = TypeSig::I8;
        assert!(!shape.fits(&widened));

        let mut reference = method;
        reference.returns = TypeSig::String;
        assert!(!shape.fits(&reference));
    }
}
