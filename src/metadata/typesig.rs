//! Static type signatures of parameters, locals and return values.
//!
//! [`TypeSig`] is a trimmed-down counterpart of an ECMA-335 type signature. It carries the
//! fully qualified names the fingerprint hashes and answers the one question the weaver asks
//! of every type that crosses a hook payload boundary: is it a value type (needs boxing) or
//! a reference type (passes through unchanged)?

use std::fmt;

/// A static type as it appears in a method signature or local variable table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeSig {
    /// `void`, only valid as a return type.
    #[default]
    Void,
    /// `bool`.
    Boolean,
    /// `char`.
    Char,
    /// `sbyte`.
    I1,
    /// `byte`.
    U1,
    /// `short`.
    I2,
    /// `ushort`.
    U2,
    /// `int`.
    I4,
    /// `uint`.
    U4,
    /// `long`.
    I8,
    /// `ulong`.
    U8,
    /// `float`.
    R4,
    /// `double`.
    R8,
    /// `nint`.
    I,
    /// `nuint`.
    U,
    /// `string`.
    String,
    /// `object`.
    Object,
    /// A reference type, by fully qualified name.
    Class(String),
    /// A value type, by fully qualified name.
    ValueType(String),
    /// A generic parameter of the method or its declaring type, by name.
    GenericParam(String),
    /// A generic instantiation of `base` with `args`.
    GenericInst(Box<TypeSig>, Vec<TypeSig>),
    /// A single-dimensional, zero-based array.
    SzArray(Box<TypeSig>),
    /// A managed reference (`ref`/`out` parameter).
    ByRef(Box<TypeSig>),
}

impl TypeSig {
    /// Shorthand for [`TypeSig::Class`].
    #[must_use]
    pub fn class(name: &str) -> Self {
        TypeSig::Class(name.to_string())
    }

    /// Shorthand for [`TypeSig::ValueType`].
    #[must_use]
    pub fn value_type(name: &str) -> Self {
        TypeSig::ValueType(name.to_string())
    }

    /// Shorthand for [`TypeSig::SzArray`].
    #[must_use]
    pub fn array_of(element: TypeSig) -> Self {
        TypeSig::SzArray(Box::new(element))
    }

    /// Shorthand for [`TypeSig::ByRef`].
    #[must_use]
    pub fn by_ref(inner: TypeSig) -> Self {
        TypeSig::ByRef(Box::new(inner))
    }

    /// The fully qualified name, in the notation used by metadata tooling.
    ///
    /// Generic instantiations render as ``List`1<System.Int32>``, arrays with a `[]` suffix,
    /// managed references with a `&` suffix. Generic parameters render as their bare name.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            TypeSig::Void => "System.Void".to_string(),
            TypeSig::Boolean => "System.Boolean".to_string(),
            TypeSig::Char => "System.Char".to_string(),
            TypeSig::I1 => "System.SByte".to_string(),
            TypeSig::U1 => "System.Byte".to_string(),
            TypeSig::I2 => "System.Int16".to_string(),
            TypeSig::U2 => "System.UInt16".to_string(),
            TypeSig::I4 => "System.Int32".to_string(),
            TypeSig::U4 => "System.UInt32".to_string(),
            TypeSig::I8 => "System.Int64".to_string(),
            TypeSig::U8 => "System.UInt64".to_string(),
            TypeSig::R4 => "System.Single".to_string(),
            TypeSig::R8 => "System.Double".to_string(),
            TypeSig::I => "System.IntPtr".to_string(),
            TypeSig::U => "System.UIntPtr".to_string(),
            TypeSig::String => "System.String".to_string(),
            TypeSig::Object => "System.Object".to_string(),
            TypeSig::Class(name) | TypeSig::ValueType(name) | TypeSig::GenericParam(name) => {
                name.clone()
            }
            TypeSig::GenericInst(base, args) => {
                let args: Vec<String> = args.iter().map(TypeSig::full_name).collect();
                format!("{}<{}>", base.full_name(), args.join(","))
            }
            TypeSig::SzArray(element) => format!("{}[]", element.full_name()),
            TypeSig::ByRef(inner) => format!("{}&", inner.full_name()),
        }
    }

    /// Returns `true` for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// Returns `true` for types whose values are stored inline and must be boxed to cross
    /// an `object`-typed boundary.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4
            | TypeSig::I8
            | TypeSig::U8
            | TypeSig::R4
            | TypeSig::R8
            | TypeSig::I
            | TypeSig::U
            | TypeSig::ValueType(_) => true,
            TypeSig::GenericInst(base, _) => base.is_value_type(),
            _ => false,
        }
    }

    /// Returns `true` for generic parameters, whose kind is only known at instantiation.
    #[must_use]
    pub fn is_generic_param(&self) -> bool {
        matches!(self, TypeSig::GenericParam(_))
    }

    /// Returns `true` for managed references.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeSig::ByRef(_))
    }

    /// The referenced type of a managed reference, or the type itself.
    #[must_use]
    pub fn strip_by_ref(&self) -> &TypeSig {
        match self {
            TypeSig::ByRef(inner) => inner,
            other => other,
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_names() {
        assert_eq!(TypeSig::I4.full_name(), "System.Int32");
        assert_eq!(TypeSig::Void.full_name(), "System.Void");
        assert_eq!(TypeSig::class("Demo.Order").full_name(), "Demo.Order");
        assert_eq!(TypeSig::array_of(TypeSig::Object).full_name(), "System.Object[]");
        assert_eq!(TypeSig::by_ref(TypeSig::I8).full_name(), "System.Int64&");
        assert_eq!(
            TypeSig::GenericInst(
                Box::new(TypeSig::class("System.Collections.Generic.Dictionary`2")),
                vec![TypeSig::String, TypeSig::I4]
            )
            .full_name(),
            "System.Collections.Generic.Dictionary`2<System.String,System.Int32>"
        );
    }

    #[test]
    fn test_value_type_classification() {
        assert!(TypeSig::I4.is_value_type());
        assert!(TypeSig::value_type("System.Guid").is_value_type());
        assert!(!TypeSig::String.is_value_type());
        assert!(!TypeSig::Object.is_value_type());
        assert!(!TypeSig::GenericParam("T".to_string()).is_value_type());
        assert!(!TypeSig::array_of(TypeSig::I4).is_value_type());
        assert!(TypeSig::GenericInst(
            Box::new(TypeSig::value_type("System.Nullable`1")),
            vec![TypeSig::I4]
        )
        .is_value_type());
    }

    #[test]
    fn test_strip_by_ref() {
        let by_ref = TypeSig::by_ref(TypeSig::I4);
        assert!(by_ref.is_by_ref());
        assert_eq!(by_ref.strip_by_ref(), &TypeSig::I4);
        assert_eq!(TypeSig::String.strip_by_ref(), &TypeSig::String);
    }
}
