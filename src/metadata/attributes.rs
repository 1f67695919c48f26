//! Custom attribute occurrences and their decoded arguments.
//!
//! Interceptors are declared as custom attributes. The weaver re-creates each occurrence at
//! run time by calling its constructor with the fixed arguments and then assigning every
//! named property argument through its setter, so the decoded argument values are kept here
//! in a form that can be pushed back onto the evaluation stack.

use crate::metadata::{module::MemberRef, token::Token, typesig::TypeSig};

/// A decoded fixed or named attribute argument.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeArgument {
    /// `bool`.
    Bool(bool),
    /// `int`.
    I4(i32),
    /// `long`.
    I8(i64),
    /// `double`.
    R8(f64),
    /// `string`.
    String(String),
    /// `null` for any reference-typed argument.
    Null,
    /// `System.Type` argument.
    Type(TypeSig),
}

impl AttributeArgument {
    /// The static type an argument of this kind has in a constructor or setter signature.
    #[must_use]
    pub fn type_sig(&self) -> TypeSig {
        match self {
            AttributeArgument::Bool(_) => TypeSig::Boolean,
            AttributeArgument::I4(_) => TypeSig::I4,
            AttributeArgument::I8(_) => TypeSig::I8,
            AttributeArgument::R8(_) => TypeSig::R8,
            AttributeArgument::String(_) => TypeSig::String,
            AttributeArgument::Null => TypeSig::Object,
            AttributeArgument::Type(_) => TypeSig::class("System.Type"),
        }
    }
}

/// A named argument: a property or field assignment following the constructor call.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArgument {
    /// `true` for properties, `false` for fields.
    pub is_property: bool,
    /// Member name.
    pub name: String,
    /// Assigned value.
    pub value: AttributeArgument,
}

/// One occurrence of a custom attribute on a method or parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// `CustomAttribute` token; assigned by the module when the owner is added.
    pub token: Token,
    /// Constructor that creates the attribute instance.
    pub ctor: MemberRef,
    /// Constructor arguments, in order.
    pub fixed_args: Vec<AttributeArgument>,
    /// Property and field assignments, in order.
    pub named_args: Vec<NamedArgument>,
}

impl CustomAttribute {
    /// Creates an occurrence of the attribute whose constructor is `ctor`.
    #[must_use]
    pub fn new(ctor: MemberRef) -> Self {
        CustomAttribute {
            token: Token::default(),
            ctor,
            fixed_args: Vec::new(),
            named_args: Vec::new(),
        }
    }

    /// Appends a constructor argument.
    #[must_use]
    pub fn with_fixed_arg(mut self, value: AttributeArgument) -> Self {
        self.fixed_args.push(value);
        self
    }

    /// Appends a property assignment.
    #[must_use]
    pub fn with_property(mut self, name: &str, value: AttributeArgument) -> Self {
        self.named_args.push(NamedArgument {
            is_property: true,
            name: name.to_string(),
            value,
        });
        self
    }

    /// Fully qualified name of the attribute type.
    #[must_use]
    pub fn attribute_type(&self) -> &str {
        &self.ctor.declaring_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_argument_order() {
        let ctor = MemberRef::constructor("Demo.TraceAttribute", vec![TypeSig::String]);
        let attribute = CustomAttribute::new(ctor)
            .with_fixed_arg(AttributeArgument::String("audit".to_string()))
            .with_property("Level", AttributeArgument::I4(2))
            .with_property("Enabled", AttributeArgument::Bool(true));

        assert_eq!(attribute.attribute_type(), "Demo.TraceAttribute");
        assert!(attribute.token.is_null());
        assert_eq!(attribute.fixed_args.len(), 1);
        let names: Vec<&str> = attribute.named_args.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["Level", "Enabled"]);
    }

    #[test]
    fn test_argument_type_sig() {
        assert_eq!(AttributeArgument::Bool(false).type_sig(), TypeSig::Boolean);
        assert_eq!(AttributeArgument::Null.type_sig(), TypeSig::Object);
        assert_eq!(
            AttributeArgument::Type(TypeSig::I4).type_sig().full_name(),
            "System.Type"
        );
    }
}
