//! Method definitions, their parameters and the flag sets carried by their metadata rows.
//!
//! # Key Types
//! - [`MethodDef`]: a method of the module being woven, with signature, flags and body
//! - [`ParamDef`], [`GenericParamDef`]: formal and generic parameters
//! - [`MethodAccessFlags`], [`MethodModifiers`], [`MethodImplCodeType`], [`MethodImplOptions`]:
//!   the flag groups of the raw `MethodAttributes` and `MethodImplAttributes` values

use bitflags::bitflags;

use crate::{
    assembly::MethodBody,
    metadata::{attributes::CustomAttribute, module::MemberRef, token::Token, typesig::TypeSig},
};

/// Bitmask for `ACCESS` state extraction.
pub const METHOD_ACCESS_MASK: u32 = 0x0007;
/// Bitmask for `CODE_TYPE` extraction.
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method access flags.
    pub struct MethodAccessFlags: u32 {
        /// Member not referenceable.
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type.
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly.
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly.
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types.
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly.
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope.
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes.
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        let access = flags & METHOD_ACCESS_MASK;
        Self::from_bits_truncate(access)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method modifiers and properties.
    pub struct MethodModifiers: u32 {
        /// Method is exported from the module as an unmanaged entry point.
        const UNMANAGED_EXPORT = 0x0008;
        /// Defined on type, else per instance.
        const STATIC = 0x0010;
        /// Method may not be overridden.
        const FINAL = 0x0020;
        /// Method is virtual.
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name.
        const HIDE_BY_SIG = 0x0080;
        /// Method does not provide an implementation.
        const ABSTRACT = 0x0400;
        /// Method is special.
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, depending upon the name of the method.
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke.
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes.
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & !METHOD_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method implementation code type flags.
    pub struct MethodImplCodeType: u32 {
        /// Method impl is IL.
        const IL = 0x0000;
        /// Method impl is native.
        const NATIVE = 0x0001;
        /// Method impl is OPTIL.
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime.
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract code type from raw implementation flags.
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method implementation additional options.
    pub struct MethodImplOptions: u32 {
        /// Method cannot be inlined.
        const NO_INLINING = 0x0008;
        /// Method is a synchronized method.
        const SYNCHRONIZED = 0x0020;
        /// Method signature is not mangled for P/Invoke.
        const PRESERVE_SIG = 0x0080;
        /// Method is implemented inside the runtime.
        const INTERNAL_CALL = 0x1000;
    }
}

impl MethodImplOptions {
    /// Extract implementation options from raw implementation flags.
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & !METHOD_IMPL_CODE_TYPE_MASK)
    }
}

/// A formal parameter of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    /// Declared name.
    pub name: String,
    /// 0-based position in the formal parameter list.
    pub index: u16,
    /// Static type.
    pub sig: TypeSig,
    /// Attributes attached to this parameter, in declaration order.
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A generic parameter declared by a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParamDef {
    /// 0-based position in the generic parameter list.
    pub number: u16,
    /// Declared name.
    pub name: String,
}

/// A method defined by the module being woven.
///
/// The body is `None` for abstract, runtime-provided and P/Invoke members; such methods
/// cannot be woven.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// `MethodDef` token.
    pub token: Token,
    /// Simple name.
    pub name: String,
    /// Fully qualified name of the declaring type.
    pub declaring_type: String,
    /// Raw `MethodAttributes`.
    pub flags: u32,
    /// Raw `MethodImplAttributes`.
    pub impl_flags: u32,
    /// Formal parameters, in order.
    pub params: Vec<ParamDef>,
    /// Generic parameters, in declaration order.
    pub generic_params: Vec<GenericParamDef>,
    /// Return type.
    pub returns: TypeSig,
    /// IL body.
    pub body: Option<MethodBody>,
    /// Attributes attached to the method itself, in declaration order.
    pub custom_attributes: Vec<CustomAttribute>,
}

impl MethodDef {
    /// The fully qualified name: `"<ret> <Type>::<Name>(<p1>,<p2>)"`.
    ///
    /// Generic methods carry their generic parameter names in angle brackets after the
    /// method name.
    #[must_use]
    pub fn full_name(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.sig.full_name()).collect();
        let generics = if self.generic_params.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = self.generic_params.iter().map(|g| g.name.as_str()).collect();
            format!("<{}>", names.join(","))
        };

        format!(
            "{} {}::{}{}({})",
            self.returns.full_name(),
            self.declaring_type,
            self.name,
            generics,
            params.join(",")
        )
    }

    /// Accessibility bits of the method.
    #[must_use]
    pub fn access(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_method_flags(self.flags)
    }

    /// Non-access modifiers of the method.
    #[must_use]
    pub fn modifiers(&self) -> MethodModifiers {
        MethodModifiers::from_method_flags(self.flags)
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers().contains(MethodModifiers::STATIC)
    }

    /// Returns `true` if the method receives `this` in argument slot 0.
    #[must_use]
    pub fn has_this(&self) -> bool {
        !self.is_static()
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers().contains(MethodModifiers::ABSTRACT)
    }

    /// Returns `true` if the implementation lives outside the module's IL.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.modifiers().contains(MethodModifiers::PINVOKE_IMPL)
            || MethodImplCodeType::from_impl_flags(self.impl_flags) != MethodImplCodeType::IL
            || MethodImplOptions::from_impl_flags(self.impl_flags)
                .contains(MethodImplOptions::INTERNAL_CALL)
    }

    /// Returns `true` if the method has an IL body that can be rewritten.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some() && !self.is_abstract() && !self.is_external()
    }

    /// Argument slot holding formal parameter `index`, accounting for `this`.
    #[must_use]
    pub fn argument_slot(&self, index: u16) -> u16 {
        if self.has_this() {
            index + 1
        } else {
            index
        }
    }

    /// A reference to this method usable as a call or `ldtoken` operand.
    #[must_use]
    pub fn reference(&self) -> MemberRef {
        MemberRef {
            token: self.token,
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            params: self.params.iter().map(|p| p.sig.clone()).collect(),
            returns: self.returns.clone(),
            has_this: self.has_this(),
        }
    }

    /// Looks up an attribute occurrence on the method or any of its parameters.
    #[must_use]
    pub fn find_attribute(&self, token: Token) -> Option<&CustomAttribute> {
        self.custom_attributes
            .iter()
            .chain(self.params.iter().flat_map(|p| p.custom_attributes.iter()))
            .find(|attribute| attribute.token == token)
    }

    /// Removes an attribute occurrence from the method or any of its parameters.
    pub fn remove_attribute(&mut self, token: Token) -> Option<CustomAttribute> {
        if let Some(position) = self.custom_attributes.iter().position(|a| a.token == token) {
            return Some(self.custom_attributes.remove(position));
        }

        for param in &mut self.params {
            if let Some(position) = param.custom_attributes.iter().position(|a| a.token == token) {
                return Some(param.custom_attributes.remove(position));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::calculator_compute;

    #[test]
    fn test_access_flags_mask_modifiers() {
        let flags = MethodAccessFlags::PUBLIC.bits()
            | MethodModifiers::STATIC.bits()
            | MethodModifiers::HIDE_BY_SIG.bits();
        assert_eq!(
            MethodAccessFlags::from_method_flags(flags),
            MethodAccessFlags::PUBLIC
        );
        assert!(MethodModifiers::from_method_flags(flags).contains(MethodModifiers::STATIC));
    }

    #[test]
    fn test_full_name_and_slots() {
        let method = calculator_compute();
        assert_eq!(
            method.full_name(),
            "System.Int32 Demo.Calculator::Compute(System.Int32,System.Int32)"
        );
        assert!(method.has_this());
        assert_eq!(method.argument_slot(0), 1);
        assert!(method.has_body());
    }

    #[test]
    fn test_external_methods_have_no_body() {
        let mut method = calculator_compute();
        method.flags |= MethodModifiers::PINVOKE_IMPL.bits();
        assert!(method.is_external());
        assert!(!method.has_body());

        let mut method = calculator_compute();
        method.impl_flags = MethodImplCodeType::RUNTIME.bits();
        assert!(!method.has_body());
    }
}
