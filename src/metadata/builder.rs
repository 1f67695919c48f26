//! Fluent construction of method definitions.
//!
//! [`MethodBuilder`] collects a method's signature, flags, attributes and locals and runs
//! an implementation closure against an [`InstructionAssembler`] to produce its body.
//!
//! ```rust
//! use cilweave::metadata::{MethodBuilder, ModuleDef, TypeSig};
//!
//! let mut module = ModuleDef::new("Demo.dll");
//! let token = MethodBuilder::new("Demo.Calculator", "Add")
//!     .param("a", TypeSig::I4)
//!     .param("b", TypeSig::I4)
//!     .returns(TypeSig::I4)
//!     .implementation(|asm| {
//!         asm.ldarg_1()?.ldarg_2()?.add()?.ret()?;
//!         Ok(())
//!     })
//!     .add_to(&mut module)?;
//!
//! assert_eq!(module.method(token).map(|m| m.params.len()), Some(2));
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    assembly::{InstructionAssembler, MethodBody},
    metadata::{
        attributes::CustomAttribute,
        method::{
            GenericParamDef, MethodAccessFlags, MethodDef, MethodImplCodeType, MethodModifiers,
            ParamDef,
        },
        module::ModuleDef,
        token::Token,
        typesig::TypeSig,
    },
    Result,
};

type ImplementationFn = Box<dyn FnOnce(&mut InstructionAssembler) -> Result<()>>;

/// Builder for [`MethodDef`] values.
pub struct MethodBuilder {
    declaring_type: String,
    name: String,
    flags: u32,
    impl_flags: u32,
    params: Vec<ParamDef>,
    generic_params: Vec<GenericParamDef>,
    returns: TypeSig,
    locals: Vec<TypeSig>,
    attributes: Vec<CustomAttribute>,
    implementation: Option<ImplementationFn>,
}

impl MethodBuilder {
    /// A public instance method returning `void`.
    #[must_use]
    pub fn new(declaring_type: &str, name: &str) -> Self {
        MethodBuilder {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            flags: MethodAccessFlags::PUBLIC.bits() | MethodModifiers::HIDE_BY_SIG.bits(),
            impl_flags: MethodImplCodeType::IL.bits(),
            params: Vec::new(),
            generic_params: Vec::new(),
            returns: TypeSig::Void,
            locals: Vec::new(),
            attributes: Vec::new(),
            implementation: None,
        }
    }

    /// Makes the method static.
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.flags |= MethodModifiers::STATIC.bits();
        self
    }

    /// Replaces the accessibility.
    #[must_use]
    pub fn access(mut self, access: MethodAccessFlags) -> Self {
        self.flags = (self.flags & !crate::metadata::method::METHOD_ACCESS_MASK) | access.bits();
        self
    }

    /// Makes the method abstract; abstract methods have no body.
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.flags |= MethodModifiers::ABSTRACT.bits() | MethodModifiers::VIRTUAL.bits();
        self
    }

    /// Sets raw `MethodImplAttributes`.
    #[must_use]
    pub fn impl_flags(mut self, flags: u32) -> Self {
        self.impl_flags = flags;
        self
    }

    /// Appends a formal parameter.
    #[must_use]
    pub fn param(mut self, name: &str, sig: TypeSig) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let index = self.params.len() as u16;
        self.params.push(ParamDef {
            name: name.to_string(),
            index,
            sig,
            custom_attributes: Vec::new(),
        });
        self
    }

    /// Attaches an attribute to the most recently added parameter.
    #[must_use]
    pub fn param_attribute(mut self, attribute: CustomAttribute) -> Self {
        if let Some(param) = self.params.last_mut() {
            param.custom_attributes.push(attribute);
        }
        self
    }

    /// Appends a generic parameter.
    #[must_use]
    pub fn generic_param(mut self, name: &str) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let number = self.generic_params.len() as u16;
        self.generic_params.push(GenericParamDef {
            number,
            name: name.to_string(),
        });
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.returns = sig;
        self
    }

    /// Declares a local; locals are numbered in declaration order.
    #[must_use]
    pub fn local(mut self, sig: TypeSig) -> Self {
        self.locals.push(sig);
        self
    }

    /// Attaches an attribute to the method.
    #[must_use]
    pub fn attribute(mut self, attribute: CustomAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Sets the code that assembles the method body.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Builds the method definition; its token stays null until added to a module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-abstract method has no implementation or
    /// its implementation fails to assemble
    pub fn build(self) -> Result<MethodDef> {
        let modifiers = MethodModifiers::from_method_flags(self.flags);
        let has_code = !modifiers.contains(MethodModifiers::ABSTRACT)
            && !modifiers.contains(MethodModifiers::PINVOKE_IMPL)
            && MethodImplCodeType::from_impl_flags(self.impl_flags) == MethodImplCodeType::IL;

        let body = match (has_code, self.implementation) {
            (true, Some(implementation)) => {
                let mut body = MethodBody::new();
                for local in self.locals {
                    body.add_local(local);
                }
                let mut asm = InstructionAssembler::new(&mut body);
                implementation(&mut asm)?;
                asm.finish()?;
                Some(body)
            }
            (true, None) => {
                return Err(malformed_error!(
                    "Method {}::{} has no implementation",
                    self.declaring_type,
                    self.name
                ))
            }
            (false, _) => None,
        };

        Ok(MethodDef {
            token: Token::default(),
            name: self.name,
            declaring_type: self.declaring_type,
            flags: self.flags,
            impl_flags: self.impl_flags,
            params: self.params,
            generic_params: self.generic_params,
            returns: self.returns,
            body,
            custom_attributes: self.attributes,
        })
    }

    /// Builds the method and adds it to `module`, returning its token
    ///
    /// # Errors
    /// See [`MethodBuilder::build`]
    pub fn add_to(self, module: &mut ModuleDef) -> Result<Token> {
        let method = self.build()?;
        Ok(module.add_method(method))
    }
}
