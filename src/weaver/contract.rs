//! The runtime hook contract woven code calls into.
//!
//! The interceptor runtime is not part of this crate. Woven methods call a fixed set of
//! members of the runtime assembly, which the module being woven must reference:
//!
//! | Type | Members |
//! |------|---------|
//! | `Aspect.MethodInterceptionArgs` | `.ctor(object, object[], object, MethodBase)`, `get_Cancel`, `get_Return`, `set_Return(object)` |
//! | `Aspect.ParameterInterceptionArgs` | `.ctor(object, ParameterInfo, object)`, `get_Value`, `get_Cancel` |
//! | `Aspect.IMethodInterceptor` | `OnEnter(args)`, `OnExit(args)`, `OnException(args, Exception)` |
//! | `Aspect.IParameterInterceptor` | `OnEnter(args)` |
//! | `System.Reflection.MethodBase` | `GetMethodFromHandle(RuntimeMethodHandle)`, `GetParameters()` |
//! | `System.Type` | `GetTypeFromHandle(RuntimeTypeHandle)` |
//!
//! plus type references to `System.Object` and the caught exception type.
//! [`HookContract::resolve`] looks all of them up and fails with
//! [`crate::Error::ContractMissing`] naming the first one that is not referenced.

use crate::{
    metadata::{ImportTables, MemberRef, ModuleDef, TypeSig},
    weaver::config::DEFAULT_CATCH_TYPE,
    Error, Result,
};

/// `Aspect.MethodInterceptionArgs`.
pub const METHOD_ARGS_TYPE: &str = "Aspect.MethodInterceptionArgs";
/// `Aspect.ParameterInterceptionArgs`.
pub const PARAMETER_ARGS_TYPE: &str = "Aspect.ParameterInterceptionArgs";
/// `Aspect.IMethodInterceptor`.
pub const METHOD_INTERCEPTOR_TYPE: &str = "Aspect.IMethodInterceptor";
/// `Aspect.IParameterInterceptor`.
pub const PARAMETER_INTERCEPTOR_TYPE: &str = "Aspect.IParameterInterceptor";
/// `System.Reflection.MethodBase`.
pub const METHOD_BASE_TYPE: &str = "System.Reflection.MethodBase";
/// `System.Reflection.ParameterInfo`.
pub const PARAMETER_INFO_TYPE: &str = "System.Reflection.ParameterInfo";
/// `System.RuntimeMethodHandle`.
pub const RUNTIME_METHOD_HANDLE_TYPE: &str = "System.RuntimeMethodHandle";
/// `System.RuntimeTypeHandle`.
pub const RUNTIME_TYPE_HANDLE_TYPE: &str = "System.RuntimeTypeHandle";
/// `System.Type`.
pub const SYSTEM_TYPE: &str = "System.Type";
/// `System.Object`.
pub const OBJECT_TYPE: &str = "System.Object";

/// The resolved members woven code calls.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContract {
    /// `MethodInterceptionArgs::.ctor(object, object[], object, MethodBase)`.
    pub method_args_ctor: MemberRef,
    /// `MethodInterceptionArgs::get_Cancel()`.
    pub method_args_cancel: MemberRef,
    /// `MethodInterceptionArgs::get_Return()`.
    pub method_args_get_return: MemberRef,
    /// `MethodInterceptionArgs::set_Return(object)`.
    pub method_args_set_return: MemberRef,
    /// `ParameterInterceptionArgs::.ctor(object, ParameterInfo, object)`.
    pub parameter_args_ctor: MemberRef,
    /// `ParameterInterceptionArgs::get_Value()`.
    pub parameter_args_value: MemberRef,
    /// `ParameterInterceptionArgs::get_Cancel()`.
    pub parameter_args_cancel: MemberRef,
    /// `IMethodInterceptor::OnEnter(MethodInterceptionArgs)`.
    pub on_enter: MemberRef,
    /// `IMethodInterceptor::OnExit(MethodInterceptionArgs)`.
    pub on_exit: MemberRef,
    /// `IMethodInterceptor::OnException(MethodInterceptionArgs, Exception)`.
    pub on_exception: MemberRef,
    /// `IParameterInterceptor::OnEnter(ParameterInterceptionArgs)`.
    pub on_parameter_enter: MemberRef,
    /// `MethodBase::GetMethodFromHandle(RuntimeMethodHandle)`.
    pub get_method_from_handle: MemberRef,
    /// `MethodBase::GetParameters()`.
    pub get_parameters: MemberRef,
    /// `Type::GetTypeFromHandle(RuntimeTypeHandle)`.
    pub get_type_from_handle: MemberRef,
    /// The caught exception type.
    pub catch_type: TypeSig,
}

impl HookContract {
    /// Resolves every contract member in `imports`.
    ///
    /// # Errors
    /// Returns [`Error::ContractMissing`] for the first type or member that is not referenced
    pub fn resolve(imports: &ImportTables, catch_type: &str) -> Result<Self> {
        require_type(imports, OBJECT_TYPE)?;
        require_type(imports, catch_type)?;

        Ok(HookContract {
            method_args_ctor: require_member(imports, METHOD_ARGS_TYPE, ".ctor", 4)?,
            method_args_cancel: require_member(imports, METHOD_ARGS_TYPE, "get_Cancel", 0)?,
            method_args_get_return: require_member(imports, METHOD_ARGS_TYPE, "get_Return", 0)?,
            method_args_set_return: require_member(imports, METHOD_ARGS_TYPE, "set_Return", 1)?,
            parameter_args_ctor: require_member(imports, PARAMETER_ARGS_TYPE, ".ctor", 3)?,
            parameter_args_value: require_member(imports, PARAMETER_ARGS_TYPE, "get_Value", 0)?,
            parameter_args_cancel: require_member(imports, PARAMETER_ARGS_TYPE, "get_Cancel", 0)?,
            on_enter: require_member(imports, METHOD_INTERCEPTOR_TYPE, "OnEnter", 1)?,
            on_exit: require_member(imports, METHOD_INTERCEPTOR_TYPE, "OnExit", 1)?,
            on_exception: require_member(imports, METHOD_INTERCEPTOR_TYPE, "OnException", 2)?,
            on_parameter_enter: require_member(imports, PARAMETER_INTERCEPTOR_TYPE, "OnEnter", 1)?,
            get_method_from_handle: require_member(
                imports,
                METHOD_BASE_TYPE,
                "GetMethodFromHandle",
                1,
            )?,
            get_parameters: require_member(imports, METHOD_BASE_TYPE, "GetParameters", 0)?,
            get_type_from_handle: require_member(imports, SYSTEM_TYPE, "GetTypeFromHandle", 1)?,
            catch_type: TypeSig::class(catch_type),
        })
    }

    /// Every resolved member, in declaration order.
    #[must_use]
    pub fn members(&self) -> [&MemberRef; 14] {
        [
            &self.method_args_ctor,
            &self.method_args_cancel,
            &self.method_args_get_return,
            &self.method_args_set_return,
            &self.parameter_args_ctor,
            &self.parameter_args_value,
            &self.parameter_args_cancel,
            &self.on_enter,
            &self.on_exit,
            &self.on_exception,
            &self.on_parameter_enter,
            &self.get_method_from_handle,
            &self.get_parameters,
            &self.get_type_from_handle,
        ]
    }
}

fn require_type(imports: &ImportTables, name: &str) -> Result<()> {
    match imports.find_type(name) {
        Some(_) => Ok(()),
        None => Err(Error::ContractMissing {
            type_name: name.to_string(),
            member: None,
        }),
    }
}

fn require_member(
    imports: &ImportTables,
    declaring_type: &str,
    name: &str,
    param_count: usize,
) -> Result<MemberRef> {
    imports
        .find_member(declaring_type, name, param_count)
        .cloned()
        .ok_or_else(|| Error::ContractMissing {
            type_name: declaring_type.to_string(),
            member: Some(name.to_string()),
        })
}

/// The contract members as a module referencing the runtime assembly carries them.
#[must_use]
pub fn contract_members() -> Vec<MemberRef> {
    let object = TypeSig::Object;
    let method_args = TypeSig::class(METHOD_ARGS_TYPE);
    let parameter_args = TypeSig::class(PARAMETER_ARGS_TYPE);
    let method_base = TypeSig::class(METHOD_BASE_TYPE);

    vec![
        MemberRef::constructor(
            METHOD_ARGS_TYPE,
            vec![
                object.clone(),
                TypeSig::array_of(object.clone()),
                object.clone(),
                method_base.clone(),
            ],
        ),
        MemberRef::method(METHOD_ARGS_TYPE, "get_Cancel", vec![], TypeSig::Boolean, true),
        MemberRef::method(METHOD_ARGS_TYPE, "get_Return", vec![], object.clone(), true),
        MemberRef::method(
            METHOD_ARGS_TYPE,
            "set_Return",
            vec![object.clone()],
            TypeSig::Void,
            true,
        ),
        MemberRef::constructor(
            PARAMETER_ARGS_TYPE,
            vec![
                object.clone(),
                TypeSig::class(PARAMETER_INFO_TYPE),
                object.clone(),
            ],
        ),
        MemberRef::method(PARAMETER_ARGS_TYPE, "get_Value", vec![], object.clone(), true),
        MemberRef::method(PARAMETER_ARGS_TYPE, "get_Cancel", vec![], TypeSig::Boolean, true),
        MemberRef::method(
            METHOD_INTERCEPTOR_TYPE,
            "OnEnter",
            vec![method_args.clone()],
            TypeSig::Void,
            true,
        ),
        MemberRef::method(
            METHOD_INTERCEPTOR_TYPE,
            "OnExit",
            vec![method_args.clone()],
            TypeSig::Void,
            true,
        ),
        MemberRef::method(
            METHOD_INTERCEPTOR_TYPE,
            "OnException",
            vec![method_args, TypeSig::class(DEFAULT_CATCH_TYPE)],
            TypeSig::Void,
            true,
        ),
        MemberRef::method(
            PARAMETER_INTERCEPTOR_TYPE,
            "OnEnter",
            vec![parameter_args],
            TypeSig::Void,
            true,
        ),
        MemberRef::method(
            METHOD_BASE_TYPE,
            "GetMethodFromHandle",
            vec![TypeSig::value_type(RUNTIME_METHOD_HANDLE_TYPE)],
            method_base,
            false,
        ),
        MemberRef::method(
            METHOD_BASE_TYPE,
            "GetParameters",
            vec![],
            TypeSig::array_of(TypeSig::class(PARAMETER_INFO_TYPE)),
            true,
        ),
        MemberRef::method(
            SYSTEM_TYPE,
            "GetTypeFromHandle",
            vec![TypeSig::value_type(RUNTIME_TYPE_HANDLE_TYPE)],
            TypeSig::class(SYSTEM_TYPE),
            false,
        ),
    ]
}

/// Adds the contract's type and member references to `module`.
///
/// ```rust
/// use cilweave::{metadata::ModuleDef, weaver::{import_contract, HookContract}};
///
/// let mut module = ModuleDef::new("Demo.dll");
/// assert!(HookContract::resolve(&module.imports, "System.Exception").is_err());
///
/// import_contract(&mut module);
/// assert!(HookContract::resolve(&module.imports, "System.Exception").is_ok());
/// ```
pub fn import_contract(module: &mut ModuleDef) {
    module.import_type(&TypeSig::Object);
    module.import_type(&TypeSig::class(DEFAULT_CATCH_TYPE));
    for type_name in [
        METHOD_ARGS_TYPE,
        PARAMETER_ARGS_TYPE,
        METHOD_INTERCEPTOR_TYPE,
        PARAMETER_INTERCEPTOR_TYPE,
        METHOD_BASE_TYPE,
        SYSTEM_TYPE,
    ] {
        module.import_type(&TypeSig::class(type_name));
    }
    for member in contract_members() {
        module.import_member(member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_after_import() -> Result<()> {
        let mut module = ModuleDef::new("Demo.dll");
        import_contract(&mut module);

        let contract = HookContract::resolve(&module.imports, DEFAULT_CATCH_TYPE)?;
        assert!(contract.members().iter().all(|m| !m.token.is_null()));
        assert_eq!(contract.on_exception.params.len(), 2);
        assert!(!contract.get_method_from_handle.has_this);
        assert_eq!(contract.catch_type, TypeSig::class(DEFAULT_CATCH_TYPE));
        Ok(())
    }

    #[test]
    fn test_missing_type_is_reported() {
        let mut module = ModuleDef::new("Demo.dll");
        import_contract(&mut module);

        match HookContract::resolve(&module.imports, "System.IO.IOException") {
            Err(Error::ContractMissing { type_name, member }) => {
                assert_eq!(type_name, "System.IO.IOException");
                assert!(member.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_member_is_reported() {
        let mut module = ModuleDef::new("Demo.dll");
        module.import_type(&TypeSig::Object);
        module.import_type(&TypeSig::class(DEFAULT_CATCH_TYPE));
        for member in contract_members()
            .into_iter()
            .filter(|m| m.name != "get_Return")
        {
            module.import_member(member);
        }

        match HookContract::resolve(&module.imports, DEFAULT_CATCH_TYPE) {
            Err(error @ Error::ContractMissing { .. }) => {
                assert!(error.is_fatal_for_module());
                assert_eq!(
                    error.to_string(),
                    "Hook contract is missing Aspect.MethodInterceptionArgs::get_Return"
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
