use crate::{
    metadata::{
        attributes::{AttributeArgument, CustomAttribute},
        builder::MethodBuilder,
        method::MethodDef,
        module::{MemberRef, ModuleDef},
        token::Token,
        typesig::TypeSig,
    },
    weaver::{import_contract, Candidate, Capabilities},
};

pub const TRACE_ATTRIBUTE: &str = "Demo.TraceAttribute";
pub const DOUBLE_ATTRIBUTE: &str = "Demo.DoubleAttribute";

// Helper function to create a method interceptor attribute occurrence
pub fn trace_attribute() -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(TRACE_ATTRIBUTE, vec![]))
}

// Helper function to create a parameter interceptor attribute occurrence
pub fn double_attribute() -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(DOUBLE_ATTRIBUTE, vec![]))
}

// Helper function to create an attribute with constructor and property arguments
pub fn named_trace_attribute(name: &str) -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(TRACE_ATTRIBUTE, vec![TypeSig::String]))
        .with_fixed_arg(AttributeArgument::String(name.to_string()))
        .with_property("Level", AttributeArgument::I4(2))
}

// `int Demo.Calculator::Compute(int a, int b) => a + b`, traced, with `a` doubled
pub fn calculator_compute() -> MethodDef {
    MethodBuilder::new("Demo.Calculator", "Compute")
        .param("a", TypeSig::I4)
        .param_attribute(double_attribute())
        .param("b", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(trace_attribute())
        .implementation(|asm| {
            asm.ldarg_1()?.ldarg_2()?.add()?.ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

// Helper function to create a module that references the hook contract
pub fn contract_module() -> ModuleDef {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    module
}

// Helper function to add `calculator_compute` to a contract module and discover its candidate
pub fn compute_candidate() -> (ModuleDef, Token, Candidate) {
    let mut module = contract_module();
    let token = module.add_method(calculator_compute());
    let method = module.method(token).unwrap();

    let candidate = Candidate::builder(token)
        .method_interceptor(method.custom_attributes[0].token, Capabilities::all())
        .parameter_interceptor(method.params[0].custom_attributes[0].token, 0)
        .build();

    (module, token, candidate)
}
