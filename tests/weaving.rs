//! End-to-end weaving tests.
//!
//! Each test builds a small module, weaves it through a [`WeavingSession`] and runs the woven
//! method in the interpreter against interceptor behaviors written in Rust. The recorded hook
//! calls show the order of the protocol; returned values and exceptions show its effect.

use cilweave::{
    emulation::{HeapObject, HookKind, Location, StubOutcome},
    prelude::*,
};

const TRACE: &str = "Demo.TraceAttribute";
const DOUBLE: &str = "Demo.DoubleAttribute";

fn trace() -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(TRACE, vec![]))
}

fn double() -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(DOUBLE, vec![]))
}

/// Doubles `int` arguments.
fn doubling() -> InterceptorBehavior {
    InterceptorBehavior::new().on_parameter(|hook| {
        if let Value::I4(value) = hook.value() {
            hook.set_value(Value::I4(value * 2));
        }
    })
}

/// `int Demo.Calculator::Compute([Double] int a, int b) => a + b`, traced.
fn compute_module() -> Result<(ModuleDef, Token, Candidate)> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);

    let token = MethodBuilder::new("Demo.Calculator", "Compute")
        .param("a", TypeSig::I4)
        .param_attribute(double())
        .param("b", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(trace())
        .implementation(|asm| {
            asm.ldarg_1()?.ldarg_2()?.add()?.ret()?;
            Ok(())
        })
        .add_to(&mut module)?;

    let method = module.method(token).unwrap();
    let candidate = Candidate::builder(token)
        .parameter_interceptor(method.params[0].custom_attributes[0].token, 0)
        .method_interceptor(method.custom_attributes[0].token, Capabilities::all())
        .build();
    Ok((module, token, candidate))
}

fn weave(module: &mut ModuleDef, candidate: &Candidate) -> Result<WeaveReport> {
    let mut session = WeavingSession::new(module, WeaverConfig::default())?;
    session.weave(candidate)?;
    Ok(session.finish())
}

#[test]
fn test_parameter_hook_runs_before_enter() -> Result<()> {
    let (mut module, token, candidate) = compute_module()?;
    let report = weave(&mut module, &candidate)?;
    assert_eq!(report.woven, vec![token]);

    let mut runtime = HostRuntime::new()
        .with_interceptor(DOUBLE, doubling())
        .with_interceptor(TRACE, InterceptorBehavior::new());
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let completion =
            interpreter.invoke(token, vec![Value::Null, Value::I4(3), Value::I4(4)])?;
        assert_eq!(completion.returned(), Some(&Value::I4(10)));
    }

    let calls: Vec<(HookKind, Vec<Value>)> = runtime
        .invocations()
        .iter()
        .map(|i| (i.kind, i.arguments.clone()))
        .collect();
    assert_eq!(
        calls,
        vec![
            (HookKind::Parameter, vec![Value::I4(3)]),
            (HookKind::Enter, vec![Value::I4(6), Value::I4(4)]),
            (HookKind::Exit, vec![Value::I4(6), Value::I4(4)]),
        ]
    );
    assert_eq!(runtime.invocations()[0].parameter, Some(0));
    Ok(())
}

#[test]
fn test_exit_hook_can_replace_result() -> Result<()> {
    let (mut module, token, candidate) = compute_module()?;
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new().with_interceptor(
        TRACE,
        InterceptorBehavior::new().on_exit(|hook| {
            if let Value::I4(result) = hook.result() {
                hook.set_result(Value::I4(result * 100));
            }
        }),
    );
    let mut interpreter = Interpreter::new(&module, &mut runtime);
    let completion = interpreter.invoke(token, vec![Value::Null, Value::I4(1), Value::I4(2)])?;

    // no behavior for the parameter interceptor, `a` stays 1
    assert_eq!(completion.returned(), Some(&Value::I4(300)));
    Ok(())
}

#[test]
fn test_cancel_on_enter_skips_body() -> Result<()> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    let token = MethodBuilder::new("Demo.Cache", "Load")
        .static_method()
        .param("key", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(trace())
        .implementation(|asm| {
            asm.ldarg_0()?
                .call(MemberRef::method(
                    "Demo.Store",
                    "Fetch",
                    vec![TypeSig::I4],
                    TypeSig::I4,
                    false,
                ))?
                .ret()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let attribute = module.method(token).unwrap().custom_attributes[0].token;
    let candidate = Candidate::builder(token)
        .method_interceptor(attribute, Capabilities::all())
        .build();
    weave(&mut module, &candidate)?;

    let behavior = InterceptorBehavior::new()
        .on_enter(|hook| {
            if hook.arguments() == [Value::I4(7)] {
                hook.cancel();
            }
        })
        .on_exit(|hook| {
            if hook.is_cancelled() {
                hook.set_result(Value::I4(-1));
            }
        });
    let mut runtime = HostRuntime::new()
        .with_interceptor(TRACE, behavior)
        .with_stub("Demo.Store", "Fetch", |_, args| {
            StubOutcome::Return(args.first().cloned())
        });

    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let cached = interpreter.invoke(token, vec![Value::I4(7)])?;
        assert_eq!(cached.returned(), Some(&Value::I4(-1)));
        let fetched = interpreter.invoke(token, vec![Value::I4(5)])?;
        assert_eq!(fetched.returned(), Some(&Value::I4(5)));
    }

    assert_eq!(runtime.invocations_of(HookKind::Enter).count(), 2);
    assert_eq!(runtime.invocations_of(HookKind::Exit).count(), 2);
    assert_eq!(runtime.invocations_of(HookKind::Exception).count(), 0);
    Ok(())
}

#[test]
fn test_exception_is_observed_and_rethrown() -> Result<()> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    let token = MethodBuilder::new("Demo.Calculator", "Divide")
        .static_method()
        .param("a", TypeSig::I4)
        .param("b", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(trace())
        .implementation(|asm| {
            asm.ldarg_0()?.ldarg_1()?.div()?.ret()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let attribute = module.method(token).unwrap().custom_attributes[0].token;
    let candidate = Candidate::builder(token)
        .method_interceptor(attribute, Capabilities::all())
        .build();
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new().with_interceptor(TRACE, InterceptorBehavior::new());
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let completion = interpreter.invoke(token, vec![Value::I4(1), Value::I4(0)])?;
        assert!(completion.is_exception());
        assert_eq!(
            interpreter.exception_type(&completion).as_deref(),
            Some("System.DivideByZeroException")
        );
    }

    let kinds: Vec<HookKind> = runtime.invocations().iter().map(|i| i.kind).collect();
    assert_eq!(kinds, [HookKind::Enter, HookKind::Exception, HookKind::Exit]);
    assert_eq!(
        runtime.invocations()[1].exception.as_deref(),
        Some("System.DivideByZeroException")
    );
    Ok(())
}

const FIRST: &str = "Demo.FirstAttribute";
const SECOND: &str = "Demo.SecondAttribute";

/// `static int Demo.Calculator::Divide(int a, int b)` with two method interceptors.
fn layered_module() -> Result<(ModuleDef, Token, Candidate)> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    let token = MethodBuilder::new("Demo.Calculator", "Divide")
        .static_method()
        .param("a", TypeSig::I4)
        .param("b", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(CustomAttribute::new(MemberRef::constructor(FIRST, vec![])))
        .attribute(CustomAttribute::new(MemberRef::constructor(SECOND, vec![])))
        .implementation(|asm| {
            asm.ldarg_0()?.ldarg_1()?.div()?.ret()?;
            Ok(())
        })
        .add_to(&mut module)?;

    let attributes = &module.method(token).unwrap().custom_attributes;
    let candidate = Candidate::builder(token)
        .method_interceptor(attributes[0].token, Capabilities::all())
        .method_interceptor(attributes[1].token, Capabilities::all())
        .build();
    Ok((module, token, candidate))
}

fn hook_sequence(runtime: &HostRuntime) -> Vec<(&str, HookKind)> {
    runtime
        .invocations()
        .iter()
        .map(|i| (i.interceptor.as_str(), i.kind))
        .collect()
}

#[test]
fn test_interceptors_run_in_declaration_order() -> Result<()> {
    let (mut module, token, candidate) = layered_module()?;
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new()
        .with_interceptor(FIRST, InterceptorBehavior::new())
        .with_interceptor(SECOND, InterceptorBehavior::new());
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let completion = interpreter.invoke(token, vec![Value::I4(8), Value::I4(2)])?;
        assert_eq!(completion.returned(), Some(&Value::I4(4)));
    }
    assert_eq!(
        hook_sequence(&runtime),
        [
            (FIRST, HookKind::Enter),
            (SECOND, HookKind::Enter),
            (FIRST, HookKind::Exit),
            (SECOND, HookKind::Exit),
        ]
    );

    let mut runtime = HostRuntime::new()
        .with_interceptor(FIRST, InterceptorBehavior::new())
        .with_interceptor(SECOND, InterceptorBehavior::new());
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let completion = interpreter.invoke(token, vec![Value::I4(8), Value::I4(0)])?;
        assert!(completion.is_exception());
    }
    assert_eq!(
        hook_sequence(&runtime),
        [
            (FIRST, HookKind::Enter),
            (SECOND, HookKind::Enter),
            (FIRST, HookKind::Exception),
            (SECOND, HookKind::Exception),
            (FIRST, HookKind::Exit),
            (SECOND, HookKind::Exit),
        ]
    );
    Ok(())
}

#[test]
fn test_cancel_stops_later_interceptors() -> Result<()> {
    let (mut module, token, candidate) = layered_module()?;
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new()
        .with_interceptor(
            FIRST,
            InterceptorBehavior::new()
                .on_enter(|hook| hook.cancel())
                .on_exit(|hook| hook.set_result(Value::I4(-1))),
        )
        .with_interceptor(SECOND, InterceptorBehavior::new());
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        // the body would divide by zero
        let completion = interpreter.invoke(token, vec![Value::I4(8), Value::I4(0)])?;
        assert_eq!(completion.returned(), Some(&Value::I4(-1)));
    }

    // the second interceptor sees neither hook once the first cancelled
    assert_eq!(
        hook_sequence(&runtime),
        [(FIRST, HookKind::Enter), (FIRST, HookKind::Exit)]
    );
    Ok(())
}

#[test]
fn test_hook_exception_reaches_caller() -> Result<()> {
    let (mut module, token, candidate) = compute_module()?;
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new().with_interceptor(
        DOUBLE,
        InterceptorBehavior::new().on_parameter(|hook| {
            if hook.value() == Value::I4(0) {
                hook.throw("System.ArgumentException", "a must not be zero");
            }
        }),
    );
    {
        let mut interpreter = Interpreter::new(&module, &mut runtime);
        let completion = interpreter.invoke(token, vec![Value::Null, Value::I4(0), Value::I4(1)])?;
        assert_eq!(
            interpreter.exception_type(&completion).as_deref(),
            Some("System.ArgumentException")
        );
    }

    // parameter hooks run inside the protected block
    let kinds: Vec<HookKind> = runtime.invocations().iter().map(|i| i.kind).collect();
    assert_eq!(kinds, [HookKind::Parameter, HookKind::Exception, HookKind::Exit]);
    Ok(())
}

#[test]
fn test_by_ref_parameter_is_written_back() -> Result<()> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    let token = MethodBuilder::new("Demo.Counter", "Bump")
        .static_method()
        .param("value", TypeSig::by_ref(TypeSig::I4))
        .param_attribute(double())
        .implementation(|asm| {
            asm.ldarg_0()?
                .ldarg_0()?
                .emit(Instruction::typed(Opcode::Ldobj, TypeSig::I4))?
                .ldc_i4_const(3)?
                .add()?
                .emit(Instruction::typed(Opcode::Stobj, TypeSig::I4))?
                .ret()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let attribute = module.method(token).unwrap().params[0].custom_attributes[0].token;
    let candidate = Candidate::builder(token)
        .parameter_interceptor(attribute, 0)
        .build();
    weave(&mut module, &candidate)?;

    let mut runtime = HostRuntime::new().with_interceptor(DOUBLE, doubling());
    let mut interpreter = Interpreter::new(&module, &mut runtime);
    let cell = interpreter.heap_mut().alloc(HeapObject::Boxed {
        sig: TypeSig::I4,
        value: Value::I4(5),
    });
    let completion = interpreter.invoke(token, vec![Value::Pointer(Location::Boxed(cell))])?;
    assert_eq!(completion, Completion::Returned(None));
    assert_eq!(interpreter.heap().unbox(&Value::Object(cell)), Value::I4(13));
    Ok(())
}

#[test]
fn test_attribute_state_reaches_hooks() -> Result<()> {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    let attribute = CustomAttribute::new(MemberRef::constructor(TRACE, vec![TypeSig::String]))
        .with_fixed_arg(AttributeArgument::String("audit".to_string()))
        .with_property("Level", AttributeArgument::I4(2));
    let token = MethodBuilder::new("Demo.Audit", "Log")
        .static_method()
        .attribute(attribute)
        .implementation(|asm| {
            asm.ldstr("entry")?
                .call(MemberRef::method(
                    "Demo.Sink",
                    "Write",
                    vec![TypeSig::String],
                    TypeSig::Void,
                    false,
                ))?
                .ret()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let attribute = module.method(token).unwrap().custom_attributes[0].token;
    let candidate = Candidate::builder(token)
        .method_interceptor(attribute, Capabilities::ENTER)
        .build();
    weave(&mut module, &candidate)?;

    let behavior = InterceptorBehavior::new().on_enter(|hook| {
        let name = hook
            .constructor_argument(0)
            .and_then(|value| hook.string(&value));
        if name.as_deref() != Some("audit") || hook.property("Level") != Some(Value::I4(2)) {
            hook.throw("System.InvalidOperationException", "attribute state lost");
        }
    });
    let mut runtime = HostRuntime::new()
        .with_interceptor(TRACE, behavior)
        .with_stub("Demo.Sink", "Write", |_, _| StubOutcome::Return(None));
    let mut interpreter = Interpreter::new(&module, &mut runtime);
    let completion = interpreter.invoke(token, vec![])?;
    assert_eq!(completion, Completion::Returned(None));
    Ok(())
}

#[test]
fn test_parallel_weaving() -> Result<()> {
    let mut batch = Vec::new();
    for _ in 0..4 {
        let (module, _, candidate) = compute_module()?;
        batch.push((module, vec![candidate]));
    }

    let woven = weave_modules(&mut batch, &WeaverConfig::default());
    assert!(woven.is_clean());
    assert_eq!(woven.reports.len(), 4);
    assert_eq!(woven.events.count(EventKind::CandidateWoven), 4);
    assert_eq!(woven.events.count(EventKind::ArtifactReused), 3);
    assert_eq!(woven.events.count(EventKind::Info), 4);
    for report in woven.reports {
        assert_eq!(report?.woven.len(), 1);
    }

    for (module, candidates) in &batch {
        let mut runtime = HostRuntime::new().with_interceptor(DOUBLE, doubling());
        let mut interpreter = Interpreter::new(module, &mut runtime);
        let completion =
            interpreter.invoke(candidates[0].method, vec![Value::Null, Value::I4(5), Value::I4(1)])?;
        assert_eq!(completion.returned(), Some(&Value::I4(11)));
    }
    Ok(())
}
