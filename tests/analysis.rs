//! Integration tests for signature analysis, exit normalization and session bookkeeping.

use std::sync::Arc;

use cilweave::{
    weaver::{InterceptorRole, OBJECT_TYPE},
    prelude::*,
};

const TRACE: &str = "Demo.TraceAttribute";
const CHECK: &str = "Demo.NotNullAttribute";

fn trace() -> CustomAttribute {
    CustomAttribute::new(MemberRef::constructor(TRACE, vec![]))
}

fn not_implemented() -> MemberRef {
    MemberRef::constructor("System.NotImplementedException", vec![])
}

fn classify(attribute: &CustomAttribute) -> Option<InterceptorRole> {
    match attribute.attribute_type() {
        TRACE => Some(InterceptorRole::Method(Capabilities::all())),
        CHECK => Some(InterceptorRole::Parameter),
        _ => None,
    }
}

/// `static int Demo.Math::Sign(int x)` with three exits.
fn sign() -> MethodBuilder {
    MethodBuilder::new("Demo.Math", "Sign")
        .static_method()
        .param("x", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(trace())
        .implementation(|asm| {
            asm.ldarg_0()?
                .ldc_i4_const(0)?
                .blt("negative")?
                .ldarg_0()?
                .brfalse("zero")?
                .ldc_i4_const(1)?
                .ret()?
                .label("negative")?
                .ldc_i4_const(-1)?
                .ret()?
                .label("zero")?
                .ldc_i4_const(0)?
                .ret()?;
            Ok(())
        })
}

fn contract_module() -> ModuleDef {
    let mut module = ModuleDef::new("Demo.dll");
    import_contract(&mut module);
    module
}

fn run_sign(module: &ModuleDef, token: Token, x: i32) -> Result<Option<Value>> {
    let mut runtime = HostRuntime::new();
    let mut interpreter = Interpreter::new(module, &mut runtime);
    let completion = interpreter.invoke(token, vec![Value::I4(x)])?;
    Ok(completion.returned().cloned())
}

#[test]
fn test_trivial_shapes() -> Result<()> {
    let empty = MethodBuilder::new("Demo.Shapes", "Empty")
        .implementation(|asm| {
            asm.ret()?;
            Ok(())
        })
        .build()?;
    let no_op = MethodBuilder::new("Demo.Shapes", "NoOp")
        .implementation(|asm| {
            asm.nop()?.ret()?;
            Ok(())
        })
        .build()?;
    let stub = MethodBuilder::new("Demo.Shapes", "Stub")
        .returns(TypeSig::I4)
        .implementation(|asm| {
            asm.newobj(not_implemented())?.throw()?;
            Ok(())
        })
        .build()?;
    let guard = MethodBuilder::new("Demo.Shapes", "Guard")
        .param("error", TypeSig::class("System.Exception"))
        .implementation(|asm| {
            asm.nop()?.ldarg_1()?.throw()?;
            Ok(())
        })
        .build()?;
    let abstract_method = MethodBuilder::new("Demo.Shapes", "Abstract")
        .abstract_method()
        .build()?;

    for method in [&empty, &no_op, &stub, &guard, &abstract_method] {
        assert!(
            SignatureAnalyzer::new(method).is_trivial(),
            "{} should be trivial",
            method.full_name()
        );
    }

    let second_param_guard = MethodBuilder::new("Demo.Shapes", "Rethrow")
        .param("message", TypeSig::String)
        .param("error", TypeSig::class("System.Exception"))
        .implementation(|asm| {
            asm.ldarg_2()?.throw()?;
            Ok(())
        })
        .build()?;
    assert!(!SignatureAnalyzer::new(&second_param_guard).is_trivial());
    assert!(!SignatureAnalyzer::new(&sign().build()?).is_trivial());
    Ok(())
}

#[test]
fn test_fingerprint_tracks_signature() -> Result<()> {
    let first = sign().build()?;
    let second = sign().build()?;
    assert_eq!(
        SignatureAnalyzer::new(&first).fingerprint(),
        SignatureAnalyzer::new(&second).fingerprint()
    );

    let widened = MethodBuilder::new("Demo.Math", "Sign")
        .static_method()
        .param("x", TypeSig::I8)
        .returns(TypeSig::I4)
        .implementation(|asm| {
            asm.ldc_i4_const(0)?.ret()?;
            Ok(())
        })
        .build()?;
    let generic = MethodBuilder::new("Demo.Math", "Sign")
        .static_method()
        .generic_param("T")
        .param("x", TypeSig::I4)
        .returns(TypeSig::I4)
        .implementation(|asm| {
            asm.ldc_i4_const(0)?.ret()?;
            Ok(())
        })
        .build()?;

    let fingerprint = SignatureAnalyzer::new(&first).fingerprint();
    assert_ne!(fingerprint, SignatureAnalyzer::new(&widened).fingerprint());
    assert_ne!(fingerprint, SignatureAnalyzer::new(&generic).fingerprint());
    assert!(fingerprint
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    Ok(())
}

#[test]
fn test_visibility_and_parameter_reads() -> Result<()> {
    let method = MethodBuilder::new("Demo.Account", "Deposit")
        .access(MethodAccessFlags::FAMILY)
        .param("amount", TypeSig::I4)
        .param("memo", TypeSig::String)
        .param("total", TypeSig::by_ref(TypeSig::I4))
        .implementation(|asm| {
            asm.ldarg(3)?.ldarg_1()?.pop()?.pop()?.ret()?;
            Ok(())
        })
        .build()?;

    let analyzer = SignatureAnalyzer::new(&method);
    assert_eq!(analyzer.visibility(), MethodAccessFlags::FAMILY);
    assert!(analyzer.reads_slot(0));
    assert!(!analyzer.reads_slot(1));
    assert!(analyzer.reads_slot(2));
    Ok(())
}

#[test]
fn test_normalized_exits_keep_behavior() -> Result<()> {
    let mut module = ModuleDef::new("Demo.dll");
    let token = sign().add_to(&mut module)?;

    let before: Vec<Option<Value>> = [-5, 0, 7]
        .into_iter()
        .map(|x| run_sign(&module, token, x))
        .collect::<Result<_>>()?;

    let method = module.method_mut(token).unwrap();
    let returns = method.returns.clone();
    let body = method.body.as_mut().unwrap();
    let exit = ExitPathNormalizer::new(body, &returns).normalize()?;

    assert_eq!(exit.replaced, 3);
    assert_eq!(body.last(), Some(exit.ret));
    assert_eq!(
        body.iter().filter(|(_, i)| i.opcode == Opcode::Ret).count(),
        1
    );

    let after: Vec<Option<Value>> = [-5, 0, 7]
        .into_iter()
        .map(|x| run_sign(&module, token, x))
        .collect::<Result<_>>()?;
    assert_eq!(before, after);
    assert_eq!(
        after,
        vec![Some(Value::I4(-1)), Some(Value::I4(0)), Some(Value::I4(1))]
    );
    Ok(())
}

#[test]
fn test_trivial_candidates_are_skipped() -> Result<()> {
    let mut module = contract_module();
    let token = MethodBuilder::new("Demo.Service", "Pending")
        .returns(TypeSig::I4)
        .attribute(trace())
        .implementation(|asm| {
            asm.newobj(not_implemented())?.throw()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let candidate = Candidate::discover(module.method(token).unwrap(), classify).unwrap();
    let original = module.method(token).unwrap().body.clone();

    let mut session = WeavingSession::new(&mut module, WeaverConfig::default())?;
    assert_eq!(session.weave(&candidate)?, WeaveOutcome::Skipped);
    assert_eq!(session.events().count(EventKind::TrivialSkipped), 1);
    let report = session.finish();
    assert_eq!(report.skipped, vec![token]);
    assert!(report.woven.is_empty());
    assert_eq!(module.method(token).unwrap().body, original);

    let mut session = WeavingSession::new(&mut module, WeaverConfig::strict())?;
    assert!(matches!(session.weave(&candidate)?, WeaveOutcome::Woven(_)));
    Ok(())
}

#[test]
fn test_unnormalizable_candidate_fails_alone() -> Result<()> {
    let mut module = contract_module();
    let forward = MemberRef::method("Demo.Service", "Target", vec![], TypeSig::Void, false);
    let jumping = MethodBuilder::new("Demo.Service", "Forward")
        .static_method()
        .attribute(trace())
        .implementation(move |asm| {
            asm.nop()?.jmp(forward)?;
            Ok(())
        })
        .add_to(&mut module)?;
    let signed = sign().add_to(&mut module)?;

    let candidates: Vec<Candidate> = [jumping, signed]
        .iter()
        .filter_map(|&token| Candidate::discover(module.method(token).unwrap(), classify))
        .collect();
    let original = module.method(jumping).unwrap().body.clone();

    let mut session = WeavingSession::new(&mut module, WeaverConfig::default())?;
    session.weave_all(&candidates)?;
    assert_eq!(session.events().count(EventKind::CandidateFailed), 1);
    assert_eq!(
        session
            .events()
            .for_method(jumping)
            .filter(|e| e.kind == EventKind::CandidateFailed)
            .count(),
        1
    );
    let report = session.finish();

    assert_eq!(report.woven, vec![signed]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, jumping);
    assert!(!report.is_clean());
    assert_eq!(module.method(jumping).unwrap().body, original);

    let config = WeaverConfig::default().with_fail_fast(true);
    let mut session = WeavingSession::new(&mut module, config)?;
    let error = session.weave(&candidates[0]).unwrap_err();
    assert!(matches!(error, Error::Structural { .. }));
    Ok(())
}

#[test]
fn test_missing_contract_is_fatal() -> Result<()> {
    let mut module = ModuleDef::new("Bare.dll");
    sign().add_to(&mut module)?;

    let Err(error) = WeavingSession::new(&mut module, WeaverConfig::default()) else {
        panic!("a module without the hook contract cannot open a session");
    };
    assert!(error.is_fatal_for_module());
    match error {
        Error::ContractMissing { type_name, member } => {
            assert_eq!(type_name, OBJECT_TYPE);
            assert_eq!(member, None);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_unread_parameter_is_reported() -> Result<()> {
    let mut module = contract_module();
    let token = MethodBuilder::new("Demo.Service", "Send")
        .param("target", TypeSig::String)
        .param("payload", TypeSig::Object)
        .param_attribute(CustomAttribute::new(MemberRef::constructor(CHECK, vec![])))
        .implementation(|asm| {
            asm.ldarg_1()?.pop()?.ret()?;
            Ok(())
        })
        .add_to(&mut module)?;
    let candidate = Candidate::discover(module.method(token).unwrap(), classify).unwrap();
    assert_eq!(candidate.parameter_interceptors().len(), 1);
    assert!(candidate.method_interceptors().is_empty());

    let mut session = WeavingSession::new(&mut module, WeaverConfig::default())?;
    assert!(matches!(session.weave(&candidate)?, WeaveOutcome::Woven(_)));

    let warnings: Vec<&str> = session
        .events()
        .of_kind(EventKind::Warning)
        .map(|e| e.message.as_str())
        .collect();
    assert_eq!(warnings, vec!["parameter 'payload' is never read"]);
    Ok(())
}

#[test]
fn test_sessions_share_signature_artifacts() -> Result<()> {
    let cache = Arc::new(ArtifactCache::new());
    let mut reused = Vec::new();

    for name in ["First.dll", "Second.dll"] {
        let mut module = ModuleDef::new(name);
        import_contract(&mut module);
        let token = sign().add_to(&mut module)?;
        let candidate = Candidate::discover(module.method(token).unwrap(), classify).unwrap();

        let mut session =
            WeavingSession::with_cache(&mut module, WeaverConfig::default(), Arc::clone(&cache))?;
        session.weave(&candidate)?;
        reused.push(session.events().count(EventKind::ArtifactReused));
    }

    assert_eq!(reused, vec![0, 1]);
    assert_eq!(cache.len(), 1);
    Ok(())
}
