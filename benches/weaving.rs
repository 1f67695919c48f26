//! Benchmarks for the weaving pass.
//!
//! Measures the cost of:
//! - Signature fingerprinting and trivial body detection
//! - Exit path normalization of a multi-exit body
//! - Weaving a single candidate with method and parameter interceptors
//! - Weaving several modules in parallel with a shared artifact cache
//! - Executing a woven method in the interpreter

extern crate cilweave;

use cilweave::{
    prelude::*,
    weaver::InterceptorRole,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;

const TRACE: &str = "Demo.TraceAttribute";
const CHECK: &str = "Demo.NotNullAttribute";

fn classify(attribute: &CustomAttribute) -> Option<InterceptorRole> {
    match attribute.attribute_type() {
        TRACE => Some(InterceptorRole::Method(Capabilities::all())),
        CHECK => Some(InterceptorRole::Parameter),
        _ => None,
    }
}

/// `int Demo.Calculator::Clamp([NotNull] int value, int low, int high)` with three exits.
fn clamp() -> MethodBuilder {
    MethodBuilder::new("Demo.Calculator", "Clamp")
        .param("value", TypeSig::I4)
        .param_attribute(CustomAttribute::new(MemberRef::constructor(CHECK, vec![])))
        .param("low", TypeSig::I4)
        .param("high", TypeSig::I4)
        .returns(TypeSig::I4)
        .attribute(CustomAttribute::new(MemberRef::constructor(TRACE, vec![])))
        .implementation(|asm| {
            asm.ldarg_1()?
                .ldarg_2()?
                .blt("low")?
                .ldarg_1()?
                .ldarg(3)?
                .bgt("high")?
                .ldarg_1()?
                .ret()?
                .label("low")?
                .ldarg_2()?
                .ret()?
                .label("high")?
                .ldarg(3)?
                .ret()?;
            Ok(())
        })
}

fn module(name: &str) -> (ModuleDef, Vec<Candidate>) {
    let mut module = ModuleDef::new(name);
    import_contract(&mut module);
    let token = clamp().add_to(&mut module).unwrap();
    let candidates = Candidate::discover(module.method(token).unwrap(), classify)
        .into_iter()
        .collect();
    (module, candidates)
}

/// Benchmark fingerprinting and trivial detection.
fn bench_signature_analysis(c: &mut Criterion) {
    let method = clamp().build().unwrap();

    c.bench_function("analysis_fingerprint", |b| {
        b.iter(|| black_box(SignatureAnalyzer::new(black_box(&method)).fingerprint()));
    });
    c.bench_function("analysis_is_trivial", |b| {
        b.iter(|| black_box(SignatureAnalyzer::new(black_box(&method)).is_trivial()));
    });
}

/// Benchmark rewriting three exits into one.
fn bench_normalize_exits(c: &mut Criterion) {
    let method = clamp().build().unwrap();
    let body = method.body.clone().unwrap();

    c.bench_function("normalize_three_exits", |b| {
        b.iter_batched(
            || body.clone(),
            |mut body| {
                let exit = ExitPathNormalizer::new(&mut body, &method.returns)
                    .normalize()
                    .unwrap();
                black_box(exit)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark weaving one candidate into a fresh module.
fn bench_weave_candidate(c: &mut Criterion) {
    c.bench_function("weave_single_candidate", |b| {
        b.iter_batched(
            || module("Demo.dll"),
            |(mut module, candidates)| {
                let mut session = WeavingSession::new(&mut module, WeaverConfig::default()).unwrap();
                session.weave_all(&candidates).unwrap();
                black_box(session.finish())
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark parallel weaving of independent modules.
fn bench_weave_modules(c: &mut Criterion) {
    let config = WeaverConfig::default();

    c.bench_function("weave_modules_16", |b| {
        b.iter_batched(
            || {
                (0..16)
                    .map(|i| module(&format!("Demo{i}.dll")))
                    .collect::<Vec<_>>()
            },
            |mut modules| black_box(weave_modules(&mut modules, &config)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark running the woven method with recording-only interceptors.
fn bench_execute_woven(c: &mut Criterion) {
    let (mut module, candidates) = module("Demo.dll");
    let mut session = WeavingSession::new(&mut module, WeaverConfig::default()).unwrap();
    session.weave_all(&candidates).unwrap();
    let token = session.finish().woven[0];

    c.bench_function("execute_woven_clamp", |b| {
        b.iter(|| {
            let mut runtime = HostRuntime::new();
            let mut interpreter = Interpreter::new(&module, &mut runtime);
            let completion = interpreter
                .invoke(
                    token,
                    vec![Value::Null, Value::I4(42), Value::I4(0), Value::I4(10)],
                )
                .unwrap();
            black_box(completion)
        });
    });
}

criterion_group!(
    benches,
    bench_signature_analysis,
    bench_normalize_exits,
    bench_weave_candidate,
    bench_weave_modules,
    bench_execute_woven
);
criterion_main!(benches);
