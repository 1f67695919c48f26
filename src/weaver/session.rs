//! Weaving sessions: one module, many candidates.
//!
//! A [`WeavingSession`] resolves the hook contract once for its module, then weaves the
//! candidates it is handed one at a time, deciding for each whether it is skipped as
//! trivial, woven, or failed. Failures of a single candidate are reported and the pass
//! continues, unless the configuration asks to stop at the first one; a missing contract
//! always stops the pass.
//!
//! Conversion shapes are kept in an [`ArtifactCache`] keyed by signature fingerprint. The
//! cache is shared between sessions, so [`weave_modules`] can weave independent modules in
//! parallel while computing every shape once.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    analysis::SignatureAnalyzer,
    metadata::{MethodDef, ModuleDef, Token},
    weaver::{
        config::WeaverConfig,
        contract::HookContract,
        convert::SignatureShape,
        events::{EventKind, EventLog},
        interceptor::Candidate,
        method::{InterceptionWeaver, WovenMethod},
    },
    Error, Result,
};

/// Conversion shapes shared between sessions, keyed by signature fingerprint.
///
/// Distinct signatures can share a fingerprint, so each fingerprint keeps every shape
/// computed under it and a lookup only reuses the one computed for the same types.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    shapes: DashMap<String, Vec<Arc<SignatureShape>>>,
}

impl ArtifactCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shape of `method`'s signature and whether it was already cached.
    pub fn shape_for(&self, method: &MethodDef) -> (Arc<SignatureShape>, bool) {
        let fingerprint = SignatureAnalyzer::new(method).fingerprint();
        let mut bucket = self.shapes.entry(fingerprint.clone()).or_default();
        if let Some(shape) = bucket.iter().find(|shape| shape.fits(method)) {
            return (Arc::clone(shape), true);
        }

        if !bucket.is_empty() {
            log::debug!(
                "Fingerprint {} of {} collides with a different signature",
                fingerprint,
                method.full_name()
            );
        }
        let shape = Arc::new(SignatureShape::of(fingerprint, method));
        bucket.push(Arc::clone(&shape));
        (shape, false)
    }

    /// The cached shapes computed under `fingerprint`.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Vec<Arc<SignatureShape>> {
        self.shapes
            .get(fingerprint)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    /// Number of cached shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.iter().map(|bucket| bucket.value().len()).sum()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeaveOutcome {
    /// The method was rewritten.
    Woven(WovenMethod),
    /// The method body is trivial and was left alone.
    Skipped,
    /// The candidate could not be woven; the method is unchanged.
    Failed {
        /// Error description.
        reason: String,
    },
}

/// Summary of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeaveReport {
    /// Module name.
    pub module: String,
    /// Woven methods, in weaving order.
    pub woven: Vec<Token>,
    /// Methods skipped as trivial.
    pub skipped: Vec<Token>,
    /// Methods that failed, with the reason.
    pub failed: Vec<(Token, String)>,
}

impl WeaveReport {
    /// Number of candidates the session handled.
    #[must_use]
    pub fn total(&self) -> usize {
        self.woven.len() + self.skipped.len() + self.failed.len()
    }

    /// Returns `true` if no candidate failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Weaves the candidates of one module.
pub struct WeavingSession<'m> {
    module: &'m mut ModuleDef,
    config: WeaverConfig,
    contract: HookContract,
    cache: Arc<ArtifactCache>,
    events: EventLog,
    report: WeaveReport,
}

impl<'m> WeavingSession<'m> {
    /// Opens a session with a private artifact cache.
    ///
    /// # Errors
    /// Returns [`Error::ContractMissing`] if the module does not reference the hook contract
    pub fn new(module: &'m mut ModuleDef, config: WeaverConfig) -> Result<Self> {
        Self::with_cache(module, config, Arc::new(ArtifactCache::new()))
    }

    /// Opens a session sharing `cache` with other sessions.
    ///
    /// # Errors
    /// Returns [`Error::ContractMissing`] if the module does not reference the hook contract
    pub fn with_cache(
        module: &'m mut ModuleDef,
        config: WeaverConfig,
        cache: Arc<ArtifactCache>,
    ) -> Result<Self> {
        let contract = HookContract::resolve(&module.imports, &config.catch_type)?;
        let report = WeaveReport {
            module: module.name.clone(),
            ..WeaveReport::default()
        };

        Ok(WeavingSession {
            module,
            config,
            contract,
            cache,
            events: EventLog::new(),
            report,
        })
    }

    /// Weaves one candidate.
    ///
    /// # Errors
    /// Returns the candidate's error if it is fatal for the module or the session is
    /// configured to fail fast; otherwise failures are reported as [`WeaveOutcome::Failed`]
    pub fn weave(&mut self, candidate: &Candidate) -> Result<WeaveOutcome> {
        let token = candidate.method;
        let Some(method) = self.module.method(token) else {
            let error = Error::UnsupportedTarget {
                method: token.to_string(),
                reason: "method is not defined by the module".to_string(),
            };
            return self.fail(token, error);
        };

        if self.config.skip_trivial && method.has_body() && SignatureAnalyzer::new(method).is_trivial() {
            log::debug!("Skipping trivial method {}", method.full_name());
            self.events
                .record(EventKind::TrivialSkipped)
                .method(token)
                .message(method.full_name());
            self.report.skipped.push(token);
            return Ok(WeaveOutcome::Skipped);
        }

        let (shape, reused) = self.cache.shape_for(method);
        if reused {
            self.events
                .record(EventKind::ArtifactReused)
                .method(token)
                .message(shape.fingerprint.clone());
        }

        let Some((method, imports)) = self.module.split_method_mut(token) else {
            return Err(malformed_error!("Method {} disappeared during weaving", token));
        };
        let name = method.full_name();
        let result = InterceptionWeaver::new(method, imports, &self.contract, &self.config)
            .with_shape(shape)
            .with_events(&self.events)
            .weave(candidate);

        match result {
            Ok(woven) => {
                log::debug!(
                    "Wove {} interceptor(s) into {}",
                    woven.interceptors,
                    name
                );
                self.events
                    .record(EventKind::CandidateWoven)
                    .method(token)
                    .message(name);
                self.report.woven.push(token);
                Ok(WeaveOutcome::Woven(woven))
            }
            Err(error) => self.fail(token, error),
        }
    }

    fn fail(&mut self, token: Token, error: Error) -> Result<WeaveOutcome> {
        let reason = error.to_string();
        self.events
            .record(EventKind::CandidateFailed)
            .method(token)
            .message(reason.clone());

        if error.is_fatal_for_module() || self.config.fail_fast {
            return Err(error);
        }

        log::warn!("Skipping candidate {}: {}", token, reason);
        self.report.failed.push((token, reason.clone()));
        Ok(WeaveOutcome::Failed { reason })
    }

    /// Weaves every candidate in order.
    ///
    /// # Errors
    /// Stops at the first error [`WeavingSession::weave`] returns
    pub fn weave_all(&mut self, candidates: &[Candidate]) -> Result<()> {
        for candidate in candidates {
            self.weave(candidate)?;
        }
        Ok(())
    }

    /// The resolved hook contract.
    #[must_use]
    pub fn contract(&self) -> &HookContract {
        &self.contract
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The report so far.
    #[must_use]
    pub fn report(&self) -> &WeaveReport {
        &self.report
    }

    /// Closes the session and returns its report.
    #[must_use]
    pub fn finish(self) -> WeaveReport {
        self.into_parts().0
    }

    /// Closes the session and returns its report together with its events.
    #[must_use]
    pub fn into_parts(self) -> (WeaveReport, EventLog) {
        log::info!(
            "{}: {} woven, {} trivial, {} failed",
            self.report.module,
            self.report.woven.len(),
            self.report.skipped.len(),
            self.report.failed.len()
        );
        (self.report, self.events)
    }
}

/// Outcome of [`weave_modules`].
#[derive(Debug)]
pub struct BatchReport {
    /// One result per module, in input order.
    pub reports: Vec<Result<WeaveReport>>,
    /// Events of every session, grouped by module in input order. Each module closes with
    /// an `Info` summary, or an `Error` event if its pass was aborted.
    pub events: EventLog,
}

impl BatchReport {
    /// Returns `true` if every module was woven without a failed candidate.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reports
            .iter()
            .all(|report| report.as_ref().is_ok_and(WeaveReport::is_clean))
    }
}

/// Weaves independent modules in parallel, sharing one artifact cache.
pub fn weave_modules(
    modules: &mut [(ModuleDef, Vec<Candidate>)],
    config: &WeaverConfig,
) -> BatchReport {
    let cache = Arc::new(ArtifactCache::new());
    let outcomes: Vec<(Result<WeaveReport>, EventLog)> = modules
        .par_iter_mut()
        .map(|(module, candidates)| {
            let name = module.name.clone();
            let events = EventLog::new();
            let mut session =
                match WeavingSession::with_cache(module, config.clone(), Arc::clone(&cache)) {
                    Ok(session) => session,
                    Err(error) => {
                        events.error(format!("{name}: {error}"));
                        return (Err(error), events);
                    }
                };

            let woven = session.weave_all(candidates);
            let (report, session_events) = session.into_parts();
            events.merge(session_events);
            match woven {
                Ok(()) => {
                    events.info(format!(
                        "{}: {} woven, {} trivial, {} failed",
                        name,
                        report.woven.len(),
                        report.skipped.len(),
                        report.failed.len()
                    ));
                    (Ok(report), events)
                }
                Err(error) => {
                    events.error(format!("{name}: {error}"));
                    (Err(error), events)
                }
            }
        })
        .collect();

    let events = EventLog::new();
    let reports = outcomes
        .into_iter()
        .map(|(report, module_events)| {
            events.merge(module_events);
            report
        })
        .collect();
    BatchReport { reports, events }
}
