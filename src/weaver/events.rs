//! Structured, append-only log of what a weaving pass did.
//!
//! Every session records one event per decision it takes: candidates woven, skipped or
//! failed, interceptors instantiated, attributes removed and signature artifacts reused
//! from the shared cache. The log is backed by a lock-free append-only vector, so it can be
//! shared by reference while events are recorded.
//!
//! # Usage
//!
//! ```rust
//! use cilweave::{metadata::Token, weaver::{EventKind, EventLog}};
//!
//! let events = EventLog::new();
//! events
//!     .record(EventKind::CandidateWoven)
//!     .method(Token::new(0x0600_0001))
//!     .message("2 interceptors");
//! events.warn("parameter 'b' is never read");
//!
//! assert_eq!(events.count(EventKind::CandidateWoven), 1);
//! assert!(events.has(EventKind::Warning));
//! ```

use std::fmt;

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::metadata::Token;

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum EventKind {
    /// A candidate's body was rewritten.
    CandidateWoven,
    /// A candidate was left alone because its body is a placeholder.
    TrivialSkipped,
    /// A candidate could not be woven and was skipped.
    CandidateFailed,
    /// Signature conversions were taken from the shared cache.
    ArtifactReused,
    /// An interceptor instance is created by the woven code.
    InterceptorInstantiated,
    /// A consumed interceptor attribute was removed.
    MetadataRemoved,
    /// Informational message.
    Info,
    /// Warning message.
    Warning,
    /// Error message.
    Error,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,
    /// Method the event concerns, if any.
    pub method: Option<Token>,
    /// Free-form detail.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Some(method) => write!(f, "[{}] {}: {}", self.kind, method, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Builds an event and appends it to its log when dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventBuilder<'_> {
    /// Sets the method the event concerns.
    pub fn method(mut self, token: Token) -> Self {
        if let Some(event) = self.event.as_mut() {
            event.method = Some(token);
        }
        self
    }

    /// Sets the event detail.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        if let Some(event) = self.event.as_mut() {
            event.message = message.into();
        }
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.log.events.push(event);
        }
    }
}

/// Thread-safe, append-only event log.
#[derive(Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording an event of kind `kind`; it is appended when the builder drops.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Some(Event {
                kind,
                method: None,
                message: String::new(),
            }),
        }
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.record(EventKind::Warning).message(message);
    }

    /// Records an error.
    pub fn error(&self, message: impl Into<String>) {
        self.record(EventKind::Error).message(message);
    }

    /// Appends every event of `other`, in order.
    pub fn merge(&self, other: EventLog) {
        for (_, event) in other.events.iter() {
            self.events.push(event.clone());
        }
    }

    /// Moves all events out, leaving the log empty.
    pub fn take(&mut self) -> EventLog {
        std::mem::take(self)
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().map(|(_, event)| event)
    }

    /// Events of one kind, in recording order.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |event| event.kind == kind)
    }

    /// Events concerning one method, in recording order.
    pub fn for_method(&self, method: Token) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |event| event.method == Some(method))
    }

    /// Number of events of one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Returns `true` if at least one event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// One line per event kind that occurred, with its count.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = EventKind::iter()
            .filter_map(|kind| {
                let count = self.count(kind);
                (count > 0).then(|| format!("{kind}: {count}"))
            })
            .collect();
        parts.join(", ")
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("events", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_on_drop() {
        let log = EventLog::new();
        {
            let _pending = log.record(EventKind::MetadataRemoved).method(Token::new(0x0600_0002));
            assert!(log.is_empty());
        }
        assert_eq!(log.len(), 1);
        let event = log.iter().next().cloned();
        assert_eq!(event.and_then(|e| e.method), Some(Token::new(0x0600_0002)));
    }

    #[test]
    fn test_merge_and_take() {
        let mut log = EventLog::new();
        log.info("first");

        let other = EventLog::new();
        other.warn("second");
        other.error("third");
        log.merge(other);

        let messages: Vec<&str> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "third"]);

        let taken = log.take();
        assert!(log.is_empty());
        assert_eq!(taken.len(), 3);
    }

    #[test]
    fn test_summary_and_filters() {
        let log = EventLog::new();
        let method = Token::new(0x0600_0001);
        log.record(EventKind::CandidateWoven).method(method);
        log.record(EventKind::ArtifactReused).method(method);
        log.record(EventKind::CandidateWoven);

        assert_eq!(log.count(EventKind::CandidateWoven), 2);
        assert_eq!(log.for_method(method).count(), 2);
        assert_eq!(log.summary(), "CandidateWoven: 2, ArtifactReused: 1");
        assert_eq!(
            log.iter().next().map(ToString::to_string),
            Some("[CandidateWoven] 0x06000001: ".to_string())
        );
    }
}
