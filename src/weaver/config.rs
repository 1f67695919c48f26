//! Configuration for weaving sessions.

/// Fully qualified name of the exception type caught by default.
pub const DEFAULT_CATCH_TYPE: &str = "System.Exception";

/// Configuration for a [`crate::weaver::WeavingSession`].
///
/// # Example
///
/// ```rust
/// use cilweave::weaver::WeaverConfig;
///
/// let config = WeaverConfig::strict().with_catch_type("System.IO.IOException");
/// assert!(config.fail_fast);
/// assert_eq!(config.catch_type, "System.IO.IOException");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaverConfig {
    /// Skip candidates whose body is a placeholder (default: true).
    pub skip_trivial: bool,

    /// Exception type the exception hooks are dispatched for (default: `System.Exception`).
    pub catch_type: String,

    /// Stop the module pass at the first failed candidate instead of skipping and
    /// reporting it (default: false). A missing hook contract always stops the pass.
    pub fail_fast: bool,

    /// Remove interceptor attributes from the woven method and its parameters (default: true).
    pub remove_consumed_metadata: bool,

    /// Emit a `nop` at the start of every protected range (default: true).
    pub emit_region_markers: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        WeaverConfig {
            skip_trivial: true,
            catch_type: DEFAULT_CATCH_TYPE.to_string(),
            fail_fast: false,
            remove_consumed_metadata: true,
            emit_region_markers: true,
        }
    }
}

impl WeaverConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops at the first failure and weaves trivial bodies as well.
    #[must_use]
    pub fn strict() -> Self {
        WeaverConfig {
            skip_trivial: false,
            fail_fast: true,
            ..Self::default()
        }
    }

    /// Keeps interceptor attributes in place and emits no region markers, leaving the
    /// smallest footprint on the module
    #[must_use]
    pub fn minimal() -> Self {
        WeaverConfig {
            remove_consumed_metadata: false,
            emit_region_markers: false,
            ..Self::default()
        }
    }

    /// Sets whether trivial bodies are skipped.
    #[must_use]
    pub fn with_skip_trivial(mut self, skip: bool) -> Self {
        self.skip_trivial = skip;
        self
    }

    /// Sets the caught exception type.
    #[must_use]
    pub fn with_catch_type(mut self, catch_type: impl Into<String>) -> Self {
        self.catch_type = catch_type.into();
        self
    }

    /// Sets whether the pass stops at the first failed candidate.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets whether consumed attributes are removed.
    #[must_use]
    pub fn with_remove_consumed_metadata(mut self, remove: bool) -> Self {
        self.remove_consumed_metadata = remove;
        self
    }

    /// Sets whether protected ranges start with a marker `nop`.
    #[must_use]
    pub fn with_region_markers(mut self, emit: bool) -> Self {
        self.emit_region_markers = emit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let default = WeaverConfig::default();
        assert!(default.skip_trivial);
        assert!(!default.fail_fast);
        assert!(default.remove_consumed_metadata);
        assert_eq!(default.catch_type, DEFAULT_CATCH_TYPE);

        let strict = WeaverConfig::strict();
        assert!(!strict.skip_trivial);
        assert!(strict.fail_fast);

        let minimal = WeaverConfig::minimal();
        assert!(!minimal.emit_region_markers);
        assert!(!minimal.remove_consumed_metadata);
    }

    #[test]
    fn test_builder_setters() {
        let config = WeaverConfig::new()
            .with_skip_trivial(false)
            .with_fail_fast(true)
            .with_region_markers(false);
        assert_eq!(
            config,
            WeaverConfig {
                skip_trivial: false,
                fail_fast: true,
                emit_region_markers: false,
                ..WeaverConfig::default()
            }
        );
    }
}
