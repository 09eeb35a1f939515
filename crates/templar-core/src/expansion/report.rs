//! Validation reporting
//!
//! Collects warnings from parsing, component lookup, and marker checks into
//! a single ordered report attached to the expansion result. Pure
//! aggregation; inputs are never mutated.

/// Accumulates validation warnings in encounter order
#[derive(Debug, Clone, Default)]
pub struct ValidationReporter {
    warnings: Vec<String>,
}

impl ValidationReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record a batch of warnings, preserving their order
    pub fn extend<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.warnings.extend(messages.into_iter().map(Into::into));
    }

    /// Whether any warnings have been recorded
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Number of warnings recorded so far
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Finalize into a report
    ///
    /// By default warnings never fail validation; only a strict-mode abort
    /// does (and an abort returns an error instead of a report). Callers that
    /// configure warnings as fatal pass `fail_on_warnings = true`.
    pub fn into_report(self, fail_on_warnings: bool) -> ValidationReport {
        let passed = !(fail_on_warnings && !self.warnings.is_empty());
        ValidationReport {
            passed,
            warnings: self.warnings,
        }
    }
}

/// Final validation outcome for one expansion
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Overall pass/fail
    pub passed: bool,
    /// Human-readable warnings, in encounter order
    pub warnings: Vec<String>,
}
