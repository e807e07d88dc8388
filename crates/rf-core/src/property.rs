//! Result of checking one property, and the trait checkers implement.

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of one property check.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyResult {
    /// Human-readable property, e.g. `data1 == 16`
    pub property: String,
    pub passed: bool,
    /// Why it failed
    pub message: Option<String>,
    #[serde(skip)]
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    pub fn pass(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            passed: true,
            message: None,
            counterexample: None,
        }
    }

    pub fn fail(
        property: impl Into<String>,
        message: impl Into<String>,
        counterexample: Option<Counterexample>,
    ) -> Self {
        Self {
            property: property.into(),
            passed: false,
            message: Some(message.into()),
            counterexample,
        }
    }

    /// One-line status.
    #[must_use]
    pub fn format_status(&self) -> String {
        match (&self.message, self.passed) {
            (_, true) => format!("[PASS] {}", self.property),
            (Some(msg), false) => format!("[FAIL] {}: {}", self.property, msg),
            (None, false) => format!("[FAIL] {}", self.property),
        }
    }
}

/// Anything that can check a set of properties.
pub trait PropertyChecker {
    fn check_all(&self) -> Vec<PropertyResult>;

    /// First failing property, if any.
    fn first_violation(&self) -> Option<PropertyResult> {
        self.check_all().into_iter().find(|r| !r.passed)
    }

    fn all_passed(&self) -> bool {
        self.check_all().iter().all(|r| r.passed)
    }
}
