//! Run-level failures.
//!
//! Every one of these is fatal to the scenario run that produced it. The
//! harness reports them as a typed value; only the process entry turns them
//! into an abort.

use rf_core::InputError;
use serde::Serialize;
use thiserror::Error;

use crate::sync::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// The post-join predicate did not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A role did not finish within the join timeout.
    #[error("roles {pending:?} did not finish within {timeout_ms} ms (deadlock or lost wakeup)")]
    Hang { pending: Vec<String>, timeout_ms: u64 },

    #[error("role '{role}' misused a primitive: {source}")]
    Misuse {
        role: String,
        #[source]
        source: SyncError,
    },

    #[error("role '{role}' panicked: {message}")]
    RolePanicked { role: String, message: String },

    #[error("nested scenario '{scenario}' failed: {source}")]
    Nested {
        scenario: String,
        #[source]
        source: Box<FatalError>,
    },

    #[error("could not spawn role '{role}': {message}")]
    Spawn { role: String, message: String },

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Discriminant of a [`FatalError`], for reports and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    InvariantViolation,
    Hang,
    Misuse,
    RolePanicked,
    Nested,
    Spawn,
    Input,
    Unsupported,
}

impl FatalError {
    pub fn kind(&self) -> FatalKind {
        match self {
            Self::InvariantViolation(_) => FatalKind::InvariantViolation,
            Self::Hang { .. } => FatalKind::Hang,
            Self::Misuse { .. } => FatalKind::Misuse,
            Self::RolePanicked { .. } => FatalKind::RolePanicked,
            Self::Nested { .. } => FatalKind::Nested,
            Self::Spawn { .. } => FatalKind::Spawn,
            Self::Input(_) => FatalKind::Input,
            Self::Unsupported(_) => FatalKind::Unsupported,
        }
    }

    /// Innermost cause, following nested scenario failures.
    pub fn root(&self) -> &FatalError {
        match self {
            Self::Nested { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_follows_nesting() {
        let inner = FatalError::InvariantViolation("num == 1".into());
        let outer = FatalError::Nested {
            scenario: "sync02".into(),
            source: Box::new(FatalError::Nested {
                scenario: "inner".into(),
                source: Box::new(inner.clone()),
            }),
        };
        assert_eq!(outer.kind(), FatalKind::Nested);
        assert_eq!(outer.root(), &inner);
        assert_eq!(outer.root().kind(), FatalKind::InvariantViolation);
    }

    #[test]
    fn test_display() {
        let hang = FatalError::Hang {
            pending: vec!["t1".into(), "t2".into()],
            timeout_ms: 5000,
        };
        assert_eq!(
            hang.to_string(),
            "roles [\"t1\", \"t2\"] did not finish within 5000 ms (deadlock or lost wakeup)"
        );
    }
}
