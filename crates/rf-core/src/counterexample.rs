//! Counterexample representation and rendering.
//!
//! When a scenario fails, the counterexample shows the interleaving of the
//! two roles that led there, the counter values along the way, and any
//! hazards the trace analysis found.

use std::fmt;

use serde::Serialize;

use crate::trace::{EventKind, TraceEvent};

/// A counterexample showing the failure path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counterexample {
    /// Counter values after each store
    pub states: Vec<StateSnapshot>,
    /// Role interleaving that led to the failure
    pub interleaving: Vec<ThreadAction>,
    /// Hazards found in the trace
    pub hazards: Vec<Hazard>,
    /// Role names, indexed by role
    pub role_names: Vec<String>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Human-readable description of the failure
    pub description: Option<String>,
}

/// Snapshot of a counter at a point in the run.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    /// Trace sequence number
    pub step: u64,
    pub description: String,
    pub variables: Vec<(String, String)>,
}

/// Action taken by one role.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadAction {
    pub thread_id: usize,
    /// Trace sequence number
    pub step: u64,
    pub action: String,
    pub success: bool,
}

/// Concurrency hazard found in a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "hazard", rename_all = "snake_case")]
pub enum Hazard {
    /// A role stored a value computed from a stale load, discarding a store
    /// the other role made in between.
    LostUpdate {
        field: String,
        role: usize,
        stale_value: i64,
        stored_value: i64,
        overwritten_role: usize,
        overwritten_value: i64,
        seq: u64,
    },
    /// A role's last event was an attempt to take a lock.
    BlockedOnLock { role: usize, lock: String, seq: u64 },
    /// A role's last event was a condition-variable wait.
    BlockedOnCondvar { role: usize, condvar: String, seq: u64 },
}

impl Counterexample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Build from a recorded trace. Every event becomes an action, every store
    /// also becomes a state snapshot.
    #[must_use]
    pub fn from_trace(events: &[TraceEvent], role_names: &[String]) -> Self {
        let mut ce = Self::new();
        ce.role_names = role_names.to_vec();

        for event in events {
            let success = !matches!(
                event.kind,
                EventKind::NestedEnd { passed: false, .. }
            );
            ce.add_action(ThreadAction {
                thread_id: event.role,
                step: event.seq,
                action: event.kind.short(),
                success,
            });
            if let EventKind::Store { field, value } = &event.kind {
                ce.add_state(StateSnapshot {
                    step: event.seq,
                    description: format!("{}={}", field, value),
                    variables: vec![(field.clone(), value.to_string())],
                });
            }
        }

        ce
    }

    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    #[must_use]
    pub fn with_dst_seed(mut self, seed: Option<u64>) -> Self {
        self.dst_seed = seed;
        self
    }

    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    pub fn add_hazard(&mut self, hazard: Hazard) {
        self.hazards.push(hazard);
    }

    fn role_label(&self, role: usize) -> String {
        match self.role_names.get(role) {
            Some(name) => format!("{} ({})", role, name),
            None => format!("Thread {}", role),
        }
    }

    /// Render the counterexample as a human-readable thread diagram.
    ///
    /// Format:
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | 0 (thread1)      | 1 (thread2)      | State
    /// -----|------------------|------------------|------
    ///   12 | data4 -> -1      |                  |
    ///   13 |                  | data4 -> -1      |
    ///   14 |                  | data4 := 0       | data4=0
    ///   15 | data4 := 0       |                  | data4=0
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        const COLUMN_WIDTH: usize = 18;
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<usize> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" {:<w$} |", self.role_label(*tid), w = COLUMN_WIDTH));
            }
            output.push_str(" State\n");

            output.push_str("-----|");
            for _ in &threads {
                output.push_str(&format!("{}|", "-".repeat(COLUMN_WIDTH + 2)));
            }
            output.push_str("------\n");

            for action in &self.interleaving {
                output.push_str(&format!("{:4} |", action.step));
                for tid in &threads {
                    if *tid == action.thread_id {
                        let status = if action.success { "" } else { " [FAIL]" };
                        let cell = format!("{}{}", action.action, status);
                        output.push_str(&format!(" {:<w$} |", cell, w = COLUMN_WIDTH));
                    } else {
                        output.push_str(&format!(" {:<w$} |", "", w = COLUMN_WIDTH));
                    }
                }
                if let Some(state) = self.states.iter().find(|s| s.step == action.step) {
                    output.push_str(&format!(" {}", state.description));
                }
                output.push('\n');
            }
        }

        if !self.hazards.is_empty() {
            output.push_str("\nHazards:\n");
            for hazard in &self.hazards {
                output.push_str(&format!("  - {}\n", hazard));
            }
        }

        output
    }
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hazard::LostUpdate {
                field,
                role,
                stale_value,
                stored_value,
                overwritten_role,
                overwritten_value,
                seq,
            } => write!(
                f,
                "Lost update: role {} stored {}={} from stale read {} at step {}, discarding {} written by role {}",
                role, field, stored_value, stale_value, seq, overwritten_value, overwritten_role
            ),
            Hazard::BlockedOnLock { role, lock, seq } => {
                write!(f, "Role {} blocked acquiring '{}' since step {}", role, lock, seq)
            }
            Hazard::BlockedOnCondvar { role, condvar, seq } => write!(
                f,
                "Role {} blocked waiting on '{}' since step {}",
                role, condvar, seq
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Trace;

    #[test]
    fn test_counterexample_creation() {
        let ce = Counterexample::new();
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
        assert!(ce.dst_seed.is_none());
    }

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
    }

    #[test]
    fn test_from_trace_and_render() {
        let trace = Trace::new();
        trace.record(0, EventKind::Load { field: "data4".into(), value: -1 });
        trace.record(1, EventKind::Load { field: "data4".into(), value: -1 });
        trace.record(1, EventKind::Store { field: "data4".into(), value: 0 });
        trace.record(0, EventKind::Store { field: "data4".into(), value: 0 });

        let names = vec!["thread1".to_string(), "thread2".to_string()];
        let mut ce = Counterexample::from_trace(&trace.events(), &names)
            .with_dst_seed(Some(42))
            .with_description("data4 == 1 violated: data4 = 0".to_string());
        for hazard in crate::trace::lost_updates(&trace.events()) {
            ce.add_hazard(hazard);
        }

        assert_eq!(ce.interleaving.len(), 4);
        assert_eq!(ce.states.len(), 2);

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("0 (thread1)"));
        assert!(diagram.contains("data4 := 0"));
        assert!(diagram.contains("Lost update"));
    }

    #[test]
    fn test_render_empty() {
        let diagram = Counterexample::new().render_diagram();
        assert!(diagram.contains("no thread actions recorded"));
    }
}
