//! Per-run event log shared by both roles.
//!
//! Events are appended under one mutex, so the sequence numbers give a total
//! order that is consistent with what each role observed. The log is what
//! counterexamples are rendered from and what the hazard analysis below
//! inspects after a failing run.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::counterexample::Hazard;

/// Hard cap on recorded events per run. Later events are counted, not kept.
pub const TRACE_EVENTS_MAX: usize = 100_000;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StepStart { step: usize, label: String },
    BranchTaken { label: String, condition: String, taken: bool },
    Acquiring { lock: String },
    Acquired { lock: String },
    Released { lock: String },
    Waiting { condvar: String },
    Woken { condvar: String, wakeups: u64 },
    Signaled { condvar: String },
    Load { field: String, value: i64 },
    Store { field: String, value: i64 },
    NestedStart { scenario: String },
    NestedEnd { scenario: String, passed: bool },
    Finished,
}

impl EventKind {
    /// Short label used in diagrams.
    #[must_use]
    pub fn short(&self) -> String {
        match self {
            Self::StepStart { step, label } => format!("step {} {}", step, label),
            Self::BranchTaken { label, taken, .. } => {
                format!("{} {}", label, if *taken { "taken" } else { "skipped" })
            }
            Self::Acquiring { lock } => format!("lock({})…", lock),
            Self::Acquired { lock } => format!("lock({})", lock),
            Self::Released { lock } => format!("unlock({})", lock),
            Self::Waiting { condvar } => format!("wait({})", condvar),
            Self::Woken { condvar, .. } => format!("woken({})", condvar),
            Self::Signaled { condvar } => format!("signal({})", condvar),
            Self::Load { field, value } => format!("{} -> {}", field, value),
            Self::Store { field, value } => format!("{} := {}", field, value),
            Self::NestedStart { scenario } => format!("nested {}", scenario),
            Self::NestedEnd { scenario, passed } => {
                format!("nested {} {}", scenario, if *passed { "ok" } else { "FAILED" })
            }
            Self::Finished => "done".to_string(),
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Position in the run's total order, starting at 1.
    pub seq: u64,
    /// Index of the role that produced the event.
    pub role: usize,
    pub kind: EventKind,
}

#[derive(Default)]
struct TraceInner {
    events: Vec<TraceEvent>,
    dropped_count: u64,
}

/// Append-only event log.
#[derive(Default)]
pub struct Trace {
    inner: Mutex<TraceInner>,
}

impl Trace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, role: usize, kind: EventKind) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.events.len() >= TRACE_EVENTS_MAX {
            inner.dropped_count += 1;
            return;
        }
        let seq = inner.events.len() as u64 + 1;
        inner.events.push(TraceEvent { seq, role, kind });
    }

    /// Copy of all recorded events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped_count
    }
}

/// Find stores that overwrote another role's store made after this role's
/// load of the same field: the signature of a lost update.
#[must_use]
pub fn lost_updates(events: &[TraceEvent]) -> Vec<Hazard> {
    let mut hazards = Vec::new();

    for (i, event) in events.iter().enumerate() {
        let EventKind::Store { field, value } = &event.kind else {
            continue;
        };

        // Latest load of the same field by the same role before this store.
        let load = events[..i].iter().rev().find_map(|e| match &e.kind {
            EventKind::Load { field: f, value: v } if e.role == event.role && f == field => {
                Some((e.seq, *v))
            }
            _ => None,
        });
        let Some((load_seq, loaded)) = load else {
            continue;
        };

        let clobbered = events[..i].iter().rev().find(|e| {
            e.seq > load_seq
                && e.role != event.role
                && matches!(&e.kind, EventKind::Store { field: f, .. } if f == field)
        });
        if let Some(other) = clobbered {
            let overwritten_value = match &other.kind {
                EventKind::Store { value, .. } => *value,
                _ => unreachable!("filtered to stores"),
            };
            hazards.push(Hazard::LostUpdate {
                field: field.clone(),
                role: event.role,
                stale_value: loaded,
                stored_value: *value,
                overwritten_role: other.role,
                overwritten_value,
                seq: event.seq,
            });
        }
    }

    hazards
}

/// Roles whose last event shows them blocked on a lock or condition variable.
#[must_use]
pub fn blocked_roles(events: &[TraceEvent], roles_count: usize) -> Vec<Hazard> {
    let mut hazards = Vec::new();

    for role in 0..roles_count {
        let last = events.iter().rev().find(|e| e.role == role);
        match last.map(|e| (&e.kind, e.seq)) {
            Some((EventKind::Acquiring { lock }, seq)) => hazards.push(Hazard::BlockedOnLock {
                role,
                lock: lock.clone(),
                seq,
            }),
            Some((EventKind::Waiting { condvar }, seq)) => {
                hazards.push(Hazard::BlockedOnCondvar {
                    role,
                    condvar: condvar.clone(),
                    seq,
                });
            }
            _ => {}
        }
    }

    hazards
}
