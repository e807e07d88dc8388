//! Shared counter vector mutated by both roles of a scenario.
//!
//! Counters are atomics, but a mutation is a separate load and store, so an
//! unguarded read-modify-write can lose an update exactly like a plain `int`
//! would, without undefined behavior. Every access is reported to an
//! [`AccessObserver`], which is where tracing and forced interleavings hook
//! in.
//!
//! Each store also widens a low/high watermark so bounds can be checked once
//! both roles have joined.

#[cfg(loom)]
use loom::sync::atomic::{AtomicI64, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicI64, Ordering};

use std::fmt;

use serde::Serialize;

/// Index of a counter within a [`StateLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldId(usize);

impl FieldId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Names and initial values of the counters, fixed at definition time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateLayout {
    fields: Vec<(String, i64)>,
}

impl StateLayout {
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declare a counter. Returns its id.
    pub fn add(&mut self, name: impl Into<String>, initial: i64) -> FieldId {
        self.fields.push((name.into(), initial));
        FieldId(self.fields.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: FieldId) -> bool {
        field.0 < self.fields.len()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|(n, _)| n == name).map(FieldId)
    }

    /// Name of `field`. Panics if the id does not belong to this layout.
    #[must_use]
    pub fn name(&self, field: FieldId) -> &str {
        &self.fields[field.0].0
    }

    pub fn initial(&self, field: FieldId) -> i64 {
        self.fields[field.0].1
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }
}

/// Where in a counter access an observer is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPoint {
    BeforeLoad,
    AfterLoad(i64),
    BeforeStore(i64),
    AfterStore(i64),
}

/// Receives every counter access.
pub trait AccessObserver {
    fn on_access(&self, field: FieldId, point: AccessPoint);
}

/// Observer that ignores everything.
pub struct Unobserved;

impl AccessObserver for Unobserved {
    fn on_access(&self, _field: FieldId, _point: AccessPoint) {}
}

struct Counter {
    value: AtomicI64,
    low: AtomicI64,
    high: AtomicI64,
}

/// Live counters for one scenario run.
///
/// Created from a layout at the start of a run, dropped after the final
/// snapshot. Never shared across runs.
pub struct SharedState {
    names: Vec<String>,
    counters: Vec<Counter>,
}

impl SharedState {
    #[must_use]
    pub fn new(layout: &StateLayout) -> Self {
        let counters = layout
            .fields
            .iter()
            .map(|(_, init)| Counter {
                value: AtomicI64::new(*init),
                low: AtomicI64::new(*init),
                high: AtomicI64::new(*init),
            })
            .collect();
        Self {
            names: layout.fields.iter().map(|(n, _)| n.clone()).collect(),
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    #[must_use]
    pub fn name(&self, field: FieldId) -> &str {
        &self.names[field.0]
    }

    /// Observed load.
    pub fn load(&self, field: FieldId, observer: &dyn AccessObserver) -> i64 {
        observer.on_access(field, AccessPoint::BeforeLoad);
        let value = self.counters[field.0].value.load(Ordering::Relaxed);
        observer.on_access(field, AccessPoint::AfterLoad(value));
        value
    }

    /// Observed store. Widens the watermarks.
    pub fn store(&self, field: FieldId, value: i64, observer: &dyn AccessObserver) {
        observer.on_access(field, AccessPoint::BeforeStore(value));
        let counter = &self.counters[field.0];
        counter.value.store(value, Ordering::Relaxed);
        counter.low.fetch_min(value, Ordering::Relaxed);
        counter.high.fetch_max(value, Ordering::Relaxed);
        observer.on_access(field, AccessPoint::AfterStore(value));
    }

    /// Read-modify-write as a separate load and store. Not atomic on its own;
    /// callers that need atomicity hold a lock around it.
    pub fn add(&self, field: FieldId, delta: i64, observer: &dyn AccessObserver) -> i64 {
        let current = self.load(field, observer);
        let next = current.wrapping_add(delta);
        self.store(field, next, observer);
        next
    }

    /// Unobserved read, for condition-variable predicates.
    #[must_use]
    pub fn peek(&self, field: FieldId) -> i64 {
        self.counters[field.0].value.load(Ordering::Relaxed)
    }

    /// Copy out every counter with its watermarks.
    #[must_use]
    pub fn snapshot(&self) -> FinalState {
        let counters = self
            .names
            .iter()
            .zip(&self.counters)
            .map(|(name, c)| CounterValue {
                name: name.clone(),
                value: c.value.load(Ordering::Relaxed),
                low: c.low.load(Ordering::Relaxed),
                high: c.high.load(Ordering::Relaxed),
            })
            .collect();
        FinalState { counters }
    }
}

/// One counter in a [`FinalState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterValue {
    pub name: String,
    pub value: i64,
    /// Lowest value ever stored (or the initial value).
    pub low: i64,
    /// Highest value ever stored (or the initial value).
    pub high: i64,
}

/// Snapshot taken after both roles joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalState {
    pub counters: Vec<CounterValue>,
}

impl FinalState {
    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&CounterValue> {
        self.counters.get(field.0)
    }

    #[must_use]
    pub fn value(&self, field: FieldId) -> Option<i64> {
        self.get(field).map(|c| c.value)
    }

    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.counters.iter().find(|c| c.name == name).map(|c| c.value)
    }

    /// Name of `field`, or a placeholder for an id from another layout.
    #[must_use]
    pub fn name(&self, field: FieldId) -> &str {
        self.get(field).map_or("<unknown>", |c| c.name.as_str())
    }

    #[must_use]
    pub fn sum(&self, fields: &[FieldId]) -> i64 {
        fields
            .iter()
            .filter_map(|f| self.value(*f))
            .fold(0i64, i64::wrapping_add)
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", c.name, c.value)?;
        }
        Ok(())
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(FieldId, AccessPoint)>>);

    impl AccessObserver for Recorder {
        fn on_access(&self, field: FieldId, point: AccessPoint) {
            self.0.lock().unwrap().push((field, point));
        }
    }

    fn layout() -> (StateLayout, FieldId, FieldId) {
        let mut layout = StateLayout::new();
        let a = layout.add("data1", 10);
        let b = layout.add("data2", -1);
        (layout, a, b)
    }

    #[test]
    fn test_add_reports_load_then_store() {
        let (layout, a, _) = layout();
        let state = SharedState::new(&layout);
        let recorder = Recorder::default();

        assert_eq!(state.add(a, 5, &recorder), 15);

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (a, AccessPoint::BeforeLoad),
                (a, AccessPoint::AfterLoad(10)),
                (a, AccessPoint::BeforeStore(15)),
                (a, AccessPoint::AfterStore(15)),
            ]
        );
    }

    #[test]
    fn test_watermarks_track_extremes() {
        let (layout, a, _) = layout();
        let state = SharedState::new(&layout);

        state.add(a, 3, &Unobserved);
        state.add(a, -20, &Unobserved);
        state.add(a, 8, &Unobserved);

        let snap = state.snapshot();
        let counter = snap.get(a).unwrap();
        assert_eq!(counter.value, 1);
        assert_eq!(counter.low, -7);
        assert_eq!(counter.high, 13);
    }

    #[test]
    fn test_snapshot_names_and_sum() {
        let (layout, a, b) = layout();
        let state = SharedState::new(&layout);
        let snap = state.snapshot();

        assert_eq!(snap.value_of("data2"), Some(-1));
        assert_eq!(snap.sum(&[a, b]), 9);
        assert_eq!(snap.to_string(), "data1 = 10, data2 = -1");
        assert_eq!(layout.find("data2"), Some(b));
    }
}
