//! Final-state invariants and the checker that evaluates them after join.
//!
//! | Clause | Holds when |
//! |--------|------------|
//! | `Equals` | counter equals a constant |
//! | `SumEquals` | sum of several counters equals a constant |
//! | `WithinBounds` | every value the counter ever held lies in `[low, high]` |
//! | `All` | every sub-clause holds |
//! | `Implies` | the inputs fail the condition, or the sub-clause holds |
//!
//! The checker reads the snapshot exactly once per clause and never retries.
//! A failing clause is the primary signal a fixture exists to produce.

use crate::counterexample::{Counterexample, StateSnapshot};
use crate::inputs::{Condition, Inputs};
use crate::property::{PropertyChecker, PropertyResult};
use crate::state::{FieldId, FinalState};

/// Predicate over the final counters (and inputs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invariant {
    Equals { field: FieldId, value: i64 },
    SumEquals { fields: Vec<FieldId>, value: i64 },
    WithinBounds { field: FieldId, low: i64, high: i64 },
    All(Vec<Invariant>),
    Implies { when: Condition, then: Box<Invariant> },
}

impl Invariant {
    pub fn equals(field: FieldId, value: i64) -> Self {
        Self::Equals { field, value }
    }

    pub fn sum_equals(fields: &[FieldId], value: i64) -> Self {
        Self::SumEquals {
            fields: fields.to_vec(),
            value,
        }
    }

    pub fn within_bounds(field: FieldId, low: i64, high: i64) -> Self {
        debug_assert!(low <= high, "empty bounds [{}, {}]", low, high);
        Self::WithinBounds { field, low, high }
    }

    pub fn all(clauses: Vec<Invariant>) -> Self {
        Self::All(clauses)
    }

    pub fn implies(when: Condition, then: Invariant) -> Self {
        Self::Implies {
            when,
            then: Box::new(then),
        }
    }

    /// Every counter the invariant reads.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldId> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields(&self, out: &mut Vec<FieldId>) {
        match self {
            Self::Equals { field, .. } | Self::WithinBounds { field, .. } => out.push(*field),
            Self::SumEquals { fields, .. } => out.extend_from_slice(fields),
            Self::All(clauses) => clauses.iter().for_each(|c| c.collect_fields(out)),
            Self::Implies { then, .. } => then.collect_fields(out),
        }
    }

    /// Every condition the invariant evaluates.
    #[must_use]
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            Self::All(clauses) => clauses.iter().flat_map(|c| c.conditions()).collect(),
            Self::Implies { when, then } => {
                let mut out = vec![when];
                out.extend(then.conditions());
                out
            }
            _ => Vec::new(),
        }
    }

    /// Render against the counter names in `state`.
    #[must_use]
    pub fn describe(&self, state: &FinalState) -> String {
        match self {
            Self::Equals { field, value } => format!("{} == {}", state.name(*field), value),
            Self::SumEquals { fields, value } => {
                let names: Vec<&str> = fields.iter().map(|f| state.name(*f)).collect();
                format!("{} == {}", names.join(" + "), value)
            }
            Self::WithinBounds { field, low, high } => {
                format!("{} <= {} <= {} (always)", low, state.name(*field), high)
            }
            Self::All(clauses) => {
                let parts: Vec<String> = clauses.iter().map(|c| c.describe(state)).collect();
                parts.join(" && ")
            }
            Self::Implies { when, then } => format!("{} => {}", when, then.describe(state)),
        }
    }
}

/// Evaluates an [`Invariant`] over a joined run's final state.
pub struct InvariantChecker<'a> {
    invariant: &'a Invariant,
    state: &'a FinalState,
    inputs: &'a Inputs,
    dst_seed: Option<u64>,
}

impl<'a> InvariantChecker<'a> {
    #[must_use]
    pub fn new(invariant: &'a Invariant, state: &'a FinalState, inputs: &'a Inputs) -> Self {
        Self {
            invariant,
            state,
            inputs,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    /// `true` when every clause holds.
    #[must_use]
    pub fn check(&self) -> bool {
        self.all_passed()
    }

    fn counterexample(&self, description: String) -> Counterexample {
        let mut ce = match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        ce.add_state(StateSnapshot {
            step: 1,
            description: self.state.to_string(),
            variables: self
                .state
                .counters
                .iter()
                .map(|c| (c.name.clone(), c.value.to_string()))
                .collect(),
        });
        ce.with_description(description)
    }

    fn fail(&self, property: String, message: String) -> PropertyResult {
        let ce = self.counterexample(format!("{} violated: {}", property, message));
        PropertyResult::fail(property, message, Some(ce))
    }

    fn evaluate(&self, invariant: &Invariant) -> PropertyResult {
        let property = invariant.describe(self.state);
        match invariant {
            Invariant::Equals { field, value } => match self.state.value(*field) {
                Some(actual) if actual == *value => PropertyResult::pass(property),
                Some(actual) => {
                    let msg = format!("{} = {}", self.state.name(*field), actual);
                    self.fail(property, msg)
                }
                None => self.fail(property, format!("no counter with id {:?}", field)),
            },
            Invariant::SumEquals { fields, value } => {
                let actual = self.state.sum(fields);
                if actual == *value {
                    PropertyResult::pass(property)
                } else {
                    let parts: Vec<String> = fields
                        .iter()
                        .map(|f| {
                            format!(
                                "{} = {}",
                                self.state.name(*f),
                                self.state.value(*f).unwrap_or_default()
                            )
                        })
                        .collect();
                    self.fail(property, format!("sum = {} ({})", actual, parts.join(", ")))
                }
            }
            Invariant::WithinBounds { field, low, high } => match self.state.get(*field) {
                Some(c) if c.low >= *low && c.high <= *high => PropertyResult::pass(property),
                Some(c) => self.fail(
                    property,
                    format!("{} ranged over [{}, {}]", c.name, c.low, c.high),
                ),
                None => self.fail(property, format!("no counter with id {:?}", field)),
            },
            Invariant::All(clauses) => clauses
                .iter()
                .map(|c| self.evaluate(c))
                .find(|r| !r.passed)
                .map_or_else(|| PropertyResult::pass(property.clone()), |failed| {
                    let msg = failed.message.unwrap_or_default();
                    self.fail(property.clone(), msg)
                }),
            Invariant::Implies { when, then } => {
                if !when.holds(self.inputs) {
                    return PropertyResult::pass(property);
                }
                let inner = self.evaluate(then);
                if inner.passed {
                    PropertyResult::pass(property)
                } else {
                    self.fail(property, inner.message.unwrap_or_default())
                }
            }
        }
    }
}

impl PropertyChecker for InvariantChecker<'_> {
    /// One result per top-level clause.
    fn check_all(&self) -> Vec<PropertyResult> {
        match self.invariant {
            Invariant::All(clauses) => clauses.iter().map(|c| self.evaluate(c)).collect(),
            other => vec![self.evaluate(other)],
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::state::{SharedState, StateLayout, Unobserved};

    fn stateful_state(d1: i64, d2: i64) -> (FinalState, FieldId, FieldId) {
        let mut layout = StateLayout::new();
        let a = layout.add("data1", d1);
        let b = layout.add("data2", d2);
        (SharedState::new(&layout).snapshot(), a, b)
    }

    #[test]
    fn test_equals_pass_and_fail() {
        let (state, a, b) = stateful_state(16, 5);
        let inv = Invariant::all(vec![Invariant::equals(a, 16), Invariant::equals(b, 5)]);
        let inputs = Inputs::none();
        assert!(InvariantChecker::new(&inv, &state, &inputs).check());

        let (state, _, _) = stateful_state(11, 5);
        let checker = InvariantChecker::new(&inv, &state, &inputs);
        assert!(!checker.check());
        let violation = checker.first_violation().unwrap();
        assert_eq!(violation.property, "data1 == 16");
        assert_eq!(violation.message.as_deref(), Some("data1 = 11"));
        assert!(violation.counterexample.is_some());
    }

    #[test]
    fn test_sum_equals_reports_parts() {
        let (state, a, b) = stateful_state(1, 0);
        let inv = Invariant::sum_equals(&[a, b], 2);
        let inputs = Inputs::none();
        let result = InvariantChecker::new(&inv, &state, &inputs)
            .first_violation()
            .unwrap();
        assert_eq!(result.message.as_deref(), Some("sum = 1 (data1 = 1, data2 = 0)"));
    }

    #[test]
    fn test_within_bounds_uses_watermarks() {
        let mut layout = StateLayout::new();
        let num = layout.add("num", 1);
        let live = SharedState::new(&layout);
        live.add(num, 1, &Unobserved);
        live.add(num, -1, &Unobserved);

        let state = live.snapshot();
        let inputs = Inputs::none();
        let inv = Invariant::within_bounds(num, 0, 1);
        let checker = InvariantChecker::new(&inv, &state, &inputs);
        assert!(!checker.check());
        assert_eq!(
            checker.first_violation().unwrap().message.as_deref(),
            Some("num ranged over [1, 2]")
        );
    }

    #[test]
    fn test_implies_is_vacuous_when_condition_fails() {
        let (state, _, b) = stateful_state(0, 0);
        let inv = Invariant::implies(
            Condition::not_positive("x").and(Condition::not_positive("y")),
            Invariant::equals(b, 1),
        );

        let positive = Inputs::from_pairs([("x", 1), ("y", -1)]);
        assert!(InvariantChecker::new(&inv, &state, &positive).check());

        let zero = Inputs::from_pairs([("x", 0), ("y", 0)]);
        let checker = InvariantChecker::new(&inv, &state, &zero);
        assert!(!checker.check());
        assert!(checker
            .first_violation()
            .unwrap()
            .property
            .starts_with("(x <= 0 && y <= 0) =>"));
    }

    #[test]
    fn test_fields_and_conditions() {
        let (_, a, b) = stateful_state(0, 0);
        let inv = Invariant::all(vec![
            Invariant::equals(b, 1),
            Invariant::implies(Condition::positive("x"), Invariant::sum_equals(&[a, b], 2)),
        ]);
        assert_eq!(inv.fields(), vec![a, b]);
        assert_eq!(inv.conditions().len(), 1);
    }
}
