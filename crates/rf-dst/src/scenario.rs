//! Scenario definitions and the builder that validates them.
//!
//! A scenario is pure data: a counter layout, named locks and condition
//! variables, declared input parameters, exactly two roles, one invariant and
//! an intent label. Nothing here runs threads; see [`crate::harness`].
//!
//! # Example
//!
//! ```rust
//! use rf_core::Invariant;
//! use rf_dst::{Intent, RoleDef, ScenarioBuilder};
//!
//! let mut b = ScenarioBuilder::new("counter");
//! let data = b.counter("data", 0);
//! let m = b.mutex("m");
//! b.intent(Intent::Correct)
//!     .role(RoleDef::new("inc").atomic(&[m], &[(data, 1)]))
//!     .role(RoleDef::new("dec").atomic(&[m], &[(data, -1)]))
//!     .invariant(Invariant::equals(data, 0));
//! let def = b.build().unwrap();
//! assert_eq!(def.roles().len(), 2);
//! ```

use std::collections::HashMap;
use std::fmt;

use rf_core::{Condition, FieldId, InputError, Inputs, Invariant, StateLayout};
use serde::Serialize;
use thiserror::Error;

use crate::role::{RoleDef, Step};

/// Index of a mutex within its scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(usize);

impl LockId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a condition variable within its scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CondvarId(usize);

impl CondvarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a scenario is meant to be race-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Correct,
    Racy,
    /// Racy exactly for the inputs satisfying `racy_when`.
    InputConditioned { racy_when: Condition },
}

impl Intent {
    /// Collapse to `Correct` or `Racy` for concrete inputs.
    #[must_use]
    pub fn resolve(&self, inputs: &Inputs) -> Intent {
        match self {
            Self::InputConditioned { racy_when } if racy_when.holds(inputs) => Self::Racy,
            Self::InputConditioned { .. } => Self::Correct,
            other => other.clone(),
        }
    }

    pub fn is_racy_for(&self, inputs: &Inputs) -> bool {
        self.resolve(inputs) == Self::Racy
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Correct => "intended-correct",
            Self::Racy => "intended-racy",
            Self::InputConditioned { .. } => "input-conditioned",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputConditioned { racy_when } => {
                write!(f, "{} (racy when {})", self.label(), racy_when)
            }
            _ => f.write_str(self.label()),
        }
    }
}

impl Serialize for Intent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A scenario that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("scenario name is empty")]
    EmptyName,

    #[error("scenario '{scenario}' has {found} roles, expected exactly 2")]
    RoleCount { scenario: String, found: usize },

    #[error("scenario '{scenario}' has no invariant")]
    MissingInvariant { scenario: String },

    #[error("scenario '{scenario}' declares {kind} '{name}' twice")]
    DuplicateName {
        scenario: String,
        kind: &'static str,
        name: String,
    },

    #[error("scenario '{scenario}': {context} refers to unknown {kind} #{index}")]
    UnknownId {
        scenario: String,
        context: String,
        kind: &'static str,
        index: usize,
    },

    #[error("scenario '{scenario}': {context} uses undeclared parameter '{param}'")]
    UnknownParam {
        scenario: String,
        context: String,
        param: String,
    },

    #[error("scenario '{scenario}': role '{role}' has an atomic step with no locks")]
    EmptyLockSet { scenario: String, role: String },

    #[error("scenario '{scenario}': role '{role}' takes lock '{lock}' twice in one step")]
    RepeatedLock {
        scenario: String,
        role: String,
        lock: String,
    },

    #[error("scenario '{scenario}': condvar '{condvar}' is waited on with both '{first}' and '{second}'")]
    CondvarPairing {
        scenario: String,
        condvar: String,
        first: String,
        second: String,
    },

    #[error("scenario '{scenario}': role '{role}' has handoff capacity {capacity}, expected >= 1")]
    InvalidCapacity {
        scenario: String,
        role: String,
        capacity: i64,
    },

    #[error("scenario '{scenario}': role '{role}' hands off with the same condvar for full and empty")]
    HandoffCondvars { scenario: String, role: String },
}

/// A validated, immutable scenario.
#[derive(Debug, Clone)]
pub struct ScenarioDef {
    name: String,
    description: String,
    intent: Intent,
    params: Vec<String>,
    layout: StateLayout,
    locks: Vec<String>,
    condvars: Vec<String>,
    roles: [RoleDef; 2],
    invariant: Invariant,
}

impl ScenarioDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    /// Declared parameter names, in positional order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn locks(&self) -> &[String] {
        &self.locks
    }

    pub fn condvars(&self) -> &[String] {
        &self.condvars
    }

    pub fn lock_name(&self, id: LockId) -> &str {
        &self.locks[id.0]
    }

    pub fn condvar_name(&self, id: CondvarId) -> &str {
        &self.condvars[id.0]
    }

    pub fn roles(&self) -> &[RoleDef; 2] {
        &self.roles
    }

    pub fn invariant(&self) -> &Invariant {
        &self.invariant
    }

    pub fn field(&self, name: &str) -> Option<FieldId> {
        self.layout.find(name)
    }

    pub fn lock(&self, name: &str) -> Option<LockId> {
        self.locks.iter().position(|l| l == name).map(LockId)
    }

    /// Bind positional values to the declared parameters.
    pub fn bind(&self, values: &[i64]) -> Result<Inputs, InputError> {
        Inputs::bind(&self.params, values)
    }
}

/// Accumulates a scenario, then validates it in [`ScenarioBuilder::build`].
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    name: String,
    description: String,
    intent: Option<Intent>,
    params: Vec<String>,
    layout: StateLayout,
    locks: Vec<String>,
    condvars: Vec<String>,
    roles: Vec<RoleDef>,
    invariant: Option<Invariant>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Defaults to `Correct` when never set.
    pub fn intent(&mut self, intent: Intent) -> &mut Self {
        self.intent = Some(intent);
        self
    }

    pub fn param(&mut self, name: impl Into<String>) -> &mut Self {
        self.params.push(name.into());
        self
    }

    pub fn counter(&mut self, name: impl Into<String>, initial: i64) -> FieldId {
        self.layout.add(name, initial)
    }

    pub fn mutex(&mut self, name: impl Into<String>) -> LockId {
        self.locks.push(name.into());
        LockId(self.locks.len() - 1)
    }

    pub fn condvar(&mut self, name: impl Into<String>) -> CondvarId {
        self.condvars.push(name.into());
        CondvarId(self.condvars.len() - 1)
    }

    pub fn role(&mut self, role: RoleDef) -> &mut Self {
        self.roles.push(role);
        self
    }

    pub fn invariant(&mut self, invariant: Invariant) -> &mut Self {
        self.invariant = Some(invariant);
        self
    }

    pub fn build(self) -> Result<ScenarioDef, DefinitionError> {
        let mut validator = Validator {
            scenario: &self.name,
            layout: &self.layout,
            locks: &self.locks,
            condvars: &self.condvars,
            params: &self.params,
            pairing: HashMap::new(),
        };
        validator.check_names()?;

        let intent = self.intent.clone().unwrap_or(Intent::Correct);
        if let Intent::InputConditioned { racy_when } = &intent {
            validator.check_condition(racy_when, "intent")?;
        }

        let invariant = self
            .invariant
            .clone()
            .ok_or_else(|| DefinitionError::MissingInvariant {
                scenario: self.name.clone(),
            })?;
        for field in invariant.fields() {
            validator.check_field(field, "invariant")?;
        }
        for condition in invariant.conditions() {
            validator.check_condition(condition, "invariant")?;
        }

        for role in &self.roles {
            validator.check_steps(role, &role.steps)?;
        }

        let found = self.roles.len();
        let roles: [RoleDef; 2] =
            self.roles
                .try_into()
                .map_err(|_| DefinitionError::RoleCount {
                    scenario: self.name.clone(),
                    found,
                })?;

        Ok(ScenarioDef {
            name: self.name,
            description: self.description,
            intent,
            params: self.params,
            layout: self.layout,
            locks: self.locks,
            condvars: self.condvars,
            roles,
            invariant,
        })
    }
}

struct Validator<'a> {
    scenario: &'a str,
    layout: &'a StateLayout,
    locks: &'a [String],
    condvars: &'a [String],
    params: &'a [String],
    /// condvar index -> lock index it is waited with
    pairing: HashMap<usize, usize>,
}

impl Validator<'_> {
    fn check_names(&self) -> Result<(), DefinitionError> {
        if self.scenario.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        let groups: [(&'static str, Vec<&str>); 4] = [
            ("counter", self.layout.names().collect()),
            ("mutex", self.locks.iter().map(String::as_str).collect()),
            ("condvar", self.condvars.iter().map(String::as_str).collect()),
            ("parameter", self.params.iter().map(String::as_str).collect()),
        ];
        for (kind, names) in groups {
            for (i, name) in names.iter().enumerate() {
                if names[..i].contains(name) {
                    return Err(DefinitionError::DuplicateName {
                        scenario: self.scenario.to_string(),
                        kind,
                        name: (*name).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn unknown(&self, context: &str, kind: &'static str, index: usize) -> DefinitionError {
        DefinitionError::UnknownId {
            scenario: self.scenario.to_string(),
            context: context.to_string(),
            kind,
            index,
        }
    }

    fn check_field(&self, field: FieldId, context: &str) -> Result<(), DefinitionError> {
        if self.layout.contains(field) {
            Ok(())
        } else {
            Err(self.unknown(context, "counter", field.index()))
        }
    }

    fn check_lock(&self, lock: LockId, context: &str) -> Result<(), DefinitionError> {
        if lock.0 < self.locks.len() {
            Ok(())
        } else {
            Err(self.unknown(context, "mutex", lock.0))
        }
    }

    fn check_condvar(&self, cv: CondvarId, context: &str) -> Result<(), DefinitionError> {
        if cv.0 < self.condvars.len() {
            Ok(())
        } else {
            Err(self.unknown(context, "condvar", cv.0))
        }
    }

    fn check_condition(&self, condition: &Condition, context: &str) -> Result<(), DefinitionError> {
        match condition
            .params()
            .into_iter()
            .find(|p| !self.params.iter().any(|d| d == p))
        {
            Some(param) => Err(DefinitionError::UnknownParam {
                scenario: self.scenario.to_string(),
                context: context.to_string(),
                param: param.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_lock_set(&self, role: &RoleDef, locks: &[LockId]) -> Result<(), DefinitionError> {
        if locks.is_empty() {
            return Err(DefinitionError::EmptyLockSet {
                scenario: self.scenario.to_string(),
                role: role.name.clone(),
            });
        }
        for (i, lock) in locks.iter().enumerate() {
            self.check_lock(*lock, &format!("role '{}'", role.name))?;
            if locks[..i].contains(lock) {
                return Err(DefinitionError::RepeatedLock {
                    scenario: self.scenario.to_string(),
                    role: role.name.clone(),
                    lock: self.locks[lock.0].clone(),
                });
            }
        }
        Ok(())
    }

    fn pair(&mut self, cv: CondvarId, lock: LockId) -> Result<(), DefinitionError> {
        let first = *self.pairing.entry(cv.0).or_insert(lock.0);
        if first == lock.0 {
            return Ok(());
        }
        Err(DefinitionError::CondvarPairing {
            scenario: self.scenario.to_string(),
            condvar: self.condvars[cv.0].clone(),
            first: self.locks[first].clone(),
            second: self.locks[lock.0].clone(),
        })
    }

    fn check_steps(&mut self, role: &RoleDef, steps: &[Step]) -> Result<(), DefinitionError> {
        let context = format!("role '{}'", role.name);
        for step in steps {
            match step {
                Step::Atomic {
                    locks, mutations, ..
                } => {
                    self.check_lock_set(role, locks)?;
                    for m in mutations {
                        self.check_field(m.field, &context)?;
                    }
                }
                Step::Unguarded { mutations } => {
                    for m in mutations {
                        self.check_field(m.field, &context)?;
                    }
                }
                Step::Handoff(h) => {
                    self.check_lock(h.lock, &context)?;
                    self.check_field(h.field, &context)?;
                    self.check_condvar(h.not_full, &context)?;
                    self.check_condvar(h.not_empty, &context)?;
                    if h.capacity < 1 {
                        return Err(DefinitionError::InvalidCapacity {
                            scenario: self.scenario.to_string(),
                            role: role.name.clone(),
                            capacity: h.capacity,
                        });
                    }
                    if h.not_full == h.not_empty {
                        return Err(DefinitionError::HandoffCondvars {
                            scenario: self.scenario.to_string(),
                            role: role.name.clone(),
                        });
                    }
                    self.pair(h.not_full, h.lock)?;
                    self.pair(h.not_empty, h.lock)?;
                }
                Step::Locked { locks, body } => {
                    self.check_lock_set(role, locks)?;
                    self.check_steps(role, body)?;
                }
                Step::Branch {
                    condition,
                    then,
                    otherwise,
                    ..
                } => {
                    self.check_condition(condition, &context)?;
                    self.check_steps(role, then)?;
                    self.check_steps(role, otherwise)?;
                }
                // Validated when it was built.
                Step::Nested { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{Handoff, HandoffDirection};

    fn two_roles(b: &mut ScenarioBuilder, lock: LockId, field: FieldId) {
        b.role(RoleDef::new("t1").atomic(&[lock], &[(field, 1)]))
            .role(RoleDef::new("t2").atomic(&[lock], &[(field, 1)]));
    }

    #[test]
    fn test_build_valid() {
        let mut b = ScenarioBuilder::new("ok");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        b.param("x").invariant(Invariant::equals(d, 2));
        two_roles(&mut b, m, d);

        let def = b.build().unwrap();
        assert_eq!(def.name(), "ok");
        assert_eq!(def.intent(), &Intent::Correct);
        assert_eq!(def.field("d"), Some(d));
        assert_eq!(def.lock("m"), Some(m));
        assert_eq!(def.lock_name(m), "m");
        assert_eq!(def.bind(&[3]).unwrap().get("x"), Some(3));
        assert!(def.bind(&[1, 2]).is_err());
    }

    #[test]
    fn test_build_rejects_wrong_role_count() {
        let mut b = ScenarioBuilder::new("one");
        let d = b.counter("d", 0);
        b.role(RoleDef::new("t1").unguarded(&[(d, 1)]))
            .invariant(Invariant::equals(d, 1));
        assert_eq!(
            b.build().unwrap_err(),
            DefinitionError::RoleCount {
                scenario: "one".into(),
                found: 1
            }
        );
    }

    #[test]
    fn test_build_rejects_missing_invariant() {
        let mut b = ScenarioBuilder::new("none");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        two_roles(&mut b, m, d);
        assert!(matches!(
            b.build(),
            Err(DefinitionError::MissingInvariant { .. })
        ));
    }

    #[test]
    fn test_build_rejects_duplicates_and_unknown_params() {
        let mut b = ScenarioBuilder::new("dup");
        let d = b.counter("d", 0);
        b.counter("d", 1);
        let m = b.mutex("m");
        b.invariant(Invariant::equals(d, 2));
        two_roles(&mut b, m, d);
        assert!(matches!(
            b.build(),
            Err(DefinitionError::DuplicateName { kind: "counter", .. })
        ));

        let mut b = ScenarioBuilder::new("param");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        b.intent(Intent::InputConditioned {
            racy_when: Condition::positive("z"),
        })
        .invariant(Invariant::equals(d, 2));
        two_roles(&mut b, m, d);
        assert!(matches!(
            b.build(),
            Err(DefinitionError::UnknownParam { param, .. }) if param == "z"
        ));
    }

    #[test]
    fn test_build_rejects_foreign_ids() {
        let mut other = ScenarioBuilder::new("other");
        other.counter("a", 0);
        let foreign = other.counter("b", 0);

        let mut b = ScenarioBuilder::new("ids");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        b.role(RoleDef::new("t1").atomic(&[m], &[(foreign, 1)]))
            .role(RoleDef::new("t2").atomic(&[m], &[(d, 1)]))
            .invariant(Invariant::equals(d, 1));
        assert!(matches!(
            b.build(),
            Err(DefinitionError::UnknownId { kind: "counter", index: 1, .. })
        ));
    }

    #[test]
    fn test_build_rejects_empty_and_repeated_lock_sets() {
        let mut b = ScenarioBuilder::new("locks");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        b.role(RoleDef::new("t1").atomic(&[], &[(d, 1)]))
            .role(RoleDef::new("t2").atomic(&[m], &[(d, 1)]))
            .invariant(Invariant::equals(d, 2));
        assert!(matches!(
            b.build(),
            Err(DefinitionError::EmptyLockSet { .. })
        ));

        let mut b = ScenarioBuilder::new("locks");
        let d = b.counter("d", 0);
        let m = b.mutex("m");
        b.role(RoleDef::new("t1").atomic(&[m, m], &[(d, 1)]))
            .role(RoleDef::new("t2").atomic(&[m], &[(d, 1)]))
            .invariant(Invariant::equals(d, 2));
        assert!(matches!(
            b.build(),
            Err(DefinitionError::RepeatedLock { .. })
        ));
    }

    #[test]
    fn test_build_rejects_condvar_with_two_locks() {
        let mut b = ScenarioBuilder::new("pairing");
        let num = b.counter("num", 1);
        let m1 = b.mutex("m1");
        let m2 = b.mutex("m2");
        let empty = b.condvar("empty");
        let full = b.condvar("full");
        let handoff = |lock, direction| Handoff {
            lock,
            field: num,
            direction,
            capacity: 1,
            not_full: empty,
            not_empty: full,
        };
        b.role(RoleDef::new("producer").handoff(handoff(m1, HandoffDirection::Produce)))
            .role(RoleDef::new("consumer").handoff(handoff(m2, HandoffDirection::Consume)))
            .invariant(Invariant::equals(num, 1));
        assert!(matches!(
            b.build(),
            Err(DefinitionError::CondvarPairing { .. })
        ));
    }

    #[test]
    fn test_intent_resolution() {
        let intent = Intent::InputConditioned {
            racy_when: Condition::positive("x").and(Condition::positive("y")),
        };
        assert!(intent.is_racy_for(&Inputs::from_pairs([("x", 1), ("y", 1)])));
        assert_eq!(
            intent.resolve(&Inputs::from_pairs([("x", 1), ("y", 0)])),
            Intent::Correct
        );
        assert_eq!(intent.label(), "input-conditioned");
        assert_eq!(
            intent.to_string(),
            "input-conditioned (racy when (x > 0 && y > 0))"
        );
        assert_eq!(Intent::Racy.resolve(&Inputs::none()), Intent::Racy);
    }
}
