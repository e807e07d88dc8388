//! # rf-scenarios
//!
//! Two-thread race fixtures, declared as data against `rf-dst`.
//!
//! # Catalog
//!
//! | Scenario | Pattern | Intent | Invariant |
//! |----------|---------|--------|-----------|
//! | `stateful001` | mutual exclusion, one lock per mutation, unused `mb` | correct | `data1 == 16 && data2 == 5` |
//! | `stateful002` | second instance of `stateful001` | correct | same |
//! | `stateful-coarse` | mutual exclusion, batched | correct | same |
//! | `stateful-split` | split read/write critical sections | racy | same |
//! | `sync02` | single-slot producer/consumer | correct | `0 <= num <= 1`, `num == 1` |
//! | `svf` | four-way input branch, nested benchmarks | correct | `sum == 2` |
//! | `svf-unguarded` | `svf` with one unguarded `add1` | racy when `x > 0 && y > 0` | `sum == 2` |
//! | `spf` | one unguarded increment | racy when `data4` is shared | `x > 0 \|\| y > 0 \|\| data4 == 1` |
//! | `input-case` | no locks | racy | `sum == 4` |
//! | `lock-order` | lock-order inversion | racy | `a == 1 && b == 1`, hangs when forced |
//!
//! Every racy fixture also has a losing schedule (see [`losing_schedule`])
//! that drives it into its failure deterministically.

pub mod branching;
pub mod deadlock;
pub mod handoff;
pub mod stateful;

use rf_core::Inputs;
use rf_dst::{DefinitionError, InterleavingScript, ScenarioDef};
use thiserror::Error;

/// A named catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub name: &'static str,
    pub summary: &'static str,
    pub build: fn() -> Result<ScenarioDef, DefinitionError>,
}

const FIXTURES: &[Fixture] = &[
    Fixture {
        name: "stateful001",
        summary: "mutual exclusion over two counters",
        build: stateful::stateful001,
    },
    Fixture {
        name: "stateful002",
        summary: "second instance of the stateful001 protocol",
        build: stateful::stateful002,
    },
    Fixture {
        name: "stateful-coarse",
        summary: "both mutations under one acquisition",
        build: stateful::stateful_coarse,
    },
    Fixture {
        name: "stateful-split",
        summary: "load and store in separate critical sections",
        build: stateful::stateful_split,
    },
    Fixture {
        name: "sync02",
        summary: "single-slot producer/consumer handoff",
        build: handoff::sync02,
    },
    Fixture {
        name: "svf",
        summary: "input-selected locked helpers with nested benchmarks",
        build: branching::svf,
    },
    Fixture {
        name: "svf-unguarded",
        summary: "svf with add1 outside the lock for x>0 && y>0",
        build: branching::svf_unguarded,
    },
    Fixture {
        name: "spf",
        summary: "locked helpers, one unguarded data4 increment",
        build: branching::spf,
    },
    Fixture {
        name: "input-case",
        summary: "unsynchronized input-selected increments",
        build: branching::input_case,
    },
    Fixture {
        name: "lock-order",
        summary: "two locks taken in opposite orders",
        build: deadlock::lock_order,
    },
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown scenario '{0}'")]
    Unknown(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// Every fixture, in catalog order.
pub fn catalog() -> &'static [Fixture] {
    FIXTURES
}

pub fn find(name: &str) -> Option<&'static Fixture> {
    FIXTURES.iter().find(|f| f.name == name)
}

/// Build the named fixture.
pub fn build(name: &str) -> Result<ScenarioDef, CatalogError> {
    let fixture = find(name).ok_or_else(|| CatalogError::Unknown(name.to_string()))?;
    Ok((fixture.build)()?)
}

/// Forced interleaving that makes `def` fail for `inputs`, if it has one.
///
/// `None` for intended-correct fixtures and for inputs under which a
/// conditioned fixture is race-free.
pub fn losing_schedule(def: &ScenarioDef, inputs: &Inputs) -> Option<InterleavingScript> {
    match def.name() {
        "stateful-split" => stateful::split_window(def),
        "svf-unguarded" => branching::svf_unguarded_window(def, inputs),
        "spf" => branching::spf_window(def, inputs),
        "input-case" => branching::input_case_window(def, inputs),
        "lock-order" => deadlock::inversion(def),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_dst::Intent;

    #[test]
    fn test_catalog_builds() {
        for fixture in catalog() {
            let def = (fixture.build)().unwrap();
            assert_eq!(def.name(), fixture.name);
            assert!(!def.description().is_empty(), "{}", fixture.name);
        }
    }

    #[test]
    fn test_catalog_names_unique() {
        let mut names: Vec<&str> = catalog().iter().map(|f| f.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), catalog().len());
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(build("sync01"), Err(CatalogError::Unknown(n)) if n == "sync01"));
    }

    #[test]
    fn test_racy_fixtures_have_a_losing_schedule() {
        let racy_inputs = Inputs::from_pairs([("x", 1), ("y", 1)]);
        let none_inputs = Inputs::from_pairs([("x", 0), ("y", 0)]);
        for fixture in catalog() {
            let def = (fixture.build)().unwrap();
            let has_schedule = losing_schedule(&def, &racy_inputs).is_some()
                || losing_schedule(&def, &none_inputs).is_some();
            let correct = *def.intent() == Intent::Correct;
            assert_eq!(has_schedule, !correct, "{}", fixture.name);
        }
    }
}
