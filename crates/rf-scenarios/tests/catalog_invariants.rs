//! Intended-correct fixtures hold their invariant for every input and every
//! schedule the harness produces, including perturbed ones.
//!
//! To reproduce a perturbed failure:
//! ```bash
//! DST_SEED=12345 cargo test -p rf-scenarios --test catalog_invariants
//! ```
#![cfg(not(loom))]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rf_core::{EventKind, Inputs};
use rf_dst::{get_or_generate_seed, HarnessConfig, Intent, ScenarioHarness};
use rf_scenarios::{build, catalog};

/// Sign combinations, with zero on both sides of every boundary.
const SIGN_CASES: [(i64, i64); 9] = [
    (1, 1),
    (1, 0),
    (1, -1),
    (0, 1),
    (0, 0),
    (0, -1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

fn inputs(x: i64, y: i64) -> Inputs {
    Inputs::from_pairs([("x", x), ("y", y)])
}

#[test]
fn test_correct_fixtures_pass_unforced() {
    let harness = ScenarioHarness::new(HarnessConfig::default());
    for fixture in catalog() {
        let def = (fixture.build)().unwrap();
        let cases: Vec<Inputs> = if def.params().is_empty() {
            vec![Inputs::none()]
        } else {
            SIGN_CASES.iter().map(|&(x, y)| inputs(x, y)).collect()
        };
        for case in cases {
            if def.intent().resolve(&case) != Intent::Correct {
                continue;
            }
            let outcome = harness.run(&def, &case);
            assert!(outcome.passed(), "{}", outcome.format());
        }
    }
}

#[test]
fn test_stateful_final_values() {
    let harness = ScenarioHarness::new(HarnessConfig::quick());
    for name in ["stateful001", "stateful002", "stateful-coarse"] {
        let def = build(name).unwrap();
        let report = harness.run_repeated(&def, &Inputs::none(), 50);
        assert!(report.passed(), "{}", report.format());
    }
}

#[test]
fn test_sync02_stays_in_bounds_under_perturbation() {
    let seed = get_or_generate_seed();
    let def = build("sync02").unwrap();
    let harness = ScenarioHarness::new(HarnessConfig::stress(seed));

    let report = harness.run_repeated(&def, &Inputs::none(), 100);
    assert!(report.passed(), "DST_SEED={}\n{}", seed, report.format());
}

#[test]
fn test_svf_each_quadrant_takes_one_arm_and_sums_to_two() {
    let def = build("svf").unwrap();
    let harness = ScenarioHarness::new(HarnessConfig::default());

    for (x, y) in SIGN_CASES {
        let outcome = harness.run(&def, &inputs(x, y));
        assert!(outcome.passed(), "{}", outcome.format());

        let sum: i64 = outcome.final_state.counters.iter().map(|c| c.value).sum();
        assert_eq!(sum, 2, "x={} y={}", x, y);

        let taken = outcome
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::BranchTaken { taken: true, .. }))
            .count();
        assert_eq!(taken, 1, "x={} y={}", x, y);

        // Each arm runs two nested benchmarks, both of which must pass.
        let nested_ok = outcome
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NestedEnd { passed: true, .. }))
            .count();
        assert_eq!(nested_ok, 2, "x={} y={}", x, y);
    }
}

#[test]
fn test_zero_routes_like_negative() {
    let def = build("svf").unwrap();
    let harness = ScenarioHarness::new(HarnessConfig::quick());

    let arm = |x, y| -> Vec<(String, bool)> {
        harness
            .run(&def, &inputs(x, y))
            .events
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::BranchTaken { label, taken, .. } => Some((label, taken)),
                _ => None,
            })
            .collect()
    };

    assert_eq!(arm(0, 0), arm(-1, -1));
    assert_eq!(arm(5, 0), arm(5, -5));
    assert_eq!(arm(0, 5), arm(-5, 5));
}

#[test]
fn test_correct_fixtures_deterministic_across_random_inputs() {
    let seed = get_or_generate_seed();
    let mut rng = StdRng::seed_from_u64(seed);
    let harness = ScenarioHarness::new(HarnessConfig::stress(seed));

    for name in ["svf", "stateful001", "sync02"] {
        let def = build(name).unwrap();
        for _ in 0..5 {
            let case = inputs(rng.gen_range(-3..=3), rng.gen_range(-3..=3));
            let case = if def.params().is_empty() {
                Inputs::none()
            } else {
                case
            };
            let report = harness.run_repeated(&def, &case, 3);
            assert!(report.passed(), "DST_SEED={}\n{}", seed, report.format());
        }
    }
}

#[test]
fn test_spf_holds_when_race_free() {
    let def = build("spf").unwrap();
    let harness = ScenarioHarness::new(HarnessConfig::quick());
    for (x, y) in [(1, 1), (1, -1), (-1, 1)] {
        let case = inputs(x, y);
        assert_eq!(def.intent().resolve(&case), Intent::Correct);
        let report = harness.run_repeated(&def, &case, 10);
        assert!(report.passed(), "{}", report.format());
    }
}
