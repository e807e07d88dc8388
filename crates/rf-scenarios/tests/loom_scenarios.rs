//! Exhaustive interleaving checks under loom.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p rf-scenarios --release --test loom_scenarios
//! ```
//!
//! Fixtures with nested steps (`svf`, `svf-unguarded`) are not modeled.
#![cfg(loom)]

use rf_core::Inputs;
use rf_dst::model::explore;
use rf_scenarios::build;

fn inputs(x: i64, y: i64) -> Inputs {
    Inputs::from_pairs([("x", x), ("y", y)])
}

#[test]
fn test_stateful_all_interleavings() {
    for name in ["stateful001", "stateful002", "stateful-coarse"] {
        explore(&build(name).unwrap(), &Inputs::none());
    }
}

#[test]
fn test_sync02_all_interleavings() {
    explore(&build("sync02").unwrap(), &Inputs::none());
}

#[test]
fn test_spf_race_free_inputs() {
    let def = build("spf").unwrap();
    for (x, y) in [(1, 1), (1, -1), (-1, 1)] {
        explore(&def, &inputs(x, y));
    }
}

#[test]
#[should_panic(expected = "stateful-split")]
fn test_stateful_split_fails() {
    explore(&build("stateful-split").unwrap(), &Inputs::none());
}

#[test]
#[should_panic(expected = "data4 == 1")]
fn test_spf_fails_for_non_positive_inputs() {
    explore(&build("spf").unwrap(), &inputs(0, 0));
}

#[test]
#[should_panic(expected = "input-case")]
fn test_input_case_fails() {
    explore(&build("input-case").unwrap(), &inputs(1, 1));
}
