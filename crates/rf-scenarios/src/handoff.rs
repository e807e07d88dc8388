//! Producer/consumer signaling over a single slot.
//!
//! `num` starts full (1). The producer waits while `num > 0`, then
//! increments; the consumer waits while `num == 0`, then decrements. Each
//! signals the other's condition after unlocking. Whichever runs first, `num`
//! never leaves `[0, 1]` and ends at 1.

use rf_core::Invariant;
use rf_dst::{
    DefinitionError, Handoff, HandoffDirection, Intent, RoleDef, ScenarioBuilder, ScenarioDef,
};

const SLOT_CAPACITY: i64 = 1;

pub fn sync02() -> Result<ScenarioDef, DefinitionError> {
    let mut b = ScenarioBuilder::new("sync02");
    let num = b.counter("num", 1);
    let m = b.mutex("m");
    let empty = b.condvar("empty");
    let full = b.condvar("full");

    let handoff = |direction| Handoff {
        lock: m,
        field: num,
        direction,
        capacity: SLOT_CAPACITY,
        not_full: empty,
        not_empty: full,
    };

    b.description("single-slot handoff, producer waits on empty, consumer on full")
        .intent(Intent::Correct)
        .role(RoleDef::new("producer").handoff(handoff(HandoffDirection::Produce)))
        .role(RoleDef::new("consumer").handoff(handoff(HandoffDirection::Consume)))
        .invariant(Invariant::all(vec![
            Invariant::within_bounds(num, 0, SLOT_CAPACITY),
            Invariant::equals(num, 1),
        ]));
    b.build()
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use rf_core::Inputs;
    use rf_dst::{HarnessConfig, ScenarioHarness};

    #[test]
    fn test_sync02_ends_full() {
        let def = sync02().unwrap();
        let report = ScenarioHarness::new(HarnessConfig::quick()).run_repeated(&def, &Inputs::none(), 25);
        assert!(report.passed(), "{}", report.format());
    }

    #[test]
    fn test_sync02_checks_bounds_and_value() {
        let def = sync02().unwrap();
        let outcome = ScenarioHarness::default().run(&def, &Inputs::none());
        let properties: Vec<&str> = outcome.checks.iter().map(|c| c.property.as_str()).collect();
        assert_eq!(properties, vec!["0 <= num <= 1 (always)", "num == 1"]);
    }
}
