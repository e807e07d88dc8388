//! Lock-order inversion.
//!
//! Role 1 takes `a` then `b`, role 2 takes `b` then `a`, each to increment
//! the counter guarded by the first. Most schedules finish with
//! `a == 1 && b == 1`. If each role gets its first lock before the other
//! reaches its second, neither can proceed and the run is reported as a hang.

use rf_core::Invariant;
use rf_dst::{DefinitionError, Intent, InterleavingScript, RoleDef, ScenarioBuilder, ScenarioDef, YieldPoint};

pub fn lock_order() -> Result<ScenarioDef, DefinitionError> {
    let mut b = ScenarioBuilder::new("lock-order");
    let count_a = b.counter("a", 0);
    let count_b = b.counter("b", 0);
    let lock_a = b.mutex("lock_a");
    let lock_b = b.mutex("lock_b");

    b.description("two locks taken in opposite orders")
        .intent(Intent::Racy)
        // BUG: the two roles disagree on lock order.
        .role(RoleDef::new("thread1").atomic(&[lock_a, lock_b], &[(count_a, 1)]))
        .role(RoleDef::new("thread2").atomic(&[lock_b, lock_a], &[(count_b, 1)]))
        .invariant(Invariant::all(vec![
            Invariant::equals(count_a, 1),
            Invariant::equals(count_b, 1),
        ]));
    b.build()
}

/// Each role holds its first lock before either asks for its second.
pub(crate) fn inversion(def: &ScenarioDef) -> Option<InterleavingScript> {
    let lock_a = def.lock("lock_a")?;
    let lock_b = def.lock("lock_b")?;
    Some(
        InterleavingScript::new("lock_order_inversion")
            .with_description("thread1 holds lock_a, thread2 holds lock_b")
            .then(0, YieldPoint::AfterAcquire(lock_a))
            .then(1, YieldPoint::AfterAcquire(lock_b)),
    )
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use rf_core::Inputs;
    use rf_dst::{HarnessConfig, ScenarioHarness};

    #[test]
    fn test_lock_order_finishes_without_forcing() {
        // Role 2 cannot start until role 1 has released both locks.
        let def = lock_order().unwrap();
        let script = InterleavingScript::new("serial")
            .then(0, YieldPoint::AfterRelease(def.lock("lock_a").unwrap()));
        let outcome =
            ScenarioHarness::new(HarnessConfig::quick().with_script(script)).run(&def, &Inputs::none());
        assert!(outcome.passed(), "{}", outcome.format());
    }

    #[test]
    fn test_inversion_script_shape() {
        let def = lock_order().unwrap();
        let script = inversion(&def).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.steps[1].role, 1);
    }
}
