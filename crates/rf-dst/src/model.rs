//! Exhaustive exploration of a scenario's interleavings under loom.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p rf-scenarios --release --test loom_scenarios
//! ```
//!
//! Every yield point of the threaded harness corresponds to a loom
//! synchronization point here (the counters and primitives are loom types
//! under this cfg), so an intended-correct scenario passes for every schedule
//! loom explores and an intended-racy one panics with the violated clause.
//! Nested steps are not supported and fail the model.

use loom::sync::Arc;
use loom::thread;

use rf_core::{Inputs, InvariantChecker, PropertyChecker};

use crate::env::RunEnv;
use crate::harness::HarnessConfig;
use crate::role::RoleCtx;
use crate::scenario::ScenarioDef;

/// Run `def` with `inputs` under `loom::model`. Panics on the first
/// interleaving that fails.
pub fn explore(def: &ScenarioDef, inputs: &Inputs) {
    let def = std::sync::Arc::new(def.clone());
    let inputs = inputs.clone();

    loom::model(move || {
        let env = Arc::new(RunEnv::new(
            &def,
            inputs.clone(),
            None,
            HarnessConfig::default(),
        ));

        let handles: Vec<_> = def
            .roles()
            .iter()
            .enumerate()
            .map(|(index, role)| {
                let env = Arc::clone(&env);
                let role = role.clone();
                thread::spawn(move || {
                    let ctx = RoleCtx::new(index, &role.name, &env);
                    role.execute(&ctx)
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(fatal)) => panic!("{}: {}", def.name(), fatal),
                Err(_) => panic!("{}: role panicked", def.name()),
            }
        }

        let state = env.state().snapshot();
        let checker = InvariantChecker::new(def.invariant(), &state, &inputs);
        if let Some(violation) = checker.first_violation() {
            panic!("{}: {}", def.name(), violation.format_status());
        }
    });
}
