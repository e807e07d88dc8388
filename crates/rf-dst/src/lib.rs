//! # rf-dst
//!
//! Execution side of the race fixtures: checked primitives, thread roles,
//! scenario definitions and the two-thread harness.
//!
//! ## Modules
//!
//! - `sync`: mutex and condition variable that report misuse as errors
//! - `role`: the steps a role executes against the run environment
//! - `scenario`: validated scenario definitions and their builder
//! - `interleaving`: forced schedules and seeded perturbation
//! - `harness`: runs a scenario, joins with a timeout, checks the invariant
//!
//! ## Usage
//!
//! ```rust
//! use rf_core::{Inputs, Invariant};
//! use rf_dst::{HarnessConfig, RoleDef, ScenarioBuilder, ScenarioHarness};
//!
//! let mut b = ScenarioBuilder::new("counter");
//! let data = b.counter("data", 10);
//! let m = b.mutex("m");
//! b.role(RoleDef::new("t1").atomic(&[m], &[(data, 1)]))
//!     .role(RoleDef::new("t2").atomic(&[m], &[(data, 5)]))
//!     .invariant(Invariant::equals(data, 16));
//! let def = b.build().unwrap();
//!
//! let outcome = ScenarioHarness::new(HarnessConfig::quick()).run(&def, &Inputs::none());
//! assert!(outcome.passed(), "{}", outcome.format());
//! ```
//!
//! ## Reproducibility
//!
//! Perturbed runs print their seed. To reproduce one:
//! ```bash
//! DST_SEED=12345 rf-run stateful001 --yield-probability 0.3
//! ```

pub mod env;
pub mod error;
pub mod harness;
pub mod interleaving;
#[cfg(loom)]
pub mod model;
pub mod role;
pub mod scenario;
pub mod sync;

pub use env::RunEnv;
pub use error::{FatalError, FatalKind};
pub use harness::{
    HarnessConfig, Perturbation, RepeatReport, RunOutcome, ScenarioHarness,
    GATE_WAIT_TIMEOUT_DEFAULT, JOIN_TIMEOUT_DEFAULT,
};
pub use interleaving::{
    InterleavingScript, Interleaver, RandomYield, ScheduleStats, ScriptStep, ScriptedScheduler,
    YieldPoint,
};
pub use role::{Granularity, Handoff, HandoffDirection, Mutation, RoleCtx, RoleDef, Step};
pub use scenario::{CondvarId, DefinitionError, Intent, LockId, ScenarioBuilder, ScenarioDef};
pub use sync::{CheckedCondvar, CheckedMutex, LockGuard, SyncError};

use tracing::{info, warn};

/// Get DST seed from environment or generate random one.
///
/// Logs the seed for reproduction. Use `DST_SEED=<seed>` to reproduce. An
/// unparsable or zero `DST_SEED` is ignored with a warning.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    if let Ok(s) = std::env::var("DST_SEED") {
        match s.parse::<u64>() {
            Ok(seed) if seed != 0 => {
                info!(seed, "DST_SEED from environment");
                return seed;
            }
            _ => warn!(value = %s, "ignoring DST_SEED, expected a non-zero u64"),
        }
    }
    let seed = rand::random::<u64>().max(1);
    info!(seed, "DST_SEED randomly generated");
    seed
}
