//! # rf-core
//!
//! Data types shared by every race fixture.
//!
//! This crate provides:
//! - `SharedState`: the counter vector both roles mutate, with observed
//!   load/store and watermarks
//! - `Inputs` and `Condition`: named integer parameters and the branch
//!   predicates over them
//! - `Invariant` and `InvariantChecker`: final-state predicates evaluated
//!   after both roles join
//! - `Trace` and `Counterexample`: the per-run event log and its rendering
//!
//! Nothing here spawns threads or blocks; execution lives in `rf-dst`.

pub mod counterexample;
pub mod inputs;
pub mod invariant;
pub mod property;
pub mod state;
pub mod trace;

pub use counterexample::{Counterexample, Hazard, StateSnapshot, ThreadAction};
pub use inputs::{Condition, InputError, Inputs};
pub use invariant::{Invariant, InvariantChecker};
pub use property::{PropertyChecker, PropertyResult};
pub use state::{
    AccessObserver, AccessPoint, CounterValue, FieldId, FinalState, SharedState, StateLayout,
    Unobserved,
};
pub use trace::{EventKind, Trace, TraceEvent};
