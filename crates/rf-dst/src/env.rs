//! Everything one scenario run owns: counters, primitives, trace, inputs.
//!
//! A fresh environment is built for every run and shared by its two roles
//! behind an `Arc`. Nothing in it outlives the run.

use std::sync::Arc;

use rf_core::{Inputs, SharedState, Trace};

use crate::harness::HarnessConfig;
use crate::interleaving::Interleaver;
use crate::scenario::{CondvarId, LockId, ScenarioDef};
use crate::sync::{CheckedCondvar, CheckedMutex};

pub struct RunEnv {
    scenario: String,
    state: SharedState,
    locks: Vec<CheckedMutex>,
    condvars: Vec<CheckedCondvar>,
    trace: Trace,
    inputs: Inputs,
    interleaver: Option<Arc<dyn Interleaver>>,
    /// Configuration for scenarios run from inside a `Nested` step.
    nested: HarnessConfig,
}

impl RunEnv {
    pub fn new(
        def: &ScenarioDef,
        inputs: Inputs,
        interleaver: Option<Arc<dyn Interleaver>>,
        nested: HarnessConfig,
    ) -> Self {
        Self {
            scenario: def.name().to_string(),
            state: SharedState::new(def.layout()),
            locks: def.locks().iter().map(CheckedMutex::new).collect(),
            condvars: def.condvars().iter().map(CheckedCondvar::new).collect(),
            trace: Trace::new(),
            inputs,
            interleaver,
            nested,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn lock(&self, id: LockId) -> &CheckedMutex {
        &self.locks[id.index()]
    }

    pub fn condvar(&self, id: CondvarId) -> &CheckedCondvar {
        &self.condvars[id.index()]
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn interleaver(&self) -> Option<&dyn Interleaver> {
        self.interleaver.as_deref()
    }

    pub fn nested_config(&self) -> &HarnessConfig {
        &self.nested
    }
}
