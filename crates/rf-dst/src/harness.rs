//! Scenario harness: runs one scenario instance on two OS threads.
//!
//! A run:
//! 1. builds a fresh [`RunEnv`] (counters at their initial values, new locks
//!    and condvars, empty trace),
//! 2. spawns one named thread per role,
//! 3. waits for both with a bounded join timeout,
//! 4. snapshots the counters and evaluates the invariant.
//!
//! The result is a typed [`RunOutcome`]. A role that does not finish in time
//! is reported as [`FatalError::Hang`] and its thread is detached; nothing
//! here aborts the process.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rf_core::trace::{blocked_roles, lost_updates};
use rf_core::{
    Counterexample, EventKind, FinalState, Hazard, InputError, Inputs, InvariantChecker,
    PropertyChecker, PropertyResult, StateSnapshot, TraceEvent,
};
use tracing::{debug, info, warn};

use crate::env::RunEnv;
use crate::error::{FatalError, FatalKind};
use crate::interleaving::{
    InterleavingScript, Interleaver, RandomYield, ScheduleStats, ScriptedScheduler,
};
use crate::role::RoleCtx;
use crate::scenario::{Intent, ScenarioDef};

/// How long to wait for both roles before declaring a hang.
pub const JOIN_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// How long a role parked by a forced interleaving waits for the designated
/// role before the script is abandoned.
pub const GATE_WAIT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(250);

/// A nested run gets the outer join timeout divided by this.
const NESTED_TIMEOUT_DIVISOR: u32 = 2;

/// Floor for a nested join timeout.
const NESTED_JOIN_TIMEOUT_MIN: Duration = Duration::from_millis(1);

/// Seeded random yielding at yield points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbation {
    pub seed: u64,
    /// Probability of yielding at each point
    pub yield_probability: f64,
}

/// Configuration for the scenario harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Bound on waiting for both roles to finish
    pub join_timeout: Duration,
    /// Bound on waiting at a forced-interleaving gate
    pub gate_wait_timeout: Duration,
    /// Forced interleaving. Takes precedence over `perturbation`.
    pub script: Option<InterleavingScript>,
    pub perturbation: Option<Perturbation>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            join_timeout: JOIN_TIMEOUT_DEFAULT,
            gate_wait_timeout: GATE_WAIT_TIMEOUT_DEFAULT,
            script: None,
            perturbation: None,
        }
    }
}

impl HarnessConfig {
    /// Short timeouts, no perturbation.
    pub fn quick() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
            gate_wait_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Aggressive random yielding from `seed`.
    pub fn stress(seed: u64) -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            perturbation: Some(Perturbation {
                seed,
                yield_probability: 0.3,
            }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_script(mut self, script: InterleavingScript) -> Self {
        self.script = Some(script);
        self
    }

    #[must_use]
    pub fn with_perturbation(mut self, seed: u64, yield_probability: f64) -> Self {
        self.perturbation = Some(Perturbation {
            seed,
            yield_probability,
        });
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        debug_assert!(!timeout.is_zero(), "join timeout must be positive");
        self.join_timeout = timeout;
        self
    }

    /// Configuration for scenarios run from inside a `Nested` step: half the
    /// join timeout, no forced schedule, no perturbation.
    ///
    /// The nested deadline must expire before the outer one, or a hang inside
    /// the nested scenario surfaces as an outer `Hang` with no nested cause.
    #[must_use]
    pub fn for_nested(&self) -> Self {
        let join_timeout = (self.join_timeout / NESTED_TIMEOUT_DIVISOR).max(NESTED_JOIN_TIMEOUT_MIN);
        Self {
            join_timeout,
            gate_wait_timeout: self.gate_wait_timeout.min(join_timeout),
            script: None,
            perturbation: None,
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub scenario: String,
    /// Intent resolved against `inputs`
    pub intent: Intent,
    pub inputs: Inputs,
    /// Counters after join (at the timeout, for a hang)
    pub final_state: FinalState,
    /// One result per top-level invariant clause. Empty when a fatal error
    /// preceded the check.
    pub checks: Vec<PropertyResult>,
    pub fatal: Option<FatalError>,
    pub events: Vec<TraceEvent>,
    pub dropped_events: u64,
    pub role_names: Vec<String>,
    pub schedule: Option<ScheduleStats>,
    /// Seed used for perturbation, if any
    pub dst_seed: Option<u64>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.fatal.is_none()
    }

    pub fn kind(&self) -> Option<FatalKind> {
        self.fatal.as_ref().map(FatalError::kind)
    }

    /// Lost updates and blocked roles found in the trace.
    pub fn hazards(&self) -> Vec<Hazard> {
        let mut hazards = lost_updates(&self.events);
        hazards.extend(blocked_roles(&self.events, self.role_names.len()));
        hazards
    }

    /// Interleaving diagram plus hazards, for a failed run.
    pub fn counterexample(&self) -> Counterexample {
        let mut ce = Counterexample::from_trace(&self.events, &self.role_names)
            .with_dst_seed(self.dst_seed);
        if let Some(fatal) = &self.fatal {
            ce = ce.with_description(fatal.to_string());
        }
        for hazard in self.hazards() {
            ce.add_hazard(hazard);
        }
        let last_seq = self.events.last().map_or(0, |e| e.seq);
        ce.add_state(StateSnapshot {
            step: last_seq + 1,
            description: format!("final: {}", self.final_state),
            variables: self
                .final_state
                .counters
                .iter()
                .map(|c| (c.name.clone(), c.value.to_string()))
                .collect(),
        });
        ce
    }

    /// Format for display.
    pub fn format(&self) -> String {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        let inputs = if self.inputs.is_empty() {
            "-".to_string()
        } else {
            self.inputs.to_string()
        };

        let mut result = format!(
            "[{}] {} ({}) inputs: {} elapsed={}ms",
            status,
            self.scenario,
            self.intent.label(),
            inputs,
            self.elapsed.as_millis()
        );
        if let Some(seed) = self.dst_seed {
            result.push_str(&format!(" DST_SEED={}", seed));
        }
        for check in &self.checks {
            result.push_str(&format!("\n  {}", check.format_status()));
        }
        result.push_str(&format!("\n  Final: {}", self.final_state));
        if let Some(schedule) = &self.schedule {
            result.push_str(&format!("\n  {}", schedule.format()));
        }
        if let Some(fatal) = &self.fatal {
            result.push_str(&format!("\n  Fatal: {}", fatal));
        }
        if self.dropped_events > 0 {
            result.push_str(&format!("\n  ({} trace events dropped)", self.dropped_events));
        }
        result
    }
}

/// Outcome of `run_repeated`: how many iterations passed, and the first
/// failure if there was one.
#[derive(Debug, Clone)]
pub struct RepeatReport {
    pub scenario: String,
    pub iterations_requested: u64,
    pub iterations_passed: u64,
    /// 1-based iteration number and its outcome.
    pub failure: Option<(u64, Box<RunOutcome>)>,
}

impl RepeatReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn format(&self) -> String {
        match &self.failure {
            None => format!(
                "[PASS] {} x{}",
                self.scenario, self.iterations_requested
            ),
            Some((iteration, outcome)) => format!(
                "[FAIL] {} failed at iteration {}/{}\n{}",
                self.scenario,
                iteration,
                self.iterations_requested,
                outcome.format()
            ),
        }
    }
}

/// Runs scenarios with a fixed [`HarnessConfig`].
pub struct ScenarioHarness {
    config: HarnessConfig,
}

impl Default for ScenarioHarness {
    fn default() -> Self {
        Self::new(HarnessConfig::default())
    }
}

impl ScenarioHarness {
    pub fn new(config: HarnessConfig) -> Self {
        debug_assert!(!config.join_timeout.is_zero(), "join timeout must be positive");
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Bind positional `values` to the scenario's parameters, then run.
    pub fn run_args(&self, def: &ScenarioDef, values: &[i64]) -> Result<RunOutcome, InputError> {
        let inputs = def.bind(values)?;
        Ok(self.run(def, &inputs))
    }

    /// Run `iterations` fresh instances, stopping at the first failure.
    pub fn run_repeated(&self, def: &ScenarioDef, inputs: &Inputs, iterations: u64) -> RepeatReport {
        debug_assert!(iterations > 0, "must run at least once");

        for iteration in 1..=iterations {
            let outcome = self.iteration_harness(iteration).run(def, inputs);
            if !outcome.passed() {
                warn!(
                    scenario = %def.name(),
                    iteration,
                    iterations,
                    "repeated run failed"
                );
                return RepeatReport {
                    scenario: def.name().to_string(),
                    iterations_requested: iterations,
                    iterations_passed: iteration - 1,
                    failure: Some((iteration, Box::new(outcome))),
                };
            }
        }

        RepeatReport {
            scenario: def.name().to_string(),
            iterations_requested: iterations,
            iterations_passed: iterations,
            failure: None,
        }
    }

    /// Each iteration perturbs with its own seed, derived from the base seed.
    fn iteration_harness(&self, iteration: u64) -> ScenarioHarness {
        let mut config = self.config.clone();
        if let Some(p) = config.perturbation.as_mut() {
            p.seed = p.seed.wrapping_add(iteration - 1);
        }
        ScenarioHarness::new(config)
    }

    fn interleaver(
        &self,
        def: &ScenarioDef,
    ) -> (Option<Arc<dyn Interleaver>>, Option<Arc<ScriptedScheduler>>) {
        if let Some(script) = &self.config.script {
            let scheduler = Arc::new(ScriptedScheduler::new(
                script.clone(),
                def.roles().len(),
                self.config.gate_wait_timeout,
            ));
            let interleaver: Arc<dyn Interleaver> = scheduler.clone();
            return (Some(interleaver), Some(scheduler));
        }
        if let Some(p) = self.config.perturbation {
            let interleaver: Arc<dyn Interleaver> =
                Arc::new(RandomYield::new(p.seed, p.yield_probability));
            return (Some(interleaver), None);
        }
        (None, None)
    }

    /// Run one instance of `def` with `inputs`.
    pub fn run(&self, def: &ScenarioDef, inputs: &Inputs) -> RunOutcome {
        let started = Instant::now();
        let (interleaver, scheduler) = self.interleaver(def);
        let env = Arc::new(RunEnv::new(
            def,
            inputs.clone(),
            interleaver.clone(),
            self.config.for_nested(),
        ));

        let (tx, rx) = mpsc::channel::<(usize, Result<(), FatalError>)>();
        let mut fatal: Option<FatalError> = None;
        let mut handles = Vec::with_capacity(def.roles().len());

        for (index, role) in def.roles().iter().enumerate() {
            let env = Arc::clone(&env);
            let role = role.clone();
            let role_name = role.name.clone();
            let tx = tx.clone();
            let interleaver = interleaver.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}/{}", def.name(), role.name))
                .spawn(move || {
                    debug!(scenario = %env.scenario(), role = %role.name, "role started");
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        let ctx = RoleCtx::new(index, &role.name, &env);
                        role.execute(&ctx)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(FatalError::RolePanicked {
                            role: role.name.clone(),
                            message: panic_message(payload.as_ref()),
                        })
                    });

                    env.trace().record(index, EventKind::Finished);
                    if let Some(interleaver) = &interleaver {
                        interleaver.role_finished(index);
                    }
                    debug!(scenario = %env.scenario(), role = %role.name, ok = result.is_ok(), "role finished");
                    // The harness may already have given up on this role.
                    let _ = tx.send((index, result));
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    fatal = Some(FatalError::Spawn {
                        role: role_name,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
        drop(tx);

        let deadline = started + self.config.join_timeout;
        let mut finished = vec![false; handles.len()];
        let mut hung = false;
        while finished.iter().any(|done| !done) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, result)) => {
                    finished[index] = true;
                    if let Err(e) = result {
                        fatal.get_or_insert(e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    hung = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if hung {
            let pending: Vec<String> = finished
                .iter()
                .enumerate()
                .filter(|(_, done)| !**done)
                .map(|(i, _)| def.roles()[i].name.clone())
                .collect();
            warn!(
                scenario = %def.name(),
                ?pending,
                timeout_ms = self.config.join_timeout.as_millis() as u64,
                "roles did not finish, detaching"
            );
            fatal.get_or_insert(FatalError::Hang {
                pending,
                timeout_ms: self.config.join_timeout.as_millis() as u64,
            });
            // Dropping the handles detaches the stuck threads.
            drop(handles);
        } else {
            for handle in handles {
                let _ = handle.join();
            }
        }

        let final_state = env.state().snapshot();
        let dst_seed = match (&self.config.script, self.config.perturbation) {
            (None, Some(p)) => Some(p.seed),
            _ => None,
        };

        let checks = if fatal.is_none() {
            let checker = InvariantChecker::new(def.invariant(), &final_state, inputs);
            let checker = match dst_seed {
                Some(seed) if seed != 0 => checker.with_seed(seed),
                _ => checker,
            };
            checker.check_all()
        } else {
            Vec::new()
        };
        if let Some(violation) = checks.iter().find(|r| !r.passed) {
            fatal = Some(FatalError::InvariantViolation(format!(
                "{}: {}",
                violation.property,
                violation.message.as_deref().unwrap_or("failed")
            )));
        }

        let outcome = RunOutcome {
            scenario: def.name().to_string(),
            intent: def.intent().resolve(inputs),
            inputs: inputs.clone(),
            final_state,
            checks,
            fatal,
            events: env.trace().events(),
            dropped_events: env.trace().dropped_count(),
            role_names: def.roles().iter().map(|r| r.name.clone()).collect(),
            schedule: scheduler.map(|s| s.stats()),
            dst_seed,
            elapsed: started.elapsed(),
        };

        match &outcome.fatal {
            None => info!(
                scenario = %outcome.scenario,
                inputs = %outcome.inputs,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "run passed"
            ),
            Some(fatal) => info!(
                scenario = %outcome.scenario,
                inputs = %outcome.inputs,
                kind = ?fatal.kind(),
                %fatal,
                "run failed"
            ),
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
