//! Forced and randomized interleavings of the two roles.
//!
//! Roles call [`Interleaver::yield_point`] at every instrumented point: step
//! boundaries, lock acquisition and release, condvar wakeup and each counter
//! load and store. What happens there depends on the interleaver:
//!
//! - [`ScriptedScheduler`] replays an [`InterleavingScript`]: the role named
//!   by the current script step runs until it reaches the step's point, then
//!   control passes to the next step's role. Every other role parks at its
//!   next yield point. Once the script is exhausted both roles run freely.
//! - [`RandomYield`] yields the OS thread at random, seeded points.
//!
//! ```text
//! script: [(0, BeforeStore(data4)), (1, AfterStore(data4))]
//!
//!   role 0 ──load data4──▶ park ·····························▶ store stale
//!   role 1 ── park ········▶ add2 ─ add4 ─ store data4 ─▶ free
//! ```
//!
//! A script that cannot make progress (the designated role is blocked on a
//! lock held by a parked role, or already finished) is abandoned after the
//! wait timeout and both roles continue unconstrained.

use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rf_core::FieldId;
use serde::Serialize;
use tracing::{debug, warn};

use crate::scenario::{CondvarId, LockId};

/// Instrumented point in a role's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YieldPoint {
    /// Before the n-th step the role starts (counting nested and branch steps).
    StepStart(usize),
    AfterAcquire(LockId),
    AfterRelease(LockId),
    /// After returning from a condvar wait that actually blocked.
    AfterWake(CondvarId),
    BeforeLoad(FieldId),
    /// After the load of a read-modify-write, before its store.
    BeforeStore(FieldId),
    AfterStore(FieldId),
}

impl fmt::Display for YieldPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepStart(n) => write!(f, "step_start({})", n),
            Self::AfterAcquire(l) => write!(f, "after_acquire(lock#{})", l.index()),
            Self::AfterRelease(l) => write!(f, "after_release(lock#{})", l.index()),
            Self::AfterWake(c) => write!(f, "after_wake(condvar#{})", c.index()),
            Self::BeforeLoad(x) => write!(f, "before_load(field#{})", x.index()),
            Self::BeforeStore(x) => write!(f, "before_store(field#{})", x.index()),
            Self::AfterStore(x) => write!(f, "after_store(field#{})", x.index()),
        }
    }
}

/// Hook called by roles at every yield point.
pub trait Interleaver: Send + Sync {
    fn yield_point(&self, role: usize, point: YieldPoint);

    /// Called once when a role has executed its last step (or failed).
    fn role_finished(&self, _role: usize) {}
}

/// A single step in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    /// Role that runs
    pub role: usize,
    /// Point at which it parks and hands over
    pub point: YieldPoint,
}

/// Schedule to force.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterleavingScript {
    pub name: String,
    pub description: String,
    pub steps: Vec<ScriptStep>,
}

impl InterleavingScript {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Append a step, builder style.
    #[must_use]
    pub fn then(mut self, role: usize, point: YieldPoint) -> Self {
        self.add_step(role, point);
        self
    }

    pub fn add_step(&mut self, role: usize, point: YieldPoint) {
        self.steps.push(ScriptStep { role, point });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// How far a script got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    pub script_name: String,
    pub steps_total: usize,
    pub steps_matched: u64,
    /// Why the script was given up, if it was.
    pub abandoned: Option<String>,
}

impl ScheduleStats {
    /// Whether every step was replayed.
    pub fn complete(&self) -> bool {
        self.abandoned.is_none() && self.steps_matched as usize == self.steps_total
    }

    pub fn format(&self) -> String {
        match &self.abandoned {
            Some(reason) => format!(
                "Script '{}': {}/{} steps, abandoned: {}",
                self.script_name, self.steps_matched, self.steps_total, reason
            ),
            None => format!(
                "Script '{}': {}/{} steps",
                self.script_name, self.steps_matched, self.steps_total
            ),
        }
    }
}

struct ScheduleState {
    position: usize,
    steps_matched: u64,
    finished: Vec<bool>,
    abandoned: Option<String>,
}

/// Replays an [`InterleavingScript`] across real threads.
pub struct ScriptedScheduler {
    script: InterleavingScript,
    wait_timeout: Duration,
    state: Mutex<ScheduleState>,
    turn: Condvar,
}

impl ScriptedScheduler {
    pub fn new(script: InterleavingScript, roles_count: usize, wait_timeout: Duration) -> Self {
        debug_assert!(
            script.steps.iter().all(|s| s.role < roles_count),
            "script '{}' names a role outside 0..{}",
            script.name,
            roles_count
        );
        Self {
            script,
            wait_timeout,
            state: Mutex::new(ScheduleState {
                position: 0,
                steps_matched: 0,
                finished: vec![false; roles_count],
                abandoned: None,
            }),
            turn: Condvar::new(),
        }
    }

    fn abandon(&self, state: &mut ScheduleState, reason: String) {
        warn!(script = %self.script.name, position = state.position, %reason, "abandoning forced interleaving");
        state.abandoned = Some(reason);
        self.turn.notify_all();
    }

    pub fn stats(&self) -> ScheduleStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ScheduleStats {
            script_name: self.script.name.clone(),
            steps_total: self.script.steps.len(),
            steps_matched: state.steps_matched,
            abandoned: state.abandoned.clone(),
        }
    }
}

impl Interleaver for ScriptedScheduler {
    fn yield_point(&self, role: usize, point: YieldPoint) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if state.abandoned.is_some() {
                return;
            }
            let Some(step) = self.script.steps.get(state.position) else {
                return;
            };

            if step.role == role {
                if step.point != point {
                    // Running toward its designated point.
                    return;
                }
                debug!(script = %self.script.name, role, %point, position = state.position, "script step reached");
                state.position += 1;
                state.steps_matched += 1;
                self.turn.notify_all();
                continue;
            }

            let designated = step.role;
            if state.finished.get(designated).copied().unwrap_or(true) {
                let reason = format!("role {} finished before reaching {}", designated, step.point);
                self.abandon(&mut state, reason);
                return;
            }

            let position = state.position;
            let target = step.point;
            let (guard, wait) = self
                .turn
                .wait_timeout(state, self.wait_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if wait.timed_out() && state.position == position && state.abandoned.is_none() {
                let reason = format!(
                    "role {} did not reach {} within {:?}",
                    designated, target, self.wait_timeout
                );
                self.abandon(&mut state, reason);
                return;
            }
        }
    }

    fn role_finished(&self, role: usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.finished.get_mut(role) {
            *slot = true;
        }
        self.turn.notify_all();
    }
}

/// Seeded random perturbation: at each yield point, with probability
/// `yield_probability`, give up the CPU.
pub struct RandomYield {
    rng: Mutex<StdRng>,
    yield_probability: f64,
}

/// Longest pause injected at one yield point.
const PAUSE_MICROS_MAX: u64 = 50;

impl RandomYield {
    pub fn new(seed: u64, yield_probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&yield_probability),
            "yield probability must be in [0, 1]"
        );
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            yield_probability: yield_probability.clamp(0.0, 1.0),
        }
    }
}

impl Interleaver for RandomYield {
    fn yield_point(&self, _role: usize, _point: YieldPoint) {
        let pause = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            if !rng.gen_bool(self.yield_probability) {
                return;
            }
            rng.gen_range(0..=PAUSE_MICROS_MAX)
        };
        if pause == 0 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Duration::from_micros(pause));
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::scenario::ScenarioBuilder;

    fn ids() -> (FieldId, LockId) {
        let mut b = ScenarioBuilder::new("ids");
        (b.counter("data", 0), b.mutex("m"))
    }

    #[test]
    fn test_script_builder() {
        let (field, lock) = ids();
        let script = InterleavingScript::new("lost_update")
            .with_description("role 0 reads, role 1 writes, role 0 writes stale")
            .then(0, YieldPoint::BeforeStore(field))
            .then(1, YieldPoint::AfterStore(field))
            .then(0, YieldPoint::AfterRelease(lock));
        assert_eq!(script.len(), 3);
        assert_eq!(script.steps[1].role, 1);
        assert_eq!(script.steps[0].point.to_string(), "before_store(field#0)");
    }

    #[test]
    fn test_scheduler_orders_roles() {
        let (field, _) = ids();
        let script = InterleavingScript::new("order")
            .then(1, YieldPoint::AfterStore(field))
            .then(0, YieldPoint::AfterStore(field));
        let sched = Arc::new(ScriptedScheduler::new(script, 2, Duration::from_secs(2)));
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..2)
            .map(|role| {
                let (sched, order) = (Arc::clone(&sched), Arc::clone(&order));
                std::thread::spawn(move || {
                    sched.yield_point(role, YieldPoint::StepStart(0));
                    order.lock().unwrap().push(role);
                    sched.yield_point(role, YieldPoint::AfterStore(field));
                    sched.role_finished(role);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![1, 0]);
        let stats = sched.stats();
        assert!(stats.complete(), "{}", stats.format());
        assert_eq!(stats.steps_matched, 2);
    }

    #[test]
    fn test_scheduler_abandons_when_designated_role_finishes() {
        let (field, _) = ids();
        let script = InterleavingScript::new("unreachable")
            .then(0, YieldPoint::BeforeStore(field))
            .then(1, YieldPoint::AfterStore(field));
        let sched = ScriptedScheduler::new(script, 2, Duration::from_secs(2));

        // Role 0 never reaches its point.
        sched.role_finished(0);
        sched.yield_point(1, YieldPoint::StepStart(0));

        let stats = sched.stats();
        assert!(!stats.complete());
        assert!(stats.abandoned.unwrap().contains("finished"));
    }

    #[test]
    fn test_scheduler_abandons_on_timeout() {
        let (field, _) = ids();
        let script = InterleavingScript::new("stuck").then(0, YieldPoint::AfterStore(field));
        let sched = ScriptedScheduler::new(script, 2, Duration::from_millis(20));

        // Role 0 is alive but never arrives; role 1 must not park forever.
        sched.yield_point(1, YieldPoint::StepStart(0));
        assert!(sched.stats().abandoned.unwrap().contains("did not reach"));
    }

    #[test]
    fn test_random_yield_extremes() {
        let never = RandomYield::new(7, 0.0);
        let always = RandomYield::new(7, 1.0);
        for _ in 0..10 {
            never.yield_point(0, YieldPoint::StepStart(0));
            always.yield_point(1, YieldPoint::StepStart(0));
        }
    }
}
