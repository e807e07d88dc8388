//! Thread roles: the ordered steps one thread of a scenario executes.
//!
//! | Step | Locks | Effect |
//! |------|-------|--------|
//! | `Atomic` | listed set, in order | mutations under the lock set, split per [`Granularity`] |
//! | `Unguarded` | none | mutations with no synchronization |
//! | `Handoff` | one | bounded producer/consumer over one counter |
//! | `Locked` | listed set | nested steps run while the set is held |
//! | `Branch` | none | picks an arm by evaluating a condition over the inputs |
//! | `Nested` | none | runs a whole sub-scenario to completion |
//!
//! Multiple locks are taken in listed order and released in reverse. Two
//! roles listing the same locks in opposite orders is how lock-order
//! inversion is expressed.

use std::cell::Cell;
use std::sync::Arc;

use rf_core::{AccessObserver, AccessPoint, Condition, EventKind, FieldId};

use crate::env::RunEnv;
use crate::error::FatalError;
use crate::interleaving::YieldPoint;
use crate::scenario::{CondvarId, LockId, ScenarioDef};
use crate::sync::{LockGuard, SyncError};

/// Add `delta` to one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    pub field: FieldId,
    pub delta: i64,
}

impl Mutation {
    fn from_pairs(pairs: &[(FieldId, i64)]) -> Vec<Mutation> {
        pairs
            .iter()
            .map(|&(field, delta)| Mutation { field, delta })
            .collect()
    }
}

/// How an `Atomic` step spreads its mutations over lock acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// One acquisition for every mutation.
    #[default]
    Coarse,
    /// Release and re-acquire between mutations.
    PerMutation,
    /// The load and the store of each mutation in separate acquisitions.
    /// Another role can commit in between, so updates are lost.
    SplitReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffDirection {
    /// Wait while full, then increment.
    Produce,
    /// Wait while empty, then decrement.
    Consume,
}

/// Bounded producer/consumer protocol over one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub lock: LockId,
    pub field: FieldId,
    pub direction: HandoffDirection,
    /// The counter is full at this value.
    pub capacity: i64,
    /// Signaled by consumers, waited on by producers.
    pub not_full: CondvarId,
    /// Signaled by producers, waited on by consumers.
    pub not_empty: CondvarId,
}

#[derive(Debug, Clone)]
pub enum Step {
    Atomic {
        locks: Vec<LockId>,
        mutations: Vec<Mutation>,
        granularity: Granularity,
    },
    Unguarded {
        mutations: Vec<Mutation>,
    },
    Handoff(Handoff),
    Locked {
        locks: Vec<LockId>,
        body: Vec<Step>,
    },
    Branch {
        label: String,
        condition: Condition,
        then: Vec<Step>,
        otherwise: Vec<Step>,
    },
    Nested {
        scenario: Arc<ScenarioDef>,
    },
}

impl Step {
    pub fn atomic(locks: &[LockId], mutations: &[(FieldId, i64)]) -> Self {
        Self::Atomic {
            locks: locks.to_vec(),
            mutations: Mutation::from_pairs(mutations),
            granularity: Granularity::Coarse,
        }
    }

    pub fn unguarded(mutations: &[(FieldId, i64)]) -> Self {
        Self::Unguarded {
            mutations: Mutation::from_pairs(mutations),
        }
    }

    pub fn locked(locks: &[LockId], body: Vec<Step>) -> Self {
        Self::Locked {
            locks: locks.to_vec(),
            body,
        }
    }

    pub fn nested(scenario: Arc<ScenarioDef>) -> Self {
        Self::Nested { scenario }
    }

    /// Label recorded when the step starts.
    pub fn label(&self) -> String {
        match self {
            Self::Atomic { granularity, .. } => match granularity {
                Granularity::Coarse => "atomic".to_string(),
                Granularity::PerMutation => "atomic per-mutation".to_string(),
                Granularity::SplitReadWrite => "atomic split".to_string(),
            },
            Self::Unguarded { .. } => "unguarded".to_string(),
            Self::Handoff(h) => match h.direction {
                HandoffDirection::Produce => "produce".to_string(),
                HandoffDirection::Consume => "consume".to_string(),
            },
            Self::Locked { .. } => "locked".to_string(),
            Self::Branch { label, .. } => format!("branch {}", label),
            Self::Nested { scenario } => format!("nested {}", scenario.name()),
        }
    }

    fn execute(&self, ctx: &RoleCtx<'_>) -> Result<(), FatalError> {
        ctx.begin_step(self);
        match self {
            Self::Atomic {
                locks,
                mutations,
                granularity,
            } => match granularity {
                Granularity::Coarse => {
                    let held = ctx.lock_all(locks)?;
                    for m in mutations {
                        ctx.apply(m);
                    }
                    drop(held);
                }
                Granularity::PerMutation => {
                    for m in mutations {
                        let held = ctx.lock_all(locks)?;
                        ctx.apply(m);
                        drop(held);
                    }
                }
                Granularity::SplitReadWrite => {
                    let state = ctx.env.state();
                    for m in mutations {
                        let held = ctx.lock_all(locks)?;
                        let seen = state.load(m.field, ctx);
                        drop(held);

                        let held = ctx.lock_all(locks)?;
                        state.store(m.field, seen.wrapping_add(m.delta), ctx);
                        drop(held);
                    }
                }
            },
            Self::Unguarded { mutations } => {
                for m in mutations {
                    ctx.apply(m);
                }
            }
            Self::Handoff(h) => ctx.handoff(h)?,
            Self::Locked { locks, body } => {
                let held = ctx.lock_all(locks)?;
                run_steps(body, ctx)?;
                drop(held);
            }
            Self::Branch {
                label,
                condition,
                then,
                otherwise,
            } => {
                let taken = condition.holds(ctx.env.inputs());
                ctx.record(EventKind::BranchTaken {
                    label: label.clone(),
                    condition: condition.to_string(),
                    taken,
                });
                run_steps(if taken { then } else { otherwise }, ctx)?;
            }
            Self::Nested { scenario } => ctx.run_nested(scenario)?,
        }
        Ok(())
    }
}

fn run_steps(steps: &[Step], ctx: &RoleCtx<'_>) -> Result<(), FatalError> {
    steps.iter().try_for_each(|step| step.execute(ctx))
}

/// Named ordered list of steps. Built fluently.
#[derive(Debug, Clone)]
pub struct RoleDef {
    pub name: String,
    pub steps: Vec<Step>,
}

impl RoleDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Every mutation under one acquisition of `locks`.
    #[must_use]
    pub fn atomic(self, locks: &[LockId], mutations: &[(FieldId, i64)]) -> Self {
        self.step(Step::atomic(locks, mutations))
    }

    #[must_use]
    pub fn atomic_with(
        self,
        locks: &[LockId],
        mutations: &[(FieldId, i64)],
        granularity: Granularity,
    ) -> Self {
        self.step(Step::Atomic {
            locks: locks.to_vec(),
            mutations: Mutation::from_pairs(mutations),
            granularity,
        })
    }

    #[must_use]
    pub fn unguarded(self, mutations: &[(FieldId, i64)]) -> Self {
        self.step(Step::unguarded(mutations))
    }

    #[must_use]
    pub fn handoff(self, handoff: Handoff) -> Self {
        self.step(Step::Handoff(handoff))
    }

    #[must_use]
    pub fn locked(self, locks: &[LockId], body: Vec<Step>) -> Self {
        self.step(Step::locked(locks, body))
    }

    #[must_use]
    pub fn branch(
        self,
        label: impl Into<String>,
        condition: Condition,
        then: Vec<Step>,
        otherwise: Vec<Step>,
    ) -> Self {
        self.step(Step::Branch {
            label: label.into(),
            condition,
            then,
            otherwise,
        })
    }

    #[must_use]
    pub fn nested(self, scenario: Arc<ScenarioDef>) -> Self {
        self.step(Step::nested(scenario))
    }

    /// Run every step in order. Stops at the first fatal error.
    pub fn execute(&self, ctx: &RoleCtx<'_>) -> Result<(), FatalError> {
        debug_assert!(
            ctx.steps_started.get() == 0,
            "role context reused across executions"
        );
        run_steps(&self.steps, ctx)
    }
}

/// Per-thread view of the run environment while a role executes.
///
/// Reports every counter access and lock transition to the trace and the
/// interleaver.
pub struct RoleCtx<'a> {
    role: usize,
    name: &'a str,
    env: &'a RunEnv,
    steps_started: Cell<usize>,
}

impl<'a> RoleCtx<'a> {
    pub fn new(role: usize, name: &'a str, env: &'a RunEnv) -> Self {
        Self {
            role,
            name,
            env,
            steps_started: Cell::new(0),
        }
    }

    pub fn role(&self) -> usize {
        self.role
    }

    fn record(&self, kind: EventKind) {
        self.env.trace().record(self.role, kind);
    }

    fn yield_at(&self, point: YieldPoint) {
        if let Some(interleaver) = self.env.interleaver() {
            interleaver.yield_point(self.role, point);
        }
    }

    fn misuse(&self, source: SyncError) -> FatalError {
        FatalError::Misuse {
            role: self.name.to_string(),
            source,
        }
    }

    fn begin_step(&self, step: &Step) {
        let n = self.steps_started.get();
        self.steps_started.set(n + 1);
        self.yield_at(YieldPoint::StepStart(n));
        self.record(EventKind::StepStart {
            step: n,
            label: step.label(),
        });
    }

    fn apply(&self, m: &Mutation) {
        self.env.state().add(m.field, m.delta, self);
    }

    fn lock(&self, id: LockId) -> Result<HeldLock<'_>, FatalError> {
        let mutex = self.env.lock(id);
        self.record(EventKind::Acquiring {
            lock: mutex.name().to_string(),
        });
        let guard = mutex.acquire().map_err(|e| self.misuse(e))?;
        self.record(EventKind::Acquired {
            lock: mutex.name().to_string(),
        });
        self.yield_at(YieldPoint::AfterAcquire(id));
        Ok(HeldLock {
            ctx: self,
            id,
            guard: Some(guard),
        })
    }

    /// Take `locks` in order. Dropping the returned vector releases them in
    /// reverse.
    fn lock_all(&self, locks: &[LockId]) -> Result<HeldLocks<'_>, FatalError> {
        let mut held = Vec::with_capacity(locks.len());
        for &id in locks {
            held.push(self.lock(id)?);
        }
        Ok(HeldLocks(held))
    }

    fn handoff(&self, h: &Handoff) -> Result<(), FatalError> {
        let (wait_on, wake, delta) = match h.direction {
            HandoffDirection::Produce => (h.not_full, h.not_empty, 1),
            HandoffDirection::Consume => (h.not_empty, h.not_full, -1),
        };
        let state = self.env.state();
        let blocked = || match h.direction {
            HandoffDirection::Produce => state.peek(h.field) >= h.capacity,
            HandoffDirection::Consume => state.peek(h.field) <= 0,
        };

        let held = self.lock(h.lock)?;
        let cv = self.env.condvar(wait_on);
        if blocked() {
            self.record(EventKind::Waiting {
                condvar: cv.name().to_string(),
            });
        }
        let wakeups = cv
            .wait_while(self.env.lock(h.lock), blocked)
            .map_err(|e| self.misuse(e))?;
        if wakeups > 0 {
            self.record(EventKind::Woken {
                condvar: cv.name().to_string(),
                wakeups,
            });
            self.yield_at(YieldPoint::AfterWake(wait_on));
        }

        state.add(h.field, delta, self);
        drop(held);

        let signaled = self.env.condvar(wake);
        self.record(EventKind::Signaled {
            condvar: signaled.name().to_string(),
        });
        signaled.signal();
        Ok(())
    }

    fn run_nested(&self, scenario: &ScenarioDef) -> Result<(), FatalError> {
        self.record(EventKind::NestedStart {
            scenario: scenario.name().to_string(),
        });
        let result = self.run_nested_scenario(scenario);
        self.record(EventKind::NestedEnd {
            scenario: scenario.name().to_string(),
            passed: result.is_ok(),
        });
        result.map_err(|source| FatalError::Nested {
            scenario: scenario.name().to_string(),
            source: Box::new(source),
        })
    }

    #[cfg(not(loom))]
    fn run_nested_scenario(&self, scenario: &ScenarioDef) -> Result<(), FatalError> {
        let harness = crate::harness::ScenarioHarness::new(self.env.nested_config().clone());
        let inputs = scenario.bind(&[])?;
        match harness.run(scenario, &inputs).fatal {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }

    #[cfg(loom)]
    fn run_nested_scenario(&self, _scenario: &ScenarioDef) -> Result<(), FatalError> {
        Err(FatalError::Unsupported("nested scenarios under loom"))
    }
}

impl AccessObserver for RoleCtx<'_> {
    fn on_access(&self, field: FieldId, point: AccessPoint) {
        match point {
            AccessPoint::BeforeLoad => self.yield_at(YieldPoint::BeforeLoad(field)),
            AccessPoint::AfterLoad(value) => self.record(EventKind::Load {
                field: self.env.state().name(field).to_string(),
                value,
            }),
            AccessPoint::BeforeStore(_) => self.yield_at(YieldPoint::BeforeStore(field)),
            AccessPoint::AfterStore(value) => {
                self.record(EventKind::Store {
                    field: self.env.state().name(field).to_string(),
                    value,
                });
                self.yield_at(YieldPoint::AfterStore(field));
            }
        }
    }
}

/// One held lock. Releasing records the event, then reports the yield point.
struct HeldLock<'c> {
    ctx: &'c RoleCtx<'c>,
    id: LockId,
    guard: Option<LockGuard<'c>>,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let name = guard.mutex().name().to_string();
        drop(guard);
        self.ctx.record(EventKind::Released { lock: name });
        self.ctx.yield_at(YieldPoint::AfterRelease(self.id));
    }
}

/// Locks taken by one step. Released in reverse order of acquisition.
struct HeldLocks<'c>(Vec<HeldLock<'c>>);

impl Drop for HeldLocks<'_> {
    fn drop(&mut self) {
        while let Some(held) = self.0.pop() {
            drop(held);
        }
    }
}
