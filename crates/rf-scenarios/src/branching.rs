//! Input-selected scenarios over four counters.
//!
//! All four start at `data1..data4 = -1`. Role 1 increments each counter
//! once; role 2 picks its accesses by the signs of the inputs `x` and `y`.
//! Zero routes with the negatives (`x <= 0`).
//!
//! | Scenario | Role 2 | Intent | Invariant |
//! |----------|--------|--------|-----------|
//! | `svf` | one of four quadrant arms, each `addN` under `m` with a nested sub-scenario | correct | `sum == 2` |
//! | `svf-unguarded` | same, but quadrant `x > 0 && y > 0` runs `add1` outside `m` | racy when `x > 0 && y > 0` | `sum == 2` |
//! | `spf` | two locked `addN`; role 1 increments `data4` without the lock | racy when `data4` is shared | `x > 0 \|\| y > 0 \|\| data4 == 1` |
//! | `input-case` | `+2` to one of `data1/data2` and one of `data3/data4`, no locks at all | racy | `sum == 4` |

use std::sync::Arc;

use rf_core::{Condition, FieldId, Inputs, Invariant};
use rf_dst::{
    DefinitionError, Intent, InterleavingScript, LockId, RoleDef, ScenarioBuilder, ScenarioDef,
    Step, YieldPoint,
};

use crate::handoff::sync02;
use crate::stateful::{stateful001, stateful002};

const DATA_INITIAL: i64 = -1;
const SVF_SUM_EXPECTED: i64 = 2;
const INPUT_CASE_SUM_EXPECTED: i64 = 4;

struct Quad {
    builder: ScenarioBuilder,
    data: [FieldId; 4],
}

fn quad(name: &str) -> Quad {
    let mut builder = ScenarioBuilder::new(name);
    builder.param("x").param("y");
    let data = [
        builder.counter("data1", DATA_INITIAL),
        builder.counter("data2", DATA_INITIAL),
        builder.counter("data3", DATA_INITIAL),
        builder.counter("data4", DATA_INITIAL),
    ];
    Quad { builder, data }
}

fn x_pos() -> Condition {
    Condition::positive("x")
}

fn y_pos() -> Condition {
    Condition::positive("y")
}

/// `x <= 0 && y <= 0`
fn both_not_positive() -> Condition {
    Condition::not_positive("x").and(Condition::not_positive("y"))
}

// =============================================================================
// svf: quadrant arms with nested sub-scenarios
// =============================================================================

/// The four `addN` helpers: bump one counter, then run a whole benchmark.
struct Adders {
    data: [FieldId; 4],
    nested: [Arc<ScenarioDef>; 4],
}

impl Adders {
    fn new(data: [FieldId; 4]) -> Result<Self, DefinitionError> {
        // There is no sync01 fixture; add1 and add2 both nest sync02.
        Ok(Self {
            data,
            nested: [
                Arc::new(sync02()?),
                Arc::new(sync02()?),
                Arc::new(stateful001()?),
                Arc::new(stateful002()?),
            ],
        })
    }

    /// `addN()` as a list of steps. `n` is 1-based.
    fn add(&self, n: usize) -> Vec<Step> {
        debug_assert!((1..=4).contains(&n), "add{} does not exist", n);
        vec![
            Step::unguarded(&[(self.data[n - 1], 1)]),
            Step::nested(Arc::clone(&self.nested[n - 1])),
        ]
    }

    /// `lock(); addN(); unlock();`
    fn locked_add(&self, m: LockId, n: usize) -> Step {
        Step::locked(&[m], self.add(n))
    }
}

fn svf_scenario(
    name: &str,
    description: &str,
    intent: Intent,
    guard_first_quadrant: bool,
) -> Result<ScenarioDef, DefinitionError> {
    let Quad { mut builder, data } = quad(name);
    let m = builder.mutex("m");
    let adders = Adders::new(data)?;

    let first_quadrant = if guard_first_quadrant {
        vec![adders.locked_add(m, 1), adders.locked_add(m, 3)]
    } else {
        // BUG: add1 runs without m while role 1 holds it for data1++.
        let mut steps = adders.add(1);
        steps.push(adders.locked_add(m, 3));
        steps
    };

    let role2 = RoleDef::new("thread2").branch(
        "x>0 && y>0",
        x_pos().and(y_pos()),
        first_quadrant,
        vec![Step::Branch {
            label: "x>0 && y<=0".to_string(),
            condition: x_pos().and(Condition::not_positive("y")),
            then: vec![adders.locked_add(m, 1), adders.locked_add(m, 4)],
            otherwise: vec![Step::Branch {
                label: "x<=0 && y>0".to_string(),
                condition: Condition::not_positive("x").and(y_pos()),
                then: vec![adders.locked_add(m, 2), adders.locked_add(m, 3)],
                otherwise: vec![Step::Branch {
                    label: "x<=0 && y<=0".to_string(),
                    condition: both_not_positive(),
                    then: vec![adders.locked_add(m, 2), adders.locked_add(m, 4)],
                    otherwise: Vec::new(),
                }],
            }],
        }],
    );

    let increments: Vec<(FieldId, i64)> = data.iter().map(|&d| (d, 1)).collect();
    builder
        .description(description)
        .intent(intent)
        .role(RoleDef::new("thread1").atomic(&[m], &increments))
        .role(role2)
        .invariant(Invariant::sum_equals(&data, SVF_SUM_EXPECTED));
    builder.build()
}

/// Every arm of role 2 holds `m` around each `addN`.
pub fn svf() -> Result<ScenarioDef, DefinitionError> {
    svf_scenario(
        "svf",
        "four-way input branch, every addN under the lock, nested benchmarks",
        Intent::Correct,
        true,
    )
}

/// BUG: for `x > 0 && y > 0`, `add1` is called without `m`.
pub fn svf_unguarded() -> Result<ScenarioDef, DefinitionError> {
    svf_scenario(
        "svf-unguarded",
        "svf with add1 outside the lock in the x>0 && y>0 arm",
        Intent::InputConditioned {
            racy_when: x_pos().and(y_pos()),
        },
        false,
    )
}

/// Role 2 loads `data1` unguarded and parks; role 1 commits its locked
/// `data1++`; role 2 writes back the stale value.
pub(crate) fn svf_unguarded_window(def: &ScenarioDef, inputs: &Inputs) -> Option<InterleavingScript> {
    if !x_pos().and(y_pos()).holds(inputs) {
        return None;
    }
    let data1 = def.field("data1")?;
    let m = def.lock("m")?;
    Some(
        InterleavingScript::new("svf_unguarded_add1")
            .with_description("thread1's locked data1++ lands inside thread2's unguarded add1")
            .then(1, YieldPoint::BeforeStore(data1))
            .then(0, YieldPoint::AfterRelease(m)),
    )
}

// =============================================================================
// spf: locked helpers, one unguarded increment
// =============================================================================

/// BUG: role 1 increments `data4` without the lock, racing with `add4`
/// whenever role 2 takes the last arm (`x == 0`, or `x < 0 && y <= 0`).
/// The invariant only observes the race for `x <= 0 && y <= 0`.
pub fn spf() -> Result<ScenarioDef, DefinitionError> {
    let Quad { mut builder, data } = quad("spf");
    let [d1, d2, d3, d4] = data;
    let m = builder.mutex("m");
    let add = |d: FieldId| Step::atomic(&[m], &[(d, 1)]);

    let role2 = RoleDef::new("thread2").branch(
        "x>0 && y>0",
        x_pos().and(y_pos()),
        vec![add(d1), add(d2)],
        vec![Step::Branch {
            label: "x>0".to_string(),
            condition: x_pos(),
            then: vec![add(d1), add(d3)],
            otherwise: vec![Step::Branch {
                label: "x<0 && y>0".to_string(),
                condition: Condition::negative("x").and(y_pos()),
                then: vec![add(d2), add(d3)],
                otherwise: vec![add(d2), add(d4)],
            }],
        }],
    );

    builder
        .description("locked addN helpers, thread1 increments data4 without the lock")
        .intent(Intent::InputConditioned {
            racy_when: both_not_positive().or(Condition::zero("x")),
        })
        .role(
            RoleDef::new("thread1")
                .atomic(&[m], &[(d1, 1)])
                .atomic(&[m], &[(d2, 1)])
                .atomic(&[m], &[(d3, 1)])
                .unguarded(&[(d4, 1)]),
        )
        .role(role2)
        .invariant(Invariant::implies(both_not_positive(), Invariant::equals(d4, 1)));
    builder.build()
}

/// Role 1 loads `data4` and parks before storing; role 2's locked `add4`
/// commits; role 1 overwrites it.
pub(crate) fn spf_window(def: &ScenarioDef, inputs: &Inputs) -> Option<InterleavingScript> {
    if !def.intent().is_racy_for(inputs) {
        return None;
    }
    let data4 = def.field("data4")?;
    Some(
        InterleavingScript::new("spf_data4")
            .with_description("thread2's add4 lands between thread1's load and store of data4")
            .then(0, YieldPoint::BeforeStore(data4))
            .then(1, YieldPoint::AfterStore(data4)),
    )
}

// =============================================================================
// input-case: no synchronization at all
// =============================================================================

/// BUG: neither role takes a lock. Every input combination shares one
/// counter from each pair with role 1.
pub fn input_case() -> Result<ScenarioDef, DefinitionError> {
    let Quad { mut builder, data } = quad("input-case");
    let [d1, d2, d3, d4] = data;
    let increments: Vec<(FieldId, i64)> = data.iter().map(|&d| (d, 1)).collect();

    let role2 = RoleDef::new("thread2")
        .branch(
            "x>0",
            x_pos(),
            vec![Step::unguarded(&[(d1, 2)])],
            vec![Step::unguarded(&[(d2, 2)])],
        )
        .branch(
            "y>0",
            y_pos(),
            vec![Step::unguarded(&[(d3, 2)])],
            vec![Step::unguarded(&[(d4, 2)])],
        );

    builder
        .description("unsynchronized increments, role 2 picks counters by input sign")
        .intent(Intent::Racy)
        .role(RoleDef::new("thread1").unguarded(&increments))
        .role(role2)
        .invariant(Invariant::sum_equals(&data, INPUT_CASE_SUM_EXPECTED));
    builder.build()
}

/// Lost update on whichever of `data1`/`data2` role 2 writes.
pub(crate) fn input_case_window(def: &ScenarioDef, inputs: &Inputs) -> Option<InterleavingScript> {
    let target = if x_pos().holds(inputs) {
        def.field("data1")?
    } else {
        def.field("data2")?
    };
    Some(
        InterleavingScript::new("input_case_lost_update")
            .with_description("thread2's += 2 lands between thread1's load and store")
            .then(0, YieldPoint::BeforeStore(target))
            .then(1, YieldPoint::AfterStore(target)),
    )
}
