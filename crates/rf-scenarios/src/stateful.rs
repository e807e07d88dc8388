//! Mutual exclusion over two counters.
//!
//! Both roles start from `data1 = data2 = 10`. Role 1 adds `+1` to each
//! counter, role 2 adds `+5` to `data1` and `-6` to `data2`. Under correct
//! locking every interleaving ends at `data1 == 16 && data2 == 5`.
//!
//! | Scenario | Locking | Intent |
//! |----------|---------|--------|
//! | `stateful001` | one acquisition of `ma` per mutation, `mb` declared and never taken | correct |
//! | `stateful002` | identical to `stateful001`, a separate instance | correct |
//! | `stateful-coarse` | both mutations under one acquisition | correct |
//! | `stateful-split` | load and store of each mutation in separate acquisitions | racy |

use rf_core::{FieldId, Invariant};
use rf_dst::{
    DefinitionError, Granularity, Intent, InterleavingScript, LockId, RoleDef, ScenarioBuilder,
    ScenarioDef, YieldPoint,
};

const DATA_INITIAL: i64 = 10;
const DATA1_EXPECTED: i64 = 16;
const DATA2_EXPECTED: i64 = 5;

struct Layout {
    builder: ScenarioBuilder,
    data1: FieldId,
    data2: FieldId,
    ma: LockId,
}

fn layout(name: &str) -> Layout {
    let mut builder = ScenarioBuilder::new(name);
    let data1 = builder.counter("data1", DATA_INITIAL);
    let data2 = builder.counter("data2", DATA_INITIAL);
    let ma = builder.mutex("ma");
    Layout {
        builder,
        data1,
        data2,
        ma,
    }
}

fn finish(
    mut l: Layout,
    description: &str,
    intent: Intent,
    granularity: Granularity,
) -> Result<ScenarioDef, DefinitionError> {
    let (d1, d2, ma) = (l.data1, l.data2, l.ma);
    l.builder
        .description(description)
        .intent(intent)
        .role(RoleDef::new("thread1").atomic_with(&[ma], &[(d1, 1), (d2, 1)], granularity))
        .role(RoleDef::new("thread2").atomic_with(&[ma], &[(d1, 5), (d2, -6)], granularity))
        .invariant(Invariant::all(vec![
            Invariant::equals(d1, DATA1_EXPECTED),
            Invariant::equals(d2, DATA2_EXPECTED),
        ]));
    l.builder.build()
}

/// Per-mutation locking of `ma`. A second mutex `mb` is declared and never
/// taken.
fn per_mutation(name: &str, description: &str) -> Result<ScenarioDef, DefinitionError> {
    let mut l = layout(name);
    l.builder.mutex("mb");
    finish(l, description, Intent::Correct, Granularity::PerMutation)
}

pub fn stateful001() -> Result<ScenarioDef, DefinitionError> {
    per_mutation(
        "stateful001",
        "two counters, each mutation in its own critical section",
    )
}

/// Same protocol as `stateful001`, kept as its own catalog entry.
pub fn stateful002() -> Result<ScenarioDef, DefinitionError> {
    per_mutation(
        "stateful002",
        "second instance of the stateful001 protocol",
    )
}

pub fn stateful_coarse() -> Result<ScenarioDef, DefinitionError> {
    finish(
        layout("stateful-coarse"),
        "two counters batched under one critical section",
        Intent::Correct,
        Granularity::Coarse,
    )
}

/// BUG: each mutation reads under one acquisition and writes under another,
/// so the other role's update can land in between and be overwritten.
pub fn stateful_split() -> Result<ScenarioDef, DefinitionError> {
    finish(
        layout("stateful-split"),
        "read and write of each mutation in separate critical sections",
        Intent::Racy,
        Granularity::SplitReadWrite,
    )
}

/// thread1 reads `data1`, releases, then thread2 commits `data1 += 5`
/// before thread1 writes back its stale value.
pub(crate) fn split_window(def: &ScenarioDef) -> Option<InterleavingScript> {
    let data1 = def.field("data1")?;
    let ma = def.lock("ma")?;
    Some(
        InterleavingScript::new("stateful_split_lost_update")
            .with_description("thread2 commits data1 between thread1's load and store")
            .then(0, YieldPoint::AfterRelease(ma))
            .then(1, YieldPoint::AfterStore(data1)),
    )
}
