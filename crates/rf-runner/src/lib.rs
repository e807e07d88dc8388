//! # rf-runner
//!
//! Process-level wrapper around the harness: resolves a catalog name and
//! positional inputs into a run, and shapes the verdict for humans and for
//! JSON consumers.
//!
//! The binary (`rf-run`) exits 0 when the invariant holds and aborts the
//! process on any fatal verdict, so an external detector sees the same exit
//! signal it would from a crashing benchmark.

use rf_core::{FinalState, Hazard, InputError, Inputs, PropertyResult};
use rf_dst::{
    FatalKind, HarnessConfig, RepeatReport, RunOutcome, ScenarioDef, ScenarioHarness,
    ScheduleStats,
};
use rf_scenarios::CatalogError;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Errors that stop a run before any thread is spawned. These are usage
/// errors, not verdicts.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("{scenario}: {source}")]
    Input {
        scenario: String,
        #[source]
        source: InputError,
    },

    #[error("{scenario} has no losing schedule for {inputs}")]
    NoLosingSchedule { scenario: String, inputs: String },

    #[error("yield probability must be within [0, 1], got {0}")]
    YieldProbability(f64),

    #[error("--repeat must be at least 1")]
    ZeroIterations,
}

/// How the binary should drive the harness.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub scenario: String,
    pub values: Vec<i64>,
    pub iterations: u64,
    pub adversarial: bool,
    pub config: HarnessConfig,
}

/// Serializable verdict of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub intent: String,
    pub inputs: Inputs,
    pub passed: bool,
    pub kind: Option<FatalKind>,
    pub fatal: Option<String>,
    pub checks: Vec<PropertyResult>,
    /// Absent when every repeated iteration passed.
    pub final_state: Option<FinalState>,
    pub hazards: Vec<Hazard>,
    pub schedule: Option<ScheduleStats>,
    pub dst_seed: Option<u64>,
    pub iterations_requested: u64,
    pub iterations_passed: u64,
    /// Interleaving diagram of the failing run.
    pub counterexample: Option<String>,
}

impl RunReport {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let passed = outcome.passed();
        Self {
            scenario: outcome.scenario.clone(),
            intent: outcome.intent.to_string(),
            inputs: outcome.inputs.clone(),
            passed,
            kind: outcome.kind(),
            fatal: outcome.fatal.as_ref().map(ToString::to_string),
            checks: outcome.checks.clone(),
            final_state: Some(outcome.final_state.clone()),
            hazards: outcome.hazards(),
            schedule: outcome.schedule.clone(),
            dst_seed: outcome.dst_seed,
            iterations_requested: 1,
            iterations_passed: u64::from(passed),
            counterexample: (!passed).then(|| outcome.counterexample().render_diagram()),
        }
    }

    /// Report for a repeated run. A failure contributes its outcome; a clean
    /// series only carries counts.
    pub fn from_repeat(def: &ScenarioDef, inputs: &Inputs, report: &RepeatReport) -> Self {
        match &report.failure {
            Some((_, outcome)) => Self {
                iterations_requested: report.iterations_requested,
                iterations_passed: report.iterations_passed,
                ..Self::from_outcome(outcome)
            },
            None => Self {
                scenario: report.scenario.clone(),
                intent: def.intent().resolve(inputs).to_string(),
                inputs: inputs.clone(),
                passed: true,
                kind: None,
                fatal: None,
                checks: Vec::new(),
                final_state: None,
                hazards: Vec::new(),
                schedule: None,
                dst_seed: None,
                iterations_requested: report.iterations_requested,
                iterations_passed: report.iterations_passed,
                counterexample: None,
            },
        }
    }

    /// Failure kind plus the innermost cause, on one line.
    pub fn summary(&self) -> String {
        match (&self.kind, &self.fatal) {
            (Some(kind), Some(fatal)) => format!("{}: {:?}: {}", self.scenario, kind, fatal),
            _ => format!(
                "{}: ok ({}/{} iterations)",
                self.scenario, self.iterations_passed, self.iterations_requested
            ),
        }
    }
}

/// Resolve `request` and run it to a verdict.
pub fn execute(request: &RunRequest) -> Result<RunReport, CliError> {
    if request.iterations == 0 {
        return Err(CliError::ZeroIterations);
    }
    if let Some(p) = &request.config.perturbation {
        if !(0.0..=1.0).contains(&p.yield_probability) {
            return Err(CliError::YieldProbability(p.yield_probability));
        }
    }

    let def = rf_scenarios::build(&request.scenario)?;
    let inputs = def.bind(&request.values).map_err(|source| CliError::Input {
        scenario: request.scenario.clone(),
        source,
    })?;

    let mut config = request.config.clone();
    if request.adversarial {
        let script = rf_scenarios::losing_schedule(&def, &inputs).ok_or_else(|| {
            CliError::NoLosingSchedule {
                scenario: request.scenario.clone(),
                inputs: inputs.to_string(),
            }
        })?;
        config = config.with_script(script);
    }

    info!(
        scenario = %def.name(),
        inputs = %inputs,
        iterations = request.iterations,
        adversarial = request.adversarial,
        "running scenario"
    );
    let harness = ScenarioHarness::new(config);
    let report = if request.iterations == 1 {
        RunReport::from_outcome(&harness.run(&def, &inputs))
    } else {
        RunReport::from_repeat(
            &def,
            &inputs,
            &harness.run_repeated(&def, &inputs, request.iterations),
        )
    };
    Ok(report)
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(scenario: &str, values: &[i64]) -> RunRequest {
        RunRequest {
            scenario: scenario.to_string(),
            values: values.to_vec(),
            iterations: 1,
            adversarial: false,
            config: HarnessConfig::quick(),
        }
    }

    #[test]
    fn test_execute_passing_fixture() {
        let report = execute(&request("stateful001", &[])).unwrap();
        assert!(report.passed);
        assert_eq!(report.intent, "intended-correct");
        let state = report.final_state.unwrap();
        assert_eq!(state.value_of("data1"), Some(16));
        assert_eq!(state.value_of("data2"), Some(5));
        assert!(report.counterexample.is_none());
    }

    #[test]
    fn test_execute_unknown_scenario() {
        let err = execute(&request("sync01", &[])).unwrap_err();
        assert!(matches!(err, CliError::Catalog(CatalogError::Unknown(_))));
        assert_eq!(err.to_string(), "unknown scenario 'sync01'");
    }

    #[test]
    fn test_execute_rejects_extra_values() {
        let err = execute(&request("svf", &[1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            CliError::Input {
                source: InputError::TooManyValues { found: 3, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_missing_values_bind_to_zero() {
        let report = execute(&request("svf", &[4])).unwrap();
        assert!(report.passed);
        assert_eq!(report.inputs.get("y"), Some(0));
    }

    #[test]
    fn test_adversarial_run_fails_with_counterexample() {
        let mut req = request("stateful-split", &[]);
        req.adversarial = true;
        req.config = HarnessConfig::default().with_join_timeout(Duration::from_secs(2));

        let report = execute(&req).unwrap();
        assert!(!report.passed);
        assert_eq!(report.kind, Some(FatalKind::InvariantViolation));
        assert!(report.counterexample.is_some());
        assert!(report
            .hazards
            .iter()
            .any(|h| matches!(h, Hazard::LostUpdate { .. })));
    }

    #[test]
    fn test_adversarial_needs_losing_schedule() {
        let mut req = request("sync02", &[]);
        req.adversarial = true;
        assert!(matches!(
            execute(&req),
            Err(CliError::NoLosingSchedule { .. })
        ));
    }

    #[test]
    fn test_repeat_report_counts() {
        let mut req = request("stateful-coarse", &[]);
        req.iterations = 5;
        let report = execute(&req).unwrap();
        assert!(report.passed);
        assert_eq!((report.iterations_requested, report.iterations_passed), (5, 5));
        assert!(report.final_state.is_none());
    }

    #[test]
    fn test_rejects_bad_probability() {
        let mut req = request("stateful001", &[]);
        req.config = req.config.with_perturbation(7, 1.5);
        assert!(matches!(execute(&req), Err(CliError::YieldProbability(_))));
    }

    #[test]
    fn test_report_serializes() {
        let report = execute(&request("sync02", &[])).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenario"], "sync02");
        assert_eq!(json["passed"], true);
        assert!(json["kind"].is_null());
    }
}
