//! rf-run: run one race fixture and report its verdict.
//!
//! # Usage
//!
//! ```bash
//! rf-run --list
//! rf-run svf 3 -2
//! rf-run stateful-split --adversarial
//! DST_SEED=42 rf-run sync02 --repeat 500 --yield-probability 0.3 --json
//! ```
//!
//! Exit status 0 means the invariant held. Any fatal verdict (invariant
//! violation, hang, misuse, panic) prints diagnostics to stderr and aborts
//! the process. Usage errors exit with status 2.

use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rf_dst::HarnessConfig;
use rf_runner::{execute, RunReport, RunRequest};

/// Upper bound on the join timeout accepted from the command line.
const JOIN_TIMEOUT_MS_MAX: u64 = 600_000;

/// Exit status for usage errors (clap uses the same).
const EXIT_USAGE: i32 = 2;

/// Run a two-thread race fixture.
#[derive(Parser, Debug)]
#[command(name = "rf-run")]
#[command(about = "Run a two-thread race fixture and check its invariant")]
struct Cli {
    /// Scenario name (see --list).
    #[arg(required_unless_present = "list")]
    scenario: Option<String>,

    /// Positional integer inputs, bound to the scenario's parameters in order.
    #[arg(allow_negative_numbers = true)]
    values: Vec<i64>,

    /// List the catalog and exit.
    #[arg(long)]
    list: bool,

    /// Run the scenario this many times, stopping at the first failure.
    #[arg(long, default_value_t = 1)]
    repeat: u64,

    /// Join timeout in milliseconds; a role still running after it is a hang.
    #[arg(
        long,
        default_value_t = rf_dst::JOIN_TIMEOUT_DEFAULT.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..=JOIN_TIMEOUT_MS_MAX)
    )]
    join_timeout_ms: u64,

    /// Perturbation seed (DST_SEED or random if not set).
    #[arg(long)]
    seed: Option<u64>,

    /// Probability of yielding at each yield point. Enables perturbation.
    #[arg(long)]
    yield_probability: Option<f64>,

    /// Force the fixture's losing schedule.
    #[arg(long)]
    adversarial: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn list() {
    for fixture in rf_scenarios::catalog() {
        let label = match (fixture.build)() {
            Ok(def) => def.intent().label(),
            Err(e) => {
                error!(scenario = fixture.name, error = %e, "fixture failed to build");
                "invalid"
            }
        };
        println!("{:<16} {:<18} {}", fixture.name, label, fixture.summary);
    }
}

fn request(cli: &Cli, scenario: String) -> RunRequest {
    let join_timeout = Duration::from_millis(cli.join_timeout_ms);

    let mut config = HarnessConfig::default().with_join_timeout(join_timeout);
    if let Some(p) = cli.yield_probability {
        let seed = cli.seed.unwrap_or_else(rf_dst::get_or_generate_seed);
        config = config.with_perturbation(seed, p);
    }

    RunRequest {
        scenario,
        values: cli.values.clone(),
        iterations: cli.repeat,
        adversarial: cli.adversarial,
        config,
    }
}

fn print_human(report: &RunReport) {
    let status = if report.passed { "PASS" } else { "FAIL" };
    println!("[{}] {} ({}) inputs: {}", status, report.scenario, report.intent, report.inputs);
    if report.iterations_requested > 1 {
        println!(
            "  iterations: {}/{}",
            report.iterations_passed, report.iterations_requested
        );
    }
    for check in &report.checks {
        println!("  {}", check.format_status());
    }
    if let Some(state) = &report.final_state {
        println!("  Final: {}", state);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list {
        list();
        return;
    }

    let Some(scenario) = cli.scenario.clone() else {
        eprintln!("Error: a scenario name is required");
        process::exit(EXIT_USAGE);
    };

    let report = match execute(&request(&cli, scenario)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_USAGE);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "failed to serialize report"),
        }
    } else {
        print_human(&report);
    }

    if report.passed {
        info!(scenario = %report.scenario, "invariant held");
        return;
    }

    eprintln!("{}", report.summary());
    if let Some(seed) = report.dst_seed {
        eprintln!("DST_SEED={seed}");
    }
    for hazard in &report.hazards {
        eprintln!("  hazard: {hazard}");
    }
    if let Some(diagram) = &report.counterexample {
        eprintln!("\nCounterexample:\n{diagram}");
    }
    process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_join_timeout_is_a_usage_error() {
        let err = Cli::try_parse_from(["rf-run", "sync02", "--join-timeout-ms", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn test_join_timeout_above_max_is_rejected() {
        let too_long = (JOIN_TIMEOUT_MS_MAX + 1).to_string();
        assert!(Cli::try_parse_from(["rf-run", "sync02", "--join-timeout-ms", &too_long]).is_err());
    }

    #[test]
    fn test_negative_inputs_parse() {
        let cli = Cli::try_parse_from(["rf-run", "svf", "3", "-2", "--join-timeout-ms", "250"]).unwrap();
        assert_eq!(cli.values, vec![3, -2]);
        let req = request(&cli, "svf".to_string());
        assert_eq!(req.config.join_timeout, Duration::from_millis(250));
    }
}
