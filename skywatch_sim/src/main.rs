//! Skywatch Scenario Harness CLI
//!
//! Run the arena engines against deterministic scenarios.

use anyhow::{bail, Context, Result};
use clap::Parser;
use skywatch_core::{ReconciliationConfig, SessionConfig, SimulationConfig};
use skywatch_sim::scenarios::ScenarioId;
use skywatch_sim::{format_timeout, ScenarioResult, ScenarioRunner};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Skywatch deterministic scenario CLI
#[derive(Parser, Debug)]
#[command(name = "skywatch-sim")]
#[command(about = "Run deterministic arena scenarios for Skywatch", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of targets to spawn (10-500)
    #[arg(short, long, default_value = "100")]
    targets: u32,

    /// Base target speed in units/second (10-100)
    #[arg(long, default_value = "20")]
    speed: f64,

    /// Simulated round-trip latency in milliseconds (10-200)
    #[arg(short, long, default_value = "20")]
    latency: u64,

    /// Seconds an entity stays offline before it is dropped
    #[arg(short, long, default_value = "10")]
    offline_timeout: u64,

    /// Poll rate of the reconciliation engine
    #[arg(long, default_value = "30")]
    fps: f64,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Scenario to run (steady, attrition, jitter, flaky, restart, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

impl Args {
    fn session(&self) -> Result<SessionConfig> {
        let reconciliation = ReconciliationConfig::default()
            .with_offline_timeout(Duration::from_secs(self.offline_timeout))
            .with_refresh_rate(self.fps)?;

        Ok(SessionConfig {
            simulation: SimulationConfig::new(self.targets, self.speed, self.latency),
            reconciliation,
        })
    }

    fn scenarios(&self) -> Result<Vec<ScenarioId>> {
        if self.scenario == "all" {
            return Ok(ScenarioId::all());
        }
        let scenario = self.scenario.parse().map_err(anyhow::Error::msg).with_context(|| {
            let names: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
            format!("Available scenarios: {}, all", names.join(", "))
        })?;
        Ok(vec![scenario])
    }

    fn base_seed(&self) -> Result<u64> {
        if self.seed != 0 {
            return Ok(self.seed);
        }
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("System clock is before the Unix epoch")?;
        Ok(since_epoch.as_nanos() as u64)
    }
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED [{} ticks, {} polls applied, {} superseded]",
            result.scenario.name(),
            result.seed,
            result.total_ticks,
            result.metrics.polls_applied,
            result.metrics.polls_superseded
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

/// Runs one scenario and writes its frames to `path`.
fn run_with_export(runner: &ScenarioRunner, scenario: ScenarioId, path: &str) -> Result<bool> {
    info!("Running with export to: {}", path);

    let (result, export) = runner.run_with_export(scenario);
    export
        .write_to_file(path)
        .with_context(|| format!("Failed to write export to {}", path))?;

    info!("Exported {} frames to {}", export.frames.len(), path);
    report(&result);
    Ok(result.passed)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let session = args.session()?;
    let scenarios = args.scenarios()?;
    let base_seed = args.base_seed()?;

    if !args.json {
        info!("Skywatch Scenario Harness v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "{} targets @ {} u/s, latency {}ms, offline timeout {}",
            args.targets,
            args.speed,
            args.latency,
            format_timeout(session.reconciliation.offline_timeout)
        );
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Handle --export mode for renderers
    if let Some(path) = &args.export {
        if scenarios.len() > 1 {
            bail!("--export only supports a single scenario, not 'all'");
        }
        let runner = ScenarioRunner::new(base_seed)
            .with_session(session)
            .with_duration(args.duration);
        if !run_with_export(&runner, scenarios[0], path)? {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_session(session.clone())
            .with_duration(args.duration);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "entities": r.final_entity_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}
