use rotsim::{bench_propagation, Scenario, ScenarioConfig};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(about = "Rotational dynamics of polarizable rigid bodies in laser fields")]
struct Args {
    /// Scenario file, looked up under `scenarios/` when not found as given
    #[arg(short, default_value = "ocs_impulsive.yaml")]
    file_name: PathBuf,

    /// Output file for the propagated ensemble (overrides the scenario)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run the propagation benchmark instead of a scenario
    #[arg(long)]
    bench: bool,
}

// resolve here to keep main clean
fn scenario_path(file_name: &Path) -> PathBuf {
    if file_name.exists() {
        return file_name.to_path_buf();
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.bench {
        bench_propagation();
        return Ok(());
    }

    let config_path = scenario_path(&args.file_name);
    let scenario_cfg = ScenarioConfig::from_yaml_file(&config_path)
        .with_context(|| format!("failed to load scenario {}", config_path.display()))?;
    let base_dir = config_path.parent().unwrap_or(Path::new("."));

    let mut scenario = Scenario::build_scenario(scenario_cfg, base_dir)?;
    let report = scenario.run()?;

    println!(
        "{} bodies propagated in {:.2} s, {} truncated, max |q| drift {:.2e}",
        report.outcomes.len(),
        report.elapsed.as_secs_f64(),
        report.truncated().count(),
        report.max_norm_drift()
    );
    if !report.is_complete() {
        println!("truncated bodies: {:?}", report.truncated_indices());
    }

    let output = args.output.unwrap_or_else(|| scenario.output.clone());
    scenario
        .ensemble
        .save(&output)
        .with_context(|| format!("failed to save ensemble to {}", output.display()))?;
    info!("ensemble written to {}", output.display());
    println!("Ensemble written to: {}", output.display());

    Ok(())
}
