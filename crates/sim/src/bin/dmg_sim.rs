//! 60 GHz DMG beamforming simulation

use anyhow::{bail, Result};
use beamsim_sim::scenarios::{self, ScenarioOutcome};
use beamsim_sim::{SimulationError, SimulationPresets, SimulationReport};
use colored::Colorize;
use indicatif::MultiProgress;

fn print_report(report: &SimulationReport) {
    println!(
        "Simulated {:?} in {} events, {} beacon intervals",
        report.simulated, report.events, report.pcp.beacon_intervals
    );
    println!(
        "PCP: {} beacons, {} sweep frames heard, {} feedback sent, {} A-BFT collisions",
        report.pcp.beacons_sent,
        report.pcp.sector_sweep_frames_received,
        report.pcp.feedback_sent,
        report.pcp.abft_collisions
    );
    println!(
        "Medium: {} transmissions, {} receptions, {} below sensitivity",
        report.medium.transmissions, report.medium.receptions, report.medium.below_sensitivity
    );
    for station in &report.stations {
        let state = if station.linked {
            station.state.bright_green()
        } else {
            station.state.yellow()
        };
        println!(
            "  {} aid {:>3} via {}: {} | {} sweep frames, {} feedback, {} link ups",
            station.address,
            station.association_id,
            station.access_point,
            state,
            station.stats.sector_sweep_frames_sent,
            station.stats.feedback_received,
            station.device.link_ups
        );
    }
}

fn print_outcome(outcome: &ScenarioOutcome) {
    println!("{}", format!("\n>>> {}", outcome.name).bright_green().bold());
    match &outcome.result {
        Ok(report) => print_report(report),
        Err(err @ SimulationError::Aborted { .. }) if outcome.expect_abort => {
            println!("{} {}", "Aborted as expected:".bright_yellow(), err);
        }
        Err(err) => {
            println!("{} {}", "Failed:".bright_red().bold(), err);
            if let Some(config_error) = err.config_error() {
                println!("Check parameter `{}`", config_error.parameter());
            }
        }
    }
    if outcome.expect_abort && outcome.result.is_ok() {
        println!("{}", "Expected the run to abort, but it completed".bright_red());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "DMG Beamforming Simulation".bright_blue().bold());
    println!("{}", "==========================".bright_blue());

    let progress = MultiProgress::new();
    let outcomes = scenarios::run_scenarios(SimulationPresets::all(), Some(&progress)).await?;

    for outcome in &outcomes {
        print_outcome(outcome);
    }

    let unexpected: Vec<&str> = outcomes
        .iter()
        .filter(|outcome| !outcome.as_expected())
        .map(|outcome| outcome.name.as_str())
        .collect();
    if !unexpected.is_empty() {
        bail!("unexpected outcome in {}", unexpected.join(", "));
    }
    println!("\n{}", "All scenarios finished as expected".bright_green().bold());
    Ok(())
}
