//! Running preset scenarios side by side

use anyhow::Context;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::{Simulation, SimulationConfig, SimulationError, SimulationReport};

const BAR_TEMPLATE: &str = "{prefix:>22} [{bar:40}] {pos:>5}/{len} ms {msg}";

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub expect_abort: bool,
    pub result: Result<SimulationReport, SimulationError>,
}

impl ScenarioOutcome {
    /// A scenario passes when it aborts exactly when it was built to.
    pub fn as_expected(&self) -> bool {
        match &self.result {
            Ok(_) => !self.expect_abort,
            Err(SimulationError::Aborted { .. }) => self.expect_abort,
            Err(_) => false,
        }
    }
}

fn progress_bar(config: &SimulationConfig) -> ProgressBar {
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = ProgressBar::new(config.duration.as_millis() as u64);
    bar.set_style(style);
    bar.set_prefix(config.name.clone());
    bar
}

/// Runs one scenario to completion on the current thread.
pub fn run_scenario(config: &SimulationConfig, bar: Option<ProgressBar>) -> ScenarioOutcome {
    let result = Simulation::new(config).and_then(|mut simulation| {
        simulation.run_with_progress(|now| {
            if let Some(bar) = &bar {
                bar.set_position(now.as_millis() as u64);
            }
        })
    });
    match (&result, &bar) {
        (Ok(report), Some(bar)) => bar.finish_with_message(format!(
            "{}/{} linked",
            report.linked_stations(),
            report.stations.len()
        )),
        (Err(_), Some(bar)) => bar.abandon_with_message("aborted"),
        _ => {}
    }
    let outcome = ScenarioOutcome {
        name: config.name.clone(),
        expect_abort: config.expect_abort,
        result,
    };
    if outcome.as_expected() {
        info!("{}: finished as expected", outcome.name);
    } else {
        warn!("{}: unexpected outcome {:?}", outcome.name, outcome.result);
    }
    outcome
}

/// Runs every scenario on the blocking pool and collects the outcomes in
/// input order.
pub async fn run_scenarios(
    configs: Vec<SimulationConfig>,
    progress: Option<&MultiProgress>,
) -> anyhow::Result<Vec<ScenarioOutcome>> {
    let mut handles = Vec::with_capacity(configs.len());
    for config in configs {
        let bar = progress.map(|multi| multi.add(progress_bar(&config)));
        handles.push(tokio::task::spawn_blocking(move || run_scenario(&config, bar)));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("scenario task panicked")?);
    }
    Ok(outcomes)
}
