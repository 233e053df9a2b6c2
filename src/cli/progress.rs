//! Live progress line

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use swarm_bench_core::{RunSnapshot, RunSummary};

pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
        );
        Ok(Self { bar })
    }

    pub fn update(&self, snapshot: &RunSnapshot) {
        self.bar.set_message(status_line(snapshot));
        self.bar.tick();
    }

    pub fn finish(&self, summary: &RunSummary) {
        self.bar.finish_with_message(format!(
            "done: {} actions, {} failed, peak {} users",
            summary.counters.actions, summary.counters.failures, summary.peak_users
        ));
    }
}

pub(crate) fn status_line(snapshot: &RunSnapshot) -> String {
    let population = &snapshot.population;
    let counters = &snapshot.counters;

    let mut line = format!("users {}/{}", population.users, population.target);
    if population.ramping {
        line.push_str(" (ramping)");
    }
    if population.stopping > 0 {
        line.push_str(&format!(" stopping {}", population.stopping));
    }
    if let Some(stage) = population.stage {
        line.push_str(&format!(" stage {}", stage + 1));
    }
    line.push_str(&format!(
        " | actions {} | failures {}",
        counters.actions, counters.failures
    ));
    line
}
