//! Console summary table

use std::io::Write;

use anyhow::Result;

use crate::RunReport;

/// Print the run overview and one row per action to `out`
pub fn print_summary(report: &RunReport, out: &mut impl Write) -> Result<()> {
    let run = &report.run;
    let summary = &report.metrics.summary;

    writeln!(out)?;
    writeln!(
        out,
        "Run finished ({:?}, {:?} stop) after {:.1}s",
        run.reason, run.stop_mode, run.duration_secs
    )?;
    writeln!(
        out,
        "Users: {} spawned, {} peak, {} failed to start",
        run.counters.spawned, run.peak_users, run.counters.startup_failures
    )?;
    if !run.users.exits.is_empty() {
        let exits: Vec<String> = run
            .users
            .exits
            .iter()
            .map(|(exit, count)| format!("{} {}", count, exit))
            .collect();
        writeln!(out, "Exits: {}", exits.join(", "))?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "{:<24} {:>9} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9}",
        "Action", "Requests", "Fails", "Fail %", "p50 ms", "p95 ms", "p99 ms", "req/s"
    )?;
    writeln!(out, "{}", "-".repeat(92))?;

    for metrics in report.metrics.actions.values() {
        writeln!(
            out,
            "{:<24} {:>9} {:>8} {:>7.2}% {:>9.1} {:>9.1} {:>9.1} {:>9.2}",
            truncate(&metrics.name, 24),
            metrics.requests,
            metrics.failures,
            metrics.error_rate * 100.0,
            metrics.latency.p50,
            metrics.latency.p95,
            metrics.latency.p99,
            metrics.requests_per_second,
        )?;
    }

    writeln!(out, "{}", "-".repeat(92))?;
    writeln!(
        out,
        "{:<24} {:>9} {:>8} {:>7.2}% {:>9.1} {:>9.1} {:>9.1} {:>9.2}",
        "Aggregated",
        summary.total_requests,
        summary.failed_requests,
        summary.error_rate * 100.0,
        summary.latency.p50,
        summary.latency.p95,
        summary.latency.p99,
        summary.requests_per_second,
    )?;

    if !summary.errors.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failures by kind:")?;
        for (kind, count) in &summary.errors {
            writeln!(out, "  {:?}: {}", kind, count)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let mut short: String = name.chars().take(width - 1).collect();
        short.push('~');
        short
    }
}
