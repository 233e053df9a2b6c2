//! CSV export functionality

use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;

use crate::RunReport;

/// Writes run reports as CSV
pub struct CsvExporter;

impl CsvExporter {
    /// Export one row per action plus an aggregated row
    pub fn export_summary(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;

        wtr.write_record([
            "action",
            "requests",
            "failures",
            "error_rate",
            "requests_per_second",
            "min_ms",
            "mean_ms",
            "p50_ms",
            "p90_ms",
            "p95_ms",
            "p99_ms",
            "max_ms",
        ])?;

        for metrics in report.metrics.actions.values() {
            let l = &metrics.latency;
            wtr.write_record(&[
                metrics.name.clone(),
                metrics.requests.to_string(),
                metrics.failures.to_string(),
                format!("{:.4}", metrics.error_rate),
                format!("{:.2}", metrics.requests_per_second),
                format!("{:.2}", l.min),
                format!("{:.2}", l.mean),
                format!("{:.2}", l.p50),
                format!("{:.2}", l.p90),
                format!("{:.2}", l.p95),
                format!("{:.2}", l.p99),
                format!("{:.2}", l.max),
            ])?;
        }

        let summary = &report.metrics.summary;
        let l = &summary.latency;
        wtr.write_record(&[
            "Aggregated".to_string(),
            summary.total_requests.to_string(),
            summary.failed_requests.to_string(),
            format!("{:.4}", summary.error_rate),
            format!("{:.2}", summary.requests_per_second),
            format!("{:.2}", l.min),
            format!("{:.2}", l.mean),
            format!("{:.2}", l.p50),
            format!("{:.2}", l.p90),
            format!("{:.2}", l.p95),
            format!("{:.2}", l.p99),
            format!("{:.2}", l.max),
        ])?;

        wtr.flush()?;
        Ok(())
    }

    /// Export every retained event, one row each
    ///
    /// Writes only the header when events were not kept.
    pub fn export_events(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;

        wtr.write_record([
            "started_at",
            "user_id",
            "profile",
            "action",
            "duration_ms",
            "success",
            "error_kind",
            "error",
        ])?;

        for event in &report.metrics.events {
            wtr.write_record(&[
                event.started_at.to_rfc3339(),
                event.user_id.to_string(),
                event.profile.to_string(),
                event.action.to_string(),
                format!("{:.3}", event.duration_ms),
                event.success.to_string(),
                event
                    .error_kind
                    .map(|k| format!("{:?}", k))
                    .unwrap_or_default(),
                event.error.clone().unwrap_or_default(),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}
