//! JSON export functionality

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use crate::RunReport;

/// Writes run reports as pretty-printed JSON
pub struct JsonExporter;

impl JsonExporter {
    /// Export the full report, including raw events when they were kept
    pub fn export(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), report)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    /// Export the overview and per-action metrics only (smaller file)
    pub fn export_summary(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let output = json!({
            "run": report.run,
            "started_at": report.metrics.started_at,
            "ended_at": report.metrics.ended_at,
            "summary": report.metrics.summary,
            "actions": report.metrics.actions,
        });

        let file = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &output)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }
}
