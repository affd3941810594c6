//! Operator-facing summary of an exploration.

use cumulus_core::{ExplorationReport, SubmissionResult};
use std::fmt::Write;

/// One line per run, then a totals line.
pub fn render_report(report: &ExplorationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Experiment: {}", report.experiment_dir.display());
    let _ = writeln!(
        out,
        "Started:    {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for run in &report.runs {
        let status = match &run.result {
            Ok(SubmissionResult::Submitted {
                job_id: Some(id), ..
            }) => format!("submitted (job {id})"),
            Ok(SubmissionResult::Submitted { job_id: None, .. }) => "submitted".to_string(),
            Ok(SubmissionResult::DryRun) => "dry run, not submitted".to_string(),
            Err(e) => format!("FAILED: {e}"),
        };
        let script = run
            .script_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "  run {:<3} {status}", run.index);
        let _ = writeln!(out, "          {script}");
    }

    let failed = report.failed();
    let total = report.runs.len();
    if failed == 0 {
        let _ = writeln!(out, "{total} run(s) ready");
    } else {
        let _ = writeln!(out, "{failed} of {total} run(s) failed");
    }
    out
}
