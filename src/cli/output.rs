//! CLI output formatting

use crate::{
    core::RunStatus,
    execution::{ExecutionEvent, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::CompletedWithFailures => style("COMPLETED WITH FAILURES").yellow().to_string(),
        RunStatus::Halted => style("HALTED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a history entry for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Completed => CHECK,
        RunStatus::Halted => CROSS,
        RunStatus::CompletedWithFailures => WARN,
    };

    format!(
        "{} {} - {} - {} ({}/{} succeeded) - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.workflow_name).bold(),
        format_status(summary.status),
        summary.succeeded,
        summary.total_stages,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow_name,
            total_stages,
        } => format!(
            "{} Starting workflow {} ({} stages, {})",
            ROCKET,
            style(workflow_name).bold(),
            total_stages,
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::StageStarted {
            stage_id,
            stage_type,
            index,
            total,
        } => format!(
            "{} [{}/{}] {} {}",
            SPINNER,
            index + 1,
            total,
            style(stage_id).cyan(),
            style(format!("({})", stage_type)).dim()
        ),
        ExecutionEvent::BindingUnresolved { diagnostic } => format!(
            "{} {}.{} resolved to null: {}",
            WARN,
            style(&diagnostic.stage_id).yellow(),
            diagnostic.input,
            style(&diagnostic.reason).dim()
        ),
        ExecutionEvent::StageSucceeded { stage_id } => {
            format!("{} {}", CHECK, style(stage_id).green())
        }
        ExecutionEvent::StageFailed {
            stage_id,
            error_kind,
            message,
        } => format!(
            "{} {} [{}]: {}",
            CROSS,
            style(stage_id).red(),
            error_kind,
            style(message).dim()
        ),
        ExecutionEvent::RunHalted { stage_id, skipped } => format!(
            "{} Halted after {} failed ({} stages skipped)",
            WARN,
            style(stage_id).red(),
            skipped
        ),
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Workflow run ({}) {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
        ExecutionEvent::SnapshotSaved { location } => {
            format!("{} Snapshot saved to {}", INFO, style(location).dim())
        }
    }
}

/// Final summary lines for a run
pub fn format_run_report(report: &RunReport) -> String {
    let headline = match report.status {
        RunStatus::Completed => format!(
            "{} {} completed {}",
            CHECK,
            style(&report.workflow_name).bold(),
            style("successfully").green()
        ),
        RunStatus::Halted => format!(
            "{} {} {} at {}",
            CROSS,
            style(&report.workflow_name).bold(),
            style("halted").red(),
            style(report.halted_at.as_deref().unwrap_or("?")).red()
        ),
        _ => format!(
            "{} {} completed with {} failed stage(s)",
            WARN,
            style(&report.workflow_name).bold(),
            style(report.failed).red()
        ),
    };

    let mut lines = vec![headline];
    lines.push(format!(
        "  Stages: {} succeeded, {} failed, {} skipped (of {})",
        style(report.succeeded).green(),
        style(report.failed).red(),
        style(report.skipped).dim(),
        report.total_stages
    ));
    for (stage_id, result) in report.state.iter() {
        if let Some((kind, message)) = result.error() {
            lines.push(format!("    {} {} [{}]: {}", CROSS, style(stage_id).red(), kind, message));
        }
    }
    lines.push(format!("  Snapshot: {}", style(&report.snapshot).dim()));
    lines.join("\n")
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
