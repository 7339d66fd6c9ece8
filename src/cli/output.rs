//! CLI output formatting

use crate::{
    core::{DeploymentRecord, DeploymentStatus, PipelineRun, PipelineStage},
    execution::ExecutionEvent,
    persistence::RunSummary,
    secrets::PropagationReport,
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
pub static REWIND: Emoji<'_, '_> = Emoji("⏪ ", "< ");

/// Create a spinner for health polling
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a stage for display
pub fn format_stage(stage: PipelineStage) -> String {
    let label = stage.to_string().to_uppercase();
    match stage {
        PipelineStage::Succeeded => style(label).green().to_string(),
        PipelineStage::Failed => style(label).red().to_string(),
        PipelineStage::Aborted => style(label).yellow().to_string(),
        PipelineStage::AwaitingProdApproval => style(label).blue().to_string(),
        PipelineStage::RollingBack => style(label).magenta().to_string(),
        PipelineStage::Queued => style(label).dim().to_string(),
        _ => style(label).yellow().to_string(),
    }
}

/// Format a deployment status for display
pub fn format_deployment_status(status: DeploymentStatus) -> String {
    match status {
        DeploymentStatus::Pending => style("PENDING").yellow().to_string(),
        DeploymentStatus::Healthy => style("HEALTHY").green().to_string(),
        DeploymentStatus::Failed => style("FAILED").red().to_string(),
        DeploymentStatus::RolledBack => style("ROLLED BACK").magenta().to_string(),
    }
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.stage {
        PipelineStage::Succeeded => CHECK,
        PipelineStage::Failed => CROSS,
        PipelineStage::Aborted => WARN,
        s if s.is_terminal() => INFO,
        _ => SPINNER,
    };

    let mut line = format!(
        "{} {} - {} - {} - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.version).bold(),
        style(summary.environment).cyan(),
        format_stage(summary.stage),
    );
    if let Some(reason) = &summary.reason {
        if summary.stage != PipelineStage::Succeeded {
            line.push_str(&format!(" ({})", style(reason).dim()));
        }
    }
    line
}

/// Format a deployment record for display
pub fn format_record(record: &DeploymentRecord) -> String {
    let image = record
        .image_ref
        .as_ref()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "-".to_string());
    let known_good = record
        .last_known_good
        .as_ref()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "{}\n    image:           {}\n    status:          {}\n    last known good: {}\n    updated:         {}",
        style(record.environment).bold(),
        style(image).cyan(),
        format_deployment_status(record.status),
        style(known_good).dim(),
        style(record.updated_at.to_rfc3339()).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::ReleasePublished { version } => {
            format!("{} Published {}", ROCKET, style(version).bold())
        }
        ExecutionEvent::RunQueued {
            run_id,
            environment,
            version,
        } => format!(
            "{} Queued {} for {} ({})",
            INFO,
            style(version).bold(),
            style(environment).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StageChanged { environment, from, to, .. } => {
            let icon = match to {
                PipelineStage::Succeeded => CHECK,
                PipelineStage::Failed => CROSS,
                PipelineStage::RollingBack => REWIND,
                PipelineStage::Aborted => WARN,
                _ => SPINNER,
            };
            format!(
                "{} [{}] {} → {}",
                icon,
                style(environment).cyan(),
                style(from).dim(),
                format_stage(*to)
            )
        }
        ExecutionEvent::ProbeAttempt {
            environment,
            attempt,
            observation,
        } => format!(
            "{} [{}] health poll {}: {}",
            SPINNER,
            style(environment).cyan(),
            attempt,
            style(observation).dim()
        ),
        ExecutionEvent::RollbackStarted { environment, target } => match target {
            Some(target) => format!(
                "{} Rolling {} back to {}",
                REWIND,
                style(environment).cyan(),
                style(target).bold()
            ),
            None => format!(
                "{} Rolling {} back: {}",
                WARN,
                style(environment).cyan(),
                style("no last-known-good deployment").red()
            ),
        },
        ExecutionEvent::RunFinished {
            run_id,
            environment,
            stage,
            reason,
        } => {
            let mut line = format!(
                "{} Run {} in {} finished: {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                style(environment).cyan(),
                format_stage(*stage)
            );
            if let Some(reason) = reason {
                if *stage != PipelineStage::Succeeded {
                    line.push_str(&format!("\n    {}", style(reason).dim()));
                }
            }
            line
        }
    }
}

/// Format a run with its full stage history
pub fn format_run_details(run: &PipelineRun) -> String {
    let mut out = vec![
        format!("{} Run Details", INFO),
        format!("  ID: {}", style(run.id).cyan()),
        format!("  Release: {}", style(&run.release.version).bold()),
        format!("  Environment: {}", style(run.environment).cyan()),
        format!("  Stage: {}", format_stage(run.stage)),
        format!("  Started: {}", style(run.started_at.to_rfc3339()).dim()),
    ];

    if let Some(image) = &run.image {
        out.push(format!("  Image: {}", style(image).dim()));
    }
    if let Some(completed) = run.completed_at {
        out.push(format!("  Completed: {}", style(completed.to_rfc3339()).dim()));
        if let Ok(duration) = run.duration().to_std() {
            out.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
        }
    }
    if run.attempts > 0 {
        out.push(format!("  Health polls: {}", run.attempts));
    }
    if let Some(reason) = run.terminal_reason() {
        out.push(format!("  Reason: {}", reason));
    }
    if let Some(target) = run.failure.as_ref().and_then(|f| f.rolled_back_to.as_ref()) {
        out.push(format!("  Rolled back to: {}", style(target).magenta()));
    }

    out.push(format!("\n  {}", style("Stage history:").bold()));
    for transition in &run.history {
        let mut line = format!(
            "    {} {} → {}",
            style(transition.at.format("%Y-%m-%d %H:%M:%S")).dim(),
            transition.from,
            transition.to
        );
        if let Some(note) = &transition.note {
            line.push_str(&format!(" ({})", note));
        }
        out.push(line);
    }

    out.join("\n")
}

/// Format a secret propagation report
pub fn format_propagation_report(report: &PropagationReport) -> String {
    let environment = report.environment;

    if report.skipped {
        return format!(
            "{} {}: no values given, scope left untouched",
            INFO,
            style(environment).cyan()
        );
    }

    let icon = if report.is_success() { CHECK } else { CROSS };
    let mut line = format!(
        "{} {}: {} written",
        icon,
        style(environment).cyan(),
        style(report.written.len()).green()
    );
    if report.mirrored {
        line.push_str(&format!(" {}", style("(mirrored from test)").yellow()));
    }
    for (name, error) in &report.failed {
        line.push_str(&format!("\n    {} {}: {}", CROSS, style(name).bold(), style(error).red()));
    }
    line
}

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
