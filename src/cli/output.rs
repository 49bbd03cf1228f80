//! CLI output formatting

use crate::{
    core::{RunStatus, StepOutcome, StepResult},
    execution::ExecutionEvent,
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
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

const DEFAULT_WIDTH: usize = 100;

/// Create a progress bar
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

/// Width of the terminal on stderr, or a sensible default
pub fn terminal_width() -> usize {
    term_size::dimensions_stderr()
        .map(|(w, _)| w)
        .unwrap_or(DEFAULT_WIDTH)
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let count = first_line.chars().count();
    let multi_line = text.lines().nth(1).is_some();
    if count <= max && !multi_line {
        return first_line.to_string();
    }
    let keep = max.saturating_sub(1).min(count);
    let mut cut: String = first_line.chars().take(keep).collect();
    cut.push('…');
    cut
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::CompletedWithWarning => style("COMPLETED WITH WARNING").yellow().to_string(),
        RunStatus::Aborted => style("ABORTED").red().to_string(),
    }
}

/// Format a step outcome for display
pub fn format_outcome(outcome: StepOutcome) -> String {
    match outcome {
        StepOutcome::Succeeded => style("SUCCEEDED").green().to_string(),
        StepOutcome::Failed => style("FAILED").red().to_string(),
        StepOutcome::Skipped => style("SKIPPED").dim().to_string(),
        StepOutcome::Aborted => style("ABORTED").yellow().to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// One line of the step log: id, outcome, attempts, duration and a truncated diagnostic
pub fn format_step_result(result: &StepResult, width: usize) -> String {
    let icon = match result.outcome {
        StepOutcome::Succeeded if result.warning.is_some() => WARN,
        StepOutcome::Succeeded => CHECK,
        StepOutcome::Failed => CROSS,
        StepOutcome::Skipped => SKIP,
        StepOutcome::Aborted => WARN,
    };
    let head = format!(
        "{:<26} {:<10} {:>2}x {:>8}",
        result.step_id,
        format!("{:?}", result.outcome).to_uppercase(),
        result.attempts,
        format_duration(result.duration)
    );
    let note = result
        .warning
        .as_deref()
        .or(result.diagnostic.as_deref())
        .unwrap_or("");
    let room = width.saturating_sub(head.chars().count() + 6).max(20);
    let line = format!("{}{}  {}", icon, head, truncate(note, room));

    match result.outcome {
        StepOutcome::Failed => style(line).red().to_string(),
        StepOutcome::Skipped => style(line).dim().to_string(),
        StepOutcome::Aborted => style(line).yellow().to_string(),
        StepOutcome::Succeeded if result.warning.is_some() => style(line).yellow().to_string(),
        StepOutcome::Succeeded => line,
    }
}

/// The full step log, one line per step
pub fn format_step_log(log: &[StepResult], width: usize) -> String {
    log.iter()
        .map(|r| format_step_result(r, width))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Completed => CHECK,
        RunStatus::CompletedWithWarning => WARN,
        RunStatus::Aborted => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {}/{} - {} ({}/{} steps) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.plan_name).bold(),
        summary.target.cluster,
        summary.target.namespace,
        format_status(summary.status),
        summary.count(StepOutcome::Succeeded),
        summary.steps.len(),
        style(summary.endpoint.as_deref().unwrap_or("no endpoint")).cyan()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            plan_name,
            total_steps,
        } => format!(
            "{} Starting {} ({} steps, run {})",
            ROCKET,
            style(plan_name).bold(),
            total_steps,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted { step_id, name } => {
            if name == step_id {
                format!("{} {}", SPINNER, style(step_id).cyan())
            } else {
                format!("{} {} {}", SPINNER, style(step_id).cyan(), style(name).dim())
            }
        }
        ExecutionEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
            delay,
            error,
        } => format!(
            "{} {} attempt {}/{} failed, retrying in {}: {}",
            WARN,
            style(step_id).yellow(),
            attempt,
            max_attempts,
            format_duration(*delay),
            style(truncate(error, 120)).dim()
        ),
        ExecutionEvent::StepFinished { result } => match result.outcome {
            StepOutcome::Succeeded => match &result.warning {
                Some(warning) => format!(
                    "{} {} {}",
                    WARN,
                    style(&result.step_id).yellow(),
                    style(truncate(warning, 120)).dim()
                ),
                None => format!(
                    "{} {} ({})",
                    CHECK,
                    style(&result.step_id).green(),
                    format_duration(result.duration)
                ),
            },
            StepOutcome::Failed => format!(
                "{} {}: {}",
                CROSS,
                style(&result.step_id).red(),
                style(truncate(result.diagnostic.as_deref().unwrap_or(""), 120)).dim()
            ),
            StepOutcome::Skipped => format!("{} {}", SKIP, style(&result.step_id).dim()),
            StepOutcome::Aborted => format!("{} {} aborted", WARN, style(&result.step_id).yellow()),
        },
        ExecutionEvent::RunFinished {
            run_id,
            status,
            endpoint,
        } => {
            let mut line = format!(
                "{} Run {} {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                format_status(*status)
            );
            if let Some(endpoint) = endpoint {
                line.push_str(&format!(" - {}", style(endpoint).cyan()));
            }
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer diagnostic", 8), "a longe…");
        assert_eq!(truncate("first\nsecond", 40), "first…");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_step_line_contains_id_outcome_and_diagnostic() {
        console::set_colors_enabled(false);
        let result = StepResult::failed(
            "backend",
            1,
            Utc::now(),
            Duration::from_millis(40),
            "configuration error: missing required variable(s): db_endpoint",
        );
        let line = format_step_result(&result, 200);
        assert!(line.contains("backend"));
        assert!(line.contains("FAILED"));
        assert!(line.contains("1x"));
        assert!(line.contains("missing required variable"));
    }

    #[test]
    fn test_step_line_respects_width() {
        console::set_colors_enabled(false);
        let result = StepResult::failed("schema-init", 3, Utc::now(), Duration::from_secs(2), "x".repeat(500));
        let line = format_step_result(&result, 80);
        assert!(line.chars().count() < 120);
        assert!(line.ends_with('…'));
    }
}
