use super::*;

pub(super) fn exit_code_for(summary: &SyncSummary) -> ExitCode {
    if summary.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub(super) fn print_summary(summary: &SyncSummary) {
    for line in summary_lines(summary) {
        println!("{line}");
    }
}

pub(super) fn print_summary_json(summary: &SyncSummary) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serialize summary")?;
    println!("{json}");
    Ok(())
}

pub(super) fn summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = Vec::with_capacity(summary.results.len() + summary.errors.len() + 3);
    for result in &summary.results {
        let mut line = format!(
            "{:<7} {}: {}",
            result.status.as_str(),
            result.repo_name,
            result.message
        );
        if result.status == ResultStatus::Failed
            && let Some(error) = &result.error
        {
            line.push_str(&format!(" ({error})"));
        }
        lines.push(line);
    }
    lines.push(format!(
        "Synced {} repositories in {:.1}s: {} succeeded, {} failed, {} skipped",
        summary.total,
        summary.duration_seconds,
        summary.success_count,
        summary.failed_count,
        summary.skipped_count
    ));
    if summary.results.is_empty() && !summary.errors.is_empty() {
        lines.push("Errors:".to_string());
        for error in &summary.errors {
            lines.push(format!("  {error}"));
        }
    }
    lines
}
