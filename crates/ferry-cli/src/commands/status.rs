use std::path::Path;

use ferry_core::{FerryConfig, TaskStatus};
use serde::Serialize;

use crate::commands::common::open_queue;
use crate::error::CliError;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub conflict: usize,
    pub dead: usize,
    /// Tasks the next drain will attempt
    pub depth: usize,
    /// Ids of rows whose kind this build does not recognise
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unrecognized: Vec<String>,
}

pub fn summarize(counts: &[(TaskStatus, usize)]) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for (status, count) in counts {
        let slot = match status {
            TaskStatus::Pending => &mut summary.pending,
            TaskStatus::Syncing => &mut summary.syncing,
            TaskStatus::Failed => &mut summary.failed,
            TaskStatus::Conflict => &mut summary.conflict,
            TaskStatus::Dead => &mut summary.dead,
        };
        *slot += count;
        if status.is_drain_eligible() {
            summary.depth += count;
        }
    }
    summary
}

pub fn format_summary_lines(summary: &StatusSummary) -> Vec<String> {
    let mut lines = vec![
        format!("pending   {}", summary.pending),
        format!("syncing   {}", summary.syncing),
        format!("failed    {}", summary.failed),
        format!("conflict  {}", summary.conflict),
        format!("dead      {}", summary.dead),
    ];
    if summary.dead > 0 {
        lines.push(
            "Dead-lettered tasks need attention: `ferry queue list --status dead`".to_string(),
        );
    }
    if summary.conflict > 0 {
        lines.push("Conflicted tasks: `ferry queue list --status conflict`".to_string());
    }
    if !summary.unrecognized.is_empty() {
        lines.push(format!(
            "Tasks with an unrecognised kind (remove with `ferry queue cancel <id>`): {}",
            summary.unrecognized.join(", ")
        ));
    }
    lines
}

pub async fn run_status(as_json: bool, db_path: &Path, config: &FerryConfig) -> Result<(), CliError> {
    let queue = open_queue(db_path, config).await?;
    let mut summary = summarize(&queue.counts().await?);
    summary.unrecognized = queue
        .list_unrecognized()
        .await?
        .into_iter()
        .map(|task| task.id)
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in format_summary_lines(&summary) {
            println!("{line}");
        }
    }
    Ok(())
}
