use std::path::Path;

use ferry_core::util::unix_millis_now;
use ferry_core::{FerryConfig, SyncQueue, TaskKind, TaskStatus};

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_item_lines, open_queue, parse_task_id, read_payload, task_to_list_item,
    unrecognized_to_list_item, TaskListItem,
};
use crate::error::CliError;

pub async fn run_queue(
    command: QueueCommands,
    db_path: &Path,
    config: &FerryConfig,
) -> Result<(), CliError> {
    let queue = open_queue(db_path, config).await?;
    match command {
        QueueCommands::List {
            status,
            limit,
            json,
        } => run_list(&queue, status, limit, json).await,
        QueueCommands::Enqueue { kind, payload } => {
            let id = run_enqueue(&queue, kind, payload).await?;
            println!("{id}");
            Ok(())
        }
        QueueCommands::Retry { id } => {
            let task = run_retry(&queue, &id).await?;
            println!("Requeued {} task {}", task.kind, task.id);
            Ok(())
        }
        QueueCommands::Cancel { id } => {
            run_cancel(&queue, &id).await?;
            println!("Removed task {}", id.trim());
            Ok(())
        }
    }
}

async fn run_list(
    queue: &SyncQueue,
    status: Option<TaskStatus>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let items = list_items(queue, status, limit, unix_millis_now()).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for line in format_item_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

/// Tasks in `status` (drain-eligible ones by default), oldest first.
///
/// Rows whose kind this build does not recognise are listed by their raw
/// kind so they can still be inspected and cancelled.
pub async fn list_items(
    queue: &SyncQueue,
    status: Option<TaskStatus>,
    limit: usize,
    now_ms: i64,
) -> Result<Vec<TaskListItem>, CliError> {
    let tasks = match status {
        Some(status) => queue.list_by_status(status).await?,
        None => queue.list_pending().await?,
    };
    let mut items = tasks
        .iter()
        .map(|task| task_to_list_item(task, now_ms))
        .collect::<Vec<_>>();

    if let Some(status) = status {
        items.extend(
            queue
                .list_unrecognized()
                .await?
                .iter()
                .filter(|task| task.status == status.as_str())
                .map(|task| unrecognized_to_list_item(task, now_ms)),
        );
        items.sort_by_key(|item| item.created_at);
    }
    items.truncate(limit);
    Ok(items)
}

pub async fn run_enqueue(
    queue: &SyncQueue,
    kind: TaskKind,
    payload: Option<String>,
) -> Result<String, CliError> {
    let payload = read_payload(payload)?;
    let task = queue.enqueue(kind, payload).await?;
    Ok(task.id.to_string())
}

pub async fn run_retry(queue: &SyncQueue, id: &str) -> Result<ferry_core::SyncTask, CliError> {
    let id = parse_task_id(id)?;
    match queue.requeue(&id).await {
        Ok(task) => Ok(task),
        Err(ferry_core::Error::NotFound(_)) => Err(CliError::TaskNotFound(id.to_string())),
        Err(error) => Err(error.into()),
    }
}

pub async fn run_cancel(queue: &SyncQueue, id: &str) -> Result<(), CliError> {
    let id = parse_task_id(id)?;
    if queue.remove(&id).await? {
        Ok(())
    } else {
        Err(CliError::TaskNotFound(id.to_string()))
    }
}
