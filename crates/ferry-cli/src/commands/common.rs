use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use ferry_core::util::{compact_text, normalize_text_option};
use ferry_core::{
    FerryConfig, OfflineStore, Snapshot, SyncQueue, SyncTask, TaskId, UnrecognizedTask,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "ferry.json";
const DB_FILE_NAME: &str = "ferry.db";

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub payload: Value,
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("ferry").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("ferry").join(DB_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    cli_config_path.map_or_else(default_config_path, Ok)
}

/// Load the config file and apply `FERRY_*` environment overrides
pub fn load_config(path: &Path) -> Result<FerryConfig, CliError> {
    let mut config = FerryConfig::load_from_path(path)?;
    config.apply_env_overrides();
    Ok(config)
}

/// `--db-path` wins over the config file, which wins over the platform default
pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    config: &FerryConfig,
) -> Result<PathBuf, CliError> {
    cli_db_path
        .or_else(|| config.db_path.clone())
        .map_or_else(default_db_path, Ok)
}

pub async fn open_queue(db_path: &Path, config: &FerryConfig) -> Result<SyncQueue, CliError> {
    let store = OfflineStore::open_path(db_path).await?;
    Ok(SyncQueue::new(store).with_max_attempts(config.sync_settings().max_attempts))
}

pub fn parse_task_id(id: &str) -> Result<TaskId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyTaskId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidTaskId(trimmed.to_string()))
}

/// Payload from the argument, or from piped stdin when the argument is absent
pub fn read_payload(argument: Option<String>) -> Result<Value, CliError> {
    let raw = match normalize_text_option(argument) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    Ok(serde_json::from_str(&raw)?)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_text_option(Some(buffer)))
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot, CliError> {
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(snapshot) => Ok(snapshot),
        _ => Err(CliError::NotAnObject {
            path: path.display().to_string(),
        }),
    }
}

pub fn task_to_list_item(task: &SyncTask, now_ms: i64) -> TaskListItem {
    TaskListItem {
        id: task.id.to_string(),
        kind: task.kind.to_string(),
        status: task.status.to_string(),
        attempts: task.attempts,
        error: task.error.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        relative_time: format_relative_time(task.created_at, now_ms),
        payload: task.payload.clone(),
    }
}

/// Rows with a kind this build cannot read carry no payload
pub fn unrecognized_to_list_item(task: &UnrecognizedTask, now_ms: i64) -> TaskListItem {
    TaskListItem {
        id: task.id.clone(),
        kind: task.kind.clone(),
        status: task.status.clone(),
        attempts: task.attempts,
        error: task.error.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        relative_time: format_relative_time(task.created_at, now_ms),
        payload: Value::Null,
    }
}

pub fn format_item_lines(items: &[TaskListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<8}  {:<21}  attempts={}  {}",
                item.id, item.status, item.kind, item.attempts, item.relative_time
            );
            if let Some(error) = &item.error {
                line.push_str("  error=");
                line.push_str(&compact_text(error));
            }
            line
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format_timestamp(timestamp_ms)
    }
}

/// Render a field value on one line for terminal output
pub fn render_value(value: Option<&Value>) -> String {
    value.map_or_else(
        || "(absent)".to_string(),
        |value| compact_text(&value.to_string()),
    )
}
