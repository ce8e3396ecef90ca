use std::path::{Path, PathBuf};

use ferry_core::util::normalize_text_option;
use ferry_core::FerryConfig;

use crate::cli::ConfigCommands;
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    config_path: &Path,
    effective: &FerryConfig,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(effective)?);
            Ok(())
        }
        ConfigCommands::Init {
            store_path,
            api_base_url,
            sync_interval_secs,
            task_timeout_secs,
            max_attempts,
        } => {
            let config = run_config_init(
                config_path,
                store_path,
                api_base_url,
                sync_interval_secs,
                task_timeout_secs,
                max_attempts,
            )?;
            println!("Saved configuration to {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Merge the given values into the file at `config_path` and save it.
///
/// Environment overrides are not applied; only explicit values reach the file.
pub fn run_config_init(
    config_path: &Path,
    store_path: Option<PathBuf>,
    api_base_url: Option<String>,
    sync_interval_secs: Option<u64>,
    task_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
) -> Result<FerryConfig, CliError> {
    let mut config = FerryConfig::load_from_path(config_path)?;

    if let Some(path) = store_path {
        config.db_path = Some(path);
    }
    if let Some(url) = normalize_text_option(api_base_url) {
        config.api_base_url = Some(url);
    }
    if sync_interval_secs.is_some() {
        config.sync_interval_secs = sync_interval_secs;
    }
    if task_timeout_secs.is_some() {
        config.task_timeout_secs = task_timeout_secs;
    }
    if max_attempts.is_some() {
        config.max_attempts = max_attempts;
    }

    let validated = FerryConfig::parse(&serde_json::to_string(&config)?)?;
    validated.save_to_path(config_path)?;
    Ok(validated)
}
