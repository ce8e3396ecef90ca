use std::path::Path;
use std::sync::Arc;

use ferry_core::util::{is_http_url, normalize_text_option};
use ferry_core::{DrainReport, FerryConfig, HttpDispatcher, NetworkMonitor, SyncOrchestrator};

use crate::commands::common::open_queue;
use crate::error::CliError;

/// `--endpoint` wins over the configured base URL
pub fn resolve_endpoint(
    endpoint: Option<String>,
    config: &FerryConfig,
) -> Result<String, CliError> {
    let endpoint = normalize_text_option(endpoint)
        .or_else(|| config.api_base_url.clone())
        .ok_or(CliError::DrainNotConfigured)?;
    if is_http_url(&endpoint) {
        Ok(endpoint)
    } else {
        Err(CliError::Config(format!(
            "endpoint must include http:// or https:// (got '{endpoint}')"
        )))
    }
}

pub fn format_report(report: &DrainReport) -> String {
    if report.skipped_offline {
        return "Offline; nothing was sent".to_string();
    }
    let mut line = format!(
        "Drained {} task(s): {} synced, {} failed, {} dead-lettered, {} conflicted",
        report.attempted(),
        report.succeeded,
        report.failed,
        report.dead_lettered,
        report.conflicted
    );
    if report.interrupted {
        line.push_str(" (interrupted)");
    }
    line
}

pub async fn run_drain(
    endpoint: Option<String>,
    token: Option<String>,
    entity_path: Option<String>,
    as_json: bool,
    db_path: &Path,
    config: &FerryConfig,
) -> Result<(), CliError> {
    let endpoint = resolve_endpoint(endpoint, config)?;
    let mut dispatcher = HttpDispatcher::new(endpoint)?;
    if let Some(token) = token {
        dispatcher = dispatcher.with_bearer_token(token);
    }
    if let Some(path) = entity_path {
        dispatcher = dispatcher.with_entity_path(path);
    }

    let queue = open_queue(db_path, config).await?;
    let orchestrator =
        SyncOrchestrator::new(queue, Arc::new(dispatcher), NetworkMonitor::online())
            .with_settings(config.sync_settings());
    let report = orchestrator.drain_now().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }
    Ok(())
}
