use std::path::Path;

use ferry_core::{Choice, ConflictSession, Resolution, Snapshot};
use serde::Serialize;
use serde_json::Value;

use crate::cli::Side;
use crate::commands::common::{read_snapshot, render_value};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub local: Option<Value>,
    pub server: Option<Value>,
    pub choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct DiffReport {
    pub conflicts: Vec<FieldConflict>,
    /// Present once every conflict has a choice
    pub merged: Option<Snapshot>,
}

const fn choice_label(choice: Choice) -> &'static str {
    match choice {
        Choice::Local => "local",
        Choice::Server => "server",
    }
}

/// Diff two snapshots and apply any choices given on the command line.
///
/// Without choices the merge is only produced when nothing conflicts. With
/// choices, leaving a conflict undecided is an error.
pub fn build_diff(
    local: Snapshot,
    server: Snapshot,
    take_local: &[String],
    take_server: &[String],
    all: Option<Side>,
) -> Result<DiffReport, CliError> {
    if let Some(field) = take_local.iter().find(|field| take_server.contains(field)) {
        return Err(CliError::ContradictoryChoice(field.clone()));
    }

    let mut session = ConflictSession::new(local, server);
    for field in take_local {
        session.choose(field, Choice::Local)?;
    }
    for field in take_server {
        session.choose(field, Choice::Server)?;
    }
    if let Some(side) = all {
        let undecided = session
            .conflicting_keys()
            .filter(|field| session.choice(field).is_none())
            .map(str::to_string)
            .collect::<Vec<_>>();
        for field in undecided {
            session.choose(&field, side.into())?;
        }
    }

    let conflicts = session
        .conflicting_keys()
        .map(|field| FieldConflict {
            field: field.to_string(),
            local: session.local().get(field).cloned(),
            server: session.server().get(field).cloned(),
            choice: session.choice(field).map(choice_label),
        })
        .collect::<Vec<_>>();

    let requested = !take_local.is_empty() || !take_server.is_empty() || all.is_some();
    let merged = if requested || !session.has_conflicts() {
        match session.commit()? {
            Resolution::Resolved(merged) => Some(merged),
            Resolution::Cancelled => None,
        }
    } else {
        None
    };

    Ok(DiffReport { conflicts, merged })
}

pub fn format_conflict_lines(conflicts: &[FieldConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  local={}  server={}  choice={}",
                conflict.field,
                render_value(conflict.local.as_ref()),
                render_value(conflict.server.as_ref()),
                conflict.choice.unwrap_or("-")
            )
        })
        .collect()
}

pub fn run_diff(
    local_path: &Path,
    server_path: &Path,
    take_local: &[String],
    take_server: &[String],
    all: Option<Side>,
    as_json: bool,
) -> Result<(), CliError> {
    let local = read_snapshot(local_path)?;
    let server = read_snapshot(server_path)?;
    let report = build_diff(local, server, take_local, take_server, all)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(merged) = &report.merged {
        println!("{}", serde_json::to_string_pretty(merged)?);
        return Ok(());
    }

    for line in format_conflict_lines(&report.conflicts) {
        println!("{line}");
    }
    println!(
        "{} conflicting field(s); choose with --take-local/--take-server or --all to merge",
        report.conflicts.len()
    );
    Ok(())
}
