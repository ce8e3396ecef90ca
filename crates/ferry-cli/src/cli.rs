use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ferry_core::{TaskKind, TaskStatus};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Inspect, drain and reconcile an offline mutation queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the ferry.json config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show task counts per status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and manage queued tasks
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Replay queued tasks against the configured HTTP backend
    Drain {
        /// Backend base URL (overrides config)
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
        /// Bearer token sent with every request
        #[arg(long, env = "FERRY_API_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Check `GET <URL>/<PATH>/<entity id>` for newer server copies before updates
        #[arg(long, value_name = "PATH")]
        entity_path: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare two JSON snapshots field by field and optionally merge them
    Diff {
        /// Local (draft) snapshot file
        local: PathBuf,
        /// Server snapshot file
        server: PathBuf,
        /// Keep the local value for a conflicting field
        #[arg(long = "take-local", value_name = "FIELD")]
        take_local: Vec<String>,
        /// Keep the server value for a conflicting field
        #[arg(long = "take-server", value_name = "FIELD")]
        take_server: Vec<String>,
        /// Resolve every remaining conflict the same way
        #[arg(long, value_enum, value_name = "SIDE")]
        all: Option<Side>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the ferry.json configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List tasks, oldest first
    List {
        /// Only tasks in this status (default: pending and failed)
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Number of tasks to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a task by hand
    Enqueue {
        /// Task kind (create-entity, update-entity, upsert-related-record)
        kind: TaskKind,
        /// JSON payload (read from stdin when omitted)
        payload: Option<String>,
    },
    /// Give a dead, failed or conflicted task a fresh start
    Retry {
        /// Task ID
        id: String,
    },
    /// Remove a task from the queue
    Cancel {
        /// Task ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Create or update the configuration file
    Init {
        /// Local database path
        #[arg(long, value_name = "PATH")]
        store_path: Option<PathBuf>,
        /// Backend base URL for `ferry drain`
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Fallback drain interval in seconds (0 disables it)
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
        /// Per-task dispatch timeout in seconds
        #[arg(long, value_name = "SECS")]
        task_timeout_secs: Option<u64>,
        /// Attempts before a task is dead-lettered (0 retries forever)
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Side {
    Local,
    Server,
}

impl From<Side> for ferry_core::Choice {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => Self::Local,
            Side::Server => Self::Server,
        }
    }
}
