//! Clap derive structures for the `habridge` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// habridge -- keep a small device in sync with Home Assistant
#[derive(Debug, Parser)]
#[command(
    name = "habridge",
    version,
    about = "Bridge a headless device to Home Assistant",
    long_about = "Runs the bridge lifecycle against a Home Assistant server:\n\
        validates the persisted setup, fetches the selected entities,\n\
        follows state changes over the realtime API and executes commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the runtime config file
    #[arg(long, env = "HABRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the persisted settings (host, token, selection)
    #[arg(long, env = "HABRIDGE_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge with the console renderer
    Run(RunArgs),

    /// List entities on the server that can be selected
    #[command(alias = "ls")]
    Entities(EntitiesArgs),

    /// Manage the persisted settings
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// How app events are printed
    #[arg(long, default_value = "text")]
    pub events: EventFormat,

    /// Do not read intents from stdin
    #[arg(long)]
    pub no_input: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    /// `config-set`, `entity-updated light.kitchen on`, ...
    Text,
    /// Tagged JSON objects
    Json,
    /// Numeric channel encoding (code, value, payload)
    Wire,
}

// ── entities ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct EntitiesArgs {
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Only show entities of this domain
    #[arg(long, short = 'd')]
    pub domain: Option<String>,
}

// ── config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the runtime config and persisted settings (token masked)
    Show,

    /// Set the Home Assistant host
    SetHost {
        /// Host name, IP address or full base URL
        host: String,

        /// HTTP port (ignored when the host is a full URL)
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Set the long-lived access token
    SetToken {
        /// Token value; read from stdin when omitted
        token: Option<String>,
    },

    /// Replace the entity selection
    Select {
        /// Entity ids, e.g. light.kitchen cover.garage
        #[arg(required = true)]
        entities: Vec<String>,
    },

    /// Clear every persisted setting
    Reset,

    /// Print the config and settings file paths
    Path,
}

// ── completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
