pub mod config;
pub mod ingest;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// docent: a conversational research assistant over your documents.
#[derive(Debug, Parser)]
#[command(name = "docent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Ingest a local file into the retrieval index.
    Ingest {
        /// File to ingest.
        path: PathBuf,
        /// Document name (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
        /// Content type hint (guessed from the extension when omitted).
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Send a single message to a session and print the streamed reply.
    Run {
        /// The message to send.
        message: String,
        /// Session id (defaults to "cli").
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `DOCENT_CONFIG` (or
/// `config.toml` by default). A missing file means all defaults.
/// Returns the parsed [`Config`](docent_domain::config::Config) and the
/// path that was used.
pub fn load_config() -> anyhow::Result<(docent_domain::config::Config, String)> {
    let config_path = std::env::var("DOCENT_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<docent_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(docent_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
