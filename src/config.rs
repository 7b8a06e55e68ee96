// ⚙️ Configuration - CLI flags with environment fallbacks

use crate::ledger::Ledger;
use anyhow::{Context, Result};
use clap::{Args, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Settings shared by every binary
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// SQLite ledger file (`:memory:` for a throwaway store)
    #[arg(long, env = "LEDGER_DB", default_value = "ledger.db", global = true)]
    pub db: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

impl Config {
    /// Install the tracing subscriber. RUST_LOG wins over `--log-level`.
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("shorthand_ledger={},warn", self.log_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install log subscriber")
    }

    pub fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open(&self.db).with_context(|| format!("Failed to open ledger {}", self.db.display()))
    }
}

/// HTTP server settings
#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-server")]
#[command(about = "HTTP API over the shorthand ledger")]
pub struct ServerConfig {
    #[command(flatten)]
    pub config: Config,

    /// Address to listen on
    #[arg(long, env = "LEDGER_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::try_parse_from(["ledger-server"]).unwrap();
        assert_eq!(config.listen, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.config.log_level, "info");
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "ledger-server",
            "--db",
            ":memory:",
            "--listen",
            "0.0.0.0:8080",
        ])
        .unwrap();
        assert_eq!(config.config.db, PathBuf::from(":memory:"));
        assert_eq!(config.listen.port(), 8080);
        assert!(config.config.open_ledger().is_ok());
    }
}
