//! Command-line configuration.

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::commands::Command;

/// Run and inspect udp2p overlay nodes.
#[derive(Debug, Parser)]
#[command(name = "udp2p", version, about)]
pub struct CliConfig {
    /// Log filter, e.g. `debug` or `udp2p_engine=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn run(self) -> anyhow::Result<()> {
        init_tracing(self.log_level.as_deref());
        let result = self.command.execute()?;
        println!("{}", result);
        Ok(())
    }
}

/// Filter precedence: `--log-level`, then `RUST_LOG`, then `info`.
fn env_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn init_tracing(level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(false))
        .try_init();
}
