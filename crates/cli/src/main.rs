//! CLI entry point for udp2p.

use clap::Parser;
use udp2p_cli::CliConfig;

fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    config.run()
}
