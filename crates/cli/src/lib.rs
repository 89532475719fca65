//! CLI tool for running and checking udp2p nodes.
//!
//! Provides commands for:
//! - Running a node and bootstrapping it from known IPs
//! - Generating node keys
//! - Self-testing the packet pipeline

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
