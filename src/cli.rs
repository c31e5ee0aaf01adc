//! Command-line interface definition for tokenrelay
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for serving the relay and checking configuration.

use clap::{Parser, Subcommand};

/// tokenrelay - stateless OAuth2 relay
///
/// Keeps browser tokens in encrypted cookies and brokers the
/// authorization-code, refresh and revoke flows with an identity provider.
#[derive(Parser, Debug, Clone)]
#[command(name = "tokenrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for tokenrelay
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Override the listen address from config (e.g. 0.0.0.0:8085)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load and validate configuration, then print the effective endpoints
    CheckConfig,
}
