//! Command line interface

use clap::{Parser, Subcommand};
use pylon_common::PublishSource;

pub const DEFAULT_CONFIG_PATH: &str = "conf/application.yml";

/// Pylon gateway control plane
#[derive(Debug, Parser)]
#[command(name = "pylon-server", version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: String,

    #[arg(long = "db-url", env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Comma separated registry endpoints
    #[arg(long = "registry-endpoints", global = true)]
    pub registry_endpoints: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the rolling update worker until interrupted
    Serve,

    /// Publish every stage of a gateway, or one stage
    Publish {
        #[arg(long)]
        gateway_id: i64,
        #[arg(long)]
        stage_id: Option<i64>,
        #[arg(long, default_value = "version_publish")]
        source: PublishSource,
        #[arg(long, default_value = "admin")]
        operator: String,
    },

    /// Point a stage at a resource version and publish it
    Release {
        #[arg(long)]
        stage_id: i64,
        #[arg(long)]
        version_id: i64,
        #[arg(long, default_value = "admin")]
        operator: String,
    },

    /// Republish gateways without recording publish events
    Sync {
        /// Every gateway when omitted
        #[arg(long)]
        gateway_id: Option<i64>,
    },

    /// Remove everything published for a gateway, or one stage
    Revoke {
        #[arg(long)]
        gateway_id: i64,
        #[arg(long)]
        stage_id: Option<i64>,
        #[arg(long, default_value = "admin")]
        operator: String,
    },

    /// Show the latest publish attempt of a stage
    Status {
        #[arg(long)]
        gateway_id: i64,
        #[arg(long)]
        stage_id: i64,
    },
}
