//! Pylon Server - configuration, startup and command line entry points
//!
//! - `config`: layered configuration (file, environment, CLI overrides)
//! - `cli`: command line definitions
//! - `startup`: logging and application wiring

pub mod cli;
pub mod config;
pub mod startup;

pub use cli::{Cli, Command};
pub use config::Configuration;
