//! File-based logging with one file per component.
//!
//! Components write to separate log files with daily rotation:
//!
//! | Log File          | Component                     | Target Prefixes     |
//! |-------------------|-------------------------------|---------------------|
//! | pylon.log         | Root logger (all components)  | (all)               |
//! | publish.log       | Publish pipeline              | pylon_publish       |
//! | registry.log      | Registry reconciliation       | pylon_registry      |
//! | persistence.log   | Database persistence          | pylon_persistence   |
//!
//! Log files are stored in `~/pylon/logs` by default.
//! Override with the `PYLON_LOG_DIR` environment variable or `pylon.logs.path`.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

struct ComponentLogDef {
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const ROOT_LOG_FILE: &str = "pylon.log";

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "publish.log",
        targets: &["pylon_publish"],
    },
    ComponentLogDef {
        file_name: "registry.log",
        targets: &["pylon_registry"],
    },
    ComponentLogDef {
        file_name: "persistence.log",
        targets: &["pylon_persistence"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Single file
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/pylon/logs", home))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from application configuration.
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: String,
    ) -> Self {
        let level = level.parse().unwrap_or(Level::INFO);

        Self {
            log_dir: log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir),
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }

    /// Apply `PYLON_LOG_DIR`, `PYLON_LOG_LEVEL`, `PYLON_LOG_CONSOLE` and
    /// `PYLON_LOG_FILE` where set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("PYLON_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("PYLON_LOG_LEVEL").and_then(|v| v.parse().ok()) {
            self.console_level = level;
            self.file_level = level;
        }
        if let Some(console) = lookup("PYLON_LOG_CONSOLE") {
            self.console_output = parse_flag(&console);
        }
        if let Some(file) = lookup("PYLON_LOG_FILE") {
            self.file_logging = parse_flag(&file);
        }
        self
    }

    /// Console only, for one-shot CLI commands
    pub fn console_only(mut self) -> Self {
        self.file_logging = false;
        self.console_output = true;
        self
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Initialize console output, the root `pylon.log` file and the component
/// files.
///
/// `RUST_LOG` controls the level of the console and root file; component
/// files capture everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let config = LoggingConfig::from_config(
            Some("/tmp/pylon-logs".to_string()),
            false,
            true,
            "debug".to_string(),
        );
        assert_eq!(config.log_dir, PathBuf::from("/tmp/pylon-logs"));
        assert!(!config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.file_level, Level::DEBUG);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PYLON_LOG_DIR", "/var/log/pylon"),
            ("PYLON_LOG_LEVEL", "warn"),
            ("PYLON_LOG_CONSOLE", "false"),
        ]);
        let config = LoggingConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.log_dir, PathBuf::from("/var/log/pylon"));
        assert_eq!(config.console_level, Level::WARN);
        assert_eq!(config.file_level, Level::WARN);
        assert!(!config.console_output);
        assert!(config.file_logging);
    }

    #[test]
    fn test_unparsable_level_ignored() {
        let config = LoggingConfig::default()
            .with_overrides(|name| (name == "PYLON_LOG_LEVEL").then(|| "loud".to_string()));
        assert_eq!(config.console_level, Level::INFO);
    }

    #[test]
    fn test_component_log_definitions() {
        for component in COMPONENT_LOGS {
            assert!(component.file_name.ends_with(".log"));
            assert!(!component.targets.is_empty());
        }
        assert_eq!(COMPONENT_LOGS.len(), 3);
    }
}
