use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Log level exposed on the CLI, independent from `log::LevelFilter` so it
/// can derive `clap::ValueEnum` and have a serde-friendly default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        write!(f, "{s}")
    }
}

/// A `module=level` override, e.g. `service_engine::oracle=debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub module: String,
    pub level: LogLevel,
}

impl FromStr for ModuleConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, level) = s
            .split_once('=')
            .ok_or_else(|| format!("invalid module log override `{s}`, expected module=level"))?;
        let level = LogLevel::from_str(level, true)
            .map_err(|_| format!("invalid log level `{level}` in override `{s}`"))?;
        Ok(Self {
            module: module.to_owned(),
            level,
        })
    }
}

impl fmt::Display for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.module, self.level)
    }
}

fn default_logs_path() -> String {
    "logs/".to_owned()
}

fn default_log_filename() -> String {
    "service-engine.log".to_owned()
}

pub fn default_logs_datetime_format() -> String {
    "%Y-%m-%d %H:%M:%S%.3f".to_owned()
}

/// Logging configuration, flattened into the top-level engine config the
/// same way a daemon flattens its own log config block.
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct LogConfig {
    /// Set log level
    #[clap(long, value_enum, default_value_t)]
    #[serde(default)]
    pub log_level: LogLevel,
    /// Set file log level. By default it matches log_level.
    #[clap(long, value_enum)]
    pub file_log_level: Option<LogLevel>,
    /// Disable logging to file, stderr-only
    #[clap(long)]
    #[serde(default)]
    pub disable_file_logging: bool,
    /// Disable colored terminal output
    #[clap(long)]
    #[serde(default)]
    pub disable_log_color: bool,
    /// Log filename, stored under logs_path
    #[clap(long, default_value_t = default_log_filename())]
    #[serde(default = "default_log_filename")]
    pub filename_log: String,
    /// Logs directory, must end with a `/`
    #[clap(long, default_value_t = default_logs_path())]
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    /// Per-module log level overrides, e.g. `service_engine::oracle=debug`
    #[clap(long)]
    #[serde(default)]
    pub logs_modules: Vec<ModuleConfig>,
    /// Datetime format used by the logger
    #[clap(long, default_value_t = default_logs_datetime_format())]
    #[serde(default = "default_logs_datetime_format")]
    pub datetime_format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            file_log_level: None,
            disable_file_logging: false,
            disable_log_color: false,
            filename_log: default_log_filename(),
            logs_path: default_logs_path(),
            logs_modules: Vec::new(),
            datetime_format: default_logs_datetime_format(),
        }
    }
}

/// Sets up `fern` dispatch: a colored stdout sink at `log_level`, and
/// optionally a plain file sink at `file_log_level` (defaulting to
/// `log_level`), with per-module overrides layered on top of both.
pub fn init_logging(config: &LogConfig) -> Result<(), fern::InitError> {
    let colors = fern::colors::ColoredLevelConfig::new()
        .error(fern::colors::Color::Red)
        .warn(fern::colors::Color::Yellow)
        .info(fern::colors::Color::Green)
        .debug(fern::colors::Color::Blue)
        .trace(fern::colors::Color::BrightBlack);

    let datetime_format = config.datetime_format.clone();
    let disable_color = config.disable_log_color;
    let stdout_format = move |out: fern::FormatCallback, message: &fmt::Arguments, record: &log::Record| {
        let level = if disable_color {
            record.level().to_string()
        } else {
            colors.color(record.level()).to_string()
        };
        out.finish(format_args!(
            "[{}] [{}] [{}] {}",
            chrono::Local::now().format(&datetime_format),
            level,
            record.target(),
            message
        ))
    };

    let mut stdout_dispatch = fern::Dispatch::new()
        .format(stdout_format)
        .level(config.log_level.into())
        .chain(std::io::stdout());

    for module in &config.logs_modules {
        stdout_dispatch = stdout_dispatch.level_for(module.module.clone(), module.level.into());
    }

    let mut dispatch = fern::Dispatch::new().chain(stdout_dispatch);

    if !config.disable_file_logging {
        std::fs::create_dir_all(&config.logs_path)?;
        let path = format!("{}{}", config.logs_path, config.filename_log);
        let datetime_format = config.datetime_format.clone();
        let file_level = config.file_log_level.unwrap_or(config.log_level);
        let file_format = move |out: fern::FormatCallback, message: &fmt::Arguments, record: &log::Record| {
            out.finish(format_args!(
                "[{}] [{}] [{}] {}",
                chrono::Local::now().format(&datetime_format),
                record.level(),
                record.target(),
                message
            ))
        };
        let mut file_dispatch = fern::Dispatch::new()
            .format(file_format)
            .level(file_level.into())
            .chain(fern::log_file(path)?);

        for module in &config.logs_modules {
            file_dispatch = file_dispatch.level_for(module.module.clone(), module.level.into());
        }

        dispatch = dispatch.chain(file_dispatch);
    }

    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_config_parses() {
        let m: ModuleConfig = "service_engine::oracle=debug".parse().unwrap();
        assert_eq!(m.module, "service_engine::oracle");
        assert_eq!(m.level, LogLevel::Debug);
    }

    #[test]
    fn module_config_rejects_missing_equals() {
        assert!("service_engine".parse::<ModuleConfig>().is_err());
    }

    #[test]
    fn log_config_default_uses_info() {
        assert_eq!(LogConfig::default().log_level, LogLevel::Info);
    }
}
