//! Application configuration.
//!
//! Configuration is loaded from a TOML file found at:
//! 1. the `--config` argument or `$POPATTACH_CONFIG`
//! 2. `./config.toml`
//! 3. `~/.config/popattach/config.toml` (Linux/macOS)
//!    `%APPDATA%\popattach\config.toml` (Windows)
//!
//! Every key is required. The file is first read with all keys optional and
//! then validated in one pass, so a broken file reports every missing key at
//! once instead of the first one serde trips over.

use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use crate::error::{Error, Result};

/// Validated configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mailbox and output settings.
    pub application: ApplicationConfig,
    /// Log file settings.
    pub logging: LoggingConfig,
}

/// `[application]` section.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    /// Directory attachments are written to (absolute after loading).
    pub save_folder: PathBuf,
    /// POP3 server, `host` or `host:port`.
    pub mailserver: String,
    /// Delete messages from the server once their attachments are saved.
    pub delete_proceeded: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log file path (absolute after loading).
    pub filename: PathBuf,
    /// Line template, e.g. `%(asctime)s %(levelname)s %(message)s`.
    pub format: String,
    /// `strftime` format for `%(asctime)s`.
    pub datefmt: String,
    /// Minimum severity written to the log.
    pub level: LogLevel,
}

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Map the numeric levels used by classic logging setups (10, 20, 30, 40, 50).
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            0..=10 => Some(Self::Debug),
            11..=20 => Some(Self::Info),
            21..=30 => Some(Self::Warning),
            31..=40 => Some(Self::Error),
            41..=50 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Parse a level name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" | "fatal" => Some(Self::Critical),
            _ => None,
        }
    }

    /// The `tracing` filter for this level. There is no critical level in
    /// `tracing`, so critical keeps errors only.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

// ── Raw (unvalidated) file layout ───────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    application: RawApplication,
    logging: RawLogging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawApplication {
    save_folder: Option<PathBuf>,
    mailserver: Option<String>,
    delete_proceeded: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLogging {
    filename: Option<PathBuf>,
    format: Option<String>,
    #[serde(rename = "DATEFMT", alias = "datefmt")]
    datefmt: Option<String>,
    level: Option<RawLevel>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Numeric(i64),
    Named(String),
}

// ── Load / validate ─────────────────────────────────────────────

/// Read and validate the configuration file at `path`.
///
/// Relative paths inside the file are resolved against the file's directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let config = parse_config(&contents, base_dir)?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str, base_dir: &Path) -> Result<Config> {
    let raw: RawConfig =
        toml::from_str(contents).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    validate(raw, base_dir)
}

fn validate(raw: RawConfig, base_dir: &Path) -> Result<Config> {
    let mut missing = Vec::new();
    let mut require = |value: bool, key: &str| {
        if !value {
            missing.push(key.to_string());
        }
    };

    require(raw.application.save_folder.is_some(), "application.save_folder");
    require(raw.application.mailserver.is_some(), "application.mailserver");
    require(
        raw.application.delete_proceeded.is_some(),
        "application.delete_proceeded",
    );
    require(raw.logging.filename.is_some(), "logging.filename");
    require(raw.logging.format.is_some(), "logging.format");
    require(raw.logging.datefmt.is_some(), "logging.DATEFMT");
    require(raw.logging.level.is_some(), "logging.level");

    let (
        Some(save_folder),
        Some(mailserver),
        Some(delete_proceeded),
        Some(filename),
        Some(format),
        Some(datefmt),
        Some(level),
    ) = (
        raw.application.save_folder,
        raw.application.mailserver,
        raw.application.delete_proceeded,
        raw.logging.filename,
        raw.logging.format,
        raw.logging.datefmt,
        raw.logging.level,
    )
    else {
        return Err(Error::MissingConfigKeys(missing));
    };

    if mailserver.trim().is_empty() {
        return Err(Error::InvalidConfig(
            "application.mailserver is empty".into(),
        ));
    }

    let level = match level {
        RawLevel::Numeric(n) => LogLevel::from_number(n),
        RawLevel::Named(ref name) => LogLevel::from_name(name),
    }
    .ok_or_else(|| Error::InvalidConfig(format!("unknown logging.level {level:?}")))?;

    if StrftimeItems::new(&datefmt).any(|item| matches!(item, Item::Error)) {
        return Err(Error::InvalidConfig(format!(
            "logging.DATEFMT '{datefmt}' is not a valid strftime format"
        )));
    }

    Ok(Config {
        application: ApplicationConfig {
            save_folder: resolve(base_dir, save_folder),
            mailserver: mailserver.trim().to_string(),
            delete_proceeded,
        },
        logging: LoggingConfig {
            filename: resolve(base_dir, filename),
            format,
            datefmt,
            level,
        },
    })
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Determine the config file path.
///
/// An explicit path always wins; otherwise `./config.toml` if it exists, then
/// the standard config directory.
pub fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from("config.toml");
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir().map(|d| d.join("popattach").join("config.toml"))
}
