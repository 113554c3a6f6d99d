//! User configuration for connecting to a flow engine
//!
//! Read from `config.toml` in the platform configuration directory. Every key
//! is optional, a missing file means all defaults.

use std::{
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use debugger::{DEFAULT_LOG_CAPACITY, SessionOptions};
use eyre::Context;
use serde::{Deserialize, Serialize};
use transport::{DEFAULT_DEBUGGER_PORT, framer::DEFAULT_MAX_LINE_LENGTH, io::ConnectRetry};

const APP_DIR: &str = "flowdbg";
const FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Connection attempts before giving up
    pub connect_attempts: usize,
    pub connect_backoff_ms: u64,
    pub max_line_length: usize,
    pub log_capacity: usize,
    pub debugger_active: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DEBUGGER_PORT,
            connect_attempts: 10,
            connect_backoff_ms: 100,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            log_capacity: DEFAULT_LOG_CAPACITY,
            debugger_active: false,
        }
    }
}

impl Config {
    pub fn connect_retry(&self) -> ConnectRetry {
        ConnectRetry {
            attempts: self.connect_attempts,
            backoff: Duration::from_millis(self.connect_backoff_ms),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            debugger_active: self.debugger_active,
            max_line_length: self.max_line_length,
            log_capacity: self.log_capacity,
            ..Default::default()
        }
    }
}

/// `<config dir>/flowdbg/config.toml`, if the platform has a config dir
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

/// Load from the default location
pub fn load() -> eyre::Result<Config> {
    match default_path() {
        Some(path) => load_from(path),
        None => {
            tracing::debug!("no configuration directory, using defaults");
            Ok(Config::default())
        }
    }
}

pub fn load_from(path: impl AsRef<Path>) -> eyre::Result<Config> {
    let path = path.as_ref();
    let span = tracing::debug_span!("load_config", path = %path.display());
    let _guard = span.enter();

    let f = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("configuration file not found, using defaults");
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("opening configuration file {}", path.display()));
        }
    };
    let config = from_reader(f).context("reading configuration file")?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

pub fn from_reader(mut r: impl Read) -> eyre::Result<Config> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .context("reading configuration contents")?;
    from_toml_str(&contents)
}

pub fn from_toml_str(contents: &str) -> eyre::Result<Config> {
    let config = toml::from_str(contents).context("parsing configuration")?;
    Ok(config)
}
