use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::services::client_registry::DEFAULT_SEND_TIMEOUT,
    command::ServeArgs,
    domain::services::change_filter::{DEFAULT_DEBOUNCE, DEFAULT_EXTENSIONS},
    shared::{
        error::ServerError,
        utils::{DEFAULT_LOG_LEVEL, read_file},
    },
};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_NOTIFY_PORT: u16 = 35729;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Startup configuration, read once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    pub notify_port: u16,
    pub debounce_ms: u64,
    pub extensions: Vec<String>,
    pub send_timeout_ms: u64,
    pub log_level: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            notify_port: DEFAULT_NOTIFY_PORT,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            send_timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ServeConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn asset_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn notify_addr(&self) -> String {
        format!("{}:{}", self.host, self.notify_port)
    }

    /// Port 0 asks the OS for a free port and may appear twice.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port != 0 && self.port == self.notify_port {
            return Err(ServerError::InvalidConfig(format!(
                "http port and notify port must differ, both are {}",
                self.port
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ServerError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.extensions.iter().all(|ext| ext.trim().trim_start_matches('.').is_empty()) {
            return Err(ServerError::InvalidConfig(
                "at least one file extension is required".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ServerError::InvalidConfig(
                "send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the config file, then environment, then explicit flags.
    pub fn load(args: &ServeArgs) -> Result<ServeConfig, ServerError> {
        let mut config = match &args.config {
            Some(path) => Self::load_from_file(path)?,
            None => ServeConfig::default(),
        };
        Self::apply_env_overrides(&mut config);
        Self::apply_args(&mut config, args);
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<ServeConfig, ServerError> {
        info!("load config from {}", path.display());
        let content = read_file(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        let config: ServeConfig = match extension.as_str() {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::ParseConfigError(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| ServerError::ParseConfigError(e.to_string()))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::ParseConfigError(e.to_string()))?,
            _ => {
                return Err(ServerError::UnsupportedFormat {
                    format: path.display().to_string(),
                });
            }
        };
        Ok(config)
    }

    pub fn apply_env_overrides(config: &mut ServeConfig) {
        Self::apply_env_overrides_from(config, |key| std::env::var(key).ok());
    }

    pub fn apply_env_overrides_from<F>(config: &mut ServeConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("LIVE_RELOAD_ROOT") {
            info!("env override root: {} -> {}", config.root.display(), root);
            config.root = PathBuf::from(root);
        }
        if let Some(host) = lookup("LIVE_RELOAD_HOST") {
            info!("env override host: {} -> {}", config.host, host);
            config.host = host;
        }
        if let Some(port) = lookup("LIVE_RELOAD_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!("ignore invalid LIVE_RELOAD_PORT: {}", port),
            }
        }
        if let Some(port) = lookup("LIVE_RELOAD_NOTIFY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.notify_port = port,
                Err(_) => warn!("ignore invalid LIVE_RELOAD_NOTIFY_PORT: {}", port),
            }
        }
        if let Some(debounce) = lookup("LIVE_RELOAD_DEBOUNCE_MS") {
            match debounce.parse::<u64>() {
                Ok(debounce) => config.debounce_ms = debounce,
                Err(_) => warn!("ignore invalid LIVE_RELOAD_DEBOUNCE_MS: {}", debounce),
            }
        }
        if let Some(level) = lookup("LIVE_RELOAD_LOG_LEVEL") {
            config.log_level = level;
        }
    }

    pub fn apply_args(config: &mut ServeConfig, args: &ServeArgs) {
        if let Some(root) = &args.root {
            config.root = root.clone();
        }
        if let Some(host) = &args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(notify_port) = args.notify_port {
            config.notify_port = notify_port;
        }
        if let Some(debounce_ms) = args.debounce_ms {
            config.debounce_ms = debounce_ms;
        }
        if let Some(extensions) = &args.extensions {
            config.extensions = extensions.clone();
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
    }
}
