//! Configuration File Loading
//!
//! Handles loading and saving configuration files from various locations
//! with support for multiple formats, environment overrides and fallback to
//! defaults.

use super::{Config, ENV_CONFIG, ENV_IO_LOG, ENV_PID, ENV_SOCKET};
use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file loader
pub struct ConfigLoader {
    /// Search paths for configuration files (without extension)
    search_paths: Vec<PathBuf>,
    /// Supported configuration file formats
    supported_formats: Vec<ConfigFormat>,
    /// Current configuration file path (if loaded)
    current_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Format implied by a file extension; TOML when unknown
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    fn name(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Whether to fall back to the default config if none exists
    pub create_default: bool,
    /// Whether to apply `MUDPROD_*` environment overrides
    pub apply_env: bool,
    /// Whether to validate configuration after loading
    pub validate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            create_default: true,
            apply_env: true,
            validate: true,
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: Self::get_search_paths(),
            supported_formats: vec![ConfigFormat::Toml, ConfigFormat::Json],
            current_path: None,
        }
    }

    /// Load configuration with default options
    pub fn load() -> Result<Config> {
        Self::load_with_options(LoadOptions::default())
    }

    /// Load configuration with custom options
    pub fn load_with_options(options: LoadOptions) -> Result<Config> {
        let mut loader = Self::new();
        let mut config = loader.resolve(&options)?;

        if options.apply_env {
            apply_overrides(&mut config, |key| env::var(key).ok());
        }

        if options.validate {
            validate_config(&config)?;
        }

        if let Some(path) = loader.current_path() {
            debug!("Loaded configuration from {}", path.display());
        }
        Ok(config)
    }

    /// Load, validate and return the config at an explicit path
    pub fn load_from_path(&mut self, path: &Path) -> Result<Config> {
        let config = self.load_config_file(path, ConfigFormat::from_path(path))?;
        validate_config(&config)?;
        self.current_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to a specific path; format follows the extension
    pub fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let format = ConfigFormat::from_path(path);
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| {
                Error::ConfigSerializationFailed {
                    format: format.name().to_string(),
                    reason: e.to_string(),
                }
            })?,
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| Error::ConfigSerializationFailed {
                    format: format.name().to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        fs::write(path, content)?;
        Ok(())
    }

    fn resolve(&mut self, options: &LoadOptions) -> Result<Config> {
        if let Some(explicit) = env::var_os(ENV_CONFIG) {
            let path = PathBuf::from(explicit);
            let config = self.load_config_file(&path, ConfigFormat::from_path(&path))?;
            self.current_path = Some(path);
            return Ok(config);
        }

        if let Some((path, config)) = self.find_and_load_config()? {
            self.current_path = Some(path);
            return Ok(config);
        }

        if options.create_default {
            Ok(Config::default())
        } else {
            Err(Error::ConfigNotFound)
        }
    }

    /// Find and load configuration from search paths
    fn find_and_load_config(&self) -> Result<Option<(PathBuf, Config)>> {
        for path in &self.search_paths {
            for format in &self.supported_formats {
                let config_path = path.with_extension(format.extension());

                if config_path.exists() {
                    match self.load_config_file(&config_path, *format) {
                        Ok(config) => return Ok(Some((config_path, config))),
                        Err(e) => {
                            // Log warning but continue searching
                            warn!("Failed to load config from {}: {}", config_path.display(), e);
                            continue;
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Load a specific configuration file
    fn load_config_file(&self, path: &Path, format: ConfigFormat) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: format.name().to_string(),
                reason: e.to_string(),
            }),
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                    format: format.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Get default search paths for configuration files
    fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mudprod").join("config"));
        }

        // Home directory fallback
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".mudprod").join("config"));
        }

        // Current working directory
        if let Ok(cwd) = env::current_dir() {
            paths.push(cwd.join(".mudprod").join("config"));
        }

        paths
    }

    /// Get the current configuration file path
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// List all search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Clear all search paths and add a single path
    pub fn set_search_path(&mut self, path: PathBuf) {
        self.search_paths = vec![path];
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `MUDPROD_*` overrides using `lookup` to read variables
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(socket) = lookup(ENV_SOCKET).filter(|v| !v.is_empty()) {
        config.daemon.socket_path = PathBuf::from(socket);
    }
    if let Some(pid) = lookup(ENV_PID).filter(|v| !v.is_empty()) {
        config.daemon.pid_path = PathBuf::from(pid);
    }
    if let Some(log) = lookup(ENV_IO_LOG).filter(|v| !v.is_empty()) {
        config.session.io_log_path = Some(PathBuf::from(log));
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.daemon.socket_path.as_os_str().is_empty() {
        return Err(Error::ConfigValidationFailed {
            field: "daemon.socket_path".to_string(),
            reason: "Socket path cannot be empty".to_string(),
        });
    }

    if config.daemon.max_connections == 0 {
        return Err(Error::ConfigValidationFailed {
            field: "daemon.max_connections".to_string(),
            reason: "Must allow at least one connection".to_string(),
        });
    }

    let timeouts = [
        ("timeouts.fast_ms", config.timeouts.fast_ms),
        ("timeouts.default_ms", config.timeouts.default_ms),
        ("timeouts.batch_ms", config.timeouts.batch_ms),
        ("timeouts.login_step_ms", config.timeouts.login_step_ms),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.poll_slice_ms", config.timeouts.poll_slice_ms),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(Error::ConfigValidationFailed {
                field: field.to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }
        if value > 3_600_000 {
            return Err(Error::ConfigValidationFailed {
                field: field.to_string(),
                reason: "Timeout cannot exceed 1 hour".to_string(),
            });
        }
    }

    if config.session.max_buffer_bytes < 1024 {
        return Err(Error::ConfigValidationFailed {
            field: "session.max_buffer_bytes".to_string(),
            reason: "Buffer must hold at least 1KB".to_string(),
        });
    }

    if config.session.repeat_pattern.trim().is_empty() {
        return Err(Error::ConfigValidationFailed {
            field: "session.repeat_pattern".to_string(),
            reason: "Repeat pattern cannot be empty".to_string(),
        });
    }

    for (i, pattern) in config.prompt.patterns.iter().enumerate() {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(Error::ConfigValidationFailed {
                field: format!("prompt.patterns[{}]", i),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
