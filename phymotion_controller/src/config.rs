use anyhow::Context as _;
use phymotion::{AxisSettings, ControllerOptions};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// Byte stream the controller is reached over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    /// Serial-over-Ethernet gateway.
    Tcp {
        host: String,
        port: u16,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_max_retries() -> u32 {
    3
}

fn default_baud_rate() -> u32 {
    115200
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::Serial {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
    /// Daily rolling log files are written here when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one last-position file per axis.
    pub positions_dir: PathBuf,
    pub link: LinkConfig,
    pub controller: ControllerOptions,
    pub logging: LoggingConfig,
    /// Applied in order right after connecting.
    pub axes: Vec<AxisSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            positions_dir: PathBuf::from("positions"),
            link: LinkConfig::default(),
            controller: ControllerOptions {
                read_parameters_on_connect: true,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
            axes: Vec::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(settings) = self.axes.iter().find(|s| s.axis == 0) {
            return Err(ConfigError::ValidationError {
                message: format!("axis numbers start at 1, got {}", settings.axis),
            });
        }

        let timing = &self.controller.session;
        if timing.poll_interval.is_zero() || timing.poll_interval > timing.read_timeout {
            return Err(ConfigError::ValidationError {
                message: "poll_interval must be non-zero and not exceed read_timeout".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<Config> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if !self.options.create_if_missing {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }

            let default_config = Config::default();
            self.save(&default_config)
                .context("Failed to save default config")?;
            return Ok(default_config);
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config_with_options(options: ConfigOptions) -> anyhow::Result<(ConfigManager, Config)> {
    let manager = ConfigManager::with_options(options);
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<PathBuf> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path: config_path.clone(),
        create_if_missing: true,
    });
    manager.save(&Config::default())?;

    Ok(config_path)
}
