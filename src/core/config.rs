//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid http configuration: {0}")]
    InvalidHttp(String),

    #[error("Invalid headless configuration: {0}")]
    InvalidHeadless(String),

    #[error("Invalid providers configuration: {0}")]
    InvalidProviders(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub headless: HeadlessConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: FOLIO_HTTP__TIMEOUT=60
        builder = builder.add_source(
            Environment::with_prefix("FOLIO")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(dir) = &cli_args.providers_dir {
            builder = builder.set_override("providers.dir", dir.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(executable) = &cli_args.chrome {
            builder = builder.set_override("headless.executable", executable.display().to_string())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(builder
            .set_default("http.timeout", 30)?
            .set_default("http.connect_timeout", 10)?
            .set_default("http.user_agent", concat!("folio/", env!("CARGO_PKG_VERSION")))?
            .set_default("headless.headless", true)?
            .set_default("headless.request_timeout", 30)?
            .set_default("providers.dir", default_providers_dir().display().to_string())?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stdout")?
            .set_default("logging.rotation", "never")?)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.validate()?;
        self.headless.validate()?;
        self.providers.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn default_providers_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join("providers")
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "folio")]
#[command(about = "Run scripted content providers", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding provider scripts
    #[arg(long, value_name = "DIR")]
    pub providers_dir: Option<PathBuf>,

    /// Chrome/Chromium executable used by the headless module
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Only use the provider with this id
    #[arg(short, long, value_name = "ID")]
    pub provider: Option<String>,

    /// Search every loaded provider for this query and print the results
    #[arg(short, long, value_name = "QUERY")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub timeout: u64,         // seconds
    pub connect_timeout: u64, // seconds
    pub user_agent: String,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == 0 {
            return Err(ConfigError::InvalidHttp("timeout must be greater than 0".to_string()));
        }

        if self.connect_timeout == 0 {
            return Err(ConfigError::InvalidHttp(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::InvalidHttp("user_agent cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Build the client shared by every constructor call of one session
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout))
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .user_agent(self.user_agent.clone())
            .build()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            connect_timeout: 10,
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadlessConfig {
    /// Chrome executable; auto-detected when absent
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// DevTools websocket of an already running browser; takes precedence over launching
    #[serde(default)]
    pub ws_url: Option<String>,
    pub headless: bool,
    pub request_timeout: u64, // seconds
}

impl HeadlessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidHeadless(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(ws_url) = &self.ws_url {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                return Err(ConfigError::InvalidHeadless(format!(
                    "ws_url must be a websocket url, got {}",
                    ws_url
                )));
            }
        }

        Ok(())
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            executable: None,
            ws_url: None,
            headless: true,
            request_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub dir: PathBuf,
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidProviders("dir cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub rotation: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["never", "hourly", "daily"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn logging(level: &str, output: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: "text".to_string(),
            output: output.to_string(),
            log_file: None,
            rotation: "never".to_string(),
        }
    }

    #[test]
    fn test_logging_validation() {
        assert!(logging("info", "stdout").validate().is_ok());
        assert!(logging("verbose", "stdout").validate().is_err());
        // file output without a file
        assert!(logging("info", "file").validate().is_err());
    }

    #[test]
    fn test_http_validation() {
        assert!(HttpConfig::default().validate().is_ok());

        let config = HttpConfig {
            timeout: 0,
            ..HttpConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_headless_ws_url_validation() {
        let config = HeadlessConfig {
            ws_url: Some("http://localhost:9222".to_string()),
            ..HeadlessConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("websocket"));

        let config = HeadlessConfig {
            ws_url: Some("ws://localhost:9222/devtools/browser/abc".to_string()),
            ..HeadlessConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [http]
            timeout = 5

            [providers]
            dir = "/tmp/folio-providers"

            [logging]
            level = "debug"
            "#
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.http.timeout, 5);
        assert_eq!(config.http.connect_timeout, 10);
        assert_eq!(config.providers.dir, PathBuf::from("/tmp/folio-providers"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.headless.headless);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
