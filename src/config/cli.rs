use super::serde_helpers::{load_env_path, load_env_string, load_env_var};
use super::{ConfigError, LogLevel, PlatformType};
use crate::upload::BackoffConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "rudder-uploader", about = "Durable event batching and upload engine", long_about = None)]
pub struct Config {
    /// Data plane base URL receiving batch uploads
    #[arg(
        long,
        env = "DATA_PLANE_URL",
        default_value = "https://hosted.rudderlabs.com"
    )]
    pub data_plane_url: String,

    /// Write key authenticating this source; also namespaces persisted state
    #[arg(long, env = "WRITE_KEY", default_value = "")]
    pub write_key: String,

    /// Compress request bodies with gzip
    #[arg(long, env = "GZIP_ENABLED")]
    pub gzip_enabled: bool,

    /// Deployment class (controls closed-batch upload order)
    #[arg(long, env = "PLATFORM_TYPE", default_value = "server")]
    pub platform_type: PlatformType,

    /// Directory holding batch files and the properties store
    #[arg(long, env = "STORAGE_DIR", default_value = "/tmp/rudder-uploader")]
    pub storage_dir: PathBuf,

    /// Per-event size cap in bytes
    #[arg(long, env = "MAX_PAYLOAD_SIZE", default_value = "32768")]
    pub max_payload_size: usize,

    /// Open-batch rollover threshold in bytes
    #[arg(long, env = "MAX_BATCH_SIZE", default_value = "512000")]
    pub max_batch_size: usize,

    /// Upload request timeout in seconds
    #[arg(long, env = "UPLOAD_TIMEOUT_SECS", default_value = "30")]
    pub upload_timeout_secs: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SECS", default_value = "10")]
    pub connection_timeout_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub upload_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connection_timeout: Duration,

    /// Retry backoff configuration (not exposed as CLI args)
    #[serde(skip)]
    #[arg(skip)]
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_plane_url: "https://hosted.rudderlabs.com".to_string(),
            write_key: String::new(),
            gzip_enabled: false,
            platform_type: PlatformType::Server,
            storage_dir: PathBuf::from("/tmp/rudder-uploader"),
            max_payload_size: 32 * 1024,
            max_batch_size: 500 * 1024,
            upload_timeout_secs: 30,
            connection_timeout_secs: 10,
            log_level: LogLevel::Info,
            upload_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("DATA_PLANE_URL", &mut config.data_plane_url);
        load_env_string("WRITE_KEY", &mut config.write_key);
        load_env_var("GZIP_ENABLED", &mut config.gzip_enabled)?;
        load_env_path("STORAGE_DIR", &mut config.storage_dir);
        load_env_var("MAX_PAYLOAD_SIZE", &mut config.max_payload_size)?;
        load_env_var("MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        load_env_var("UPLOAD_TIMEOUT_SECS", &mut config.upload_timeout_secs)?;
        load_env_var("CONNECTION_TIMEOUT_SECS", &mut config.connection_timeout_secs)?;

        // PlatformType requires special handling for case-insensitive parsing
        if let Ok(platform) = std::env::var("PLATFORM_TYPE") {
            config.platform_type = match platform.to_lowercase().as_str() {
                "server" => PlatformType::Server,
                "mobile" => PlatformType::Mobile,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid PLATFORM_TYPE: {platform}. Valid values: server, mobile"
                    )));
                }
            };
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = match log_level.to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid LOG_LEVEL: {log_level}"
                    )));
                }
            };
        }

        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) {
        self.upload_timeout = Duration::from_secs(self.upload_timeout_secs);
        self.connection_timeout = Duration::from_secs(self.connection_timeout_secs);
    }
}
