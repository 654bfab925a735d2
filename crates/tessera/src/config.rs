//! Configuration file, environment and CLI flags.
//!
//! Sources in order of priority:
//!
//! CLI flags --overrides--> `TESSERA_*` env --overrides--> File --> defaults
//!
//! The file lives at `<config dir>/tessera/config.toml` and is created with
//! the default values when missing.
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Args;
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use tokio::fs::create_dir_all;
use tracing::Level;

use crate::{error::Error, scheduler::SchedulerConfig};

/// Every field is optional, missing values are taken from the next source.
#[derive(Args, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Path of the configuration file
    #[arg(long, global = true)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Dir to write downloaded files and progress
    #[arg(short, long, global = true)]
    pub download_dir: Option<PathBuf>,

    /// Address of the listener for incoming peers
    #[arg(short, long, global = true)]
    pub listen: Option<SocketAddr>,

    /// Max peers taken from one announce
    #[arg(long, global = true)]
    pub max_peers: Option<usize>,

    /// Max peers we download from at the same time
    #[arg(long, global = true)]
    pub max_download_peers: Option<usize>,

    /// Max peers we upload to at the same time
    #[arg(long, global = true)]
    pub max_upload_peers: Option<usize>,

    /// Seconds to wait for a TCP connection
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for the handshake of a peer
    #[arg(long, global = true)]
    pub handshake_timeout: Option<u64>,

    /// Seconds until a requested block may be requested again
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,

    /// Outstanding requests per peer
    #[arg(long, global = true)]
    pub request_queue_len: Option<usize>,

    /// Times a corrupted piece is downloaded again before giving up
    #[arg(long, global = true)]
    pub max_piece_retries: Option<u32>,

    /// Seconds given to connections to close on shutdown
    #[arg(long, global = true)]
    pub shutdown_grace: Option<u64>,

    /// If the program writes logs to disk
    #[arg(long, global = true)]
    pub log: Option<bool>,

    /// One of trace, debug, info, warn, error
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Quit after the download is completed
    #[arg(short, long, global = true)]
    pub quit_after_complete: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub download_dir: PathBuf,
    pub listen: SocketAddr,
    pub max_peers: usize,
    pub max_download_peers: usize,
    pub max_upload_peers: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub request_queue_len: usize,
    pub max_piece_retries: u32,
    pub shutdown_grace: Duration,
    pub log: bool,
    pub log_level: Level,
    pub quit_after_complete: bool,
}

impl Config {
    pub const ENV_PREFIX: &'static str = "TESSERA";

    /// Load the configuration file and the environment, and merge them
    /// under `cli`.
    pub async fn load(cli: Config) -> Result<ResolvedConfig, Error> {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            Self::write_default(&path).await?;
        }

        let file_config = Self::from_file(&path)?;
        Self::merge(file_config, cli).resolve()
    }

    /// `<config dir>/tessera/config.toml`
    pub fn config_path() -> Result<PathBuf, Error> {
        let dirs = ProjectDirs::from("", "", "Tessera").ok_or(Error::HomeInvalid)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Where log files are written.
    pub fn log_dir() -> Result<PathBuf, Error> {
        let dirs = ProjectDirs::from("", "", "Tessera").ok_or(Error::HomeInvalid)?;
        Ok(dirs.data_local_dir().to_path_buf())
    }

    /// Read a configuration file, overridden by `TESSERA_*` env variables.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(Self::ENV_PREFIX))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    async fn write_default(path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await?;
        }

        let default = ResolvedConfig::default();
        let config = Config {
            config: None,
            download_dir: Some(default.download_dir),
            listen: Some(default.listen),
            max_peers: Some(default.max_peers),
            max_download_peers: Some(default.max_download_peers),
            max_upload_peers: Some(default.max_upload_peers),
            connect_timeout: Some(default.connect_timeout.as_secs()),
            handshake_timeout: Some(default.handshake_timeout.as_secs()),
            request_timeout: Some(default.request_timeout.as_secs()),
            request_queue_len: Some(default.request_queue_len),
            max_piece_retries: Some(default.max_piece_retries),
            shutdown_grace: Some(default.shutdown_grace.as_secs()),
            log: Some(default.log),
            log_level: Some(default.log_level.to_string().to_lowercase()),
            quit_after_complete: Some(default.quit_after_complete),
        };

        tokio::fs::write(path, toml::to_string(&config)?).await?;
        Ok(())
    }

    pub fn merge(file_config: Config, cli_config: Config) -> Self {
        Self {
            config: cli_config.config.or(file_config.config),
            download_dir: cli_config.download_dir.or(file_config.download_dir),
            listen: cli_config.listen.or(file_config.listen),
            max_peers: cli_config.max_peers.or(file_config.max_peers),
            max_download_peers: cli_config
                .max_download_peers
                .or(file_config.max_download_peers),
            max_upload_peers: cli_config
                .max_upload_peers
                .or(file_config.max_upload_peers),
            connect_timeout: cli_config.connect_timeout.or(file_config.connect_timeout),
            handshake_timeout: cli_config
                .handshake_timeout
                .or(file_config.handshake_timeout),
            request_timeout: cli_config.request_timeout.or(file_config.request_timeout),
            request_queue_len: cli_config
                .request_queue_len
                .or(file_config.request_queue_len),
            max_piece_retries: cli_config
                .max_piece_retries
                .or(file_config.max_piece_retries),
            shutdown_grace: cli_config.shutdown_grace.or(file_config.shutdown_grace),
            log: cli_config.log.or(file_config.log),
            log_level: cli_config.log_level.or(file_config.log_level),
            quit_after_complete: cli_config
                .quit_after_complete
                .or(file_config.quit_after_complete),
        }
    }

    /// Fill the missing values with the defaults and validate.
    pub fn resolve(self) -> Result<ResolvedConfig, Error> {
        let d = ResolvedConfig::default();

        let log_level = match self.log_level {
            Some(level) => Level::from_str(&level)
                .map_err(|_| Error::ConfigError(format!("invalid log level `{level}`")))?,
            None => d.log_level,
        };

        let c = ResolvedConfig {
            download_dir: self.download_dir.unwrap_or(d.download_dir),
            listen: self.listen.unwrap_or(d.listen),
            max_peers: self.max_peers.unwrap_or(d.max_peers),
            max_download_peers: self.max_download_peers.unwrap_or(d.max_download_peers),
            max_upload_peers: self.max_upload_peers.unwrap_or(d.max_upload_peers),
            connect_timeout: self
                .connect_timeout
                .map_or(d.connect_timeout, Duration::from_secs),
            handshake_timeout: self
                .handshake_timeout
                .map_or(d.handshake_timeout, Duration::from_secs),
            request_timeout: self
                .request_timeout
                .map_or(d.request_timeout, Duration::from_secs),
            request_queue_len: self.request_queue_len.unwrap_or(d.request_queue_len),
            max_piece_retries: self.max_piece_retries.unwrap_or(d.max_piece_retries),
            shutdown_grace: self
                .shutdown_grace
                .map_or(d.shutdown_grace, Duration::from_secs),
            log: self.log.unwrap_or(d.log),
            log_level,
            quit_after_complete: self.quit_after_complete.unwrap_or(d.quit_after_complete),
        };

        if c.max_peers == 0 || c.max_download_peers == 0 || c.max_upload_peers == 0 {
            return Err(Error::ConfigError("peer limits cannot be zero".into()));
        }
        if c.request_queue_len == 0 {
            return Err(Error::ConfigError("request_queue_len cannot be zero".into()));
        }
        Ok(c)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|d| d.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_dir,
            listen: SocketAddr::from(([0, 0, 0, 0], 51413)),
            max_peers: 50,
            max_download_peers: 5,
            max_upload_peers: 5,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            request_queue_len: 5,
            max_piece_retries: 3,
            shutdown_grace: Duration::from_secs(5),
            log: false,
            log_level: Level::INFO,
            quit_after_complete: false,
        }
    }
}

impl ResolvedConfig {
    /// Defaults with the given download dir, listening on a random local
    /// port.
    pub fn with_download_dir(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            request_timeout: self.request_timeout,
            max_piece_retries: self.max_piece_retries,
        }
    }
}
