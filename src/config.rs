//! Configuration for the S3 core server

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Root directory for object and part bytes
    pub storage_root: PathBuf,

    /// Path to the SQLite metadata database file
    pub db_path: PathBuf,

    /// Seed credentials, read once at startup
    pub seed_access_key: String,
    pub seed_secret_key: String,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

/// Errors that can occur while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set (and non-empty)")]
    MissingCredential(&'static str),

    #[error("invalid listen address in S3_CORE_LISTEN_ADDR: {0}")]
    InvalidListenAddr(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `MINIO_ACCESS_KEY` and `MINIO_SECRET_KEY` are mandatory; startup
    /// fails hard (per the bootstrap contract) when either is absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let seed_access_key = non_empty_env("MINIO_ACCESS_KEY")
            .ok_or(ConfigError::MissingCredential("MINIO_ACCESS_KEY"))?;
        let seed_secret_key = non_empty_env("MINIO_SECRET_KEY")
            .ok_or(ConfigError::MissingCredential("MINIO_SECRET_KEY"))?;

        let listen_addr = match std::env::var("S3_CORE_LISTEN_ADDR") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidListenAddr(v.clone()))?,
            Err(_) => default_listen_addr(),
        };

        let storage_root = std::env::var("S3_CORE_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_storage_root());

        let db_path = std::env::var("S3_CORE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| storage_root.join("metadata.sqlite"));

        Ok(Self {
            listen_addr,
            storage_root,
            db_path,
            seed_access_key,
            seed_secret_key,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
