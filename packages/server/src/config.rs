use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    /// Allowed origins. Empty means any origin.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Connection pool size. Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Blob volume configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per file. Default: "/data/files".
    #[serde(default = "default_volume_root")]
    pub volume_root: PathBuf,
    /// Largest accepted upload in bytes. Default: 128 MiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
    /// Remove the blob again when its record cannot be inserted. Default: true.
    #[serde(default = "default_compensate_orphans")]
    pub compensate_orphans: bool,
}

fn default_volume_root() -> PathBuf {
    PathBuf::from("/data/files")
}
fn default_max_blob_size() -> u64 {
    128 * 1024 * 1024
}
fn default_compensate_orphans() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            volume_root: default_volume_root(),
            max_blob_size: default_max_blob_size(),
            compensate_orphans: default_compensate_orphans(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env is not an error.
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var("FILEBOX_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 80)?
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., FILEBOX__DATABASE__URL)
            .add_source(Environment::with_prefix("FILEBOX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
