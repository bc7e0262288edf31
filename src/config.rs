use async_trait::async_trait;
use dashmap::DashMap;
use std::{env, fs, path::PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
pub const S3_ACCESS_KEY: &str = "S3_ACCESS_KEY";
pub const S3_SECRET_KEY: &str = "S3_SECRET_KEY";
pub const S3_BUCKET: &str = "S3_BUCKET";
pub const S3_REGION: &str = "S3_REGION";
pub const S3_PORT: &str = "S3_PORT";
pub const S3_SSL: &str = "S3_SSL";
pub const BOT_FILE_UPLOAD_MAX_SIZE: &str = "BOT_FILE_UPLOAD_MAX_SIZE";

#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    /// Like `get`, but blank values count as unset.
    pub async fn get_non_empty(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .await
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from a `.env` file when one exists.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file.clone()).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            error!("could not load .env from {}", env_file.display())
        }

        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    /// Keys written in the `.env` file, in file order.
    async fn keys(&self) -> Vec<String> {
        fs::read_to_string(&self.env_file)
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, _)| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        if let Some(dir) = self.env_file.parent() {
            fs::create_dir_all(dir).map_err(|e| e.to_string())?;
        }
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    lines.push(format!("{key}={value}"));
                    found = true;
                }
                _ => lines.push(line.to_string()),
            }
        }
        if !found {
            lines.push(format!("{key}={value}"));
        }

        fs::write(&self.env_file, lines.join("\n")).map_err(|e| e.to_string())
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        if let Ok(content) = fs::read_to_string(&self.env_file) {
            let lines: Vec<&str> = content
                .lines()
                .filter(|line| match line.split_once('=') {
                    Some((k, _)) => k.trim() != key,
                    None => true,
                })
                .collect();
            let _ = fs::write(&self.env_file, lines.join("\n"));
        }
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EnvConfigManager".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let map = DashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "S3 not properly configured. Missing one of those variables: S3_ENDPOINT, S3_ACCESS_KEY, S3_SECRET_KEY"
    )]
    MissingStorageCredentials { missing: Vec<&'static str> },
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Object-storage settings, read fresh for every upload request.
#[derive(Clone, PartialEq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub port: Option<u16>,
    pub use_ssl: bool,
    /// Upper bound for uploaded files, in megabytes.
    pub max_file_size_mb: Option<u64>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("max_file_size_mb", &self.max_file_size_mb)
            .finish()
    }
}

impl StorageConfig {
    pub const DEFAULT_BUCKET: &'static str = "uploads";
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let endpoint = config.get_non_empty(S3_ENDPOINT).await;
        let access_key = config.get_non_empty(S3_ACCESS_KEY).await;
        let secret_key = config.get_non_empty(S3_SECRET_KEY).await;

        let (endpoint, access_key, secret_key) = match (endpoint, access_key, secret_key) {
            (Some(e), Some(a), Some(s)) => (e, a, s),
            (e, a, s) => {
                let missing = [(S3_ENDPOINT, e), (S3_ACCESS_KEY, a), (S3_SECRET_KEY, s)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(k, _)| k)
                    .collect();
                return Err(ConfigError::MissingStorageCredentials { missing });
            }
        };

        let port = match config.get_non_empty(S3_PORT).await {
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: S3_PORT,
                value: raw,
            })?),
            None => None,
        };
        let use_ssl = match config.get_non_empty(S3_SSL).await {
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(ConfigError::InvalidValue { key: S3_SSL, value: raw }),
            },
            None => true,
        };
        let max_file_size_mb = match config.get_non_empty(BOT_FILE_UPLOAD_MAX_SIZE).await {
            Some(raw) => match raw.parse::<u64>().ok().filter(|mb| mb_to_bytes(*mb).is_some()) {
                Some(mb) => Some(mb),
                None => {
                    return Err(ConfigError::InvalidValue {
                        key: BOT_FILE_UPLOAD_MAX_SIZE,
                        value: raw,
                    });
                }
            },
            None => None,
        };

        Ok(StorageConfig {
            endpoint,
            access_key,
            secret_key,
            bucket: config
                .get_non_empty(S3_BUCKET)
                .await
                .unwrap_or_else(|| Self::DEFAULT_BUCKET.to_string()),
            region: config
                .get_non_empty(S3_REGION)
                .await
                .unwrap_or_else(|| Self::DEFAULT_REGION.to_string()),
            port,
            use_ssl,
            max_file_size_mb,
        })
    }

    /// Path-style URL of the bucket, e.g. `https://s3.local:9000/uploads`.
    pub fn bucket_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}/{}", self.endpoint, self.bucket),
            None => format!("{scheme}://{}/{}", self.endpoint, self.bucket),
        }
    }
}

/// Megabytes to bytes; `None` when the result does not fit in a `u64`.
pub fn mb_to_bytes(mb: u64) -> Option<u64> {
    mb.checked_mul(1024 * 1024)
}
