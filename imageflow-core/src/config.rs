//! Environment-driven configuration.
//!
//! The deployment contract is environment variables (a `.env` file is
//! loaded by the binary before [`Config::from_env`] runs). Values are
//! validated up front so a misconfigured service fails at startup rather
//! than mid-request.

use serde::Serialize;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub redis: RedisConfig,
    pub processing: ProcessingConfig,
    /// Shared-secret Bearer token for the admin surface.
    pub api_key: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// URL prefix for public variant URLs. When unset, URLs are built from
    /// host and port.
    pub custom_domain: Option<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub enum StorageConfig {
    Local { root: String },
    S3(S3Config),
}

impl StorageConfig {
    /// Short name used to namespace the Redis key prefix so local and S3
    /// deployments sharing one Redis never collide.
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageConfig::Local { .. } => "local",
            StorageConfig::S3(_) => "s3",
        }
    }
}

#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub tls: bool,
    /// Base prefix; the effective prefix is `{base}:{storage_type}:`.
    pub prefix: String,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("{scheme}://{auth}{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn effective_prefix(&self, storage_type: &str) -> String {
        format!("{}:{}:", self.prefix.trim_end_matches(':'), storage_type)
    }
}

#[derive(Clone, Debug)]
pub struct ProcessingConfig {
    /// Maximum number of files in one upload submission.
    pub max_upload_count: usize,
    /// Encoder quality, 1..=100.
    pub image_quality: u8,
    /// Thread cap handed to the native encoders at startup.
    pub worker_threads: usize,
    /// Encoder effort, 0 (slowest, best compression) ..= 8 (fastest).
    pub speed: u8,
    /// Number of transcode workers; the queue holds twice this many jobs.
    pub worker_pool_size: usize,
    /// Minutes between expiry sweeps.
    pub cleanup_interval_minutes: u64,
}

/// The subset of configuration exposed to clients via `GET /api/config`.
/// Secrets and backend addresses never appear here.
#[derive(Clone, Debug, Serialize)]
pub struct ClientConfig {
    #[serde(rename = "maxUploadCount")]
    pub max_upload_count: usize,
    #[serde(rename = "imageQuality")]
    pub image_quality: u8,
    pub speed: u8,
    #[serde(rename = "storageType")]
    pub storage_type: &'static str,
    #[serde(rename = "customDomain", skip_serializing_if = "Option::is_none")]
    pub custom_domain: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required("API_KEY")?;

        let storage = match optional("STORAGE_TYPE").as_deref().unwrap_or("local") {
            "local" => StorageConfig::Local {
                root: optional("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|| "static/images".to_string()),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: required("S3_ENDPOINT")?,
                region: required("S3_REGION")?,
                access_key: required("S3_ACCESS_KEY")?,
                secret_key: required("S3_SECRET_KEY")?,
                bucket: required("S3_BUCKET")?,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_TYPE",
                    message: format!("expected \"local\" or \"s3\", got {other:?}"),
                });
            }
        };

        if let Some(store) = optional("METADATA_STORE_TYPE")
            && store != "redis"
        {
            return Err(ConfigError::Invalid {
                name: "METADATA_STORE_TYPE",
                message: format!("only \"redis\" is supported, got {store:?}"),
            });
        }

        let redis = RedisConfig {
            host: optional("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parsed("REDIS_PORT", 6379)?,
            password: optional("REDIS_PASSWORD").filter(|p| !p.is_empty()),
            db: parsed("REDIS_DB", 0)?,
            tls: parsed_bool("REDIS_TLS", false)?,
            prefix: optional("REDIS_PREFIX").unwrap_or_else(|| "imageflow".to_string()),
        };

        let processing = ProcessingConfig {
            max_upload_count: parsed("MAX_UPLOAD_COUNT", 20)?,
            image_quality: bounded("IMAGE_QUALITY", 80, 1, 100)?,
            worker_threads: parsed("WORKER_THREADS", 4)?,
            speed: bounded("SPEED", 5, 0, 8)?,
            worker_pool_size: parsed("WORKER_POOL_SIZE", 10)?,
            cleanup_interval_minutes: parsed("CLEANUP_INTERVAL", 60)?,
        };

        if processing.worker_pool_size == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_POOL_SIZE",
                message: "must be at least 1".to_string(),
            });
        }
        if processing.max_upload_count == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_UPLOAD_COUNT",
                message: "must be at least 1".to_string(),
            });
        }

        let server = ServerConfig {
            host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("SERVER_PORT", 8686)?,
            custom_domain: optional("CUSTOM_DOMAIN").filter(|d| !d.is_empty()),
        };

        Ok(Config {
            server,
            storage,
            redis,
            processing,
            api_key,
        })
    }

    /// Prefix public variant URLs are built from, without a trailing
    /// slash. A configured custom domain wins; otherwise local storage is
    /// reached through the server's own `/images` mount and S3 through the
    /// bucket endpoint.
    pub fn public_url_base(&self) -> String {
        if let Some(domain) = &self.server.custom_domain {
            return domain.trim_end_matches('/').to_string();
        }
        match &self.storage {
            StorageConfig::Local { .. } => {
                format!("http://{}:{}/images", self.server.host, self.server.port)
            }
            StorageConfig::S3(s3) => {
                format!("{}/{}", s3.endpoint.trim_end_matches('/'), s3.bucket)
            }
        }
    }

    pub fn client_view(&self) -> ClientConfig {
        ClientConfig {
            max_upload_count: self.processing.max_upload_count,
            image_quality: self.processing.image_quality,
            speed: self.processing.speed,
            storage_type: self.storage.type_name(),
            custom_domain: self.server.custom_domain.clone(),
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            name,
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

fn parsed_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name).as_deref() {
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            message: format!("expected a boolean, got {other:?}"),
        }),
        None => Ok(default),
    }
}

fn bounded(name: &'static str, default: u8, min: u8, max: u8) -> Result<u8, ConfigError> {
    let value: u8 = parsed(name, default)?;
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            name,
            message: format!("must be within {min}..={max}, got {value}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_password_and_db() {
        let cfg = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            password: Some("hunter2".to_string()),
            db: 3,
            tls: true,
            prefix: "imageflow".to_string(),
        };
        assert_eq!(cfg.url(), "rediss://:hunter2@cache.internal:6380/3");
        assert_eq!(cfg.effective_prefix("s3"), "imageflow:s3:");
    }

    #[test]
    fn effective_prefix_tolerates_trailing_colon() {
        let cfg = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            tls: false,
            prefix: "custom:".to_string(),
        };
        assert_eq!(cfg.effective_prefix("local"), "custom:local:");
    }

    fn base_config(storage: StorageConfig, custom_domain: Option<&str>) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9000,
                custom_domain: custom_domain.map(str::to_string),
            },
            storage,
            redis: RedisConfig {
                host: "localhost".to_string(),
                port: 6379,
                password: None,
                db: 0,
                tls: false,
                prefix: "imageflow".to_string(),
            },
            processing: ProcessingConfig {
                max_upload_count: 20,
                image_quality: 80,
                worker_threads: 4,
                speed: 5,
                worker_pool_size: 10,
                cleanup_interval_minutes: 60,
            },
            api_key: "secret".to_string(),
        }
    }

    #[test]
    fn public_url_base_prefers_custom_domain() {
        let cfg = base_config(
            StorageConfig::Local { root: "static/images".to_string() },
            Some("https://img.example.com/"),
        );
        assert_eq!(cfg.public_url_base(), "https://img.example.com");
    }

    #[test]
    fn public_url_base_falls_back_per_backend() {
        let local = base_config(StorageConfig::Local { root: "static/images".to_string() }, None);
        assert_eq!(local.public_url_base(), "http://127.0.0.1:9000/images");

        let s3 = base_config(
            StorageConfig::S3(S3Config {
                endpoint: "https://minio.internal/".to_string(),
                region: "us-east-1".to_string(),
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
                bucket: "images".to_string(),
            }),
            None,
        );
        assert_eq!(s3.public_url_base(), "https://minio.internal/images");
    }

    #[test]
    fn client_view_never_carries_secrets() {
        let cfg = base_config(StorageConfig::Local { root: "static/images".to_string() }, None);
        let json = serde_json::to_string(&cfg.client_view()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("maxUploadCount"));
        assert!(json.contains("\"storageType\":\"local\""));
    }
}
