use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Spreadsheet extensions accepted by the ingestor
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["xlsx", "xls", "csv"];

/// Hard ceiling on concurrent SMTP sends, whatever `MAX_WORKERS` says
pub const MAX_WORKER_CEILING: usize = 10;

const MB: usize = 1024 * 1024;

/// SMTP connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender address, falls back to `username`
    pub from: Option<String>,
}

/// Limits applied by the ingestor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_file_size: usize,
    pub max_columns: usize,
    pub chunk_size: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_file_size: 25 * MB,
            max_columns: 29,
            chunk_size: 10_000,
        }
    }
}

/// Dispatch engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_workers: usize,
    pub send_timeout: Duration,
    pub batch_timeout: Duration,
    pub employee_subject: String,
    pub vendor_subject: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            send_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(300),
            employee_subject: "Roster Updated".to_string(),
            vendor_subject: "Roster".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Effective number of concurrent sends for a batch of `deliverable` messages
    pub fn worker_count(&self, deliverable: usize) -> usize {
        self.max_workers
            .min(deliverable)
            .min(MAX_WORKER_CEILING)
            .max(1)
    }
}

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub smtp: SmtpConfig,
    pub limits: IngestLimits,
    pub dispatch: DispatchConfig,
    /// Root for saved uploads, one subfolder per roster domain
    pub upload_dir: PathBuf,
    /// Root holding pre-rendered route images, one subfolder per vendor
    pub image_dir: PathBuf,
    pub static_dir: PathBuf,
    /// Peer addresses allowed to reach the server; empty allows all
    pub allowed_hosts: Vec<IpAddr>,
    /// Idle time after which a session's rosters are dropped; `None` keeps them
    pub session_ttl: Option<Duration>,
    /// PNG shown at the top of every message, sent inline as `cid:banner`
    pub banner_image: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            smtp: SmtpConfig {
                host: "smtp.gmail.com".to_string(),
                port: 587,
                username: None,
                password: None,
                from: None,
            },
            limits: IngestLimits::default(),
            dispatch: DispatchConfig::default(),
            upload_dir: PathBuf::from("media"),
            image_dir: PathBuf::from("media/images"),
            static_dir: PathBuf::from("static"),
            allowed_hosts: Vec::new(),
            session_ttl: Some(Duration::from_secs(60 * 60)),
            banner_image: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let smtp = SmtpConfig {
            host: get("EMAIL_HOST").unwrap_or(defaults.smtp.host),
            port: parse_or(&get, "EMAIL_PORT", defaults.smtp.port)?,
            username: get("EMAIL_HOST_USER"),
            password: get("EMAIL_HOST_PASSWORD"),
            from: get("EMAIL_FROM"),
        };

        let limits = IngestLimits {
            max_file_size: parse_or(&get, "MAX_FILE_SIZE", defaults.limits.max_file_size)?,
            max_columns: parse_or(&get, "MAX_COLUMNS", defaults.limits.max_columns)?,
            chunk_size: parse_or(&get, "CHUNK_SIZE", defaults.limits.chunk_size)?,
        };
        if limits.max_columns == 0 {
            return Err(invalid("MAX_COLUMNS", "0"));
        }
        if limits.chunk_size == 0 {
            return Err(invalid("CHUNK_SIZE", "0"));
        }

        let dispatch = DispatchConfig {
            max_workers: parse_or(&get, "MAX_WORKERS", defaults.dispatch.max_workers)?,
            send_timeout: Duration::from_secs(parse_or(
                &get,
                "SEND_TIMEOUT_SECS",
                defaults.dispatch.send_timeout.as_secs(),
            )?),
            batch_timeout: Duration::from_secs(parse_or(
                &get,
                "BATCH_TIMEOUT_SECS",
                defaults.dispatch.batch_timeout.as_secs(),
            )?),
            ..defaults.dispatch
        };

        let allowed_hosts = match get("ALLOWED_HOSTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(|h| h.parse::<IpAddr>().map_err(|_| invalid("ALLOWED_HOSTS", h)))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        // 0 turns expiry off
        let session_ttl = match get("SESSION_TTL_SECS") {
            None => defaults.session_ttl,
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(invalid("SESSION_TTL_SECS", &raw)),
            },
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            smtp,
            limits,
            dispatch,
            upload_dir: get("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            image_dir: get("IMAGE_DIR").map(PathBuf::from).unwrap_or(defaults.image_dir),
            static_dir: get("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
            allowed_hosts,
            session_ttl,
            banner_image: get("BANNER_IMAGE").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}
