use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracefinError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub http_addr: String,
    pub retention_ttl: Duration,
    pub retention_max_bytes: u64,
    pub channel_capacity: usize,
    pub retry_delay: Duration,
    pub retry_max_attempts: u32,
    pub retry_max_age: Duration,
    pub publish_endpoint: Option<String>,
    pub publish_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("tracefin/tracefin.duckdb"),
            http_addr: "127.0.0.1:4680".to_string(),
            retention_ttl: Duration::from_secs(60 * 60 * 24),
            retention_max_bytes: 2 * 1024 * 1024 * 1024,
            channel_capacity: 256,
            retry_delay: Duration::from_millis(5000),
            retry_max_attempts: 120,
            retry_max_age: Duration::from_secs(15 * 60),
            publish_endpoint: None,
            publish_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    http_addr: Option<String>,
    retention_ttl: Option<String>,
    retention_max_bytes: Option<u64>,
    channel_capacity: Option<usize>,
    retry_delay: Option<String>,
    retry_max_attempts: Option<u32>,
    retry_max_age: Option<String>,
    publish_endpoint: Option<String>,
    publish_timeout: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACEFIN_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracefin/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracefinError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracefinError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("TRACEFIN_DB_PATH").ok().map(PathBuf::from),
        http_addr: env::var("TRACEFIN_HTTP_ADDR").ok(),
        retention_ttl: env::var("TRACEFIN_RETENTION_TTL").ok(),
        retention_max_bytes: parse_env_number("TRACEFIN_RETENTION_MAX_BYTES")?,
        channel_capacity: parse_env_number("TRACEFIN_CHANNEL_CAPACITY")?,
        retry_delay: env::var("TRACEFIN_RETRY_DELAY").ok(),
        retry_max_attempts: parse_env_number("TRACEFIN_RETRY_MAX_ATTEMPTS")?,
        retry_max_age: env::var("TRACEFIN_RETRY_MAX_AGE").ok(),
        publish_endpoint: env::var("TRACEFIN_PUBLISH_ENDPOINT").ok(),
        publish_timeout: env::var("TRACEFIN_PUBLISH_TIMEOUT").ok(),
    })
}

fn parse_env_number<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| TracefinError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.http_addr {
        cfg.http_addr = v;
    }
    if let Some(v) = overrides.retention_ttl {
        cfg.retention_ttl = parse_cfg_duration(&v, "retention_ttl", source)?;
    }
    if let Some(v) = overrides.retention_max_bytes {
        cfg.retention_max_bytes = v;
    }
    if let Some(v) = overrides.channel_capacity {
        cfg.channel_capacity = v;
    }
    if let Some(v) = overrides.retry_delay {
        cfg.retry_delay = parse_cfg_duration(&v, "retry_delay", source)?;
    }
    if let Some(v) = overrides.retry_max_attempts {
        cfg.retry_max_attempts = v;
    }
    if let Some(v) = overrides.retry_max_age {
        cfg.retry_max_age = parse_cfg_duration(&v, "retry_max_age", source)?;
    }
    if let Some(v) = overrides.publish_endpoint {
        cfg.publish_endpoint = Some(v);
    }
    if let Some(v) = overrides.publish_timeout {
        cfg.publish_timeout = parse_cfg_duration(&v, "publish_timeout", source)?;
    }
    Ok(())
}

fn parse_cfg_duration(value: &str, field: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        TracefinError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}
