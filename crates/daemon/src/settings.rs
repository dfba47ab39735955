//! Daemon configuration
//!
//! Read once from the environment at startup. Unset variables fall back to
//! defaults; set-but-invalid values are errors.

use anyhow::{bail, Context, Result};
use leveler_api_rpc::handler::DEFAULT_UPLOAD_RATE_PER_MIN;
use leveler_core::application::consumer::constants::{
    DEFAULT_BUCKET_CAPACITY, DEFAULT_PREFETCH, DEFAULT_QUEUE_NAME, DEFAULT_REFILL_PERIOD,
    DEFAULT_REFILL_RATE,
};
use leveler_core::application::direct::DEFAULT_DIRECT_MAX_CONCURRENT;
use leveler_core::domain::queue::{DEFAULT_MAX_LENGTH, DEFAULT_MESSAGE_TTL};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PATH: &str = "~/.leveler/queue.db";
const DEFAULT_OUTPUT_DIR: &str = "./output";

/// Where queue messages are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Sqlite(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub store: StoreLocation,
    pub queue: String,
    pub prefetch: usize,
    pub refill_rate: f64,
    pub burst: f64,
    pub refill_period: Duration,
    pub max_length: usize,
    pub message_ttl: Duration,
    pub job_timeout: Option<Duration>,
    pub max_deliveries: Option<u32>,
    pub output_dir: PathBuf,
    pub fanout: usize,
    pub direct_max_concurrent: usize,
    pub upload_rate_per_min: f64,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store = match var("LEVELER_DB_PATH") {
            Some(path) if path == "memory" => StoreLocation::Memory,
            Some(path) => StoreLocation::Sqlite(expand(&path)),
            None => StoreLocation::Sqlite(expand(DEFAULT_DB_PATH)),
        };

        let log_format = match var("LEVELER_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("LEVELER_LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        };

        let settings = Self {
            port: parse(&var, "PORT", DEFAULT_PORT)?,
            store,
            queue: var("LEVELER_QUEUE").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            prefetch: parse(&var, "LEVELER_PREFETCH", DEFAULT_PREFETCH)?,
            refill_rate: parse(&var, "LEVELER_RATE", DEFAULT_REFILL_RATE)?,
            burst: parse(&var, "LEVELER_BURST", DEFAULT_BUCKET_CAPACITY)?,
            refill_period: Duration::from_millis(parse(
                &var,
                "LEVELER_REFILL_MS",
                DEFAULT_REFILL_PERIOD.as_millis() as u64,
            )?),
            max_length: parse(&var, "LEVELER_MAX_LENGTH", DEFAULT_MAX_LENGTH)?,
            message_ttl: Duration::from_millis(parse(
                &var,
                "LEVELER_TTL_MS",
                DEFAULT_MESSAGE_TTL.as_millis() as u64,
            )?),
            job_timeout: parse_opt::<u64>(&var, "LEVELER_JOB_TIMEOUT_MS")?
                .map(Duration::from_millis),
            max_deliveries: parse_opt(&var, "LEVELER_MAX_DELIVERIES")?,
            output_dir: var("LEVELER_OUTPUT_DIR")
                .map(|dir| expand(&dir))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            fanout: parse(&var, "LEVELER_FANOUT", 1)?,
            direct_max_concurrent: parse(
                &var,
                "LEVELER_DIRECT_MAX_CONCURRENT",
                DEFAULT_DIRECT_MAX_CONCURRENT,
            )?,
            upload_rate_per_min: parse(
                &var,
                "LEVELER_UPLOAD_RATE_PER_MIN",
                DEFAULT_UPLOAD_RATE_PER_MIN,
            )?,
            log_format,
            log_dir: var("LEVELER_LOG_DIR").map(|dir| expand(&dir)),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.prefetch == 0 {
            bail!("LEVELER_PREFETCH must be at least 1");
        }
        if self.fanout == 0 {
            bail!("LEVELER_FANOUT must be at least 1");
        }
        if self.direct_max_concurrent == 0 {
            bail!("LEVELER_DIRECT_MAX_CONCURRENT must be at least 1");
        }
        if self.refill_rate < 0.0 || self.burst < 1.0 {
            bail!("LEVELER_RATE must be >= 0 and LEVELER_BURST >= 1");
        }
        if self.refill_period.is_zero() {
            bail!("LEVELER_REFILL_MS must be positive");
        }
        if self.upload_rate_per_min < 1.0 {
            bail!("LEVELER_UPLOAD_RATE_PER_MIN must be at least 1");
        }
        if self.max_deliveries == Some(0) {
            bail!("LEVELER_MAX_DELIVERIES must be at least 1 when set");
        }
        Ok(())
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(var, name)?.unwrap_or(default))
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", name, raw))
        })
        .transpose()
}
