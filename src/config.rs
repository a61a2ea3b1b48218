//! Runtime configuration, read once from the environment at startup.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fics::session::{SessionConfig, default_setup_commands};
use crate::ring::DEFAULT_CAPACITY;
use crate::store::memory;
use crate::web::StreamConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    /// Handles whose private tells get no reply.
    pub ignore: Vec<String>,
    /// Elasticsearch base URL. In-memory store when unset.
    pub store_url: Option<String>,
    pub store_index: String,
    /// Tells kept by the in-memory fallback store.
    pub memory_capacity: usize,
    pub web_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub ring_capacity: usize,
    pub stream: StreamConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset and blank variables
    /// take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());

        let interface = or("CHANLOG_INTERFACE", "www.freechess.club");
        let session = SessionConfig {
            addr: or("CHANLOG_FICS_ADDR", "freechess.org:5000"),
            connect_timeout: Duration::from_secs(parse_or(
                "CHANLOG_CONNECT_TIMEOUT_SECS",
                get("CHANLOG_CONNECT_TIMEOUT_SECS"),
                5,
            )?),
            connect_retries: parse_or("CHANLOG_CONNECT_RETRIES", get("CHANLOG_CONNECT_RETRIES"), 5)?,
            username: or("CHANLOG_FICS_USER", "guest"),
            password: lookup("CHANLOG_FICS_PASSWORD").unwrap_or_default(),
            origin: get("CHANLOG_ORIGIN_IP"),
            setup_commands: default_setup_commands(&interface),
            channels: parse_list("CHANLOG_CHANNELS", &or("CHANLOG_CHANNELS", "36,39,40"))?,
        };

        let ping = parse_or("CHANLOG_PING_SECS", get("CHANLOG_PING_SECS"), 54)?;
        let read_timeout = parse_or("CHANLOG_READ_TIMEOUT_SECS", get("CHANLOG_READ_TIMEOUT_SECS"), 60)?;
        let stream = StreamConfig::default()
            .with_heartbeat(Duration::from_secs(ping), Duration::from_secs(read_timeout));

        Ok(Self {
            session,
            ignore: parse_list("CHANLOG_IGNORE", &or("CHANLOG_IGNORE", "ROBOadmin,adminBOT"))?,
            store_url: get("SEARCHBOX_SSL_URL"),
            store_index: or("CHANLOG_STORE_INDEX", "logs"),
            memory_capacity: parse_or(
                "CHANLOG_MEMORY_CAPACITY",
                get("CHANLOG_MEMORY_CAPACITY"),
                memory::DEFAULT_CAPACITY,
            )?
            .max(1),
            web_addr: parse_or("CHANLOG_WEB_ADDR", get("CHANLOG_WEB_ADDR"), ([0, 0, 0, 0], 8080).into())?,
            static_dir: PathBuf::from(or("CHANLOG_STATIC_DIR", "web")),
            ring_capacity: parse_or("CHANLOG_RING_CAPACITY", get("CHANLOG_RING_CAPACITY"), DEFAULT_CAPACITY)?
                .max(1),
            stream,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Comma-separated list; empty items are skipped.
fn parse_list<T: FromStr>(key: &'static str, value: &str) -> Result<Vec<T>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|_| ConfigError::Invalid {
                key,
                value: value.to_owned(),
            })
        })
        .collect()
}
