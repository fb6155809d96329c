//! Endpoint configuration.
//!
//! Loaded from the YAML file named by `INGEST_CONFIG` (defaults otherwise);
//! `LISTEN=host:port` overrides `bind` and `port`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Deserializer};

use crate::ingest::format::FormatOptions;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub backlog: Option<u32>,
    /// Maximum accumulated body bytes per request.
    #[serde(deserialize_with = "deserialize_size")]
    pub body_size_limit: usize,
    /// Idle time after which a connection is closed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub keepalive_timeout: Duration,
    /// Upper bound of one event loop iteration; bounds `stop()` latency.
    #[serde(deserialize_with = "deserialize_duration")]
    pub blocking_timeout: Duration,
    pub add_http_headers: bool,
    pub add_remote_addr: bool,
    /// `default` (json/msgpack parameters) or a body format name.
    pub format: String,
    pub format_options: FormatOptions,
    pub cors_allow_origins: Option<Vec<String>>,
    pub respond_with_empty_img: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9880,
            bind: "0.0.0.0".to_string(),
            backlog: None,
            body_size_limit: 32 * 1024 * 1024,
            keepalive_timeout: Duration::from_secs(10),
            blocking_timeout: Duration::from_millis(500),
            add_http_headers: false,
            add_remote_addr: false,
            format: "default".to_string(),
            format_options: FormatOptions::default(),
            cors_allow_origins: None,
            respond_with_empty_img: false,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("INGEST_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.apply_listen(&listen)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Applies a `host:port` (or `[v6]:port`) listen address.
    pub fn apply_listen(&mut self, listen: &str) -> anyhow::Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("LISTEN must be host:port, got {listen:?}"))?;
        self.port = port
            .parse()
            .with_context(|| format!("invalid port in LISTEN {listen:?}"))?;
        self.bind = host.trim_start_matches('[').trim_end_matches(']').to_string();
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let listen = self.listen_addr();
        listen
            .to_socket_addrs()
            .with_context(|| format!("resolving {listen}"))?
            .next()
            .with_context(|| format!("{listen} resolved to no address"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.body_size_limit == 0 {
            bail!("body_size_limit must be greater than zero");
        }
        if self.blocking_timeout.is_zero() {
            bail!("blocking_timeout must be greater than zero");
        }
        if self.bind.is_empty() {
            bail!("bind must not be empty");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(u64),
    Float(f64),
    Text(String),
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let size = match RawValue::deserialize(deserializer)? {
        RawValue::Int(n) => Some(n),
        RawValue::Float(f) if f >= 0.0 => Some(f as u64),
        RawValue::Float(_) => None,
        RawValue::Text(s) => parse_size(&s),
    };
    size.and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom("expected a size such as 1024, \"512k\" or \"32m\""))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let duration = match RawValue::deserialize(deserializer)? {
        RawValue::Int(n) => Some(Duration::from_secs(n)),
        RawValue::Float(f) => Duration::try_from_secs_f64(f).ok(),
        RawValue::Text(s) => parse_duration(&s),
    };
    duration.ok_or_else(|| serde::de::Error::custom("expected a duration such as 10, 0.5, \"500ms\" or \"5m\""))
}

/// `"10m"` → 10 MiB. Suffixes `k`, `m`, `g`, `t` are powers of 1024.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim().to_ascii_lowercase();
    let text = text.strip_suffix('b').unwrap_or(&text);
    let (digits, shift) = match text.chars().last()? {
        'k' => (&text[..text.len() - 1], 10),
        'm' => (&text[..text.len() - 1], 20),
        'g' => (&text[..text.len() - 1], 30),
        't' => (&text[..text.len() - 1], 40),
        _ => (text, 0),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(1u64 << shift)
}

/// `"500ms"`, `"10s"`, `"5m"`, `"1h"`, `"1d"`; bare numbers are seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim().to_ascii_lowercase();
    let (number, unit) = if let Some(n) = text.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = text.strip_suffix('d') {
        (n, 86400.0)
    } else {
        (text.as_str(), 1.0)
    };
    let value = number.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(value * unit).ok()
}
