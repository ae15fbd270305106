//! Layered configuration.
//!
//! Sources, later ones winning:
//!
//! 1. `appsettings.json` in the content root (optional)
//! 2. `appsettings.{Environment}.json` (optional)
//! 3. environment variables, `__` separating sections:
//!    `ConnectionStrings__DefaultConnection`, `AppSettings__AdminEmail`,
//!    `Session__IdleTimeoutMinutes`, `Host__Urls`
//!
//! The environment name comes from `ASC_ENVIRONMENT` and defaults to
//! `Production`. Keys match case-insensitively against keys already present
//! in the files.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::session::SessionOptions;

/// Environment variable naming the hosting environment.
pub const ENVIRONMENT_VAR: &str = "ASC_ENVIRONMENT";

/// Name of the required connection string.
pub const DEFAULT_CONNECTION: &str = "DefaultConnection";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration value `{0}` not found")]
    Missing(&'static str),

    #[error("configuration value `{key}` is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Environment ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "Development",
            Self::Staging     => "Staging",
            Self::Production  => "Production",
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging"     => Ok(Self::Staging),
            "production"  => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                key: ENVIRONMENT_VAR,
                reason: format!("unknown environment `{other}`"),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Typed sections ────────────────────────────────────────────────────────────

/// The `AppSettings` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApplicationSettings {
    pub application_title: String,
    pub admin_email: String,
    pub admin_name: String,
    pub admin_password: String,
    pub engineer_email: String,
    pub engineer_name: String,
    pub engineer_password: String,
    /// Comma-separated role names.
    pub roles: String,
    pub smtp_server: String,
    #[serde(deserialize_with = "lenient")]
    pub smtp_port: u16,
    pub smtp_account: String,
    pub smtp_password: String,
}

impl ApplicationSettings {
    /// Role names from [`roles`](Self::roles), trimmed, empties skipped.
    pub fn role_names(&self) -> Vec<String> {
        self.roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            application_title: "Automobile Service Center".to_owned(),
            admin_email: String::new(),
            admin_name: "Admin".to_owned(),
            admin_password: String::new(),
            engineer_email: String::new(),
            engineer_name: "Engineer".to_owned(),
            engineer_password: String::new(),
            roles: "Admin,User,Engineer".to_owned(),
            smtp_server: String::new(),
            smtp_port: 587,
            smtp_account: String::new(),
            smtp_password: String::new(),
        }
    }
}

/// The `Session` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionSettings {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient")]
    pub idle_timeout_minutes: u64,
    pub cookie_name: String,
    #[serde(deserialize_with = "lenient")]
    pub http_only: bool,
    #[serde(deserialize_with = "lenient")]
    pub essential: bool,
}

impl SessionSettings {
    /// Longest accepted `IdleTimeoutMinutes`: 30 days.
    pub const MAX_IDLE_TIMEOUT_MINUTES: u64 = 30 * 24 * 60;

    fn validate(&self) -> Result<(), ConfigError> {
        match self.idle_timeout_minutes {
            0 => Err(ConfigError::Invalid {
                key: "Session:IdleTimeoutMinutes",
                reason: "must be at least 1".to_owned(),
            }),
            m if m > Self::MAX_IDLE_TIMEOUT_MINUTES => Err(ConfigError::Invalid {
                key: "Session:IdleTimeoutMinutes",
                reason: format!("must not exceed {}", Self::MAX_IDLE_TIMEOUT_MINUTES),
            }),
            _ => Ok(()),
        }
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions::default()
            .with_cookie_name(self.cookie_name.clone())
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_minutes.saturating_mul(60)))
            .with_http_only(self.http_only)
            .with_essential(self.essential)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            enabled: true,
            idle_timeout_minutes: options.idle_timeout.as_secs() / 60,
            cookie_name: options.cookie_name,
            http_only: options.http_only,
            essential: options.essential,
        }
    }
}

/// The `Host` section.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
struct HostSettings {
    urls: String,
    web_root: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self { urls: "http://127.0.0.1:5000".to_owned(), web_root: "wwwroot".to_owned() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawConfig {
    connection_strings: Map<String, Value>,
    app_settings: ApplicationSettings,
    session: SessionSettings,
    host: HostSettings,
}

/// Accepts either the typed JSON value or its string spelling, so values
/// that arrive from environment variables (always strings) still bind.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + FromStr,
    T::Err: fmt::Display,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => T::deserialize(other).map_err(serde::de::Error::custom),
    }
}

// ── AppConfig ─────────────────────────────────────────────────────────────────

/// Fully resolved process configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: Environment,
    pub content_root: PathBuf,
    pub connection_string: String,
    pub settings: ApplicationSettings,
    pub session: SessionSettings,
    pub listen: SocketAddr,
    pub web_root: PathBuf,
}

/// Where configuration is read from.
#[derive(Clone, Debug)]
pub struct ConfigSource {
    content_root: PathBuf,
    vars: Vec<(String, String)>,
}

impl ConfigSource {
    /// Files under `content_root`; no environment variables.
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self { content_root: content_root.into(), vars: Vec::new() }
    }

    /// Files under `content_root` plus the process environment.
    pub fn from_env(content_root: impl Into<PathBuf>) -> Self {
        Self { content_root: content_root.into(), vars: std::env::vars().collect() }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

impl AppConfig {
    pub fn load(source: &ConfigSource) -> Result<Self, ConfigError> {
        let environment = match source.var(ENVIRONMENT_VAR) {
            Some(name) => name.parse()?,
            None => Environment::default(),
        };

        let mut merged = Value::Object(Map::new());
        for file in ["appsettings.json".to_owned(), format!("appsettings.{environment}.json")] {
            if let Some(layer) = read_layer(&source.content_root.join(file))? {
                merge(&mut merged, layer);
            }
        }
        for (key, value) in &source.vars {
            if key.contains("__") {
                let path: Vec<&str> = key.split("__").collect();
                set_path(&mut merged, &path, Value::String(value.clone()));
            }
        }

        let raw: RawConfig = serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
            path: source.content_root.join("appsettings.json"),
            source: e,
        })?;

        let connection_string = raw.connection_strings.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(DEFAULT_CONNECTION))
            .and_then(|(_, v)| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("ConnectionStrings:DefaultConnection"))?
            .to_owned();

        raw.session.validate()?;
        let listen = parse_listen(&raw.host.urls)?;
        let web_root = source.content_root.join(&raw.host.web_root);

        Ok(Self {
            environment,
            content_root: source.content_root.clone(),
            connection_string,
            settings: raw.app_settings,
            session: raw.session,
            listen,
            web_root,
        })
    }
}

fn read_layer(path: &Path) -> Result<Option<Value>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Deep-merges `layer` into `base`. Objects merge key by key (keys compared
/// case-insensitively); anything else replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match find_key(base, &key) {
                    Some(existing) => {
                        if let Some(slot) = base.get_mut(&existing) {
                            merge(slot, value);
                        }
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn set_path(base: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *base = value;
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let Value::Object(map) = base else { return };
    let key = find_key(map, head).unwrap_or_else(|| (*head).to_owned());
    let slot = map.entry(key).or_insert(Value::Null);
    set_path(slot, rest, value);
}

fn find_key(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()
}

/// Takes the first of `;`-separated URLs. `http://` / `https://` prefixes and
/// a trailing `/` are ignored; `localhost` means the IPv4 loopback.
fn parse_listen(urls: &str) -> Result<SocketAddr, ConfigError> {
    let first = urls.split(';').map(str::trim).find(|u| !u.is_empty()).unwrap_or_default();
    let host_port = first
        .strip_prefix("http://")
        .or_else(|| first.strip_prefix("https://"))
        .unwrap_or(first)
        .trim_end_matches('/');
    let host_port = match host_port.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => host_port.to_owned(),
    };
    host_port.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        key: "Host:Urls",
        reason: format!("`{first}`: {e}"),
    })
}
