//! Repository configuration.
//!
//! The typed [`RepoConfig`] is what the code works with. On disk the config
//! is kept as a generic TOML table so that keys unknown to this version
//! survive a read-modify-write cycle.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

/// File name of the config inside the repository root.
pub const CONFIG_FILE: &str = "config";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config cannot be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config root must be a table")]
    NotATable,
    #[error("config key must not be empty")]
    EmptyKey,
    #[error("config key '{0}' not found")]
    KeyNotFound(String),
    #[error("config key '{key}' has no field '{segment}', it is not a table")]
    NotAMap { key: String, segment: String },
    #[error("value for config key '{key}' is invalid: {source}")]
    Invalid {
        key: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub identity: Identity,
    pub addresses: Addresses,
    pub bootstrap: Vec<String>,
    pub datastore: DatastoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub peer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Addresses {
    pub swarm: Vec<String>,
    pub api: String,
    pub gateway: String,
}

impl Default for Addresses {
    fn default() -> Self {
        Self {
            swarm: vec!["/ip4/0.0.0.0/tcp/4001".to_owned()],
            api: "/ip4/127.0.0.1/tcp/5001".to_owned(),
            gateway: "/ip4/127.0.0.1/tcp/8080".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Skip fsync when writing block files.
    pub no_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub max_size_mb: u64,
    pub max_backups: u32,
    /// Rotated files older than this are removed; 0 keeps them forever.
    pub max_age_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 250,
            max_backups: 1,
            max_age_days: 0,
        }
    }
}

impl RepoConfig {
    pub fn to_map(&self) -> Result<Table, ConfigError> {
        match Value::try_from(self)? {
            Value::Table(table) => Ok(table),
            _ => Err(ConfigError::NotATable),
        }
    }

    pub fn from_map(map: Table) -> Result<Self, ConfigError> {
        Ok(Value::Table(map).try_into()?)
    }
}

pub fn config_path(repo: &Path) -> PathBuf {
    repo.join(CONFIG_FILE)
}

/// Reads the persisted config as a generic table.
pub fn read_config_map(path: &Path) -> Result<Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Reads and validates the persisted config.
pub fn load(path: &Path) -> Result<RepoConfig, ConfigError> {
    RepoConfig::from_map(read_config_map(path)?)
}

/// Replaces the config file atomically: the new contents are written and
/// synced to a temporary file next to it, which is then renamed over it.
pub fn write_config_map(path: &Path, map: &Table) -> Result<(), ConfigError> {
    let contents = toml::to_string(map)?;
    let write_err = |source: io::Error| ConfigError::Write {
        path: path.to_owned(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

pub fn write(path: &Path, config: &RepoConfig) -> Result<(), ConfigError> {
    write_config_map(path, &config.to_map()?)
}

/// Looks up a dotted key such as `log.max_size_mb`.
pub fn map_get<'a>(map: &'a Table, key: &str) -> Result<&'a Value, ConfigError> {
    let mut segments = split_key(key)?.into_iter().peekable();
    let mut table = map;
    while let Some(segment) = segments.next() {
        let value = table
            .get(segment)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_owned()))?;
        if segments.peek().is_none() {
            return Ok(value);
        }
        table = value.as_table().ok_or_else(|| ConfigError::NotAMap {
            key: key.to_owned(),
            segment: segment.to_owned(),
        })?;
    }
    Err(ConfigError::KeyNotFound(key.to_owned()))
}

/// Sets a dotted key, creating intermediate tables as needed.
pub fn map_set(map: &mut Table, key: &str, value: Value) -> Result<(), ConfigError> {
    let segments = split_key(key)?;
    let (last, parents) = segments.split_last().ok_or(ConfigError::EmptyKey)?;

    let mut table = map;
    for segment in parents {
        let entry = table
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        table = entry.as_table_mut().ok_or_else(|| ConfigError::NotAMap {
            key: key.to_owned(),
            segment: segment.to_string(),
        })?;
    }
    table.insert(last.to_string(), value);
    Ok(())
}

fn split_key(key: &str) -> Result<Vec<&str>, ConfigError> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::EmptyKey);
    }
    Ok(segments)
}

/// String values that read as integers become integers.
pub fn coerce(value: Value) -> Value {
    match value {
        Value::String(s) => match s.parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::String(s),
        },
        other => other,
    }
}
