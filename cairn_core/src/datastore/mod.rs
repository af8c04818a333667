//! Generic key-value persistence.
//!
//! Backends implement [`Datastore`]; the ones that tolerate concurrent use
//! from many tasks also implement the [`ThreadSafeDatastore`] marker, which
//! is what [`Mount`] and [`crate::Blockstore`] require.

mod key;
mod mount;
mod namespace;
mod query;

pub use key::DsKey;
pub use mount::{Mount, MountPoint};
pub use namespace::Namespace;
pub use query::{Query, QueryEntry, QueryResults};

use async_trait::async_trait;
use bytes::Bytes;

pub type DsResult<T> = std::result::Result<T, DatastoreError>;

#[derive(thiserror::Error, Debug)]
pub enum DatastoreError {
    #[error("datastore: key not found")]
    NotFound,
    #[error("invalid datastore key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("datastore does not support {0} values")]
    UnsupportedValue(&'static str),
    #[error("datastore is closed")]
    Closed,
    #[error("no datastore mounted for key '{0}'")]
    NoMount(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatastoreError {
    pub fn invalid_key(key: &DsKey, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason,
        }
    }
}

/// A stored value.
///
/// Block payloads are `Raw`. Structured state (indices, bookkeeping) is
/// stored as an encoded `Record` so that readers can tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Raw(Bytes),
    Record(Bytes),
}

impl Value {
    pub const KIND_RAW: u8 = 0;
    pub const KIND_RECORD: u8 = 1;

    pub fn kind(&self) -> u8 {
        match self {
            Value::Raw(_) => Self::KIND_RAW,
            Value::Record(_) => Self::KIND_RECORD,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Raw(_) => "raw",
            Value::Record(_) => "record",
        }
    }

    pub fn from_kind(kind: u8, bytes: Bytes) -> Option<Self> {
        match kind {
            Self::KIND_RAW => Some(Value::Raw(bytes)),
            Self::KIND_RECORD => Some(Value::Record(bytes)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Value::Raw(b) | Value::Record(b) => b,
        }
    }

    pub fn into_raw(self) -> Option<Bytes> {
        match self {
            Value::Raw(b) => Some(b),
            Value::Record(_) => None,
        }
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Raw(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatastoreFeatures {
    /// `Value::Record` can be stored.
    pub structured_values: bool,
    /// Query results come back in key order.
    pub ordered_queries: bool,
    /// Keys may have more than one segment. Flat stores only accept
    /// `/<name>` keys and only answer root or single-key queries.
    pub hierarchical_keys: bool,
}

#[async_trait]
pub trait Datastore: std::fmt::Debug + Send + Sync + 'static {
    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()>;

    /// Fails with [`DatastoreError::NotFound`] if `key` is absent.
    async fn get(&self, key: &DsKey) -> DsResult<Value>;

    async fn has(&self, key: &DsKey) -> DsResult<bool>;

    /// Removing an absent key succeeds.
    async fn delete(&self, key: &DsKey) -> DsResult<()>;

    /// Streams every entry whose key is `query.prefix` or lies below it.
    async fn query(&self, query: Query) -> DsResult<QueryResults>;

    fn features(&self) -> DatastoreFeatures;

    /// Releases backing resources. Later operations may fail with
    /// [`DatastoreError::Closed`].
    async fn close(&self) -> DsResult<()> {
        Ok(())
    }
}

/// Capability marker: every operation is safe to call concurrently from
/// any number of tasks and is atomic per key.
pub trait ThreadSafeDatastore: Datastore {}
