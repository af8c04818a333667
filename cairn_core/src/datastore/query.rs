use futures::Stream;

use super::{DsKey, DsResult, Value};

/// A prefix query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Only keys equal to or below this key are returned.
    pub prefix: DsKey,
    /// Skip loading values.
    pub keys_only: bool,
}

impl Query {
    pub fn all() -> Self {
        Self {
            prefix: DsKey::root(),
            keys_only: false,
        }
    }

    pub fn keys_under(prefix: DsKey) -> Self {
        Self {
            prefix,
            keys_only: true,
        }
    }

    pub fn matches(&self, key: &DsKey) -> bool {
        self.prefix.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub key: DsKey,
    /// `None` when the query was `keys_only`.
    pub value: Option<Value>,
}

pub type QueryResults = Box<dyn Stream<Item = DsResult<QueryEntry>> + Send + Unpin + 'static>;
