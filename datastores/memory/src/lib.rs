use cairn_core::datastore::{
    Datastore, DatastoreError, DatastoreFeatures, DsKey, DsResult, Query, QueryEntry,
    QueryResults, ThreadSafeDatastore, Value,
};
use dashmap::DashMap;
use futures::stream;

#[derive(Debug)]
pub struct MemoryDatastore {
    entries: DashMap<DsKey, Value>,
}

impl MemoryDatastore {
    /// Creates a new, empty `MemoryDatastore`.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()> {
        if key.is_root() {
            return Err(DatastoreError::invalid_key(key, "the root key holds no value"));
        }
        self.entries.insert(key.clone(), value);
        Ok(())
    }

    async fn get(&self, key: &DsKey) -> DsResult<Value> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(DatastoreError::NotFound)
    }

    async fn has(&self, key: &DsKey) -> DsResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &DsKey) -> DsResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    /// Snapshots the matching entries. Writes made after the call are not
    /// seen by the returned stream.
    async fn query(&self, query: Query) -> DsResult<QueryResults> {
        let entries: Vec<DsResult<QueryEntry>> = self
            .entries
            .iter()
            .filter(|entry| query.matches(entry.key()))
            .map(|entry| {
                Ok(QueryEntry {
                    key: entry.key().clone(),
                    value: (!query.keys_only).then(|| entry.value().clone()),
                })
            })
            .collect();
        Ok(Box::new(stream::iter(entries)))
    }

    fn features(&self) -> DatastoreFeatures {
        DatastoreFeatures {
            structured_values: true,
            ordered_queries: false,
            hierarchical_keys: true,
        }
    }
}

// DashMap shards its locks; every operation is atomic per key.
impl ThreadSafeDatastore for MemoryDatastore {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cairn_core::testutil::DatastoreTests;
    use futures::StreamExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_datastore() {
        let store = MemoryDatastore::new();
        DatastoreTests::new(&store).run_all().await.unwrap();
        assert!(store.is_empty(), "suite should clean up after itself");
    }

    #[tokio::test]
    async fn query_is_a_snapshot() {
        let store = MemoryDatastore::new();
        store
            .put(&DsKey::new("/a"), Value::Raw(Bytes::from_static(b"1")))
            .await
            .unwrap();

        let results = store.query(Query::all()).await.unwrap();
        store
            .put(&DsKey::new("/b"), Value::Raw(Bytes::from_static(b"2")))
            .await
            .unwrap();

        let keys: Vec<DsKey> = results.map(|e| e.unwrap().key).collect().await;
        assert_eq!(keys, vec![DsKey::new("/a")]);
    }

    #[tokio::test]
    async fn root_key_is_rejected() {
        let store = MemoryDatastore::new();
        let err = store
            .put(&DsKey::root(), Value::Raw(Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn concurrent_writers() {
        let store = Arc::new(MemoryDatastore::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let key = DsKey::root().child(format!("k{i}"));
                store
                    .put(&key, Value::Raw(Bytes::from(vec![i as u8; 8])))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.len(), 16);
    }
}
