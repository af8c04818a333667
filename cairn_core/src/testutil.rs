//! Conformance suite for `Datastore` implementations.
//!
//! In your datastore crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! cairn_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test module:
//!
//! ```ignore
//! use cairn_core::testutil::DatastoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     DatastoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::datastore::{Datastore, DatastoreError, DsKey, Query, Value};
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::collections::HashSet;

/// Runs the behaviour every `Datastore` must share against one store.
///
/// All keys are created below a random prefix so the suite can run against
/// a store that already holds data. Stores without hierarchical keys get
/// flat keys whose names start with that prefix instead.
pub struct DatastoreTests<'a, D> {
    store: &'a D,
    prefix: DsKey,
}

impl<'a, D: Datastore> DatastoreTests<'a, D> {
    pub fn new(store: &'a D) -> Self {
        let prefix = DsKey::root().child(format!("test{}", rand::rng().random::<u32>()));
        Self { store, prefix }
    }

    pub fn with_prefix(store: &'a D, prefix: impl Into<DsKey>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn hierarchical(&self) -> bool {
        self.store.features().hierarchical_keys
    }

    /// A key owned by this suite. Names stay within `[a-z0-9]` so that
    /// flat-file stores accept them.
    fn key(&self, name: &str) -> DsKey {
        if self.hierarchical() {
            self.prefix.child(name)
        } else {
            DsKey::root().child(format!("{}{}", self.prefix.name(), name))
        }
    }

    /// The narrowest query prefix covering every suite key.
    fn scope(&self) -> DsKey {
        if self.hierarchical() {
            self.prefix.clone()
        } else {
            DsKey::root()
        }
    }

    fn owns(&self, key: &DsKey) -> bool {
        if self.hierarchical() {
            self.prefix.is_ancestor_of(key)
        } else {
            key.segments().count() == 1 && key.name().starts_with(self.prefix.name())
        }
    }

    pub async fn run_all(&self) -> anyhow::Result<()> {
        self.test_put_get().await?;
        self.test_get_missing().await?;
        self.test_has().await?;
        self.test_delete().await?;
        self.test_overwrite().await?;
        self.test_empty_value().await?;
        self.test_query().await?;
        self.test_query_keys_only().await?;

        if self.hierarchical() {
            self.test_query_excludes_siblings().await?;
        }
        if self.store.features().structured_values {
            self.test_record_values().await?;
        } else {
            self.test_record_values_rejected().await?;
        }
        if self.store.features().ordered_queries {
            self.test_query_ordered().await?;
        }

        self.cleanup().await?;
        Ok(())
    }

    pub async fn test_put_get(&self) -> anyhow::Result<()> {
        let key = self.key("putget");
        let data = Bytes::from_static(b"hello, world!");

        self.store.put(&key, Value::Raw(data.clone())).await?;

        let value = self.store.get(&key).await?;
        assert_eq!(value, Value::Raw(data), "retrieved value should match");
        Ok(())
    }

    pub async fn test_get_missing(&self) -> anyhow::Result<()> {
        let key = self.key("neverwritten");
        match self.store.get(&key).await {
            Err(DatastoreError::NotFound) => Ok(()),
            other => panic!("missing key should be NotFound, got {other:?}"),
        }
    }

    pub async fn test_has(&self) -> anyhow::Result<()> {
        let key = self.key("has");
        assert!(!self.store.has(&key).await?, "key should not exist yet");

        self.store
            .put(&key, Value::Raw(Bytes::from_static(b"x")))
            .await?;

        assert!(self.store.has(&key).await?, "key should exist after put");
        Ok(())
    }

    pub async fn test_delete(&self) -> anyhow::Result<()> {
        let key = self.key("delete");
        self.store
            .put(&key, Value::Raw(Bytes::from_static(b"to be deleted")))
            .await?;

        self.store.delete(&key).await?;
        assert!(!self.store.has(&key).await?, "key should be gone");

        // deleting again is not an error
        self.store.delete(&key).await?;
        Ok(())
    }

    pub async fn test_overwrite(&self) -> anyhow::Result<()> {
        let key = self.key("overwrite");
        self.store
            .put(&key, Value::Raw(Bytes::from_static(b"original")))
            .await?;
        self.store
            .put(&key, Value::Raw(Bytes::from_static(b"replacement")))
            .await?;

        let value = self.store.get(&key).await?;
        assert_eq!(value, Value::Raw(Bytes::from_static(b"replacement")));
        Ok(())
    }

    pub async fn test_empty_value(&self) -> anyhow::Result<()> {
        let key = self.key("empty");
        self.store.put(&key, Value::Raw(Bytes::new())).await?;
        assert_eq!(self.store.get(&key).await?, Value::Raw(Bytes::new()));
        Ok(())
    }

    pub async fn test_query(&self) -> anyhow::Result<()> {
        let names = ["qa", "qb", "qc"];
        for name in &names {
            self.store
                .put(&self.key(name), Value::Raw(Bytes::from(name.as_bytes().to_vec())))
                .await?;
        }

        let mut results = self
            .store
            .query(Query {
                prefix: self.scope(),
                keys_only: false,
            })
            .await?;
        let mut found = HashSet::new();
        while let Some(entry) = results.next().await {
            let entry = entry?;
            assert!(self.scope().contains(&entry.key), "unexpected key {}", entry.key);
            if !self.owns(&entry.key) {
                continue;
            }
            let value = entry.value.expect("value requested");
            if let Some(name) = names.iter().find(|n| self.key(n) == entry.key) {
                assert_eq!(value.as_bytes().as_ref(), name.as_bytes());
            }
            found.insert(entry.key);
        }

        for name in &names {
            assert!(found.contains(&self.key(name)), "query should return {name}");
        }
        Ok(())
    }

    pub async fn test_query_keys_only(&self) -> anyhow::Result<()> {
        let key = self.key("keysonly");
        self.store
            .put(&key, Value::Raw(Bytes::from_static(b"payload")))
            .await?;

        let mut results = self.store.query(Query::keys_under(self.scope())).await?;
        let mut seen = false;
        while let Some(entry) = results.next().await {
            let entry = entry?;
            assert!(entry.value.is_none(), "keys_only must not load values");
            if entry.key == key {
                seen = true;
            }
        }
        assert!(seen, "keys_only query should return the key");
        Ok(())
    }

    pub async fn test_query_excludes_siblings(&self) -> anyhow::Result<()> {
        let sub = self.prefix.child("sub");
        self.store
            .put(&sub.child("inside"), Value::Raw(Bytes::new()))
            .await?;
        // shares a string prefix with `sub`, but is not below it
        let sibling = self.prefix.child("subx");
        self.store.put(&sibling, Value::Raw(Bytes::new())).await?;

        let mut results = self.store.query(Query::keys_under(sub.clone())).await?;
        let mut keys = Vec::new();
        while let Some(entry) = results.next().await {
            keys.push(entry?.key);
        }
        assert_eq!(keys, vec![sub.child("inside")]);
        Ok(())
    }

    pub async fn test_record_values(&self) -> anyhow::Result<()> {
        let key = self.key("record");
        let record = Value::Record(Bytes::from_static(b"\xa1\x61k\x61v"));
        self.store.put(&key, record.clone()).await?;
        assert_eq!(self.store.get(&key).await?, record);
        Ok(())
    }

    pub async fn test_record_values_rejected(&self) -> anyhow::Result<()> {
        let key = self.key("record");
        let result = self
            .store
            .put(&key, Value::Record(Bytes::from_static(b"\xa0")))
            .await;
        assert!(
            matches!(result, Err(DatastoreError::UnsupportedValue(_))),
            "record values should be rejected"
        );
        Ok(())
    }

    pub async fn test_query_ordered(&self) -> anyhow::Result<()> {
        for name in ["oc", "oa", "ob"] {
            self.store.put(&self.key(name), Value::Raw(Bytes::new())).await?;
        }

        let keys: Vec<DsKey> = self
            .store
            .query(Query::keys_under(self.scope()))
            .await?
            .filter_map(|entry| futures::future::ready(entry.ok().map(|e| e.key)))
            .collect()
            .await;
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "ordered store must return sorted keys");
        Ok(())
    }

    /// Deletes every key the suite created.
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        let mut results = self.store.query(Query::keys_under(self.scope())).await?;
        let mut keys = Vec::new();
        while let Some(entry) = results.next().await {
            let key = entry?.key;
            if self.owns(&key) {
                keys.push(key);
            }
        }
        for key in keys {
            let _ = self.store.delete(&key).await;
        }
        Ok(())
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}
