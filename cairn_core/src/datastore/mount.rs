use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};

use super::{
    Datastore, DatastoreError, DatastoreFeatures, DsKey, DsResult, Query, QueryEntry,
    QueryResults, ThreadSafeDatastore, Value,
};

/// Binds a backing datastore to a key prefix.
#[derive(Debug, Clone)]
pub struct MountPoint {
    pub prefix: DsKey,
    pub datastore: Arc<dyn ThreadSafeDatastore>,
}

impl MountPoint {
    pub fn new(prefix: impl Into<DsKey>, datastore: Arc<dyn ThreadSafeDatastore>) -> Self {
        Self {
            prefix: prefix.into(),
            datastore,
        }
    }
}

/// A virtual datastore that routes every key to the mounted store with the
/// longest matching prefix.
///
/// The mount prefix is stripped before a key reaches its backing store, so
/// a store mounted at `/blocks` sees `/blocks/abc` as `/abc`.
#[derive(Debug, Clone)]
pub struct Mount {
    // sorted longest prefix first
    mounts: Vec<MountPoint>,
}

type BoxedResults = Pin<Box<dyn Stream<Item = DsResult<QueryEntry>> + Send>>;

impl Mount {
    pub fn new(mut mounts: Vec<MountPoint>) -> Self {
        mounts.sort_by(|a, b| {
            b.prefix
                .segments()
                .count()
                .cmp(&a.prefix.segments().count())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        Self { mounts }
    }

    pub fn mounts(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// Finds the store responsible for `key` and the key as that store sees it.
    pub fn lookup(&self, key: &DsKey) -> Option<(&MountPoint, DsKey)> {
        self.mounts.iter().find_map(|mount| {
            key.strip_prefix(&mount.prefix)
                .map(|rest| (mount, rest))
        })
    }

    fn route(&self, key: &DsKey) -> DsResult<(&MountPoint, DsKey)> {
        self.lookup(key)
            .ok_or_else(|| DatastoreError::NoMount(key.to_string()))
    }
}

#[async_trait]
impl Datastore for Mount {
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()> {
        let (mount, rest) = self.route(key)?;
        mount.datastore.put(&rest, value).await
    }

    async fn get(&self, key: &DsKey) -> DsResult<Value> {
        let (mount, rest) = self.route(key)?;
        mount.datastore.get(&rest).await
    }

    async fn has(&self, key: &DsKey) -> DsResult<bool> {
        let (mount, rest) = self.route(key)?;
        mount.datastore.has(&rest).await
    }

    async fn delete(&self, key: &DsKey) -> DsResult<()> {
        let (mount, rest) = self.route(key)?;
        mount.datastore.delete(&rest).await
    }

    async fn query(&self, query: Query) -> DsResult<QueryResults> {
        let mut streams: Vec<BoxedResults> = Vec::new();

        for (index, mount) in self.mounts.iter().enumerate() {
            // The child either holds keys below the query prefix, or the
            // whole child lies below it. Otherwise it has nothing to offer.
            let child_prefix = match query.prefix.strip_prefix(&mount.prefix) {
                Some(rest) => rest,
                None if query.prefix.is_ancestor_of(&mount.prefix) => DsKey::root(),
                None => continue,
            };

            let results = mount
                .datastore
                .query(Query {
                    prefix: child_prefix,
                    keys_only: query.keys_only,
                })
                .await?;

            let mount_prefix = mount.prefix.clone();
            let query_prefix = query.prefix.clone();
            // Keys that a more specific mount owns are shadowed here.
            let shadowing: Vec<DsKey> = self.mounts[..index]
                .iter()
                .map(|m| m.prefix.clone())
                .collect();

            let stream = results.filter_map(move |item| {
                let item = match item {
                    Ok(entry) => {
                        let key = mount_prefix.join(&entry.key);
                        let shadowed = shadowing.iter().any(|p| p.contains(&key));
                        if shadowed || !query_prefix.contains(&key) {
                            None
                        } else {
                            Some(Ok(QueryEntry {
                                key,
                                value: entry.value,
                            }))
                        }
                    }
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(item)
            });
            streams.push(Box::pin(stream));
        }

        Ok(Box::new(stream::select_all(streams)))
    }

    fn features(&self) -> DatastoreFeatures {
        self.mounts.iter().fold(
            DatastoreFeatures {
                structured_values: true,
                ordered_queries: self.mounts.len() <= 1,
                hierarchical_keys: true,
            },
            |acc, mount| {
                let child = mount.datastore.features();
                DatastoreFeatures {
                    structured_values: acc.structured_values && child.structured_values,
                    ordered_queries: acc.ordered_queries && child.ordered_queries,
                    hierarchical_keys: acc.hierarchical_keys,
                }
            },
        )
    }

    /// Closes every mounted store, reporting the first failure.
    async fn close(&self) -> DsResult<()> {
        let mut first_err = None;
        for mount in &self.mounts {
            if let Err(err) = mount.datastore.close().await {
                tracing::warn!("mount: failed to close store at {}: {err}", mount.prefix);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// Every mounted store is itself required to be thread-safe.
impl ThreadSafeDatastore for Mount {}
