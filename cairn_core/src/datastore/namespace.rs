use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;

use super::{
    Datastore, DatastoreFeatures, DsKey, DsResult, Query, QueryEntry, QueryResults,
    ThreadSafeDatastore, Value,
};

/// Exposes the keys below `prefix` of another datastore as if they were
/// top-level keys.
///
/// Queries are rewritten in both directions: the prefix is prepended to
/// the query prefix and stripped from every result key.
pub struct Namespace<D: ?Sized> {
    prefix: DsKey,
    inner: Arc<D>,
}

impl<D: ?Sized> Namespace<D> {
    pub fn new(prefix: DsKey, inner: Arc<D>) -> Self {
        Self { prefix, inner }
    }

    pub fn prefix(&self) -> &DsKey {
        &self.prefix
    }

    pub fn inner(&self) -> &Arc<D> {
        &self.inner
    }

    fn convert(&self, key: &DsKey) -> DsKey {
        self.prefix.join(key)
    }
}

impl<D: ?Sized> Clone for Namespace<D> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<D: fmt::Debug + ?Sized> fmt::Debug for Namespace<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("prefix", &self.prefix)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl<D: Datastore + ?Sized> Datastore for Namespace<D> {
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()> {
        self.inner.put(&self.convert(key), value).await
    }

    async fn get(&self, key: &DsKey) -> DsResult<Value> {
        self.inner.get(&self.convert(key)).await
    }

    async fn has(&self, key: &DsKey) -> DsResult<bool> {
        self.inner.has(&self.convert(key)).await
    }

    async fn delete(&self, key: &DsKey) -> DsResult<()> {
        self.inner.delete(&self.convert(key)).await
    }

    async fn query(&self, query: Query) -> DsResult<QueryResults> {
        let inner_query = Query {
            prefix: self.convert(&query.prefix),
            keys_only: query.keys_only,
        };
        let results = self.inner.query(inner_query).await?;

        let prefix = self.prefix.clone();
        let stream = results.filter_map(move |item| {
            let item = match item {
                Ok(entry) => entry.key.strip_prefix(&prefix).map(|key| {
                    Ok(QueryEntry {
                        key,
                        value: entry.value,
                    })
                }),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(item)
        });
        Ok(Box::new(stream))
    }

    fn features(&self) -> DatastoreFeatures {
        self.inner.features()
    }

    async fn close(&self) -> DsResult<()> {
        self.inner.close().await
    }
}

impl<D: ThreadSafeDatastore + ?Sized> ThreadSafeDatastore for Namespace<D> {}
