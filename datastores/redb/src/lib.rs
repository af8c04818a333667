//! RedbDatastore - an ordered, transactional datastore backed by redb.

use bytes::Bytes;
use cairn_core::datastore::{
    Datastore, DatastoreError, DatastoreFeatures, DsKey, DsResult, Query, QueryEntry,
    QueryResults, ThreadSafeDatastore, Value,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::{path::Path, sync::Arc};
use tokio::sync::RwLock;

/// Key is the cleaned `DsKey` string, value is `(kind, bytes)`.
const TABLE: TableDefinition<&str, (u8, &[u8])> = TableDefinition::new("datastore");

pub const DB_FILE_NAME: &str = "store.redb";

/// Datastore keeping every entry in a single redb file.
///
/// All redb calls run on the blocking pool. After [`Datastore::close`] the
/// database file is released and further calls fail with
/// [`DatastoreError::Closed`].
pub struct RedbDatastore {
    db: RwLock<Option<Arc<Database>>>,
}

impl RedbDatastore {
    /// Opens (or creates) `<dir>/store.redb`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join(DB_FILE_NAME))?;

        // Create the table up front so that a read on a fresh database
        // does not fail with `TableDoesNotExist`.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(TABLE)?;
            }
            write_txn.commit()?;
        }

        Ok(Self {
            db: RwLock::new(Some(Arc::new(db))),
        })
    }

    async fn db(&self) -> DsResult<Arc<Database>> {
        self.db.read().await.clone().ok_or(DatastoreError::Closed)
    }
}

impl std::fmt::Debug for RedbDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDatastore").finish()
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> DsResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("redb {what} task failed: {e}"))?;
    Ok(result?)
}

#[async_trait::async_trait]
impl Datastore for RedbDatastore {
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()> {
        if key.is_root() {
            return Err(DatastoreError::invalid_key(key, "the root key holds no value"));
        }
        let db = self.db().await?;
        let key = key.clone();

        blocking("write", move || {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.insert(key.as_str(), (value.kind(), value.as_bytes().as_ref()))?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &DsKey) -> DsResult<Value> {
        let db = self.db().await?;
        let key = key.clone();

        let stored = blocking("read", move || {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            let stored = table.get(key.as_str())?.map(|guard| {
                let (kind, bytes) = guard.value();
                (kind, Bytes::copy_from_slice(bytes))
            });
            Ok(stored)
        })
        .await?;

        let (kind, bytes) = stored.ok_or(DatastoreError::NotFound)?;
        Value::from_kind(kind, bytes)
            .ok_or_else(|| anyhow::anyhow!("redb: unknown value kind {kind}").into())
    }

    async fn has(&self, key: &DsKey) -> DsResult<bool> {
        let db = self.db().await?;
        let key = key.clone();

        blocking("read", move || {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            Ok(table.get(key.as_str())?.is_some())
        })
        .await
    }

    async fn delete(&self, key: &DsKey) -> DsResult<()> {
        let db = self.db().await?;
        let key = key.clone();

        blocking("delete", move || {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    /// Range scan from the query prefix. Results are a snapshot of one read
    /// transaction and come back in key order.
    async fn query(&self, query: Query) -> DsResult<QueryResults> {
        let db = self.db().await?;

        let entries = blocking("query", move || {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            let start = query.prefix.as_str();

            let mut entries: Vec<DsResult<QueryEntry>> = Vec::new();
            for item in table.range(start..)? {
                let (key_guard, value_guard) = item?;
                let raw_key = key_guard.value();
                // keys sharing the string prefix are contiguous
                if !raw_key.starts_with(start) {
                    break;
                }
                let key = DsKey::new(raw_key);
                if !query.matches(&key) {
                    continue;
                }
                let value = if query.keys_only {
                    None
                } else {
                    let (kind, bytes) = value_guard.value();
                    let value = Value::from_kind(kind, Bytes::copy_from_slice(bytes))
                        .ok_or_else(|| anyhow::anyhow!("redb: unknown value kind {kind}"))?;
                    Some(value)
                };
                entries.push(Ok(QueryEntry { key, value }));
            }
            Ok(entries)
        })
        .await?;

        Ok(Box::new(futures::stream::iter(entries)))
    }

    fn features(&self) -> DatastoreFeatures {
        DatastoreFeatures {
            structured_values: true,
            ordered_queries: true,
            hierarchical_keys: true,
        }
    }

    async fn close(&self) -> DsResult<()> {
        if self.db.write().await.take().is_some() {
            tracing::debug!("redb datastore closed");
        }
        Ok(())
    }
}

// redb serialises writers and gives readers a consistent snapshot.
impl ThreadSafeDatastore for RedbDatastore {}
