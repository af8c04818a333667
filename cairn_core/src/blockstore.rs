//! Content-addressed block storage on top of a thread-safe datastore.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    Block, Key,
    datastore::{Datastore, DatastoreError, DsKey, Namespace, Query, ThreadSafeDatastore, Value},
    key::MultihashError,
};

/// Namespace all blocks are stored under.
pub const BLOCK_PREFIX: &str = "/blocks";

#[derive(thiserror::Error, Debug)]
pub enum BlockstoreError {
    #[error("blockstore: block not found")]
    NotFound,
    #[error("blockstore: the retrieved value is not a block")]
    ValueTypeMismatch,
    #[error("blockstore: key is not a valid multihash: {0}")]
    InvalidKey(#[from] MultihashError),
    #[error(transparent)]
    Datastore(DatastoreError),
}

impl From<DatastoreError> for BlockstoreError {
    fn from(value: DatastoreError) -> Self {
        match value {
            DatastoreError::NotFound => BlockstoreError::NotFound,
            other => BlockstoreError::Datastore(other),
        }
    }
}

/// Get/put/has/delete for [`Block`]s plus cancelable key enumeration.
///
/// Blocks are written under [`BLOCK_PREFIX`] of the wrapped datastore,
/// keyed by [`Key::to_ds_key`]. The blockstore adds no locking; it relies
/// on the [`ThreadSafeDatastore`] capability of the datastore it wraps.
#[derive(Debug, Clone)]
pub struct Blockstore {
    datastore: Namespace<dyn ThreadSafeDatastore>,
}

impl Blockstore {
    pub fn new(datastore: Arc<dyn ThreadSafeDatastore>) -> Self {
        Self {
            datastore: Namespace::new(DsKey::new(BLOCK_PREFIX), datastore),
        }
    }

    /// Reads a block. The returned block pairs the stored bytes with `key`;
    /// the data is not re-hashed.
    pub async fn get(&self, key: &Key) -> Result<Block, BlockstoreError> {
        match self.datastore.get(&key.to_ds_key()).await? {
            Value::Raw(data) => Ok(Block::with_key(data, key.clone())?),
            Value::Record(_) => Err(BlockstoreError::ValueTypeMismatch),
        }
    }

    /// Stores a block. Blocks that are already present are not rewritten.
    pub async fn put(&self, block: &Block) -> Result<(), BlockstoreError> {
        let ds_key = block.key().to_ds_key();
        if self.datastore.has(&ds_key).await? {
            tracing::debug!("blockstore: {} already stored", block.key().fmt_short());
            return Ok(());
        }
        self.datastore
            .put(&ds_key, Value::Raw(block.data().clone()))
            .await?;
        Ok(())
    }

    pub async fn has(&self, key: &Key) -> Result<bool, BlockstoreError> {
        Ok(self.datastore.has(&key.to_ds_key()).await?)
    }

    pub async fn delete_block(&self, key: &Key) -> Result<(), BlockstoreError> {
        Ok(self.datastore.delete(&key.to_ds_key()).await?)
    }

    /// Enumerates every stored block key.
    ///
    /// A background task drives a keys-only query and hands keys over a
    /// channel of capacity one, so it never runs more than one key ahead of
    /// the consumer. The stream ends when the query is exhausted, when the
    /// query fails (the error is logged), or once `cancel` fires. Keys that
    /// do not decode as a multihash are skipped.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn all_keys_chan(
        &self,
        cancel: CancellationToken,
    ) -> Result<KeyStream, BlockstoreError> {
        let mut results = self
            .datastore
            .query(Query::keys_under(DsKey::root()))
            .await?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                let entry = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = results.next() => match next {
                        None => break,
                        Some(Err(err)) => {
                            tracing::debug!("blockstore.all_keys_chan got err: {err}");
                            break;
                        }
                        Some(Ok(entry)) => entry,
                    },
                };

                let Some(key) = Key::from_ds_key(&entry.key) else {
                    tracing::debug!("blockstore: skipping undecodable key {}", entry.key);
                    continue;
                };
                if key.multihash().is_err() {
                    tracing::debug!("blockstore: skipping non-multihash key {}", entry.key);
                    continue;
                }
                tracing::debug!("blockstore: query got key {}", key.fmt_short());

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(key) => {
                        if sent.is_err() {
                            // consumer dropped the stream
                            break;
                        }
                    }
                }
            }
        });

        Ok(KeyStream {
            inner: ReceiverStream::new(rx),
        })
    }
}

/// Stream of block keys returned by [`Blockstore::all_keys_chan`].
#[derive(Debug)]
pub struct KeyStream {
    inner: ReceiverStream<Key>,
}

impl Stream for KeyStream {
    type Item = Key;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Key>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    use crate::datastore::{DatastoreFeatures, DsResult, QueryEntry, QueryResults};

    /// Datastore that only remembers what it was asked, and serves a fixed
    /// set of keys to queries.
    #[derive(Debug, Default)]
    struct RecordingStore {
        puts: Mutex<Vec<DsKey>>,
        listed: Vec<DsKey>,
        value: Option<Value>,
    }

    #[async_trait]
    impl Datastore for RecordingStore {
        async fn put(&self, key: &DsKey, _value: Value) -> DsResult<()> {
            self.puts.lock().unwrap().push(key.clone());
            Ok(())
        }

        async fn get(&self, _key: &DsKey) -> DsResult<Value> {
            self.value.clone().ok_or(DatastoreError::NotFound)
        }

        async fn has(&self, key: &DsKey) -> DsResult<bool> {
            Ok(self.puts.lock().unwrap().contains(key))
        }

        async fn delete(&self, _key: &DsKey) -> DsResult<()> {
            unimplemented!("delete not used in tests");
        }

        async fn query(&self, query: Query) -> DsResult<QueryResults> {
            let entries: Vec<DsResult<QueryEntry>> = self
                .listed
                .iter()
                .filter(|key| query.matches(key))
                .map(|key| {
                    Ok(QueryEntry {
                        key: key.clone(),
                        value: None,
                    })
                })
                .collect();
            Ok(Box::new(futures::stream::iter(entries)))
        }

        fn features(&self) -> DatastoreFeatures {
            DatastoreFeatures {
                structured_values: true,
                ordered_queries: false,
                hierarchical_keys: true,
            }
        }
    }

    impl ThreadSafeDatastore for RecordingStore {}

    #[tokio::test]
    async fn put_writes_under_blocks_namespace_once() {
        let store = Arc::new(RecordingStore::default());
        let bs = Blockstore::new(store.clone());
        let block = Block::new(&b"once"[..]);

        bs.put(&block).await.unwrap();
        bs.put(&block).await.unwrap();

        let puts = store.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 1, "second put must short-circuit");
        assert_eq!(
            puts[0],
            DsKey::new(BLOCK_PREFIX).join(&block.key().to_ds_key())
        );
    }

    #[tokio::test]
    async fn record_values_are_a_type_mismatch() {
        let store = Arc::new(RecordingStore {
            value: Some(Value::Record(Bytes::from_static(b"{}"))),
            ..Default::default()
        });
        let bs = Blockstore::new(store);
        let err = bs.get(&Key::for_data(b"x")).await.unwrap_err();
        assert!(matches!(err, BlockstoreError::ValueTypeMismatch));
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let bs = Blockstore::new(Arc::new(RecordingStore::default()));
        let err = bs.get(&Key::for_data(b"missing")).await.unwrap_err();
        assert!(matches!(err, BlockstoreError::NotFound));
    }

    #[tokio::test]
    async fn enumeration_skips_foreign_keys() {
        let good = Key::for_data(b"good");
        let prefix = DsKey::new(BLOCK_PREFIX);
        let store = RecordingStore {
            listed: vec![
                prefix.join(&good.to_ds_key()),
                prefix.join(&Key::from("not a multihash").to_ds_key()),
                prefix.child("!!!"),
                prefix.child("nested").child("deeper"),
                DsKey::new("/other/key"),
            ],
            ..Default::default()
        };
        let bs = Blockstore::new(Arc::new(store));

        let keys: Vec<Key> = bs
            .all_keys_chan(CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(keys, vec![good]);
    }
}
