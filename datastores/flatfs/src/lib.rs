use bytes::Bytes;
use cairn_core::datastore::{
    Datastore, DatastoreError, DatastoreFeatures, DsKey, DsResult, Query, QueryEntry,
    QueryResults, ThreadSafeDatastore, Value,
};
use futures::StreamExt;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const EXTENSION: &str = "data";
const PADDING: char = '_';

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FlatFsConfig {
    pub base_path: PathBuf,
    /// Number of leading key characters naming the shard directory.
    pub prefix_len: usize,
    /// fsync every file before it is renamed into place.
    pub sync: bool,
}

/// Stores every key as its own file, `<base>/<shard>/<name>.data`.
///
/// Only single-segment keys made of `[A-Za-z0-9_=+-]` are accepted, which
/// is what the blockstore produces. Writes go to a temporary file in the
/// shard directory first and are renamed into place, so readers never see
/// a partial value.
#[derive(Debug, Clone)]
pub struct FlatFs {
    base_path: PathBuf,
    prefix_len: usize,
    sync: bool,
}

impl FlatFs {
    pub fn open(base_path: impl Into<PathBuf>, prefix_len: usize, sync: bool) -> DsResult<Self> {
        Self::create(FlatFsConfig {
            base_path: base_path.into(),
            prefix_len,
            sync,
        })
    }

    pub fn create(config: FlatFsConfig) -> DsResult<Self> {
        if config.prefix_len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "flatfs: prefix length must be at least 1",
            )
            .into());
        }
        std::fs::create_dir_all(&config.base_path)?;
        Ok(FlatFs {
            base_path: config.base_path,
            prefix_len: config.prefix_len,
            sync: config.sync,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Shard directory name for a key name, padded when the name is shorter
    /// than the prefix length.
    fn shard(&self, name: &str) -> String {
        let mut shard: String = name.chars().take(self.prefix_len).collect();
        while shard.len() < self.prefix_len {
            shard.push(PADDING);
        }
        shard
    }

    /// Returns `(shard dir, file path)` for a key.
    fn resolve(&self, key: &DsKey) -> DsResult<(PathBuf, PathBuf)> {
        let mut segments = key.segments();
        let name = match (segments.next(), segments.next()) {
            (Some(name), None) => name,
            (None, _) => return Err(DatastoreError::invalid_key(key, "flatfs keys need a name")),
            (Some(_), Some(_)) => {
                return Err(DatastoreError::invalid_key(
                    key,
                    "flatfs keys must have a single segment",
                ));
            }
        };
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '-'));
        if !valid {
            return Err(DatastoreError::invalid_key(
                key,
                "flatfs keys may only contain [A-Za-z0-9_=+-]",
            ));
        }

        let dir = self.base_path.join(self.shard(name));
        let file = dir.join(format!("{name}.{EXTENSION}"));
        Ok((dir, file))
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8], sync: bool) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Maps `<base>/<shard>/<name>.data` back to `/<name>`; anything else
/// (temporary files, foreign files) yields `None`.
fn key_for_path(path: &Path) -> Option<DsKey> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    Some(DsKey::root().child(name))
}

#[async_trait::async_trait]
impl Datastore for FlatFs {
    async fn put(&self, key: &DsKey, value: Value) -> DsResult<()> {
        let (dir, path) = self.resolve(key)?;
        let data = match value {
            Value::Raw(data) => data,
            other => return Err(DatastoreError::UnsupportedValue(other.kind_name())),
        };
        let sync = self.sync;

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &data, sync))
            .await
            .map_err(io::Error::other)??;
        Ok(())
    }

    async fn get(&self, key: &DsKey) -> DsResult<Value> {
        let (_, path) = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Value::Raw(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DatastoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, key: &DsKey) -> DsResult<bool> {
        let (_, path) = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &DsKey) -> DsResult<()> {
        let (_, path) = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks the shard directories lazily. Values, when requested, are read
    /// as each key is yielded; a file removed in between is skipped.
    async fn query(&self, query: Query) -> DsResult<QueryResults> {
        let walker = WalkDir::new(&self.base_path)
            .min_depth(2)
            .max_depth(2)
            .into_iter();

        let keys_only = query.keys_only;
        let stream = futures::stream::iter(walker)
            .filter_map(move |entry| {
                futures::future::ready(match entry {
                    Ok(entry) if entry.file_type().is_file() => key_for_path(entry.path())
                        .filter(|key| query.matches(key))
                        .map(|key| Ok((key, entry.into_path()))),
                    Ok(_) => None,
                    Err(e) => Some(Err(DatastoreError::Io(e.into()))),
                })
            })
            .filter_map(move |item| async move {
                let (key, path) = match item {
                    Ok(found) => found,
                    Err(e) => return Some(Err(e)),
                };
                if keys_only {
                    return Some(Ok(QueryEntry { key, value: None }));
                }
                match tokio::fs::read(&path).await {
                    Ok(data) => Some(Ok(QueryEntry {
                        key,
                        value: Some(Value::Raw(Bytes::from(data))),
                    })),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        tracing::debug!("flatfs: {} vanished during query", path.display());
                        None
                    }
                    Err(e) => Some(Err(e.into())),
                }
            });

        Ok(Box::new(Box::pin(stream)))
    }

    fn features(&self) -> DatastoreFeatures {
        DatastoreFeatures {
            structured_values: false,
            ordered_queries: false,
            hierarchical_keys: false,
        }
    }
}

// Each write is a rename of a fully written file.
impl ThreadSafeDatastore for FlatFs {}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::testutil::DatastoreTests;

    #[tokio::test]
    async fn test_flatfs_datastore() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FlatFs::open(temp_dir.path(), 4, false).unwrap();
        DatastoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn files_are_sharded_by_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FlatFs::open(temp_dir.path(), 3, true).unwrap();

        store
            .put(&DsKey::new("/abcdef"), Value::Raw(Bytes::from_static(b"x")))
            .await
            .unwrap();
        store
            .put(&DsKey::new("/z"), Value::Raw(Bytes::from_static(b"y")))
            .await
            .unwrap();

        assert!(temp_dir.path().join("abc").join("abcdef.data").is_file());
        assert!(temp_dir.path().join("z__").join("z.data").is_file());
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FlatFs::open(temp_dir.path(), 2, false).unwrap();

        for key in ["/a/b", "/", "/has space", "/dot.ted"] {
            let err = store
                .put(&DsKey::new(key), Value::Raw(Bytes::new()))
                .await
                .unwrap_err();
            assert!(
                matches!(err, DatastoreError::InvalidKey { .. }),
                "{key} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn query_ignores_foreign_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FlatFs::open(temp_dir.path(), 2, false).unwrap();
        store
            .put(&DsKey::new("/abc"), Value::Raw(Bytes::from_static(b"v")))
            .await
            .unwrap();

        // a leftover temporary file and a stray file at the top level
        std::fs::write(temp_dir.path().join("ab").join(".tmpXYZ"), b"partial").unwrap();
        std::fs::write(temp_dir.path().join("README"), b"hi").unwrap();

        let entries: Vec<QueryEntry> = store
            .query(Query::all())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            entries,
            vec![QueryEntry {
                key: DsKey::new("/abc"),
                value: Some(Value::Raw(Bytes::from_static(b"v"))),
            }]
        );
    }

    #[test]
    fn zero_prefix_is_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(FlatFs::open(temp_dir.path(), 0, false).is_err());
    }
}
