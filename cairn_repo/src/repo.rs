use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use cairn_core::{
    Blockstore, Datastore, DatastoreError, Mount, MountPoint, ThreadSafeDatastore,
    blockstore::BLOCK_PREFIX,
};
use cairn_ds_flatfs::FlatFs;
use cairn_ds_redb::RedbDatastore;
use tokio::sync::Mutex;

use crate::{
    RepoError,
    config::{self, ConfigError, RepoConfig},
    eventlog,
    lock::{self, RepoLock},
};

/// On-disk format version this build reads and writes.
pub const REPO_VERSION: &str = "1";

const VERSION_FILE: &str = "version";
const BLOCKS_DIR: &str = "blocks";
const DATASTORE_DIR: &str = "datastore";
const LOGS_DIR: &str = "logs";
const WRITABLE_PROBE: &str = "._check_writable";

/// Shard directory names take this many base32 characters of a block key.
/// The first three are fixed by the multihash header, which leaves a
/// 512-way split.
const BLOCKS_PREFIX_LEN: usize = 5;

/// Serializes init, open, close, remove and every config access within
/// this process. The file lock keeps other processes out.
static PACKAGE_LOCK: Mutex<()> = Mutex::const_new(());

/// An open repository directory.
///
/// Obtained from [`FsRepo::open`]; once [`FsRepo::close`] has run every
/// accessor fails with [`RepoError::Closed`].
#[derive(Debug)]
pub struct FsRepo {
    path: PathBuf,
    state: Mutex<Option<OpenRepo>>,
}

#[derive(Debug)]
struct OpenRepo {
    lock: RepoLock,
    config: RepoConfig,
    datastore: Arc<Mount>,
}

impl FsRepo {
    /// Creates the repository layout at `path`. Does nothing if the
    /// repository is already initialized.
    pub async fn init(path: impl AsRef<Path>, config: &RepoConfig) -> Result<(), RepoError> {
        let path = path.as_ref();
        let _guard = PACKAGE_LOCK.lock().await;

        if is_initialized_unsynced(path) {
            return Ok(());
        }

        std::fs::create_dir_all(path)?;
        let config_file = config::config_path(path);
        // the only write that does not merge with what is on disk
        if !config_file.exists() {
            config::write(&config_file, config)?;
        }

        // datastores are created lazily on open; here we only make sure
        // they will be able to write
        for dir in [DATASTORE_DIR, BLOCKS_DIR, LOGS_DIR] {
            check_writable(&path.join(dir))?;
        }

        std::fs::write(path.join(VERSION_FILE), REPO_VERSION)?;
        tracing::info!("initialized repo at {}", path.display());
        Ok(())
    }

    /// Opens an initialized repository and takes its lock.
    ///
    /// If anything fails after the lock was taken, the lock is released
    /// before the error is returned.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref().to_path_buf();
        let _guard = PACKAGE_LOCK.lock().await;

        if !is_initialized_unsynced(&path) {
            return Err(RepoError::NotInitialized(path));
        }

        // dropped, and thereby released, on every early return below
        let lock = RepoLock::acquire(&path)?;

        check_version(&path)?;
        check_writable(&path)?;
        let config = config::load(&config::config_path(&path))?;
        let datastore = Arc::new(open_datastore(&path, &config)?);

        if let Err(e) = eventlog::configure(&path.join(LOGS_DIR), &config.log) {
            tracing::warn!("event log at {} unavailable: {e}", path.display());
        }

        tracing::info!("opened repo at {}", path.display());
        Ok(Self {
            path,
            state: Mutex::new(Some(OpenRepo {
                lock,
                config,
                datastore,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the datastores and releases the lock. A second call fails
    /// with [`RepoError::Closed`].
    ///
    /// If a datastore fails to close, the error is returned and the
    /// repository stays open, still holding its lock.
    pub async fn close(&self) -> Result<(), RepoError> {
        let _guard = PACKAGE_LOCK.lock().await;
        let mut state = self.state.lock().await;
        let open = state.as_ref().ok_or(RepoError::Closed)?;

        open.datastore.close().await?;
        if let Some(open) = state.take() {
            open.lock.release()?;
        }
        tracing::info!("closed repo at {}", self.path.display());
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.is_none()
    }

    /// A copy of the current config.
    pub async fn config(&self) -> Result<RepoConfig, RepoError> {
        let _guard = PACKAGE_LOCK.lock().await;
        let state = self.state.lock().await;
        let open = state.as_ref().ok_or(RepoError::Closed)?;
        Ok(open.config.clone())
    }

    /// Persists `updated`, keeping any keys on disk it does not know about.
    pub async fn set_config(&self, updated: &RepoConfig) -> Result<(), RepoError> {
        let _guard = PACKAGE_LOCK.lock().await;
        let mut state = self.state.lock().await;
        let open = state.as_mut().ok_or(RepoError::Closed)?;
        self.set_config_unsynced(open, updated)
    }

    // Caller holds PACKAGE_LOCK.
    fn set_config_unsynced(
        &self,
        open: &mut OpenRepo,
        updated: &RepoConfig,
    ) -> Result<(), RepoError> {
        let path = config::config_path(&self.path);
        let mut map = config::read_config_map(&path)?;
        for (key, value) in updated.to_map()? {
            map.insert(key, value);
        }
        config::write_config_map(&path, &map)?;
        open.config = updated.clone();
        Ok(())
    }

    /// Reads one dotted key, e.g. `log.max_size_mb`, from the config file.
    /// Unknown keys are readable too.
    pub async fn get_config_key(&self, key: &str) -> Result<toml::Value, RepoError> {
        let _guard = PACKAGE_LOCK.lock().await;
        if self.state.lock().await.is_none() {
            return Err(RepoError::Closed);
        }

        let map = config::read_config_map(&config::config_path(&self.path))?;
        Ok(config::map_get(&map, key)?.clone())
    }

    /// Sets one dotted key. Strings that parse as integers are stored as
    /// integers. The result must still deserialize as a [`RepoConfig`],
    /// otherwise nothing is written.
    pub async fn set_config_key(
        &self,
        key: &str,
        value: impl Into<toml::Value>,
    ) -> Result<(), RepoError> {
        let _guard = PACKAGE_LOCK.lock().await;
        let mut state = self.state.lock().await;
        let open = state.as_mut().ok_or(RepoError::Closed)?;

        let path = config::config_path(&self.path);
        let mut map = config::read_config_map(&path)?;
        config::map_set(&mut map, key, config::coerce(value.into()))?;

        let validated = match RepoConfig::from_map(map.clone()) {
            Ok(config) => config,
            Err(ConfigError::Parse(source)) => {
                return Err(ConfigError::Invalid {
                    key: key.to_owned(),
                    source,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        config::write_config_map(&path, &map)?;
        open.config = validated;
        Ok(())
    }

    /// The mounted datastore: `/blocks` on flat files, everything else in
    /// redb.
    pub async fn datastore(&self) -> Result<Arc<Mount>, RepoError> {
        let state = self.state.lock().await;
        let open = state.as_ref().ok_or(RepoError::Closed)?;
        Ok(open.datastore.clone())
    }

    pub async fn blockstore(&self) -> Result<Blockstore, RepoError> {
        let datastore: Arc<dyn ThreadSafeDatastore> = self.datastore().await?;
        Ok(Blockstore::new(datastore))
    }
}

fn open_datastore(path: &Path, config: &RepoConfig) -> Result<Mount, RepoError> {
    let blocks = FlatFs::open(
        path.join(BLOCKS_DIR),
        BLOCKS_PREFIX_LEN,
        !config.datastore.no_sync,
    )
    .map_err(|source| RepoError::OpenDatastore {
        name: "flatfs",
        source,
    })?;

    let ordered =
        RedbDatastore::open(path.join(DATASTORE_DIR)).map_err(|e| RepoError::OpenDatastore {
            name: "redb",
            source: DatastoreError::Other(e),
        })?;

    Ok(Mount::new(vec![
        MountPoint::new(BLOCK_PREFIX, Arc::new(blocks)),
        MountPoint::new("/", Arc::new(ordered)),
    ]))
}

fn check_version(path: &Path) -> Result<(), RepoError> {
    let found = match std::fs::read_to_string(path.join(VERSION_FILE)) {
        Ok(found) => found,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(RepoError::NoVersion),
        Err(e) => return Err(e.into()),
    };
    let found = found.trim();
    if found != REPO_VERSION {
        return Err(RepoError::VersionMismatch {
            found: found.to_owned(),
            expected: REPO_VERSION,
        });
    }
    Ok(())
}

/// Creates `dir` if needed and proves that a file can be written in it.
fn check_writable(dir: &Path) -> Result<(), RepoError> {
    let not_writable = |source: io::Error| RepoError::NotWritable {
        path: dir.to_owned(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITABLE_PROBE);
    std::fs::write(&probe, b"").map_err(not_writable)?;
    std::fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}

fn is_initialized_unsynced(path: &Path) -> bool {
    config::config_path(path).is_file() && path.join(DATASTORE_DIR).is_dir()
}

/// Reads the config of an initialized repository without opening it. Works
/// while another process holds the repository lock.
pub async fn config_at(path: impl AsRef<Path>) -> Result<RepoConfig, RepoError> {
    let path = path.as_ref();
    let _guard = PACKAGE_LOCK.lock().await;
    if !is_initialized_unsynced(path) {
        return Err(RepoError::NotInitialized(path.to_owned()));
    }
    Ok(config::load(&config::config_path(path))?)
}

pub async fn is_initialized(path: impl AsRef<Path>) -> bool {
    let _guard = PACKAGE_LOCK.lock().await;
    is_initialized_unsynced(path.as_ref())
}

/// True while some open repository, in this process or another, holds the
/// lock of `path`.
pub fn locked_by_other_process(path: impl AsRef<Path>) -> bool {
    lock::locked(path.as_ref())
}

/// Deletes the repository directory and everything in it. Removing a path
/// that does not exist succeeds.
pub async fn remove(path: impl AsRef<Path>) -> Result<(), RepoError> {
    let path = path.as_ref();
    let _guard = PACKAGE_LOCK.lock().await;
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
