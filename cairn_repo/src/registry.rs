use std::{
    collections::HashMap,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::Mutex;

use crate::{FsRepo, RepoError};

/// Keeps at most one open [`FsRepo`] per directory.
///
/// Opening a path that is already open hands out another handle to the
/// same repository. The repository is closed when the last handle is.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    repos: Mutex<HashMap<PathBuf, Shared>>,
}

#[derive(Debug)]
struct Shared {
    repo: Arc<FsRepo>,
    handles: usize,
}

impl RepoRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn open(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<RepoHandle, RepoError> {
        let path = path.as_ref();
        // a path that does not exist fails in FsRepo::open below
        let key = path.canonicalize().unwrap_or_else(|_| path.to_owned());

        let mut repos = self.repos.lock().await;
        // closed directly through a handle, bypassing the count
        let stale = match repos.get(&key) {
            Some(shared) => shared.repo.is_closed().await,
            None => false,
        };
        if stale {
            tracing::debug!("registry: reopening closed repo at {}", key.display());
            repos.remove(&key);
        }

        let repo = match repos.get_mut(&key) {
            Some(shared) => {
                shared.handles += 1;
                shared.repo.clone()
            }
            None => {
                let repo = Arc::new(FsRepo::open(&key).await?);
                repos.insert(
                    key.clone(),
                    Shared {
                        repo: repo.clone(),
                        handles: 1,
                    },
                );
                repo
            }
        };

        Ok(RepoHandle {
            registry: self.clone(),
            key,
            repo,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of distinct repositories currently open.
    pub async fn open_count(&self) -> usize {
        self.repos.lock().await.len()
    }

    async fn release(&self, key: &Path) -> Result<(), RepoError> {
        let mut repos = self.repos.lock().await;
        let Some(shared) = repos.get_mut(key) else {
            return Err(RepoError::Closed);
        };
        shared.handles -= 1;
        if shared.handles > 0 {
            return Ok(());
        }
        if let Some(shared) = repos.remove(key) {
            shared.repo.close().await?;
        }
        Ok(())
    }
}

/// A shared reference to a repository opened through a [`RepoRegistry`].
///
/// Dereferences to [`FsRepo`] for everything except `close`, which only
/// closes the repository once every handle has been closed. A handle that
/// is dropped without `close` keeps the repository open.
#[derive(Debug)]
pub struct RepoHandle {
    registry: Arc<RepoRegistry>,
    key: PathBuf,
    repo: Arc<FsRepo>,
    closed: AtomicBool,
}

impl RepoHandle {
    pub async fn close(&self) -> Result<(), RepoError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RepoError::Closed);
        }
        self.registry.release(&self.key).await
    }
}

impl Deref for RepoHandle {
    type Target = FsRepo;

    fn deref(&self) -> &FsRepo {
        &self.repo
    }
}
