//! Cross-process exclusive access to a repository directory.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use fs4::fs_std::FileExt;

use crate::RepoError;

pub const LOCK_FILE: &str = "repo.lock";

/// An advisory lock on `<repo>/repo.lock`, held until released or dropped.
///
/// The lock belongs to the open file, so a second acquire in the same
/// process fails just like one from another process.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    pub fn acquire(repo: &Path) -> Result<Self, RepoError> {
        let path = repo.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !FileExt::try_lock_exclusive(&file)? {
            return Err(RepoError::LockHeld {
                path: repo.to_owned(),
            });
        }
        tracing::debug!("locked {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) -> io::Result<()> {
        FileExt::unlock(&self.file)?;
        tracing::debug!("unlocked {}", self.path.display());
        Ok(())
    }
}

/// Reports whether someone currently holds the lock of `repo`.
pub fn locked(repo: &Path) -> bool {
    let path = repo.join(LOCK_FILE);
    let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) else {
        // no lock file means nobody has opened the repo yet
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(true) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Ok(false) => true,
        Err(e) => {
            tracing::debug!("could not probe {}: {e}", path.display());
            false
        }
    }
}
