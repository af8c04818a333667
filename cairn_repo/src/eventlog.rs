//! JSON event log written to `<repo>/logs/events.log`, rotated by size.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, SystemTime},
};

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_FILE: &str = "events.log";

/// An append-only file that moves itself to `<name>.1` once it would grow
/// past `max_bytes`, shifting older backups up and dropping the oldest.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    max_backups: u32,
    max_age: Option<Duration>,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_backups: u32) -> io::Result<Self> {
        let path = path.into();
        let file = Self::open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            max_backups,
            max_age: None,
            file,
            written,
        })
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn backup(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.max_backups == 0 {
            fs::remove_file(&self.path)?;
        } else {
            for n in (1..self.max_backups).rev() {
                let from = self.backup(n);
                if from.exists() {
                    fs::rename(&from, self.backup(n + 1))?;
                }
            }
            fs::rename(&self.path, self.backup(1))?;
        }
        self.file = Self::open_append(&self.path)?;
        self.written = 0;
        self.prune_expired();
        Ok(())
    }

    fn prune_expired(&self) {
        let Some(max_age) = self.max_age else {
            return;
        };
        let now = SystemTime::now();
        for n in 1..=self.max_backups {
            let backup = self.backup(n);
            let expired = fs::metadata(&backup)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if !expired {
                continue;
            }
            if let Err(e) = fs::remove_file(&backup) {
                tracing::debug!("could not remove expired log {}: {e}", backup.display());
            }
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Routes `tracing` events of this process to the repository's event log.
///
/// Only the first call in a process installs the subscriber; returns
/// whether this call did. Filtering follows `RUST_LOG`, defaulting to
/// `info`.
pub fn configure(logs_dir: &Path, config: &LogConfig) -> io::Result<bool> {
    fs::create_dir_all(logs_dir)?;
    let max_age = (config.max_age_days > 0)
        .then(|| Duration::from_secs(u64::from(config.max_age_days) * 24 * 60 * 60));
    let file = RotatingFile::open(
        logs_dir.join(LOG_FILE),
        config.max_size_mb.saturating_mul(1024 * 1024),
        config.max_backups,
    )?
    .with_max_age(max_age);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("a global subscriber is already set, not logging to {}", logs_dir.display());
    }
    Ok(installed)
}
