//! The filesystem-backed cairn repository.
//!
//! A repository directory holds everything one node persists:
//!
//! ```text
//! <root>/
//!   config              TOML, unknown keys are preserved on update
//!   version             on-disk format version
//!   repo.lock           exclusive lock, held while the repo is open
//!   blocks/             sharded flat files, mounted at /blocks
//!   datastore/          redb database, mounted at /
//!   logs/events.log     rotated JSON event log
//! ```
//!
//! [`FsRepo`] owns the lifecycle of one directory. [`RepoRegistry`] hands
//! out shared handles so that a path is opened at most once per process.

pub mod config;
mod error;
pub mod eventlog;
pub mod lock;
mod registry;
mod repo;

pub use config::{ConfigError, RepoConfig};
pub use error::RepoError;
pub use registry::{RepoHandle, RepoRegistry};
pub use repo::{
    FsRepo, REPO_VERSION, config_at, is_initialized, locked_by_other_process, remove,
};
