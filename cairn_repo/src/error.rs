use std::{io, path::PathBuf};

use cairn_core::DatastoreError;

use crate::config::ConfigError;

const MIGRATION_INSTRUCTIONS: &str = "Run `cairn-repo-migrate` on the repository directory, \
then start again. Migrations do not run automatically.";

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("no cairn repo found at {}. please initialize it first", .0.display())]
    NotInitialized(PathBuf),
    #[error("repo at {} is locked by another process. is a daemon already running?", path.display())]
    LockHeld { path: PathBuf },
    #[error(
        "repo has incorrect version: {found}\nprogram version is: {expected}\n\
         please run the repo migration tool before continuing.\n{instructions}",
        instructions = MIGRATION_INSTRUCTIONS
    )]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
    #[error(
        "no version file found, please run the repo migration tool.\n{instructions}",
        instructions = MIGRATION_INSTRUCTIONS
    )]
    NoVersion,
    #[error("repo is closed")]
    Closed,
    #[error("unable to open {name} datastore: {source}")]
    OpenDatastore {
        name: &'static str,
        #[source]
        source: DatastoreError,
    },
    #[error("{} is not writable: {source}", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
