//! Lifecycle, locking and config behaviour of the filesystem repository.

use std::{collections::HashSet, path::Path};

use bytes::Bytes;
use cairn_core::{Block, Datastore, DsKey, Key, Value};
use cairn_repo::{
    ConfigError, FsRepo, REPO_VERSION, RepoConfig, RepoError, RepoRegistry, config_at,
    is_initialized, locked_by_other_process, remove,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

async fn init_repo(path: &Path) {
    let mut config = RepoConfig::default();
    config.identity.peer_id = "12D3KooTestPeer".to_owned();
    config.datastore.no_sync = true;
    FsRepo::init(path, &config).await.unwrap();
}

#[tokio::test]
async fn init_then_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repo");
    assert!(!is_initialized(&path).await);

    init_repo(&path).await;
    assert!(is_initialized(&path).await);
    for entry in ["config", "version", "blocks", "datastore", "logs"] {
        assert!(path.join(entry).exists(), "{entry} should exist");
    }
    assert_eq!(
        std::fs::read_to_string(path.join("version")).unwrap(),
        REPO_VERSION
    );

    let repo = FsRepo::open(&path).await.unwrap();
    assert_eq!(repo.config().await.unwrap().identity.peer_id, "12D3KooTestPeer");
    repo.close().await.unwrap();
}

#[tokio::test]
async fn init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;

    let mut other = RepoConfig::default();
    other.identity.peer_id = "someone else".to_owned();
    FsRepo::init(dir.path(), &other).await.unwrap();

    // the existing config is left untouched
    let config = config_at(dir.path()).await.unwrap();
    assert_eq!(config.identity.peer_id, "12D3KooTestPeer");
}

#[tokio::test]
async fn open_uninitialized_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = FsRepo::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RepoError::NotInitialized(_)));
    assert!(matches!(
        config_at(dir.path()).await.unwrap_err(),
        RepoError::NotInitialized(_)
    ));
}

#[tokio::test]
async fn version_mismatch_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    std::fs::write(dir.path().join("version"), "0").unwrap();

    let err = FsRepo::open(dir.path()).await.unwrap_err();
    match &err {
        RepoError::VersionMismatch { found, expected } => {
            assert_eq!(found, "0");
            assert_eq!(*expected, REPO_VERSION);
        }
        other => panic!("expected VersionMismatch, got {other:?}"),
    }
    assert!(err.to_string().contains("migration"));
    assert!(!locked_by_other_process(dir.path()));

    std::fs::write(dir.path().join("version"), REPO_VERSION).unwrap();
    FsRepo::open(dir.path()).await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn missing_version_file() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    std::fs::remove_file(dir.path().join("version")).unwrap();

    let err = FsRepo::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RepoError::NoVersion));
    assert!(!locked_by_other_process(dir.path()));
}

#[tokio::test]
async fn second_open_is_locked_out_until_close() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;

    let first = FsRepo::open(dir.path()).await.unwrap();
    assert!(locked_by_other_process(dir.path()));
    let err = FsRepo::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RepoError::LockHeld { .. }));

    // config stays readable while the lock is held
    config_at(dir.path()).await.unwrap();

    first.close().await.unwrap();
    assert!(!locked_by_other_process(dir.path()));
    FsRepo::open(dir.path()).await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn closed_repo_rejects_calls() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let repo = FsRepo::open(dir.path()).await.unwrap();
    repo.close().await.unwrap();

    assert!(repo.is_closed().await);
    assert!(matches!(repo.close().await, Err(RepoError::Closed)));
    assert!(matches!(repo.config().await, Err(RepoError::Closed)));
    assert!(matches!(repo.datastore().await, Err(RepoError::Closed)));
    assert!(matches!(
        repo.get_config_key("log.max_backups").await,
        Err(RepoError::Closed)
    ));
}

#[tokio::test]
async fn config_updates_preserve_unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;

    let config_file = dir.path().join("config");
    let mut raw = std::fs::read_to_string(&config_file).unwrap();
    raw.push_str("\n[experimental]\nfancy = true\n");
    std::fs::write(&config_file, raw).unwrap();

    let repo = FsRepo::open(dir.path()).await.unwrap();
    let mut config = repo.config().await.unwrap();
    config.bootstrap = vec!["/dns/bootstrap.example/tcp/4001".to_owned()];
    repo.set_config(&config).await.unwrap();

    assert_eq!(
        repo.get_config_key("experimental.fancy").await.unwrap(),
        toml::Value::Boolean(true)
    );
    assert_eq!(repo.config().await.unwrap(), config);
    repo.close().await.unwrap();

    assert_eq!(config_at(dir.path()).await.unwrap(), config);
}

#[tokio::test]
async fn set_config_key_coerces_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let repo = FsRepo::open(dir.path()).await.unwrap();

    repo.set_config_key("log.max_backups", "5").await.unwrap();
    assert_eq!(
        repo.get_config_key("log.max_backups").await.unwrap(),
        toml::Value::Integer(5)
    );
    assert_eq!(repo.config().await.unwrap().log.max_backups, 5);

    // unknown keys are accepted and kept
    repo.set_config_key("plugins.enabled", true).await.unwrap();

    // a string where a number is expected is refused and nothing changes
    let err = repo
        .set_config_key("log.max_size_mb", "lots")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Config(ConfigError::Invalid { .. })
    ));
    assert_eq!(
        repo.get_config_key("log.max_size_mb").await.unwrap(),
        toml::Value::Integer(250)
    );

    assert!(matches!(
        repo.get_config_key("no.such.key").await,
        Err(RepoError::Config(ConfigError::KeyNotFound(_)))
    ));
    repo.close().await.unwrap();
}

#[tokio::test]
async fn blocks_and_state_are_mounted_apart() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let repo = FsRepo::open(dir.path()).await.unwrap();

    let bs = repo.blockstore().await.unwrap();
    let mut expected = HashSet::new();
    for data in ["W", "E", "F", "M"] {
        let block = Block::new(Bytes::from(data));
        bs.put(&block).await.unwrap();
        expected.insert(block.key().clone());
    }

    let datastore = repo.datastore().await.unwrap();
    datastore
        .put(
            &DsKey::new("/local/filesroot"),
            Value::Record(Bytes::from_static(b"\xa0")),
        )
        .await
        .unwrap();

    let keys: Vec<Key> = bs
        .all_keys_chan(CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(keys.len(), 4);
    assert_eq!(keys.into_iter().collect::<HashSet<_>>(), expected);

    // block files live in the flat-file shard tree
    let block = Block::new(Bytes::from("W"));
    let name = block.key().to_base32();
    let shard = dir.path().join("blocks").join(&name[..5]);
    assert!(shard.join(format!("{name}.data")).is_file());

    repo.close().await.unwrap();

    // everything survives a reopen
    let repo = FsRepo::open(dir.path()).await.unwrap();
    let bs = repo.blockstore().await.unwrap();
    assert_eq!(bs.get(block.key()).await.unwrap().data(), block.data());
    assert_eq!(
        repo.datastore()
            .await
            .unwrap()
            .get(&DsKey::new("/local/filesroot"))
            .await
            .unwrap(),
        Value::Record(Bytes::from_static(b"\xa0"))
    );
    repo.close().await.unwrap();
}

#[tokio::test]
async fn registry_shares_one_repo_per_path() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let registry = RepoRegistry::new();

    let a = registry.open(dir.path()).await.unwrap();
    // a different spelling of the same directory
    let b = registry.open(dir.path().join(".")).await.unwrap();
    assert_eq!(registry.open_count().await, 1);

    a.close().await.unwrap();
    assert!(matches!(a.close().await, Err(RepoError::Closed)));
    // still open through `b`
    assert!(locked_by_other_process(dir.path()));
    b.config().await.unwrap();

    b.close().await.unwrap();
    assert_eq!(registry.open_count().await, 0);
    assert!(!locked_by_other_process(dir.path()));
}

#[tokio::test]
async fn registry_reopens_a_repo_closed_behind_its_back() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let registry = RepoRegistry::new();

    let a = registry.open(dir.path()).await.unwrap();
    // close the shared repo itself, not the handle
    FsRepo::close(&a).await.unwrap();
    assert!(!locked_by_other_process(dir.path()));

    let b = registry.open(dir.path()).await.unwrap();
    assert_eq!(registry.open_count().await, 1);
    b.config().await.unwrap();
    assert!(locked_by_other_process(dir.path()));

    b.close().await.unwrap();
    assert_eq!(registry.open_count().await, 0);
}

#[tokio::test]
async fn remove_deletes_the_repo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doomed");
    init_repo(&path).await;

    remove(&path).await.unwrap();
    assert!(!path.exists());
    // removing again is fine
    remove(&path).await.unwrap();
}
