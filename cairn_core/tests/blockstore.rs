//! Blockstore behaviour over a mounted in-memory datastore.

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use cairn_core::{
    Block, Blockstore, BlockstoreError, Datastore, DsKey, Key, Mount, MountPoint, Value,
};
use cairn_ds_memory::MemoryDatastore;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

fn mounted_blockstore() -> (Blockstore, Arc<MemoryDatastore>) {
    let blocks = Arc::new(MemoryDatastore::new());
    let mount = Mount::new(vec![
        MountPoint::new("/blocks", blocks.clone()),
        MountPoint::new("/", Arc::new(MemoryDatastore::new())),
    ]);
    (Blockstore::new(Arc::new(mount)), blocks)
}

#[tokio::test]
async fn put_then_get_returns_identical_blocks() {
    let (bs, _) = mounted_blockstore();

    for size in [0usize, 1, 100, 64 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let block = Block::new(data);
        bs.put(&block).await.unwrap();

        let got = bs.get(block.key()).await.unwrap();
        assert_eq!(got.key(), block.key(), "key mismatch for size {size}");
        assert_eq!(got.data(), block.data(), "data mismatch for size {size}");
    }
}

#[tokio::test]
async fn get_of_unknown_key_is_not_found() {
    let (bs, _) = mounted_blockstore();
    let err = bs.get(&Key::for_data(b"never put")).await.unwrap_err();
    assert!(matches!(err, BlockstoreError::NotFound));
    assert!(!bs.has(&Key::for_data(b"never put")).await.unwrap());
}

#[tokio::test]
async fn blocks_land_in_the_blocks_mount() {
    let (bs, blocks) = mounted_blockstore();
    let block = Block::new(&b"routed"[..]);
    bs.put(&block).await.unwrap();

    // the mount strips `/blocks` before the child sees the key
    assert_eq!(
        blocks.get(&block.key().to_ds_key()).await.unwrap(),
        Value::Raw(block.data().clone())
    );
}

#[tokio::test]
async fn delete_removes_the_block() {
    let (bs, _) = mounted_blockstore();
    let block = Block::new(&b"short lived"[..]);
    bs.put(&block).await.unwrap();
    bs.delete_block(block.key()).await.unwrap();
    assert!(!bs.has(block.key()).await.unwrap());
    assert!(matches!(
        bs.get(block.key()).await.unwrap_err(),
        BlockstoreError::NotFound
    ));
}

#[tokio::test]
async fn all_keys_chan_emits_every_key_once() {
    let (bs, _) = mounted_blockstore();
    let mut expected = HashSet::new();
    for data in ["W", "E", "F", "M"] {
        let block = Block::new(Bytes::from(data));
        bs.put(&block).await.unwrap();
        expected.insert(block.key().clone());
    }

    let keys: Vec<Key> = bs
        .all_keys_chan(CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(keys.len(), 4);
    assert_eq!(keys.into_iter().collect::<HashSet<_>>(), expected);
}

#[tokio::test]
async fn all_keys_chan_ignores_non_block_keys() {
    let blocks = Arc::new(MemoryDatastore::new());
    let root = Arc::new(MemoryDatastore::new());
    let mount = Arc::new(Mount::new(vec![
        MountPoint::new("/blocks", blocks.clone()),
        MountPoint::new("/", root.clone()),
    ]));
    let bs = Blockstore::new(mount);

    let block = Block::new(&b"real"[..]);
    bs.put(&block).await.unwrap();
    blocks
        .put(&DsKey::new("/notbase32!"), Value::Raw(Bytes::new()))
        .await
        .unwrap();
    root.put(&DsKey::new("/local/pins"), Value::Raw(Bytes::new()))
        .await
        .unwrap();

    let keys: Vec<Key> = bs
        .all_keys_chan(CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(keys, vec![block.key().clone()]);
}

#[tokio::test]
async fn cancelled_enumeration_yields_a_strict_subset() {
    let (bs, _) = mounted_blockstore();
    let mut all = HashSet::new();
    for i in 0..64u32 {
        let block = Block::new(Bytes::from(i.to_be_bytes().to_vec()));
        bs.put(&block).await.unwrap();
        all.insert(block.key().clone());
    }

    let cancel = CancellationToken::new();
    let mut stream = bs.all_keys_chan(cancel.clone()).await.unwrap();

    let mut seen = HashSet::new();
    if let Some(first) = stream.next().await {
        seen.insert(first);
    }
    cancel.cancel();
    while let Some(key) = stream.next().await {
        seen.insert(key);
    }

    assert!(seen.len() < all.len(), "cancellation must end enumeration early");
    assert!(seen.is_subset(&all));
}

#[tokio::test]
async fn enumeration_cancelled_up_front_is_empty() {
    let (bs, _) = mounted_blockstore();
    bs.put(&Block::new(&b"x"[..])).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let keys: Vec<Key> = bs.all_keys_chan(cancel).await.unwrap().collect().await;
    assert!(keys.is_empty());
}
