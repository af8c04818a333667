//! Core cairn types and traits.
//!
//! This crate defines what every other cairn crate builds on:
//!
//! - Content addresses (`key::Key`) and the multihash framing they use
//! - Immutable blocks (`block::Block`)
//! - The pluggable `Datastore` abstraction with hierarchical keys
//!   (`datastore::DsKey`), prefix queries, namespacing and mounting
//! - The `Blockstore` facade that stores blocks under the `/blocks`
//!   namespace of any thread-safe datastore
//!
//! Backends live in their own crates (`cairn_ds_flatfs`, `cairn_ds_redb`,
//! `cairn_ds_memory`); the on-disk repository that wires them together is
//! `cairn_repo`.

pub mod block;
pub mod blockstore;
pub mod datastore;
pub mod key;
pub mod varint;

// Conformance suite for datastore backends (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use block::Block;
pub use blockstore::{Blockstore, BlockstoreError, KeyStream};
pub use datastore::{
    Datastore, DatastoreError, DatastoreFeatures, DsKey, DsResult, Mount, MountPoint, Namespace,
    Query, QueryEntry, QueryResults, ThreadSafeDatastore, Value,
};
pub use key::{Key, Multihash, MultihashError};
