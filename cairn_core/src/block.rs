use bytes::Bytes;

use crate::key::{Key, MultihashError};

/// An immutable payload together with its content address.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    key: Key,
    data: Bytes,
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Block {
    /// Creates a block, hashing `data` to derive its key.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            key: Key::for_data(&data),
            data,
        }
    }

    /// Pairs `data` with an already known key without re-hashing.
    ///
    /// The key must decode as a multihash; whether it actually matches the
    /// data is the caller's responsibility.
    pub fn with_key(data: impl Into<Bytes>, key: Key) -> Result<Self, MultihashError> {
        key.multihash()?;
        Ok(Self {
            key,
            data: data.into(),
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_parts(self) -> (Key, Bytes) {
        (self.key, self.data)
    }
}
