//! Content addresses.
//!
//! A [`Key`] is the multihash of a block's bytes. Blocks created locally
//! are addressed with BLAKE3 (`0x1e`); keys received from peers may use
//! any of the hash functions listed in [`Multihash::decode`].

use std::{borrow::Borrow, fmt};

use bytes::Bytes;

use crate::{datastore::DsKey, varint};

pub const MULTIHASH_IDENTITY: u64 = 0x00;
pub const MULTIHASH_SHA1: u64 = 0x11;
pub const MULTIHASH_SHA2_256: u64 = 0x12;
pub const MULTIHASH_SHA2_512: u64 = 0x13;
pub const MULTIHASH_BLAKE3: u64 = 0x1e;

/// Largest digest accepted for variable-length hash functions.
const MAX_DIGEST_LEN: u64 = 64;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MultihashError {
    #[error("multihash header is truncated")]
    Truncated,
    #[error("unsupported multihash code: {0:#x}")]
    UnknownCode(u64),
    #[error("invalid digest length for code {code:#x}: header says {header}, got {actual}")]
    LengthMismatch { code: u64, header: u64, actual: usize },
}

/// A borrowed, validated view of a multihash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multihash<'a> {
    pub code: u64,
    pub digest: &'a [u8],
}

impl<'a> Multihash<'a> {
    /// Parses `bytes` as `varint(code) varint(len) digest`.
    ///
    /// The code must be a known hash function and the digest must be
    /// exactly as long as the header claims.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, MultihashError> {
        let (code, code_len) = varint::decode(bytes).ok_or(MultihashError::Truncated)?;
        let rest = &bytes[code_len..];
        let (len, len_len) = varint::decode(rest).ok_or(MultihashError::Truncated)?;
        let digest = &rest[len_len..];

        let expected = match code {
            MULTIHASH_SHA1 => Some(20),
            MULTIHASH_SHA2_256 => Some(32),
            MULTIHASH_SHA2_512 => Some(64),
            MULTIHASH_IDENTITY | MULTIHASH_BLAKE3 => None,
            other => return Err(MultihashError::UnknownCode(other)),
        };

        let valid_len = match expected {
            Some(fixed) => len == fixed,
            None => len <= MAX_DIGEST_LEN,
        };
        if !valid_len || digest.len() as u64 != len {
            return Err(MultihashError::LengthMismatch {
                code,
                header: len,
                actual: digest.len(),
            });
        }

        Ok(Self { code, digest })
    }
}

/// Content address of a block: the raw multihash bytes.
///
/// Keys compare by their bytes. Blocks always derive their key from their
/// data via [`Key::for_data`]; keys announced in want-lists may carry any
/// bytes and are only validated where it matters (see [`Key::multihash`]).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Bytes);

impl Key {
    /// Computes the BLAKE3 multihash of `data`.
    pub fn for_data(data: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(data.as_ref());
        let mut bytes = Vec::with_capacity(2 + blake3::OUT_LEN);
        varint::encode(MULTIHASH_BLAKE3, &mut bytes);
        varint::encode(blake3::OUT_LEN as u64, &mut bytes);
        bytes.extend_from_slice(digest.as_bytes());
        Self(Bytes::from(bytes))
    }

    /// Wraps raw key bytes without validating them.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes the key as a multihash.
    pub fn multihash(&self) -> Result<Multihash<'_>, MultihashError> {
        Multihash::decode(&self.0)
    }

    /// Filesystem-safe base32 encoding of the key bytes.
    pub fn to_base32(&self) -> String {
        let mut output = Vec::with_capacity(base32_fs::encoded_len(self.0.len()));
        base32_fs::encode(&self.0, &mut output);
        // base32-fs only emits ASCII
        String::from_utf8_lossy(&output).into_owned()
    }

    /// Parses the output of [`Key::to_base32`]. Returns `None` for anything
    /// that is not valid base32.
    pub fn from_base32(encoded: &str) -> Option<Self> {
        if encoded.is_empty() || !base32_fs::is_valid(encoded.as_bytes()) {
            return None;
        }
        let len = base32_fs::decoded_len(encoded.len())?;
        let mut out = Vec::with_capacity(len);
        let _ = base32_fs::decode(encoded.as_bytes(), &mut out);
        Some(Self(Bytes::from(out)))
    }

    /// The datastore key a block with this key is stored under, relative to
    /// the blockstore namespace.
    pub fn to_ds_key(&self) -> DsKey {
        DsKey::root().child(self.to_base32())
    }

    /// Inverse of [`Key::to_ds_key`]. Only single-segment keys decode.
    pub fn from_ds_key(key: &DsKey) -> Option<Self> {
        let name = key.as_str().strip_prefix('/')?;
        if name.contains('/') {
            return None;
        }
        Self::from_base32(name)
    }

    /// Hex of the first 5 bytes, for log lines.
    pub fn fmt_short(&self) -> String {
        let end = self.0.len().min(5);
        data_encoding::HEXLOWER.encode(&self.0[..end])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key")
            .field(&data_encoding::HEXLOWER.encode(&self.0))
            .finish()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Key> for Bytes {
    fn from(value: Key) -> Self {
        value.0
    }
}
