//! Wire structs, encoded as CBOR arrays.
//!
//! ```text
//! Message  := [ wantlist: Wantlist, blocks: [bytes] ]
//! Wantlist := [ entries: [Entry] ]
//! Entry    := [ key: bytes, priority: int32, cancel: bool ]
//! ```

use minicbor::{CborLen, Decode, Encode, bytes::ByteVec};

#[derive(Encode, Decode, CborLen, Clone, Debug, Default, PartialEq, Eq)]
#[cbor(array)]
pub struct Message {
    #[n(0)]
    pub wantlist: Wantlist,

    /// Raw block payloads. Keys are not sent; receivers hash the bytes.
    #[n(1)]
    pub blocks: Vec<ByteVec>,
}

#[derive(Encode, Decode, CborLen, Clone, Debug, Default, PartialEq, Eq)]
#[cbor(array)]
pub struct Wantlist {
    #[n(0)]
    pub entries: Vec<WantlistEntry>,
}

#[derive(Encode, Decode, CborLen, Clone, Debug, Default, PartialEq, Eq)]
#[cbor(array)]
pub struct WantlistEntry {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub block: Vec<u8>,

    #[n(1)]
    pub priority: i32,

    #[n(2)]
    pub cancel: bool,
}

impl Message {
    pub fn contains_want(&self, key: &[u8]) -> bool {
        self.wantlist.entries.iter().any(|e| e.block == key)
    }
}
