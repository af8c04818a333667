use std::collections::BTreeMap;

use cairn_core::{Block, Key, varint};
use minicbor::bytes::ByteVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pb;

/// Frames larger than this are rejected before any payload is read.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("exchange: malformed message: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("exchange: malformed frame: {0}")]
    Frame(&'static str),
    #[error("exchange: frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: usize },
    #[error("exchange: failed to read message: {0}")]
    Read(#[source] std::io::Error),
    #[error("exchange: failed to write message: {0}")]
    Write(#[source] std::io::Error),
    #[error("exchange: failed to encode message: {0}")]
    Encode(String),
}

/// Declared interest in one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub priority: i32,
    pub cancel: bool,
}

/// A want-list and a set of blocks, both unique by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    wantlist: BTreeMap<Key, Entry>,
    blocks: BTreeMap<Key, Block>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wants `key`. Adding a key again replaces its priority and clears a
    /// previous cancel.
    pub fn add_entry(&mut self, key: Key, priority: i32) {
        self.insert_entry(key, priority, false);
    }

    /// Withdraws interest in `key`.
    pub fn cancel(&mut self, key: Key) {
        self.insert_entry(key, 0, true);
    }

    fn insert_entry(&mut self, key: Key, priority: i32, cancel: bool) {
        self.wantlist.insert(
            key.clone(),
            Entry {
                key,
                priority,
                cancel,
            },
        );
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.key().clone(), block);
    }

    pub fn wantlist(&self) -> Vec<Entry> {
        self.wantlist.values().cloned().collect()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty()
    }

    /// Owned copy in wire form; later changes to `self` do not reach it.
    pub fn to_proto(&self) -> pb::Message {
        pb::Message {
            wantlist: pb::Wantlist {
                entries: self
                    .wantlist
                    .values()
                    .map(|entry| pb::WantlistEntry {
                        block: entry.key.as_bytes().to_vec(),
                        priority: entry.priority,
                        cancel: entry.cancel,
                    })
                    .collect(),
            },
            blocks: self
                .blocks
                .values()
                .map(|block| ByteVec::from(block.data().to_vec()))
                .collect(),
        }
    }

    /// Builds a message from its wire form. Block keys are recomputed from
    /// the payloads; duplicate keys collapse, the last one wins.
    pub fn from_proto(proto: pb::Message) -> Self {
        let mut message = Self::new();
        for entry in proto.wantlist.entries {
            message.insert_entry(Key::from(entry.block), entry.priority, entry.cancel);
        }
        for data in proto.blocks {
            message.add_block(Block::new(data.to_vec()));
        }
        message
    }

    /// Writes the message as one length-prefixed frame and flushes.
    pub async fn to_net<W>(&self, writer: &mut W) -> Result<(), MessageError>
    where
        W: AsyncWrite + Unpin,
    {
        let payload =
            minicbor::to_vec(self.to_proto()).map_err(|e| MessageError::Encode(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge {
                size: payload.len() as u64,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(varint::MAX_LEN + payload.len());
        varint::encode(payload.len() as u64, &mut frame);
        frame.extend_from_slice(&payload);

        writer.write_all(&frame).await.map_err(MessageError::Write)?;
        writer.flush().await.map_err(MessageError::Write)?;
        tracing::trace!(
            "exchange: sent {} wants, {} blocks in {} bytes",
            self.wantlist.len(),
            self.blocks.len(),
            frame.len()
        );
        Ok(())
    }

    /// Reads exactly one frame written by [`Message::to_net`].
    pub async fn from_net<R>(reader: &mut R) -> Result<Self, MessageError>
    where
        R: AsyncRead + Unpin,
    {
        let len = read_frame_len(reader).await?;
        if len > MAX_MESSAGE_SIZE as u64 {
            return Err(MessageError::TooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut payload = vec![0u8; len as usize];
        match reader.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(MessageError::Frame("payload shorter than its length prefix"));
            }
            Err(e) => return Err(MessageError::Read(e)),
        }

        let mut decoder = minicbor::Decoder::new(&payload);
        let proto: pb::Message = decoder.decode()?;
        if decoder.position() != payload.len() {
            return Err(MessageError::Frame("trailing bytes after message"));
        }
        Ok(Self::from_proto(proto))
    }
}

async fn read_frame_len<R>(reader: &mut R) -> Result<u64, MessageError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; varint::MAX_LEN];
    for i in 0..varint::MAX_LEN {
        buf[i] = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(MessageError::Frame("truncated length prefix"));
            }
            Err(e) => return Err(MessageError::Read(e)),
        };
        if buf[i] & 0x80 == 0 {
            return varint::decode(&buf[..=i])
                .map(|(len, _)| len)
                .ok_or(MessageError::Frame("overlong length prefix"));
        }
    }
    Err(MessageError::Frame("overlong length prefix"))
}

impl From<pb::Message> for Message {
    fn from(proto: pb::Message) -> Self {
        Self::from_proto(proto)
    }
}
