//! The unit exchanged between peers: a want-list plus raw block payloads.
//!
//! [`Message`] is the in-memory form used by an exchange engine; [`pb`]
//! holds the plain wire structs. On the wire every message is one frame,
//! a varint length followed by the CBOR encoding of [`pb::Message`].

mod message;
pub mod pb;

pub use message::{Entry, MAX_MESSAGE_SIZE, Message, MessageError};
