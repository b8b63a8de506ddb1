//! Wire protocol: the JSON envelope types and the TCP codec.
//!
//! Transport is plain TCP on a trusted LAN. Messages are JSON objects
//! streamed back-to-back; file payloads follow the response that announces
//! them as raw bytes. See `messages` for the envelope and verb table and
//! `codec` for framing and payload streaming.

pub mod codec;
pub mod messages;

pub use codec::Connection;
pub use messages::{
	Direction, Envelope, FileBegin, InitResponse, Md5MapResponse, PathRequest, SyncResponse,
};

// vim: ts=4
