//! Wire message types.
//!
//! Every message on the wire is one JSON envelope `{type, uuid, payload}`;
//! the payload stays opaque until the dispatcher interprets it per type.
//! File bytes follow a `file_begin` response raw on the same stream.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{SyncConfig, SyncMode};
use crate::error::ProtocolError;

// Message type verbs
pub const MSG_INIT: &str = "init";
pub const MSG_INIT_RESPONSE: &str = "init_response";
pub const MSG_MD5_REQUEST: &str = "md5_request";
pub const MSG_MD5_MAP_RESPONSE: &str = "md5_map_response";
pub const MSG_FILE_REQUEST: &str = "file_request";
pub const MSG_FILE_BEGIN: &str = "file_begin";
pub const MSG_SYNC_REQUEST: &str = "sync_request";
pub const MSG_SYNC_RESPONSE: &str = "sync_response";
pub const MSG_HEARTBEAT: &str = "heartbeat";
pub const MSG_HEARTBEAT_RESPONSE: &str = "heartbeat_response";

/// The one wire envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	#[serde(rename = "type")]
	pub msg_type: String,

	/// Client identifier; empty before `init`
	#[serde(default)]
	pub uuid: String,

	#[serde(default)]
	pub payload: serde_json::Value,
}

impl Envelope {
	pub fn new<T: Serialize>(msg_type: &str, uuid: &str, payload: &T) -> Self {
		Envelope {
			msg_type: msg_type.to_string(),
			uuid: uuid.to_string(),
			payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
		}
	}

	pub fn empty(msg_type: &str, uuid: &str) -> Self {
		Envelope {
			msg_type: msg_type.to_string(),
			uuid: uuid.to_string(),
			payload: serde_json::Value::Object(serde_json::Map::new()),
		}
	}

	/// Interpret the payload as a typed request/response body
	pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
		serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::Malformed {
			message: format!("payload of '{}': {}", self.msg_type, e),
		})
	}
}

/// Requested transfer direction; only `pull` is used by the current flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Pull,
	Push,
}

impl Default for Direction {
	fn default() -> Self {
		Direction::Pull
	}
}

/// Payload of `md5_request`, `file_request` and `sync_request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
	/// Folder name for md5/sync requests, file path for file requests
	pub path: String,

	pub mode: SyncMode,

	#[serde(default)]
	pub direction: Direction,

	/// Optional explicit file list for sync requests
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub files: Option<Vec<String>>,
}

/// Payload of `init_response`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
	pub success: bool,

	#[serde(default)]
	pub message: String,

	/// Active server configuration snapshot
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<SyncConfig>,
}

/// Payload of `md5_map_response`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Md5MapResponse {
	pub success: bool,

	#[serde(default)]
	pub md5_map: BTreeMap<String, String>,

	#[serde(default)]
	pub message: String,
}

/// Payload of `file_begin`; exactly `size` raw bytes follow on the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBegin {
	pub success: bool,

	#[serde(default)]
	pub size: u64,

	#[serde(default)]
	pub name: String,

	#[serde(default)]
	pub message: String,
}

/// Payload of `sync_response`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
	pub success: bool,

	#[serde(default)]
	pub message: String,

	/// Per-folder manifest: client-visible path → digest
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<BTreeMap<String, BTreeMap<String, String>>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_envelope_wire_shape() {
		let req = PathRequest {
			path: "mods".to_string(),
			mode: SyncMode::Pack,
			direction: Direction::Pull,
			files: None,
		};
		let env = Envelope::new(MSG_MD5_REQUEST, "abc123", &req);
		let json = serde_json::to_string(&env).unwrap();
		assert!(json.contains("\"type\":\"md5_request\""));
		assert!(json.contains("\"uuid\":\"abc123\""));
		assert!(json.contains("\"pack\""));

		let back: Envelope = serde_json::from_str(&json).unwrap();
		let req: PathRequest = back.parse_payload().unwrap();
		assert_eq!(req.path, "mods");
		assert_eq!(req.mode, SyncMode::Pack);
		assert_eq!(req.direction, Direction::Pull);
	}

	#[test]
	fn test_envelope_uuid_defaults_empty() {
		let env: Envelope = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
		assert_eq!(env.msg_type, "init");
		assert!(env.uuid.is_empty());
		assert!(env.payload.is_null());
	}

	#[test]
	fn test_bad_payload_is_protocol_error() {
		let env: Envelope =
			serde_json::from_str(r#"{"type":"md5_request","payload":{"path":7}}"#).unwrap();
		assert!(env.parse_payload::<PathRequest>().is_err());
	}
}

// vim: ts=4
