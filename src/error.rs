//! Error types for PackSync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for the sync service
///
/// This is the unified error type that encompasses all service errors.
/// It contains both direct variants for lifecycle errors and nested
/// variants for domain-specific errors. Every variant maps to a stable
/// code string via [`SyncError::code`] so callers and the management
/// surface can switch on codes instead of messages.
#[derive(Debug)]
pub enum SyncError {
	/// Service start requested while already running
	ServiceAlreadyRunning,

	/// Operation requires a running service
	ServiceNotRunning,

	/// Operation requires an active configuration
	NoActiveConfig,

	/// Configuration error (nested)
	Config(ConfigError),

	/// Storage error (nested)
	Storage(StorageError),

	/// Protocol error (nested)
	Protocol(ProtocolError),

	/// Network runtime error (nested)
	Network(NetworkError),

	/// Transfer error (nested)
	Transfer(TransferError),

	/// I/O error
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl SyncError {
	/// Stable error code surfaced to clients and the management layer
	pub fn code(&self) -> &'static str {
		match self {
			SyncError::ServiceAlreadyRunning => "SERVICE_ALREADY_RUNNING",
			SyncError::ServiceNotRunning => "SERVICE_NOT_RUNNING",
			SyncError::NoActiveConfig => "SERVICE_NO_CONFIG",
			SyncError::Config(e) => e.code(),
			SyncError::Storage(_) => "STORAGE_ERROR",
			SyncError::Protocol(e) => e.code(),
			SyncError::Network(e) => e.code(),
			SyncError::Transfer(e) => e.code(),
			SyncError::Io(_) => "IO_ERROR",
			SyncError::Other { .. } => "INTERNAL_ERROR",
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::ServiceAlreadyRunning => write!(f, "Sync service is already running"),
			SyncError::ServiceNotRunning => write!(f, "Sync service is not running"),
			SyncError::NoActiveConfig => write!(f, "No active configuration loaded"),
			SyncError::Config(e) => write!(f, "Configuration error: {}", e),
			SyncError::Storage(e) => write!(f, "Storage error: {}", e),
			SyncError::Protocol(e) => write!(f, "Protocol error: {}", e),
			SyncError::Network(e) => write!(f, "Network error: {}", e),
			SyncError::Transfer(e) => write!(f, "Transfer error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<ConfigError> for SyncError {
	fn from(e: ConfigError) -> Self {
		SyncError::Config(e)
	}
}

impl From<StorageError> for SyncError {
	fn from(e: StorageError) -> Self {
		SyncError::Storage(e)
	}
}

impl From<ProtocolError> for SyncError {
	fn from(e: ProtocolError) -> Self {
		SyncError::Protocol(e)
	}
}

impl From<NetworkError> for SyncError {
	fn from(e: NetworkError) -> Self {
		SyncError::Network(e)
	}
}

impl From<TransferError> for SyncError {
	fn from(e: TransferError) -> Self {
		SyncError::Transfer(e)
	}
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
	/// Configuration failed validation; rejected before activation
	Validation { message: String },

	/// No configuration stored under the given uuid
	NotFound { uuid: String },
}

impl ConfigError {
	pub fn code(&self) -> &'static str {
		match self {
			ConfigError::Validation { .. } => "CONFIG_INVALID",
			ConfigError::NotFound { .. } => "CONFIG_NOT_FOUND",
		}
	}
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Validation { message } => write!(f, "{}", message),
			ConfigError::NotFound { uuid } => write!(f, "No configuration with uuid {}", uuid),
		}
	}
}

impl Error for ConfigError {}

/// Blob store errors
#[derive(Debug)]
pub enum StorageError {
	/// Key escapes the base directory or is empty
	InvalidKey { key: String },

	/// Key not present in the store
	NotFound { key: String },

	/// Serialization or deserialization failed
	Serde { key: String, source: serde_json::Error },

	/// Underlying filesystem failure
	Io { key: String, source: io::Error },
}

impl fmt::Display for StorageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StorageError::InvalidKey { key } => write!(f, "Invalid storage key: {}", key),
			StorageError::NotFound { key } => write!(f, "Key not found: {}", key),
			StorageError::Serde { key, source } => {
				write!(f, "Failed to (de)serialize {}: {}", key, source)
			}
			StorageError::Io { key, source } => write!(f, "I/O failure on {}: {}", key, source),
		}
	}
}

impl Error for StorageError {}

/// Wire protocol errors
#[derive(Debug)]
pub enum ProtocolError {
	/// Message could not be parsed as a JSON envelope
	Malformed { message: String },

	/// Message type not valid in the current session state
	UnexpectedMessage { got: String, state: String },

	/// Unknown message type
	UnknownType { got: String },

	/// Stream ended before the announced payload size was read
	Truncated { expected: u64, got: u64 },

	/// Peer closed the connection
	Closed,

	/// Underlying socket failure
	Io(io::Error),
}

impl ProtocolError {
	pub fn code(&self) -> &'static str {
		match self {
			ProtocolError::Truncated { .. } => "TRANSFER_TRUNCATED",
			ProtocolError::Closed => "CONNECTION_CLOSED",
			_ => "PROTOCOL_ERROR",
		}
	}
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::Malformed { message } => write!(f, "Malformed message: {}", message),
			ProtocolError::UnexpectedMessage { got, state } => {
				write!(f, "Unexpected message '{}' in state {}", got, state)
			}
			ProtocolError::UnknownType { got } => write!(f, "Unknown message type '{}'", got),
			ProtocolError::Truncated { expected, got } => {
				write!(f, "Stream truncated: expected {} bytes, got {}", expected, got)
			}
			ProtocolError::Closed => write!(f, "Connection closed by peer"),
			ProtocolError::Io(e) => write!(f, "Socket error: {}", e),
		}
	}
}

impl Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		ProtocolError::Io(e)
	}
}

/// Network runtime errors
#[derive(Debug)]
pub enum NetworkError {
	/// Start requested while the listener is already up
	AlreadyRunning,

	/// Stop requested while not running
	NotRunning,

	/// Could not bind the listen address
	BindFailed { addr: String, source: io::Error },
}

impl NetworkError {
	pub fn code(&self) -> &'static str {
		match self {
			NetworkError::AlreadyRunning => "NETWORK_ALREADY_RUNNING",
			NetworkError::NotRunning => "NETWORK_NOT_RUNNING",
			NetworkError::BindFailed { .. } => "NETWORK_BIND_FAILED",
		}
	}
}

impl fmt::Display for NetworkError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NetworkError::AlreadyRunning => write!(f, "Network server is already running"),
			NetworkError::NotRunning => write!(f, "Network server is not running"),
			NetworkError::BindFailed { addr, source } => {
				write!(f, "Failed to bind {}: {}", addr, source)
			}
		}
	}
}

impl Error for NetworkError {}

/// Transfer engine errors
#[derive(Debug)]
pub enum TransferError {
	/// The whole folder failed (cannot create target, disk full, ...)
	Folder { folder: String, message: String },

	/// A single file failed; callers log and continue
	File { path: String, source: io::Error },

	/// Pack archive build or unpack failed
	Archive { folder: String, message: String },
}

impl TransferError {
	pub fn code(&self) -> &'static str {
		match self {
			TransferError::Folder { .. } => "FOLDER_FAILED",
			TransferError::File { .. } => "FILE_FAILED",
			TransferError::Archive { .. } => "ARCHIVE_FAILED",
		}
	}
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::Folder { folder, message } => {
				write!(f, "Folder '{}' failed: {}", folder, message)
			}
			TransferError::File { path, source } => write!(f, "File '{}' failed: {}", path, source),
			TransferError::Archive { folder, message } => {
				write!(f, "Pack archive for '{}' failed: {}", folder, message)
			}
		}
	}
}

impl Error for TransferError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_codes_stable() {
		assert_eq!(SyncError::ServiceAlreadyRunning.code(), "SERVICE_ALREADY_RUNNING");
		assert_eq!(SyncError::NoActiveConfig.code(), "SERVICE_NO_CONFIG");
		let e = SyncError::Network(NetworkError::AlreadyRunning);
		assert_eq!(e.code(), "NETWORK_ALREADY_RUNNING");
		let e = SyncError::Protocol(ProtocolError::Truncated { expected: 10, got: 3 });
		assert_eq!(e.code(), "TRANSFER_TRUNCATED");
	}

	#[test]
	fn test_display_includes_context() {
		let e = ConfigError::NotFound { uuid: "abc".to_string() };
		assert!(e.to_string().contains("abc"));
		let e = ProtocolError::UnexpectedMessage {
			got: "file_request".to_string(),
			state: "awaiting-init".to_string(),
		};
		assert!(e.to_string().contains("file_request"));
		assert!(e.to_string().contains("awaiting-init"));
	}
}

// vim: ts=4
