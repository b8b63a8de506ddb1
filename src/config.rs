//! Sync configuration types
//!
//! A [`SyncConfig`] is the unit a server serves and a client sees: pack name
//! and version, the served root directory, per-folder sync modes, path
//! redirects and ignore globs. Configurations are persisted as one JSON
//! document per uuid in the blob store and validated on every save and on
//! every load before becoming active.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::ConfigError;

/// Default listen port for freshly seeded server configurations
pub const DEFAULT_PORT: u16 = 6666;

/// Default session inactivity window in seconds
pub const DEFAULT_CONN_TIMEOUT_S: u64 = 30;

/// Which side of the sync a configuration describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
	Server,
	Client,
}

/// Per-folder synchronization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
	/// Authoritative copy: transfer changed files, delete extras
	Mirror,
	/// One-way add/update: extras on the client are retained
	Push,
	/// The folder travels as one ZIP archive, replaced wholesale
	Pack,
	/// Per-file mode chosen by extension
	Auto,
}

impl SyncMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncMode::Mirror => "mirror",
			SyncMode::Push => "push",
			SyncMode::Pack => "pack",
			SyncMode::Auto => "auto",
		}
	}
}

impl std::str::FromStr for SyncMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"mirror" => Ok(SyncMode::Mirror),
			"push" => Ok(SyncMode::Push),
			"pack" => Ok(SyncMode::Pack),
			"auto" => Ok(SyncMode::Auto),
			other => Err(format!("unknown sync mode '{}'", other)),
		}
	}
}

/// One synchronized top-level folder under `sync_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFolder {
	/// Directory name relative to `sync_dir`
	pub path: String,

	/// How this folder is synchronized
	pub mode: SyncMode,

	/// Cached aggregate digest, used only by pack mode
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pack_digest: Option<String>,
}

impl SyncFolder {
	pub fn new(path: impl Into<String>, mode: SyncMode) -> Self {
		SyncFolder { path: path.into(), mode, pack_digest: None }
	}
}

/// Prefix rewrite mapping a server-side subtree to a client-side name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRedirect {
	pub server_path: String,
	pub client_path: String,
}

/// The unit a server serves and a client sees
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
	/// Stable identifier: 16 random bytes, hex-encoded
	pub uuid: String,

	pub kind: ConfigKind,

	/// Human-facing pack name
	pub name: String,

	/// Opaque version label; no ordering semantics
	pub version: String,

	pub host: String,
	pub port: u16,

	/// Absolute path to the root of the served/received tree
	pub sync_dir: PathBuf,

	/// Ordered list of synchronized folders
	#[serde(default)]
	pub sync_folders: Vec<SyncFolder>,

	/// Shell glob patterns matched against forward-slash relative paths
	#[serde(default)]
	pub ignore_list: Vec<String>,

	/// Ordered prefix rewrites; first match wins
	#[serde(default)]
	pub folder_redirects: Vec<FolderRedirect>,

	/// Inactivity window after which a session is torn down
	#[serde(default = "default_conn_timeout")]
	pub conn_timeout_s: u64,
}

fn default_conn_timeout() -> u64 {
	DEFAULT_CONN_TIMEOUT_S
}

/// Fresh identifier for a new configuration (32 hex chars)
pub fn new_uuid() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}

impl SyncConfig {
	/// Seed a brand-new server configuration with product defaults
	pub fn default_server(name: impl Into<String>, version: impl Into<String>, sync_dir: PathBuf) -> Self {
		SyncConfig {
			uuid: new_uuid(),
			kind: ConfigKind::Server,
			name: name.into(),
			version: version.into(),
			host: "0.0.0.0".to_string(),
			port: DEFAULT_PORT,
			sync_dir,
			sync_folders: vec![SyncFolder::new("mods", SyncMode::Pack)],
			ignore_list: vec![
				".clientconfig".to_string(),
				".DS_Store".to_string(),
				"thumbs.db".to_string(),
			],
			folder_redirects: vec![FolderRedirect {
				server_path: "clientmods".to_string(),
				client_path: "mods".to_string(),
			}],
			conn_timeout_s: DEFAULT_CONN_TIMEOUT_S,
		}
	}

	/// Validate all invariants. Runs on every save and load.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.uuid.trim().is_empty() {
			return Err(invalid("uuid must not be empty"));
		}
		if self.name.trim().is_empty() {
			return Err(invalid("name must not be empty"));
		}
		if self.version.trim().is_empty() {
			return Err(invalid("version must not be empty"));
		}
		if self.host.trim().is_empty() {
			return Err(invalid("host must not be empty"));
		}
		if self.port == 0 {
			return Err(invalid("port must be in 1..=65535"));
		}
		if self.sync_dir.as_os_str().is_empty() {
			return Err(invalid("sync_dir must not be empty"));
		}
		for folder in &self.sync_folders {
			if folder.path.trim().is_empty() {
				return Err(invalid("sync folder path must not be empty"));
			}
			if !resolves_inside_root(&folder.path) {
				return Err(ConfigError::Validation {
					message: format!("sync folder '{}' escapes sync_dir", folder.path),
				});
			}
		}
		for redirect in &self.folder_redirects {
			if redirect.server_path.trim().is_empty() || redirect.client_path.trim().is_empty() {
				return Err(invalid("redirect sides must not be empty"));
			}
		}
		Ok(())
	}

	/// Storage key of the persisted document: `<uuid>.json`
	pub fn storage_key(&self) -> String {
		format!("{}.json", self.uuid)
	}
}

fn invalid(message: &str) -> ConfigError {
	ConfigError::Validation { message: message.to_string() }
}

/// A relative folder path stays inside the root iff its normalized form
/// never walks above it. Absolute folder paths are rejected outright.
fn resolves_inside_root(path: &str) -> bool {
	let p = Path::new(path);
	if p.is_absolute() {
		return false;
	}
	let mut depth: i32 = 0;
	for comp in p.components() {
		match comp {
			Component::ParentDir => {
				depth -= 1;
				if depth < 0 {
					return false;
				}
			}
			Component::Normal(_) => depth += 1,
			Component::CurDir => {}
			_ => return false,
		}
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid_config() -> SyncConfig {
		SyncConfig::default_server("pack", "1.0", PathBuf::from("/srv/pack"))
	}

	#[test]
	fn test_default_server_config() {
		let config = valid_config();
		assert_eq!(config.host, "0.0.0.0");
		assert_eq!(config.port, DEFAULT_PORT);
		assert_eq!(config.sync_folders.len(), 1);
		assert_eq!(config.sync_folders[0].path, "mods");
		assert_eq!(config.sync_folders[0].mode, SyncMode::Pack);
		assert!(config.ignore_list.contains(&".DS_Store".to_string()));
		assert_eq!(config.folder_redirects[0].server_path, "clientmods");
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_uuid_is_hex_16_bytes() {
		let uuid = new_uuid();
		assert_eq!(uuid.len(), 32);
		assert!(uuid.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(uuid, new_uuid());
	}

	#[test]
	fn test_validation_rejects_empty_fields() {
		let mut c = valid_config();
		c.name = "".to_string();
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.version = " ".to_string();
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.host = "".to_string();
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.port = 0;
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.sync_dir = PathBuf::new();
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.sync_folders.push(SyncFolder::new("", SyncMode::Mirror));
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.folder_redirects.push(FolderRedirect {
			server_path: "a".to_string(),
			client_path: "".to_string(),
		});
		assert!(c.validate().is_err());
	}

	#[test]
	fn test_validation_rejects_escaping_folder() {
		let mut c = valid_config();
		c.sync_folders.push(SyncFolder::new("../outside", SyncMode::Mirror));
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.sync_folders.push(SyncFolder::new("sub/../../outside", SyncMode::Mirror));
		assert!(c.validate().is_err());

		let mut c = valid_config();
		c.sync_folders.push(SyncFolder::new("sub/../inside", SyncMode::Mirror));
		assert!(c.validate().is_ok());
	}

	#[test]
	fn test_config_serialization_round_trip() {
		let config = valid_config();
		let json = serde_json::to_string(&config).expect("serialize");
		assert!(json.contains("\"syncDir\""), "wire names are camelCase: {}", json);
		assert!(json.contains("\"mirror\"") || json.contains("\"pack\""));
		let back: SyncConfig = serde_json::from_str(&json).expect("deserialize");
		assert_eq!(back.uuid, config.uuid);
		assert_eq!(back.sync_folders[0].mode, SyncMode::Pack);
		assert_eq!(back.conn_timeout_s, config.conn_timeout_s);
	}

	#[test]
	fn test_sync_mode_from_str() {
		assert_eq!("mirror".parse::<SyncMode>().unwrap(), SyncMode::Mirror);
		assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
		assert!("two-way".parse::<SyncMode>().is_err());
	}
}

// vim: ts=4
