//! Pull client: connects to a server, receives the active configuration and
//! pulls every configured folder in its mode.
//!
//! The client is the only side that writes to disk, and only below its own
//! target directory. Per-folder failures are logged and the remaining
//! folders still sync.

use std::path::Path;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::{ProtocolError, SyncError};
use crate::logging::*;
use crate::progress::ProgressSender;
use crate::protocol::messages::*;
use crate::protocol::Connection;
use crate::service::effective_folders;
use crate::storage::Storage;
use crate::transfer::{pull_folder, FolderOutcome};

pub struct SyncClient {
	conn: Connection,
	uuid: String,
	server_config: Option<Arc<SyncConfig>>,
	progress: ProgressSender,
}

impl SyncClient {
	/// Open a TCP connection to the server
	pub async fn connect(host: &str, port: u16) -> Result<Self, SyncError> {
		Self::connect_with_uuid(host, port, &crate::config::new_uuid()).await
	}

	/// Connect announcing an existing client identity
	pub async fn connect_with_uuid(host: &str, port: u16, uuid: &str) -> Result<Self, SyncError> {
		let stream = tokio::net::TcpStream::connect((host, port)).await?;
		let _ = stream.set_nodelay(true);
		Ok(SyncClient {
			conn: Connection::new(stream),
			uuid: uuid.to_string(),
			server_config: None,
			progress: ProgressSender::default(),
		})
	}

	pub fn uuid(&self) -> &str {
		&self.uuid
	}

	pub fn progress_sender(&self) -> &ProgressSender {
		&self.progress
	}

	/// The configuration snapshot received from the server
	pub fn server_config(&self) -> Option<Arc<SyncConfig>> {
		self.server_config.clone()
	}

	/// First exchange on every connection: hands us the active server
	/// configuration. Anything else before this is a protocol error.
	pub async fn init(&mut self) -> Result<Arc<SyncConfig>, SyncError> {
		self.conn.write_message(&Envelope::empty(MSG_INIT, &self.uuid)).await?;
		let resp = self.conn.read_message().await?;
		if resp.msg_type != MSG_INIT_RESPONSE {
			return Err(unexpected(&resp.msg_type, MSG_INIT_RESPONSE));
		}
		let body: InitResponse = resp.parse_payload()?;
		if !body.success {
			return Err(SyncError::Other {
				message: format!("server refused init: {}", body.message),
			});
		}
		let config = Arc::new(body.config.ok_or_else(|| SyncError::Protocol(
			ProtocolError::Malformed { message: "init_response without config".to_string() },
		))?);
		info!("initialized against '{}' v{} ({})", config.name, config.version, config.uuid);
		self.server_config = Some(Arc::clone(&config));
		Ok(config)
	}

	/// Keep-alive; refreshes the server-side inactivity window
	pub async fn heartbeat(&mut self) -> Result<(), SyncError> {
		self.conn.write_message(&Envelope::empty(MSG_HEARTBEAT, &self.uuid)).await?;
		let resp = self.conn.read_message().await?;
		if resp.msg_type != MSG_HEARTBEAT_RESPONSE {
			return Err(unexpected(&resp.msg_type, MSG_HEARTBEAT_RESPONSE));
		}
		Ok(())
	}

	/// Ask the server for the full client-visible manifest without
	/// transferring anything
	pub async fn fetch_manifest(&mut self) -> Result<SyncResponse, SyncError> {
		self.require_config()?;
		let req = PathRequest {
			path: String::new(),
			mode: crate::config::SyncMode::Mirror,
			direction: Direction::Pull,
			files: None,
		};
		self.conn.write_message(&Envelope::new(MSG_SYNC_REQUEST, &self.uuid, &req)).await?;
		let resp = self.conn.read_message().await?;
		if resp.msg_type != MSG_SYNC_RESPONSE {
			return Err(unexpected(&resp.msg_type, MSG_SYNC_RESPONSE));
		}
		Ok(resp.parse_payload()?)
	}

	/// Pull every configured folder into `target_dir`.
	///
	/// `storage` tracks client-side sync artifacts (applied pack digests).
	/// A failing folder is logged and the next one still runs; the outcome
	/// list carries one entry per attempted folder.
	pub async fn sync_all(
		&mut self,
		target_dir: &Path,
		storage: &dyn Storage,
	) -> Result<Vec<(String, FolderOutcome)>, SyncError> {
		let config = self.require_config()?;
		tokio::fs::create_dir_all(target_dir).await?;

		let mut outcomes = Vec::new();
		for folder in effective_folders(&config) {
			// Local scans of large folders can outlast the inactivity
			// window; ping before each folder to stay alive.
			self.heartbeat().await?;

			match pull_folder(
				&mut self.conn,
				&self.uuid,
				&folder,
				&config,
				target_dir,
				storage,
				&self.progress,
			)
			.await
			{
				Ok(outcome) => {
					info!(
						"folder '{}': {} transferred, {} deleted, {} unchanged, {} failed",
						folder.path,
						outcome.transferred,
						outcome.deleted,
						outcome.skipped,
						outcome.failed
					);
					outcomes.push((folder.path.clone(), outcome));
				}
				Err(e) => {
					error!("folder '{}' aborted: {}", folder.path, e);
					outcomes.push((folder.path.clone(), FolderOutcome {
						failed: 1,
						..Default::default()
					}));
				}
			}
		}
		Ok(outcomes)
	}

	fn require_config(&self) -> Result<Arc<SyncConfig>, SyncError> {
		self.server_config.clone().ok_or(SyncError::Other {
			message: "init must complete before syncing".to_string(),
		})
	}
}

fn unexpected(got: &str, want: &str) -> SyncError {
	SyncError::Protocol(ProtocolError::UnexpectedMessage {
		got: got.to_string(),
		state: format!("expecting {}", want),
	})
}

// vim: ts=4
