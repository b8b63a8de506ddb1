//! Per-connection session: the server-side state machine.
//!
//! A session runs as one task from accept to close. The first message must
//! be `init`; after that the session serves requests strictly in the order
//! received. A watchdog tick closes the connection once inactivity exceeds
//! the configured timeout, and a shutdown signal from the server runtime
//! closes it cooperatively.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use crate::error::ProtocolError;
use crate::logging::*;
use crate::protocol::messages::*;
use crate::protocol::Connection;
use crate::service::{FileSource, SyncService};

/// Registry shared between the accept loop and the sessions
pub type Registry = Arc<RwLock<HashMap<u64, Arc<SessionInfo>>>>;

/// Shared metadata about one live session
pub struct SessionInfo {
	pub id: u64,
	pub remote: SocketAddr,
	pub client_uuid: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
	AwaitingInit,
	Ready,
}

impl SessionState {
	fn name(&self) -> &'static str {
		match self {
			SessionState::AwaitingInit => "awaiting-init",
			SessionState::Ready => "ready",
		}
	}
}

/// Drive one accepted connection until close.
///
/// Removes itself from the registry on every exit path.
pub async fn run_session(
	mut conn: Connection,
	info: Arc<SessionInfo>,
	registry: Registry,
	service: Arc<SyncService>,
	conn_timeout: Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut state = SessionState::AwaitingInit;
	let mut last_activity = Instant::now();

	// Watchdog granularity: a quarter of the inactivity window
	let tick = (conn_timeout / 4).max(Duration::from_millis(50));
	let mut interval = tokio::time::interval(tick);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			result = conn.read_message() => {
				let env = match result {
					Ok(env) => env,
					Err(ProtocolError::Closed) => {
						debug!("session {}: peer closed", info.id);
						break;
					}
					Err(e) => {
						warn!("session {}: read failed: {}", info.id, e);
						break;
					}
				};
				last_activity = Instant::now();
				match handle_message(&mut conn, &info, &service, state, env).await {
					Ok(next) => state = next,
					Err(e) => {
						warn!("session {}: {}", info.id, e);
						break;
					}
				}
			}
			_ = interval.tick() => {
				if last_activity.elapsed() > conn_timeout {
					info!(
						"session {}: inactive for {:?}, closing",
						info.id, last_activity.elapsed()
					);
					break;
				}
			}
			_ = shutdown.changed() => {
				debug!("session {}: server shutdown", info.id);
				break;
			}
		}
	}

	registry.write().await.remove(&info.id);
	debug!("session {} removed from registry", info.id);
}

async fn handle_message(
	conn: &mut Connection,
	info: &SessionInfo,
	service: &SyncService,
	state: SessionState,
	env: Envelope,
) -> Result<SessionState, ProtocolError> {
	match (state, env.msg_type.as_str()) {
		(SessionState::AwaitingInit, MSG_INIT) => {
			*info.client_uuid.lock().unwrap() = Some(env.uuid.clone());
			let response = match service.active_config() {
				Some(config) => InitResponse {
					success: true,
					message: String::new(),
					config: Some((*config).clone()),
				},
				None => InitResponse {
					success: false,
					message: "no active configuration".to_string(),
					config: None,
				},
			};
			let proceed = response.success;
			conn.write_message(&Envelope::new(MSG_INIT_RESPONSE, &env.uuid, &response)).await?;
			if !proceed {
				return Err(ProtocolError::Malformed {
					message: "no active configuration, closing".to_string(),
				});
			}
			info!("session {}: client '{}' initialized", info.id, env.uuid);
			Ok(SessionState::Ready)
		}

		(SessionState::AwaitingInit, other) => Err(ProtocolError::UnexpectedMessage {
			got: other.to_string(),
			state: state.name().to_string(),
		}),

		(SessionState::Ready, MSG_HEARTBEAT) => {
			conn.write_message(&Envelope::empty(MSG_HEARTBEAT_RESPONSE, &env.uuid)).await?;
			Ok(SessionState::Ready)
		}

		(SessionState::Ready, MSG_MD5_REQUEST) => {
			let req: PathRequest = env.parse_payload()?;
			let response = match service.md5_map_for(&req).await {
				Ok(md5_map) => Md5MapResponse { success: true, md5_map, message: String::new() },
				Err(e) => {
					warn!("session {}: md5_request failed: {}", info.id, e);
					Md5MapResponse {
						success: false,
						md5_map: Default::default(),
						message: e.to_string(),
					}
				}
			};
			conn.write_message(&Envelope::new(MSG_MD5_MAP_RESPONSE, &env.uuid, &response)).await?;
			Ok(SessionState::Ready)
		}

		(SessionState::Ready, MSG_FILE_REQUEST) => {
			let req: PathRequest = env.parse_payload()?;
			match service.resolve_file(&req).await {
				Ok(FileSource::Disk { path, size, name }) => {
					let begin =
						FileBegin { success: true, size, name: name.clone(), message: String::new() };
					conn.write_message(&Envelope::new(MSG_FILE_BEGIN, &env.uuid, &begin)).await?;
					conn.send_file(&path, &name, size, service.progress_sender()).await?;
				}
				Ok(FileSource::Bytes { bytes, name }) => {
					let begin = FileBegin {
						success: true,
						size: bytes.len() as u64,
						name: name.clone(),
						message: String::new(),
					};
					conn.write_message(&Envelope::new(MSG_FILE_BEGIN, &env.uuid, &begin)).await?;
					conn.send_bytes(&bytes, &name, service.progress_sender()).await?;
				}
				Err(e) => {
					warn!("session {}: file_request '{}' refused: {}", info.id, req.path, e);
					let begin = FileBegin {
						success: false,
						size: 0,
						name: req.path.clone(),
						message: e.to_string(),
					};
					conn.write_message(&Envelope::new(MSG_FILE_BEGIN, &env.uuid, &begin)).await?;
				}
			}
			Ok(SessionState::Ready)
		}

		(SessionState::Ready, MSG_SYNC_REQUEST) => {
			let req: PathRequest = env.parse_payload()?;
			let response = match service.handle_sync_request(&req).await {
				Ok(resp) => resp,
				Err(e) => SyncResponse { success: false, message: e.to_string(), data: None },
			};
			conn.write_message(&Envelope::new(MSG_SYNC_RESPONSE, &env.uuid, &response)).await?;
			Ok(SessionState::Ready)
		}

		(SessionState::Ready, other) => {
			Err(ProtocolError::UnknownType { got: other.to_string() })
		}
	}
}

// vim: ts=4
