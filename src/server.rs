//! The network runtime: TCP accept loop and client registry.
//!
//! One task runs the accept loop; every accepted connection gets its own
//! session task. Shutdown is cooperative: a watch channel flips, the accept
//! loop exits and every session observes the flip and closes its socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

use crate::config::SyncConfig;
use crate::error::NetworkError;
use crate::logging::*;
use crate::protocol::Connection;
use crate::service::SyncService;
use crate::session::{run_session, Registry, SessionInfo};

/// Running network server bound to one configuration snapshot
pub struct NetworkServer {
	local_addr: SocketAddr,
	registry: Registry,
	shutdown_tx: watch::Sender<bool>,
	accept_task: tokio::task::JoinHandle<()>,
}

impl NetworkServer {
	/// Bind `host:port` from the configuration and spawn the accept loop
	pub async fn start(
		service: Arc<SyncService>,
		config: &SyncConfig,
	) -> Result<NetworkServer, NetworkError> {
		let addr = format!("{}:{}", config.host, config.port);
		let listener = TcpListener::bind(&addr)
			.await
			.map_err(|e| NetworkError::BindFailed { addr: addr.clone(), source: e })?;
		let local_addr = listener.local_addr().map_err(|e| NetworkError::BindFailed {
			addr: addr.clone(),
			source: e,
		})?;

		let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let conn_timeout = Duration::from_secs(config.conn_timeout_s.max(1));

		let accept_registry = Arc::clone(&registry);
		let accept_task = tokio::spawn(accept_loop(
			listener,
			service,
			accept_registry,
			conn_timeout,
			shutdown_rx,
		));

		Ok(NetworkServer { local_addr, registry, shutdown_tx, accept_task })
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub async fn client_count(&self) -> usize {
		self.registry.read().await.len()
	}

	/// Snapshot of live sessions for the management surface
	pub async fn sessions(&self) -> Vec<Arc<SessionInfo>> {
		self.registry.read().await.values().cloned().collect()
	}

	/// Cooperative shutdown: unblock the accept loop, then let every
	/// session observe the signal and close its socket. Idempotent.
	pub async fn stop(self) {
		let _ = self.shutdown_tx.send(true);
		if let Err(e) = self.accept_task.await {
			if !e.is_cancelled() {
				warn!("accept loop ended abnormally: {}", e);
			}
		}
		// Sessions remove themselves; give them a moment to drain
		for _ in 0..50 {
			if self.registry.read().await.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}
}

async fn accept_loop(
	listener: TcpListener,
	service: Arc<SyncService>,
	registry: Registry,
	conn_timeout: Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	let next_id = AtomicU64::new(1);
	loop {
		tokio::select! {
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, remote)) => {
						let _ = stream.set_nodelay(true);
						let id = next_id.fetch_add(1, Ordering::Relaxed);
						let info = Arc::new(SessionInfo {
							id,
							remote,
							client_uuid: std::sync::Mutex::new(None),
						});
						registry.write().await.insert(id, Arc::clone(&info));
						info!("accepted connection {} from {}", id, remote);

						let conn = Connection::new(stream);
						let session_registry = Arc::clone(&registry);
						let session_service = Arc::clone(&service);
						let session_shutdown = shutdown.clone();
						tokio::spawn(run_session(
							conn,
							info,
							session_registry,
							session_service,
							conn_timeout,
							session_shutdown,
						));
					}
					Err(e) => {
						// Temporary accept failures are retried; anything
						// during shutdown is swallowed by the select arm.
						warn!("accept failed, retrying: {}", e);
						tokio::time::sleep(Duration::from_millis(100)).await;
					}
				}
			}
			_ = shutdown.changed() => {
				debug!("accept loop stopping");
				break;
			}
		}
	}
}

// vim: ts=4
