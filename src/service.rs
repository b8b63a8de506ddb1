//! The sync service facade.
//!
//! Owns the active configuration, validates and persists configurations
//! through the blob store, dispatches server-side request handlers and
//! publishes progress and configuration-change events to registered sinks.
//! Nothing below this module holds a reference to anything above it; the
//! management surface subscribes through one-way callbacks.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::archive::PackCache;
use crate::client::SyncClient;
use crate::config::{SyncConfig, SyncFolder, SyncMode};
use crate::error::{ConfigError, StorageError, SyncError, TransferError};
use crate::logging::*;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::protocol::messages::{PathRequest, SyncResponse};
use crate::rewrite::{apply_redirect, normalize, IgnoreList, RewriteDirection};
use crate::scan::scan_folder;
use crate::server::NetworkServer;
use crate::storage::{Storage, StorageExt};
use crate::transfer::FolderOutcome;

pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;
pub type ConfigChangedCallback = Box<dyn Fn(Arc<SyncConfig>) + Send + Sync>;

/// What a `file_request` resolves to on the server side
pub enum FileSource {
	/// Stream from disk
	Disk { path: PathBuf, size: u64, name: String },

	/// Serve prepared bytes (cached pack archives)
	Bytes { bytes: Vec<u8>, name: String },
}

struct ServiceState {
	current: Option<Arc<SyncConfig>>,
	running: bool,
	status: String,
}

/// Facade over configuration management, the network runtime and the
/// server-side request handlers
pub struct SyncService {
	storage: Arc<dyn Storage>,
	state: RwLock<ServiceState>,
	server: tokio::sync::Mutex<Option<NetworkServer>>,
	progress: ProgressSender,
	progress_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
	on_config_changed: Mutex<Option<ConfigChangedCallback>>,
	/// Handle to ourselves for spawning the network runtime; sessions hold
	/// a strong reference while they live
	weak: Weak<SyncService>,
}

impl SyncService {
	pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
		Arc::new_cyclic(|weak| SyncService {
			storage,
			state: RwLock::new(ServiceState {
				current: None,
				running: false,
				status: "stopped".to_string(),
			}),
			server: tokio::sync::Mutex::new(None),
			progress: ProgressSender::default(),
			progress_task: Mutex::new(None),
			on_config_changed: Mutex::new(None),
			weak: weak.clone(),
		})
	}

	// === Lifecycle ===

	/// Mark the service running. Does not bind the network; use
	/// [`SyncService::start_server`] for that.
	pub fn start(&self) -> Result<(), SyncError> {
		let mut state = self.state.write().unwrap();
		if state.running {
			return Err(SyncError::ServiceAlreadyRunning);
		}
		if state.current.is_none() {
			return Err(SyncError::NoActiveConfig);
		}
		state.running = true;
		state.status = "running".to_string();
		info!("sync service started");
		Ok(())
	}

	/// Stop the service. Idempotent; stops the network server first when it
	/// is up (stopping the service implies stopping the server).
	pub async fn stop(&self) {
		self.stop_server().await;
		let mut state = self.state.write().unwrap();
		if state.running {
			state.running = false;
			state.status = "stopped".to_string();
			info!("sync service stopped");
		}
	}

	pub fn is_running(&self) -> bool {
		self.state.read().unwrap().running
	}

	pub fn status(&self) -> String {
		self.state.read().unwrap().status.clone()
	}

	fn set_status(&self, status: &str) {
		self.state.write().unwrap().status = status.to_string();
	}

	// === Network runtime ===

	/// Bind and start the network runtime for the current configuration.
	/// Leaves the facade `running` flag untouched.
	pub async fn start_server(&self) -> Result<std::net::SocketAddr, SyncError> {
		let config = self.active_config().ok_or(SyncError::NoActiveConfig)?;
		let this = self.weak.upgrade().ok_or_else(|| SyncError::Other {
			message: "service is shutting down".to_string(),
		})?;
		let mut guard = self.server.lock().await;
		if guard.is_some() {
			return Err(SyncError::Network(crate::error::NetworkError::AlreadyRunning));
		}
		let server = NetworkServer::start(this, &config).await?;
		let addr = server.local_addr();
		*guard = Some(server);
		self.set_status("serving");
		info!("network server listening on {}", addr);
		Ok(addr)
	}

	/// Stop the network runtime. Idempotent.
	pub async fn stop_server(&self) {
		let server = self.server.lock().await.take();
		if let Some(server) = server {
			server.stop().await;
			self.set_status("not serving");
			info!("network server stopped");
		}
	}

	/// Connected session count (for the management surface and tests)
	pub async fn client_count(&self) -> usize {
		match self.server.lock().await.as_ref() {
			Some(server) => server.client_count().await,
			None => 0,
		}
	}

	// === Configuration management ===

	pub fn active_config(&self) -> Option<Arc<SyncConfig>> {
		self.state.read().unwrap().current.clone()
	}

	/// Validate without persisting
	pub fn validate_config(&self, config: &SyncConfig) -> Result<(), SyncError> {
		config.validate().map_err(SyncError::from)
	}

	/// Persist a configuration. Validation runs first; an invalid
	/// configuration never reaches the store.
	pub async fn save_config(&self, config: &SyncConfig) -> Result<(), SyncError> {
		config.validate()?;
		self.storage.save_json(&config.storage_key(), config).await?;
		debug!("saved configuration {}", config.uuid);
		Ok(())
	}

	/// Load a stored configuration, make it active and notify the change
	/// sink. The swap is atomic; in-flight requests keep their snapshot.
	pub async fn load_config(&self, uuid: &str) -> Result<Arc<SyncConfig>, SyncError> {
		let key = format!("{}.json", uuid);
		let config: SyncConfig = match self.storage.load_json(&key).await {
			Ok(c) => c,
			Err(StorageError::NotFound { .. }) => {
				return Err(SyncError::Config(ConfigError::NotFound { uuid: uuid.to_string() }))
			}
			Err(e) => return Err(e.into()),
		};
		config.validate()?;
		let config = Arc::new(config);
		self.state.write().unwrap().current = Some(Arc::clone(&config));
		info!("activated configuration {} ({} v{})", config.uuid, config.name, config.version);
		if let Some(cb) = self.on_config_changed.lock().unwrap().as_ref() {
			cb(Arc::clone(&config));
		}
		Ok(config)
	}

	pub async fn delete_config(&self, uuid: &str) -> Result<(), SyncError> {
		let key = format!("{}.json", uuid);
		match self.storage.delete(&key).await {
			Ok(()) => Ok(()),
			Err(StorageError::NotFound { .. }) => {
				Err(SyncError::Config(ConfigError::NotFound { uuid: uuid.to_string() }))
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Uuids of all stored configurations
	pub async fn list_configs(&self) -> Result<Vec<String>, SyncError> {
		let keys = self.storage.list().await?;
		Ok(keys
			.into_iter()
			.filter(|k| !k.contains('/') && k.ends_with(".json"))
			.map(|k| k.trim_end_matches(".json").to_string())
			.collect())
	}

	/// Seed, persist and activate a brand-new server configuration
	pub async fn seed_default_config(
		&self,
		name: &str,
		version: &str,
		sync_dir: PathBuf,
	) -> Result<Arc<SyncConfig>, SyncError> {
		let config = SyncConfig::default_server(name, version, sync_dir);
		self.save_config(&config).await?;
		self.load_config(&config.uuid).await
	}

	/// Client-side convenience: connect to the endpoint named by the active
	/// configuration and pull everything into `target_dir`. Sync artifacts
	/// (applied pack digests) land in this service's blob store.
	pub async fn sync_files(
		&self,
		target_dir: &Path,
	) -> Result<Vec<(String, FolderOutcome)>, SyncError> {
		let config = self.active_config().ok_or(SyncError::NoActiveConfig)?;
		let mut client =
			SyncClient::connect_with_uuid(&config.host, config.port, &config.uuid).await?;
		client.init().await?;
		client.sync_all(target_dir, self.storage.as_ref()).await
	}

	// === Callbacks ===

	/// Register the progress sink. Events are forwarded from the progress
	/// channel on a dedicated task; a slow sink only ever sees the newest
	/// event and never blocks a transfer.
	pub fn set_progress_callback(&self, callback: ProgressCallback) {
		let mut rx = self.progress.subscribe();
		let task = tokio::spawn(async move {
			while rx.changed().await.is_ok() {
				let event = rx.borrow_and_update().clone();
				if let Some(event) = event {
					callback(&event);
				}
			}
		});
		if let Some(old) = self.progress_task.lock().unwrap().replace(task) {
			old.abort();
		}
	}

	pub fn set_on_config_changed(&self, callback: ConfigChangedCallback) {
		*self.on_config_changed.lock().unwrap() = Some(callback);
	}

	pub fn progress_sender(&self) -> &ProgressSender {
		&self.progress
	}

	// === Server-side request handlers ===

	/// Digest map for one folder.
	///
	/// For pack folders this primes the archive cache and returns the
	/// single `<folder>.zip → pack digest` entry; otherwise the per-file
	/// map, with ignored entries already filtered out (they are never
	/// sent).
	pub async fn md5_map_for(
		&self,
		req: &PathRequest,
	) -> Result<BTreeMap<String, String>, SyncError> {
		let config = self.active_config().ok_or(SyncError::NoActiveConfig)?;
		let folder = normalize(&req.path);

		if req.mode == SyncMode::Pack {
			let seed = config
				.sync_folders
				.iter()
				.find(|f| normalize(&f.path) == folder)
				.and_then(|f| f.pack_digest.clone());
			let cache = PackCache::new(self.storage.as_ref());
			let root = config.sync_dir.join(&folder);
			let (_bytes, digest) = cache.archive_for(&root, &folder, seed.as_deref()).await?;
			let mut map = BTreeMap::new();
			map.insert(format!("{}.zip", folder), digest);
			return Ok(map);
		}

		let entries = scan_folder(&config.sync_dir, &folder)
			.await
			.map_err(|e| folder_err(&folder, e))?;
		let ignore = IgnoreList::new(&config.ignore_list);
		Ok(crate::scan::digest_map(&entries)
			.into_iter()
			.filter(|(path, _)| !ignore.matches(path))
			.collect())
	}

	/// Resolve a `file_request` to a streamable source.
	///
	/// Ignored paths are never served; neither is anything outside
	/// `sync_dir`.
	pub async fn resolve_file(&self, req: &PathRequest) -> Result<FileSource, SyncError> {
		let config = self.active_config().ok_or(SyncError::NoActiveConfig)?;
		let path = normalize(&req.path);

		if req.mode == SyncMode::Pack {
			if let Some(folder) = path.strip_suffix(".zip") {
				if config.sync_folders.iter().any(|f| normalize(&f.path) == folder) {
					let seed = config
						.sync_folders
						.iter()
						.find(|f| normalize(&f.path) == folder)
						.and_then(|f| f.pack_digest.clone());
					let cache = PackCache::new(self.storage.as_ref());
					let root = config.sync_dir.join(folder);
					let (bytes, _digest) =
						cache.archive_for(&root, folder, seed.as_deref()).await?;
					return Ok(FileSource::Bytes { bytes, name: path.clone() });
				}
			}
		}

		if !is_safe_relative(&path) {
			return Err(file_refused(&path, "path escapes sync_dir"));
		}
		let ignore = IgnoreList::new(&config.ignore_list);
		if ignore.matches(&path) {
			return Err(file_refused(&path, "path is ignored"));
		}
		let full = config.sync_dir.join(&path);
		let meta = tokio::fs::metadata(&full)
			.await
			.map_err(|e| file_refused(&path, &e.to_string()))?;
		if !meta.is_file() {
			return Err(file_refused(&path, "not a regular file"));
		}
		let name = path.rsplit('/').next().unwrap_or(&path).to_string();
		Ok(FileSource::Disk { path: full, size: meta.len(), name })
	}

	/// Server-side dispatcher for `sync_request`.
	///
	/// Walks every configured folder (or the single virtual folder when
	/// none are configured), applies redirects and the ignore filter and
	/// returns the client-visible manifest per folder. Per-folder failures
	/// are logged and skipped; a missing `sync_dir` aborts.
	pub async fn handle_sync_request(&self, req: &PathRequest) -> Result<SyncResponse, SyncError> {
		if !self.is_running() {
			return Err(SyncError::ServiceNotRunning);
		}
		let config = self.active_config().ok_or(SyncError::NoActiveConfig)?;
		if !config.sync_dir.is_dir() {
			return Err(SyncError::Transfer(TransferError::Folder {
				folder: String::new(),
				message: format!("sync_dir {} does not exist", config.sync_dir.display()),
			}));
		}
		// An empty request path means every configured folder
		let requested = normalize(&req.path);
		let folders: Vec<SyncFolder> = effective_folders(&config)
			.into_iter()
			.filter(|f| requested.is_empty() || normalize(&f.path) == requested)
			.collect();
		let ignore = IgnoreList::new(&config.ignore_list);
		let mut data: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
		let mut failures = 0usize;

		for folder in &folders {
			match scan_folder(&config.sync_dir, &folder.path).await {
				Ok(entries) => {
					let manifest: BTreeMap<String, String> = crate::scan::digest_map(&entries)
						.into_iter()
						.filter(|(path, _)| !ignore.matches(path))
						.map(|(path, digest)| {
							let client = apply_redirect(
								&path,
								&config.folder_redirects,
								RewriteDirection::ServerToClient,
							);
							(client, digest)
						})
						.collect();
					data.insert(folder.path.clone(), manifest);
				}
				Err(e) => {
					warn!("folder '{}' failed, continuing: {}", folder.path, e);
					failures += 1;
				}
			}
		}

		let message = if failures == 0 {
			format!("{} folder(s)", data.len())
		} else {
			format!("{} folder(s), {} failed", data.len(), failures)
		};
		Ok(SyncResponse { success: true, message, data: Some(data) })
	}
}

/// The configured folders, or the whole tree as one mirror folder
pub fn effective_folders(config: &SyncConfig) -> Vec<SyncFolder> {
	if config.sync_folders.is_empty() {
		vec![SyncFolder::new("", SyncMode::Mirror)]
	} else {
		config.sync_folders.clone()
	}
}

fn is_safe_relative(path: &str) -> bool {
	let p = Path::new(path);
	!p.is_absolute()
		&& p.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn file_refused(path: &str, reason: &str) -> SyncError {
	SyncError::Transfer(TransferError::Folder {
		folder: path.to_string(),
		message: reason.to_string(),
	})
}

fn folder_err(folder: &str, e: impl std::fmt::Display) -> SyncError {
	SyncError::Transfer(TransferError::Folder {
		folder: folder.to_string(),
		message: e.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::DiskStorage;
	use tempfile::TempDir;

	fn service_with_store() -> (Arc<SyncService>, TempDir) {
		let dir = TempDir::new().unwrap();
		let service = SyncService::new(Arc::new(DiskStorage::new(dir.path())));
		(service, dir)
	}

	fn config(sync_dir: &Path) -> SyncConfig {
		SyncConfig::default_server("pack", "1.0", sync_dir.to_path_buf())
	}

	#[tokio::test]
	async fn test_start_requires_config() {
		let (service, _store) = service_with_store();
		assert!(matches!(service.start(), Err(SyncError::NoActiveConfig)));
	}

	#[tokio::test]
	async fn test_start_twice_fails_stop_idempotent() {
		let (service, _store) = service_with_store();
		let tree = TempDir::new().unwrap();
		let cfg = config(tree.path());
		service.save_config(&cfg).await.unwrap();
		service.load_config(&cfg.uuid).await.unwrap();

		service.start().unwrap();
		assert!(service.is_running());
		assert_eq!(service.status(), "running");
		assert!(matches!(service.start(), Err(SyncError::ServiceAlreadyRunning)));

		service.stop().await;
		assert!(!service.is_running());
		service.stop().await; // second stop is a no-op
		assert_eq!(service.status(), "stopped");
	}

	#[tokio::test]
	async fn test_save_rejects_invalid_and_leaves_no_file() {
		let (service, store) = service_with_store();
		let tree = TempDir::new().unwrap();
		let mut cfg = config(tree.path());
		cfg.port = 0;

		assert!(service.save_config(&cfg).await.is_err());
		assert!(!store.path().join(cfg.storage_key()).exists());
	}

	#[tokio::test]
	async fn test_config_crud_round_trip() {
		let (service, _store) = service_with_store();
		let tree = TempDir::new().unwrap();
		let cfg = config(tree.path());

		service.save_config(&cfg).await.unwrap();
		assert_eq!(service.list_configs().await.unwrap(), vec![cfg.uuid.clone()]);

		let loaded = service.load_config(&cfg.uuid).await.unwrap();
		assert_eq!(loaded.name, "pack");
		assert!(service.active_config().is_some());

		service.delete_config(&cfg.uuid).await.unwrap();
		assert!(service.list_configs().await.unwrap().is_empty());
		assert!(matches!(
			service.load_config(&cfg.uuid).await,
			Err(SyncError::Config(ConfigError::NotFound { .. }))
		));
	}

	#[tokio::test]
	async fn test_config_change_callback_fires() {
		let (service, _store) = service_with_store();
		let tree = TempDir::new().unwrap();
		let cfg = config(tree.path());
		service.save_config(&cfg).await.unwrap();

		let seen = Arc::new(Mutex::new(None::<String>));
		let seen2 = Arc::clone(&seen);
		service.set_on_config_changed(Box::new(move |c| {
			*seen2.lock().unwrap() = Some(c.uuid.clone());
		}));

		service.load_config(&cfg.uuid).await.unwrap();
		assert_eq!(seen.lock().unwrap().as_deref(), Some(cfg.uuid.as_str()));
	}

	#[tokio::test]
	async fn test_resolve_file_refuses_escape_and_ignored() {
		let (service, _store) = service_with_store();
		let tree = TempDir::new().unwrap();
		std::fs::write(tree.path().join(".DS_Store"), b"junk").unwrap();
		std::fs::write(tree.path().join("ok.txt"), b"fine").unwrap();
		let cfg = config(tree.path());
		service.save_config(&cfg).await.unwrap();
		service.load_config(&cfg.uuid).await.unwrap();

		let req = |p: &str| PathRequest {
			path: p.to_string(),
			mode: SyncMode::Mirror,
			direction: crate::protocol::Direction::Pull,
			files: None,
		};
		assert!(service.resolve_file(&req("../etc/passwd")).await.is_err());
		assert!(service.resolve_file(&req(".DS_Store")).await.is_err());
		match service.resolve_file(&req("ok.txt")).await.unwrap() {
			FileSource::Disk { size, name, .. } => {
				assert_eq!(size, 4);
				assert_eq!(name, "ok.txt");
			}
			_ => panic!("expected disk source"),
		}
	}

	#[tokio::test]
	async fn test_sync_request_requires_running() {
		let (service, _store) = service_with_store();
		let tree = TempDir::new().unwrap();
		let cfg = config(tree.path());
		service.save_config(&cfg).await.unwrap();
		service.load_config(&cfg.uuid).await.unwrap();

		let req = PathRequest {
			path: String::new(),
			mode: SyncMode::Mirror,
			direction: crate::protocol::Direction::Pull,
			files: None,
		};
		assert!(matches!(
			service.handle_sync_request(&req).await,
			Err(SyncError::ServiceNotRunning)
		));

		service.start().unwrap();
		let resp = service.handle_sync_request(&req).await.unwrap();
		assert!(resp.success);
	}
}

// vim: ts=4
