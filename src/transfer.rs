//! The transfer engine: executes a folder's sync plan in one of the four
//! modes.
//!
//! The server never mutates its tree; all writes happen on the client side
//! below its own `sync_dir`. Errors on a single file are logged and the
//! folder continues; folder-level errors abort the folder and surface to
//! the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::archive::{unpack_archive, TempDirGuard};
use crate::config::{SyncConfig, SyncFolder, SyncMode};
use crate::diff::build_plan;
use crate::error::{ProtocolError, SyncError, TransferError};
use crate::logging::*;
use crate::progress::ProgressSender;
use crate::protocol::messages::{
	Envelope, FileBegin, Md5MapResponse, PathRequest, MSG_FILE_REQUEST, MSG_MD5_REQUEST,
};
use crate::protocol::{Connection, Direction};
use crate::rewrite::{apply_redirect, normalize, RewriteDirection};
use crate::scan::{scan_folder, EntrySet, FileEntry};
use crate::storage::Storage;

/// Result counters for one folder
#[derive(Debug, Default, Clone, Copy)]
pub struct FolderOutcome {
	pub transferred: usize,
	pub deleted: usize,
	pub skipped: usize,
	pub failed: usize,
}

/// Per-file mode selection for `auto` folders
pub fn auto_mode_for(path: &str) -> SyncMode {
	let ext = Path::new(path)
		.extension()
		.map(|e| e.to_string_lossy().to_ascii_lowercase())
		.unwrap_or_default();
	match ext.as_str() {
		"zip" | "rar" | "7z" => SyncMode::Pack,
		"exe" | "dll" | "jar" => SyncMode::Mirror,
		_ => SyncMode::Push,
	}
}

/// Pull one configured folder from the server into `sync_dir`
pub async fn pull_folder(
	conn: &mut Connection,
	uuid: &str,
	folder: &SyncFolder,
	config: &SyncConfig,
	sync_dir: &Path,
	storage: &dyn Storage,
	progress: &ProgressSender,
) -> Result<FolderOutcome, SyncError> {
	match folder.mode {
		SyncMode::Pack => pull_pack_folder(conn, uuid, folder, config, sync_dir, storage, progress).await,
		_ => pull_diffed_folder(conn, uuid, folder, config, sync_dir, progress).await,
	}
}

/// mirror / push / auto: per-file diff and transfer
async fn pull_diffed_folder(
	conn: &mut Connection,
	uuid: &str,
	folder: &SyncFolder,
	config: &SyncConfig,
	sync_dir: &Path,
	progress: &ProgressSender,
) -> Result<FolderOutcome, SyncError> {
	let server_map = request_md5_map(conn, uuid, &folder.path, folder.mode).await?;
	let server_entries = entries_from_map(&server_map);

	let client_folder =
		apply_redirect(&folder.path, &config.folder_redirects, RewriteDirection::ServerToClient);
	let client_entries: EntrySet = scan_folder(sync_dir, &client_folder)
		.await
		.map_err(|e| folder_err(&folder.path, e))?
		.into_iter()
		.filter(|(_, e)| !e.is_dir)
		.collect();

	// Deletion only happens for authoritative copies
	let plan_mode = match folder.mode {
		SyncMode::Mirror => SyncMode::Mirror,
		_ => SyncMode::Push,
	};
	let plan = build_plan(
		&server_entries,
		&client_entries,
		&config.ignore_list,
		&config.folder_redirects,
		plan_mode,
	);

	let mut outcome = FolderOutcome::default();
	outcome.skipped = plan.unchanged.len();

	for entry in &plan.to_transfer {
		match pull_one_file(conn, uuid, entry, folder.mode, config, sync_dir, progress).await {
			Ok(()) => outcome.transferred += 1,
			Err(e) => {
				warn!("skipping '{}': {}", entry.relative_path, e);
				outcome.failed += 1;
			}
		}
	}

	// auto: binaries are replaced even when the digest already matches
	if folder.mode == SyncMode::Auto {
		for path in &plan.unchanged {
			if auto_mode_for(path) != SyncMode::Mirror {
				continue;
			}
			if let Some(entry) = server_entries.get(path) {
				outcome.skipped -= 1;
				match pull_one_file(conn, uuid, entry, folder.mode, config, sync_dir, progress).await
				{
					Ok(()) => outcome.transferred += 1,
					Err(e) => {
						warn!("skipping '{}': {}", path, e);
						outcome.failed += 1;
					}
				}
			}
		}
	}

	// Deletions run after all transfers for the folder completed
	for path in &plan.to_delete {
		match tokio::fs::remove_file(sync_dir.join(path)).await {
			Ok(()) => outcome.deleted += 1,
			Err(e) => warn!("could not delete '{}': {}", path, e),
		}
	}
	if !plan.to_delete.is_empty() {
		prune_empty_dirs(sync_dir, &client_folder);
	}

	Ok(outcome)
}

/// pack: the folder travels as one archive and is replaced wholesale
async fn pull_pack_folder(
	conn: &mut Connection,
	uuid: &str,
	folder: &SyncFolder,
	config: &SyncConfig,
	sync_dir: &Path,
	storage: &dyn Storage,
	progress: &ProgressSender,
) -> Result<FolderOutcome, SyncError> {
	let archive_name = format!("{}.zip", folder.path);
	let server_map = request_md5_map(conn, uuid, &folder.path, SyncMode::Pack).await?;
	let pack_digest = server_map
		.get(&archive_name)
		.cloned()
		.ok_or_else(|| folder_err(&folder.path, "server returned no pack digest"))?;

	let state_key = format!("packstate/{}", folder.path.replace('/', "_"));
	let applied = match storage.load_raw(&state_key).await {
		Ok(bytes) => Some(String::from_utf8_lossy(&bytes).trim().to_string()),
		Err(_) => None,
	};

	let client_folder =
		apply_redirect(&folder.path, &config.folder_redirects, RewriteDirection::ServerToClient);
	let dest = sync_dir.join(&client_folder);

	// The archive always travels; unpacking is skipped when the applied
	// digest already matches.
	tokio::fs::create_dir_all(sync_dir).await.map_err(|e| folder_err(&folder.path, e))?;
	let tmp = TempDirGuard::new(sync_dir).map_err(|e| folder_err(&folder.path, e))?;
	let zip_path = tmp.path().join(&archive_name.replace('/', "_"));

	request_file(conn, uuid, &archive_name, SyncMode::Pack, &zip_path, progress).await?;

	let mut outcome = FolderOutcome::default();
	outcome.transferred = 1;

	if applied.as_deref() == Some(pack_digest.as_str()) && dest.is_dir() {
		debug!("pack '{}' unchanged ({}), keeping folder", folder.path, pack_digest);
		outcome.skipped = 1;
		return Ok(outcome);
	}

	let bytes = tokio::fs::read(&zip_path).await.map_err(|e| folder_err(&folder.path, e))?;
	let names = unpack_archive(&bytes, &dest, &folder.path)?;

	// Wholesale replace: anything not in the archive goes
	let have: EntrySet = scan_folder(sync_dir, &client_folder)
		.await
		.map_err(|e| folder_err(&folder.path, e))?;
	let keep: std::collections::BTreeSet<String> =
		names.iter().map(|n| normalize(&format!("{}/{}", client_folder, n))).collect();
	let mut extras: Vec<&FileEntry> =
		have.values().filter(|e| !e.is_dir && !keep.contains(&e.relative_path)).collect();
	extras.sort_by(|a, b| b.relative_path.len().cmp(&a.relative_path.len()));
	for entry in extras {
		match tokio::fs::remove_file(sync_dir.join(&entry.relative_path)).await {
			Ok(()) => outcome.deleted += 1,
			Err(e) => warn!("could not delete '{}': {}", entry.relative_path, e),
		}
	}
	prune_empty_dirs(sync_dir, &client_folder);

	storage
		.save_raw(&state_key, pack_digest.as_bytes())
		.await
		.map_err(SyncError::from)?;
	Ok(outcome)
}

/// Request and apply a single server file below the client `sync_dir`
async fn pull_one_file(
	conn: &mut Connection,
	uuid: &str,
	entry: &FileEntry,
	mode: SyncMode,
	config: &SyncConfig,
	sync_dir: &Path,
	progress: &ProgressSender,
) -> Result<(), SyncError> {
	let client_path = apply_redirect(
		&entry.relative_path,
		&config.folder_redirects,
		RewriteDirection::ServerToClient,
	);
	let dest = sync_dir.join(&client_path);
	request_file(conn, uuid, &entry.relative_path, mode, &dest, progress).await
}

async fn request_md5_map(
	conn: &mut Connection,
	uuid: &str,
	folder: &str,
	mode: SyncMode,
) -> Result<BTreeMap<String, String>, SyncError> {
	let req = PathRequest {
		path: folder.to_string(),
		mode,
		direction: Direction::Pull,
		files: None,
	};
	conn.write_message(&Envelope::new(MSG_MD5_REQUEST, uuid, &req)).await?;
	let resp = conn.read_message().await?;
	let body: Md5MapResponse = resp.parse_payload()?;
	if !body.success {
		return Err(folder_err(folder, body.message));
	}
	Ok(body.md5_map)
}

async fn request_file(
	conn: &mut Connection,
	uuid: &str,
	server_path: &str,
	mode: SyncMode,
	dest: &Path,
	progress: &ProgressSender,
) -> Result<(), SyncError> {
	let req = PathRequest {
		path: server_path.to_string(),
		mode,
		direction: Direction::Pull,
		files: None,
	};
	conn.write_message(&Envelope::new(MSG_FILE_REQUEST, uuid, &req)).await?;
	let resp = conn.read_message().await?;
	let begin: FileBegin = resp.parse_payload()?;
	if !begin.success {
		return Err(SyncError::Protocol(ProtocolError::Malformed {
			message: format!("server refused '{}': {}", server_path, begin.message),
		}));
	}
	conn.recv_file(dest, begin.size, &begin.name, progress).await?;
	Ok(())
}

fn entries_from_map(map: &BTreeMap<String, String>) -> EntrySet {
	map.iter()
		.map(|(path, digest)| {
			(
				path.clone(),
				FileEntry {
					relative_path: path.clone(),
					digest: digest.clone(),
					size: 0,
					mtime_unix: 0,
					is_dir: false,
				},
			)
		})
		.collect()
}

fn folder_err(folder: &str, e: impl std::fmt::Display) -> SyncError {
	SyncError::Transfer(TransferError::Folder {
		folder: folder.to_string(),
		message: e.to_string(),
	})
}

/// Remove directories left empty by deletions, bottom-up
fn prune_empty_dirs(sync_dir: &Path, folder: &str) {
	let root = if folder.is_empty() { sync_dir.to_path_buf() } else { sync_dir.join(folder) };
	let mut dirs: Vec<PathBuf> = Vec::new();
	collect_dirs(&root, &mut dirs);
	dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));
	for dir in dirs {
		// Fails on non-empty directories, which is exactly what we want
		let _ = std::fs::remove_dir(&dir);
	}
}

fn collect_dirs(dir: &Path, out: &mut Vec<PathBuf>) {
	if let Ok(entries) = std::fs::read_dir(dir) {
		for entry in entries.flatten() {
			let path = entry.path();
			if path.is_dir() {
				collect_dirs(&path, out);
				out.push(path);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_auto_mode_by_extension() {
		assert_eq!(auto_mode_for("bundle.zip"), SyncMode::Pack);
		assert_eq!(auto_mode_for("mods/archive.RAR"), SyncMode::Pack);
		assert_eq!(auto_mode_for("tools/x.7z"), SyncMode::Pack);
		assert_eq!(auto_mode_for("app.exe"), SyncMode::Mirror);
		assert_eq!(auto_mode_for("lib/core.dll"), SyncMode::Mirror);
		assert_eq!(auto_mode_for("mod.jar"), SyncMode::Mirror);
		assert_eq!(auto_mode_for("notes.txt"), SyncMode::Push);
		assert_eq!(auto_mode_for("README"), SyncMode::Push);
	}

	#[test]
	fn test_prune_empty_dirs() {
		let dir = tempfile::TempDir::new().unwrap();
		let root = dir.path();
		std::fs::create_dir_all(root.join("f/a/b")).unwrap();
		std::fs::create_dir_all(root.join("f/keep")).unwrap();
		std::fs::write(root.join("f/keep/file.txt"), b"x").unwrap();

		prune_empty_dirs(root, "f");
		assert!(!root.join("f/a").exists());
		assert!(root.join("f/keep/file.txt").exists());
	}
}

// vim: ts=4
