//! Pack archives: a folder travelling as one ZIP.
//!
//! The server builds a deflate ZIP of the folder with entry names relative
//! to it and caches the bytes in the blob store keyed by the folder digest,
//! so an unchanged source serves the previously produced archive. The
//! client unpacks through a temporary directory and replaces the folder
//! wholesale.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::digest;
use crate::error::{SyncError, TransferError};
use crate::logging::*;
use crate::storage::Storage;

fn archive_err(folder: &str, e: impl std::fmt::Display) -> TransferError {
	TransferError::Archive { folder: folder.to_string(), message: e.to_string() }
}

/// Build a deflate ZIP of `folder_root` with entry names relative to it
pub fn build_archive(folder_root: &Path, folder_name: &str) -> Result<Vec<u8>, TransferError> {
	let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

	let mut stack = vec![folder_root.to_path_buf()];
	let mut paths: Vec<PathBuf> = Vec::new();
	while let Some(dir) = stack.pop() {
		for entry in std::fs::read_dir(&dir).map_err(|e| archive_err(folder_name, e))? {
			let entry = entry.map_err(|e| archive_err(folder_name, e))?;
			let path = entry.path();
			if path.is_dir() {
				stack.push(path.clone());
			}
			paths.push(path);
		}
	}
	paths.sort();

	for path in paths {
		let rel = entry_name(folder_root, &path);
		let meta = std::fs::metadata(&path).map_err(|e| archive_err(folder_name, e))?;
		let opts = with_unix_mode(
			SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
			&meta,
		);
		if meta.is_dir() {
			writer.add_directory(rel, opts).map_err(|e| archive_err(folder_name, e))?;
		} else if meta.is_file() {
			writer.start_file(rel, opts).map_err(|e| archive_err(folder_name, e))?;
			let bytes = std::fs::read(&path).map_err(|e| archive_err(folder_name, e))?;
			writer.write_all(&bytes).map_err(|e| archive_err(folder_name, e))?;
		}
	}

	let cursor = writer.finish().map_err(|e| archive_err(folder_name, e))?;
	Ok(cursor.into_inner())
}

fn entry_name(root: &Path, path: &Path) -> String {
	let rel = path.strip_prefix(root).unwrap_or(path);
	crate::rewrite::normalize(&rel.to_string_lossy())
}

#[cfg(unix)]
fn with_unix_mode(options: SimpleFileOptions, meta: &std::fs::Metadata) -> SimpleFileOptions {
	use std::os::unix::fs::PermissionsExt;
	options.unix_permissions(meta.permissions().mode())
}

#[cfg(not(unix))]
fn with_unix_mode(options: SimpleFileOptions, _meta: &std::fs::Metadata) -> SimpleFileOptions {
	options
}

/// Unpack an archive into `dest_folder`, returning the entry names.
///
/// Parent directories are recreated (0755 by default umask) and per-entry
/// Unix modes are restored. Entry names that would escape the destination
/// are rejected.
pub fn unpack_archive(
	bytes: &[u8],
	dest_folder: &Path,
	folder_name: &str,
) -> Result<Vec<String>, TransferError> {
	let mut archive =
		ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_err(folder_name, e))?;
	std::fs::create_dir_all(dest_folder).map_err(|e| archive_err(folder_name, e))?;

	let mut names = Vec::with_capacity(archive.len());
	for i in 0..archive.len() {
		let mut entry = archive.by_index(i).map_err(|e| archive_err(folder_name, e))?;
		let rel = match entry.enclosed_name() {
			Some(p) => p,
			None => {
				return Err(archive_err(folder_name, format!("unsafe entry '{}'", entry.name())))
			}
		};
		let dest = dest_folder.join(&rel);
		names.push(crate::rewrite::normalize(&rel.to_string_lossy()));

		if entry.is_dir() {
			std::fs::create_dir_all(&dest).map_err(|e| archive_err(folder_name, e))?;
		} else {
			if let Some(parent) = dest.parent() {
				std::fs::create_dir_all(parent).map_err(|e| archive_err(folder_name, e))?;
			}
			let mut out = std::fs::File::create(&dest).map_err(|e| archive_err(folder_name, e))?;
			let mut buf = Vec::with_capacity(entry.size() as usize);
			entry.read_to_end(&mut buf).map_err(|e| archive_err(folder_name, e))?;
			out.write_all(&buf).map_err(|e| archive_err(folder_name, e))?;
		}
		restore_unix_mode(&dest, entry.unix_mode());
	}
	Ok(names)
}

#[cfg(unix)]
fn restore_unix_mode(path: &Path, mode: Option<u32>) {
	use std::os::unix::fs::PermissionsExt;
	if let Some(mode) = mode {
		if mode != 0 {
			let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
		}
	}
}

#[cfg(not(unix))]
fn restore_unix_mode(_path: &Path, _mode: Option<u32>) {}

/// Temporary directory removed on all exit paths
pub struct TempDirGuard {
	path: PathBuf,
}

impl TempDirGuard {
	/// Create `<base>/.packsync-tmp-<random>`
	pub fn new(base: &Path) -> std::io::Result<Self> {
		let path = base.join(format!(".packsync-tmp-{}", crate::config::new_uuid()));
		std::fs::create_dir_all(&path)?;
		Ok(TempDirGuard { path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for TempDirGuard {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.path);
	}
}

/// Server-side archive cache over the blob store.
///
/// Keys: `packs/<folder>.zip` for the bytes, `packs/<folder>.md5` for the
/// digest the bytes were built from.
pub struct PackCache<'a> {
	storage: &'a dyn Storage,
}

impl<'a> PackCache<'a> {
	pub fn new(storage: &'a dyn Storage) -> Self {
		PackCache { storage }
	}

	fn zip_key(folder: &str) -> String {
		format!("packs/{}.zip", folder.replace('/', "_"))
	}

	fn digest_key(folder: &str) -> String {
		format!("packs/{}.md5", folder.replace('/', "_"))
	}

	/// Current archive bytes and digest for the folder.
	///
	/// Recomputes the folder digest; when it matches the cached one (or the
	/// seed digest carried by the configuration) the stored bytes are
	/// served, otherwise a fresh archive is built and the cache refreshed.
	pub async fn archive_for(
		&self,
		folder_root: &Path,
		folder_name: &str,
		seed_digest: Option<&str>,
	) -> Result<(Vec<u8>, String), SyncError> {
		let current = digest::folder_digest(folder_root)
			.await
			.map_err(|e| archive_err(folder_name, e))?;

		let cached_digest = match self.storage.load_raw(&Self::digest_key(folder_name)).await {
			Ok(bytes) => Some(String::from_utf8_lossy(&bytes).trim().to_string()),
			Err(_) => seed_digest.map(|s| s.to_string()),
		};

		if cached_digest.as_deref() == Some(current.as_str()) {
			if let Ok(bytes) = self.storage.load_raw(&Self::zip_key(folder_name)).await {
				debug!("pack cache hit for '{}' ({})", folder_name, current);
				return Ok((bytes, current));
			}
		}

		info!("rebuilding pack archive for '{}'", folder_name);
		let bytes = build_archive(folder_root, folder_name)?;
		self.storage.save_raw(&Self::zip_key(folder_name), &bytes).await.map_err(SyncError::from)?;
		self.storage
			.save_raw(&Self::digest_key(folder_name), current.as_bytes())
			.await
			.map_err(SyncError::from)?;
		Ok((bytes, current))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::DiskStorage;
	use tempfile::TempDir;

	fn make_folder(dir: &TempDir) -> PathBuf {
		let root = dir.path().join("mods");
		std::fs::create_dir(&root).unwrap();
		std::fs::write(root.join("a"), b"alpha").unwrap();
		std::fs::write(root.join("b"), b"beta").unwrap();
		std::fs::create_dir(root.join("sub")).unwrap();
		std::fs::write(root.join("sub/c"), b"gamma").unwrap();
		root
	}

	#[test]
	fn test_archive_round_trip() {
		let dir = TempDir::new().unwrap();
		let root = make_folder(&dir);

		let bytes = build_archive(&root, "mods").unwrap();
		let dest = dir.path().join("out");
		let names = unpack_archive(&bytes, &dest, "mods").unwrap();

		assert!(names.contains(&"a".to_string()));
		assert!(names.contains(&"sub/c".to_string()));
		assert_eq!(std::fs::read(dest.join("a")).unwrap(), b"alpha");
		assert_eq!(std::fs::read(dest.join("sub/c")).unwrap(), b"gamma");
	}

	#[cfg(unix)]
	#[test]
	fn test_archive_preserves_unix_mode() {
		use std::os::unix::fs::PermissionsExt;
		let dir = TempDir::new().unwrap();
		let root = make_folder(&dir);
		std::fs::set_permissions(root.join("a"), std::fs::Permissions::from_mode(0o755)).unwrap();

		let bytes = build_archive(&root, "mods").unwrap();
		let dest = dir.path().join("out");
		unpack_archive(&bytes, &dest, "mods").unwrap();

		let mode = std::fs::metadata(dest.join("a")).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, 0o755);
	}

	#[tokio::test]
	async fn test_pack_cache_reuses_unchanged_archive() {
		let dir = TempDir::new().unwrap();
		let root = make_folder(&dir);
		let store_dir = TempDir::new().unwrap();
		let storage = DiskStorage::new(store_dir.path());
		let cache = PackCache::new(&storage);

		let (bytes1, digest1) = cache.archive_for(&root, "mods", None).await.unwrap();
		let (bytes2, digest2) = cache.archive_for(&root, "mods", None).await.unwrap();
		assert_eq!(digest1, digest2);
		assert_eq!(bytes1, bytes2, "unchanged source must serve cached bytes");

		// Any file change invalidates the cache
		std::fs::write(root.join("b"), b"changed").unwrap();
		let (_bytes3, digest3) = cache.archive_for(&root, "mods", None).await.unwrap();
		assert_ne!(digest1, digest3);
	}

	#[test]
	fn test_temp_dir_guard_removes_on_drop() {
		let dir = TempDir::new().unwrap();
		let kept;
		{
			let guard = TempDirGuard::new(dir.path()).unwrap();
			kept = guard.path().to_path_buf();
			assert!(kept.is_dir());
		}
		assert!(!kept.exists());
	}
}

// vim: ts=4
