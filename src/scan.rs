//! Folder scanning: builds the per-folder entry sets the diff engine
//! consumes.
//!
//! Entries are keyed by forward-slash paths relative to `sync_dir`,
//! including the folder component, so redirect rewriting applies to the
//! whole path. A missing folder yields an empty set, not an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::digest;
use crate::rewrite::normalize;

/// One entry of a folder scan. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
	/// Forward-slash path relative to `sync_dir`
	pub relative_path: String,

	/// MD5 hex lowercase; empty for directories
	pub digest: String,

	pub size: u64,

	pub mtime_unix: i64,

	pub is_dir: bool,
}

/// Ordered entry set for one folder
pub type EntrySet = BTreeMap<String, FileEntry>;

/// Scan one sync folder under `sync_dir`.
///
/// `folder` is the folder name relative to `sync_dir`; the empty string
/// scans the whole tree (the virtual folder used when no folders are
/// configured).
pub async fn scan_folder(sync_dir: &Path, folder: &str) -> io::Result<EntrySet> {
	let folder = normalize(folder);
	let root = if folder.is_empty() { sync_dir.to_path_buf() } else { sync_dir.join(&folder) };

	let mut entries = EntrySet::new();
	if !root.is_dir() {
		return Ok(entries);
	}

	let mut pending = vec![root.clone()];
	while let Some(dir) = pending.pop() {
		for entry in std::fs::read_dir(&dir)? {
			let entry = entry?;
			let name = entry.file_name().to_string_lossy().into_owned();
			// Our own artifacts never take part in a sync
			if name == ".packsync" || name.starts_with(".packsync-tmp-") {
				continue;
			}
			let path = entry.path();
			let meta = entry.metadata()?;
			let rel = relative_key(&folder, &root, &path);

			if meta.is_dir() {
				entries.insert(
					rel.clone(),
					FileEntry {
						relative_path: rel,
						digest: String::new(),
						size: 0,
						mtime_unix: mtime_unix(&meta),
						is_dir: true,
					},
				);
				pending.push(path);
			} else if meta.is_file() {
				let digest = digest::file_digest(&path).await?;
				entries.insert(
					rel.clone(),
					FileEntry {
						relative_path: rel,
						digest,
						size: meta.len(),
						mtime_unix: mtime_unix(&meta),
						is_dir: false,
					},
				);
			}
			// Symlinks and special files are not served
		}
	}
	Ok(entries)
}

/// Map of relative path to digest, as carried by `md5_map_response`
pub fn digest_map(entries: &EntrySet) -> BTreeMap<String, String> {
	entries
		.values()
		.filter(|e| !e.is_dir)
		.map(|e| (e.relative_path.clone(), e.digest.clone()))
		.collect()
}

fn relative_key(folder: &str, root: &Path, path: &Path) -> String {
	let rel = path.strip_prefix(root).unwrap_or(path);
	let rel = normalize(&rel.to_string_lossy());
	if folder.is_empty() {
		rel
	} else if rel.is_empty() {
		folder.to_string()
	} else {
		format!("{}/{}", folder, rel)
	}
}

fn mtime_unix(meta: &std::fs::Metadata) -> i64 {
	meta.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn scan(dir: &TempDir, folder: &str) -> EntrySet {
		scan_folder(dir.path(), folder).await.unwrap()
	}

	#[tokio::test]
	async fn test_scan_missing_folder_is_empty() {
		let dir = TempDir::new().unwrap();
		assert!(scan(&dir, "nope").await.is_empty());
	}

	#[tokio::test]
	async fn test_scan_keys_include_folder_prefix() {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir(dir.path().join("aaa")).unwrap();
		std::fs::write(dir.path().join("aaa/test1.txt"), b"test1 content").unwrap();
		std::fs::create_dir(dir.path().join("aaa/sub")).unwrap();
		std::fs::write(dir.path().join("aaa/sub/deep.txt"), b"deep").unwrap();

		let entries = scan(&dir, "aaa").await;
		assert!(entries.contains_key("aaa/test1.txt"));
		assert!(entries.contains_key("aaa/sub"));
		assert!(entries.contains_key("aaa/sub/deep.txt"));

		let e = &entries["aaa/test1.txt"];
		assert!(!e.is_dir);
		assert_eq!(e.size, 13);
		assert_eq!(e.digest, crate::digest::bytes_digest(b"test1 content"));
		assert!(entries["aaa/sub"].is_dir);
		assert!(entries["aaa/sub"].digest.is_empty());
	}

	#[tokio::test]
	async fn test_scan_virtual_folder_covers_tree() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("top.txt"), b"top").unwrap();
		std::fs::create_dir(dir.path().join("bbb")).unwrap();
		std::fs::write(dir.path().join("bbb/in.txt"), b"in").unwrap();

		let entries = scan(&dir, "").await;
		assert!(entries.contains_key("top.txt"));
		assert!(entries.contains_key("bbb/in.txt"));
	}

	#[tokio::test]
	async fn test_scan_skips_own_artifacts() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("real.txt"), b"real").unwrap();
		std::fs::create_dir(dir.path().join(".packsync")).unwrap();
		std::fs::write(dir.path().join(".packsync/state"), b"x").unwrap();
		std::fs::create_dir(dir.path().join(".packsync-tmp-abc")).unwrap();

		let entries = scan(&dir, "").await;
		assert_eq!(entries.len(), 1);
		assert!(entries.contains_key("real.txt"));
	}

	#[tokio::test]
	async fn test_digest_map_skips_directories() {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir(dir.path().join("f")).unwrap();
		std::fs::write(dir.path().join("f/x.txt"), b"x").unwrap();
		std::fs::create_dir(dir.path().join("f/empty")).unwrap();

		let entries = scan(&dir, "f").await;
		let map = digest_map(&entries);
		assert_eq!(map.len(), 1);
		assert!(map.contains_key("f/x.txt"));
	}
}

// vim: ts=4
