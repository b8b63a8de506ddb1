//! Content digests for files and folders.
//!
//! Every digest in the system flows through this module, so the algorithm is
//! a single configuration point. The wire protocol carries MD5 hex digests;
//! MD5 is adequate for unintentional change detection, which is all the diff
//! engine needs.

use md5::{Digest, Md5};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Copy buffer size shared with the transfer path
pub const BUF_SIZE: usize = 32 * 1024;

/// Digest a byte slice, returning lowercase hex
pub fn bytes_digest(buf: &[u8]) -> String {
	let mut hasher = Md5::new();
	hasher.update(buf);
	hex::encode(hasher.finalize())
}

/// Digest a file by streaming its contents.
///
/// A zero-byte file yields the canonical empty-input digest, so equal
/// contents always produce equal digests regardless of size.
pub async fn file_digest(path: &Path) -> io::Result<String> {
	let mut file = tokio::fs::File::open(path).await?;
	let mut hasher = Md5::new();
	let mut buf = vec![0u8; BUF_SIZE];
	loop {
		let n = file.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hex::encode(hasher.finalize()))
}

/// Aggregate digest of a directory tree.
///
/// Walks files in lexicographic order of their forward-slash relative paths,
/// concatenates the per-file hex digests and digests the concatenation. Used
/// only as the pack-archive cache key, never exposed as a file digest.
pub async fn folder_digest(path: &Path) -> io::Result<String> {
	let mut files: Vec<std::path::PathBuf> = Vec::new();
	collect_files(path, &mut files)?;
	files.sort_by(|a, b| rel_key(path, a).cmp(&rel_key(path, b)));

	let mut concat = String::new();
	for file in &files {
		concat.push_str(&file_digest(file).await?);
	}
	Ok(bytes_digest(concat.as_bytes()))
}

fn rel_key(base: &Path, path: &Path) -> String {
	let rel = path.strip_prefix(base).unwrap_or(path);
	let mut key = String::new();
	for comp in rel.components() {
		if !key.is_empty() {
			key.push('/');
		}
		key.push_str(&comp.as_os_str().to_string_lossy());
	}
	key
}

fn collect_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> io::Result<()> {
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let path = entry.path();
		let meta = entry.metadata()?;
		if meta.is_dir() {
			collect_files(&path, out)?;
		} else if meta.is_file() {
			out.push(path);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::TempDir;

	/// MD5 of empty input
	const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

	#[test]
	fn test_bytes_digest_known_value() {
		// Well-known MD5 test vector
		assert_eq!(bytes_digest(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
		assert_eq!(bytes_digest(b""), EMPTY_MD5);
	}

	#[test]
	fn test_bytes_digest_is_lowercase_hex() {
		let d = bytes_digest(b"some data");
		assert_eq!(d.len(), 32);
		assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
	}

	#[tokio::test]
	async fn test_file_digest_matches_bytes_digest() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("f.bin");
		let content = b"The quick brown fox jumps over the lazy dog";
		std::fs::File::create(&path).unwrap().write_all(content).unwrap();

		assert_eq!(file_digest(&path).await.unwrap(), bytes_digest(content));
	}

	#[tokio::test]
	async fn test_file_digest_empty_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("empty");
		std::fs::File::create(&path).unwrap();

		assert_eq!(file_digest(&path).await.unwrap(), EMPTY_MD5);
	}

	#[tokio::test]
	async fn test_file_digest_streams_large_input() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("large.bin");
		// Larger than one copy buffer so the loop runs more than once
		let content = vec![0xABu8; BUF_SIZE * 3 + 17];
		std::fs::write(&path, &content).unwrap();

		assert_eq!(file_digest(&path).await.unwrap(), bytes_digest(&content));
	}

	#[tokio::test]
	async fn test_folder_digest_changes_with_content() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
		std::fs::write(dir.path().join("b.txt"), b"bbb").unwrap();

		let before = folder_digest(dir.path()).await.unwrap();
		let again = folder_digest(dir.path()).await.unwrap();
		assert_eq!(before, again, "folder digest must be deterministic");

		std::fs::write(dir.path().join("b.txt"), b"changed").unwrap();
		let after = folder_digest(dir.path()).await.unwrap();
		assert_ne!(before, after);
	}

	#[tokio::test]
	async fn test_folder_digest_ignores_walk_order() {
		let d1 = TempDir::new().unwrap();
		std::fs::create_dir(d1.path().join("sub")).unwrap();
		std::fs::write(d1.path().join("sub/z.txt"), b"z").unwrap();
		std::fs::write(d1.path().join("a.txt"), b"a").unwrap();

		let d2 = TempDir::new().unwrap();
		std::fs::write(d2.path().join("a.txt"), b"a").unwrap();
		std::fs::create_dir(d2.path().join("sub")).unwrap();
		std::fs::write(d2.path().join("sub/z.txt"), b"z").unwrap();

		assert_eq!(
			folder_digest(d1.path()).await.unwrap(),
			folder_digest(d2.path()).await.unwrap()
		);
	}
}

// vim: ts=4
