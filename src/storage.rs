//! Key→bytes blob store over a base directory.
//!
//! The store accepts forward-slash sub-keys (`packs/mods.zip`) and never
//! lets a key escape the base directory. JSON serialization is layered on
//! top of the raw byte contract through [`StorageExt`], so the trait stays
//! object-safe and tests can substitute their own implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Minimal blob-store capability the service depends on
#[async_trait]
pub trait Storage: Send + Sync {
	async fn save_raw(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

	async fn load_raw(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> bool;

	/// All keys in the store, recursive, forward-slash-normalized
	async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// JSON auto-serialization over any [`Storage`]
#[async_trait]
pub trait StorageExt: Storage {
	async fn save_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StorageError> {
		let bytes = serde_json::to_vec_pretty(value)
			.map_err(|e| StorageError::Serde { key: key.to_string(), source: e })?;
		self.save_raw(key, &bytes).await
	}

	async fn load_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<T, StorageError> {
		let bytes = self.load_raw(key).await?;
		serde_json::from_slice(&bytes)
			.map_err(|e| StorageError::Serde { key: key.to_string(), source: e })
	}
}

impl<S: Storage + ?Sized> StorageExt for S {}

/// Production blob store over a base directory
pub struct DiskStorage {
	base_dir: PathBuf,
}

impl DiskStorage {
	pub fn new(base_dir: impl Into<PathBuf>) -> Self {
		DiskStorage { base_dir: base_dir.into() }
	}

	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	/// Resolve a key to a path inside the base directory.
	///
	/// Rejects empty keys, absolute keys and any `..` component.
	fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
		let cleaned = key.replace('\\', "/");
		let rel = Path::new(&cleaned);
		if cleaned.trim().is_empty() || rel.is_absolute() {
			return Err(StorageError::InvalidKey { key: key.to_string() });
		}
		for comp in rel.components() {
			match comp {
				Component::Normal(_) | Component::CurDir => {}
				_ => return Err(StorageError::InvalidKey { key: key.to_string() }),
			}
		}
		Ok(self.base_dir.join(rel))
	}
}

fn io_err(key: &str, source: std::io::Error) -> StorageError {
	StorageError::Io { key: key.to_string(), source }
}

#[async_trait]
impl Storage for DiskStorage {
	async fn save_raw(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
		let path = self.resolve(key)?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(|e| io_err(key, e))?;
		}
		tokio::fs::write(&path, bytes).await.map_err(|e| io_err(key, e))
	}

	async fn load_raw(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.resolve(key)?;
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(StorageError::NotFound { key: key.to_string() })
			}
			Err(e) => Err(io_err(key, e)),
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.resolve(key)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(StorageError::NotFound { key: key.to_string() })
			}
			Err(e) => Err(io_err(key, e)),
		}
	}

	async fn exists(&self, key: &str) -> bool {
		match self.resolve(key) {
			Ok(path) => path.is_file(),
			Err(_) => false,
		}
	}

	async fn list(&self) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		if self.base_dir.is_dir() {
			walk(&self.base_dir, "", &mut keys).map_err(|e| io_err("", e))?;
		}
		keys.sort();
		Ok(keys)
	}
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name().to_string_lossy().into_owned();
		let key = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };
		let ft = entry.file_type()?;
		if ft.is_dir() {
			walk(&entry.path(), &key, out)?;
		} else if ft.is_file() {
			out.push(key);
		}
	}
	Ok(())
}


// vim: ts=4
