//! # PackSync - Configurable File Synchronization Service
//!
//! PackSync is a long-lived server that exposes named sync configurations
//! (pack name, version, root directory, per-folder sync modes, path
//! redirects, ignore globs) and streams whole files to many concurrent
//! clients over persistent TCP connections. Clients connect, receive the
//! active configuration, diff against their local tree and pull.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use packsync::service::SyncService;
//! use packsync::storage::DiskStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SyncService::new(Arc::new(DiskStorage::new("./store")));
//!     let config = service.seed_default_config("mypack", "1.0", "./data".into()).await?;
//!     service.start()?;
//!     let addr = service.start_server().await?;
//!     println!("serving '{}' on {}", config.name, addr);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod archive;
pub mod client;
pub mod config;
pub mod diff;
pub mod digest;
pub mod error;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod rewrite;
pub mod scan;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;
pub mod transfer;

// Re-export commonly used types
pub use client::SyncClient;
pub use config::{ConfigKind, FolderRedirect, SyncConfig, SyncFolder, SyncMode};
pub use error::{ConfigError, NetworkError, ProtocolError, StorageError, SyncError, TransferError};
pub use progress::{ProgressEvent, TransferState};
pub use scan::FileEntry;
pub use service::SyncService;
pub use storage::{DiskStorage, Storage, StorageExt};
pub use transfer::FolderOutcome;

// vim: ts=4
