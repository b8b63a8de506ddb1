//! The diff engine: classifies every entry of a folder pair into
//! transfer / delete / ignore / keep.
//!
//! Server entries are keyed by server-relative paths, client entries by
//! client-relative paths; redirects bridge the two namespaces. Ignore takes
//! precedence over delete: a client file matching the ignore list survives a
//! mirror sync even when absent on the server.

use crate::config::{FolderRedirect, SyncMode};
use crate::rewrite::{apply_redirect, IgnoreList, RewriteDirection};
use crate::scan::{EntrySet, FileEntry};

/// Classified folder diff, valid for a single request
#[derive(Debug, Default)]
pub struct SyncPlan {
	/// Server entries to send, in server namespace
	pub to_transfer: Vec<FileEntry>,

	/// Client-relative paths to remove (mirror/pack only)
	pub to_delete: Vec<String>,

	/// Server-relative paths excluded by the ignore list
	pub ignored: Vec<String>,

	/// Server-relative paths already identical on the client
	pub unchanged: Vec<String>,
}

impl SyncPlan {
	pub fn transfer_count(&self) -> usize {
		self.to_transfer.len()
	}

	pub fn delete_count(&self) -> usize {
		self.to_delete.len()
	}

	pub fn is_noop(&self) -> bool {
		self.to_transfer.is_empty() && self.to_delete.is_empty()
	}
}

/// Build the sync plan for one folder.
///
/// Pack folders never reach this: pack mode skips per-file diffing and
/// travels as a whole archive.
pub fn build_plan(
	server_entries: &EntrySet,
	client_entries: &EntrySet,
	ignore_list: &[String],
	redirects: &[FolderRedirect],
	mode: SyncMode,
) -> SyncPlan {
	let ignore = IgnoreList::new(ignore_list);
	let mut plan = SyncPlan::default();

	// Client-side extras become deletions, unless ignored.
	if mode == SyncMode::Mirror {
		for (client_path, _entry) in client_entries {
			let server_path =
				apply_redirect(client_path, redirects, RewriteDirection::ClientToServer);
			if !server_entries.contains_key(&server_path) && !ignore.matches(client_path) {
				plan.to_delete.push(client_path.clone());
			}
		}
		// Directories last so they are empty by the time they are removed
		plan.to_delete.sort_by(|a, b| b.len().cmp(&a.len()));
	}

	for (server_path, entry) in server_entries {
		if ignore.matches(server_path) {
			plan.ignored.push(server_path.clone());
			continue;
		}
		let client_path = apply_redirect(server_path, redirects, RewriteDirection::ServerToClient);
		match client_entries.get(&client_path) {
			Some(client_entry) if client_entry.digest == entry.digest => {
				plan.unchanged.push(server_path.clone());
			}
			_ => plan.to_transfer.push(entry.clone()),
		}
	}

	plan
}


// vim: ts=4
