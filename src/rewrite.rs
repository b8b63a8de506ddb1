//! Path rewriting between server-relative and client-relative namespaces.
//!
//! Two concerns live here: redirect prefix rewrites (ordered, first match
//! wins) and the ignore glob filter. Both operate on normalized paths:
//! forward-slash separated, no leading slash. Normalization is mandatory
//! before any comparison, hashing or lookup.

use crate::config::FolderRedirect;
use crate::logging::*;

/// Which namespace a path is being rewritten into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteDirection {
	/// Server-relative path becomes client-relative
	ServerToClient,
	/// Client-relative path becomes server-relative
	ClientToServer,
}

/// Normalize a relative path: forward slashes only, no leading slash,
/// no trailing slash, empty `.` components dropped.
pub fn normalize(path: &str) -> String {
	let mut out = String::with_capacity(path.len());
	for part in path.replace('\\', "/").split('/') {
		if part.is_empty() || part == "." {
			continue;
		}
		if !out.is_empty() {
			out.push('/');
		}
		out.push_str(part);
	}
	out
}

/// Apply the first matching redirect to `path` and return the rewritten
/// path; paths without a matching prefix pass through unchanged.
///
/// Prefixes match component-wise: redirect source `aaa` rewrites `aaa` and
/// `aaa/x`, never `aaab/x`. Order matters.
pub fn apply_redirect(path: &str, redirects: &[FolderRedirect], direction: RewriteDirection) -> String {
	let path = normalize(path);
	for redirect in redirects {
		let (from, to) = match direction {
			RewriteDirection::ServerToClient => (&redirect.server_path, &redirect.client_path),
			RewriteDirection::ClientToServer => (&redirect.client_path, &redirect.server_path),
		};
		let from = normalize(from);
		let to = normalize(to);
		if path == from {
			return to;
		}
		if let Some(rest) = path.strip_prefix(&from) {
			if let Some(rest) = rest.strip_prefix('/') {
				return format!("{}/{}", to, rest);
			}
		}
	}
	path
}

/// Compiled ignore patterns.
///
/// Patterns are trimmed of whitespace and stray carriage returns and empties
/// are dropped. A bare pattern (no `/`) is tested against the final path
/// component as well as the whole path, so `.DS_Store` ignores
/// `aaa/.DS_Store`; a pattern containing `/` only matches the whole
/// relative path.
pub struct IgnoreList {
	patterns: Vec<(glob::Pattern, bool)>,
}

impl IgnoreList {
	pub fn new(patterns: &[String]) -> Self {
		let mut compiled = Vec::new();
		for raw in patterns {
			let cleaned = raw.trim().trim_matches('\r').trim();
			if cleaned.is_empty() {
				continue;
			}
			match glob::Pattern::new(cleaned) {
				Ok(p) => compiled.push((p, cleaned.contains('/'))),
				Err(e) => warn!("ignoring unparseable pattern '{}': {}", cleaned, e),
			}
		}
		IgnoreList { patterns: compiled }
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	/// True iff any pattern shell-matches the normalized path
	pub fn matches(&self, path: &str) -> bool {
		let path = normalize(path);
		let base = path.rsplit('/').next().unwrap_or(&path);
		for (pattern, anchored) in &self.patterns {
			if pattern.matches(&path) {
				return true;
			}
			if !anchored && pattern.matches(base) {
				return true;
			}
		}
		false
	}
}

/// One-shot convenience over [`IgnoreList`]
pub fn is_ignored(path: &str, patterns: &[String]) -> bool {
	IgnoreList::new(patterns).matches(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn redirects() -> Vec<FolderRedirect> {
		vec![
			FolderRedirect { server_path: "aaa".to_string(), client_path: "aaB".to_string() },
			FolderRedirect { server_path: "aaa".to_string(), client_path: "never".to_string() },
			FolderRedirect {
				server_path: "clientmods".to_string(),
				client_path: "mods".to_string(),
			},
		]
	}

	#[test]
	fn test_normalize() {
		assert_eq!(normalize("a/b/c"), "a/b/c");
		assert_eq!(normalize("/a/b/"), "a/b");
		assert_eq!(normalize("a\\b\\c"), "a/b/c");
		assert_eq!(normalize("./a//b"), "a/b");
		assert_eq!(normalize(""), "");
	}

	#[test]
	fn test_redirect_prefix_rewrite() {
		let r = redirects();
		assert_eq!(
			apply_redirect("aaa/test1.txt", &r, RewriteDirection::ServerToClient),
			"aaB/test1.txt"
		);
		assert_eq!(apply_redirect("aaa", &r, RewriteDirection::ServerToClient), "aaB");
		assert_eq!(
			apply_redirect("bbb/test3.txt", &r, RewriteDirection::ServerToClient),
			"bbb/test3.txt"
		);
	}

	#[test]
	fn test_redirect_first_match_wins() {
		let r = redirects();
		// Second rule with the same source never fires
		assert_eq!(apply_redirect("aaa/x", &r, RewriteDirection::ServerToClient), "aaB/x");
	}

	#[test]
	fn test_redirect_component_boundary() {
		let r = redirects();
		assert_eq!(apply_redirect("aaab/x", &r, RewriteDirection::ServerToClient), "aaab/x");
	}

	#[test]
	fn test_redirect_round_trip() {
		let r = redirects();
		for path in &["aaa/f.txt", "aaa/deep/nested/f.bin", "clientmods/m.jar"] {
			let s2c = apply_redirect(path, &r, RewriteDirection::ServerToClient);
			let back = apply_redirect(&s2c, &r, RewriteDirection::ClientToServer);
			assert_eq!(&back, path);
		}
	}

	#[test]
	fn test_redirect_normalizes_separators() {
		let r = redirects();
		assert_eq!(
			apply_redirect("aaa\\sub\\f.txt", &r, RewriteDirection::ServerToClient),
			"aaB/sub/f.txt"
		);
	}

	#[test]
	fn test_ignore_empty_list_matches_nothing() {
		assert!(!is_ignored("anything", &[]));
	}

	#[test]
	fn test_ignore_bare_pattern_matches_basename() {
		let patterns = vec![".DS_Store".to_string()];
		assert!(is_ignored(".DS_Store", &patterns));
		assert!(is_ignored("aaa/.DS_Store", &patterns));
		assert!(!is_ignored("aaa/DS_Store.txt", &patterns));
	}

	#[test]
	fn test_ignore_pattern_cleaning() {
		let patterns = vec!["  *.tmp \r".to_string(), "".to_string(), "\r".to_string()];
		let list = IgnoreList::new(&patterns);
		assert!(list.matches("work/scratch.tmp"));
		assert!(!list.matches("work/scratch.txt"));
	}

	#[test]
	fn test_ignore_glob_classes() {
		let patterns = vec!["cache-[0-9]".to_string(), "logs/*.log".to_string()];
		assert!(is_ignored("cache-3", &patterns));
		assert!(!is_ignored("cache-x", &patterns));
		assert!(is_ignored("logs/today.log", &patterns));
		assert!(!is_ignored("other/today.log", &patterns));
	}
}

// vim: ts=4
