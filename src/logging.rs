//! Logging prelude module for convenient access to tracing macros.
//!
//! Re-exports the common tracing macros so modules can `use crate::logging::*;`
//! and log with consistent structured fields across the codebase.

use std::io::Write;
use std::path::Path;

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed. Control the log
/// level with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug packsync serve
/// RUST_LOG=packsync::session=trace packsync serve
/// ```
pub fn init_tracing(default_level: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level.to_string())),
		)
		.with_writer(std::io::stderr)
		.init();
}

/// Initialize tracing with a daily-rotated log file under `<base>/logs/`.
///
/// Returns the appender guard; dropping it flushes buffered log lines, so the
/// caller must keep it alive for the process lifetime. Also installs a panic
/// hook that appends the panic report to `<base>/logs/crash.log` before the
/// default hook runs.
pub fn init_file_tracing(
	base_dir: &Path,
	default_level: &str,
) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
	let log_dir = base_dir.join("logs");
	std::fs::create_dir_all(&log_dir)?;

	let appender = tracing_appender::rolling::daily(&log_dir, "packsync.log");
	let (writer, guard) = tracing_appender::non_blocking(appender);

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level.to_string())),
		)
		.with_ansi(false)
		.with_writer(writer)
		.init();

	install_crash_hook(log_dir.join("crash.log"));
	Ok(guard)
}

/// Write panics to a crash log before the default handler aborts the process.
fn install_crash_hook(crash_path: std::path::PathBuf) {
	let default_hook = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		if let Ok(mut f) =
			std::fs::OpenOptions::new().create(true).append(true).open(&crash_path)
		{
			let _ = writeln!(f, "==== panic ====");
			let _ = writeln!(f, "{}", info);
		}
		default_hook(info);
	}));
}

// vim: ts=4
