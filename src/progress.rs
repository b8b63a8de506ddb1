//! Transfer progress events.
//!
//! Progress is advisory: delivery never blocks a transfer. The channel is
//! latest-wins (a slow subscriber only ever sees the newest event), which is
//! the drop-oldest behavior a capacity-1 bounded queue would give.

use serde::Serialize;
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
	Sending,
	Receiving,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
	pub total: u64,
	pub current: u64,
	pub speed_bytes_per_s: u64,
	pub remaining_s: u64,
	pub file_name: String,
	pub state: TransferState,
}

/// Shared emitter handed to transfer loops
#[derive(Clone)]
pub struct ProgressSender {
	tx: watch::Sender<Option<ProgressEvent>>,
}

pub type ProgressReceiver = watch::Receiver<Option<ProgressEvent>>;

impl ProgressSender {
	pub fn new() -> (Self, ProgressReceiver) {
		let (tx, rx) = watch::channel(None);
		(ProgressSender { tx }, rx)
	}

	/// Non-blocking emit; replaces any unconsumed event
	pub fn emit(&self, event: ProgressEvent) {
		let _ = self.tx.send_replace(Some(event));
	}

	pub fn subscribe(&self) -> ProgressReceiver {
		self.tx.subscribe()
	}
}

impl Default for ProgressSender {
	fn default() -> Self {
		Self::new().0
	}
}

/// Per-file counter that turns byte counts into progress events
pub struct ProgressTracker<'a> {
	sender: &'a ProgressSender,
	file_name: String,
	state: TransferState,
	total: u64,
	started: Instant,
}

impl<'a> ProgressTracker<'a> {
	pub fn new(sender: &'a ProgressSender, file_name: &str, state: TransferState, total: u64) -> Self {
		ProgressTracker {
			sender,
			file_name: file_name.to_string(),
			state,
			total,
			started: Instant::now(),
		}
	}

	pub fn update(&self, current: u64) {
		let elapsed = self.started.elapsed().as_secs_f64();
		let speed = if elapsed > 0.0 { (current as f64 / elapsed) as u64 } else { 0 };
		let remaining = if speed > 0 && self.total > current {
			(self.total - current) / speed
		} else {
			0
		};
		self.sender.emit(ProgressEvent {
			total: self.total,
			current,
			speed_bytes_per_s: speed,
			remaining_s: remaining,
			file_name: self.file_name.clone(),
			state: self.state,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_latest_event_wins() {
		let (tx, rx) = ProgressSender::new();
		let tracker = ProgressTracker::new(&tx, "f.bin", TransferState::Sending, 100);
		tracker.update(10);
		tracker.update(50);
		tracker.update(100);

		let seen = rx.borrow().clone().expect("event present");
		assert_eq!(seen.current, 100);
		assert_eq!(seen.file_name, "f.bin");
		assert_eq!(seen.state, TransferState::Sending);
	}

	#[tokio::test]
	async fn test_emit_never_blocks_without_subscriber() {
		let (tx, rx) = ProgressSender::new();
		drop(rx);
		// Emitting into a closed channel is a no-op, not an error
		tx.emit(ProgressEvent {
			total: 1,
			current: 1,
			speed_bytes_per_s: 0,
			remaining_s: 0,
			file_name: "x".to_string(),
			state: TransferState::Receiving,
		});
	}
}

// vim: ts=4
