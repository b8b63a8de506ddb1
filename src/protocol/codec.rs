//! Length-free JSON framing and raw payload streaming over TCP.
//!
//! Messages are JSON objects written back-to-back; the reader consumes
//! exactly one object per call and keeps trailing bytes buffered. File
//! payloads follow their `file_begin` response raw on the same stream, so
//! the payload reader drains the message buffer before touching the socket.

use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::messages::Envelope;
use crate::digest::BUF_SIZE;
use crate::error::ProtocolError;
use crate::progress::{ProgressSender, ProgressTracker, TransferState};

/// One bidirectional protocol connection.
///
/// A connection is owned by exactly one task; reads and writes never
/// interleave across tasks (messages are processed strictly in order).
pub struct Connection {
	stream: TcpStream,
	rbuf: Vec<u8>,
}

impl Connection {
	pub fn new(stream: TcpStream) -> Self {
		Connection { stream, rbuf: Vec::new() }
	}

	pub fn peer_addr(&self) -> Option<SocketAddr> {
		self.stream.peer_addr().ok()
	}

	/// Read the next JSON envelope.
	///
	/// Cancel-safe: a cancelled read leaves previously buffered bytes
	/// intact, so the session loop can select against a watchdog tick.
	pub async fn read_message(&mut self) -> Result<Envelope, ProtocolError> {
		loop {
			if !self.rbuf.is_empty() {
				let mut iter =
					serde_json::Deserializer::from_slice(&self.rbuf).into_iter::<Envelope>();
				match iter.next() {
					Some(Ok(env)) => {
						let used = iter.byte_offset();
						self.rbuf.drain(..used);
						return Ok(env);
					}
					Some(Err(e)) if e.is_eof() => {
						// Incomplete object; read more below
					}
					Some(Err(e)) => {
						return Err(ProtocolError::Malformed { message: e.to_string() });
					}
					None => {
						// Buffer held only whitespace
						self.rbuf.clear();
					}
				}
			}
			let mut chunk = [0u8; BUF_SIZE];
			let n = self.stream.read(&mut chunk).await?;
			if n == 0 {
				return Err(ProtocolError::Closed);
			}
			self.rbuf.extend_from_slice(&chunk[..n]);
		}
	}

	/// Write one envelope
	pub async fn write_message(&mut self, env: &Envelope) -> Result<(), ProtocolError> {
		let bytes = serde_json::to_vec(env)
			.map_err(|e| ProtocolError::Malformed { message: e.to_string() })?;
		self.stream.write_all(&bytes).await?;
		self.stream.flush().await?;
		Ok(())
	}

	/// Stream the raw bytes of a file onto the connection.
	///
	/// The caller has already announced the transfer (and its size) with a
	/// `file_begin` message. Returns the number of bytes written.
	pub async fn send_file(
		&mut self,
		path: &Path,
		display_name: &str,
		total: u64,
		progress: &ProgressSender,
	) -> Result<u64, ProtocolError> {
		let mut file = tokio::fs::File::open(path).await?;
		let tracker = ProgressTracker::new(progress, display_name, TransferState::Sending, total);
		let mut buf = vec![0u8; BUF_SIZE];
		let mut sent: u64 = 0;
		loop {
			let n = file.read(&mut buf).await?;
			if n == 0 {
				break;
			}
			self.stream.write_all(&buf[..n]).await?;
			sent += n as u64;
			tracker.update(sent);
		}
		self.stream.flush().await?;
		Ok(sent)
	}

	/// Send a byte slice as a raw payload (pack archives served from cache)
	pub async fn send_bytes(
		&mut self,
		bytes: &[u8],
		display_name: &str,
		progress: &ProgressSender,
	) -> Result<(), ProtocolError> {
		let tracker =
			ProgressTracker::new(progress, display_name, TransferState::Sending, bytes.len() as u64);
		let mut sent: usize = 0;
		for chunk in bytes.chunks(BUF_SIZE) {
			self.stream.write_all(chunk).await?;
			sent += chunk.len();
			tracker.update(sent as u64);
		}
		self.stream.flush().await?;
		Ok(())
	}

	/// Receive exactly `size` raw bytes into `dest`, truncate-create.
	///
	/// A short stream is only clean EOF when the counter equals the
	/// announced size; anything less is a truncation error.
	pub async fn recv_file(
		&mut self,
		dest: &Path,
		size: u64,
		display_name: &str,
		progress: &ProgressSender,
	) -> Result<(), ProtocolError> {
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut file = tokio::fs::File::create(dest).await?;
		let tracker = ProgressTracker::new(progress, display_name, TransferState::Receiving, size);
		let mut received: u64 = 0;

		// Bytes already buffered behind the file_begin message come first
		if !self.rbuf.is_empty() {
			let take = (self.rbuf.len() as u64).min(size) as usize;
			file.write_all(&self.rbuf[..take]).await?;
			self.rbuf.drain(..take);
			received += take as u64;
			tracker.update(received);
		}

		let mut buf = vec![0u8; BUF_SIZE];
		while received < size {
			let want = ((size - received) as usize).min(BUF_SIZE);
			let n = self.stream.read(&mut buf[..want]).await?;
			if n == 0 {
				return Err(ProtocolError::Truncated { expected: size, got: received });
			}
			file.write_all(&buf[..n]).await?;
			received += n as u64;
			tracker.update(received);
		}
		file.flush().await?;
		Ok(())
	}
}


// vim: ts=4
