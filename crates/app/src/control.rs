//! Owns the worker child process: port selection, spawn/stop lifecycle, and
//! the two framed streams running over its stdio pipes (sync messages out,
//! flow records in). Ported from the original `ProxyManager`'s two-queue
//! design, minus the multiprocessing queues — stdio pipes plus length
//! delimited protobuf frames play the same role across a real OS process
//! boundary instead of a `multiprocessing.Process`.

use std::net::{TcpListener, TcpStream};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use interceptor_core::codec::{self, CodecError};
use interceptor_core::model::{Envelope, SyncMessage};
use interceptor_core::telemetry::Metrics;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;

use crate::observers::ObserverRegistry;

#[derive(Debug, Error)]
pub enum ControlError {
	#[error("no free port found after scanning {scanned} candidates starting at {start}")]
	PortExhausted { start: u16, scanned: u16 },
	#[error("worker process exited immediately after spawn (status: {0:?})")]
	WorkerExitedImmediately(Option<i32>),
	#[error("control plane is not running")]
	NotRunning,
	#[error("failed waiting for worker startup confirmation")]
	StartupTimeout,
	#[error(transparent)]
	Codec(#[from] CodecError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// True if something is already listening on `127.0.0.1:port`. Checked with
/// a connect probe before attempting a bind, since a connect succeeding and
/// a bind failing can disagree under `SO_REUSEADDR` (an in-use port can
/// still accept a bind that then fails to listen) — mirrors the original
/// `ProxyManager`'s own connect-then-bind check rather than trusting bind
/// failure alone to mean "in use".
fn port_in_use(port: u16) -> bool {
	TcpStream::connect(("127.0.0.1", port)).is_ok()
}

/// Finds a free TCP port starting at `preferred`. Tries the preferred port
/// first, then scans the next 100 candidates — mirrors the original
/// `ProxyManager`'s probe-then-bind approach instead of trusting the OS to
/// hand back an ephemeral port, since the chosen port must be communicated
/// to the worker and to the exclusion list before anything binds it.
pub fn find_port(preferred: u16) -> Result<u16, ControlError> {
	const SCAN_RANGE: u16 = 100;
	for offset in 0..=SCAN_RANGE {
		let candidate = preferred.saturating_add(offset);
		if candidate == 0 {
			continue;
		}
		if port_in_use(candidate) {
			continue;
		}
		if let Ok(listener) = TcpListener::bind(("127.0.0.1", candidate)) {
			drop(listener);
			return Ok(candidate);
		}
	}
	Err(ControlError::PortExhausted {
		start: preferred,
		scanned: SCAN_RANGE,
	})
}

struct Running {
	child: Child,
	stdin: ChildStdin,
}

pub struct ControlPlane {
	running: Mutex<Option<Running>>,
	pub metrics: Metrics,
}

impl Default for ControlPlane {
	fn default() -> Self {
		Self::new()
	}
}

impl ControlPlane {
	pub fn new() -> Self {
		ControlPlane {
			running: Mutex::new(None),
			metrics: Metrics::new(),
		}
	}

	/// Spawns the worker as a re-exec'd child process, waits for its startup
	/// confirmation, and launches the background task that forwards its flow
	/// records to `observers`. Returns the port the worker actually bound.
	pub async fn spawn(
		&self,
		preferred_proxy_port: u16,
		mgmt_port: u16,
		dev_port: u16,
		observers: Arc<ObserverRegistry>,
	) -> Result<u16, ControlError> {
		let proxy_port = find_port(preferred_proxy_port)?;
		let current_exe = std::env::current_exe()?;

		let mut child = tokio::process::Command::new(current_exe)
			.arg("--internal-worker")
			.arg(proxy_port.to_string())
			.arg(mgmt_port.to_string())
			.arg(dev_port.to_string())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()?;

		tokio::time::sleep(Duration::from_millis(500)).await;
		if let Some(status) = child.try_wait()? {
			return Err(ControlError::WorkerExitedImmediately(status.code()));
		}

		let stdin = child.stdin.take().expect("stdin was piped");
		let stdout = child.stdout.take().expect("stdout was piped");
		let mut reader = BufReader::new(stdout);

		let confirmed = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut reader)).await;
		match confirmed {
			Ok(Ok(Some(bytes))) => match codec::decode_envelope(&bytes)? {
				Envelope::ServerEvent(ev) if ev.status == "started" => {}
				other => tracing::warn!(?other, "unexpected first frame from worker"),
			},
			Ok(Ok(None)) => return Err(ControlError::WorkerExitedImmediately(None)),
			Ok(Err(e)) => return Err(e.into()),
			Err(_) => return Err(ControlError::StartupTimeout),
		}

		tokio::spawn(flow_forwarder(reader, observers, self.metrics.flows_emitted.clone()));

		*self.running.lock().await = Some(Running { child, stdin });
		Ok(proxy_port)
	}

	/// Sends one sync message to the worker over its stdin pipe. Writes are
	/// serialized by the mutex guarding `running`, so ADD/UPDATE/DELETE
	/// messages from concurrent requests never interleave mid-frame.
	pub async fn sync(&self, msg: SyncMessage) -> Result<(), ControlError> {
		let mut guard = self.running.lock().await;
		let running = guard.as_mut().ok_or(ControlError::NotRunning)?;
		let frame = codec::encode_envelope(&Envelope::SyncMessage(msg))?;
		running.stdin.write_all(&frame).await?;
		running.stdin.flush().await?;
		self.metrics.sync_messages_applied.inc();
		Ok(())
	}

	/// Escalating shutdown: close stdin so the worker's read loop sees EOF
	/// and winds down on its own; if it hasn't exited shortly after, kill it.
	pub async fn stop(&self) {
		let mut guard = self.running.lock().await;
		let Some(mut running) = guard.take() else {
			return;
		};
		drop(running.stdin);
		let exited = tokio::time::timeout(Duration::from_secs(3), running.child.wait()).await;
		if exited.is_err() {
			tracing::warn!("worker did not exit after stdin close, killing");
			let _ = running.child.start_kill();
			let _ = running.child.wait().await;
		}
	}

	pub async fn is_running(&self) -> bool {
		self.running.lock().await.is_some()
	}
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	match reader.read_exact(&mut len_buf).await {
		Ok(_) => {}
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	}
	let len = u32::from_be_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	Ok(Some(buf))
}

/// Relays whatever the worker writes to stdout straight to observers as a
/// binary websocket frame. The payload is re-validated by decoding it first
/// (so a corrupt frame is logged and dropped rather than forwarded verbatim)
/// but the bytes broadcast to observers are the original encoded `Envelope`,
/// not a re-serialization — this keeps the wire format observers see
/// identical to the one the worker produced (§6).
async fn flow_forwarder<R: AsyncReadExt + Unpin>(
	mut reader: R,
	observers: Arc<ObserverRegistry>,
	flows_emitted: prometheus_client::metrics::counter::Counter,
) {
	loop {
		match read_frame(&mut reader).await {
			Ok(Some(bytes)) => match codec::decode_envelope(&bytes) {
				Ok(Envelope::FlowData(_)) => {
					observers.broadcast(&bytes).await;
					flows_emitted.inc();
				}
				Ok(Envelope::ServerEvent(_)) => observers.broadcast(&bytes).await,
				Ok(other) => tracing::debug!(?other, "unexpected envelope on worker stdout"),
				Err(e) => tracing::warn!(error = %e, "failed to decode worker frame"),
			},
			Ok(None) => {
				tracing::info!("worker stdout closed, stopping flow forwarder");
				break;
			}
			Err(e) => {
				tracing::warn!(error = %e, "error reading worker stdout");
				break;
			}
		}
	}
}
