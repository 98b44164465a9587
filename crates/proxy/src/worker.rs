//! The worker process entry point. This runs inside the re-exec'd child
//! started by `interceptor-app::control`'s `ControlPlane::spawn`, never in
//! the parent process. It binds the MITM proxy, generates an in-memory CA,
//! and bridges the rule cache and flow stream to the parent over stdio using
//! length-delimited protobuf frames.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use interceptor_core::cache::RuleCache;
use interceptor_core::codec::{self, CodecError};
use interceptor_core::exclusion::ExclusionSet;
use interceptor_core::model::{Envelope, ServerEvent};
use hudsucker::rcgen::{self, CertificateParams, KeyPair};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::engine::InterceptorHandler;

/// Arguments parsed from the hidden `--internal-worker` flag.
pub struct WorkerArgs {
	pub proxy_port: u16,
	pub mgmt_port: u16,
	pub dev_port: u16,
}

fn generate_ca() -> anyhow::Result<(KeyPair, rcgen::Certificate)> {
	let key_pair = KeyPair::generate()?;
	let mut params = CertificateParams::new(Vec::new())?;
	params.distinguished_name.push(
		rcgen::DnType::CommonName,
		"HTTP Interceptor Generated CA".to_string(),
	);
	params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
	let cert = params.self_signed(&key_pair)?;
	Ok((key_pair, cert))
}

/// Reads one length-delimited protobuf frame from an async reader. Returns
/// `Ok(None)` on clean EOF (the parent closed its stdin pipe to us).
async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	match reader.read_exact(&mut len_buf).await {
		Ok(_) => {}
		Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	}
	let len = u32::from_be_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	Ok(Some(buf))
}

/// Runs the worker until its stdin pipe closes or the stop flag is set.
/// Returns once the proxy listener and all background tasks have wound
/// down.
pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
	let cache = Arc::new(RuleCache::new());
	let exclusions = Arc::new(ExclusionSet::new(args.mgmt_port, args.dev_port));
	let metrics = Arc::new(interceptor_core::telemetry::Metrics::new());
	let (flow_tx, mut flow_rx) = mpsc::channel(256);

	let (key_pair, ca_cert) = generate_ca()?;
	let ca = hudsucker::certificate_authority::RcgenAuthority::new(
		key_pair,
		ca_cert,
		1_000,
		rustls::crypto::aws_lc_rs::default_provider(),
	);

	let handler = InterceptorHandler::new(cache.clone(), exclusions, flow_tx);
	let addr = SocketAddr::from(([127, 0, 0, 1], args.proxy_port));

	let stop_flag = Arc::new(AtomicBool::new(false));
	let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

	let proxy = hudsucker::Proxy::builder()
		.with_addr(addr)
		.with_ca(ca)
		.with_rustls_client(rustls::crypto::aws_lc_rs::default_provider())
		.with_http_handler(handler)
		.with_graceful_shutdown(async {
			let _ = shutdown_rx.await;
		})
		.build()?;

	let proxy_task = tokio::spawn(async move {
		if let Err(e) = proxy.start().await {
			tracing::error!(error = %e, "proxy listener exited with error");
		}
	});

	let mut stdout = tokio::io::stdout();
	let started = codec::encode_envelope(&Envelope::ServerEvent(ServerEvent {
		status: "started".to_string(),
		port: args.proxy_port,
	}))?;
	stdout.write_all(&started).await?;
	stdout.flush().await?;

	// Forwards captured flows to the parent as they're emitted.
	let flow_writer = {
		let stop_flag = stop_flag.clone();
		let metrics = metrics.clone();
		tokio::spawn(async move {
			let mut stdout = tokio::io::stdout();
			while let Some(flow) = flow_rx.recv().await {
				if stop_flag.load(Ordering::Relaxed) {
					break;
				}
				match codec::encode_envelope(&Envelope::FlowData(flow)) {
					Ok(frame) => {
						if stdout.write_all(&frame).await.is_err() || stdout.flush().await.is_err() {
							break;
						}
						metrics.flows_emitted.inc();
					}
					Err(e) => tracing::warn!(error = %e, "failed to encode flow"),
				}
			}
		})
	};

	// Reads sync messages from the parent and applies them to the cache
	// until stdin closes, which is how the parent signals shutdown.
	let mut stdin = BufReader::new(tokio::io::stdin());
	loop {
		let frame = match read_frame(&mut stdin).await {
			Ok(Some(f)) => f,
			Ok(None) => break,
			Err(e) => {
				tracing::warn!(error = %e, "worker stdin read failed");
				break;
			}
		};
		match codec::decode_envelope(&frame) {
			Ok(Envelope::SyncMessage(sync)) => {
				// Rule application must never crash the worker: a malformed
				// filter regex or an internal panic in cache bookkeeping
				// would otherwise take the whole proxy down mid-flow.
				let cache = cache.clone();
				let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
					cache.apply_sync(sync);
				}));
				if result.is_err() {
					tracing::error!("panic while applying sync message, rule cache left unchanged for this update");
					metrics.rule_apply_panics.inc();
				} else {
					metrics.sync_messages_applied.inc();
				}
			}
			Ok(other) => tracing::warn!(?other, "unexpected envelope on worker stdin"),
			Err(CodecError::EmptyEnvelope) => {}
			Err(e) => tracing::warn!(error = %e, "failed to decode sync frame"),
		}
	}

	stop_flag.store(true, Ordering::Relaxed);
	let _ = shutdown_tx.send(());
	let _ = proxy_task.await;
	let _ = flow_writer.await;

	let stopped = codec::encode_envelope(&Envelope::ServerEvent(ServerEvent {
		status: "stopped".to_string(),
		port: args.proxy_port,
	}))?;
	stdout.write_all(&stopped).await?;
	stdout.flush().await?;
	Ok(())
}
