//! CLI entry point. Ordinary invocation starts the management server and
//! spawns the worker process; the hidden `--internal-worker` mode is what
//! the re-exec'd child actually runs (see `interceptor_proxy::worker`).

mod control;
mod observers;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use interceptor_core::model::{OperationType, SyncMessage};
use interceptor_core::store::DurableStore;
use interceptor_proxy::WorkerArgs;
use interceptor_store::SqliteStore;

use control::ControlPlane;
use observers::ObserverRegistry;

#[derive(Parser)]
#[command(name = "interceptor", about = "HTTP interception and modification proxy")]
struct Cli {
	/// Preferred proxy listener port; an in-use port falls forward to the next free one.
	#[arg(long, default_value_t = 8888)]
	proxy_port: u16,

	/// Management API / observer websocket port.
	#[arg(long, default_value_t = 8800)]
	mgmt_port: u16,

	/// Port of the companion frontend dev server, excluded from interception.
	#[arg(long, default_value_t = 5173)]
	dev_port: u16,

	/// Path to the SQLite database storing filters and rules.
	#[arg(long, default_value = "interceptor.db")]
	db_path: PathBuf,

	/// Internal re-exec entry point; not part of the public CLI surface.
	#[arg(long, hide = true, num_args = 3, value_names = ["PROXY_PORT", "MGMT_PORT", "DEV_PORT"])]
	internal_worker: Option<Vec<u16>>,
}

async fn full_sync_from_store(store: &dyn DurableStore) -> anyhow::Result<SyncMessage> {
	let filters_data = store.list_filters().await?;
	let rules_list = store.list_rules().await?;
	let timestamp = std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs_f64();
	Ok(SyncMessage {
		operation: OperationType::FullSync,
		rules_list,
		filters_data,
		timestamp,
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	if let Some(ports) = cli.internal_worker {
		interceptor_core::telemetry::init("worker");
		let [proxy_port, mgmt_port, dev_port] = ports[..] else {
			anyhow::bail!("--internal-worker requires exactly 3 port arguments");
		};
		return interceptor_proxy::run_worker(WorkerArgs {
			proxy_port,
			mgmt_port,
			dev_port,
		})
		.await;
	}

	interceptor_core::telemetry::init("app");

	let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::open(&cli.db_path)?);
	let observers = Arc::new(ObserverRegistry::new());
	let control = Arc::new(ControlPlane::new());

	let proxy_port = control
		.spawn(cli.proxy_port, cli.mgmt_port, cli.dev_port, observers.clone())
		.await?;
	tracing::info!(proxy_port, "worker process started");

	let sync = full_sync_from_store(store.as_ref()).await?;
	control.sync(sync).await?;

	let state = server::AppState {
		control: control.clone(),
		observers: observers.clone(),
		proxy_port,
		mgmt_port: cli.mgmt_port,
	};
	let app = server::build_router(state);

	let listener = tokio::net::TcpListener::bind(("127.0.0.1", cli.mgmt_port)).await?;
	tracing::info!(mgmt_port = cli.mgmt_port, "management server listening");

	let shutdown = async {
		let _ = tokio::signal::ctrl_c().await;
	};
	axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

	control.stop().await;
	Ok(())
}
