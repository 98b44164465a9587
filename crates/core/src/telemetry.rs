//! Structured logging and process metrics shared by the parent process and
//! the re-exec'd worker. Both read `RUST_LOG`/`INTERCEPTOR_LOG`; the worker
//! additionally tags every event with its role so interleaved parent/worker
//! logs on the same terminal stay attributable.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,interceptor=debug";

/// Initializes the global `tracing` subscriber. Safe to call once per
/// process; a second call (e.g. in tests that exercise `main`) is ignored
/// rather than panicking.
pub fn init(role: &'static str) {
	let filter = EnvFilter::try_from_env("INTERCEPTOR_LOG")
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.with_thread_ids(false)
		.json()
		.with_current_span(false)
		.try_init();

	tracing::info!(role, "telemetry initialized");
}

/// Process-local counters, one instance per process (parent and worker each
/// own their own — there is no shared-memory metrics bus across the process
/// boundary, matching the rest of the design's "no shared heap" rule). The
/// parent exposes its instance over `GET /metrics`; the worker's counters
/// are surfaced only through its logs, since it has no HTTP listener of its
/// own to scrape.
pub struct Metrics {
	registry: Registry,
	pub sync_messages_applied: Counter,
	pub flows_emitted: Counter,
	pub rule_apply_panics: Counter,
}

impl Metrics {
	pub fn new() -> Self {
		let mut registry = Registry::default();
		let sync_messages_applied = Counter::default();
		let flows_emitted = Counter::default();
		let rule_apply_panics = Counter::default();

		registry.register(
			"sync_messages_applied",
			"Sync messages applied to the in-memory rule cache",
			sync_messages_applied.clone(),
		);
		registry.register(
			"flows_emitted",
			"Flows pushed onto the flow queue",
			flows_emitted.clone(),
		);
		registry.register(
			"rule_apply_panics",
			"Rule applications caught after panicking",
			rule_apply_panics.clone(),
		);

		Metrics {
			registry,
			sync_messages_applied,
			flows_emitted,
			rule_apply_panics,
		}
	}

	/// Renders every registered metric in Prometheus text exposition format.
	pub fn encode(&self) -> String {
		let mut buf = String::new();
		encode(&mut buf, &self.registry).expect("prometheus text encoding is infallible for counters");
		buf
	}
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}
