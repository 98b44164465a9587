//! The in-scope sliver of the management surface: a health/status endpoint
//! and the `/observe` websocket that streams flow records to connected UIs.
//! CRUD over filters/rules is deliberately not wired up here.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::control::ControlPlane;
use crate::observers::{ObserverRegistry, PONG_MESSAGE};

#[derive(Clone)]
pub struct AppState {
	pub control: Arc<ControlPlane>,
	pub observers: Arc<ObserverRegistry>,
	pub proxy_port: u16,
	pub mgmt_port: u16,
}

#[derive(Serialize)]
struct StatusBody {
	running: bool,
	proxy_port: u16,
	mgmt_port: u16,
}

pub fn build_router(state: AppState) -> Router {
	Router::new()
		.route("/status", get(status))
		.route("/metrics", get(metrics))
		.route("/observe", get(observe))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn status(State(state): State<AppState>) -> Response {
	let running = state.control.is_running().await;
	axum::Json(StatusBody {
		running,
		proxy_port: state.proxy_port,
		mgmt_port: state.mgmt_port,
	})
	.into_response()
}

/// Exposes the parent process's counters (sync messages sent to the worker,
/// flows relayed to observers) in Prometheus text exposition format. The
/// worker's own counters never reach this endpoint — it has no HTTP listener
/// to merge them in over, so they're only visible in its logs.
async fn metrics(State(state): State<AppState>) -> Response {
	state.control.metrics.encode().into_response()
}

async fn observe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_socket(socket, state.observers))
}

/// Drives one connected observer: a broadcast receiver forwards flow events
/// out, while an inbound `"ping"` text frame gets the literal `{"type":
/// "pong"}` reply the original UI's websocket client expects to keep the
/// connection alive through idle proxies.
async fn handle_socket(socket: WebSocket, observers: Arc<ObserverRegistry>) {
	let (mut sender, mut receiver) = socket.split();
	let (id, mut rx) = observers.connect().await;

	let outbound = tokio::spawn(async move {
		while let Some(msg) = rx.recv().await {
			if sender.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(Ok(msg)) = receiver.next().await {
		match msg {
			Message::Text(text) if text.trim() == "ping" => {
				observers.send_to(id, Message::Text(PONG_MESSAGE.to_string().into())).await;
			}
			Message::Close(_) => break,
			_ => {}
		}
	}

	outbound.abort();
	observers.disconnect(id).await;
}
