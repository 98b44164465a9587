//! Fan-out to connected `/observe` websocket clients. Ported from the
//! original `ConnectionManager`: each connection gets its own outbound
//! channel, a broadcast snapshots the connection list and sends outside the
//! lock, and a connection that can't keep up is dropped rather than allowed
//! to block every other observer.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

pub const PONG_MESSAGE: &str = r#"{"type":"pong"}"#;

struct Observer {
	id: Uuid,
	tx: mpsc::Sender<Message>,
}

#[derive(Default)]
pub struct ObserverRegistry {
	observers: RwLock<Vec<Observer>>,
}

impl ObserverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn connect(&self) -> (Uuid, mpsc::Receiver<Message>) {
		let id = Uuid::new_v4();
		let (tx, rx) = mpsc::channel(64);
		self.observers.write().await.push(Observer { id, tx });
		(id, rx)
	}

	pub async fn disconnect(&self, id: Uuid) {
		self.observers.write().await.retain(|o| o.id != id);
	}

	/// Sends a single message to one observer, e.g. a pong reply. Silently
	/// drops it if that observer has already disconnected.
	pub async fn send_to(&self, id: Uuid, message: Message) {
		let tx = self
			.observers
			.read()
			.await
			.iter()
			.find(|o| o.id == id)
			.map(|o| o.tx.clone());
		if let Some(tx) = tx {
			let _ = tx.try_send(message);
		}
	}

	/// Sends a pre-encoded length-delimited `Envelope` frame to every
	/// connected observer as a single binary websocket message, per §6's
	/// wire contract ("server pushes binary Envelope frames"). Observers are
	/// snapshotted (their `Sender`s cloned) before sending so the write lock
	/// isn't held across the sends, and any observer whose channel is full
	/// or closed is dropped rather than retried — failure isolation per
	/// testable property 7.
	pub async fn broadcast(&self, frame: &[u8]) {
		let snapshot: Vec<(Uuid, mpsc::Sender<Message>)> = self
			.observers
			.read()
			.await
			.iter()
			.map(|o| (o.id, o.tx.clone()))
			.collect();

		let mut dead = Vec::new();
		for (id, tx) in snapshot {
			if tx.try_send(Message::Binary(frame.to_vec().into())).is_err() {
				dead.push(id);
			}
		}
		if !dead.is_empty() {
			self.observers.write().await.retain(|o| !dead.contains(&o.id));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn frame() -> Vec<u8> {
		use interceptor_core::codec::encode_envelope;
		use interceptor_core::model::{Envelope, ServerEvent};
		encode_envelope(&Envelope::ServerEvent(ServerEvent {
			status: "started".to_string(),
			port: 9090,
		}))
		.unwrap()
	}

	#[tokio::test]
	async fn broadcast_reaches_connected_observer() {
		let registry = ObserverRegistry::new();
		let (_id, mut rx) = registry.connect().await;
		let sent = frame();
		registry.broadcast(&sent).await;
		let msg = rx.recv().await.expect("message delivered");
		match msg {
			Message::Binary(b) => assert_eq!(b.as_ref(), sent.as_slice()),
			_ => panic!("expected binary frame"),
		}
	}

	#[tokio::test]
	async fn disconnected_observer_is_skipped() {
		let registry = ObserverRegistry::new();
		let (id, rx) = registry.connect().await;
		drop(rx);
		registry.disconnect(id).await;
		registry.broadcast(&frame()).await;
		assert_eq!(registry.observers.read().await.len(), 0);
	}

	#[tokio::test]
	async fn closed_channel_is_pruned_on_next_broadcast() {
		let registry = ObserverRegistry::new();
		let (_id, rx) = registry.connect().await;
		drop(rx);
		registry.broadcast(&frame()).await;
		assert_eq!(registry.observers.read().await.len(), 0);
	}
}
