//! The MITM engine: a `hudsucker::HttpHandler` that evaluates the active
//! rule set against every request/response pair passing through the proxy.
//!
//! One `InterceptorHandler` is cloned per client connection by hudsucker.
//! HTTP/1.1 keep-alive serializes requests on a connection, so storing the
//! in-flight request's captured state on `self` between `handle_request` and
//! `handle_response` is safe — there is never a second request in flight on
//! the same handler instance before the first one's response arrives.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hudsucker::{HttpContext, HttpHandler, RequestOrResponse};
use interceptor_core::actions::{self, ActionOutcome};
use interceptor_core::cache::RuleCache;
use interceptor_core::exclusion::ExclusionSet;
use interceptor_core::model::FlowData;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::buffered::{CapturedRequest, MutableRequest, MutableResponse};

pub type Body = hudsucker::Body;

fn now_secs() -> f64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs_f64()
}

struct PendingFlow {
	id: String,
	request: CapturedRequest,
	start: f64,
	is_intercepted: bool,
}

/// Runs a single rule's apply function, catching panics so a bug in one
/// rule's evaluation (e.g. a third-party header-parsing panic) can't take
/// the whole proxy down mid-flow (§4.6, §7 "rule apply failure"). A caught
/// panic is logged with the rule's identity and treated as a no-op.
fn apply_guarded(
	rule: &interceptor_core::model::RuleModel,
	phase: &'static str,
	f: impl FnOnce() -> ActionOutcome + std::panic::UnwindSafe,
) -> ActionOutcome {
	match std::panic::catch_unwind(f) {
		Ok(outcome) => outcome,
		Err(_) => {
			tracing::error!(
				rule_id = ?rule.id,
				rule_name = %rule.rule_name,
				phase,
				"panic while applying rule, flow left untransformed for this phase"
			);
			ActionOutcome::NoOp
		}
	}
}

/// Finds the first enabled rule (in sync order) whose filter matches `req`.
fn first_matching_rule(
	cache: &RuleCache,
	req: &dyn interceptor_core::evaluator::RequestView,
) -> Option<Arc<interceptor_core::model::RuleModel>> {
	cache.get_active_rules().into_iter().find(|rule| {
		cache
			.get_filter_by_id(rule.filter_id)
			.is_some_and(|filter| filter.evaluate(req))
	})
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> http::Response<Body> {
	http::Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, content_type)
		.header(http::header::CONTENT_LENGTH, body.len())
		.body(Body::from(Full::new(Bytes::from(body))))
		.expect("synthesized response is well-formed")
}

#[derive(Clone)]
pub struct InterceptorHandler {
	cache: Arc<RuleCache>,
	exclusions: Arc<ExclusionSet>,
	flow_tx: mpsc::Sender<FlowData>,
	pending: Arc<Mutex<Option<PendingFlow>>>,
}

impl InterceptorHandler {
	pub fn new(cache: Arc<RuleCache>, exclusions: Arc<ExclusionSet>, flow_tx: mpsc::Sender<FlowData>) -> Self {
		InterceptorHandler {
			cache,
			exclusions,
			flow_tx,
			pending: Arc::new(Mutex::new(None)),
		}
	}

	fn emit_flow(&self, pending: PendingFlow, response: &CapturedRequest, status: u16, end: f64) {
		let flow = FlowData {
			id: pending.id,
			method: pending.request.method.clone(),
			url: pending.request.url.clone(),
			status,
			start_timestamp: pending.start,
			end_timestamp: end,
			request_size: pending.request.body.len() as u64,
			response_size: response.body.len() as u64,
			request_headers: pending.request.headers.clone(),
			response_headers: response.headers.clone(),
			request_body: String::from_utf8_lossy(&pending.request.body).into_owned(),
			response_body: String::from_utf8_lossy(&response.body).into_owned(),
			is_intercepted: pending.is_intercepted,
		};
		// Best-effort: a full channel means the observer/control plane is
		// behind, and a dropped flow is preferable to blocking the proxy path.
		if self.flow_tx.try_send(flow).is_err() {
			tracing::debug!("flow channel full, dropping flow record");
		}
	}
}

impl InterceptorHandler {
	/// Core of `HttpHandler::handle_request`, factored out so it can be unit
	/// tested without constructing a real `hudsucker::HttpContext`.
	async fn process_request(&self, req: http::Request<Body>) -> RequestOrResponse {
		let (mut parts, body) = req.into_parts();
		let collected = match body.collect().await {
			Ok(c) => c.to_bytes(),
			Err(_) => Bytes::new(),
		};
		let mut body_bytes = collected;

		let url = parts.uri.to_string();
		let marker = parts
			.headers
			.get(interceptor_core::exclusion::MARKER_HEADER)
			.and_then(|v| v.to_str().ok());
		let user_agent = parts
			.headers
			.get(http::header::USER_AGENT)
			.and_then(|v| v.to_str().ok());
		if self.exclusions.is_excluded(&url, marker, user_agent) {
			let req = http::Request::from_parts(parts, Body::from(Full::new(body_bytes)));
			return RequestOrResponse::Request(req);
		}

		let captured = CapturedRequest::from_parts(&parts, &body_bytes);
		let matched = first_matching_rule(&self.cache, &captured);

		let mut is_intercepted = false;
		let mut short_circuit = None;
		if let Some(rule) = &matched {
			let mut mutable = MutableRequest {
				parts: &mut parts,
				body: &mut body_bytes,
			};
			let outcome = apply_guarded(rule, "request", std::panic::AssertUnwindSafe(|| {
				actions::apply_request_action(rule, &mut mutable)
			}));
			match outcome {
				ActionOutcome::Mutated => is_intercepted = true,
				ActionOutcome::ShortCircuit(resp) => short_circuit = Some(resp),
				ActionOutcome::NoOp => {}
			}
		}

		let start = now_secs();
		let request_snapshot = CapturedRequest::from_parts(&parts, &body_bytes);

		if let Some(resp) = short_circuit {
			let response_view = CapturedRequest {
				method: request_snapshot.method.clone(),
				url: request_snapshot.url.clone(),
				headers: std::collections::BTreeMap::from([(
					"content-type".to_string(),
					resp.content_type.to_string(),
				)]),
				body: Bytes::from(resp.body.clone()),
			};
			self.emit_flow(
				PendingFlow {
					id: Uuid::new_v4().to_string(),
					request: request_snapshot,
					start,
					is_intercepted: true,
				},
				&response_view,
				resp.status,
				now_secs(),
			);
			return RequestOrResponse::Response(build_response(resp.status, resp.content_type, resp.body));
		}

		*self.pending.lock().await = Some(PendingFlow {
			id: Uuid::new_v4().to_string(),
			request: request_snapshot,
			start,
			is_intercepted,
		});

		let req = http::Request::from_parts(parts, Body::from(Full::new(body_bytes)));
		RequestOrResponse::Request(req)
	}

	/// Core of `HttpHandler::handle_response`; see [`Self::process_request`].
	async fn process_response(&self, res: http::Response<Body>) -> http::Response<Body> {
		let Some(mut pending) = self.pending.lock().await.take() else {
			return res;
		};

		let (mut parts, body) = res.into_parts();
		let mut body_bytes = match body.collect().await {
			Ok(c) => c.to_bytes(),
			Err(_) => Bytes::new(),
		};

		if let Some(rule) = first_matching_rule(&self.cache, &pending.request) {
			let mut mutable = MutableResponse {
				parts: &mut parts,
				body: &mut body_bytes,
			};
			let outcome = apply_guarded(&rule, "response", std::panic::AssertUnwindSafe(|| {
				actions::apply_response_action(&rule, &mut mutable)
			}));
			if outcome == ActionOutcome::Mutated {
				pending.is_intercepted = true;
			}
		}

		let status = parts.status.as_u16();
		let response_view = CapturedRequest {
			method: pending.request.method.clone(),
			url: pending.request.url.clone(),
			headers: crate::buffered::headers_to_map(&parts.headers),
			body: body_bytes.clone(),
		};
		self.emit_flow(pending, &response_view, status, now_secs());

		http::Response::from_parts(parts, Body::from(Full::new(body_bytes)))
	}
}

impl HttpHandler for InterceptorHandler {
	async fn handle_request(&mut self, _ctx: &HttpContext, req: http::Request<Body>) -> RequestOrResponse {
		self.process_request(req).await
	}

	async fn handle_response(&mut self, _ctx: &HttpContext, res: http::Response<Body>) -> http::Response<Body> {
		self.process_response(res).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use interceptor_core::model::{FilterModel, Operator, RuleAction, RuleModel, SyncMessage, OperationType};

	fn cache_with_block_rule() -> Arc<RuleCache> {
		let cache = Arc::new(RuleCache::new());
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			filters_data: vec![FilterModel::new(Some(1), "f", "url", Operator::Contains, "/blocked").unwrap()],
			rules_list: vec![RuleModel::new(Some(1), "r", 1, RuleAction::BlockRequest, "k", "v", true).unwrap()],
			timestamp: 0.0,
		});
		cache
	}

	#[tokio::test]
	async fn excluded_urls_bypass_rule_matching() {
		let cache = cache_with_block_rule();
		let exclusions = Arc::new(ExclusionSet::new(8800, 5173));
		let (tx, mut rx) = mpsc::channel(8);
		let handler = InterceptorHandler::new(cache, exclusions, tx);

		let req = http::Request::builder()
			.method("GET")
			.uri("http://127.0.0.1:8800/blocked")
			.body(Body::from(Full::new(Bytes::new())))
			.unwrap();
		let outcome = handler.process_request(req).await;
		assert!(matches!(outcome, RequestOrResponse::Request(_)));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn matching_block_rule_short_circuits() {
		let cache = cache_with_block_rule();
		let exclusions = Arc::new(ExclusionSet::new(8800, 5173));
		let (tx, mut rx) = mpsc::channel(8);
		let handler = InterceptorHandler::new(cache, exclusions, tx);

		let req = http::Request::builder()
			.method("GET")
			.uri("http://api.example.com/blocked")
			.body(Body::from(Full::new(Bytes::new())))
			.unwrap();
		let outcome = handler.process_request(req).await;
		match outcome {
			RequestOrResponse::Response(resp) => assert_eq!(resp.status(), 403),
			_ => panic!("expected short-circuit response"),
		}
		let flow = rx.try_recv().expect("flow recorded");
		assert!(flow.is_intercepted);
		assert_eq!(flow.status, 403);
	}

	#[test]
	fn panicking_rule_apply_is_caught_and_treated_as_noop() {
		let rule = RuleModel::new(Some(1), "r", 1, RuleAction::AddHeader, "k", "v", true).unwrap();
		let outcome = apply_guarded(&rule, "request", std::panic::AssertUnwindSafe(|| {
			panic!("simulated bug in a rule's apply path")
		}));
		assert_eq!(outcome, ActionOutcome::NoOp);
	}
}
