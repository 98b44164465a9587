//! Rule application: mutating an in-flight request/response, or producing a
//! short-circuit response for BLOCK_REQUEST / AUTO_RESPOND.
//!
//! Ported from the original addon's `_apply_request_rule` /
//! `_apply_response_rule`, which special-case the two "terminal" actions and
//! otherwise mutate headers/body in place.

use crate::model::{RuleAction, RuleModel};

pub const BLOCKED_BODY: &str = "Request blocked by HTTP Interceptor rule";
pub const DEFAULT_AUTO_RESPOND_BODY: &str = "Auto response";

/// Mutable access to the single HTTP message (request or response) a rule
/// action is being applied to. Implemented by the proxy engine over its
/// concrete hudsucker/http types.
pub trait MutableHttpMessage {
	fn set_header(&mut self, key: &str, value: &str);
	fn remove_header(&mut self, key: &str) -> bool;
	fn has_header(&self, key: &str) -> bool;
	fn set_body(&mut self, body: Vec<u8>);
}

/// A fully-formed response body to synthesize for BLOCK_REQUEST/AUTO_RESPOND,
/// which the proxy engine turns into a concrete `http::Response` instead of
/// mutating the message flowing through the proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedResponse {
	pub status: u16,
	pub content_type: &'static str,
	pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
	/// The message was mutated in place.
	Mutated,
	/// The action does not apply in this phase (e.g. a terminal action
	/// matched in the response phase) or had no effect (e.g. DELETE_HEADER
	/// on a header that was not present).
	NoOp,
	/// The request/response exchange should be replaced wholesale.
	ShortCircuit(SynthesizedResponse),
}

fn read_modify_body_value(target_key: &str, target_value: &str) -> Vec<u8> {
	match std::fs::read(target_key) {
		Ok(bytes) => bytes,
		Err(_) => target_value.as_bytes().to_vec(),
	}
}

fn set_body_with_content_length(msg: &mut dyn MutableHttpMessage, body: Vec<u8>) {
	let len = body.len();
	msg.set_body(body);
	msg.set_header("content-length", &len.to_string());
}

/// Applies `rule` to a request-phase message. Returns the resulting action.
pub fn apply_request_action(rule: &RuleModel, msg: &mut dyn MutableHttpMessage) -> ActionOutcome {
	match rule.action {
		RuleAction::AddHeader => {
			msg.set_header(&rule.target_key, &rule.target_value);
			ActionOutcome::Mutated
		}
		RuleAction::ModifyHeader => {
			msg.set_header(&rule.target_key, &rule.target_value);
			ActionOutcome::Mutated
		}
		RuleAction::DeleteHeader => {
			if msg.remove_header(&rule.target_key) {
				ActionOutcome::Mutated
			} else {
				ActionOutcome::NoOp
			}
		}
		RuleAction::ModifyBody => {
			set_body_with_content_length(msg, read_modify_body_value(&rule.target_key, &rule.target_value));
			ActionOutcome::Mutated
		}
		RuleAction::BlockRequest => ActionOutcome::ShortCircuit(SynthesizedResponse {
			status: 403,
			content_type: "text/plain",
			body: BLOCKED_BODY.as_bytes().to_vec(),
		}),
		RuleAction::AutoRespond => {
			let body = if rule.target_value.is_empty() {
				DEFAULT_AUTO_RESPOND_BODY.as_bytes().to_vec()
			} else {
				rule.target_value.as_bytes().to_vec()
			};
			ActionOutcome::ShortCircuit(SynthesizedResponse {
				status: 200,
				content_type: "text/plain",
				body,
			})
		}
	}
}

/// Applies `rule` to a response-phase message. BLOCK_REQUEST and
/// AUTO_RESPOND never fire here — the request phase already owns terminal
/// decisions, so a rule whose action is one of those is a no-op if matched
/// against a response.
pub fn apply_response_action(rule: &RuleModel, msg: &mut dyn MutableHttpMessage) -> ActionOutcome {
	if !rule.action.has_response_effect() {
		return ActionOutcome::NoOp;
	}
	apply_request_action(rule, msg)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[derive(Default)]
	struct FakeMessage {
		headers: HashMap<String, String>,
		body: Vec<u8>,
	}

	impl MutableHttpMessage for FakeMessage {
		fn set_header(&mut self, key: &str, value: &str) {
			self.headers.insert(key.to_lowercase(), value.to_string());
		}
		fn remove_header(&mut self, key: &str) -> bool {
			self.headers.remove(&key.to_lowercase()).is_some()
		}
		fn has_header(&self, key: &str) -> bool {
			self.headers.contains_key(&key.to_lowercase())
		}
		fn set_body(&mut self, body: Vec<u8>) {
			self.body = body;
		}
	}

	fn rule(action: RuleAction, key: &str, value: &str) -> RuleModel {
		RuleModel::new(Some(1), "r", 1, action, key, value, true).unwrap()
	}

	#[test]
	fn add_header_always_sets() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::AddHeader, "X-Trace", "abc");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::Mutated);
		assert_eq!(msg.headers.get("x-trace"), Some(&"abc".to_string()));
	}

	#[test]
	fn modify_header_sets_unconditionally() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::ModifyHeader, "X-Trace", "abc");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::Mutated);
		assert_eq!(msg.headers.get("x-trace"), Some(&"abc".to_string()));
		msg.set_header("X-Trace", "old");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::Mutated);
		assert_eq!(msg.headers.get("x-trace"), Some(&"abc".to_string()));
	}

	#[test]
	fn delete_header_reports_noop_when_absent() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::DeleteHeader, "X-Trace", "unused");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::NoOp);
	}

	#[test]
	fn modify_body_falls_back_to_target_value_when_target_key_is_not_a_file() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::ModifyBody, "/no/such/path", "hello world");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::Mutated);
		assert_eq!(msg.body, b"hello world");
		assert_eq!(msg.headers.get("content-length"), Some(&"11".to_string()));
	}

	#[test]
	fn modify_body_reads_target_key_as_file_path_when_it_exists() {
		let path = std::env::temp_dir().join("interceptor_modify_body_test_fixture.bin");
		std::fs::write(&path, b"from disk").unwrap();
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::ModifyBody, path.to_str().unwrap(), "ignored literal");
		assert_eq!(apply_request_action(&r, &mut msg), ActionOutcome::Mutated);
		assert_eq!(msg.body, b"from disk");
		assert_eq!(msg.headers.get("content-length"), Some(&"9".to_string()));
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn block_request_short_circuits_with_fixed_body() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::BlockRequest, "unused", "unused");
		let outcome = apply_request_action(&r, &mut msg);
		assert_eq!(
			outcome,
			ActionOutcome::ShortCircuit(SynthesizedResponse {
				status: 403,
				content_type: "text/plain",
				body: BLOCKED_BODY.as_bytes().to_vec(),
			})
		);
	}

	#[test]
	fn auto_respond_defaults_body_when_empty() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::AutoRespond, "unused", "");
		let outcome = apply_request_action(&r, &mut msg);
		assert_eq!(
			outcome,
			ActionOutcome::ShortCircuit(SynthesizedResponse {
				status: 200,
				content_type: "text/plain",
				body: DEFAULT_AUTO_RESPOND_BODY.as_bytes().to_vec(),
			})
		);
	}

	#[test]
	fn terminal_actions_are_noop_in_response_phase() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::BlockRequest, "unused", "unused");
		assert_eq!(apply_response_action(&r, &mut msg), ActionOutcome::NoOp);
		let r2 = rule(RuleAction::AutoRespond, "unused", "unused");
		assert_eq!(apply_response_action(&r2, &mut msg), ActionOutcome::NoOp);
	}

	#[test]
	fn header_actions_still_apply_in_response_phase() {
		let mut msg = FakeMessage::default();
		let r = rule(RuleAction::AddHeader, "X-Served-By", "interceptor");
		assert_eq!(apply_response_action(&r, &mut msg), ActionOutcome::Mutated);
	}
}
