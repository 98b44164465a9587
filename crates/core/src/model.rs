//! Domain types for filters, rules, flows and sync messages.
//!
//! These mirror the wire (`interceptor_proto`) messages but use Rust-native
//! representations — parsed field selectors, `Option<i64>` ids — so the rest
//! of the crate never re-parses a string at evaluation time (see spec §9,
//! "Polymorphism over field selectors").

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("{field} must not be empty")]
	Empty { field: &'static str },
}

fn require_non_empty(field: &'static str, value: &str) -> Result<String, ValidationError> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(ValidationError::Empty { field });
	}
	Ok(trimmed.to_string())
}

/// A parsed request field selector. `Other` preserves any string the source
/// system used that we don't recognize, so codec round-trips stay lossless
/// even though `Filter::evaluate` treats it as an always-false selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterField {
	Url,
	Method,
	Body,
	Header(String),
	Other(String),
}

impl FilterField {
	pub fn parse(raw: &str) -> Self {
		match raw {
			"url" => FilterField::Url,
			"method" => FilterField::Method,
			"body" => FilterField::Body,
			other => match other.strip_prefix("header:") {
				Some(name) => FilterField::Header(name.to_string()),
				None => FilterField::Other(other.to_string()),
			},
		}
	}

	/// Reconstructs the wire string this was parsed from.
	pub fn as_wire_string(&self) -> String {
		match self {
			FilterField::Url => "url".to_string(),
			FilterField::Method => "method".to_string(),
			FilterField::Body => "body".to_string(),
			FilterField::Header(name) => format!("header:{name}"),
			FilterField::Other(s) => s.clone(),
		}
	}
}

impl fmt::Display for FilterField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.as_wire_string())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
	Contains,
	Equals,
	StartsWith,
	EndsWith,
	Regex,
}

impl Operator {
	pub fn from_wire(v: i32) -> Self {
		match v {
			1 => Operator::Equals,
			2 => Operator::StartsWith,
			3 => Operator::EndsWith,
			4 => Operator::Regex,
			// 0, and any unrecognized future value, degrade to CONTAINS's sibling
			// default rather than panicking — codec decode never fails on enums.
			_ => Operator::Contains,
		}
	}

	pub fn to_wire(self) -> i32 {
		match self {
			Operator::Contains => 0,
			Operator::Equals => 1,
			Operator::StartsWith => 2,
			Operator::EndsWith => 3,
			Operator::Regex => 4,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterModel {
	pub id: Option<i64>,
	pub filter_name: String,
	pub field: FilterField,
	pub operator: Operator,
	pub value: String,
}

impl FilterModel {
	pub fn new(
		id: Option<i64>,
		filter_name: impl Into<String>,
		field: impl Into<String>,
		operator: Operator,
		value: impl Into<String>,
	) -> Result<Self, ValidationError> {
		let filter_name = require_non_empty("filter_name", &filter_name.into())?;
		let field_raw = require_non_empty("field", &field.into())?;
		let value = require_non_empty("value", &value.into())?;
		Ok(FilterModel {
			id,
			filter_name,
			field: FilterField::parse(&field_raw),
			operator,
			value,
		})
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleAction {
	AddHeader,
	ModifyHeader,
	DeleteHeader,
	ModifyBody,
	BlockRequest,
	AutoRespond,
}

impl RuleAction {
	pub fn from_wire(v: i32) -> Self {
		match v {
			1 => RuleAction::ModifyHeader,
			2 => RuleAction::DeleteHeader,
			3 => RuleAction::ModifyBody,
			4 => RuleAction::BlockRequest,
			5 => RuleAction::AutoRespond,
			_ => RuleAction::AddHeader,
		}
	}

	pub fn to_wire(self) -> i32 {
		match self {
			RuleAction::AddHeader => 0,
			RuleAction::ModifyHeader => 1,
			RuleAction::DeleteHeader => 2,
			RuleAction::ModifyBody => 3,
			RuleAction::BlockRequest => 4,
			RuleAction::AutoRespond => 5,
		}
	}

	/// Whether this action has any effect when matched in the response phase.
	/// BLOCK_REQUEST/AUTO_RESPOND only ever short-circuit the request phase.
	pub fn has_response_effect(self) -> bool {
		matches!(
			self,
			RuleAction::AddHeader
				| RuleAction::ModifyHeader
				| RuleAction::DeleteHeader
				| RuleAction::ModifyBody
		)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleModel {
	pub id: Option<i64>,
	pub rule_name: String,
	pub filter_id: i64,
	pub action: RuleAction,
	pub target_key: String,
	pub target_value: String,
	pub enabled: bool,
}

impl RuleModel {
	pub fn new(
		id: Option<i64>,
		rule_name: impl Into<String>,
		filter_id: i64,
		action: RuleAction,
		target_key: impl Into<String>,
		target_value: impl Into<String>,
		enabled: bool,
	) -> Result<Self, ValidationError> {
		let rule_name = require_non_empty("rule_name", &rule_name.into())?;
		let target_key = require_non_empty("target_key", &target_key.into())?;
		let target_value = require_non_empty("target_value", &target_value.into())?;
		Ok(RuleModel {
			id,
			rule_name,
			filter_id,
			action,
			target_key,
			target_value,
			enabled,
		})
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
	FullSync,
	Add,
	Update,
	Delete,
}

impl OperationType {
	pub fn from_wire(v: i32) -> Self {
		match v {
			1 => OperationType::Add,
			2 => OperationType::Update,
			3 => OperationType::Delete,
			_ => OperationType::FullSync,
		}
	}

	pub fn to_wire(self) -> i32 {
		match self {
			OperationType::FullSync => 0,
			OperationType::Add => 1,
			OperationType::Update => 2,
			OperationType::Delete => 3,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncMessage {
	pub operation: OperationType,
	pub rules_list: Vec<RuleModel>,
	pub filters_data: Vec<FilterModel>,
	pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerEvent {
	pub status: String,
	pub port: u16,
}

/// A captured HTTP exchange. `BTreeMap` gives deterministic iteration order
/// for tests and logs; the spec does not require insertion order here (only
/// the rule cache's snapshot order matters for first-match semantics).
#[derive(Clone, Debug, PartialEq)]
pub struct FlowData {
	pub id: String,
	pub method: String,
	pub url: String,
	pub status: u16,
	pub start_timestamp: f64,
	pub end_timestamp: f64,
	pub request_size: u64,
	pub response_size: u64,
	pub request_headers: BTreeMap<String, String>,
	pub response_headers: BTreeMap<String, String>,
	pub request_body: String,
	pub response_body: String,
	pub is_intercepted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
	ServerEvent(ServerEvent),
	FlowData(FlowData),
	FilterModel(FilterModel),
	RuleModel(RuleModel),
	SyncMessage(SyncMessage),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_known_fields() {
		assert_eq!(FilterField::parse("url"), FilterField::Url);
		assert_eq!(FilterField::parse("method"), FilterField::Method);
		assert_eq!(FilterField::parse("body"), FilterField::Body);
		assert_eq!(
			FilterField::parse("header:Content-Type"),
			FilterField::Header("Content-Type".to_string())
		);
	}

	#[test]
	fn unknown_field_round_trips() {
		let f = FilterField::parse("cookie");
		assert_eq!(f, FilterField::Other("cookie".to_string()));
		assert_eq!(f.as_wire_string(), "cookie");
	}

	#[test]
	fn rejects_empty_names() {
		assert!(FilterModel::new(None, "", "url", Operator::Contains, "x").is_err());
		assert!(FilterModel::new(None, "f", "url", Operator::Contains, "  ").is_err());
	}

	#[test]
	fn trims_names() {
		let f = FilterModel::new(None, " f ", "url", Operator::Contains, "x").unwrap();
		assert_eq!(f.filter_name, "f");
	}
}
