//! Conversion between the domain model (`crate::model`) and the generated
//! protobuf types, plus length-delimited framing helpers.
//!
//! `interceptor-core` stays free of any I/O or async runtime dependency —
//! callers (the worker and control plane) own the byte stream and just hand
//! us whole frames via [`encode_envelope`]/[`decode_envelope`].

use std::collections::BTreeMap;

use prost::Message;
use thiserror::Error;

use crate::model::{
	Envelope, FilterModel, FlowData, OperationType, Operator, RuleAction, RuleModel, ServerEvent,
	SyncMessage, ValidationError,
};

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("failed to decode protobuf frame: {0}")]
	Prost(#[from] prost::DecodeError),
	#[error("failed to encode protobuf frame: {0}")]
	ProstEncode(#[from] prost::EncodeError),
	#[error("envelope carried no payload")]
	EmptyEnvelope,
	#[error("invalid field in decoded message: {0}")]
	Invalid(#[from] ValidationError),
}

fn wire_id(id: Option<i64>) -> i64 {
	id.unwrap_or(0)
}

fn domain_id(id: i64) -> Option<i64> {
	if id == 0 { None } else { Some(id) }
}

fn headers_to_pairs(headers: &BTreeMap<String, String>) -> Vec<interceptor_proto::HeaderPair> {
	headers
		.iter()
		.map(|(key, value)| interceptor_proto::HeaderPair {
			key: key.clone(),
			value: value.clone(),
		})
		.collect()
}

fn pairs_to_headers(pairs: &[interceptor_proto::HeaderPair]) -> BTreeMap<String, String> {
	pairs.iter().map(|p| (p.key.clone(), p.value.clone())).collect()
}

impl From<&FilterModel> for interceptor_proto::FilterModel {
	fn from(f: &FilterModel) -> Self {
		interceptor_proto::FilterModel {
			id: wire_id(f.id),
			filter_name: f.filter_name.clone(),
			field: f.field.as_wire_string(),
			operator: f.operator.to_wire(),
			value: f.value.clone(),
		}
	}
}

impl TryFrom<&interceptor_proto::FilterModel> for FilterModel {
	type Error = ValidationError;

	fn try_from(p: &interceptor_proto::FilterModel) -> Result<Self, Self::Error> {
		FilterModel::new(
			domain_id(p.id),
			p.filter_name.clone(),
			p.field.clone(),
			Operator::from_wire(p.operator),
			p.value.clone(),
		)
	}
}

impl From<&RuleModel> for interceptor_proto::RuleModel {
	fn from(r: &RuleModel) -> Self {
		interceptor_proto::RuleModel {
			id: wire_id(r.id),
			rule_name: r.rule_name.clone(),
			filter_id: r.filter_id,
			action: r.action.to_wire(),
			target_key: r.target_key.clone(),
			target_value: r.target_value.clone(),
			enabled: r.enabled,
		}
	}
}

impl TryFrom<&interceptor_proto::RuleModel> for RuleModel {
	type Error = ValidationError;

	fn try_from(p: &interceptor_proto::RuleModel) -> Result<Self, Self::Error> {
		RuleModel::new(
			domain_id(p.id),
			p.rule_name.clone(),
			p.filter_id,
			RuleAction::from_wire(p.action),
			p.target_key.clone(),
			p.target_value.clone(),
			p.enabled,
		)
	}
}

impl From<&FlowData> for interceptor_proto::FlowData {
	fn from(flow: &FlowData) -> Self {
		interceptor_proto::FlowData {
			id: flow.id.clone(),
			method: flow.method.clone(),
			url: flow.url.clone(),
			status: flow.status as u32,
			start_timestamp: flow.start_timestamp,
			end_timestamp: flow.end_timestamp,
			request_size: flow.request_size,
			response_size: flow.response_size,
			request_headers: headers_to_pairs(&flow.request_headers),
			response_headers: headers_to_pairs(&flow.response_headers),
			request_body: flow.request_body.clone(),
			response_body: flow.response_body.clone(),
			is_intercepted: flow.is_intercepted,
		}
	}
}

impl From<&interceptor_proto::FlowData> for FlowData {
	fn from(p: &interceptor_proto::FlowData) -> Self {
		FlowData {
			id: p.id.clone(),
			method: p.method.clone(),
			url: p.url.clone(),
			status: p.status as u16,
			start_timestamp: p.start_timestamp,
			end_timestamp: p.end_timestamp,
			request_size: p.request_size,
			response_size: p.response_size,
			request_headers: pairs_to_headers(&p.request_headers),
			response_headers: pairs_to_headers(&p.response_headers),
			request_body: p.request_body.clone(),
			response_body: p.response_body.clone(),
			is_intercepted: p.is_intercepted,
		}
	}
}

impl From<&ServerEvent> for interceptor_proto::ServerEvent {
	fn from(e: &ServerEvent) -> Self {
		interceptor_proto::ServerEvent {
			status: e.status.clone(),
			port: e.port as u32,
		}
	}
}

impl From<&interceptor_proto::ServerEvent> for ServerEvent {
	fn from(p: &interceptor_proto::ServerEvent) -> Self {
		ServerEvent {
			status: p.status.clone(),
			port: p.port as u16,
		}
	}
}

impl TryFrom<&SyncMessage> for interceptor_proto::SyncMessage {
	type Error = ValidationError;

	fn try_from(s: &SyncMessage) -> Result<Self, Self::Error> {
		Ok(interceptor_proto::SyncMessage {
			operation: s.operation.to_wire(),
			rules_list: s.rules_list.iter().map(interceptor_proto::RuleModel::from).collect(),
			filters_data: s
				.filters_data
				.iter()
				.map(interceptor_proto::FilterModel::from)
				.collect(),
			timestamp: s.timestamp,
		})
	}
}

impl TryFrom<&interceptor_proto::SyncMessage> for SyncMessage {
	type Error = ValidationError;

	fn try_from(p: &interceptor_proto::SyncMessage) -> Result<Self, Self::Error> {
		let rules_list = p
			.rules_list
			.iter()
			.map(RuleModel::try_from)
			.collect::<Result<Vec<_>, _>>()?;
		let filters_data = p
			.filters_data
			.iter()
			.map(FilterModel::try_from)
			.collect::<Result<Vec<_>, _>>()?;
		Ok(SyncMessage {
			operation: OperationType::from_wire(p.operation),
			rules_list,
			filters_data,
			timestamp: p.timestamp,
		})
	}
}

fn envelope_to_wire(env: &Envelope) -> Result<interceptor_proto::Envelope, ValidationError> {
	use interceptor_proto::envelope::Data;
	let data = match env {
		Envelope::ServerEvent(e) => Data::ServerEvent(e.into()),
		Envelope::FlowData(f) => Data::FlowData(f.into()),
		Envelope::FilterModel(f) => Data::FilterModel(f.into()),
		Envelope::RuleModel(r) => Data::RuleModel(r.into()),
		Envelope::SyncMessage(s) => Data::SyncMessage(interceptor_proto::SyncMessage::try_from(s)?),
	};
	Ok(interceptor_proto::Envelope { data: Some(data) })
}

fn envelope_from_wire(p: interceptor_proto::Envelope) -> Result<Envelope, CodecError> {
	use interceptor_proto::envelope::Data;
	match p.data.ok_or(CodecError::EmptyEnvelope)? {
		Data::ServerEvent(e) => Ok(Envelope::ServerEvent((&e).into())),
		Data::FlowData(f) => Ok(Envelope::FlowData((&f).into())),
		Data::FilterModel(f) => Ok(Envelope::FilterModel(FilterModel::try_from(&f)?)),
		Data::RuleModel(r) => Ok(Envelope::RuleModel(RuleModel::try_from(&r)?)),
		Data::SyncMessage(s) => Ok(Envelope::SyncMessage(SyncMessage::try_from(&s)?)),
	}
}

/// Encodes one envelope as a length-delimited protobuf frame: a 4-byte
/// big-endian length prefix followed by the message bytes.
pub fn encode_envelope(env: &Envelope) -> Result<Vec<u8>, CodecError> {
	let wire = envelope_to_wire(env)?;
	let mut buf = Vec::with_capacity(4 + wire.encoded_len());
	buf.extend_from_slice(&(wire.encoded_len() as u32).to_be_bytes());
	wire.encode(&mut buf)?;
	Ok(buf)
}

/// Decodes a single envelope from exactly the message bytes (no length
/// prefix) — the caller is responsible for having already read the frame.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
	let wire = interceptor_proto::Envelope::decode(bytes)?;
	envelope_from_wire(wire)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::FilterField;

	#[test]
	fn round_trips_filter_model_through_envelope() {
		let filter = FilterModel::new(Some(7), "f1", "header:X-Trace", Operator::Regex, "^abc").unwrap();
		let env = Envelope::FilterModel(filter.clone());
		let wire = envelope_to_wire(&env).unwrap();
		let mut buf = Vec::new();
		wire.encode(&mut buf).unwrap();
		let decoded = envelope_from_wire(interceptor_proto::Envelope::decode(buf.as_slice()).unwrap()).unwrap();
		match decoded {
			Envelope::FilterModel(d) => {
				assert_eq!(d.id, Some(7));
				assert_eq!(d.field, FilterField::Header("X-Trace".to_string()));
				assert_eq!(d, filter);
			}
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn unpersisted_id_round_trips_through_zero() {
		let filter = FilterModel::new(None, "f1", "url", Operator::Contains, "x").unwrap();
		let wire = interceptor_proto::FilterModel::from(&filter);
		assert_eq!(wire.id, 0);
		let back = FilterModel::try_from(&wire).unwrap();
		assert_eq!(back.id, None);
	}

	#[test]
	fn length_prefixed_frame_round_trips() {
		let env = Envelope::ServerEvent(ServerEvent {
			status: "started".to_string(),
			port: 9090,
		});
		let frame = encode_envelope(&env).unwrap();
		let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
		assert_eq!(len, frame.len() - 4);
		let decoded = decode_envelope(&frame[4..]).unwrap();
		assert_eq!(decoded, env);
	}
}
