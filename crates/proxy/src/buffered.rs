//! In-memory adapters that let `interceptor-core`'s transport-agnostic
//! `RequestView`/`MutableHttpMessage` traits operate on a fully-buffered
//! `http::{Request,Response}`. Buffering the whole body up front is what
//! makes body filters and MODIFY_BODY possible at all — hudsucker hands us
//! a streaming body, and a filter can't evaluate a regex against a stream.

use std::collections::BTreeMap;

use bytes::Bytes;
use interceptor_core::actions::MutableHttpMessage;
use interceptor_core::evaluator::RequestView;

pub(crate) fn headers_to_map(headers: &http::HeaderMap) -> BTreeMap<String, String> {
	headers
		.iter()
		.filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
		.collect()
}

/// A request captured at the point it entered the proxy, kept around so the
/// response phase can re-evaluate request-only filters.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
	pub method: String,
	pub url: String,
	pub headers: BTreeMap<String, String>,
	pub body: Bytes,
}

impl CapturedRequest {
	pub fn from_parts(parts: &http::request::Parts, body: &Bytes) -> Self {
		CapturedRequest {
			method: parts.method.as_str().to_string(),
			url: parts.uri.to_string(),
			headers: headers_to_map(&parts.headers),
			body: body.clone(),
		}
	}
}

impl RequestView for CapturedRequest {
	fn url(&self) -> &str {
		&self.url
	}

	fn method(&self) -> &str {
		&self.method
	}

	fn header(&self, name: &str) -> Option<&str> {
		let needle = name.to_ascii_lowercase();
		self
			.headers
			.iter()
			.find(|(k, _)| k.to_ascii_lowercase() == needle)
			.map(|(_, v)| v.as_str())
	}

	fn body_text(&self) -> std::borrow::Cow<'_, str> {
		String::from_utf8_lossy(&self.body)
	}
}

/// Mutable view over an `http::request::Parts` + buffered body pair.
pub struct MutableRequest<'a> {
	pub parts: &'a mut http::request::Parts,
	pub body: &'a mut Bytes,
}

/// Mutable view over an `http::response::Parts` + buffered body pair.
pub struct MutableResponse<'a> {
	pub parts: &'a mut http::response::Parts,
	pub body: &'a mut Bytes,
}

macro_rules! impl_mutable_http_message {
	($ty:ident) => {
		impl MutableHttpMessage for $ty<'_> {
			fn set_header(&mut self, key: &str, value: &str) {
				if let (Ok(name), Ok(val)) = (
					http::header::HeaderName::try_from(key),
					http::header::HeaderValue::try_from(value),
				) {
					self.parts.headers.insert(name, val);
				}
			}

			fn remove_header(&mut self, key: &str) -> bool {
				match http::header::HeaderName::try_from(key) {
					Ok(name) => self.parts.headers.remove(name).is_some(),
					Err(_) => false,
				}
			}

			fn has_header(&self, key: &str) -> bool {
				match http::header::HeaderName::try_from(key) {
					Ok(name) => self.parts.headers.contains_key(name),
					Err(_) => false,
				}
			}

			fn set_body(&mut self, body: Vec<u8>) {
				*self.body = Bytes::from(body);
			}
		}
	};
}

impl_mutable_http_message!(MutableRequest);
impl_mutable_http_message!(MutableResponse);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn captured_request_header_lookup_is_case_insensitive() {
		let req = http::Request::builder()
			.method("POST")
			.uri("https://example.com/x")
			.header("Content-Type", "application/json")
			.body(())
			.unwrap();
		let (parts, _) = req.into_parts();
		let captured = CapturedRequest::from_parts(&parts, &Bytes::from_static(b"{}"));
		assert_eq!(captured.header("content-type"), Some("application/json"));
	}
}
