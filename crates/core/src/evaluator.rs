//! Filter evaluation against an inbound/outbound HTTP request.
//!
//! Filters only ever look at request attributes (method, url, request
//! headers, request body) — even when a rule fires in the response phase the
//! triggering filter is evaluated against the request that produced that
//! response. This mirrors the original addon, which stashes the request on
//! the flow and re-checks the same filter at both hook points.

use regex::Regex;

use crate::model::{FilterField, FilterModel, Operator};

/// A read-only view over the request attributes a filter can select on.
/// Transport crates (hudsucker, hyper, or a test double) implement this
/// directly instead of the evaluator depending on any HTTP crate.
pub trait RequestView {
	fn url(&self) -> &str;
	fn method(&self) -> &str;
	fn header(&self, name: &str) -> Option<&str>;
	fn body_text(&self) -> std::borrow::Cow<'_, str>;
}

fn apply_operator(op: Operator, haystack: &str, needle: &str) -> bool {
	match op {
		Operator::Contains => haystack.contains(needle),
		Operator::Equals => haystack == needle,
		Operator::StartsWith => haystack.starts_with(needle),
		Operator::EndsWith => haystack.ends_with(needle),
		Operator::Regex => Regex::new(needle).is_ok_and(|re| re.is_match(haystack)),
	}
}

impl FilterModel {
	/// Evaluates this filter against `req`. An unrecognized field selector,
	/// a missing header, or an invalid regex pattern all evaluate to `false`
	/// rather than erroring — a misconfigured filter should never panic the
	/// proxy's request path.
	pub fn evaluate(&self, req: &dyn RequestView) -> bool {
		let haystack = match &self.field {
			FilterField::Url => req.url().to_string(),
			FilterField::Method => req.method().to_string(),
			FilterField::Body => req.body_text().into_owned(),
			FilterField::Header(name) => match req.header(name) {
				Some(v) => v.to_string(),
				None => return false,
			},
			FilterField::Other(_) => return false,
		};
		apply_operator(self.operator, &haystack, &self.value)
	}
}
