//! Excludes the interceptor's own control-plane traffic from interception.
//!
//! Without this, a browser configured to proxy all traffic through the
//! interceptor would have the management API and observer websocket
//! themselves pass through the MITM engine, which the original addon avoids
//! with a short list of regexes plus a couple of header checks run before
//! any rule evaluation.

use regex::Regex;

/// Requests carrying this header (value `"true"`) are always excluded,
/// regardless of URL. The management UI's own HTTP client sets it on calls
/// that must never be intercepted even if they happen to hit a host/port
/// pattern the regex list doesn't cover.
pub const MARKER_HEADER: &str = "x-interceptor-internal";

/// Substring checked against the `User-Agent` header; the bundled UI's
/// fetch client identifies itself this way.
const UI_USER_AGENT_MARKER: &str = "http-interceptor-ui";

pub struct ExclusionSet {
	patterns: Vec<Regex>,
}

impl ExclusionSet {
	/// Builds the exclusion set for a running instance. `mgmt_port` and
	/// `dev_port` are the *actual* bound ports (post port-fallback), not the
	/// requested ones — an instance that fell back to its 50th alternate
	/// port still must not intercept its own control traffic.
	pub fn new(mgmt_port: u16, dev_port: u16) -> Self {
		let raw = vec![
			format!(r"^https?://(127\.0\.0\.1|localhost):{mgmt_port}/api/"),
			format!(r"^https?://(127\.0\.0\.1|localhost):{mgmt_port}/ws"),
			format!(r"^https?://(127\.0\.0\.1|localhost):{mgmt_port}/docs"),
			format!(r"^https?://(127\.0\.0\.1|localhost):{mgmt_port}/openapi\.json"),
			format!(r"^https?://(127\.0\.0\.1|localhost):{mgmt_port}/?$"),
			r"^chrome-extension://".to_string(),
			r"^moz-extension://".to_string(),
			r".*/ws(\?.*)?$".to_string(),
			format!(r"^https?://(127\.0\.0\.1|localhost):{dev_port}/"),
		];
		let patterns = raw
			.into_iter()
			.map(|p| Regex::new(&format!("(?i){p}")).expect("exclusion pattern is statically valid"))
			.collect();
		ExclusionSet { patterns }
	}

	/// `marker_header` is the value of the `x-interceptor-internal` request
	/// header, if present; `user_agent` is the value of `User-Agent`, if
	/// present. Both are `None` when the header is absent.
	pub fn is_excluded(&self, url: &str, marker_header: Option<&str>, user_agent: Option<&str>) -> bool {
		if marker_header.is_some_and(|v| v.eq_ignore_ascii_case("true")) {
			return true;
		}
		if user_agent.is_some_and(|ua| ua.contains(UI_USER_AGENT_MARKER)) {
			return true;
		}
		self.patterns.iter().any(|p| p.is_match(url))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn excludes_management_port_regardless_of_scheme() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded("http://127.0.0.1:8800/api/rules", None, None));
		assert!(set.is_excluded("https://localhost:8800/", None, None));
	}

	#[test]
	fn excludes_dev_port() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded("http://localhost:5173/app.js", None, None));
	}

	#[test]
	fn tracks_actual_fallback_port_not_default() {
		let set = ExclusionSet::new(8850, 5173);
		assert!(set.is_excluded("http://127.0.0.1:8850/api/rules", None, None));
		assert!(!set.is_excluded("http://127.0.0.1:8800/api/rules", None, None));
	}

	#[test]
	fn does_not_exclude_unrelated_hosts() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(!set.is_excluded("https://api.example.com/v1/users", None, None));
	}

	#[test]
	fn marker_header_excludes_any_url() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded("https://api.example.com/v1/users", Some("true"), None));
	}

	#[test]
	fn ui_user_agent_excludes_any_url() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded(
			"https://api.example.com/v1/users",
			None,
			Some("http-interceptor-ui/1.0")
		));
	}

	#[test]
	fn generic_websocket_suffix_is_excluded() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded("https://upstream.example.com/chat/ws", None, None));
	}

	#[test]
	fn extension_schemes_are_excluded() {
		let set = ExclusionSet::new(8800, 5173);
		assert!(set.is_excluded("chrome-extension://abcdefg/inject.js", None, None));
		assert!(set.is_excluded("moz-extension://abcdefg/inject.js", None, None));
	}
}
