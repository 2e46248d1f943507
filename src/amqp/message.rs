//! The AMQP delivery envelope.
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResultMessage {
	pub filename: String,
	pub data: String,
	#[serde(default)]
	pub tags: Vec<String>,
	pub md5: String,
	pub sha1: String,
	pub sha256: String,
}

/// Service name is the substring of the routing key up to the first `.`,
/// e.g. `"peid.result.v1"` -> `"peid"`.
pub fn service_name_from_routing_key(routing_key: &str) -> String {
	routing_key.splitn(2, '.').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn service_name_splits_on_first_dot() {
		assert_eq!(service_name_from_routing_key("peid.result.v1"), "peid");
		assert_eq!(service_name_from_routing_key("plain"), "plain");
	}
}
