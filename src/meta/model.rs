//! Entity shapes shared by every `MetaStore` backend.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `Object.object_type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
	File,
	Domain,
	Ip,
	Email,
	Generic,
}

impl Default for ObjectType {
	fn default() -> Self {
		ObjectType::File
	}
}

/// Deduplicated metadata record for a unique SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
	pub sha256: String,
	pub md5: String,
	pub sha1: String,
	pub mime: String,
	pub object_type: ObjectType,
	pub source: HashSet<String>,
	pub object_name: HashSet<String>,
	pub submissions: HashSet<String>,
	pub created: DateTime<Utc>,
}

impl Object {
	pub fn new(sha256: String, md5: String, sha1: String, mime: String) -> Self {
		Object {
			sha256,
			md5,
			sha1,
			mime,
			object_type: ObjectType::File,
			source: HashSet::new(),
			object_name: HashSet::new(),
			submissions: HashSet::new(),
			created: Utc::now(),
		}
	}
}

/// One event of offering an Object to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
	pub id: Uuid,
	pub sha256: String,
	pub user_id: String,
	pub source: String,
	pub name: String,
	pub date_time: DateTime<Utc>,
	pub tags: Vec<String>,
	pub comment: String,
}

/// Output of one scanner's analysis of one Object. `results` is opaque bytes
/// (gzip-compressed by the AMQP ingester before being stored here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
	pub id: Uuid,
	pub sha256: String,
	pub schema_version: String,
	pub service_name: String,
	pub service_version: String,
	pub service_config: String,
	pub object_type: String,
	pub object_category: Vec<String>,
	#[serde(with = "serde_bytes_vec")]
	pub results: Vec<u8>,
	pub tags: Vec<String>,
	pub execution_time: DateTime<Utc>,
	pub watchguard_status: String,
	pub watchguard_log: Vec<String>,
	pub watchguard_version: String,
}

/// Opaque config blob keyed by path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
	pub path: String,
	pub file_contents: Vec<u8>,
}

/// `results` round-trips as raw bytes rather than a base64 string in most
/// backend wire formats; keep a named module so call sites read clearly.
mod serde_bytes_vec {
	use serde::{Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		serde_bytes::serialize(bytes, s)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		serde_bytes::deserialize(d)
	}
}
