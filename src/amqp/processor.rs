//! Per-delivery processing: decode, gzip-compress, store, decide the ack
//! outcome. An oversize result row gets `Ack` (drop, it will never fit);
//! every other storage error gets `Nack(requeue=true)`.
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use storage_meta::model::ResultRecord;
use storage_meta::MetaStore;
use storage_util::error::Error;

use crate::message::{service_name_from_routing_key, ResultMessage};

/// What the consumer loop should do with the delivery once processing
/// finishes.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
	Ack,
	NackRequeue,
	NackDrop,
}

pub async fn process_delivery(
	meta: &Arc<dyn MetaStore>,
	routing_key: &str,
	body: &[u8],
) -> AckOutcome {
	let message: ResultMessage = match serde_json::from_slice(body) {
		Ok(m) => m,
		Err(e) => {
			warn!("poison AMQP message, dropping: {}", e);
			return AckOutcome::NackDrop;
		}
	};

	let compressed = match gzip(message.data.as_bytes()) {
		Ok(bytes) => bytes,
		Err(e) => {
			warn!("gzip compression failed, requeueing: {}", e);
			return AckOutcome::NackRequeue;
		}
	};

	let result = ResultRecord {
		id: Uuid::now_v7(),
		sha256: message.sha256.to_lowercase(),
		schema_version: "NotSend".to_string(),
		service_name: service_name_from_routing_key(routing_key),
		service_version: "NotSend".to_string(),
		service_config: "NotSend".to_string(),
		object_type: "NotSend".to_string(),
		object_category: Vec::new(),
		results: compressed,
		tags: message.tags,
		execution_time: Utc::now(),
		watchguard_status: "NotSend".to_string(),
		watchguard_log: Vec::new(),
		watchguard_version: "NotSend".to_string(),
	};

	match meta.store_result(result).await {
		Ok(_) => AckOutcome::Ack,
		Err(Error::Oversize(msg)) => {
			warn!("result row too large, dropping: {}", msg);
			AckOutcome::Ack
		}
		Err(e) => {
			warn!("storing result failed, requeueing: {}", e);
			AckOutcome::NackRequeue
		}
	}
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(data)?;
	encoder.finish()
}

#[cfg(test)]
mod test {
	use super::*;
	use std::collections::HashMap;

	use async_trait::async_trait;
	use chrono::DateTime;

	use storage_meta::memory::MemoryMetaStore;
	use storage_meta::model::{ConfigEntry, Object, Submission};
	use storage_util::error::Result;

	#[tokio::test]
	async fn malformed_json_is_dropped_without_requeue() {
		let meta: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());
		let outcome = process_delivery(&meta, "peid.result.v1", b"not json").await;
		assert_eq!(outcome, AckOutcome::NackDrop);
	}

	#[tokio::test]
	async fn valid_message_is_stored_and_acked() {
		let meta: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());
		let body = serde_json::json!({
			"filename": "sample.bin",
			"data": "{\"verdict\":\"malicious\"}",
			"tags": ["trojan"],
			"md5": "d41d8cd98f00b204e9800998ecf8427e",
			"sha1": "da39a3ee5e6b4b0d3255bfef95601890afd80709",
			"sha256": "ABCDEF",
		});
		let outcome = process_delivery(&meta, "peid.result.v1", body.to_string().as_bytes()).await;
		assert_eq!(outcome, AckOutcome::Ack);
	}

	/// A `MetaStore` whose `store_result` always fails the same way, for
	/// exercising the ack-outcome branches that depend on the failure kind.
	struct FailingMetaStore(fn() -> Error);

	#[async_trait]
	impl MetaStore for FailingMetaStore {
		async fn setup_schema(&self) -> Result<()> {
			unimplemented!()
		}
		async fn store_submission(&self, _: Submission) -> Result<Uuid> {
			unimplemented!()
		}
		async fn store_object(&self, _: &Object) -> Result<bool> {
			unimplemented!()
		}
		async fn update_object(&self, _: &str) -> Result<()> {
			unimplemented!()
		}
		async fn get_object(&self, _: &str) -> Result<Object> {
			unimplemented!()
		}
		async fn get_submission(&self, _: Uuid) -> Result<Submission> {
			unimplemented!()
		}
		async fn get_result(&self, _: Uuid) -> Result<ResultRecord> {
			unimplemented!()
		}
		async fn get_config(&self, _: &str) -> Result<ConfigEntry> {
			unimplemented!()
		}
		async fn store_result(&self, _: ResultRecord) -> Result<Uuid> {
			Err((self.0)())
		}
		async fn store_config(&self, _: ConfigEntry) -> Result<()> {
			unimplemented!()
		}
		async fn delete_object(&self, _: &str) -> Result<()> {
			unimplemented!()
		}
		async fn delete_submission(&self, _: Uuid) -> Result<()> {
			unimplemented!()
		}
		async fn delete_all_submissions_of_object(&self, _: &str) -> Result<()> {
			unimplemented!()
		}
		async fn submissions_for(&self, _: &str) -> Result<Vec<Submission>> {
			unimplemented!()
		}
		async fn iterate_objects(
			&self,
			_: tokio::sync::mpsc::Sender<(String, DateTime<Utc>)>,
		) -> Result<()> {
			unimplemented!()
		}
		async fn iterate_submissions_first_seen(&self) -> Result<HashMap<String, DateTime<Utc>>> {
			unimplemented!()
		}
	}

	fn ok_message_body() -> Vec<u8> {
		serde_json::json!({
			"filename": "big.bin",
			"data": "{\"verdict\":\"malicious\"}",
			"tags": [],
			"md5": "d41d8cd98f00b204e9800998ecf8427e",
			"sha1": "da39a3ee5e6b4b0d3255bfef95601890afd80709",
			"sha256": "ABCDEF",
		})
		.to_string()
		.into_bytes()
	}

	#[tokio::test]
	async fn oversize_result_is_acked_and_dropped() {
		let meta: Arc<dyn MetaStore> =
			Arc::new(FailingMetaStore(|| Error::Oversize("row exceeds column limit".into())));
		let outcome = process_delivery(&meta, "peid.result.v1", &ok_message_body()).await;
		assert_eq!(outcome, AckOutcome::Ack);
	}

	#[tokio::test]
	async fn transient_storage_error_is_requeued() {
		let meta: Arc<dyn MetaStore> =
			Arc::new(FailingMetaStore(|| Error::Transient("connection reset".into())));
		let outcome = process_delivery(&meta, "peid.result.v1", &ok_message_body()).await;
		assert_eq!(outcome, AckOutcome::NackRequeue);
	}
}
