//! In-memory `BlobStore`, for tests.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use storage_util::error::{Error, Result};

use crate::store::BlobStore;

struct Entry {
	data: Bytes,
	stored_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryBlobStore {
	data: Mutex<HashMap<String, Entry>>,
}

impl MemoryBlobStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Test-only helper: insert a blob with an explicit timestamp, for
	/// exercising OrphanReconciler's quiescence cutoff without a real clock.
	pub fn store_with_timestamp(&self, sha256: &str, data: Bytes, stored_at: DateTime<Utc>) {
		self.data
			.lock()
			.unwrap()
			.insert(sha256.to_string(), Entry { data, stored_at });
	}
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
	async fn setup(&self) -> Result<()> {
		Ok(())
	}

	async fn store(&self, sha256: &str, data: Bytes) -> Result<()> {
		self.data.lock().unwrap().insert(
			sha256.to_string(),
			Entry {
				data,
				stored_at: Utc::now(),
			},
		);
		Ok(())
	}

	async fn get(&self, sha256: &str) -> Result<Bytes> {
		self.data
			.lock()
			.unwrap()
			.get(sha256)
			.map(|e| e.data.clone())
			.ok_or(Error::NotFound)
	}

	async fn delete(&self, sha256: &str) -> Result<()> {
		self.data.lock().unwrap().remove(sha256);
		Ok(())
	}

	async fn exists(&self, sha256: &str) -> Result<bool> {
		Ok(self.data.lock().unwrap().contains_key(sha256))
	}

	async fn list_keys(&self) -> Result<Vec<String>> {
		Ok(self.data.lock().unwrap().keys().cloned().collect())
	}

	async fn list_keys_with_timestamps(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		Ok(self
			.data
			.lock()
			.unwrap()
			.iter()
			.map(|(k, e)| (k.clone(), e.stored_at))
			.collect())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn store_then_get_round_trips() {
		let store = MemoryBlobStore::new();
		store.store("abc", Bytes::from_static(b"hello")).await.unwrap();
		let data = store.get("abc").await.unwrap();
		assert_eq!(&data[..], b"hello");
	}

	#[tokio::test]
	async fn get_missing_is_not_found() {
		let store = MemoryBlobStore::new();
		let err = store.get("missing").await.unwrap_err();
		assert!(matches!(err, Error::NotFound));
	}

	#[tokio::test]
	async fn storing_twice_is_idempotent() {
		let store = MemoryBlobStore::new();
		store.store("abc", Bytes::from_static(b"first")).await.unwrap();
		store.store("abc", Bytes::from_static(b"first")).await.unwrap();
		assert_eq!(store.list_keys().await.unwrap().len(), 1);
	}
}
