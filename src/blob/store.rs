//! The `BlobStore` trait: content-addressed sample bytes, keyed by SHA-256.
//! The config/recovery surface lives on `storage_meta::MetaStore` instead,
//! since this service keeps the two stores' lifecycles independent.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use storage_util::error::Result;

#[async_trait]
pub trait BlobStore: Send + Sync {
	/// Idempotent bootstrap (e.g. bucket creation). Safe to call when the
	/// target already exists.
	async fn setup(&self) -> Result<()>;

	/// Writes `data` under `sha256`. Storing an already-present key is a
	/// no-op success, not a duplicate error: MetaStore's submission count is
	/// the system's source of truth for "is this a new sample".
	async fn store(&self, sha256: &str, data: Bytes) -> Result<()>;

	async fn get(&self, sha256: &str) -> Result<Bytes>;

	/// Deletes the blob. Returns `Ok(())` even if the key was already
	/// absent, matching OrphanReconciler's bin `S` cleanup which may race
	/// with a concurrent delete.
	async fn delete(&self, sha256: &str) -> Result<()>;

	/// True if `sha256` exists without transferring its bytes. Used by
	/// OrphanReconciler to build bin `O` cheaply.
	async fn exists(&self, sha256: &str) -> Result<bool>;

	/// Every key currently stored. OrphanReconciler assumes this set fits in
	/// memory.
	async fn list_keys(&self) -> Result<Vec<String>>;

	/// Every key with its last-modified time, for OrphanReconciler's bin `O`.
	/// The default implementation stamps every key with "now", which is
	/// correct for backends (like the in-memory one) with no native
	/// modification-time tracking; real backends should override this.
	async fn list_keys_with_timestamps(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		let now = Utc::now();
		Ok(self
			.list_keys()
			.await?
			.into_iter()
			.map(|k| (k, now))
			.collect())
	}
}
