//! The `MetaStore` trait: CRUD + iteration for Objects, Submissions, Results
//! and Configs, dispatched through `Arc<dyn MetaStore>` so the engine backing
//! a deployment (Cassandra, MongoDB, in-memory) is chosen at bootstrap.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use storage_util::error::{Error, Result};

use crate::model::{ConfigEntry, Object, ResultRecord, Submission};

#[async_trait]
pub trait MetaStore: Send + Sync {
	/// Idempotent bootstrap. Fails with `Error::AlreadyExists` if any target
	/// table/collection already exists.
	async fn setup_schema(&self) -> Result<()>;

	/// Inserts one Submission and returns its assigned UUID. Never
	/// deduplicates.
	async fn store_submission(&self, submission: Submission) -> Result<Uuid>;

	/// Upserts an Object by SHA-256. Reads back the current submission list
	/// for `object.sha256` (must be non-empty, else `Error::OrphanWrite`);
	/// exactly one submission inserts and returns `true`, more than one
	/// updates the aggregate fields and returns `false`.
	async fn store_object(&self, object: &Object) -> Result<bool>;

	/// Recomputes aggregate fields from current Submissions. Used as a
	/// compensating action after a just-added submission is rolled back.
	async fn update_object(&self, sha256: &str) -> Result<()>;

	async fn get_object(&self, sha256: &str) -> Result<Object>;
	async fn get_submission(&self, id: Uuid) -> Result<Submission>;
	async fn get_result(&self, id: Uuid) -> Result<ResultRecord>;
	async fn get_config(&self, path: &str) -> Result<ConfigEntry>;

	async fn store_result(&self, result: ResultRecord) -> Result<Uuid>;
	async fn store_config(&self, config: ConfigEntry) -> Result<()>;

	async fn delete_object(&self, sha256: &str) -> Result<()>;
	async fn delete_submission(&self, id: Uuid) -> Result<()>;
	async fn delete_all_submissions_of_object(&self, sha256: &str) -> Result<()>;

	/// Deletes every Submission for `sha256`, then the Object itself. Used by
	/// OrphanReconciler's `MS` bin (the blob is gone; the caller is
	/// responsible for any blob-side cleanup, MetaStore stays blob-agnostic).
	async fn delete_sample_and_submissions(&self, sha256: &str) -> Result<()> {
		self.delete_all_submissions_of_object(sha256).await?;
		self.delete_object(sha256).await
	}

	async fn submissions_for(&self, sha256: &str) -> Result<Vec<Submission>>;

	/// Streams every (sha256, last_modified) pair over `tx`, for
	/// OrphanReconciler's M set. M may be too large to hold in memory, so
	/// this is push-based rather than returning a `Vec`.
	async fn iterate_objects(&self, tx: mpsc::Sender<(String, DateTime<Utc>)>) -> Result<()>;

	/// Every SHA-256 with a Submission, mapped to the earliest Submission
	/// timestamp seen for that key. S is assumed to fit in memory.
	async fn iterate_submissions_first_seen(&self) -> Result<HashMap<String, DateTime<Utc>>>;

	async fn search_objects(&self) -> Result<Vec<Object>> {
		Err(Error::NotImplemented("object search"))
	}
	async fn search_results(&self) -> Result<Vec<ResultRecord>> {
		Err(Error::NotImplemented("result search"))
	}
	async fn search_submissions(&self) -> Result<Vec<Submission>> {
		Err(Error::NotImplemented("submission search"))
	}
}
