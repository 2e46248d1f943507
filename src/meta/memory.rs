//! In-memory `MetaStore`, used by the test suites of `storage_api`,
//! `storage_amqp` and `storage_reconciler` so they don't need a live
//! Cassandra/MongoDB cluster.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use storage_util::error::{Error, Result};

use crate::model::{ConfigEntry, Object, ResultRecord, Submission};
use crate::store::MetaStore;

#[derive(Default)]
struct Tables {
	objects: HashMap<String, Object>,
	submissions: HashMap<Uuid, Submission>,
	results: HashMap<Uuid, ResultRecord>,
	configs: HashMap<String, ConfigEntry>,
	schema_ready: bool,
}

/// A `MetaStore` backed entirely by in-process `HashMap`s behind a `Mutex`.
/// Not meant for production: it exists purely so tests can exercise the
/// write-ordering and reconciliation logic without network backends.
pub struct MemoryMetaStore {
	tables: Mutex<Tables>,
}

impl MemoryMetaStore {
	pub fn new() -> Self {
		MemoryMetaStore {
			tables: Mutex::new(Tables::default()),
		}
	}
}

impl Default for MemoryMetaStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
	async fn setup_schema(&self) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		if t.schema_ready {
			return Err(Error::AlreadyExists("in-memory schema".into()));
		}
		t.schema_ready = true;
		Ok(())
	}

	async fn store_submission(&self, submission: Submission) -> Result<Uuid> {
		let mut t = self.tables.lock().unwrap();
		let id = submission.id;
		t.submissions.insert(id, submission);
		Ok(id)
	}

	async fn store_object(&self, object: &Object) -> Result<bool> {
		let mut t = self.tables.lock().unwrap();
		let count = t
			.submissions
			.values()
			.filter(|s| s.sha256 == object.sha256)
			.count();
		if count == 0 {
			return Err(Error::OrphanWrite(object.sha256.clone()));
		}
		let inserted = !t.objects.contains_key(&object.sha256);
		let mut object = object.clone();
		recompute_aggregates(&t.submissions, &mut object);
		t.objects.insert(object.sha256.clone(), object);
		Ok(inserted)
	}

	async fn update_object(&self, sha256: &str) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		let submissions = t.submissions.clone();
		let obj = t
			.objects
			.get_mut(sha256)
			.ok_or(Error::NotFound)?;
		recompute_aggregates(&submissions, obj);
		Ok(())
	}

	async fn get_object(&self, sha256: &str) -> Result<Object> {
		let t = self.tables.lock().unwrap();
		t.objects.get(sha256).cloned().ok_or(Error::NotFound)
	}

	async fn get_submission(&self, id: Uuid) -> Result<Submission> {
		let t = self.tables.lock().unwrap();
		t.submissions.get(&id).cloned().ok_or(Error::NotFound)
	}

	async fn get_result(&self, id: Uuid) -> Result<ResultRecord> {
		let t = self.tables.lock().unwrap();
		t.results.get(&id).cloned().ok_or(Error::NotFound)
	}

	async fn get_config(&self, path: &str) -> Result<ConfigEntry> {
		let t = self.tables.lock().unwrap();
		t.configs.get(path).cloned().ok_or(Error::NotFound)
	}

	async fn store_result(&self, result: ResultRecord) -> Result<Uuid> {
		let mut t = self.tables.lock().unwrap();
		let id = result.id;
		t.results.insert(id, result);
		Ok(id)
	}

	async fn store_config(&self, config: ConfigEntry) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		t.configs.insert(config.path.clone(), config);
		Ok(())
	}

	async fn delete_object(&self, sha256: &str) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		t.objects.remove(sha256).ok_or(Error::NotFound)?;
		Ok(())
	}

	async fn delete_submission(&self, id: Uuid) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		t.submissions.remove(&id).ok_or(Error::NotFound)?;
		Ok(())
	}

	async fn delete_all_submissions_of_object(&self, sha256: &str) -> Result<()> {
		let mut t = self.tables.lock().unwrap();
		t.submissions.retain(|_, s| s.sha256 != sha256);
		Ok(())
	}

	async fn submissions_for(&self, sha256: &str) -> Result<Vec<Submission>> {
		let t = self.tables.lock().unwrap();
		Ok(t.submissions
			.values()
			.filter(|s| s.sha256 == sha256)
			.cloned()
			.collect())
	}

	async fn iterate_objects(&self, tx: mpsc::Sender<(String, DateTime<Utc>)>) -> Result<()> {
		let items: Vec<(String, DateTime<Utc>)> = {
			let t = self.tables.lock().unwrap();
			t.objects
				.values()
				.map(|o| (o.sha256.clone(), o.created))
				.collect()
		};
		for item in items {
			if tx.send(item).await.is_err() {
				break;
			}
		}
		Ok(())
	}

	async fn iterate_submissions_first_seen(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		let t = self.tables.lock().unwrap();
		let mut out: HashMap<String, DateTime<Utc>> = HashMap::new();
		for s in t.submissions.values() {
			out.entry(s.sha256.clone())
				.and_modify(|ts| {
					if s.date_time < *ts {
						*ts = s.date_time;
					}
				})
				.or_insert(s.date_time);
		}
		Ok(out)
	}
}

fn recompute_aggregates(submissions: &HashMap<Uuid, Submission>, object: &mut Object) {
	object.source.clear();
	object.object_name.clear();
	object.submissions.clear();
	for s in submissions.values().filter(|s| s.sha256 == object.sha256) {
		object.source.insert(s.source.clone());
		object.object_name.insert(s.name.clone());
		object.submissions.insert(s.id.to_string());
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn submission(sha256: &str) -> Submission {
		Submission {
			id: Uuid::now_v7(),
			sha256: sha256.to_string(),
			user_id: "alice".into(),
			source: "upload".into(),
			name: "sample.bin".into(),
			date_time: Utc::now(),
			tags: vec![],
			comment: String::new(),
		}
	}

	#[tokio::test]
	async fn store_object_requires_a_submission() {
		let store = MemoryMetaStore::new();
		let obj = Object::new("abc".into(), "d".into(), "e".into(), "text/plain".into());
		let err = store.store_object(&obj).await.unwrap_err();
		assert!(matches!(err, Error::OrphanWrite(_)));
	}

	#[tokio::test]
	async fn first_submission_inserts_later_ones_update() {
		let store = MemoryMetaStore::new();
		let sub1 = submission("abc");
		store.store_submission(sub1.clone()).await.unwrap();

		let obj = Object::new(
			"abc".into(),
			"d".into(),
			"e".into(),
			"text/plain".into(),
		);
		let inserted = store.store_object(&obj).await.unwrap();
		assert!(inserted);

		let sub2 = submission("abc");
		store.store_submission(sub2).await.unwrap();
		let inserted_again = store.store_object(&obj).await.unwrap();
		assert!(!inserted_again);

		let stored = store.get_object("abc").await.unwrap();
		assert_eq!(stored.submissions.len(), 2);
	}

	#[tokio::test]
	async fn iterate_submissions_first_seen_keeps_earliest() {
		let store = MemoryMetaStore::new();
		let mut early = submission("abc");
		early.date_time = Utc::now() - chrono::Duration::hours(2);
		let late = submission("abc");
		store.store_submission(late).await.unwrap();
		store.store_submission(early.clone()).await.unwrap();

		let seen = store.iterate_submissions_first_seen().await.unwrap();
		assert_eq!(seen["abc"], early.date_time);
	}
}
