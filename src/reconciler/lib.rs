//! Cross-store orphan classification and cleanup.
//!
//! Compares the key sets of the metadata store and the blob store (plus the
//! submission-presence map derived from metadata) and buckets every key into
//! one of seven membership bins, using the same `Arc<dyn ...>` trait-object
//! style used for MetaStore/BlobStore elsewhere in this service.
#[macro_use]
extern crate tracing;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use storage_blob::BlobStore;
use storage_meta::MetaStore;
use storage_util::error::Result;

/// The seven-bin classification, keyed by SHA-256.
#[derive(Debug, Default, Serialize)]
pub struct OrphanReport {
	pub oms: Vec<String>,
	pub om: Vec<String>,
	pub os: Vec<String>,
	pub o: Vec<String>,
	pub ms: Vec<String>,
	pub m: Vec<String>,
	pub s: Vec<String>,
}

pub struct OrphanReconciler {
	meta: Arc<dyn MetaStore>,
	blob: Arc<dyn BlobStore>,
}

impl OrphanReconciler {
	pub fn new(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobStore>) -> Self {
		OrphanReconciler { meta, blob }
	}

	/// Streams M, looks up each key in O and S, classifies and removes from
	/// both; then partitions the residual O by presence in S; then emits the
	/// residual S. M may be far larger than memory allows; O and S are held
	/// as hash maps rather than trait objects, since the whole set lives in
	/// memory for the duration of a scan.
	pub async fn classify(&self) -> Result<OrphanReport> {
		let cutoff = storage_util::time::quiescence_cutoff();

		let mut blob_keys = self.blob.list_keys_with_timestamps().await?;
		let mut submission_keys = self.meta.iterate_submissions_first_seen().await?;

		let mut report = OrphanReport::default();

		let (tx, mut rx) = mpsc::channel(256);
		let meta = self.meta.clone();
		let producer = tokio::spawn(async move { meta.iterate_objects(tx).await });

		while let Some((sha256, last_modified)) = rx.recv().await {
			if last_modified >= cutoff {
				blob_keys.remove(&sha256);
				submission_keys.remove(&sha256);
				continue;
			}

			let in_o = match blob_keys.get(&sha256) {
				Some(ts) if *ts < cutoff => true,
				Some(_) => {
					blob_keys.remove(&sha256);
					submission_keys.remove(&sha256);
					continue;
				}
				None => false,
			};
			let in_s = match submission_keys.get(&sha256) {
				Some(ts) if *ts < cutoff => true,
				Some(_) => {
					blob_keys.remove(&sha256);
					submission_keys.remove(&sha256);
					continue;
				}
				None => false,
			};

			match (in_o, in_s) {
				(true, true) => report.oms.push(sha256.clone()),
				(true, false) => report.om.push(sha256.clone()),
				(false, true) => report.ms.push(sha256.clone()),
				(false, false) => report.m.push(sha256.clone()),
			}

			blob_keys.remove(&sha256);
			submission_keys.remove(&sha256);
		}

		producer
			.await
			.map_err(|e| storage_util::error::Error::Backend(e.to_string()))??;

		for (sha256, ts) in blob_keys {
			if ts >= cutoff {
				continue;
			}
			if submission_keys.contains_key(&sha256) {
				report.os.push(sha256);
			} else {
				report.o.push(sha256);
			}
		}

		let os: HashSet<String> = report.os.iter().cloned().collect();
		for (sha256, ts) in submission_keys {
			if ts >= cutoff || os.contains(&sha256) {
				continue;
			}
			report.s.push(sha256);
		}

		Ok(report)
	}

	/// Applies the cleanup policy for each bin. Both
	/// this and [`Self::classify`] are idempotent; a crash mid-run is safe
	/// to retry.
	pub async fn delete_orphans(&self) -> Result<OrphanReport> {
		let report = self.classify().await?;

		for sha256 in &report.om {
			self.blob.delete(sha256).await?;
			self.meta.delete_object(sha256).await?;
		}
		for sha256 in &report.os {
			self.blob.delete(sha256).await?;
			self.meta.delete_all_submissions_of_object(sha256).await?;
		}
		for sha256 in &report.o {
			self.blob.delete(sha256).await?;
		}
		for sha256 in &report.ms {
			self.meta.delete_sample_and_submissions(sha256).await?;
		}
		for sha256 in &report.m {
			self.meta.delete_object(sha256).await?;
		}
		for sha256 in &report.s {
			self.meta.delete_all_submissions_of_object(sha256).await?;
		}

		info!(
			"orphan cleanup: om={} os={} o={} ms={} m={} s={}",
			report.om.len(),
			report.os.len(),
			report.o.len(),
			report.ms.len(),
			report.m.len(),
			report.s.len()
		);

		Ok(report)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use storage_blob::memory::MemoryBlobStore;
	use storage_meta::memory::MemoryMetaStore;
	use storage_meta::model::{Object, Submission};
	use uuid::Uuid;

	fn old_timestamp() -> DateTime<Utc> {
		Utc::now() - chrono::Duration::hours(3)
	}

	fn submission(sha256: &str) -> Submission {
		Submission {
			id: Uuid::now_v7(),
			sha256: sha256.to_string(),
			user_id: "alice".into(),
			source: "upload".into(),
			name: "sample.bin".into(),
			date_time: old_timestamp(),
			tags: vec![],
			comment: String::new(),
		}
	}

	#[tokio::test]
	async fn consistent_record_is_a_no_op() {
		let meta = Arc::new(MemoryMetaStore::new());
		let blob = Arc::new(MemoryBlobStore::new());

		meta.store_submission(submission("abc")).await.unwrap();
		let mut obj = Object::new("abc".into(), "d".into(), "e".into(), "text/plain".into());
		obj.created = old_timestamp();
		meta.store_object(&obj).await.unwrap();
		blob.store_with_timestamp("abc", bytes::Bytes::from_static(b"data"), old_timestamp());

		let reconciler = OrphanReconciler::new(meta, blob);
		let report = reconciler.classify().await.unwrap();
		assert_eq!(report.oms, vec!["abc".to_string()]);
		assert!(report.om.is_empty());
		assert!(report.os.is_empty());
	}

	#[tokio::test]
	async fn dangling_blob_with_no_metadata_is_bin_o() {
		let meta = Arc::new(MemoryMetaStore::new());
		let blob = Arc::new(MemoryBlobStore::new());
		blob.store_with_timestamp("orphan", bytes::Bytes::from_static(b"data"), old_timestamp());

		let reconciler = OrphanReconciler::new(meta, blob);
		let report = reconciler.classify().await.unwrap();
		assert_eq!(report.o, vec!["orphan".to_string()]);
	}

	#[tokio::test]
	async fn recent_records_are_skipped_by_the_cutoff() {
		let meta = Arc::new(MemoryMetaStore::new());
		let blob = Arc::new(MemoryBlobStore::new());
		blob.store("fresh", bytes::Bytes::from_static(b"data")).await.unwrap();

		let reconciler = OrphanReconciler::new(meta, blob);
		let report = reconciler.classify().await.unwrap();
		assert!(report.o.is_empty());
	}
}
