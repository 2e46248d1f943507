//! The sample-upload write path: validation, hashing, MIME detection, and
//! the three-step dual-store write with rollback-journal compensation.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

use storage_meta::model::{Object, Submission};
use storage_util::compensate::Journal;
use storage_util::error::{Error, Result};

use crate::context::ApiContext;

pub struct UploadFields {
	pub user_id: String,
	pub source: String,
	pub name: String,
	pub date: String,
	pub tags: Vec<String>,
	pub comment: String,
	pub data: Bytes,
}

impl UploadFields {
	pub fn validate(&self) -> Result<DateTime<Utc>> {
		if self.user_id.is_empty() {
			return Err(Error::Validation("user_id is required".into()));
		}
		if self.source.is_empty() {
			return Err(Error::Validation("source is required".into()));
		}
		if self.name.is_empty() {
			return Err(Error::Validation("name is required".into()));
		}
		if self.data.is_empty() {
			return Err(Error::Validation("sample file must not be empty".into()));
		}
		let date = DateTime::parse_from_rfc3339(&self.date)?.with_timezone(&Utc);
		Ok(date)
	}
}

pub struct UploadOutcome {
	pub object: Object,
	pub inserted: bool,
}

/// Runs the three-step write (Submission, Object, Sample) and its
/// compensation on failure. Returns the resulting [`Object`].
pub async fn store_sample(ctx: &ApiContext, fields: UploadFields) -> Result<UploadOutcome> {
	let date_time = fields.validate()?;

	let sha256 = hex::encode(Sha256::digest(&fields.data)).to_lowercase();
	let md5 = hex::encode(Md5::digest(&fields.data));
	let sha1 = hex::encode(Sha1::digest(&fields.data));
	let mime = crate::mime::detect(fields.data.to_vec(), ctx.extended_mime).await;

	let submission = Submission {
		id: uuid::Uuid::now_v7(),
		sha256: sha256.clone(),
		user_id: fields.user_id,
		source: fields.source,
		name: fields.name,
		date_time,
		tags: fields.tags,
		comment: fields.comment,
	};

	let mut journal = Journal::new();

	let submission_id = ctx.meta.store_submission(submission).await?;
	{
		let meta = ctx.meta.clone();
		journal.push(Box::pin(async move {
			if let Err(e) = meta.delete_submission(submission_id).await {
				warn!("compensation: failed to delete submission {}: {}", submission_id, e);
			}
		}));
	}

	let object = Object::new(sha256.clone(), md5, sha1, mime);
	let inserted = match ctx.meta.store_object(&object).await {
		Ok(inserted) => inserted,
		Err(e) => {
			journal.unwind().await;
			return Err(e);
		}
	};

	if inserted {
		let meta = ctx.meta.clone();
		let sha256_for_object = sha256.clone();
		journal.push(Box::pin(async move {
			if let Err(e) = meta.delete_object(&sha256_for_object).await {
				warn!("compensation: failed to delete object {}: {}", sha256_for_object, e);
			}
		}));
	} else {
		let meta = ctx.meta.clone();
		let sha256_for_update = sha256.clone();
		journal.push(Box::pin(async move {
			if let Err(e) = meta.update_object(&sha256_for_update).await {
				warn!("compensation: failed to restore object {}: {}", sha256_for_update, e);
			}
		}));
	}

	if inserted {
		if let Err(e) = ctx.blob.store(&sha256, fields.data).await {
			journal.unwind().await;
			return Err(e);
		}
	}

	journal.discard();

	let object = ctx.meta.get_object(&sha256).await?;
	Ok(UploadOutcome { object, inserted })
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::Arc;
	use storage_blob::memory::MemoryBlobStore;
	use storage_meta::memory::MemoryMetaStore;

	fn fields(data: &[u8]) -> UploadFields {
		UploadFields {
			user_id: "alice".into(),
			source: "upload".into(),
			name: "sample.bin".into(),
			date: "2026-01-01T00:00:00Z".into(),
			tags: vec![],
			comment: String::new(),
			data: Bytes::copy_from_slice(data),
		}
	}

	fn ctx() -> ApiContext {
		ApiContext::new(
			Arc::new(MemoryMetaStore::new()),
			Arc::new(MemoryBlobStore::new()),
			false,
		)
	}

	#[tokio::test]
	async fn first_upload_inserts_and_stores_bytes() {
		let ctx = ctx();
		let outcome = store_sample(&ctx, fields(b"hello world")).await.unwrap();
		assert!(outcome.inserted);
		let sha256 = outcome.object.sha256.clone();
		let bytes = ctx.blob.get(&sha256).await.unwrap();
		assert_eq!(&bytes[..], b"hello world");
	}

	#[tokio::test]
	async fn reupload_same_bytes_updates_aggregates_without_rewriting_blob() {
		let ctx = ctx();
		store_sample(&ctx, fields(b"hello world")).await.unwrap();
		let second = store_sample(&ctx, fields(b"hello world")).await.unwrap();
		assert!(!second.inserted);
		assert_eq!(second.object.submissions.len(), 2);
	}

	#[tokio::test]
	async fn empty_file_is_rejected_before_any_write() {
		let ctx = ctx();
		let err = store_sample(&ctx, fields(b"")).await.unwrap_err();
		assert!(matches!(err, Error::Validation(_)));
	}
}
