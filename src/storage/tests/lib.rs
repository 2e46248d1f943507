//! End-to-end scenarios driven straight through `storage_api::handlers::route`
//! against in-memory backends, the same wiring `storage::server::run` builds
//! for a deployment, without a JSON config file or any real I/O.
use std::sync::Arc;

use hyper::{Body, Method, Request, StatusCode};
use sha2::{Digest, Sha256};

use storage_api::handlers::route;
use storage_api::ApiContext;
use storage_blob::memory::MemoryBlobStore;
use storage_blob::BlobStore;
use storage_meta::memory::MemoryMetaStore;
use storage_meta::model::{Object, Submission};
use storage_meta::MetaStore;
use storage_reconciler::OrphanReconciler;

fn new_ctx() -> Arc<ApiContext> {
	Arc::new(ApiContext::new(
		Arc::new(MemoryMetaStore::new()),
		Arc::new(MemoryBlobStore::new()),
		false,
	))
}

/// Hand-encodes a `multipart/form-data` body the way a browser/curl would,
/// so these tests exercise the same `multer` parsing path a real upload does.
fn multipart_body(fields: &[(&str, &str)], file_field: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
	let boundary = "storage-test-boundary-87341".to_string();
	let mut body = Vec::new();
	for (name, value) in fields {
		body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
		body.extend_from_slice(
			format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
		);
		body.extend_from_slice(value.as_bytes());
		body.extend_from_slice(b"\r\n");
	}
	body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
	body.extend_from_slice(
		format!(
			"Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
			file_field, file_name
		)
		.as_bytes(),
	);
	body.extend_from_slice(data);
	body.extend_from_slice(b"\r\n--");
	body.extend_from_slice(boundary.as_bytes());
	body.extend_from_slice(b"--\r\n");
	(boundary, body)
}

async fn upload(
	ctx: &Arc<ApiContext>,
	user_id: &str,
	name: &str,
	date: &str,
	data: &[u8],
) -> (StatusCode, Object) {
	let (boundary, body) = multipart_body(
		&[("user_id", user_id), ("source", "upload"), ("name", name), ("date", date)],
		"sample",
		name,
		data,
	);
	let req = Request::builder()
		.method(Method::PUT)
		.uri("/samples/")
		.header(
			hyper::header::CONTENT_TYPE,
			format!("multipart/form-data; boundary={}", boundary),
		)
		.body(Body::from(body))
		.unwrap();

	let resp = route(ctx.clone(), req).await;
	let status = resp.status();
	let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	let object: Object = serde_json::from_value(envelope["Result"].clone()).unwrap();
	(status, object)
}

async fn download(ctx: &Arc<ApiContext>, sha256: &str) -> (StatusCode, Vec<u8>) {
	let req = Request::builder()
		.method(Method::GET)
		.uri(format!("/samples/{}", sha256))
		.body(Body::empty())
		.unwrap();
	let resp = route(ctx.clone(), req).await;
	let status = resp.status();
	let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	(status, bytes.to_vec())
}

fn expected_sha256(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data)).to_lowercase()
}

/// E1: first upload of 5 known bytes. SHA-256 matches, the bytes round-trip
/// through download, and exactly one submission is recorded.
#[tokio::test]
async fn e1_hash_round_trip_on_first_upload() {
	let ctx = new_ctx();
	let data = [0x00u8, 0x01, 0x02, 0x03, 0x04];

	let (status, object) = upload(&ctx, "u1", "a.exe", "2024-01-01T00:00:00Z", &data).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(object.sha256, expected_sha256(&data));
	assert_eq!(object.submissions.len(), 1);

	let (dl_status, bytes) = download(&ctx, &object.sha256).await;
	assert_eq!(dl_status, StatusCode::OK);
	assert_eq!(bytes, data);
}

/// E2: a second submission of the same bytes under a different user/name
/// merges into the same Object: names union, two submissions, one blob.
#[tokio::test]
async fn e2_reupload_same_bytes_unions_aggregates() {
	let ctx = new_ctx();
	let data = b"identical payload";

	let (_, first) = upload(&ctx, "u1", "a.exe", "2024-01-01T00:00:00Z", data).await;
	let (status, second) = upload(&ctx, "u2", "b.dat", "2024-01-02T00:00:00Z", data).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(second.sha256, first.sha256);
	assert_eq!(second.submissions.len(), 2);
	assert!(second.object_name.contains("a.exe"));
	assert!(second.object_name.contains("b.dat"));

	let (_, bytes) = download(&ctx, &second.sha256).await;
	assert_eq!(bytes, data);
}

/// E4: the sample bytes are removed out of band (metadata survives). Once
/// past the quiescence cutoff, the reconciler puts the key in bin `MS`, and
/// `delete_orphans` clears the remaining metadata.
#[tokio::test]
async fn e4_sample_deleted_out_of_band_lands_in_ms_and_is_cleaned_up() {
	let meta = Arc::new(MemoryMetaStore::new());
	let blob = Arc::new(MemoryBlobStore::new());

	let old = chrono::Utc::now() - chrono::Duration::hours(3);
	let sha256 = "dangling-sample-sha".to_string();

	meta.store_submission(Submission {
		id: uuid::Uuid::now_v7(),
		sha256: sha256.clone(),
		user_id: "u1".into(),
		source: "upload".into(),
		name: "a.exe".into(),
		date_time: old,
		tags: vec![],
		comment: String::new(),
	})
	.await
	.unwrap();
	let mut object = Object::new(sha256.clone(), "d".into(), "e".into(), "text/plain".into());
	object.created = old;
	meta.store_object(&object).await.unwrap();
	// the sample bytes themselves were never written (or were deleted out of band)

	let reconciler = OrphanReconciler::new(meta.clone(), blob.clone());
	let report = reconciler.classify().await.unwrap();
	assert_eq!(report.ms, vec![sha256.clone()]);

	reconciler.delete_orphans().await.unwrap();
	assert!(meta.get_object(&sha256).await.is_err());
	assert!(meta.submissions_for(&sha256).await.unwrap().is_empty());
}

/// Invariant 3: running `delete_orphans` twice with no intervening traffic
/// is idempotent.
#[tokio::test]
async fn delete_orphans_twice_is_idempotent() {
	let meta = Arc::new(MemoryMetaStore::new());
	let blob = Arc::new(MemoryBlobStore::new());
	let old = chrono::Utc::now() - chrono::Duration::hours(3);
	blob.store_with_timestamp("orphan-blob", bytes::Bytes::from_static(b"x"), old);

	let reconciler = OrphanReconciler::new(meta, blob.clone());
	let first = reconciler.delete_orphans().await.unwrap();
	let second = reconciler.delete_orphans().await.unwrap();

	assert_eq!(first.o, vec!["orphan-blob".to_string()]);
	assert!(second.o.is_empty());
	assert!(!blob.exists("orphan-blob").await.unwrap());
}

/// E5: two concurrent uploads of the same new bytes under different names.
/// Exactly one blob write happens, both submissions land, and the final
/// Object's aggregates contain both names.
#[tokio::test]
async fn e5_concurrent_uploads_of_new_bytes_both_register() {
	let ctx = new_ctx();
	let data = b"raced upload payload";

	let ctx_a = ctx.clone();
	let ctx_b = ctx.clone();
	let a = tokio::spawn(async move { upload(&ctx_a, "u1", "a.exe", "2024-01-01T00:00:00Z", data).await });
	let b = tokio::spawn(async move { upload(&ctx_b, "u2", "b.dat", "2024-01-01T00:00:01Z", data).await });

	let (status_a, object_a) = a.await.unwrap();
	let (status_b, object_b) = b.await.unwrap();
	assert_eq!(status_a, StatusCode::OK);
	assert_eq!(status_b, StatusCode::OK);

	let sha256 = object_a.sha256.clone();
	assert_eq!(object_b.sha256, sha256);

	let final_object = ctx.meta.get_object(&sha256).await.unwrap();
	assert_eq!(final_object.submissions.len(), 2);
	assert!(final_object.object_name.contains("a.exe"));
	assert!(final_object.object_name.contains("b.dat"));

	assert_eq!(ctx.blob.list_keys().await.unwrap(), vec![sha256]);
}
