//! S3-compatible `BlobStore`: path-style addressing, a `ListBuckets`
//! connectivity check at bootstrap, bucket auto-create in `setup()`.
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::TimeZone;

use async_trait::async_trait;
use storage_util::error::{Error, Result};

use crate::store::BlobStore;

pub struct S3BlobStore {
	client: Client,
	bucket: String,
}

impl S3BlobStore {
	pub async fn connect(
		endpoint: &str,
		region: &str,
		key: &str,
		secret: &str,
		bucket: &str,
	) -> Result<Self> {
		let credentials = Credentials::new(key, secret, None, None, "storage-config");
		let config = aws_sdk_s3::Config::builder()
			.credentials_provider(credentials)
			.endpoint_url(endpoint)
			.region(aws_sdk_s3::config::Region::new(region.to_string()))
			.force_path_style(true)
			.build();

		let client = Client::from_conf(config);
		client
			.list_buckets()
			.send()
			.await
			.map_err(|e| Error::Transient(e.to_string()))?;

		Ok(S3BlobStore {
			client,
			bucket: bucket.to_string(),
		})
	}
}

#[async_trait]
impl BlobStore for S3BlobStore {
	async fn setup(&self) -> Result<()> {
		let exists = self
			.client
			.head_bucket()
			.bucket(&self.bucket)
			.send()
			.await
			.is_ok();

		if !exists {
			info!("creating bucket {}", self.bucket);
			self.client
				.create_bucket()
				.bucket(&self.bucket)
				.send()
				.await
				.map_err(|e| Error::Backend(e.to_string()))?;
		}
		Ok(())
	}

	async fn store(&self, sha256: &str, data: Bytes) -> Result<()> {
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(sha256)
			.body(ByteStream::from(data))
			.send()
			.await
			.map_err(|e| s3_err(e.into()))?;
		Ok(())
	}

	async fn get(&self, sha256: &str) -> Result<Bytes> {
		let output = self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(sha256)
			.send()
			.await
			.map_err(|e| s3_err(e.into()))?;

		let data = output
			.body
			.collect()
			.await
			.map_err(|e| Error::Backend(e.to_string()))?;
		Ok(data.into_bytes())
	}

	async fn delete(&self, sha256: &str) -> Result<()> {
		self.client
			.delete_object()
			.bucket(&self.bucket)
			.key(sha256)
			.send()
			.await
			.map_err(|e| s3_err(e.into()))?;
		Ok(())
	}

	async fn exists(&self, sha256: &str) -> Result<bool> {
		match self
			.client
			.head_object()
			.bucket(&self.bucket)
			.key(sha256)
			.send()
			.await
		{
			Ok(_) => Ok(true),
			Err(e) => match s3_err(e.into()) {
				Error::NotFound => Ok(false),
				other => Err(other),
			},
		}
	}

	async fn list_keys(&self) -> Result<Vec<String>> {
		let mut out = Vec::new();
		let mut continuation_token = None;
		loop {
			let mut req = self.client.list_objects_v2().bucket(&self.bucket);
			if let Some(token) = continuation_token.take() {
				req = req.continuation_token(token);
			}
			let resp = req.send().await.map_err(|e| Error::Backend(e.to_string()))?;
			for object in resp.contents() {
				if let Some(key) = object.key() {
					out.push(key.to_string());
				}
			}
			if resp.is_truncated().unwrap_or(false) {
				continuation_token = resp.next_continuation_token().map(|s| s.to_string());
			} else {
				break;
			}
		}
		Ok(out)
	}

	async fn list_keys_with_timestamps(&self) -> Result<std::collections::HashMap<String, chrono::DateTime<chrono::Utc>>> {
		let mut out = std::collections::HashMap::new();
		let mut continuation_token = None;
		loop {
			let mut req = self.client.list_objects_v2().bucket(&self.bucket);
			if let Some(token) = continuation_token.take() {
				req = req.continuation_token(token);
			}
			let resp = req.send().await.map_err(|e| Error::Backend(e.to_string()))?;
			for object in resp.contents() {
				if let (Some(key), Some(modified)) = (object.key(), object.last_modified()) {
					let secs = modified.secs();
					let ts = chrono::Utc
						.timestamp_opt(secs, 0)
						.single()
						.unwrap_or_else(chrono::Utc::now);
					out.insert(key.to_string(), ts);
				}
			}
			if resp.is_truncated().unwrap_or(false) {
				continuation_token = resp.next_continuation_token().map(|s| s.to_string());
			} else {
				break;
			}
		}
		Ok(out)
	}
}

fn s3_err<E: std::fmt::Debug + std::fmt::Display>(e: SdkError<E>) -> Error {
	match &e {
		SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => Error::Transient(e.to_string()),
		SdkError::ServiceError(service_err) => {
			let raw = service_err.raw().status().as_u16();
			if raw == 404 {
				Error::NotFound
			} else {
				Error::Backend(e.to_string())
			}
		}
		_ => Error::Backend(e.to_string()),
	}
}
