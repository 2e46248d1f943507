//! Local filesystem `BlobStore`: one file per sample, named by its SHA-256,
//! under a configured root directory. `store()` of an already-present key
//! succeeds rather than erroring, matching this service's idempotent-write
//! contract.
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use storage_util::error::{Error, Result};

use crate::store::BlobStore;

pub struct LocalFsBlobStore {
	root: PathBuf,
}

impl LocalFsBlobStore {
	pub fn new(root: PathBuf) -> Self {
		LocalFsBlobStore { root }
	}

	fn path_for(&self, sha256: &str) -> PathBuf {
		self.root.join(sha256)
	}
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
	async fn setup(&self) -> Result<()> {
		fs::create_dir_all(&self.root).await?;

		let probe = self.root.join(".storage-setup-check");
		let mut file = fs::File::create(&probe)
			.await
			.map_err(|e| Error::Backend(format!("setup write check failed: {}", e)))?;
		file.write_all(b"ok")
			.await
			.map_err(|e| Error::Backend(format!("setup write check failed: {}", e)))?;
		file.flush()
			.await
			.map_err(|e| Error::Backend(format!("setup write check failed: {}", e)))?;
		drop(file);
		fs::read(&probe)
			.await
			.map_err(|e| Error::Backend(format!("setup read check failed: {}", e)))?;
		fs::remove_file(&probe)
			.await
			.map_err(|e| Error::Backend(format!("setup remove check failed: {}", e)))?;

		Ok(())
	}

	async fn store(&self, sha256: &str, data: Bytes) -> Result<()> {
		let path = self.path_for(sha256);
		if fs::metadata(&path).await.is_ok() {
			return Ok(());
		}
		let tmp_path = path.with_extension("tmp");
		let mut file = fs::File::create(&tmp_path).await?;
		file.write_all(&data).await?;
		file.flush().await?;
		fs::rename(&tmp_path, &path).await?;
		Ok(())
	}

	async fn get(&self, sha256: &str) -> Result<Bytes> {
		let bytes = fs::read(self.path_for(sha256)).await?;
		Ok(Bytes::from(bytes))
	}

	async fn delete(&self, sha256: &str) -> Result<()> {
		match fs::remove_file(self.path_for(sha256)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(Error::from(e)),
		}
	}

	async fn exists(&self, sha256: &str) -> Result<bool> {
		Ok(fs::metadata(self.path_for(sha256)).await.is_ok())
	}

	async fn list_keys(&self) -> Result<Vec<String>> {
		let mut entries = fs::read_dir(&self.root).await?;
		let mut out = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			if let Some(name) = entry.file_name().to_str() {
				if !name.ends_with(".tmp") {
					out.push(name.to_string());
				}
			}
		}
		Ok(out)
	}

	async fn list_keys_with_timestamps(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		let mut entries = fs::read_dir(&self.root).await?;
		let mut out = HashMap::new();
		while let Some(entry) = entries.next_entry().await? {
			let name = match entry.file_name().to_str() {
				Some(name) if !name.ends_with(".tmp") => name.to_string(),
				_ => continue,
			};
			let metadata = entry.metadata().await?;
			let modified: DateTime<Utc> = metadata.modified()?.into();
			out.insert(name, modified);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	async fn tmp_store() -> LocalFsBlobStore {
		let dir = mktemp::Temp::new_dir().unwrap();
		let store = LocalFsBlobStore::new(dir.to_path_buf());
		std::mem::forget(dir);
		store.setup().await.unwrap();
		store
	}

	#[tokio::test]
	async fn store_then_get_round_trips() {
		let store = tmp_store().await;
		store.store("abc", Bytes::from_static(b"hello")).await.unwrap();
		let data = store.get("abc").await.unwrap();
		assert_eq!(&data[..], b"hello");
	}

	#[tokio::test]
	async fn storing_twice_is_idempotent() {
		let store = tmp_store().await;
		store.store("abc", Bytes::from_static(b"first")).await.unwrap();
		store.store("abc", Bytes::from_static(b"first")).await.unwrap();
		assert_eq!(store.list_keys().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn delete_missing_is_not_an_error() {
		let store = tmp_store().await;
		store.delete("missing").await.unwrap();
	}
}
