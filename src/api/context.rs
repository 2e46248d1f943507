//! Shared state handed to every request handler: backend handles bundled
//! behind `Arc` so each request can cheaply clone what it needs.
use std::sync::Arc;

use storage_blob::BlobStore;
use storage_meta::MetaStore;
use storage_reconciler::OrphanReconciler;

pub struct ApiContext {
	pub meta: Arc<dyn MetaStore>,
	pub blob: Arc<dyn BlobStore>,
	pub reconciler: OrphanReconciler,
	pub extended_mime: bool,
}

impl ApiContext {
	pub fn new(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobStore>, extended_mime: bool) -> Self {
		let reconciler = OrphanReconciler::new(meta.clone(), blob.clone());
		ApiContext {
			meta,
			blob,
			reconciler,
			extended_mime,
		}
	}
}
