//! BlobStore trait and backends (S3, local filesystem, in-memory) for
//! sample bytes, addressed by SHA-256.
#[macro_use]
extern crate tracing;

pub mod localfs;
pub mod memory;
pub mod s3;
pub mod store;

pub use store::BlobStore;
