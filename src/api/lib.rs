//! Ingest-HTTP: multipart sample upload, sample/config download, and
//! orphan-maintenance endpoints, built on `hyper` 0.14 and `multer`.
#[macro_use]
extern crate tracing;

pub mod context;
pub mod envelope;
pub mod handlers;
pub mod mime;
pub mod server;
pub mod tls;
pub mod upload;

pub use context::ApiContext;
