//! Error hierarchy shared by every storage-service crate.
//!
//! Callers are expected to match on [`Error`] variants, never on the rendered
//! message: the taxonomy below is the contract between MetaStore/BlobStore
//! backends and their callers (the HTTP and AMQP front-ends).
use err_derive::Error;

/// The error type shared across `storage-meta`, `storage-blob`, `storage-api`,
/// `storage-amqp` and `storage-reconciler`.
#[derive(Debug, Error)]
pub enum Error {
	/// A required field was missing/empty, or failed to parse (e.g. `date`).
	#[error(display = "validation error: {}", _0)]
	Validation(String),

	/// The requested record does not exist.
	#[error(display = "not found")]
	NotFound,

	/// The record already exists and the operation does not permit overwriting it.
	#[error(display = "duplicate")]
	Duplicate,

	/// The backend connection is broken or the operation timed out; safe to retry.
	#[error(display = "transient backend error: {}", _0)]
	Transient(String),

	/// An id (submission UUID, result UUID, ...) failed to parse.
	#[error(display = "invalid id: {}", _0)]
	InvalidId(String),

	/// The value exceeds a hard backend limit (e.g. Cassandra's 16 MB row cap).
	#[error(display = "oversize value: {}", _0)]
	Oversize(String),

	/// `store_object` was asked to persist an Object with no backing Submission.
	#[error(display = "orphan write: object {} has no submissions", _0)]
	OrphanWrite(String),

	/// A table/collection/bucket targeted by `setup_*` already exists.
	#[error(display = "already exists: {}", _0)]
	AlreadyExists(String),

	/// An AMQP message body could not be JSON-decoded. Never requeue this.
	#[error(display = "poison message: {}", _0)]
	PoisonMessage(String),

	/// A requested capability (e.g. free-text search) is not implemented.
	#[error(display = "not implemented: {}", _0)]
	NotImplemented(&'static str),

	/// Catch-all for an opaque backend-driver failure that doesn't fit above.
	#[error(display = "backend error: {}", _0)]
	Backend(String),
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		match e.kind() {
			std::io::ErrorKind::NotFound => Error::NotFound,
			std::io::ErrorKind::AlreadyExists => Error::Duplicate,
			_ => Error::Backend(e.to_string()),
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Error {
		Error::PoisonMessage(e.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(e: toml::de::Error) -> Error {
		Error::Validation(e.to_string())
	}
}

impl From<chrono::ParseError> for Error {
	fn from(e: chrono::ParseError) -> Error {
		Error::Validation(e.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
