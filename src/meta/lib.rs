//! MetaStore trait and backends (Cassandra, MongoDB, in-memory) for Objects,
//! Submissions, Results and Configs.
//!
//! Grounded on the original `dataStorage` package: one `Storage` interface,
//! several interchangeable engines selected by config string at bootstrap.
#[macro_use]
extern crate tracing;

pub mod cassandra;
pub mod memory;
pub mod mongodb;
pub mod model;
pub mod store;

pub use store::MetaStore;
