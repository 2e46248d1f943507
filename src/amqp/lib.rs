//! Ingest-AMQP: consumes a durable queue of scan results via `lapin`,
//! gzip-compresses result bodies, and applies the ack/nack/drop policy.
#[macro_use]
extern crate tracing;

pub mod consumer;
pub mod message;
pub mod processor;

pub use consumer::{run, AmqpConfig};
