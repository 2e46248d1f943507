//! Shared config, error and time utilities for the storage service.
#[macro_use]
extern crate tracing;

pub mod compensate;
pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
