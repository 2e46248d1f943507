//! Service configuration: loaded once at bootstrap from a TOML file.
use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// One metadata-store node entry. `data_storage[0]` is primary; any further
/// entries are peers handed to the driver for the same logical cluster.
#[derive(Deserialize, Debug, Clone)]
pub struct MetaConnector {
	pub engine: String,
	pub ip: String,
	pub port: u16,
	#[serde(default)]
	pub user: String,
	#[serde(default)]
	pub password: String,
	pub database: String,
}

/// One blob-store node entry. `object_storage[0]` selects the backend.
#[derive(Deserialize, Debug, Clone)]
pub struct BlobConnector {
	pub engine: String,
	#[serde(default)]
	pub ip: String,
	#[serde(default)]
	pub port: u16,
	#[serde(default)]
	pub region: String,
	#[serde(default)]
	pub key: String,
	#[serde(default)]
	pub secret: String,
	#[serde(default = "default_bucket")]
	pub bucket: String,
	#[serde(default)]
	pub secure: bool,
}

fn default_bucket() -> String {
	"objstorage-local-fs".into()
}

/// Top-level configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	pub data_storage: Vec<MetaConnector>,
	pub object_storage: Vec<BlobConnector>,

	#[serde(default)]
	pub log_file: Option<PathBuf>,
	#[serde(default = "default_log_level")]
	pub log_level: String,

	pub amqp: String,
	pub queue: String,
	pub routing_key: String,
	#[serde(default = "default_prefetch")]
	pub prefetch_count: u16,

	pub http: String,
	#[serde(default)]
	pub ssl_cert: Option<PathBuf>,
	#[serde(default)]
	pub ssl_key: Option<PathBuf>,

	/// When true, MIME detection shells out to a libmagic-style detector
	/// instead of relying on the built-in sniffer.
	#[serde(default)]
	pub extended_mime: bool,
}

fn default_log_level() -> String {
	"info".into()
}

fn default_prefetch() -> u16 {
	16
}

/// Read and parse the configuration file.
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut contents = String::new();
	file.read_to_string(&mut contents)?;

	let cfg: Config = toml::from_str(&contents)?;
	validate(&cfg)?;
	Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), Error> {
	if cfg.data_storage.is_empty() {
		return Err(Error::Validation(
			"please supply at least one data_storage entry".into(),
		));
	}
	if cfg.object_storage.is_empty() {
		return Err(Error::Validation(
			"please supply at least one object_storage entry".into(),
		));
	}
	Ok(())
}
