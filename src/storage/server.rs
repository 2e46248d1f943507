//! Bootstraps backend instances from config and runs Ingest-HTTP (as a
//! background task) and Ingest-AMQP (as the foreground task), shutting down
//! both on SIGINT.
use std::path::PathBuf;
use std::sync::Arc;

use storage_api::ApiContext;
use storage_blob::localfs::LocalFsBlobStore;
use storage_blob::memory::MemoryBlobStore;
use storage_blob::s3::S3BlobStore;
use storage_blob::BlobStore;
use storage_meta::cassandra::CassandraMetaStore;
use storage_meta::memory::MemoryMetaStore;
use storage_meta::mongodb::MongoMetaStore;
use storage_meta::MetaStore;
use storage_util::config::{read_config, BlobConnector, Config, MetaConnector};
use storage_util::error::Error;

pub async fn build_meta_store(connectors: &[MetaConnector]) -> Result<Arc<dyn MetaStore>, Error> {
	let primary = connectors
		.first()
		.ok_or_else(|| Error::Validation("no data_storage entry configured".into()))?;

	match primary.engine.as_str() {
		"cassandra" => {
			let nodes: Vec<String> = connectors
				.iter()
				.map(|c| format!("{}:{}", c.ip, c.port))
				.collect();
			let store = CassandraMetaStore::connect(nodes, primary.database.clone()).await?;
			Ok(Arc::new(store))
		}
		"mongodb" => {
			let uri = format!(
				"mongodb://{}:{}@{}:{}",
				primary.user, primary.password, primary.ip, primary.port
			);
			let store = MongoMetaStore::connect(&uri, &primary.database).await?;
			Ok(Arc::new(store))
		}
		"memory" => Ok(Arc::new(MemoryMetaStore::new())),
		other => Err(Error::Validation(format!("unknown data_storage engine: {}", other))),
	}
}

pub async fn build_blob_store(connectors: &[BlobConnector]) -> Result<Arc<dyn BlobStore>, Error> {
	let primary = connectors
		.first()
		.ok_or_else(|| Error::Validation("no object_storage entry configured".into()))?;

	match primary.engine.as_str() {
		"s3" => {
			let endpoint = format!(
				"{}://{}:{}",
				if primary.secure { "https" } else { "http" },
				primary.ip,
				primary.port
			);
			let store = S3BlobStore::connect(
				&endpoint,
				&primary.region,
				&primary.key,
				&primary.secret,
				&primary.bucket,
			)
			.await?;
			Ok(Arc::new(store))
		}
		"local-fs" => {
			let store = LocalFsBlobStore::new(PathBuf::from(&primary.bucket));
			Ok(Arc::new(store))
		}
		"memory" => Ok(Arc::new(MemoryBlobStore::new())),
		other => Err(Error::Validation(format!("unknown object_storage engine: {}", other))),
	}
}

pub async fn run(config_file: PathBuf, setup: bool, obj_setup: bool) -> Result<(), Error> {
	info!("loading configuration...");
	let config: Config = read_config(config_file)?;

	storage_util::logging::init(&config.log_level, config.log_file.as_deref());

	info!("connecting to MetaStore backend...");
	let meta = build_meta_store(&config.data_storage).await?;

	info!("connecting to BlobStore backend...");
	let blob = build_blob_store(&config.object_storage).await?;

	if setup {
		info!("running MetaStore schema setup...");
		meta.setup_schema().await?;
		return Ok(());
	}
	if obj_setup {
		info!("running BlobStore bucket setup...");
		blob.setup().await?;
		return Ok(());
	}

	let ctx = Arc::new(ApiContext::new(meta.clone(), blob, config.extended_mime));

	let bind_addr = config
		.http
		.parse()
		.map_err(|e| Error::Validation(format!("invalid http bind address: {}", e)))?;

	let http_ctx = ctx.clone();
	let ssl_cert = config.ssl_cert.clone();
	let ssl_key = config.ssl_key.clone();
	let http_task = tokio::spawn(async move {
		storage_api::server::run(http_ctx, bind_addr, ssl_cert.as_deref(), ssl_key.as_deref()).await
	});

	let amqp_config = storage_amqp::AmqpConfig {
		uri: config.amqp.clone(),
		queue: config.queue.clone(),
		routing_key: config.routing_key.clone(),
		prefetch_count: config.prefetch_count,
	};

	tokio::select! {
		result = storage_amqp::run(amqp_config, meta) => {
			if let Err(e) = result {
				error!("Ingest-AMQP exited with error: {}", e);
			}
		}
		_ = tokio::signal::ctrl_c() => {
			info!("received SIGINT, shutting down.");
		}
	}

	http_task.abort();

	Ok(())
}
