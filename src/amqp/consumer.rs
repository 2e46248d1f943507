//! Durable-queue consumer: declares the queue, sets prefetch QoS, and
//! dispatches each delivery to its own task so the read loop never blocks on
//! processing.
use std::sync::Arc;

use futures_util::stream::StreamExt;
use lapin::options::{
	BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};

use storage_meta::MetaStore;
use storage_util::error::{Error, Result};

use crate::processor::{process_delivery, AckOutcome};

pub struct AmqpConfig {
	pub uri: String,
	pub queue: String,
	pub routing_key: String,
	pub prefetch_count: u16,
}

/// Connects, declares the queue, and consumes forever. Each delivery is
/// `tokio::spawn`'d so a slow store call never stalls the channel's other
/// in-flight deliveries.
pub async fn run(config: AmqpConfig, meta: Arc<dyn MetaStore>) -> Result<()> {
	let connection = Connection::connect(&config.uri, ConnectionProperties::default())
		.await
		.map_err(|e| Error::Transient(e.to_string()))?;
	let channel = connection
		.create_channel()
		.await
		.map_err(|e| Error::Transient(e.to_string()))?;

	channel
		.queue_declare(
			&config.queue,
			QueueDeclareOptions {
				durable: true,
				..QueueDeclareOptions::default()
			},
			FieldTable::default(),
		)
		.await
		.map_err(|e| Error::Backend(e.to_string()))?;

	channel
		.basic_qos(config.prefetch_count, BasicQosOptions::default())
		.await
		.map_err(|e| Error::Backend(e.to_string()))?;

	let mut consumer = channel
		.basic_consume(
			&config.queue,
			&config.routing_key,
			BasicConsumeOptions::default(),
			FieldTable::default(),
		)
		.await
		.map_err(|e| Error::Backend(e.to_string()))?;

	info!("Ingest-AMQP consuming queue {}", config.queue);

	while let Some(delivery) = consumer.next().await {
		let delivery = match delivery {
			Ok(d) => d,
			Err(e) => {
				warn!("AMQP delivery error: {}", e);
				continue;
			}
		};

		let meta = meta.clone();
		let routing_key = delivery.routing_key.to_string();

		tokio::spawn(async move {
			let outcome = process_delivery(&meta, &routing_key, &delivery.data).await;
			let result = match outcome {
				AckOutcome::Ack => delivery.ack(BasicAckOptions::default()).await,
				AckOutcome::NackRequeue => {
					delivery
						.nack(BasicNackOptions {
							requeue: true,
							..BasicNackOptions::default()
						})
						.await
				}
				AckOutcome::NackDrop => {
					delivery
						.nack(BasicNackOptions {
							requeue: false,
							..BasicNackOptions::default()
						})
						.await
				}
			};
			if let Err(e) = result {
				warn!("failed to ack/nack AMQP delivery: {}", e);
			}
		});
	}

	Ok(())
}
