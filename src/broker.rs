//! broker.rs — Transporte RabbitMQ (AMQP 0.9.1) da fila de ingestão
//!
//! Uma conexão por processo. O canal de publicação roda com publisher
//! confirms; cada worker abre o próprio canal de consumo com `basic.qos`.
//! Rejeições usam `basic.nack` sem requeue, e a dead-letter exchange
//! configurada na fila recebe a mensagem.

use crate::consumer::{DeliverySource, InboundDelivery, IngestPublisher};
use crate::error::QueueError;
use crate::types::RawEvent;
use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Mensagens persistentes (sobrevivem a restart do broker).
const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    publisher: Channel,
    queue: String,
    next_tag: AtomicU64,
}

impl AmqpBroker {
    /// Conecta, declara a fila durável e habilita confirms no canal de publicação.
    pub async fn connect(url: &str, queue: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let publisher = connection.create_channel().await?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        publisher
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!("[BROKER] Conectado; fila durável {} declarada.", queue);

        Ok(Self {
            connection,
            publisher,
            queue: queue.to_string(),
            next_tag: AtomicU64::new(1),
        })
    }

    /// Abre um canal de consumo dedicado ao worker.
    pub async fn consumer(&self, worker: usize, prefetch: u16) -> Result<AmqpSource, QueueError> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                &self.queue,
                &format!("agregador-outages-{worker}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!("[BROKER] Worker {} consumindo {} (prefetch {}).", worker, self.queue, prefetch);
        Ok(AmqpSource {
            consumer,
            _channel: channel,
        })
    }

    /// Fecha a conexão; os consumidores terminam o fluxo.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.connection.close(200, "encerrando").await?;
        info!("[BROKER] Conexão encerrada.");
        Ok(())
    }
}

#[async_trait]
impl IngestPublisher for AmqpBroker {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn publish(&self, event: &RawEvent) -> Result<u64, QueueError> {
        let payload = serde_json::to_vec(event)?;
        let confirmation = self
            .publisher
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        if confirmation.is_nack() {
            return Err(QueueError::Nacked(self.queue.clone()));
        }
        Ok(self.next_tag.fetch_add(1, Ordering::Relaxed))
    }
}

/// Fluxo de entregas de um worker.
pub struct AmqpSource {
    consumer: Consumer,
    // mantém o canal aberto enquanto o worker consome
    _channel: Channel,
}

#[async_trait]
impl DeliverySource for AmqpSource {
    type Delivery = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, QueueError>> {
        let next = self.consumer.next().await?;
        Some(next.map(AmqpDelivery).map_err(QueueError::from))
    }
}

pub struct AmqpDelivery(Delivery);

#[async_trait]
impl InboundDelivery for AmqpDelivery {
    fn tag(&self) -> u64 {
        self.0.delivery_tag
    }

    fn payload(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(self) -> Result<(), QueueError> {
        self.0.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(self, reason: &str) -> Result<(), QueueError> {
        warn!(
            "[DEAD-LETTER] Mensagem {} enviada à dead-letter exchange: {} | payload: {}",
            self.0.delivery_tag,
            reason,
            String::from_utf8_lossy(&self.0.data)
        );
        self.0
            .acker
            .nack(BasicNackOptions {
                requeue: false,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
