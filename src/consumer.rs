//! consumer.rs — Publicação e consumo da fila de ingestão
//!
//! Cada mensagem é um [`RawEvent`] em JSON. O transporte fica atrás de três
//! traits ([`IngestPublisher`], [`DeliverySource`], [`InboundDelivery`]):
//! em produção é o RabbitMQ (`broker.rs`), nos testes um canal em memória.
//! Os workers chamam o mesmo [`OutageAggregator::ingest`] usado por qualquer
//! outro adaptador: sucesso confirma a mensagem, conflito de serialização é
//! reenviado aqui (o motor não faz retry) e qualquer outra falha rejeita sem
//! reenfileirar, deixando a mensagem para a dead-letter exchange do broker.

use crate::error::{QueueError, ValidationError};
use crate::outage::OutageAggregator;
use crate::storage::WindowStore;
use crate::types::RawEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lado publicador da fila de ingestão.
#[async_trait]
pub trait IngestPublisher: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Publica um evento e devolve o número da mensagem.
    async fn publish(&self, event: &RawEvent) -> Result<u64, QueueError>;
}

/// Mensagem entregue a um worker, confirmada exatamente uma vez.
#[async_trait]
pub trait InboundDelivery: Send {
    fn tag(&self) -> u64;
    fn payload(&self) -> &[u8];
    async fn ack(self) -> Result<(), QueueError>;
    /// Rejeita sem reenfileirar.
    async fn reject(self, reason: &str) -> Result<(), QueueError>;
}

/// Fluxo de entregas de um worker. `None` quando o transporte fecha.
#[async_trait]
pub trait DeliverySource: Send {
    type Delivery: InboundDelivery;

    async fn next_delivery(&mut self) -> Option<Result<Self::Delivery, QueueError>>;
}

/// Resultado do processamento de uma entrega.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    Reject { attempts: u32, reason: String },
}

/// Política de reenvio para conflitos de transação.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Espera antes da próxima tentativa: linear, saturando em `Duration::MAX`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

fn decode(payload: &[u8]) -> Result<RawEvent, ValidationError> {
    serde_json::from_slice::<RawEvent>(payload)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?
        .validated()
}

/// Processa uma entrega: decodifica, agrega e decide ack/reject.
pub async fn handle_delivery<S: WindowStore>(
    aggregator: &OutageAggregator<S>,
    tag: u64,
    payload: &[u8],
    policy: RetryPolicy,
) -> Acknowledgement {
    let event = match decode(payload) {
        Ok(event) => event,
        Err(e) => {
            return Acknowledgement::Reject {
                attempts: 0,
                reason: e.to_string(),
            };
        }
    };

    let mut attempt = 1;
    loop {
        match aggregator.ingest(&event).await {
            Ok(window_id) => {
                debug!(
                    "[CONSUMER] Mensagem {} agregada na janela {} (tentativa {}).",
                    tag, window_id, attempt
                );
                return Acknowledgement::Ack;
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    "[CONSUMER] Conflito na mensagem {} (tentativa {}/{}): {}",
                    tag, attempt, policy.max_attempts, e
                );
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                return Acknowledgement::Reject {
                    attempts: attempt,
                    reason: e.to_string(),
                };
            }
        }
    }
}

/// Loop de um worker: consome até o transporte fechar.
pub async fn run_consumer<S, D>(
    worker: usize,
    aggregator: Arc<OutageAggregator<S>>,
    mut source: D,
    policy: RetryPolicy,
) where
    S: WindowStore,
    D: DeliverySource,
{
    info!("[CONSUMER {}] Worker iniciado.", worker);
    while let Some(next) = source.next_delivery().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("[CONSUMER {}] Falha no consumo, encerrando worker: {}", worker, e);
                break;
            }
        };
        let tag = delivery.tag();

        let ack = handle_delivery(&aggregator, tag, delivery.payload(), policy).await;
        let outcome = match ack {
            Acknowledgement::Ack => delivery.ack().await,
            Acknowledgement::Reject { attempts, reason } => {
                warn!(
                    "[CONSUMER {}] Mensagem {} rejeitada após {} tentativa(s): {}",
                    worker, tag, attempts, reason
                );
                delivery.reject(&reason).await
            }
        };
        if let Err(e) = outcome {
            error!("[CONSUMER {}] Falha ao confirmar mensagem {}: {}", worker, tag, e);
        }
    }
    info!("[CONSUMER {}] Fila encerrada, worker finalizado.", worker);
}
