//! Fila em memória para testes, com a mesma semântica do broker: ack remove
//! a mensagem, reject sem reenfileirar manda para dead-letter.

use crate::consumer::{DeliverySource, InboundDelivery, IngestPublisher};
use crate::error::QueueError;
use crate::types::RawEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Mensagem rejeitada, como a dead-letter exchange a receberia.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub tag: u64,
    pub payload: Vec<u8>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct LocalQueue {
    name: Arc<str>,
    sender: mpsc::Sender<Delivery>,
    next_tag: Arc<AtomicU64>,
}

/// Lado consumidor; clones compartilham o mesmo receptor entre workers.
#[derive(Debug, Clone)]
pub struct LocalSource {
    receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    dead_letters: mpsc::UnboundedSender<DeadLetter>,
}

pub struct LocalDelivery {
    delivery: Delivery,
    dead_letters: mpsc::UnboundedSender<DeadLetter>,
}

pub fn local_queue(
    name: &str,
    capacity: usize,
) -> (LocalQueue, LocalSource, mpsc::UnboundedReceiver<DeadLetter>) {
    let (sender, receiver) = mpsc::channel(capacity);
    let (dead_tx, dead_rx) = mpsc::unbounded_channel();
    let queue = LocalQueue {
        name: Arc::from(name),
        sender,
        next_tag: Arc::new(AtomicU64::new(1)),
    };
    let source = LocalSource {
        receiver: Arc::new(Mutex::new(receiver)),
        dead_letters: dead_tx,
    };
    (queue, source, dead_rx)
}

impl LocalQueue {
    /// Publica bytes arbitrários, sem passar pela serialização.
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<u64, QueueError> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(Delivery { tag, payload })
            .await
            .map_err(|_| QueueError::Closed(self.name.to_string()))?;
        Ok(tag)
    }
}

#[async_trait]
impl IngestPublisher for LocalQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &RawEvent) -> Result<u64, QueueError> {
        let payload = serde_json::to_vec(event)?;
        self.publish_raw(payload).await
    }
}

#[async_trait]
impl DeliverySource for LocalSource {
    type Delivery = LocalDelivery;

    async fn next_delivery(&mut self) -> Option<Result<LocalDelivery, QueueError>> {
        // O lock só cobre o recv; o processamento roda em paralelo
        let delivery = self.receiver.lock().await.recv().await?;
        Some(Ok(LocalDelivery {
            delivery,
            dead_letters: self.dead_letters.clone(),
        }))
    }
}

#[async_trait]
impl InboundDelivery for LocalDelivery {
    fn tag(&self) -> u64 {
        self.delivery.tag
    }

    fn payload(&self) -> &[u8] {
        &self.delivery.payload
    }

    async fn ack(self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn reject(self, reason: &str) -> Result<(), QueueError> {
        let letter = DeadLetter {
            tag: self.delivery.tag,
            payload: self.delivery.payload,
            reason: reason.to_string(),
        };
        self.dead_letters
            .send(letter)
            .map_err(|_| QueueError::Closed("dead-letter".to_string()))
    }
}
