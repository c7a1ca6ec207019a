//! outage.rs — Motor de agregação de eventos de outage em janelas
//!
//! Cada chamada de [`OutageAggregator::ingest`] roda uma única transação
//! serializável: grava o evento bruto (idempotente), decide entre estender,
//! absorver ou criar uma janela e persiste a decisão. Nenhum estado fica em
//! memória entre chamadas; a corrida "decide-depois-grava" entre workers é
//! resolvida pelo isolamento do store.

use crate::error::StorageError;
use crate::storage::{WindowStore, WindowTransaction};
use crate::types::{AggregatedWindow, RawEvent, WindowId, earlier_by, later_by};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

/// Decisão tomada para um evento, dada a lista de janelas candidatas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Nenhuma janela a até `gap` do evento.
    Create,
    /// Evento já dentro de [start_time, end_time].
    Unchanged(WindowId),
    /// A janela escolhida passa a cobrir [start_time, end_time]; as janelas
    /// em `absorbed` foram unidas a ela pelo evento e devem ser removidas.
    Extend {
        id: WindowId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        absorbed: Vec<WindowId>,
    },
}

/// Decide o destino de um evento em `at`.
///
/// `candidates` vem ordenado por end_time desc; a primeira é a janela
/// escolhida. Toda candidata está a no máximo `gap` do evento, então o evento
/// liga todas elas em uma única sequência: a escolhida recebe a união e as
/// demais são absorvidas.
pub fn place(candidates: &[AggregatedWindow], at: DateTime<Utc>, gap: TimeDelta) -> Placement {
    let mut eligible = candidates.iter().filter(|w| w.accepts(at, gap));
    let Some(current) = eligible.next() else {
        return Placement::Create;
    };

    let mut start_time = current.start_time;
    let mut end_time = current.end_time;
    if at < start_time && start_time - at <= gap {
        start_time = at;
    }
    if at > end_time && at - end_time <= gap {
        end_time = at;
    }

    let mut absorbed = Vec::new();
    for other in eligible {
        start_time = start_time.min(other.start_time);
        end_time = end_time.max(other.end_time);
        absorbed.push(other.id);
    }

    if absorbed.is_empty() && start_time == current.start_time && end_time == current.end_time {
        Placement::Unchanged(current.id)
    } else {
        Placement::Extend {
            id: current.id,
            start_time,
            end_time,
            absorbed,
        }
    }
}

/// Motor de agregação sobre um store transacional.
#[derive(Debug, Clone)]
pub struct OutageAggregator<S> {
    store: S,
    gap: TimeDelta,
}

impl<S: WindowStore> OutageAggregator<S> {
    pub fn new(store: S, gap: TimeDelta) -> Self {
        Self { store, gap }
    }

    /// Agrega um evento e retorna o id da janela que o contém.
    ///
    /// Falhas de serialização voltam como
    /// [`StorageError::TransactionConflict`] e devem ser reenviadas pelo
    /// transporte; o estado persistido fica intacto.
    pub async fn ingest(&self, event: &RawEvent) -> Result<WindowId, StorageError> {
        let mut tx = self.store.begin().await?;
        match self.aggregate(&mut tx, event).await {
            Ok(id) => {
                tx.commit().await?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "[ENGINE] Rollback falhou após erro de agregação: {:?}",
                        rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn aggregate(
        &self,
        tx: &mut S::Tx,
        event: &RawEvent,
    ) -> Result<WindowId, StorageError> {
        if !tx.insert_raw_if_absent(event).await? {
            // Reentrega: segue a agregação normalmente para manter idempotência
            debug!(
                "[ENGINE] Evento bruto duplicado para {} / {} em {}.",
                event.controller_id, event.outage_type, event.occurred_at
            );
        }

        let candidates = tx
            .find_candidates(
                &event.controller_id,
                event.outage_type,
                earlier_by(event.occurred_at, self.gap),
                later_by(event.occurred_at, self.gap),
            )
            .await?;

        match place(&candidates, event.occurred_at, self.gap) {
            Placement::Create => {
                let id = tx
                    .create_window(&event.controller_id, event.outage_type, event.occurred_at)
                    .await?;
                info!(
                    "[ENGINE] Nova janela {} para {} / {} em {}.",
                    id, event.controller_id, event.outage_type, event.occurred_at
                );
                Ok(id)
            }
            Placement::Unchanged(id) => {
                debug!("[ENGINE] Evento já coberto pela janela {}.", id);
                Ok(id)
            }
            Placement::Extend {
                id,
                start_time,
                end_time,
                absorbed,
            } => {
                for other in &absorbed {
                    tx.remove_window(*other).await?;
                }
                tx.extend_window(id, start_time, end_time).await?;
                if absorbed.is_empty() {
                    debug!(
                        "[ENGINE] Janela {} estendida para [{}, {}].",
                        id, start_time, end_time
                    );
                } else {
                    info!(
                        "[ENGINE] Janela {} absorveu {:?}; agora [{}, {}].",
                        id, absorbed, start_time, end_time
                    );
                }
                Ok(id)
            }
        }
    }
}
