use crate::types::WindowId;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Erros de persistência vistos pelo motor de agregação.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Abort por isolamento serializável (ou deadlock). O chamador deve reenviar.
    #[error("conflito de transação: {0}")]
    TransactionConflict(String),

    #[error("erro no banco de dados: {0}")]
    Database(#[source] tokio_postgres::Error),

    #[error("erro ao obter conexão do pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("janela {0} não encontrada")]
    WindowNotFound(WindowId),
}

impl StorageError {
    /// Distingue "reenviar" de "falha fatal".
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::TransactionConflict(_))
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED =>
            {
                StorageError::TransactionConflict(err.to_string())
            }
            _ => StorageError::Database(err),
        }
    }
}

/// Entrada malformada, rejeitada pelos adaptadores antes do motor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("controller_id não pode ser vazio")]
    EmptyControllerId,

    #[error("tipo de outage desconhecido: {0}")]
    UnknownOutageType(String),

    #[error("campo obrigatório ausente: {0}")]
    MissingField(&'static str),

    #[error("timestamp inválido: {0}")]
    InvalidTimestamp(String),

    #[error("end ({end}) deve ser maior ou igual a start ({start})")]
    InvertedRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("payload malformado: {0}")]
    MalformedPayload(String),
}

/// Falhas da fila de ingestão.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("fila {0} encerrada")]
    Closed(String),

    #[error("erro no broker AMQP: {0}")]
    Broker(#[from] lapin::Error),

    #[error("broker recusou a publicação na fila {0}")]
    Nacked(String),

    #[error("falha ao serializar mensagem: {0}")]
    Encode(#[from] serde_json::Error),
}
