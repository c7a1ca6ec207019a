//! storage.rs — Abstração de repositório e backend PostgreSQL
//!
//! O motor de agregação só enxerga os traits [`WindowStore`] e
//! [`WindowTransaction`]; o backend concreto (PostgreSQL aqui, memória nos
//! testes) fica trocável.

use crate::config::Config;
use crate::error::StorageError;
use crate::types::{AggregatedWindow, OutageType, RawEvent, WindowId, WindowQuery};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

const SCHEMA: &str = include_str!("../migrations/0001_outages.sql");

/// Store transacional com isolamento serializável.
#[async_trait]
pub trait WindowStore: Send + Sync {
    type Tx: WindowTransaction;

    /// Abre uma transação SERIALIZABLE.
    async fn begin(&self) -> Result<Self::Tx, StorageError>;

    /// Janelas que interceptam a consulta, ordenadas por start_time desc.
    async fn find_windows(
        &self,
        query: &WindowQuery,
    ) -> Result<Vec<AggregatedWindow>, StorageError>;
}

/// Operações executadas dentro de uma transação aberta.
#[async_trait]
pub trait WindowTransaction: Send {
    /// Insere o evento bruto. Retorna false se já existia (duplicata).
    async fn insert_raw_if_absent(&mut self, event: &RawEvent) -> Result<bool, StorageError>;

    /// Janelas do mesmo controlador+tipo que interceptam [from, to],
    /// ordenadas por end_time desc (empate: id mais recente primeiro).
    async fn find_candidates(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedWindow>, StorageError>;

    async fn create_window(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        at: DateTime<Utc>,
    ) -> Result<WindowId, StorageError>;

    async fn extend_window(
        &mut self,
        id: WindowId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Remove uma janela absorvida por outra durante uma fusão.
    async fn remove_window(&mut self, id: WindowId) -> Result<(), StorageError>;

    async fn commit(self) -> Result<(), StorageError>;

    async fn rollback(self) -> Result<(), StorageError>;
}

/// Backend PostgreSQL com pool de conexões.
#[derive(Clone)]
pub struct Storage {
    pool: Pool,
}

impl Storage {
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut pg = deadpool_postgres::Config::new();
        pg.url = Some(config.database_url.clone());
        pg.pool = Some(PoolConfig::new(config.database_max_connections));
        // Conexão nunca volta ao pool com transação aberta.
        pg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Custom("ROLLBACK".to_string()),
            ..Default::default()
        });
        let pool = pg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Falha cedo se o banco não estiver acessível
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        info!(
            "[STORAGE] Pool PostgreSQL pronto (max {} conexões).",
            config.database_max_connections
        );
        Ok(Self { pool })
    }

    /// Aplica o schema (idempotente).
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("[STORAGE] Schema de outages aplicado.");
        Ok(())
    }
}

#[async_trait]
impl WindowStore for Storage {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StorageError> {
        let client = self.pool.get().await?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL SERIALIZABLE")
            .await?;
        Ok(PgTransaction { client })
    }

    async fn find_windows(
        &self,
        query: &WindowQuery,
    ) -> Result<Vec<AggregatedWindow>, StorageError> {
        let client = self.pool.get().await?;
        let rows = match &query.controller_id {
            Some(controller_id) => {
                let stmt = client
                    .prepare_cached(
                        r#"
                        SELECT id, controller_id, outage_type, start_time, end_time
                        FROM aggregated_outages
                        WHERE outage_type = $1 AND end_time >= $2 AND start_time <= $3
                          AND controller_id = $4
                        ORDER BY start_time DESC, id DESC
                        "#,
                    )
                    .await?;
                client
                    .query(
                        &stmt,
                        &[&query.outage_type, &query.start, &query.end, controller_id],
                    )
                    .await?
            }
            None => {
                let stmt = client
                    .prepare_cached(
                        r#"
                        SELECT id, controller_id, outage_type, start_time, end_time
                        FROM aggregated_outages
                        WHERE outage_type = $1 AND end_time >= $2 AND start_time <= $3
                        ORDER BY start_time DESC, id DESC
                        "#,
                    )
                    .await?;
                client
                    .query(&stmt, &[&query.outage_type, &query.start, &query.end])
                    .await?
            }
        };

        let windows = rows
            .into_iter()
            .map(AggregatedWindow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(windows)
    }
}

/// Transação aberta sobre uma conexão exclusiva do pool.
pub struct PgTransaction {
    client: deadpool_postgres::Object,
}

#[async_trait]
impl WindowTransaction for PgTransaction {
    async fn insert_raw_if_absent(&mut self, event: &RawEvent) -> Result<bool, StorageError> {
        // ON CONFLICT não aborta a transação, ao contrário de capturar unique_violation
        let stmt = self
            .client
            .prepare_cached(
                r#"
                INSERT INTO raw_outages (controller_id, outage_type, occurred_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (controller_id, outage_type, occurred_at) DO NOTHING
                "#,
            )
            .await?;
        let inserted = self
            .client
            .execute(
                &stmt,
                &[&event.controller_id, &event.outage_type, &event.occurred_at],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn find_candidates(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedWindow>, StorageError> {
        let stmt = self
            .client
            .prepare_cached(
                r#"
                SELECT id, controller_id, outage_type, start_time, end_time
                FROM aggregated_outages
                WHERE controller_id = $1 AND outage_type = $2
                  AND end_time >= $3 AND start_time <= $4
                ORDER BY end_time DESC, id DESC
                "#,
            )
            .await?;
        let rows = self
            .client
            .query(&stmt, &[&controller_id, &outage_type, &from, &to])
            .await?;
        let windows = rows
            .into_iter()
            .map(AggregatedWindow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(windows)
    }

    async fn create_window(
        &mut self,
        controller_id: &str,
        outage_type: OutageType,
        at: DateTime<Utc>,
    ) -> Result<WindowId, StorageError> {
        let stmt = self
            .client
            .prepare_cached(
                r#"
                INSERT INTO aggregated_outages (controller_id, outage_type, start_time, end_time)
                VALUES ($1, $2, $3, $3)
                RETURNING id
                "#,
            )
            .await?;
        let row = self
            .client
            .query_one(&stmt, &[&controller_id, &outage_type, &at])
            .await?;
        Ok(WindowId(row.try_get("id")?))
    }

    async fn extend_window(
        &mut self,
        id: WindowId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let stmt = self
            .client
            .prepare_cached(
                "UPDATE aggregated_outages SET start_time = $2, end_time = $3 WHERE id = $1",
            )
            .await?;
        let updated = self
            .client
            .execute(&stmt, &[&id.0, &start_time, &end_time])
            .await?;
        if updated == 0 {
            return Err(StorageError::WindowNotFound(id));
        }
        Ok(())
    }

    async fn remove_window(&mut self, id: WindowId) -> Result<(), StorageError> {
        let stmt = self
            .client
            .prepare_cached("DELETE FROM aggregated_outages WHERE id = $1")
            .await?;
        let removed = self.client.execute(&stmt, &[&id.0]).await?;
        if removed == 0 {
            return Err(StorageError::WindowNotFound(id));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.client.batch_execute("COMMIT").await?;
        debug!("[STORAGE] Transação confirmada.");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            warn!("[STORAGE] Falha no ROLLBACK: {:?}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
