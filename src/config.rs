use config as config_crate;
use serde::Deserialize;
use std::time::Duration;

/// Teto do backoff base entre tentativas (1 minuto).
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Configuração operacional do serviço.
///
/// Fontes, em ordem de prioridade crescente: valores padrão, arquivo
/// `config.*` opcional e variáveis de ambiente (`GAP_MINUTES`,
/// `DATABASE_URL`, `RABBITMQ_URL`, `RABBITMQ_QUEUE`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URL de conexão com o banco PostgreSQL.
    pub database_url: String,
    /// Tamanho máximo do pool de conexões.
    pub database_max_connections: usize,
    /// Espaçamento máximo, em minutos, entre eventos da mesma janela.
    pub gap_minutes: u32,
    /// URL AMQP do broker (obrigatória).
    pub rabbitmq_url: String,
    /// Nome da fila durável de ingestão.
    pub rabbitmq_queue: String,
    /// Mensagens não confirmadas por worker (basic.qos).
    pub consumer_prefetch: u16,
    /// Porta HTTP.
    pub port: u16,
    /// Quantidade de workers consumindo a fila.
    pub consumer_workers: usize,
    /// Tentativas por mensagem antes de ir para dead-letter.
    pub max_delivery_attempts: u32,
    /// Backoff base entre tentativas, em milissegundos.
    pub retry_backoff_ms: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config_crate::Config::builder()
            .set_default("database_max_connections", 10)?
            .set_default("gap_minutes", 60)?
            .set_default("rabbitmq_queue", "outage.raw")?
            .set_default("port", 3000)?
            .set_default("consumer_workers", 4)?
            .set_default("consumer_prefetch", 16)?
            .set_default("max_delivery_attempts", 5)?
            .set_default("retry_backoff_ms", 50)?
            .add_source(config_crate::File::with_name("config").required(false))
            .add_source(config_crate::Environment::default().try_parsing(true))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validação dos parâmetros operacionais.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("database_url não pode ser vazio".into());
        }
        if self.database_max_connections == 0 {
            return Err("database_max_connections deve ser maior que zero".into());
        }
        if self.consumer_workers == 0 {
            return Err("consumer_workers deve ser maior que zero".into());
        }
        if self.consumer_prefetch == 0 {
            return Err("consumer_prefetch deve ser maior que zero".into());
        }
        if self.max_delivery_attempts == 0 {
            return Err("max_delivery_attempts deve ser maior que zero".into());
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(format!(
                "retry_backoff_ms deve ser no máximo {}",
                MAX_RETRY_BACKOFF_MS
            ));
        }
        if self.rabbitmq_url.trim().is_empty() {
            return Err("rabbitmq_url não pode ser vazio".into());
        }
        if self.rabbitmq_queue.trim().is_empty() {
            return Err("rabbitmq_queue não pode ser vazio".into());
        }
        Ok(())
    }

    pub fn gap(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::minutes(i64::from(self.gap_minutes))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
