mod api;
mod broker;
mod config;
mod consumer;
mod error;
#[cfg(test)]
mod local_queue;
#[cfg(test)]
mod memory;
mod outage;
mod query;
mod storage;
mod types;

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializa o sistema de logging (tracing)
    tracing_subscriber::fmt::init();

    // Carrega e valida a configuração da aplicação
    let config: Arc<config::Config> = Arc::new(config::Config::load()?);
    info!(
        "Configuração carregada: gap de {} min, fila {}, {} workers.",
        config.gap_minutes, config.rabbitmq_queue, config.consumer_workers
    );

    // Conecta ao banco e garante o schema
    let storage = storage::Storage::connect(&config).await?;
    storage.migrate().await?;

    // Motor de agregação e consulta compartilham o mesmo pool
    let aggregator = Arc::new(outage::OutageAggregator::new(storage.clone(), config.gap()));
    let query = query::OutageQuery::new(storage);

    // Conecta ao broker e declara a fila durável
    let broker = Arc::new(
        broker::AmqpBroker::connect(&config.rabbitmq_url, &config.rabbitmq_queue).await?,
    );
    let policy = consumer::RetryPolicy {
        max_attempts: config.max_delivery_attempts,
        backoff: config.retry_backoff(),
    };

    info!("Spawnando {} workers de consumo", config.consumer_workers);
    let mut handles: Vec<task::JoinHandle<()>> = Vec::new();
    for worker in 0..config.consumer_workers {
        let source = broker.consumer(worker, config.consumer_prefetch).await?;
        let handle = task::spawn(consumer::run_consumer(
            worker,
            Arc::clone(&aggregator),
            source,
            policy,
        ));
        handles.push(handle);
    }

    let publisher: Arc<dyn consumer::IngestPublisher> = broker.clone();
    let state = Arc::new(api::AppState { publisher, query });
    let app = api::router(state);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("HTTP: http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Servidor encerrado: fecha o broker e os workers terminam o que têm
    if let Err(e) = broker.close().await {
        error!("Falha ao fechar conexão com o broker: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker finalizado com erro: {:?}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Falha ao escutar sinal de encerramento: {:?}", e);
    }
    info!("Encerrando servidor HTTP...");
}
