use crate::error::StorageError;
use crate::storage::WindowStore;
use crate::types::{AggregatedWindow, WindowQuery};
use tracing::debug;

/// Consulta somente-leitura de janelas por sobreposição de intervalo.
#[derive(Debug, Clone)]
pub struct OutageQuery<S> {
    store: S,
}

impl<S: WindowStore> OutageQuery<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Janelas do tipo (e controlador, se informado) com
    /// `end_time >= start AND start_time <= end`, mais recentes primeiro.
    pub async fn find(&self, query: &WindowQuery) -> Result<Vec<AggregatedWindow>, StorageError> {
        let windows = self.store.find_windows(query).await?;
        debug!(
            "[QUERY] {} janelas de {} entre {} e {} (controlador: {:?}).",
            windows.len(),
            query.outage_type,
            query.start,
            query.end,
            query.controller_id
        );
        Ok(windows)
    }
}
