use std::sync::Arc;
use std::time::Duration;

use fees_infra::{
    BillRegistry, HistoryStore, InMemoryGateway, InMemoryHistoryStore, PersistenceGateway,
    PgPersistenceGateway, RuntimeConfig,
};

use crate::config::ApiConfig;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppServices {
    pub registry: Arc<BillRegistry>,
    pub close_wait: Duration,
}

impl AppServices {
    pub fn new(registry: Arc<BillRegistry>, close_wait: Duration) -> Self {
        Self {
            registry,
            close_wait,
        }
    }

    /// In-memory gateway and history; what tests and local runs use.
    pub fn in_memory(runtime: RuntimeConfig, close_wait: Duration) -> Self {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        Self::new(
            Arc::new(BillRegistry::new(gateway, history, runtime)),
            close_wait,
        )
    }
}

/// Wire the registry from configuration.
///
/// The history journal is always in-process; `DATABASE_URL` only selects where
/// bill rows are written.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let gateway: Arc<dyn PersistenceGateway> = match &config.database_url {
        Some(url) => {
            tracing::info!("using postgres persistence gateway");
            Arc::new(PgPersistenceGateway::connect(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; bill rows are kept in memory");
            Arc::new(InMemoryGateway::new())
        }
    };
    let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());

    let registry = Arc::new(BillRegistry::new(gateway, history, config.runtime.clone()));
    let report = registry.recover().await?;
    if !report.failed.is_empty() {
        tracing::warn!(failed = report.failed.len(), "some bills could not be recovered");
    }

    Ok(AppServices::new(registry, config.close_wait))
}
