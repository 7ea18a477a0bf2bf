use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::errors::AdmissionError;
use crate::tenant_client::TenantClientCache;
use crate::watch_manager::WatchManager;

/// Process-wide map from tenant identifier to Watch Manager. `get_or_create`
/// is the single entry point; double-checked construction ensures at most
/// one manager per tenant survives a race.
pub struct Directory {
    managers: RwLock<HashMap<String, Arc<WatchManager>>>,
    clients: Arc<TenantClientCache>,
    max_waiters: usize,
    ttl: Duration,
    retry: RetryConfig,
    startup_timeout: Duration,
}

impl Directory {
    pub fn new(
        clients: Arc<TenantClientCache>,
        max_waiters: usize,
        ttl: Duration,
        retry: RetryConfig,
        startup_timeout: Duration,
    ) -> Arc<Directory> {
        Arc::new(Directory {
            managers: RwLock::new(HashMap::new()),
            clients,
            max_waiters,
            ttl,
            retry,
            startup_timeout,
        })
    }

    pub async fn get_or_create(self: &Arc<Self>, tenant: &str) -> Result<Arc<WatchManager>, AdmissionError> {
        if let Some(existing) = self.managers.read().await.get(tenant) {
            return Ok(existing.clone());
        }

        let client = self.clients.client_for(tenant);
        let candidate = WatchManager::new(
            tenant.to_string(),
            client,
            self.max_waiters,
            self.ttl,
            self.retry,
            self.startup_timeout,
        );
        candidate.start().await?;

        let mut managers = self.managers.write().await;
        if let Some(existing) = managers.get(tenant) {
            // Lost the race: another task committed a manager first. Stop
            // our redundant one and hand back the winner.
            candidate.stop().await;
            return Ok(existing.clone());
        }
        managers.insert(tenant.to_string(), candidate.clone());
        drop(managers);

        self.install_ttl_callback(tenant.to_string(), candidate.clone());
        info!(tenant = %tenant, "watch manager started");
        Ok(candidate)
    }

    fn install_ttl_callback(self: &Arc<Self>, tenant: String, manager: Arc<WatchManager>) {
        let directory = self.clone();
        let signal = manager.ttl_expired_signal();
        tokio::spawn(async move {
            signal.notified().await;
            manager.stop().await;
            directory.managers.write().await.remove(&tenant);
            warn!(tenant = %tenant, "watch manager removed from directory after TTL expiry");
        });
    }
}
