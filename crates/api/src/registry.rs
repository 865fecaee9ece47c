//! Registered services keyed by identity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use pushgate_common::error::AppError;
use pushgate_engine::worker::ServicePump;

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn ServicePump>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. An existing registration with the same identity
    /// is left untouched and the new one is rejected.
    pub async fn insert(&self, pump: Arc<dyn ServicePump>) -> Result<(), AppError> {
        let mut services = self.services.write().await;
        if services.contains_key(pump.id()) {
            return Err(AppError::DuplicateService(pump.id().to_string()));
        }
        services.insert(pump.id().to_string(), pump);
        Ok(())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.services.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ServicePump>> {
        self.services.read().await.get(id).cloned()
    }

    /// All registrations, ordered by identity.
    pub async fn all(&self) -> Vec<Arc<dyn ServicePump>> {
        let services = self.services.read().await;
        let mut all: Vec<_> = services.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub async fn ids(&self) -> Vec<String> {
        self.all().await.iter().map(|p| p.id().to_string()).collect()
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
