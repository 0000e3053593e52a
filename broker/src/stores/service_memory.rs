//! In-memory service registry backend.

use crate::error::{BrokerError, Result};
use crate::providers::ServiceRegistryDao;
use crate::services::RegisteredService;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory service registry backend.
///
/// Nothing survives a restart. Useful for tests and for deployments that
/// register services programmatically at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServiceRegistryDao {
    services: Arc<Mutex<BTreeMap<i64, RegisteredService>>>,
}

impl InMemoryServiceRegistryDao {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with `services`.
    #[must_use]
    pub fn with_services(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        Self {
            services: Arc::new(Mutex::new(
                services.into_iter().map(|s| (s.id, s)).collect(),
            )),
        }
    }
}

impl ServiceRegistryDao for InMemoryServiceRegistryDao {
    async fn load(&self) -> Result<Vec<RegisteredService>> {
        let services = self
            .services
            .lock()
            .map_err(|_| BrokerError::Internal("Mutex lock failed".to_string()))?;
        Ok(services.values().cloned().collect())
    }

    async fn save(&self, service: &RegisteredService) -> Result<()> {
        self.services
            .lock()
            .map_err(|_| BrokerError::Internal("Mutex lock failed".to_string()))?
            .insert(service.id, service.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self
            .services
            .lock()
            .map_err(|_| BrokerError::Internal("Mutex lock failed".to_string()))?
            .remove(&id)
            .is_some())
    }
}
