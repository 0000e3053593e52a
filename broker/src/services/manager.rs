//! Services manager.
//!
//! Authoritative, mutable collection of registered services.
//!
//! # Concurrency
//!
//! Readers (`matches`, `get_all_services`, `find_service_by`) work on an
//! immutable snapshot: an `Arc<BTreeMap>` cloned out from under a lock
//! that is held only for the pointer copy. Writers are serialized by an
//! async mutex that spans the backend write, build a modified copy of the
//! map, and publish it with a single pointer swap. A reader therefore sees
//! either the state before a mutation or after it, never a mix, and a
//! snapshot handed out earlier is never changed retroactively.

use super::{RegisteredService, UNSAVED_ID, find_match};
use crate::error::{BrokerError, Result};
use crate::providers::ServiceRegistryDao;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

type Snapshot = Arc<BTreeMap<i64, RegisteredService>>;

/// Services manager over a persistence backend.
///
/// # Example
///
/// ```
/// use ticket_broker::services::{RegisteredService, ServicePattern, ServicesManager};
/// use ticket_broker::stores::InMemoryServiceRegistryDao;
///
/// # tokio_test::block_on(async {
/// let manager = ServicesManager::new(InMemoryServiceRegistryDao::new());
/// let saved = manager
///     .save(RegisteredService::new("app", ServicePattern::regex("^https://app").unwrap()))
///     .await
///     .unwrap();
///
/// assert_eq!(manager.matches("https://app.example.com").unwrap().id, saved.id);
/// # });
/// ```
#[derive(Debug)]
pub struct ServicesManager<D> {
    dao: D,
    snapshot: RwLock<Snapshot>,
    /// Serializes writers; guards the next id to hand out.
    writer: Mutex<i64>,
}

impl<D: ServiceRegistryDao> ServicesManager<D> {
    /// Create an empty manager over `dao`.
    ///
    /// Call [`ServicesManager::reload`] (or use [`ServicesManager::load`])
    /// to pick up services already stored in the backend.
    #[must_use]
    pub fn new(dao: D) -> Self {
        Self {
            dao,
            snapshot: RwLock::new(Arc::new(BTreeMap::new())),
            writer: Mutex::new(1),
        }
    }

    /// Create a manager and load the backend's current contents.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read or holds duplicate ids.
    pub async fn load(dao: D) -> Result<Self> {
        let manager = Self::new(dao);
        manager.reload().await?;
        Ok(manager)
    }

    /// Replace the in-memory snapshot with the backend's contents.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read or holds duplicate ids.
    pub async fn reload(&self) -> Result<usize> {
        let mut next_id = self.writer.lock().await;

        let mut services = BTreeMap::new();
        for service in self.dao.load().await? {
            if !service.is_saved() {
                return Err(BrokerError::Internal(format!(
                    "Backend returned unsaved service {:?}",
                    service.name
                )));
            }
            let id = service.id;
            if services.insert(id, service).is_some() {
                return Err(BrokerError::DuplicateServiceId(id));
            }
        }

        if let Some(max) = services.keys().next_back() {
            *next_id = (*next_id).max(max.saturating_add(1));
        }

        let count = services.len();
        self.publish(services);

        tracing::info!(service_count = count, "Reloaded registered services");
        Ok(count)
    }

    /// Save a service.
    ///
    /// A service carrying [`UNSAVED_ID`] gets a fresh id that this manager
    /// has never handed out before. Any other id is an upsert: the stored
    /// entry is replaced entirely.
    ///
    /// # Returns
    ///
    /// The stored representation, including its id.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The backend write fails
    /// - A generated id collides with a stored one ([`BrokerError::DuplicateServiceId`])
    pub async fn save(&self, mut service: RegisteredService) -> Result<RegisteredService> {
        let mut next_id = self.writer.lock().await;
        let current = self.snapshot();

        if service.is_saved() {
            if service.id >= *next_id {
                *next_id = service.id.saturating_add(1);
            }
        } else {
            let id = *next_id;
            if id == UNSAVED_ID {
                return Err(BrokerError::Internal(
                    "Registered service id space exhausted".to_string(),
                ));
            }
            if current.contains_key(&id) {
                return Err(BrokerError::DuplicateServiceId(id));
            }
            service.id = id;
            *next_id = id + 1;
        }

        self.dao.save(&service).await?;

        let mut updated = (*current).clone();
        let replaced = updated.insert(service.id, service.clone()).is_some();
        self.publish(updated);

        tracing::info!(
            service_id = service.id,
            name = %service.name,
            pattern = %service.pattern,
            evaluation_order = service.evaluation_order,
            replaced = replaced,
            "Saved registered service"
        );

        Ok(service)
    }

    /// Delete a service.
    ///
    /// Idempotent: deleting an unknown id returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend write fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let _next_id = self.writer.lock().await;
        let current = self.snapshot();

        let removed_from_backend = self.dao.delete(id).await?;

        let removed = if current.contains_key(&id) {
            let mut updated = (*current).clone();
            updated.remove(&id);
            self.publish(updated);
            true
        } else {
            removed_from_backend
        };

        if removed {
            tracing::info!(service_id = id, "Deleted registered service");
        } else {
            tracing::debug!(service_id = id, "Delete of unknown registered service");
        }

        Ok(removed)
    }

    /// Find a service by id.
    #[must_use]
    pub fn find_service_by(&self, id: i64) -> Option<RegisteredService> {
        self.snapshot().get(&id).cloned()
    }

    /// Snapshot of every service, in evaluation order (ties by id).
    #[must_use]
    pub fn get_all_services(&self) -> Vec<RegisteredService> {
        let mut services: Vec<RegisteredService> = self.snapshot().values().cloned().collect();
        services.sort_by_key(|s| (s.evaluation_order, s.id));
        services
    }

    /// Service that owns `candidate`, if any enabled service matches.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> Option<RegisteredService> {
        let snapshot = self.snapshot();
        find_match(snapshot.values(), candidate).cloned()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Snapshot {
        // The map behind the lock is only ever swapped whole, so a poisoned
        // lock still holds a consistent snapshot.
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, services: BTreeMap<i64, RegisteredService>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(services);
    }
}
