//! Service registry backend trait.

use crate::error::Result;
use crate::services::RegisteredService;

/// Persistence backend for registered services.
///
/// The [`ServicesManager`](crate::services::ServicesManager) keeps the
/// authoritative in-memory snapshot and writes through to this backend.
/// Implementations only need to round-trip every field losslessly.
///
/// # Implementation Notes
///
/// - `save` is an upsert keyed by `service.id` (always a real id; the
///   manager assigns ids before calling the backend)
/// - `delete` of an unknown id is not an error
pub trait ServiceRegistryDao: Send + Sync {
    /// Load every stored service.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Storage cannot be read
    /// - A stored service cannot be decoded
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<RegisteredService>>> + Send;

    /// Insert or fully replace a service.
    ///
    /// # Errors
    ///
    /// Returns error if the storage write fails.
    fn save(
        &self,
        service: &RegisteredService,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove a service.
    ///
    /// # Returns
    ///
    /// `true` if something was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the storage write fails.
    fn delete(&self, id: i64) -> impl std::future::Future<Output = Result<bool>> + Send;
}
