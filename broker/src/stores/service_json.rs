//! JSON file service registry backend.
//!
//! All services live in one JSON document (an array of services). Every
//! write goes to a uniquely named temporary file in the same directory,
//! which is synced to disk and then renamed over the original. A crash
//! mid-write leaves the previous version intact, and concurrent writers
//! never share a temporary file.

use crate::error::{BrokerError, Result};
use crate::providers::ServiceRegistryDao;
use crate::services::RegisteredService;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

/// Service registry backend stored in a JSON file.
///
/// # Example
///
/// ```no_run
/// use ticket_broker::services::ServicesManager;
/// use ticket_broker::stores::JsonServiceRegistryDao;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ServicesManager::load(JsonServiceRegistryDao::new("/etc/sso/services.json")).await?;
/// println!("{} services registered", manager.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JsonServiceRegistryDao {
    path: PathBuf,
    /// Serializes read-modify-write cycles through this instance.
    write_lock: Mutex<()>,
}

impl JsonServiceRegistryDao {
    /// Backend reading and writing `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<RegisteredService>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(BrokerError::Storage(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, services: &[RegisteredService]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(services)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
            .await
            .map_err(|e| BrokerError::Internal(format!("Document write task failed: {e}")))??;

        tracing::debug!(
            path = %self.path.display(),
            service_count = services.len(),
            "Wrote service registry document"
        );
        Ok(())
    }
}

/// Write `bytes` to a uniquely named sibling of `path`, fsync it, then
/// rename it over `path`.
fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let temp = NamedTempFile::new_in(dir).map_err(|e| {
        BrokerError::Storage(format!("Failed to create temp file in {}: {e}", dir.display()))
    })?;

    let mut file = temp.as_file();
    file.write_all(bytes).map_err(|e| {
        BrokerError::Storage(format!("Failed to write temp file for {}: {e}", path.display()))
    })?;
    file.sync_all().map_err(|e| {
        BrokerError::Storage(format!("Failed to sync temp file for {}: {e}", path.display()))
    })?;

    temp.persist(path).map_err(|e| {
        BrokerError::Storage(format!("Failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

impl ServiceRegistryDao for JsonServiceRegistryDao {
    async fn load(&self) -> Result<Vec<RegisteredService>> {
        self.read_all().await
    }

    async fn save(&self, service: &RegisteredService) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut services = self.read_all().await?;
        match services.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service.clone(),
            None => services.push(service.clone()),
        }
        services.sort_by_key(|s| s.id);

        self.write_all(&services).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut services = self.read_all().await?;
        let before = services.len();
        services.retain(|s| s.id != id);
        if services.len() == before {
            return Ok(false);
        }

        self.write_all(&services).await?;
        Ok(true)
    }
}
