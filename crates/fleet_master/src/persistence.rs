//! Durable storage for group definitions.
//!
//! Only groups are persisted; services and players are rebuilt from the
//! live fleet. Two gateways ship with the master:
//!
//! - [`JsonFileGateway`] stores one pretty-printed JSON document per group
//! - [`MemoryGateway`] keeps everything in memory, for tests and throwaway runs

use crate::error::PersistenceError;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_protocol::ServiceGroup;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Save/load/delete contract for group definitions.
#[async_trait]
pub trait PersistenceGateway: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<(), PersistenceError>;

    async fn disconnect(&self) -> Result<(), PersistenceError>;

    /// Inserts or replaces the stored definition of `group`.
    async fn save_group(&self, group: &ServiceGroup) -> Result<(), PersistenceError>;

    async fn load_all_groups(&self) -> Result<Vec<ServiceGroup>, PersistenceError>;

    /// Deleting a group that is not stored succeeds.
    async fn delete_group(&self, name: &str) -> Result<(), PersistenceError>;
}

// ============================================================================
// JSON files
// ============================================================================

#[derive(Debug)]
pub struct JsonFileGateway {
    directory: PathBuf,
    connected: AtomicBool,
}

impl JsonFileGateway {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.json"))
    }

    fn ensure_connected(&self) -> Result<(), PersistenceError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PersistenceError::NotConnected)
        }
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileGateway {
    async fn connect(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        self.connected.store(true, Ordering::Release);
        info!("💾 Group storage opened at {}", self.directory.display());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PersistenceError> {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("💾 Group storage closed");
        }
        Ok(())
    }

    async fn save_group(&self, group: &ServiceGroup) -> Result<(), PersistenceError> {
        self.ensure_connected()?;
        let document = serde_json::to_vec_pretty(group)?;
        let path = self.document_path(&group.name);
        // Write next to the target and rename so a crash never leaves half a document.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, document).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!("💾 Saved group '{}' to {}", group.name, path.display());
        Ok(())
    }

    async fn load_all_groups(&self) -> Result<Vec<ServiceGroup>, PersistenceError> {
        self.ensure_connected()?;
        let mut groups = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ServiceGroup>(&raw) {
                Ok(group) => groups.push(group),
                Err(e) => warn!("⚠️ Skipping unreadable group document {}: {}", path.display(), e),
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn delete_group(&self, name: &str) -> Result<(), PersistenceError> {
        self.ensure_connected()?;
        match tokio::fs::remove_file(self.document_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-memory gateway. `set_available(false)` makes every write fail, which
/// lets callers exercise their persistence-failure paths.
#[derive(Debug)]
pub struct MemoryGateway {
    groups: DashMap<String, ServiceGroup>,
    available: AtomicBool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self {
            groups: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn stored(&self, name: &str) -> Option<ServiceGroup> {
        self.groups.get(name).map(|entry| entry.clone())
    }

    fn ensure_available(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PersistenceError::Unavailable("memory store switched off".to_string()))
        }
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn connect(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn save_group(&self, group: &ServiceGroup) -> Result<(), PersistenceError> {
        self.ensure_available()?;
        self.groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn load_all_groups(&self) -> Result<Vec<ServiceGroup>, PersistenceError> {
        let mut groups: Vec<ServiceGroup> = self.groups.iter().map(|entry| entry.clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn delete_group(&self, name: &str) -> Result<(), PersistenceError> {
        self.ensure_available()?;
        self.groups.remove(name);
        Ok(())
    }
}
