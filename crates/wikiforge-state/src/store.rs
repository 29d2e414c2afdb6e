//! InstanceRegistry — redb-backed persistence for instance records.
//!
//! All values are JSON-serialized into redb's `&[u8]` value column. The
//! registry supports both on-disk and in-memory backends (the latter for
//! testing). Uniqueness checks run inside the same write transaction as
//! the insert they guard; redb's single-writer model makes the
//! check-then-insert atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::INSTANCES;
use crate::types::{Instance, InstanceStatus};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe instance registry backed by redb.
#[derive(Clone)]
pub struct InstanceRegistry {
    db: Arc<Database>,
}

impl InstanceRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "instance registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!("in-memory instance registry opened");
        Ok(registry)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a new instance record.
    ///
    /// Fails with [`StateError::Conflict`] if any instance that still
    /// claims resources holds the same slug, port, container name, or
    /// database name. The check and the insert share one write
    /// transaction.
    pub fn insert(&self, instance: &Instance) -> StateResult<()> {
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;

            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, existing) = entry.map_err(map_err!(Read))?;
                if key.value() == instance.id {
                    return Err(StateError::Conflict(format!(
                        "instance id {} already exists",
                        instance.id
                    )));
                }
                let other: Instance =
                    serde_json::from_slice(existing.value()).map_err(map_err!(Deserialize))?;
                if !other.status.claims_resources() {
                    continue;
                }
                if other.slug == instance.slug {
                    return Err(StateError::Conflict(format!(
                        "slug {} is already {:?} (instance {})",
                        other.slug, other.status, other.id
                    )));
                }
                if other.port == instance.port {
                    return Err(StateError::Conflict(format!(
                        "port {} is already claimed by instance {}",
                        other.port, other.id
                    )));
                }
                if other.container_name == instance.container_name
                    || other.db_name == instance.db_name
                {
                    return Err(StateError::Conflict(format!(
                        "resource names for port {} / slug {} are already claimed",
                        instance.port, instance.slug
                    )));
                }
            }

            table
                .insert(instance.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %instance.id, slug = %instance.slug, "instance inserted");
        Ok(())
    }

    /// Get an instance by id.
    pub fn get(&self, id: &str) -> StateResult<Option<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let instance: Instance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// Get the instance currently claiming a slug, if any.
    ///
    /// `Failed` and `Removed` records do not claim their slug, so this
    /// returns `None` once an instance has been rolled back or torn down.
    pub fn get_by_slug(&self, slug: &str) -> StateResult<Option<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: Instance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if instance.slug == slug && instance.status.claims_resources() {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    /// List instances ordered by creation time, with offset/limit paging.
    pub fn list(&self, offset: usize, limit: usize) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: Instance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(instance);
        }
        // Key order is UUID order; present records oldest-first instead.
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    /// Persist a mutated instance record.
    ///
    /// A status change is validated against the state machine inside the
    /// write transaction; an illegal edge fails with
    /// [`StateError::InvalidTransition`] and leaves the record untouched.
    pub fn update(&self, instance: &Instance) -> StateResult<()> {
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let previous: InstanceStatus = {
                let guard = table
                    .get(instance.id.as_str())
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(instance.id.clone()))?;
                let existing: Instance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                existing.status
            };

            if previous != instance.status && !previous.can_transition_to(instance.status) {
                return Err(StateError::InvalidTransition {
                    from: previous,
                    to: instance.status,
                });
            }

            table
                .insert(instance.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %instance.id, status = ?instance.status, "instance updated");
        Ok(())
    }

    /// Delete an instance record by id. Returns true if it existed.
    pub fn delete(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "instance deleted");
        Ok(existed)
    }

    /// Ports claimed by live instances — used to reseed the port
    /// allocator's reservation set at daemon startup.
    pub fn active_ports(&self) -> StateResult<Vec<u16>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut ports = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: Instance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if instance.status.claims_resources() {
                ports.push(instance.port);
            }
        }
        Ok(ports)
    }
}
