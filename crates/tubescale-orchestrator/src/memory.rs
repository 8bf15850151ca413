//! In-memory ReplicaSet store.
//!
//! Mirrors the API server's optimistic-concurrency rules: every write
//! assigns a new resourceVersion, an update carrying an older version is
//! rejected with a conflict, and creating an existing name fails with
//! AlreadyExists. Clones share the same underlying store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::api::{BoxFuture, ReplicaSetApi};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::resource::ReplicaSet;

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<String, ReplicaSet>,
    last_version: u64,
    writes: u64,
}

impl Inner {
    fn stamp(&mut self, rs: &mut ReplicaSet) {
        self.last_version += 1;
        rs.metadata.resource_version = Some(self.last_version.to_string());
    }
}

/// Process-local ReplicaSet store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReplicaSets {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryReplicaSets {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a stored object.
    pub fn snapshot(&self, name: &str) -> Option<ReplicaSet> {
        self.lock().items.get(name).cloned()
    }

    /// Names of all stored objects, sorted.
    pub fn names(&self) -> Vec<String> {
        self.lock().items.keys().cloned().collect()
    }

    /// Number of successful creates and updates so far.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Apply an out-of-band change, as another writer would, bumping the
    /// resourceVersion. Returns false if the object doesn't exist.
    pub fn modify(&self, name: &str, change: impl FnOnce(&mut ReplicaSet)) -> bool {
        let mut inner = self.lock();
        let Some(mut rs) = inner.items.get(name).cloned() else {
            return false;
        };
        change(&mut rs);
        inner.stamp(&mut rs);
        inner.items.insert(name.to_string(), rs);
        true
    }

    fn get_sync(&self, name: &str) -> OrchestratorResult<ReplicaSet> {
        self.lock()
            .items
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("replicasets \"{name}\"")))
    }

    fn create_sync(&self, rs: &ReplicaSet) -> OrchestratorResult<ReplicaSet> {
        let name = required_name(rs)?;
        if rs.resource_version().is_some() {
            return Err(OrchestratorError::Api {
                status: 500,
                message: "resourceVersion should not be set on objects to be created".to_string(),
            });
        }

        let mut inner = self.lock();
        if inner.items.contains_key(&name) {
            return Err(OrchestratorError::AlreadyExists(format!(
                "replicasets \"{name}\" already exists"
            )));
        }

        let mut stored = rs.clone();
        inner.stamp(&mut stored);
        inner.items.insert(name.clone(), stored.clone());
        inner.writes += 1;
        debug!(%name, "created replicaset in memory");
        Ok(stored)
    }

    fn update_sync(&self, rs: &ReplicaSet) -> OrchestratorResult<ReplicaSet> {
        let name = required_name(rs)?;

        let mut inner = self.lock();
        let current = inner
            .items
            .get(&name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("replicasets \"{name}\"")))?;

        // An empty version is an unconditional write, as on the API server.
        if let Some(version) = rs.resource_version()
            && current.resource_version() != Some(version)
        {
            return Err(OrchestratorError::Conflict(format!(
                "Operation cannot be fulfilled on replicasets \"{name}\": \
                 the object has been modified; please apply your changes \
                 to the latest version and try again"
            )));
        }

        let mut stored = rs.clone();
        inner.stamp(&mut stored);
        inner.items.insert(name.clone(), stored.clone());
        inner.writes += 1;
        debug!(%name, replicas = ?stored.replicas(), "updated replicaset in memory");
        Ok(stored)
    }
}

fn required_name(rs: &ReplicaSet) -> OrchestratorResult<String> {
    rs.name()
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::Api {
            status: 422,
            message: "metadata.name: Required value".to_string(),
        })
}

impl ReplicaSetApi for InMemoryReplicaSets {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move { self.get_sync(name) })
    }

    fn create<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move { self.create_sync(rs) })
    }

    fn update<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move { self.update_sync(rs) })
    }
}
