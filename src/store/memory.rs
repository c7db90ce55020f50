use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::cluster::{Cluster, PersistStore, Status};
use crate::error::{EngineError, Result};

/// In-memory store that also records every status written per cluster
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Cluster>>,
    history: Mutex<HashMap<String, Vec<Status>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses written through `save_status`, oldest first
    pub fn status_history(&self, name: &str) -> Vec<Status> {
        lock(&self.history).get(name).cloned().unwrap_or_default()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.records).keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl PersistStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.records).contains_key(name))
    }

    async fn load(&self, name: &str) -> Result<Cluster> {
        lock(&self.records)
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCluster(name.to_string()))
    }

    async fn save(&self, cluster: &Cluster) -> Result<()> {
        lock(&self.records).insert(cluster.name.clone(), cluster.clone());
        Ok(())
    }

    async fn save_status(&self, cluster: &Cluster, status: Status) -> Result<()> {
        let mut record = cluster.clone();
        record.status = Some(status);
        lock(&self.records).insert(record.name.clone(), record);
        lock(&self.history)
            .entry(cluster.name.clone())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        lock(&self.records).remove(name);
        Ok(())
    }
}
