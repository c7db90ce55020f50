/// Cluster record storage
mod memory;

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cluster::{Cluster, PersistStore, Status};
use crate::error::{EngineError, Result};

pub use memory::MemoryStore;

const CLUSTERS_DIR: &str = "clusters";
const RECORD_FILE: &str = "config.json";

/// One JSON record per cluster under `<state_dir>/clusters/<name>/config.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            root: state_dir.as_ref().join(CLUSTERS_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cluster_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.cluster_dir(name)?.join(RECORD_FILE))
    }

    /// Every readable record, sorted by name; corrupt records are skipped
    pub async fn list(&self) -> Result<Vec<Cluster>> {
        let mut clusters = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(clusters),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.exists(&name).await? {
                continue;
            }
            match self.load(&name).await {
                Ok(cluster) => clusters.push(cluster),
                Err(EngineError::Persistence(e)) => {
                    warn!("Skipping unreadable cluster record {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }
}

/// Names become directory names, so keep them to one plain path segment
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(EngineError::validation(format!("invalid cluster name {:?}", name)))
    }
}

/// Replace `path` with `data` so readers never see a partial record
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| EngineError::persistence(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .map_err(|e| EngineError::persistence(format!("failed to write {}: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl PersistStore for FileStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.record_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn load(&self, name: &str) -> Result<Cluster> {
        let path = self.record_path(name)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::UnknownCluster(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content).map_err(|e| {
            EngineError::persistence(format!("corrupt record {}: {}", path.display(), e))
        })
    }

    async fn save(&self, cluster: &Cluster) -> Result<()> {
        let path = self.record_path(&cluster.name)?;
        let data = serde_json::to_vec_pretty(cluster)?;
        debug!("Writing cluster record {}", path.display());

        tokio::task::spawn_blocking(move || write_atomically(&path, &data))
            .await
            .map_err(|e| EngineError::persistence(format!("record writer failed: {}", e)))?
    }

    async fn save_status(&self, cluster: &Cluster, status: Status) -> Result<()> {
        let mut record = cluster.clone();
        record.status = Some(status);
        self.save(&record).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let dir = self.cluster_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
