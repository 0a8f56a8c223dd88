//! Durable job registry.
//!
//! Job definitions are kept in memory and written through to a single JSON
//! file after every mutation:
//!
//! ```json
//! { "version": "1.0", "entries": [ { "job_id": "...", ... } ] }
//! ```
//!
//! Mutations are serialized by a writer lock held until the file is
//! replaced. If the write fails the operation reports
//! [`RegistryError::Io`], but the in-memory change is kept.

mod definition;

pub use definition::{JobDefinition, JobFilter};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ResolvedConfig;
use crate::logging::OpTimer;
use crate::scheduler::ScheduleSpec;

/// On-disk format version.
pub const REGISTRY_VERSION: &str = "1.0";

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A job with this id exists and `replace` was not requested.
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    /// No job with this id.
    #[error("job '{0}' not found in registry")]
    UnknownJob(String),

    /// Reading or writing the registry file failed.
    #[error("registry file {}: {source}", path.display())]
    Io {
        /// Registry file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The registry file is not valid.
    #[error("registry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: String,
    entries: Vec<JobDefinition>,
}

/// Durable store of job definitions.
pub struct JobRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, JobDefinition>>,
    writer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("path", &self.path)
            .field("jobs", &self.entries.read().len())
            .finish()
    }
}

impl JobRegistry {
    /// Create an empty registry backed by `path`, without reading it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(BTreeMap::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the registry at `path`, loading existing entries.
    ///
    /// A missing file yields an empty registry.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let registry = Self::new(path);
        let bytes = match tokio::fs::read(&registry.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %registry.path.display(), "No existing registry, starting empty");
                return Ok(registry);
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: registry.path.clone(),
                    source,
                });
            }
        };

        let file: RegistryFile = serde_json::from_slice(&bytes)?;
        if file.version != REGISTRY_VERSION {
            tracing::warn!(version = %file.version, "Registry file version differs, loading anyway");
        }
        {
            let mut entries = registry.entries.write();
            for job in file.entries {
                entries.insert(job.job_id.clone(), job);
            }
        }
        tracing::info!(
            path = %registry.path.display(),
            jobs = registry.len(),
            "Loaded job registry"
        );
        Ok(registry)
    }

    /// Registry file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a job.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateJob`] if the id is taken and `replace` is
    /// false; [`RegistryError::Io`] if the flush fails.
    pub async fn register(
        &self,
        job_id: &str,
        config: ResolvedConfig,
        schedule: Option<ScheduleSpec>,
        source: &str,
        replace: bool,
    ) -> Result<JobDefinition, RegistryError> {
        let _writer = self.writer.lock().await;
        let job = JobDefinition::new(job_id, config, schedule, source);
        let snapshot = {
            let mut entries = self.entries.write();
            if !replace && entries.contains_key(job_id) {
                return Err(RegistryError::DuplicateJob(job_id.to_string()));
            }
            entries.insert(job_id.to_string(), job.clone());
            Self::snapshot(&entries)?
        };
        self.flush(snapshot).await?;

        tracing::info!(job_id, source, scheduled = job.is_scheduled(), "Registered job");
        Ok(job)
    }

    /// Remove a job.
    pub async fn unregister(&self, job_id: &str) -> Result<JobDefinition, RegistryError> {
        let _writer = self.writer.lock().await;
        let (removed, snapshot) = {
            let mut entries = self.entries.write();
            let removed = entries
                .remove(job_id)
                .ok_or_else(|| RegistryError::UnknownJob(job_id.to_string()))?;
            (removed, Self::snapshot(&entries)?)
        };
        self.flush(snapshot).await?;

        tracing::info!(job_id, "Unregistered job");
        Ok(removed)
    }

    /// Record a trigger: bump the count and stamp the time.
    pub async fn mark_triggered(&self, job_id: &str) -> Result<JobDefinition, RegistryError> {
        let _writer = self.writer.lock().await;
        let (job, snapshot) = {
            let mut entries = self.entries.write();
            let job = entries
                .get_mut(job_id)
                .ok_or_else(|| RegistryError::UnknownJob(job_id.to_string()))?;
            job.last_triggered_at = Some(Utc::now());
            job.execution_count += 1;
            let job = job.clone();
            (job, Self::snapshot(&entries)?)
        };
        self.flush(snapshot).await?;
        Ok(job)
    }

    /// Look up a job.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<JobDefinition> {
        self.entries.read().get(job_id).cloned()
    }

    /// Whether a job is registered.
    #[must_use]
    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.read().contains_key(job_id)
    }

    /// Jobs passing `filter`, ordered by id.
    #[must_use]
    pub fn list(&self, filter: JobFilter) -> Vec<JobDefinition> {
        self.entries
            .read()
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect()
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no jobs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(entries: &BTreeMap<String, JobDefinition>) -> Result<Vec<u8>, RegistryError> {
        let file = RegistryFile {
            version: REGISTRY_VERSION.to_string(),
            entries: entries.values().cloned().collect(),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// Replace the registry file with `bytes` via a temporary sibling.
    async fn flush(&self, bytes: Vec<u8>) -> Result<(), RegistryError> {
        let timer = OpTimer::new("registry", "flush");
        let result = self.write_atomically(&bytes).await;
        timer.finish_with_result(result.as_ref());
        result.map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}
