//! Persisted records of incomplete transfers.
//!
//! Stored as a JSON array so an interrupted process can list and resume
//! its uploads later.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Everything needed to reattach to a server session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_id: String,
    #[serde(default)]
    pub server_url: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    #[serde(default)]
    pub last_acknowledged_index: Option<u64>,
    #[serde(default)]
    pub progress: f64,
    /// A completion request was sent but its response never arrived.
    #[serde(default)]
    pub completion_requested: bool,
    pub updated_at: DateTime<Utc>,
}

/// JSON-file backed list of [`ResumeRecord`]s, keyed by session id.
#[derive(Debug)]
pub struct ResumeStore {
    path: PathBuf,
    records: Vec<ResumeRecord>,
}

impl ResumeStore {
    /// Loads the store from `path`.
    ///
    /// A missing file is an empty store. An unreadable one is logged and
    /// treated as empty rather than blocking new uploads.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let mut records = Vec::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<ResumeRecord>>(&content) {
                Ok(parsed) => records = parsed,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse resume records, starting empty"
                ),
            }
        }

        Ok(Self { path, records })
    }

    /// Writes the store back to disk.
    pub fn save(&self) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.path, json)?;
        set_permissions_0600(&self.path);

        tracing::debug!(records = self.records.len(), "resume records saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records ordered oldest update first.
    pub fn list(&self) -> &[ResumeRecord] {
        &self.records
    }

    pub fn get(&self, session_id: &str) -> Option<&ResumeRecord> {
        self.records.iter().find(|r| r.session_id == session_id)
    }

    /// Most recently updated record for a source file.
    pub fn find_by_path(&self, file_path: &Path) -> Option<&ResumeRecord> {
        self.records
            .iter()
            .filter(|r| r.file_path == file_path)
            .max_by_key(|r| r.updated_at)
    }

    /// Adds a record or replaces the one with the same session id.
    pub fn upsert(&mut self, record: ResumeRecord) {
        self.records.retain(|r| r.session_id != record.session_id);
        self.records.push(record);
        self.records.sort_by_key(|r| r.updated_at);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<ResumeRecord> {
        let pos = self.records.iter().position(|r| r.session_id == session_id)?;
        Some(self.records.remove(pos))
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
