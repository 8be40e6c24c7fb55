use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// One recorded before/after delta for a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCheckpoint {
    pub id: String,
    /// Monotonic within a session; defines chronological order
    pub seq: u64,
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    /// Absent for creates
    #[serde(default, with = "content_b64")]
    pub previous: Option<Vec<u8>>,
    /// Absent for deletes
    #[serde(default, with = "content_b64")]
    pub new: Option<Vec<u8>>,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Input to `CheckpointManager::record`
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub previous: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
    pub tool: String,
    pub call_id: Option<String>,
}

impl FileChange {
    /// `None` when nothing changed
    pub fn kind(&self) -> Option<ChangeKind> {
        match (&self.previous, &self.new) {
            (None, Some(_)) => Some(ChangeKind::Create),
            (Some(_), None) => Some(ChangeKind::Delete),
            (Some(before), Some(after)) if before != after => Some(ChangeKind::Modify),
            _ => None,
        }
    }
}

/// Which checkpoints a rewind reverts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target", content = "value")]
pub enum RewindTarget {
    /// This checkpoint and every later change to the same path
    Checkpoint(String),
    /// The most recent change to this path
    Path(PathBuf),
    /// The N most recent changes across all paths
    Count(usize),
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertedChange {
    pub checkpoint_id: String,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewindFailure {
    pub checkpoint_id: String,
    pub path: PathBuf,
    pub error: String,
}

/// Per-file report of a rewind. Files revert independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewindResult {
    pub reverted: Vec<RevertedChange>,
    pub failed: Vec<RewindFailure>,
}

impl RewindResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for RewindResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} reverted, {} failed",
            self.reverted.len(),
            self.failed.len()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub changes: usize,
    pub last_tool: String,
    pub last_change: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckpointSummary {
    pub total: usize,
    pub creates: usize,
    pub modifies: usize,
    pub deletes: usize,
    /// Sorted by path
    pub files: Vec<FileSummary>,
}

/// Serializable session state for optional external persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub checkpoints: Vec<FileCheckpoint>,
}

impl CheckpointSnapshot {
    /// Save snapshot to `<dir>/checkpoints.json`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).context("Failed to create checkpoint directory")?;
        let path = dir.join("checkpoints.json");
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize checkpoints")?;
        std::fs::write(&path, content).context(format!("Failed to write checkpoints: {:?}", path))?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("checkpoints.json");
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read checkpoints: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse checkpoint JSON")
    }
}

/// File contents as base64 strings so binary files survive JSON
mod content_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(previous: Option<&str>, new: Option<&str>) -> FileChange {
        FileChange {
            path: PathBuf::from("/w/a.txt"),
            previous: previous.map(|s| s.as_bytes().to_vec()),
            new: new.map(|s| s.as_bytes().to_vec()),
            tool: "write_file".into(),
            call_id: None,
        }
    }

    #[test]
    fn test_change_kind_inference() {
        assert_eq!(change(None, Some("x")).kind(), Some(ChangeKind::Create));
        assert_eq!(change(Some("x"), None).kind(), Some(ChangeKind::Delete));
        assert_eq!(change(Some("x"), Some("y")).kind(), Some(ChangeKind::Modify));
        assert_eq!(change(Some("x"), Some("x")).kind(), None);
        assert_eq!(change(None, None).kind(), None);
    }

    #[test]
    fn test_binary_content_survives_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = CheckpointSnapshot {
            session_id: "s".into(),
            saved_at: Utc::now(),
            checkpoints: vec![FileCheckpoint {
                id: "cp-1".into(),
                seq: 1,
                path: PathBuf::from("/w/blob.bin"),
                kind: ChangeKind::Modify,
                timestamp: Utc::now(),
                previous: Some(vec![0, 159, 146, 150]),
                new: Some(vec![255]),
                tool: "write_file".into(),
                call_id: Some("c1".into()),
            }],
        };
        snapshot.save(dir.path()).unwrap();

        let loaded = CheckpointSnapshot::load(dir.path()).unwrap();
        assert_eq!(loaded.checkpoints, snapshot.checkpoints);
    }
}
