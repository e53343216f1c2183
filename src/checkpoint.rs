use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Categories finished so far in today's run
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    #[serde(default)]
    pub done: Vec<String>,
}

/// A checkpoint bound to its JSON file; every `mark_done` is persisted immediately.
#[derive(Debug)]
pub struct CheckpointFile {
    path: PathBuf,
    state: Checkpoint,
}

impl CheckpointFile {
    /// Start from scratch, ignoring any file on disk
    pub fn fresh(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), state: Checkpoint::default() }
    }

    /// Load the file if it exists; a missing file is an empty checkpoint
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Malformed checkpoint {}", path.display()))?
        } else {
            Checkpoint::default()
        };
        debug!("Checkpoint {} has {} finished categories", path.display(), state.done.len());
        Ok(Self { path, state })
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.state.done.iter().any(|d| d == id)
    }

    pub fn mark_done(&mut self, id: &str) -> Result<()> {
        if !self.is_done(id) {
            self.state.done.push(id.to_string());
        }
        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &Checkpoint {
        &self.state
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.state)?)
            .with_context(|| format!("Failed to write checkpoint {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cp = CheckpointFile::load(dir.path().join("none.json")).unwrap();
        assert!(cp.state().done.is_empty());
    }

    #[test]
    fn mark_done_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints/migros_checkpoint_2026-10-16.json");

        let mut cp = CheckpointFile::fresh(&path);
        cp.mark_done("101").unwrap();
        cp.mark_done("101").unwrap();
        cp.mark_done("102").unwrap();

        let reloaded = CheckpointFile::load(&path).unwrap();
        assert_eq!(reloaded.state().done, vec!["101", "102"]);
        assert!(reloaded.is_done("102"));
        assert!(!reloaded.is_done("103"));
    }

    #[test]
    fn tolerates_extra_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        fs::write(&path, r#"{"done": ["7"], "method": {}}"#).unwrap();
        assert!(CheckpointFile::load(&path).unwrap().is_done("7"));
    }
}
