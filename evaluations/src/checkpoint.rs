use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::error::AppError;
use serde::{Deserialize, Serialize};

/// Stop-on-fail checkpoint, written at mode level and overwritten by each
/// run. Records progress up to but not including the failed question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed_index: usize,
    pub last_file: String,
    pub citation_enabled: bool,
    pub timestamp: String,
}

pub fn checkpoint_path(mode_dir: &Path) -> PathBuf {
    mode_dir.join("checkpoint.json")
}

pub fn save(mode_dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    std::fs::create_dir_all(mode_dir)
        .with_context(|| format!("creating {}", mode_dir.display()))?;
    let path = checkpoint_path(mode_dir);
    let payload = serde_json::to_string_pretty(checkpoint).context("serializing checkpoint")?;
    std::fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn load(mode_dir: &Path) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(mode_dir);
    if !path.exists() {
        return Ok(None);
    }
    let payload =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let checkpoint =
        serde_json::from_str(&payload).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(checkpoint))
}

pub fn remove(mode_dir: &Path) -> Result<()> {
    let path = checkpoint_path(mode_dir);
    if path.exists() {
        std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

/// A resume must run under the citation mode the checkpoint was written
/// with; otherwise composites are not comparable.
pub fn validate_for_resume(
    checkpoint: &Checkpoint,
    citation_enabled: bool,
) -> Result<(), AppError> {
    if checkpoint.citation_enabled == citation_enabled {
        return Ok(());
    }
    let describe = |enabled: bool| if enabled { "with-citation" } else { "no-citation" };
    Err(AppError::ConfigMismatch(format!(
        "checkpoint was written in {} mode but the current run is {} mode; \
         align the config or delete the checkpoint",
        describe(checkpoint.citation_enabled),
        describe(citation_enabled)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpoint(citation_enabled: bool) -> Checkpoint {
        Checkpoint {
            last_completed_index: 10,
            last_file: "income.md".into(),
            citation_enabled,
            timestamp: "2026-08-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), &checkpoint(true)).unwrap();

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.last_completed_index, 10);
        assert_eq!(loaded.last_file, "income.md");
        assert!(loaded.citation_enabled);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_resume_refuses_mismatched_citation_mode() {
        let err = validate_for_resume(&checkpoint(true), false).unwrap_err();
        assert!(matches!(err, AppError::ConfigMismatch(_)));
        let message = err.to_string();
        assert!(message.contains("with-citation"));
        assert!(message.contains("no-citation"));
    }

    #[test]
    fn test_resume_accepts_matching_citation_mode() {
        assert!(validate_for_resume(&checkpoint(false), false).is_ok());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        remove(dir.path()).unwrap();
        save(dir.path(), &checkpoint(true)).unwrap();
        remove(dir.path()).unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }
}
