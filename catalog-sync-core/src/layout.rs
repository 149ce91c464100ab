//! Working-directory layout and snapshot rotation.
//!
//! One working directory holds everything the pipeline touches on disk:
//!
//! ```text
//! <working_dir>/
//!   old/                  previous run's catalog archives
//!   new/                  this run's downloads
//!   extract/              descriptor documents pulled out of archives
//!   tmp/                  transient serialized package artifacts
//!   run-summary.json      vendor name -> RunResult, rewritten per run
//!   baseline.json         vendor name -> change-detection baseline
//!   changed-vendors.txt   names of vendors imported with changes this run
//!   effective-profiles.txt  optional post-run profile dump
//! ```
//!
//! The driver owns this layout exclusively; no other component renames or
//! deletes the snapshot directories.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DirLayout {
    working_dir: PathBuf,
}

impl DirLayout {
    /// Anchor the layout at `working_dir` and create every directory it
    /// needs. Idempotent.
    pub fn create(working_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let layout = DirLayout {
            working_dir: working_dir.into(),
        };
        for dir in [
            layout.working_dir.clone(),
            layout.old_dir(),
            layout.new_dir(),
            layout.extract_dir(),
            layout.tmp_artifact_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(layout)
    }

    pub fn old_dir(&self) -> PathBuf {
        self.working_dir.join("old")
    }

    pub fn new_dir(&self) -> PathBuf {
        self.working_dir.join("new")
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.working_dir.join("extract")
    }

    pub fn tmp_artifact_dir(&self) -> PathBuf {
        self.working_dir.join("tmp")
    }

    pub fn summary_file(&self) -> PathBuf {
        self.working_dir.join("run-summary.json")
    }

    pub fn baseline_file(&self) -> PathBuf {
        self.working_dir.join("baseline.json")
    }

    pub fn flag_file(&self) -> PathBuf {
        self.working_dir.join("changed-vendors.txt")
    }

    pub fn profile_dump_file(&self) -> PathBuf {
        self.working_dir.join("effective-profiles.txt")
    }

    pub fn old_archive(&self, artifact_file_name: &str) -> PathBuf {
        self.old_dir().join(artifact_file_name)
    }

    pub fn new_archive(&self, artifact_file_name: &str) -> PathBuf {
        self.new_dir().join(artifact_file_name)
    }

    /// End-of-run rotation: drop the old snapshots, promote this run's
    /// downloads to be next run's baseline, recreate an empty `new/`.
    pub async fn rotate(&self) -> io::Result<()> {
        let old = self.old_dir();
        let new = self.new_dir();
        match tokio::fs::remove_dir_all(&old).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::rename(&new, &old).await?;
        tokio::fs::create_dir_all(&new).await?;
        debug!(dir = %self.working_dir.display(), "rotated snapshot directories");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rotate_promotes_new_to_old() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::create(dir.path().join("work")).unwrap();

        tokio::fs::write(layout.old_archive("a.cab"), b"stale")
            .await
            .unwrap();
        tokio::fs::write(layout.new_archive("a.cab"), b"fresh")
            .await
            .unwrap();

        layout.rotate().await.unwrap();

        let promoted = tokio::fs::read(layout.old_archive("a.cab")).await.unwrap();
        assert_eq!(promoted, b"fresh");
        assert!(layout.new_dir().exists());
        assert!(!layout.new_archive("a.cab").exists());
    }

    #[tokio::test]
    async fn rotate_with_missing_old_dir_succeeds() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::create(dir.path().join("work")).unwrap();
        tokio::fs::remove_dir_all(layout.old_dir()).await.unwrap();
        layout.rotate().await.unwrap();
        assert!(layout.old_dir().exists());
    }
}
