//! Directory-backed update repository and visibility store.
//!
//! The production deployment points these at the shared repository volume.
//! The layout is one file per published package, split by kind because
//! detectoid presence is checked separately from ordinary packages:
//!
//! ```text
//! <repository_dir>/
//!   packages/<id>.sdp
//!   detectoids/<id>.sdp
//! ```
//!
//! Publish refuses to overwrite (that is the conflict the importer's revise
//! fallback exists for); revise overwrites; delete of an absent identity is
//! success.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use catalog_sync_core::contract::{
    BoxedError, Existence, PackageArtifact, RepoError, RepositoryClient, VisibilityStore,
};
use catalog_sync_core::model::{PackageId, PackageKind};

pub struct DirRepository {
    root: PathBuf,
}

impl DirRepository {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("packages"))?;
        std::fs::create_dir_all(root.join("detectoids"))?;
        Ok(DirRepository { root })
    }

    fn entry_path(&self, id: PackageId, kind: PackageKind) -> PathBuf {
        let subdir = match kind {
            PackageKind::Ordinary => "packages",
            PackageKind::Detectoid => "detectoids",
        };
        self.root.join(subdir).join(format!("{id}.sdp"))
    }

    fn other(e: io::Error) -> RepoError {
        RepoError::Other(Box::new(e))
    }
}

#[async_trait]
impl RepositoryClient for DirRepository {
    async fn check_existence(
        &self,
        id: PackageId,
        kind: PackageKind,
    ) -> Result<Existence, RepoError> {
        match tokio::fs::try_exists(self.entry_path(id, kind)).await {
            Ok(true) => Ok(Existence::Exists),
            Ok(false) => Ok(Existence::NotFound),
            Err(e) => Err(Self::other(e)),
        }
    }

    async fn publish(&self, artifact: &PackageArtifact) -> Result<(), RepoError> {
        let dest = self.entry_path(artifact.id, artifact.kind);
        match tokio::fs::try_exists(&dest).await {
            Ok(true) => return Err(RepoError::Conflict),
            Ok(false) => {}
            Err(e) => return Err(Self::other(e)),
        }
        tokio::fs::copy(&artifact.path, &dest)
            .await
            .map_err(Self::other)?;
        debug!(package = %artifact.id, dest = %dest.display(), "published package file");
        Ok(())
    }

    async fn revise(&self, artifact: &PackageArtifact) -> Result<(), RepoError> {
        let dest = self.entry_path(artifact.id, artifact.kind);
        tokio::fs::copy(&artifact.path, &dest)
            .await
            .map_err(Self::other)?;
        debug!(package = %artifact.id, dest = %dest.display(), "revised package file");
        Ok(())
    }

    async fn delete(&self, id: PackageId) -> Result<(), RepoError> {
        for kind in [PackageKind::Ordinary, PackageKind::Detectoid] {
            match tokio::fs::remove_file(self.entry_path(id, kind)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Self::other(e)),
            }
        }
        Ok(())
    }
}

/// Append-only ledger of packages made visible this run. One instance per
/// vendor run, as the core requires of visibility stores.
pub struct FileVisibilityStore {
    path: PathBuf,
}

impl FileVisibilityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileVisibilityStore { path: path.into() }
    }
}

#[async_trait]
impl VisibilityStore for FileVisibilityStore {
    async fn mark_visible(&self, id: PackageId) -> Result<(), BoxedError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{id}\n").as_bytes()).await?;
        Ok(())
    }
}
