//! # contract: interfaces to the pipeline's external collaborators
//!
//! The synchronisation core treats transport, archive extraction, catalog
//! parsing, the update repository and the visibility store as black boxes
//! behind the traits in this module. Production implementations live in
//! their own modules ([`crate::fetch`], [`crate::extract`], [`crate::parse`],
//! [`crate::importer`]); tests use the generated `mockall` mocks.
//!
//! All traits are async and `Send + Sync`; collaborator failures cross the
//! boundary as typed errors where the caller must distinguish outcomes
//! (conflict vs. other repository failures, existence vs. check failure) and
//! as boxed errors where it must not.

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{ImportPolicy, ImportStats, PackageDescriptor, PackageId, PackageKind};
use crate::vendor::VendorProfile;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Transport failure when probing or downloading a catalog.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[source] BoxedError),
    #[error("unexpected status code {0}")]
    Status(u16),
    #[error("missing or invalid Content-Length header")]
    MissingContentLength,
}

/// Fetches vendor catalog archives. Implementations must try a fallback
/// transport path (an explicitly configured proxy) transparently before
/// reporting a transport error.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Cheap metadata probe: the expected content length of the catalog
    /// archive, without downloading it.
    async fn probe_size(&self, vendor: &VendorProfile) -> Result<u64, FetchError>;

    /// Download the catalog archive into `dest_dir`, returning the path of
    /// the written file.
    async fn download(
        &self,
        vendor: &VendorProfile,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError>;
}

/// Extracts the package-descriptor document from a catalog archive.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract the descriptor document (the catalog XML) from `archive` into
    /// `out_dir` and return its path.
    async fn extract_document(&self, archive: &Path, out_dir: &Path)
        -> Result<PathBuf, BoxedError>;

    /// Remove a previously extracted document. Used for guaranteed cleanup
    /// of temporaries after the import stage, success or not.
    async fn remove_document(&self, document: &Path) -> Result<(), BoxedError>;
}

/// Parses a descriptor document into the in-memory catalog model.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CatalogParser: Send + Sync {
    async fn parse(&self, document: &Path) -> Result<Vec<PackageDescriptor>, BoxedError>;
}

/// Outcome of a repository existence check. A failed check is an `Err`, not
/// a third variant: "not found" and "could not determine" are distinct
/// outcomes with different handling in the per-package operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Exists,
    NotFound,
}

/// Repository-side failure of a publish, revise or delete call.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The package already exists; publish must fall back to revise.
    #[error("package already exists in the repository")]
    Conflict,
    #[error("repository call failed: {0}")]
    Other(#[source] BoxedError),
}

/// A package serialized for transport, handed to the repository client.
#[derive(Debug, Clone)]
pub struct PackageArtifact {
    pub id: PackageId,
    pub kind: PackageKind,
    /// Path of the transient serialized file; deleted by the importer on
    /// every exit path of the per-package operation.
    pub path: PathBuf,
}

/// Client of the centralized update repository. Publish/revise/delete
/// semantics, authentication and wire format are the client's business; the
/// core only sequences and retries the calls.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Whether a package is already present. Detectoids use a distinct
    /// presence check server-side, hence the `kind` parameter.
    async fn check_existence(
        &self,
        id: PackageId,
        kind: PackageKind,
    ) -> Result<Existence, RepoError>;

    async fn publish(&self, artifact: &PackageArtifact) -> Result<(), RepoError>;

    async fn revise(&self, artifact: &PackageArtifact) -> Result<(), RepoError>;

    /// Idempotent: deleting an identity that is not present is success.
    async fn delete(&self, id: PackageId) -> Result<(), RepoError>;
}

/// Auxiliary relational store that makes freshly published packages visible
/// in the management console. One implementation instance corresponds to one
/// open connection; the driver scopes it to a single vendor's run and never
/// shares it across vendors.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VisibilityStore: Send + Sync {
    async fn mark_visible(&self, id: PackageId) -> Result<(), BoxedError>;
}

/// Structural failure of an import pass, as opposed to per-package failures
/// which are folded into [`ImportStats`].
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("dependency cycle detected involving package {0}")]
    Cycle(PackageId),
}

/// Importer backends: the production repository-backed importer and the
/// no-op dry-run variant. Exactly this capability set, so the driver can
/// swap backends without knowing which one it holds.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Importer: Send + Sync {
    /// Publish every descriptor, dependencies before dependents.
    async fn import_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError>;

    /// Retract every descriptor, dependents before dependencies.
    async fn retract_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError>;
}
