//! Importer backends: the repository-backed production importer and the
//! no-op dry-run variant.
//!
//! [`RepoImporter`] owns the per-package publish and delete operations and
//! the order in which they run: dependency-ordered via [`crate::graph`],
//! fanned out through [`crate::executor`] where the topology allows it. A
//! per-package operation never lets an error escape its boundary; every
//! outcome is a boolean folded into [`ImportStats`]. Only a structural
//! problem with the snapshot itself (a dependency cycle) fails the whole
//! pass.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::contract::{
    Existence, ImportError, Importer, PackageArtifact, RepoError, RepositoryClient,
    VisibilityStore,
};
use crate::executor::run_batched;
use crate::graph::{DependencyGraph, GraphError, PublishPlan};
use crate::model::{
    ImportPolicy, ImportStats, PackageDescriptor, PackageId, PackageKind,
};

/// Production importer: publishes into and retracts from the update
/// repository, optionally mirroring fresh publishes into the visibility
/// store. The visibility store handle, when present, must be scoped to one
/// vendor's run; the driver constructs one importer per vendor when the
/// visibility policy is on.
pub struct RepoImporter {
    repo: Arc<dyn RepositoryClient>,
    visibility: Option<Arc<dyn VisibilityStore>>,
    artifact_dir: PathBuf,
}

/// Everything one spawned per-package operation needs to own.
#[derive(Clone)]
struct OpContext {
    repo: Arc<dyn RepositoryClient>,
    visibility: Option<Arc<dyn VisibilityStore>>,
    artifact_dir: PathBuf,
    vendor: Arc<str>,
    /// Kinds of every identity in the snapshot, for kind-aware existence
    /// checks on prerequisite members.
    kinds: Arc<HashMap<PackageId, PackageKind>>,
    policy: ImportPolicy,
}

impl RepoImporter {
    pub fn new(
        repo: Arc<dyn RepositoryClient>,
        visibility: Option<Arc<dyn VisibilityStore>>,
        artifact_dir: PathBuf,
    ) -> Self {
        RepoImporter {
            repo,
            visibility,
            artifact_dir,
        }
    }

    fn context(&self, vendor: &str, graph: &DependencyGraph, policy: &ImportPolicy) -> OpContext {
        let kinds: HashMap<PackageId, PackageKind> = graph
            .ids()
            .map(|id| (id, graph.descriptor(&id).map(|d| d.kind).unwrap_or_default()))
            .collect();
        OpContext {
            repo: self.repo.clone(),
            visibility: self.visibility.clone(),
            artifact_dir: self.artifact_dir.clone(),
            vendor: Arc::from(vendor),
            kinds: Arc::new(kinds),
            policy: policy.clone(),
        }
    }
}

fn graph_error(e: GraphError) -> ImportError {
    match e {
        GraphError::Cycle(id) => ImportError::Cycle(id),
    }
}

#[async_trait]
impl Importer for RepoImporter {
    async fn import_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError> {
        let graph = DependencyGraph::build(descriptors.to_vec());
        let ctx = self.context(vendor, &graph, policy);
        let mut stats = ImportStats::default();

        match graph.plan().map_err(graph_error)? {
            PublishPlan::FastPath { detectoid, rest } => {
                info!(
                    vendor,
                    packages = graph.len(),
                    "single-detectoid catalog, publishing detectoid first then batching"
                );
                if let Some(d) = graph.descriptor(&detectoid) {
                    stats.record(publish_package(ctx.clone(), d.clone()).await);
                }
                let ops: Vec<_> = rest
                    .iter()
                    .filter_map(|id| graph.descriptor(id).cloned())
                    .map(|d| {
                        let ctx = ctx.clone();
                        publish_package(ctx, d)
                    })
                    .collect();
                stats.merge(run_batched(ops, policy.batch_size).await);
            }
            PublishPlan::Ordered(order) => {
                debug!(vendor, packages = order.len(), "publishing in dependency order");
                for id in order {
                    if let Some(d) = graph.descriptor(&id) {
                        stats.record(publish_package(ctx.clone(), d.clone()).await);
                    }
                }
            }
        }

        info!(vendor, %stats, "import pass complete");
        Ok(stats)
    }

    async fn retract_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError> {
        let graph = DependencyGraph::build(descriptors.to_vec());
        let ctx = self.context(vendor, &graph, policy);
        let mut stats = ImportStats::default();

        match graph.plan().map_err(graph_error)? {
            // Reverse of the publish fast path: the independent packages go
            // first, the detectoid they all depend on goes last.
            PublishPlan::FastPath { detectoid, rest } => {
                let ops: Vec<_> = rest
                    .iter()
                    .filter_map(|id| graph.descriptor(id).cloned())
                    .map(|d| {
                        let ctx = ctx.clone();
                        delete_package(ctx, d.id, d.kind)
                    })
                    .collect();
                stats.merge(run_batched(ops, policy.batch_size).await);
                if let Some(d) = graph.descriptor(&detectoid) {
                    stats.record(delete_package(ctx.clone(), d.id, d.kind).await);
                }
            }
            PublishPlan::Ordered(_) => {
                let order = graph.delete_order().map_err(graph_error)?;
                debug!(vendor, packages = order.len(), "deleting in reverse dependency order");
                for id in order {
                    if let Some(d) = graph.descriptor(&id) {
                        stats.record(delete_package(ctx.clone(), id, d.kind).await);
                    }
                }
            }
        }

        info!(vendor, %stats, "retract pass complete");
        Ok(stats)
    }
}

/// Publish one package. Existence check, prerequisite refusal, artifact
/// serialization, publish with a single revise fallback on conflict,
/// optional visibility write, guaranteed artifact cleanup. Returns success
/// as a boolean; nothing escapes this boundary.
async fn publish_package(ctx: OpContext, descriptor: PackageDescriptor) -> bool {
    let id = descriptor.id;
    let vendor = ctx.vendor.clone();

    // A failed check is not "not found": remember that we do not know, try
    // the publish path and let the conflict fallback sort it out.
    let known_existence = match ctx.repo.check_existence(id, descriptor.kind).await {
        Ok(existence) => Some(existence),
        Err(e) => {
            warn!(vendor = %vendor, package = %id, error = %e, "existence check failed, proceeding as unknown");
            None
        }
    };

    if known_existence != Some(Existence::Exists)
        && !prerequisites_satisfied(&ctx, &descriptor).await
    {
        warn!(
            vendor = %vendor,
            package = %id,
            groups = descriptor.prerequisites.len(),
            "no prerequisite group satisfied remotely, publish refused"
        );
        return false;
    }

    let artifact = match write_artifact(&ctx, &descriptor).await {
        Ok(artifact) => artifact,
        Err(e) => {
            error!(vendor = %vendor, package = %id, error = %e, "failed to serialize package artifact");
            return false;
        }
    };

    let ok = attempt_publish(&ctx, &artifact, known_existence).await;

    if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
        warn!(vendor = %vendor, package = %id, error = %e, "failed to remove temporary artifact");
    }
    ok
}

/// Publish or revise depending on what the existence check said; a publish
/// conflict falls back to revise exactly once, and a revise failure is
/// terminal for the package.
async fn attempt_publish(
    ctx: &OpContext,
    artifact: &PackageArtifact,
    known_existence: Option<Existence>,
) -> bool {
    let id = artifact.id;
    let vendor = &ctx.vendor;

    if known_existence == Some(Existence::Exists) {
        return match ctx.repo.revise(artifact).await {
            Ok(()) => {
                debug!(vendor = %vendor, package = %id, "revised existing package");
                true
            }
            Err(e) => {
                error!(vendor = %vendor, package = %id, error = %e, "failed to revise package");
                false
            }
        };
    }

    match ctx.repo.publish(artifact).await {
        Ok(()) => {
            debug!(vendor = %vendor, package = %id, "published package");
            if ctx.policy.update_visibility_store {
                mark_visible(ctx, id).await;
            }
            true
        }
        Err(RepoError::Conflict) => {
            info!(
                vendor = %vendor,
                package = %id,
                "publish conflict, package exists after all, falling back to revise"
            );
            match ctx.repo.revise(artifact).await {
                Ok(()) => {
                    debug!(vendor = %vendor, package = %id, "revised package after conflict");
                    true
                }
                Err(e) => {
                    error!(
                        vendor = %vendor,
                        package = %id,
                        error = %e,
                        "revise after conflict failed, final attempt for this package"
                    );
                    false
                }
            }
        }
        Err(e) => {
            error!(vendor = %vendor, package = %id, error = %e, "failed to publish package");
            false
        }
    }
}

/// The visibility write only happens for fresh publishes, and its failure
/// does not fail the package: the repository holds the package either way.
async fn mark_visible(ctx: &OpContext, id: PackageId) {
    if let Some(store) = &ctx.visibility {
        if let Err(e) = store.mark_visible(id).await {
            error!(vendor = %ctx.vendor, package = %id, error = %e, "failed to mark package visible");
        }
    }
}

/// At least one declared group must have every member already present
/// remotely. A package with no declared groups passes. Check failures count
/// the member as unsatisfied rather than aborting the scan.
async fn prerequisites_satisfied(ctx: &OpContext, descriptor: &PackageDescriptor) -> bool {
    if descriptor.prerequisites.is_empty() {
        return true;
    }
    'groups: for group in &descriptor.prerequisites {
        for member in &group.members {
            let kind = ctx.kinds.get(member).copied().unwrap_or_default();
            match ctx.repo.check_existence(*member, kind).await {
                Ok(Existence::Exists) => {}
                Ok(Existence::NotFound) | Err(_) => continue 'groups,
            }
        }
        return true;
    }
    false
}

/// Serialize the descriptor to the transient transport artifact. Detectoids
/// optionally gain a minimal synthetic installable item so the repository
/// treats them as schedulable units rather than metadata-only entries.
async fn write_artifact(
    ctx: &OpContext,
    descriptor: &PackageDescriptor,
) -> Result<PackageArtifact, crate::contract::BoxedError> {
    let mut payload = serde_json::to_value(descriptor)?;
    if ctx.policy.synthesize_detectoid_payload && descriptor.kind == PackageKind::Detectoid {
        payload["syntheticInstallableItem"] = serde_json::json!({
            "id": PackageId::new(),
            "kind": "SyntheticDetection",
        });
    }
    let path = ctx.artifact_dir.join(format!("{}.sdp", descriptor.id));
    tokio::fs::write(&path, serde_json::to_vec_pretty(&payload)?).await?;
    Ok(PackageArtifact {
        id: descriptor.id,
        kind: descriptor.kind,
        path,
    })
}

/// Delete one package. Absent is success; the repository's delete is itself
/// idempotent, so a failed existence check just tries the delete anyway.
async fn delete_package(ctx: OpContext, id: PackageId, kind: PackageKind) -> bool {
    match ctx.repo.check_existence(id, kind).await {
        Ok(Existence::NotFound) => {
            debug!(vendor = %ctx.vendor, package = %id, "package already absent, delete is a no-op");
            return true;
        }
        Ok(Existence::Exists) => {}
        Err(e) => {
            warn!(vendor = %ctx.vendor, package = %id, error = %e, "existence check failed before delete, deleting anyway");
        }
    }
    match ctx.repo.delete(id).await {
        Ok(()) => {
            debug!(vendor = %ctx.vendor, package = %id, "deleted package");
            true
        }
        Err(e) => {
            error!(vendor = %ctx.vendor, package = %id, error = %e, "failed to delete package");
            false
        }
    }
}

/// Dry-run importer: validates the snapshot's structure by planning the
/// traversal, touches nothing remote, reports every package as succeeded.
pub struct DefaultImporter;

#[async_trait]
impl Importer for DefaultImporter {
    async fn import_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        _policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError> {
        let graph = DependencyGraph::build(descriptors.to_vec());
        let order = graph.publish_order().map_err(graph_error)?;
        info!(vendor, packages = order.len(), "dry-run import, no repository calls");
        Ok(ImportStats {
            total: order.len() as u32,
            success: order.len() as u32,
            failure: 0,
        })
    }

    async fn retract_from_catalog(
        &self,
        vendor: &str,
        descriptors: &[PackageDescriptor],
        _policy: &ImportPolicy,
    ) -> Result<ImportStats, ImportError> {
        let graph = DependencyGraph::build(descriptors.to_vec());
        let order = graph.delete_order().map_err(graph_error)?;
        info!(vendor, packages = order.len(), "dry-run retract, no repository calls");
        Ok(ImportStats {
            total: order.len() as u32,
            success: order.len() as u32,
            failure: 0,
        })
    }
}
