//! Data model shared across the synchronisation pipeline.
//!
//! The catalog side of the model ([`PackageDescriptor`] and friends) is what
//! the parser produces from one vendor's catalog document; the run side
//! ([`ImportStats`], [`RunResult`], [`ImportPolicy`]) is what the driver and
//! importer exchange to describe one run's outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable, opaque identity of a catalog package. Unique within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub Uuid);

impl PackageId {
    pub fn new() -> Self {
        PackageId(Uuid::new_v4())
    }
}

impl Default for PackageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Coarse package type. Detectoids exist to detect applicability, not to
/// install anything, and have distinct existence-check semantics in the
/// update repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackageKind {
    #[default]
    Ordinary,
    Detectoid,
}

/// An OR-set of package identities: a package may declare several groups and
/// needs at least one of them satisfied before it can be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteGroup {
    pub members: Vec<PackageId>,
}

impl PrerequisiteGroup {
    pub fn single(id: PackageId) -> Self {
        PrerequisiteGroup { members: vec![id] }
    }
}

/// One entry of a vendor catalog, as produced by the catalog parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub id: PackageId,
    pub title: String,
    pub kind: PackageKind,
    /// AND of OR-groups.
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteGroup>,
    /// Hard AND dependencies.
    #[serde(default)]
    pub bundle: Vec<PackageId>,
    /// Vendor-specific fields carried through verbatim into the transport
    /// artifact; the core never interprets them.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PackageDescriptor {
    pub fn new(id: PackageId, title: impl Into<String>, kind: PackageKind) -> Self {
        PackageDescriptor {
            id,
            title: title.into(),
            kind,
            prerequisites: Vec::new(),
            bundle: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// All forward dependency edges, in catalog enumeration order:
    /// prerequisite-group members first, then bundle members.
    pub fn dependency_ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.prerequisites
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .chain(self.bundle.iter().copied())
    }
}

/// Per-package outcome counters for one import or retract pass.
///
/// Invariant: `success + failure == total` once a pass has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub total: u32,
    pub success: u32,
    pub failure: u32,
}

impl ImportStats {
    pub fn record(&mut self, ok: bool) {
        self.total += 1;
        if ok {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    pub fn merge(&mut self, other: ImportStats) {
        self.total += other.total;
        self.success += other.success;
        self.failure += other.failure;
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} success={} failure={}",
            self.total, self.success, self.failure
        )
    }
}

/// Terminal outcome of one vendor's run. Every eligible vendor reaches
/// exactly one of these per run; ineligible vendors are listed as `Skipped`,
/// never omitted from the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    Skipped,
    NoChange,
    Imported,
    PartiallyImported,
    AllFailed,
    FailedAtCheck,
    FailedAtDownload,
    FailedAtCompare,
    FailedAtExtract,
    FailedAtParse,
}

/// Classify a completed publish pass. Total and exclusive: any stats value
/// maps to exactly one result.
pub fn classify_import(stats: ImportStats) -> RunResult {
    if stats.total == 0 {
        RunResult::FailedAtParse
    } else if stats.success == stats.total {
        RunResult::Imported
    } else if stats.success == 0 {
        RunResult::AllFailed
    } else {
        RunResult::PartiallyImported
    }
}

/// Knobs for one import/retract pass, passed through to the importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPolicy {
    /// Upper bound on per-package operations in flight at once.
    pub batch_size: usize,
    /// Mark freshly published packages visible in the relational store.
    pub update_visibility_store: bool,
    /// Inject a minimal synthetic installable item into Detectoid artifacts
    /// so the repository treats them as schedulable units.
    pub synthesize_detectoid_payload: bool,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        ImportPolicy {
            batch_size: 500,
            update_visibility_store: false,
            synthesize_detectoid_payload: false,
        }
    }
}
