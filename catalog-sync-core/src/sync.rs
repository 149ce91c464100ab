//! Synchronisation driver: one pass over all vendors.
//!
//! Per eligible vendor, one concurrent task walks the pipeline strictly in
//! stage order: freshness check and size probe, download, hash compare,
//! extract, parse, dependency-ordered import. Stage failures terminate that
//! vendor's run with a stage-specific [`RunResult`]; nothing a vendor does
//! can abort a sibling vendor or the pass itself.
//!
//! After the pass the driver owns the end-of-run bookkeeping: run summary,
//! changed-vendors flag file, snapshot rotation and the persisted change
//! detection baseline. Scheduling (interval, config re-read between runs)
//! is the caller's loop; [`Synchroniser::run_once`] is re-entrant.
//!
//! The run timeout is best effort: vendor tasks still in flight when it
//! elapses are abandoned, not cancelled, and their repository writes may
//! complete in the background. Tightening this would mean threading a
//! cancellation token through every suspension point of the pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::compare;
use crate::contract::{CatalogParser, Extractor, Fetcher, Importer};
use crate::layout::DirLayout;
use crate::model::{classify_import, ImportPolicy, RunResult};
use crate::vendor::{self, VendorProfile};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Snapshots younger than this get the cheap size probe instead of an
    /// unconditional download.
    pub freshness_window: chrono::Duration,
    /// Upper bound on one whole pass; see the module docs for the
    /// abandonment caveat.
    pub run_timeout: std::time::Duration,
    pub policy: ImportPolicy,
    /// Write the effective profile table next to the run summary.
    pub dump_profiles_after_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            freshness_window: chrono::Duration::hours(24),
            run_timeout: std::time::Duration::from_secs(5 * 60),
            policy: ImportPolicy::default(),
            dump_profiles_after_run: false,
        }
    }
}

/// Machine-readable outcome of one pass: every configured vendor, exactly
/// one result each. Rewritten wholesale each run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub results: BTreeMap<String, RunResult>,
}

impl RunSummary {
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Orchestrates one run across all vendors. Cheap to clone; every
/// collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct Synchroniser {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    parser: Arc<dyn CatalogParser>,
    importer: Arc<dyn Importer>,
    layout: DirLayout,
    options: SyncOptions,
}

impl Synchroniser {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        parser: Arc<dyn CatalogParser>,
        importer: Arc<dyn Importer>,
        layout: DirLayout,
        options: SyncOptions,
    ) -> Self {
        Synchroniser {
            fetcher,
            extractor,
            parser,
            importer,
            layout,
            options,
        }
    }

    /// One full pass. Mutates the profiles in place (sync state, run
    /// results), performs end-of-run rotation and persistence, and returns
    /// the summary. Re-entrant: call again for the next scheduled pass.
    pub async fn run_once(&self, profiles: &mut Vec<VendorProfile>) -> RunSummary {
        info!(vendors = profiles.len(), "starting synchronisation pass");
        for p in profiles.iter_mut() {
            p.reset_for_run();
        }

        // Each task owns exactly one profile slot; the driver reads them all
        // back after the pass, including slots whose task was abandoned at
        // the timeout.
        let slots: Vec<Arc<Mutex<VendorProfile>>> = profiles
            .drain(..)
            .map(|p| Arc::new(Mutex::new(p)))
            .collect();

        let mut handles = Vec::new();
        for slot in &slots {
            let (name, eligible) = {
                let p = slot.lock().expect("vendor slot poisoned");
                (p.name.clone(), p.eligible)
            };
            if !eligible {
                info!(vendor = %name, "not eligible, skipped");
                continue;
            }
            info!(vendor = %name, "eligible, starting vendor task");
            let this = self.clone();
            let slot = Arc::clone(slot);
            handles.push(tokio::spawn(async move {
                let snapshot = slot.lock().expect("vendor slot poisoned").clone();
                let updated = this.run_vendor(snapshot).await;
                *slot.lock().expect("vendor slot poisoned") = updated;
            }));
        }

        match tokio::time::timeout(self.options.run_timeout, futures::future::join_all(handles))
            .await
        {
            Ok(joined) => {
                for result in joined {
                    if let Err(e) = result {
                        error!(error = ?e, "vendor task panicked");
                    }
                }
                info!("run finished in time");
            }
            Err(_) => {
                error!(
                    timeout = ?self.options.run_timeout,
                    "run timeout elapsed, in-flight vendor tasks abandoned"
                );
            }
        }

        let mut summary = RunSummary::default();
        let mut collected = Vec::with_capacity(slots.len());
        for slot in slots {
            let p = slot.lock().expect("vendor slot poisoned").clone();
            let result = if !p.eligible {
                RunResult::Skipped
            } else {
                p.run_result.unwrap_or_else(|| {
                    error!(vendor = %p.name, "vendor task reached no terminal state before timeout");
                    RunResult::AllFailed
                })
            };
            summary.results.insert(p.name.clone(), result);
            collected.push(p);
        }
        *profiles = collected;

        self.finish_run(profiles, &summary).await;
        summary
    }

    /// End-of-run bookkeeping. Failures here are driver-level defects worth
    /// shouting about, but they never abort the pass that already ran.
    async fn finish_run(&self, profiles: &[VendorProfile], summary: &RunSummary) {
        if let Err(e) = self.write_flag_file(profiles) {
            error!(error = %e, "failed to write changed-vendors flag file");
        }
        if let Err(e) = summary.write(&self.layout.summary_file()) {
            error!(error = %e, "failed to write run summary");
        }
        if let Err(e) = self.layout.rotate().await {
            error!(error = %e, "failed to rotate snapshot directories");
        }
        let baseline = vendor::snapshot_baseline(profiles);
        if let Err(e) = vendor::save_baseline(&self.layout.baseline_file(), &baseline) {
            error!(error = %e, "failed to persist change-detection baseline");
        }
        if self.options.dump_profiles_after_run {
            let table = vendor::render_profile_table(profiles);
            if let Err(e) = std::fs::write(self.layout.profile_dump_file(), table) {
                error!(error = %e, "failed to dump effective vendor profiles");
            }
        }
    }

    fn write_flag_file(&self, profiles: &[VendorProfile]) -> std::io::Result<()> {
        let mut content = String::new();
        for p in profiles {
            if p.eligible && p.has_change && p.run_result == Some(RunResult::Imported) {
                content.push_str(&p.name);
                content.push('\n');
            }
        }
        std::fs::write(self.layout.flag_file(), content)
    }

    async fn run_vendor(&self, mut vp: VendorProfile) -> VendorProfile {
        let result = self.vendor_pipeline(&mut vp).await;
        match result {
            RunResult::Imported | RunResult::NoChange => {
                info!(vendor = %vp.name, result = ?result, "vendor run complete")
            }
            other => error!(vendor = %vp.name, result = ?other, "vendor run failed"),
        }
        vp.run_result = Some(result);
        vp
    }

    /// The per-vendor state machine. Strictly sequential stages; the first
    /// terminal condition wins.
    async fn vendor_pipeline(&self, vp: &mut VendorProfile) -> RunResult {
        // Fresh snapshot: probe the advertised size before paying for a
        // download. A failed probe is terminal; the next scheduled run
        // retries.
        if let Some(last) = vp.last_sync {
            if Utc::now() - last < self.options.freshness_window {
                match self.fetcher.probe_size(vp).await {
                    Ok(size) => {
                        if vp.last_content_length == Some(size) {
                            info!(vendor = %vp.name, size, "content length unchanged, no download");
                            vp.new_content_length = None;
                            return RunResult::NoChange;
                        }
                        vp.new_content_length = Some(size);
                    }
                    Err(e) => {
                        error!(vendor = %vp.name, error = %e, "failed to probe catalog size");
                        return RunResult::FailedAtCheck;
                    }
                }
            }
        }

        let new_archive = match self.fetcher.download(vp, &self.layout.new_dir()).await {
            Ok(path) => {
                vp.last_sync = Some(Utc::now());
                path
            }
            Err(e) => {
                error!(vendor = %vp.name, error = %e, "failed to download catalog");
                return RunResult::FailedAtDownload;
            }
        };

        match vp.new_content_length.take() {
            Some(len) => vp.last_content_length = Some(len),
            None => {
                if let Ok(meta) = tokio::fs::metadata(&new_archive).await {
                    vp.last_content_length = Some(meta.len());
                }
            }
        }

        let old_archive = self.layout.old_archive(&vp.artifact_file_name);
        match compare::files_identical(&old_archive, &new_archive).await {
            Ok(true) => {
                info!(vendor = %vp.name, "catalog content unchanged, no action");
                return RunResult::NoChange;
            }
            Ok(false) => {}
            Err(e) => {
                error!(vendor = %vp.name, error = %e, "failed to compare catalog snapshots");
                return RunResult::FailedAtCompare;
            }
        }
        vp.has_change = true;

        let document = match self
            .extractor
            .extract_document(&new_archive, &self.layout.extract_dir())
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(vendor = %vp.name, error = %e, "failed to extract catalog archive");
                return RunResult::FailedAtExtract;
            }
        };

        let result = self.import_stage(vp, &document).await;

        // The extracted document is a temporary whatever happened above.
        match self.extractor.remove_document(&document).await {
            Ok(()) => debug!(vendor = %vp.name, "removed temporary descriptor document"),
            Err(e) => {
                warn!(vendor = %vp.name, error = %e, "failed to remove temporary descriptor document")
            }
        }
        result
    }

    async fn import_stage(&self, vp: &VendorProfile, document: &Path) -> RunResult {
        let descriptors = match self.parser.parse(document).await {
            Ok(descriptors) if descriptors.is_empty() => {
                error!(vendor = %vp.name, "catalog parsed to an empty package set");
                return RunResult::FailedAtParse;
            }
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!(vendor = %vp.name, error = %e, "failed to parse descriptor document");
                return RunResult::FailedAtParse;
            }
        };

        match self
            .importer
            .import_from_catalog(&vp.name, &descriptors, &self.options.policy)
            .await
        {
            Ok(stats) => {
                info!(vendor = %vp.name, %stats, "import pass finished");
                classify_import(stats)
            }
            Err(e) => {
                // A structural defect in the snapshot, discovered while
                // building the dependency graph.
                error!(vendor = %vp.name, error = %e, "catalog dependency graph is unusable");
                RunResult::FailedAtParse
            }
        }
    }
}
