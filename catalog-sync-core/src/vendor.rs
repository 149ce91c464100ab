//! Vendor profiles: which catalogs exist, where they live, and the per-run
//! mutable state the change detector needs across runs.
//!
//! Profiles are seeded from built-in defaults, merged with override entries
//! as a pure function (no global mutable vendor list), mutated only by their
//! own vendor task during a run, and reduced to a persisted baseline at the
//! end of the run so the next run can detect changes cheaply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::model::RunResult;

/// One vendor catalog and its sync state.
#[derive(Debug, Clone)]
pub struct VendorProfile {
    /// Unique key across the profile set.
    pub name: String,
    pub download_url: String,
    /// File name of the catalog archive, derived from the URL.
    pub artifact_file_name: String,
    /// Participates in this run.
    pub eligible: bool,
    /// Set once the downloaded content is known to differ from the snapshot.
    pub has_change: bool,
    /// Content length recorded at the last successful sync.
    pub last_content_length: Option<u64>,
    /// Content length reported by this run's size probe.
    pub new_content_length: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
    /// Terminal outcome of the current run; `None` until the vendor's
    /// pipeline reaches a terminal state.
    pub run_result: Option<RunResult>,
}

impl VendorProfile {
    pub fn new(name: impl Into<String>, url: impl Into<String>, eligible: bool) -> Self {
        let url = url.into();
        let artifact_file_name = url.rsplit('/').next().unwrap_or_default().to_string();
        VendorProfile {
            name: name.into(),
            download_url: url,
            artifact_file_name,
            eligible,
            has_change: false,
            last_content_length: None,
            new_content_length: None,
            last_sync: None,
            run_result: None,
        }
    }

    /// Apply an override entry in place, keeping accumulated sync state.
    pub fn update(&mut self, url: &str, eligible: bool) {
        self.download_url = url.to_string();
        self.artifact_file_name = url.rsplit('/').next().unwrap_or_default().to_string();
        self.eligible = eligible;
    }

    /// Reset the per-run fields before a fresh pass.
    pub fn reset_for_run(&mut self) {
        self.has_change = false;
        self.run_result = None;
    }
}

/// Built-in vendor set, the baseline before any override is applied.
pub fn default_profiles() -> Vec<VendorProfile> {
    vec![
        VendorProfile::new(
            "Dell",
            "https://downloads.dell.com/Catalog/DellSDPCatalogPC.cab",
            true,
        ),
        VendorProfile::new(
            "Fujitsu",
            "https://support.ts.fujitsu.com/GFSMS/globalflash/FJSVUMCatalogForSCCM.cab",
            false,
        ),
        VendorProfile::new(
            "HP",
            "https://hpia.hpcloud.hp.com/downloads/sccmcatalog/HpCatalogForSms.latest.cab",
            false,
        ),
        VendorProfile::new(
            "Lenovo",
            "https://download.lenovo.com/luc/v2/LenovoUpdatesCatalog2v2.cab",
            false,
        ),
        VendorProfile::new(
            "DellServer",
            "https://downloads.dell.com/Catalog/DellSDPCatalog.cab",
            false,
        ),
        VendorProfile::new(
            "HPEnterprise",
            "https://downloads.hpe.com/pub/softlib/puc/hppuc.cab",
            false,
        ),
    ]
}

/// One override record, usually deserialized from the service config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub name: String,
    pub url: String,
    pub eligible: bool,
}

/// How override entries combine with the built-in profile set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideMode {
    /// Update matching profiles, append unknown names.
    #[default]
    Additive,
    /// Discard the built-in set; overrides become the whole profile list.
    Replace,
}

/// Merge override entries into a base profile list. Pure: the inputs are not
/// mutated, the merged list is the only output.
pub fn merge_overrides(
    base: &[VendorProfile],
    overrides: &[OverrideEntry],
    mode: OverrideMode,
) -> Vec<VendorProfile> {
    let mut merged: Vec<VendorProfile> = match mode {
        OverrideMode::Additive => base.to_vec(),
        OverrideMode::Replace => {
            if !overrides.is_empty() {
                warn!("vendor override in replace mode, built-in profiles discarded");
            }
            Vec::new()
        }
    };

    for entry in overrides {
        match merged
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&entry.name))
        {
            Some(existing) => {
                debug!(vendor = %entry.name, "override updates existing vendor profile");
                existing.update(&entry.url, entry.eligible);
            }
            None => {
                info!(vendor = %entry.name, "override adds new vendor profile");
                merged.push(VendorProfile::new(&entry.name, &entry.url, entry.eligible));
            }
        }
    }
    merged
}

/// Durable change-detection state for one vendor, persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub last_content_length: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Persisted mapping vendor name -> baseline, rewritten at the end of a run.
pub type Baseline = BTreeMap<String, BaselineEntry>;

pub fn snapshot_baseline(profiles: &[VendorProfile]) -> Baseline {
    profiles
        .iter()
        .map(|p| {
            (
                p.name.clone(),
                BaselineEntry {
                    last_content_length: p.last_content_length,
                    last_sync: p.last_sync,
                },
            )
        })
        .collect()
}

pub fn apply_baseline(profiles: &mut [VendorProfile], baseline: &Baseline) {
    for profile in profiles.iter_mut() {
        if let Some(entry) = baseline.get(&profile.name) {
            profile.last_content_length = entry.last_content_length;
            profile.last_sync = entry.last_sync;
        }
    }
}

pub fn save_baseline(path: &Path, baseline: &Baseline) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(baseline)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

/// Missing baseline file is first-run semantics, not an error.
pub fn load_baseline(path: &Path) -> std::io::Result<Baseline> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Baseline::new()),
        Err(e) => Err(e),
    }
}

/// Fixed-width table of the effective profile set, for the log and for the
/// post-run profile dump.
pub fn render_profile_table(profiles: &[VendorProfile]) -> String {
    let url_width = profiles
        .iter()
        .map(|p| p.download_url.len())
        .max()
        .unwrap_or(0)
        + 3;
    let mut out = String::new();
    out.push_str(&format!(
        "{:<15}  {:<url_width$}  {:<8}\n",
        "Name", "URL", "Eligible"
    ));
    for p in profiles {
        out.push_str(&format!(
            "{:<15}  {:<url_width$}  {:<8}\n",
            p.name, p.download_url, p.eligible
        ));
    }
    out
}
