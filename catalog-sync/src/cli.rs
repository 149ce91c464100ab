//! CLI surface: command parsing, collaborator wiring and the scheduler loop.
//!
//! All pipeline logic lives in `catalog-sync-core`; this module only maps
//! config to core types, picks the importer backend and drives repeated
//! passes. The config file is re-read before every pass so interval and
//! vendor changes take effect without a restart.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use catalog_sync_core::extract::CabinetExtractor;
use catalog_sync_core::fetch::HttpFetcher;
use catalog_sync_core::importer::{DefaultImporter, RepoImporter};
use catalog_sync_core::layout::DirLayout;
use catalog_sync_core::model::ImportPolicy;
use catalog_sync_core::parse::SdpCatalogParser;
use catalog_sync_core::sync::{SyncOptions, Synchroniser};
use catalog_sync_core::vendor::{self, default_profiles, merge_overrides};

use crate::load_config::{load_config, Config};
use crate::repo::{DirRepository, FileVisibilityStore};

/// CLI for catalog-sync: synchronise vendor driver catalogs into an update
/// repository.
#[derive(Parser)]
#[clap(
    name = "catalog-sync",
    version,
    about = "Download vendor driver catalogs and publish their packages in dependency order"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run synchronisation passes on the configured interval
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Run exactly one pass and exit
        #[clap(long)]
        once: bool,
        /// Validate catalogs and plan the publish order without touching the
        /// repository
        #[clap(long)]
        dry_run: bool,
    },
}

/// Async CLI entrypoint, extracted for integration tests and `main()`.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync {
            config,
            once,
            dry_run,
        } => {
            loop {
                let cfg = load_config(&config)?;
                run_pass(&cfg, dry_run).await?;
                if once {
                    return Ok(());
                }
                let interval = std::time::Duration::from_secs(cfg.run_interval_minutes * 60);
                info!(minutes = cfg.run_interval_minutes, "sleeping until next pass");
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupt received, stopping scheduler");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn run_pass(cfg: &Config, dry_run: bool) -> Result<()> {
    let layout =
        DirLayout::create(&cfg.working_dir).context("failed to create working directory layout")?;

    let mut profiles = merge_overrides(&default_profiles(), &cfg.vendors, cfg.override_mode);
    let baseline = vendor::load_baseline(&layout.baseline_file())
        .context("failed to load change-detection baseline")?;
    vendor::apply_baseline(&mut profiles, &baseline);

    let fetcher = HttpFetcher::new(cfg.proxy_url.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to construct HTTP fetcher: {e}"))?;

    let importer: Arc<dyn catalog_sync_core::contract::Importer> = if dry_run {
        info!("dry-run mode, repository will not be modified");
        Arc::new(DefaultImporter)
    } else {
        let repo_dir = cfg
            .repository_dir
            .as_ref()
            .context("repository_dir is required unless --dry-run is given")?;
        let repository = DirRepository::new(repo_dir)
            .context("failed to open repository directory")?;
        let visibility = if cfg.update_visibility_store {
            Some(Arc::new(FileVisibilityStore::new(
                cfg.working_dir.join("visible-packages.txt"),
            )) as Arc<dyn catalog_sync_core::contract::VisibilityStore>)
        } else {
            None
        };
        Arc::new(RepoImporter::new(
            Arc::new(repository),
            visibility,
            layout.tmp_artifact_dir(),
        ))
    };

    let options = SyncOptions {
        freshness_window: chrono::Duration::hours(cfg.freshness_window_hours),
        run_timeout: std::time::Duration::from_secs(cfg.run_timeout_minutes * 60),
        policy: ImportPolicy {
            batch_size: cfg.batch_size,
            update_visibility_store: cfg.update_visibility_store,
            synthesize_detectoid_payload: cfg.synthesize_detectoid_payload,
        },
        dump_profiles_after_run: cfg.dump_profiles_after_run,
    };

    let synchroniser = Synchroniser::new(
        Arc::new(fetcher),
        Arc::new(CabinetExtractor::new()),
        Arc::new(SdpCatalogParser),
        importer,
        layout,
        options,
    );

    let summary = synchroniser.run_once(&mut profiles).await;
    for (vendor, result) in &summary.results {
        info!(vendor = %vendor, result = ?result, "pass outcome");
    }
    if summary.results.is_empty() {
        warn!("no vendor profiles configured, nothing to do");
    }
    Ok(())
}
