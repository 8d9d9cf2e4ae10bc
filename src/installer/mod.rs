//! Installation orchestrator
//!
//! Coordinates one install/update run:
//! 1. Plan: read the catalog, classify rows, group by archive
//! 2. Download: fetch each group's archive (file host, direct, git)
//! 3. Extract: unpack per member, normalize layout, write meta.ini
//! 4. Repair: retry broken groups once, serially

pub mod config;
pub mod meta;
pub mod normalize;
pub mod pipeline;
pub mod progress;

pub use config::{ConfigError, InstallConfig};
pub use pipeline::{
    AddonStages, FailedStage, GroupFailure, GroupState, InstallReport, Pipeline, RunOutcome,
    Stages,
};
pub use progress::{ProgressCallback, ProgressEvent, UnitPhase};

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::Extractor;
use crate::catalog::{self, ArchiveGroup};
use crate::downloaders::Strategies;

/// Main installer entry point
pub struct Installer {
    config: InstallConfig,
    progress_callback: Option<ProgressCallback>,
}

impl Installer {
    /// Create a new installer with the given configuration
    pub fn new(config: InstallConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress_callback: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// Parse catalog text into archive groups under this install's `downloads/`.
    pub fn plan_catalog(&self, text: &str) -> Result<Vec<ArchiveGroup>> {
        let entries = catalog::parse_catalog(text)?;
        let records = catalog::addons(entries);
        Ok(catalog::group(records, &self.config.downloads_dir()))
    }

    /// Read and plan the configured catalog file.
    pub fn plan(&self) -> Result<Vec<ArchiveGroup>> {
        let text = std::fs::read_to_string(&self.config.catalog_path)
            .with_context(|| format!("Failed to read {}", self.config.catalog_path.display()))?;
        self.plan_catalog(&text)
    }

    /// Install everything in the configured catalog.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let groups = self.plan()?;
        self.run_groups(groups, cancel).await
    }

    /// Install already planned groups.
    pub async fn run_groups(
        &self,
        groups: Vec<ArchiveGroup>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let started = Instant::now();

        for dir in [self.config.downloads_dir(), self.config.mods_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let strategies = Strategies::from_config(&self.config)?;
        let extractor = Extractor::new(self.config.platform, self.config.seven_zip_bin.as_deref());
        let stages = AddonStages::new(strategies, extractor, self.config.mods_dir());

        let mut pipeline = Pipeline::new(
            Arc::new(stages),
            self.config.download_workers,
            self.config.extract_workers,
        );
        if let Some(callback) = &self.progress_callback {
            pipeline = pipeline.with_progress(Arc::clone(callback));
        }

        let outcome = pipeline.run(groups, cancel).await;
        info!("Run finished in {:.1}s", started.elapsed().as_secs_f64());
        Ok(outcome)
    }
}
