//! Two-stage install pipeline.
//!
//! ```text
//! groups ─▶ download stage (N workers) ─▶ queue ─▶ extract stage (M workers)
//!                 │                                       │
//!                 └────────────── broken ◀────────────────┘
//!                                   │
//!                          serial repair pass
//! ```
//!
//! A group's download always finishes before any of its members is
//! extracted. Failures never abort the run: they are collected, retried
//! once after both stages drain, and whatever still fails is reported.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::meta::{write_meta, MetaConfig};
use super::normalize::normalize;
use super::progress::{unit_reporter, PipelineProgress, ProgressCallback, ProgressEvent, UnitPhase, UnitReporter};
use crate::archive::Extractor;
use crate::catalog::{AddonRecord, ArchiveGroup, SourceKind};
use crate::downloaders::{DownloadOutcome, Strategies};
use crate::error::{Error, Result};
use crate::paths;

/// The two per-group operations the pipeline schedules.
#[async_trait]
pub trait Stages: Send + Sync {
    /// Fetch the group's shared archive.
    async fn download(
        &self,
        group: &ArchiveGroup,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome>;

    /// Install one member from the fetched archive at `archive_path`.
    async fn install(
        &self,
        record: &AddonRecord,
        archive_path: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Real stages: source strategies, archive extraction and normalization.
pub struct AddonStages {
    strategies: Strategies,
    extractor: Extractor,
    mods_dir: PathBuf,
}

impl AddonStages {
    pub fn new(strategies: Strategies, extractor: Extractor, mods_dir: PathBuf) -> Self {
        Self {
            strategies,
            extractor,
            mods_dir,
        }
    }

    /// Install folder for `record`.
    pub fn mod_dir(&self, record: &AddonRecord) -> PathBuf {
        self.mods_dir.join(paths::sanitize_component(&record.folder_name()))
    }
}

async fn blocking<T, F>(dir: &Path, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::normalization(dir, e))?
}

#[async_trait]
impl Stages for AddonStages {
    async fn download(
        &self,
        group: &ArchiveGroup,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        self.strategies
            .fetch(group.representative(), &group.archive_path, report, cancel)
            .await
    }

    async fn install(
        &self,
        record: &AddonRecord,
        archive_path: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dest = self.mod_dir(record);

        if tokio::fs::try_exists(&dest).await? {
            debug!("Replacing existing {}", dest.display());
            tokio::fs::remove_dir_all(&dest).await?;
        }

        match record.kind {
            SourceKind::RepoClone => {
                let (src, dst) = (archive_path.to_path_buf(), dest.clone());
                blocking(&dest, move || {
                    paths::copy_tree_without_vcs(&src, &dst).map_err(|e| Error::extraction(&src, e))
                })
                .await?;
                report(UnitPhase::Extract, 100.0);
            }
            SourceKind::FileHost | SourceKind::DirectArchive => {
                let on_percent = |percent: f64| report(UnitPhase::Extract, percent);
                self.extractor
                    .extract(archive_path, &dest, &on_percent, cancel)
                    .await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let instructions = record.instructions.clone();
        let meta = MetaConfig::for_record(record);
        let dir = dest.clone();
        blocking(&dest, move || {
            normalize(&dir, &instructions)?;
            write_meta(&meta, &dir).map_err(|e| Error::normalization(&dir, e))
        })
        .await
    }
}

/// Lifecycle of one archive group within a run.
///
/// ```text
/// Pending -> Downloading -> Downloaded -> Extracting -> Done
///                 |                           |
///                 v                           v
///           DownloadFailed              ExtractFailed
/// ```
///
/// The repair pass moves a failed group back to `Downloading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Pending,
    Downloading,
    Downloaded,
    DownloadFailed,
    Extracting,
    Done,
    ExtractFailed,
}

impl GroupState {
    /// Whether a group in this state may move to `next`.
    pub fn can_advance_to(self, next: GroupState) -> bool {
        use GroupState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Downloaded | DownloadFailed)
                | (Downloaded, Extracting)
                | (Extracting, Done | ExtractFailed)
                | (DownloadFailed | ExtractFailed, Downloading)
        )
    }
}

/// Which stage a group failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Download,
    Extract,
}

/// A group that still failed after the repair pass.
#[derive(Debug)]
pub struct GroupFailure {
    /// Archive file name of the group
    pub id: String,
    pub stage: FailedStage,
    pub error: Error,
}

/// Summary of a finished run.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub total_groups: usize,
    /// Groups fully installed
    pub completed: usize,
    /// Archives written during this run
    pub fetched: usize,
    /// Archives already present with a matching hash
    pub unchanged: usize,
    /// Groups broken after the repair pass
    pub failures: Vec<GroupFailure>,
    /// Last state reached by each group, keyed by group id
    pub states: BTreeMap<String, GroupState>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every group installed
    Completed(InstallReport),
    /// The run finished but some groups are still broken
    PartialFailure(InstallReport),
    /// The cancellation token fired; on-disk state is left as-is
    Cancelled,
}

struct BrokenGroup {
    group: ArchiveGroup,
    stage: FailedStage,
    error: Error,
}

/// Per-run shared state. Created at the start of `run`, dropped at its end.
struct RunContext {
    progress: PipelineProgress,
    broken: Mutex<Vec<BrokenGroup>>,
    states: Mutex<HashMap<String, GroupState>>,
    fetched: AtomicUsize,
    unchanged: AtomicUsize,
    callback: Option<ProgressCallback>,
}

impl RunContext {
    fn new(groups: &[ArchiveGroup], callback: Option<ProgressCallback>) -> Self {
        let states = groups
            .iter()
            .map(|g| (g.id().to_string(), GroupState::Pending))
            .collect();
        Self {
            progress: PipelineProgress::new(groups.len()),
            broken: Mutex::new(Vec::new()),
            states: Mutex::new(states),
            fetched: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
            callback,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Status {
            message: message.into(),
        });
    }

    fn record_outcome(&self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Fetched => self.fetched.fetch_add(1, Ordering::Relaxed),
            DownloadOutcome::Unchanged => self.unchanged.fetch_add(1, Ordering::Relaxed),
            DownloadOutcome::Failed => 0,
        };
    }

    fn advance(&self, group: &ArchiveGroup, next: GroupState) {
        let mut states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = states
            .entry(group.id().to_string())
            .or_insert(GroupState::Pending);
        debug_assert!(
            state.can_advance_to(next),
            "{}: {:?} -> {:?}",
            group.id(),
            state,
            next
        );
        *state = next;
    }

    fn states(&self) -> BTreeMap<String, GroupState> {
        let states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.iter().map(|(id, state)| (id.clone(), *state)).collect()
    }

    fn complete_one(&self) {
        let completed = self.progress.complete_one();
        self.emit(ProgressEvent::Overall {
            completed,
            total: self.progress.total(),
        });
    }

    fn mark_broken(&self, group: ArchiveGroup, stage: FailedStage, error: Error) {
        warn!("{:?} failed for {}: {}", stage, group.id(), error);
        match self.broken.lock() {
            Ok(mut broken) => broken.push(BrokenGroup { group, stage, error }),
            Err(poisoned) => poisoned.into_inner().push(BrokenGroup { group, stage, error }),
        }
    }

    fn take_broken(&self) -> Vec<BrokenGroup> {
        let mut broken = match self.broken.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut taken = std::mem::take(&mut *broken);
        taken.sort_by_key(|b| b.group.first_index());
        taken
    }
}

/// Bounded two-stage scheduler over `Stages`.
pub struct Pipeline {
    stages: Arc<dyn Stages>,
    download_workers: usize,
    extract_workers: usize,
    callback: Option<ProgressCallback>,
}

impl Pipeline {
    pub fn new(stages: Arc<dyn Stages>, download_workers: usize, extract_workers: usize) -> Self {
        Self {
            stages,
            download_workers: download_workers.max(1),
            extract_workers: extract_workers.max(1),
            callback: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Run every group to completion, then retry the broken ones once.
    pub async fn run(&self, groups: Vec<ArchiveGroup>, cancel: &CancellationToken) -> RunOutcome {
        let ctx = RunContext::new(&groups, self.callback.clone());
        ctx.emit(ProgressEvent::Overall {
            completed: 0,
            total: groups.len(),
        });
        info!(
            "Installing {} archive groups ({} download / {} extract workers)",
            groups.len(),
            self.download_workers,
            self.extract_workers
        );

        let (tx, rx) = mpsc::channel::<ArchiveGroup>(self.download_workers * 2);

        let download_stage = async {
            stream::iter(groups)
                .map(|group| self.download_group(&ctx, group, cancel))
                .buffer_unordered(self.download_workers)
                .for_each(|ready| {
                    let tx = tx.clone();
                    async move {
                        if let Some(group) = ready {
                            // The receiver lives until this stage finishes.
                            let _ = tx.send(group).await;
                        }
                    }
                })
                .await;
            drop(tx);
        };

        let extract_stage = async {
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|group| (group, rx)) })
                .map(|group| self.extract_group(&ctx, group, cancel))
                .buffer_unordered(self.extract_workers)
                .for_each(|_| async {})
                .await;
        };

        tokio::join!(download_stage, extract_stage);

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let broken = ctx.take_broken();
        let mut failures = Vec::new();
        if !broken.is_empty() {
            ctx.status(format!("Retrying {} failed archives", broken.len()));
            info!("Repair pass over {} groups", broken.len());
        }
        for BrokenGroup { group, .. } in broken {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if let Some(failure) = self.repair(&ctx, group, cancel).await {
                if failure.error.is_cancelled() {
                    return RunOutcome::Cancelled;
                }
                error!("{} still failing: {}", failure.id, failure.error);
                failures.push(failure);
            }
        }

        let report = InstallReport {
            total_groups: ctx.progress.total(),
            completed: ctx.progress.completed(),
            fetched: ctx.fetched.load(Ordering::Relaxed),
            unchanged: ctx.unchanged.load(Ordering::Relaxed),
            failures,
            states: ctx.states(),
        };

        if report.is_success() {
            RunOutcome::Completed(report)
        } else {
            RunOutcome::PartialFailure(report)
        }
    }

    async fn fetch(&self, ctx: &RunContext, group: &ArchiveGroup, cancel: &CancellationToken) -> Result<()> {
        let report = unit_reporter(ctx.callback.as_ref(), group.id());
        let outcome = self.stages.download(group, &report, cancel).await?;
        ctx.record_outcome(outcome);
        if !outcome.is_ready() {
            return Err(Error::transport(&group.representative().url, "download failed"));
        }
        Ok(())
    }

    /// Install every member; returns the last member error, if any.
    async fn install_members(
        &self,
        ctx: &RunContext,
        group: &ArchiveGroup,
        cancel: &CancellationToken,
    ) -> Option<Error> {
        let mut last_error = None;
        for member in group.members() {
            if cancel.is_cancelled() {
                return Some(Error::Cancelled);
            }
            let report = unit_reporter(ctx.callback.as_ref(), &member.folder_name());
            match self
                .stages
                .install(member, &group.archive_path, &report, cancel)
                .await
            {
                Ok(()) => debug!("Installed {}", member.folder_name()),
                Err(Error::Cancelled) => return Some(Error::Cancelled),
                Err(e) => {
                    warn!("Install of {} failed: {}", member.folder_name(), e);
                    last_error = Some(e);
                }
            }
        }
        last_error
    }

    async fn download_group(
        &self,
        ctx: &RunContext,
        group: ArchiveGroup,
        cancel: &CancellationToken,
    ) -> Option<ArchiveGroup> {
        if cancel.is_cancelled() {
            return None;
        }
        ctx.advance(&group, GroupState::Downloading);
        match self.fetch(ctx, &group, cancel).await {
            Ok(()) => {
                ctx.advance(&group, GroupState::Downloaded);
                Some(group)
            }
            Err(Error::Cancelled) => None,
            Err(e) => {
                ctx.advance(&group, GroupState::DownloadFailed);
                ctx.mark_broken(group, FailedStage::Download, e);
                None
            }
        }
    }

    async fn extract_group(&self, ctx: &RunContext, group: ArchiveGroup, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        ctx.advance(&group, GroupState::Extracting);
        match self.install_members(ctx, &group, cancel).await {
            None => {
                ctx.advance(&group, GroupState::Done);
                ctx.complete_one();
            }
            Some(Error::Cancelled) => {}
            Some(e) => {
                ctx.advance(&group, GroupState::ExtractFailed);
                ctx.mark_broken(group, FailedStage::Extract, e);
            }
        }
    }

    /// Serial retry of one broken group: download again, then install all members.
    async fn repair(
        &self,
        ctx: &RunContext,
        group: ArchiveGroup,
        cancel: &CancellationToken,
    ) -> Option<GroupFailure> {
        let fail = |stage, error| GroupFailure {
            id: group.id().to_string(),
            stage,
            error,
        };

        ctx.advance(&group, GroupState::Downloading);
        if let Err(e) = self.fetch(ctx, &group, cancel).await {
            ctx.advance(&group, GroupState::DownloadFailed);
            return Some(fail(FailedStage::Download, e));
        }
        ctx.advance(&group, GroupState::Downloaded);
        ctx.advance(&group, GroupState::Extracting);
        match self.install_members(ctx, &group, cancel).await {
            None => {
                ctx.advance(&group, GroupState::Done);
                ctx.complete_one();
                None
            }
            Some(e) => {
                ctx.advance(&group, GroupState::ExtractFailed);
                Some(fail(FailedStage::Extract, e))
            }
        }
    }
}
