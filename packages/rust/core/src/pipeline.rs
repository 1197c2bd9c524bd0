//! The three-stage batch pipeline: fetch → normalize → decompose.
//!
//! Stages run strictly in order and each drains completely before the next
//! starts. Within the fetch and normalize stages items are processed by a
//! [`WorkPool`]; an item whose output artifact already exists is skipped.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use docforest_fetch::BlobStore;
use docforest_markup::{NormalizeOptions, normalize_document};
use docforest_relations::{RelationOutcome, export_relation};
use docforest_shared::{
    AssetId, DocForestError, ManifestEntry, PipelineConfig, RawDocument, Relation, Result,
};
use docforest_storage::{ArtifactStore, load_manifest};

use crate::pool::{FailurePolicy, Handled, ItemReport, PhaseReport, WorkPool};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Fetch,
    Normalize,
    Decompose,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Normalize, Stage::Decompose];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Decompose => "decompose",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = DocForestError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| DocForestError::config(format!("unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage begins, with the number of items it will visit.
    fn stage_started(&self, stage: Stage, total: usize);
    /// Called as each fetch or normalize item finishes.
    fn item_done(&self, stage: Stage, report: &ItemReport);
    /// Called as each relation is exported or skipped.
    fn relation_done(&self, outcome: &RelationOutcome);
    /// Called when a stage has drained.
    fn stage_finished(&self, stage: Stage);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage, _total: usize) {}
    fn item_done(&self, _stage: Stage, _report: &ItemReport) {}
    fn relation_done(&self, _outcome: &RelationOutcome) {}
    fn stage_finished(&self, _stage: Stage) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of [`Pipeline::run`]. Stages that were not requested stay `None`/empty.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub fetch: Option<PhaseReport>,
    pub normalize: Option<PhaseReport>,
    pub relations: Vec<RelationOutcome>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A configured pipeline over one artifact store and one blob source.
pub struct Pipeline {
    config: PipelineConfig,
    store: ArtifactStore,
    blobs: Arc<dyn BlobStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: ArtifactStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            config,
            store,
            blobs,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run `stages` in pipeline order, each to completion.
    #[instrument(skip_all, fields(artifacts = %self.store.root().display()))]
    pub async fn run(
        &self,
        stages: &[Stage],
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineReport> {
        let started = Instant::now();
        let mut report = PipelineReport::default();

        for stage in Stage::ALL {
            if !stages.contains(&stage) {
                continue;
            }
            match stage {
                Stage::Fetch => report.fetch = Some(self.fetch(progress).await?),
                Stage::Normalize => report.normalize = Some(self.normalize(progress).await?),
                Stage::Decompose => report.relations = self.decompose(progress).await?,
            }
        }

        report.elapsed = started.elapsed();
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(report)
    }

    /// Fetch every manifest entry without a raw document. Any fetch failure
    /// aborts the stage.
    #[instrument(skip_all, fields(manifest = %self.config.manifest.display()))]
    pub async fn fetch(&self, progress: &dyn ProgressReporter) -> Result<PhaseReport> {
        let entries = load_manifest(&self.config.manifest)?;
        progress.stage_started(Stage::Fetch, entries.len());

        let store = self.store.clone();
        let blobs = self.blobs.clone();
        let handler = move |entry: ManifestEntry| {
            let store = store.clone();
            let blobs = blobs.clone();
            async move { fetch_one(&store, blobs.as_ref(), entry).await }
        };

        let pool = WorkPool::new(self.config.fetch_workers, FailurePolicy::Abort);
        let result = pool
            .run(Stage::Fetch.name(), entries, handler, &mut |r| {
                progress.item_done(Stage::Fetch, r)
            })
            .await;
        progress.stage_finished(Stage::Fetch);
        result
    }

    /// Normalize every raw document without a tree. Failures are recorded per
    /// document and never stop the stage.
    #[instrument(skip_all)]
    pub async fn normalize(&self, progress: &dyn ProgressReporter) -> Result<PhaseReport> {
        let assets = self.store.list_raw()?;
        progress.stage_started(Stage::Normalize, assets.len());

        let store = self.store.clone();
        let options = NormalizeOptions {
            node_ids: self.config.node_ids,
            html5_fallback: self.config.html5_fallback,
        };
        let handler = move |asset_id: AssetId| {
            let store = store.clone();
            async move {
                tokio::task::spawn_blocking(move || normalize_one(&store, &asset_id, options))
                    .await
                    .map_err(|e| DocForestError::Storage(format!("normalize task failed: {e}")))?
            }
        };

        let pool = WorkPool::new(self.config.normalize_workers, FailurePolicy::Isolate);
        let result = pool
            .run(Stage::Normalize.name(), assets, handler, &mut |r| {
                progress.item_done(Stage::Normalize, r)
            })
            .await;
        progress.stage_finished(Stage::Normalize);
        result
    }

    /// Export the five relations, skipping any that already exist.
    #[instrument(skip_all)]
    pub async fn decompose(&self, progress: &dyn ProgressReporter) -> Result<Vec<RelationOutcome>> {
        progress.stage_started(Stage::Decompose, Relation::ALL.len());

        let mut outcomes = Vec::with_capacity(Relation::ALL.len());
        for relation in Relation::ALL {
            let store = self.store.clone();
            let outcome = tokio::task::spawn_blocking(move || export_relation(&store, relation))
                .await
                .map_err(|e| DocForestError::Storage(format!("{relation} export task failed: {e}")))??;
            progress.relation_done(&outcome);
            outcomes.push(outcome);
        }

        progress.stage_finished(Stage::Decompose);
        Ok(outcomes)
    }
}

/// Convenience wrapper: open the store named by `config` and run `stages`.
pub async fn run_pipeline(
    config: PipelineConfig,
    blobs: Arc<dyn BlobStore>,
    stages: &[Stage],
    progress: &dyn ProgressReporter,
) -> Result<PipelineReport> {
    let store = ArtifactStore::open(&config.artifacts_dir)?;
    Pipeline::new(config, store, blobs).run(stages, progress).await
}

// ---------------------------------------------------------------------------
// Per-item handlers
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(asset_id = %entry.asset_id))]
async fn fetch_one(
    store: &ArtifactStore,
    blobs: &dyn BlobStore,
    entry: ManifestEntry,
) -> Result<Handled> {
    if store.has_raw(&entry.asset_id) {
        return Ok(Handled::Skipped);
    }
    let content = blobs.fetch(&entry.bucket_name, &entry.key).await?;
    store.write_raw(&RawDocument::new(&entry, content))?;
    Ok(Handled::Written)
}

#[instrument(skip_all, fields(asset_id = %asset_id))]
fn normalize_one(
    store: &ArtifactStore,
    asset_id: &AssetId,
    options: NormalizeOptions,
) -> Result<Handled> {
    if store.has_tree(asset_id) {
        return Ok(Handled::Skipped);
    }
    let raw = store.read_raw(asset_id)?;
    let tree = normalize_document(asset_id, &raw.text(), options)?;
    store.write_tree(&tree)?;
    Ok(Handled::Written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
