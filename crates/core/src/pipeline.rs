//! Stage orchestration: one run identifier across discovery, fetching, and
//! ingestion.
//!
//! The pipeline owns the long-lived HTTP client and collaborator handles
//! and injects them into each stage; stages never build their own clients.
//! Stages run to completion in caller order, each independently idempotent
//! and resumable, communicating only through the record store.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, instrument};

use webharvest_fetch::{FetchConfig, FetchStage, FetchSummary, build_http_client};
use webharvest_frontier::{Frontier, FrontierConfig, FrontierSummary};
use webharvest_indexer::{BatchSummary, Batcher, BatcherConfig};
use webharvest_shared::{AppConfig, HarvestError, RecordStatus, Result, RunId};
use webharvest_store::{AnalyticsSink, BlobStore, RecordStore, VectorIndex};

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// A selectable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// BFS discovery into the work queue.
    Discover,
    /// Fetch & classify pending records.
    Scrape,
    /// Batch scraped text into the vector index.
    Index,
}

impl std::str::FromStr for StageKind {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "discover" => Ok(Self::Discover),
            "scrape" => Ok(Self::Scrape),
            "index" => Ok(Self::Index),
            other => Err(HarvestError::validation(format!(
                "unknown stage {other:?}, expected discover, scrape, or index"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Long-lived collaborator handles, owned by the pipeline and injected
/// into stages.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub audit: Arc<dyn AnalyticsSink>,
    pub index: Arc<dyn VectorIndex>,
}

/// Per-run parameters, resolved from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// Seed URL for discovery. Required only when discovery runs.
    pub start_url: Option<String>,
    /// Scope prefix for discovered links. Defaults to `start_url`.
    pub base_url: Option<String>,
    /// Page budget for one discovery run.
    pub max_pages: usize,
    /// Cap on pending records per fetch run (0 = all).
    pub pending_limit: usize,
    /// Documents per index write.
    pub batch_size: usize,
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Vector index collection.
    pub collection_name: String,
    /// Blob bucket for text artifacts.
    pub text_bucket: String,
    /// Blob bucket for PDF artifacts.
    pub pdf_bucket: String,
    /// Per-request timeout.
    pub fetch_timeout: Duration,
    /// Fetch stage worker pool size.
    pub concurrency: usize,
    /// Link paths the frontier must not follow.
    pub exclude_patterns: Vec<String>,
}

impl From<&AppConfig> for PipelineParams {
    fn from(config: &AppConfig) -> Self {
        Self {
            start_url: config.crawl.start_url.clone(),
            base_url: config.crawl.base_url.clone(),
            max_pages: config.crawl.max_pages,
            pending_limit: config.crawl.pending_limit,
            batch_size: config.pipeline.batch_size,
            chunk_size: config.pipeline.chunk_size,
            collection_name: config.pipeline.collection_name.clone(),
            text_bucket: config.pipeline.text_bucket.clone(),
            pdf_bucket: config.pipeline.pdf_bucket.clone(),
            fetch_timeout: Duration::from_secs(config.crawl.fetch_timeout_secs),
            concurrency: config.crawl.concurrency,
            exclude_patterns: config.crawl.exclude_patterns.clone(),
        }
    }
}

/// Stage summaries for one orchestrator invocation.
#[derive(Debug, Default)]
pub struct RunReport {
    pub frontier: Option<FrontierSummary>,
    pub fetch: Option<FetchSummary>,
    pub batch: Option<BatchSummary>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The orchestrator: a fresh [`RunId`] per instance, shared by every stage
/// it runs.
pub struct Pipeline {
    run_id: RunId,
    client: Client,
    collab: Collaborators,
    params: PipelineParams,
}

impl Pipeline {
    /// Wire up a pipeline. The HTTP client is built once here and shared
    /// by the network stages.
    pub fn new(collab: Collaborators, params: PipelineParams) -> Result<Self> {
        let client = build_http_client(params.fetch_timeout)?;
        Ok(Self {
            run_id: RunId::new(),
            client,
            collab,
            params,
        })
    }

    /// The identifier stamped on everything this pipeline touches.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Execute the selected stages in caller order.
    ///
    /// Fatal configuration problems (discovery without a start URL)
    /// surface before any stage does work.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(&self, stages: &[StageKind]) -> Result<RunReport> {
        if stages.contains(&StageKind::Discover) && self.start_url().is_none() {
            return Err(HarvestError::config(
                "the discover stage requires a start URL",
            ));
        }

        info!(?stages, "starting run");
        let mut report = RunReport::default();

        for stage in stages {
            match stage {
                StageKind::Discover => report.frontier = Some(self.run_discovery().await?),
                StageKind::Scrape => report.fetch = Some(self.run_fetch().await?),
                StageKind::Index => report.batch = Some(self.run_batcher().await?),
            }
        }

        info!("run complete");
        Ok(report)
    }

    /// Administrative bulk reset of record statuses, the only backward
    /// transition in the state machine.
    pub async fn reset(&self, target: RecordStatus) -> Result<u64> {
        let changed = self.collab.records.reset(target).await?;
        info!(target = %target, changed, "reset records");
        Ok(changed)
    }

    fn start_url(&self) -> Option<&str> {
        self.params.start_url.as_deref().filter(|s| !s.is_empty())
    }

    async fn run_discovery(&self) -> Result<FrontierSummary> {
        let start = self
            .start_url()
            .ok_or_else(|| HarvestError::config("the discover stage requires a start URL"))?;
        let base = self
            .params
            .base_url
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| start.to_string());

        let frontier = Frontier::new(
            self.client.clone(),
            self.collab.records.clone(),
            self.run_id.clone(),
            &FrontierConfig {
                budget: self.params.max_pages,
                exclude_patterns: self.params.exclude_patterns.clone(),
            },
        )?;
        frontier.run(start, &base).await
    }

    async fn run_fetch(&self) -> Result<FetchSummary> {
        let stage = FetchStage::new(
            self.client.clone(),
            self.collab.records.clone(),
            self.collab.blobs.clone(),
            self.collab.audit.clone(),
            self.run_id.clone(),
            FetchConfig {
                text_bucket: self.params.text_bucket.clone(),
                pdf_bucket: self.params.pdf_bucket.clone(),
                concurrency: self.params.concurrency,
            },
        );
        stage.run_pending(self.params.pending_limit).await
    }

    async fn run_batcher(&self) -> Result<BatchSummary> {
        let batcher = Batcher::new(
            self.collab.records.clone(),
            self.collab.blobs.clone(),
            self.collab.index.clone(),
            self.run_id.clone(),
            BatcherConfig {
                collection: self.params.collection_name.clone(),
                chunk_size: self.params.chunk_size,
            },
        );
        batcher.run(self.params.batch_size).await
    }
}
