//! Fetch & classify stage.
//!
//! Reads `Pending` records from the work queue, fetches each URL, and
//! dispatches on the response content type: PDFs pass through to the blob
//! store verbatim, text-ish responses get paragraph extraction, and
//! everything else is skipped with a reason. HTTP and parse failures are
//! converted to `Skipped` outcomes per URL; only collaborator write
//! failures abandon a unit, leaving it `Pending` for the next run.

pub mod extract;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, redirect::Policy};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use webharvest_shared::{
    AuditRow, ContentKind, HarvestError, RecordFilter, RecordPatch, RecordStatus, Result, RunId,
    UrlRecord, urlkey,
};
use webharvest_store::{AnalyticsSink, BlobStore, RecordStore};

/// User-Agent string for pipeline requests.
const USER_AGENT: &str = concat!("webharvest/", env!("CARGO_PKG_VERSION"));

/// Build the long-lived HTTP client shared by the network stages.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Stage result
// ---------------------------------------------------------------------------

/// Settings for the fetch stage.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Blob bucket receiving extracted text artifacts.
    pub text_bucket: String,
    /// Blob bucket receiving raw PDF artifacts.
    pub pdf_bucket: String,
    /// Worker pool size for `run_pending`.
    pub concurrency: usize,
}

/// Outcome of classifying and extracting one URL.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub status: RecordStatus,
    pub content_kind: ContentKind,
    pub char_count: u64,
    pub artifact_ref: Option<String>,
    pub skip_reason: Option<String>,
    /// Whether every extracted paragraph decoded as recognizable text.
    pub is_text: bool,
}

impl StageResult {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Skipped,
            content_kind: ContentKind::Unknown,
            char_count: 0,
            artifact_ref: None,
            skip_reason: Some(reason.into()),
            is_text: false,
        }
    }
}

/// Summary of one `run_pending` invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Records whose status was written (scraped + skipped).
    pub processed: usize,
    /// Records that produced an artifact.
    pub scraped: usize,
    /// Records skipped with a reason.
    pub skipped: usize,
    /// Records abandoned on collaborator failure, still `Pending`.
    pub abandoned: usize,
}

enum Outcome {
    Scraped,
    Skipped,
    Abandoned,
}

// ---------------------------------------------------------------------------
// FetchStage
// ---------------------------------------------------------------------------

/// The fetch & classify stage, wired to its collaborators.
#[derive(Clone)]
pub struct FetchStage {
    client: Client,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AnalyticsSink>,
    run_id: RunId,
    config: FetchConfig,
}

impl FetchStage {
    /// Create a fetch stage using an injected long-lived HTTP client.
    pub fn new(
        client: Client,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AnalyticsSink>,
        run_id: RunId,
        config: FetchConfig,
    ) -> Self {
        Self {
            client,
            records,
            blobs,
            audit,
            run_id,
            config,
        }
    }

    /// Fetch one URL and classify the response.
    ///
    /// HTTP and parse failures come back as `Ok` with a `Skipped` result;
    /// an `Err` means a collaborator write failed and the unit should be
    /// abandoned without touching its status.
    pub async fn process(&self, url: &str) -> Result<StageResult> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Ok(StageResult::skipped("request timeout")),
            Err(e) => return Ok(StageResult::skipped(format!("request error: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(StageResult::skipped(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("pdf") {
            let bytes = match response.bytes().await {
                Ok(b) => b,
                Err(e) => return Ok(StageResult::skipped(format!("request error: {e}"))),
            };
            let key = format!("{}/{}", self.config.pdf_bucket, urlkey::blob_name(url, "pdf"));
            let blob_ref = self.blobs.put(&key, &bytes).await?;
            return Ok(StageResult {
                status: RecordStatus::Scraped,
                content_kind: ContentKind::Pdf,
                char_count: 0,
                artifact_ref: Some(blob_ref),
                skip_reason: None,
                is_text: false,
            });
        }

        if content_type.contains("text") || content_type.contains("application/json") {
            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => return Ok(StageResult::skipped(format!("parse failure: {e}"))),
            };
            let extracted = extract::extract_paragraphs(&body);

            if extracted.text.is_empty() {
                return Ok(StageResult {
                    status: RecordStatus::Skipped,
                    content_kind: ContentKind::Text,
                    char_count: 0,
                    artifact_ref: None,
                    skip_reason: Some("insufficient content".into()),
                    is_text: extracted.all_recognized,
                });
            }

            let key = format!("{}/{}", self.config.text_bucket, urlkey::blob_name(url, "txt"));
            let blob_ref = self.blobs.put(&key, extracted.text.as_bytes()).await?;
            return Ok(StageResult {
                status: RecordStatus::Scraped,
                content_kind: ContentKind::Text,
                char_count: extracted.char_count,
                artifact_ref: Some(blob_ref),
                skip_reason: None,
                is_text: extracted.all_recognized,
            });
        }

        Ok(StageResult::skipped(format!(
            "unsupported content-type: {content_type}"
        )))
    }

    /// Process up to `limit` pending records (0 = all) under a bounded
    /// worker pool. Each URL's failure is isolated; nothing here is fatal
    /// to the batch.
    #[instrument(skip_all, fields(run_id = %self.run_id, limit))]
    pub async fn run_pending(&self, limit: usize) -> Result<FetchSummary> {
        let mut filter = RecordFilter::with_status(RecordStatus::Pending);
        if limit > 0 {
            filter = filter.limit(limit);
        }
        let pending = self.records.query(&filter).await?;
        info!(count = pending.len(), "processing pending records");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::new();

        for record in pending {
            let stage = self.clone();
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                stage.process_record(&record).await
            }));
        }

        let mut summary = FetchSummary::default();
        for handle in handles {
            match handle.await {
                Ok(Outcome::Scraped) => {
                    summary.scraped += 1;
                    summary.processed += 1;
                }
                Ok(Outcome::Skipped) => {
                    summary.skipped += 1;
                    summary.processed += 1;
                }
                Ok(Outcome::Abandoned) => summary.abandoned += 1,
                Err(e) => {
                    warn!(error = %e, "fetch worker panicked");
                    summary.abandoned += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            scraped = summary.scraped,
            skipped = summary.skipped,
            abandoned = summary.abandoned,
            "fetch stage complete"
        );

        Ok(summary)
    }

    /// Process one record end to end: fetch, classify, write the status
    /// transition, append the audit row.
    async fn process_record(&self, record: &UrlRecord) -> Outcome {
        let result = match self.process(&record.url).await {
            Ok(result) => result,
            Err(e) => {
                warn!(url = %record.url, error = %e, "collaborator failure, abandoning unit");
                return Outcome::Abandoned;
            }
        };

        let patch = RecordPatch {
            status: result.status,
            content_kind: result.content_kind,
            artifact_ref: result.artifact_ref.clone(),
            char_count: result.char_count,
            skip_reason: result.skip_reason.clone(),
            run_id: self.run_id.to_string(),
        };

        if let Err(e) = self.records.apply(&record.id, &patch).await {
            warn!(url = %record.url, error = %e, "record write failed, leaving for retry");
            return Outcome::Abandoned;
        }

        let row = AuditRow {
            run_id: self.run_id.to_string(),
            url: record.url.clone(),
            is_text: result.is_text,
            char_count: result.char_count,
            skip_reason: result.skip_reason.clone(),
            artifact_ref: result.artifact_ref.clone(),
            content_kind: result.content_kind,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.audit.append(&row).await {
            warn!(url = %record.url, error = %e, "audit append failed");
        }

        match result.status {
            RecordStatus::Scraped => Outcome::Scraped,
            _ => Outcome::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use webharvest_store::{FsBlobStore, SqliteAnalyticsSink, SqliteRecordStore};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        stage: FetchStage,
        records: Arc<SqliteRecordStore>,
        blobs: Arc<FsBlobStore>,
        run_id: RunId,
    }

    async fn fixture() -> Fixture {
        let tag = Uuid::now_v7();
        let db = std::env::temp_dir().join(format!("wh_fetch_{tag}.db"));
        let audit_db = std::env::temp_dir().join(format!("wh_fetch_{tag}_audit.db"));
        let blob_root = std::env::temp_dir().join(format!("wh_fetch_blobs_{tag}"));

        let records = Arc::new(SqliteRecordStore::open(&db).await.expect("open records"));
        let blobs = Arc::new(FsBlobStore::new(&blob_root));
        let audit = Arc::new(
            SqliteAnalyticsSink::open(&audit_db, "audit")
                .await
                .expect("open audit"),
        );
        let run_id = RunId::new();

        let stage = FetchStage::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            records.clone(),
            blobs.clone(),
            audit,
            run_id.clone(),
            FetchConfig {
                text_bucket: "text".into(),
                pdf_bucket: "pdf".into(),
                concurrency: 2,
            },
        );

        Fixture {
            stage,
            records,
            blobs,
            run_id,
        }
    }

    async fn seed_pending(fix: &Fixture, url: &str) -> String {
        let rec = UrlRecord::discovered(url, &fix.run_id);
        fix.records.upsert_discovered(&rec).await.expect("seed");
        rec.id
    }

    #[tokio::test]
    async fn pdf_passes_through_to_blob_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"),
            )
            .mount(&server)
            .await;

        let fix = fixture().await;
        let url = format!("{}/report", server.uri());
        let id = seed_pending(&fix, &url).await;

        let summary = fix.stage.run_pending(0).await.expect("run");
        assert_eq!(summary.scraped, 1);

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Scraped);
        assert_eq!(rec.content_kind, ContentKind::Pdf);
        assert_eq!(rec.char_count, 0);

        let blob_ref = rec.artifact_ref.expect("artifact ref");
        let bytes = fix.blobs.get(&blob_ref).await.expect("blob");
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn text_extraction_counts_paragraph_chars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><p>Hello</p><p></p><p>World</p></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let fix = fixture().await;
        let url = format!("{}/page", server.uri());
        let id = seed_pending(&fix, &url).await;

        fix.stage.run_pending(0).await.expect("run");

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Scraped);
        assert_eq!(rec.content_kind, ContentKind::Text);
        assert_eq!(rec.char_count, 10);

        let blob_ref = rec.artifact_ref.expect("artifact ref");
        let bytes = fix.blobs.get(&blob_ref).await.expect("blob");
        assert_eq!(String::from_utf8(bytes).unwrap(), "Hello\nWorld\n");
    }

    #[tokio::test]
    async fn empty_page_is_skipped_for_insufficient_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><p></p><div>no paragraphs</div></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let fix = fixture().await;
        let url = format!("{}/empty", server.uri());
        let id = seed_pending(&fix, &url).await;

        fix.stage.run_pending(0).await.expect("run");

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Skipped);
        assert_eq!(rec.skip_reason.as_deref(), Some("insufficient content"));
        assert!(rec.artifact_ref.is_none());
        assert_eq!(rec.char_count, 0);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_skipped_with_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 8], "image/png"))
            .mount(&server)
            .await;

        let fix = fixture().await;
        let url = format!("{}/logo", server.uri());
        let id = seed_pending(&fix, &url).await;

        fix.stage.run_pending(0).await.expect("run");

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Skipped);
        let reason = rec.skip_reason.expect("reason");
        assert!(reason.starts_with("unsupported content-type:"));
        assert!(reason.contains("image/png"));
    }

    #[tokio::test]
    async fn http_error_is_skipped_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fix = fixture().await;
        let url = format!("{}/gone", server.uri());
        let id = seed_pending(&fix, &url).await;

        fix.stage.run_pending(0).await.expect("run");

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Skipped);
        assert!(rec.skip_reason.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn limit_caps_processed_records() {
        let server = MockServer::start().await;
        for p in ["/a", "/b", "/c"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_raw(
                    "<html><body><p>content</p></body></html>",
                    "text/html",
                ))
                .mount(&server)
                .await;
        }

        let fix = fixture().await;
        for p in ["/a", "/b", "/c"] {
            seed_pending(&fix, &format!("{}{p}", server.uri())).await;
        }

        let summary = fix.stage.run_pending(2).await.expect("run");
        assert_eq!(summary.processed, 2);

        let still_pending = fix
            .records
            .query(&RecordFilter::with_status(RecordStatus::Pending))
            .await
            .unwrap();
        assert_eq!(still_pending.len(), 1);
    }

    #[tokio::test]
    async fn rerun_after_partial_batch_drains_the_rest() {
        let server = MockServer::start().await;
        for p in ["/a", "/b"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_raw(
                    "<html><body><p>content</p></body></html>",
                    "text/html",
                ))
                .mount(&server)
                .await;
        }

        let fix = fixture().await;
        for p in ["/a", "/b"] {
            seed_pending(&fix, &format!("{}{p}", server.uri())).await;
        }

        fix.stage.run_pending(1).await.expect("first run");
        let summary = fix.stage.run_pending(0).await.expect("second run");
        assert_eq!(summary.processed, 1);

        let pending = fix
            .records
            .query(&RecordFilter::with_status(RecordStatus::Pending))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
