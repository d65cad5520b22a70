//! Ingestion batcher: scraped text artifacts into the vector index.
//!
//! Reads `Scraped` text records in discovery order, chunks each artifact,
//! and submits accumulated chunks to the vector index collaborator one
//! batch at a time, where a batch is counted in documents, not chunks.

pub mod chunk;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use webharvest_shared::{
    ContentKind, HarvestError, RecordFilter, RecordPatch, RecordStatus, Result, RunId, UrlRecord,
};
use webharvest_store::{BlobStore, IndexDocument, RecordStore, VectorIndex};

pub use chunk::chunk_text;

/// Settings for the ingestion batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Vector index collection receiving the chunks.
    pub collection: String,
    /// Characters per chunk.
    pub chunk_size: usize,
}

/// Summary of one batcher run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Documents whose chunks were accumulated.
    pub documents: usize,
    /// Chunks produced across all documents.
    pub chunks: usize,
    /// Successful index writes.
    pub flushes: usize,
    /// Documents that failed to load or split, left `Scraped` for retry.
    pub failures: usize,
}

/// The ingestion batcher, wired to its collaborators.
pub struct Batcher {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
    run_id: RunId,
    config: BatcherConfig,
}

impl Batcher {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn VectorIndex>,
        run_id: RunId,
        config: BatcherConfig,
    ) -> Self {
        Self {
            records,
            blobs,
            index,
            run_id,
            config,
        }
    }

    /// Feed every indexable record through the vector index, flushing once
    /// per `batch_size` documents and once more for any remainder.
    ///
    /// A record goes `Indexed` when its chunks are accumulated, before the
    /// batch flush: a crash inside that window leaves an `Indexed` record
    /// whose chunks never reached the collaborator. The administrative
    /// reset is the recovery path.
    #[instrument(skip_all, fields(run_id = %self.run_id, batch_size))]
    pub async fn run(&self, batch_size: usize) -> Result<BatchSummary> {
        let batch_size = batch_size.max(1);
        let filter = RecordFilter::with_status(RecordStatus::Scraped)
            .content_kind(ContentKind::Text)
            .require_artifact();
        let candidates = self.records.query(&filter).await?;

        info!(count = candidates.len(), "ingesting scraped text records");

        let mut summary = BatchSummary::default();
        let mut pending: Vec<IndexDocument> = Vec::new();
        let mut docs_in_batch = 0usize;

        for record in candidates {
            let docs = match self.load_and_chunk(&record).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(url = %record.url, error = %e, "document load failed, leaving for retry");
                    summary.failures += 1;
                    continue;
                }
            };

            summary.chunks += docs.len();
            summary.documents += 1;
            pending.extend(docs);
            docs_in_batch += 1;

            let patch = RecordPatch {
                status: RecordStatus::Indexed,
                content_kind: record.content_kind,
                artifact_ref: record.artifact_ref.clone(),
                char_count: record.char_count,
                skip_reason: None,
                run_id: self.run_id.to_string(),
            };
            if let Err(e) = self.records.apply(&record.id, &patch).await {
                warn!(url = %record.url, error = %e, "status write failed");
            }

            if docs_in_batch >= batch_size {
                self.flush_batch(&mut pending, &mut summary).await;
                docs_in_batch = 0;
            }
        }

        if !pending.is_empty() {
            self.flush_batch(&mut pending, &mut summary).await;
        }

        info!(
            documents = summary.documents,
            chunks = summary.chunks,
            flushes = summary.flushes,
            failures = summary.failures,
            "ingestion complete"
        );

        Ok(summary)
    }

    /// Load one record's artifact and split it into index documents.
    async fn load_and_chunk(&self, record: &UrlRecord) -> Result<Vec<IndexDocument>> {
        let blob_ref = record
            .artifact_ref
            .as_deref()
            .ok_or_else(|| HarvestError::Storage("record has no artifact reference".into()))?;

        let bytes = self.blobs.get(blob_ref).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| HarvestError::parse(format!("artifact is not UTF-8: {e}")))?;

        Ok(chunk_text(&text, self.config.chunk_size)
            .into_iter()
            .enumerate()
            .map(|(seq, body)| IndexDocument {
                source_url: record.url.clone(),
                seq: seq as u32,
                body,
            })
            .collect())
    }

    /// Submit the accumulated chunks as one write, force a flush, and log
    /// the collaborator's total. On failure the batch is dropped; its
    /// records keep whatever status they already have.
    async fn flush_batch(&self, pending: &mut Vec<IndexDocument>, summary: &mut BatchSummary) {
        let result = async {
            self.index.index(pending, &self.config.collection).await?;
            self.index.flush(&self.config.collection).await?;
            self.index.count(&self.config.collection).await
        }
        .await;

        match result {
            Ok(total) => {
                info!(
                    collection = %self.config.collection,
                    chunks = pending.len(),
                    vectors = total,
                    "flushed batch to vector index"
                );
                summary.flushes += 1;
            }
            Err(e) => {
                warn!(
                    collection = %self.config.collection,
                    chunks = pending.len(),
                    error = %e,
                    "index write failed, abandoning batch"
                );
            }
        }
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;
    use webharvest_shared::UrlRecord;
    use webharvest_store::{FsBlobStore, SqliteRecordStore, SqliteVectorIndex};

    /// Vector index double that records write sizes and flush calls.
    #[derive(Default)]
    struct CountingIndex {
        writes: Mutex<Vec<usize>>,
        flushes: Mutex<usize>,
    }

    #[async_trait]
    impl VectorIndex for CountingIndex {
        async fn index(&self, documents: &[IndexDocument], _collection: &str) -> Result<()> {
            self.writes.lock().unwrap().push(documents.len());
            Ok(())
        }

        async fn flush(&self, _collection: &str) -> Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }

        async fn count(&self, _collection: &str) -> Result<u64> {
            Ok(self.writes.lock().unwrap().iter().sum::<usize>() as u64)
        }

        async fn drop_collection(&self, _collection: &str) -> Result<()> {
            self.writes.lock().unwrap().clear();
            Ok(())
        }
    }

    struct Fixture {
        records: Arc<SqliteRecordStore>,
        blobs: Arc<FsBlobStore>,
        run_id: RunId,
    }

    async fn fixture() -> Fixture {
        let tag = Uuid::now_v7();
        let db = std::env::temp_dir().join(format!("wh_batch_{tag}.db"));
        let blob_root = std::env::temp_dir().join(format!("wh_batch_blobs_{tag}"));
        Fixture {
            records: Arc::new(SqliteRecordStore::open(&db).await.expect("open records")),
            blobs: Arc::new(FsBlobStore::new(&blob_root)),
            run_id: RunId::new(),
        }
    }

    /// Seed one scraped text record backed by a real blob.
    async fn seed_scraped(fix: &Fixture, url: &str, body: &str) -> String {
        let rec = UrlRecord::discovered(url, &fix.run_id);
        fix.records.upsert_discovered(&rec).await.expect("seed");

        let key = format!("text/{}", webharvest_shared::urlkey::blob_name(url, "txt"));
        let blob_ref = fix.blobs.put(&key, body.as_bytes()).await.expect("blob");

        let patch = RecordPatch {
            status: RecordStatus::Scraped,
            content_kind: ContentKind::Text,
            artifact_ref: Some(blob_ref),
            char_count: body.chars().count() as u64,
            skip_reason: None,
            run_id: fix.run_id.to_string(),
        };
        fix.records.apply(&rec.id, &patch).await.expect("scrape");
        rec.id
    }

    fn batcher(fix: &Fixture, index: Arc<dyn VectorIndex>, chunk_size: usize) -> Batcher {
        Batcher::new(
            fix.records.clone(),
            fix.blobs.clone(),
            index,
            fix.run_id.clone(),
            BatcherConfig {
                collection: "docs".into(),
                chunk_size,
            },
        )
    }

    #[tokio::test]
    async fn flush_boundary_is_per_document() {
        let fix = fixture().await;
        for i in 0..5 {
            seed_scraped(&fix, &format!("https://example.org/{i}"), "short text").await;
        }

        let index = Arc::new(CountingIndex::default());
        let summary = batcher(&fix, index.clone(), 1024)
            .run(2)
            .await
            .expect("run");

        assert_eq!(summary.documents, 5);
        // Five one-chunk documents at batch_size 2: writes of 2, 2, and 1,
        // one flush per write.
        assert_eq!(*index.writes.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(*index.flushes.lock().unwrap(), 3);
        assert_eq!(summary.flushes, 3);
    }

    #[tokio::test]
    async fn records_end_up_indexed() {
        let fix = fixture().await;
        let id = seed_scraped(&fix, "https://example.org/a", "some text").await;

        let index = Arc::new(CountingIndex::default());
        batcher(&fix, index, 1024).run(10).await.expect("run");

        let rec = fix.records.get(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Indexed);
    }

    #[tokio::test]
    async fn long_documents_split_into_chunks() {
        let fix = fixture().await;
        let body = "x".repeat(2500);
        seed_scraped(&fix, "https://example.org/long", &body).await;

        let index = Arc::new(CountingIndex::default());
        let summary = batcher(&fix, index.clone(), 1024)
            .run(10)
            .await
            .expect("run");

        assert_eq!(summary.documents, 1);
        assert_eq!(summary.chunks, 3);
        assert_eq!(*index.writes.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn missing_blob_leaves_record_scraped() {
        let fix = fixture().await;
        let good = seed_scraped(&fix, "https://example.org/good", "fine").await;

        // A record whose artifact was lost.
        let rec = UrlRecord::discovered("https://example.org/lost", &fix.run_id);
        fix.records.upsert_discovered(&rec).await.unwrap();
        let patch = RecordPatch {
            status: RecordStatus::Scraped,
            content_kind: ContentKind::Text,
            artifact_ref: Some("text/absent.txt".into()),
            char_count: 4,
            skip_reason: None,
            run_id: fix.run_id.to_string(),
        };
        fix.records.apply(&rec.id, &patch).await.unwrap();

        let index = Arc::new(CountingIndex::default());
        let summary = batcher(&fix, index, 1024).run(10).await.expect("run");

        assert_eq!(summary.documents, 1);
        assert_eq!(summary.failures, 1);

        let lost = fix.records.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(lost.status, RecordStatus::Scraped);
        let good = fix.records.get(&good).await.unwrap().unwrap();
        assert_eq!(good.status, RecordStatus::Indexed);
    }

    #[tokio::test]
    async fn skipped_and_pdf_records_are_not_ingested() {
        let fix = fixture().await;
        seed_scraped(&fix, "https://example.org/text", "real text").await;

        let pdf = UrlRecord::discovered("https://example.org/file", &fix.run_id);
        fix.records.upsert_discovered(&pdf).await.unwrap();
        fix.records
            .apply(
                &pdf.id,
                &RecordPatch {
                    status: RecordStatus::Scraped,
                    content_kind: ContentKind::Pdf,
                    artifact_ref: Some("pdf/example.org__file.pdf".into()),
                    char_count: 0,
                    skip_reason: None,
                    run_id: fix.run_id.to_string(),
                },
            )
            .await
            .unwrap();

        let index = Arc::new(CountingIndex::default());
        let summary = batcher(&fix, index, 1024).run(10).await.expect("run");

        assert_eq!(summary.documents, 1);
        let rec = fix.records.get(&pdf.id).await.unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Scraped);
    }

    #[tokio::test]
    async fn works_against_the_local_index_backend() {
        let fix = fixture().await;
        seed_scraped(&fix, "https://example.org/a", &"y".repeat(1500)).await;
        seed_scraped(&fix, "https://example.org/b", "tail").await;

        let db = std::env::temp_dir().join(format!("wh_vec_{}.db", Uuid::now_v7()));
        let index = Arc::new(SqliteVectorIndex::open(&db).await.expect("open index"));

        let summary = batcher(&fix, index.clone(), 1024)
            .run(1)
            .await
            .expect("run");

        assert_eq!(summary.documents, 2);
        assert_eq!(index.count("docs").await.unwrap(), 3);
    }
}
