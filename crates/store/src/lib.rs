//! Collaborator capability interfaces for the webharvest pipeline.
//!
//! The pipeline stages talk to four external collaborators: the durable
//! record store (the work queue), the blob store (artifacts), the
//! append-only analytics sink, and the embedding/vector index. Each is a
//! trait here; production deployments supply their own backends, while the
//! [`sqlite`] and [`blob`] modules provide local reference implementations
//! used by the CLI and the test suite.

pub mod blob;
mod migrations;
pub mod sqlite;

use async_trait::async_trait;

use webharvest_shared::{AuditRow, RecordFilter, RecordPatch, RecordStatus, Result, UrlRecord};

pub use blob::FsBlobStore;
pub use sqlite::{SqliteAnalyticsSink, SqliteRecordStore, SqliteVectorIndex};

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// The durable work queue: one record per distinct URL, keyed by a pure
/// hash of the URL string.
///
/// Implementations must provide atomic per-key upsert; the pipeline never
/// mutates the same record from two workers within one run, and
/// last-writer-wins on status is accepted across runs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a newly discovered URL as `Pending`.
    ///
    /// If a record with this key already exists in any status, its status
    /// is left untouched; rediscovery never regresses a record and never
    /// errors.
    async fn upsert_discovered(&self, record: &UrlRecord) -> Result<()>;

    /// Fetch a record by key.
    async fn get(&self, id: &str) -> Result<Option<UrlRecord>>;

    /// Apply a stage completion patch to a record.
    ///
    /// The transition `current.status -> patch.status` is validated here,
    /// at the adapter boundary; illegal moves fail with
    /// [`webharvest_shared::HarvestError::InvalidTransition`].
    async fn apply(&self, id: &str, patch: &RecordPatch) -> Result<()>;

    /// Query records by equality filter, in discovery order.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<UrlRecord>>;

    /// Administrative bulk transition of every record not already in
    /// `target` back to `target`. The only sanctioned backward move.
    /// Returns the number of records changed.
    async fn reset(&self, target: RecordStatus) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Artifact storage for extracted text and raw PDF bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, returning the reference to read them back.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Read a previously stored artifact.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// AnalyticsSink
// ---------------------------------------------------------------------------

/// Append-only audit trail; rows are never updated in place.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Append one row.
    async fn append(&self, row: &AuditRow) -> Result<()>;
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// A text chunk submitted to the vector index collaborator. Embedding is
/// the collaborator's concern; the pipeline only hands over text.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    /// URL of the page the chunk came from.
    pub source_url: String,
    /// Position of the chunk within its artifact.
    pub seq: u32,
    /// Chunk text.
    pub body: String,
}

/// The embedding/vector index collaborator.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Submit a batch of chunks to a collection as one write.
    async fn index(&self, documents: &[IndexDocument], collection: &str) -> Result<()>;

    /// Force a durability flush on a collection.
    async fn flush(&self, collection: &str) -> Result<()>;

    /// Total vectors in a collection.
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Remove a collection and everything in it.
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}
