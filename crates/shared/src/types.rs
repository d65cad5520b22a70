//! Core domain types for the webharvest work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
///
/// One `RunId` is minted per orchestrator invocation and stamped onto every
/// record and audit row the run touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// RecordStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a URL in the work queue.
///
/// Statuses only ever move forward: `Pending` to `Scraped` or `Skipped`,
/// and `Scraped` to `Indexed`. The sole backward path is the administrative
/// bulk reset exposed by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Discovered by the frontier, not yet fetched.
    Pending,
    /// Fetched and an artifact was stored.
    Scraped,
    /// Fetched but rejected (error, unsupported type, empty content).
    Skipped,
    /// Text artifact has been handed to the vector index collaborator.
    Indexed,
}

impl RecordStatus {
    /// Storage string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraped => "scraped",
            Self::Skipped => "skipped",
            Self::Indexed => "indexed",
        }
    }

    /// Parse a storage string back into a status. Returns `None` for
    /// unrecognized input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scraped" => Some(Self::Scraped),
            "skipped" => Some(Self::Skipped),
            "indexed" => Some(Self::Indexed),
            _ => None,
        }
    }

    /// Whether a stage write may move a record from `self` to `to`.
    ///
    /// Re-applying the current status is allowed (last-writer-wins across
    /// overlapping runs); `Skipped` records are not indexable. Backward
    /// moves go through the administrative reset, never through here.
    pub fn can_transition(self, to: RecordStatus) -> bool {
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Self::Pending, Self::Scraped)
                | (Self::Pending, Self::Skipped)
                | (Self::Scraped, Self::Indexed)
        )
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContentKind
// ---------------------------------------------------------------------------

/// Classification of a fetched response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Not yet fetched, or an unsupported content type.
    Unknown,
    /// Extracted paragraph text.
    Text,
    /// Raw PDF bytes stored verbatim.
    Pdf,
}

impl ContentKind {
    /// Storage string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Text => "text",
            Self::Pdf => "pdf",
        }
    }

    /// Parse a storage string back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "text" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// UrlRecord
// ---------------------------------------------------------------------------

/// One row of the durable work queue: a single URL's progress through the
/// pipeline. Keyed by a pure hash of the URL, so rediscovery upserts and
/// never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Content-addressed key: 128-bit truncation of SHA-256 over the URL.
    pub id: String,
    /// The discovered URL, verbatim.
    pub url: String,
    /// Current lifecycle state.
    pub status: RecordStatus,
    /// Run that created or last touched this record.
    pub run_id: String,
    /// Classification result, `Unknown` until fetched.
    pub content_kind: ContentKind,
    /// Blob reference for the stored artifact, absent until scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// Characters of extracted text; 0 for binary or skipped content.
    pub char_count: u64,
    /// Why the record was skipped, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// When the frontier first stored this record.
    pub discovered_at: DateTime<Utc>,
    /// When any stage last wrote this record.
    pub updated_at: DateTime<Utc>,
}

impl UrlRecord {
    /// Build a fresh `Pending` record for a newly discovered URL.
    pub fn discovered(url: &str, run_id: &RunId) -> Self {
        let now = Utc::now();
        Self {
            id: crate::urlkey::record_key(url),
            url: url.to_string(),
            status: RecordStatus::Pending,
            run_id: run_id.to_string(),
            content_kind: ContentKind::Unknown,
            artifact_ref: None,
            char_count: 0,
            skip_reason: None,
            discovered_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordPatch
// ---------------------------------------------------------------------------

/// The field set a stage writes when completing work on a record.
///
/// Applied through the record store adapter, which validates the status
/// transition before writing.
#[derive(Debug, Clone)]
pub struct RecordPatch {
    /// Target lifecycle state.
    pub status: RecordStatus,
    /// Classification result.
    pub content_kind: ContentKind,
    /// Blob reference, if an artifact was stored.
    pub artifact_ref: Option<String>,
    /// Characters of extracted text.
    pub char_count: u64,
    /// Skip cause, if skipped.
    pub skip_reason: Option<String>,
    /// Run applying the patch.
    pub run_id: String,
}

// ---------------------------------------------------------------------------
// RecordFilter
// ---------------------------------------------------------------------------

/// Equality filter for record store queries.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Match records in this status.
    pub status: Option<RecordStatus>,
    /// Match records with this content kind.
    pub content_kind: Option<ContentKind>,
    /// Only records with a non-empty artifact reference.
    pub require_artifact: bool,
    /// Cap on returned rows.
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Filter on a single status.
    pub fn with_status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Additionally filter on content kind.
    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = Some(kind);
        self
    }

    /// Require a non-empty artifact reference.
    pub fn require_artifact(mut self) -> Self {
        self.require_artifact = true;
        self
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ---------------------------------------------------------------------------
// AuditRow
// ---------------------------------------------------------------------------

/// One append-only analytics row per processed URL.
///
/// Rows are never updated in place; each run appends its own view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    /// Run that processed the URL.
    pub run_id: String,
    /// The URL, verbatim.
    pub url: String,
    /// Whether every extracted paragraph decoded as recognizable text.
    pub is_text: bool,
    /// Characters of paragraph text seen on the page.
    pub char_count: u64,
    /// Skip cause, if the URL was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Blob reference, if an artifact was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// Classification result.
    pub content_kind: ContentKind,
    /// When the row was appended.
    pub recorded_at: DateTime<Utc>,
}
