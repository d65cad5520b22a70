//! Shared types for the webharvest pipeline: errors, configuration, the
//! work-queue domain model, and URL keying.

pub mod config;
pub mod error;
pub mod types;
pub mod urlkey;

pub use config::{
    AppConfig, CrawlSection, PipelineSection, config_dir, config_file_path, data_dir, init_config,
    load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{
    AuditRow, ContentKind, RecordFilter, RecordPatch, RecordStatus, RunId, UrlRecord,
};
