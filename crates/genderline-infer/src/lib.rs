//! Genderline Infer - author gender inference pipeline
//!
//! Reads first/last author names from a tab-separated papers file, asks a
//! chat model for each unique author's likely gender and appends the answers
//! to a TSV that doubles as the resume record.
//!
//! # Features
//!
//! - One request per unique `"{first} {last}"` key, resumable from prior output
//! - Two counting bounds (loaded models, parallel requests) on in-flight calls
//! - Single writer thread, so rows never interleave
//! - Local (Ollama) or hosted (OpenAI-compatible) chat backends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use genderline_core::{ProgressContext, ShutdownFlag};
//! use genderline_infer::{BackendSettings, ChatClient, Config, Pipeline};
//!
//! let config = Config::new("data/papers.tsv", "data/papers_gender_authors_llama3.tsv");
//! let backend = ChatClient::new(&BackendSettings::default(), "llama3")?;
//! let mut pipeline = Pipeline::new(
//!     config,
//!     Arc::new(backend),
//!     Arc::new(ProgressContext::new()),
//!     ShutdownFlag::new(),
//! );
//! let summary = pipeline.run().await?;
//! println!("{} rows written", summary.rows_written);
//! ```

pub mod backend;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod prompt;
pub mod runner;
pub mod sink;
pub mod source;
pub mod stats;
pub mod types;
pub mod worker;

// Re-exports
pub use backend::{
    BackendConfigError, BackendError, BackendKind, BackendSettings, ChatBackend, ChatClient,
    ChatReply,
};
pub use config::{Config, default_output_path};
pub use dedup::{Admission, PendingSet};
pub use runner::{Pipeline, PipelineState};
pub use sink::{HEADER, SinkMessage, SinkStats, TsvSink};
pub use source::{ColumnNames, RecordSource, SourceError, SourceStats};
pub use stats::RunSummary;
pub use types::{AuthorKey, Gender, GenderCounts, InferenceResult, NamePair};
