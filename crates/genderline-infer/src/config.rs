//! Pipeline run configuration

use std::path::{Path, PathBuf};

use genderline_core::Limits;

use crate::source::ColumnNames;

/// Runtime configuration for one inference run.
///
/// Built by the CLI from flags, environment and config file; the pipeline
/// never reads the environment itself.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tab-separated papers file
    pub input: PathBuf,
    /// Output TSV (append-only)
    pub output: PathBuf,
    pub columns: ColumnNames,
    /// Seed the pending set from an existing output file
    pub resume: bool,
    pub limits: Limits,
    /// Stop after this many source rows
    pub row_limit: Option<usize>,
}

impl Config {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            columns: ColumnNames::default(),
            resume: false,
            limits: Limits::default(),
            row_limit: None,
        }
    }
}

/// `{output_dir}/{source}_gender_authors_{model}.tsv`
///
/// `source` is the input file stem; `/` and `:` in the model name (registry
/// paths, tags) become `_` so the name stays a single path component.
pub fn default_output_path(output_dir: &Path, input: &Path, model: &str) -> PathBuf {
    let source = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let model = model.replace(['/', ':'], "_");
    output_dir.join(format!("{source}_gender_authors_{model}.tsv"))
}
