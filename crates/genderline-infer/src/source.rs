//! Record source: author name pairs from a tab-separated papers file.
//!
//! Each source row yields up to two [`NamePair`]s, the first author before
//! the last author. Incomplete roles and malformed rows are skipped with a
//! diagnostic; only failing to open the file is fatal.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::NamePair;

/// Cell values pandas-style exports use for missing data
const NULL_MARKERS: &[&str] = &["nan", "na", "n/a", "null", "none"];

/// Input column names for both author roles
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub first_author_first_name: String,
    pub first_author_last_name: String,
    pub last_author_first_name: String,
    pub last_author_last_name: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            first_author_first_name: "first_author_firstName".to_string(),
            first_author_last_name: "first_author_lastName".to_string(),
            last_author_first_name: "last_author_firstName".to_string(),
            last_author_last_name: "last_author_lastName".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorRole {
    First,
    Last,
}

impl AuthorRole {
    fn label(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

#[derive(Debug)]
pub enum SourceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Header row missing or undecodable
    Header { path: PathBuf, message: String },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Header { path, message } => {
                write!(f, "bad header in {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Header { .. } => None,
        }
    }
}

/// Counters collected while reading the source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub rows_read: usize,
    /// Rows dropped entirely (too many fields, undecodable)
    pub rows_skipped: usize,
    /// Author roles dropped for missing or null names
    pub roles_skipped: usize,
    pub pairs: usize,
    /// I/O failure that ended reading early
    pub read_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct RoleColumns {
    role: AuthorRole,
    first: Option<usize>,
    last: Option<usize>,
}

/// Lazy sequence of [`NamePair`]s in file order.
///
/// Restart by opening the file again; the sequence is a pure function of
/// the file contents.
pub struct RecordSource {
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    roles: [RoleColumns; 2],
    header_len: usize,
    /// Last-author pair waiting behind the first-author pair of the same row
    queued: Option<NamePair>,
    row_limit: Option<usize>,
    done: bool,
    stats: SourceStats,
}

impl RecordSource {
    /// Open `path` and resolve the author columns from its header.
    ///
    /// A missing column is warned here once and then skips that role on
    /// every row.
    pub fn open(
        path: &Path,
        columns: &ColumnNames,
        row_limit: Option<usize>,
    ) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| SourceError::Header {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .clone();

        let find = |name: &str| {
            let idx = headers.iter().position(|h| h.trim() == name);
            if idx.is_none() {
                log::warn!(
                    "{}: column {name:?} not found, rows will skip that author",
                    path.display()
                );
            }
            idx
        };
        let roles = [
            RoleColumns {
                role: AuthorRole::First,
                first: find(&columns.first_author_first_name),
                last: find(&columns.first_author_last_name),
            },
            RoleColumns {
                role: AuthorRole::Last,
                first: find(&columns.last_author_first_name),
                last: find(&columns.last_author_last_name),
            },
        ];

        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            roles,
            header_len: headers.len(),
            queued: None,
            row_limit,
            done: false,
            stats: SourceStats::default(),
        })
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    pub fn into_stats(self) -> SourceStats {
        self.stats
    }

    /// Read rows until one yields at least one pair.
    fn next_row(&mut self) -> Option<NamePair> {
        loop {
            if self.done {
                return None;
            }
            if self.row_limit.is_some_and(|limit| self.stats.rows_read >= limit) {
                self.done = true;
                return None;
            }

            match self.reader.read_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Ok(true) => {}
                Err(e) => {
                    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                        log::error!("input read failed: {e}");
                        self.stats.read_error = Some(e.to_string());
                        self.done = true;
                        return None;
                    }
                    self.stats.rows_read += 1;
                    self.stats.rows_skipped += 1;
                    log::warn!("skipping undecodable row: {e}");
                    continue;
                }
            }

            self.stats.rows_read += 1;
            let line = self.record.position().map_or(0, |p| p.line());

            if self.record.len() > self.header_len {
                self.stats.rows_skipped += 1;
                log::warn!(
                    "line {line}: {} fields, header has {}; row skipped",
                    self.record.len(),
                    self.header_len
                );
                continue;
            }

            let roles = self.roles;
            let [first, last] = roles.map(|cols| self.role_pair(cols, line));
            match (first, last) {
                (Some(first), last) => {
                    self.queued = last;
                    return Some(first);
                }
                (None, Some(last)) => return Some(last),
                (None, None) => continue,
            }
        }
    }

    fn role_pair(&mut self, cols: RoleColumns, line: u64) -> Option<NamePair> {
        let first = cols.first.and_then(|i| cell(&self.record, i));
        let last = cols.last.and_then(|i| cell(&self.record, i));
        let pair = match (first, last) {
            (Some(first), Some(last)) => NamePair::new(first, last),
            _ => None,
        };
        if pair.is_none() {
            self.stats.roles_skipped += 1;
            log::debug!("line {line}: {} author name missing, skipped", cols.role.label());
        }
        pair
    }
}

impl Iterator for RecordSource {
    type Item = NamePair;

    fn next(&mut self) -> Option<NamePair> {
        let pair = self.queued.take().or_else(|| self.next_row())?;
        self.stats.pairs += 1;
        Some(pair)
    }
}

/// Trimmed cell value, `None` for blank or null-marker cells
fn cell(record: &csv::StringRecord, idx: usize) -> Option<&str> {
    let value = record.get(idx)?.trim();
    if value.is_empty() || NULL_MARKERS.iter().any(|m| value.eq_ignore_ascii_case(m)) {
        None
    } else {
        Some(value)
    }
}
