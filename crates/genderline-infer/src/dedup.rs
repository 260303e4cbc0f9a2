//! Pending set: authors already written or already dispatched in this run.
//!
//! Owned by the dispatch loop alone, so check-and-insert needs no lock.
//! Grows monotonically; there is no removal.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::sink::{HEADER, complete_len, tsv_reader};
use crate::types::AuthorKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Present in the output file before this run started
    Written,
    /// Dispatched during this run
    Dispatched,
}

/// Outcome of offering a key to the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting; caller must dispatch it
    New,
    /// Already has a row from an earlier run
    AlreadyWritten,
    /// Seen earlier in this run
    Duplicate,
}

#[derive(Debug, Default)]
pub struct PendingSet {
    keys: FxHashMap<String, Origin>,
    seeded: usize,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the set from an existing output file.
    ///
    /// A missing or empty file gives an empty set. A header other than
    /// [`HEADER`] is an error. Rows without both name columns are skipped
    /// with a warning, as is an unfinished last line.
    pub fn seed(path: &Path) -> io::Result<Self> {
        let mut set = Self::new();
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{} not found, starting with empty set", path.display());
                return Ok(set);
            }
            Err(e) => return Err(e),
        };
        let complete = complete_len(&mut file)?;
        if complete == 0 {
            log::debug!("{} has no complete lines, starting with empty set", path.display());
            return Ok(set);
        }
        file.seek(SeekFrom::Start(0))?;

        let mut reader = tsv_reader(file);
        let headers = reader.headers()?;
        if !headers.iter().eq(HEADER) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: header {:?} does not match {:?}",
                    path.display(),
                    headers.iter().collect::<Vec<_>>(),
                    HEADER
                ),
            ));
        }

        for (i, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
                Err(e) => {
                    log::warn!("{}: skipping row {}: {e}", path.display(), i + 2);
                    continue;
                }
            };
            if record.position().is_some_and(|pos| pos.byte() >= complete) {
                log::warn!("{}: ignoring unfinished row {}", path.display(), i + 2);
                break;
            }
            match (record.get(0), record.get(1)) {
                (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                    let key = AuthorKey::new(first, last).into_string();
                    if set.keys.insert(key, Origin::Written).is_none() {
                        set.seeded += 1;
                    }
                }
                _ => log::warn!("{}: row {} has no name columns", path.display(), i + 2),
            }
        }
        log::info!(
            "Resuming: {} authors already in {}",
            set.seeded,
            path.display()
        );
        Ok(set)
    }

    pub fn contains(&self, key: &AuthorKey) -> bool {
        self.keys.contains_key(key.as_str())
    }

    /// Atomic check-and-add used before every dispatch
    pub fn admit(&mut self, key: AuthorKey) -> Admission {
        match self.keys.get(key.as_str()) {
            Some(Origin::Written) => Admission::AlreadyWritten,
            Some(Origin::Dispatched) => Admission::Duplicate,
            None => {
                self.keys.insert(key.into_string(), Origin::Dispatched);
                Admission::New
            }
        }
    }

    /// Keys loaded from the output file
    pub fn seeded(&self) -> usize {
        self.seeded
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
