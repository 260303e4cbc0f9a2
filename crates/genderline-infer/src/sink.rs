//! Result sink: the only writer of the output file.
//!
//! Runs on a dedicated thread, draining a bounded channel fed by every
//! worker. One writer means rows can never interleave.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc::Receiver;

use crate::types::{GenderCounts, InferenceResult};

/// Output header, one column per `InferenceResult` field
pub const HEADER: [&str; 4] = ["first_name", "last_name", "gender", "reasoning"];

/// Shared error flag, set by the sink when a write fails
pub type ErrorFlag = Arc<AtomicBool>;

/// Messages accepted by the sink
#[derive(Debug)]
pub enum SinkMessage {
    Row(InferenceResult),
    /// No more rows will be sent; flush and stop
    EndOfStream,
}

#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    pub rows_written: usize,
    pub genders: GenderCounts,
}

/// Append-only TSV writer
pub struct TsvSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    stats: SinkStats,
}

impl std::fmt::Debug for TsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsvSink")
            .field("path", &self.path)
            .field("rows_written", &self.stats.rows_written)
            .finish_non_exhaustive()
    }
}

impl TsvSink {
    /// Open `path` for appending, writing the header if the file is empty.
    ///
    /// A last line without its newline (killed run, failed flush) is cut off
    /// so new rows never join onto it.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let complete = complete_len(&mut file)?;
        if complete < len {
            log::warn!(
                "{}: dropping {} bytes of an unfinished last row",
                path.display(),
                len - complete
            );
            file.set_len(complete)?;
        }
        let needs_header = complete == 0;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(HEADER)?;
            writer.flush()?;
            log::debug!("Created {} with header", path.display());
        } else {
            log::debug!("Appending to {}", path.display());
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            stats: SinkStats::default(),
        })
    }

    /// Append one row and flush it to disk
    pub fn write(&mut self, result: &InferenceResult) -> io::Result<()> {
        let first_name = clean_field(&result.first_name);
        let last_name = clean_field(&result.last_name);
        let reasoning = clean_field(&result.reasoning);
        self.writer.write_record([
            &*first_name,
            &*last_name,
            result.gender.as_str(),
            &*reasoning,
        ])?;
        self.writer.flush()?;
        self.stats.rows_written += 1;
        self.stats.genders.add(result.gender);
        Ok(())
    }

    /// Drain `rx` until the end-of-stream marker or until every sender is gone.
    ///
    /// On a write failure the error flag is raised so producers stop early.
    pub fn run(
        mut self,
        mut rx: Receiver<SinkMessage>,
        error_flag: ErrorFlag,
    ) -> io::Result<SinkStats> {
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                SinkMessage::Row(result) => {
                    if let Err(e) = self.write(&result) {
                        error_flag.store(true, Ordering::Relaxed);
                        log::error!("{}: write failed: {e}", self.path.display());
                        return Err(e);
                    }
                }
                SinkMessage::EndOfStream => break,
            }
        }
        self.writer.flush()?;
        log::debug!(
            "{}: sink closed after {} rows",
            self.path.display(),
            self.stats.rows_written
        );
        Ok(self.stats)
    }

    /// Move the sink onto its own thread
    pub fn spawn(
        self,
        rx: Receiver<SinkMessage>,
        error_flag: ErrorFlag,
    ) -> io::Result<JoinHandle<io::Result<SinkStats>>> {
        std::thread::Builder::new()
            .name("tsv-sink".into())
            .spawn(move || self.run(rx, error_flag))
    }
}

/// Reader for files written by [`TsvSink`] (same dialect)
pub(crate) fn tsv_reader(file: File) -> csv::Reader<File> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .flexible(true)
        .from_reader(file)
}

/// Length of `file` up to and including its last newline (0 if none)
pub(crate) fn complete_len(file: &mut File) -> io::Result<u64> {
    let mut end = file.metadata()?.len();
    let mut buf = [0u8; 8192];
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(i) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// Tabs and line breaks would split a row; replace them with spaces
fn clean_field(value: &str) -> Cow<'_, str> {
    if value.contains(['\t', '\r', '\n']) {
        Cow::Owned(value.replace(['\t', '\r', '\n'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
