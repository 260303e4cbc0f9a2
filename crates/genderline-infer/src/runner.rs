//! Pipeline orchestration: source → dedup → bounded workers → single sink.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::Context;
use genderline_core::{SharedProgress, ShutdownFlag, fmt_num};
use indicatif::ProgressBar;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::backend::ChatBackend;
use crate::config::Config;
use crate::dedup::{Admission, PendingSet};
use crate::sink::{ErrorFlag, SinkMessage, TsvSink};
use crate::source::RecordSource;
use crate::stats::RunSummary;
use crate::types::NamePair;
use crate::worker;

/// Non-TTY progress line interval
const LOG_EVERY: usize = 100;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Seeding,
    Dispatching,
    Draining,
    Done,
}

/// What a worker task reports back to the dispatch loop
#[derive(Debug)]
enum Outcome {
    /// Result handed to the sink
    Queued,
    /// Backend call failed; no row for this author
    BackendFailed,
    /// Sink stopped accepting rows
    SinkClosed,
}

/// One run of the inference pipeline.
///
/// Owns everything the run shares (configuration, backend, progress and the
/// shutdown flag) for exactly the lifetime of the run.
pub struct Pipeline<B: ChatBackend> {
    config: Config,
    backend: Arc<B>,
    progress: SharedProgress,
    shutdown: ShutdownFlag,
    state: PipelineState,
}

impl<B: ChatBackend> Pipeline<B> {
    pub fn new(
        config: Config,
        backend: Arc<B>,
        progress: SharedProgress,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            backend,
            progress,
            shutdown,
            state: PipelineState::Init,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run to completion (or until shutdown is requested).
    ///
    /// Per-author failures are counted in the summary; only configuration,
    /// input and sink failures are errors.
    pub async fn run(&mut self) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        let config = self.config.clone();
        let mut summary = RunSummary::default();

        // INIT
        config.limits.validate()?;
        let source = RecordSource::open(&config.input, &config.columns, config.row_limit)?;
        log::info!(
            "Reading {} -> {} (models={}, parallel={}, queue={})",
            config.input.display(),
            config.output.display(),
            config.limits.max_loaded_models,
            config.limits.num_parallel,
            config.limits.max_queue
        );

        // SEEDING
        self.transition(PipelineState::Seeding);
        let mut pending = if config.resume {
            PendingSet::seed(&config.output)
                .with_context(|| format!("Cannot read {} to resume", config.output.display()))?
        } else {
            ensure_fresh_output(&config.output)?;
            PendingSet::new()
        };
        summary.seeded = pending.seeded();

        let sink = TsvSink::open(&config.output)
            .with_context(|| format!("Cannot open {}", config.output.display()))?;
        let (sink_tx, sink_rx) = mpsc::channel(config.limits.max_queue);
        let error_flag = ErrorFlag::default();
        let sink_handle = sink
            .spawn(sink_rx, error_flag.clone())
            .context("Failed to spawn sink thread")?;

        // Reads happen off the executor; the bounded channel throttles them
        let (pair_tx, mut pair_rx) = mpsc::channel::<NamePair>(config.limits.max_queue);
        let reader = tokio::task::spawn_blocking(move || {
            let mut source = source;
            for pair in source.by_ref() {
                if pair_tx.blocking_send(pair).is_err() {
                    break;
                }
            }
            source.into_stats()
        });

        // DISPATCHING
        self.transition(PipelineState::Dispatching);
        let controller = config.limits.controller();
        let bar = self.progress.counter_bar("authors");
        let mut tally = Tally::new(bar.clone(), self.progress.is_tty());
        let mut workers: JoinSet<Outcome> = JoinSet::new();

        loop {
            if self.shutdown.is_requested() {
                log::warn!(
                    "Shutdown requested, waiting for {} in-flight requests",
                    workers.len()
                );
                summary.interrupted = true;
                break;
            }
            if error_flag.load(Ordering::Relaxed) {
                log::error!("Sink failed, stopping dispatch");
                break;
            }
            while let Some(joined) = workers.try_join_next() {
                tally.record(joined, &mut summary);
            }

            let Some(pair) = pair_rx.recv().await else {
                break;
            };
            match pending.admit(pair.key()) {
                Admission::New => {}
                Admission::AlreadyWritten => {
                    summary.already_written += 1;
                    continue;
                }
                Admission::Duplicate => {
                    log::debug!("{}: duplicate, skipped", pair.key());
                    summary.duplicates += 1;
                    continue;
                }
            }

            // Waiting here is the backpressure on the source
            let permit = controller
                .acquire()
                .await
                .context("Concurrency limits closed during dispatch")?;
            // A stop may have arrived while parked in recv or acquire
            if self.shutdown.is_requested() {
                drop(permit);
                log::warn!("Shutdown requested, {} not dispatched", pair.key());
                summary.interrupted = true;
                break;
            }
            let backend = Arc::clone(&self.backend);
            let sink_tx = sink_tx.clone();
            workers.spawn(async move {
                let outcome = worker::infer(backend.as_ref(), &pair).await;
                drop(permit);
                match outcome {
                    Ok(result) => match sink_tx.send(SinkMessage::Row(result)).await {
                        Ok(()) => Outcome::Queued,
                        Err(_) => Outcome::SinkClosed,
                    },
                    Err(e) => {
                        log::warn!("{}: backend call failed: {e}", pair.key());
                        Outcome::BackendFailed
                    }
                }
            });
            summary.dispatched += 1;
            bar.inc_length(1);
        }
        // Unblocks the reader if dispatch stopped early
        drop(pair_rx);

        // DRAINING
        self.transition(PipelineState::Draining);
        while let Some(joined) = workers.join_next().await {
            tally.record(joined, &mut summary);
        }
        // Fails only if the sink already stopped; its join reports why
        let _ = sink_tx.send(SinkMessage::EndOfStream).await;
        drop(sink_tx);

        let sink_stats = match tokio::task::spawn_blocking(move || sink_handle.join()).await {
            Ok(Ok(result)) => {
                result.with_context(|| format!("Writing {}", config.output.display()))?
            }
            Ok(Err(_)) => anyhow::bail!("Sink thread panicked"),
            Err(e) => return Err(e).context("Failed to join sink thread"),
        };
        summary.absorb_sink(sink_stats);
        summary.source = reader.await.context("Record reader task failed")?;
        bar.finish();

        summary.elapsed = started.elapsed();
        self.transition(PipelineState::Done);

        if let Some(e) = &summary.source.read_error {
            summary.log();
            anyhow::bail!("Reading {} stopped early: {e}", config.input.display());
        }
        Ok(summary)
    }
}

/// Without `--continue`, appending to a previous run's rows would mix runs
fn ensure_fresh_output(output: &std::path::Path) -> anyhow::Result<()> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => anyhow::bail!(
            "{} already exists; pass --continue to resume it or choose another --output",
            output.display()
        ),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Cannot inspect {}", output.display())),
    }
}

/// Completion counting shared by the dispatch and drain phases
struct Tally {
    bar: ProgressBar,
    is_tty: bool,
    completed: usize,
}

impl Tally {
    fn new(bar: ProgressBar, is_tty: bool) -> Self {
        Self {
            bar,
            is_tty,
            completed: 0,
        }
    }

    fn record(&mut self, joined: Result<Outcome, JoinError>, summary: &mut RunSummary) {
        match joined {
            Ok(Outcome::Queued) => {}
            Ok(Outcome::BackendFailed) => summary.backend_failures += 1,
            Ok(Outcome::SinkClosed) => log::debug!("result dropped, sink closed"),
            Err(e) if e.is_panic() => {
                log::error!("Worker panicked: {e}");
                summary.worker_panics += 1;
            }
            Err(e) => log::warn!("Worker cancelled: {e}"),
        }
        self.completed += 1;
        self.bar.inc(1);
        if !self.is_tty && self.completed % LOG_EVERY == 0 {
            log::info!(
                "{} / {} authors done",
                fmt_num(self.completed),
                fmt_num(summary.dispatched)
            );
        }
    }
}
