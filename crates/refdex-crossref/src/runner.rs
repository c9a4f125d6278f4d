//! Pipeline orchestration: parallel decoding into one batching sink
//!
//! `W` rayon workers claim sources from a [`WorkQueue`] and push transformed
//! records into one bounded channel. The calling thread drains that channel
//! into a [`BulkSink`]. Both branches share a [`CancelFlag`]: the first failure
//! on either side stops the other.

use std::io;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use refdex_core::{CancelFlag, ProgressContext, SharedProgress, WorkQueue, is_shutdown_requested};

use crate::engine::IndexEngine;
use crate::error::{IngestError, PipelineError};
use crate::sink::{BulkSink, LogObserver, SinkConfig, SinkReport};
use crate::source::DataSource;
use crate::stats::{PipelineResult, SourceStats};
use crate::transform::SimplifiedRecord;
use crate::worker::{SourceFailure, decode_source};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sources decoded concurrently
    pub workers: usize,
    /// Records buffered between decoders and the sink
    pub queue_capacity: usize,
    /// Target index
    pub index: String,
    pub sink: SinkConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            index: "crossref".into(),
            sink: SinkConfig::default(),
        }
    }
}

/// What the decode branch produced
#[derive(Debug, Default)]
struct DecodeOutcome {
    finished: Vec<SourceStats>,
    failed: Vec<SourceStats>,
    /// Errors with the time they were observed
    errors: Vec<(Instant, IngestError)>,
}

impl DecodeOutcome {
    fn fail(&mut self, error: IngestError) {
        self.errors.push((Instant::now(), error));
    }
}

/// Index every record of `sources` into `config.index`.
///
/// Never returns early: every thread is joined and the sink closed before the
/// result is built. Errors from both branches are reported in the order they
/// were observed.
pub fn run(
    sources: Vec<DataSource>,
    config: &PipelineConfig,
    engine: Arc<dyn IndexEngine>,
    progress: &SharedProgress,
) -> PipelineResult {
    let start = Instant::now();
    let total = sources.len();
    let workers = config.workers.max(1);
    let cancel = CancelFlag::new();
    if total == 0 {
        log::warn!("No sources to index");
    }
    log::info!(
        "Indexing {total} sources into {} with {workers} workers",
        config.index
    );

    let stage = progress.stage_line("index");
    let observer = Arc::new(LogObserver::with_bar(stage.clone()));
    let mut sink = match BulkSink::new(
        engine,
        config.index.clone(),
        config.sink.clone(),
        cancel.clone(),
        observer,
    ) {
        Ok(sink) => sink,
        Err(e) => {
            stage.finish_and_clear();
            return PipelineResult {
                sources_total: total,
                sources_cancelled: total,
                elapsed: start.elapsed(),
                interrupted: is_shutdown_requested(),
                error: PipelineError::from_errors(vec![e.into()]),
                ..Default::default()
            };
        }
    };

    let queue = WorkQueue::new(sources);
    let (tx, rx) = mpsc::sync_channel::<SimplifiedRecord>(config.queue_capacity.max(1));

    let (outcome, delivered) = std::thread::scope(|s| {
        let queue = &queue;
        let cancel = &cancel;
        let progress: &ProgressContext = progress;
        let decoder = std::thread::Builder::new()
            .name("decode".into())
            .spawn_scoped(s, move || decode_all(queue, tx, workers, cancel, progress));

        let delivered = sink.drain(rx).map_err(|e| {
            let at = sink.failed_at().unwrap_or_else(Instant::now);
            (at, IngestError::Sink(e))
        });

        let outcome = match decoder {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                let mut outcome = DecodeOutcome::default();
                outcome.fail(IngestError::io("decode", io::Error::other("decode pool panicked")));
                outcome
            }),
            Err(e) => {
                let mut outcome = DecodeOutcome::default();
                outcome.fail(IngestError::io("decode", e));
                outcome
            }
        };
        (outcome, delivered)
    });
    stage.finish_and_clear();

    let report = match &delivered {
        Ok(report) => *report,
        Err(_) => sink.report(),
    };
    let result = assemble(total, queue.remaining(), outcome, delivered, report, start);
    if progress.is_tty() {
        result.print();
    } else {
        result.log();
    }
    result
}

/// Run the decode branch; returns once every worker has finished.
///
/// `tx` is dropped on return, so the sink sees the channel close only after
/// the whole pool has joined.
fn decode_all(
    queue: &WorkQueue<DataSource>,
    tx: SyncSender<SimplifiedRecord>,
    workers: usize,
    cancel: &CancelFlag,
    progress: &ProgressContext,
) -> DecodeOutcome {
    let outcome = Mutex::new(DecodeOutcome::default());
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("decode-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            cancel.cancel();
            let mut outcome = outcome.into_inner().unwrap_or_default();
            outcome.fail(IngestError::io("decode", io::Error::other(e)));
            return outcome;
        }
    };

    pool.scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let outcome = &outcome;
            s.spawn(move |_| {
                while let Some((idx, source)) = queue.claim(cancel) {
                    let label = source.label();
                    log::debug!("[{}/{}] {label}", idx + 1, queue.total());
                    let pb = progress.source_bar(&label);
                    let result = decode_source(source, &tx, cancel, &pb);
                    pb.finish_and_clear();
                    let mut outcome = outcome.lock().expect("decode outcome poisoned");
                    match result {
                        Ok(stats) => {
                            if !progress.is_tty() {
                                stats.log();
                            }
                            outcome.finished.push(stats);
                        }
                        Err(SourceFailure { stats, error }) => {
                            if cancel.cancel() {
                                log::error!("{error}; cancelling remaining sources");
                            } else {
                                log::error!("{error}");
                            }
                            outcome.failed.push(stats);
                            outcome.fail(error);
                        }
                    }
                }
            });
        }
    });
    drop(tx);

    outcome.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn assemble(
    total: usize,
    unscheduled: usize,
    outcome: DecodeOutcome,
    delivered: Result<SinkReport, (Instant, IngestError)>,
    report: SinkReport,
    start: Instant,
) -> PipelineResult {
    let DecodeOutcome {
        finished,
        failed,
        mut errors,
    } = outcome;
    if let Err(sink_error) = delivered {
        errors.push(sink_error);
    }
    errors.sort_by_key(|(at, _)| *at);

    let cancelled = finished.iter().filter(|s| s.cancelled).count();
    let records_decoded = finished
        .iter()
        .chain(&failed)
        .map(|s| s.records as u64)
        .sum();

    PipelineResult {
        sources_total: total,
        sources_processed: finished.len() - cancelled,
        sources_failed: failed.len(),
        sources_cancelled: cancelled + unscheduled,
        records_decoded,
        records_indexed: report.succeeded,
        records_failed: report.failed,
        elapsed: start.elapsed(),
        interrupted: is_shutdown_requested(),
        error: PipelineError::from_errors(errors.into_iter().map(|(_, e)| e).collect()),
    }
}
