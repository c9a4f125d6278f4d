//! Batching bulk sink with flush workers, linger and retry
//!
//! Documents accumulate into a batch that is handed to a flush worker once it
//! reaches `flush_bytes`, or once its first document is older than
//! `flush_interval`. Flush workers call the engine with retry; per-document
//! rejections are counted and reported, while a request that cannot be
//! completed is fatal for the whole sink.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use refdex_core::{BackoffPolicy, CancelFlag, fmt_num, retry_with_backoff};

use crate::engine::{BulkDoc, EngineError, IndexEngine, ItemResult};
use crate::transform::SimplifiedRecord;

/// Default statuses retried by flush workers
pub const DEFAULT_RETRY_ON_STATUS: &[u16] = &[429, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Flush once the batch holds this many serialized bytes
    pub flush_bytes: usize,
    /// Flush a non-empty batch once its first document is this old
    pub flush_interval: Duration,
    /// Concurrent bulk requests
    pub flush_workers: usize,
    pub retry: BackoffPolicy,
    pub retry_on_status: Vec<u16>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            flush_bytes: 5_000_000,
            flush_interval: Duration::from_secs(10),
            flush_workers: 2,
            retry: BackoffPolicy::default(),
            retry_on_status: DEFAULT_RETRY_ON_STATUS.to_vec(),
        }
    }
}

#[derive(Debug)]
pub enum SinkError {
    /// Bulk request failed after retries, or with a non-retryable error
    Engine(EngineError),
    /// Sink no longer accepts documents
    Closed,
    /// Record could not be serialized
    Encode(serde_json::Error),
    /// Flush worker could not be started or panicked
    Worker(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "bulk request failed: {e}"),
            Self::Closed => write!(f, "sink is closed"),
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Worker(msg) => write!(f, "flush worker: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Closed | Self::Worker(_) => None,
        }
    }
}

impl From<EngineError> for SinkError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Final delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub succeeded: u64,
    pub failed: u64,
    pub flushes: u64,
    pub elapsed: Duration,
}

/// Delivery progress after one completed bulk request
#[derive(Debug, Clone, Copy)]
pub struct FlushProgress {
    /// Succeeded count before this request
    pub previous: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl FlushProgress {
    pub fn docs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Receives per-document outcomes from flush workers
pub trait SinkObserver: Send + Sync {
    fn on_rejected(&self, item: &ItemResult);
    fn on_flush(&self, progress: &FlushProgress);
}

/// Logs rejections at error level and progress every 100k documents below
/// one million, every million above.
#[derive(Debug, Default)]
pub struct LogObserver {
    bar: Option<ProgressBar>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also show running counts on `bar`
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar: Some(bar) }
    }
}

/// Progress step index; increases every 100k below 1M, every 1M above
fn milestone(n: u64) -> u64 {
    if n < 1_000_000 {
        n / 100_000
    } else {
        9 + n / 1_000_000
    }
}

impl SinkObserver for LogObserver {
    fn on_rejected(&self, item: &ItemResult) {
        log::error!(
            "Indexing failed: id={} status={} {}",
            item.id.as_deref().unwrap_or("-"),
            item.status,
            item.error.as_deref().unwrap_or("")
        );
    }

    fn on_flush(&self, p: &FlushProgress) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "{} indexed, {} failed ({:.0} docs/sec)",
                fmt_num(p.succeeded as usize),
                fmt_num(p.failed as usize),
                p.docs_per_sec()
            ));
        }
        if milestone(p.succeeded) <= milestone(p.previous) {
            return;
        }
        if p.failed > 0 {
            log::error!(
                "Indexed [{}] documents with [{}] errors in {:.1}s ({:.0} docs/sec)",
                fmt_num(p.succeeded as usize),
                fmt_num(p.failed as usize),
                p.elapsed.as_secs_f64(),
                p.docs_per_sec()
            );
        } else {
            log::info!(
                "Successfully indexed [{}] documents in {:.1}s ({:.0} docs/sec)",
                fmt_num(p.succeeded as usize),
                p.elapsed.as_secs_f64(),
                p.docs_per_sec()
            );
        }
    }
}

/// State shared between the sink and its flush workers
struct Shared {
    succeeded: AtomicU64,
    failed: AtomicU64,
    flushes: AtomicU64,
    /// First fatal error; later ones are logged and dropped
    fatal: Mutex<Option<SinkError>>,
    failed_at: OnceLock<Instant>,
    cancel: CancelFlag,
    observer: Arc<dyn SinkObserver>,
    started: Instant,
}

impl Shared {
    fn record(&self, items: &[ItemResult]) {
        let mut ok = 0u64;
        let mut rejected = 0u64;
        for item in items {
            if item.is_success() {
                ok += 1;
            } else {
                rejected += 1;
                self.observer.on_rejected(item);
            }
        }
        let previous = self.succeeded.fetch_add(ok, Ordering::Relaxed);
        let failed = self.failed.fetch_add(rejected, Ordering::Relaxed) + rejected;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.observer.on_flush(&FlushProgress {
            previous,
            succeeded: previous + ok,
            failed,
            elapsed: self.started.elapsed(),
        });
    }

    fn set_fatal(&self, err: SinkError) {
        let mut slot = self.fatal.lock().expect("sink state poisoned");
        let _ = self.failed_at.set(Instant::now());
        if slot.is_none() {
            log::error!("Sink failed: {err}");
            *slot = Some(err);
        } else {
            log::debug!("Additional sink failure: {err}");
        }
        self.cancel.cancel();
    }

    fn has_failed(&self) -> bool {
        self.fatal.lock().expect("sink state poisoned").is_some()
    }

    fn take_fatal(&self) -> Option<SinkError> {
        self.fatal.lock().expect("sink state poisoned").take()
    }

    fn report(&self) -> SinkReport {
        SinkReport {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

#[derive(Debug, Default)]
struct Batch {
    docs: Vec<BulkDoc>,
    bytes: usize,
    /// Arrival of the first document; starts the linger clock
    first_at: Option<Instant>,
}

impl Batch {
    fn push(&mut self, doc: BulkDoc) {
        if self.docs.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.bytes += doc.body.len();
        self.docs.push(doc);
    }

    fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn take(&mut self) -> Vec<BulkDoc> {
        self.bytes = 0;
        self.first_at = None;
        std::mem::take(&mut self.docs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    Failed,
    Closed,
}

/// Batching sink in front of an [`IndexEngine`]
pub struct BulkSink {
    config: SinkConfig,
    batch: Batch,
    tx: Option<SyncSender<Vec<BulkDoc>>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    state: State,
}

impl fmt::Debug for BulkSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkSink")
            .field("state", &self.state)
            .field("batch_docs", &self.batch.docs.len())
            .field("batch_bytes", &self.batch.bytes)
            .finish_non_exhaustive()
    }
}

impl BulkSink {
    /// Start `config.flush_workers` flush threads writing into `index`.
    ///
    /// A fatal flush failure raises `cancel`.
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        index: impl Into<String>,
        config: SinkConfig,
        cancel: CancelFlag,
        observer: Arc<dyn SinkObserver>,
    ) -> Result<Self, SinkError> {
        let index = index.into();
        let shared = Arc::new(Shared {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            fatal: Mutex::new(None),
            failed_at: OnceLock::new(),
            cancel,
            observer,
            started: Instant::now(),
        });

        // Rendezvous: a flush blocks until a worker is free
        let (tx, rx) = mpsc::sync_channel::<Vec<BulkDoc>>(0);
        let rx = Arc::new(Mutex::new(rx));
        let n = config.flush_workers.max(1);
        let mut workers = Vec::with_capacity(n);
        for i in 0..n {
            let worker = FlushWorker {
                rx: rx.clone(),
                engine: engine.clone(),
                index: index.clone(),
                retry: config.retry,
                retry_on_status: config.retry_on_status.clone(),
                shared: shared.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("flush-{i}"))
                .spawn(move || worker.run())
                .map_err(|e: io::Error| SinkError::Worker(e.to_string()))?;
            workers.push(handle);
        }
        log::debug!(
            "Sink for {index}: {n} flush workers, flush at {} bytes or {:?}",
            config.flush_bytes,
            config.flush_interval
        );

        Ok(Self {
            config,
            batch: Batch::default(),
            tx: Some(tx),
            workers,
            shared,
            state: State::Accumulating,
        })
    }

    /// Serialize and append a record
    pub fn add(&mut self, record: &SimplifiedRecord) -> Result<(), SinkError> {
        let body = serde_json::to_vec(record).map_err(SinkError::Encode)?;
        self.add_doc(BulkDoc {
            id: record.document_id().map(str::to_string),
            body,
        })
    }

    /// Append a serialized document, flushing at the byte threshold
    pub fn add_doc(&mut self, doc: BulkDoc) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.batch.push(doc);
        if self.batch.bytes >= self.config.flush_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the batch if it has lingered past `flush_interval`.
    ///
    /// Returns whether a flush happened.
    pub fn poll_linger(&mut self) -> Result<bool, SinkError> {
        self.ensure_open()?;
        if self.linger_remaining() == Some(Duration::ZERO) {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Hand the current batch to a flush worker; blocks while all are busy
    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.ensure_open()?;
        if self.batch.is_empty() {
            return Ok(());
        }
        let docs = self.batch.take();
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        if tx.send(docs).is_err() {
            return Err(self.fail(SinkError::Worker("all flush workers exited".into())));
        }
        Ok(())
    }

    /// Flush what is left, wait for in-flight requests and report.
    ///
    /// Returns the fatal error instead if any flush failed.
    pub fn close(&mut self) -> Result<SinkReport, SinkError> {
        match self.state {
            State::Closed | State::Failed => return Err(SinkError::Closed),
            State::Accumulating => {}
        }
        let flushed = self.flush();
        self.state = State::Closed;
        self.join_workers()?;
        flushed?;
        if let Some(err) = self.shared.take_fatal() {
            return Err(err);
        }
        let report = self.shared.report();
        log::debug!(
            "Sink closed: {} succeeded, {} failed, {} flushes in {:.1}s",
            report.succeeded,
            report.failed,
            report.flushes,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Consume records until every sender is gone, flushing on size and
    /// linger, then close.
    ///
    /// On a fatal failure the receiver is dropped, which stops producers.
    pub fn drain(&mut self, rx: Receiver<SimplifiedRecord>) -> Result<SinkReport, SinkError> {
        loop {
            let wait = self
                .linger_remaining()
                .unwrap_or(self.config.flush_interval)
                .max(Duration::from_millis(1));
            match rx.recv_timeout(wait) {
                Ok(record) => self.add(&record)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.poll_linger()?;
        }
        drop(rx);
        self.close()
    }

    /// Counts so far
    pub fn report(&self) -> SinkReport {
        self.shared.report()
    }

    /// When the sink first failed, if it has
    pub fn failed_at(&self) -> Option<Instant> {
        self.shared.failed_at.get().copied()
    }

    /// Time left before the current batch must be flushed; `None` when empty
    fn linger_remaining(&self) -> Option<Duration> {
        let first = self.batch.first_at?;
        Some(self.config.flush_interval.saturating_sub(first.elapsed()))
    }

    fn ensure_open(&mut self) -> Result<(), SinkError> {
        match self.state {
            State::Closed | State::Failed => Err(SinkError::Closed),
            State::Accumulating if self.shared.has_failed() => {
                let err = self.shared.take_fatal().unwrap_or(SinkError::Closed);
                Err(self.fail(err))
            }
            State::Accumulating => Ok(()),
        }
    }

    /// Stop accepting documents and shut the workers down
    fn fail(&mut self, err: SinkError) -> SinkError {
        let _ = self.shared.failed_at.set(Instant::now());
        self.state = State::Failed;
        self.shared.cancel.cancel();
        if let Err(e) = self.join_workers() {
            log::error!("{e}");
        }
        err
    }

    fn join_workers(&mut self) -> Result<(), SinkError> {
        self.tx = None;
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(SinkError::Worker(format!("{panicked} flush workers panicked")));
        }
        Ok(())
    }
}

impl Drop for BulkSink {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if !self.batch.is_empty() {
                log::warn!(
                    "Sink dropped with {} unflushed documents",
                    self.batch.docs.len()
                );
            }
            let _ = self.join_workers();
        }
    }
}

struct FlushWorker {
    rx: Arc<Mutex<Receiver<Vec<BulkDoc>>>>,
    engine: Arc<dyn IndexEngine>,
    index: String,
    retry: BackoffPolicy,
    retry_on_status: Vec<u16>,
    shared: Arc<Shared>,
}

impl FlushWorker {
    fn run(self) {
        loop {
            let next = self.rx.lock().expect("flush queue poisoned").recv();
            let Ok(docs) = next else { break };
            if self.shared.has_failed() {
                log::debug!("Dropping batch of {} after sink failure", docs.len());
                continue;
            }
            let label = format!("bulk {} ({} docs)", self.index, docs.len());
            let result = retry_with_backoff(
                &label,
                &self.retry,
                |e: &EngineError| e.is_retryable(&self.retry_on_status),
                || self.engine.bulk_write(&self.index, &docs),
            );
            match result {
                Ok(items) => self.shared.record(&items),
                Err(e) => self.shared.set_fatal(SinkError::Engine(e)),
            }
        }
    }
}
