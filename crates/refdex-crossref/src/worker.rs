//! Source processing: decode, transform and enqueue one source

use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use refdex_core::{CancelFlag, fmt_num, progress::upgrade_to_bar};

use crate::decode::open_source;
use crate::error::IngestError;
use crate::source::DataSource;
use crate::stats::SourceStats;
use crate::transform::SimplifiedRecord;

/// Records between progress bar updates
const PROGRESS_EVERY: usize = 10_000;

/// A source that ended with an error, with what it decoded before failing
#[derive(Debug)]
pub struct SourceFailure {
    pub stats: SourceStats,
    pub error: IngestError,
}

/// Decode every record of `source` into `tx`, in source order.
///
/// Stops between records once `cancel` is raised or the receiver is gone;
/// both count as cancellation, not failure. The first decode error ends the
/// source and is returned with the source label attached.
pub fn decode_source(
    source: DataSource,
    tx: &SyncSender<SimplifiedRecord>,
    cancel: &CancelFlag,
    pb: &ProgressBar,
) -> Result<SourceStats, SourceFailure> {
    let start = Instant::now();
    let mut stats = SourceStats {
        label: source.label(),
        format: source.format,
        records: 0,
        bytes: 0,
        cancelled: false,
        elapsed: Duration::ZERO,
    };
    let mut opened = match open_source(source) {
        Ok(opened) => opened,
        Err(error) => {
            stats.elapsed = start.elapsed();
            return Err(SourceFailure { stats, error });
        }
    };
    stats.format = opened.format;
    if let Some(total) = opened.total_bytes {
        upgrade_to_bar(pb, total);
    }
    pb.set_message(opened.format.to_string());

    let mut error = None;
    loop {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        let raw = match opened.records.next() {
            None => break,
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                error = Some(e.into_ingest(opened.label.as_str()));
                break;
            }
        };
        if tx.send(SimplifiedRecord::from(raw)).is_err() {
            log::debug!("{}: receiver closed", opened.label);
            stats.cancelled = true;
            break;
        }
        stats.records += 1;
        if stats.records % PROGRESS_EVERY == 0 {
            pb.set_position(opened.bytes_read.load(Ordering::Relaxed));
            pb.set_message(format!("{} records", fmt_num(stats.records)));
        }
    }

    stats.bytes = opened.bytes_read.load(Ordering::Relaxed);
    stats.elapsed = start.elapsed();
    pb.set_position(stats.bytes);
    match error {
        Some(error) => Err(SourceFailure { stats, error }),
        None => Ok(stats),
    }
}
