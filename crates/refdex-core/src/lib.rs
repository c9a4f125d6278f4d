//! Refdex Core - Common infrastructure for bibliographic ingestion pipelines
//!
//! This crate provides the source-agnostic pieces: byte streams over files and
//! stdin with optional gzip, cancellation, retry with backoff, a work queue for
//! parallel workers, logging and progress reporting.

pub mod cancel;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod stream;
pub mod work_queue;

// Re-exports for convenience
pub use cancel::{CancelFlag, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{BackoffPolicy, retry_with_backoff};
pub use stream::{ByteCounter, ByteStream, CountingReader, open_file, open_reader};
pub use work_queue::WorkQueue;
