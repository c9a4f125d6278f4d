//! Refdex Crossref - Crossref works dump indexing pipeline
//!
//! This crate decodes Crossref metadata dumps (enveloped JSON or NDJSON,
//! optionally gzip-compressed) from files, directory trees or stdin, projects
//! each work onto a flat search record and bulk-loads the records into an
//! Elasticsearch-compatible index.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use refdex_core::ProgressContext;
//! use refdex_crossref::{
//!     Compression, Designator, ElasticConfig, ElasticEngine, Format, PipelineConfig, enumerate,
//!     run,
//! };
//!
//! let sources = enumerate(
//!     Designator::Dir("/data/crossref".into()),
//!     Format::Unknown,
//!     Compression::Unknown,
//! )
//! .expect("bad input");
//! let engine = Arc::new(ElasticEngine::new(&ElasticConfig::default()).expect("bad engine config"));
//! let progress = Arc::new(ProgressContext::new());
//! let result = run(sources, &PipelineConfig::default(), engine, &progress);
//! println!("Indexed {} records", result.records_indexed);
//! ```

pub mod decode;
pub mod engine;
pub mod error;
pub mod runner;
pub mod schema;
pub mod sink;
pub mod source;
pub mod stats;
pub mod transform;
pub mod worker;

// Re-exports for convenience
pub use engine::{ElasticConfig, ElasticEngine, IndexEngine, IndexSettings, MemoryEngine};
pub use error::{IngestError, PipelineError};
pub use runner::{PipelineConfig, run};
pub use sink::{BulkSink, SinkConfig};
pub use source::{Compression, DataSource, Designator, Format, enumerate, load};
pub use stats::PipelineResult;
pub use transform::SimplifiedRecord;
