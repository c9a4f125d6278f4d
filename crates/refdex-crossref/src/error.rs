//! Pipeline error types

use std::fmt;
use std::io;

use crate::decode::ClassifyError;
use crate::sink::SinkError;

/// Error raised while loading, decoding or delivering records.
///
/// Per-document rejections from the engine are counted, never raised.
#[derive(Debug)]
pub enum IngestError {
    /// Invalid designator or missing declaration, detected before any I/O
    Config(String),
    /// Open, directory walk or decompression failure
    Io { source: String, cause: io::Error },
    /// Element `index` of `source` could not be decoded
    Decode {
        source: String,
        index: usize,
        cause: serde_json::Error,
    },
    /// Wire shape could not be determined
    Classify { source: String, cause: ClassifyError },
    /// Fatal delivery failure
    Sink(SinkError),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io(source: impl Into<String>, cause: io::Error) -> Self {
        Self::Io {
            source: source.into(),
            cause,
        }
    }

    /// Identity of the source the error belongs to, if any
    pub fn source_label(&self) -> Option<&str> {
        match self {
            Self::Io { source, .. } | Self::Decode { source, .. } | Self::Classify { source, .. } => {
                Some(source)
            }
            Self::Config(_) | Self::Sink(_) => None,
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io { source, cause } => write!(f, "{source}: IO: {cause}"),
            Self::Decode {
                source,
                index,
                cause,
            } => write!(f, "{source}: record {index}: {cause}"),
            Self::Classify { source, cause } => write!(f, "{source}: classify: {cause}"),
            Self::Sink(e) => write!(f, "sink: {e}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Io { cause, .. } => Some(cause),
            Self::Decode { cause, .. } => Some(cause),
            Self::Classify { cause, .. } => Some(cause),
            Self::Sink(e) => Some(e),
        }
    }
}

impl From<SinkError> for IngestError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

/// Failed pipeline run: the first error observed plus everything after it
#[derive(Debug)]
pub struct PipelineError {
    pub headline: IngestError,
    pub secondary: Vec<IngestError>,
}

impl PipelineError {
    /// Build from errors in observation order; `None` when there are none
    pub fn from_errors(errors: Vec<IngestError>) -> Option<Self> {
        let mut iter = errors.into_iter();
        let headline = iter.next()?;
        Some(Self {
            headline,
            secondary: iter.collect(),
        })
    }

    /// All errors, headline first
    pub fn iter(&self) -> impl Iterator<Item = &IngestError> {
        std::iter::once(&self.headline).chain(&self.secondary)
    }

    pub fn len(&self) -> usize {
        1 + self.secondary.len()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.headline)?;
        if !self.secondary.is_empty() {
            write!(f, " (+{} more:", self.secondary.len())?;
            for e in &self.secondary {
                write!(f, " [{e}]")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.headline)
    }
}
