//! Wire-shape classification and streaming record decoding
//!
//! Both shapes are decoded lazily, one element at a time, straight from the
//! (decompressed) byte stream:
//!
//! - enveloped JSON: `{"items": [ {...}, {...} ]}`
//! - NDJSON: whitespace-separated top-level objects

mod classify;
mod reader;

pub use classify::classify;
pub use reader::RecordReader;

use std::fmt;
use std::io::{self, BufRead};
use std::path::Path;

use refdex_core::{ByteCounter, ByteStream, open_file};

use crate::error::IngestError;
use crate::source::{Compression, DataSource, Format};

/// Element `index` of a stream could not be decoded
#[derive(Debug)]
pub struct DecodeError {
    pub index: usize,
    pub cause: serde_json::Error,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.index, self.cause)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl DecodeError {
    /// Attach the source label. Read failures underneath the parser (corrupt
    /// gzip, truncated file) become I/O errors.
    pub fn into_ingest(self, source: impl Into<String>) -> IngestError {
        if self.cause.is_io() {
            IngestError::io(source, io::Error::from(self.cause))
        } else {
            IngestError::Decode {
                source: source.into(),
                index: self.index,
                cause: self.cause,
            }
        }
    }
}

/// Why the wire shape could not be determined
#[derive(Debug)]
pub enum ClassifyError {
    /// No JSON token at all
    Empty,
    /// Input ends right after the first token
    Truncated,
    /// First significant byte cannot start a JSON value
    NotJson(u8),
    Json(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty input"),
            Self::Truncated => write!(f, "input ends after the first token"),
            Self::NotJson(b) => write!(f, "not JSON: unexpected byte 0x{b:02x}"),
            Self::Json(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for ClassifyError {}

impl From<io::Error> for ClassifyError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// A source opened for decoding
pub struct OpenedSource {
    pub label: String,
    pub format: Format,
    pub records: RecordReader<ByteStream>,
    /// Raw (compressed) bytes consumed so far
    pub bytes_read: ByteCounter,
    /// Raw length, when the source is a file
    pub total_bytes: Option<u64>,
}

/// Resolve the format of `source` and open its record iterator.
///
/// A file of unknown format is opened once for classification and then
/// reopened from the start for decoding. Streams must declare their format.
pub fn open_source(source: DataSource) -> Result<OpenedSource, IngestError> {
    let label = source.label();
    let format = match (source.format, source.path()) {
        (Format::Unknown, Some(path)) => classify_file(path, source.compression, &label)?,
        (Format::Unknown, None) => {
            return Err(IngestError::config(format!(
                "{label}: format must be declared for a stream"
            )));
        }
        (declared, _) => declared,
    };
    if source.compression == Compression::Unknown {
        return Err(IngestError::config(format!(
            "{label}: compression is not resolved"
        )));
    }

    let (stream, bytes_read, total_bytes) = source.open()?;
    log::debug!("{label}: decoding as {format}");
    Ok(OpenedSource {
        label,
        format,
        records: RecordReader::new(stream, format),
        bytes_read,
        total_bytes,
    })
}

fn classify_file(path: &Path, compression: Compression, label: &str) -> Result<Format, IngestError> {
    let (mut stream, _, _) = open_file(path, compression == Compression::Gzip)
        .map_err(|e| IngestError::io(label, e))?;
    let format = classify(&mut stream).map_err(|cause| match cause {
        ClassifyError::Io(e) => IngestError::io(label, e),
        cause => IngestError::Classify {
            source: label.to_string(),
            cause,
        },
    })?;
    log::debug!("{label}: classified as {format}");
    Ok(format)
}

/// Skip JSON whitespace and return the next byte without consuming it
pub(crate) fn peek_significant<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        let (skip, found) = {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(None);
            }
            match buf
                .iter()
                .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
            {
                Some(pos) => (pos, Some(buf[pos])),
                None => (buf.len(), None),
            }
        };
        reader.consume(skip);
        if found.is_some() {
            return Ok(found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};

    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    #[test]
    fn peek_skips_whitespace_across_buffers() {
        let data = b"   \n\t\r  x".to_vec();
        let mut reader = io::BufReader::with_capacity(2, Cursor::new(data));
        assert_eq!(peek_significant(&mut reader).unwrap(), Some(b'x'));
        // not consumed
        assert_eq!(peek_significant(&mut reader).unwrap(), Some(b'x'));
    }

    #[test]
    fn peek_eof() {
        let mut reader = Cursor::new(b"  \n".to_vec());
        assert_eq!(peek_significant(&mut reader).unwrap(), None);
    }

    #[test]
    fn open_source_classifies_gzip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.json.gz");
        let mut enc = GzEncoder::new(Vec::new(), GzLevel::default());
        enc.write_all(br#"{"items": [{"DOI": "10.1/a"}, {"DOI": "10.1/b"}]}"#)
            .unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let src = DataSource::file(&path, Format::Unknown, Compression::Unknown);
        let opened = open_source(src).unwrap();
        assert_eq!(opened.format, Format::Json);
        assert!(opened.total_bytes.is_some());
        let dois: Vec<_> = opened.records.map(|r| r.unwrap().doi).collect();
        assert_eq!(dois, ["10.1/a", "10.1/b"]);
    }

    #[test]
    fn open_source_empty_file_is_classify_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "").unwrap();
        let src = DataSource::file(&path, Format::Unknown, Compression::Unknown);
        assert!(matches!(
            open_source(src),
            Err(IngestError::Classify {
                cause: ClassifyError::Empty,
                ..
            })
        ));
    }

    #[test]
    fn open_source_declared_format_skips_classification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ndjson");
        std::fs::write(&path, "{\"DOI\": \"x\"}\n").unwrap();
        let src = DataSource::file(&path, Format::Ndjson, Compression::None);
        let opened = open_source(src).unwrap();
        assert_eq!(opened.format, Format::Ndjson);
        assert_eq!(opened.records.count(), 1);
    }

    /// Yields its data, then fails like a corrupt compressed stream
    struct FailingReader(Cursor<Vec<u8>>);

    impl io::Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt deflate stream")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn read_failure_surfaces_as_io() {
        let data = b"{\"DOI\": \"a\"}\n{\"DOI\": \"b\", \"ti".to_vec();
        let reader = io::BufReader::new(FailingReader(Cursor::new(data)));
        let mut records = RecordReader::new(reader, Format::Ndjson);
        assert_eq!(records.next().unwrap().unwrap().doi, "a");
        let err = records.next().unwrap().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.into_ingest("bad.json.gz"), IngestError::Io { .. }));
        assert!(records.next().is_none());
    }

    #[test]
    fn decode_error_keeps_index() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = DecodeError { index: 3, cause }.into_ingest("x.ndjson");
        assert!(matches!(err, IngestError::Decode { index: 3, .. }));
    }
}
