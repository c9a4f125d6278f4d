//! Input discovery: file, directory tree or stdin → ordered list of sources

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use refdex_core::{ByteCounter, ByteStream, open_file, open_reader};

use crate::error::IngestError;

/// Extensions picked up when walking a directory
const ACCEPTED_EXTENSIONS: &[&str] = &["json", "ndjson", "gz", "gzip"];

/// Label used for stdin-backed sources
pub const STDIN_LABEL: &str = "<stdin>";

/// Wire shape of the decompressed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `{"items": [ {...}, {...} ]}`
    Json,
    /// One JSON object per line
    Ndjson,
    /// Classified from the content before decoding
    #[default]
    Unknown,
}

/// Compression of the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    Gzip,
    /// Inferred from the file extension
    #[default]
    Unknown,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Ndjson => "ndjson",
            Self::Unknown => "unknown",
        }
    }
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Unknown => "unknown",
        }
    }

    /// Infer from a file extension: `.gz`/`.gzip` → gzip, anything else → none
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz" | "gzip") => Self::Gzip,
            _ => Self::None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(IngestError::config(format!("unknown format {other:?}"))),
        }
    }
}

impl FromStr for Compression {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(IngestError::config(format!("unknown compression {other:?}"))),
        }
    }
}

/// Where a source's bytes come from
pub enum Origin {
    /// Reopenable file
    Path(PathBuf),
    /// Single-use stream, usually stdin
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

/// One unit of input handed to a decode worker
#[derive(Debug)]
pub struct DataSource {
    pub origin: Origin,
    pub format: Format,
    pub compression: Compression,
}

impl DataSource {
    /// File-backed source. Undeclared compression is taken from the extension.
    pub fn file(path: impl Into<PathBuf>, format: Format, compression: Compression) -> Self {
        let path = path.into();
        let compression = match compression {
            Compression::Unknown => Compression::from_path(&path),
            declared => declared,
        };
        Self {
            origin: Origin::Path(path),
            format,
            compression,
        }
    }

    /// Stream-backed source; a stream is read once, so nothing may be left
    /// to inference.
    pub fn stream(
        reader: Box<dyn Read + Send>,
        format: Format,
        compression: Compression,
    ) -> Result<Self, IngestError> {
        if format == Format::Unknown {
            return Err(IngestError::config(
                "format must be declared when reading from stdin",
            ));
        }
        if compression == Compression::Unknown {
            return Err(IngestError::config(
                "compression must be declared when reading from stdin",
            ));
        }
        Ok(Self {
            origin: Origin::Stream(reader),
            format,
            compression,
        })
    }

    /// Source identity for logs and errors
    pub fn label(&self) -> String {
        match &self.origin {
            Origin::Path(p) => p.display().to_string(),
            Origin::Stream(_) => STDIN_LABEL.to_string(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Path(p) => Some(p),
            Origin::Stream(_) => None,
        }
    }

    /// Open the decompressed byte stream.
    ///
    /// Returns the stream, a counter of raw bytes consumed, and the raw length
    /// when known. A stream origin can be opened only once.
    pub fn open(self) -> Result<(ByteStream, ByteCounter, Option<u64>), IngestError> {
        let label = self.label();
        let gzip = self.compression == Compression::Gzip;
        match self.origin {
            Origin::Path(path) => open_file(&path, gzip).map_err(|e| IngestError::io(label, e)),
            Origin::Stream(reader) => open_reader(reader, gzip)
                .map(|(stream, counter)| (stream, counter, None))
                .map_err(|e| IngestError::io(label, e)),
        }
    }
}

/// What to ingest
pub enum Designator {
    /// Single file; `-` reads stdin
    Path(PathBuf),
    /// Every accepted file below a directory
    Dir(PathBuf),
    Stdin(Box<dyn Read + Send>),
}

impl fmt::Debug for Designator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Dir(p) => f.debug_tuple("Dir").field(p).finish(),
            Self::Stdin(_) => f.debug_tuple("Stdin").finish_non_exhaustive(),
        }
    }
}

/// Resolve a designator into sources.
///
/// Declared format and compression apply to every source; `Unknown` leaves
/// each file to inference. Directory results are sorted by path.
pub fn enumerate(
    designator: Designator,
    format: Format,
    compression: Compression,
) -> Result<Vec<DataSource>, IngestError> {
    match designator {
        Designator::Path(path) if path.as_os_str() == "-" => Ok(vec![DataSource::stream(
            Box::new(std::io::stdin()),
            format,
            compression,
        )?]),
        Designator::Path(path) => Ok(vec![DataSource::file(path, format, compression)]),
        Designator::Stdin(reader) => Ok(vec![DataSource::stream(reader, format, compression)?]),
        Designator::Dir(dir) => {
            let files = list_files(&dir)?;
            log::debug!("{} input files under {}", files.len(), dir.display());
            Ok(files
                .into_iter()
                .map(|p| DataSource::file(p, format, compression))
                .collect())
        }
    }
}

/// Load sources from the command-line shape: a file (`-` for `stdin`) or a
/// directory. The file takes precedence when both are given.
pub fn load(
    path: Option<&Path>,
    dir: Option<&Path>,
    format: Format,
    compression: Compression,
    stdin: Box<dyn Read + Send>,
) -> Result<Vec<DataSource>, IngestError> {
    let designator = match (path, dir) {
        (Some(p), _) if p.as_os_str() == "-" => Designator::Stdin(stdin),
        (Some(p), _) => Designator::Path(p.to_path_buf()),
        (None, Some(d)) => Designator::Dir(d.to_path_buf()),
        (None, None) => {
            return Err(IngestError::config("either a file or a directory is required"));
        }
    };
    enumerate(designator, format, compression)
}

/// Recursively list regular files with an accepted extension, sorted
fn list_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let label = dir.display().to_string();
    if !dir.is_dir() {
        return Err(IngestError::io(
            label,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let root = dir
        .to_str()
        .ok_or_else(|| IngestError::config(format!("non UTF-8 directory path: {label}")))?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root.trim_end_matches('/')));
    let entries = glob::glob(&pattern)
        .map_err(|e| IngestError::config(format!("invalid directory pattern: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let failed = e.path().display().to_string();
            IngestError::io(failed, e.into_error())
        })?;
        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ACCEPTED_EXTENSIONS.contains(&e));
        if accepted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
