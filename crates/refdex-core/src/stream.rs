//! Byte streams over local files and stdin with optional gzip decompression.
//!
//! Every stream is wrapped in a [`CountingReader`] below the decompression
//! layer, so the counter reports compressed bytes consumed, the same unit as
//! the file length used for progress bars.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::MultiGzDecoder;

/// Buffer size for decoded stream readers (256KB)
const STREAM_BUF_SIZE: usize = 256 * 1024;

/// Buffered, decompressed byte stream handed to decoders
pub type ByteStream = Box<dyn BufRead + Send>;

/// Shared byte counter for progress tracking
pub type ByteCounter = Arc<AtomicU64>;

/// Wrap a raw reader: count bytes → optional gunzip → buffer.
///
/// With `gzip` set, the gzip header is parsed eagerly so a stream that is not
/// gzip fails here rather than on the first record.
pub fn open_reader<R>(raw: R, gzip: bool) -> io::Result<(ByteStream, ByteCounter)>
where
    R: Read + Send + 'static,
{
    let counter = Arc::new(AtomicU64::new(0));
    let counting = CountingReader {
        inner: raw,
        count: counter.clone(),
    };

    let stream: ByteStream = if gzip {
        let mut buf = BufReader::with_capacity(STREAM_BUF_SIZE, MultiGzDecoder::new(counting));
        buf.fill_buf()
            .map_err(|e| io::Error::new(e.kind(), format!("gzip: {e}")))?;
        Box::new(buf)
    } else {
        Box::new(BufReader::with_capacity(STREAM_BUF_SIZE, counting))
    };

    Ok((stream, counter))
}

/// Open a file as a byte stream.
///
/// Returns (stream, byte_counter, file_length)
pub fn open_file(path: &Path, gzip: bool) -> io::Result<(ByteStream, ByteCounter, Option<u64>)> {
    let file = File::open(path)?;
    let len = file.metadata().ok().map(|m| m.len());
    let (stream, counter) = open_reader(file, gzip)?;
    Ok((stream, counter, len))
}

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: ByteCounter,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
