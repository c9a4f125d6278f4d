use std::io::BufRead;

use serde::Deserialize;
use serde::de::Error as _;

use super::classify::ENVELOPE_KEY;
use super::{DecodeError, peek_significant};
use crate::schema::RawRecord;
use crate::source::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    Draining,
    Done,
    Failed,
}

/// Lazy, one-shot iterator over the records of one stream.
///
/// The first decode failure is yielded once, tagged with the element index,
/// and the iterator is fused afterwards: nothing is skipped and no partial
/// record is produced.
pub struct RecordReader<R> {
    reader: R,
    format: Format,
    state: State,
    /// Elements decoded so far; index of the next one
    index: usize,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R, format: Format) -> Self {
        Self {
            reader,
            format,
            state: State::Unstarted,
            index: 0,
        }
    }

    /// Records yielded so far
    pub fn records_read(&self) -> usize {
        self.index
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Consume `{`, `"items"`, `:` and `[`
    fn open_envelope(&mut self) -> Result<(), serde_json::Error> {
        self.expect_byte(b'{', "`{`")?;
        match peek_significant(&mut self.reader).map_err(serde_json::Error::io)? {
            Some(b'"') => {}
            _ => return Err(structural(format!("expected key {ENVELOPE_KEY:?}"))),
        }
        let key = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            String::deserialize(&mut de)?
        };
        if key != ENVELOPE_KEY {
            return Err(structural(format!(
                "expected key {ENVELOPE_KEY:?}, found {key:?}"
            )));
        }
        self.expect_byte(b':', "`:`")?;
        self.expect_byte(b'[', "`[`")
    }

    fn expect_byte(&mut self, want: u8, what: &str) -> Result<(), serde_json::Error> {
        match peek_significant(&mut self.reader).map_err(serde_json::Error::io)? {
            Some(b) if b == want => {
                self.reader.consume(1);
                Ok(())
            }
            Some(b) => Err(structural(format!(
                "expected {what}, found `{}`",
                char::from(b)
            ))),
            None => Err(structural(format!("expected {what}, found end of input"))),
        }
    }

    /// Next array element of the enveloped shape, `None` at `]`
    fn next_enveloped(&mut self) -> Result<Option<RawRecord>, serde_json::Error> {
        let next = peek_significant(&mut self.reader).map_err(serde_json::Error::io)?;
        match next {
            None => return Err(structural("unterminated items array".to_string())),
            Some(b']') => {
                self.reader.consume(1);
                return Ok(None);
            }
            Some(b',') if self.index > 0 => self.reader.consume(1),
            Some(b) if self.index > 0 => {
                return Err(structural(format!(
                    "expected `,` or `]`, found `{}`",
                    char::from(b)
                )));
            }
            Some(_) => {}
        }
        self.decode_one().map(Some)
    }

    /// Next top-level value of the NDJSON shape, `None` at end of input
    fn next_ndjson(&mut self) -> Result<Option<RawRecord>, serde_json::Error> {
        match peek_significant(&mut self.reader).map_err(serde_json::Error::io)? {
            None => Ok(None),
            Some(_) => self.decode_one().map(Some),
        }
    }

    fn decode_one(&mut self) -> Result<RawRecord, serde_json::Error> {
        // Structs also deserialize from arrays; only objects are records.
        match peek_significant(&mut self.reader).map_err(serde_json::Error::io)? {
            Some(b'{') => {}
            Some(b) => {
                return Err(structural(format!(
                    "expected `{{`, found `{}`",
                    char::from(b)
                )));
            }
            None => return Err(structural("expected `{`, found end of input".to_string())),
        }
        // Objects end at their closing brace, so the deserializer never
        // reads past the element.
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        RawRecord::deserialize(&mut de)
    }

    fn fail(&mut self, cause: serde_json::Error) -> Option<Result<RawRecord, DecodeError>> {
        self.state = State::Failed;
        Some(Err(DecodeError {
            index: self.index,
            cause,
        }))
    }
}

fn structural(msg: String) -> serde_json::Error {
    serde_json::Error::custom(msg)
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<RawRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Unstarted {
            let opened = match self.format {
                Format::Json => self.open_envelope(),
                Format::Ndjson => Ok(()),
                Format::Unknown => Err(structural("format not classified".to_string())),
            };
            if let Err(cause) = opened {
                return self.fail(cause);
            }
            self.state = State::Draining;
        }
        if self.state != State::Draining {
            return None;
        }

        let next = match self.format {
            Format::Json => self.next_enveloped(),
            _ => self.next_ndjson(),
        };
        match next {
            Ok(Some(record)) => {
                self.index += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(cause) => self.fail(cause),
        }
    }
}

impl<R: BufRead> std::iter::FusedIterator for RecordReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use refdex_core::open_reader;

    fn reader(s: &str, format: Format) -> RecordReader<Cursor<Vec<u8>>> {
        RecordReader::new(Cursor::new(s.as_bytes().to_vec()), format)
    }

    fn dois<R: BufRead>(r: RecordReader<R>) -> Vec<String> {
        r.map(|rec| rec.unwrap().doi).collect()
    }

    fn ndjson_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("{{\"DOI\": \"10.1/{i}\", \"title\": [\"Title {i}\"]}}\n"))
            .collect()
    }

    #[test]
    fn enveloped_in_order() {
        let r = reader(
            r#"{"items": [{"DOI": "a"}, {"DOI": "b"}, {"DOI": "c"}]}"#,
            Format::Json,
        );
        assert_eq!(dois(r), ["a", "b", "c"]);
    }

    #[test]
    fn enveloped_pretty_printed() {
        let r = reader(
            "{\n  \"items\" : [\n    {\"DOI\": \"a\"} ,\n    {\"DOI\": \"b\"}\n  ],\n  \"total\": 2\n}\n",
            Format::Json,
        );
        assert_eq!(dois(r), ["a", "b"]);
    }

    #[test]
    fn enveloped_empty() {
        let mut r = reader(r#"{"items": []}"#, Format::Json);
        assert!(r.next().is_none());
        assert_eq!(r.records_read(), 0);
    }

    #[test]
    fn enveloped_wrong_key() {
        let mut r = reader(r#"{"message": {"items": []}}"#, Format::Json);
        let err = r.next().unwrap().unwrap_err();
        assert_eq!(err.index, 0);
        assert!(err.cause.to_string().contains("items"));
        assert!(r.next().is_none());
    }

    #[test]
    fn enveloped_missing_comma() {
        let mut r = reader(r#"{"items": [{"DOI": "a"} {"DOI": "b"}]}"#, Format::Json);
        assert_eq!(r.next().unwrap().unwrap().doi, "a");
        let err = r.next().unwrap().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(r.next().is_none());
    }

    #[test]
    fn enveloped_unterminated() {
        let mut r = reader(r#"{"items": [{"DOI": "a"},"#, Format::Json);
        assert_eq!(r.next().unwrap().unwrap().doi, "a");
        assert_eq!(r.next().unwrap().unwrap_err().index, 1);
        assert!(r.next().is_none());
    }

    #[test]
    fn ndjson_in_order() {
        let r = reader(&ndjson_lines(5), Format::Ndjson);
        assert_eq!(dois(r), ["10.1/0", "10.1/1", "10.1/2", "10.1/3", "10.1/4"]);
    }

    #[test]
    fn ndjson_blank_lines_and_no_trailing_newline() {
        let r = reader("\n{\"DOI\": \"a\"}\n\n\n{\"DOI\": \"b\"}", Format::Ndjson);
        assert_eq!(dois(r), ["a", "b"]);
    }

    #[test]
    fn ndjson_empty() {
        assert!(reader("", Format::Ndjson).next().is_none());
        assert!(reader("\n \n", Format::Ndjson).next().is_none());
    }

    #[test]
    fn malformed_element_stops_the_stream() {
        let data = "{\"DOI\": \"a\"}\n{\"DOI\": \"b\", oops}\n{\"DOI\": \"c\"}\n";
        let mut r = reader(data, Format::Ndjson);
        assert_eq!(r.next().unwrap().unwrap().doi, "a");
        let err = r.next().unwrap().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(err.cause.is_syntax());
        assert!(r.next().is_none());
        assert!(r.next().is_none());
        assert_eq!(r.records_read(), 1);
    }

    #[test]
    fn wrong_field_type_is_decode_error() {
        let mut r = reader("{\"DOI\": 42}\n", Format::Ndjson);
        let err = r.next().unwrap().unwrap_err();
        assert_eq!(err.index, 0);
        assert!(err.cause.is_data());
    }

    #[test]
    fn array_element_is_not_a_record() {
        let mut r = reader("[]\n{\"DOI\": \"a\"}\n", Format::Ndjson);
        let err = r.next().unwrap().unwrap_err();
        assert_eq!(err.index, 0);
        assert!(err.cause.to_string().contains("expected `{`"), "{}", err.cause);
        assert!(r.next().is_none());

        let mut r = reader(r#"{"items": [{"DOI": "a"}, ["10.1/x"]]}"#, Format::Json);
        assert_eq!(r.next().unwrap().unwrap().doi, "a");
        assert_eq!(r.next().unwrap().unwrap_err().index, 1);
        assert!(r.next().is_none());
    }

    #[test]
    fn scalar_line_is_not_a_record() {
        let mut r = reader("{\"DOI\": \"a\"}\n\"10.1/b\"\n", Format::Ndjson);
        assert_eq!(r.next().unwrap().unwrap().doi, "a");
        assert_eq!(r.next().unwrap().unwrap_err().index, 1);
    }

    #[test]
    fn unknown_format_fails() {
        let mut r = reader("{}", Format::Unknown);
        assert!(r.next().unwrap().is_err());
        assert!(r.next().is_none());
    }

    #[test]
    fn gzip_matches_plain() {
        let plain = ndjson_lines(50);
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(plain.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();

        let (stream, counter) = open_reader(Cursor::new(gz.clone()), true).unwrap();
        let from_gzip = dois(RecordReader::new(stream, Format::Ndjson));
        let from_plain = dois(reader(&plain, Format::Ndjson));
        assert_eq!(from_gzip.len(), 50);
        assert_eq!(from_gzip, from_plain);
        assert_eq!(
            counter.load(std::sync::atomic::Ordering::Relaxed),
            gz.len() as u64
        );
    }
}
