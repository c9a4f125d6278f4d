use std::io::BufRead;

use serde::Deserialize;

use super::{ClassifyError, peek_significant};
use crate::source::Format;

/// Key that marks the enveloped shape
pub(crate) const ENVELOPE_KEY: &str = "items";

/// Detect the wire shape from the first two JSON tokens.
///
/// Enveloped JSON when the second token is the string `"items"`, NDJSON
/// otherwise. Consumes the tokens it looks at; reopen the source to decode.
pub fn classify<R: BufRead>(reader: &mut R) -> Result<Format, ClassifyError> {
    let first = peek_significant(reader)?.ok_or(ClassifyError::Empty)?;
    match first {
        b'{' | b'[' => reader.consume(1),
        b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => return Ok(Format::Ndjson),
        other => return Err(ClassifyError::NotJson(other)),
    }

    match peek_significant(reader)? {
        None => Err(ClassifyError::Truncated),
        Some(b'"') => {
            let mut de = serde_json::Deserializer::from_reader(&mut *reader);
            let key = String::deserialize(&mut de).map_err(ClassifyError::Json)?;
            Ok(if key == ENVELOPE_KEY {
                Format::Json
            } else {
                Format::Ndjson
            })
        }
        Some(_) => Ok(Format::Ndjson),
    }
}
