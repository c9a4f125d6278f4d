//! Raw Crossref record → simplified, search-ready projection
//!
//! Every function here is pure and infallible: missing data degrades to an
//! empty string, an empty list or year `0`.

use serde::Serialize;

use crate::schema::{DateParts, RawRecord};

/// Flattened record sent to the index.
///
/// Field names match the index mapping in [`crate::engine::settings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimplifiedRecord {
    pub title: Vec<String>,
    #[serde(rename = "DOI")]
    pub doi: String,
    pub first_page: String,
    pub journal: Vec<String>,
    pub abbreviated_journal: Vec<String>,
    pub volume: String,
    pub issue: String,
    pub year: i32,
    pub bibliographic: String,
}

impl From<&RawRecord> for SimplifiedRecord {
    fn from(raw: &RawRecord) -> Self {
        Self {
            title: title(raw),
            doi: raw.doi.clone(),
            first_page: first_page(raw).to_string(),
            journal: raw.container_title.clone(),
            abbreviated_journal: raw.short_container_titles().to_vec(),
            volume: raw.volume.clone().unwrap_or_default(),
            issue: raw.issue.clone().unwrap_or_default(),
            year: year(raw),
            bibliographic: bibliographic(raw),
        }
    }
}

impl From<RawRecord> for SimplifiedRecord {
    fn from(raw: RawRecord) -> Self {
        Self::from(&raw)
    }
}

impl SimplifiedRecord {
    /// Document ID in the index: the DOI, when the record has one
    pub fn document_id(&self) -> Option<&str> {
        Some(self.doi.as_str()).filter(|doi| !doi.is_empty())
    }
}

/// Titles with line breaks and runs of whitespace collapsed, trimmed.
///
/// A record without titles yields a single empty title.
pub fn title(raw: &RawRecord) -> Vec<String> {
    if raw.title.is_empty() {
        return vec![String::new()];
    }
    raw.title.iter().map(|t| collapse_whitespace(t)).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Family names of all authors in listed order, one space after each author
/// (so an author without a family name leaves a double space), trimmed.
///
/// Falls back to the family name of the `sequence: "first"` author, then to
/// the first listed author.
pub fn author_label(raw: &RawRecord) -> String {
    let joined = raw
        .author
        .iter()
        .map(|a| a.family.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ");
    let joined = joined.trim();
    if !joined.is_empty() {
        return joined.to_string();
    }

    let first_in_sequence = raw
        .author
        .iter()
        .find(|a| a.sequence.as_deref() == Some("first"))
        .and_then(|a| a.family.as_deref())
        .filter(|f| !f.is_empty());
    if let Some(family) = first_in_sequence {
        return family.to_string();
    }

    raw.author
        .first()
        .and_then(|a| a.family.clone())
        .unwrap_or_default()
}

/// First token of the page field, split on comma, hyphen or whitespace
pub fn first_page(raw: &RawRecord) -> &str {
    raw.page
        .as_deref()
        .and_then(|p| {
            p.split(|c: char| c == ',' || c == '-' || c.is_whitespace())
                .next()
        })
        .unwrap_or("")
}

/// Publication year: first of issued, published-online, published-print,
/// created that carries a year; `0` when none does.
pub fn year(raw: &RawRecord) -> i32 {
    [
        &raw.issued,
        &raw.published_online,
        &raw.published_print,
        &raw.created,
    ]
    .into_iter()
    .find_map(|d| d.as_ref().and_then(DateParts::year))
    .unwrap_or(0)
}

/// Composite citation string used for fuzzy reference matching.
///
/// Fixed field order: authors, first title, journal, abbreviated journal,
/// volume, issue, first page, year.
pub fn bibliographic(raw: &RawRecord) -> String {
    let titles = title(raw);
    let parts = [
        author_label(raw),
        titles.into_iter().next().unwrap_or_default(),
        raw.container_title.join(" "),
        raw.short_container_titles().join(" "),
        raw.volume.clone().unwrap_or_default(),
        raw.issue.clone().unwrap_or_default(),
        first_page(raw).to_string(),
        year(raw).to_string(),
    ];
    parts.join(" ").trim().to_string()
}
