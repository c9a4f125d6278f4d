//! Crossref work record as found in metadata dumps and API responses
//!
//! Only the wire shape lives here; derived fields are in [`crate::transform`].
//! Optional scalars are `Option<T>`, lists default to empty (`null` included),
//! and unknown fields are ignored so that schema additions upstream do not
//! break decoding.

use serde::{Deserialize, Deserializer};

/// Accept `null` wherever a defaulted value is expected
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Crossref work JSON structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawRecord {
    /// Digital Object Identifier, without resolver prefix
    #[serde(rename = "DOI", default)]
    pub doi: String,

    #[serde(rename = "URL", default)]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub title: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub subtitle: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub original_title: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub short_title: Vec<String>,

    /// Journal / book / proceedings names
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_title: Vec<String>,

    /// Abbreviated journal names. Absent in older dumps.
    #[serde(default)]
    pub short_container_title: Option<Vec<String>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub author: Vec<Author>,

    #[serde(default)]
    pub publisher: Option<String>,

    /// Work type (journal-article, book-chapter, ...)
    #[serde(rename = "type", default)]
    pub work_type: Option<String>,

    #[serde(default)]
    pub volume: Option<String>,

    #[serde(default)]
    pub issue: Option<String>,

    /// Page range as printed, e.g. "123-130" or "e1234"
    #[serde(default)]
    pub page: Option<String>,

    #[serde(rename = "ISSN", default, deserialize_with = "null_as_default")]
    pub issn: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub issn_type: Vec<IssnType>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: Vec<String>,

    #[serde(default)]
    pub language: Option<String>,

    /// JATS-formatted abstract
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub is_referenced_by_count: Option<u64>,

    #[serde(default)]
    pub reference_count: Option<u64>,

    #[serde(default)]
    pub references_count: Option<u64>,

    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    // Dates
    #[serde(default)]
    pub issued: Option<DateParts>,

    #[serde(default)]
    pub published: Option<DateParts>,

    #[serde(default)]
    pub published_online: Option<DateParts>,

    #[serde(default)]
    pub published_print: Option<DateParts>,

    #[serde(default)]
    pub published_other: Option<DateParts>,

    /// Deposit date at Crossref
    #[serde(default)]
    pub created: Option<DateParts>,

    #[serde(default)]
    pub deposited: Option<DateParts>,

    #[serde(default)]
    pub indexed: Option<DateParts>,

    #[serde(default)]
    pub journal_issue: Option<JournalIssue>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub license: Vec<License>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub link: Vec<Link>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub alternative_id: Vec<String>,

    #[serde(default)]
    pub update_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub given: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    /// Organisation name for corporate authors
    #[serde(default)]
    pub name: Option<String>,
    /// "first" or "additional"
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(rename = "ORCID", default)]
    pub orcid: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub affiliation: Vec<Affiliation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Affiliation {
    #[serde(default)]
    pub name: Option<String>,
}

/// Crossref partial date: `{"date-parts": [[2021, 3, 14]]}`.
///
/// Inner parts may be `null` in real data (`[[null]]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DateParts {
    #[serde(default, deserialize_with = "null_as_default")]
    pub date_parts: Vec<Vec<Option<i32>>>,
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl DateParts {
    /// Year of the first date, if it carries one
    pub fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssnType {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub issn_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JournalIssue {
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub published_online: Option<DateParts>,
    #[serde(default)]
    pub published_print: Option<DateParts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct License {
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(default)]
    pub start: Option<DateParts>,
    #[serde(default)]
    pub delay_in_days: Option<i64>,
    #[serde(default)]
    pub content_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Link {
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_version: Option<String>,
    #[serde(default)]
    pub intended_application: Option<String>,
}

impl RawRecord {
    /// Abbreviated container titles, empty when the field is absent
    pub fn short_container_titles(&self) -> &[String] {
        self.short_container_title.as_deref().unwrap_or_default()
    }
}
