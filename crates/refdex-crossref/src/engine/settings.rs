//! Index settings and mappings for simplified records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of a create-index request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub settings: Settings,
    pub mappings: Mappings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub index: IndexOptions,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub number_of_replicas: u32,
    /// `"-1"` disables refresh during bulk loading
    pub refresh_interval: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub filter: BTreeMap<String, TokenFilter>,
    #[serde(default)]
    pub analyzer: BTreeMap<String, Analyzer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenFilter {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stopwords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    #[serde(rename = "type")]
    pub kind: String,
    pub tokenizer: String,
    #[serde(default)]
    pub filter: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    pub properties: BTreeMap<String, FieldMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub analyzer: Option<String>,
}

const KEYWORD: &str = "case_insensitive_keyword";
const FOLDING_KEYWORD: &str = "case_insensitive_folding_keyword";
const FOLDING_TEXT: &str = "case_insensitive_folding_text";
const FOLDING_TEXT_STOPWORDS: &str = "case_insensitive_folding_text_stopwords";

fn analyzer(tokenizer: &str, filter: &[&str]) -> Analyzer {
    Analyzer {
        kind: "custom".into(),
        tokenizer: tokenizer.into(),
        filter: filter.iter().map(|f| f.to_string()).collect(),
    }
}

fn text(analyzer: &str) -> FieldMapping {
    FieldMapping {
        kind: "text".into(),
        analyzer: Some(analyzer.into()),
    }
}

impl Default for IndexSettings {
    /// Bulk-load friendly settings: no replicas, refresh disabled, compressed
    /// codec, case- and accent-insensitive text fields.
    fn default() -> Self {
        let filter = BTreeMap::from([(
            "my_stop".to_string(),
            TokenFilter {
                kind: "stop".into(),
                stopwords: Some("_english_".into()),
            },
        )]);
        let analyzer = BTreeMap::from([
            (KEYWORD.to_string(), analyzer("keyword", &["lowercase"])),
            (
                FOLDING_KEYWORD.to_string(),
                analyzer("keyword", &["lowercase", "asciifolding"]),
            ),
            (
                FOLDING_TEXT.to_string(),
                analyzer("standard", &["lowercase", "asciifolding"]),
            ),
            (
                FOLDING_TEXT_STOPWORDS.to_string(),
                analyzer("standard", &["lowercase", "asciifolding", "my_stop"]),
            ),
        ]);
        let properties = [
            ("DOI", KEYWORD),
            ("title", FOLDING_TEXT_STOPWORDS),
            ("first_author", FOLDING_KEYWORD),
            ("author", FOLDING_TEXT),
            ("first_page", FOLDING_KEYWORD),
            ("journal", FOLDING_TEXT_STOPWORDS),
            ("abbreviated_journal", FOLDING_KEYWORD),
            ("volume", FOLDING_KEYWORD),
            ("issue", FOLDING_KEYWORD),
            ("year", FOLDING_KEYWORD),
            ("query", FOLDING_TEXT),
            ("bibliographic", FOLDING_TEXT_STOPWORDS),
        ]
        .into_iter()
        .map(|(field, a)| (field.to_string(), text(a)))
        .collect();

        Self {
            settings: Settings {
                index: IndexOptions {
                    number_of_replicas: 0,
                    refresh_interval: "-1".into(),
                    codec: Some("best_compression".into()),
                },
                analysis: Analysis { filter, analyzer },
            },
            mappings: Mappings { properties },
        }
    }
}

impl IndexSettings {
    /// Parse settings from a JSON document (for a `--settings` override file)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
