//! Elasticsearch-compatible HTTP engine.
//!
//! Uses async reqwest internally on a small shared runtime, but presents a
//! blocking interface for the sink's flush threads.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    BulkDoc, CreateOutcome, DeleteOutcome, EngineError, IndexEngine, IndexSettings, ItemResult,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response excerpt kept in error messages
const MAX_MESSAGE_LEN: usize = 512;

/// Shared tokio runtime for engine requests.
static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("refdex-http")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Connection settings
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URLs, used round-robin
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM file with an additional trusted CA
    pub ca_cert: Option<PathBuf>,
    /// Gzip request bodies
    pub compress: bool,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["http://127.0.0.1:9200".to_string()],
            username: None,
            password: None,
            ca_cert: None,
            compress: false,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct ElasticEngine {
    client: reqwest::Client,
    hosts: Vec<String>,
    next_host: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
    compress: bool,
}

impl std::fmt::Debug for ElasticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticEngine")
            .field("hosts", &self.hosts)
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

impl ElasticEngine {
    pub fn new(config: &ElasticConfig) -> Result<Self, EngineError> {
        let hosts: Vec<String> = config
            .hosts
            .iter()
            .map(|h| h.trim().trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(EngineError::Setup("no hosts configured".into()));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .pool_max_idle_per_host(8);
        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                EngineError::Setup(format!("CA certificate {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                EngineError::Setup(format!("CA certificate {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::Setup(format!("HTTP client: {e}")))?;

        log::debug!("Elasticsearch hosts: {hosts:?}");
        Ok(Self {
            client,
            hosts,
            next_host: AtomicUsize::new(0),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone().filter(|p| !p.is_empty()),
            compress: config.compress,
        })
    }

    fn next_host(&self) -> &str {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[i]
    }

    /// Send one request, returning status and body
    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(Vec<u8>, &'static str)>,
    ) -> Result<(StatusCode, Vec<u8>), EngineError> {
        let url = format!("{}/{path}", self.next_host());
        let mut request = self.client.request(method, &url);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }
        if let Some((bytes, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type);
            if self.compress {
                request = request
                    .header(CONTENT_ENCODING, "gzip")
                    .body(gzip(&bytes).map_err(|e| EngineError::Setup(format!("gzip: {e}")))?);
            } else {
                request = request.body(bytes);
            }
        }

        SHARED_RUNTIME.handle().block_on(async {
            let response = request.send().await.map_err(|e| transport(&e))?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(|e| transport(&e))?;
            Ok::<_, EngineError>((status, bytes.to_vec()))
        })
    }
}

impl IndexEngine for ElasticEngine {
    fn bulk_write(&self, index: &str, docs: &[BulkDoc]) -> Result<Vec<ItemResult>, EngineError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body = bulk_body(docs).map_err(|e| EngineError::Response(e.to_string()))?;
        let (status, bytes) = self.send(
            Method::POST,
            &format!("{index}/_bulk"),
            Some((body, "application/x-ndjson")),
        )?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        parse_bulk_response(&bytes, docs.len())
    }

    fn create_index(
        &self,
        name: &str,
        settings: &IndexSettings,
    ) -> Result<CreateOutcome, EngineError> {
        let body = settings
            .to_json()
            .map_err(|e| EngineError::Setup(format!("index settings: {e}")))?;
        let (status, bytes) = self.send(Method::PUT, name, Some((body, "application/json")))?;
        if status.is_success() {
            log::debug!("Created index {name}");
            return Ok(CreateOutcome::Created);
        }
        let reason = ErrorBody::parse(&bytes);
        if status == StatusCode::BAD_REQUEST && reason.already_exists() {
            log::debug!("Index {name} already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(status_error(status, &bytes))
    }

    fn delete_index(&self, name: &str) -> Result<DeleteOutcome, EngineError> {
        let (status, bytes) = self.send(Method::DELETE, name, None)?;
        if status.is_success() {
            log::debug!("Deleted index {name}");
            Ok(DeleteOutcome::Deleted)
        } else if status == StatusCode::NOT_FOUND {
            log::debug!("Index {name} did not exist");
            Ok(DeleteOutcome::NotFound)
        } else {
            Err(status_error(status, &bytes))
        }
    }
}

fn transport(e: &reqwest::Error) -> EngineError {
    EngineError::Transport {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> EngineError {
    let parsed = ErrorBody::parse(body);
    let message = match parsed.reason {
        Some(reason) => reason,
        None => excerpt(body),
    };
    EngineError::Transport {
        status: Some(status.as_u16()),
        message,
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), flate2::Compression::fast());
    enc.write_all(bytes)?;
    enc.finish()
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkActionMeta<'a>,
}

#[derive(Serialize)]
struct BulkActionMeta<'a> {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// NDJSON `_bulk` body: an index action line followed by the document
pub(crate) fn bulk_body(docs: &[BulkDoc]) -> Result<Vec<u8>, serde_json::Error> {
    let size: usize = docs.iter().map(|d| d.body.len() + 64).sum();
    let mut out = Vec::with_capacity(size);
    for doc in docs {
        let action = BulkAction {
            index: BulkActionMeta {
                id: doc.id.as_deref(),
            },
        };
        serde_json::to_writer(&mut out, &action)?;
        out.push(b'\n');
        out.extend_from_slice(&doc.body);
        out.push(b'\n');
    }
    Ok(out)
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<ErrorCause>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorCause {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl ErrorCause {
    fn describe(&self) -> String {
        match (&self.kind, &self.reason) {
            (Some(k), Some(r)) => format!("{k}: {r}"),
            (Some(s), None) | (None, Some(s)) => s.clone(),
            (None, None) => "rejected".to_string(),
        }
    }
}

/// Per-item results of a `_bulk` response, in request order
pub(crate) fn parse_bulk_response(
    body: &[u8],
    expected: usize,
) -> Result<Vec<ItemResult>, EngineError> {
    let response: BulkResponse = serde_json::from_slice(body)
        .map_err(|e| EngineError::Response(format!("bulk response: {e}")))?;
    if response.items.len() != expected {
        return Err(EngineError::Response(format!(
            "bulk response has {} items for {expected} documents",
            response.items.len()
        )));
    }
    response
        .items
        .into_iter()
        .map(|item| {
            let item = item
                .into_values()
                .next()
                .ok_or_else(|| EngineError::Response("empty bulk item".into()))?;
            Ok(ItemResult {
                id: item.id,
                status: item.status,
                error: item.error.map(|e| e.describe()),
            })
        })
        .collect()
}

/// `{"error": {"type": ..., "reason": ...}, "status": ...}`
#[derive(Debug, Default)]
struct ErrorBody {
    kind: Option<String>,
    reason: Option<String>,
}

impl ErrorBody {
    fn parse(body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: ErrorField,
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ErrorField {
            Cause(ErrorCause),
            Text(String),
        }

        match serde_json::from_slice::<Envelope>(body) {
            Ok(Envelope {
                error: ErrorField::Cause(c),
            }) => Self {
                reason: c.reason.clone().or_else(|| c.kind.clone()),
                kind: c.kind,
            },
            Ok(Envelope {
                error: ErrorField::Text(t),
            }) => Self {
                kind: None,
                reason: Some(t),
            },
            Err(_) => Self::default(),
        }
    }

    fn already_exists(&self) -> bool {
        self.kind.as_deref() == Some("resource_already_exists_exception")
            || self
                .reason
                .as_deref()
                .is_some_and(|r| r.contains("already exists"))
    }
}
