//! In-process engine for tests and dry runs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{
    BulkDoc, CreateOutcome, DeleteOutcome, EngineError, IndexEngine, IndexSettings, ItemResult,
};

type RejectFn = Box<dyn Fn(&BulkDoc) -> bool + Send + Sync>;

/// Engine keeping documents in memory.
///
/// Failures can be injected: whole bulk requests failing with a status, and
/// per-document rejections.
#[derive(Default)]
pub struct MemoryEngine {
    documents: Mutex<BTreeMap<String, Vec<BulkDoc>>>,
    counts: Mutex<BTreeMap<String, usize>>,
    indices: Mutex<BTreeSet<String>>,
    batch_sizes: Mutex<Vec<usize>>,
    bulk_calls: AtomicUsize,
    /// Bulk requests left to fail before succeeding; `usize::MAX` fails forever
    failures_left: AtomicUsize,
    failure_status: Option<u16>,
    reject: Option<RejectFn>,
    latency: Duration,
    discard: bool,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("bulk_calls", &self.bulk_calls())
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count documents without keeping them (dry runs over full dumps)
    pub fn discarding() -> Self {
        Self {
            discard: true,
            ..Self::default()
        }
    }

    /// Fail the first `n` bulk requests with `status` (`None`: connection error)
    pub fn with_failures(mut self, n: usize, status: Option<u16>) -> Self {
        self.failures_left = AtomicUsize::new(n);
        self.failure_status = status;
        self
    }

    /// Fail every bulk request with `status`
    pub fn always_failing(self, status: Option<u16>) -> Self {
        self.with_failures(usize::MAX, status)
    }

    /// Reject documents matching `predicate` with status 400
    pub fn rejecting(mut self, predicate: impl Fn(&BulkDoc) -> bool + Send + Sync + 'static) -> Self {
        self.reject = Some(Box::new(predicate));
        self
    }

    /// Sleep this long in every bulk request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Documents accepted into `index`, in arrival order
    pub fn documents(&self, index: &str) -> Vec<BulkDoc> {
        self.documents
            .lock()
            .expect("memory engine poisoned")
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Accepted documents in `index` (counted even when discarding)
    pub fn doc_count(&self, index: &str) -> usize {
        self.counts
            .lock()
            .expect("memory engine poisoned")
            .get(index)
            .copied()
            .unwrap_or(0)
    }

    /// Number of bulk requests received, failed ones included
    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::Relaxed)
    }

    /// Size of every successful bulk request, in completion order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().expect("memory engine poisoned").clone()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.lock().expect("memory engine poisoned").contains(name)
    }

    /// Consume one injected failure, if any are left
    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl IndexEngine for MemoryEngine {
    fn bulk_write(&self, index: &str, docs: &[BulkDoc]) -> Result<Vec<ItemResult>, EngineError> {
        self.bulk_calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.take_failure() {
            return Err(EngineError::Transport {
                status: self.failure_status,
                message: "injected failure".into(),
            });
        }

        let mut results = Vec::with_capacity(docs.len());
        let mut accepted = Vec::new();
        let mut count = 0;
        for doc in docs {
            if self.reject.as_ref().is_some_and(|reject| reject(doc)) {
                results.push(ItemResult {
                    id: doc.id.clone(),
                    status: 400,
                    error: Some("mapper_parsing_exception: injected rejection".into()),
                });
            } else {
                results.push(ItemResult::ok(doc.id.clone()));
                count += 1;
                if !self.discard {
                    accepted.push(doc.clone());
                }
            }
        }

        self.batch_sizes
            .lock()
            .expect("memory engine poisoned")
            .push(docs.len());
        *self
            .counts
            .lock()
            .expect("memory engine poisoned")
            .entry(index.to_string())
            .or_default() += count;
        if !accepted.is_empty() {
            self.documents
                .lock()
                .expect("memory engine poisoned")
                .entry(index.to_string())
                .or_default()
                .extend(accepted);
        }
        Ok(results)
    }

    fn create_index(
        &self,
        name: &str,
        _settings: &IndexSettings,
    ) -> Result<CreateOutcome, EngineError> {
        if self.indices.lock().expect("memory engine poisoned").insert(name.to_string()) {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    fn delete_index(&self, name: &str) -> Result<DeleteOutcome, EngineError> {
        let existed = self.indices.lock().expect("memory engine poisoned").remove(name);
        self.documents
            .lock()
            .expect("memory engine poisoned")
            .remove(name);
        self.counts.lock().expect("memory engine poisoned").remove(name);
        if existed {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(n: usize) -> Vec<BulkDoc> {
        (0..n)
            .map(|i| BulkDoc {
                id: Some(format!("10.1/{i}")),
                body: format!("{{\"n\":{i}}}").into_bytes(),
            })
            .collect()
    }

    #[test]
    fn stores_documents() {
        let engine = MemoryEngine::new();
        let results = engine.bulk_write("crossref", &docs(3)).unwrap();
        assert!(results.iter().all(ItemResult::is_success));
        assert_eq!(engine.doc_count("crossref"), 3);
        assert_eq!(engine.documents("crossref")[2].id.as_deref(), Some("10.1/2"));
        assert_eq!(engine.batch_sizes(), [3]);
        assert_eq!(engine.doc_count("other"), 0);
    }

    #[test]
    fn injected_failures_then_success() {
        let engine = MemoryEngine::new().with_failures(2, Some(503));
        for _ in 0..2 {
            let err = engine.bulk_write("i", &docs(1)).unwrap_err();
            assert_eq!(err.status(), Some(503));
        }
        assert!(engine.bulk_write("i", &docs(1)).is_ok());
        assert_eq!(engine.bulk_calls(), 3);
        assert_eq!(engine.doc_count("i"), 1);
    }

    #[test]
    fn always_failing() {
        let engine = MemoryEngine::new().always_failing(None);
        for _ in 0..5 {
            assert!(engine.bulk_write("i", &docs(1)).is_err());
        }
        assert_eq!(engine.doc_count("i"), 0);
    }

    #[test]
    fn rejections_are_per_item() {
        let engine = MemoryEngine::new().rejecting(|d| d.id.as_deref() == Some("10.1/1"));
        let results = engine.bulk_write("i", &docs(3)).unwrap();
        assert_eq!(
            results.iter().map(ItemResult::is_success).collect::<Vec<_>>(),
            [true, false, true]
        );
        assert_eq!(engine.doc_count("i"), 2);
    }

    #[test]
    fn discarding_counts_only() {
        let engine = MemoryEngine::discarding().rejecting(|d| d.id.as_deref() == Some("10.1/0"));
        for _ in 0..10 {
            engine.bulk_write("i", &docs(1_000)).unwrap();
        }
        assert_eq!(engine.doc_count("i"), 9_990);
        assert!(engine.documents("i").is_empty());
        engine.delete_index("i").unwrap();
        assert_eq!(engine.doc_count("i"), 0);
    }

    #[test]
    fn index_lifecycle() {
        let engine = MemoryEngine::new();
        let settings = IndexSettings::default();
        assert_eq!(engine.create_index("i", &settings).unwrap(), CreateOutcome::Created);
        assert_eq!(
            engine.create_index("i", &settings).unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert!(engine.has_index("i"));
        assert_eq!(engine.delete_index("i").unwrap(), DeleteOutcome::Deleted);
        assert_eq!(engine.delete_index("i").unwrap(), DeleteOutcome::NotFound);
    }
}
