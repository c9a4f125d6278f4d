//! Work queue handing owned items to parallel workers

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::cancel::CancelFlag;

/// Queue distributing owned items to workers.
///
/// Workers call [`claim()`](WorkQueue::claim) to take the next item together
/// with its position in the original list. Once the cancel flag is raised no
/// further items are handed out; the remainder counts as unscheduled.
pub struct WorkQueue<S> {
    items: Mutex<VecDeque<(usize, S)>>,
    total: usize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        let total = items.len();
        log::debug!("{total} items in work queue");
        Self {
            items: Mutex::new(items.into_iter().enumerate().collect()),
            total,
        }
    }

    /// Take the next item, unless `cancel` has been raised
    pub fn claim(&self, cancel: &CancelFlag) -> Option<(usize, S)> {
        if cancel.is_cancelled() {
            return None;
        }
        self.items
            .lock()
            .expect("work queue poisoned")
            .pop_front()
    }

    /// Total items the queue started with
    pub fn total(&self) -> usize {
        self.total
    }

    /// Items never handed out
    pub fn remaining(&self) -> usize {
        self.items.lock().expect("work queue poisoned").len()
    }
}
