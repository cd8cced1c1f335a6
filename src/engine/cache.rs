//! Per-instance judgment cache.
//!
//! An instance left pending keeps showing up in every poll window. The
//! cache remembers what was decided about it so re-polling does not repeat
//! attachment downloads and model calls, and so a failed decide call can be
//! retried next cycle without re-judging.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(24 * 3600);
/// Inserting past this size triggers an expired-entry sweep.
const CLEANUP_THRESHOLD: usize = 500;

/// Outcome of judging one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judgment {
    Approve { comment: String },
    Reject { comment: String },
    /// Instance was commented and left for a human; later cycles skip it.
    Pend { comment: String },
}

struct Entry {
    judgment: Judgment,
    created_at: Instant,
}

pub struct JudgmentCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for JudgmentCache {
    fn default() -> Self {
        Self::with_ttl(TTL)
    }
}

impl JudgmentCache {
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    #[must_use]
    pub fn get(&self, instance_code: &str) -> Option<Judgment> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get(instance_code) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                Some(entry.judgment.clone())
            }
            Some(_) => {
                entries.remove(instance_code);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, instance_code: &str, judgment: Judgment) {
        if instance_code.is_empty() {
            return;
        }
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            instance_code.to_string(),
            Entry {
                judgment,
                created_at: Instant::now(),
            },
        );
        if entries.len() > CLEANUP_THRESHOLD {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
