//! Answer cache keyed by the fully-qualified queried name.
//!
//! Entries age out a fixed retention window after their last use. There
//! is no background reaper: the query path calls `sweep` once per inbound
//! message, so memory stays bounded by the names actually queried while
//! an entry may transiently outlive the window between sweeps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hickory_proto::rr::Record;
use parking_lot::Mutex;
use tracing::debug;

/// How long an unused entry stays servable without a fresh tunnel round
/// trip.
pub const RETENTION: Duration = Duration::from_secs(60);

struct CacheEntry {
    records: Vec<Record>,
    last_activity: Instant,
}

#[derive(Default)]
pub struct AnswerCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Vec<Record>> {
        self.entries
            .lock()
            .get(name)
            .map(|entry| entry.records.clone())
    }

    pub fn touch(&self, name: &str, now: Instant) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.last_activity = now;
        }
    }

    pub fn insert(&self, name: String, records: Vec<Record>, now: Instant) {
        self.entries.lock().insert(
            name,
            CacheEntry {
                records,
                last_activity: now,
            },
        );
    }

    /// Removes every entry unused for longer than the retention window.
    pub fn sweep(&self, now: Instant) {
        self.entries.lock().retain(|name, entry| {
            let keep = entry.last_activity + RETENTION >= now;
            if !keep {
                debug!(name = %name, "expiring cached answer");
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
