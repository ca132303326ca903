use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::domain::mail::MailFeedEntry;

/// How old an entry may be and still count as new mail.
pub const RECENCY_WINDOW_SECS: i64 = 60;

/// Period after which the whole seen-set is forgotten.
pub const CLEAR_INTERVAL_SECS: u64 = 30 * 60;

/// Per-session filter turning a feed parse into the genuinely new subset.
///
/// Ids are remembered until the next full [`clear`](Self::clear) rather than
/// expiring one by one. Entries that are too old are dropped without being
/// remembered.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&mut self, entries: Vec<MailFeedEntry>, now: DateTime<Utc>) -> Vec<MailFeedEntry> {
        let window = Duration::seconds(RECENCY_WINDOW_SECS);
        let mut fresh = Vec::new();

        for entry in entries {
            if self.seen.contains(&entry.message_id) {
                continue;
            }
            if now - entry.issued_at < window {
                self.seen.insert(entry.message_id.clone());
                fresh.push(entry);
            }
        }

        fresh
    }

    pub fn clear(&mut self) {
        if !self.seen.is_empty() {
            log::debug!("Clearing {} remembered message ids", self.seen.len());
        }
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
