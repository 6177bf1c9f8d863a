//! Upload tag correlation
//!
//! A finished upload knows its local path; the node it creates arrives later
//! in a nodes-updated event that only carries the transfer tag. The
//! [`PendingUploads`] cache bridges the two. Either event may come first: a
//! node whose tag is not (yet) cached simply gets no local path.
//!
//! The cache is bounded both ways. Entries older than the TTL are purged on
//! every access, and when full the oldest entry is evicted.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use cloudmirror_core::domain::TransferTag;

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    inserted_at: DateTime<Utc>,
}

/// Bounded TTL map from upload tag to local path
#[derive(Debug)]
pub struct PendingUploads {
    entries: HashMap<TransferTag, Entry>,
    /// Insertion order, possibly holding stale tags already taken
    order: VecDeque<(TransferTag, DateTime<Utc>)>,
    capacity: usize,
    ttl: Duration,
}

impl PendingUploads {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records the local path of a finished upload
    pub fn insert(&mut self, tag: TransferTag, path: PathBuf, now: DateTime<Utc>) {
        self.purge_expired(now);

        self.entries.insert(
            tag,
            Entry {
                path,
                inserted_at: now,
            },
        );
        self.order.push_back((tag, now));

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some((oldest, at)) => {
                    if self.is_current(oldest, at) {
                        debug!(tag = %oldest, "Evicting oldest pending upload tag");
                        self.entries.remove(&oldest);
                    }
                }
                None => break,
            }
        }
    }

    /// Removes and returns the path recorded for `tag`
    pub fn take(&mut self, tag: TransferTag, now: DateTime<Utc>) -> Option<PathBuf> {
        self.purge_expired(now);
        self.entries.remove(&tag).map(|e| e.path)
    }

    /// Drops entries older than the TTL
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        while let Some(&(tag, at)) = self.order.front() {
            let expired = (now - at).to_std().map_or(false, |age| age > self.ttl);
            if !expired {
                break;
            }
            self.order.pop_front();
            if self.is_current(tag, at) {
                debug!(%tag, "Pending upload tag expired without a matching node");
                self.entries.remove(&tag);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// True when `(tag, at)` is the live entry rather than a stale order slot
    fn is_current(&self, tag: TransferTag, at: DateTime<Utc>) -> bool {
        self.entries
            .get(&tag)
            .is_some_and(|entry| entry.inserted_at == at)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn tag(n: i64) -> TransferTag {
        TransferTag::new(n)
    }

    #[test]
    fn test_insert_then_take() {
        let now = Utc::now();
        let mut cache = PendingUploads::new(8, Duration::from_secs(60));
        cache.insert(tag(7), "/a/b.txt".into(), now);
        assert_eq!(cache.take(tag(7), now), Some(PathBuf::from("/a/b.txt")));
        assert_eq!(cache.take(tag(7), now), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_unknown_tag_is_none() {
        let mut cache = PendingUploads::new(8, Duration::from_secs(60));
        assert_eq!(cache.take(tag(1), Utc::now()), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let now = Utc::now();
        let mut cache = PendingUploads::new(2, Duration::from_secs(60));
        cache.insert(tag(1), "/1".into(), now);
        cache.insert(tag(2), "/2".into(), now + ChronoDuration::milliseconds(1));
        cache.insert(tag(3), "/3".into(), now + ChronoDuration::milliseconds(2));

        assert_eq!(cache.len(), 2);
        let later = now + ChronoDuration::milliseconds(3);
        assert_eq!(cache.take(tag(1), later), None);
        assert!(cache.take(tag(2), later).is_some());
        assert!(cache.take(tag(3), later).is_some());
    }

    #[test]
    fn test_expired_entries_are_purged() {
        let now = Utc::now();
        let mut cache = PendingUploads::new(8, Duration::from_secs(10));
        cache.insert(tag(1), "/1".into(), now);
        cache.insert(tag(2), "/2".into(), now + ChronoDuration::seconds(8));

        let later = now + ChronoDuration::seconds(11);
        cache.purge_expired(later);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take(tag(2), later), Some(PathBuf::from("/2")));
    }

    #[test]
    fn test_reinserted_tag_survives_stale_slot() {
        let now = Utc::now();
        let mut cache = PendingUploads::new(8, Duration::from_secs(10));
        cache.insert(tag(1), "/old".into(), now);
        cache.insert(tag(1), "/new".into(), now + ChronoDuration::seconds(9));

        // The first slot expires but must not remove the newer entry
        let later = now + ChronoDuration::seconds(11);
        assert_eq!(cache.take(tag(1), later), Some(PathBuf::from("/new")));
    }
}
